//! In-memory protection of decrypted records.
//!
//! Every record decoded from a file is immediately re-encrypted under a
//! process-local key, so plaintext is never held at rest between accesses.
//! Plaintext exists only in the short-lived buffer inside
//! [`MemoryCage::unseal`]; once the caller drops the returned record, no
//! plaintext remains reachable from the cage or the sealed list.

use std::fmt;

use blowfish::Blowfish;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use zeroize::{Zeroize, Zeroizing};

use crate::crypto::fill_random;
use crate::error::{PwsError, PwsResult};
use crate::record::PwsRecord;

type CageEncryptor = cbc::Encryptor<Blowfish>;
type CageDecryptor = cbc::Decryptor<Blowfish>;

/// Length of the cage key in bytes.
const KEY_LENGTH: usize = 16;
/// Length of the cage IV in bytes.
const IV_LENGTH: usize = 8;

/// A record encrypted under the memory key. Only the cage that produced it
/// can open it.
#[derive(Clone)]
pub struct SealedRecord {
    iv: [u8; IV_LENGTH],
    ciphertext: Vec<u8>,
}

impl fmt::Debug for SealedRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SealedRecord({} bytes)", self.ciphertext.len())
    }
}

/// An opaque byte payload sealed under the memory key (the passphrase).
#[derive(Clone)]
pub(crate) struct SealedBytes {
    iv: [u8; IV_LENGTH],
    ciphertext: Vec<u8>,
}

/// Process-local encryption context for plaintext at rest.
///
/// The key and IV are allocated lazily on the first seal, zeroed on
/// [`dispose`](Self::dispose), and never written to persistent storage.
/// Sealed values carry the IV they were sealed under, so
/// [`rotate_iv`](Self::rotate_iv) only affects subsequent seals.
pub struct MemoryCage {
    key: Zeroizing<[u8; KEY_LENGTH]>,
    iv: [u8; IV_LENGTH],
    ready: bool,
    disposed: bool,
}

impl MemoryCage {
    pub(crate) fn new() -> Self {
        Self {
            key: Zeroizing::new([0u8; KEY_LENGTH]),
            iv: [0u8; IV_LENGTH],
            ready: false,
            disposed: false,
        }
    }

    fn material(&mut self) -> PwsResult<(&[u8; KEY_LENGTH], &[u8; IV_LENGTH])> {
        if self.disposed {
            return Err(PwsError::Disposed);
        }
        if !self.ready {
            fill_random(&mut *self.key)?;
            fill_random(&mut self.iv)?;
            self.ready = true;
        }
        Ok((&self.key, &self.iv))
    }

    /// Seals a record: explicit field-list serialization, then
    /// Blowfish-CBC-PKCS#7 under the memory key.
    pub(crate) fn seal(&mut self, record: &PwsRecord) -> PwsResult<SealedRecord> {
        let plain = Zeroizing::new(record.to_cage_bytes());
        let sealed = self.seal_bytes(&plain)?;
        Ok(SealedRecord {
            iv: sealed.iv,
            ciphertext: sealed.ciphertext,
        })
    }

    /// Seals an opaque byte payload.
    pub(crate) fn seal_bytes(&mut self, plain: &[u8]) -> PwsResult<SealedBytes> {
        let (key, iv) = self.material()?;
        let encryptor = CageEncryptor::new_from_slices(key, iv)
            .map_err(|_| PwsError::memory_key("cipher rejected memory key"))?;
        let ciphertext = encryptor.encrypt_padded_vec_mut::<Pkcs7>(plain);
        Ok(SealedBytes {
            iv: *iv,
            ciphertext,
        })
    }

    /// Opens a sealed record.
    pub(crate) fn unseal(&self, sealed: &SealedRecord) -> PwsResult<PwsRecord> {
        let plain = Zeroizing::new(self.unseal_raw(&sealed.iv, &sealed.ciphertext)?);
        PwsRecord::from_cage_bytes(&plain)
    }

    /// Opens a sealed byte payload.
    pub(crate) fn unseal_bytes(&self, sealed: &SealedBytes) -> PwsResult<Zeroizing<Vec<u8>>> {
        Ok(Zeroizing::new(
            self.unseal_raw(&sealed.iv, &sealed.ciphertext)?,
        ))
    }

    fn unseal_raw(&self, iv: &[u8; IV_LENGTH], ciphertext: &[u8]) -> PwsResult<Vec<u8>> {
        if self.disposed {
            return Err(PwsError::Disposed);
        }
        if !self.ready {
            return Err(PwsError::memory_key("unseal before any seal"));
        }
        let decryptor = CageDecryptor::new_from_slices(&*self.key, iv)
            .map_err(|_| PwsError::memory_key("cipher rejected memory key"))?;
        decryptor
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| PwsError::memory_key("bad padding in sealed object"))
    }

    /// Reseeds the IV used for subsequent seals. Existing sealed values keep
    /// the IV they were sealed under and stay openable.
    pub(crate) fn rotate_iv(&mut self) -> PwsResult<()> {
        if self.disposed {
            return Err(PwsError::Disposed);
        }
        if self.ready {
            fill_random(&mut self.iv)?;
        }
        Ok(())
    }

    /// Zeroes the key and IV. Every later cage operation fails with
    /// [`PwsError::Disposed`].
    pub(crate) fn dispose(&mut self) {
        self.key.zeroize();
        self.iv.zeroize();
        self.ready = false;
        self.disposed = true;
    }
}

impl fmt::Debug for MemoryCage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryCage")
            .field("key", &"[REDACTED]")
            .field("ready", &self.ready)
            .field("disposed", &self.disposed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{field_type, PwsField, PwsVersion};

    fn sample_record() -> PwsRecord {
        let mut record = PwsRecord::new(PwsVersion::V2);
        record.set_field(PwsField::text(field_type::TITLE, "gmail"));
        record.set_field(PwsField::text(field_type::PASSWORD, "p@ss"));
        record
    }

    #[test]
    fn test_seal_unseal_roundtrip() {
        let mut cage = MemoryCage::new();
        let record = sample_record();
        let sealed = cage.seal(&record).unwrap();
        assert_ne!(sealed.ciphertext, record.to_cage_bytes());
        assert_eq!(cage.unseal(&sealed).unwrap(), record);
    }

    #[test]
    fn test_seal_bytes_roundtrip() {
        let mut cage = MemoryCage::new();
        let sealed = cage.seal_bytes(b"secret passphrase").unwrap();
        let opened = cage.unseal_bytes(&sealed).unwrap();
        assert_eq!(&**opened, b"secret passphrase");
    }

    #[test]
    fn test_unseal_before_seal_fails() {
        let cage = MemoryCage::new();
        let sealed = SealedRecord {
            iv: [0u8; IV_LENGTH],
            ciphertext: vec![0u8; 16],
        };
        assert!(matches!(
            cage.unseal(&sealed),
            Err(PwsError::MemoryKey(_))
        ));
    }

    #[test]
    fn test_rotate_iv_keeps_old_seals_openable() {
        let mut cage = MemoryCage::new();
        let record = sample_record();
        let sealed_before = cage.seal(&record).unwrap();
        cage.rotate_iv().unwrap();
        let sealed_after = cage.seal(&record).unwrap();

        assert_ne!(sealed_before.iv, sealed_after.iv);
        assert_eq!(cage.unseal(&sealed_before).unwrap(), record);
        assert_eq!(cage.unseal(&sealed_after).unwrap(), record);
    }

    #[test]
    fn test_tampered_ciphertext_is_memory_key_error() {
        let mut cage = MemoryCage::new();
        let mut sealed = cage.seal(&sample_record()).unwrap();
        let last = sealed.ciphertext.len() - 1;
        sealed.ciphertext[last] ^= 0xFF;
        assert!(matches!(
            cage.unseal(&sealed),
            Err(PwsError::MemoryKey(_))
        ));
    }

    #[test]
    fn test_dispose_poisons_everything() {
        let mut cage = MemoryCage::new();
        let sealed = cage.seal(&sample_record()).unwrap();
        cage.dispose();

        assert!(matches!(cage.unseal(&sealed), Err(PwsError::Disposed)));
        assert!(matches!(
            cage.seal(&sample_record()),
            Err(PwsError::Disposed)
        ));
        assert!(matches!(cage.rotate_iv(), Err(PwsError::Disposed)));
    }
}
