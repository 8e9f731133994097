//! File headers and passphrase authenticators.

use std::io::Read;

use subtle::ConstantTimeEq;

use crate::crypto::{self, RecordCipher, StretchedKeysV3};
use crate::error::{PwsError, PwsResult};
use crate::field::PwsVersion;
use crate::io::BlockReader;

use super::format::{
    HASH_LENGTH, HEADER_BODY_LENGTH_V3, HEADER_LENGTH_V1V2, IV_LENGTH_V1V2, IV_LENGTH_V3,
    SALT_LENGTH_V1V2, SALT_LENGTH_V3, STUFF_LENGTH, V3_MAGIC, V3_MAX_ITERATIONS,
};

/// Header of a V1 or V2 file.
///
/// # Layout (56 bytes)
///
/// ```text
/// Offset  Size  Field
/// ------  ----  -----
/// 0       8     RandStuff (random bytes)
/// 8       20    RandHash  (authenticator over RandStuff)
/// 28      20    Salt
/// 48      8     IV        (record-layer CBC seed, V2 only)
/// ```
pub(crate) struct HeaderV1V2 {
    pub rand_stuff: [u8; STUFF_LENGTH],
    pub rand_hash: [u8; HASH_LENGTH],
    pub salt: [u8; SALT_LENGTH_V1V2],
    pub iv: [u8; IV_LENGTH_V1V2],
}

impl HeaderV1V2 {
    /// Reads a header from the start of a stream. Anything too short to be
    /// one is not a member of this format family.
    pub(crate) fn read<R: Read>(reader: &mut BlockReader<R>) -> PwsResult<Self> {
        let mut buf = [0u8; HEADER_LENGTH_V1V2];
        reader.read_exact(&mut buf).map_err(|e| match e {
            PwsError::EndOfFile | PwsError::Truncated { .. } => PwsError::UnsupportedFileVersion,
            other => other,
        })?;

        let mut header = Self {
            rand_stuff: [0u8; STUFF_LENGTH],
            rand_hash: [0u8; HASH_LENGTH],
            salt: [0u8; SALT_LENGTH_V1V2],
            iv: [0u8; IV_LENGTH_V1V2],
        };
        header.rand_stuff.copy_from_slice(&buf[0..8]);
        header.rand_hash.copy_from_slice(&buf[8..28]);
        header.salt.copy_from_slice(&buf[28..48]);
        header.iv.copy_from_slice(&buf[48..56]);
        Ok(header)
    }

    /// Encodes the header to bytes.
    pub(crate) fn encode(&self) -> [u8; HEADER_LENGTH_V1V2] {
        let mut buf = [0u8; HEADER_LENGTH_V1V2];
        buf[0..8].copy_from_slice(&self.rand_stuff);
        buf[8..28].copy_from_slice(&self.rand_hash);
        buf[28..48].copy_from_slice(&self.salt);
        buf[48..56].copy_from_slice(&self.iv);
        buf
    }

    /// Generates a fresh header for `passphrase`.
    pub(crate) fn generate(passphrase: &[u8]) -> PwsResult<Self> {
        let mut rand_stuff = [0u8; STUFF_LENGTH];
        crypto::fill_random(&mut rand_stuff)?;
        let rand_hash = crypto::rand_hash(passphrase, &rand_stuff)?;
        let mut salt = [0u8; SALT_LENGTH_V1V2];
        crypto::fill_random(&mut salt)?;
        let mut iv = [0u8; IV_LENGTH_V1V2];
        crypto::fill_random(&mut iv)?;
        Ok(Self {
            rand_stuff,
            rand_hash,
            salt,
            iv,
        })
    }

    /// Verifies `passphrase` against the stored random hash.
    pub(crate) fn verify(&self, passphrase: &[u8]) -> PwsResult<()> {
        let computed = crypto::rand_hash(passphrase, &self.rand_stuff)?;
        if !bool::from(computed[..].ct_eq(&self.rand_hash[..])) {
            return Err(PwsError::WrongPassphrase);
        }
        Ok(())
    }

    /// Record-layer cipher for this header: Blowfish-ECB for V1,
    /// Blowfish-CBC seeded with the header IV for V2.
    pub(crate) fn record_cipher(
        &self,
        version: PwsVersion,
        passphrase: &[u8],
    ) -> PwsResult<RecordCipher> {
        let key = crypto::stretch_v1v2(passphrase, &self.salt);
        match version {
            PwsVersion::V1 => RecordCipher::blowfish_ecb(&*key),
            PwsVersion::V2 => RecordCipher::blowfish_cbc(&*key, &self.iv),
            PwsVersion::V3 => Err(PwsError::UnsupportedFileVersion),
        }
    }
}

/// Header of a V3 file.
///
/// # Layout (152 bytes)
///
/// ```text
/// Offset  Size  Field
/// ------  ----  -----
/// 0       4     magic ("PWS3")
/// 4       32    Salt
/// 36      4     N (stretch iterations, u32 LE)
/// 40      32    H(P) (hash of the stretched key)
/// 72      32    B1B2 (wrapped record key)
/// 104     32    B3B4 (wrapped HMAC key)
/// 136     16    IV   (record-layer CBC seed)
/// ```
pub(crate) struct HeaderV3 {
    pub salt: [u8; SALT_LENGTH_V3],
    pub iterations: u32,
    pub stretched_hash: [u8; 32],
    pub b1b2: [u8; 32],
    pub b3b4: [u8; 32],
    pub iv: [u8; IV_LENGTH_V3],
}

impl HeaderV3 {
    /// Reads a header from the start of a stream. A missing or mismatching
    /// magic means the stream is not V3; truncation after a good magic is
    /// corruption.
    pub(crate) fn read<R: Read>(reader: &mut BlockReader<R>) -> PwsResult<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic).map_err(|e| match e {
            PwsError::EndOfFile | PwsError::Truncated { .. } => PwsError::UnsupportedFileVersion,
            other => other,
        })?;
        if &magic != V3_MAGIC {
            return Err(PwsError::UnsupportedFileVersion);
        }

        let mut buf = [0u8; HEADER_BODY_LENGTH_V3];
        reader.read_exact(&mut buf).map_err(|e| match e {
            PwsError::EndOfFile | PwsError::Truncated { .. } => {
                PwsError::corrupt("truncated V3 header")
            }
            other => other,
        })?;

        let mut header = Self {
            salt: [0u8; SALT_LENGTH_V3],
            iterations: 0,
            stretched_hash: [0u8; 32],
            b1b2: [0u8; 32],
            b3b4: [0u8; 32],
            iv: [0u8; IV_LENGTH_V3],
        };
        header.salt.copy_from_slice(&buf[0..32]);
        header.iterations = u32::from_le_bytes([buf[32], buf[33], buf[34], buf[35]]);
        header.stretched_hash.copy_from_slice(&buf[36..68]);
        header.b1b2.copy_from_slice(&buf[68..100]);
        header.b3b4.copy_from_slice(&buf[100..132]);
        header.iv.copy_from_slice(&buf[132..148]);

        if header.iterations > V3_MAX_ITERATIONS {
            return Err(PwsError::corrupt(format!(
                "unreasonable stretch iteration count {}",
                header.iterations
            )));
        }
        Ok(header)
    }

    /// Encodes the header to bytes, magic included.
    pub(crate) fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + HEADER_BODY_LENGTH_V3);
        buf.extend_from_slice(V3_MAGIC);
        buf.extend_from_slice(&self.salt);
        buf.extend_from_slice(&self.iterations.to_le_bytes());
        buf.extend_from_slice(&self.stretched_hash);
        buf.extend_from_slice(&self.b1b2);
        buf.extend_from_slice(&self.b3b4);
        buf.extend_from_slice(&self.iv);
        buf
    }

    /// Verifies the passphrase and unwraps the record and HMAC keys.
    pub(crate) fn verify(&self, passphrase: &[u8]) -> PwsResult<StretchedKeysV3> {
        let stretched = crypto::stretch_v3(passphrase, &self.salt, self.iterations);
        crypto::unwrap_keys_v3(&stretched, &self.stretched_hash, &self.b1b2, &self.b3b4)
    }

    /// Generates a fresh header plus record/HMAC keys for `passphrase`.
    pub(crate) fn generate(
        passphrase: &[u8],
        iterations: u32,
    ) -> PwsResult<(Self, StretchedKeysV3)> {
        let mut salt = [0u8; SALT_LENGTH_V3];
        crypto::fill_random(&mut salt)?;
        let stretched = crypto::stretch_v3(passphrase, &salt, iterations);
        let stretched_hash = crypto::stretched_hash(&stretched);

        let mut record_key = zeroize::Zeroizing::new([0u8; 32]);
        let mut hmac_key = zeroize::Zeroizing::new([0u8; 32]);
        crypto::fill_random(&mut *record_key)?;
        crypto::fill_random(&mut *hmac_key)?;
        let b1b2 = crypto::wrap_key_v3(&stretched, &record_key)?;
        let b3b4 = crypto::wrap_key_v3(&stretched, &hmac_key)?;

        let mut iv = [0u8; IV_LENGTH_V3];
        crypto::fill_random(&mut iv)?;

        let header = Self {
            salt,
            iterations,
            stretched_hash,
            b1b2,
            b3b4,
            iv,
        };
        let keys = StretchedKeysV3 {
            record_key,
            hmac_key,
        };
        Ok((header, keys))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_v1v2_header_roundtrip_and_verify() {
        let header = HeaderV1V2::generate(b"secret").unwrap();
        let encoded = header.encode();
        assert_eq!(encoded.len(), HEADER_LENGTH_V1V2);

        let mut reader = BlockReader::new(&encoded[..]);
        let decoded = HeaderV1V2::read(&mut reader).unwrap();
        assert_eq!(decoded.rand_stuff, header.rand_stuff);
        assert_eq!(decoded.salt, header.salt);

        assert!(decoded.verify(b"secret").is_ok());
        assert!(matches!(
            decoded.verify(b"wrong"),
            Err(PwsError::WrongPassphrase)
        ));
    }

    #[test]
    fn test_v1v2_header_too_short() {
        let mut reader = BlockReader::new(&[0u8; 10][..]);
        assert!(matches!(
            HeaderV1V2::read(&mut reader),
            Err(PwsError::UnsupportedFileVersion)
        ));
    }

    #[test]
    fn test_v3_header_roundtrip_and_verify() {
        let (header, keys) = HeaderV3::generate(b"secret", 64).unwrap();
        let encoded = header.encode();
        assert_eq!(encoded.len(), 4 + HEADER_BODY_LENGTH_V3);

        let mut reader = BlockReader::new(&encoded[..]);
        let decoded = HeaderV3::read(&mut reader).unwrap();
        assert_eq!(decoded.iterations, 64);
        assert_eq!(decoded.salt, header.salt);

        let opened = decoded.verify(b"secret").unwrap();
        assert_eq!(*opened.record_key, *keys.record_key);
        assert_eq!(*opened.hmac_key, *keys.hmac_key);

        assert!(matches!(
            decoded.verify(b"wrong"),
            Err(PwsError::WrongPassphrase)
        ));
    }

    #[test]
    fn test_v3_header_bad_magic() {
        let mut reader = BlockReader::new(&b"NOPE            "[..]);
        assert!(matches!(
            HeaderV3::read(&mut reader),
            Err(PwsError::UnsupportedFileVersion)
        ));
    }

    #[test]
    fn test_v3_header_truncated_after_magic() {
        let mut bytes = V3_MAGIC.to_vec();
        bytes.extend_from_slice(&[0u8; 20]);
        let mut reader = BlockReader::new(&bytes[..]);
        assert!(matches!(
            HeaderV3::read(&mut reader),
            Err(PwsError::CorruptFile(_))
        ));
    }

    #[test]
    fn test_v3_header_insane_iterations() {
        let (header, _) = HeaderV3::generate(b"secret", 16).unwrap();
        let mut encoded = header.encode();
        encoded[36..40].copy_from_slice(&u32::MAX.to_le_bytes());
        let mut reader = BlockReader::new(&encoded[..]);
        assert!(matches!(
            HeaderV3::read(&mut reader),
            Err(PwsError::CorruptFile(_))
        ));
    }
}
