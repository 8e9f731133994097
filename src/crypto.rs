//! Cryptographic primitives for the Password Safe format family.
//!
//! Key stretching and passphrase authenticators for each on-disk version,
//! the record-layer block cipher contexts, the V3 content HMAC and the
//! single randomness entry point.

use blowfish::Blowfish;
use cipher::generic_array::GenericArray;
use cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use twofish::Twofish;
use zeroize::Zeroizing;

use crate::error::{PwsError, PwsResult};

type HmacSha256 = Hmac<Sha256>;

/// Rounds of the V1/V2 rand-hash authenticator.
const RAND_HASH_ROUNDS: usize = 1000;

/// Fills `buf` from the system's cryptographic randomness source.
///
/// # Errors
///
/// Returns [`PwsError::CryptoInit`] if the source is unavailable.
pub fn fill_random(buf: &mut [u8]) -> PwsResult<()> {
    getrandom::getrandom(buf)
        .map_err(|e| PwsError::crypto_init(format!("random source unavailable: {e}")))
}

/// Derives the V1/V2 record-layer key: `SHA1(passphrase || salt)`.
pub(crate) fn stretch_v1v2(passphrase: &[u8], salt: &[u8]) -> Zeroizing<[u8; 20]> {
    let mut hasher = Sha1::new();
    hasher.update(passphrase);
    hasher.update(salt);
    let mut key = Zeroizing::new([0u8; 20]);
    key.copy_from_slice(&hasher.finalize());
    key
}

/// Computes the V1/V2 header authenticator over `rand_stuff`.
///
/// `t = SHA1(stuff || 0x0000 || passphrase)`; Blowfish-ECB under `t` is
/// applied 1000 times to `stuff`; the result is `SHA1(transformed || 0x0000)`.
pub(crate) fn rand_hash(passphrase: &[u8], rand_stuff: &[u8; 8]) -> PwsResult<[u8; 20]> {
    let mut hasher = Sha1::new();
    hasher.update(rand_stuff);
    hasher.update([0u8, 0u8]);
    hasher.update(passphrase);
    let mut temp_key = Zeroizing::new([0u8; 20]);
    temp_key.copy_from_slice(&hasher.finalize());

    let cipher: Blowfish = Blowfish::new_from_slice(&*temp_key)
        .map_err(|_| PwsError::crypto_init("blowfish rejected authenticator key"))?;
    let mut block = GenericArray::clone_from_slice(rand_stuff);
    for _ in 0..RAND_HASH_ROUNDS {
        cipher.encrypt_block(&mut block);
    }

    let mut hasher = Sha1::new();
    hasher.update(&block);
    hasher.update([0u8, 0u8]);
    let mut out = [0u8; 20];
    out.copy_from_slice(&hasher.finalize());
    Ok(out)
}

/// Key material unwrapped from a verified V3 header.
pub(crate) struct StretchedKeysV3 {
    /// Record-layer Twofish key.
    pub record_key: Zeroizing<[u8; 32]>,
    /// HMAC-SHA256 key for the end-of-file tag.
    pub hmac_key: Zeroizing<[u8; 32]>,
}

/// Iterated SHA-256 stretch of a V3 passphrase.
///
/// `P = SHA256(passphrase || salt)`, then `P = SHA256(P)` for `iterations`
/// rounds.
pub(crate) fn stretch_v3(
    passphrase: &[u8],
    salt: &[u8; 32],
    iterations: u32,
) -> Zeroizing<[u8; 32]> {
    let mut hasher = Sha256::new();
    hasher.update(passphrase);
    hasher.update(salt);
    let mut p = Zeroizing::new([0u8; 32]);
    p.copy_from_slice(&hasher.finalize());
    for _ in 0..iterations {
        let digest = Sha256::digest(*p);
        p.copy_from_slice(&digest);
    }
    p
}

/// Hash of a stretched key as stored in the V3 header.
pub(crate) fn stretched_hash(stretched: &[u8; 32]) -> [u8; 32] {
    let digest = Sha256::digest(stretched);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Verifies a stretched key against the stored `H(P)` and unwraps the V3
/// record and HMAC keys from the header key blocks.
pub(crate) fn unwrap_keys_v3(
    stretched: &[u8; 32],
    stored_hash: &[u8; 32],
    b1b2: &[u8; 32],
    b3b4: &[u8; 32],
) -> PwsResult<StretchedKeysV3> {
    let check = stretched_hash(stretched);
    if !bool::from(check[..].ct_eq(&stored_hash[..])) {
        return Err(PwsError::WrongPassphrase);
    }

    let cipher = Twofish::new_from_slice(stretched)
        .map_err(|_| PwsError::crypto_init("twofish rejected stretched key"))?;
    let mut record_key = Zeroizing::new([0u8; 32]);
    let mut hmac_key = Zeroizing::new([0u8; 32]);
    decrypt_key_blocks(&cipher, b1b2, &mut record_key);
    decrypt_key_blocks(&cipher, b3b4, &mut hmac_key);
    Ok(StretchedKeysV3 {
        record_key,
        hmac_key,
    })
}

/// Wraps a 32-byte key as two Twofish-ECB blocks under the stretched key.
pub(crate) fn wrap_key_v3(stretched: &[u8; 32], key: &[u8; 32]) -> PwsResult<[u8; 32]> {
    let cipher = Twofish::new_from_slice(stretched)
        .map_err(|_| PwsError::crypto_init("twofish rejected stretched key"))?;
    let mut out = [0u8; 32];
    for i in 0..2 {
        let mut block = GenericArray::clone_from_slice(&key[i * 16..(i + 1) * 16]);
        cipher.encrypt_block(&mut block);
        out[i * 16..(i + 1) * 16].copy_from_slice(&block);
    }
    Ok(out)
}

fn decrypt_key_blocks(cipher: &Twofish, wrapped: &[u8; 32], out: &mut [u8; 32]) {
    for i in 0..2 {
        let mut block = GenericArray::clone_from_slice(&wrapped[i * 16..(i + 1) * 16]);
        cipher.decrypt_block(&mut block);
        out[i * 16..(i + 1) * 16].copy_from_slice(&block);
    }
}

/// Block cipher context for the record layer of one file.
///
/// Wraps the per-version cipher together with any CBC chain state. Payloads
/// at this layer are always block-aligned; there is no padding.
pub(crate) enum RecordCipher {
    /// V1: Blowfish in ECB mode.
    BlowfishEcb(Box<Blowfish>),
    /// V2: Blowfish in CBC mode seeded with the header IV.
    BlowfishCbc {
        cipher: Box<Blowfish>,
        chain: [u8; 8],
    },
    /// V3: Twofish in CBC mode seeded with the header IV.
    TwofishCbc {
        cipher: Box<Twofish>,
        chain: [u8; 16],
    },
}

impl RecordCipher {
    pub(crate) fn blowfish_ecb(key: &[u8]) -> PwsResult<Self> {
        let cipher = Blowfish::new_from_slice(key)
            .map_err(|_| PwsError::crypto_init("blowfish rejected record key"))?;
        Ok(Self::BlowfishEcb(Box::new(cipher)))
    }

    pub(crate) fn blowfish_cbc(key: &[u8], iv: &[u8; 8]) -> PwsResult<Self> {
        let cipher = Blowfish::new_from_slice(key)
            .map_err(|_| PwsError::crypto_init("blowfish rejected record key"))?;
        Ok(Self::BlowfishCbc {
            cipher: Box::new(cipher),
            chain: *iv,
        })
    }

    pub(crate) fn twofish_cbc(key: &[u8; 32], iv: &[u8; 16]) -> PwsResult<Self> {
        let cipher = Twofish::new_from_slice(key)
            .map_err(|_| PwsError::crypto_init("twofish rejected record key"))?;
        Ok(Self::TwofishCbc {
            cipher: Box::new(cipher),
            chain: *iv,
        })
    }

    /// Block length of the wrapped cipher.
    pub(crate) fn block_len(&self) -> usize {
        match self {
            Self::BlowfishEcb(_) | Self::BlowfishCbc { .. } => 8,
            Self::TwofishCbc { .. } => 16,
        }
    }

    /// Decrypts one block in place. `block` must be exactly one block long.
    pub(crate) fn decrypt_block(&mut self, block: &mut [u8]) {
        debug_assert_eq!(block.len(), self.block_len());
        match self {
            Self::BlowfishEcb(cipher) => {
                cipher.decrypt_block(GenericArray::from_mut_slice(block));
            }
            Self::BlowfishCbc { cipher, chain } => {
                let mut ciphertext = [0u8; 8];
                ciphertext.copy_from_slice(block);
                cipher.decrypt_block(GenericArray::from_mut_slice(block));
                for (b, c) in block.iter_mut().zip(chain.iter()) {
                    *b ^= c;
                }
                *chain = ciphertext;
            }
            Self::TwofishCbc { cipher, chain } => {
                let mut ciphertext = [0u8; 16];
                ciphertext.copy_from_slice(block);
                cipher.decrypt_block(GenericArray::from_mut_slice(block));
                for (b, c) in block.iter_mut().zip(chain.iter()) {
                    *b ^= c;
                }
                *chain = ciphertext;
            }
        }
    }

    /// Encrypts one block in place. `block` must be exactly one block long.
    pub(crate) fn encrypt_block(&mut self, block: &mut [u8]) {
        debug_assert_eq!(block.len(), self.block_len());
        match self {
            Self::BlowfishEcb(cipher) => {
                cipher.encrypt_block(GenericArray::from_mut_slice(block));
            }
            Self::BlowfishCbc { cipher, chain } => {
                for (b, c) in block.iter_mut().zip(chain.iter()) {
                    *b ^= c;
                }
                cipher.encrypt_block(GenericArray::from_mut_slice(block));
                chain.copy_from_slice(block);
            }
            Self::TwofishCbc { cipher, chain } => {
                for (b, c) in block.iter_mut().zip(chain.iter()) {
                    *b ^= c;
                }
                cipher.encrypt_block(GenericArray::from_mut_slice(block));
                chain.copy_from_slice(block);
            }
        }
    }

    /// Decrypts a block-aligned buffer in place.
    pub(crate) fn decrypt(&mut self, buf: &mut [u8]) {
        let block_len = self.block_len();
        debug_assert_eq!(buf.len() % block_len, 0);
        for block in buf.chunks_exact_mut(block_len) {
            self.decrypt_block(block);
        }
    }

    /// Encrypts a block-aligned buffer in place.
    pub(crate) fn encrypt(&mut self, buf: &mut [u8]) {
        let block_len = self.block_len();
        debug_assert_eq!(buf.len() % block_len, 0);
        for block in buf.chunks_exact_mut(block_len) {
            self.encrypt_block(block);
        }
    }
}

/// HMAC-SHA256 accumulator over plaintext field payloads (V3).
pub(crate) struct RecordHmac(HmacSha256);

impl RecordHmac {
    pub(crate) fn new(key: &[u8]) -> PwsResult<Self> {
        let mac = <HmacSha256 as KeyInit>::new_from_slice(key)
            .map_err(|_| PwsError::crypto_init("hmac rejected key"))?;
        Ok(Self(mac))
    }

    pub(crate) fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub(crate) fn finalize(self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.0.finalize().into_bytes());
        out
    }

    /// Verifies the accumulated content against the trailing tag.
    pub(crate) fn verify(self, tag: &[u8; 32]) -> PwsResult<()> {
        self.0
            .verify_slice(tag)
            .map_err(|_| PwsError::corrupt("content authentication tag mismatch"))
    }
}
