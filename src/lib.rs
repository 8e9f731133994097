//! Password Safe database files for Rust.
//!
//! Reads, mutates and writes encrypted password databases in the Password
//! Safe on-disk formats V1, V2 and V3: passphrase-based key stretching,
//! block-chained decryption of typed field streams, an in-memory cage that
//! keeps every decrypted record re-encrypted under a process-local key, and
//! a sparse entry store that projects records into list-ready views.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use pwsafe_core::{
//!     field_type, MemoryStorage, NullLogger, PwsField, PwsFile, PwsRecord, PwsVersion,
//! };
//!
//! # fn main() -> pwsafe_core::PwsResult<()> {
//! let storage = Arc::new(MemoryStorage::new());
//! let mut file = PwsFile::create(Arc::clone(&storage), PwsVersion::V2, Arc::new(NullLogger));
//! file.set_passphrase(&mut b"secret".to_vec())?;
//!
//! let mut record = PwsRecord::with_uuid(PwsVersion::V2)?;
//! record.set_field(PwsField::text(field_type::TITLE, "gmail"));
//! record.set_field(PwsField::text(field_type::PASSWORD, "p@ss"));
//! file.add(record)?;
//! file.save()?;
//!
//! let reopened = PwsFile::open(
//!     storage,
//!     &mut b"secret".to_vec(),
//!     PwsVersion::V2,
//!     Arc::new(NullLogger),
//! )?;
//! assert_eq!(reopened.record_count(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! # Thread safety
//!
//! Database handles are single-owner; sharing one across threads requires
//! external synchronization.

mod cage;
mod crypto;
mod entry;
mod error;
mod field;
mod file;
mod io;
mod logger;
mod policy;
mod record;
mod storage;
mod store;

pub use crate::cage::SealedRecord;
pub use crate::crypto::fill_random;
pub use crate::entry::PwsEntryBean;
pub use crate::error::{PwsError, PwsResult};
pub use crate::field::{field_type, FieldValue, PwsField, PwsVersion};
pub use crate::file::{LoadListener, PwsFile, RecordIter};
pub use crate::logger::{LogLevel, Logger, NullLogger};
pub use crate::policy::{
    is_weak, make_password, PassphrasePolicy, DIGIT_CHARS, EASYVISION_DIGIT_CHARS,
    EASYVISION_LC_CHARS, EASYVISION_SYMBOL_CHARS, EASYVISION_UC_CHARS, LOWERCASE_CHARS,
    MIN_PASSWORD_LEN, SYMBOL_CHARS, UPPERCASE_CHARS,
};
pub use crate::record::PwsRecord;
pub use crate::storage::{MemoryStorage, PwsStorage, ReadStream, WriteStream};
pub use crate::store::{default_sparse_fields, PwsEntryStore};
