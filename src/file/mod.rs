//! Database file handles for the Password Safe format family.
//!
//! A [`PwsFile`] owns the storage, the in-memory cage and the sealed record
//! list. Opening streams records out of the storage, seals each valid one
//! and notifies any load listener; saving re-derives fresh header material
//! and writes the records back in canonical order.
//!
//! # Thread safety
//!
//! A `PwsFile` is single-owner. Sharing one across threads requires external
//! synchronization; handles are moved, never cloned. Iteration borrows the
//! file, so mutating while iterating is rejected at compile time.

mod codec;
mod format;
mod header;

use std::fmt;
use std::io::{Read, Write};
use std::sync::Arc;

use zeroize::{Zeroize, Zeroizing};

use crate::cage::{MemoryCage, SealedBytes, SealedRecord};
use crate::crypto::{RecordCipher, RecordHmac};
use crate::error::{PwsError, PwsResult};
use crate::field::{field_type, PwsVersion};
use crate::io::{BlockReader, BlockWriter};
use crate::logger::{Log, Logger};
use crate::record::PwsRecord;
use crate::storage::PwsStorage;

use header::{HeaderV1V2, HeaderV3};

/// Callback invoked during open for every record in file order, before the
/// next record begins decoding. Invalid records are delivered too; only
/// valid ones enter the sealed list.
pub trait LoadListener {
    /// Called with each record as it is decoded.
    fn loaded(&mut self, record: &PwsRecord);
}

/// Handle to a password database.
///
/// The database moves through `Empty` (freshly created), `Loaded` (opened or
/// saved), `Dirty` (mutated) and `Disposed` states; [`Self::is_modified`]
/// reflects the dirty leg and a successful [`Self::save`] resets it.
pub struct PwsFile<S: PwsStorage> {
    storage: Arc<S>,
    version: PwsVersion,
    cage: MemoryCage,
    passphrase: Option<SealedBytes>,
    sealed_records: Vec<SealedRecord>,
    modified: bool,
    read_only: bool,
    last_storage_change: Option<u64>,
    disposed: bool,
    v3_iterations: u32,
    log: Log,
}

impl<S: PwsStorage> PwsFile<S> {
    /// Creates a new, empty database. A passphrase must be set before the
    /// first save.
    #[must_use]
    pub fn create(storage: Arc<S>, version: PwsVersion, logger: Arc<dyn Logger>) -> Self {
        Self {
            storage,
            version,
            cage: MemoryCage::new(),
            passphrase: None,
            sealed_records: Vec::new(),
            modified: false,
            read_only: false,
            last_storage_change: None,
            disposed: false,
            v3_iterations: format::V3_DEFAULT_ITERATIONS,
            log: Log::new(logger),
        }
    }

    /// Opens a database of a known version.
    ///
    /// The passphrase buffer is sealed into the memory cage and zeroed
    /// before this returns, success or failure.
    ///
    /// # Errors
    ///
    /// [`PwsError::UnsupportedFileVersion`] if the stream is not a member of
    /// `version`'s family, [`PwsError::WrongPassphrase`] if authentication
    /// fails (with no further bytes consumed), [`PwsError::CorruptFile`] for
    /// malformed record streams.
    pub fn open(
        storage: Arc<S>,
        passphrase: &mut Vec<u8>,
        version: PwsVersion,
        logger: Arc<dyn Logger>,
    ) -> PwsResult<Self> {
        Self::open_with_listener(storage, passphrase, version, logger, None)
    }

    /// Opens a database, delivering every decoded record to `listener`
    /// while the stream is read. This lets a projection layer populate
    /// itself without a second pass.
    pub fn open_with_listener(
        storage: Arc<S>,
        passphrase: &mut Vec<u8>,
        version: PwsVersion,
        logger: Arc<dyn Logger>,
        listener: Option<&mut dyn LoadListener>,
    ) -> PwsResult<Self> {
        let mut file = Self::create(Arc::clone(&storage), version, logger);
        let result = file.read_all(passphrase, listener);
        passphrase.zeroize();
        result?;
        if !file.storage.is_writable() {
            file.read_only = true;
        }
        Ok(file)
    }

    /// Opens a database of unknown version: V3 is recognized by its magic,
    /// then V2 by its format-description record, then V1.
    ///
    /// A wrong passphrase short-circuits the probing.
    pub fn open_any(
        storage: Arc<S>,
        passphrase: &mut Vec<u8>,
        logger: Arc<dyn Logger>,
    ) -> PwsResult<Self> {
        let pass = Zeroizing::new(std::mem::take(passphrase));
        for version in [PwsVersion::V3, PwsVersion::V2, PwsVersion::V1] {
            let mut attempt = pass.clone();
            match Self::open(
                Arc::clone(&storage),
                &mut attempt,
                version,
                Arc::clone(&logger),
            ) {
                Ok(file) => return Ok(file),
                Err(PwsError::UnsupportedFileVersion) => continue,
                Err(other) => return Err(other),
            }
        }
        Err(PwsError::UnsupportedFileVersion)
    }

    fn read_all(
        &mut self,
        passphrase: &[u8],
        mut listener: Option<&mut dyn LoadListener>,
    ) -> PwsResult<()> {
        let storage = Arc::clone(&self.storage);
        let stream = storage.open_for_read()?;
        let mut reader = BlockReader::new(stream);
        match self.version {
            PwsVersion::V1 | PwsVersion::V2 => {
                self.read_all_v1v2(&mut reader, passphrase, &mut listener)?;
            }
            PwsVersion::V3 => self.read_all_v3(&mut reader, passphrase, &mut listener)?,
        }
        reader.into_inner().close()?;
        self.last_storage_change = Some(self.storage.last_modified()?);
        Ok(())
    }

    fn read_all_v1v2<R: Read>(
        &mut self,
        reader: &mut BlockReader<R>,
        passphrase: &[u8],
        listener: &mut Option<&mut dyn LoadListener>,
    ) -> PwsResult<()> {
        let header = HeaderV1V2::read(reader)?;
        header.verify(passphrase)?;
        self.passphrase = Some(self.cage.seal_bytes(passphrase)?);
        let mut cipher = header.record_cipher(self.version, passphrase)?;

        if self.version == PwsVersion::V2 {
            read_v2_description(reader, &mut cipher)?;
        }

        let mut count = 0usize;
        loop {
            match codec::read_record_v1v2(reader, &mut cipher, self.version) {
                Ok(record) => {
                    if record.is_valid() {
                        let sealed = self.cage.seal(&record)?;
                        self.sealed_records.push(sealed);
                    }
                    if let Some(l) = listener.as_mut() {
                        l.loaded(&record);
                    }
                    count += 1;
                }
                Err(PwsError::EndOfFile) => break,
                Err(other) => return Err(other),
            }
        }
        self.log.debug(&format!("loaded {count} records"));
        Ok(())
    }

    fn read_all_v3<R: Read>(
        &mut self,
        reader: &mut BlockReader<R>,
        passphrase: &[u8],
        listener: &mut Option<&mut dyn LoadListener>,
    ) -> PwsResult<()> {
        let header = HeaderV3::read(reader)?;
        let keys = header.verify(passphrase)?;
        self.passphrase = Some(self.cage.seal_bytes(passphrase)?);
        self.v3_iterations = header.iterations;

        let mut cipher = RecordCipher::twofish_cbc(&keys.record_key, &header.iv)?;
        let mut hmac = RecordHmac::new(&*keys.hmac_key)?;

        let mut count = 0usize;
        while let Some(record) = codec::read_record_v3(reader, &mut cipher, &mut hmac)? {
            if record.is_valid() {
                let sealed = self.cage.seal(&record)?;
                self.sealed_records.push(sealed);
            }
            if let Some(l) = listener.as_mut() {
                l.loaded(&record);
            }
            count += 1;
        }

        let mut tag = [0u8; 32];
        reader.read_exact(&mut tag).map_err(|e| match e {
            PwsError::EndOfFile | PwsError::Truncated { .. } => {
                PwsError::corrupt("missing content authentication tag")
            }
            other => other,
        })?;
        hmac.verify(&tag)?;

        self.log.debug(&format!("loaded {count} records"));
        Ok(())
    }

    /// Serializes the database back to its storage with fresh header
    /// material. Resets the modified flag on success only.
    ///
    /// # Errors
    ///
    /// [`PwsError::ReadOnly`] for read-only databases,
    /// [`PwsError::ConcurrentModification`] if the storage changed since it
    /// was last read or written.
    pub fn save(&mut self) -> PwsResult<()> {
        self.ensure_live()?;
        if self.read_only {
            return Err(PwsError::ReadOnly);
        }
        if let Some(seen) = self.last_storage_change {
            if self.storage.exists() && self.storage.last_modified()? != seen {
                return Err(PwsError::ConcurrentModification);
            }
        }
        let sealed_pass = self
            .passphrase
            .as_ref()
            .ok_or_else(|| PwsError::invalid_input("passphrase", "no passphrase set"))?;
        let passphrase = self.cage.unseal_bytes(sealed_pass)?;

        let storage = Arc::clone(&self.storage);
        let stream = storage.open_for_write()?;
        let mut writer = BlockWriter::new(stream);
        match self.version {
            PwsVersion::V1 | PwsVersion::V2 => self.write_all_v1v2(&mut writer, &passphrase)?,
            PwsVersion::V3 => self.write_all_v3(&mut writer, &passphrase)?,
        }
        writer.into_inner().close()?;

        self.modified = false;
        self.last_storage_change = Some(self.storage.last_modified()?);
        self.log
            .debug(&format!("saved {} records", self.sealed_records.len()));
        Ok(())
    }

    fn write_all_v1v2<W: Write>(
        &self,
        writer: &mut BlockWriter<W>,
        passphrase: &[u8],
    ) -> PwsResult<()> {
        let header = HeaderV1V2::generate(passphrase)?;
        writer.write_all(&header.encode())?;
        let mut cipher = header.record_cipher(self.version, passphrase)?;

        if self.version == PwsVersion::V2 {
            write_v2_description(writer, &mut cipher)?;
        }
        for sealed in &self.sealed_records {
            let record = self.cage.unseal(sealed)?;
            codec::write_record_v1v2(writer, &mut cipher, &record)?;
        }
        Ok(())
    }

    fn write_all_v3<W: Write>(
        &self,
        writer: &mut BlockWriter<W>,
        passphrase: &[u8],
    ) -> PwsResult<()> {
        let (header, keys) = HeaderV3::generate(passphrase, self.v3_iterations)?;
        writer.write_all(&header.encode())?;
        let mut cipher = RecordCipher::twofish_cbc(&keys.record_key, &header.iv)?;
        let mut hmac = RecordHmac::new(&*keys.hmac_key)?;

        for sealed in &self.sealed_records {
            let record = self.cage.unseal(sealed)?;
            codec::write_record_v3(writer, &mut cipher, &mut hmac, &record)?;
        }
        writer.write_all(format::V3_EOF_MARKER)?;
        writer.write_all(&hmac.finalize())
    }

    /// Appends a record to the sealed list.
    pub fn add(&mut self, record: PwsRecord) -> PwsResult<()> {
        self.ensure_live()?;
        if self.read_only {
            self.log.warn("add rejected: database is read-only");
            return Err(PwsError::ReadOnly);
        }
        self.check_version(&record)?;
        let sealed = self.cage.seal(&record)?;
        self.sealed_records.push(sealed);
        self.modified = true;
        Ok(())
    }

    /// Unseals and returns the record at `index`.
    pub fn record(&self, index: usize) -> PwsResult<PwsRecord> {
        self.ensure_live()?;
        let sealed = self
            .sealed_records
            .get(index)
            .ok_or(PwsError::IndexOutOfRange(index))?;
        self.cage.unseal(sealed)
    }

    /// Replaces the record at `index`, resealing it.
    pub fn set_record(&mut self, index: usize, record: PwsRecord) -> PwsResult<()> {
        self.ensure_live()?;
        if self.read_only {
            self.log.warn("update rejected: database is read-only");
            return Err(PwsError::ReadOnly);
        }
        self.check_version(&record)?;
        if index >= self.sealed_records.len() {
            return Err(PwsError::IndexOutOfRange(index));
        }
        let sealed = self.cage.seal(&record)?;
        self.sealed_records[index] = sealed;
        self.modified = true;
        Ok(())
    }

    /// Removes the record at `index`; higher indices shift down by one.
    pub fn remove_record(&mut self, index: usize) -> PwsResult<()> {
        self.ensure_live()?;
        if self.read_only {
            self.log.warn("remove rejected: database is read-only");
            return Err(PwsError::ReadOnly);
        }
        if index >= self.sealed_records.len() {
            return Err(PwsError::IndexOutOfRange(index));
        }
        self.sealed_records.remove(index);
        self.modified = true;
        Ok(())
    }

    /// Number of records in the sealed list.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.sealed_records.len()
    }

    /// Iterates the records, unsealing each lazily.
    pub fn records(&self) -> PwsResult<RecordIter<'_, S>> {
        self.ensure_live()?;
        Ok(RecordIter {
            file: self,
            index: 0,
        })
    }

    /// Seals a new passphrase for subsequent saves, zeroing the input
    /// buffer.
    pub fn set_passphrase(&mut self, passphrase: &mut Vec<u8>) -> PwsResult<()> {
        if self.disposed {
            passphrase.zeroize();
            return Err(PwsError::Disposed);
        }
        let sealed = self.cage.seal_bytes(passphrase);
        passphrase.zeroize();
        self.passphrase = Some(sealed?);
        self.modified = true;
        Ok(())
    }

    /// Reseeds the cage IV. Useful between long iteration passes.
    pub fn rotate_memory_iv(&mut self) -> PwsResult<()> {
        self.cage.rotate_iv()
    }

    /// The version family of this database.
    #[must_use]
    pub const fn version(&self) -> PwsVersion {
        self.version
    }

    /// Whether in-memory state diverges from the storage.
    #[must_use]
    pub const fn is_modified(&self) -> bool {
        self.modified
    }

    /// Whether mutating operations are rejected.
    #[must_use]
    pub const fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Marks the database read-only (or clears the mark).
    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    /// The storage this database reads from and writes to.
    #[must_use]
    pub const fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// Wipes the memory key, IV and sealed state. Every subsequent
    /// operation fails with [`PwsError::Disposed`].
    pub fn dispose(&mut self) {
        self.passphrase = None;
        self.sealed_records.clear();
        self.cage.dispose();
        self.disposed = true;
    }

    pub(crate) fn log(&self) -> &Log {
        &self.log
    }

    fn ensure_live(&self) -> PwsResult<()> {
        if self.disposed {
            return Err(PwsError::Disposed);
        }
        Ok(())
    }

    fn check_version(&self, record: &PwsRecord) -> PwsResult<()> {
        if record.version() != self.version {
            return Err(PwsError::invalid_input(
                "record",
                "record version does not match the database",
            ));
        }
        Ok(())
    }
}

impl<S: PwsStorage> fmt::Debug for PwsFile<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PwsFile")
            .field("version", &self.version)
            .field("records", &self.sealed_records.len())
            .field("modified", &self.modified)
            .field("read_only", &self.read_only)
            .field("disposed", &self.disposed)
            .finish_non_exhaustive()
    }
}

/// Iterator over a file's records.
///
/// Borrows the file for its whole lifetime, which is what releases the
/// transient unseal context on exhaustion or drop and keeps mutation during
/// iteration impossible.
pub struct RecordIter<'a, S: PwsStorage> {
    file: &'a PwsFile<S>,
    index: usize,
}

impl<S: PwsStorage> Iterator for RecordIter<'_, S> {
    type Item = PwsResult<PwsRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.file.record_count() {
            return None;
        }
        let record = self.file.record(self.index);
        self.index += 1;
        Some(record)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.file.record_count().saturating_sub(self.index);
        (remaining, Some(remaining))
    }
}

/// Consumes and checks the V2 format-description record. Its absence means
/// the stream is not a V2 file.
fn read_v2_description<R: Read>(
    reader: &mut BlockReader<R>,
    cipher: &mut RecordCipher,
) -> PwsResult<()> {
    let record = match codec::read_record_v1v2(reader, cipher, PwsVersion::V2) {
        Ok(record) => record,
        Err(PwsError::EndOfFile | PwsError::CorruptFile(_)) => {
            return Err(PwsError::UnsupportedFileVersion)
        }
        Err(other) => return Err(other),
    };
    let matches = record
        .field(field_type::DEFAULT)
        .and_then(|f| f.value.as_text())
        .is_some_and(|s| s.starts_with(format::V2_FORMAT_PREFIX));
    if !matches {
        return Err(PwsError::UnsupportedFileVersion);
    }
    Ok(())
}

/// Writes the V2 format-description record ahead of the user records.
fn write_v2_description<W: Write>(
    writer: &mut BlockWriter<W>,
    cipher: &mut RecordCipher,
) -> PwsResult<()> {
    codec::write_field_v1v2(
        writer,
        cipher,
        field_type::DEFAULT,
        format::V2_FORMAT_DESCRIPTION.as_bytes(),
    )?;
    codec::write_field_v1v2(
        writer,
        cipher,
        field_type::PASSWORD,
        format::V2_FORMAT_VERSION.as_bytes(),
    )?;
    codec::write_field_v1v2(writer, cipher, field_type::END_OF_RECORD, &[])
}
