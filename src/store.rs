//! Sparse entry store over a password file.
//!
//! Projects the file's sealed records into lightweight [`PwsEntryBean`]s,
//! kept 1:1 with the sealed list across insertions, updates and removals.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::entry::PwsEntryBean;
use crate::error::{PwsError, PwsResult};
use crate::field::PwsVersion;
use crate::file::{LoadListener, PwsFile};
use crate::logger::Logger;
use crate::record::PwsRecord;
use crate::storage::PwsStorage;

/// Default sparse projection for a version.
#[must_use]
pub fn default_sparse_fields(version: PwsVersion) -> BTreeSet<u8> {
    use crate::field::field_type::*;

    match version {
        PwsVersion::V1 => [TITLE, USERNAME].into(),
        PwsVersion::V2 => [TITLE, GROUP, USERNAME, NOTES].into(),
        PwsVersion::V3 => [
            TITLE,
            GROUP,
            USERNAME,
            NOTES,
            URL,
            PASSWORD_LIFETIME,
            LAST_MOD_TIME,
        ]
        .into(),
    }
}

/// Maintains a sparse, list-ready view of a file's records.
pub struct PwsEntryStore<S: PwsStorage> {
    file: PwsFile<S>,
    sparse_fields: BTreeSet<u8>,
    sparse_entries: Vec<PwsEntryBean>,
}

impl<S: PwsStorage> PwsEntryStore<S> {
    /// Wraps an already loaded file, building the sparse list with one pass
    /// over its records and the version's default projection.
    pub fn new(file: PwsFile<S>) -> PwsResult<Self> {
        let sparse_fields = default_sparse_fields(file.version());
        Self::with_sparse_fields(file, sparse_fields)
    }

    /// Wraps an already loaded file with an explicit projection.
    pub fn with_sparse_fields(file: PwsFile<S>, sparse_fields: BTreeSet<u8>) -> PwsResult<Self> {
        let mut store = Self {
            file,
            sparse_fields,
            sparse_entries: Vec::new(),
        };
        store.refresh()?;
        Ok(store)
    }

    /// Opens a database and populates the sparse list while records stream
    /// out of the file, avoiding a second pass.
    pub fn open(
        storage: Arc<S>,
        passphrase: &mut Vec<u8>,
        version: PwsVersion,
        logger: Arc<dyn Logger>,
    ) -> PwsResult<Self> {
        let sparse_fields = default_sparse_fields(version);
        let mut collector = SparseCollector {
            fields: &sparse_fields,
            beans: Vec::new(),
        };
        let file =
            PwsFile::open_with_listener(storage, passphrase, version, logger, Some(&mut collector))?;
        let sparse_entries = collector.beans;
        Ok(Self {
            file,
            sparse_fields,
            sparse_entries,
        })
    }

    /// The underlying file.
    #[must_use]
    pub const fn file(&self) -> &PwsFile<S> {
        &self.file
    }

    /// Releases the store, handing the file back.
    #[must_use]
    pub fn into_file(self) -> PwsFile<S> {
        self.file
    }

    /// The sparse views, one per sealed record.
    #[must_use]
    pub fn sparse_entries(&self) -> &[PwsEntryBean] {
        &self.sparse_entries
    }

    /// Fully populated view of the record at `index`.
    pub fn entry(&self, index: usize) -> PwsResult<PwsEntryBean> {
        let record = self.file.record(index)?;
        let mut bean = PwsEntryBean::from_record(&record, None);
        bean.store_index = Some(index);
        Ok(bean)
    }

    /// Appends a new entry built from a fully populated bean.
    pub fn add_entry(&mut self, entry: &PwsEntryBean) -> PwsResult<()> {
        if entry.sparse {
            return Err(PwsError::invalid_input(
                "entry",
                "inserts require a fully populated entry",
            ));
        }
        let mut record = PwsRecord::with_uuid(self.file.version())?;
        entry.apply_to(&mut record);
        self.file.add(record)?;

        // re-read the sealed tail so the bean reflects canonical state
        let index = self.file.record_count() - 1;
        let record = self.file.record(index)?;
        let mut bean = PwsEntryBean::from_record(&record, Some(&self.sparse_fields));
        bean.store_index = Some(index);
        self.sparse_entries.push(bean);
        Ok(())
    }

    /// Writes a fully populated bean back over the record at its
    /// `store_index`, refreshing the sparse view in place.
    ///
    /// A no-change update logs a warning and still succeeds.
    pub fn update_entry(&mut self, entry: &PwsEntryBean) -> PwsResult<()> {
        if entry.sparse {
            return Err(PwsError::invalid_input(
                "entry",
                "updates require a fully populated entry",
            ));
        }
        let index = entry
            .store_index
            .ok_or_else(|| PwsError::invalid_input("entry", "entry has no store index"))?;
        if index >= self.sparse_entries.len() {
            return Err(PwsError::IndexOutOfRange(index));
        }

        let mut record = self.file.record(index)?;
        let mut current = PwsEntryBean::from_record(&record, None);
        current.store_index = Some(index);
        if current == *entry {
            self.file.log().warn("update without change");
        }

        entry.apply_to(&mut record);
        self.file.set_record(index, record)?;

        let record = self.file.record(index)?;
        let mut bean = PwsEntryBean::from_record(&record, Some(&self.sparse_fields));
        bean.store_index = Some(index);
        self.sparse_entries[index] = bean;
        Ok(())
    }

    /// Removes the entry's record and resynchronizes the whole sparse list
    /// so indices stay contiguous.
    pub fn remove_entry(&mut self, entry: &PwsEntryBean) -> PwsResult<()> {
        let index = entry
            .store_index
            .ok_or_else(|| PwsError::invalid_input("entry", "entry has no store index"))?;
        self.file.remove_record(index)?;
        self.refresh()
    }

    /// Replaces the sparse projection. A set that is not a subset of the
    /// previous one forces a rebuild; narrowing only swaps the filter.
    pub fn set_sparse_fields(&mut self, fields: BTreeSet<u8>) -> PwsResult<()> {
        let needs_rebuild = !fields.is_subset(&self.sparse_fields);
        self.sparse_fields = fields;
        if needs_rebuild {
            self.refresh()?;
        }
        Ok(())
    }

    /// Saves the underlying file.
    pub fn save(&mut self) -> PwsResult<()> {
        self.file.save()
    }

    fn refresh(&mut self) -> PwsResult<()> {
        self.sparse_entries.clear();
        for index in 0..self.file.record_count() {
            let record = self.file.record(index)?;
            let mut bean = PwsEntryBean::from_record(&record, Some(&self.sparse_fields));
            bean.store_index = Some(index);
            self.sparse_entries.push(bean);
        }
        Ok(())
    }
}

/// Listener that projects records into sparse beans as they stream out of
/// an opening file. Invalid records never enter the sealed list, so they
/// are skipped here to keep the 1:1 alignment.
struct SparseCollector<'a> {
    fields: &'a BTreeSet<u8>,
    beans: Vec<PwsEntryBean>,
}

impl LoadListener for SparseCollector<'_> {
    fn loaded(&mut self, record: &PwsRecord) {
        if !record.is_valid() {
            return;
        }
        let mut bean = PwsEntryBean::from_record(record, Some(self.fields));
        bean.store_index = Some(self.beans.len());
        self.beans.push(bean);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::field_type;
    use crate::logger::NullLogger;
    use crate::storage::MemoryStorage;

    fn empty_store(version: PwsVersion) -> PwsEntryStore<MemoryStorage> {
        let storage = Arc::new(MemoryStorage::new());
        let mut file = PwsFile::create(storage, version, Arc::new(NullLogger));
        file.set_passphrase(&mut b"secret".to_vec()).unwrap();
        PwsEntryStore::new(file).unwrap()
    }

    fn full_bean(title: &str) -> PwsEntryBean {
        PwsEntryBean {
            title: Some(title.to_owned()),
            username: Some("alice".to_owned()),
            password: Some("p@ss".to_owned()),
            ..PwsEntryBean::default()
        }
    }

    #[test]
    fn test_add_projects_sparse_bean() {
        let mut store = empty_store(PwsVersion::V3);
        let mut bean = full_bean("gmail");
        bean.url = Some("https://mail.example".to_owned());
        store.add_entry(&bean).unwrap();

        assert_eq!(store.sparse_entries().len(), 1);
        let sparse = &store.sparse_entries()[0];
        assert!(sparse.sparse);
        assert_eq!(sparse.store_index, Some(0));
        assert_eq!(sparse.title.as_deref(), Some("gmail"));
        // URL is in the V3 default projection, PASSWORD is not
        assert_eq!(sparse.url.as_deref(), Some("https://mail.example"));
        assert_eq!(sparse.password, None);
    }

    #[test]
    fn test_add_rejects_sparse_bean() {
        let mut store = empty_store(PwsVersion::V2);
        let mut bean = full_bean("gmail");
        bean.sparse = true;
        assert!(matches!(
            store.add_entry(&bean),
            Err(PwsError::InvalidInput { .. })
        ));
        assert_eq!(store.sparse_entries().len(), 0);
    }

    #[test]
    fn test_update_then_get_is_field_equal() {
        let mut store = empty_store(PwsVersion::V2);
        store.add_entry(&full_bean("gmail")).unwrap();

        let mut entry = store.entry(0).unwrap();
        entry.username = Some("bob".to_owned());
        entry.notes = Some("rotated".to_owned());
        store.update_entry(&entry).unwrap();

        let reread = store.entry(0).unwrap();
        assert_eq!(reread, entry);
        assert_eq!(store.sparse_entries()[0].username.as_deref(), Some("bob"));
    }

    #[test]
    fn test_add_then_remove_restores_lengths() {
        let mut store = empty_store(PwsVersion::V2);
        store.add_entry(&full_bean("one")).unwrap();
        store.add_entry(&full_bean("two")).unwrap();
        let before_titles: Vec<_> = store
            .sparse_entries()
            .iter()
            .map(|b| b.title.clone())
            .collect();

        store.add_entry(&full_bean("three")).unwrap();
        let added = store.entry(2).unwrap();
        store.remove_entry(&added).unwrap();

        assert_eq!(store.file().record_count(), 2);
        let after_titles: Vec<_> = store
            .sparse_entries()
            .iter()
            .map(|b| b.title.clone())
            .collect();
        assert_eq!(before_titles, after_titles);
    }

    #[test]
    fn test_remove_keeps_indices_contiguous() {
        let mut store = empty_store(PwsVersion::V2);
        store.add_entry(&full_bean("one")).unwrap();
        store.add_entry(&full_bean("two")).unwrap();
        store.add_entry(&full_bean("three")).unwrap();

        let middle = store.entry(1).unwrap();
        store.remove_entry(&middle).unwrap();

        let indices: Vec<_> = store
            .sparse_entries()
            .iter()
            .map(|b| b.store_index)
            .collect();
        assert_eq!(indices, vec![Some(0), Some(1)]);
        assert_eq!(store.entry(1).unwrap().title.as_deref(), Some("three"));
    }

    #[test]
    fn test_widening_sparse_set_rebuilds() {
        let mut store = empty_store(PwsVersion::V2);
        store.add_entry(&full_bean("gmail")).unwrap();
        assert_eq!(store.sparse_entries()[0].password, None);

        let mut wider = default_sparse_fields(PwsVersion::V2);
        wider.insert(field_type::PASSWORD);
        store.set_sparse_fields(wider).unwrap();
        assert_eq!(
            store.sparse_entries()[0].password.as_deref(),
            Some("p@ss")
        );
    }

    #[test]
    fn test_narrowing_sparse_set_only_swaps_filter() {
        let mut store = empty_store(PwsVersion::V2);
        store.add_entry(&full_bean("gmail")).unwrap();

        let narrow: BTreeSet<u8> = [field_type::TITLE].into();
        store.set_sparse_fields(narrow).unwrap();
        // existing projections keep their extra fields until the next rebuild
        assert_eq!(
            store.sparse_entries()[0].username.as_deref(),
            Some("alice")
        );
    }

    #[test]
    fn test_noop_update_warns_but_succeeds() {
        use std::sync::Mutex;

        use crate::logger::{LogLevel, Logger};

        struct CapturingLogger {
            warnings: Mutex<Vec<String>>,
        }

        impl Logger for CapturingLogger {
            fn log(&self, level: LogLevel, message: &str) {
                if level == LogLevel::Warn {
                    self.warnings.lock().unwrap().push(message.to_owned());
                }
            }
        }

        let logger = Arc::new(CapturingLogger {
            warnings: Mutex::new(Vec::new()),
        });
        let storage = Arc::new(MemoryStorage::new());
        let mut file = PwsFile::create(
            storage,
            PwsVersion::V2,
            Arc::clone(&logger) as Arc<dyn Logger>,
        );
        file.set_passphrase(&mut b"secret".to_vec()).unwrap();
        let mut store = PwsEntryStore::new(file).unwrap();
        store.add_entry(&full_bean("gmail")).unwrap();

        let entry = store.entry(0).unwrap();
        store.update_entry(&entry).unwrap();

        let warnings = logger.warnings.lock().unwrap();
        assert!(warnings.iter().any(|w| w.contains("update without change")));
    }

    #[test]
    fn test_update_out_of_range() {
        let mut store = empty_store(PwsVersion::V2);
        let mut bean = full_bean("gmail");
        bean.store_index = Some(5);
        assert!(matches!(
            store.update_entry(&bean),
            Err(PwsError::IndexOutOfRange(5))
        ));
    }
}
