//! Flattened record views for list UIs and tooling.

use std::collections::BTreeSet;
use std::fmt;

use uuid::Uuid;

use crate::field::{is_known, FieldValue, PwsField, PwsVersion};
use crate::record::PwsRecord;

/// A flattened view of one record.
///
/// `store_index` is the record's position in the file's sealed list.
/// `sparse` marks views restricted to a projected subset of fields; sparse
/// beans are suitable for list views but are rejected by the store's write
/// operations.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct PwsEntryBean {
    /// Position in the sealed list, when the bean came out of a store.
    pub store_index: Option<usize>,
    /// Whether only the projected subset of fields is populated.
    pub sparse: bool,
    /// Record identifier (V2/V3).
    pub uuid: Option<Uuid>,
    /// Hierarchical group path.
    pub group: Option<String>,
    /// Entry title.
    pub title: Option<String>,
    /// Account user name.
    pub username: Option<String>,
    /// Free-form notes.
    pub notes: Option<String>,
    /// The password itself.
    pub password: Option<String>,
    /// Associated URL (V3).
    pub url: Option<String>,
    /// Autotype sequence (V3).
    pub autotype: Option<String>,
    /// Creation timestamp.
    pub creation_time: Option<u32>,
    /// Password modification timestamp.
    pub password_mod_time: Option<u32>,
    /// Last access timestamp.
    pub last_access_time: Option<u32>,
    /// Record modification timestamp (V3).
    pub last_mod_time: Option<u32>,
    /// Password lifetime timestamp.
    pub password_lifetime: Option<u32>,
    /// Password policy string.
    pub password_policy: Option<String>,
    /// Password history (V3).
    pub password_history: Option<String>,
    /// Password expiry interval in days (V3).
    pub password_expiry_interval: Option<u32>,
}

impl PwsEntryBean {
    /// Builds a bean from a record. With a `filter`, only fields whose type
    /// id is in the set are populated and the bean is marked sparse.
    #[must_use]
    pub fn from_record(record: &PwsRecord, filter: Option<&BTreeSet<u8>>) -> Self {
        let mut bean = Self {
            sparse: filter.is_some(),
            ..Self::default()
        };
        for field in record.fields() {
            if filter.is_some_and(|set| !set.contains(&field.ty)) {
                continue;
            }
            bean.absorb(field);
        }
        bean
    }

    // Assignments go through the typed accessors, so an opaque payload in a
    // known slot never clobbers an attribute another field populated.
    fn absorb(&mut self, field: &PwsField) {
        use crate::field::field_type::*;

        let slot = match field.ty {
            UUID => {
                if let FieldValue::Uuid(u) = &field.value {
                    self.uuid = Some(*u);
                }
                return;
            }
            GROUP => &mut self.group,
            TITLE => &mut self.title,
            USERNAME => &mut self.username,
            NOTES => &mut self.notes,
            PASSWORD => &mut self.password,
            URL => &mut self.url,
            AUTOTYPE => &mut self.autotype,
            PASSWORD_POLICY | PASSWORD_POLICY_DEPRECATED => &mut self.password_policy,
            PASSWORD_HISTORY => &mut self.password_history,
            CREATION_TIME => {
                Self::absorb_time(&mut self.creation_time, field);
                return;
            }
            PASSWORD_MOD_TIME => {
                Self::absorb_time(&mut self.password_mod_time, field);
                return;
            }
            LAST_ACCESS_TIME => {
                Self::absorb_time(&mut self.last_access_time, field);
                return;
            }
            LAST_MOD_TIME => {
                Self::absorb_time(&mut self.last_mod_time, field);
                return;
            }
            PASSWORD_LIFETIME => {
                Self::absorb_time(&mut self.password_lifetime, field);
                return;
            }
            PASSWORD_EXPIRY_INTERVAL => {
                Self::absorb_time(&mut self.password_expiry_interval, field);
                return;
            }
            _ => return,
        };
        if let Some(text) = field.value.as_text() {
            *slot = Some(text.to_owned());
        }
    }

    fn absorb_time(slot: &mut Option<u32>, field: &PwsField) {
        if let Some(time) = field.value.as_time() {
            *slot = Some(time);
        }
    }

    /// Writes the bean's populated attributes into `record`.
    ///
    /// Attributes outside the record version's catalog are skipped; `None`
    /// attributes and fields the bean does not model (opaque payloads in
    /// particular) are left untouched.
    pub fn apply_to(&self, record: &mut PwsRecord) {
        use crate::field::field_type::*;

        let version = record.version();
        if version != PwsVersion::V1 {
            if let Some(uuid) = self.uuid {
                record.set_field(PwsField::uuid(uuid));
            }
        }
        set_text(record, GROUP, self.group.as_deref());
        set_text(record, TITLE, self.title.as_deref());
        set_text(record, USERNAME, self.username.as_deref());
        set_text(record, NOTES, self.notes.as_deref());
        set_text(record, PASSWORD, self.password.as_deref());
        set_text(record, URL, self.url.as_deref());
        set_text(record, AUTOTYPE, self.autotype.as_deref());
        set_time(record, CREATION_TIME, self.creation_time);
        set_time(record, PASSWORD_MOD_TIME, self.password_mod_time);
        set_time(record, LAST_ACCESS_TIME, self.last_access_time);
        set_time(record, LAST_MOD_TIME, self.last_mod_time);
        set_time(record, PASSWORD_LIFETIME, self.password_lifetime);
        let policy_ty = if version == PwsVersion::V3 {
            PASSWORD_POLICY
        } else {
            PASSWORD_POLICY_DEPRECATED
        };
        set_text(record, policy_ty, self.password_policy.as_deref());
        set_text(record, PASSWORD_HISTORY, self.password_history.as_deref());
        set_time(
            record,
            PASSWORD_EXPIRY_INTERVAL,
            self.password_expiry_interval,
        );
    }
}

fn set_text(record: &mut PwsRecord, ty: u8, value: Option<&str>) {
    if let Some(value) = value {
        if is_known(record.version(), ty) {
            record.set_field(PwsField::text(ty, value));
        }
    }
}

fn set_time(record: &mut PwsRecord, ty: u8, value: Option<u32>) {
    if let Some(value) = value {
        if is_known(record.version(), ty) {
            record.set_field(PwsField::time(ty, value));
        }
    }
}

// Beans hold passwords; Debug keeps them out of logs.
impl fmt::Debug for PwsEntryBean {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PwsEntryBean")
            .field("store_index", &self.store_index)
            .field("sparse", &self.sparse)
            .field("uuid", &self.uuid)
            .field("title", &self.title)
            .field("group", &self.group)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}
