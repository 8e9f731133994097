//! Typed fields of a password record.
//!
//! A field is a small integer type id plus a payload. Each on-disk version
//! recognizes its own catalog of ids; everything outside the catalog is
//! carried as opaque bytes so files round-trip losslessly.

use std::fmt;

use uuid::Uuid;

/// On-disk version family of a database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PwsVersion {
    /// Original format: Blowfish-ECB record layer, 8-byte blocks.
    V1,
    /// Second format: Blowfish-CBC record layer, 8-byte blocks.
    V2,
    /// Third format: Twofish-CBC record layer, 16-byte blocks.
    V3,
}

impl PwsVersion {
    /// Block length of the record-layer cipher.
    #[must_use]
    pub const fn block_length(self) -> usize {
        match self {
            Self::V1 | Self::V2 => 8,
            Self::V3 => 16,
        }
    }
}

/// Field type ids of the Password Safe formats.
///
/// Ids are shared across versions where the meaning coincides; each
/// version's catalog is a subset (see [`is_known`]).
pub mod field_type {
    /// V1 default field / V2 format-description string / V3 id string.
    pub const DEFAULT: u8 = 0;
    /// 16-byte record identifier (V2/V3).
    pub const UUID: u8 = 1;
    /// Hierarchical group path (V2/V3).
    pub const GROUP: u8 = 2;
    /// Entry title.
    pub const TITLE: u8 = 3;
    /// Account user name.
    pub const USERNAME: u8 = 4;
    /// Free-form notes.
    pub const NOTES: u8 = 5;
    /// The password itself.
    pub const PASSWORD: u8 = 6;
    /// Creation timestamp (V2/V3).
    pub const CREATION_TIME: u8 = 7;
    /// Password modification timestamp (V2/V3).
    pub const PASSWORD_MOD_TIME: u8 = 8;
    /// Last access timestamp (V2/V3).
    pub const LAST_ACCESS_TIME: u8 = 9;
    /// Password lifetime timestamp (V2/V3).
    pub const PASSWORD_LIFETIME: u8 = 10;
    /// Password policy in V2; a deprecated slot in V3.
    pub const PASSWORD_POLICY_DEPRECATED: u8 = 11;
    /// Record modification timestamp (V3).
    pub const LAST_MOD_TIME: u8 = 12;
    /// Associated URL (V3).
    pub const URL: u8 = 13;
    /// Autotype sequence (V3).
    pub const AUTOTYPE: u8 = 14;
    /// Password history (V3).
    pub const PASSWORD_HISTORY: u8 = 15;
    /// Password policy (V3).
    pub const PASSWORD_POLICY: u8 = 16;
    /// Password expiry interval in days (V3).
    pub const PASSWORD_EXPIRY_INTERVAL: u8 = 17;
    /// Logical record terminator (V2/V3). Reserved; never a data field.
    pub const END_OF_RECORD: u8 = 255;
}

/// Value payload of a field.
#[derive(Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// UTF-8 text.
    Text(String),
    /// Seconds since the Unix epoch, four little-endian bytes on the wire.
    Time(u32),
    /// 16-byte record identifier.
    Uuid(Uuid),
    /// Opaque payload preserved verbatim.
    Bytes(Vec<u8>),
}

impl FieldValue {
    /// Wire bytes of the value, without framing or padding.
    #[must_use]
    pub fn to_wire_bytes(&self) -> Vec<u8> {
        match self {
            Self::Text(s) => s.as_bytes().to_vec(),
            Self::Time(t) => t.to_le_bytes().to_vec(),
            Self::Uuid(u) => u.as_bytes().to_vec(),
            Self::Bytes(b) => b.clone(),
        }
    }

    /// Interprets payload bytes according to the catalog kind.
    ///
    /// Payloads that do not fit the declared kind (invalid UTF-8, wrong
    /// width for a time or UUID) are preserved verbatim as [`Self::Bytes`]
    /// so re-serialization stays byte-identical.
    pub(crate) fn from_wire_bytes(kind: ValueKind, bytes: &[u8]) -> Self {
        match kind {
            ValueKind::Text => match std::str::from_utf8(bytes) {
                Ok(s) => Self::Text(s.to_owned()),
                Err(_) => Self::Bytes(bytes.to_vec()),
            },
            ValueKind::Time => match <[u8; 4]>::try_from(bytes) {
                Ok(raw) => Self::Time(u32::from_le_bytes(raw)),
                Err(_) => Self::Bytes(bytes.to_vec()),
            },
            ValueKind::Uuid => match <[u8; 16]>::try_from(bytes) {
                Ok(raw) => Self::Uuid(Uuid::from_bytes(raw)),
                Err(_) => Self::Bytes(bytes.to_vec()),
            },
            ValueKind::Bytes => Self::Bytes(bytes.to_vec()),
        }
    }

    /// Text content, if this is a text value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Timestamp content, if this is a time value.
    #[must_use]
    pub const fn as_time(&self) -> Option<u32> {
        match self {
            Self::Time(t) => Some(*t),
            _ => None,
        }
    }

    /// UUID content, if this is a UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> Option<Uuid> {
        match self {
            Self::Uuid(u) => Some(*u),
            _ => None,
        }
    }
}

// Values routinely hold passwords; Debug must not leak them.
impl fmt::Debug for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "Text({} chars)", s.chars().count()),
            Self::Time(t) => write!(f, "Time({t})"),
            Self::Uuid(u) => write!(f, "Uuid({u})"),
            Self::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
        }
    }
}

/// How a field's payload is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ValueKind {
    Text,
    Time,
    Uuid,
    Bytes,
}

/// Returns the payload interpretation for a field type in a version's
/// catalog. Unknown ids are opaque.
pub(crate) fn value_kind(version: PwsVersion, ty: u8) -> ValueKind {
    use field_type::*;

    match (version, ty) {
        (PwsVersion::V1, DEFAULT | TITLE | USERNAME | NOTES | PASSWORD) => ValueKind::Text,
        (PwsVersion::V1, _) => ValueKind::Bytes,
        (_, UUID) => ValueKind::Uuid,
        (_, CREATION_TIME | PASSWORD_MOD_TIME | LAST_ACCESS_TIME | PASSWORD_LIFETIME) => {
            ValueKind::Time
        }
        (PwsVersion::V3, LAST_MOD_TIME | PASSWORD_EXPIRY_INTERVAL) => ValueKind::Time,
        (_, DEFAULT | GROUP | TITLE | USERNAME | NOTES | PASSWORD) => ValueKind::Text,
        (PwsVersion::V2, PASSWORD_POLICY_DEPRECATED) => ValueKind::Text,
        (PwsVersion::V3, URL | AUTOTYPE | PASSWORD_HISTORY | PASSWORD_POLICY) => ValueKind::Text,
        _ => ValueKind::Bytes,
    }
}

/// Whether `ty` belongs to the version's catalog of data fields.
pub(crate) fn is_known(version: PwsVersion, ty: u8) -> bool {
    use field_type::*;

    match version {
        PwsVersion::V1 => matches!(ty, DEFAULT | TITLE | USERNAME | NOTES | PASSWORD),
        PwsVersion::V2 => ty <= PASSWORD_POLICY_DEPRECATED,
        PwsVersion::V3 => ty <= PASSWORD_EXPIRY_INTERVAL,
    }
}

/// One typed field of a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PwsField {
    /// Numeric type id; 255 is reserved for the record terminator.
    pub ty: u8,
    /// Decoded payload.
    pub value: FieldValue,
}

impl PwsField {
    /// Creates a text field.
    #[must_use]
    pub fn text<S: Into<String>>(ty: u8, text: S) -> Self {
        Self {
            ty,
            value: FieldValue::Text(text.into()),
        }
    }

    /// Creates a timestamp field.
    #[must_use]
    pub const fn time(ty: u8, seconds: u32) -> Self {
        Self {
            ty,
            value: FieldValue::Time(seconds),
        }
    }

    /// Creates the UUID field of a record.
    #[must_use]
    pub const fn uuid(uuid: Uuid) -> Self {
        Self {
            ty: field_type::UUID,
            value: FieldValue::Uuid(uuid),
        }
    }

    /// Creates an opaque field.
    #[must_use]
    pub fn bytes<B: Into<Vec<u8>>>(ty: u8, bytes: B) -> Self {
        Self {
            ty,
            value: FieldValue::Bytes(bytes.into()),
        }
    }
}
