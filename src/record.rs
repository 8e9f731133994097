//! Password records: ordered field collections.

use uuid::Uuid;

use crate::crypto::fill_random;
use crate::error::{PwsError, PwsResult};
use crate::field::{field_type, is_known, value_kind, FieldValue, PwsField, PwsVersion};

/// Format tag of the cage byte serialization.
const CAGE_FORMAT: u8 = 1;

/// An ordered collection of fields belonging to one password entry.
///
/// Records are plain values; a [`PwsFile`](crate::PwsFile) keeps them sealed
/// and only materializes a record while a caller holds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PwsRecord {
    version: PwsVersion,
    fields: Vec<PwsField>,
}

impl PwsRecord {
    /// Creates an empty record for a version.
    #[must_use]
    pub const fn new(version: PwsVersion) -> Self {
        Self {
            version,
            fields: Vec::new(),
        }
    }

    /// Creates a record carrying a fresh random UUID (V2/V3). For V1, which
    /// has no UUID field, this is the same as [`Self::new`].
    pub fn with_uuid(version: PwsVersion) -> PwsResult<Self> {
        let mut record = Self::new(version);
        if version != PwsVersion::V1 {
            let mut raw = [0u8; 16];
            fill_random(&mut raw)?;
            let uuid = uuid::Builder::from_random_bytes(raw).into_uuid();
            record.fields.push(PwsField::uuid(uuid));
        }
        Ok(record)
    }

    /// The version family this record belongs to.
    #[must_use]
    pub const fn version(&self) -> PwsVersion {
        self.version
    }

    /// The fields in their current order.
    #[must_use]
    pub fn fields(&self) -> &[PwsField] {
        &self.fields
    }

    /// First field with the given type id.
    #[must_use]
    pub fn field(&self, ty: u8) -> Option<&PwsField> {
        self.fields.iter().find(|f| f.ty == ty)
    }

    /// The record's UUID, if it carries one.
    #[must_use]
    pub fn uuid(&self) -> Option<Uuid> {
        self.field(field_type::UUID).and_then(|f| f.value.as_uuid())
    }

    /// Replaces the field with the same type id in place, or appends.
    pub fn set_field(&mut self, field: PwsField) {
        match self.fields.iter_mut().find(|f| f.ty == field.ty) {
            Some(existing) => *existing = field,
            None => self.fields.push(field),
        }
    }

    /// Removes all fields with the given type id. Returns whether any were
    /// present.
    pub fn remove_field(&mut self, ty: u8) -> bool {
        let before = self.fields.len();
        self.fields.retain(|f| f.ty != ty);
        self.fields.len() != before
    }

    /// Appends a field without replacing existing ones of the same type.
    pub(crate) fn push_field(&mut self, field: PwsField) {
        self.fields.push(field);
    }

    /// True iff the required fields for the version are present.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        match self.version {
            PwsVersion::V1 | PwsVersion::V2 => self.field(field_type::TITLE).is_some(),
            PwsVersion::V3 => {
                self.uuid().is_some()
                    && (self.field(field_type::TITLE).is_some()
                        || self.field(field_type::PASSWORD).is_some())
            }
        }
    }

    /// Fields in canonical save order: UUID first, other known fields by
    /// ascending id, opaque fields last in their original relative order.
    /// Terminator fields never appear.
    pub(crate) fn canonical_fields(&self) -> Vec<&PwsField> {
        let mut keyed: Vec<(u8, u8, usize, &PwsField)> = self
            .fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.ty != field_type::END_OF_RECORD)
            .map(|(index, f)| {
                let class = if f.ty == field_type::UUID {
                    0
                } else if is_known(self.version, f.ty) {
                    1
                } else {
                    2
                };
                let id_key = if class == 1 { f.ty } else { 0 };
                (class, id_key, index, f)
            })
            .collect();
        keyed.sort_by_key(|&(class, id_key, index, _)| (class, id_key, index));
        keyed.into_iter().map(|(_, _, _, f)| f).collect()
    }

    /// Stable byte serialization used by the memory cage.
    ///
    /// Layout: format tag, version tag, u32 LE field count, then per field
    /// a u8 type id, u32 LE payload length and the payload bytes.
    pub(crate) fn to_cage_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(6 + self.fields.len() * 8);
        buf.push(CAGE_FORMAT);
        buf.push(version_tag(self.version));
        #[allow(clippy::cast_possible_truncation)]
        buf.extend_from_slice(&(self.fields.len() as u32).to_le_bytes());
        for field in &self.fields {
            buf.push(field.ty);
            let payload = field.value.to_wire_bytes();
            #[allow(clippy::cast_possible_truncation)]
            buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            buf.extend_from_slice(&payload);
        }
        buf
    }

    /// Reverses [`Self::to_cage_bytes`]. Failures are [`PwsError::MemoryKey`]:
    /// this byte form never comes from user input.
    pub(crate) fn from_cage_bytes(bytes: &[u8]) -> PwsResult<Self> {
        let bad = || PwsError::memory_key("malformed sealed record");
        if bytes.len() < 6 || bytes[0] != CAGE_FORMAT {
            return Err(bad());
        }
        let version = match bytes[1] {
            1 => PwsVersion::V1,
            2 => PwsVersion::V2,
            3 => PwsVersion::V3,
            _ => return Err(bad()),
        };
        let count = u32::from_le_bytes([bytes[2], bytes[3], bytes[4], bytes[5]]) as usize;
        let mut record = Self::new(version);
        let mut offset = 6;
        for _ in 0..count {
            if bytes.len() < offset + 5 {
                return Err(bad());
            }
            let ty = bytes[offset];
            let len = u32::from_le_bytes([
                bytes[offset + 1],
                bytes[offset + 2],
                bytes[offset + 3],
                bytes[offset + 4],
            ]) as usize;
            offset += 5;
            if bytes.len() < offset + len {
                return Err(bad());
            }
            let payload = &bytes[offset..offset + len];
            offset += len;
            let value = FieldValue::from_wire_bytes(value_kind(version, ty), payload);
            record.fields.push(PwsField { ty, value });
        }
        if offset != bytes.len() {
            return Err(bad());
        }
        Ok(record)
    }
}

const fn version_tag(version: PwsVersion) -> u8 {
    match version {
        PwsVersion::V1 => 1,
        PwsVersion::V2 => 2,
        PwsVersion::V3 => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validity_rules() {
        let mut v2 = PwsRecord::new(PwsVersion::V2);
        assert!(!v2.is_valid());
        v2.set_field(PwsField::text(field_type::TITLE, "gmail"));
        assert!(v2.is_valid());

        let mut v3 = PwsRecord::with_uuid(PwsVersion::V3).unwrap();
        assert!(!v3.is_valid());
        v3.set_field(PwsField::text(field_type::PASSWORD, "p@ss"));
        assert!(v3.is_valid());
        v3.remove_field(field_type::UUID);
        assert!(!v3.is_valid());
    }

    #[test]
    fn test_set_field_replaces_in_place() {
        let mut record = PwsRecord::new(PwsVersion::V2);
        record.set_field(PwsField::text(field_type::TITLE, "old"));
        record.set_field(PwsField::text(field_type::USERNAME, "alice"));
        record.set_field(PwsField::text(field_type::TITLE, "new"));
        assert_eq!(record.fields().len(), 2);
        assert_eq!(
            record.field(field_type::TITLE).unwrap().value.as_text(),
            Some("new")
        );
        assert_eq!(record.fields()[0].ty, field_type::TITLE);
    }

    #[test]
    fn test_canonical_order() {
        let mut record = PwsRecord::new(PwsVersion::V3);
        record.push_field(PwsField::text(field_type::NOTES, "n"));
        record.push_field(PwsField::bytes(200, vec![1]));
        record.push_field(PwsField::text(field_type::TITLE, "t"));
        record.push_field(PwsField::bytes(42, vec![2]));
        let uuid = Uuid::from_bytes([9u8; 16]);
        record.push_field(PwsField::uuid(uuid));

        let order: Vec<u8> = record.canonical_fields().iter().map(|f| f.ty).collect();
        assert_eq!(
            order,
            vec![field_type::UUID, field_type::TITLE, field_type::NOTES, 200, 42]
        );
    }

    #[test]
    fn test_cage_bytes_roundtrip() {
        let mut record = PwsRecord::with_uuid(PwsVersion::V3).unwrap();
        record.set_field(PwsField::text(field_type::TITLE, "gmail"));
        record.set_field(PwsField::text(field_type::PASSWORD, "p@ss"));
        record.set_field(PwsField::time(field_type::CREATION_TIME, 1_500_000_000));
        record.push_field(PwsField::bytes(42, vec![0xDE, 0xAD]));

        let bytes = record.to_cage_bytes();
        let restored = PwsRecord::from_cage_bytes(&bytes).unwrap();
        assert_eq!(record, restored);
    }

    #[test]
    fn test_cage_bytes_rejects_garbage() {
        assert!(matches!(
            PwsRecord::from_cage_bytes(&[0xFF; 12]),
            Err(PwsError::MemoryKey(_))
        ));
        // trailing junk after the declared fields
        let mut bytes = PwsRecord::new(PwsVersion::V1).to_cage_bytes();
        bytes.push(0);
        assert!(matches!(
            PwsRecord::from_cage_bytes(&bytes),
            Err(PwsError::MemoryKey(_))
        ));
    }
}
