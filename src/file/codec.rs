//! Per-version field wire codec and record read/write loops.

use std::io::{Read, Write};

use crate::crypto::{RecordCipher, RecordHmac};
use crate::error::{PwsError, PwsResult};
use crate::field::{field_type, value_kind, FieldValue, PwsField, PwsVersion};
use crate::io::{allocate_buffer, BlockReader, BlockWriter};
use crate::record::PwsRecord;

use super::format::{
    BLOCK_LENGTH_V1V2, BLOCK_LENGTH_V3, MAX_FIELD_LENGTH, MAX_FIELD_TYPE, V3_EOF_MARKER,
    V3_FIRST_BLOCK_PAYLOAD,
};

/// The five field ids every V1 record carries. V1 has no record terminator:
/// a record is complete once all of these have been seen.
const V1_CANONICAL: [u8; 5] = [
    field_type::DEFAULT,
    field_type::TITLE,
    field_type::USERNAME,
    field_type::NOTES,
    field_type::PASSWORD,
];

/// Outcome of one V3 field-unit read.
enum FieldUnitV3 {
    Field(PwsField),
    EndOfRecord,
    EndOfData,
}

/// Reads one V1/V2 field unit: an 8-byte header block (length, type) plus a
/// block-padded payload. Returns `None` for the V2 record terminator.
fn read_field_v1v2<R: Read>(
    reader: &mut BlockReader<R>,
    cipher: &mut RecordCipher,
    version: PwsVersion,
) -> PwsResult<Option<PwsField>> {
    let mut block = [0u8; BLOCK_LENGTH_V1V2];
    reader.read_exact(&mut block)?;
    cipher.decrypt_block(&mut block);

    let len = u32::from_le_bytes([block[0], block[1], block[2], block[3]]) as usize;
    let raw_ty = u32::from_le_bytes([block[4], block[5], block[6], block[7]]);
    if raw_ty > MAX_FIELD_TYPE {
        return Err(PwsError::corrupt(format!("field type {raw_ty} out of range")));
    }
    #[allow(clippy::cast_possible_truncation)]
    let ty = raw_ty as u8;
    if len > MAX_FIELD_LENGTH {
        return Err(PwsError::corrupt(format!("field length {len} exceeds limit")));
    }

    // a zero length still occupies one block on disk
    let mut payload = allocate_buffer(len, BLOCK_LENGTH_V1V2);
    read_payload(reader, &mut payload)?;
    cipher.decrypt(&mut payload);

    if ty == field_type::END_OF_RECORD {
        return Ok(None);
    }
    let value = FieldValue::from_wire_bytes(value_kind(version, ty), &payload[..len]);
    Ok(Some(PwsField { ty, value }))
}

/// Reads one V3 field unit. The end-of-data marker is matched on the raw
/// block before decryption.
fn read_field_v3<R: Read>(
    reader: &mut BlockReader<R>,
    cipher: &mut RecordCipher,
    hmac: &mut RecordHmac,
) -> PwsResult<FieldUnitV3> {
    let mut block = [0u8; BLOCK_LENGTH_V3];
    reader.read_exact(&mut block)?;
    if &block == V3_EOF_MARKER {
        return Ok(FieldUnitV3::EndOfData);
    }
    cipher.decrypt_block(&mut block);

    let len = u32::from_le_bytes([block[0], block[1], block[2], block[3]]) as usize;
    let ty = block[4];
    if len > MAX_FIELD_LENGTH {
        return Err(PwsError::corrupt(format!("field length {len} exceeds limit")));
    }

    let mut payload = Vec::with_capacity(len);
    let head = len.min(V3_FIRST_BLOCK_PAYLOAD);
    payload.extend_from_slice(&block[5..5 + head]);
    if len > V3_FIRST_BLOCK_PAYLOAD {
        let remaining = len - V3_FIRST_BLOCK_PAYLOAD;
        let mut rest = allocate_buffer(remaining, BLOCK_LENGTH_V3);
        read_payload(reader, &mut rest)?;
        cipher.decrypt(&mut rest);
        payload.extend_from_slice(&rest[..remaining]);
    }
    hmac.update(&payload);

    if ty == field_type::END_OF_RECORD {
        return Ok(FieldUnitV3::EndOfRecord);
    }
    let value = FieldValue::from_wire_bytes(value_kind(PwsVersion::V3, ty), &payload);
    Ok(FieldUnitV3::Field(PwsField { ty, value }))
}

/// Reads a field payload; running out of bytes here is always corruption,
/// never a clean end of file.
fn read_payload<R: Read>(reader: &mut BlockReader<R>, buf: &mut [u8]) -> PwsResult<()> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(PwsError::EndOfFile | PwsError::Truncated { .. }) => {
            Err(PwsError::corrupt("field payload truncated"))
        }
        Err(other) => Err(other),
    }
}

/// Reads one V1/V2 record. `Err(EndOfFile)` marks the clean end of the
/// record stream.
pub(crate) fn read_record_v1v2<R: Read>(
    reader: &mut BlockReader<R>,
    cipher: &mut RecordCipher,
    version: PwsVersion,
) -> PwsResult<PwsRecord> {
    let mut record = PwsRecord::new(version);
    let mut seen = [false; V1_CANONICAL.len()];

    loop {
        match read_field_v1v2(reader, cipher, version) {
            Ok(Some(field)) => {
                if version == PwsVersion::V1 {
                    let Some(slot) = V1_CANONICAL.iter().position(|t| *t == field.ty) else {
                        return Err(PwsError::corrupt(format!(
                            "unexpected field type {} in V1 stream",
                            field.ty
                        )));
                    };
                    seen[slot] = true;
                    record.push_field(field);
                    if seen.iter().all(|s| *s) {
                        return Ok(record);
                    }
                } else {
                    record.push_field(field);
                }
            }
            // explicit terminator (V2 only; V1 ids never reach 255)
            Ok(None) => return Ok(record),
            Err(PwsError::EndOfFile) => {
                if record.fields().is_empty() {
                    return Err(PwsError::EndOfFile);
                }
                if version == PwsVersion::V1 {
                    // a clean EOF legally ends the last V1 record
                    return Ok(record);
                }
                return Err(PwsError::corrupt("record truncated at end of file"));
            }
            Err(PwsError::Truncated { .. }) => {
                return Err(PwsError::corrupt("trailing partial block"));
            }
            Err(other) => return Err(other),
        }
    }
}

/// Reads one V3 record. `None` marks the end-of-data marker; the HMAC
/// trailer follows in the raw stream.
pub(crate) fn read_record_v3<R: Read>(
    reader: &mut BlockReader<R>,
    cipher: &mut RecordCipher,
    hmac: &mut RecordHmac,
) -> PwsResult<Option<PwsRecord>> {
    let mut record = PwsRecord::new(PwsVersion::V3);
    loop {
        match read_field_v3(reader, cipher, hmac) {
            Ok(FieldUnitV3::Field(field)) => record.push_field(field),
            Ok(FieldUnitV3::EndOfRecord) => return Ok(Some(record)),
            Ok(FieldUnitV3::EndOfData) => {
                if record.fields().is_empty() {
                    return Ok(None);
                }
                return Err(PwsError::corrupt("end-of-data marker inside a record"));
            }
            Err(PwsError::EndOfFile | PwsError::Truncated { .. }) => {
                return Err(PwsError::corrupt("missing end-of-data marker"));
            }
            Err(other) => return Err(other),
        }
    }
}

/// Writes one V1/V2 field unit. Padding bytes are zeros.
pub(crate) fn write_field_v1v2<W: Write>(
    writer: &mut BlockWriter<W>,
    cipher: &mut RecordCipher,
    ty: u8,
    payload: &[u8],
) -> PwsResult<()> {
    let mut header = [0u8; BLOCK_LENGTH_V1V2];
    #[allow(clippy::cast_possible_truncation)]
    header[0..4].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    header[4..8].copy_from_slice(&u32::from(ty).to_le_bytes());
    cipher.encrypt_block(&mut header);
    writer.write_all(&header)?;

    let mut buf = allocate_buffer(payload.len(), BLOCK_LENGTH_V1V2);
    buf[..payload.len()].copy_from_slice(payload);
    cipher.encrypt(&mut buf);
    writer.write_all(&buf)
}

/// Writes one V3 field unit. Padding bytes are zeros.
pub(crate) fn write_field_v3<W: Write>(
    writer: &mut BlockWriter<W>,
    cipher: &mut RecordCipher,
    hmac: &mut RecordHmac,
    ty: u8,
    payload: &[u8],
) -> PwsResult<()> {
    hmac.update(payload);

    let mut first = [0u8; BLOCK_LENGTH_V3];
    #[allow(clippy::cast_possible_truncation)]
    first[0..4].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    first[4] = ty;
    let head = payload.len().min(V3_FIRST_BLOCK_PAYLOAD);
    first[5..5 + head].copy_from_slice(&payload[..head]);
    cipher.encrypt_block(&mut first);
    writer.write_all(&first)?;

    if payload.len() > V3_FIRST_BLOCK_PAYLOAD {
        let remaining = &payload[V3_FIRST_BLOCK_PAYLOAD..];
        let mut buf = allocate_buffer(remaining.len(), BLOCK_LENGTH_V3);
        buf[..remaining.len()].copy_from_slice(remaining);
        cipher.encrypt(&mut buf);
        writer.write_all(&buf)?;
    }
    Ok(())
}

/// Writes one record in canonical field order, terminator included where the
/// version has one. V1 always materializes its five canonical fields so
/// record boundaries stay inferable on re-read.
pub(crate) fn write_record_v1v2<W: Write>(
    writer: &mut BlockWriter<W>,
    cipher: &mut RecordCipher,
    record: &PwsRecord,
) -> PwsResult<()> {
    if record.version() == PwsVersion::V1 {
        for ty in V1_CANONICAL {
            let payload = record
                .field(ty)
                .map(|f| f.value.to_wire_bytes())
                .unwrap_or_default();
            write_field_v1v2(writer, cipher, ty, &payload)?;
        }
        return Ok(());
    }
    for field in record.canonical_fields() {
        write_field_v1v2(writer, cipher, field.ty, &field.value.to_wire_bytes())?;
    }
    write_field_v1v2(writer, cipher, field_type::END_OF_RECORD, &[])
}

/// Writes one V3 record in canonical field order plus its terminator.
pub(crate) fn write_record_v3<W: Write>(
    writer: &mut BlockWriter<W>,
    cipher: &mut RecordCipher,
    hmac: &mut RecordHmac,
    record: &PwsRecord,
) -> PwsResult<()> {
    for field in record.canonical_fields() {
        write_field_v3(writer, cipher, hmac, field.ty, &field.value.to_wire_bytes())?;
    }
    write_field_v3(writer, cipher, hmac, field_type::END_OF_RECORD, &[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::PwsRecord;

    fn v2_ciphers() -> (RecordCipher, RecordCipher) {
        let key = [0x42u8; 20];
        let iv = [7u8; 8];
        (
            RecordCipher::blowfish_cbc(&key, &iv).unwrap(),
            RecordCipher::blowfish_cbc(&key, &iv).unwrap(),
        )
    }

    fn v3_ciphers() -> (RecordCipher, RecordCipher, RecordHmac, RecordHmac) {
        let key = [0x42u8; 32];
        let iv = [7u8; 16];
        let hmac_key = [9u8; 32];
        (
            RecordCipher::twofish_cbc(&key, &iv).unwrap(),
            RecordCipher::twofish_cbc(&key, &iv).unwrap(),
            RecordHmac::new(&hmac_key).unwrap(),
            RecordHmac::new(&hmac_key).unwrap(),
        )
    }

    #[test]
    fn test_v2_record_roundtrip() {
        let mut record = PwsRecord::with_uuid(PwsVersion::V2).unwrap();
        record.set_field(PwsField::text(field_type::TITLE, "gmail"));
        record.set_field(PwsField::text(field_type::USERNAME, "alice"));
        record.set_field(PwsField::text(field_type::NOTES, ""));
        record.set_field(PwsField::time(field_type::CREATION_TIME, 1_000_000));

        let (mut enc, mut dec) = v2_ciphers();
        let mut writer = BlockWriter::new(Vec::new());
        write_record_v1v2(&mut writer, &mut enc, &record).unwrap();
        let bytes = writer.into_inner();
        assert_eq!(bytes.len() % BLOCK_LENGTH_V1V2, 0);

        let mut reader = BlockReader::new(&bytes[..]);
        let decoded = read_record_v1v2(&mut reader, &mut dec, PwsVersion::V2).unwrap();
        for field in record.canonical_fields() {
            assert_eq!(decoded.field(field.ty), Some(field));
        }
        assert!(matches!(
            read_record_v1v2(&mut reader, &mut dec, PwsVersion::V2),
            Err(PwsError::EndOfFile)
        ));
    }

    #[test]
    fn test_v1_record_roundtrip_and_boundaries() {
        let mut record = PwsRecord::new(PwsVersion::V1);
        record.set_field(PwsField::text(field_type::TITLE, "box"));
        record.set_field(PwsField::text(field_type::PASSWORD, "pw"));

        let key = [0x42u8; 20];
        let mut enc = RecordCipher::blowfish_ecb(&key).unwrap();
        let mut writer = BlockWriter::new(Vec::new());
        write_record_v1v2(&mut writer, &mut enc, &record).unwrap();
        write_record_v1v2(&mut writer, &mut enc, &record).unwrap();
        let bytes = writer.into_inner();

        let mut dec = RecordCipher::blowfish_ecb(&key).unwrap();
        let mut reader = BlockReader::new(&bytes[..]);
        let first = read_record_v1v2(&mut reader, &mut dec, PwsVersion::V1).unwrap();
        assert_eq!(first.fields().len(), V1_CANONICAL.len());
        assert_eq!(
            first.field(field_type::TITLE).unwrap().value.as_text(),
            Some("box")
        );
        let second = read_record_v1v2(&mut reader, &mut dec, PwsVersion::V1).unwrap();
        assert_eq!(second.fields().len(), V1_CANONICAL.len());
        assert!(matches!(
            read_record_v1v2(&mut reader, &mut dec, PwsVersion::V1),
            Err(PwsError::EndOfFile)
        ));
    }

    #[test]
    fn test_v3_record_roundtrip_with_long_and_opaque_fields() {
        let mut record = PwsRecord::with_uuid(PwsVersion::V3).unwrap();
        record.set_field(PwsField::text(field_type::TITLE, "a title well over eleven bytes"));
        record.set_field(PwsField::text(field_type::PASSWORD, "p@ss"));
        record.push_field(PwsField::bytes(0x42, vec![0xDE, 0xAD, 0xBE, 0xEF]));

        let (mut enc, mut dec, mut enc_hmac, mut dec_hmac) = v3_ciphers();
        let mut writer = BlockWriter::new(Vec::new());
        write_record_v3(&mut writer, &mut enc, &mut enc_hmac, &record).unwrap();
        let mut bytes = writer.into_inner();
        assert_eq!(bytes.len() % BLOCK_LENGTH_V3, 0);
        bytes.extend_from_slice(V3_EOF_MARKER);

        let mut reader = BlockReader::new(&bytes[..]);
        let decoded = read_record_v3(&mut reader, &mut dec, &mut dec_hmac)
            .unwrap()
            .unwrap();
        for field in record.canonical_fields() {
            assert_eq!(decoded.field(field.ty), Some(field));
        }
        assert!(read_record_v3(&mut reader, &mut dec, &mut dec_hmac)
            .unwrap()
            .is_none());
        assert_eq!(enc_hmac.finalize(), dec_hmac.finalize());
    }

    #[test]
    fn test_v3_missing_marker_is_corrupt() {
        let (mut enc, mut dec, mut enc_hmac, mut dec_hmac) = v3_ciphers();
        let mut record = PwsRecord::with_uuid(PwsVersion::V3).unwrap();
        record.set_field(PwsField::text(field_type::TITLE, "t"));

        let mut writer = BlockWriter::new(Vec::new());
        write_record_v3(&mut writer, &mut enc, &mut enc_hmac, &record).unwrap();
        let bytes = writer.into_inner();

        let mut reader = BlockReader::new(&bytes[..]);
        read_record_v3(&mut reader, &mut dec, &mut dec_hmac)
            .unwrap()
            .unwrap();
        assert!(matches!(
            read_record_v3(&mut reader, &mut dec, &mut dec_hmac),
            Err(PwsError::CorruptFile(_))
        ));
    }

    #[test]
    fn test_v1_unknown_field_is_corrupt() {
        let key = [0x42u8; 20];
        let mut enc = RecordCipher::blowfish_ecb(&key).unwrap();
        let mut writer = BlockWriter::new(Vec::new());
        write_field_v1v2(&mut writer, &mut enc, 0x22, b"odd").unwrap();
        let bytes = writer.into_inner();

        let mut dec = RecordCipher::blowfish_ecb(&key).unwrap();
        let mut reader = BlockReader::new(&bytes[..]);
        assert!(matches!(
            read_record_v1v2(&mut reader, &mut dec, PwsVersion::V1),
            Err(PwsError::CorruptFile(_))
        ));
    }

    #[test]
    fn test_v2_truncated_record_is_corrupt() {
        let mut record = PwsRecord::new(PwsVersion::V2);
        record.set_field(PwsField::text(field_type::TITLE, "gmail"));

        let (mut enc, mut dec) = v2_ciphers();
        let mut writer = BlockWriter::new(Vec::new());
        write_record_v1v2(&mut writer, &mut enc, &record).unwrap();
        let bytes = writer.into_inner();
        let cut = &bytes[..bytes.len() - BLOCK_LENGTH_V1V2];

        let mut reader = BlockReader::new(cut);
        assert!(matches!(
            read_record_v1v2(&mut reader, &mut dec, PwsVersion::V2),
            Err(PwsError::CorruptFile(_))
        ));
    }

    #[test]
    fn test_zero_length_field_occupies_one_block() {
        let (mut enc, _) = v2_ciphers();
        let mut writer = BlockWriter::new(Vec::new());
        write_field_v1v2(&mut writer, &mut enc, field_type::NOTES, &[]).unwrap();
        assert_eq!(writer.into_inner().len(), 2 * BLOCK_LENGTH_V1V2);
    }
}
