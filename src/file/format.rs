//! On-disk layout constants for the Password Safe format family.

/// Record-layer cipher block length of V1/V2 files.
pub(crate) const BLOCK_LENGTH_V1V2: usize = 8;
/// Record-layer cipher block length of V3 files.
pub(crate) const BLOCK_LENGTH_V3: usize = 16;

/// Length of the V1/V2 RandStuff header bytes.
pub(crate) const STUFF_LENGTH: usize = 8;
/// Length of the V1/V2 RandHash header bytes.
pub(crate) const HASH_LENGTH: usize = 20;
/// Length of the V1/V2 header salt.
pub(crate) const SALT_LENGTH_V1V2: usize = 20;
/// Length of the V1/V2 record-layer IV.
pub(crate) const IV_LENGTH_V1V2: usize = 8;
/// Total V1/V2 header length.
/// Layout: RandStuff(8) + RandHash(20) + Salt(20) + IV(8) = 56
pub(crate) const HEADER_LENGTH_V1V2: usize =
    STUFF_LENGTH + HASH_LENGTH + SALT_LENGTH_V1V2 + IV_LENGTH_V1V2;

/// Magic bytes opening a V3 file.
pub(crate) const V3_MAGIC: &[u8; 4] = b"PWS3";
/// Length of the V3 header salt.
pub(crate) const SALT_LENGTH_V3: usize = 32;
/// Length of the V3 record-layer IV.
pub(crate) const IV_LENGTH_V3: usize = 16;
/// V3 header length after the magic.
/// Layout: Salt(32) + N(4) + H(P)(32) + B1B2(32) + B3B4(32) + IV(16) = 148
pub(crate) const HEADER_BODY_LENGTH_V3: usize = SALT_LENGTH_V3 + 4 + 32 + 32 + 32 + IV_LENGTH_V3;
/// End-of-data marker of a V3 file, written unencrypted.
pub(crate) const V3_EOF_MARKER: &[u8; 16] = b"PWS3-EOFPWS3-EOF";
/// Stretch iterations written into fresh V3 headers.
pub(crate) const V3_DEFAULT_ITERATIONS: u32 = 2048;
/// Iteration counts above this are treated as corruption rather than
/// stretched for hours.
pub(crate) const V3_MAX_ITERATIONS: u32 = 1 << 22;

/// Payload bytes carried inside the first block of a V3 field.
pub(crate) const V3_FIRST_BLOCK_PAYLOAD: usize = 11;

/// In V1/V2 the field type occupies four wire bytes; ids above one byte are
/// invalid.
pub(crate) const MAX_FIELD_TYPE: u32 = 255;
/// Upper bound accepted for a single field payload.
pub(crate) const MAX_FIELD_LENGTH: usize = 1 << 24;

/// Format-description text of the V2 extra header record.
pub(crate) const V2_FORMAT_DESCRIPTION: &str =
    " !!!Version 2 File Format!!! Please upgrade to PasswordSafe 2.0 or later";
/// Prefix that identifies the V2 format-description record.
pub(crate) const V2_FORMAT_PREFIX: &str = " !!!Version 2 File Format!!!";
/// Version string stored in the V2 format-description record.
pub(crate) const V2_FORMAT_VERSION: &str = "2.0";
