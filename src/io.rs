//! Buffered block-aligned I/O over storage streams.

use std::io::{Read, Write};

use crate::error::{PwsError, PwsResult};

/// Rounds `len` up to a non-zero multiple of `block_len`. A zero length maps
/// to one block.
pub(crate) fn calc_block_length(len: usize, block_len: usize) -> usize {
    debug_assert!(block_len > 0);
    if len == 0 {
        block_len
    } else {
        len.div_ceil(block_len) * block_len
    }
}

/// Allocates a zeroed buffer holding at least `len` bytes, sized to a
/// non-zero multiple of `block_len`.
pub(crate) fn allocate_buffer(len: usize, block_len: usize) -> Vec<u8> {
    vec![0u8; calc_block_length(len, block_len)]
}

/// Reader wrapper with the end-of-file semantics of the record loop.
pub(crate) struct BlockReader<R> {
    inner: R,
}

impl<R: Read> BlockReader<R> {
    pub(crate) fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Fills `buf` completely.
    ///
    /// Returns [`PwsError::EndOfFile`] if the stream is exhausted before the
    /// first byte, [`PwsError::Truncated`] if it gives out part-way.
    pub(crate) fn read_exact(&mut self, buf: &mut [u8]) -> PwsResult<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let count = self
                .inner
                .read(&mut buf[filled..])
                .map_err(|e| PwsError::io("read", e))?;
            if count == 0 {
                if filled == 0 {
                    return Err(PwsError::EndOfFile);
                }
                return Err(PwsError::Truncated {
                    wanted: buf.len(),
                    got: filled,
                });
            }
            filled += count;
        }
        Ok(())
    }

    pub(crate) fn into_inner(self) -> R {
        self.inner
    }
}

/// Writer wrapper; short writes are never observable by callers.
pub(crate) struct BlockWriter<W> {
    inner: W,
}

impl<W: Write> BlockWriter<W> {
    pub(crate) fn new(inner: W) -> Self {
        Self { inner }
    }

    pub(crate) fn write_all(&mut self, buf: &[u8]) -> PwsResult<()> {
        self.inner
            .write_all(buf)
            .map_err(|e| PwsError::io("write", e))
    }

    pub(crate) fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calc_block_length() {
        assert_eq!(calc_block_length(0, 8), 8);
        assert_eq!(calc_block_length(1, 8), 8);
        assert_eq!(calc_block_length(8, 8), 8);
        assert_eq!(calc_block_length(9, 8), 16);
        assert_eq!(calc_block_length(0, 16), 16);
        assert_eq!(calc_block_length(17, 16), 32);
    }

    #[test]
    fn test_allocate_buffer_zeroed() {
        let buf = allocate_buffer(11, 8);
        assert_eq!(buf.len(), 16);
        assert!(buf.iter().all(|b| *b == 0));
    }

    #[test]
    fn test_read_exact_end_of_file() {
        let mut reader = BlockReader::new(&[] as &[u8]);
        let mut buf = [0u8; 8];
        assert!(matches!(
            reader.read_exact(&mut buf),
            Err(PwsError::EndOfFile)
        ));
    }

    #[test]
    fn test_read_exact_truncated() {
        let mut reader = BlockReader::new(&[1u8, 2, 3][..]);
        let mut buf = [0u8; 8];
        let result = reader.read_exact(&mut buf);
        assert!(matches!(
            result,
            Err(PwsError::Truncated { wanted: 8, got: 3 })
        ));
    }

    #[test]
    fn test_read_exact_fills_buffer() {
        let mut reader = BlockReader::new(&[1u8, 2, 3, 4, 5, 6, 7, 8, 9][..]);
        let mut buf = [0u8; 8];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4, 5, 6, 7, 8]);
        // one byte remains, a two-byte read is truncated
        let mut buf = [0u8; 2];
        assert!(matches!(
            reader.read_exact(&mut buf),
            Err(PwsError::Truncated { wanted: 2, got: 1 })
        ));
    }
}
