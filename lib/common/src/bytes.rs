//! Big-endian helpers for reading and writing wire messages.

use crate::ProtocolError;

/// Reads big-endian numbers from a byte slice, failing with [ProtocolError::Truncated] if the
/// slice ends prematurely.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl<'a> ByteReader<'a> {
    /// Creates a new [ByteReader].
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, position: 0 }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.position
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Returns the next `len` bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ProtocolError> {
        if self.remaining() < len {
            return Err(ProtocolError::Truncated {
                expected: self.position + len,
                actual: self.bytes.len(),
            });
        }
        let result = &self.bytes[self.position..self.position + len];
        self.position += len;
        Ok(result)
    }

    /// Returns all bytes that have not been read yet.
    pub fn read_remaining(&mut self) -> &'a [u8] {
        let result = &self.bytes[self.position..];
        self.position = self.bytes.len();
        result
    }

    pub fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16, ProtocolError> {
        self.read_array().map(u16::from_be_bytes)
    }

    pub fn read_i32(&mut self) -> Result<i32, ProtocolError> {
        self.read_array().map(i32::from_be_bytes)
    }

    pub fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        self.read_array().map(u32::from_be_bytes)
    }

    pub fn read_u64(&mut self) -> Result<u64, ProtocolError> {
        self.read_array().map(u64::from_be_bytes)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let bytes = self.read_bytes(N)?;
        let mut result = [0; N];
        result.copy_from_slice(bytes);
        Ok(result)
    }
}

/// Reads a big-endian `u64` starting at `offset`.
pub fn read_u64_at(bytes: &[u8], offset: usize) -> Result<u64, ProtocolError> {
    ByteReader::new(bytes.get(offset..).unwrap_or_default()).read_u64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_big_endian_values() {
        let bytes = [1, 0, 2, 0, 0, 0, 0, 0, 0, 0, 9];
        let mut reader = ByteReader::new(&bytes);
        assert_eq!(reader.read_u8().unwrap(), 1);
        assert_eq!(reader.read_u16().unwrap(), 2);
        assert_eq!(reader.read_u64().unwrap(), 9);
        assert!(reader.is_empty());
    }

    #[test]
    fn reports_truncation() {
        let mut reader = ByteReader::new(&[0, 1]);
        assert_eq!(
            reader.read_u32(),
            Err(ProtocolError::Truncated {
                expected: 4,
                actual: 2
            })
        );
    }
}
