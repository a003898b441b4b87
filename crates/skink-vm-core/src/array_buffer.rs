//! Array buffers
//!
//! A raw byte buffer shared by typed-array and data-view objects.

use parking_lot::RwLock;

use crate::error::{VmError, VmResult};

/// Maximum buffer size (1 GiB); larger requests are a `RangeError`
pub const MAX_BUFFER_LEN: usize = 1 << 30;

/// A raw binary buffer
pub struct JsArrayBuffer {
    data: RwLock<Vec<u8>>,
}

impl JsArrayBuffer {
    /// Allocate a zero-filled buffer
    pub fn new(byte_len: usize) -> VmResult<Self> {
        if byte_len > MAX_BUFFER_LEN {
            return Err(VmError::range_error(format!(
                "invalid array buffer length {byte_len}"
            )));
        }
        Ok(Self {
            data: RwLock::new(vec![0; byte_len]),
        })
    }

    /// Wrap existing bytes
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            data: RwLock::new(bytes),
        }
    }

    /// Byte length
    pub fn byte_len(&self) -> usize {
        self.data.read().len()
    }

    /// Copy out the whole contents
    pub fn to_vec(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    /// Read one byte
    pub fn get(&self, offset: usize) -> Option<u8> {
        self.data.read().get(offset).copied()
    }

    /// Write one byte; out-of-range writes are a `RangeError`
    pub fn set(&self, offset: usize, byte: u8) -> VmResult<()> {
        let mut data = self.data.write();
        match data.get_mut(offset) {
            Some(slot) => {
                *slot = byte;
                Ok(())
            }
            None => Err(VmError::range_error(format!(
                "offset {offset} out of bounds (length {})",
                data.len()
            ))),
        }
    }

    /// Read a little-endian or big-endian scalar of `size` bytes
    pub fn read_bytes(&self, offset: usize, size: usize) -> VmResult<Vec<u8>> {
        let data = self.data.read();
        let end = offset
            .checked_add(size)
            .ok_or_else(|| VmError::range_error("offset overflow"))?;
        if end > data.len() {
            return Err(VmError::range_error(format!(
                "range {offset}..{end} out of bounds (length {})",
                data.len()
            )));
        }
        Ok(data[offset..end].to_vec())
    }

    /// Write raw bytes at an offset
    pub fn write_bytes(&self, offset: usize, bytes: &[u8]) -> VmResult<()> {
        let mut data = self.data.write();
        let end = offset
            .checked_add(bytes.len())
            .ok_or_else(|| VmError::range_error("offset overflow"))?;
        if end > data.len() {
            return Err(VmError::range_error(format!(
                "range {offset}..{end} out of bounds (length {})",
                data.len()
            )));
        }
        data[offset..end].copy_from_slice(bytes);
        Ok(())
    }

    /// Copy a sub-range into a fresh buffer (`slice`)
    pub fn slice(&self, start: usize, end: usize) -> Self {
        let data = self.data.read();
        let start = start.min(data.len());
        let end = end.min(data.len()).max(start);
        Self::from_bytes(data[start..end].to_vec())
    }
}

impl std::fmt::Debug for JsArrayBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JsArrayBuffer({} bytes)", self.byte_len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_filled() {
        let buf = JsArrayBuffer::new(4).unwrap();
        assert_eq!(buf.byte_len(), 4);
        assert_eq!(buf.to_vec(), vec![0, 0, 0, 0]);
    }

    #[test]
    fn test_oversized_is_range_error() {
        assert!(JsArrayBuffer::new(MAX_BUFFER_LEN + 1).is_err());
    }

    #[test]
    fn test_read_write() {
        let buf = JsArrayBuffer::new(4).unwrap();
        buf.write_bytes(1, &[0xAB, 0xCD]).unwrap();
        assert_eq!(buf.read_bytes(1, 2).unwrap(), vec![0xAB, 0xCD]);
        assert!(buf.write_bytes(3, &[1, 2]).is_err());
        assert!(buf.read_bytes(4, 1).is_err());
    }

    #[test]
    fn test_slice_clamps() {
        let buf = JsArrayBuffer::from_bytes(vec![1, 2, 3, 4]);
        assert_eq!(buf.slice(1, 3).to_vec(), vec![2, 3]);
        assert_eq!(buf.slice(3, 100).to_vec(), vec![4]);
        assert_eq!(buf.slice(10, 20).byte_len(), 0);
    }
}
