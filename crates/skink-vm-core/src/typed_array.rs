//! Typed arrays and data views
//!
//! Element-typed and byte-order-explicit views over a shared
//! [`JsArrayBuffer`]. Integer element reads and writes use the ToInt32 /
//! ToUint32 style truncation of the conversion layer.

use std::sync::Arc;

use crate::array_buffer::JsArrayBuffer;
use crate::error::{VmError, VmResult};

/// Element type of a typed array
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypedArrayKind {
    /// `Int8Array`
    Int8,
    /// `Uint8Array`
    Uint8,
    /// `Int16Array`
    Int16,
    /// `Uint16Array`
    Uint16,
    /// `Int32Array`
    Int32,
    /// `Uint32Array`
    Uint32,
    /// `Float32Array`
    Float32,
    /// `Float64Array`
    Float64,
}

impl TypedArrayKind {
    /// Bytes per element
    pub const fn element_size(self) -> usize {
        match self {
            Self::Int8 | Self::Uint8 => 1,
            Self::Int16 | Self::Uint16 => 2,
            Self::Int32 | Self::Uint32 | Self::Float32 => 4,
            Self::Float64 => 8,
        }
    }

    /// Constructor name exposed to script
    pub const fn name(self) -> &'static str {
        match self {
            Self::Int8 => "Int8Array",
            Self::Uint8 => "Uint8Array",
            Self::Int16 => "Int16Array",
            Self::Uint16 => "Uint16Array",
            Self::Int32 => "Int32Array",
            Self::Uint32 => "Uint32Array",
            Self::Float32 => "Float32Array",
            Self::Float64 => "Float64Array",
        }
    }
}

/// A typed view over an array buffer
pub struct JsTypedArray {
    buffer: Arc<JsArrayBuffer>,
    kind: TypedArrayKind,
    byte_offset: usize,
    length: usize,
}

impl JsTypedArray {
    /// Create a view; the window must fit inside the buffer
    pub fn new(
        buffer: Arc<JsArrayBuffer>,
        kind: TypedArrayKind,
        byte_offset: usize,
        length: usize,
    ) -> VmResult<Self> {
        let span = length
            .checked_mul(kind.element_size())
            .and_then(|b| b.checked_add(byte_offset))
            .ok_or_else(|| VmError::range_error("typed array length overflow"))?;
        if span > buffer.byte_len() {
            return Err(VmError::range_error(format!(
                "typed array spans {span} bytes but buffer holds {}",
                buffer.byte_len()
            )));
        }
        if byte_offset % kind.element_size() != 0 {
            return Err(VmError::range_error(format!(
                "start offset {byte_offset} is not aligned to {}",
                kind.element_size()
            )));
        }
        Ok(Self {
            buffer,
            kind,
            byte_offset,
            length,
        })
    }

    /// The underlying buffer
    pub fn buffer(&self) -> &Arc<JsArrayBuffer> {
        &self.buffer
    }

    /// Element type
    pub fn kind(&self) -> TypedArrayKind {
        self.kind
    }

    /// Element count
    pub fn len(&self) -> usize {
        self.length
    }

    /// Whether the view is empty
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Byte offset into the buffer
    pub fn byte_offset(&self) -> usize {
        self.byte_offset
    }

    /// Read element `index` as f64; `None` past the end
    pub fn get(&self, index: usize) -> Option<f64> {
        if index >= self.length {
            return None;
        }
        let size = self.kind.element_size();
        let offset = self.byte_offset + index * size;
        let bytes = self.buffer.read_bytes(offset, size).ok()?;
        Some(decode_element(self.kind, &bytes))
    }

    /// Write element `index` from an f64 (out-of-range writes are ignored,
    /// matching typed-array store semantics)
    pub fn set(&self, index: usize, value: f64) -> VmResult<()> {
        if index >= self.length {
            return Ok(());
        }
        let size = self.kind.element_size();
        let offset = self.byte_offset + index * size;
        let bytes = encode_element(self.kind, value);
        self.buffer.write_bytes(offset, &bytes)
    }
}

fn decode_element(kind: TypedArrayKind, bytes: &[u8]) -> f64 {
    match kind {
        TypedArrayKind::Int8 => bytes[0] as i8 as f64,
        TypedArrayKind::Uint8 => bytes[0] as f64,
        TypedArrayKind::Int16 => i16::from_le_bytes([bytes[0], bytes[1]]) as f64,
        TypedArrayKind::Uint16 => u16::from_le_bytes([bytes[0], bytes[1]]) as f64,
        TypedArrayKind::Int32 => {
            i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64
        }
        TypedArrayKind::Uint32 => {
            u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64
        }
        TypedArrayKind::Float32 => {
            f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64
        }
        TypedArrayKind::Float64 => f64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]),
    }
}

fn encode_element(kind: TypedArrayKind, value: f64) -> Vec<u8> {
    match kind {
        TypedArrayKind::Int8 => vec![crate::convert::to_int32(value) as i8 as u8],
        TypedArrayKind::Uint8 => vec![crate::convert::to_uint32(value) as u8],
        TypedArrayKind::Int16 => (crate::convert::to_int32(value) as i16).to_le_bytes().to_vec(),
        TypedArrayKind::Uint16 => (crate::convert::to_uint32(value) as u16)
            .to_le_bytes()
            .to_vec(),
        TypedArrayKind::Int32 => crate::convert::to_int32(value).to_le_bytes().to_vec(),
        TypedArrayKind::Uint32 => crate::convert::to_uint32(value).to_le_bytes().to_vec(),
        TypedArrayKind::Float32 => (value as f32).to_le_bytes().to_vec(),
        TypedArrayKind::Float64 => value.to_le_bytes().to_vec(),
    }
}

/// Byte-order-explicit view over an array buffer
pub struct JsDataView {
    buffer: Arc<JsArrayBuffer>,
    byte_offset: usize,
    byte_length: usize,
}

impl JsDataView {
    /// Create a view; the window must fit inside the buffer
    pub fn new(buffer: Arc<JsArrayBuffer>, byte_offset: usize, byte_length: usize) -> VmResult<Self> {
        let end = byte_offset
            .checked_add(byte_length)
            .ok_or_else(|| VmError::range_error("data view length overflow"))?;
        if end > buffer.byte_len() {
            return Err(VmError::range_error(format!(
                "data view spans {end} bytes but buffer holds {}",
                buffer.byte_len()
            )));
        }
        Ok(Self {
            buffer,
            byte_offset,
            byte_length,
        })
    }

    /// Byte length of the window
    pub fn byte_len(&self) -> usize {
        self.byte_length
    }

    /// Read an unsigned scalar of `size` bytes with the given endianness
    pub fn get_uint(&self, offset: usize, size: usize, little_endian: bool) -> VmResult<u64> {
        self.check(offset, size)?;
        let bytes = self.buffer.read_bytes(self.byte_offset + offset, size)?;
        let mut out: u64 = 0;
        if little_endian {
            for (i, b) in bytes.iter().enumerate() {
                out |= (*b as u64) << (8 * i);
            }
        } else {
            for b in &bytes {
                out = (out << 8) | *b as u64;
            }
        }
        Ok(out)
    }

    /// Write an unsigned scalar of `size` bytes with the given endianness
    pub fn set_uint(
        &self,
        offset: usize,
        size: usize,
        value: u64,
        little_endian: bool,
    ) -> VmResult<()> {
        self.check(offset, size)?;
        let mut bytes = vec![0u8; size];
        if little_endian {
            for (i, b) in bytes.iter_mut().enumerate() {
                *b = (value >> (8 * i)) as u8;
            }
        } else {
            for (i, b) in bytes.iter_mut().enumerate() {
                *b = (value >> (8 * (size - 1 - i))) as u8;
            }
        }
        self.buffer.write_bytes(self.byte_offset + offset, &bytes)
    }

    /// Read an IEEE double with the given endianness
    pub fn get_float64(&self, offset: usize, little_endian: bool) -> VmResult<f64> {
        let bits = self.get_uint(offset, 8, little_endian)?;
        Ok(f64::from_bits(bits))
    }

    /// Write an IEEE double with the given endianness
    pub fn set_float64(&self, offset: usize, value: f64, little_endian: bool) -> VmResult<()> {
        self.set_uint(offset, 8, value.to_bits(), little_endian)
    }

    fn check(&self, offset: usize, size: usize) -> VmResult<()> {
        let end = offset
            .checked_add(size)
            .ok_or_else(|| VmError::range_error("offset overflow"))?;
        if end > self.byte_length {
            return Err(VmError::range_error(format!(
                "access at {offset}..{end} outside data view of {} bytes",
                self.byte_length
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(len: usize) -> Arc<JsArrayBuffer> {
        Arc::new(JsArrayBuffer::new(len).unwrap())
    }

    #[test]
    fn test_int32_roundtrip() {
        let view = JsTypedArray::new(buffer(16), TypedArrayKind::Int32, 0, 4).unwrap();
        view.set(0, -5.0).unwrap();
        view.set(1, 3.9).unwrap(); // truncates
        assert_eq!(view.get(0), Some(-5.0));
        assert_eq!(view.get(1), Some(3.0));
    }

    #[test]
    fn test_uint8_wraps() {
        let view = JsTypedArray::new(buffer(4), TypedArrayKind::Uint8, 0, 4).unwrap();
        view.set(0, 257.0).unwrap();
        view.set(1, f64::NAN).unwrap();
        assert_eq!(view.get(0), Some(1.0));
        assert_eq!(view.get(1), Some(0.0));
    }

    #[test]
    fn test_out_of_range_read_is_none() {
        let view = JsTypedArray::new(buffer(4), TypedArrayKind::Uint8, 0, 4).unwrap();
        assert_eq!(view.get(4), None);
    }

    #[test]
    fn test_view_must_fit() {
        assert!(JsTypedArray::new(buffer(4), TypedArrayKind::Float64, 0, 1).is_err());
        assert!(JsTypedArray::new(buffer(8), TypedArrayKind::Int32, 2, 1).is_err()); // misaligned
    }

    #[test]
    fn test_shared_buffer_aliasing() {
        let buf = buffer(4);
        let bytes = JsTypedArray::new(buf.clone(), TypedArrayKind::Uint8, 0, 4).unwrap();
        let words = JsTypedArray::new(buf, TypedArrayKind::Uint32, 0, 1).unwrap();
        words.set(0, 0x0102_0304 as f64).unwrap();
        assert_eq!(bytes.get(0), Some(4.0)); // little-endian storage
        assert_eq!(bytes.get(3), Some(1.0));
    }

    #[test]
    fn test_data_view_endianness() {
        let view = JsDataView::new(buffer(8), 0, 8).unwrap();
        view.set_uint(0, 2, 0x1234, false).unwrap();
        assert_eq!(view.get_uint(0, 2, false).unwrap(), 0x1234);
        assert_eq!(view.get_uint(0, 2, true).unwrap(), 0x3412);
    }

    #[test]
    fn test_data_view_float64() {
        let view = JsDataView::new(buffer(8), 0, 8).unwrap();
        view.set_float64(0, 1.5, true).unwrap();
        assert_eq!(view.get_float64(0, true).unwrap(), 1.5);
    }

    #[test]
    fn test_data_view_bounds() {
        let view = JsDataView::new(buffer(8), 4, 4).unwrap();
        assert!(view.get_uint(2, 4, true).is_err());
    }
}
