//! Primitive wire codec.
//!
//! All multi-byte integers are little-endian. "Space optimized" integers use a
//! single byte for values up to `0xFE`; larger values are written as the escape
//! byte `0xFF` followed by the full-width value. Strings, arrays and maps carry a
//! space-optimized `u32` length or count prefix.

use crate::error::{DecodeError, DecodeErrorKind, EncodeError};

/// Escape byte introducing a full-width space-optimized integer.
pub const SPACE_OPTIMIZED_ESCAPE: u8 = 0xFF;

/// Values that can be read from a [`Reader`].
pub trait Decode: Sized {
    /// Read one value, advancing the cursor.
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError>;
}

/// Values that can be appended to a [`Writer`].
pub trait Encode {
    /// Append the wire form of `self`.
    fn encode(&self, w: &mut Writer) -> Result<(), EncodeError>;
}

/// Decode a value that must span the whole buffer.
pub fn decode_exact<T: Decode>(bytes: &[u8]) -> Result<T, DecodeError> {
    let mut r = Reader::new(bytes);
    let value = T::decode(&mut r)?;
    r.finish()?;
    Ok(value)
}

/// Encode a value into a fresh buffer.
pub fn encode_to_vec<T: Encode + ?Sized>(value: &T) -> Result<Vec<u8>, EncodeError> {
    let mut w = Writer::new();
    value.encode(&mut w)?;
    Ok(w.into_inner())
}

/// Read cursor over an immutable byte slice.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    /// Start reading at the beginning of `buf`.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current offset into the buffer.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Build an error located at the current offset.
    pub fn error(&self, kind: DecodeErrorKind) -> DecodeError {
        DecodeError::new(self.pos, kind)
    }

    /// Fail if any bytes are left unread.
    pub fn finish(&self) -> Result<(), DecodeError> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(self.error(DecodeErrorKind::TrailingBytes(n))),
        }
    }

    /// Borrow the next `len` bytes.
    pub fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.remaining() < len {
            return Err(self.error(DecodeErrorKind::UnexpectedEof {
                needed: len,
                remaining: self.remaining(),
            }));
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    /// Read one byte.
    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.array::<1>()?[0])
    }

    /// Read a boolean byte; anything other than 0 or 1 is rejected.
    pub fn read_bool(&mut self) -> Result<bool, DecodeError> {
        let offset = self.pos;
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            v => Err(DecodeError::new(offset, DecodeErrorKind::InvalidBool(v))),
        }
    }

    /// Read a little-endian `u16`.
    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    /// Read a little-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    /// Read a little-endian `i32`.
    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    /// Read a little-endian IEEE-754 double.
    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        Ok(f64::from_le_bytes(self.array()?))
    }

    /// Read a fixed-size byte array.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        self.array()
    }

    /// Read everything that is left.
    pub fn read_rest(&mut self) -> Vec<u8> {
        let bytes = self.buf[self.pos..].to_vec();
        self.pos = self.buf.len();
        bytes
    }

    /// Read a space-optimized `u16`.
    pub fn read_so_u16(&mut self) -> Result<u16, DecodeError> {
        match self.read_u8()? {
            SPACE_OPTIMIZED_ESCAPE => self.read_u16(),
            v => Ok(u16::from(v)),
        }
    }

    /// Read a space-optimized `u32`.
    pub fn read_so_u32(&mut self) -> Result<u32, DecodeError> {
        match self.read_u8()? {
            SPACE_OPTIMIZED_ESCAPE => self.read_u32(),
            v => Ok(u32::from(v)),
        }
    }

    /// Read a length-prefixed byte string.
    pub fn read_byte_string(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = self.read_so_u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<String, DecodeError> {
        let len = self.read_so_u32()? as usize;
        let offset = self.pos;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| DecodeError::new(offset, DecodeErrorKind::InvalidUtf8))
    }

    /// Read `count` items.
    pub fn read_n<T>(
        &mut self,
        count: usize,
        mut item: impl FnMut(&mut Self) -> Result<T, DecodeError>,
    ) -> Result<Vec<T>, DecodeError> {
        // Cap the preallocation; a hostile count must not reserve gigabytes.
        let mut out = Vec::with_capacity(count.min(self.remaining()));
        for _ in 0..count {
            out.push(item(self)?);
        }
        Ok(out)
    }

    /// Read an array with a space-optimized `u32` count prefix.
    pub fn read_vec<T>(
        &mut self,
        item: impl FnMut(&mut Self) -> Result<T, DecodeError>,
    ) -> Result<Vec<T>, DecodeError> {
        let count = self.read_so_u32()? as usize;
        self.read_n(count, item)
    }

    /// Read a map with a space-optimized `u32` count prefix, preserving wire order.
    pub fn read_map<K, V>(
        &mut self,
        mut key: impl FnMut(&mut Self) -> Result<K, DecodeError>,
        mut value: impl FnMut(&mut Self) -> Result<V, DecodeError>,
    ) -> Result<Vec<(K, V)>, DecodeError> {
        self.read_vec(|r| Ok((key(r)?, value(r)?)))
    }
}

/// Append-only output buffer.
#[derive(Debug, Default, Clone)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// True when nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Take the written bytes.
    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }

    /// Append one byte.
    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    /// Append a boolean byte.
    pub fn write_bool(&mut self, v: bool) {
        self.buf.push(u8::from(v));
    }

    /// Append a little-endian `u16`.
    pub fn write_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Append a little-endian `u32`.
    pub fn write_u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Append a little-endian `i32`.
    pub fn write_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Append a little-endian IEEE-754 double.
    pub fn write_f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// Append raw bytes without a prefix.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Append a space-optimized `u16`.
    pub fn write_so_u16(&mut self, v: u16) {
        match u8::try_from(v) {
            Ok(small) if small != SPACE_OPTIMIZED_ESCAPE => self.write_u8(small),
            _ => {
                self.write_u8(SPACE_OPTIMIZED_ESCAPE);
                self.write_u16(v);
            }
        }
    }

    /// Append a space-optimized `u32`.
    pub fn write_so_u32(&mut self, v: u32) {
        match u8::try_from(v) {
            Ok(small) if small != SPACE_OPTIMIZED_ESCAPE => self.write_u8(small),
            _ => {
                self.write_u8(SPACE_OPTIMIZED_ESCAPE);
                self.write_u32(v);
            }
        }
    }

    /// Append a space-optimized `u32` length or count.
    pub fn write_len(&mut self, len: usize, what: &'static str) -> Result<(), EncodeError> {
        let len = u32::try_from(len).map_err(|_| EncodeError::ValueOutOfRange(what))?;
        self.write_so_u32(len);
        Ok(())
    }

    /// Append a length-prefixed byte string.
    pub fn write_byte_string(&mut self, bytes: &[u8]) -> Result<(), EncodeError> {
        self.write_len(bytes.len(), "string length")?;
        self.write_bytes(bytes);
        Ok(())
    }

    /// Append a length-prefixed UTF-8 string.
    pub fn write_str(&mut self, s: &str) -> Result<(), EncodeError> {
        self.write_byte_string(s.as_bytes())
    }

    /// Append an array with a space-optimized `u32` count prefix.
    pub fn write_vec<T>(
        &mut self,
        items: &[T],
        mut item: impl FnMut(&mut Self, &T) -> Result<(), EncodeError>,
    ) -> Result<(), EncodeError> {
        self.write_len(items.len(), "array count")?;
        for v in items {
            item(self, v)?;
        }
        Ok(())
    }

    /// Append a map with a space-optimized `u32` count prefix, in slice order.
    pub fn write_map<K, V>(
        &mut self,
        entries: &[(K, V)],
        mut key: impl FnMut(&mut Self, &K) -> Result<(), EncodeError>,
        mut value: impl FnMut(&mut Self, &V) -> Result<(), EncodeError>,
    ) -> Result<(), EncodeError> {
        self.write_vec(entries, |w, (k, v)| {
            key(w, k)?;
            value(w, v)
        })
    }
}

macro_rules! fixed_width {
    ($($ty:ty => $read:ident, $write:ident;)*) => {
        $(
            impl Decode for $ty {
                fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
                    r.$read()
                }
            }

            impl Encode for $ty {
                fn encode(&self, w: &mut Writer) -> Result<(), EncodeError> {
                    w.$write(*self);
                    Ok(())
                }
            }
        )*
    };
}

fixed_width! {
    u8 => read_u8, write_u8;
    bool => read_bool, write_bool;
    u16 => read_u16, write_u16;
    u32 => read_u32, write_u32;
    i32 => read_i32, write_i32;
    f64 => read_f64, write_f64;
}

impl Decode for String {
    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        r.read_string()
    }
}

impl Encode for String {
    fn encode(&self, w: &mut Writer) -> Result<(), EncodeError> {
        w.write_str(self)
    }
}

impl Encode for str {
    fn encode(&self, w: &mut Writer) -> Result<(), EncodeError> {
        w.write_str(self)
    }
}

/// Declare a `u8`-tagged enumeration with its wire codec and a name-only `Display`.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($(#[$vmeta:meta])* $variant:ident = $value:literal,)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        $vis enum $name {
            $($(#[$vmeta])* $variant = $value,)*
        }

        impl TryFrom<u8> for $name {
            type Error = u8;

            fn try_from(value: u8) -> Result<Self, u8> {
                match value {
                    $($value => Ok(Self::$variant),)*
                    other => Err(other),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                std::fmt::Debug::fmt(self, f)
            }
        }

        impl $crate::codec::Decode for $name {
            fn decode(
                r: &mut $crate::codec::Reader<'_>,
            ) -> Result<Self, $crate::error::DecodeError> {
                let offset = r.position();
                let raw = r.read_u8()?;
                Self::try_from(raw).map_err(|value| {
                    $crate::error::DecodeError::new(
                        offset,
                        $crate::error::DecodeErrorKind::InvalidEnumValue {
                            name: stringify!($name),
                            value: u32::from(value),
                        },
                    )
                })
            }
        }

        impl $crate::codec::Encode for $name {
            fn encode(
                &self,
                w: &mut $crate::codec::Writer,
            ) -> Result<(), $crate::error::EncodeError> {
                w.write_u8(*self as u8);
                Ok(())
            }
        }
    };
}

pub(crate) use wire_enum;
