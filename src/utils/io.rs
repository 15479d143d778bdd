use std::{convert::TryInto, mem::size_of};

use crate::{
    error::{ErrorKind, LineageError},
    types::LineageResult,
};

pub struct LineageWriter {
    buf: Vec<u8>,
}

impl LineageWriter {
    /// Create a new `LineageWriter` with an empty buffer.
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Create a new `LineageWriter` with a buffer of the given capacity.
    pub fn new_reserved(cap: usize) -> Self {
        Self {
            buf: Vec::with_capacity(cap),
        }
    }

    pub fn write<T: Encodeable>(&mut self, obj: &T) {
        obj.encode(self);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

impl Default for LineageWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// A cursor over a byte slice. Running past the end of the slice is
/// reported as `CorruptMetadata`, since everything we decode was
/// written by `LineageWriter` in the first place.
pub struct LineageReader<'a> {
    buf: &'a [u8],
    cursor: usize,
}

impl<'a> LineageReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, cursor: 0 }
    }

    pub fn read<T: Decodeable>(&mut self) -> LineageResult<T> {
        T::decode_from(self)
    }

    pub fn read_exact(&mut self, bytes_count: usize) -> LineageResult<&'a [u8]> {
        let start = self.cursor;
        let end = start + bytes_count;

        // boundary check
        if end > self.buf.len() {
            return Err(LineageError::new(
                ErrorKind::CorruptMetadata,
                &format!(
                    "read out of boundary, want {} bytes at {}, have {}",
                    bytes_count,
                    start,
                    self.buf.len()
                ),
            ));
        }

        self.cursor = end;
        Ok(&self.buf[start..end])
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.cursor
    }
}

pub trait Encodeable {
    fn encode(&self, writer: &mut LineageWriter);

    fn to_bytes(&self) -> Vec<u8> {
        let mut writer = LineageWriter::new();
        self.encode(&mut writer);
        writer.into_bytes()
    }
}

pub trait Decodeable: Sized {
    fn decode_from(reader: &mut LineageReader) -> LineageResult<Self>;

    fn from_bytes(bytes: &[u8]) -> LineageResult<Self> {
        let mut reader = LineageReader::new(bytes);
        Self::decode_from(&mut reader)
    }
}

macro_rules! impl_serialization {
    (for $($t:ty),+) => {
        $(
            impl Encodeable for $t {
                fn encode(&self, writer: &mut LineageWriter) {
                    writer.write_bytes(&self.to_be_bytes());
                }
            }

            impl Decodeable for $t {
                fn decode_from(reader: &mut LineageReader) -> LineageResult<Self> {
                    let bytes = reader.read_exact(size_of::<Self>())?;
                    // the slice length is checked by `read_exact`
                    let array = bytes.try_into().map_err(|_| {
                        LineageError::new(ErrorKind::CorruptMetadata, "short integer")
                    })?;
                    Ok(Self::from_be_bytes(array))
                }
            }
        )*
    }
}

impl_serialization!(for u8, u16, u32, u64, i64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reader_boundary() {
        let mut writer = LineageWriter::new();
        writer.write(&7u32);
        writer.write(&-3i64);
        let bytes = writer.into_bytes();

        let mut reader = LineageReader::new(&bytes);
        assert_eq!(reader.read::<u32>().unwrap(), 7);
        assert_eq!(reader.read::<i64>().unwrap(), -3);
        assert_eq!(reader.remaining(), 0);

        let err = reader.read::<u8>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptMetadata);
    }
}
