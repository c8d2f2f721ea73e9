
//! Specialized binary input for this crate.
//! The Photoshop format is big-endian throughout and is parsed
//! from a complete in-memory buffer, so all reads go through a
//! bounds-checked cursor over a byte slice.

use lebe::prelude::*;
use crate::error::{Error, Result};


/// A bounds-checked cursor over a byte slice.
/// Every read fails with `Error::TruncatedData` instead of
/// reading out of bounds, also for maliciously large length fields.
/// No side effects beyond advancing the cursor.
#[derive(Debug, Clone)]
pub struct SliceRead<'b> {

    /// Do not expose to prevent reading without updating the position.
    bytes: &'b [u8],

    position: usize,
}

impl<'b> SliceRead<'b> {

    /// Create a cursor at the start of the byte slice.
    pub fn new(bytes: &'b [u8]) -> Self {
        SliceRead { bytes, position: 0 }
    }

    /// Current number of bytes read.
    pub fn byte_position(&self) -> usize {
        self.position
    }

    /// Number of bytes left before the end of this cursor.
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.position
    }

    /// Whether this cursor has reached its end.
    pub fn is_at_end(&self) -> bool {
        self.remaining() == 0
    }

    pub(crate) fn remaining_bytes(&self) -> &'b [u8] {
        &self.bytes[self.position ..]
    }

    /// Consume exactly `count` bytes, failing if fewer remain.
    pub fn take_bytes(&mut self, count: usize, location: &'static str) -> Result<&'b [u8]> {
        if count > self.remaining() {
            return Err(Error::TruncatedData(location));
        }

        let bytes = &self.bytes[self.position .. self.position + count];
        self.position += count;
        Ok(bytes)
    }

    /// Skip `count` uninteresting bytes, failing if fewer remain.
    pub fn skip(&mut self, count: usize, location: &'static str) -> Result<()> {
        self.take_bytes(count, location).map(|_| ())
    }

    /// Consume a length-delimited sub-block and return a cursor scoped to exactly
    /// those bytes. Reads inside the returned cursor can never escape the block,
    /// and this cursor continues directly behind it.
    pub fn sub_block(&mut self, length: usize, location: &'static str) -> Result<SliceRead<'b>> {
        Ok(SliceRead::new(self.take_bytes(length, location)?))
    }

    /// Read a string with a one-byte length prefix.
    /// The total encoded size (prefix plus contents) is padded
    /// to a multiple of `align` bytes, which are consumed as well.
    /// Non-UTF-8 name bytes are replaced instead of rejected.
    pub fn read_pascal_string(&mut self, align: usize, location: &'static str) -> Result<String> {
        let length = u8::read(self, location)? as usize;
        let text = String::from_utf8_lossy(self.take_bytes(length, location)?).into_owned();

        let encoded = 1 + length;
        let padded = (encoded + align - 1) / align * align;
        self.skip(padded - encoded, location)?;

        Ok(text)
    }
}


/// Generic trait that defines the big-endian read operation for a primitive type.
pub trait Data: Sized {

    /// Read a value of type `Self`, advancing the cursor.
    fn read(read: &mut SliceRead<'_>, location: &'static str) -> Result<Self>;
}

macro_rules! implement_data_for_primitive {
    ($kind: ident) => {
        impl Data for $kind {
            #[inline]
            fn read(read: &mut SliceRead<'_>, location: &'static str) -> Result<Self> {
                let mut remaining = read.remaining_bytes();

                let value = Self::read_from_big_endian(&mut remaining)
                    .map_err(|_| Error::TruncatedData(location))?;

                read.position = read.bytes.len() - remaining.len();
                Ok(value)
            }
        }
    };
}

implement_data_for_primitive!(u8);
implement_data_for_primitive!(i8);
implement_data_for_primitive!(u16);
implement_data_for_primitive!(i16);
implement_data_for_primitive!(u32);
implement_data_for_primitive!(i32);
implement_data_for_primitive!(u64);
implement_data_for_primitive!(i64);


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reads_big_endian() {
        let bytes = [0x38, 0x42, 0x50, 0x53, 0xff, 0xfe];
        let mut read = SliceRead::new(&bytes);

        assert_eq!(u32::read(&mut read, "test").unwrap(), 0x3842_5053);
        assert_eq!(i16::read(&mut read, "test").unwrap(), -2);
        assert!(read.is_at_end());
    }

    #[test]
    fn never_reads_past_the_end() {
        let bytes = [1, 2, 3, 4, 5, 6, 7, 8];

        // for every prefix length, reading one byte more than remains must fail cleanly
        for length in 0 ..= bytes.len() {
            let mut read = SliceRead::new(&bytes[.. length]);

            assert!(read.take_bytes(length, "test").is_ok());
            assert!(matches!(u8::read(&mut read, "test"), Err(Error::TruncatedData(_))));
            assert!(matches!(read.take_bytes(1, "test"), Err(Error::TruncatedData(_))));
        }

        let mut read = SliceRead::new(&bytes);
        assert!(matches!(read.take_bytes(usize::MAX, "test"), Err(Error::TruncatedData(_))));
        assert_eq!(read.byte_position(), 0, "failed read must not advance");
    }

    #[test]
    fn pascal_string_even_padding() {
        // length 3 + prefix = 4 bytes total, already even
        let bytes = [3, b'p', b's', b'd', 0xaa];
        let mut read = SliceRead::new(&bytes);
        assert_eq!(read.read_pascal_string(2, "test").unwrap(), "psd");
        assert_eq!(read.remaining(), 1);

        // empty name still occupies two bytes when padded to even length
        let bytes = [0, 0, 0xbb];
        let mut read = SliceRead::new(&bytes);
        assert_eq!(read.read_pascal_string(2, "test").unwrap(), "");
        assert_eq!(read.remaining(), 1);
    }

    #[test]
    fn pascal_string_four_byte_padding() {
        // layer records pad the name to a multiple of four bytes
        let mut encoded = vec![5];
        encoded.extend_from_slice(b"group");
        encoded.extend_from_slice(&[0, 0]); // 6 encoded bytes padded to 8
        encoded.push(0xcc);

        let mut read = SliceRead::new(&encoded);
        assert_eq!(read.read_pascal_string(4, "test").unwrap(), "group");
        assert_eq!(read.remaining(), 1);
    }

    #[test]
    fn sub_block_is_scoped() {
        let bytes = [1, 2, 3, 4, 5];
        let mut read = SliceRead::new(&bytes);

        let mut block = read.sub_block(3, "test").unwrap();
        assert_eq!(block.take_bytes(3, "test").unwrap(), &[1, 2, 3]);
        assert!(matches!(u8::read(&mut block, "test"), Err(Error::TruncatedData(_))));

        // the parent continues directly behind the block
        assert_eq!(u8::read(&mut read, "test").unwrap(), 4);

        // a block larger than the parent remainder is rejected
        assert!(matches!(read.sub_block(2, "test"), Err(Error::TruncatedData(_))));
    }
}
