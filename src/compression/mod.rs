
//! Contains the channel compression tag definition
//! and methods to decompress channel planes.


// private decoding helpers live in the submodules,
// the encoding halves are public for fixture builders
pub mod rle;
pub mod zip;


use crate::error::{Error, Result};
use crate::math::Vec2;

/// A byte vector.
pub type ByteVec = Vec<u8>;

/// A byte slice.
pub type Bytes<'s> = &'s [u8];


/// Specifies how the samples of one channel are compressed.
/// Each channel of a layer carries its own tag,
/// the merged image carries one tag for all of its channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelCompression {

    /// Store uncompressed samples. The payload must contain
    /// exactly `width * height * bytes_per_sample` bytes.
    Raw,

    /// PackBits run-length encoding, one independent stream per scanline,
    /// preceded by a table with the byte length of each scanline stream.
    /// By far the most common method in real files.
    Rle,

    /// The whole plane deflated as a single zlib stream.
    Zip,

    /// Like `Zip`, but each scanline stores horizontal differences
    /// instead of samples and must be delta-decoded after inflating.
    ZipPrediction,
}

impl std::fmt::Display for ChannelCompression {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{} compression", match self {
            ChannelCompression::Raw => "no",
            ChannelCompression::Rle => "packbits",
            ChannelCompression::Zip => "zip",
            ChannelCompression::ZipPrediction => "zip prediction",
        })
    }
}

impl ChannelCompression {

    /// Interpret a compression tag from the file.
    /// Unknown tags are a recoverable error: the caller substitutes
    /// a transparent plane for the affected channel.
    pub fn from_tag(tag: u16) -> Result<Self> {
        match tag {
            0 => Ok(ChannelCompression::Raw),
            1 => Ok(ChannelCompression::Rle),
            2 => Ok(ChannelCompression::Zip),
            3 => Ok(ChannelCompression::ZipPrediction),
            _ => Err(Error::UnknownCompression(tag)),
        }
    }

    /// Decompress one channel plane.
    ///
    /// Returns exactly `size.area() * bytes_per_sample` bytes, or an error.
    /// All errors from this function are recoverable per layer:
    /// one corrupt channel must not sink the whole document.
    /// `long_row_lengths` selects the four-byte scanline table entries of PSB files.
    pub fn decompress_plane(
        self, data: Bytes<'_>,
        size: Vec2<usize>, bytes_per_sample: usize,
        long_row_lengths: bool,
    ) -> Result<ByteVec> {
        let expected_byte_size = size.area() * bytes_per_sample;

        let bytes = match self {
            ChannelCompression::Raw => {
                if data.len() != expected_byte_size {
                    return Err(Error::SizeMismatch { expected: expected_byte_size, actual: data.len() });
                }

                data.to_vec()
            }

            ChannelCompression::Rle => rle::decompress_channel(
                data, size.height(), size.width() * bytes_per_sample, long_row_lengths
            )?,

            ChannelCompression::Zip => zip::decompress_bytes(data, expected_byte_size)?,

            ChannelCompression::ZipPrediction => {
                let mut bytes = zip::decompress_bytes(data, expected_byte_size)?;

                match bytes_per_sample {
                    1 => zip::samples_from_differences_u8(&mut bytes, size.width()),
                    2 => zip::samples_from_differences_u16(&mut bytes, size.width() * 2),
                    _ => return Err(Error::invalid("prediction is only defined for 8 and 16 bit samples")),
                }

                bytes
            }
        };

        if bytes.len() != expected_byte_size {
            return Err(Error::SizeMismatch { expected: expected_byte_size, actual: bytes.len() });
        }

        Ok(bytes)
    }
}


#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tag_mapping() {
        assert_eq!(ChannelCompression::from_tag(0).unwrap(), ChannelCompression::Raw);
        assert_eq!(ChannelCompression::from_tag(1).unwrap(), ChannelCompression::Rle);
        assert_eq!(ChannelCompression::from_tag(2).unwrap(), ChannelCompression::Zip);
        assert_eq!(ChannelCompression::from_tag(3).unwrap(), ChannelCompression::ZipPrediction);
        assert!(matches!(ChannelCompression::from_tag(4), Err(Error::UnknownCompression(4))));
        assert!(matches!(ChannelCompression::from_tag(0xffff), Err(Error::UnknownCompression(_))));
    }

    #[test]
    fn raw_plane_requires_exact_size() {
        let plane = ChannelCompression::Raw
            .decompress_plane(&[1, 2, 3, 4, 5, 6], Vec2(3, 2), 1, false)
            .unwrap();

        assert_eq!(plane, vec![1, 2, 3, 4, 5, 6]);

        let error = ChannelCompression::Raw
            .decompress_plane(&[1, 2, 3], Vec2(3, 2), 1, false);

        assert!(matches!(error, Err(Error::SizeMismatch { expected: 6, actual: 3 })));
    }
}
