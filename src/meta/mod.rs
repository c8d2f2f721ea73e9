
//! Describes the fixed-size file header, the file version,
//! and the configuration of one parse attempt.

pub mod resources;

use log::trace;

use crate::error::{Error, Result, UnitResult, u32_to_usize, u64_to_usize};
use crate::io::{Data, SliceRead};
use crate::math::Vec2;


/// The first four bytes of each Photoshop file.
/// Used to abort reading other file types early.
pub mod signature {
    use super::*;

    /// The first four bytes of each Photoshop file, `8BPS`.
    pub const BYTES: [u8; 4] = *b"8BPS";

    /// The first four bytes of a PDF document, `%PDF`.
    /// Users drop PDF files into Photoshop tooling often enough
    /// that this mix-up is reported as its own error.
    pub const PDF_BYTES: [u8; 4] = *b"%PDF";

    /// The signature that precedes every tagged block, `8BIM`.
    pub const BLOCK: [u8; 4] = *b"8BIM";

    /// The alternative tagged-block signature used by some large-document keys.
    pub const BLOCK_LONG: [u8; 4] = *b"8B64";

    /// Consume four bytes and validate that they are the Photoshop signature.
    /// A PDF signature is rejected with its own error variant.
    pub fn validate_psd(read: &mut SliceRead<'_>) -> UnitResult {
        let bytes = read.take_bytes(4, "file signature")?;
        let bytes = [bytes[0], bytes[1], bytes[2], bytes[3]];

        if bytes == self::BYTES { Ok(()) }
        else if bytes == self::PDF_BYTES { Err(Error::PdfSignature) }
        else { Err(Error::InvalidSignature(bytes)) }
    }
}


/// The two revisions of the file format. The large-document variant
/// widens most section and channel length fields to eight bytes
/// and raises the dimension limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {

    /// Version 1, the regular `.psd` format.
    Psd,

    /// Version 2, the large-document `.psb` format.
    Psb,
}

impl Version {

    /// Interpret the version field, rejecting everything but 1 and 2.
    pub fn from_field(version: u16) -> Result<Self> {
        match version {
            1 => Ok(Version::Psd),
            2 => Ok(Version::Psb),
            _ => Err(Error::UnsupportedVersion(version)),
        }
    }

    /// The largest width or height the format allows.
    pub fn max_dimension(self) -> usize {
        match self {
            Version::Psd => 30_000,
            Version::Psb => 300_000,
        }
    }

    /// Read a section or channel length field, which is four bytes
    /// in PSD files and eight bytes in PSB files.
    pub fn read_long_length(self, read: &mut SliceRead<'_>, location: &'static str) -> Result<usize> {
        match self {
            Version::Psd => Ok(u32_to_usize(u32::read(read, location)?)),
            Version::Psb => u64_to_usize(u64::read(read, location)?, location),
        }
    }

    /// Whether PackBits scanline tables use four-byte entries.
    pub fn long_row_lengths(self) -> bool {
        self == Version::Psb
    }
}


/// The color interpretation of the channel planes.
/// Only `Rgb` and `Grayscale` composite faithfully;
/// the other modes are parsed structurally and folded
/// through the rgb path on a best-effort basis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMode {
    Bitmap,
    Grayscale,
    Indexed,
    Rgb,
    Cmyk,
    Multichannel,
    Duotone,
    Lab,
}

impl ColorMode {

    /// Interpret the color mode field of the file header.
    pub fn from_field(mode: u16) -> Result<Self> {
        match mode {
            0 => Ok(ColorMode::Bitmap),
            1 => Ok(ColorMode::Grayscale),
            2 => Ok(ColorMode::Indexed),
            3 => Ok(ColorMode::Rgb),
            4 => Ok(ColorMode::Cmyk),
            7 => Ok(ColorMode::Multichannel),
            8 => Ok(ColorMode::Duotone),
            9 => Ok(ColorMode::Lab),
            _ => Err(Error::invalid("unknown color mode field")),
        }
    }

    /// Whether a single channel describes the whole pixel brightness.
    pub fn is_monochrome(self) -> bool {
        matches!(self, ColorMode::Bitmap | ColorMode::Grayscale | ColorMode::Duotone)
    }
}


/// The fixed-size header at the start of every Photoshop file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileHeader {

    /// Regular or large-document file format.
    pub version: Version,

    /// Number of channels in the merged image, including alpha. 1 to 56.
    pub channel_count: u16,

    /// The canvas resolution. Never zero, never beyond the format limit.
    pub size: Vec2<usize>,

    /// Bits per channel sample. 1, 8, 16 or 32; only 8 and 16 decode to pixels.
    pub depth: u16,

    /// The color interpretation of all channel planes in the file.
    pub color_mode: ColorMode,
}

impl FileHeader {

    /// Validate the signature and read the header fields,
    /// rejecting dimensions and counts outside the format limits.
    pub fn read(read: &mut SliceRead<'_>) -> Result<Self> {
        signature::validate_psd(read)?;

        let version = Version::from_field(u16::read(read, "file header")?)?;
        read.skip(6, "file header")?; // reserved, zeroed in practice

        let channel_count = u16::read(read, "file header")?;
        if channel_count == 0 || channel_count > 56 {
            return Err(Error::invalid("channel count outside 1 to 56"));
        }

        let height = u32_to_usize(u32::read(read, "file header")?);
        let width = u32_to_usize(u32::read(read, "file header")?);

        if width == 0 || height == 0 {
            return Err(Error::invalid("zero canvas dimension"));
        }

        if width > version.max_dimension() || height > version.max_dimension() {
            return Err(Error::invalid("canvas dimension beyond the format limit"));
        }

        let depth = u16::read(read, "file header")?;
        if !matches!(depth, 1 | 8 | 16 | 32) {
            return Err(Error::invalid("unknown bit depth"));
        }

        let color_mode = ColorMode::from_field(u16::read(read, "file header")?)?;

        trace!("canvas size: {} x {}", width, height);
        trace!("channels: {}, depth: {}, color mode: {:?}", channel_count, depth, color_mode);

        Ok(FileHeader {
            version, channel_count,
            size: Vec2(width, height),
            depth, color_mode,
        })
    }

    /// How many bytes one channel sample occupies,
    /// or `None` for the depths that do not decode to pixels.
    pub fn bytes_per_sample(&self) -> Option<usize> {
        match self.depth {
            8 => Some(1),
            16 => Some(2),
            _ => None,
        }
    }
}


/// Configures one parse attempt. Each stage of the rendering
/// pipeline runs with one of the four presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParseOptions {

    /// Do not decode the embedded preview thumbnail resource.
    pub skip_thumbnail: bool,

    /// Parse the layer structure only, without decoding any
    /// per-layer channel data. Also degrades a structurally corrupt
    /// layer section to an empty tree instead of failing,
    /// so that the merged image remains reachable.
    pub skip_layer_image_data: bool,

    /// Do not interpret linked-file and smart-object payloads,
    /// only skip over them by their declared lengths.
    pub skip_linked_files_data: bool,

    /// Merge channel planes as raw straight-alpha data instead of
    /// treating them as a pre-composited canvas that needs
    /// its white matte removed.
    pub use_image_data: bool,
}

impl ParseOptions {

    /// Preset of the raw-data rendering stage:
    /// raw planar channel data, composited manually.
    pub fn raw_data() -> Self {
        ParseOptions { skip_thumbnail: true, use_image_data: true, .. Self::default() }
    }

    /// Preset of the high-fidelity rendering stage:
    /// per-layer pre-composited canvases.
    pub fn high_fidelity() -> Self {
        ParseOptions { skip_thumbnail: true, .. Self::default() }
    }

    /// Preset of the safe-mode rendering stage: additionally
    /// leaves all linked-file payloads uninterpreted.
    pub fn safe_mode() -> Self {
        ParseOptions { skip_linked_files_data: true, .. Self::high_fidelity() }
    }

    /// Preset of the composite rendering stage: no per-layer pixels at all,
    /// only the flattened merged image.
    pub fn composite_only() -> Self {
        ParseOptions { skip_layer_image_data: true, .. Self::safe_mode() }
    }
}
