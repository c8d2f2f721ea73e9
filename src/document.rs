
//! The typed in-memory document and the linear parse that produces it.
//!
//! A file is five consecutive sections: the fixed header, the color
//! mode data, the image resources, the layer-and-mask section, and the
//! flattened merged image. Every section after the header is
//! length-delimited, so an unparseable section can be stepped over
//! without losing the ones behind it.

use log::warn;

use crate::compression::{rle, ChannelCompression};
use crate::error::{Error, Result, u32_to_usize};
use crate::io::{Data, SliceRead};
use crate::layer::{self, LayerTree, LinkedFile, PixelPlane};
use crate::math::Vec2;
use crate::meta::{FileHeader, ParseOptions};
use crate::meta::resources::ResourceDirectory;


/// Everything parsed out of one file. Constructed once per parse
/// attempt, immutable afterwards, and dropped wholesale when a later
/// pipeline stage takes over.
#[derive(Debug, Clone)]
pub struct Document {

    /// The validated fixed-size header.
    pub header: FileHeader,

    /// The image resource directory.
    pub resources: ResourceDirectory,

    /// The hierarchical layer stack. Empty for flattened files.
    pub layers: LayerTree,

    /// Linked smart-object metadata, empty when skipped by the options.
    pub linked_files: Vec<LinkedFile>,

    /// The flattened fallback image that most writers append.
    pub merged_image: Option<PixelPlane>,
}

impl Document {

    /// Parse a complete file from an in-memory buffer.
    ///
    /// Pixel-level corruption inside single layers is recovered
    /// silently; only damaged document-level structure makes this fail.
    pub fn parse(bytes: &[u8], options: &ParseOptions) -> Result<Self> {
        let mut read = SliceRead::new(bytes);

        let header = FileHeader::read(&mut read)?;

        // only indexed and duotone documents carry color mode payloads,
        // neither affects rgb compositing
        let color_data_length = u32_to_usize(u32::read(&mut read, "color mode data length")?);
        read.skip(color_data_length, "color mode data")?;

        let resources = ResourceDirectory::read(&mut read, options)?;

        let (layers, linked_files) = layer::read_section(&mut read, &header, options)?;

        let merged_image = match read_merged_image(&mut read, &header, options) {
            Ok(plane) => Some(plane),

            // a missing or corrupt merged image only matters to the
            // composite stage, which checks for it explicitly
            Err(error) => {
                warn!("continuing without the merged image: {}", error);
                None
            }
        };

        Ok(Document { header, resources, layers, linked_files, merged_image })
    }

    /// Count every group and leaf by walking the hierarchy.
    pub fn layer_count(&self) -> usize {
        self.layers.count_recursive()
    }

    /// Whether at least one leaf carries decoded pixels.
    pub fn has_layer_pixels(&self) -> bool {
        self.layers.has_pixel_source()
    }
}


/// Decode the trailing merged image: one compression tag,
/// then all channels as consecutive planes.
fn read_merged_image(
    read: &mut SliceRead<'_>, header: &FileHeader, options: &ParseOptions,
) -> Result<PixelPlane> {
    let bytes_per_sample = header.bytes_per_sample()
        .ok_or_else(|| Error::invalid("merged image samples of this bit depth cannot be decoded"))?;

    let compression = ChannelCompression::from_tag(u16::read(read, "merged image compression")?)?;

    let size = header.size;
    let total_channels = header.channel_count as usize;
    let expected_byte_size = size.area() * bytes_per_sample * total_channels;

    let planar = match compression {
        // trailing bytes after the pixel data are tolerated
        ChannelCompression::Raw =>
            read.take_bytes(expected_byte_size, "merged image data")?.to_vec(),

        // one scanline table covering every row of every channel
        ChannelCompression::Rle => rle::decompress_channel(
            read.remaining_bytes(),
            size.height() * total_channels,
            size.width() * bytes_per_sample,
            header.version.long_row_lengths(),
        )?,

        other => other.decompress_plane(
            read.remaining_bytes(),
            Vec2(size.width(), size.height() * total_channels),
            bytes_per_sample,
            header.version.long_row_lengths(),
        )?,
    };

    if planar.len() != expected_byte_size {
        return Err(Error::SizeMismatch { expected: expected_byte_size, actual: planar.len() });
    }

    // sixteen-bit samples fold to their high byte
    let folded: Vec<u8> = match bytes_per_sample {
        1 => planar,
        _ => planar.chunks_exact(2).map(|sample| sample[0]).collect(),
    };

    let area = size.area();
    let plane = |index: usize| &folded[index * area .. (index + 1) * area];

    let monochrome = header.color_mode.is_monochrome() || total_channels < 3;
    let alpha_plane = if monochrome && total_channels >= 2 { Some(plane(1)) }
    else if !monochrome && total_channels >= 4 { Some(plane(3)) }
    else { None };

    let mut data = vec![0_u8; area * 4];
    for (index, pixel) in data.chunks_exact_mut(4).enumerate() {
        if monochrome {
            let value = plane(0)[index];
            pixel[0] = value;
            pixel[1] = value;
            pixel[2] = value;
        }
        else {
            pixel[0] = plane(0)[index];
            pixel[1] = plane(1)[index];
            pixel[2] = plane(2)[index];
        }

        pixel[3] = alpha_plane.map_or(255, |alpha| alpha[index]);
    }

    // the flattened image is composited against white,
    // translucent pixels must be unmixed before re-compositing
    if alpha_plane.is_some() && !options.use_image_data {
        layer::remove_white_matte(&mut data);
    }

    Ok(PixelPlane::new(size, data))
}
