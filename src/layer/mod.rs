
//! Reads the layer-and-mask section: the flat layer records,
//! their channel pixel data, and the tagged information blocks
//! that follow them.
//!
//! Failures while decoding one layer's pixels are recovered locally,
//! one corrupt layer must not sink the whole document. Failures in the
//! record structure itself abort the parse attempt and leave the
//! fallback decision to the rendering pipeline.

pub mod tree;

use bit_field::BitField;
use log::warn;
use smallvec::SmallVec;

use crate::compose::blend::BlendMode;
use crate::compression::ChannelCompression;
use crate::error::{Error, Result, u32_to_usize};
use crate::io::{Data, SliceRead};
use crate::math::Vec2;
use crate::meta::{signature, FileHeader, ParseOptions, Version};

pub use self::tree::{Layer, LayerId, LayerTree};


/// Integer bounds of a layer on the canvas.
/// Any coordinate may be negative or beyond the canvas edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Bounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Bounds {

    /// Stored in top, left, bottom, right order.
    pub fn read(read: &mut SliceRead<'_>) -> Result<Self> {
        let top = i32::read(read, "layer bounds")?;
        let left = i32::read(read, "layer bounds")?;
        let bottom = i32::read(read, "layer bounds")?;
        let right = i32::read(read, "layer bounds")?;
        Ok(Bounds { left, top, right, bottom })
    }

    /// Extent of the pixel plane. Inverted bounds count as empty.
    pub fn size(&self) -> Vec2<usize> {
        let width = (self.right as i64 - self.left as i64).max(0) as usize;
        let height = (self.bottom as i64 - self.top as i64).max(0) as usize;
        Vec2(width, height)
    }

    /// Where the top left of the pixel plane sits on the canvas.
    pub fn position(&self) -> Vec2<i32> {
        Vec2(self.left, self.top)
    }
}


/// A decoded pixel plane, 8-bit RGBA interleaved.
/// Produced once by the channel merge and immutable afterwards,
/// owned exclusively by its layer or by the merged-image slot.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelPlane {

    /// Plane resolution; independent of the canvas resolution for layers.
    pub size: Vec2<usize>,

    /// `size.area() * 4` bytes of interleaved straight-alpha RGBA.
    pub data: Vec<u8>,
}

impl PixelPlane {

    /// Wrap a merged RGBA buffer.
    pub fn new(size: Vec2<usize>, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), size.area() * 4, "pixel plane byte count mismatch");
        PixelPlane { size, data }
    }

    /// A fully transparent plane, substituted for corrupt layers.
    pub fn transparent(size: Vec2<usize>) -> Self {
        PixelPlane { size, data: vec![0; size.area() * 4] }
    }

    /// Whether this plane covers no pixels at all.
    pub fn is_degenerate(&self) -> bool {
        self.size.area() == 0
    }
}


/// Position and declared byte length of one stored channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelInfo {

    /// 0, 1, 2 for the color components, -1 for alpha,
    /// -2 and -3 for the mask planes.
    pub id: i16,

    /// Compressed byte count of this channel, including its compression tag.
    pub data_length: usize,
}

/// Group nesting marker carried by a sentinel layer record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DividerKind {

    /// Opens a group. `open` mirrors the expanded state in the layers panel.
    GroupStart { open: bool },

    /// Closes the innermost open group.
    GroupEnd,
}

/// Metadata of an externally linked smart-object file.
/// The referenced content itself is never resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkedFile {

    /// Unique id that placed-layer blocks use to reference this file.
    pub uid: String,

    /// Original file name.
    pub name: String,

    /// Byte count of the embedded or referenced payload.
    pub data_length: usize,
}


/// One entry of the flat layer list, as stored in the file.
#[derive(Debug, Clone)]
pub struct LayerRecord {
    pub name: String,
    pub bounds: Bounds,
    pub channels: SmallVec<[ChannelInfo; 5]>,
    pub blend_key: [u8; 4],
    pub opacity: u8,
    pub clipped: bool,
    pub hidden: bool,
    pub divider: Option<DividerKind>,
    pub is_adjustment: bool,
    pub is_smart_object: bool,
}

impl Default for LayerRecord {
    fn default() -> Self {
        LayerRecord {
            name: String::new(),
            bounds: Bounds::default(),
            channels: SmallVec::new(),
            blend_key: *b"norm",
            opacity: 255,
            clipped: false,
            hidden: false,
            divider: None,
            is_adjustment: false,
            is_smart_object: false,
        }
    }
}

impl LayerRecord {

    /// Resolve the stored blend key. Unknown keys behave like `norm`.
    pub fn blend_mode(&self) -> BlendMode {
        BlendMode::from_key(self.blend_key)
    }
}


/// Additional-info keys that mark a record as a parametric adjustment
/// or fill layer. These never rasterize.
const ADJUSTMENT_KEYS: &[[u8; 4]] = &[
    *b"SoCo", *b"GdFl", *b"PtFl",
    *b"brit", *b"levl", *b"curv", *b"expA", *b"vibA",
    *b"hue ", *b"hue2", *b"blnc", *b"blwh", *b"phfl",
    *b"mixr", *b"clrL", *b"nvrt", *b"post", *b"thrs",
    *b"grdm", *b"selc", *b"CgEd",
];

/// Additional-info keys that carry placed smart-object descriptors.
const SMART_OBJECT_KEYS: &[[u8; 4]] = &[*b"SoLd", *b"SoLE", *b"PlLd"];

/// Additional-info keys that carry linked-file payloads.
const LINKED_FILE_KEYS: &[[u8; 4]] = &[*b"lnk2", *b"lnk3", *b"lnkD", *b"lnkE"];

/// Keys whose block length is eight bytes wide in large-document files.
const LONG_LENGTH_KEYS: &[[u8; 4]] = &[
    *b"LMsk", *b"Lr16", *b"Lr32", *b"Layr", *b"Mt16", *b"Mt32",
    *b"Mtrn", *b"Alph", *b"FMsk", *b"lnk2", *b"FEid", *b"FXid", *b"PxSD",
];


/// Read the whole layer-and-mask section and rebuild the layer tree.
/// Also surfaces the linked-file table when the options request it.
pub(crate) fn read_section(
    read: &mut SliceRead<'_>, header: &FileHeader, options: &ParseOptions,
) -> Result<(LayerTree, Vec<LinkedFile>)> {
    let length = header.version.read_long_length(read, "layer section length")?;
    let mut section = read.sub_block(length, "layer and mask section")?;

    if length == 0 {
        return Ok((LayerTree::default(), Vec::new()));
    }

    match read_section_contents(&mut section, header, options) {
        Ok(contents) => Ok(contents),

        // with pixel decoding disabled, the merged image is the actual
        // target, so a corrupt layer section degrades instead of failing
        Err(error) if options.skip_layer_image_data && !error.is_stage_independent() => {
            warn!("degrading corrupt layer section to an empty tree: {}", error);
            Ok((LayerTree::default(), Vec::new()))
        }

        Err(error) => Err(error),
    }
}

fn read_section_contents(
    section: &mut SliceRead<'_>, header: &FileHeader, options: &ParseOptions,
) -> Result<(LayerTree, Vec<LinkedFile>)> {
    let info_length = header.version.read_long_length(section, "layer info length")?;
    let mut info = section.sub_block(info_length, "layer info")?;

    let tree = if info_length == 0 { LayerTree::default() }
    else { read_layer_info(&mut info, header, options)? };

    // the global mask parameters are not applied when compositing
    if section.remaining() >= 4 {
        let mask_length = u32_to_usize(u32::read(section, "global mask info length")?);
        section.skip(mask_length.min(section.remaining()), "global mask info")?;
    }

    let linked_files = read_tagged_blocks(section, header, options)?;

    Ok((tree, linked_files))
}

fn read_layer_info(
    info: &mut SliceRead<'_>, header: &FileHeader, options: &ParseOptions,
) -> Result<LayerTree> {
    let signed_count = i16::read(info, "layer count")?;

    // a negative count signals that the first alpha channel of the
    // merged image holds its transparency; the magnitude is the count
    let count = signed_count.unsigned_abs() as usize;

    let mut records = Vec::with_capacity(count.min(1024));
    for _ in 0 .. count {
        records.push(read_layer_record(info, header)?);
    }

    // the channel pixel data follows all records, in record order
    let mut planes = Vec::with_capacity(records.len());
    for record in &records {
        planes.push(read_layer_pixels(info, record, header, options)?);
    }

    // records are stored visual-bottom-first, the tree wants the top first
    let layers = records.into_iter().zip(planes).rev();
    Ok(LayerTree::build(layers))
}

fn read_layer_record(info: &mut SliceRead<'_>, header: &FileHeader) -> Result<LayerRecord> {
    let mut record = LayerRecord {
        bounds: Bounds::read(info)?,
        .. LayerRecord::default()
    };

    let channel_count = u16::read(info, "layer channel count")?;
    if channel_count > 56 {
        return Err(Error::invalid("layer channel count beyond the format limit"));
    }

    for _ in 0 .. channel_count {
        let id = i16::read(info, "channel id")?;
        let data_length = header.version.read_long_length(info, "channel data length")?;
        record.channels.push(ChannelInfo { id, data_length });
    }

    let blend_signature = info.take_bytes(4, "blend mode signature")?;
    if blend_signature != signature::BLOCK {
        return Err(Error::invalid("blend mode signature"));
    }

    let key = info.take_bytes(4, "blend mode key")?;
    record.blend_key = [key[0], key[1], key[2], key[3]];

    record.opacity = u8::read(info, "layer opacity")?;
    record.clipped = u8::read(info, "layer clipping")? != 0;

    let flags = u8::read(info, "layer flags")?;
    record.hidden = flags.get_bit(1);

    info.skip(1, "layer record filler")?;

    let extra_length = u32_to_usize(u32::read(info, "layer extra data length")?);
    let mut extra = info.sub_block(extra_length, "layer extra data")?;

    // mask parameters and blending ranges are parsed past, not applied
    let mask_length = u32_to_usize(u32::read(&mut extra, "layer mask data length")?);
    extra.skip(mask_length, "layer mask data")?;

    let ranges_length = u32_to_usize(u32::read(&mut extra, "blending ranges length")?);
    extra.skip(ranges_length, "blending ranges")?;

    record.name = extra.read_pascal_string(4, "layer name")?;

    while extra.remaining() >= 12 {
        if let Err(error) = read_layer_tagged_block(&mut extra, header.version, &mut record) {
            // the extra block is length-delimited, losing sync inside it
            // only forfeits the remaining metadata of this one layer
            warn!("ignoring malformed info blocks of layer {:?}: {}", record.name, error);
            break;
        }
    }

    Ok(record)
}

fn read_layer_tagged_block(
    extra: &mut SliceRead<'_>, version: Version, record: &mut LayerRecord,
) -> Result<()> {
    let block_signature = extra.take_bytes(4, "info block signature")?;
    if block_signature != signature::BLOCK && block_signature != signature::BLOCK_LONG {
        return Err(Error::invalid("info block signature"));
    }

    let key = extra.take_bytes(4, "info block key")?;
    let key = [key[0], key[1], key[2], key[3]];

    let length = read_tagged_length(extra, version, key)?;
    let mut block = extra.sub_block(length, "info block contents")?;

    if &key == b"lsct" {
        record.divider = match u32::read(&mut block, "section divider kind")? {
            1 => Some(DividerKind::GroupStart { open: true }),
            2 => Some(DividerKind::GroupStart { open: false }),
            3 => Some(DividerKind::GroupEnd),
            _ => None,
        };
    }
    else if &key == b"luni" {
        record.name = read_unicode_string(&mut block, "unicode layer name")?;
    }
    else if ADJUSTMENT_KEYS.contains(&key) {
        record.is_adjustment = true;
    }
    else if SMART_OBJECT_KEYS.contains(&key) {
        record.is_smart_object = true;
    }

    // all other keys, and the unread parts of the handled ones,
    // are skipped through the sub-block scope
    Ok(())
}

fn read_tagged_length(read: &mut SliceRead<'_>, version: Version, key: [u8; 4]) -> Result<usize> {
    if version == Version::Psb && LONG_LENGTH_KEYS.contains(&key) {
        version.read_long_length(read, "info block length")
    } else {
        Ok(u32_to_usize(u32::read(read, "info block length")?))
    }
}

/// A four-byte character count followed by UTF-16 code units.
fn read_unicode_string(read: &mut SliceRead<'_>, location: &'static str) -> Result<String> {
    let count = u32_to_usize(u32::read(read, location)?);
    if count > read.remaining() / 2 {
        return Err(Error::TruncatedData(location));
    }

    let mut units = Vec::with_capacity(count);
    for _ in 0 .. count {
        units.push(u16::read(read, location)?);
    }

    Ok(String::from_utf16_lossy(&units).trim_end_matches('\0').to_owned())
}


fn read_layer_pixels(
    info: &mut SliceRead<'_>, record: &LayerRecord,
    header: &FileHeader, options: &ParseOptions,
) -> Result<Option<PixelPlane>> {
    let size = record.bounds.size();
    let mut planes: [Option<Vec<u8>>; 4] = [None, None, None, None];
    let mut failed = false;

    for channel in &record.channels {
        // the declared length keeps the cursor synchronized
        // even when the contents are skipped or corrupt
        let payload = info.take_bytes(channel.data_length, "channel data")?;

        if options.skip_layer_image_data { continue; }
        if record.divider.is_some() || size.area() == 0 { continue; }

        let slot = match channel.id {
            0 ..= 2 => channel.id as usize,
            -1 => 3,
            _ => continue, // mask planes are consumed but never composited
        };

        match decode_channel(payload, size, header) {
            Ok(samples) => planes[slot] = Some(samples),

            Err(error) => {
                warn!(
                    "substituting transparent pixels for layer {:?} after channel error: {}",
                    record.name, error
                );
                failed = true;
            }
        }
    }

    if options.skip_layer_image_data || record.divider.is_some() || size.area() == 0 {
        return Ok(None);
    }

    if failed {
        return Ok(Some(PixelPlane::transparent(size)));
    }

    if planes.iter().all(Option::is_none) {
        // adjustment layers and empty leaves store no composable channels
        return Ok(None);
    }

    Ok(Some(merge_channels(size, planes, options)))
}

/// Decode one channel into a plane of one byte per sample.
/// Sixteen-bit samples fold to their high byte.
fn decode_channel(payload: &[u8], size: Vec2<usize>, header: &FileHeader) -> Result<Vec<u8>> {
    let bytes_per_sample = header.bytes_per_sample()
        .ok_or_else(|| Error::invalid("channel samples of this bit depth cannot be decoded"))?;

    let mut payload = SliceRead::new(payload);
    let compression = ChannelCompression::from_tag(u16::read(&mut payload, "channel compression tag")?)?;

    let samples = compression.decompress_plane(
        payload.remaining_bytes(), size,
        bytes_per_sample, header.version.long_row_lengths(),
    )?;

    Ok(match bytes_per_sample {
        1 => samples,
        _ => samples.chunks_exact(2).map(|sample| sample[0]).collect(),
    })
}

/// Interleave the decoded planes into straight-alpha RGBA.
/// Missing color planes replicate the first one, which also covers
/// grayscale layers; a missing alpha plane means fully opaque.
fn merge_channels(
    size: Vec2<usize>, planes: [Option<Vec<u8>>; 4], options: &ParseOptions,
) -> PixelPlane {
    let area = size.area();
    let [red, green, blue, alpha] = planes;

    let mut data = vec![0_u8; area * 4];
    for (index, pixel) in data.chunks_exact_mut(4).enumerate() {
        let first = red.as_ref().map_or(0, |plane| plane[index]);

        pixel[0] = first;
        pixel[1] = green.as_ref().map_or(first, |plane| plane[index]);
        pixel[2] = blue.as_ref().map_or(first, |plane| plane[index]);
        pixel[3] = alpha.as_ref().map_or(255, |plane| plane[index]);
    }

    if !options.use_image_data && alpha.is_some() {
        remove_white_matte(&mut data);
    }

    PixelPlane::new(size, data)
}

/// Undo the white matte that pre-composited canvases carry:
/// semitransparent pixels have been blended against white
/// and must be unmixed before compositing them again,
/// otherwise translucent edges show bright fringes.
pub(crate) fn remove_white_matte(rgba: &mut [u8]) {
    for pixel in rgba.chunks_exact_mut(4) {
        if pixel[3] != 0 && pixel[3] != 255 {
            let alpha = f32::from(pixel[3]) / 255.0;
            let ratio = 1.0 / alpha;
            let offset = 255.0 * (1.0 - ratio);

            pixel[0] = (f32::from(pixel[0]) * ratio + offset).clamp(0.0, 255.0) as u8;
            pixel[1] = (f32::from(pixel[1]) * ratio + offset).clamp(0.0, 255.0) as u8;
            pixel[2] = (f32::from(pixel[2]) * ratio + offset).clamp(0.0, 255.0) as u8;
        }
    }
}


fn read_tagged_blocks(
    section: &mut SliceRead<'_>, header: &FileHeader, options: &ParseOptions,
) -> Result<Vec<LinkedFile>> {
    let mut linked_files = Vec::new();

    while section.remaining() >= 12 {
        let block_signature = section.take_bytes(4, "tagged block signature")?;
        if block_signature != signature::BLOCK && block_signature != signature::BLOCK_LONG {
            warn!("stopping at unrecognized tagged block signature");
            break;
        }

        let key = section.take_bytes(4, "tagged block key")?;
        let key = [key[0], key[1], key[2], key[3]];

        let length = read_tagged_length(section, header.version, key)?;
        let padded = (length + 3) / 4 * 4;
        let mut block = section.sub_block(padded.min(section.remaining()), "tagged block contents")?;

        if LINKED_FILE_KEYS.contains(&key) && !options.skip_linked_files_data {
            // resolving these has historically been the crashiest part of
            // real-world files, which is exactly what safe mode disables
            linked_files.append(&mut read_linked_files(&mut block, length)?);
        }
    }

    Ok(linked_files)
}

fn read_linked_files(block: &mut SliceRead<'_>, declared_length: usize) -> Result<Vec<LinkedFile>> {
    let mut files = Vec::new();
    let mut remaining_declared = declared_length;

    while remaining_declared >= 8 && block.remaining() >= 8 {
        let entry_length = u64::read(block, "linked file entry length")? as usize;
        let padded = (entry_length + 3) / 4 * 4;
        let mut entry = block.sub_block(padded.min(block.remaining()), "linked file entry")?;
        remaining_declared = remaining_declared.saturating_sub(8 + padded);

        entry.skip(4, "linked file type")?;
        let _descriptor_version = u32::read(&mut entry, "linked file version")?;
        let uid = entry.read_pascal_string(1, "linked file uid")?;
        let name = read_unicode_string(&mut entry, "linked file name")?;

        files.push(LinkedFile { uid, name, data_length: entry_length });
    }

    Ok(files)
}
