
//! The image resource directory: a sequence of small tagged blocks
//! between the color mode data and the layer section.
//! Unknown resources are retained as opaque bytes, never rejected,
//! so that files written by newer tools keep parsing.

use log::warn;

use crate::error::{Error, Result, u32_to_usize};
use crate::io::{Data, SliceRead};
use crate::math::Vec2;
use crate::meta::{signature, ParseOptions};


/// Resource id of the thumbnail written by Photoshop 5 and later.
pub const THUMBNAIL: u16 = 1036;

/// Resource id of the thumbnail written by Photoshop 4, same layout
/// apart from the channel order of its pixel data.
pub const THUMBNAIL_PHOTOSHOP_4: u16 = 1033;


/// One block of the image resource directory, kept as raw bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceBlock {

    /// Identifies what the block contains.
    pub id: u16,

    /// Optional block name, empty in almost all real files.
    pub name: String,

    /// The block contents, uninterpreted.
    pub data: Vec<u8>,
}

/// The embedded preview image. The pixel data is a plain JFIF stream,
/// handed to the caller undecoded.
#[derive(Debug, Clone, PartialEq)]
pub struct Thumbnail {

    /// Preview resolution, much smaller than the canvas.
    pub size: Vec2<usize>,

    /// The JPEG-compressed preview pixels.
    pub jpeg: Vec<u8>,
}

/// All image resources of a document.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResourceDirectory {

    /// Every block that was not interpreted, in file order.
    pub blocks: Vec<ResourceBlock>,

    /// The decoded preview, if the file has one and the options request it.
    pub thumbnail: Option<Thumbnail>,
}

impl ResourceDirectory {

    /// Read the length-prefixed resource section.
    /// A malformed block aborts the directory but keeps
    /// everything collected so far.
    pub fn read(read: &mut SliceRead<'_>, options: &ParseOptions) -> Result<Self> {
        let length = u32_to_usize(u32::read(read, "image resources length")?);
        let mut section = read.sub_block(length, "image resources")?;

        let mut directory = ResourceDirectory::default();

        while !section.is_at_end() {
            match read_block(&mut section) {
                Ok(block) => {
                    let is_thumbnail = block.id == THUMBNAIL || block.id == THUMBNAIL_PHOTOSHOP_4;

                    if is_thumbnail {
                        if options.skip_thumbnail {
                            // skipped over by its length, not retained
                        }
                        else {
                            match decode_thumbnail(&block.data) {
                                Ok(thumbnail) => directory.thumbnail = Some(thumbnail),
                                Err(error) => {
                                    warn!("ignoring malformed thumbnail resource: {}", error);
                                    directory.blocks.push(block);
                                }
                            }
                        }
                    }
                    else {
                        directory.blocks.push(block);
                    }
                }

                Err(error) => {
                    // a desynchronized directory forfeits its remaining blocks,
                    // but never the whole document
                    warn!("abandoning image resource directory: {}", error);
                    break;
                }
            }
        }

        Ok(directory)
    }

    /// Find an uninterpreted resource block by its id.
    pub fn block(&self, id: u16) -> Option<&ResourceBlock> {
        self.blocks.iter().find(|block| block.id == id)
    }
}

fn read_block(section: &mut SliceRead<'_>) -> Result<ResourceBlock> {
    let block_signature = section.take_bytes(4, "resource block signature")?;
    if block_signature != signature::BLOCK {
        return Err(Error::invalid("resource block signature"));
    }

    let id = u16::read(section, "resource block id")?;
    let name = section.read_pascal_string(2, "resource block name")?;

    let data_length = u32_to_usize(u32::read(section, "resource block length")?);
    let data = section.take_bytes(data_length, "resource block contents")?.to_vec();

    // contents are padded to an even length
    if data_length % 2 != 0 {
        section.skip(1, "resource block padding")?;
    }

    Ok(ResourceBlock { id, name, data })
}

fn decode_thumbnail(data: &[u8]) -> Result<Thumbnail> {
    let mut read = SliceRead::new(data);

    let format = u32::read(&mut read, "thumbnail format")?;
    if format != 1 {
        return Err(Error::invalid("thumbnail is not jpeg compressed"));
    }

    let width = u32_to_usize(u32::read(&mut read, "thumbnail size")?);
    let height = u32_to_usize(u32::read(&mut read, "thumbnail size")?);

    // row stride, total size, compressed size, bits and plane count
    // are all derivable and not needed for handing out the jpeg stream
    read.skip(4 + 4 + 4 + 2 + 2, "thumbnail descriptor")?;

    if width == 0 || height == 0 {
        return Err(Error::invalid("zero thumbnail dimension"));
    }

    Ok(Thumbnail {
        size: Vec2(width, height),
        jpeg: read.remaining_bytes().to_vec(),
    })
}


#[cfg(test)]
mod test {
    use super::*;

    pub fn encode_block(id: u16, data: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&signature::BLOCK);
        bytes.extend_from_slice(&id.to_be_bytes());
        bytes.extend_from_slice(&[0, 0]); // empty name, even-padded
        bytes.extend_from_slice(&(data.len() as u32).to_be_bytes());
        bytes.extend_from_slice(data);
        if data.len() % 2 != 0 { bytes.push(0); }
        bytes
    }

    fn encode_directory(blocks: &[Vec<u8>]) -> Vec<u8> {
        let contents: Vec<u8> = blocks.concat();
        let mut bytes = (contents.len() as u32).to_be_bytes().to_vec();
        bytes.extend_from_slice(&contents);
        bytes
    }

    #[test]
    fn unknown_blocks_are_skipped_by_length() {
        let directory_bytes = encode_directory(&[
            encode_block(0x0fad, &[1, 2, 3]), // odd length exercises padding
            encode_block(1005, &[0; 16]),
        ]);

        let mut read = SliceRead::new(&directory_bytes);
        let directory = ResourceDirectory::read(&mut read, &ParseOptions::default()).unwrap();

        assert_eq!(directory.blocks.len(), 2);
        assert_eq!(directory.block(0x0fad).unwrap().data, vec![1, 2, 3]);
        assert_eq!(directory.block(1005).unwrap().data.len(), 16);
        assert!(read.is_at_end());
    }

    #[test]
    fn thumbnail_is_decoded_unless_skipped() {
        let mut thumbnail_data = Vec::new();
        thumbnail_data.extend_from_slice(&1_u32.to_be_bytes()); // jpeg format
        thumbnail_data.extend_from_slice(&32_u32.to_be_bytes());
        thumbnail_data.extend_from_slice(&24_u32.to_be_bytes());
        thumbnail_data.extend_from_slice(&[0; 16]); // stride, sizes, bits, planes
        thumbnail_data.extend_from_slice(&[0xff, 0xd8, 0xff, 0xe0]); // jfif marker

        let directory_bytes = encode_directory(&[encode_block(THUMBNAIL, &thumbnail_data)]);

        let decoded = ResourceDirectory::read(
            &mut SliceRead::new(&directory_bytes), &ParseOptions::default()
        ).unwrap();

        let thumbnail = decoded.thumbnail.unwrap();
        assert_eq!(thumbnail.size, Vec2(32, 24));
        assert_eq!(thumbnail.jpeg, vec![0xff, 0xd8, 0xff, 0xe0]);

        let skipped = ResourceDirectory::read(
            &mut SliceRead::new(&directory_bytes), &ParseOptions::raw_data()
        ).unwrap();

        assert!(skipped.thumbnail.is_none());
        assert_eq!(skipped.blocks.len(), 0);
    }

    #[test]
    fn malformed_directory_keeps_earlier_blocks() {
        let mut blocks = encode_block(4000, &[9; 4]);
        blocks.extend_from_slice(b"XXXX\x00\x01"); // wrong signature mid-directory

        let mut directory_bytes = (blocks.len() as u32).to_be_bytes().to_vec();
        directory_bytes.extend_from_slice(&blocks);

        let mut read = SliceRead::new(&directory_bytes);
        let directory = ResourceDirectory::read(&mut read, &ParseOptions::default()).unwrap();

        assert_eq!(directory.blocks.len(), 1);
        assert!(read.is_at_end(), "the section length still positions the cursor behind the directory");
    }
}
