//! Flat binary images: file offsets are chip addresses.

use std::io::{Seek, SeekFrom, Write};

use super::{ImageError, MemoryBlock, MemoryImage};

/// Turns the file contents into a single block at address 0.
pub fn decode(data: Vec<u8>) -> MemoryImage {
    let mut image = MemoryImage::new();
    image.push_block(MemoryBlock::new(0, data));
    image
}

/// Writes every block at its own offset. Gaps between blocks are left to
/// the file system, which may keep them sparse.
pub fn write<W: Write + Seek>(image: &MemoryImage, out: &mut W) -> Result<(), ImageError> {
    for block in image.blocks() {
        out.seek(SeekFrom::Start(u64::from(block.address())))?;
        out.write_all(block.data())?;
    }
    out.flush()?;
    Ok(())
}
