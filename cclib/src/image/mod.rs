//! Sparse memory images and the file formats they are stored in.
//!
//! A [`MemoryImage`] is a sorted list of non-overlapping [`MemoryBlock`]s,
//! each a maximal contiguous run of defined bytes. Images are loaded from
//! and saved to Intel HEX or flat binary files, see [`load`] and [`save`].

pub mod bin;
pub mod hex;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Errors while decoding or encoding memory images.
#[derive(thiserror::Error, Debug)]
pub enum ImageError {
    #[error("Could not access the image file")]
    Io(#[from] std::io::Error),
    #[error("Invalid Intel HEX record at line {line}")]
    Hex {
        line: usize,
        #[source]
        source: ihex::ReaderError,
    },
    #[error("Unknown Intel HEX record type {record_type:#04x} at line {line}")]
    UnknownRecordType { line: usize, record_type: u8 },
    #[error("Could not encode the image as Intel HEX")]
    HexWrite(#[from] ihex::WriterError),
    #[error("Cannot detect the format of {0}, use an explicit format")]
    UnknownFormat(PathBuf),
    #[error("Moving the image by {delta:#x} exceeds the 32 bit address space")]
    AddressOverflow { delta: u32 },
}

/// A finite list of all the file formats images can be stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Format {
    /// Marks a file in [Intel HEX](https://en.wikipedia.org/wiki/Intel_HEX) format.
    Hex,
    /// Raw bytes, file offsets are chip addresses.
    Bin,
}

impl FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match &s.to_lowercase()[..] {
            "bin" | "binary" => Ok(Format::Bin),
            "hex" | "ihex" | "intelhex" => Ok(Format::Hex),
            _ => Err(format!("Format '{s}' is unknown.")),
        }
    }
}

impl Format {
    /// Picks the format from the file extension.
    pub fn from_path(path: &Path) -> Result<Self, ImageError> {
        path.extension()
            .and_then(|extension| extension.to_str())
            .and_then(|extension| Format::from_str(extension).ok())
            .ok_or_else(|| ImageError::UnknownFormat(path.to_path_buf()))
    }
}

/// A contiguous run of bytes starting at `address`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryBlock {
    address: u32,
    data: Vec<u8>,
}

impl MemoryBlock {
    pub fn new(address: u32, data: Vec<u8>) -> Self {
        Self { address, data }
    }

    pub fn address(&self) -> u32 {
        self.address
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// First address after the block.
    pub fn end(&self) -> u64 {
        u64::from(self.address) + self.data.len() as u64
    }

    /// Whether `[address, address + len)` lies within the block.
    pub fn contains(&self, address: u32, len: usize) -> bool {
        address >= self.address && u64::from(address) + len as u64 <= self.end()
    }

    /// Whether data at `address` would directly extend the block.
    pub fn is_continuous(&self, address: u32) -> bool {
        u64::from(address) == self.end()
    }

    /// Appends `data` to the end of the block.
    pub fn stack(&mut self, data: &[u8]) {
        self.data.extend_from_slice(data);
    }
}

/// A sparse memory image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryImage {
    blocks: Vec<MemoryBlock>,
}

impl MemoryImage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blocks(&self) -> &[MemoryBlock] {
        &self.blocks
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Highest address of the image, exclusive. 0 for an empty image.
    pub fn top(&self) -> u64 {
        self.blocks.last().map_or(0, MemoryBlock::end)
    }

    /// Appends `data` to the last block, starting a block at address 0 in an
    /// empty image.
    pub fn stack(&mut self, data: &[u8]) {
        match self.blocks.last_mut() {
            Some(block) => block.stack(data),
            None => self.blocks.push(MemoryBlock::new(0, data.to_vec())),
        }
    }

    /// Writes `data` at `address`.
    ///
    /// Bytes inside existing blocks are overwritten. Every block that
    /// overlaps or touches the written range is merged with it into a single
    /// block.
    pub fn set(&mut self, address: u32, data: &[u8]) {
        if data.is_empty() {
            return;
        }

        let end = u64::from(address) + data.len() as u64;
        let first = self
            .blocks
            .partition_point(|block| block.end() < u64::from(address));
        let last = self
            .blocks
            .partition_point(|block| u64::from(block.address) <= end);

        let touching: Vec<MemoryBlock> = self.blocks.drain(first..last).collect();

        let start = touching
            .first()
            .map_or(address, |block| block.address.min(address));
        let stop = touching.last().map_or(end, |block| block.end().max(end));

        let mut merged = vec![0xFF; (stop - u64::from(start)) as usize];
        for block in &touching {
            let at = (block.address - start) as usize;
            merged[at..at + block.len()].copy_from_slice(&block.data);
        }
        let at = (address - start) as usize;
        merged[at..at + data.len()].copy_from_slice(data);

        self.blocks.insert(first, MemoryBlock::new(start, merged));
    }

    /// Reads `len` bytes at `address` if they are all defined.
    pub fn get(&self, address: u32, len: usize) -> Option<&[u8]> {
        let block = self
            .blocks
            .iter()
            .find(|block| block.contains(address, len))?;
        let at = (address - block.address) as usize;
        Some(&block.data[at..at + len])
    }

    /// Moves every block up by `delta` bytes.
    pub fn offset_by(&mut self, delta: u32) -> Result<(), ImageError> {
        if self
            .blocks
            .last()
            .is_some_and(|block| block.end() + u64::from(delta) > 1 << 32)
        {
            return Err(ImageError::AddressOverflow { delta });
        }

        for block in &mut self.blocks {
            block.address += delta;
        }
        Ok(())
    }

    /// Appends a block that starts behind every existing block.
    ///
    /// Falls back to [`MemoryImage::set`] when the block would break the
    /// ordering.
    pub(crate) fn push_block(&mut self, block: MemoryBlock) {
        if block.is_empty() {
            return;
        }
        match self.blocks.last() {
            Some(last) if last.end() >= u64::from(block.address) => {
                self.set(block.address, &block.data)
            }
            _ => self.blocks.push(block),
        }
    }
}

/// Reads an image from `path`, detecting the format from the extension
/// unless `format` is given.
#[tracing::instrument(skip_all, fields(path = %path.display()))]
pub fn load(path: &Path, format: Option<Format>) -> Result<MemoryImage, ImageError> {
    let format = match format {
        Some(format) => format,
        None => Format::from_path(path)?,
    };

    let image = match format {
        Format::Hex => hex::decode(&std::fs::read_to_string(path)?)?,
        Format::Bin => bin::decode(std::fs::read(path)?),
    };

    tracing::debug!("Loaded {} block(s) from {}", image.block_count(), path.display());
    Ok(image)
}

/// Writes `image` to `path`, detecting the format from the extension unless
/// `format` is given.
#[tracing::instrument(skip_all, fields(path = %path.display()))]
pub fn save(image: &MemoryImage, path: &Path, format: Option<Format>) -> Result<(), ImageError> {
    let format = match format {
        Some(format) => format,
        None => Format::from_path(path)?,
    };

    match format {
        Format::Hex => {
            let text = hex::encode(image)?;
            let mut file = BufWriter::new(File::create(path)?);
            file.write_all(text.as_bytes())?;
            file.flush()?;
        }
        Format::Bin => bin::write(image, &mut File::create(path)?)?,
    }

    Ok(())
}
