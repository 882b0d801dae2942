//! Intel HEX codec.
//!
//! Supports data, end-of-file, extended segment address and extended linear
//! address records. Start address records have no meaning for the chips and
//! are rejected like any other unknown record type.

use ihex::{ReaderError, Record};

use super::{ImageError, MemoryBlock, MemoryImage};

/// Bytes per data record when encoding.
const RECORD_LEN: usize = 16;

/// Decodes Intel HEX text.
///
/// Contiguous data records are collected into one block. The image is only
/// returned once every line decoded without error.
pub fn decode(text: &str) -> Result<MemoryImage, ImageError> {
    let mut image = MemoryImage::new();
    let mut current: Option<MemoryBlock> = None;
    let mut base = 0u32;

    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let line_number = index + 1;

        let record = Record::from_record_string(line).map_err(|source| match source {
            ReaderError::UnsupportedRecordType(record_type) => ImageError::UnknownRecordType {
                line: line_number,
                record_type,
            },
            source => ImageError::Hex {
                line: line_number,
                source,
            },
        })?;

        match record {
            Record::Data { offset, value } => {
                let address = base | u32::from(offset);
                match current.as_mut() {
                    Some(block) if block.is_continuous(address) => block.stack(&value),
                    _ => {
                        if let Some(block) = current.replace(MemoryBlock::new(address, value)) {
                            image.push_block(block);
                        }
                    }
                }
            }
            Record::EndOfFile => break,
            Record::ExtendedSegmentAddress(segment) => base = u32::from(segment) << 4,
            Record::ExtendedLinearAddress(upper) => base = u32::from(upper) << 16,
            Record::StartSegmentAddress { .. } => {
                return Err(ImageError::UnknownRecordType {
                    line: line_number,
                    record_type: 0x03,
                })
            }
            Record::StartLinearAddress(_) => {
                return Err(ImageError::UnknownRecordType {
                    line: line_number,
                    record_type: 0x05,
                })
            }
        }
    }

    if let Some(block) = current {
        image.push_block(block);
    }

    Ok(image)
}

/// Encodes `image` as Intel HEX text with 16 byte data records.
pub fn encode(image: &MemoryImage) -> Result<String, ImageError> {
    let mut records = vec![];

    for block in image.blocks() {
        let mut address = block.address();
        let mut upper = None;
        let mut rest = block.data();

        while !rest.is_empty() {
            if upper != Some(address >> 16) {
                upper = Some(address >> 16);
                records.push(Record::ExtendedLinearAddress((address >> 16) as u16));
            }

            // Records never cross a 64 KiB boundary.
            let room = 0x1_0000 - (address & 0xFFFF) as usize;
            let (chunk, tail) = rest.split_at(rest.len().min(RECORD_LEN).min(room));

            records.push(Record::Data {
                offset: (address & 0xFFFF) as u16,
                value: chunk.to_vec(),
            });

            address = address.wrapping_add(chunk.len() as u32);
            rest = tail;
        }
    }
    records.push(Record::EndOfFile);

    let mut text = ihex::create_object_file_representation(&records)?;
    if !text.ends_with('\n') {
        text.push('\n');
    }
    Ok(text)
}

#[cfg(test)]
mod test {
    use super::*;
    use ihex::Reader;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn records(text: &str) -> Vec<Record> {
        Reader::new(text).map(|record| record.unwrap()).collect()
    }

    const SINGLE: &str = ":10010000214601360121470136007EFE09D2190140\n:00000001FF\n";

    #[test]
    fn decodes_one_record() {
        let image = decode(SINGLE).unwrap();

        assert_eq!(image.block_count(), 1);
        let block = &image.blocks()[0];
        assert_eq!(block.address(), 0x100);
        assert_eq!(
            block.data(),
            &[
                0x21, 0x46, 0x01, 0x36, 0x01, 0x21, 0x47, 0x01, 0x36, 0x00, 0x7E, 0xFE, 0x09,
                0xD2, 0x19, 0x01
            ]
        );
    }

    #[test]
    fn separate_records_make_separate_blocks() {
        let text = ":10010000214601360121470136007EFE09D2190140\n\
                    :10050000214601360121470136007EFE09D219013C\n\
                    :00000001FF\n";

        let image = decode(text).unwrap();

        let addresses: Vec<u32> = image.blocks().iter().map(MemoryBlock::address).collect();
        assert_eq!(addresses, vec![0x100, 0x500]);
    }

    #[test]
    fn contiguous_records_are_joined() {
        let text = ":020000000102FB\n:020002000304F5\n:00000001FF\n";

        let image = decode(text).unwrap();

        assert_eq!(image.block_count(), 1);
        assert_eq!(image.blocks()[0].data(), &[1, 2, 3, 4]);
    }

    #[test]
    fn extended_addresses_apply_to_following_data() {
        let text = ":020000040001F9\n:02001000AABB89\n\
                    :020000021000EC\n:01000000CC33\n:00000001FF\n";

        let image = decode(text).unwrap();

        assert_eq!(image.get(0x10010, 2), Some(&[0xAA, 0xBB][..]));
        assert_eq!(image.get(0x10000, 1), Some(&[0xCC][..]));
    }

    #[test]
    fn nothing_after_end_of_file_is_read() {
        let text = ":00000001FF\n:10010000214601360121470136007EFE09D2190140\n";
        assert!(decode(text).unwrap().is_empty());
    }

    #[test]
    fn checksum_mismatch_names_the_line() {
        let text = ":020000000102FB\n:020002000304F6\n";

        let error = decode(text).unwrap_err();

        assert!(matches!(
            error,
            ImageError::Hex {
                line: 2,
                source: ReaderError::ChecksumMismatch(..)
            }
        ));
    }

    fn line_bytes(line: &str) -> Vec<u8> {
        let digits = line.strip_prefix(':').unwrap();
        (0..digits.len())
            .step_by(2)
            .map(|at| u8::from_str_radix(&digits[at..at + 2], 16).unwrap())
            .collect()
    }

    #[test_case(0x0000, &[] ; "empty")]
    #[test_case(0x0000, &[0x00] ; "zero")]
    #[test_case(0x0100, &[0xFF; 16] ; "all ones")]
    #[test_case(0xFFF0, &[0x80; 33] ; "crossing 64k")]
    #[test_case(0x3_1234, &[0x01, 0x02, 0x03, 0xFD, 0xFE] ; "high address")]
    fn every_record_sums_to_zero(address: u32, data: &[u8]) {
        let mut image = MemoryImage::new();
        image.set(address, data);

        let text = encode(&image).unwrap();

        for line in text.lines() {
            let sum = line_bytes(line)
                .iter()
                .fold(0u8, |sum, byte| sum.wrapping_add(*byte));
            assert_eq!(sum, 0, "{line}");
        }
    }

    #[test]
    fn start_address_records_are_unknown() {
        let text = ":0400000500000000F7\n";

        let error = decode(text).unwrap_err();

        assert!(matches!(
            error,
            ImageError::UnknownRecordType {
                line: 1,
                record_type: 0x05
            }
        ));
    }

    #[test]
    fn missing_start_code_is_rejected() {
        let error = decode("0200000001027B\n").unwrap_err();
        assert!(matches!(
            error,
            ImageError::Hex {
                line: 1,
                source: ReaderError::MissingStartCode
            }
        ));
    }

    #[test]
    fn encode_round_trips() {
        let mut image = MemoryImage::new();
        image.set(0x0000, &[0x55; 40]);
        image.set(0x1FFF8, &(0..32).collect::<Vec<u8>>());

        let text = encode(&image).unwrap();

        assert_eq!(decode(&text).unwrap(), image);
    }

    #[test]
    fn encode_splits_at_64k_boundaries() {
        let mut image = MemoryImage::new();
        image.set(0xFFF8, &[0xAB; 16]);

        let records = records(&encode(&image).unwrap());

        assert_eq!(
            records,
            vec![
                Record::ExtendedLinearAddress(0),
                Record::Data {
                    offset: 0xFFF8,
                    value: vec![0xAB; 8]
                },
                Record::ExtendedLinearAddress(1),
                Record::Data {
                    offset: 0x0000,
                    value: vec![0xAB; 8]
                },
                Record::EndOfFile,
            ]
        );
    }

    #[test]
    fn empty_image_is_only_end_of_file() {
        assert_eq!(encode(&MemoryImage::new()).unwrap().trim_end(), ":00000001FF");
    }
}
