pub mod cli;
pub mod common_options;
pub mod flash;
pub mod logging;

use std::num::ParseIntError;

pub fn parse_u32(input: &str) -> Result<u32, ParseIntError> {
    parse_int::parse(input)
}

pub fn parse_u8(input: &str) -> Result<u8, ParseIntError> {
    parse_int::parse(input)
}
