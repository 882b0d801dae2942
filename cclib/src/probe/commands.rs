//! Wire-level constants of the CCLib proxy protocol.
//!
//! Every request is a 4-byte frame `[command, b1, b2, b3]`, every response a
//! 3-byte frame `[status, high, low]`. The burst commands stream an additional
//! payload after the adapter answered with [`Status::Ready`].

use enum_primitive_derive::Primitive;

/// Commands understood by the proxy firmware.
#[derive(Primitive, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Enter = 0x01,
    Exit = 0x02,
    ChipId = 0x03,
    Status = 0x04,
    Pc = 0x05,
    Step = 0x06,
    Exec1 = 0x07,
    Exec2 = 0x08,
    Exec3 = 0x09,
    BurstWrite = 0x0A,
    ReadConfig = 0x0B,
    WriteConfig = 0x0C,
    ChipErase = 0x0D,
    Resume = 0x0E,
    Halt = 0x0F,
    Ping = 0xF0,
    InstructionTableVersion = 0xF1,
    UpdateInstructionTable = 0xF2,
}

impl Command {
    /// Whether the 16-bit response payload of this command is a fresh debug status byte.
    pub(crate) fn returns_status(self) -> bool {
        matches!(
            self,
            Command::Exit
                | Command::Status
                | Command::WriteConfig
                | Command::ChipErase
                | Command::BurstWrite
        )
    }
}

/// Status byte leading every response frame.
#[derive(Primitive, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok = 0x01,
    Error = 0x02,
    Ready = 0x03,
}

/// Error codes carried in the low byte of an [`Status::Error`] response.
pub mod error_codes {
    pub const NOT_INITIALIZED: u8 = 0x01;
    pub const NOT_IN_DEBUG_MODE: u8 = 0x02;
    pub const CHIP_NOT_RESPONDING: u8 = 0x03;
}

/// Largest payload a single burst write may carry.
pub const MAX_BURST_LEN: usize = 2048;

/// Size of the instruction table payload, version byte included.
pub const INSTRUCTION_TABLE_LEN: usize = 16;

/// The 8051 opcodes the driver executes through the debug interface.
pub mod opcodes {
    /// `LJMP addr16`
    pub const LJMP: u8 = 0x02;
    /// `MOV A,#data`
    pub const MOV_A_IMM: u8 = 0x74;
    /// `MOV direct,#data`
    pub const MOV_DIRECT_IMM: u8 = 0x75;
    /// `MOV DPTR,#data16`
    pub const MOV_DPTR_IMM: u8 = 0x90;
    /// `MOVC A,@A+DPTR`
    pub const MOVC_A_DPTR: u8 = 0x93;
    /// `INC DPTR`
    pub const INC_DPTR: u8 = 0xA3;
    /// `MOVX A,@DPTR`
    pub const MOVX_A_DPTR: u8 = 0xE0;
    /// `CLR A`
    pub const CLR_A: u8 = 0xE4;
    /// `MOV A,direct`
    pub const MOV_A_DIRECT: u8 = 0xE5;
    /// `MOVX @DPTR,A`
    pub const MOVX_DPTR_A: u8 = 0xF0;
}
