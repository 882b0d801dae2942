//! Register and memory map of the CC25xx family as seen by the debugger.

/// Special function registers, accessed with `MOV A,direct` and `MOV direct,#data`.
pub mod sfr {
    /// Flash bank mapping.
    pub const FMAP: u8 = 0x9F;
    /// Flash address low byte (CC251x flash controller).
    pub const FADDRL: u8 = 0xAC;
    /// Flash address high byte (CC251x flash controller).
    pub const FADDRH: u8 = 0xAD;
    /// Flash control (CC251x flash controller).
    pub const FLC: u8 = 0xAE;
    /// Flash write data (CC251x flash controller).
    pub const FWDATA: u8 = 0xAF;
    /// Memory arbiter control, selects the CODE bank mapped into XDATA.
    pub const MEMCTR: u8 = 0xC7;
    pub const DMAIRQ: u8 = 0xD1;
    pub const DMA1CFGL: u8 = 0xD2;
    pub const DMA1CFGH: u8 = 0xD3;
    pub const DMA0CFGL: u8 = 0xD4;
    pub const DMA0CFGH: u8 = 0xD5;
    pub const DMAARM: u8 = 0xD6;
}

/// Fixed locations in the XDATA address space.
pub mod xdata {
    /// Staging RAM the DMA channels copy through.
    pub const STAGING_RAM: u16 = 0x0000;
    /// Where the DMA descriptors are placed, 8 bytes per channel.
    pub const DMA_DESCRIPTORS: u16 = 0x1000;
    /// Debug data register, the source of burst writes.
    pub const DBGDATA: u16 = 0x6260;
    /// Flash controller control and status.
    pub const FCTL: u16 = 0x6270;
    /// Flash word address, low byte first.
    pub const FADDRL: u16 = 0x6271;
    pub const FADDRH: u16 = 0x6272;
    /// Flash write data register, the destination of flash DMA transfers.
    pub const FWDATA: u16 = 0x6273;
    /// Two chip information registers.
    pub const CHIPINFO: u16 = 0x6276;
    /// Read-only information page.
    pub const INFO_PAGE: u16 = 0x7800;
    /// Factory programmed IEEE address, 6 bytes, least significant first.
    pub const IEEE_ADDRESS: u16 = 0x780E;
    /// Start of the 32 KiB window the selected CODE bank is mapped into.
    pub const CODE_WINDOW: u16 = 0x8000;
    /// Where the software flash routine and its page payload are staged.
    pub const ROUTINE_STAGING: u16 = 0xF000;
}

/// Size of one CODE bank and of the XDATA window it is mapped into.
pub const CODE_BANK_SIZE: u32 = 0x8000;
