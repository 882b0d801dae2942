#![allow(missing_docs)] // Don't require docs for test code
//! An emulated CCLib adapter with a CC25xx chip attached.
//!
//! The emulation decodes the wire frames, executes the handful of 8051
//! instructions the drivers rely on against an XDATA/SFR model and mimics the
//! DMA channels and the flash controller closely enough to run the flash
//! algorithms end to end.

use super::commands::{error_codes, opcodes, Command, Status, INSTRUCTION_TABLE_LEN};
use super::CcProxy;
use crate::chip::registers::{sfr, xdata, CODE_BANK_SIZE};
use crate::flashing::fctl;
use num_traits::FromPrimitive;
use std::collections::{BTreeSet, VecDeque};
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const XDATA_SIZE: usize = 0x10000;

/// Flash programming granularity of the DMA path, in bytes per FADDR unit.
const FLASH_WORD: usize = 4;

/// How the flash is visible to the CPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CodeMapping {
    /// The selected bank is mapped into XDATA at 0x8000 (CC253x/CC254x).
    XdataWindow,
    /// Only reachable through `MOVC` (CC251x).
    MovcOnly,
}

#[derive(Debug)]
struct Pending {
    command: Command,
    remaining: usize,
    data: Vec<u8>,
}

/// State of the emulated adapter and chip.
pub struct FakeChip {
    chip_id: u16,
    mapping: CodeMapping,
    page_size: usize,
    erase_shift: u8,
    flash_word_size: usize,

    flash: Vec<u8>,
    xdata: Vec<u8>,
    sfr: [u8; 256],
    dptr: u16,
    acc: u8,
    pc: u16,

    debug_mode: bool,
    halted: bool,
    config: u8,
    instruction_table: [u8; INSTRUCTION_TABLE_LEN],
    erase_busy_polls: u8,
    flash_busy_polls: u8,

    input: Vec<u8>,
    output: VecDeque<u8>,
    pending: Option<Pending>,

    frames: usize,
    flash_writes: usize,
    page_erases: usize,

    command_faults: Vec<(Command, u8)>,
    refuse_table_version: bool,
    truncate_responses: bool,
    corrupt_writes: usize,
    locked_pages: BTreeSet<usize>,
    stall_routine: bool,
}

impl FakeChip {
    fn new(chip_id: u16, chip_info: [u8; 2], mapping: CodeMapping, page_size: usize) -> Self {
        let flash_size = 1024usize << (4 + ((chip_info[0] & 0x70) >> 4));
        let mut chip = Self {
            chip_id,
            mapping,
            page_size,
            erase_shift: 1,
            flash_word_size: 2,
            flash: vec![0xFF; flash_size],
            xdata: vec![0; XDATA_SIZE],
            sfr: [0; 256],
            dptr: 0,
            acc: 0,
            pc: 0,
            debug_mode: false,
            halted: false,
            config: 0x22,
            instruction_table: [0; INSTRUCTION_TABLE_LEN],
            erase_busy_polls: 0,
            flash_busy_polls: 0,
            input: vec![],
            output: VecDeque::new(),
            pending: None,
            frames: 0,
            flash_writes: 0,
            page_erases: 0,
            command_faults: vec![],
            refuse_table_version: false,
            truncate_responses: false,
            corrupt_writes: 0,
            locked_pages: BTreeSet::new(),
            stall_routine: false,
        };

        chip.set_xdata(xdata::CHIPINFO, &chip_info);
        chip.set_xdata(xdata::IEEE_ADDRESS, &[0x12, 0x34, 0x56, 0x78, 0x9A, 0xBC]);
        chip
    }

    /// A CC2541 with 256 KiB flash, 8 KiB SRAM and no USB.
    pub fn cc2541() -> Self {
        Self::new(0x4103, [0x40, 0x07], CodeMapping::XdataWindow, 0x800)
    }

    /// A CC2540 with 128 KiB flash, 3 KiB SRAM and no USB.
    pub fn cc2540() -> Self {
        Self::new(0x8D03, [0x30, 0x02], CodeMapping::XdataWindow, 0x800)
    }

    /// A CC2533 with 64 KiB flash, which addresses erase pages with `FADDRH[6:0]`.
    pub fn cc2533() -> Self {
        let mut chip = Self::new(0x9501, [0x20, 0x05], CodeMapping::XdataWindow, 0x800);
        chip.erase_shift = 0;
        chip
    }

    /// A CC2510 with 16 KiB flash.
    pub fn cc2510() -> Self {
        Self::new(0x8104, [0x00, 0x01], CodeMapping::MovcOnly, 0x400)
    }

    /// A CC2541 body answering with an arbitrary chip ID.
    pub fn with_chip_id(chip_id: u16) -> Self {
        let mut chip = Self::cc2541();
        chip.chip_id = chip_id;
        chip
    }

    pub fn flash(&self) -> &[u8] {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut [u8] {
        &mut self.flash
    }

    pub fn xdata(&self, address: u16, len: usize) -> &[u8] {
        let start = usize::from(address);
        &self.xdata[start..start + len]
    }

    pub fn set_xdata(&mut self, address: u16, data: &[u8]) {
        let start = usize::from(address);
        self.xdata[start..start + data.len()].copy_from_slice(data);
    }

    pub fn sfr(&self, register: u8) -> u8 {
        self.sfr[usize::from(register)]
    }

    pub fn config(&self) -> u8 {
        self.config
    }

    pub fn set_config(&mut self, config: u8) {
        self.config = config;
    }

    pub fn pc(&self) -> u16 {
        self.pc
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn in_debug_mode(&self) -> bool {
        self.debug_mode
    }

    /// Puts the chip in debug mode as if a previous session left it halted.
    pub fn set_debug_mode(&mut self, halted: bool) {
        self.debug_mode = halted;
        self.halted = halted;
    }

    pub fn instruction_table(&self) -> &[u8; INSTRUCTION_TABLE_LEN] {
        &self.instruction_table
    }

    pub fn set_instruction_table_version(&mut self, version: u8) {
        self.instruction_table[0] = version;
    }

    /// Number of command frames received so far.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Number of completed flash program operations.
    pub fn flash_writes(&self) -> usize {
        self.flash_writes
    }

    pub fn page_erases(&self) -> usize {
        self.page_erases
    }

    /// Answers the next occurrence of `command` with an ERROR frame.
    pub fn fail_next(&mut self, command: Command, code: u8) {
        self.command_faults.push((command, code));
    }

    /// Answers instruction table version queries with an error.
    pub fn refuse_table_version(&mut self) {
        self.refuse_table_version = true;
    }

    /// Only the first byte of every following response is sent.
    pub fn truncate_responses(&mut self) {
        self.truncate_responses = true;
    }

    /// The next `count` flash program operations drop their first byte.
    pub fn corrupt_flash_writes(&mut self, count: usize) {
        self.corrupt_writes = count;
    }

    /// Erasing or programming the page sets the abort flag.
    pub fn lock_page(&mut self, page: usize) {
        self.locked_pages.insert(page);
    }

    /// The software flash routine never reaches its breakpoint.
    pub fn stall_routine(&mut self) {
        self.stall_routine = true;
    }

    fn receive(&mut self, bytes: &[u8]) {
        self.input.extend_from_slice(bytes);

        loop {
            if let Some(mut pending) = self.pending.take() {
                let take = pending.remaining.min(self.input.len());
                pending.data.extend(self.input.drain(..take));
                pending.remaining -= take;

                if pending.remaining == 0 {
                    self.finish_payload(pending);
                } else {
                    self.pending = Some(pending);
                    break;
                }
            } else if self.input.len() >= 4 {
                let frame: Vec<u8> = self.input.drain(..4).collect();
                self.handle_frame([frame[0], frame[1], frame[2], frame[3]]);
            } else {
                break;
            }
        }
    }

    fn respond(&mut self, status: Status, value: u16) {
        let [high, low] = value.to_be_bytes();
        self.output.push_back(status as u8);
        if !self.truncate_responses {
            self.output.push_back(high);
            self.output.push_back(low);
        }
    }

    fn ok(&mut self, value: u16) {
        self.respond(Status::Ok, value)
    }

    fn error(&mut self, code: u8) {
        self.respond(Status::Error, u16::from(code))
    }

    fn status(&self) -> u8 {
        let mut status = 0x02;
        if self.halted {
            status |= 0x20;
        }
        if self.erase_busy_polls > 0 {
            status |= 0x80;
        }
        status
    }

    fn handle_frame(&mut self, frame: [u8; 4]) {
        self.frames += 1;

        let Some(command) = Command::from_u8(frame[0]) else {
            self.error(0xFF);
            return;
        };

        if let Some(index) = self.command_faults.iter().position(|(c, _)| *c == command) {
            let (_, code) = self.command_faults.remove(index);
            self.error(code);
            return;
        }

        let needs_debug = matches!(
            command,
            Command::Pc
                | Command::Step
                | Command::Exec1
                | Command::Exec2
                | Command::Exec3
                | Command::Resume
                | Command::Halt
        );
        if needs_debug && !self.debug_mode {
            self.error(error_codes::NOT_IN_DEBUG_MODE);
            return;
        }

        match command {
            Command::Ping => self.ok(0),
            Command::Enter => {
                self.debug_mode = true;
                self.halted = true;
                self.ok(0)
            }
            Command::Exit => {
                self.debug_mode = false;
                self.halted = false;
                let status = self.status();
                self.ok(status.into())
            }
            Command::ChipId => self.ok(self.chip_id),
            Command::Status => {
                let status = self.status();
                self.erase_busy_polls = self.erase_busy_polls.saturating_sub(1);
                self.ok(status.into())
            }
            Command::Pc => self.ok(self.pc),
            Command::Step => {
                self.pc = self.pc.wrapping_add(1);
                self.ok(self.acc.into())
            }
            Command::Exec1 => self.execute_and_respond(&frame[1..2]),
            Command::Exec2 => self.execute_and_respond(&frame[1..3]),
            Command::Exec3 => self.execute_and_respond(&frame[1..4]),
            Command::BurstWrite => {
                let len = usize::from(u16::from_be_bytes([frame[1], frame[2]]));
                self.respond(Status::Ready, 0);
                self.expect_payload(command, len);
            }
            Command::ReadConfig => self.ok(self.config.into()),
            Command::WriteConfig => {
                self.config = frame[1];
                let status = self.status();
                self.ok(status.into())
            }
            Command::ChipErase => {
                self.flash.fill(0xFF);
                self.erase_busy_polls = 2;
                let status = self.status();
                self.ok(status.into())
            }
            Command::Resume => {
                self.resume();
                self.ok(0)
            }
            Command::Halt => {
                self.halted = true;
                self.ok(0)
            }
            Command::InstructionTableVersion => {
                if self.refuse_table_version {
                    self.error(error_codes::NOT_INITIALIZED)
                } else {
                    self.ok(self.instruction_table[0].into())
                }
            }
            Command::UpdateInstructionTable => {
                self.respond(Status::Ready, 0);
                self.expect_payload(command, INSTRUCTION_TABLE_LEN);
            }
        }
    }

    fn expect_payload(&mut self, command: Command, len: usize) {
        let pending = Pending {
            command,
            remaining: len,
            data: Vec::with_capacity(len),
        };

        if len == 0 {
            self.finish_payload(pending);
        } else {
            self.pending = Some(pending);
        }
    }

    fn finish_payload(&mut self, pending: Pending) {
        match pending.command {
            Command::UpdateInstructionTable => {
                self.instruction_table.copy_from_slice(&pending.data);
                self.ok(self.instruction_table[0].into())
            }
            _ => {
                if self.sfr[usize::from(sfr::DMAARM)] & 0x01 != 0 {
                    let descriptor = self.descriptor(sfr::DMA0CFGH, sfr::DMA0CFGL);
                    let destination = usize::from(u16::from_be_bytes([descriptor[2], descriptor[3]]));
                    let len = transfer_len(&descriptor).min(pending.data.len());
                    self.xdata[destination..destination + len].copy_from_slice(&pending.data[..len]);

                    self.sfr[usize::from(sfr::DMAIRQ)] |= 0x01;
                    self.sfr[usize::from(sfr::DMAARM)] &= !0x01;
                }

                let status = self.status();
                self.ok(status.into())
            }
        }
    }

    fn descriptor(&self, high: u8, low: u8) -> [u8; 8] {
        let address = usize::from(u16::from_be_bytes([
            self.sfr[usize::from(high)],
            self.sfr[usize::from(low)],
        ]));
        let mut descriptor = [0u8; 8];
        descriptor.copy_from_slice(&self.xdata[address..address + 8]);
        descriptor
    }

    fn execute_and_respond(&mut self, instruction: &[u8]) {
        self.execute(instruction);
        self.ok(self.acc.into())
    }

    fn execute(&mut self, instruction: &[u8]) {
        match *instruction {
            [opcodes::MOV_DPTR_IMM, high, low] => self.dptr = u16::from_be_bytes([high, low]),
            [opcodes::MOVX_A_DPTR] => self.acc = self.read_xdata(self.dptr),
            [opcodes::INC_DPTR] => self.dptr = self.dptr.wrapping_add(1),
            [opcodes::MOV_A_IMM, value] => self.acc = value,
            [opcodes::MOVX_DPTR_A] => self.write_xdata(self.dptr, self.acc),
            [opcodes::MOV_A_DIRECT, register] => self.acc = self.sfr[usize::from(register)],
            [opcodes::MOV_DIRECT_IMM, register, value] => self.sfr[usize::from(register)] = value,
            [opcodes::CLR_A] => self.acc = 0,
            [opcodes::MOVC_A_DPTR] => {
                let address = self.dptr.wrapping_add(self.acc.into());
                self.acc = self.read_code(address);
            }
            [opcodes::LJMP, high, low] => self.pc = u16::from_be_bytes([high, low]),
            _ => tracing::warn!("Fake chip ignores instruction {:02x?}", instruction),
        }
    }

    fn bank(&self) -> usize {
        let memctr = self.sfr[usize::from(sfr::MEMCTR)];
        match self.mapping {
            CodeMapping::XdataWindow => usize::from(memctr & 0x07),
            CodeMapping::MovcOnly => usize::from((memctr >> 4) & 0x07),
        }
    }

    fn read_code(&self, address: u16) -> u8 {
        let address = usize::from(address);
        let physical = if address < CODE_BANK_SIZE as usize {
            address
        } else {
            self.bank() * CODE_BANK_SIZE as usize + address - CODE_BANK_SIZE as usize
        };
        self.flash.get(physical).copied().unwrap_or(0xFF)
    }

    fn read_xdata(&mut self, address: u16) -> u8 {
        if address == xdata::FCTL {
            let value = self.xdata[usize::from(address)];
            if self.flash_busy_polls > 0 {
                self.flash_busy_polls -= 1;
                return value | fctl::BUSY;
            }
            return value;
        }

        if self.mapping == CodeMapping::XdataWindow && address >= xdata::CODE_WINDOW {
            let offset = usize::from(address - xdata::CODE_WINDOW);
            let physical = self.bank() * CODE_BANK_SIZE as usize + offset;
            return self.flash.get(physical).copied().unwrap_or(0xFF);
        }

        self.xdata[usize::from(address)]
    }

    fn write_xdata(&mut self, address: u16, value: u8) {
        if address == xdata::FCTL {
            self.xdata[usize::from(address)] = value & !(fctl::ERASE | fctl::WRITE);
            if value & fctl::ERASE != 0 {
                self.erase_selected_page();
            }
            if value & fctl::WRITE != 0 {
                self.program_from_dma();
            }
            return;
        }

        if self.mapping == CodeMapping::XdataWindow && address >= xdata::CODE_WINDOW {
            return;
        }

        self.xdata[usize::from(address)] = value;
    }

    fn set_abort(&mut self) {
        self.xdata[usize::from(xdata::FCTL)] |= fctl::ABORT;
    }

    fn erase_selected_page(&mut self) {
        let page = usize::from(self.xdata[usize::from(xdata::FADDRH)] >> self.erase_shift);
        if !self.erase_page(page) {
            self.set_abort();
            return;
        }
        self.flash_busy_polls = 1;
    }

    fn erase_page(&mut self, page: usize) -> bool {
        if self.locked_pages.contains(&page) {
            return false;
        }

        let start = page * self.page_size;
        let end = (start + self.page_size).min(self.flash.len());
        if start < end {
            self.flash[start..end].fill(0xFF);
        }
        self.page_erases += 1;
        true
    }

    fn program_from_dma(&mut self) {
        if self.sfr[usize::from(sfr::DMAARM)] & 0x02 == 0 {
            return;
        }

        let descriptor = self.descriptor(sfr::DMA1CFGH, sfr::DMA1CFGL);
        let source = usize::from(u16::from_be_bytes([descriptor[0], descriptor[1]]));
        let len = transfer_len(&descriptor);
        let word_address = usize::from(u16::from_le_bytes([
            self.xdata[usize::from(xdata::FADDRL)],
            self.xdata[usize::from(xdata::FADDRH)],
        ]));
        let address = word_address * FLASH_WORD;

        if self.locked_pages.contains(&(address / self.page_size)) {
            self.set_abort();
            return;
        }

        let data = self.xdata[source..source + len].to_vec();
        self.program(address, &data);

        self.sfr[usize::from(sfr::DMAIRQ)] |= 0x02;
        self.sfr[usize::from(sfr::DMAARM)] &= !0x02;
    }

    /// Flash cells can only be cleared by programming.
    fn program(&mut self, address: usize, data: &[u8]) {
        let skip = if self.corrupt_writes > 0 {
            self.corrupt_writes -= 1;
            1
        } else {
            0
        };

        for (offset, byte) in data.iter().enumerate().skip(skip) {
            if let Some(cell) = self.flash.get_mut(address + offset) {
                *cell &= *byte;
            }
        }
        self.flash_writes += 1;
    }

    fn resume(&mut self) {
        self.halted = false;

        let routine_start = usize::from(xdata::ROUTINE_STAGING) + self.page_size;
        if self.mapping == CodeMapping::MovcOnly && usize::from(self.pc) == routine_start {
            self.run_flash_routine(routine_start);
        }
    }

    /// Runs the page write routine staged by the CC251x driver: the page
    /// address is the immediate of its first instruction, an optional erase
    /// block follows the FADDRL load.
    fn run_flash_routine(&mut self, start: usize) {
        if self.stall_routine {
            return;
        }

        let routine = self.xdata[start..start + 12].to_vec();
        let address = (usize::from(routine[2]) << 8) * self.flash_word_size;
        let erase = routine[6..9] == [opcodes::MOV_DIRECT_IMM, sfr::FLC, 0x01];
        let page = address / self.page_size;

        if erase && !self.erase_page(page) {
            self.halted = true;
            return;
        }

        let staging = usize::from(xdata::ROUTINE_STAGING);
        let data = self.xdata[staging..staging + self.page_size].to_vec();
        self.program(address, &data);
        self.halted = true;
    }
}

fn transfer_len(descriptor: &[u8; 8]) -> usize {
    usize::from(u16::from_be_bytes([descriptor[4] & 0x1F, descriptor[5]]))
}

/// A [`FakeChip`] behind the CCLib wire protocol.
///
/// Clones share the same chip, so a test can keep one handle for inspection
/// while a [`CcProxy`] owns another.
#[derive(Clone)]
pub struct FakeAdapter {
    chip: Arc<Mutex<FakeChip>>,
}

impl FakeAdapter {
    pub fn new(chip: FakeChip) -> Self {
        Self {
            chip: Arc::new(Mutex::new(chip)),
        }
    }

    /// A proxy session talking to this adapter.
    pub fn proxy(&self) -> CcProxy {
        CcProxy::new(Box::new(self.clone()), "fake")
    }

    /// Runs `f` with exclusive access to the emulated chip.
    pub fn with<R>(&self, f: impl FnOnce(&mut FakeChip) -> R) -> R {
        f(&mut self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, FakeChip> {
        self.chip.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Read for FakeAdapter {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut chip = self.lock();
        let count = buf.len().min(chip.output.len());
        for (slot, byte) in buf.iter_mut().zip(chip.output.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }
}

impl Write for FakeAdapter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.lock().receive(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn instructions_need_debug_mode() {
        let adapter = FakeAdapter::new(FakeChip::cc2541());
        let mut proxy = adapter.proxy();

        assert!(proxy.instr(&[opcodes::MOVX_A_DPTR]).is_err());
        proxy.enter().unwrap();
        assert!(proxy.instr(&[opcodes::MOVX_A_DPTR]).is_ok());
    }

    #[test]
    fn xdata_is_reachable_through_dptr() {
        let adapter = FakeAdapter::new(FakeChip::cc2541());
        let mut proxy = adapter.proxy();
        proxy.enter().unwrap();

        proxy.instri(opcodes::MOV_DPTR_IMM, 0x0200).unwrap();
        proxy.instr(&[opcodes::MOV_A_IMM, 0x5A]).unwrap();
        proxy.instr(&[opcodes::MOVX_DPTR_A]).unwrap();

        assert_eq!(adapter.with(|chip| chip.xdata(0x0200, 1).to_vec()), vec![0x5A]);
    }

    #[test]
    fn code_window_follows_memctr() {
        let adapter = FakeAdapter::new(FakeChip::cc2541());
        adapter.with(|chip| chip.flash_mut()[0x18000] = 0x42);
        let mut proxy = adapter.proxy();
        proxy.enter().unwrap();

        proxy
            .instr(&[opcodes::MOV_DIRECT_IMM, sfr::MEMCTR, 0x03])
            .unwrap();
        proxy.instri(opcodes::MOV_DPTR_IMM, 0x8000).unwrap();

        assert_eq!(proxy.instr(&[opcodes::MOVX_A_DPTR]).unwrap(), 0x42);
    }

    #[test]
    fn truncated_response_surfaces_as_eof() {
        let adapter = FakeAdapter::new(FakeChip::cc2541());
        adapter.with(|chip| chip.truncate_responses());
        let mut proxy = adapter.proxy();

        assert!(matches!(
            proxy.ping(),
            Err(crate::probe::DebugProbeError::Io(_))
        ));
    }
}
