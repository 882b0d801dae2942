use crate::probe::{CcProxy, DebugProbeError};

/// The opcodes the adapter uses to drive the debug interface of a chip family.
///
/// The adapter translates its generic commands (halt, resume, execute, ...)
/// into these chip specific debug commands, so the table has to match the
/// connected family before anything else is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstructionTable {
    pub version: u8,
    pub halt: u8,
    pub resume: u8,
    pub read_config: u8,
    pub write_config: u8,
    pub debug_instr_1: u8,
    pub debug_instr_2: u8,
    pub debug_instr_3: u8,
    pub get_chip_id: u8,
    pub get_pc: u8,
    pub read_status: u8,
    pub step_instr: u8,
    pub chip_erase: u8,
}

/// Table for the CC253x and CC254x chips. This is what the adapter starts with.
pub const CC254X_TABLE: InstructionTable = InstructionTable {
    version: 1,
    halt: 0x40,
    resume: 0x48,
    read_config: 0x20,
    write_config: 0x18,
    debug_instr_1: 0x51,
    debug_instr_2: 0x52,
    debug_instr_3: 0x53,
    get_chip_id: 0x68,
    get_pc: 0x28,
    read_status: 0x30,
    step_instr: 0x58,
    chip_erase: 0x10,
};

/// Table for the CC251x chips.
pub const CC2510_TABLE: InstructionTable = InstructionTable {
    version: 2,
    halt: 0x44,
    resume: 0x4C,
    read_config: 0x24,
    write_config: 0x1D,
    debug_instr_1: 0x55,
    debug_instr_2: 0x56,
    debug_instr_3: 0x57,
    get_chip_id: 0x68,
    get_pc: 0x28,
    read_status: 0x34,
    step_instr: 0x5C,
    chip_erase: 0x14,
};

impl InstructionTable {
    /// The opcodes in the order the adapter expects them.
    pub fn opcodes(&self) -> [u8; 12] {
        [
            self.halt,
            self.resume,
            self.read_config,
            self.write_config,
            self.debug_instr_1,
            self.debug_instr_2,
            self.debug_instr_3,
            self.get_chip_id,
            self.get_pc,
            self.read_status,
            self.step_instr,
            self.chip_erase,
        ]
    }

    /// Makes sure the adapter uses this table, uploading it if the adapter
    /// reports a different version or none at all.
    pub fn negotiate(
        &self,
        proxy: &mut CcProxy,
        current: Option<u8>,
    ) -> Result<(), DebugProbeError> {
        if current == Some(self.version) {
            tracing::debug!("Adapter already uses instruction table v{}", self.version);
            return Ok(());
        }

        proxy.update_instruction_table(self.version, &self.opcodes())?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::probe::fake_probe::{FakeAdapter, FakeChip};
    use pretty_assertions::assert_eq;

    #[test]
    fn upload_when_versions_differ() {
        let adapter = FakeAdapter::new(FakeChip::cc2510());
        let mut proxy = adapter.proxy();

        CC2510_TABLE.negotiate(&mut proxy, Some(1)).unwrap();

        let table = adapter.with(|chip| *chip.instruction_table());
        assert_eq!(table[0], 2);
        assert_eq!(&table[1..13], &CC2510_TABLE.opcodes());
        assert_eq!(&table[13..], &[0, 0, 0]);
        assert_eq!(proxy.instruction_table_version(), 2);
    }

    #[test]
    fn no_traffic_when_already_active() {
        let adapter = FakeAdapter::new(FakeChip::cc2541());
        let mut proxy = adapter.proxy();

        CC254X_TABLE.negotiate(&mut proxy, Some(1)).unwrap();

        assert_eq!(adapter.with(|chip| chip.frames()), 0);
    }

    #[test]
    fn unknown_version_forces_upload() {
        let adapter = FakeAdapter::new(FakeChip::cc2541());
        let mut proxy = adapter.proxy();

        CC254X_TABLE.negotiate(&mut proxy, None).unwrap();

        assert_eq!(adapter.with(|chip| chip.instruction_table()[0]), 1);
    }
}
