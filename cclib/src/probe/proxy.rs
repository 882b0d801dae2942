use super::commands::{Command, Status, INSTRUCTION_TABLE_LEN, MAX_BURST_LEN};
use super::{AdapterError, DebugConfig, DebugProbeError, DebugStatus, Transport};
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};
use std::time::Duration;

/// Interval between two polls of a busy bit.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(10);

const DEFAULT_BAUD_RATE: u32 = 115_200;

const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(3);

/// Line settings used when opening the serial port of the adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub baud_rate: u32,
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: DEFAULT_RECV_TIMEOUT,
        }
    }
}

/// A decoded response frame.
///
/// This is the non-raising view of a response: adapter errors are values here
/// and callers decide whether to propagate them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer {
    /// `OK` with the 16-bit payload `(high << 8) | low`.
    Value(u16),
    /// `READY`, the adapter waits for a burst payload.
    Ready,
    /// `ERROR` with the code from the low byte.
    Error(AdapterError),
}

impl Answer {
    /// The answer in the classic integer encoding: the payload for `OK`,
    /// `0x03` for `READY` and the negated error code for `ERROR`.
    pub fn to_raw(self) -> i32 {
        match self {
            Answer::Value(value) => i32::from(value),
            Answer::Ready => Status::Ready as i32,
            Answer::Error(error) => -i32::from(error.code()),
        }
    }
}

/// A session with a CCLib proxy adapter.
///
/// The proxy exclusively owns the serial link for its lifetime. It caches the
/// most recent debug status, debug configuration, chip ID and instruction
/// table version as reported by the adapter; those caches are only ever
/// updated from response frames.
pub struct CcProxy {
    port: Box<dyn Transport>,
    port_name: String,
    chip_id: u16,
    debug_status: DebugStatus,
    debug_config: DebugConfig,
    instruction_table_version: u8,
}

impl fmt::Debug for CcProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CcProxy")
            .field("port_name", &self.port_name)
            .field("chip_id", &format_args!("{:#06x}", self.chip_id))
            .field("debug_status", &self.debug_status)
            .field("debug_config", &self.debug_config)
            .field("instruction_table_version", &self.instruction_table_version)
            .finish()
    }
}

impl CcProxy {
    /// Wraps an already opened byte stream. No traffic is generated.
    pub fn new(port: Box<dyn Transport>, port_name: impl Into<String>) -> Self {
        Self {
            port,
            port_name: port_name.into(),
            chip_id: 0,
            debug_status: DebugStatus::default(),
            debug_config: DebugConfig::default(),
            instruction_table_version: 0,
        }
    }

    /// Opens the given serial port and makes sure a proxy answers on it.
    pub fn open(port_name: &str, config: &SerialConfig) -> Result<Self, DebugProbeError> {
        let port = serialport::new(port_name, config.baud_rate)
            .timeout(config.timeout)
            .open()
            .map_err(|source| DebugProbeError::CouldNotOpen {
                port: port_name.to_string(),
                source,
            })?;

        let mut proxy = CcProxy::new(Box::new(port), port_name);
        proxy.ping().map_err(|error| {
            tracing::debug!("Ping on {} failed: {}", port_name, error);
            DebugProbeError::NotFound(port_name.to_string())
        })?;

        tracing::debug!("Found CCLib proxy on {}", port_name);
        Ok(proxy)
    }

    /// Name of the serial port this proxy talks through.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Chip ID as last reported by the adapter.
    pub fn chip_id(&self) -> u16 {
        self.chip_id
    }

    /// Debug status as last reported by the adapter.
    pub fn debug_status(&self) -> DebugStatus {
        self.debug_status
    }

    /// Debug configuration as last reported by the adapter.
    pub fn debug_config(&self) -> DebugConfig {
        self.debug_config
    }

    /// Instruction table version as last reported by the adapter.
    pub fn instruction_table_version(&self) -> u8 {
        self.instruction_table_version
    }

    /// Sends one command frame and decodes the response without turning
    /// adapter errors into `Err`.
    pub fn exchange(
        &mut self,
        command: Command,
        b1: u8,
        b2: u8,
        b3: u8,
    ) -> Result<Answer, DebugProbeError> {
        tracing::trace!(
            "Command: {:?} [{:#04x}, {:#04x}, {:#04x}]",
            command,
            b1,
            b2,
            b3
        );

        self.port.write_all(&[command as u8, b1, b2, b3])?;
        self.port.flush()?;

        self.read_answer(command)
    }

    /// Sends one command frame and returns the 16-bit payload.
    ///
    /// `READY` is passed through as `0x0003`.
    pub fn send_frame(
        &mut self,
        command: Command,
        b1: u8,
        b2: u8,
        b3: u8,
    ) -> Result<u16, DebugProbeError> {
        match self.exchange(command, b1, b2, b3)? {
            Answer::Value(value) => Ok(value),
            Answer::Ready => Ok(Status::Ready as u16),
            Answer::Error(error) => Err(error.into()),
        }
    }

    fn command(&mut self, command: Command) -> Result<u16, DebugProbeError> {
        self.send_frame(command, 0, 0, 0)
    }

    fn read_answer(&mut self, command: Command) -> Result<Answer, DebugProbeError> {
        let mut frame = [0u8; 3];
        self.port.read_exact(&mut frame)?;

        let [status, high, low] = frame;
        let value = u16::from_be_bytes([high, low]);
        tracing::trace!("Response to {:?}: {:02x?}", command, frame);

        match Status::from_u8(status) {
            Some(Status::Ok) => {
                self.update_cache(command, value);
                Ok(Answer::Value(value))
            }
            Some(Status::Ready) => Ok(Answer::Ready),
            Some(Status::Error) => Ok(Answer::Error(AdapterError::from_code(low))),
            None => Err(DebugProbeError::UnknownStatus(status)),
        }
    }

    /// The single place where the session caches change.
    fn update_cache(&mut self, command: Command, value: u16) {
        if command.returns_status() {
            self.debug_status = DebugStatus::from(value as u8);
        }

        match command {
            Command::ReadConfig => self.debug_config = DebugConfig::from(value as u8),
            Command::ChipId => self.chip_id = value,
            Command::InstructionTableVersion | Command::UpdateInstructionTable => {
                self.instruction_table_version = value as u8
            }
            _ => (),
        }
    }

    /// Checks that the adapter answers.
    pub fn ping(&mut self) -> Result<(), DebugProbeError> {
        self.command(Command::Ping)?;
        Ok(())
    }

    /// Halts the CPU and enters debug mode.
    pub fn enter(&mut self) -> Result<u16, DebugProbeError> {
        self.command(Command::Enter)
    }

    /// Leaves debug mode and lets the CPU run.
    pub fn exit(&mut self) -> Result<DebugStatus, DebugProbeError> {
        self.command(Command::Exit)?;
        Ok(self.debug_status)
    }

    pub fn read_config(&mut self) -> Result<DebugConfig, DebugProbeError> {
        self.command(Command::ReadConfig)?;
        Ok(self.debug_config)
    }

    /// Writes the debug configuration and reads it back from the adapter.
    pub fn write_config(&mut self, config: DebugConfig) -> Result<DebugStatus, DebugProbeError> {
        self.send_frame(Command::WriteConfig, config.into(), 0, 0)?;
        let status = self.debug_status;

        let applied = self.read_config()?;
        tracing::debug!("Debug config is now {:?}", applied);
        Ok(status)
    }

    /// Executes the instruction at the current program counter.
    ///
    /// Returns the accumulator.
    pub fn step(&mut self) -> Result<u8, DebugProbeError> {
        Ok(self.command(Command::Step)? as u8)
    }

    pub fn resume(&mut self) -> Result<u16, DebugProbeError> {
        self.command(Command::Resume)
    }

    pub fn halt(&mut self) -> Result<u16, DebugProbeError> {
        self.command(Command::Halt)
    }

    pub fn read_chip_id(&mut self) -> Result<u16, DebugProbeError> {
        self.command(Command::ChipId)?;
        Ok(self.chip_id)
    }

    pub fn read_status(&mut self) -> Result<DebugStatus, DebugProbeError> {
        self.command(Command::Status)?;
        Ok(self.debug_status)
    }

    pub fn read_pc(&mut self) -> Result<u16, DebugProbeError> {
        self.command(Command::Pc)
    }

    /// Executes a 1, 2 or 3 byte instruction on the halted CPU.
    ///
    /// Returns the accumulator after execution.
    pub fn instr(&mut self, instruction: &[u8]) -> Result<u8, DebugProbeError> {
        let value = match *instruction {
            [op] => self.send_frame(Command::Exec1, op, 0, 0)?,
            [op, arg] => self.send_frame(Command::Exec2, op, arg, 0)?,
            [op, arg1, arg2] => self.send_frame(Command::Exec3, op, arg1, arg2)?,
            _ => return Err(DebugProbeError::InvalidInstructionLength(instruction.len())),
        };

        Ok(value as u8)
    }

    /// Executes a one byte opcode followed by a 16-bit immediate.
    pub fn instri(&mut self, op: u8, immediate: u16) -> Result<u8, DebugProbeError> {
        let [high, low] = immediate.to_be_bytes();
        self.instr(&[op, high, low])
    }

    /// Reads the instruction table version from the adapter.
    pub fn read_instruction_table_version(&mut self) -> Result<u8, DebugProbeError> {
        self.command(Command::InstructionTableVersion)?;
        Ok(self.instruction_table_version)
    }

    /// Like [`CcProxy::read_instruction_table_version`], but an adapter that
    /// refuses the request yields `None` instead of an error.
    pub fn probe_instruction_table_version(&mut self) -> Result<Option<u8>, DebugProbeError> {
        match self.exchange(Command::InstructionTableVersion, 0, 0, 0)? {
            Answer::Value(version) => Ok(Some(version as u8)),
            Answer::Ready => Err(DebugProbeError::UnexpectedResponse {
                command: Command::InstructionTableVersion,
                value: Status::Ready as u16,
            }),
            Answer::Error(error) => {
                tracing::debug!("Adapter refused instruction table version query: {}", error);
                Ok(None)
            }
        }
    }

    /// Replaces the opcode table the adapter uses to translate the generic
    /// debug commands for the chip.
    pub fn update_instruction_table(
        &mut self,
        version: u8,
        opcodes: &[u8],
    ) -> Result<u8, DebugProbeError> {
        if opcodes.len() >= INSTRUCTION_TABLE_LEN {
            return Err(DebugProbeError::InstructionTableTooLarge(opcodes.len()));
        }

        let mut table = [0u8; INSTRUCTION_TABLE_LEN];
        table[0] = version;
        table[1..=opcodes.len()].copy_from_slice(opcodes);

        self.expect_ready(Command::UpdateInstructionTable, 0, 0)?;

        self.port.write_all(&table)?;
        self.port.flush()?;

        let confirmed = self.expect_value(Command::UpdateInstructionTable)?;
        if confirmed != u16::from(version) {
            return Err(DebugProbeError::InstructionTableMismatch {
                expected: version,
                actual: confirmed,
            });
        }

        tracing::debug!("Instruction table updated to version {}", version);
        Ok(version)
    }

    /// Streams up to 2048 bytes into the debug data register.
    pub fn burst_write(&mut self, data: &[u8]) -> Result<DebugStatus, DebugProbeError> {
        if data.len() > MAX_BURST_LEN {
            return Err(DebugProbeError::BurstTooLarge(data.len()));
        }

        let [high, low] = (data.len() as u16).to_be_bytes();
        self.expect_ready(Command::BurstWrite, high, low)?;

        self.port.write_all(data)?;
        self.port.flush()?;

        self.expect_value(Command::BurstWrite)?;
        Ok(self.debug_status)
    }

    /// Erases the whole chip and waits until the erase completed.
    pub fn chip_erase(&mut self) -> Result<DebugStatus, DebugProbeError> {
        self.enter()?;
        self.command(Command::ChipErase)?;

        while self.read_status()?.chip_erase_busy() {
            std::thread::sleep(POLL_INTERVAL);
        }

        Ok(self.debug_status)
    }

    fn expect_ready(&mut self, command: Command, b1: u8, b2: u8) -> Result<(), DebugProbeError> {
        match self.exchange(command, b1, b2, 0)? {
            Answer::Ready => Ok(()),
            Answer::Value(value) => Err(DebugProbeError::UnexpectedResponse { command, value }),
            Answer::Error(error) => Err(error.into()),
        }
    }

    fn expect_value(&mut self, command: Command) -> Result<u16, DebugProbeError> {
        match self.read_answer(command)? {
            Answer::Value(value) => Ok(value),
            Answer::Ready => Err(DebugProbeError::UnexpectedResponse {
                command,
                value: Status::Ready as u16,
            }),
            Answer::Error(error) => Err(error.into()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::io::{Read, Write};
    use std::sync::{Arc, Mutex};

    /// Replays canned response bytes and records everything written.
    struct Script {
        replies: VecDeque<u8>,
        written: Arc<Mutex<Vec<u8>>>,
    }

    impl Read for Script {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let mut count = 0;
            while count < buf.len() {
                let Some(byte) = self.replies.pop_front() else {
                    break;
                };
                buf[count] = byte;
                count += 1;
            }
            Ok(count)
        }
    }

    impl Write for Script {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn scripted(replies: &[u8]) -> (CcProxy, Arc<Mutex<Vec<u8>>>) {
        let written = Arc::new(Mutex::new(vec![]));
        let script = Script {
            replies: replies.iter().copied().collect(),
            written: written.clone(),
        };
        (CcProxy::new(Box::new(script), "scripted"), written)
    }

    #[test]
    fn ok_frame_yields_big_endian_payload() {
        let (mut proxy, written) = scripted(&[0x01, 0x8D, 0x03]);

        assert_eq!(proxy.read_chip_id().unwrap(), 0x8D03);
        assert_eq!(proxy.chip_id(), 0x8D03);
        assert_eq!(*written.lock().unwrap(), vec![0x03, 0, 0, 0]);
    }

    #[test]
    fn not_in_debug_mode_is_distinct_from_not_responding() {
        let (mut proxy, _) = scripted(&[0x02, 0x00, 0x02, 0x02, 0x00, 0x03]);

        let first = proxy.instr(&[0xE0]).unwrap_err();
        let second = proxy.instr(&[0xE0]).unwrap_err();

        assert!(matches!(
            first,
            DebugProbeError::Adapter(AdapterError::NotInDebugMode)
        ));
        assert!(matches!(
            second,
            DebugProbeError::Adapter(AdapterError::ChipNotResponding)
        ));
    }

    #[test]
    fn non_raising_exchange_reports_negated_code() {
        let (mut proxy, _) = scripted(&[0x02, 0x00, 0x02]);

        let answer = proxy.exchange(Command::Exec1, 0xE0, 0, 0).unwrap();

        assert_eq!(answer, Answer::Error(AdapterError::NotInDebugMode));
        assert_eq!(answer.to_raw(), -2);
    }

    #[test]
    fn unknown_status_is_a_protocol_error() {
        let (mut proxy, _) = scripted(&[0x7E, 0x00, 0x00]);

        assert!(matches!(
            proxy.ping(),
            Err(DebugProbeError::UnknownStatus(0x7E))
        ));
    }

    #[test]
    fn short_read_is_an_io_error() {
        let (mut proxy, _) = scripted(&[0x01, 0x00]);

        match proxy.read_pc() {
            Err(DebugProbeError::Io(e)) => {
                assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof)
            }
            other => panic!("expected I/O error, got {other:?}"),
        }
    }

    #[test]
    fn status_cache_follows_adapter() {
        let (mut proxy, _) = scripted(&[0x01, 0x00, 0x20, 0x01, 0x00, 0xB2]);

        assert!(proxy.read_status().unwrap().cpu_halted());
        assert!(!proxy.exit().unwrap().cpu_halted());
        assert_eq!(u8::from(proxy.debug_status()), 0xB2);
    }

    #[test]
    fn instri_splits_immediate() {
        let (mut proxy, written) = scripted(&[0x01, 0x00, 0x42]);

        assert_eq!(proxy.instri(0x90, 0x780E).unwrap(), 0x42);
        assert_eq!(*written.lock().unwrap(), vec![0x09, 0x90, 0x78, 0x0E]);
    }

    #[test]
    fn step_returns_the_accumulator() {
        let (mut proxy, written) = scripted(&[0x01, 0x00, 0x5A]);

        assert_eq!(proxy.step().unwrap(), 0x5A);
        assert_eq!(*written.lock().unwrap(), vec![0x06, 0, 0, 0]);
    }

    #[test]
    fn instr_rejects_empty_instruction() {
        let (mut proxy, written) = scripted(&[]);

        assert!(matches!(
            proxy.instr(&[]),
            Err(DebugProbeError::InvalidInstructionLength(0))
        ));
        assert!(written.lock().unwrap().is_empty());
    }

    #[test]
    fn burst_write_waits_for_ready() {
        let (mut proxy, written) = scripted(&[0x03, 0x00, 0x00, 0x01, 0x00, 0x22]);

        let status = proxy.burst_write(&[0xAA, 0xBB, 0xCC]).unwrap();

        assert_eq!(u8::from(status), 0x22);
        assert_eq!(
            *written.lock().unwrap(),
            vec![0x0A, 0x00, 0x03, 0x00, 0xAA, 0xBB, 0xCC]
        );
    }

    #[test]
    fn burst_write_without_ready_fails() {
        let (mut proxy, written) = scripted(&[0x01, 0x00, 0x00]);

        assert!(matches!(
            proxy.burst_write(&[0x01]),
            Err(DebugProbeError::UnexpectedResponse {
                command: Command::BurstWrite,
                ..
            })
        ));
        assert_eq!(written.lock().unwrap().len(), 4);
    }

    #[test]
    fn burst_write_rejects_oversized_payload() {
        let (mut proxy, _) = scripted(&[]);

        assert!(matches!(
            proxy.burst_write(&[0u8; 2049]),
            Err(DebugProbeError::BurstTooLarge(2049))
        ));
    }

    #[test]
    fn instruction_table_is_padded_and_confirmed() {
        let (mut proxy, written) = scripted(&[0x03, 0x00, 0x00, 0x01, 0x00, 0x02]);

        proxy.update_instruction_table(2, &[0x44, 0x4C]).unwrap();

        let mut expected = vec![0xF2, 0, 0, 0, 0x02, 0x44, 0x4C];
        expected.extend_from_slice(&[0u8; 13]);
        assert_eq!(*written.lock().unwrap(), expected);
        assert_eq!(proxy.instruction_table_version(), 2);
    }

    #[test]
    fn instruction_table_mismatch_is_fatal() {
        let (mut proxy, _) = scripted(&[0x03, 0x00, 0x00, 0x01, 0x00, 0x01]);

        assert!(matches!(
            proxy.update_instruction_table(2, &[0x44]),
            Err(DebugProbeError::InstructionTableMismatch {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn refused_version_query_is_not_an_error() {
        let (mut proxy, _) = scripted(&[0x02, 0x00, 0x01]);

        assert_eq!(proxy.probe_instruction_table_version().unwrap(), None);
    }
}
