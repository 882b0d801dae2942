//! Debug status and debug configuration registers as reported by the adapter.

use bitfield::bitfield;

bitfield! {
    /// The 8-bit debug status register of the chip.
    #[derive(Clone, Copy, PartialEq, Eq, Default)]
    pub struct DebugStatus(u8);
    impl Debug;
    pub chip_erase_busy, _: 7;
    pub pcon_idle, _: 6;
    pub cpu_halted, _: 5;
    pub pm_active, _: 4;
    pub halt_status, _: 3;
    pub debug_locked, _: 2;
    pub oscillator_stable, _: 1;
    pub stack_overflow, _: 0;
}

impl From<u8> for DebugStatus {
    fn from(raw: u8) -> Self {
        DebugStatus(raw)
    }
}

impl From<DebugStatus> for u8 {
    fn from(status: DebugStatus) -> Self {
        status.0
    }
}

impl DebugStatus {
    /// Named flags in register order, most significant bit first.
    pub fn flags(&self) -> [(&'static str, bool); 8] {
        [
            ("CHIP_ERASE_BUSY", self.chip_erase_busy()),
            ("PCON_IDLE", self.pcon_idle()),
            ("CPU_HALTED", self.cpu_halted()),
            ("PM_ACTIVE", self.pm_active()),
            ("HALT_STATUS", self.halt_status()),
            ("DEBUG_LOCKED", self.debug_locked()),
            ("OSCILLATOR_STABLE", self.oscillator_stable()),
            ("STACK_OVERFLOW", self.stack_overflow()),
        ]
    }
}

bitfield! {
    /// The 8-bit debug configuration register of the chip.
    #[derive(Clone, Copy, PartialEq, Eq, Default)]
    pub struct DebugConfig(u8);
    impl Debug;
    pub soft_power_mode, set_soft_power_mode: 4;
    pub timers_off, set_timers_off: 3;
    pub dma_pause, set_dma_pause: 2;
    pub timer_suspend, set_timer_suspend: 1;
}

impl From<u8> for DebugConfig {
    fn from(raw: u8) -> Self {
        DebugConfig(raw)
    }
}

impl From<DebugConfig> for u8 {
    fn from(config: DebugConfig) -> Self {
        config.0
    }
}

impl DebugConfig {
    /// Named flags in register order, most significant bit first.
    pub fn flags(&self) -> [(&'static str, bool); 4] {
        [
            ("SOFT_POWER_MODE", self.soft_power_mode()),
            ("TIMERS_OFF", self.timers_off()),
            ("DMA_PAUSE", self.dma_pause()),
            ("TIMER_SUSPEND", self.timer_suspend()),
        ]
    }
}
