//! DMA channel setup.
//!
//! Flash programming moves data with two DMA channels: channel 0 copies the
//! burst written through the debug interface into RAM, channel 1 feeds that
//! RAM into the flash controller.

use crate::chip::registers::{sfr, xdata};
use crate::chip::ChipDriver;
use crate::probe::{DebugProbeError, POLL_INTERVAL};

/// DMA trigger raised by a debug burst write.
pub const TRIGGER_DEBUG_BURST: u8 = 0x1F;
/// DMA trigger raised by the flash controller.
pub const TRIGGER_FLASH: u8 = 0x12;

/// One 8-byte DMA configuration record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaDescriptor {
    pub source: u16,
    pub destination: u16,
    pub variable_len: u8,
    pub transfer_len: u16,
    pub word_size: bool,
    pub transfer_mode: u8,
    pub trigger: u8,
    pub source_increment: u8,
    pub destination_increment: u8,
    pub interrupt: bool,
    /// Use all 8 bits of the first byte for the transfer count.
    pub m8: bool,
    pub priority: u8,
}

impl DmaDescriptor {
    /// A single byte transfer without increments.
    pub fn new(source: u16, destination: u16, trigger: u8) -> Self {
        Self {
            source,
            destination,
            variable_len: 0,
            transfer_len: 1,
            word_size: false,
            transfer_mode: 0,
            trigger,
            source_increment: 0,
            destination_increment: 0,
            interrupt: false,
            m8: true,
            priority: 0,
        }
    }

    /// Debug data register to the staging RAM.
    pub fn burst_to_ram(len: u16) -> Self {
        Self {
            transfer_len: len,
            destination_increment: 1,
            interrupt: true,
            priority: 1,
            ..Self::new(xdata::DBGDATA, xdata::STAGING_RAM, TRIGGER_DEBUG_BURST)
        }
    }

    /// Staging RAM to the flash write data register.
    pub fn ram_to_flash(len: u16) -> Self {
        Self {
            transfer_len: len,
            source_increment: 1,
            interrupt: true,
            priority: 2,
            ..Self::new(xdata::STAGING_RAM, xdata::FWDATA, TRIGGER_FLASH)
        }
    }

    pub fn to_bytes(&self) -> [u8; 8] {
        let [source_high, source_low] = self.source.to_be_bytes();
        let [destination_high, destination_low] = self.destination.to_be_bytes();

        [
            source_high,
            source_low,
            destination_high,
            destination_low,
            (self.variable_len & 0x07) << 5 | ((self.transfer_len >> 8) & 0x1F) as u8,
            (self.transfer_len & 0xFF) as u8,
            u8::from(self.word_size) << 7
                | (self.transfer_mode & 0x03) << 5
                | (self.trigger & 0x1F),
            (self.source_increment & 0x03) << 6
                | (self.destination_increment & 0x03) << 4
                | u8::from(self.interrupt) << 3
                | u8::from(!self.m8) << 2
                | (self.priority & 0x03),
        ]
    }
}

fn descriptor_address(index: u8) -> u16 {
    xdata::DMA_DESCRIPTORS + u16::from(index) * 8
}

/// Stores `descriptor` and points the channel configuration registers at it.
///
/// Channels 1 to 4 share one configuration register pair pointing to
/// consecutive descriptors, starting with channel 1.
pub fn configure_channel<D: ChipDriver + ?Sized>(
    driver: &mut D,
    index: u8,
    descriptor: &DmaDescriptor,
) -> Result<(), DebugProbeError> {
    let address = descriptor_address(index);
    driver.write_xdata(address, &descriptor.to_bytes())?;

    if index == 0 {
        let [high, low] = address.to_be_bytes();
        driver.set_register(sfr::DMA0CFGL, low)?;
        driver.set_register(sfr::DMA0CFGH, high)?;
    } else {
        let [high, low] = descriptor_address(1).to_be_bytes();
        driver.set_register(sfr::DMA1CFGL, low)?;
        driver.set_register(sfr::DMA1CFGH, high)?;
    }

    tracing::debug!("DMA channel {} configured: {:?}", index, descriptor);
    Ok(())
}

/// Reads back the raw descriptor of a channel.
pub fn channel_config<D: ChipDriver + ?Sized>(
    driver: &mut D,
    index: u8,
) -> Result<[u8; 8], DebugProbeError> {
    let raw = driver.read_xdata(descriptor_address(index), 8)?;
    let mut descriptor = [0u8; 8];
    descriptor.copy_from_slice(&raw);
    Ok(descriptor)
}

pub fn set_source<D: ChipDriver + ?Sized>(
    driver: &mut D,
    index: u8,
    source: u16,
) -> Result<(), DebugProbeError> {
    driver.write_xdata(descriptor_address(index), &source.to_be_bytes())?;
    Ok(())
}

pub fn set_destination<D: ChipDriver + ?Sized>(
    driver: &mut D,
    index: u8,
    destination: u16,
) -> Result<(), DebugProbeError> {
    driver.write_xdata(descriptor_address(index) + 2, &destination.to_be_bytes())?;
    Ok(())
}

/// Arms a channel and gives it time to settle.
pub fn arm_channel<D: ChipDriver + ?Sized>(
    driver: &mut D,
    index: u8,
) -> Result<(), DebugProbeError> {
    let armed = driver.get_register(sfr::DMAARM)?;
    driver.set_register(sfr::DMAARM, armed | (1 << index))?;
    std::thread::sleep(POLL_INTERVAL);
    Ok(())
}

pub fn disarm_channel<D: ChipDriver + ?Sized>(
    driver: &mut D,
    index: u8,
) -> Result<(), DebugProbeError> {
    let armed = driver.get_register(sfr::DMAARM)?;
    driver.set_register(sfr::DMAARM, armed & !(1 << index))?;
    Ok(())
}

pub fn is_armed<D: ChipDriver + ?Sized>(
    driver: &mut D,
    index: u8,
) -> Result<bool, DebugProbeError> {
    Ok(driver.get_register(sfr::DMAARM)? & (1 << index) != 0)
}

/// Whether the channel raised its transfer complete flag.
pub fn is_irq<D: ChipDriver + ?Sized>(
    driver: &mut D,
    index: u8,
) -> Result<bool, DebugProbeError> {
    Ok(driver.get_register(sfr::DMAIRQ)? & (1 << index) != 0)
}

pub fn clear_irq<D: ChipDriver + ?Sized>(
    driver: &mut D,
    index: u8,
) -> Result<(), DebugProbeError> {
    let irq = driver.get_register(sfr::DMAIRQ)?;
    driver.set_register(sfr::DMAIRQ, irq & !(1 << index))?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::chip::{attach, AttachOptions};
    use crate::probe::fake_probe::{FakeAdapter, FakeChip};
    use pretty_assertions::assert_eq;

    #[test]
    fn channels_arm_independently() {
        let adapter = FakeAdapter::new(FakeChip::cc2541());
        let options = AttachOptions {
            enter_debug: true,
            ..Default::default()
        };
        let mut driver = attach(adapter.proxy(), &options).unwrap();

        arm_channel(driver.as_mut(), 1).unwrap();
        assert!(is_armed(driver.as_mut(), 1).unwrap());
        assert!(!is_armed(driver.as_mut(), 0).unwrap());

        disarm_channel(driver.as_mut(), 1).unwrap();
        assert!(!is_armed(driver.as_mut(), 1).unwrap());
    }

    #[test]
    fn source_and_destination_patch_the_stored_descriptor() {
        let adapter = FakeAdapter::new(FakeChip::cc2541());
        let options = AttachOptions {
            enter_debug: true,
            ..Default::default()
        };
        let mut driver = attach(adapter.proxy(), &options).unwrap();

        configure_channel(driver.as_mut(), 1, &DmaDescriptor::ram_to_flash(0x40)).unwrap();
        set_source(driver.as_mut(), 1, 0x0A00).unwrap();
        set_destination(driver.as_mut(), 1, 0x70C0).unwrap();

        assert_eq!(
            channel_config(driver.as_mut(), 1).unwrap(),
            [0x0A, 0x00, 0x70, 0xC0, 0x00, 0x40, 0x12, 0x4A]
        );
        assert_eq!(
            channel_config(driver.as_mut(), 0).unwrap(),
            [0x00; 8]
        );
    }

    #[test]
    fn burst_descriptor_layout() {
        assert_eq!(
            DmaDescriptor::burst_to_ram(0x800).to_bytes(),
            [0x62, 0x60, 0x00, 0x00, 0x08, 0x00, 0x1F, 0x19]
        );
    }

    #[test]
    fn flash_descriptor_layout() {
        assert_eq!(
            DmaDescriptor::ram_to_flash(0x123).to_bytes(),
            [0x00, 0x00, 0x62, 0x73, 0x01, 0x23, 0x12, 0x4A]
        );
    }

    #[test]
    fn flags_pack_into_the_last_two_bytes() {
        let descriptor = DmaDescriptor {
            variable_len: 0x07,
            transfer_len: 0x1FFF,
            word_size: true,
            transfer_mode: 0x03,
            m8: false,
            priority: 0x03,
            ..DmaDescriptor::new(0xABCD, 0x1234, 0x3F)
        };

        assert_eq!(
            descriptor.to_bytes(),
            [0xAB, 0xCD, 0x12, 0x34, 0xFF, 0xFF, 0xFF, 0x07]
        );
    }
}
