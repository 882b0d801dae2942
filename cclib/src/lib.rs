//! # Debugger library for TI CC25xx chips
//!
//! The chips are reached through a CCLib proxy: an Arduino running the CCLib
//! firmware, connected over a serial port, which drives the two-wire debug
//! interface of the chip.
//!
//! ## Flashing an image
//!
//! ```no_run
//! # use cclib::Error;
//! use cclib::chip::{attach, AttachOptions};
//! use cclib::flashing::WriteOptions;
//! use cclib::probe::{list, SerialConfig};
//!
//! let proxy = list::open(None, &SerialConfig::default())?;
//! let mut chip = attach(proxy, &AttachOptions { enter_debug: true, ..Default::default() })?;
//!
//! let image = cclib::image::load("firmware.hex".as_ref(), None)?;
//! chip.pause_dma(false)?;
//! for block in image.blocks() {
//!     chip.write_code(block.address(), block.data(), &WriteOptions::default())?;
//! }
//! # Ok::<(), Error>(())
//! ```
//!
//! The crate is built around the [`probe::CcProxy`] session, the
//! [`chip::ChipDriver`] trait and the [`image::MemoryImage`].

pub mod chip;
mod error;
pub mod flashing;
pub mod image;
pub mod probe;
pub mod vendor;

pub use crate::chip::{attach, AttachOptions, ChipDriver, ChipProfile};
pub use crate::error::{Error, ErrorClass};
pub use crate::probe::{CcProxy, DebugProbeError};
