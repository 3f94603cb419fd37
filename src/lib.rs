//! A protocol driver for ePaper panels behind the IT8951 controller
//!
//! This driver was built using [`embedded-hal`] traits.
//!
//! [`embedded-hal`]: https://docs.rs/embedded-hal/1.0
//!
//! # Requirements
//!
//! ### SPI
//!
//! - MISO has to be connected, the controller answers register and status reads
//! - SPI_MODE_0 is used (CPHL = 0, CPOL = 0)
//! - 8 bits per word, MSB first
//! - The HRDY line goes to the busy input, it is low while the controller is busy
//!
//! ### Layers
//!
//! - [`interface::SpiInterface`] frames words on the bus and implements [`traits::Transport`]
//! - [`retry::RetryTransport`] optionally wraps any transport with a retry policy
//! - [`controller::Controller`] speaks the command protocol
//! - [`display::EpdDisplay`] adds memory and alignment checks, ghosting
//!   protection and auto-sleep on top
//! - [`sync::SharedDisplay`] makes a display usable from several threads
//!
//! # Examples
//!
//! ```ignore
//! use epd_it8951::prelude::*;
//!
//! let interface = SpiInterface::new(spi, busy, rst, delay, None);
//! let config = DisplayConfig::new(-1.45)?;
//! let mut epd = EpdDisplay::new(interface, delay, config);
//!
//! let (width, height) = epd.init()?;
//!
//! let image = GrayImage::new(width, height, &pixels)?;
//! epd.display_image(&image, 0, 0, DisplayMode::Gc16, Rotation::Rotate0, PixelFormat::Bpp4)?;
//!
//! // fast black and white updates
//! epd.display_partial(&image, 0, 0, None)?;
//!
//! epd.sleep()?;
//! ```
//!
//!

pub mod alignment;
pub mod command;
pub mod controller;
pub mod display;
pub mod error;
pub mod guard;

/// Interface for the physical connection between display and the controlling device
pub mod interface;

pub mod mock;
pub mod mode;
pub mod models;
pub mod packing;
pub mod pool;
pub mod refresh;
pub mod retry;
pub mod sync;
pub mod traits;

pub mod prelude {
    pub use crate::controller::Controller;
    pub use crate::display::{DeviceStatus, DisplayConfig, EpdDisplay};
    pub use crate::error::{Error, ErrorKind};
    pub use crate::interface::SpiInterface;
    pub use crate::mode::DisplayMode;
    pub use crate::models::{GrayImage, PixelFormat, PowerState, Rotation};
    pub use crate::retry::{BackoffStrategy, RetryPolicy, RetryTransport};
    pub use crate::sync::SharedDisplay;
    pub use crate::traits::Transport;
    pub use crate::SPI_MODE;
}

use embedded_hal::spi::{Mode, Phase, Polarity};

/// SPI mode -
/// For more infos see [Requirements: SPI](index.html#spi)
pub const SPI_MODE: Mode = Mode {
    phase: Phase::CaptureOnFirstTransition,
    polarity: Polarity::IdleLow,
};
