//! Sharing one display between threads
//!
//! [`SharedDisplay`] puts an [`EpdDisplay`] behind a lock so each operation
//! runs to completion before the next one starts. The thread holding the
//! lock is remembered: a nested call from inside
//! [`with`](SharedDisplay::with) fails instead of deadlocking.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;

use embedded_hal::delay::DelayNs;

use crate::command::Register;
use crate::display::{DeviceStatus, EpdDisplay};
use crate::error::{Error, Result};
use crate::mode::DisplayMode;
use crate::models::{GrayImage, PixelFormat, PowerState, Rotation};
use crate::traits::Transport;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// Clears the owner when `with` returns or unwinds
struct OwnerGuard<'a>(&'a Mutex<Option<ThreadId>>);

impl Drop for OwnerGuard<'_> {
    fn drop(&mut self) {
        *lock(self.0) = None;
    }
}

/// An [`EpdDisplay`] that can be used from several threads
///
/// The lock is not reentrant. A forwarding method called on the thread that
/// already holds it, for example from inside [`with`](SharedDisplay::with),
/// returns [`Error::InvalidParameter`] instead of deadlocking. To run
/// several operations as one, call them on the `&mut EpdDisplay` that
/// `with` hands out.
pub struct SharedDisplay<T, D> {
    display: Mutex<EpdDisplay<T, D>>,
    owner: Mutex<Option<ThreadId>>,
}

impl<T, D> SharedDisplay<T, D>
where
    T: Transport,
    D: DelayNs,
{
    /// Wraps `display`
    pub fn new(display: EpdDisplay<T, D>) -> Self {
        SharedDisplay {
            display: Mutex::new(display),
            owner: Mutex::new(None),
        }
    }

    /// Runs `f` with exclusive access to the display.
    ///
    /// Use it to run several operations without other threads getting in
    /// between. Calling back into this `SharedDisplay` from `f` returns an
    /// error.
    pub fn with<R>(&self, f: impl FnOnce(&mut EpdDisplay<T, D>) -> Result<R>) -> Result<R> {
        let current = thread::current().id();
        if *lock(&self.owner) == Some(current) {
            return Err(Error::InvalidParameter(
                "display is already in use further up on this thread".into(),
            ));
        }
        let mut display = lock(&self.display);
        *lock(&self.owner) = Some(current);
        let _owner = OwnerGuard(&self.owner);
        f(&mut display)
    }

    /// Gives the display back
    pub fn into_inner(self) -> EpdDisplay<T, D> {
        self.display
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// See [`EpdDisplay::init`]
    pub fn init(&self) -> Result<(u16, u16)> {
        self.with(|d| d.init())
    }

    /// See [`EpdDisplay::close`]
    pub fn close(&self) -> Result<()> {
        self.with(|d| {
            d.close();
            Ok(())
        })
    }

    /// See [`EpdDisplay::clear`]
    pub fn clear(&self, color: u8) -> Result<()> {
        self.with(|d| d.clear(color))
    }

    /// See [`EpdDisplay::display_image`]
    pub fn display_image(
        &self,
        image: &GrayImage<'_>,
        x: u16,
        y: u16,
        mode: DisplayMode,
        rotation: Rotation,
        format: PixelFormat,
    ) -> Result<()> {
        self.with(|d| d.display_image(image, x, y, mode, rotation, format))
    }

    /// See [`EpdDisplay::display_image_progressive`]
    pub fn display_image_progressive(
        &self,
        image: &GrayImage<'_>,
        x: u16,
        y: u16,
        mode: DisplayMode,
        format: PixelFormat,
        strip_height: Option<u16>,
    ) -> Result<()> {
        self.with(|d| d.display_image_progressive(image, x, y, mode, format, strip_height))
    }

    /// See [`EpdDisplay::display_partial`]
    pub fn display_partial(
        &self,
        image: &GrayImage<'_>,
        x: u16,
        y: u16,
        mode: Option<DisplayMode>,
    ) -> Result<()> {
        self.with(|d| d.display_partial(image, x, y, mode))
    }

    /// See [`EpdDisplay::set_vcom`]
    pub fn set_vcom(&self, voltage: f64) -> Result<()> {
        self.with(|d| d.set_vcom(voltage))
    }

    /// See [`EpdDisplay::get_vcom`]
    pub fn get_vcom(&self) -> Result<f64> {
        self.with(|d| d.get_vcom())
    }

    /// See [`EpdDisplay::sleep`]
    pub fn sleep(&self) -> Result<()> {
        self.with(|d| d.sleep())
    }

    /// See [`EpdDisplay::standby`]
    pub fn standby(&self) -> Result<()> {
        self.with(|d| d.standby())
    }

    /// See [`EpdDisplay::wake`]
    pub fn wake(&self) -> Result<()> {
        self.with(|d| d.wake())
    }

    /// See [`EpdDisplay::power_state`]
    pub fn power_state(&self) -> Result<PowerState> {
        self.with(|d| Ok(d.power_state()))
    }

    /// See [`EpdDisplay::set_auto_sleep_timeout`]
    pub fn set_auto_sleep_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.with(|d| d.set_auto_sleep_timeout(timeout))
    }

    /// See [`EpdDisplay::check_auto_sleep`]
    pub fn check_auto_sleep(&self) -> Result<()> {
        self.with(|d| d.check_auto_sleep())
    }

    /// See [`EpdDisplay::device_status`]
    pub fn device_status(&self) -> Result<DeviceStatus> {
        self.with(|d| d.device_status())
    }

    /// See [`EpdDisplay::dump_registers`]
    pub fn dump_registers(&self) -> Result<Vec<(Register, Option<u16>)>> {
        self.with(|d| d.dump_registers())
    }
}
