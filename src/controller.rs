//! Command and register protocol of the IT8951
//!
//! # References
//!
//! - [Display mode declaration](https://www.waveshare.com/w/upload/c/c4/E-paper-mode-declaration.pdf)
//! - [Waveshare C driver](https://github.com/waveshare/IT8951-ePaper/blob/master/Raspberry/lib/e-Paper/EPD_IT8951.c)
//!
//! Loading an image is a handshake: start a load, write one or more bursts
//! of pixel data, end the load, then trigger a refresh. [`Controller`]
//! tracks where in that handshake it is and rejects out of order calls
//! before anything goes out on the bus.

use embedded_hal::delay::DelayNs;
use log::{debug, info};

use crate::command::{
    self, split_address, Command, I80Control, MiscStatus, Register, VcomAccess,
    DEVICE_INFO_WORDS, ENHANCED_DRIVING_VALUE, LISAR_HIGH_OFFSET,
};
use crate::error::{Error, Result};
use crate::models::{
    AreaImageInfo, DeviceInfo, DisplayArea, LoadImageInfo, PowerState, VcomConfig,
};
use crate::traits::{Command as _, Transport};

/// Bound of the wait for a refresh to finish
pub const DISPLAY_TIMEOUT_MS: u32 = 30_000;
/// Interval the LUT busy flag is sampled at while waiting for a refresh
pub const DISPLAY_POLL_MS: u32 = 10;

/// Position in the image load handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadPhase {
    /// No load in progress
    #[default]
    Ready,
    /// `LD_IMG`/`LD_IMG_AREA` sent, no data yet
    LoadStarted,
    /// At least one burst written
    LoadWriting,
    /// `LD_IMG_END` sent, the area can be displayed
    LoadEnded,
}

/// Protocol level driver for the IT8951
///
/// Owns the [`Transport`] and a delay used while polling the LUT busy flag.
/// Everything except [`init`](Controller::init) and
/// [`close`](Controller::close) needs a successful `init()` first.
pub struct Controller<T, D> {
    transport: T,
    delay: D,
    device_info: Option<DeviceInfo>,
    power_state: PowerState,
    phase: LoadPhase,
}

impl<T, D> Controller<T, D>
where
    T: Transport,
    D: DelayNs,
{
    /// Creates a controller. Nothing is sent until [`init`](Controller::init).
    pub fn new(transport: T, delay: D) -> Self {
        Controller {
            transport,
            delay,
            device_info: None,
            power_state: PowerState::Active,
            phase: LoadPhase::Ready,
        }
    }

    /// Brings the controller up and reads its device info.
    ///
    /// Runs the system, reads the 20-word info block and enables packed
    /// writes. A second call returns the cached info without bus traffic.
    /// On failure the controller is closed again and the cause is wrapped
    /// in [`Error::Initialization`].
    pub fn init(&mut self) -> Result<DeviceInfo> {
        if let Some(info) = &self.device_info {
            return Ok(info.clone());
        }
        match self.bring_up() {
            Ok(info) => {
                info!(
                    "IT8951 ready: {}x{} panel, firmware {}, LUT {}",
                    info.panel_width, info.panel_height, info.fw_version, info.lut_version
                );
                self.device_info = Some(info.clone());
                Ok(info)
            }
            Err(e) => {
                self.close();
                Err(Error::init_failed(e))
            }
        }
    }

    fn bring_up(&mut self) -> Result<DeviceInfo> {
        self.transport.init()?;
        self.system_run()?;
        let info = self.read_device_info()?;
        self.enable_packed_write()?;
        Ok(info)
    }

    /// Closes the transport and forgets all cached state
    pub fn close(&mut self) {
        self.transport.close();
        self.device_info = None;
        self.power_state = PowerState::Active;
        self.phase = LoadPhase::Ready;
    }

    /// Whether `init()` succeeded and `close()` wasn't called since
    pub fn is_initialized(&self) -> bool {
        self.device_info.is_some()
    }

    /// The cached device info
    pub fn device_info(&self) -> Result<&DeviceInfo> {
        self.device_info.as_ref().ok_or_else(Error::not_initialized)
    }

    /// The power state last commanded
    pub fn power_state(&self) -> PowerState {
        self.power_state
    }

    /// Current position in the image load handshake
    pub fn phase(&self) -> LoadPhase {
        self.phase
    }

    /// The underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(Error::not_initialized())
        }
    }

    fn ensure_phase(&self, allowed: &[LoadPhase], operation: &str) -> Result<()> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(Error::InvalidParameter(format!(
                "{operation} not allowed in load phase {:?}",
                self.phase
            )))
        }
    }

    /// Basic function for sending [Commands](Command).
    fn command(&mut self, command: Command) -> Result<()> {
        self.transport.write_command(command.address())
    }

    /// Basic function for sending [Commands](Command) and the data belonging to it.
    fn cmd_with_data(&mut self, command: Command, data: &[u16]) -> Result<()> {
        self.command(command)?;
        for &word in data {
            self.transport.write_data(word)?;
        }
        Ok(())
    }

    fn system_run(&mut self) -> Result<()> {
        self.command(Command::SysRun)?;
        self.power_state = PowerState::Active;
        Ok(())
    }

    fn read_device_info(&mut self) -> Result<DeviceInfo> {
        self.command(Command::GetDeviceInfo)?;
        let words = self.transport.read_data_bulk(DEVICE_INFO_WORDS)?;
        let info = DeviceInfo::from_words(&words)?;
        debug!("device info: {info:?}");
        Ok(info)
    }

    fn enable_packed_write(&mut self) -> Result<()> {
        let value = self.read_raw(Register::Reg0204.address())?;
        self.write_raw(
            Register::Reg0204.address(),
            I80Control(value).enable_packed_write().0,
        )
    }

    fn read_raw(&mut self, address: u16) -> Result<u16> {
        self.cmd_with_data(Command::RegRead, &[address])?;
        self.transport.read_data()
    }

    fn write_raw(&mut self, address: u16, value: u16) -> Result<()> {
        self.cmd_with_data(Command::RegWrite, &[address, value])
    }

    /// Reads a 16-bit register
    pub fn read_register(&mut self, address: u16) -> Result<u16> {
        self.ensure_initialized()?;
        self.read_raw(address)
    }

    /// Writes a 16-bit register
    pub fn write_register(&mut self, address: u16, value: u16) -> Result<()> {
        self.ensure_initialized()?;
        self.write_raw(address, value)
    }

    /// Reads every register of [`Register::ALL`]. Registers that fail to
    /// read are reported as `None` instead of failing the dump.
    pub fn dump_registers(&mut self) -> Result<Vec<(Register, Option<u16>)>> {
        self.ensure_initialized()?;
        Ok(Register::ALL
            .iter()
            .map(|&register| {
                let value = self.read_raw(register.address());
                if let Err(e) = &value {
                    debug!("register {} unreadable: {e}", register.name());
                }
                (register, value.ok())
            })
            .collect())
    }

    /// Whether a refresh is still running
    pub fn check_lut_busy(&mut self) -> Result<bool> {
        self.ensure_initialized()?;
        Ok(MiscStatus(self.read_raw(Register::Misc.address())?).lut_busy())
    }

    /// Whether packed writes are enabled, `init()` turns them on
    pub fn verify_packed_write_enabled(&mut self) -> Result<bool> {
        self.ensure_initialized()?;
        Ok(I80Control(self.read_raw(Register::Reg0204.address())?).packed_write())
    }

    /// The load target address currently held in LISAR
    pub fn get_memory_address(&mut self) -> Result<u32> {
        self.ensure_initialized()?;
        let low = self.read_raw(Register::Lisar.address())?;
        let high = self.read_raw(Register::Lisar.address() + LISAR_HIGH_OFFSET)?;
        Ok(command::combine_address(low, high))
    }

    /// Points LISAR at `address`
    pub fn set_target_memory_addr(&mut self, address: u32) -> Result<()> {
        self.ensure_initialized()?;
        let (low, high) = split_address(address);
        self.write_raw(Register::Lisar.address(), low)?;
        self.write_raw(Register::Lisar.address() + LISAR_HIGH_OFFSET, high)
    }

    /// Stops the clocks, registers are kept
    pub fn standby(&mut self) -> Result<()> {
        self.ensure_initialized()?;
        self.command(Command::Standby)?;
        self.power_state = PowerState::Standby;
        Ok(())
    }

    /// Puts the controller into its deepest power state
    pub fn sleep(&mut self) -> Result<()> {
        self.ensure_initialized()?;
        self.command(Command::Sleep)?;
        self.power_state = PowerState::Sleep;
        Ok(())
    }

    /// Resumes from [`standby`](Controller::standby) or [`sleep`](Controller::sleep)
    pub fn wake(&mut self) -> Result<()> {
        self.ensure_initialized()?;
        self.system_run()
    }

    /// Strengthens the panel drive signal. Helps against blurry output on
    /// long FPC cables
    pub fn enhance_driving_capability(&mut self) -> Result<()> {
        self.ensure_initialized()?;
        self.write_raw(Register::EnhanceDriving.address(), ENHANCED_DRIVING_VALUE)
    }

    /// Whether the enhanced driving value is set
    pub fn is_enhanced_driving_enabled(&mut self) -> Result<bool> {
        self.ensure_initialized()?;
        Ok(self.read_raw(Register::EnhanceDriving.address())? == ENHANCED_DRIVING_VALUE)
    }

    /// Reads the VCOM voltage in volts
    pub fn get_vcom(&mut self) -> Result<f64> {
        self.ensure_initialized()?;
        self.cmd_with_data(Command::Vcom, &[VcomAccess::Read as u16])?;
        Ok(VcomConfig::voltage_from_raw(self.transport.read_data()?))
    }

    /// Sets the VCOM voltage, `voltage` has to be within -5.0V to -0.2V
    pub fn set_vcom(&mut self, voltage: f64) -> Result<()> {
        self.ensure_initialized()?;
        let vcom = VcomConfig::new(voltage)?;
        self.cmd_with_data(Command::Vcom, &[VcomAccess::Write as u16, vcom.raw()])
    }

    /// Starts a full frame load at `info.target_memory_addr`
    pub fn load_image_start(&mut self, info: &LoadImageInfo<'_>) -> Result<()> {
        self.ensure_initialized()?;
        self.ensure_phase(&[LoadPhase::Ready, LoadPhase::LoadEnded], "load_image_start")?;
        self.set_target_memory_addr(info.target_memory_addr)?;
        self.cmd_with_data(
            Command::LoadImage,
            &[
                info.endian_type as u16,
                info.pixel_format.wire_value(),
                info.rotation as u16,
                0,
                0,
            ],
        )?;
        self.phase = LoadPhase::LoadStarted;
        Ok(())
    }

    /// Starts a load into the rectangle `area`
    pub fn load_image_area_start(
        &mut self,
        info: &LoadImageInfo<'_>,
        area: &AreaImageInfo,
    ) -> Result<()> {
        self.ensure_initialized()?;
        self.ensure_phase(
            &[LoadPhase::Ready, LoadPhase::LoadEnded],
            "load_image_area_start",
        )?;
        self.set_target_memory_addr(info.target_memory_addr)?;
        self.cmd_with_data(
            Command::LoadImageArea,
            &[
                info.endian_type as u16,
                info.pixel_format.wire_value(),
                info.rotation as u16,
                area.x,
                area.y,
                area.width,
                area.height,
            ],
        )?;
        self.phase = LoadPhase::LoadStarted;
        Ok(())
    }

    /// Writes packed pixel bytes as big endian words, an odd trailing byte
    /// is padded with zero
    pub fn load_image_write(&mut self, data: &[u8]) -> Result<()> {
        let words: Vec<u16> = data
            .chunks(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair.get(1).copied().unwrap_or(0)]))
            .collect();
        self.load_image_write_words(&words)
    }

    /// Writes pixel data that is already in words
    pub fn load_image_write_words(&mut self, words: &[u16]) -> Result<()> {
        self.ensure_initialized()?;
        self.ensure_phase(
            &[LoadPhase::LoadStarted, LoadPhase::LoadWriting],
            "load_image_write",
        )?;
        if words.is_empty() {
            return Err(Error::InvalidParameter("image data cannot be empty".into()));
        }
        self.command(Command::MemBurstWrite)?;
        self.transport.write_data_bulk(words)?;
        self.phase = LoadPhase::LoadWriting;
        Ok(())
    }

    /// Closes the load
    pub fn load_image_end(&mut self) -> Result<()> {
        self.ensure_initialized()?;
        self.ensure_phase(&[LoadPhase::LoadWriting], "load_image_end")?;
        self.command(Command::LoadImageEnd)?;
        self.phase = LoadPhase::LoadEnded;
        Ok(())
    }

    fn validate_display_area(&self, area: &DisplayArea) -> Result<()> {
        let info = self.device_info()?;
        if u32::from(area.x) + u32::from(area.width) > u32::from(info.panel_width)
            || u32::from(area.y) + u32::from(area.height) > u32::from(info.panel_height)
        {
            return Err(Error::InvalidParameter(format!(
                "area {}x{} at ({}, {}) exceeds the {}x{} panel",
                area.width, area.height, area.x, area.y, info.panel_width, info.panel_height
            )));
        }
        Ok(())
    }

    /// Refreshes `area` from the image buffer, optionally waiting for the
    /// refresh to finish
    pub fn display_area(&mut self, area: &DisplayArea, wait: bool) -> Result<()> {
        self.ensure_initialized()?;
        self.ensure_phase(&[LoadPhase::Ready, LoadPhase::LoadEnded], "display_area")?;
        self.validate_display_area(area)?;
        self.cmd_with_data(
            Command::DisplayArea,
            &[area.x, area.y, area.width, area.height, area.mode.wire_value()],
        )?;
        self.phase = LoadPhase::Ready;
        if wait {
            self.wait_display_ready()?;
        }
        Ok(())
    }

    /// Refreshes `area` from the buffer at `address`
    pub fn display_buffer_area(
        &mut self,
        area: &DisplayArea,
        address: u32,
        wait: bool,
    ) -> Result<()> {
        self.ensure_initialized()?;
        self.ensure_phase(
            &[LoadPhase::Ready, LoadPhase::LoadEnded],
            "display_buffer_area",
        )?;
        self.validate_display_area(area)?;
        let (low, high) = split_address(address);
        self.cmd_with_data(
            Command::DisplayBufferArea,
            &[
                area.x,
                area.y,
                area.width,
                area.height,
                area.mode.wire_value(),
                low,
                high,
            ],
        )?;
        self.phase = LoadPhase::Ready;
        if wait {
            self.wait_display_ready()?;
        }
        Ok(())
    }

    /// Polls the LUT busy flag until the refresh is done
    fn wait_display_ready(&mut self) -> Result<()> {
        let mut waited_ms = 0;
        loop {
            if !MiscStatus(self.read_raw(Register::Misc.address())?).lut_busy() {
                return Ok(());
            }
            if waited_ms >= DISPLAY_TIMEOUT_MS {
                return Err(Error::Timeout {
                    operation: "display refresh",
                    timeout_ms: DISPLAY_TIMEOUT_MS,
                });
            }
            self.delay.delay_ms(DISPLAY_POLL_MS);
            waited_ms += DISPLAY_POLL_MS;
        }
    }
}
