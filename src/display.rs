//! High level display API
//!
//! [`EpdDisplay`] composes the protocol [`Controller`] with the host side
//! checks: memory limits, alignment, refresh mode advice, ghosting
//! protection and auto-sleep. Images are plain 8-bit grayscale frames, see
//! [`GrayImage`].
//!
//! # Example
//!
//! ```
//! use epd_it8951::prelude::*;
//! use epd_it8951::mock::MockTransport;
//! # struct NoDelay;
//! # impl embedded_hal::delay::DelayNs for NoDelay { fn delay_ns(&mut self, _: u32) {} }
//!
//! # fn main() -> Result<(), epd_it8951::error::Error> {
//! let transport = MockTransport::new();
//! transport.queue_device_info(800, 600);
//! let config = DisplayConfig::new(-2.0)?;
//! let mut epd = EpdDisplay::new(transport, NoDelay, config);
//!
//! let (width, height) = epd.init()?;
//! let pixels = vec![0x80; 64 * 64];
//! let image = GrayImage::new(64, 64, &pixels)?;
//! epd.display_image(&image, 0, 0, DisplayMode::Gc16, Rotation::Rotate0, PixelFormat::Bpp4)?;
//! epd.sleep()?;
//! # assert_eq!((width, height), (800, 600));
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use embedded_hal::delay::DelayNs;
use log::{info, warn};

use crate::alignment::{align_coordinate, align_dimension, validate_alignment};
use crate::command::Register;
use crate::controller::Controller;
use crate::error::{Error, Result};
use crate::guard::{check_bounds, plan_strips, MemoryLimits, DEFAULT_STRIP_HEIGHT};
use crate::mode::DisplayMode;
use crate::models::{
    AreaImageInfo, DeviceInfo, DisplayArea, GrayImage, LoadImageInfo, PixelFormat, PowerState,
    Rotation, VcomConfig,
};
use crate::packing::{packed_len, PixelCodec, DEFAULT_BULK_THRESHOLD};
use crate::pool::BufferPool;
use crate::refresh::{RefreshAdvice, RefreshCounter, DEFAULT_A2_REFRESH_LIMIT};
use crate::traits::Transport;

/// Controller memory the frames are loaded into
pub const IMAGE_BUFFER_ADDRESS: u32 = 0x0012_36E0;
/// White
pub const DEFAULT_CLEAR_COLOR: u8 = 0xFF;
/// Largest accepted difference between the requested and the read back VCOM
pub const VCOM_TOLERANCE: f64 = 0.05;

/// Settings of an [`EpdDisplay`]
#[derive(Debug, Clone)]
pub struct DisplayConfig {
    vcom: VcomConfig,
    a2_refresh_limit: u32,
    enhance_driving: bool,
    memory_limits: MemoryLimits,
    strip_height: u16,
    bulk_threshold: usize,
    pool: Arc<BufferPool>,
}

impl DisplayConfig {
    /// Defaults for everything but the VCOM voltage, which differs per
    /// panel and is printed on its FPC cable
    pub fn new(vcom: f64) -> Result<Self> {
        Ok(DisplayConfig {
            vcom: VcomConfig::new(vcom)?,
            a2_refresh_limit: DEFAULT_A2_REFRESH_LIMIT,
            enhance_driving: false,
            memory_limits: MemoryLimits::default(),
            strip_height: DEFAULT_STRIP_HEIGHT,
            bulk_threshold: DEFAULT_BULK_THRESHOLD,
            pool: Arc::new(BufferPool::default()),
        })
    }

    /// A2 refreshes before a clear is forced, 0 disables the protection
    pub fn with_a2_refresh_limit(mut self, limit: u32) -> Self {
        self.a2_refresh_limit = limit;
        self
    }

    /// Enables enhanced driving during `init()`
    pub fn with_enhanced_driving(mut self, enable: bool) -> Self {
        self.enhance_driving = enable;
        self
    }

    /// Replaces the memory limits
    pub fn with_memory_limits(mut self, limits: MemoryLimits) -> Self {
        self.memory_limits = limits;
        self
    }

    /// Default strip height of progressive transfers
    pub fn with_strip_height(mut self, strip_height: u16) -> Self {
        self.strip_height = strip_height;
        self
    }

    /// Sample count from which packing takes the bulk path
    pub fn with_bulk_threshold(mut self, threshold: usize) -> Self {
        self.bulk_threshold = threshold;
        self
    }

    /// Shares an existing buffer pool
    pub fn with_pool(mut self, pool: Arc<BufferPool>) -> Self {
        self.pool = pool;
        self
    }

    /// The configured VCOM voltage
    pub fn vcom(&self) -> f64 {
        self.vcom.voltage()
    }
}

/// Snapshot returned by [`EpdDisplay::device_status`]
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceStatus {
    /// Panel width in pixels
    pub panel_width: u16,
    /// Panel height in pixels
    pub panel_height: u16,
    /// Image buffer address reported by the controller
    pub memory_address: u32,
    /// Firmware version
    pub fw_version: String,
    /// LUT version
    pub lut_version: String,
    /// Power state last commanded
    pub power_state: PowerState,
    /// VCOM voltage in use
    pub vcom: f64,
    /// A2 refreshes since the last clear
    pub a2_refresh_count: u32,
    /// A2 refresh limit
    pub a2_refresh_limit: u32,
    /// Auto-sleep timeout
    pub auto_sleep_timeout: Option<Duration>,
    /// Whether the enhanced driving register is set
    pub enhanced_driving: bool,
}

// Image rows drawn into a white canvas covering `area`, starting at
// canvas position (`column`, `row`)
struct Patch {
    source_row: u16,
    rows: u16,
    column: u16,
    row: u16,
    area: AreaImageInfo,
}

/// ePaper display behind an IT8951
pub struct EpdDisplay<T, D> {
    controller: Controller<T, D>,
    config: DisplayConfig,
    codec: PixelCodec,
    refresh: RefreshCounter,
    vcom: f64,
    auto_sleep_timeout: Option<Duration>,
    last_activity: Instant,
}

impl<T, D> EpdDisplay<T, D>
where
    T: Transport,
    D: DelayNs,
{
    /// Creates the display. Nothing is sent until [`init`](EpdDisplay::init).
    pub fn new(transport: T, delay: D, config: DisplayConfig) -> Self {
        EpdDisplay {
            controller: Controller::new(transport, delay),
            codec: PixelCodec::new(config.bulk_threshold),
            refresh: RefreshCounter::new(config.a2_refresh_limit),
            vcom: config.vcom.voltage(),
            config,
            auto_sleep_timeout: None,
            last_activity: Instant::now(),
        }
    }

    /// Initializes the controller, sets VCOM and clears the panel to white.
    ///
    /// Returns the panel size. Calling it again only returns the size.
    pub fn init(&mut self) -> Result<(u16, u16)> {
        if self.controller.is_initialized() {
            return self.size();
        }
        let info = self.controller.init()?;
        self.set_vcom(self.config.vcom.voltage())?;
        if self.config.enhance_driving {
            self.controller.enhance_driving_capability()?;
        }
        self.clear(DEFAULT_CLEAR_COLOR)?;
        info!(
            "display initialized: {}x{}, VCOM {}V",
            info.panel_width, info.panel_height, self.vcom
        );
        Ok((info.panel_width, info.panel_height))
    }

    /// Closes the transport. An active display with auto-sleep enabled is
    /// put to sleep first.
    pub fn close(&mut self) {
        if self.auto_sleep_timeout.is_some()
            && self.controller.is_initialized()
            && self.controller.power_state() == PowerState::Active
        {
            if let Err(e) = self.controller.sleep() {
                warn!("failed to put the display to sleep before closing: {e}");
            }
        }
        self.controller.close();
    }

    /// Panel width and height
    pub fn size(&self) -> Result<(u16, u16)> {
        let info = self.controller.device_info()?;
        Ok((info.panel_width, info.panel_height))
    }

    /// The device info read during `init()`
    pub fn device_info(&self) -> Result<&DeviceInfo> {
        self.controller.device_info()
    }

    /// The underlying protocol controller
    pub fn controller(&mut self) -> &mut Controller<T, D> {
        &mut self.controller
    }

    /// The power state last commanded
    pub fn power_state(&self) -> PowerState {
        self.controller.power_state()
    }

    /// A2 refreshes since the last clear
    pub fn a2_refresh_count(&self) -> u32 {
        self.refresh.count()
    }

    /// The configured A2 refresh limit
    pub fn a2_refresh_limit(&self) -> u32 {
        self.refresh.limit()
    }

    /// Changes the A2 refresh limit, 0 disables the protection. The count
    /// so far is kept.
    pub fn set_a2_refresh_limit(&mut self, limit: u32) {
        self.refresh.set_limit(limit);
    }

    /// The VCOM voltage in use
    pub fn vcom(&self) -> f64 {
        self.vcom
    }

    fn begin_operation(&mut self) -> Result<()> {
        self.controller.device_info()?;
        self.check_auto_sleep()?;
        self.last_activity = Instant::now();
        Ok(())
    }

    /// Fills the whole panel with `color` and refreshes it in INIT mode.
    /// This removes all ghosting and restarts the A2 count.
    pub fn clear(&mut self, color: u8) -> Result<()> {
        self.begin_operation()?;
        self.fill_panel(color)?;
        self.refresh.reset();
        Ok(())
    }

    fn fill_panel(&mut self, color: u8) -> Result<()> {
        let (width, height) = self.size()?;
        let format = PixelFormat::Bpp4;
        self.config
            .memory_limits
            .check_transfer(u32::from(width), u32::from(height), format)?;

        let pool = Arc::clone(&self.config.pool);
        let nibble = color >> 4;
        let samples = usize::from(width) * usize::from(height);
        let packed = pool.bytes(packed_len(samples, format), Some(nibble << 4 | nibble));

        let info = LoadImageInfo::new(&packed, IMAGE_BUFFER_ADDRESS)?.with_pixel_format(format);
        self.controller.load_image_start(&info)?;
        self.controller.load_image_write(&packed)?;
        self.controller.load_image_end()?;

        let area = DisplayArea::new(0, 0, width, height, DisplayMode::Init)?;
        self.controller.display_area(&area, true)
    }

    // Logs the advice and runs the clear it asks for. The refresh itself is
    // counted once it went through.
    fn prepare_refresh(&mut self, mode: DisplayMode) -> Result<()> {
        match self.refresh.advise(mode) {
            RefreshAdvice::Proceed => Ok(()),
            RefreshAdvice::Approaching { count, limit } => {
                warn!(
                    "A2 refresh count ({count}) approaching limit ({limit}). \
                     Next A2 refresh will trigger auto-clear"
                );
                Ok(())
            }
            RefreshAdvice::ClearFirst => {
                info!("A2 refresh limit reached, clearing the panel");
                self.fill_panel(DEFAULT_CLEAR_COLOR)
            }
        }
    }

    fn warn_advisories(
        mode: DisplayMode,
        format: PixelFormat,
        x: u16,
        y: u16,
        width: u16,
        height: u16,
    ) {
        for note in mode.advisories(format) {
            warn!("{note}");
        }
        for message in validate_alignment(x, y, width, height, format).messages() {
            warn!("{message}");
        }
    }

    fn aligned_u16(value: u32) -> Result<u16> {
        u16::try_from(value).map_err(|_| {
            Error::InvalidParameter(format!("aligned dimension {value} out of range"))
        })
    }

    // Rounds `start` down to the granule and returns it with the offset of
    // `start` inside the span and the span length. The span covers
    // `length` pixels from `start` and ends at the panel edge at the latest.
    fn aligned_span(
        start: u16,
        length: u16,
        panel: u16,
        format: PixelFormat,
    ) -> Result<(u16, u16, u16)> {
        let aligned = align_coordinate(start, format);
        let offset = start - aligned;
        let covered = align_dimension(offset.saturating_add(length), format)
            .min(u32::from(panel.saturating_sub(aligned)));
        Ok((aligned, offset, Self::aligned_u16(covered)?))
    }

    // Packs a white canvas covering `patch.area` with the image rows of the
    // patch copied in at its column and row, then runs the load handshake
    fn load_padded(
        &mut self,
        image: &GrayImage<'_>,
        patch: &Patch,
        format: PixelFormat,
        rotation: Rotation,
    ) -> Result<()> {
        let pool = Arc::clone(&self.config.pool);
        let area = patch.area;
        let canvas_width = usize::from(area.width);
        let image_width = usize::from(image.width());
        let lines = image.rows(patch.source_row, patch.rows);
        let packed = if patch.column == 0
            && patch.row == 0
            && canvas_width == image_width
            && patch.rows == area.height
        {
            self.codec.pack(lines, format)
        } else {
            let mut canvas = pool.array::<u8>(
                &[usize::from(area.height), canvas_width],
                Some(DEFAULT_CLEAR_COLOR),
            );
            let column = usize::from(patch.column);
            for (row, line) in lines.chunks(image_width).enumerate() {
                let start = (usize::from(patch.row) + row) * canvas_width + column;
                canvas[start..start + image_width].copy_from_slice(line);
            }
            self.codec.pack(&canvas, format)
        };

        let info = LoadImageInfo::new(&packed, IMAGE_BUFFER_ADDRESS)?
            .with_pixel_format(format)
            .with_rotation(rotation);
        self.controller.load_image_area_start(&info, &area)?;
        self.controller.load_image_write(&packed)?;
        self.controller.load_image_end()
    }

    /// Shows `image` with its top left corner at (`x`, `y`).
    ///
    /// The area is aligned to the granule of `format`: the origin is
    /// rounded down and the image is drawn at its requested position inside
    /// a white area that ends on the next granule, or at the panel edge.
    /// `rotation` is applied by the controller while loading.
    /// Modes and formats that don't go well together are logged but not
    /// rejected. Nothing is sent if the image doesn't fit.
    pub fn display_image(
        &mut self,
        image: &GrayImage<'_>,
        x: u16,
        y: u16,
        mode: DisplayMode,
        rotation: Rotation,
        format: PixelFormat,
    ) -> Result<()> {
        self.begin_operation()?;
        let (width, height) = (image.width(), image.height());
        self.config
            .memory_limits
            .check_transfer(u32::from(width), u32::from(height), format)?;
        let (panel_width, panel_height) = self.size()?;
        check_bounds(
            x,
            y,
            u32::from(width),
            u32::from(height),
            (panel_width, panel_height),
        )?;
        let (area_x, column, area_width) = Self::aligned_span(x, width, panel_width, format)?;
        let (area_y, row, area_height) = Self::aligned_span(y, height, panel_height, format)?;
        let patch = Patch {
            source_row: 0,
            rows: height,
            column,
            row,
            area: AreaImageInfo::new(area_x, area_y, area_width, area_height)?,
        };
        let display_area = DisplayArea::new(area_x, area_y, area_width, area_height, mode)?;
        Self::warn_advisories(mode, format, x, y, width, height);

        self.prepare_refresh(mode)?;
        self.load_padded(image, &patch, format, rotation)?;
        self.controller.display_area(&display_area, true)?;
        self.refresh.commit(mode);
        Ok(())
    }

    /// Like [`display_image`](EpdDisplay::display_image) but transfers
    /// and refreshes the image in horizontal strips of about
    /// `strip_height` rows, the configured height if `None`.
    ///
    /// Strips are loaded unrotated. The memory limits apply per strip and
    /// the A2 count goes up once for the whole image.
    pub fn display_image_progressive(
        &mut self,
        image: &GrayImage<'_>,
        x: u16,
        y: u16,
        mode: DisplayMode,
        format: PixelFormat,
        strip_height: Option<u16>,
    ) -> Result<()> {
        self.begin_operation()?;
        let (width, height) = (image.width(), image.height());
        let (panel_width, panel_height) = self.size()?;
        check_bounds(
            x,
            y,
            u32::from(width),
            u32::from(height),
            (panel_width, panel_height),
        )?;
        let (area_x, column, area_width) = Self::aligned_span(x, width, panel_width, format)?;
        let area_y = align_coordinate(y, format);
        let offset = y - area_y;

        // Strips are cut from the aligned rows, the first one starts with
        // `offset` rows of padding
        let strips = plan_strips(
            area_y,
            offset.saturating_add(height),
            format,
            strip_height.unwrap_or(self.config.strip_height),
        );
        let mut plan = Vec::with_capacity(strips.len());
        for strip in strips {
            let area_height = Self::aligned_u16(
                u32::from(strip.aligned_height)
                    .min(u32::from(panel_height.saturating_sub(strip.y))),
            )?;
            self.config.memory_limits.check_transfer(
                u32::from(area_width),
                u32::from(area_height),
                format,
            )?;
            let first = strip.source_row.max(offset);
            let end = strip.source_row + strip.rows;
            let patch = Patch {
                source_row: first - offset,
                rows: end - first,
                column,
                row: first - strip.source_row,
                area: AreaImageInfo::new(area_x, strip.y, area_width, area_height)?,
            };
            let display_area = DisplayArea::new(area_x, strip.y, area_width, area_height, mode)?;
            plan.push((patch, display_area));
        }
        Self::warn_advisories(mode, format, x, y, width, height);

        self.prepare_refresh(mode)?;
        for (patch, display_area) in &plan {
            self.load_padded(image, patch, format, Rotation::Rotate0)?;
            self.controller.display_area(display_area, true)?;
        }
        self.refresh.commit(mode);
        Ok(())
    }

    /// Updates a region in a fast mode, [`DisplayMode::Du`] if `mode` is `None`
    pub fn display_partial(
        &mut self,
        image: &GrayImage<'_>,
        x: u16,
        y: u16,
        mode: Option<DisplayMode>,
    ) -> Result<()> {
        self.display_image(
            image,
            x,
            y,
            mode.unwrap_or(DisplayMode::Du),
            Rotation::Rotate0,
            PixelFormat::Bpp4,
        )
    }

    /// Sets VCOM and reads it back. If the controller reports a value more
    /// than [`VCOM_TOLERANCE`] away, a warning is logged and the reported
    /// value is used from then on.
    pub fn set_vcom(&mut self, voltage: f64) -> Result<()> {
        self.controller.set_vcom(voltage)?;
        let requested = VcomConfig::new(voltage)?.voltage();
        let actual = self.controller.get_vcom()?;
        if (actual - requested).abs() > VCOM_TOLERANCE {
            warn!(
                "VCOM mismatch detected! Requested: {requested}V, Actual: {actual}V. \
                 Consider using {actual}V in your configuration"
            );
            self.vcom = actual;
        } else {
            self.vcom = requested;
        }
        Ok(())
    }

    /// Reads the VCOM voltage from the controller
    pub fn get_vcom(&mut self) -> Result<f64> {
        self.controller.get_vcom()
    }

    /// Puts the controller to sleep
    pub fn sleep(&mut self) -> Result<()> {
        self.controller.sleep()
    }

    /// Puts the controller into standby
    pub fn standby(&mut self) -> Result<()> {
        self.controller.standby()
    }

    /// Wakes the controller up
    pub fn wake(&mut self) -> Result<()> {
        self.controller.wake()?;
        self.last_activity = Instant::now();
        Ok(())
    }

    /// Sleeps automatically after `timeout` without display operations.
    /// `None` disables it, a zero timeout is rejected.
    pub fn set_auto_sleep_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        if timeout == Some(Duration::ZERO) {
            return Err(Error::InvalidParameter(
                "auto-sleep timeout must be positive".into(),
            ));
        }
        self.auto_sleep_timeout = timeout;
        self.last_activity = Instant::now();
        Ok(())
    }

    /// Puts an active display to sleep once the auto-sleep timeout passed.
    ///
    /// Every display operation calls this first, it can also be called
    /// from an idle loop.
    pub fn check_auto_sleep(&mut self) -> Result<()> {
        let Some(timeout) = self.auto_sleep_timeout else {
            return Ok(());
        };
        if self.controller.is_initialized()
            && self.controller.power_state() == PowerState::Active
            && self.last_activity.elapsed() >= timeout
        {
            info!("no activity for {timeout:?}, going to sleep");
            self.controller.sleep()?;
        }
        Ok(())
    }

    /// Whether the enhanced driving register is set
    pub fn is_enhanced_driving_enabled(&mut self) -> Result<bool> {
        self.controller.is_enhanced_driving_enabled()
    }

    /// Register values for debugging
    pub fn dump_registers(&mut self) -> Result<Vec<(Register, Option<u16>)>> {
        self.controller.dump_registers()
    }

    /// Snapshot of the device info and the runtime state
    pub fn device_status(&mut self) -> Result<DeviceStatus> {
        let enhanced_driving = self.controller.is_enhanced_driving_enabled()?;
        let info = self.controller.device_info()?;
        Ok(DeviceStatus {
            panel_width: info.panel_width,
            panel_height: info.panel_height,
            memory_address: info.memory_address(),
            fw_version: info.fw_version.clone(),
            lut_version: info.lut_version.clone(),
            power_state: self.controller.power_state(),
            vcom: self.vcom,
            a2_refresh_count: self.refresh.count(),
            a2_refresh_limit: self.refresh.limit(),
            auto_sleep_timeout: self.auto_sleep_timeout,
            enhanced_driving,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::mock::{BusCall, MockTransport};
    use crate::retry::{RetryPolicy, RetryTransport};
    use embedded_hal_mock::eh1::delay::NoopDelay;

    const DPY_AREA: u16 = 0x0034;
    const LD_IMG_AREA: u16 = 0x0021;

    // Device info, then REG_0204 and the VCOM read back of init
    fn script_init(mock: &MockTransport, width: u16, height: u16) {
        mock.queue_device_info(width, height);
        mock.queue_replies(&[0x0000, 2000]);
    }

    type TestDisplay = EpdDisplay<MockTransport, NoopDelay>;

    fn display(config: DisplayConfig) -> (TestDisplay, MockTransport) {
        let mock = MockTransport::new();
        script_init(&mock, 800, 600);
        (EpdDisplay::new(mock.clone(), NoopDelay::new(), config), mock)
    }

    fn ready_display(config: DisplayConfig) -> (TestDisplay, MockTransport) {
        let (mut epd, mock) = display(config);
        epd.init().unwrap();
        mock.clear_calls();
        (epd, mock)
    }

    fn config() -> DisplayConfig {
        DisplayConfig::new(-2.0).unwrap()
    }

    // (x, y, w, h, mode) of every display trigger
    fn triggers(calls: &[BusCall]) -> Vec<[u16; 5]> {
        calls
            .iter()
            .enumerate()
            .filter(|(_, c)| **c == BusCall::Command(DPY_AREA))
            .map(|(i, _)| {
                let mut args = [0; 5];
                for (slot, call) in args.iter_mut().zip(&calls[i + 1..i + 6]) {
                    if let BusCall::Data(word) = call {
                        *slot = *word;
                    }
                }
                args
            })
            .collect()
    }

    #[test]
    fn init_reports_size_and_clears_once() {
        let (mut epd, mock) = display(config());
        assert_eq!(epd.init().unwrap(), (800, 600));

        let calls = mock.calls();
        assert_eq!(triggers(&calls), vec![[0, 0, 800, 600, 0]]);
        assert!(calls.contains(&BusCall::Data(2000)));
        assert_eq!(epd.vcom(), -2.0);

        mock.clear_calls();
        assert_eq!(epd.init().unwrap(), (800, 600));
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn clear_sends_packed_fill() {
        let (mut epd, mock) = ready_display(config());
        epd.clear(0x00).unwrap();
        let calls = mock.calls();
        let bulk = calls
            .iter()
            .find_map(|c| match c {
                BusCall::DataBulk(words) => Some(words.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(bulk.len(), 800 * 600 / 4);
        assert!(bulk.iter().all(|&w| w == 0x0000));
    }

    #[test]
    fn oversized_image_fails_before_any_write() {
        let (mut epd, mock) = ready_display(config());
        let pixels = vec![0u8; 3000 * 3000];
        let image = GrayImage::new(3000, 3000, &pixels).unwrap();
        let err = epd
            .display_image(&image, 0, 0, DisplayMode::Gc16, Rotation::Rotate0, PixelFormat::Bpp8)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Memory);
        assert_eq!(mock.write_count(), 0);
    }

    #[test]
    fn image_outside_panel_rejected() {
        let (mut epd, mock) = ready_display(config());
        let pixels = vec![0u8; 100 * 100];
        let image = GrayImage::new(100, 100, &pixels).unwrap();
        let err = epd
            .display_image(&image, 750, 0, DisplayMode::Gc16, Rotation::Rotate0, PixelFormat::Bpp4)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        assert_eq!(mock.write_count(), 0);
    }

    #[test]
    fn misaligned_image_is_padded() {
        let (mut epd, mock) = ready_display(config());
        let pixels = vec![0u8; 10 * 10];
        let image = GrayImage::new(10, 10, &pixels).unwrap();
        epd.display_image(&image, 6, 2, DisplayMode::Gc16, Rotation::Rotate90, PixelFormat::Bpp4)
            .unwrap();

        let calls = mock.calls();
        let start = calls
            .iter()
            .position(|c| *c == BusCall::Command(LD_IMG_AREA))
            .unwrap();
        assert_eq!(
            &calls[start + 1..start + 8],
            &[
                BusCall::Data(0),
                BusCall::Data(2),
                BusCall::Data(1),
                BusCall::Data(4),
                BusCall::Data(0),
                BusCall::Data(12),
                BusCall::Data(12),
            ]
        );
        let bulk = calls
            .iter()
            .find_map(|c| match c {
                BusCall::DataBulk(words) => Some(words.clone()),
                _ => None,
            })
            .unwrap();
        // 12x12 at 4bpp, two white rows and columns ahead of the image
        assert_eq!(bulk.len(), 36);
        assert!(bulk[..6].iter().all(|&w| w == 0xFFFF));
        assert_eq!(&bulk[6..9], &[0xFF00, 0x0000, 0x0000]);
        assert_eq!(triggers(&calls), vec![[4, 0, 12, 12, 2]]);
    }

    fn first_bulk(calls: &[BusCall]) -> Vec<u16> {
        calls
            .iter()
            .find_map(|c| match c {
                BusCall::DataBulk(words) => Some(words.clone()),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn pixel_lands_at_requested_column() {
        let (mut epd, mock) = ready_display(config());
        let pixels = [0x00, 0xFF, 0xFF, 0xFF];
        let image = GrayImage::new(4, 1, &pixels).unwrap();
        epd.display_image(&image, 6, 0, DisplayMode::Gc16, Rotation::Rotate0, PixelFormat::Bpp8)
            .unwrap();

        let calls = mock.calls();
        // Area from x=4, 8 wide: the black pixel is the third byte of the row
        let bulk = first_bulk(&calls);
        assert_eq!(bulk.len(), 8 * 4 / 2);
        assert_eq!(&bulk[..4], &[0xFFFF, 0x00FF, 0xFFFF, 0xFFFF]);
        assert!(bulk[4..].iter().all(|&w| w == 0xFFFF));
        assert_eq!(triggers(&calls), vec![[4, 0, 8, 4, 2]]);
    }

    #[test]
    fn aligned_width_stops_at_panel_edge() {
        let mock = MockTransport::new();
        script_init(&mock, 1872, 1404);
        let mut epd = EpdDisplay::new(mock.clone(), NoopDelay::new(), config());
        epd.init().unwrap();
        mock.clear_calls();

        let pixels = vec![0u8; 1872 * 8];
        let image = GrayImage::new(1872, 8, &pixels).unwrap();
        epd.display_image(&image, 0, 0, DisplayMode::A2, Rotation::Rotate0, PixelFormat::Bpp1)
            .unwrap();

        let calls = mock.calls();
        assert_eq!(triggers(&calls), vec![[0, 0, 1872, 32, 4]]);
        // 1872x32 at 1bpp
        assert_eq!(first_bulk(&calls).len(), 1872 * 32 / 16);
        assert_eq!(epd.a2_refresh_count(), 1);
    }

    #[test]
    fn rejected_area_leaves_bus_and_count_alone() {
        let (mut epd, mock) = ready_display(config());
        let pixels = vec![0u8; 64 * 64];
        let image = GrayImage::new(64, 64, &pixels).unwrap();
        epd.display_image(&image, 0, 0, DisplayMode::A2, Rotation::Rotate0, PixelFormat::Bpp1)
            .unwrap();
        assert_eq!(epd.a2_refresh_count(), 1);
        mock.clear_calls();

        let err = epd
            .display_image(&image, 760, 0, DisplayMode::A2, Rotation::Rotate0, PixelFormat::Bpp1)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        let err = epd
            .display_image_progressive(&image, 0, 560, DisplayMode::A2, PixelFormat::Bpp1, None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        assert_eq!(mock.write_count(), 0);
        assert_eq!(epd.a2_refresh_count(), 1);
    }

    #[test]
    fn failed_a2_refresh_is_not_counted() {
        let (mut epd, mock) = ready_display(config().with_a2_refresh_limit(3));
        let pixels = vec![0u8; 32 * 32];
        let image = GrayImage::new(32, 32, &pixels).unwrap();
        epd.display_image(&image, 0, 0, DisplayMode::A2, Rotation::Rotate0, PixelFormat::Bpp1)
            .unwrap();

        mock.fail_next(Error::Communication("glitch".into()));
        assert!(epd
            .display_image(&image, 0, 0, DisplayMode::A2, Rotation::Rotate0, PixelFormat::Bpp1)
            .is_err());
        assert_eq!(epd.a2_refresh_count(), 1);

        epd.display_image(&image, 0, 0, DisplayMode::A2, Rotation::Rotate0, PixelFormat::Bpp1)
            .unwrap();
        assert_eq!(epd.a2_refresh_count(), 2);
    }

    #[test]
    fn refresh_limit_can_change_at_runtime() {
        let (mut epd, mock) = ready_display(config());
        let pixels = vec![0u8; 32 * 32];
        let image = GrayImage::new(32, 32, &pixels).unwrap();
        for _ in 0..2 {
            epd.display_image(&image, 0, 0, DisplayMode::A2, Rotation::Rotate0, PixelFormat::Bpp1)
                .unwrap();
        }
        epd.set_a2_refresh_limit(3);
        assert_eq!(epd.a2_refresh_limit(), 3);
        mock.clear_calls();

        epd.display_image(&image, 0, 0, DisplayMode::A2, Rotation::Rotate0, PixelFormat::Bpp1)
            .unwrap();
        assert_eq!(
            triggers(&mock.calls()),
            vec![[0, 0, 800, 600, 0], [0, 0, 32, 32, 4]]
        );
        assert_eq!(epd.a2_refresh_count(), 0);

        epd.set_a2_refresh_limit(0);
        for _ in 0..5 {
            epd.display_image(&image, 0, 0, DisplayMode::A2, Rotation::Rotate0, PixelFormat::Bpp1)
                .unwrap();
        }
        assert_eq!(epd.a2_refresh_count(), 0);
    }

    #[test]
    fn retry_transport_recovers_inside_display() {
        let mock = MockTransport::new();
        script_init(&mock, 800, 600);
        let transport = RetryTransport::new(
            mock.clone(),
            NoopDelay::new(),
            RetryPolicy::default().with_max_attempts(3),
        )
        .unwrap();
        let mut epd = EpdDisplay::new(transport, NoopDelay::new(), config());
        epd.init().unwrap();
        mock.clear_calls();

        mock.fail_next(Error::Communication("glitch".into()));
        mock.fail_next(Error::Communication("glitch".into()));
        epd.sleep().unwrap();
        assert_eq!(mock.command_count(0x0003), 3);
        assert_eq!(epd.power_state(), PowerState::Sleep);
    }

    #[test]
    fn fifth_a2_refresh_clears_first() {
        let (mut epd, mock) = ready_display(config().with_a2_refresh_limit(5));
        let pixels = vec![0u8; 32 * 32];
        let image = GrayImage::new(32, 32, &pixels).unwrap();

        for _ in 0..4 {
            epd.display_image(&image, 0, 0, DisplayMode::A2, Rotation::Rotate0, PixelFormat::Bpp1)
                .unwrap();
        }
        assert_eq!(epd.a2_refresh_count(), 4);
        mock.clear_calls();

        epd.display_image(&image, 0, 0, DisplayMode::A2, Rotation::Rotate0, PixelFormat::Bpp1)
            .unwrap();
        assert_eq!(
            triggers(&mock.calls()),
            vec![[0, 0, 800, 600, 0], [0, 0, 32, 32, 4]]
        );
        assert_eq!(epd.a2_refresh_count(), 0);
    }

    #[test]
    fn non_a2_modes_leave_count_alone() {
        let (mut epd, _mock) = ready_display(config().with_a2_refresh_limit(2));
        let pixels = vec![0u8; 16];
        let image = GrayImage::new(4, 4, &pixels).unwrap();
        for _ in 0..3 {
            epd.display_partial(&image, 0, 0, None).unwrap();
        }
        assert_eq!(epd.a2_refresh_count(), 0);
    }

    #[test]
    fn partial_defaults_to_du() {
        let (mut epd, mock) = ready_display(config());
        let pixels = vec![0u8; 8 * 8];
        let image = GrayImage::new(8, 8, &pixels).unwrap();
        epd.display_partial(&image, 16, 16, None).unwrap();
        assert_eq!(triggers(&mock.calls()), vec![[16, 16, 8, 8, 1]]);
    }

    #[test]
    fn extended_mode_is_sent_anyway() {
        let (mut epd, mock) = ready_display(config());
        let pixels = vec![0u8; 8 * 8];
        let image = GrayImage::new(8, 8, &pixels).unwrap();
        epd.display_image(&image, 0, 0, DisplayMode::Du4, Rotation::Rotate0, PixelFormat::Bpp8)
            .unwrap();
        assert_eq!(triggers(&mock.calls()), vec![[0, 0, 8, 8, 7]]);
    }

    #[test]
    fn progressive_runs_one_handshake_per_strip() {
        let (mut epd, mock) = ready_display(config().with_a2_refresh_limit(2));
        let pixels = vec![0x80u8; 8 * 600];
        let image = GrayImage::new(8, 600, &pixels).unwrap();
        epd.display_image_progressive(&image, 0, 0, DisplayMode::A2, PixelFormat::Bpp2, None)
            .unwrap();

        let calls = mock.calls();
        assert_eq!(mock.command_count(LD_IMG_AREA), 3);
        assert_eq!(
            triggers(&calls),
            vec![[0, 0, 8, 256, 4], [0, 256, 8, 256, 4], [0, 512, 8, 88, 4]]
        );
        assert_eq!(epd.a2_refresh_count(), 1);
    }

    #[test]
    fn progressive_strip_height_override() {
        let (mut epd, mock) = ready_display(config());
        let pixels = vec![0u8; 8 * 64];
        let image = GrayImage::new(8, 64, &pixels).unwrap();
        epd.display_image_progressive(&image, 0, 0, DisplayMode::Gc16, PixelFormat::Bpp4, Some(30))
            .unwrap();
        assert_eq!(mock.command_count(LD_IMG_AREA), 3);
    }

    #[test]
    fn progressive_keeps_row_offset() {
        let (mut epd, mock) = ready_display(config());
        let pixels = vec![0u8; 8 * 8];
        let image = GrayImage::new(8, 8, &pixels).unwrap();
        epd.display_image_progressive(&image, 0, 2, DisplayMode::Gc16, PixelFormat::Bpp8, Some(4))
            .unwrap();

        let calls = mock.calls();
        assert_eq!(
            triggers(&calls),
            vec![[0, 0, 8, 4, 2], [0, 4, 8, 4, 2], [0, 8, 8, 4, 2]]
        );
        // First strip: two white rows, then two image rows
        let bulk = first_bulk(&calls);
        assert!(bulk[..8].iter().all(|&w| w == 0xFFFF));
        assert!(bulk[8..].iter().all(|&w| w == 0x0000));
    }

    #[test]
    fn vcom_mismatch_adopts_device_value() {
        let (mut epd, mock) = ready_display(config());
        mock.queue_reply(1800);
        epd.set_vcom(-1.5).unwrap();
        assert_eq!(epd.vcom(), -1.8);

        mock.queue_reply(1520);
        epd.set_vcom(-1.5).unwrap();
        assert_eq!(epd.vcom(), -1.5);
        assert!(epd.set_vcom(-0.1).is_err());
    }

    #[test]
    fn auto_sleep_after_inactivity() {
        let (mut epd, mock) = ready_display(config());
        assert!(epd.set_auto_sleep_timeout(Some(Duration::ZERO)).is_err());

        epd.set_auto_sleep_timeout(Some(Duration::from_millis(1))).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        epd.check_auto_sleep().unwrap();
        assert_eq!(epd.power_state(), PowerState::Sleep);
        assert_eq!(mock.command_count(0x0003), 1);

        epd.check_auto_sleep().unwrap();
        assert_eq!(mock.command_count(0x0003), 1);

        epd.wake().unwrap();
        assert_eq!(epd.power_state(), PowerState::Active);
        epd.set_auto_sleep_timeout(None).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        epd.check_auto_sleep().unwrap();
        assert_eq!(epd.power_state(), PowerState::Active);
    }

    #[test]
    fn status_snapshot() {
        let (mut epd, mock) = ready_display(config().with_enhanced_driving(true));
        mock.queue_reply(0x0602);
        let status = epd.device_status().unwrap();
        assert_eq!((status.panel_width, status.panel_height), (800, 600));
        assert_eq!(status.memory_address, IMAGE_BUFFER_ADDRESS);
        assert_eq!(status.power_state, PowerState::Active);
        assert_eq!(status.a2_refresh_limit, DEFAULT_A2_REFRESH_LIMIT);
        assert!(status.enhanced_driving);
        assert_eq!(status.fw_version, "1.0");
    }

    #[test]
    fn operations_need_init() {
        let (mut epd, mock) = display(config());
        assert_eq!(
            epd.clear(0xFF).unwrap_err().kind(),
            ErrorKind::Initialization
        );
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn close_sleeps_with_auto_sleep() {
        let (mut epd, mock) = ready_display(config());
        epd.set_auto_sleep_timeout(Some(Duration::from_secs(60))).unwrap();
        epd.close();
        assert_eq!(
            mock.calls(),
            vec![BusCall::Command(0x0003), BusCall::Close]
        );
        assert!(epd.size().is_err());
    }
}
