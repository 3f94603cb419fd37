//! Value objects passed through the protocol
//!
//! Everything here validates on construction and hands back
//! [`Error::InvalidParameter`] instead of a half-valid value.

use core::fmt::{self, Display, Formatter};

use crate::command::combine_address;
use crate::error::{Error, Result};
use crate::mode::DisplayMode;

/// Largest panel edge the controller drives
pub const MAX_WIDTH: u16 = 2048;
/// Largest panel edge the controller drives
pub const MAX_HEIGHT: u16 = 2048;

/// Lowest accepted VCOM voltage
pub const MIN_VCOM: f64 = -5.0;
/// Highest accepted VCOM voltage
pub const MAX_VCOM: f64 = -0.2;

/// Granule every [`DisplayArea`] has to respect regardless of pixel format
pub const PIXEL_ALIGNMENT: u16 = 4;

/// Wire pixel formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PixelFormat {
    /// 1 bit per pixel, black and white
    Bpp1 = 0,
    /// 2 bits per pixel, 4 gray levels
    Bpp2 = 1,
    /// 4 bits per pixel, 16 gray levels
    #[default]
    Bpp4 = 2,
    /// 8 bits per pixel, 256 gray levels
    Bpp8 = 3,
}

impl PixelFormat {
    /// All formats, narrowest first
    pub const ALL: [PixelFormat; 4] = [
        PixelFormat::Bpp1,
        PixelFormat::Bpp2,
        PixelFormat::Bpp4,
        PixelFormat::Bpp8,
    ];

    /// Bits one pixel takes on the wire
    pub fn bits_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Bpp1 => 1,
            PixelFormat::Bpp2 => 2,
            PixelFormat::Bpp4 => 4,
            PixelFormat::Bpp8 => 8,
        }
    }

    /// Pixels packed into one byte
    pub fn pixels_per_byte(self) -> usize {
        (8 / self.bits_per_pixel()) as usize
    }

    /// Word sent in the load image commands
    pub fn wire_value(self) -> u16 {
        self as u16
    }
}

impl TryFrom<u16> for PixelFormat {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self> {
        match value {
            0 => Ok(PixelFormat::Bpp1),
            1 => Ok(PixelFormat::Bpp2),
            2 => Ok(PixelFormat::Bpp4),
            3 => Ok(PixelFormat::Bpp8),
            v => Err(Error::InvalidParameter(format!(
                "pixel format {v} not supported"
            ))),
        }
    }
}

impl Display for PixelFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}bpp", self.bits_per_pixel())
    }
}

/// Rotation applied by the controller while loading, only 90° increments supported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    /// No rotation
    #[default]
    Rotate0 = 0,
    /// Rotate by 90 degrees
    Rotate90 = 1,
    /// Rotate by 180 degrees
    Rotate180 = 2,
    /// Rotate by 270 degrees
    Rotate270 = 3,
}

/// Byte order of the loaded pixel words
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndianType {
    /// Little endian
    #[default]
    Little = 0,
    /// Big endian
    Big = 1,
}

/// Power state as last commanded.
///
/// The controller is never asked for it: the value is updated once the
/// power command went out on the bus. If the device fails mid-transition the
/// tracked state and the real one can diverge until the next `init()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerState {
    /// Running
    #[default]
    Active,
    /// Clocks stopped, registers kept
    Standby,
    /// Deepest state, needs a system run to come back
    Sleep,
}

/// Information block returned by `GET_DEV_INFO`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Panel width in pixels
    pub panel_width: u16,
    /// Panel height in pixels
    pub panel_height: u16,
    /// Low half of the image buffer address
    pub memory_addr_low: u16,
    /// High half of the image buffer address
    pub memory_addr_high: u16,
    /// Firmware version
    pub fw_version: String,
    /// LUT version
    pub lut_version: String,
}

impl DeviceInfo {
    /// Decodes the 20-word info block
    pub fn from_words(words: &[u16]) -> Result<Self> {
        if words.len() != crate::command::DEVICE_INFO_WORDS {
            return Err(Error::Device(format!(
                "device info has {} words, expected {}",
                words.len(),
                crate::command::DEVICE_INFO_WORDS
            )));
        }
        let (panel_width, panel_height) = (words[0], words[1]);
        if !(1..=MAX_WIDTH).contains(&panel_width) || !(1..=MAX_HEIGHT).contains(&panel_height) {
            return Err(Error::Device(format!(
                "device reported an invalid panel size {panel_width}x{panel_height}"
            )));
        }
        Ok(DeviceInfo {
            panel_width,
            panel_height,
            memory_addr_low: words[2],
            memory_addr_high: words[3],
            fw_version: decode_version(&words[4..12]),
            lut_version: decode_version(&words[12..20]),
        })
    }

    /// The full 32-bit image buffer address
    pub fn memory_address(&self) -> u32 {
        combine_address(self.memory_addr_low, self.memory_addr_high)
    }
}

// Zero terminated run of 16-bit code units
fn decode_version(units: &[u16]) -> String {
    let end = units.iter().position(|&u| u == 0).unwrap_or(units.len());
    char::decode_utf16(units[..end].iter().copied())
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect()
}

/// Parameters of one image load
#[derive(Debug, Clone, Copy)]
pub struct LoadImageInfo<'a> {
    /// Byte order of the pixel words
    pub endian_type: EndianType,
    /// Wire pixel format of `source_buffer`
    pub pixel_format: PixelFormat,
    /// Rotation applied by the controller
    pub rotation: Rotation,
    /// Target address in controller memory
    pub target_memory_addr: u32,
    source_buffer: &'a [u8],
}

impl<'a> LoadImageInfo<'a> {
    /// Fails on an empty `source_buffer`
    pub fn new(source_buffer: &'a [u8], target_memory_addr: u32) -> Result<Self> {
        if source_buffer.is_empty() {
            return Err(Error::InvalidParameter(
                "source buffer cannot be empty".into(),
            ));
        }
        Ok(LoadImageInfo {
            endian_type: EndianType::default(),
            pixel_format: PixelFormat::default(),
            rotation: Rotation::default(),
            target_memory_addr,
            source_buffer,
        })
    }

    /// Sets the pixel format
    pub fn with_pixel_format(mut self, pixel_format: PixelFormat) -> Self {
        self.pixel_format = pixel_format;
        self
    }

    /// Sets the rotation
    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    /// Sets the byte order
    pub fn with_endian(mut self, endian_type: EndianType) -> Self {
        self.endian_type = endian_type;
        self
    }

    /// The packed pixel data
    pub fn source_buffer(&self) -> &'a [u8] {
        self.source_buffer
    }
}

/// Target rectangle of an area load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AreaImageInfo {
    /// Left edge
    pub x: u16,
    /// Top edge
    pub y: u16,
    /// Width, never zero
    pub width: u16,
    /// Height, never zero
    pub height: u16,
}

impl AreaImageInfo {
    /// Fails on a zero width or height
    pub fn new(x: u16, y: u16, width: u16, height: u16) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidParameter(format!(
                "area dimensions must be positive, got {width}x{height}"
            )));
        }
        Ok(AreaImageInfo {
            x,
            y,
            width,
            height,
        })
    }
}

/// Rectangle refreshed by a display trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayArea {
    /// Left edge, multiple of 4
    pub x: u16,
    /// Top edge, multiple of 4
    pub y: u16,
    /// Width, positive multiple of 4
    pub width: u16,
    /// Height, positive multiple of 4
    pub height: u16,
    /// Refresh mode
    pub mode: DisplayMode,
}

impl DisplayArea {
    /// Fails unless every edge sits on the 4-pixel granule
    pub fn new(x: u16, y: u16, width: u16, height: u16, mode: DisplayMode) -> Result<Self> {
        if x % PIXEL_ALIGNMENT != 0 || y % PIXEL_ALIGNMENT != 0 {
            return Err(Error::InvalidParameter(format!(
                "position ({x}, {y}) must be aligned to {PIXEL_ALIGNMENT} pixels"
            )));
        }
        if width == 0 || height == 0 {
            return Err(Error::InvalidParameter(format!(
                "area dimensions must be positive, got {width}x{height}"
            )));
        }
        if width % PIXEL_ALIGNMENT != 0 || height % PIXEL_ALIGNMENT != 0 {
            return Err(Error::InvalidParameter(format!(
                "dimensions {width}x{height} must be multiples of {PIXEL_ALIGNMENT}"
            )));
        }
        Ok(DisplayArea {
            x,
            y,
            width,
            height,
            mode,
        })
    }
}

/// A VCOM voltage inside the safe range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VcomConfig {
    voltage: f64,
}

impl VcomConfig {
    /// Validates `voltage` and rounds it to 2 decimals
    pub fn new(voltage: f64) -> Result<Self> {
        if !(MIN_VCOM..=MAX_VCOM).contains(&voltage) {
            return Err(Error::InvalidParameter(format!(
                "invalid VCOM voltage {voltage}V, VCOM must be between {MIN_VCOM}V and \
                 {MAX_VCOM}V. Check the VCOM value printed on the panel's FPC cable"
            )));
        }
        Ok(VcomConfig {
            voltage: (voltage * 100.0).round() / 100.0,
        })
    }

    /// The rounded voltage
    pub fn voltage(&self) -> f64 {
        self.voltage
    }

    /// Word sent with the VCOM write command
    pub fn raw(&self) -> u16 {
        (-self.voltage * crate::command::VCOM_FACTOR).round() as u16
    }

    /// Voltage encoded by a raw VCOM word
    pub fn voltage_from_raw(raw: u16) -> f64 {
        -f64::from(raw) / crate::command::VCOM_FACTOR
    }
}

/// A borrowed 8-bit grayscale frame, row major
#[derive(Debug, Clone, Copy)]
pub struct GrayImage<'a> {
    width: u16,
    height: u16,
    pixels: &'a [u8],
}

impl<'a> GrayImage<'a> {
    /// Fails unless `pixels` holds exactly `width * height` samples
    pub fn new(width: u16, height: u16, pixels: &'a [u8]) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(Error::InvalidParameter(format!(
                "image dimensions must be positive, got {width}x{height}"
            )));
        }
        let expected = usize::from(width) * usize::from(height);
        if pixels.len() != expected {
            return Err(Error::InvalidParameter(format!(
                "image of {width}x{height} needs {expected} samples, got {}",
                pixels.len()
            )));
        }
        Ok(GrayImage {
            width,
            height,
            pixels,
        })
    }

    /// Width in pixels
    pub fn width(&self) -> u16 {
        self.width
    }

    /// Height in pixels
    pub fn height(&self) -> u16 {
        self.height
    }

    /// All samples
    pub fn pixels(&self) -> &'a [u8] {
        self.pixels
    }

    /// Samples of rows `start..start + rows`
    pub fn rows(&self, start: u16, rows: u16) -> &'a [u8] {
        let width = usize::from(self.width);
        let from = usize::from(start) * width;
        let to = (usize::from(start) + usize::from(rows)) * width;
        &self.pixels[from..to.min(self.pixels.len())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info_words() -> Vec<u16> {
        let mut words = vec![1872, 1404, 0x36E0, 0x0012];
        let mut fw: Vec<u16> = "SWv_0.1".encode_utf16().collect();
        fw.resize(8, 0);
        let mut lut: Vec<u16> = "M841".encode_utf16().collect();
        lut.resize(8, 0);
        words.extend(fw);
        words.extend(lut);
        words
    }

    #[test]
    fn device_info_decodes() {
        let info = DeviceInfo::from_words(&info_words()).unwrap();
        assert_eq!(info.panel_width, 1872);
        assert_eq!(info.panel_height, 1404);
        assert_eq!(info.memory_address(), 0x0012_36E0);
        assert_eq!(info.fw_version, "SWv_0.1");
        assert_eq!(info.lut_version, "M841");
    }

    #[test]
    fn device_info_full_version_without_terminator() {
        let mut words = info_words();
        for w in &mut words[4..12] {
            *w = u16::from(b'A');
        }
        let info = DeviceInfo::from_words(&words).unwrap();
        assert_eq!(info.fw_version, "AAAAAAAA");
    }

    #[test]
    fn device_info_rejects_malformed() {
        assert!(matches!(
            DeviceInfo::from_words(&[0; 10]),
            Err(Error::Device(_))
        ));
        let mut words = info_words();
        words[0] = 0;
        assert!(matches!(
            DeviceInfo::from_words(&words),
            Err(Error::Device(_))
        ));
        words[0] = 4096;
        assert!(DeviceInfo::from_words(&words).is_err());
    }

    #[test]
    fn load_image_info_rejects_empty_buffer() {
        assert!(matches!(
            LoadImageInfo::new(&[], 0),
            Err(Error::InvalidParameter(_))
        ));
        let data = [1u8, 2];
        let info = LoadImageInfo::new(&data, 0x10)
            .unwrap()
            .with_pixel_format(PixelFormat::Bpp8)
            .with_rotation(Rotation::Rotate90);
        assert_eq!(info.source_buffer(), &data);
        assert_eq!(info.pixel_format, PixelFormat::Bpp8);
        assert_eq!(info.rotation, Rotation::Rotate90);
        assert_eq!(info.endian_type, EndianType::Little);
    }

    #[test]
    fn display_area_requires_alignment() {
        assert!(DisplayArea::new(0, 0, 100, 100, DisplayMode::Gc16).is_ok());
        assert!(DisplayArea::new(2, 0, 100, 100, DisplayMode::Gc16).is_err());
        assert!(DisplayArea::new(0, 0, 101, 100, DisplayMode::Gc16).is_err());
        assert!(DisplayArea::new(0, 0, 0, 100, DisplayMode::Gc16).is_err());
    }

    #[test]
    fn area_image_info_requires_positive_size() {
        assert!(AreaImageInfo::new(3, 5, 7, 9).is_ok());
        assert!(AreaImageInfo::new(0, 0, 0, 9).is_err());
    }

    #[test]
    fn vcom_range_and_rounding() {
        let vcom = VcomConfig::new(-1.456).unwrap();
        assert_eq!(vcom.voltage(), -1.46);
        assert_eq!(vcom.raw(), 1460);
        assert_eq!(VcomConfig::new(-2.0).unwrap().raw(), 2000);
        assert!(VcomConfig::new(-0.1).is_err());
        assert!(VcomConfig::new(-5.5).is_err());
        assert!(VcomConfig::new(f64::NAN).is_err());
        assert_eq!(VcomConfig::voltage_from_raw(1500), -1.5);
    }

    #[test]
    fn pixel_format_wire_values() {
        assert_eq!(PixelFormat::try_from(0).unwrap(), PixelFormat::Bpp1);
        assert_eq!(PixelFormat::try_from(3).unwrap(), PixelFormat::Bpp8);
        assert!(matches!(
            PixelFormat::try_from(4),
            Err(Error::InvalidParameter(_))
        ));
        assert_eq!(PixelFormat::Bpp2.to_string(), "2bpp");
        assert_eq!(PixelFormat::Bpp1.pixels_per_byte(), 8);
    }

    #[test]
    fn gray_image_checks_length() {
        let pixels = [0u8; 12];
        let image = GrayImage::new(4, 3, &pixels).unwrap();
        assert_eq!(image.rows(1, 2).len(), 8);
        assert!(GrayImage::new(5, 3, &pixels).is_err());
        assert!(GrayImage::new(0, 3, &[]).is_err());
    }
}
