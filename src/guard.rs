//! Checks run before a transfer touches the bus
//!
//! A transfer is sized up front from its dimensions and pixel format.
//! Oversized transfers fail with [`Error::Memory`], large ones pass with a
//! warning. Progressive transfers split an image into horizontal strips
//! planned here.

use log::warn;

use crate::alignment::{align_coordinate, align_dimension, boundary};
use crate::error::{Error, Result};
use crate::models::{PixelFormat, MAX_HEIGHT, MAX_WIDTH};

/// Hard ceiling for one transfer
pub const SAFE_IMAGE_MEMORY_BYTES: u64 = 32 * 1024 * 1024;
/// Transfers above this size are logged as a warning
pub const WARNING_THRESHOLD_BYTES: u64 = 16 * 1024 * 1024;
/// Default height of one progressive strip
pub const DEFAULT_STRIP_HEIGHT: u16 = 256;

/// Bytes `width` x `height` pixels take in `format`
pub fn required_bytes(width: u32, height: u32, format: PixelFormat) -> u64 {
    (u64::from(width) * u64::from(height) * u64::from(format.bits_per_pixel()) + 7) / 8
}

/// Size limits applied by [`MemoryLimits::check_transfer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLimits {
    safe_bytes: u64,
    warning_bytes: u64,
}

impl Default for MemoryLimits {
    fn default() -> Self {
        MemoryLimits {
            safe_bytes: SAFE_IMAGE_MEMORY_BYTES,
            warning_bytes: WARNING_THRESHOLD_BYTES,
        }
    }
}

/// Outcome of a transfer check that passed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryCheck {
    /// Bytes the transfer takes
    pub required_bytes: u64,
    /// Set when the transfer is above the warning threshold
    pub warning: Option<String>,
}

impl MemoryLimits {
    /// Fails unless `warning_bytes <= safe_bytes`
    pub fn new(safe_bytes: u64, warning_bytes: u64) -> Result<Self> {
        if warning_bytes > safe_bytes {
            return Err(Error::InvalidParameter(format!(
                "warning threshold {warning_bytes} above the safe limit {safe_bytes}"
            )));
        }
        Ok(MemoryLimits {
            safe_bytes,
            warning_bytes,
        })
    }

    /// The hard ceiling
    pub fn safe_bytes(&self) -> u64 {
        self.safe_bytes
    }

    /// The warning threshold
    pub fn warning_bytes(&self) -> u64 {
        self.warning_bytes
    }

    /// Sizes a transfer of `width` x `height` pixels.
    ///
    /// Dimensions above the controller's maximum and sizes above the safe
    /// limit fail with [`Error::Memory`]. The warning, if any, is logged
    /// and also returned.
    pub fn check_transfer(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<MemoryCheck> {
        if width > u32::from(MAX_WIDTH) || height > u32::from(MAX_HEIGHT) {
            return Err(Error::Memory(format!(
                "image dimensions {width}x{height} exceed maximum {MAX_WIDTH}x{MAX_HEIGHT}"
            )));
        }
        let required = required_bytes(width, height, format);
        if required > self.safe_bytes {
            return Err(Error::Memory(format!(
                "image memory usage ({required} bytes) exceeds safe limit ({} bytes). \
                 Consider using a lower resolution or different pixel format",
                self.safe_bytes
            )));
        }
        let warning = (required > self.warning_bytes).then(|| {
            format!(
                "large image memory usage: {required} bytes ({:.1} MB). Consider a more \
                 efficient pixel format to reduce memory usage",
                required as f64 / (1024.0 * 1024.0)
            )
        });
        if let Some(message) = &warning {
            warn!("{message}");
        }
        Ok(MemoryCheck {
            required_bytes: required,
            warning,
        })
    }
}

/// Fails if the rectangle reaches past the panel
pub fn check_bounds(x: u16, y: u16, width: u32, height: u32, panel: (u16, u16)) -> Result<()> {
    if u32::from(x) + width > u32::from(panel.0) {
        return Err(Error::InvalidParameter(format!(
            "image exceeds display width: {width} at x={x} on a {} wide panel",
            panel.0
        )));
    }
    if u32::from(y) + height > u32::from(panel.1) {
        return Err(Error::InvalidParameter(format!(
            "image exceeds display height: {height} at y={y} on a {} high panel",
            panel.1
        )));
    }
    Ok(())
}

/// One strip of a progressive transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Strip {
    /// First source row
    pub source_row: u16,
    /// Source rows in this strip
    pub rows: u16,
    /// Target y on the panel
    pub y: u16,
    /// `rows` rounded up to the granule, the height actually transferred
    pub aligned_height: u16,
}

/// Splits `height` rows starting at panel row `y` into strips.
///
/// The strip height is rounded down to the format's granule, but never
/// below one granule, so every strip but the last has the same height and
/// starts on the granule when `y` does.
pub fn plan_strips(y: u16, height: u16, format: PixelFormat, strip_height: u16) -> Vec<Strip> {
    let step = align_coordinate(strip_height, format).max(boundary(format));
    let mut strips = Vec::with_capacity(usize::from(height / step) + 1);
    let mut row = 0u16;
    while row < height {
        let rows = step.min(height - row);
        strips.push(Strip {
            source_row: row,
            rows,
            y: y.saturating_add(row),
            aligned_height: align_dimension(rows, format).min(u32::from(u16::MAX)) as u16,
        });
        row = row.saturating_add(rows);
    }
    strips
}
