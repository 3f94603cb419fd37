//! Pixel alignment rules of the controller
//!
//! Areas have to start and extend on a 4 pixel granule. In 1bpp mode the
//! granule grows to 32 pixels (4 bytes), some panels reject anything finer.

use crate::models::{PixelFormat, PIXEL_ALIGNMENT};

/// Granule for 1bpp transfers
pub const PIXEL_ALIGNMENT_1BPP: u16 = 32;

/// Alignment granule in pixels for `format`
pub fn boundary(format: PixelFormat) -> u16 {
    match format {
        PixelFormat::Bpp1 => PIXEL_ALIGNMENT_1BPP,
        _ => PIXEL_ALIGNMENT,
    }
}

fn describe(format: PixelFormat) -> &'static str {
    match format {
        PixelFormat::Bpp1 => "32-pixel (4-byte)",
        _ => "4-pixel",
    }
}

/// Rounds a coordinate down to the granule
pub fn align_coordinate(value: u16, format: PixelFormat) -> u16 {
    let b = boundary(format);
    value / b * b
}

/// Rounds a dimension up to the granule
pub fn align_dimension(value: u16, format: PixelFormat) -> u32 {
    let b = u32::from(boundary(format));
    (u32::from(value) + b - 1) / b * b
}

/// One misaligned parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentIssue {
    /// Which parameter
    pub parameter: &'static str,
    /// The value as given
    pub value: u16,
    /// The value the transfer will use instead
    pub aligned: u32,
    /// Human readable description
    pub message: String,
}

/// Outcome of [`validate_alignment`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlignmentReport {
    /// Note shown ahead of the issues, set for misaligned 1bpp transfers
    pub note: Option<String>,
    /// Every misaligned parameter, in x, y, width, height order
    pub issues: Vec<AlignmentIssue>,
}

impl AlignmentReport {
    /// Nothing needs adjusting
    pub fn is_aligned(&self) -> bool {
        self.issues.is_empty()
    }

    /// The note followed by every issue message
    pub fn messages(&self) -> Vec<String> {
        self.note
            .iter()
            .cloned()
            .chain(self.issues.iter().map(|i| i.message.clone()))
            .collect()
    }
}

/// Reports which of `x`, `y`, `width` and `height` miss the granule of
/// `format`, and the value each will be adjusted to.
pub fn validate_alignment(
    x: u16,
    y: u16,
    width: u16,
    height: u16,
    format: PixelFormat,
) -> AlignmentReport {
    let b = boundary(format);
    let params = [
        ("X coordinate", x, u32::from(align_coordinate(x, format))),
        ("Y coordinate", y, u32::from(align_coordinate(y, format))),
        ("Width", width, align_dimension(width, format)),
        ("Height", height, align_dimension(height, format)),
    ];
    let issues: Vec<AlignmentIssue> = params
        .into_iter()
        .filter(|(_, value, _)| value % b != 0)
        .map(|(parameter, value, aligned)| AlignmentIssue {
            parameter,
            value,
            aligned,
            message: format!(
                "{parameter} {value} not aligned to {} boundary. Will be adjusted to {aligned}",
                describe(format)
            ),
        })
        .collect();
    let note = (format == PixelFormat::Bpp1 && !issues.is_empty()).then(|| {
        "Note: 1bpp mode requires strict 32-pixel alignment on some models. \
         Image may be cropped or padded to meet requirements."
            .to_string()
    });
    AlignmentReport { note, issues }
}
