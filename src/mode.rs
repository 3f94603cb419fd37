//! Refresh modes
//!
//! The mode is sent opaquely with every display trigger. The table below is
//! only used on the host to point out pairings that tend to look bad.

use core::fmt::{self, Display, Formatter};

use crate::models::PixelFormat;

/// Waveform used for a refresh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DisplayMode {
    /// Full wipe to white, removes all ghosting. Slow and flashy
    Init = 0,
    /// Direct update, black/white only. Fast, for partial updates
    Du = 1,
    /// 16 gray levels with a full flash. Best quality
    #[default]
    Gc16 = 2,
    /// 16 gray levels without flash, for text on white
    Gl16 = 3,
    /// Fastest black/white mode. Ghosts quickly, needs regular clears
    A2 = 4,
    /// Ghost reduction 16 levels
    Glr16 = 5,
    /// Ghost level detection 16 levels
    Gld16 = 6,
    /// Direct update with 4 gray levels
    Du4 = 7,
}

/// Relative scale used by [`ModeInfo`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Grade {
    /// Low
    Low,
    /// Medium
    Medium,
    /// High
    High,
}

/// Characteristics of a [`DisplayMode`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeInfo {
    /// Short name
    pub name: &'static str,
    /// Distinct gray levels the waveform renders
    pub gray_levels: u8,
    /// How fast the refresh completes
    pub speed: Grade,
    /// How close the result is to the source image
    pub quality: Grade,
    /// How much of the previous image stays visible
    pub ghosting: Grade,
    /// Formats the waveform renders without loss
    pub recommended_formats: &'static [PixelFormat],
}

impl DisplayMode {
    /// Every mode in wire order
    pub const ALL: [DisplayMode; 8] = [
        DisplayMode::Init,
        DisplayMode::Du,
        DisplayMode::Gc16,
        DisplayMode::Gl16,
        DisplayMode::A2,
        DisplayMode::Glr16,
        DisplayMode::Gld16,
        DisplayMode::Du4,
    ];

    /// Word sent with the display trigger
    pub fn wire_value(self) -> u16 {
        self as u16
    }

    /// Modes that only a part of the panels ship waveforms for
    pub fn is_extended(self) -> bool {
        matches!(
            self,
            DisplayMode::Glr16 | DisplayMode::Gld16 | DisplayMode::Du4
        )
    }

    /// Characteristics of the waveform
    pub fn info(self) -> ModeInfo {
        use Grade::*;
        use PixelFormat::*;
        let (name, gray_levels, speed, quality, ghosting, recommended_formats): (
            _,
            _,
            _,
            _,
            _,
            &'static [PixelFormat],
        ) = match self {
            DisplayMode::Init => ("INIT", 2, Low, High, Low, &[Bpp1, Bpp2, Bpp4, Bpp8]),
            DisplayMode::Du => ("DU", 2, High, Low, Medium, &[Bpp1, Bpp2, Bpp4]),
            DisplayMode::Gc16 => ("GC16", 16, Low, High, Low, &[Bpp4, Bpp8]),
            DisplayMode::Gl16 => ("GL16", 16, Medium, High, Medium, &[Bpp4, Bpp8]),
            DisplayMode::A2 => ("A2", 2, High, Low, High, &[Bpp1, Bpp2]),
            DisplayMode::Glr16 => ("GLR16", 16, Medium, High, Low, &[Bpp4, Bpp8]),
            DisplayMode::Gld16 => ("GLD16", 16, Medium, High, Low, &[Bpp4, Bpp8]),
            DisplayMode::Du4 => ("DU4", 4, High, Medium, Medium, &[Bpp2, Bpp4]),
        };
        ModeInfo {
            name,
            gray_levels,
            speed,
            quality,
            ghosting,
            recommended_formats,
        }
    }

    /// Whether `format` is among the recommended formats of this mode
    pub fn recommends(self, format: PixelFormat) -> bool {
        self.info().recommended_formats.contains(&format)
    }

    /// Host side warnings for this mode combined with `format`.
    ///
    /// Nothing is rejected: the controller accepts every combination.
    pub fn advisories(self, format: PixelFormat) -> Vec<String> {
        let mut notes = Vec::new();
        if self.is_extended() {
            notes.push(format!(
                "{self} mode may not be supported on all devices, \
                 falls back to a standard mode if the panel lacks the waveform"
            ));
        }
        if !self.recommends(format) {
            let recommended = self
                .info()
                .recommended_formats
                .iter()
                .map(|f| f.to_string())
                .collect::<Vec<_>>()
                .join(" or ");
            notes.push(format!(
                "{self} mode works best with {recommended}, {format} was selected"
            ));
        }
        notes
    }
}

impl Display for DisplayMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.info().name)
    }
}
