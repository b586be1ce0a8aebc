//! Quality presets and their format-selection expressions
//!
//! The preset table is a fixed enumeration: every profile maps to a yt-dlp
//! format-selection expression that is passed to the fetcher verbatim.
//! User-defined presets are deliberately not supported.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::models::AppError;

/// Named quality preset selecting a format expression for the fetcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QualityProfile {
    /// Best available video and audio streams
    BestQuality,
    /// Video capped at 1080p
    Hd1080,
    /// Video capped at 720p
    Hd720,
    /// Video capped at 480p
    Sd480,
    /// Audio stream only, no video
    AudioOnly,
}

impl QualityProfile {
    /// All presets, in the order they are shown to users.
    pub fn all() -> [QualityProfile; 5] {
        [
            QualityProfile::BestQuality,
            QualityProfile::Hd1080,
            QualityProfile::Hd720,
            QualityProfile::Sd480,
            QualityProfile::AudioOnly,
        ]
    }

    /// The yt-dlp format-selection expression for this preset.
    ///
    /// Opaque to the coordinator; only the fetcher interprets it.
    pub fn format_expr(&self) -> &'static str {
        match self {
            QualityProfile::BestQuality => {
                "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best"
            }
            QualityProfile::Hd1080 => {
                "bestvideo[height<=1080][ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best"
            }
            QualityProfile::Hd720 => {
                "bestvideo[height<=720][ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best"
            }
            QualityProfile::Sd480 => {
                "bestvideo[height<=480][ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best"
            }
            QualityProfile::AudioOnly => "bestaudio[ext=m4a]",
        }
    }

    /// Whether this preset downloads audio without a video stream.
    ///
    /// Audio-only downloads skip the mp4 merge step.
    pub fn is_audio_only(&self) -> bool {
        matches!(self, QualityProfile::AudioOnly)
    }

    /// User-facing preset label.
    pub fn label(&self) -> &'static str {
        match self {
            QualityProfile::BestQuality => "Best Quality",
            QualityProfile::Hd1080 => "1080p",
            QualityProfile::Hd720 => "720p",
            QualityProfile::Sd480 => "480p",
            QualityProfile::AudioOnly => "Audio Only",
        }
    }
}

impl Default for QualityProfile {
    fn default() -> Self {
        QualityProfile::BestQuality
    }
}

impl fmt::Display for QualityProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for QualityProfile {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "best quality" | "best" => Ok(QualityProfile::BestQuality),
            "1080p" | "1080" => Ok(QualityProfile::Hd1080),
            "720p" | "720" => Ok(QualityProfile::Hd720),
            "480p" | "480" => Ok(QualityProfile::Sd480),
            "audio only" | "audio" => Ok(QualityProfile::AudioOnly),
            other => Err(AppError::Config(format!("Unknown quality preset: {other}"))),
        }
    }
}
