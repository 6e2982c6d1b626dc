//! Media Constraints
//!
//! Benannte Optionen, mit denen die Capture-Schicht Geräte anfordert.
//! Die Session verwaltet keine Geräte-Handles, nur diese Wünsche.

use serde::{Deserialize, Serialize};

/// Audio-Optionen für das Mikrofon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioConstraints {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            device_id: None,
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

/// Video-Optionen für die Kamera
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoConstraints {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

impl Default for VideoConstraints {
    fn default() -> Self {
        VideoQuality::Hd720.constraints()
    }
}

/// Qualitätsstufen aus den Medien-Einstellungen
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoQuality {
    #[serde(rename = "480p")]
    Sd480,
    #[default]
    #[serde(rename = "720p")]
    Hd720,
    #[serde(rename = "1080p")]
    FullHd1080,
}

impl VideoQuality {
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            Self::Sd480 => (640, 480),
            Self::Hd720 => (1280, 720),
            Self::FullHd1080 => (1920, 1080),
        }
    }

    pub fn constraints(self) -> VideoConstraints {
        let (width, height) = self.dimensions();
        VideoConstraints {
            device_id: None,
            width,
            height,
            frame_rate: 30,
        }
    }
}

/// Zusammengefasste Constraints für eine Anfrage an die Capture-Schicht
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaConstraints {
    pub audio: AudioConstraints,
    pub video: VideoConstraints,
}

impl MediaConstraints {
    /// Wählt ein bestimmtes Eingabegerät für das Mikrofon
    pub fn with_audio_device(mut self, device_id: impl Into<String>) -> Self {
        self.audio.device_id = Some(device_id.into());
        self
    }

    /// Wählt eine bestimmte Kamera
    pub fn with_video_device(mut self, device_id: impl Into<String>) -> Self {
        self.video.device_id = Some(device_id.into());
        self
    }

    /// Setzt die Auflösung auf eine Qualitätsstufe, das Gerät bleibt erhalten
    pub fn with_quality(mut self, quality: VideoQuality) -> Self {
        let (width, height) = quality.dimensions();
        self.video.width = width;
        self.video.height = height;
        self
    }
}
