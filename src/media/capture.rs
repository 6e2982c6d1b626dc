//! Capture-Schicht
//!
//! Abstraktion über Kamera, Mikrofon und Bildschirmaufnahme. Jede erfolgreiche
//! Anforderung liefert einen [`LocalTrack`], der das Gerät exklusiv hält und es
//! beim Drop wieder freigibt.

use super::constraints::MediaConstraints;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Access to {0} was denied")]
    PermissionDenied(CaptureSource),

    #[error("No {0} device found")]
    DeviceNotFound(CaptureSource),

    #[error("{0} device is in use by another application")]
    DeviceInUse(CaptureSource),

    #[error("{0} capture is not supported on this host")]
    Unsupported(CaptureSource),

    #[error("Capture failed: {0}")]
    Backend(String),
}

// ============================================================================
// TYPES
// ============================================================================

/// Herkunft eines lokalen Tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureSource {
    Microphone,
    Camera,
    Screen,
}

impl CaptureSource {
    pub fn kind(self) -> MediaKind {
        match self {
            Self::Microphone => MediaKind::Audio,
            Self::Camera | Self::Screen => MediaKind::Video,
        }
    }
}

impl std::fmt::Display for CaptureSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Microphone => "microphone",
            Self::Camera => "camera",
            Self::Screen => "screen",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

/// Was die Capture-Schicht auf diesem Host kann
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureCapabilities {
    pub microphone: bool,
    pub camera: bool,
    pub screen: bool,
    pub details: Vec<String>,
}

// ============================================================================
// CAPTURE DEVICE
// ============================================================================

/// Gerätespezifischer Teil eines Tracks
///
/// `stop` wird genau einmal aufgerufen, vom Drop des [`LocalTrack`].
pub trait CaptureDevice: Send {
    fn set_enabled(&mut self, enabled: bool);
    fn stop(&mut self);
}

/// Ein exklusiv gehaltener lokaler Track
pub struct LocalTrack {
    id: String,
    source: CaptureSource,
    label: String,
    enabled: bool,
    device: Box<dyn CaptureDevice>,
}

impl LocalTrack {
    pub fn new(source: CaptureSource, label: impl Into<String>, device: Box<dyn CaptureDevice>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source,
            label: label.into(),
            enabled: true,
            device,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source(&self) -> CaptureSource {
        self.source
    }

    pub fn kind(&self) -> MediaKind {
        self.source.kind()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Aktiviert/deaktiviert den Track ohne das Gerät freizugeben
    pub fn set_enabled(&mut self, enabled: bool) {
        if self.enabled != enabled {
            self.enabled = enabled;
            self.device.set_enabled(enabled);
        }
    }
}

impl Drop for LocalTrack {
    fn drop(&mut self) {
        self.device.stop();
        tracing::debug!("Released {} track {} ({})", self.source, self.id, self.label);
    }
}

impl std::fmt::Debug for LocalTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTrack")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("label", &self.label)
            .field("enabled", &self.enabled)
            .finish()
    }
}

// ============================================================================
// MEDIA CAPTURE
// ============================================================================

/// Zugriff auf die Aufnahmegeräte der Plattform
pub trait MediaCapture: Send + Sync {
    /// Fordert ein Gerät an. Der zurückgegebene Track hält es bis zum Drop.
    fn acquire(
        &self,
        source: CaptureSource,
        constraints: MediaConstraints,
    ) -> BoxFuture<'_, Result<LocalTrack, CaptureError>>;

    fn capabilities(&self) -> CaptureCapabilities {
        CaptureCapabilities::default()
    }
}
