//! Debug-Export
//!
//! Schnappschuss aus Capture-Fähigkeiten, ICE-Test, Konfiguration, Call-Status
//! und den letzten Log-Zeilen, geschrieben als `webrtc-debug-<millis>.json`.

use super::ice_probe::ConnectionTest;
use super::log_buffer::{DebugEntry, DebugLog};
use crate::config::WebRtcConfig;
use crate::media::CaptureCapabilities;
use chrono::{DateTime, Utc};
use directories::UserDirs;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// So viele Log-Zeilen landen im Export
pub const EXPORTED_LOG_ENTRIES: usize = 50;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("No export directory available")]
    NoExportDirectory,

    #[error("Failed to serialize debug report: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Failed to write debug report: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportReport {
    pub webrtc: bool,
    pub get_user_media: bool,
    pub get_display_media: bool,
    pub details: Vec<String>,
}

impl SupportReport {
    pub fn from_capabilities(capabilities: CaptureCapabilities) -> Self {
        Self {
            webrtc: true,
            get_user_media: capabilities.microphone || capabilities.camera,
            get_display_media: capabilities.screen,
            details: capabilities.details,
        }
    }
}

/// Momentaufnahme der Session für den Export
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallStateSnapshot {
    pub is_in_call: bool,
    pub participants: usize,
    pub is_video_enabled: bool,
    pub is_audio_enabled: bool,
    pub is_sharing_screen: bool,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugReport {
    pub timestamp: DateTime<Utc>,
    pub browser_support: SupportReport,
    pub connection_test: Option<ConnectionTest>,
    pub webrtc_config: WebRtcConfig,
    pub call_state: CallStateSnapshot,
    pub debug_logs: Vec<DebugEntry>,
}

impl DebugReport {
    pub fn collect(
        capabilities: CaptureCapabilities,
        connection_test: Option<ConnectionTest>,
        webrtc_config: WebRtcConfig,
        call_state: CallStateSnapshot,
        log: &DebugLog,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            browser_support: SupportReport::from_capabilities(capabilities),
            connection_test,
            webrtc_config,
            call_state,
            debug_logs: log.last(EXPORTED_LOG_ENTRIES),
        }
    }

    pub fn file_name(&self) -> String {
        format!("webrtc-debug-{}.json", self.timestamp.timestamp_millis())
    }

    pub fn to_json(&self) -> Result<String, ExportError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Schreibt den Bericht nach `dir` und gibt den Pfad zurück
    pub async fn export(&self, dir: &Path) -> Result<PathBuf, ExportError> {
        let json = self.to_json()?;
        tokio::fs::create_dir_all(dir).await?;

        let path = dir.join(self.file_name());
        tokio::fs::write(&path, json).await?;

        tracing::info!("WebRTC debug report written to {}", path.display());
        Ok(path)
    }
}

/// Standard-Zielordner: Downloads, sonst das Home-Verzeichnis
pub fn default_export_dir() -> Result<PathBuf, ExportError> {
    let dirs = UserDirs::new().ok_or(ExportError::NoExportDirectory)?;
    Ok(dirs
        .download_dir()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| dirs.home_dir().to_path_buf()))
}
