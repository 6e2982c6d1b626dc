//! Fehler-Klassifizierung
//!
//! Ordnet rohe Fehlermeldungen einem Code, einer Schwere und einer
//! verständlichen Meldung für das Fehler-Banner zu.

use crate::media::CaptureError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;

/// Maximale Anzahl gespeicherter Fehler
const MAX_HISTORY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    MediaPermissionDenied,
    MediaDeviceNotFound,
    MediaDeviceInUse,
    IceConnectionFailed,
    StunTurnError,
    SignalingError,
    CallTimeout,
    CallRejected,
    BrowserNotSupported,
    WebrtcGenericError,
    UnknownError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Klassifizierter Fehler, wie er im Banner und in der Historie landet
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallIssue {
    pub code: ErrorCode,
    pub message: String,
    pub severity: Severity,
    pub recoverable: bool,
    pub user_message: String,
    pub suggested_actions: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl CallIssue {
    fn new(
        code: ErrorCode,
        message: &str,
        severity: Severity,
        recoverable: bool,
        user_message: &str,
        suggested_actions: &[&str],
    ) -> Self {
        Self {
            code,
            message: message.to_string(),
            severity,
            recoverable,
            user_message: user_message.to_string(),
            suggested_actions: suggested_actions.iter().map(|s| s.to_string()).collect(),
            timestamp: Utc::now(),
        }
    }

    /// Capture-Fehler sind bereits typisiert, keine Textsuche nötig
    pub fn from_capture(error: &CaptureError) -> Self {
        let message = error.to_string();
        match error {
            CaptureError::PermissionDenied(_) => Self::permission_denied(&message),
            CaptureError::DeviceNotFound(_) | CaptureError::Unsupported(_) => {
                Self::device_not_found(&message)
            }
            CaptureError::DeviceInUse(_) => Self::device_in_use(&message),
            CaptureError::Backend(_) => classify(&message, Some("media")),
        }
    }

    pub fn call_timeout() -> Self {
        Self::new(
            ErrorCode::CallTimeout,
            "Call timed out",
            Severity::Medium,
            true,
            "Nobody answered the call.",
            &["Try calling again later"],
        )
    }

    pub fn call_rejected() -> Self {
        Self::new(
            ErrorCode::CallRejected,
            "Call was rejected",
            Severity::Low,
            true,
            "The call was declined.",
            &[],
        )
    }

    fn permission_denied(message: &str) -> Self {
        Self::new(
            ErrorCode::MediaPermissionDenied,
            message,
            Severity::High,
            true,
            "Camera and microphone access was denied. Please allow access and try again.",
            &[
                "Allow camera and microphone access in the system settings",
                "Try again",
            ],
        )
    }

    fn device_not_found(message: &str) -> Self {
        Self::new(
            ErrorCode::MediaDeviceNotFound,
            message,
            Severity::Medium,
            true,
            "Camera or microphone not found. Please check your devices.",
            &[
                "Check that your camera and microphone are connected",
                "Check device settings in your operating system",
            ],
        )
    }

    fn device_in_use(message: &str) -> Self {
        Self::new(
            ErrorCode::MediaDeviceInUse,
            message,
            Severity::Medium,
            true,
            "Your camera or microphone is being used by another application.",
            &[
                "Close other applications that might be using your camera/microphone",
                "Try again",
            ],
        )
    }
}

/// Ordnet eine Fehlermeldung einem [`ErrorCode`] zu
pub fn classify(message: &str, context: Option<&str>) -> CallIssue {
    let lower = message.to_lowercase();

    if lower.contains("permission denied") || lower.contains("notallowed") {
        return CallIssue::permission_denied(message);
    }
    if lower.contains("device not found") || lower.contains("notfound") {
        return CallIssue::device_not_found(message);
    }
    if lower.contains("could not start") || lower.contains("in use") {
        return CallIssue::device_in_use(message);
    }
    if lower.contains("timed out") || lower.contains("timeout") {
        return CallIssue::call_timeout();
    }
    if lower.contains("ice") || lower.contains("connection failed") {
        return CallIssue::new(
            ErrorCode::IceConnectionFailed,
            message,
            Severity::High,
            true,
            "Connection failed. This might be due to network restrictions.",
            &[
                "Check your internet connection",
                "Try connecting from a different network",
            ],
        );
    }
    if lower.contains("stun") || lower.contains("turn") {
        return CallIssue::new(
            ErrorCode::StunTurnError,
            message,
            Severity::Medium,
            true,
            "Network configuration issue. Connection may be unstable.",
            &["Try again in a few moments", "Check your firewall settings"],
        );
    }
    if lower.contains("signaling") || lower.contains("websocket") {
        return CallIssue::new(
            ErrorCode::SignalingError,
            message,
            Severity::High,
            true,
            "Connection to the server failed. Please try again.",
            &["Check your internet connection", "Try again in a few moments"],
        );
    }
    if lower.contains("not supported") {
        return CallIssue::new(
            ErrorCode::BrowserNotSupported,
            message,
            Severity::Critical,
            false,
            "Video calling is not supported on this system.",
            &["Update the application to the latest version"],
        );
    }
    if context == Some("webrtc") || lower.contains("peer") || lower.contains("rtc") {
        return CallIssue::new(
            ErrorCode::WebrtcGenericError,
            message,
            Severity::Medium,
            true,
            "A connection error occurred. Please try again.",
            &["Try ending and starting the call again"],
        );
    }

    CallIssue::new(
        ErrorCode::UnknownError,
        message,
        Severity::Medium,
        true,
        "An unexpected error occurred. Please try again.",
        &["Check your internet connection"],
    )
}

// ============================================================================
// ERROR HISTORY
// ============================================================================

/// Die letzten Fehler, neueste zuerst
#[derive(Debug, Default)]
pub struct ErrorHistory {
    entries: VecDeque<CallIssue>,
}

impl ErrorHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Speichert und loggt je nach Schwere
    pub fn record(&mut self, issue: CallIssue) {
        match issue.severity {
            Severity::Critical | Severity::High => {
                tracing::error!("[Call Error] {:?}: {} ({})", issue.code, issue.user_message, issue.message)
            }
            Severity::Medium => {
                tracing::warn!("[Call Error] {:?}: {} ({})", issue.code, issue.user_message, issue.message)
            }
            Severity::Low => {
                tracing::info!("[Call Error] {:?}: {} ({})", issue.code, issue.user_message, issue.message)
            }
        }

        self.entries.push_front(issue);
        self.entries.truncate(MAX_HISTORY);
    }

    pub fn recent(&self, count: usize) -> Vec<CallIssue> {
        self.entries.iter().take(count).cloned().collect()
    }

    /// Vorschläge zum letzten Fehler mit diesem Code
    pub fn recovery_actions(&self, code: ErrorCode) -> Vec<String> {
        self.entries
            .iter()
            .find(|e| e.code == code)
            .map(|e| e.suggested_actions.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
