//! Call State
//!
//! Die Phasen eines Anrufs als Tagged Union. Jede Phase außer `Idle` trägt die
//! Call-ID, eine Call-ID ohne Anruf (oder umgekehrt) ist nicht darstellbar.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Aktueller Status eines Anrufs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallPhase {
    /// Kein aktiver Anruf
    Idle,
    /// Ausgehender Anruf wartet auf Annahme
    Initiating { call_id: String, target_user_id: String },
    /// Eingehender Anruf wartet auf Antwort
    Receiving { call_id: String, from_user_id: String },
    /// Anruf aktiv
    Active {
        call_id: String,
        peer_user_id: String,
        started_at: DateTime<Utc>,
    },
}

/// Phase ohne Nutzdaten, für Fehler und Events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseKind {
    Idle,
    Initiating,
    Receiving,
    Active,
}

impl std::fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Initiating => "initiating",
            Self::Receiving => "receiving",
            Self::Active => "active",
        };
        f.write_str(name)
    }
}

impl CallPhase {
    pub fn kind(&self) -> PhaseKind {
        match self {
            Self::Idle => PhaseKind::Idle,
            Self::Initiating { .. } => PhaseKind::Initiating,
            Self::Receiving { .. } => PhaseKind::Receiving,
            Self::Active { .. } => PhaseKind::Active,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn call_id(&self) -> Option<&str> {
        match self {
            Self::Idle => None,
            Self::Initiating { call_id, .. }
            | Self::Receiving { call_id, .. }
            | Self::Active { call_id, .. } => Some(call_id),
        }
    }

    /// Der andere Teilnehmer des Anrufs
    pub fn peer_user_id(&self) -> Option<&str> {
        match self {
            Self::Idle => None,
            Self::Initiating { target_user_id, .. } => Some(target_user_id),
            Self::Receiving { from_user_id, .. } => Some(from_user_id),
            Self::Active { peer_user_id, .. } => Some(peer_user_id),
        }
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Active { started_at, .. } => Some(*started_at),
            _ => None,
        }
    }

    pub fn belongs_to(&self, call_id: &str) -> bool {
        self.call_id() == Some(call_id)
    }
}

/// Erzeugt eine neue, eindeutige Call-ID
pub fn new_call_id() -> String {
    format!("call-{}", uuid::Uuid::new_v4())
}

/// Formatiert die Anrufdauer als `m:ss` oder `h:mm:ss`
pub fn format_call_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes}:{secs:02}")
    }
}
