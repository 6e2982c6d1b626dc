//! Events der Call-Session
//!
//! `SignalEvent` kommt von der Transport-Schicht herein, `SessionEvent` geht an
//! UI und Transport hinaus.

use super::roster::ParticipantUpdate;
use super::state::PhaseKind;
use crate::diagnostics::CallIssue;
use crate::media::RemoteStream;
use std::sync::Weak;

/// Eingehende Signale, in Empfangsreihenfolge angewendet
#[derive(Debug, Clone)]
pub enum SignalEvent {
    /// Jemand ruft an
    CallReceived { call_id: String, from_user_id: String },

    /// Angerufener hat angenommen
    CallAccepted { call_id: String, by_user_id: String },

    /// Angerufener hat abgelehnt
    CallRejected {
        call_id: String,
        by_user_id: String,
        reason: Option<String>,
    },

    /// Gegenseite hat aufgelegt
    CallEnded { call_id: String, by_user_id: String },

    /// Keine Antwort innerhalb der Frist des Transports
    CallTimedOut { call_id: String },

    /// Flags eines entfernten Teilnehmers haben sich geändert
    ParticipantUpdated {
        user_id: String,
        update: ParticipantUpdate,
    },

    /// Ein Remote-Track ist verfügbar, der Stream gehört dem Transport
    TrackAdded {
        user_id: String,
        stream: Weak<RemoteStream>,
    },

    /// Peer Connection getrennt
    PeerDisconnected { user_id: String },

    /// Fehler im Transport; `fatal` beendet den Anruf
    TransportError { message: String, fatal: bool },
}

/// Ausgehende Signale, die der Transport verschicken soll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingSignal {
    CallRequest {
        call_id: String,
        to_user_id: String,
    },
    CallResponse {
        call_id: String,
        to_user_id: String,
        accepted: bool,
    },
    CallEnd {
        call_id: String,
        to_user_id: Option<String>,
    },
    ParticipantUpdate {
        call_id: String,
        update: ParticipantUpdate,
    },
}

/// Events die von der CallSession ausgelöst werden
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(PhaseKind),
    RosterChanged,
    StreamsChanged,
    /// Sekunden seit `started_at`, einmal pro Sekunde
    DurationTick(u64),
    /// Fehler-Banner für die UI
    Error(CallIssue),
    ErrorDismissed,
    Outgoing(OutgoingSignal),
}
