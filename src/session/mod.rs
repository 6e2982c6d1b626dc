//! Session Module - Zustandsmaschine eines Anrufs
//!
//! Dieses Modul verwaltet:
//! - Call-Phasen (Idle, Initiating, Receiving, Active)
//! - Teilnehmerliste und deren Media-Flags
//! - Eingehende Signale und ausgehende Session-Events
//! - Auswahl des Hauptbildes (Pinning)

mod engine;
mod events;
mod roster;
mod state;
mod viewport;

pub use engine::{CallSession, SessionError, SessionSnapshot};
pub use events::{OutgoingSignal, SessionEvent, SignalEvent};
pub use roster::{Participant, ParticipantUpdate, Roster};
pub use state::{format_call_duration, new_call_id, CallPhase, PhaseKind};
pub use viewport::{select_main_view, sidebar_participants, MainView, Placeholder};
