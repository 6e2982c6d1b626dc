//! Auswahl des Hauptbildes
//!
//! Reine Funktionen über Pin, Registry und Roster, damit gleiche Eingaben
//! immer dasselbe Bild ergeben.

use super::roster::{Participant, Roster};
use super::state::PhaseKind;
use crate::media::StreamRegistry;

/// Platzhalter, wenn kein Stream angezeigt werden kann
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    Connecting,
    Waiting,
}

/// Was im Hauptbereich angezeigt wird
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MainView {
    Stream {
        user_id: String,
        stream_id: String,
        is_local: bool,
    },
    Placeholder(Placeholder),
}

impl MainView {
    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::Stream { user_id, .. } => Some(user_id),
            Self::Placeholder(_) => None,
        }
    }
}

/// Gepinnter Teilnehmer falls vorhanden, sonst lokal, sonst Platzhalter
pub fn select_main_view(
    pinned: Option<&str>,
    registry: &StreamRegistry,
    phase: PhaseKind,
) -> MainView {
    let candidates = pinned
        .into_iter()
        .chain(std::iter::once(registry.local_user_id()));

    for user_id in candidates {
        if let Some(view) = registry.get(user_id) {
            return MainView::Stream {
                user_id: user_id.to_string(),
                stream_id: view.stream_id().to_string(),
                is_local: view.is_local(),
            };
        }
    }

    match phase {
        PhaseKind::Initiating | PhaseKind::Receiving => MainView::Placeholder(Placeholder::Connecting),
        PhaseKind::Idle | PhaseKind::Active => MainView::Placeholder(Placeholder::Waiting),
    }
}

/// Alle Teilnehmer außer dem im Hauptbild
pub fn sidebar_participants<'a>(main: &MainView, roster: &'a Roster) -> Vec<&'a Participant> {
    roster
        .iter()
        .filter(|p| main.user_id() != Some(p.user_id.as_str()))
        .collect()
}
