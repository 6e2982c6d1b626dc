//! Teilnehmerliste eines Anrufs

use serde::{Deserialize, Serialize};

/// Teilnahme-Status eines Benutzers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: String,
    pub is_audio_enabled: bool,
    pub is_video_enabled: bool,
    pub is_sharing_screen: bool,
}

impl Participant {
    /// Neuer Teilnehmer mit Audio und Video an
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            is_audio_enabled: true,
            is_video_enabled: true,
            is_sharing_screen: false,
        }
    }

    pub fn apply(&mut self, update: &ParticipantUpdate) {
        if let Some(audio) = update.is_audio_enabled {
            self.is_audio_enabled = audio;
        }
        if let Some(video) = update.is_video_enabled {
            self.is_video_enabled = video;
        }
        if let Some(screen) = update.is_sharing_screen {
            self.is_sharing_screen = screen;
        }
    }
}

/// Teil-Update der Flags, so wie es über Signaling kommt
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_audio_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_video_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_sharing_screen: Option<bool>,
}

impl ParticipantUpdate {
    pub fn is_empty(&self) -> bool {
        self.is_audio_enabled.is_none()
            && self.is_video_enabled.is_none()
            && self.is_sharing_screen.is_none()
    }
}

/// Teilnehmer in Beitrittsreihenfolge, `user_id` ist eindeutig
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Roster {
    participants: Vec<Participant>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fügt hinzu oder ersetzt einen vorhandenen Eintrag an gleicher Stelle
    pub fn upsert(&mut self, participant: Participant) {
        match self
            .participants
            .iter_mut()
            .find(|p| p.user_id == participant.user_id)
        {
            Some(existing) => *existing = participant,
            None => self.participants.push(participant),
        }
    }

    pub fn remove(&mut self, user_id: &str) -> Option<Participant> {
        let index = self.participants.iter().position(|p| p.user_id == user_id)?;
        Some(self.participants.remove(index))
    }

    /// Gibt `false` zurück, wenn der Teilnehmer unbekannt ist
    pub fn update(&mut self, user_id: &str, update: &ParticipantUpdate) -> bool {
        match self.participants.iter_mut().find(|p| p.user_id == user_id) {
            Some(participant) => {
                participant.apply(update);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, user_id: &str) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.participants.iter()
    }

    /// Wer gerade den Bildschirm teilt (normalerweise höchstens einer)
    pub fn screen_sharers(&self) -> impl Iterator<Item = &Participant> {
        self.participants.iter().filter(|p| p.is_sharing_screen)
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn clear(&mut self) {
        self.participants.clear();
    }
}
