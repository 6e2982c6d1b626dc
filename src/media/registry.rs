//! Stream Registry
//!
//! Ordnet Teilnehmer ihren Media-Streams zu. Der lokale Stream gehört der
//! Session, Remote-Streams gehören der Transport-Schicht und werden hier nur
//! über `Weak` referenziert.

use super::capture::{CaptureSource, LocalTrack, MediaKind};
use std::collections::HashMap;
use std::sync::{Arc, Weak};

// ============================================================================
// LOCAL STREAM
// ============================================================================

/// Lokaler Stream aus Mikrofon, Kamera und optional Bildschirm
///
/// Während einer Bildschirmfreigabe bleibt der Kamera-Track erhalten und wird
/// beim Beenden wieder zur aktiven Videoquelle.
#[derive(Debug)]
pub struct LocalStream {
    id: String,
    microphone: Option<LocalTrack>,
    camera: Option<LocalTrack>,
    screen: Option<LocalTrack>,
}

impl LocalStream {
    pub fn new(microphone: Option<LocalTrack>, camera: Option<LocalTrack>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            microphone,
            camera,
            screen: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Setzt einen nachträglich angeforderten Mikrofon- oder Kamera-Track
    pub fn insert_track(&mut self, track: LocalTrack) {
        if let Some(previous) = self.replace_track(track) {
            tracing::warn!("Replacing local track {}", previous.id());
        }
    }

    /// Setzt den Track in seinen Slot und gibt den vorherigen zurück
    pub fn replace_track(&mut self, track: LocalTrack) -> Option<LocalTrack> {
        let slot = match track.source() {
            CaptureSource::Microphone => &mut self.microphone,
            CaptureSource::Camera => &mut self.camera,
            CaptureSource::Screen => &mut self.screen,
        };
        slot.replace(track)
    }

    pub fn track(&self, source: CaptureSource) -> Option<&LocalTrack> {
        match source {
            CaptureSource::Microphone => self.microphone.as_ref(),
            CaptureSource::Camera => self.camera.as_ref(),
            CaptureSource::Screen => self.screen.as_ref(),
        }
    }

    pub fn track_mut(&mut self, source: CaptureSource) -> Option<&mut LocalTrack> {
        match source {
            CaptureSource::Microphone => self.microphone.as_mut(),
            CaptureSource::Camera => self.camera.as_mut(),
            CaptureSource::Screen => self.screen.as_mut(),
        }
    }

    /// Der Track, der gerade als Video gesendet wird
    pub fn active_video(&self) -> Option<&LocalTrack> {
        self.screen.as_ref().or(self.camera.as_ref())
    }

    pub fn is_sharing_screen(&self) -> bool {
        self.screen.is_some()
    }

    /// Setzt den Bildschirm-Track als Videoquelle
    pub fn start_screen(&mut self, track: LocalTrack) {
        if let Some(previous) = self.screen.replace(track) {
            tracing::warn!("Replacing running screen capture {}", previous.id());
        }
    }

    /// Gibt den Bildschirm-Track frei, die Kamera ist wieder aktiv
    pub fn stop_screen(&mut self) -> bool {
        self.screen.take().is_some()
    }

    /// Anzahl der gehaltenen Geräte
    pub fn open_tracks(&self) -> usize {
        [&self.microphone, &self.camera, &self.screen]
            .iter()
            .filter(|t| t.is_some())
            .count()
    }
}

// ============================================================================
// REMOTE STREAM
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub id: String,
    pub kind: MediaKind,
}

/// Stream eines entfernten Teilnehmers, im Besitz der Transport-Schicht
#[derive(Debug)]
pub struct RemoteStream {
    pub id: String,
    pub user_id: String,
    pub tracks: Vec<RemoteTrack>,
}

impl RemoteStream {
    pub fn new(id: impl Into<String>, user_id: impl Into<String>, tracks: Vec<RemoteTrack>) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            tracks,
        }
    }
}

// ============================================================================
// REGISTRY
// ============================================================================

/// Leseansicht auf einen registrierten Stream
#[derive(Debug)]
pub enum StreamView<'a> {
    Local(&'a LocalStream),
    Remote(Arc<RemoteStream>),
}

impl StreamView<'_> {
    pub fn stream_id(&self) -> &str {
        match self {
            Self::Local(stream) => stream.id(),
            Self::Remote(stream) => &stream.id,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }
}

/// userId → Stream
#[derive(Debug)]
pub struct StreamRegistry {
    local_user_id: String,
    local: Option<LocalStream>,
    remote: HashMap<String, Weak<RemoteStream>>,
}

impl StreamRegistry {
    pub fn new(local_user_id: impl Into<String>) -> Self {
        Self {
            local_user_id: local_user_id.into(),
            local: None,
            remote: HashMap::new(),
        }
    }

    pub fn local_user_id(&self) -> &str {
        &self.local_user_id
    }

    /// Übernimmt den lokalen Stream, ein vorheriger wird freigegeben
    pub fn set_local(&mut self, stream: LocalStream) {
        if let Some(previous) = self.local.replace(stream) {
            tracing::warn!("Replacing local stream {}", previous.id());
        }
    }

    pub fn local(&self) -> Option<&LocalStream> {
        self.local.as_ref()
    }

    pub fn local_mut(&mut self) -> Option<&mut LocalStream> {
        self.local.as_mut()
    }

    /// Registriert einen Remote-Stream ohne Besitz zu übernehmen
    pub fn insert_remote(&mut self, user_id: impl Into<String>, stream: Weak<RemoteStream>) {
        self.remote.insert(user_id.into(), stream);
    }

    pub fn remove_remote(&mut self, user_id: &str) -> bool {
        self.remote.remove(user_id).is_some()
    }

    /// Liefert den Stream eines Teilnehmers, tote Remote-Referenzen zählen nicht
    pub fn get(&self, user_id: &str) -> Option<StreamView<'_>> {
        if user_id == self.local_user_id {
            return self.local.as_ref().map(StreamView::Local);
        }
        self.remote
            .get(user_id)
            .and_then(Weak::upgrade)
            .map(StreamView::Remote)
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.get(user_id).is_some()
    }

    /// Anzahl lebender Einträge
    pub fn len(&self) -> usize {
        let remote = self
            .remote
            .values()
            .filter(|s| s.strong_count() > 0)
            .count();
        remote + usize::from(self.local.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entfernt alles; der lokale Stream wird dabei freigegeben
    pub fn clear(&mut self) {
        self.local = None;
        self.remote.clear();
    }
}
