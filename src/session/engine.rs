//! Call Session
//!
//! Der zentrale Handle eines Anrufs: Zustandsmaschine, Teilnehmerliste,
//! Stream Registry, Media-Toggles, Pin und Dauer-Ticker.
//!
//! Eingehende Signale laufen über [`CallSession::handle_signal`] (bzw.
//! [`CallSession::run`] für einen mpsc-Kanal), ausgehende Signale werden als
//! [`SessionEvent::Outgoing`] auf dem Broadcast-Kanal veröffentlicht.

use super::events::{OutgoingSignal, SessionEvent, SignalEvent};
use super::roster::{Participant, ParticipantUpdate, Roster};
use super::state::{new_call_id, CallPhase, PhaseKind};
use super::viewport::{select_main_view, sidebar_participants, MainView};
use crate::config::{CallConfig, MediaPreferences};
use crate::diagnostics::{classify, CallIssue, CallStateSnapshot, ErrorHistory};
use crate::media::{
    CaptureCapabilities, CaptureError, CaptureSource, LocalStream, MediaCapture, MediaConstraints,
    StreamRegistry,
};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

const EVENT_CHANNEL_CAPACITY: usize = 100;
const TICK_INTERVAL: Duration = Duration::from_secs(1);

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Cannot {operation} while call is {state}")]
    InvalidState {
        operation: &'static str,
        state: PhaseKind,
    },

    #[error("Media access denied: {0}")]
    CaptureDenied(CaptureError),

    /// Gerät fehlt, ist belegt oder das Backend hat versagt
    #[error("Media capture failed: {0}")]
    Capture(CaptureError),

    #[error("Signaling error: {0}")]
    Signaling(String),

    #[error("No active local stream")]
    NoActiveStream,

    #[error("Call timed out")]
    CallTimeout,

    #[error("Call ended while the operation was pending")]
    Aborted,
}

impl From<CaptureError> for SessionError {
    fn from(error: CaptureError) -> Self {
        match error {
            CaptureError::PermissionDenied(_) => Self::CaptureDenied(error),
            other => Self::Capture(other),
        }
    }
}

// ============================================================================
// SNAPSHOT
// ============================================================================

/// Lesekopie des Session-Zustands für die UI
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub phase: CallPhase,
    pub participants: Vec<Participant>,
    pub is_audio_enabled: bool,
    pub is_video_enabled: bool,
    pub is_sharing_screen: bool,
    pub pinned: Option<String>,
    pub last_error: Option<String>,
    pub duration_secs: u64,
}

// ============================================================================
// CALL SESSION
// ============================================================================

struct SessionState {
    phase: CallPhase,
    roster: Roster,
    registry: StreamRegistry,
    /// Lokale Audio/Video-Wahl, bleibt über Anrufe hinweg erhalten
    media: MediaPreferences,
    /// Gilt für die nächste Anforderung, über [`CallSession::update_media`] änderbar
    constraints: MediaConstraints,
    pinned: Option<String>,
    last_error: Option<String>,
    duration_secs: u64,
    accept_pending: bool,
    ticker: Option<JoinHandle<()>>,
    history: ErrorHistory,
}

impl SessionState {
    fn is_sharing_screen(&self) -> bool {
        self.registry
            .local()
            .is_some_and(LocalStream::is_sharing_screen)
    }

    fn stop_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        self.duration_secs = 0;
    }
}

struct Inner {
    local_user_id: String,
    capture: Arc<dyn MediaCapture>,
    state: Mutex<SessionState>,
    audio_toggle: tokio::sync::Mutex<()>,
    video_toggle: tokio::sync::Mutex<()>,
    screen_toggle: tokio::sync::Mutex<()>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl Inner {
    fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.state.get_mut().stop_ticker();
    }
}

/// Handle auf die Session eines lokalen Benutzers
///
/// Klone teilen denselben Zustand, z.B. für einen Task der [`CallSession::run`]
/// ausführt.
#[derive(Clone)]
pub struct CallSession {
    inner: Arc<Inner>,
}

impl CallSession {
    /// Erstellt eine neue Session im Zustand `Idle`
    pub fn new(config: &CallConfig, capture: Arc<dyn MediaCapture>) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let state = SessionState {
            phase: CallPhase::Idle,
            roster: Roster::new(),
            registry: StreamRegistry::new(config.local_user_id.clone()),
            media: config.media,
            constraints: config.constraints.clone(),
            pinned: None,
            last_error: None,
            duration_secs: 0,
            accept_pending: false,
            ticker: None,
            history: ErrorHistory::new(),
        };

        Self {
            inner: Arc::new(Inner {
                local_user_id: config.local_user_id.clone(),
                capture,
                state: Mutex::new(state),
                audio_toggle: tokio::sync::Mutex::new(()),
                video_toggle: tokio::sync::Mutex::new(()),
                screen_toggle: tokio::sync::Mutex::new(()),
                event_tx,
            }),
        }
    }

    /// Gibt einen Event-Receiver zurück
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn local_user_id(&self) -> &str {
        &self.inner.local_user_id
    }

    pub fn phase(&self) -> CallPhase {
        self.inner.state.lock().phase.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.inner.state.lock();
        SessionSnapshot {
            phase: state.phase.clone(),
            participants: state.roster.iter().cloned().collect(),
            is_audio_enabled: state.media.audio_enabled,
            is_video_enabled: state.media.video_enabled,
            is_sharing_screen: state.is_sharing_screen(),
            pinned: state.pinned.clone(),
            last_error: state.last_error.clone(),
            duration_secs: state.duration_secs,
        }
    }

    /// Zustand in der Form des Debug-Exports
    pub fn export_snapshot(&self) -> CallStateSnapshot {
        let state = self.inner.state.lock();
        CallStateSnapshot {
            is_in_call: !state.phase.is_idle(),
            participants: state.roster.len(),
            is_video_enabled: state.media.video_enabled,
            is_audio_enabled: state.media.audio_enabled,
            is_sharing_screen: state.is_sharing_screen(),
            last_error: state.last_error.clone(),
        }
    }

    pub fn capabilities(&self) -> CaptureCapabilities {
        self.inner.capture.capabilities()
    }

    /// Anzahl der gehaltenen lokalen Geräte
    pub fn open_local_tracks(&self) -> usize {
        self.inner
            .state
            .lock()
            .registry
            .local()
            .map_or(0, LocalStream::open_tracks)
    }

    pub fn has_stream(&self, user_id: &str) -> bool {
        self.inner.state.lock().registry.contains(user_id)
    }

    /// Sekunden seit Beginn des aktiven Anrufs
    pub fn duration(&self) -> u64 {
        self.inner.state.lock().duration_secs
    }

    pub fn recent_errors(&self, count: usize) -> Vec<CallIssue> {
        self.inner.state.lock().history.recent(count)
    }

    pub fn media_constraints(&self) -> MediaConstraints {
        self.inner.state.lock().constraints.clone()
    }

    // ========================================================================
    // CALL LIFECYCLE
    // ========================================================================

    /// Startet einen ausgehenden Anruf und gibt die Call-ID zurück
    pub async fn initiate_call(&self, target_user_id: &str) -> Result<String, SessionError> {
        let call_id = new_call_id();

        // Synchron auf Initiating, damit ein zweiter Aufruf sofort scheitert
        let preferences = {
            let mut state = self.inner.state.lock();
            if !state.phase.is_idle() {
                return Err(SessionError::InvalidState {
                    operation: "initiate a call",
                    state: state.phase.kind(),
                });
            }
            state.phase = CallPhase::Initiating {
                call_id: call_id.clone(),
                target_user_id: target_user_id.to_string(),
            };
            state.last_error = None;
            self.inner.emit(SessionEvent::StateChanged(PhaseKind::Initiating));
            state.media
        };

        tracing::info!("Initiating call {} to {}", call_id, target_user_id);

        let acquired = self.acquire_local_stream(preferences).await;

        let mut state = self.inner.state.lock();
        let stream = match acquired {
            Ok(stream) => stream,
            Err(e) => {
                if state.phase.belongs_to(&call_id) {
                    self.reset_call(&mut state);
                    self.fail(&mut state, CallIssue::from_capture(&e));
                }
                return Err(e.into());
            }
        };

        if !state.phase.belongs_to(&call_id) {
            tracing::info!("Call {} ended while acquiring media, releasing tracks", call_id);
            return Err(SessionError::Aborted);
        }

        state.registry.set_local(stream);
        let local = self.local_participant(&state);
        state.roster.upsert(local);

        self.inner.emit(SessionEvent::StreamsChanged);
        self.inner.emit(SessionEvent::RosterChanged);
        self.inner
            .emit(SessionEvent::Outgoing(OutgoingSignal::CallRequest {
                call_id: call_id.clone(),
                to_user_id: target_user_id.to_string(),
            }));

        Ok(call_id)
    }

    /// Nimmt den klingelnden Anruf an
    pub async fn accept_incoming_call(
        &self,
        call_id: &str,
        from_user_id: &str,
    ) -> Result<(), SessionError> {
        let preferences = {
            let mut state = self.inner.state.lock();
            let matches = matches!(
                &state.phase,
                CallPhase::Receiving { call_id: current, from_user_id: caller }
                    if current == call_id && caller == from_user_id
            );
            if !matches || state.accept_pending {
                return Err(SessionError::InvalidState {
                    operation: "accept this call",
                    state: state.phase.kind(),
                });
            }
            state.accept_pending = true;
            state.media
        };

        tracing::info!("Accepting call {} from {}", call_id, from_user_id);

        let acquired = self.acquire_local_stream(preferences).await;

        let mut state = self.inner.state.lock();
        state.accept_pending = false;

        if !state.phase.belongs_to(call_id) {
            tracing::info!("Call {} ended while accepting, releasing tracks", call_id);
            return Err(SessionError::Aborted);
        }

        let stream = match acquired {
            Ok(stream) => stream,
            Err(e) => {
                self.reset_call(&mut state);
                self.fail(&mut state, CallIssue::from_capture(&e));
                self.inner
                    .emit(SessionEvent::Outgoing(OutgoingSignal::CallResponse {
                        call_id: call_id.to_string(),
                        to_user_id: from_user_id.to_string(),
                        accepted: false,
                    }));
                return Err(e.into());
            }
        };

        state.registry.set_local(stream);
        self.enter_active(&mut state, call_id, from_user_id);

        let local = self.local_participant(&state);
        state.roster.upsert(local);
        state.roster.upsert(Participant::new(from_user_id));

        self.inner.emit(SessionEvent::StreamsChanged);
        self.inner.emit(SessionEvent::RosterChanged);
        self.inner
            .emit(SessionEvent::Outgoing(OutgoingSignal::CallResponse {
                call_id: call_id.to_string(),
                to_user_id: from_user_id.to_string(),
                accepted: true,
            }));

        Ok(())
    }

    /// Lehnt den klingelnden Anruf ab, ohne Medien anzufordern
    pub fn reject_incoming_call(&self, call_id: &str, from_user_id: &str) -> Result<(), SessionError> {
        let mut state = self.inner.state.lock();
        let matches = matches!(
            &state.phase,
            CallPhase::Receiving { call_id: current, from_user_id: caller }
                if current == call_id && caller == from_user_id
        );
        if !matches {
            return Err(SessionError::InvalidState {
                operation: "reject this call",
                state: state.phase.kind(),
            });
        }

        tracing::info!("Rejecting call {} from {}", call_id, from_user_id);

        self.reset_call(&mut state);
        self.clear_error(&mut state);
        self.inner
            .emit(SessionEvent::Outgoing(OutgoingSignal::CallResponse {
                call_id: call_id.to_string(),
                to_user_id: from_user_id.to_string(),
                accepted: false,
            }));

        Ok(())
    }

    /// Beendet den Anruf und gibt alle lokalen Medien frei
    ///
    /// Aus `Idle` läuft das (leere) Aufräumen trotzdem, gemeldet wird
    /// `InvalidState`.
    pub fn end_call(&self) -> Result<(), SessionError> {
        let mut state = self.inner.state.lock();
        let previous = self.reset_call(&mut state);

        let Some(call_id) = previous.call_id() else {
            return Err(SessionError::InvalidState {
                operation: "end the call",
                state: PhaseKind::Idle,
            });
        };

        tracing::info!("Ended call {}", call_id);
        self.clear_error(&mut state);
        self.inner
            .emit(SessionEvent::Outgoing(OutgoingSignal::CallEnd {
                call_id: call_id.to_string(),
                to_user_id: previous.peer_user_id().map(str::to_string),
            }));

        Ok(())
    }

    // ========================================================================
    // INBOUND SIGNALS
    // ========================================================================

    /// Verarbeitet Signale aus dem Kanal in Empfangsreihenfolge
    pub async fn run(&self, mut signals: mpsc::Receiver<SignalEvent>) {
        while let Some(event) = signals.recv().await {
            if let Err(e) = self.handle_signal(event) {
                tracing::warn!("Signal handling: {}", e);
            }
        }
        tracing::debug!("Signal channel closed, call session loop stopped");
    }

    /// Die einzige Übergangsfunktion für eingehende Signale
    pub fn handle_signal(&self, event: SignalEvent) -> Result<(), SessionError> {
        let mut state = self.inner.state.lock();

        match event {
            SignalEvent::CallReceived {
                call_id,
                from_user_id,
            } => {
                if state.phase.is_idle() {
                    tracing::info!("Incoming call {} from {}", call_id, from_user_id);
                    state.phase = CallPhase::Receiving {
                        call_id,
                        from_user_id,
                    };
                    state.last_error = None;
                    self.inner
                        .emit(SessionEvent::StateChanged(PhaseKind::Receiving));
                } else {
                    tracing::info!(
                        "Busy in {} call, rejecting incoming call {} from {}",
                        state.phase.kind(),
                        call_id,
                        from_user_id
                    );
                    self.inner
                        .emit(SessionEvent::Outgoing(OutgoingSignal::CallResponse {
                            call_id,
                            to_user_id: from_user_id,
                            accepted: false,
                        }));
                }
            }

            SignalEvent::CallAccepted {
                call_id,
                by_user_id,
            } => {
                if !Self::is_initiating(&state.phase, &call_id) {
                    tracing::debug!("Ignoring accept for unknown call {}", call_id);
                    return Ok(());
                }
                tracing::info!("Call {} accepted by {}", call_id, by_user_id);
                self.enter_active(&mut state, &call_id, &by_user_id);
                state.roster.upsert(Participant::new(by_user_id));
                self.inner.emit(SessionEvent::RosterChanged);
            }

            SignalEvent::CallRejected {
                call_id,
                by_user_id,
                reason,
            } => {
                if !Self::is_initiating(&state.phase, &call_id) {
                    tracing::debug!("Ignoring reject for unknown call {}", call_id);
                    return Ok(());
                }
                tracing::info!(
                    "Call {} rejected by {} ({})",
                    call_id,
                    by_user_id,
                    reason.as_deref().unwrap_or("no reason")
                );
                self.reset_call(&mut state);
                self.fail(&mut state, CallIssue::call_rejected());
            }

            SignalEvent::CallEnded {
                call_id,
                by_user_id,
            } => {
                if !state.phase.belongs_to(&call_id) {
                    tracing::debug!("Ignoring end of unknown call {}", call_id);
                    return Ok(());
                }
                tracing::info!("Call {} ended by {}", call_id, by_user_id);
                self.reset_call(&mut state);
                self.clear_error(&mut state);
            }

            SignalEvent::CallTimedOut { call_id } => {
                let waiting = matches!(
                    state.phase,
                    CallPhase::Initiating { .. } | CallPhase::Receiving { .. }
                );
                if !waiting || !state.phase.belongs_to(&call_id) {
                    tracing::debug!("Ignoring timeout for call {}", call_id);
                    return Ok(());
                }
                tracing::info!("Call {} timed out", call_id);
                self.reset_call(&mut state);
                self.fail(&mut state, CallIssue::call_timeout());
                return Err(SessionError::CallTimeout);
            }

            SignalEvent::ParticipantUpdated { user_id, update } => {
                if state.phase.is_idle() || user_id == self.inner.local_user_id {
                    tracing::debug!("Ignoring participant update for {}", user_id);
                    return Ok(());
                }
                if state.roster.update(&user_id, &update) {
                    self.inner.emit(SessionEvent::RosterChanged);
                } else {
                    tracing::debug!("Participant update for unknown user {}", user_id);
                }
            }

            SignalEvent::TrackAdded { user_id, stream } => {
                if state.phase.is_idle() {
                    tracing::debug!("Ignoring remote track from {} outside a call", user_id);
                    return Ok(());
                }
                tracing::debug!("Remote stream from peer {} registered", user_id);
                state.registry.insert_remote(user_id.clone(), stream);
                if state.roster.get(&user_id).is_none() {
                    state.roster.upsert(Participant::new(user_id));
                    self.inner.emit(SessionEvent::RosterChanged);
                }
                self.inner.emit(SessionEvent::StreamsChanged);
            }

            SignalEvent::PeerDisconnected { user_id } => {
                tracing::info!("Peer {} disconnected", user_id);
                if state.roster.remove(&user_id).is_some() {
                    self.inner.emit(SessionEvent::RosterChanged);
                }
                if state.registry.remove_remote(&user_id) {
                    self.inner.emit(SessionEvent::StreamsChanged);
                }
                if state.pinned.as_deref() == Some(user_id.as_str()) {
                    state.pinned = None;
                }
            }

            SignalEvent::TransportError { message, fatal } => {
                let issue = classify(&message, Some("webrtc"));
                if fatal && !state.phase.is_idle() {
                    tracing::warn!("Fatal transport error, ending call: {}", message);
                    self.reset_call(&mut state);
                }
                self.fail(&mut state, issue);
                return Err(SessionError::Signaling(message));
            }
        }

        Ok(())
    }

    // ========================================================================
    // MEDIA TOGGLES
    // ========================================================================

    /// Schaltet das Mikrofon um und gibt den neuen Zustand zurück
    pub async fn toggle_audio(&self) -> Result<bool, SessionError> {
        let _guard = self.inner.audio_toggle.lock().await;
        self.toggle_device(CaptureSource::Microphone).await
    }

    /// Schaltet die Kamera um und gibt den neuen Zustand zurück
    pub async fn toggle_video(&self) -> Result<bool, SessionError> {
        let _guard = self.inner.video_toggle.lock().await;
        self.toggle_device(CaptureSource::Camera).await
    }

    async fn toggle_device(&self, source: CaptureSource) -> Result<bool, SessionError> {
        let (enable, needs_track) = {
            let mut state = self.inner.state.lock();
            let enable = !Self::preference(&state.media, source);
            let Some(stream) = state.registry.local_mut() else {
                tracing::warn!("Cannot toggle {}: no active local stream", source);
                return Err(SessionError::NoActiveStream);
            };
            (enable, enable && stream.track_mut(source).is_none())
        };

        // Beim Start mit ausgeschaltetem Gerät gibt es noch keinen Track
        if needs_track {
            let acquired = self
                .inner
                .capture
                .acquire(source, self.media_constraints())
                .await;

            let mut state = self.inner.state.lock();
            let track = match acquired {
                Ok(track) => track,
                Err(e) => {
                    self.fail(&mut state, CallIssue::from_capture(&e));
                    return Err(e.into());
                }
            };
            let Some(stream) = state.registry.local_mut() else {
                return Err(SessionError::Aborted);
            };
            stream.insert_track(track);
            self.inner.emit(SessionEvent::StreamsChanged);
        }

        let mut state = self.inner.state.lock();
        let Some(stream) = state.registry.local_mut() else {
            return Err(SessionError::Aborted);
        };
        if let Some(track) = stream.track_mut(source) {
            track.set_enabled(enable);
        }

        let mut update = ParticipantUpdate::default();
        match source {
            CaptureSource::Microphone => {
                state.media.audio_enabled = enable;
                update.is_audio_enabled = Some(enable);
            }
            _ => {
                state.media.video_enabled = enable;
                update.is_video_enabled = Some(enable);
            }
        }

        tracing::info!("Local {} {}", source, if enable { "enabled" } else { "disabled" });
        self.publish_local_update(&mut state, update);

        Ok(enable)
    }

    /// Startet oder beendet die Bildschirmfreigabe
    ///
    /// Der Kamera-Track bleibt während der Freigabe erhalten und ist danach
    /// wieder die aktive Videoquelle.
    pub async fn toggle_screen_share(&self) -> Result<bool, SessionError> {
        let _guard = self.inner.screen_toggle.lock().await;

        let sharing = {
            let state = self.inner.state.lock();
            match state.registry.local() {
                Some(stream) => stream.is_sharing_screen(),
                None => {
                    tracing::warn!("Cannot toggle screen share: no active local stream");
                    return Err(SessionError::NoActiveStream);
                }
            }
        };

        if sharing {
            self.on_screen_capture_ended();
            return Ok(false);
        }

        let acquired = self
            .inner
            .capture
            .acquire(CaptureSource::Screen, self.media_constraints())
            .await;

        let mut state = self.inner.state.lock();
        let track = match acquired {
            Ok(track) => track,
            Err(e) => {
                self.fail(&mut state, CallIssue::from_capture(&e));
                return Err(e.into());
            }
        };
        let Some(stream) = state.registry.local_mut() else {
            return Err(SessionError::Aborted);
        };
        stream.start_screen(track);

        tracing::info!("Screen sharing started");
        self.inner.emit(SessionEvent::StreamsChanged);
        self.publish_local_update(
            &mut state,
            ParticipantUpdate {
                is_sharing_screen: Some(true),
                ..Default::default()
            },
        );

        Ok(true)
    }

    /// Die Plattform hat die Bildschirmaufnahme beendet
    ///
    /// Gibt `true` zurück, wenn eine Freigabe lief.
    pub fn on_screen_capture_ended(&self) -> bool {
        let mut state = self.inner.state.lock();
        let stopped = state
            .registry
            .local_mut()
            .is_some_and(LocalStream::stop_screen);
        if !stopped {
            return false;
        }

        tracing::info!("Screen sharing stopped, camera restored");
        self.inner.emit(SessionEvent::StreamsChanged);
        self.publish_local_update(
            &mut state,
            ParticipantUpdate {
                is_sharing_screen: Some(false),
                ..Default::default()
            },
        );
        true
    }

    /// Wechselt Gerät oder Auflösung während des Anrufs
    ///
    /// Die neuen Tracks werden zuerst angefordert und erst dann gegen die alten
    /// getauscht, die Ein/Aus-Zustände bleiben erhalten. Scheitert die
    /// Anforderung, bleibt der laufende Stream unverändert. Ohne Anruf gelten
    /// die Constraints ab dem nächsten Anruf.
    pub async fn update_media(&self, constraints: MediaConstraints) -> Result<(), SessionError> {
        let _audio = self.inner.audio_toggle.lock().await;
        let _video = self.inner.video_toggle.lock().await;

        let (stream_id, sources) = {
            let mut state = self.inner.state.lock();
            let current = state.registry.local().map(|stream| {
                let sources: Vec<(CaptureSource, bool)> =
                    [CaptureSource::Microphone, CaptureSource::Camera]
                        .into_iter()
                        .filter_map(|source| stream.track(source).map(|t| (source, t.is_enabled())))
                        .collect();
                (stream.id().to_string(), sources)
            });
            match current {
                Some(current) => current,
                None => {
                    tracing::info!("No local stream, media constraints apply to the next call");
                    state.constraints = constraints;
                    return Ok(());
                }
            }
        };

        let mut replacements = Vec::with_capacity(sources.len());
        for (source, enabled) in sources {
            match self.inner.capture.acquire(source, constraints.clone()).await {
                Ok(mut track) => {
                    track.set_enabled(enabled);
                    replacements.push(track);
                }
                Err(e) => {
                    // Bereits neu geöffnete Tracks werden beim Drop freigegeben
                    let mut state = self.inner.state.lock();
                    self.fail(&mut state, CallIssue::from_capture(&e));
                    return Err(e.into());
                }
            }
        }

        let mut state = self.inner.state.lock();
        let Some(stream) = state
            .registry
            .local_mut()
            .filter(|stream| stream.id() == stream_id)
        else {
            tracing::info!("Call ended while switching media, releasing new tracks");
            return Err(SessionError::Aborted);
        };

        for track in replacements {
            if let Some(previous) = stream.replace_track(track) {
                tracing::debug!("Switched {} track {}", previous.source(), previous.id());
            }
        }
        state.constraints = constraints;

        tracing::info!("Local media switched to new constraints");
        self.inner.emit(SessionEvent::StreamsChanged);
        Ok(())
    }

    // ========================================================================
    // VIEWPORT & ERRORS
    // ========================================================================

    pub fn pin_participant(&self, user_id: impl Into<String>) {
        self.inner.state.lock().pinned = Some(user_id.into());
    }

    pub fn unpin_participant(&self) {
        self.inner.state.lock().pinned = None;
    }

    pub fn main_view(&self) -> MainView {
        let state = self.inner.state.lock();
        select_main_view(state.pinned.as_deref(), &state.registry, state.phase.kind())
    }

    /// Teilnehmer für die Seitenleiste (alle außer dem Hauptbild)
    pub fn sidebar(&self) -> Vec<Participant> {
        let state = self.inner.state.lock();
        let main = select_main_view(state.pinned.as_deref(), &state.registry, state.phase.kind());
        sidebar_participants(&main, &state.roster)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Schließt das Fehler-Banner
    pub fn dismiss_error(&self) {
        let mut state = self.inner.state.lock();
        self.clear_error(&mut state);
    }

    // ========================================================================
    // PRIVATE METHODS
    // ========================================================================

    fn is_initiating(phase: &CallPhase, call_id: &str) -> bool {
        matches!(phase, CallPhase::Initiating { call_id: current, .. } if current == call_id)
    }

    fn preference(media: &MediaPreferences, source: CaptureSource) -> bool {
        match source {
            CaptureSource::Microphone => media.audio_enabled,
            _ => media.video_enabled,
        }
    }

    /// Fordert Mikrofon und Kamera gemäß den Voreinstellungen an
    ///
    /// Scheitert die Kamera, wird das bereits offene Mikrofon beim Drop wieder
    /// freigegeben.
    async fn acquire_local_stream(
        &self,
        preferences: MediaPreferences,
    ) -> Result<LocalStream, CaptureError> {
        let capture = &self.inner.capture;
        let constraints = self.media_constraints();

        let microphone = if preferences.audio_enabled {
            Some(capture.acquire(CaptureSource::Microphone, constraints.clone()).await?)
        } else {
            None
        };
        let camera = if preferences.video_enabled {
            Some(capture.acquire(CaptureSource::Camera, constraints.clone()).await?)
        } else {
            None
        };

        Ok(LocalStream::new(microphone, camera))
    }

    fn local_participant(&self, state: &SessionState) -> Participant {
        Participant {
            user_id: self.inner.local_user_id.clone(),
            is_audio_enabled: state.media.audio_enabled,
            is_video_enabled: state.media.video_enabled,
            is_sharing_screen: state.is_sharing_screen(),
        }
    }

    /// Aktualisiert den lokalen Teilnehmer und meldet es der Gegenseite
    fn publish_local_update(&self, state: &mut SessionState, update: ParticipantUpdate) {
        if state.roster.update(&self.inner.local_user_id, &update) {
            self.inner.emit(SessionEvent::RosterChanged);
        }
        if let Some(call_id) = state.phase.call_id() {
            self.inner
                .emit(SessionEvent::Outgoing(OutgoingSignal::ParticipantUpdate {
                    call_id: call_id.to_string(),
                    update,
                }));
        }
    }

    fn enter_active(&self, state: &mut SessionState, call_id: &str, peer_user_id: &str) {
        state.phase = CallPhase::Active {
            call_id: call_id.to_string(),
            peer_user_id: peer_user_id.to_string(),
            started_at: chrono::Utc::now(),
        };
        state.last_error = None;
        self.inner.emit(SessionEvent::StateChanged(PhaseKind::Active));
        self.start_ticker(state, call_id);
    }

    fn start_ticker(&self, state: &mut SessionState, call_id: &str) {
        state.stop_ticker();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let ticker = run_ticker(Arc::downgrade(&self.inner), call_id.to_string());
                state.ticker = Some(handle.spawn(ticker));
            }
            Err(_) => tracing::warn!("No tokio runtime, call duration will not be tracked"),
        }
    }

    /// Zurück auf `Idle`: Medien frei, Roster, Registry und Pin leer
    ///
    /// Gibt die vorherige Phase zurück.
    fn reset_call(&self, state: &mut SessionState) -> CallPhase {
        let previous = std::mem::replace(&mut state.phase, CallPhase::Idle);

        state.stop_ticker();
        state.registry.clear();
        state.roster.clear();
        state.pinned = None;
        state.accept_pending = false;

        if !previous.is_idle() {
            self.inner.emit(SessionEvent::StateChanged(PhaseKind::Idle));
            self.inner.emit(SessionEvent::RosterChanged);
            self.inner.emit(SessionEvent::StreamsChanged);
        }

        previous
    }

    fn clear_error(&self, state: &mut SessionState) {
        if state.last_error.take().is_some() {
            self.inner.emit(SessionEvent::ErrorDismissed);
        }
    }

    fn fail(&self, state: &mut SessionState, issue: CallIssue) {
        state.last_error = Some(issue.message.clone());
        state.history.record(issue.clone());
        self.inner.emit(SessionEvent::Error(issue));
    }
}

/// Meldet jede Sekunde die Dauer, solange der Anruf aktiv ist
async fn run_ticker(inner: Weak<Inner>, call_id: String) {
    let start = tokio::time::Instant::now();
    let mut interval = tokio::time::interval_at(start + TICK_INTERVAL, TICK_INTERVAL);

    loop {
        interval.tick().await;

        let Some(inner) = inner.upgrade() else {
            break;
        };
        let secs = start.elapsed().as_secs();

        let mut state = inner.state.lock();
        if !state.phase.belongs_to(&call_id) {
            break;
        }
        state.duration_secs = secs;
        inner.emit(SessionEvent::DurationTick(secs));
    }
}

impl std::fmt::Debug for CallSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallSession")
            .field("local_user_id", &self.inner.local_user_id)
            .field("phase", &self.phase().kind())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::fake::FakeCapture;
    use crate::media::{RemoteStream, VideoQuality};
    use crate::session::viewport::Placeholder;

    fn session() -> (CallSession, FakeCapture) {
        let capture = FakeCapture::new();
        let config = CallConfig::new("user-1");
        (CallSession::new(&config, Arc::new(capture.clone())), capture)
    }

    fn drain(events: &mut broadcast::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    fn outgoing(events: &[SessionEvent]) -> Vec<OutgoingSignal> {
        events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Outgoing(signal) => Some(signal.clone()),
                _ => None,
            })
            .collect()
    }

    /// Ausgehender Anruf, von der Gegenseite angenommen
    async fn active_call(session: &CallSession, peer: &str) -> String {
        let call_id = session.initiate_call(peer).await.unwrap();
        session
            .handle_signal(SignalEvent::CallAccepted {
                call_id: call_id.clone(),
                by_user_id: peer.to_string(),
            })
            .unwrap();
        call_id
    }

    fn receive(session: &CallSession, call_id: &str, from: &str) {
        session
            .handle_signal(SignalEvent::CallReceived {
                call_id: call_id.to_string(),
                from_user_id: from.to_string(),
            })
            .unwrap();
    }

    #[tokio::test]
    async fn test_outgoing_call_scenario() {
        let (session, capture) = session();
        let mut events = session.subscribe();
        assert_eq!(session.phase(), CallPhase::Idle);

        let call_id = session.initiate_call("user-2").await.unwrap();
        assert_eq!(session.phase().kind(), PhaseKind::Initiating);
        assert!(outgoing(&drain(&mut events)).contains(&OutgoingSignal::CallRequest {
            call_id: call_id.clone(),
            to_user_id: "user-2".to_string(),
        }));

        session
            .handle_signal(SignalEvent::CallAccepted {
                call_id: call_id.clone(),
                by_user_id: "user-2".to_string(),
            })
            .unwrap();
        let phase = session.phase();
        assert_eq!(phase.kind(), PhaseKind::Active);
        assert!(phase.started_at().is_some());
        assert_eq!(session.snapshot().participants.len(), 2);

        assert!(session.snapshot().is_audio_enabled);
        assert!(!session.toggle_audio().await.unwrap());
        assert_eq!(capture.is_enabled(CaptureSource::Microphone), Some(false));
        let snapshot = session.snapshot();
        assert!(!snapshot.is_audio_enabled);
        let local = snapshot
            .participants
            .iter()
            .find(|p| p.user_id == "user-1")
            .unwrap();
        assert!(!local.is_audio_enabled);

        session.end_call().unwrap();
        assert_eq!(session.phase(), CallPhase::Idle);
        assert!(!session.has_stream("user-1"));
        assert!(session.snapshot().participants.is_empty());
        assert_eq!(capture.open_devices(), 0);

        let sent = outgoing(&drain(&mut events));
        assert!(sent.contains(&OutgoingSignal::CallEnd {
            call_id,
            to_user_id: Some("user-2".to_string()),
        }));
    }

    #[tokio::test]
    async fn test_initiate_fails_outside_idle() {
        let (session, _capture) = session();

        session.initiate_call("user-2").await.unwrap();
        let before = session.phase();
        let err = session.initiate_call("user-3").await.unwrap_err();
        assert_eq!(
            err,
            SessionError::InvalidState {
                operation: "initiate a call",
                state: PhaseKind::Initiating,
            }
        );
        assert_eq!(session.phase(), before);

        session.end_call().unwrap();
        receive(&session, "call-1", "user-3");
        let before = session.phase();
        assert!(session.initiate_call("user-2").await.is_err());
        assert_eq!(session.phase(), before);

        session.end_call().unwrap();
        active_call(&session, "user-2").await;
        let before = session.phase();
        assert!(session.initiate_call("user-4").await.is_err());
        assert_eq!(session.phase(), before);
    }

    #[tokio::test]
    async fn test_end_call_from_any_state_releases_media() {
        let (session, capture) = session();

        // Idle: Aufräumen läuft, gemeldet wird InvalidState
        assert!(matches!(
            session.end_call(),
            Err(SessionError::InvalidState { state: PhaseKind::Idle, .. })
        ));
        assert_eq!(session.phase(), CallPhase::Idle);

        session.initiate_call("user-2").await.unwrap();
        session.end_call().unwrap();
        assert_eq!(capture.open_devices(), 0);

        receive(&session, "call-9", "user-3");
        session.end_call().unwrap();
        assert_eq!(session.phase(), CallPhase::Idle);

        active_call(&session, "user-2").await;
        session.toggle_screen_share().await.unwrap();
        assert_eq!(capture.open_devices(), 3);
        session.end_call().unwrap();

        assert_eq!(session.phase(), CallPhase::Idle);
        assert!(session.snapshot().participants.is_empty());
        assert!(!session.snapshot().is_sharing_screen);
        assert_eq!(session.open_local_tracks(), 0);
        assert_eq!(capture.open_devices(), 0);
        assert!(capture.opened() > 0);
    }

    #[tokio::test]
    async fn test_toggle_video_round_trip() {
        let (session, capture) = session();
        active_call(&session, "user-2").await;
        let mut events = session.subscribe();

        let original = session.snapshot().is_video_enabled;
        session.toggle_video().await.unwrap();
        assert_ne!(session.snapshot().is_video_enabled, original);
        session.toggle_video().await.unwrap();
        assert_eq!(session.snapshot().is_video_enabled, original);
        assert_eq!(capture.is_enabled(CaptureSource::Camera), Some(original));

        let updates = outgoing(&drain(&mut events));
        assert_eq!(updates.len(), 2);
        assert!(matches!(
            &updates[0],
            OutgoingSignal::ParticipantUpdate { update, .. }
                if update.is_video_enabled == Some(!original)
        ));
    }

    #[tokio::test]
    async fn test_toggle_without_stream() {
        let (session, _capture) = session();
        let before = session.snapshot();

        assert_eq!(session.toggle_audio().await, Err(SessionError::NoActiveStream));
        assert_eq!(session.toggle_video().await, Err(SessionError::NoActiveStream));
        assert_eq!(
            session.toggle_screen_share().await,
            Err(SessionError::NoActiveStream)
        );
        assert_eq!(session.snapshot(), before);
    }

    #[tokio::test]
    async fn test_toggle_on_acquires_missing_track() {
        let capture = FakeCapture::new();
        let mut config = CallConfig::new("user-1");
        config.media.video_enabled = false;
        let session = CallSession::new(&config, Arc::new(capture.clone()));

        active_call(&session, "user-2").await;
        assert_eq!(capture.opened(), 1);

        assert!(session.toggle_video().await.unwrap());
        assert_eq!(capture.opened(), 2);
        assert_eq!(session.open_local_tracks(), 2);

        // Voreinstellung bleibt über das Anrufende erhalten
        assert!(!session.toggle_video().await.unwrap());
        session.end_call().unwrap();
        assert!(!session.snapshot().is_video_enabled);
    }

    #[tokio::test]
    async fn test_receive_then_reject_acquires_nothing() {
        let (session, capture) = session();
        let mut events = session.subscribe();

        receive(&session, "call-1", "user-3");
        assert_eq!(
            session.phase(),
            CallPhase::Receiving {
                call_id: "call-1".to_string(),
                from_user_id: "user-3".to_string(),
            }
        );

        session.reject_incoming_call("call-1", "user-3").unwrap();
        assert_eq!(session.phase(), CallPhase::Idle);
        assert_eq!(capture.opened(), 0);

        assert!(outgoing(&drain(&mut events)).contains(&OutgoingSignal::CallResponse {
            call_id: "call-1".to_string(),
            to_user_id: "user-3".to_string(),
            accepted: false,
        }));
    }

    #[tokio::test]
    async fn test_accept_incoming_call() {
        let (session, _capture) = session();
        let mut events = session.subscribe();
        receive(&session, "call-1", "user-3");

        assert!(matches!(
            session.accept_incoming_call("call-2", "user-3").await,
            Err(SessionError::InvalidState { .. })
        ));
        assert!(session.reject_incoming_call("call-1", "user-4").is_err());

        session.accept_incoming_call("call-1", "user-3").await.unwrap();
        let phase = session.phase();
        assert_eq!(phase.kind(), PhaseKind::Active);
        assert_eq!(phase.peer_user_id(), Some("user-3"));

        let ids: Vec<_> = session
            .snapshot()
            .participants
            .into_iter()
            .map(|p| p.user_id)
            .collect();
        assert_eq!(ids, ["user-1", "user-3"]);

        assert!(outgoing(&drain(&mut events)).contains(&OutgoingSignal::CallResponse {
            call_id: "call-1".to_string(),
            to_user_id: "user-3".to_string(),
            accepted: true,
        }));
    }

    #[tokio::test]
    async fn test_accept_with_denied_capture() {
        let (session, capture) = session();
        capture.deny(CaptureSource::Camera);
        let mut events = session.subscribe();
        receive(&session, "call-1", "user-3");

        let err = session
            .accept_incoming_call("call-1", "user-3")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            SessionError::CaptureDenied(CaptureError::PermissionDenied(CaptureSource::Camera))
        );
        assert_eq!(session.phase(), CallPhase::Idle);
        assert!(session.snapshot().last_error.is_some());
        assert_eq!(capture.open_devices(), 0);

        let sent = outgoing(&drain(&mut events));
        assert!(sent.contains(&OutgoingSignal::CallResponse {
            call_id: "call-1".to_string(),
            to_user_id: "user-3".to_string(),
            accepted: false,
        }));
    }

    #[tokio::test]
    async fn test_initiate_with_denied_capture() {
        let (session, capture) = session();
        capture.deny(CaptureSource::Camera);

        let err = session.initiate_call("user-2").await.unwrap_err();
        assert!(matches!(err, SessionError::CaptureDenied(_)));
        assert_eq!(session.phase(), CallPhase::Idle);
        assert_eq!(
            session.snapshot().last_error.as_deref(),
            Some("Access to camera was denied")
        );
        // Mikrofon war schon offen und wurde wieder freigegeben
        assert_eq!(capture.opened(), 1);
        assert_eq!(capture.open_devices(), 0);
        assert_eq!(session.recent_errors(1).len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_initiate_and_end_while_acquiring() {
        let (session, capture) = session();
        let gate = capture.hold();

        let pending = {
            let session = session.clone();
            tokio::spawn(async move { session.initiate_call("user-2").await })
        };
        while session.phase().is_idle() {
            tokio::task::yield_now().await;
        }

        assert!(matches!(
            session.initiate_call("user-3").await,
            Err(SessionError::InvalidState { .. })
        ));

        session.end_call().unwrap();
        gate.add_permits(2);

        assert_eq!(pending.await.unwrap(), Err(SessionError::Aborted));
        assert_eq!(session.phase(), CallPhase::Idle);
        assert_eq!(capture.opened(), 2);
        assert_eq!(capture.open_devices(), 0);
    }

    #[tokio::test]
    async fn test_screen_share_denied() {
        let (session, capture) = session();
        active_call(&session, "user-2").await;
        capture.deny(CaptureSource::Screen);
        let stream_before = session.main_view();

        let err = session.toggle_screen_share().await.unwrap_err();
        assert!(matches!(err, SessionError::CaptureDenied(_)));

        let snapshot = session.snapshot();
        assert!(!snapshot.is_sharing_screen);
        assert!(snapshot.last_error.is_some());
        assert_eq!(session.main_view(), stream_before);
        assert_eq!(session.open_local_tracks(), 2);
    }

    #[tokio::test]
    async fn test_screen_share_keeps_camera_cached() {
        let (session, capture) = session();
        active_call(&session, "user-2").await;

        assert!(session.toggle_screen_share().await.unwrap());
        assert!(session.snapshot().is_sharing_screen);
        assert_eq!(capture.opened(), 3);
        assert_eq!(capture.open_devices(), 3);

        assert!(!session.toggle_screen_share().await.unwrap());
        assert!(!session.snapshot().is_sharing_screen);
        // Kamera wurde nicht neu angefordert
        assert_eq!(capture.opened(), 3);
        assert_eq!(capture.open_devices(), 2);

        session.toggle_screen_share().await.unwrap();
        assert!(session.on_screen_capture_ended());
        assert!(!session.on_screen_capture_ended());
        assert_eq!(capture.open_devices(), 2);
    }

    #[tokio::test]
    async fn test_busy_auto_rejects_second_call() {
        let (session, _capture) = session();
        let call_id = active_call(&session, "user-2").await;
        let mut events = session.subscribe();

        receive(&session, "call-other", "user-5");
        assert!(session.phase().belongs_to(&call_id));
        assert_eq!(
            outgoing(&drain(&mut events)),
            vec![OutgoingSignal::CallResponse {
                call_id: "call-other".to_string(),
                to_user_id: "user-5".to_string(),
                accepted: false,
            }]
        );
    }

    #[tokio::test]
    async fn test_remote_reject_and_timeout() {
        let (session, capture) = session();

        let call_id = session.initiate_call("user-2").await.unwrap();
        session
            .handle_signal(SignalEvent::CallRejected {
                call_id,
                by_user_id: "user-2".to_string(),
                reason: None,
            })
            .unwrap();
        assert_eq!(session.phase(), CallPhase::Idle);
        assert_eq!(session.snapshot().last_error.as_deref(), Some("Call was rejected"));
        assert_eq!(capture.open_devices(), 0);

        let call_id = session.initiate_call("user-2").await.unwrap();
        assert!(session.snapshot().last_error.is_none());
        let result = session.handle_signal(SignalEvent::CallTimedOut { call_id });
        assert_eq!(result, Err(SessionError::CallTimeout));
        assert_eq!(session.phase(), CallPhase::Idle);
        assert_eq!(session.snapshot().last_error.as_deref(), Some("Call timed out"));

        session.dismiss_error();
        assert!(session.snapshot().last_error.is_none());
    }

    #[tokio::test]
    async fn test_stale_signals_are_ignored() {
        let (session, _capture) = session();
        let call_id = active_call(&session, "user-2").await;

        session
            .handle_signal(SignalEvent::CallEnded {
                call_id: "call-old".to_string(),
                by_user_id: "user-2".to_string(),
            })
            .unwrap();
        session
            .handle_signal(SignalEvent::CallTimedOut {
                call_id: call_id.clone(),
            })
            .unwrap();
        assert!(session.phase().belongs_to(&call_id));

        session
            .handle_signal(SignalEvent::CallEnded {
                call_id,
                by_user_id: "user-2".to_string(),
            })
            .unwrap();
        assert_eq!(session.phase(), CallPhase::Idle);
    }

    #[tokio::test]
    async fn test_remote_streams_and_pinning() {
        let (session, _capture) = session();
        active_call(&session, "user-2").await;

        let remote = Arc::new(RemoteStream::new("stream-2", "user-2", Vec::new()));
        session
            .handle_signal(SignalEvent::TrackAdded {
                user_id: "user-2".to_string(),
                stream: Arc::downgrade(&remote),
            })
            .unwrap();

        assert_eq!(session.main_view().user_id(), Some("user-1"));
        session.pin_participant("user-2");
        assert_eq!(
            session.main_view(),
            MainView::Stream {
                user_id: "user-2".to_string(),
                stream_id: "stream-2".to_string(),
                is_local: false,
            }
        );
        let sidebar: Vec<_> = session.sidebar().into_iter().map(|p| p.user_id).collect();
        assert_eq!(sidebar, ["user-1"]);

        session.unpin_participant();
        assert_eq!(session.main_view().user_id(), Some("user-1"));

        session.pin_participant("user-2");
        session
            .handle_signal(SignalEvent::PeerDisconnected {
                user_id: "user-2".to_string(),
            })
            .unwrap();
        assert!(session.snapshot().pinned.is_none());
        assert!(!session.has_stream("user-2"));
        assert_eq!(session.snapshot().participants.len(), 1);

        // Der Transport besitzt den Stream weiterhin
        assert_eq!(Arc::strong_count(&remote), 1);
    }

    #[tokio::test]
    async fn test_placeholder_while_connecting() {
        let (session, _capture) = session();
        receive(&session, "call-1", "user-3");
        assert_eq!(
            session.main_view(),
            MainView::Placeholder(Placeholder::Connecting)
        );
    }

    #[tokio::test]
    async fn test_remote_participant_update() {
        let (session, _capture) = session();
        active_call(&session, "user-2").await;

        session
            .handle_signal(SignalEvent::ParticipantUpdated {
                user_id: "user-2".to_string(),
                update: ParticipantUpdate {
                    is_sharing_screen: Some(true),
                    ..Default::default()
                },
            })
            .unwrap();

        let snapshot = session.snapshot();
        let remote = snapshot
            .participants
            .iter()
            .find(|p| p.user_id == "user-2")
            .unwrap();
        assert!(remote.is_sharing_screen);
        // Lokale Flags ändern sich nicht über Signale
        assert!(!snapshot.is_sharing_screen);
    }

    #[tokio::test]
    async fn test_transport_errors() {
        let (session, capture) = session();
        let mut events = session.subscribe();
        active_call(&session, "user-2").await;

        let result = session.handle_signal(SignalEvent::TransportError {
            message: "ICE connection failed".to_string(),
            fatal: false,
        });
        assert!(matches!(result, Err(SessionError::Signaling(_))));
        assert_eq!(session.phase().kind(), PhaseKind::Active);
        assert!(drain(&mut events)
            .iter()
            .any(|e| matches!(e, SessionEvent::Error(issue) if issue.message == "ICE connection failed")));

        let _ = session.handle_signal(SignalEvent::TransportError {
            message: "websocket closed".to_string(),
            fatal: true,
        });
        assert_eq!(session.phase(), CallPhase::Idle);
        assert_eq!(capture.open_devices(), 0);
        assert_eq!(session.snapshot().last_error.as_deref(), Some("websocket closed"));
    }

    #[tokio::test]
    async fn test_run_applies_signals_in_order() {
        let (session, _capture) = session();
        let (tx, rx) = mpsc::channel(8);

        tx.send(SignalEvent::CallReceived {
            call_id: "call-1".to_string(),
            from_user_id: "user-3".to_string(),
        })
        .await
        .unwrap();
        tx.send(SignalEvent::CallEnded {
            call_id: "call-1".to_string(),
            by_user_id: "user-3".to_string(),
        })
        .await
        .unwrap();
        tx.send(SignalEvent::CallReceived {
            call_id: "call-2".to_string(),
            from_user_id: "user-4".to_string(),
        })
        .await
        .unwrap();
        drop(tx);

        session.run(rx).await;
        assert_eq!(
            session.phase(),
            CallPhase::Receiving {
                call_id: "call-2".to_string(),
                from_user_id: "user-4".to_string(),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_duration_ticker() {
        let (session, _capture) = session();
        let mut events = session.subscribe();
        active_call(&session, "user-2").await;

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(session.duration(), 3);
        assert!(drain(&mut events).contains(&SessionEvent::DurationTick(3)));

        session.end_call().unwrap();
        assert_eq!(session.duration(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(session.duration(), 0);
        assert!(!drain(&mut events)
            .iter()
            .any(|e| matches!(e, SessionEvent::DurationTick(_))));
    }

    #[tokio::test]
    async fn test_export_snapshot() {
        let (session, _capture) = session();
        assert!(!session.export_snapshot().is_in_call);

        active_call(&session, "user-2").await;
        let snapshot = session.export_snapshot();
        assert!(snapshot.is_in_call);
        assert_eq!(snapshot.participants, 2);
        assert!(snapshot.is_audio_enabled);
        assert!(session.capabilities().screen);
    }

    #[test]
    fn test_only_permission_errors_are_denials() {
        assert!(matches!(
            SessionError::from(CaptureError::PermissionDenied(CaptureSource::Screen)),
            SessionError::CaptureDenied(_)
        ));
        assert_eq!(
            SessionError::from(CaptureError::DeviceNotFound(CaptureSource::Camera)),
            SessionError::Capture(CaptureError::DeviceNotFound(CaptureSource::Camera))
        );
        assert!(matches!(
            SessionError::from(CaptureError::Backend("driver crashed".to_string())),
            SessionError::Capture(_)
        ));
    }

    #[tokio::test]
    async fn test_reject_clears_stale_error() {
        let (session, _capture) = session();
        receive(&session, "call-5", "user-2");
        let _ = session.handle_signal(SignalEvent::TransportError {
            message: "ICE connection failed".to_string(),
            fatal: false,
        });
        assert!(session.snapshot().last_error.is_some());

        let mut events = session.subscribe();
        session.reject_incoming_call("call-5", "user-2").unwrap();
        assert_eq!(session.phase(), CallPhase::Idle);
        assert_eq!(session.snapshot().last_error, None);
        assert!(drain(&mut events).contains(&SessionEvent::ErrorDismissed));
    }

    #[tokio::test]
    async fn test_hangup_clears_stale_error() {
        let (session, _capture) = session();
        active_call(&session, "user-2").await;
        let _ = session.handle_signal(SignalEvent::TransportError {
            message: "Signaling connection lost".to_string(),
            fatal: false,
        });
        assert!(session.snapshot().last_error.is_some());

        session.end_call().unwrap();
        assert_eq!(session.phase(), CallPhase::Idle);
        assert_eq!(session.snapshot().last_error, None);

        // Auflegen der Gegenseite
        let call_id = active_call(&session, "user-3").await;
        let _ = session.handle_signal(SignalEvent::TransportError {
            message: "Signaling connection lost".to_string(),
            fatal: false,
        });
        session
            .handle_signal(SignalEvent::CallEnded {
                call_id,
                by_user_id: "user-3".to_string(),
            })
            .unwrap();
        assert_eq!(session.snapshot().last_error, None);
    }

    #[tokio::test]
    async fn test_update_media_swaps_tracks() {
        let (session, capture) = session();
        active_call(&session, "user-2").await;
        assert!(!session.toggle_audio().await.unwrap());
        assert_eq!(capture.opened(), 2);

        let mut events = session.subscribe();
        let constraints = MediaConstraints::default()
            .with_video_device("cam-2")
            .with_quality(VideoQuality::FullHd1080);
        session.update_media(constraints.clone()).await.unwrap();

        assert_eq!(capture.opened(), 4);
        assert_eq!(capture.open_devices(), 2);
        assert_eq!(session.open_local_tracks(), 2);
        assert_eq!(capture.last_constraints(), Some(constraints.clone()));
        assert_eq!(session.media_constraints(), constraints);

        // Stummgeschaltetes Mikrofon bleibt stumm
        assert_eq!(capture.is_enabled(CaptureSource::Microphone), Some(false));
        assert!(!session.snapshot().is_audio_enabled);
        assert!(drain(&mut events).contains(&SessionEvent::StreamsChanged));
        assert_eq!(session.phase().kind(), PhaseKind::Active);
    }

    #[tokio::test]
    async fn test_update_media_failure_keeps_stream() {
        let (session, capture) = session();
        active_call(&session, "user-2").await;
        capture.deny(CaptureSource::Camera);

        let constraints = MediaConstraints::default().with_quality(VideoQuality::Sd480);
        let err = session.update_media(constraints).await.unwrap_err();
        assert!(matches!(err, SessionError::CaptureDenied(CaptureError::PermissionDenied(_))));

        // Neues Mikrofon wieder freigegeben, alter Stream unverändert
        assert_eq!(capture.opened(), 3);
        assert_eq!(capture.open_devices(), 2);
        assert_eq!(session.open_local_tracks(), 2);
        assert_eq!(session.media_constraints(), MediaConstraints::default());
        assert!(session.snapshot().last_error.is_some());
        assert_eq!(session.phase().kind(), PhaseKind::Active);
    }

    #[tokio::test]
    async fn test_update_media_while_idle_applies_to_next_call() {
        let (session, capture) = session();
        let constraints = MediaConstraints::default().with_audio_device("mic-2");

        session.update_media(constraints.clone()).await.unwrap();
        assert_eq!(capture.opened(), 0);

        session.initiate_call("user-2").await.unwrap();
        assert_eq!(capture.last_constraints(), Some(constraints));
    }

    #[tokio::test]
    async fn test_concurrent_video_toggles_are_serialised() {
        let capture = FakeCapture::new();
        let mut config = CallConfig::new("user-1");
        config.media.video_enabled = false;
        let session = CallSession::new(&config, Arc::new(capture.clone()));
        active_call(&session, "user-2").await;
        assert_eq!(capture.opened(), 1);

        let gate = capture.hold();
        let toggles: Vec<_> = (0..2)
            .map(|_| {
                let session = session.clone();
                tokio::spawn(async move { session.toggle_video().await })
            })
            .collect();
        tokio::task::yield_now().await;
        gate.add_permits(2);

        let mut results = Vec::new();
        for toggle in toggles {
            results.push(toggle.await.unwrap().unwrap());
        }
        results.sort();
        assert_eq!(results, vec![false, true]);

        // Nur der erste Toggle fordert die Kamera an
        assert_eq!(capture.opened(), 2);
        assert!(!session.snapshot().is_video_enabled);
        assert_eq!(capture.is_enabled(CaptureSource::Camera), Some(false));
    }
}
