//! Annotate Call - Anruf-Engine für den Dokument-Annotator
//!
//! Eine Call-Session für Chat- und Videoanrufe mit:
//! - Zustandsmaschine für Anrufe (Idle, Initiating, Receiving, Active)
//! - Stream Registry und Teilnehmerliste
//! - WebSocket Signaling pro Dokument
//! - Debug-Log und JSON-Export für Support-Anfragen

pub mod config;
pub mod diagnostics;
pub mod media;
pub mod session;
pub mod signaling;

use anyhow::Context;
use config::{CallConfig, WebRtcConfig};
use diagnostics::{probe_ice_servers, DebugLog, DebugReport};
use media::MediaCapture;
use session::CallSession;
use signaling::SignalingClient;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Puffer für eingehende Signale zwischen Reader-Task und Session
const SIGNAL_CHANNEL_CAPACITY: usize = 64;

// ============================================================================
// LOGGING
// ============================================================================

/// Initialisiert Logging: Konsole plus Ringpuffer für den Debug-Export
pub fn init_logging(log: &DebugLog) -> anyhow::Result<()> {
    let filter = EnvFilter::from_default_env()
        .add_directive("annotate_call=debug".parse()?)
        .add_directive("webrtc=warn".parse()?);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(log.layer())
        .try_init()
        .context("tracing subscriber already initialized")?;

    tracing::info!("Logging initialized");
    Ok(())
}

// ============================================================================
// CALL HANDLE
// ============================================================================

/// Eine verbundene Session: Zustandsmaschine plus Signaling-Verbindung
pub struct CallHandle {
    session: CallSession,
    signaling: SignalingClient,
    webrtc: WebRtcConfig,
    tasks: Vec<JoinHandle<()>>,
}

/// Erstellt die Session und verbindet sie mit dem Signaling-Server
///
/// Eingehende Signale laufen über einen Kanal in [`CallSession::run`],
/// ausgehende Signale werden aus den Session-Events verschickt.
pub async fn connect_session(
    config: CallConfig,
    capture: Arc<dyn MediaCapture>,
) -> anyhow::Result<CallHandle> {
    tracing::info!(
        "Connecting call session for {} in document {}",
        config.local_user_id,
        config.document_id
    );

    if !config.webrtc.validate().is_usable() {
        tracing::error!("WebRTC config has no usable ICE servers, calls will not connect");
    }

    let session = CallSession::new(&config, capture);
    let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_CHANNEL_CAPACITY);

    // Vor dem Verbinden abonnieren, damit kein Signal verloren geht
    let outgoing = session.subscribe();

    let mut signaling = SignalingClient::new(&config);
    signaling
        .connect(signal_tx)
        .await
        .context("failed to connect to signaling server")?;

    let run_session = session.clone();
    let mut tasks = vec![tokio::spawn(async move { run_session.run(signal_rx).await })];
    tasks.push(signaling.forward_outgoing(outgoing)?);
    tasks.push(signaling.start_heartbeat()?);

    tracing::info!("Call session ready for {}", config.local_user_id);

    Ok(CallHandle {
        session,
        signaling,
        webrtc: config.webrtc,
        tasks,
    })
}

impl CallHandle {
    pub fn session(&self) -> &CallSession {
        &self.session
    }

    pub fn is_connected(&self) -> bool {
        self.signaling.is_connected()
    }

    /// Sammelt den Debug-Bericht und schreibt ihn nach `dir`
    pub async fn export_debug_report(
        &self,
        log: &DebugLog,
        dir: &Path,
        run_probe: bool,
    ) -> anyhow::Result<PathBuf> {
        export_debug_report(&self.session, &self.webrtc, log, dir, run_probe).await
    }

    /// Beendet einen laufenden Anruf und trennt die Verbindung
    pub async fn disconnect(mut self) {
        if !self.session.phase().is_idle() {
            if let Err(e) = self.session.end_call() {
                tracing::warn!("Ending call on disconnect: {}", e);
            }
            // Dem Bridge-Task Zeit geben, das call-end zu verschicken
            tokio::task::yield_now().await;
        }

        self.signaling.disconnect().await;
        for task in self.tasks.drain(..) {
            task.abort();
        }
        tracing::info!("Call session disconnected");
    }
}

impl std::fmt::Debug for CallHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallHandle")
            .field("session", &self.session)
            .field("signaling", &self.signaling)
            .finish()
    }
}

// ============================================================================
// DEBUG EXPORT
// ============================================================================

/// Erstellt den WebRTC-Debug-Bericht, optional mit ICE-Server-Test
pub async fn export_debug_report(
    session: &CallSession,
    webrtc: &WebRtcConfig,
    log: &DebugLog,
    dir: &Path,
    run_probe: bool,
) -> anyhow::Result<PathBuf> {
    let connection_test = if run_probe {
        Some(probe_ice_servers(webrtc).await)
    } else {
        None
    };

    let report = DebugReport::collect(
        session.capabilities(),
        connection_test,
        webrtc.clone(),
        session.export_snapshot(),
        log,
    );

    let path = report
        .export(dir)
        .await
        .with_context(|| format!("failed to export debug report to {}", dir.display()))?;
    Ok(path)
}
