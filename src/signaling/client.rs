//! WebSocket Client für den Signaling-Server
//!
//! Verwaltet die WebSocket-Verbindung:
//! - Raum des Dokuments betreten
//! - Eingehende Nachrichten als [`SignalEvent`] an die Session weiterleiten
//! - Ausgehende [`SessionEvent::Outgoing`] Signale verschicken
//! - Heartbeat per WebSocket-Ping

use super::messages::SignalingMessage;
use crate::config::{parse_signaling_url, CallConfig, ConfigError};
use crate::session::{SessionEvent, SignalEvent};
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const OUTBOUND_CHANNEL_CAPACITY: usize = 100;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum SignalingError {
    #[error(transparent)]
    InvalidUrl(#[from] ConfigError),

    #[error("WebSocket connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Not connected to signaling server")]
    NotConnected,

    #[error("Failed to send message: {0}")]
    SendFailed(String),

    #[error("Invalid signaling message: {0}")]
    InvalidMessage(#[from] serde_json::Error),
}

// ============================================================================
// CLIENT STATE
// ============================================================================

#[derive(Debug, Clone, Default)]
struct ClientState {
    is_connected: bool,
}

// ============================================================================
// SIGNALING CLIENT
// ============================================================================

/// WebSocket Client für Signaling-Server Kommunikation
pub struct SignalingClient {
    server_url: String,
    local_user_id: String,
    document_id: String,
    state: Arc<RwLock<ClientState>>,
    tx: Option<mpsc::Sender<Message>>,
}

impl SignalingClient {
    pub fn new(config: &CallConfig) -> Self {
        Self {
            server_url: config.signaling_url.clone(),
            local_user_id: config.local_user_id.clone(),
            document_id: config.document_id.clone(),
            state: Arc::new(RwLock::new(ClientState::default())),
            tx: None,
        }
    }

    /// Prüft ob verbunden
    pub fn is_connected(&self) -> bool {
        self.state.read().is_connected
    }

    /// Verbindet mit dem Server und leitet eingehende Signale an `signals`
    ///
    /// Bricht die Verbindung ab, kommt ein nicht-fataler
    /// [`SignalEvent::TransportError`] über denselben Kanal.
    pub async fn connect(&mut self, signals: mpsc::Sender<SignalEvent>) -> Result<(), SignalingError> {
        let mut url = parse_signaling_url(&self.server_url)?;
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        // ws/wss sind immer gültige Schemes für eine http(s)-URL
        let _ = url.set_scheme(scheme);
        url.query_pairs_mut()
            .append_pair("userId", &self.local_user_id)
            .append_pair("documentId", &self.document_id);

        tracing::info!("Connecting to signaling server: {}", url);

        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| SignalingError::ConnectionFailed(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();

        let (tx, mut rx) = mpsc::channel::<Message>(OUTBOUND_CHANNEL_CAPACITY);
        self.tx = Some(tx);
        self.state.write().is_connected = true;

        // Read-Task starten
        let state = Arc::clone(&self.state);
        let local_user_id = self.local_user_id.clone();
        tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        match Self::decode(&text, &local_user_id) {
                            Ok(Some(event)) => {
                                if signals.send(event).await.is_err() {
                                    tracing::debug!("Call session gone, stopping signaling reader");
                                    break;
                                }
                            }
                            Ok(None) => {}
                            Err(e) => tracing::warn!("Dropping signaling message: {}", e),
                        }
                    }
                    Ok(Message::Close(_)) => {
                        tracing::info!("WebSocket closed by server");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            state.write().is_connected = false;
            let _ = signals
                .send(SignalEvent::TransportError {
                    message: "Signaling connection lost".to_string(),
                    fatal: false,
                })
                .await;
        });

        // Write-Task starten
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = write.send(msg).await {
                    tracing::error!("Failed to send WebSocket message: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        self.send(&SignalingMessage::join_document(&self.document_id, &self.local_user_id))
            .await?;

        tracing::info!("Connected to signaling server as {}", self.local_user_id);
        Ok(())
    }

    /// Sendet eine Nachricht
    pub async fn send(&self, message: &SignalingMessage) -> Result<(), SignalingError> {
        let tx = self.tx.as_ref().ok_or(SignalingError::NotConnected)?;
        let text = serde_json::to_string(message)?;

        tx.send(Message::Text(text))
            .await
            .map_err(|e| SignalingError::SendFailed(e.to_string()))
    }

    /// Verschickt alle ausgehenden Signale der Session
    pub fn forward_outgoing(
        &self,
        mut events: broadcast::Receiver<SessionEvent>,
    ) -> Result<JoinHandle<()>, SignalingError> {
        let tx = self.tx.clone().ok_or(SignalingError::NotConnected)?;
        let local_user_id = self.local_user_id.clone();

        Ok(tokio::spawn(async move {
            loop {
                let signal = match events.recv().await {
                    Ok(SessionEvent::Outgoing(signal)) => signal,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Signaling bridge lagged, {} session events skipped", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                let text = match SignalingMessage::from_outgoing(&signal, &local_user_id)
                    .and_then(|message| serde_json::to_string(&message))
                {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!("Failed to encode call signal: {}", e);
                        continue;
                    }
                };

                tracing::debug!("Sending call signal: {:?}", signal);
                if tx.send(Message::Text(text)).await.is_err() {
                    tracing::warn!("Signaling connection closed, stopping bridge");
                    break;
                }
            }
        }))
    }

    /// Startet einen Heartbeat-Task, der WebSocket-Pings sendet
    pub fn start_heartbeat(&self) -> Result<JoinHandle<()>, SignalingError> {
        let tx = self.tx.clone().ok_or(SignalingError::NotConnected)?;
        let state = Arc::clone(&self.state);

        Ok(tokio::spawn(async move {
            let mut interval = tokio::time::interval(HEARTBEAT_INTERVAL);
            loop {
                interval.tick().await;
                if !state.read().is_connected {
                    tracing::info!("Heartbeat: client disconnected, stopping heartbeat task");
                    break;
                }
                if tx.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }))
    }

    /// Schließt die Verbindung
    pub async fn disconnect(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Message::Close(None)).await;
        }
        self.state.write().is_connected = false;
    }

    fn decode(text: &str, local_user_id: &str) -> Result<Option<SignalEvent>, serde_json::Error> {
        let message: SignalingMessage = serde_json::from_str(text)?;
        message.into_signal_event(local_user_id)
    }
}

impl std::fmt::Debug for SignalingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingClient")
            .field("server_url", &self.server_url)
            .field("state", &*self.state.read())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::OutgoingSignal;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    async fn next_text<S>(ws: &mut S) -> serde_json::Value
    where
        S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("unexpected websocket item: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_round_trip_through_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();

            let join = next_text(&mut ws).await;
            assert_eq!(join["type"], "join-document");
            assert_eq!(join["data"]["documentId"], "doc-1");

            let request = serde_json::json!({
                "type": "call-request",
                "callId": "call-1",
                "fromUserId": "user-2",
                "toUserId": "user-1"
            });
            ws.send(Message::Text(request.to_string())).await.unwrap();

            let response = next_text(&mut ws).await;
            assert_eq!(response["type"], "call-accept");
            assert_eq!(response["toUserId"], "user-2");
        });

        let mut config = CallConfig::new("user-1");
        config.document_id = "doc-1".to_string();
        config.signaling_url = format!("ws://{addr}");

        let mut client = SignalingClient::new(&config);
        let (signal_tx, mut signal_rx) = mpsc::channel(8);
        client.connect(signal_tx).await.unwrap();
        assert!(client.is_connected());

        match signal_rx.recv().await {
            Some(SignalEvent::CallReceived {
                call_id,
                from_user_id,
            }) => {
                assert_eq!(call_id, "call-1");
                assert_eq!(from_user_id, "user-2");
            }
            other => panic!("unexpected signal: {other:?}"),
        }

        let (events_tx, events_rx) = broadcast::channel(8);
        client.forward_outgoing(events_rx).unwrap();
        events_tx.send(SessionEvent::RosterChanged).unwrap();
        events_tx
            .send(SessionEvent::Outgoing(OutgoingSignal::CallResponse {
                call_id: "call-1".to_string(),
                to_user_id: "user-2".to_string(),
                accepted: true,
            }))
            .unwrap();

        server.await.unwrap();

        // Server hat geschlossen
        match signal_rx.recv().await {
            Some(SignalEvent::TransportError { fatal, .. }) => assert!(!fatal),
            other => panic!("unexpected signal: {other:?}"),
        }
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let client = SignalingClient::new(&CallConfig::new("user-1"));
        let message = SignalingMessage::join_document("doc", "user-1");
        assert!(matches!(
            client.send(&message).await,
            Err(SignalingError::NotConnected)
        ));
        assert!(client.start_heartbeat().is_err());
    }

    #[tokio::test]
    async fn test_invalid_url() {
        let mut config = CallConfig::new("user-1");
        config.signaling_url = "ftp://example.com".to_string();
        let mut client = SignalingClient::new(&config);
        let (tx, _rx) = mpsc::channel(1);
        assert!(matches!(
            client.connect(tx).await,
            Err(SignalingError::InvalidUrl(_))
        ));
    }
}
