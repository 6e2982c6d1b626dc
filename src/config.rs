//! Konfiguration
//!
//! ICE-Server Presets (Entwicklung, Produktion, TURN-only), Medien-Voreinstellungen
//! und die Signaling-URL. Alles kann über Umgebungsvariablen überschrieben werden.

use crate::media::MediaConstraints;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

// ============================================================================
// CONSTANTS
// ============================================================================

/// Google STUN Server (kostenlos)
const GOOGLE_STUN_SERVERS: [&str; 5] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
    "stun:stun2.l.google.com:19302",
    "stun:stun3.l.google.com:19302",
    "stun:stun4.l.google.com:19302",
];

/// Weitere STUN Server als Fallback
const ADDITIONAL_STUN_SERVERS: [&str; 3] = [
    "stun:stun.stunprotocol.org:3478",
    "stun:stun.voiparound.com",
    "stun:stun.voipbuster.com",
];

const DEFAULT_SIGNALING_URL: &str = "ws://localhost:3001";
const DEFAULT_CANDIDATE_POOL_SIZE: u8 = 10;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid signaling URL '{url}': {source}")]
    InvalidSignalingUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("Unsupported signaling scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Unknown call mode: {0}")]
    UnknownMode(String),
}

// ============================================================================
// WEBRTC CONFIG
// ============================================================================

/// Welche ICE-Kandidaten verwendet werden dürfen
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceTransportPolicy {
    #[default]
    All,
    /// Nur TURN-Relay (zum Testen des TURN-Servers)
    Relay,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn stun<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            urls: urls.into_iter().map(Into::into).collect(),
            username: None,
            credential: None,
        }
    }

    pub fn turn(url: String, username: String, credential: String) -> Self {
        Self {
            urls: vec![url],
            username: Some(username),
            credential: Some(credential),
        }
    }
}

/// ICE-Konfiguration für Peer Connections
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebRtcConfig {
    pub ice_servers: Vec<IceServer>,
    pub ice_transport_policy: IceTransportPolicy,
    pub ice_candidate_pool_size: u8,
}

/// Ergebnis von [`WebRtcConfig::validate`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigReport {
    pub has_stun: bool,
    pub has_turn: bool,
    pub warnings: Vec<String>,
}

impl ConfigReport {
    /// Ohne ICE-Server ist die Konfiguration unbrauchbar
    pub fn is_usable(&self) -> bool {
        self.has_stun || self.has_turn
    }
}

impl WebRtcConfig {
    /// Nur STUN, kein TURN-Relay
    pub fn development() -> Self {
        Self {
            ice_servers: vec![
                IceServer::stun(GOOGLE_STUN_SERVERS),
                IceServer::stun(ADDITIONAL_STUN_SERVERS),
            ],
            ice_transport_policy: IceTransportPolicy::All,
            ice_candidate_pool_size: DEFAULT_CANDIDATE_POOL_SIZE,
        }
    }

    /// STUN, TURN wird über [`WebRtcConfig::with_turn_server`] ergänzt
    pub fn production() -> Self {
        Self {
            ice_servers: vec![IceServer::stun(GOOGLE_STUN_SERVERS)],
            ice_transport_policy: IceTransportPolicy::All,
            ice_candidate_pool_size: DEFAULT_CANDIDATE_POOL_SIZE,
        }
    }

    /// Erzwingt TURN-Relay
    pub fn turn_only() -> Self {
        Self {
            ice_servers: Vec::new(),
            ice_transport_policy: IceTransportPolicy::Relay,
            ice_candidate_pool_size: DEFAULT_CANDIDATE_POOL_SIZE,
        }
    }

    /// Fügt einen TURN-Server hinzu
    pub fn with_turn_server(mut self, url: String, username: String, credential: String) -> Self {
        self.ice_servers.push(IceServer::turn(url, username, credential));
        self
    }

    /// Prüft die Konfiguration und sammelt Warnungen
    pub fn validate(&self) -> ConfigReport {
        let mut report = ConfigReport::default();

        if self.ice_servers.is_empty() {
            report.warnings.push("WebRTC config has no ICE servers".to_string());
            return report;
        }

        for server in &self.ice_servers {
            for url in &server.urls {
                if url.starts_with("stun:") {
                    report.has_stun = true;
                } else if url.starts_with("turn:") || url.starts_with("turns:") {
                    report.has_turn = true;
                    if server.username.is_none() || server.credential.is_none() {
                        report
                            .warnings
                            .push(format!("TURN server {url} configured without credentials"));
                    }
                } else {
                    report.warnings.push(format!("Unknown ICE server scheme: {url}"));
                }
            }
        }

        if !report.has_stun {
            report
                .warnings
                .push("WebRTC config has no STUN servers - NAT traversal may fail".to_string());
        }
        if !report.has_turn {
            tracing::info!(
                "WebRTC config has no TURN servers - connections may fail behind restrictive firewalls"
            );
        }

        for warning in &report.warnings {
            tracing::warn!("{}", warning);
        }

        report
    }
}

impl Default for WebRtcConfig {
    fn default() -> Self {
        Self::development()
    }
}

// ============================================================================
// CALL CONFIG
// ============================================================================

/// Umgebung, aus der das ICE-Preset gewählt wird
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMode {
    Development,
    Production,
    Test,
}

impl std::str::FromStr for CallMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            "test" => Ok(Self::Test),
            other => Err(ConfigError::UnknownMode(other.to_string())),
        }
    }
}

/// Welche Medien beim Start eines Anrufs angefordert werden
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaPreferences {
    pub video_enabled: bool,
    pub audio_enabled: bool,
}

impl Default for MediaPreferences {
    fn default() -> Self {
        Self {
            video_enabled: true,
            audio_enabled: true,
        }
    }
}

/// Gesamte Konfiguration einer Call-Session
#[derive(Debug, Clone)]
pub struct CallConfig {
    pub local_user_id: String,
    pub document_id: String,
    /// Bereits über [`parse_signaling_url`] geprüft
    pub signaling_url: String,
    pub media: MediaPreferences,
    pub constraints: MediaConstraints,
    pub webrtc: WebRtcConfig,
}

impl CallConfig {
    pub fn new(local_user_id: impl Into<String>) -> Self {
        Self {
            local_user_id: local_user_id.into(),
            document_id: "current-document".to_string(),
            signaling_url: DEFAULT_SIGNALING_URL.to_string(),
            media: MediaPreferences::default(),
            constraints: MediaConstraints::default(),
            webrtc: WebRtcConfig::default(),
        }
    }

    /// Liest die Konfiguration aus Umgebungsvariablen
    ///
    /// `CALL_MODE`, `SIGNALING_URL`, `CALL_USER_ID`, `CALL_DOCUMENT_ID`,
    /// `TURN_URL`, `TURN_USERNAME`, `TURN_PASSWORD`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mode = match std::env::var("CALL_MODE") {
            Ok(mode) => mode.parse()?,
            Err(_) => CallMode::Development,
        };

        let mut webrtc = match mode {
            CallMode::Development => WebRtcConfig::development(),
            CallMode::Production => WebRtcConfig::production(),
            CallMode::Test => WebRtcConfig::turn_only(),
        };

        if let (Ok(url), Ok(username), Ok(password)) = (
            std::env::var("TURN_URL"),
            std::env::var("TURN_USERNAME"),
            std::env::var("TURN_PASSWORD"),
        ) {
            webrtc = webrtc.with_turn_server(url, username, password);
        }

        let signaling_url = match std::env::var("SIGNALING_URL") {
            Ok(raw) => parse_signaling_url(&raw)?.to_string(),
            Err(_) => DEFAULT_SIGNALING_URL.to_string(),
        };

        let local_user_id =
            std::env::var("CALL_USER_ID").unwrap_or_else(|_| "current-user".to_string());

        let mut config = Self::new(local_user_id);
        config.signaling_url = signaling_url;
        config.webrtc = webrtc;
        if let Ok(document_id) = std::env::var("CALL_DOCUMENT_ID") {
            config.document_id = document_id;
        }

        tracing::info!(
            "Call config loaded: mode={:?}, signaling={}",
            mode,
            config.signaling_url
        );

        Ok(config)
    }
}

/// Prüft eine Signaling-URL (nur ws/wss/http/https)
pub fn parse_signaling_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|source| ConfigError::InvalidSignalingUrl {
        url: raw.to_string(),
        source,
    })?;

    match url.scheme() {
        "ws" | "wss" | "http" | "https" => Ok(url),
        other => Err(ConfigError::UnsupportedScheme(other.to_string())),
    }
}

// ============================================================================
// TESTS
// ============================================================================
