//! ICE-Server-Test
//!
//! Baut eine Wegwerf-Peer-Connection auf und sammelt Kandidaten. Ein
//! `srflx`-Kandidat beweist einen erreichbaren STUN-Server, ein `relay`-Kandidat
//! einen funktionierenden TURN-Server.

use crate::config::{IceTransportPolicy, WebRtcConfig};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_candidate_type::RTCIceCandidateType;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::policy::ice_transport_policy::RTCIceTransportPolicy;
use webrtc::peer_connection::RTCPeerConnection;

/// Maximale Dauer des Kandidaten-Sammelns
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Ergebnis des ICE-Server-Tests
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionTest {
    pub stun: bool,
    pub turn: bool,
    pub errors: Vec<String>,
}

impl ConnectionTest {
    fn note_candidate(&mut self, typ: RTCIceCandidateType) {
        match typ {
            RTCIceCandidateType::Srflx => self.stun = true,
            RTCIceCandidateType::Relay => self.turn = true,
            _ => {}
        }
    }
}

/// Übersetzt die eigene ICE-Konfiguration in die der webrtc-Crate
fn rtc_configuration(config: &WebRtcConfig) -> RTCConfiguration {
    let ice_servers = config
        .ice_servers
        .iter()
        .map(|server| RTCIceServer {
            urls: server.urls.clone(),
            username: server.username.clone().unwrap_or_default(),
            credential: server.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect();

    let ice_transport_policy = match config.ice_transport_policy {
        IceTransportPolicy::All => RTCIceTransportPolicy::All,
        IceTransportPolicy::Relay => RTCIceTransportPolicy::Relay,
    };

    RTCConfiguration {
        ice_servers,
        ice_transport_policy,
        ice_candidate_pool_size: config.ice_candidate_pool_size,
        ..Default::default()
    }
}

async fn create_probe_connection(config: &WebRtcConfig) -> Result<RTCPeerConnection, webrtc::Error> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    api.new_peer_connection(rtc_configuration(config)).await
}

/// Testet die konfigurierten ICE-Server
///
/// Schlägt nie fehl; Probleme landen in [`ConnectionTest::errors`].
pub async fn probe_ice_servers(config: &WebRtcConfig) -> ConnectionTest {
    let result = Arc::new(Mutex::new(ConnectionTest::default()));

    let pc = match create_probe_connection(config).await {
        Ok(pc) => pc,
        Err(e) => {
            tracing::warn!("ICE probe: failed to create peer connection: {}", e);
            return ConnectionTest {
                errors: vec![e.to_string()],
                ..Default::default()
            };
        }
    };

    let result_clone = Arc::clone(&result);
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        if let Some(c) = candidate {
            tracing::debug!("ICE probe candidate: {} {}", c.typ, c.address);
            result_clone.lock().note_candidate(c.typ);
        }
        Box::pin(async {})
    }));

    if let Err(e) = gather(&pc).await {
        result.lock().errors.push(e);
    }

    if let Err(e) = pc.close().await {
        tracing::debug!("ICE probe: close failed: {}", e);
    }

    let outcome = result.lock().clone();
    tracing::info!(
        "ICE probe finished: stun={}, turn={}, errors={}",
        outcome.stun,
        outcome.turn,
        outcome.errors.len()
    );
    outcome
}

/// Löst das Sammeln über ein Offer aus und wartet auf das Ende
async fn gather(pc: &RTCPeerConnection) -> Result<(), String> {
    pc.create_data_channel("test", None)
        .await
        .map_err(|e| e.to_string())?;

    let mut complete = pc.gathering_complete_promise().await;

    let offer = pc.create_offer(None).await.map_err(|e| e.to_string())?;
    pc.set_local_description(offer)
        .await
        .map_err(|e| e.to_string())?;

    match tokio::time::timeout(PROBE_TIMEOUT, complete.recv()).await {
        Ok(_) => Ok(()),
        Err(_) => Err("ICE gathering timed out".to_string()),
    }
}
