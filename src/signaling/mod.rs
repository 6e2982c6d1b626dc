//! Signaling Module - WebSocket Client für den Signaling-Server
//!
//! Dieses Modul verwaltet die Kommunikation mit dem Signaling-Server:
//! - WebSocket-Verbindung aufbauen und halten
//! - Wire-Nachrichten in Session-Signale übersetzen und zurück
//! - Ausgehende Signale der Session verschicken

mod client;
mod messages;

pub use client::{SignalingClient, SignalingError};
pub use messages::{MessageType, SignalingMessage};
