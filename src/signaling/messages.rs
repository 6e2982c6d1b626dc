//! Message Types für das Signaling-Protokoll
//!
//! Jede WebSocket-Textnachricht ist ein JSON-Objekt
//! `{type, callId, fromUserId, toUserId?, data?}`. SDP und ICE
//! (`offer`, `answer`, `ice-candidate`) gehören der Transport-Schicht und
//! werden von der Session ignoriert.

use crate::session::{OutgoingSignal, ParticipantUpdate, SignalEvent};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    Offer,
    Answer,
    IceCandidate,
    CallRequest,
    CallAccept,
    CallReject,
    CallEnd,
    ParticipantUpdate,
    CallTimeout,
    /// Betritt den Raum des geöffneten Dokuments
    JoinDocument,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalingMessage {
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    #[serde(default)]
    pub call_id: String,
    pub from_user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl SignalingMessage {
    pub fn new(msg_type: MessageType, call_id: impl Into<String>, from_user_id: impl Into<String>) -> Self {
        Self {
            msg_type,
            call_id: call_id.into(),
            from_user_id: from_user_id.into(),
            to_user_id: None,
            data: None,
        }
    }

    pub fn to(mut self, user_id: impl Into<String>) -> Self {
        self.to_user_id = Some(user_id.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Erste Nachricht nach dem Verbinden
    pub fn join_document(document_id: &str, from_user_id: &str) -> Self {
        Self::new(MessageType::JoinDocument, "", from_user_id)
            .with_data(serde_json::json!({ "documentId": document_id }))
    }

    /// Übersetzt ein ausgehendes Session-Signal in eine Wire-Nachricht
    pub fn from_outgoing(signal: &OutgoingSignal, local_user_id: &str) -> Result<Self, serde_json::Error> {
        let message = match signal {
            OutgoingSignal::CallRequest {
                call_id,
                to_user_id,
            } => Self::new(MessageType::CallRequest, call_id, local_user_id).to(to_user_id),

            OutgoingSignal::CallResponse {
                call_id,
                to_user_id,
                accepted,
            } => {
                let msg_type = if *accepted {
                    MessageType::CallAccept
                } else {
                    MessageType::CallReject
                };
                Self::new(msg_type, call_id, local_user_id).to(to_user_id)
            }

            OutgoingSignal::CallEnd {
                call_id,
                to_user_id,
            } => {
                let mut message = Self::new(MessageType::CallEnd, call_id, local_user_id);
                message.to_user_id = to_user_id.clone();
                message
            }

            OutgoingSignal::ParticipantUpdate { call_id, update } => {
                Self::new(MessageType::ParticipantUpdate, call_id, local_user_id)
                    .with_data(serde_json::to_value(update)?)
            }
        };

        Ok(message)
    }

    /// Übersetzt eine Wire-Nachricht in ein Session-Signal
    ///
    /// `None` für Transport-Nachrichten, eigene Echos und Nachrichten an
    /// andere Benutzer.
    pub fn into_signal_event(self, local_user_id: &str) -> Result<Option<SignalEvent>, serde_json::Error> {
        if self.from_user_id == local_user_id {
            return Ok(None);
        }
        if self
            .to_user_id
            .as_deref()
            .is_some_and(|to| to != local_user_id)
        {
            return Ok(None);
        }

        let Self {
            msg_type,
            call_id,
            from_user_id,
            data,
            ..
        } = self;

        let event = match msg_type {
            MessageType::CallRequest => SignalEvent::CallReceived {
                call_id,
                from_user_id,
            },
            MessageType::CallAccept => SignalEvent::CallAccepted {
                call_id,
                by_user_id: from_user_id,
            },
            MessageType::CallReject => SignalEvent::CallRejected {
                call_id,
                by_user_id: from_user_id,
                reason: data
                    .as_ref()
                    .and_then(|d| d.get("reason"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
            },
            MessageType::CallEnd => SignalEvent::CallEnded {
                call_id,
                by_user_id: from_user_id,
            },
            MessageType::CallTimeout => SignalEvent::CallTimedOut { call_id },
            MessageType::ParticipantUpdate => {
                let update: ParticipantUpdate = match data {
                    Some(data) => serde_json::from_value(data)?,
                    None => ParticipantUpdate::default(),
                };
                SignalEvent::ParticipantUpdated {
                    user_id: from_user_id,
                    update,
                }
            }
            MessageType::Offer
            | MessageType::Answer
            | MessageType::IceCandidate
            | MessageType::JoinDocument => return Ok(None),
        };

        Ok(Some(event))
    }
}
