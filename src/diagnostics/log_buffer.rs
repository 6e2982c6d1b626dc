//! Debug-Log
//!
//! Ringpuffer der letzten Log-Zeilen rund um den Anruf. Gefüllt wird er von
//! [`DebugLogLayer`], einem `tracing_subscriber::Layer`, der nur Meldungen
//! übernimmt, die WebRTC, ICE, Peer oder Call erwähnen.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use ringbuf::{traits::*, HeapRb};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Kapazität des Ringpuffers
pub const DEBUG_LOG_CAPACITY: usize = 100;

/// Schlüsselwörter, nach denen Meldungen gefiltert werden (Kleinschreibung)
const KEYWORDS: [&str; 4] = ["webrtc", "ice", "peer", "call"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DebugEntry {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub message: String,
}

impl fmt::Display for DebugEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.level,
            self.message
        )
    }
}

/// Geteilter Ringpuffer, älteste Einträge fallen zuerst heraus
#[derive(Clone)]
pub struct DebugLog {
    buffer: Arc<Mutex<HeapRb<DebugEntry>>>,
}

impl DebugLog {
    pub fn new() -> Self {
        Self::with_capacity(DEBUG_LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(HeapRb::new(capacity.max(1)))),
        }
    }

    pub fn push(&self, level: impl Into<String>, message: impl Into<String>) {
        let entry = DebugEntry {
            timestamp: Utc::now(),
            level: level.into(),
            message: message.into(),
        };
        self.buffer.lock().push_overwrite(entry);
    }

    /// Alle Einträge, älteste zuerst
    pub fn entries(&self) -> Vec<DebugEntry> {
        self.buffer.lock().iter().cloned().collect()
    }

    /// Die letzten `count` Einträge, älteste zuerst
    pub fn last(&self, count: usize) -> Vec<DebugEntry> {
        let buffer = self.buffer.lock();
        let skip = buffer.occupied_len().saturating_sub(count);
        buffer.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.buffer.lock().clear();
    }

    /// Layer für `tracing_subscriber`, der in diesen Puffer schreibt
    pub fn layer(&self) -> DebugLogLayer {
        DebugLogLayer { log: self.clone() }
    }
}

impl Default for DebugLog {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DebugLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebugLog").field("len", &self.len()).finish()
    }
}

/// Prüft, ob eine Meldung für das Debug-Log relevant ist
pub fn is_call_related(message: &str) -> bool {
    let lower = message.to_lowercase();
    KEYWORDS.iter().any(|keyword| lower.contains(keyword))
}

// ============================================================================
// TRACING LAYER
// ============================================================================

pub struct DebugLogLayer {
    log: DebugLog,
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }
}

impl<S: Subscriber> Layer<S> for DebugLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        if is_call_related(&visitor.message) {
            self.log
                .push(event.metadata().level().to_string(), visitor.message);
        }
    }
}
