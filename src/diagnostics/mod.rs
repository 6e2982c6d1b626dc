//! Diagnostics Module - Debug-Log, Export und Fehler-Klassifizierung
//!
//! Dieses Modul verwaltet:
//! - Ringpuffer der letzten Call-Log-Zeilen (als tracing Layer)
//! - JSON-Export für Support-Anfragen
//! - ICE-Server-Test
//! - Zuordnung roher Fehler zu Codes und Meldungen

mod errors;
mod ice_probe;
mod log_buffer;
mod report;

pub use errors::{classify, CallIssue, ErrorCode, ErrorHistory, Severity};
pub use ice_probe::{probe_ice_servers, ConnectionTest, PROBE_TIMEOUT};
pub use log_buffer::{is_call_related, DebugEntry, DebugLog, DebugLogLayer, DEBUG_LOG_CAPACITY};
pub use report::{
    default_export_dir, CallStateSnapshot, DebugReport, ExportError, SupportReport,
    EXPORTED_LOG_ENTRIES,
};
