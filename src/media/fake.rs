//! Zählende Capture-Schicht für Tests

use super::capture::{
    CaptureCapabilities, CaptureDevice, CaptureError, CaptureSource, LocalTrack, MediaCapture,
};
use super::constraints::MediaConstraints;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;

#[derive(Default)]
struct FakeState {
    opened: AtomicUsize,
    closed: AtomicUsize,
    denied: Mutex<HashSet<CaptureSource>>,
    enabled: Mutex<HashMap<CaptureSource, bool>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    last_constraints: Mutex<Option<MediaConstraints>>,
}

#[derive(Clone, Default)]
pub(crate) struct FakeCapture {
    state: Arc<FakeState>,
}

impl FakeCapture {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn deny(&self, source: CaptureSource) {
        self.state.denied.lock().insert(source);
    }

    /// Anforderungen warten, bis der Test Permits freigibt
    pub(crate) fn hold(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.state.gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    pub(crate) fn opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    /// Geräte, die gerade offen sind
    pub(crate) fn open_devices(&self) -> usize {
        self.opened() - self.state.closed.load(Ordering::SeqCst)
    }

    /// Constraints der letzten erfolgreichen Anforderung
    pub(crate) fn last_constraints(&self) -> Option<MediaConstraints> {
        self.state.last_constraints.lock().clone()
    }

    pub(crate) fn is_enabled(&self, source: CaptureSource) -> Option<bool> {
        self.state.enabled.lock().get(&source).copied()
    }
}

struct FakeDevice {
    source: CaptureSource,
    state: Arc<FakeState>,
}

impl CaptureDevice for FakeDevice {
    fn set_enabled(&mut self, enabled: bool) {
        self.state.enabled.lock().insert(self.source, enabled);
    }

    fn stop(&mut self) {
        self.state.closed.fetch_add(1, Ordering::SeqCst);
    }
}

impl MediaCapture for FakeCapture {
    fn acquire(
        &self,
        source: CaptureSource,
        constraints: MediaConstraints,
    ) -> BoxFuture<'_, Result<LocalTrack, CaptureError>> {
        Box::pin(async move {
            let gate = self.state.gate.lock().clone();
            if let Some(gate) = gate {
                let permit = gate
                    .acquire()
                    .await
                    .map_err(|e| CaptureError::Backend(e.to_string()))?;
                permit.forget();
            }

            if self.state.denied.lock().contains(&source) {
                return Err(CaptureError::PermissionDenied(source));
            }

            self.state.opened.fetch_add(1, Ordering::SeqCst);
            *self.state.last_constraints.lock() = Some(constraints);
            self.state.enabled.lock().insert(source, true);
            Ok(LocalTrack::new(
                source,
                format!("fake {source}"),
                Box::new(FakeDevice {
                    source,
                    state: Arc::clone(&self.state),
                }),
            ))
        })
    }

    fn capabilities(&self) -> CaptureCapabilities {
        CaptureCapabilities {
            microphone: true,
            camera: true,
            screen: true,
            details: vec!["Capture backend: fake".to_string()],
        }
    }
}
