//! Host-Audio über cpal
//!
//! Listet Ein-/Ausgabegeräte auf und hält das Mikrofon für die Dauer eines
//! Anrufs offen. Kamera und Bildschirm hat dieses Backend nicht.

use super::capture::{
    CaptureCapabilities, CaptureDevice, CaptureError, CaptureSource, LocalTrack, MediaCapture,
};
use super::constraints::MediaConstraints;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleFormat, StreamConfig};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

/// Sample Rate (48kHz ist der Standard für beste Qualität)
const SAMPLE_RATE: u32 = 48000;

// ============================================================================
// DEVICE LIST
// ============================================================================

/// Repräsentiert ein Audio-Gerät
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioDevice {
    pub name: String,
    pub is_default: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceInventory {
    pub inputs: Vec<AudioDevice>,
    pub outputs: Vec<AudioDevice>,
}

/// Gibt alle verfügbaren Audio-Geräte zurück
pub fn list_audio_devices() -> Result<DeviceInventory, CaptureError> {
    let host = cpal::default_host();

    let default_input = host.default_input_device().and_then(|d| d.name().ok());
    let default_output = host.default_output_device().and_then(|d| d.name().ok());

    let inputs = host
        .input_devices()
        .map_err(|e| CaptureError::Backend(e.to_string()))?
        .filter_map(|d| {
            d.name().ok().map(|name| AudioDevice {
                is_default: Some(&name) == default_input.as_ref(),
                name,
            })
        })
        .collect();

    let outputs = host
        .output_devices()
        .map_err(|e| CaptureError::Backend(e.to_string()))?
        .filter_map(|d| {
            d.name().ok().map(|name| AudioDevice {
                is_default: Some(&name) == default_output.as_ref(),
                name,
            })
        })
        .collect();

    Ok(DeviceInventory { inputs, outputs })
}

// ============================================================================
// MICROPHONE
// ============================================================================

/// Hält einen laufenden cpal Input-Stream in einem eigenen Thread
///
/// cpal Streams sind nicht `Send`, deshalb lebt der Stream im Thread und
/// wird über den Stop-Kanal beendet.
struct Microphone {
    enabled: Arc<AtomicBool>,
    stop_tx: Option<mpsc::Sender<()>>,
}

impl CaptureDevice for Microphone {
    fn set_enabled(&mut self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        tracing::debug!("Microphone enabled: {}", enabled);
    }

    fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Capture-Backend für das Mikrofon des Hosts
#[derive(Clone, Default)]
pub struct HostAudioCapture {
    input_level: Arc<Mutex<f32>>,
}

impl HostAudioCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pegel (RMS, 0.0 - 1.0) des zuletzt geöffneten Mikrofons
    pub fn input_level(&self) -> f32 {
        *self.input_level.lock()
    }
}

impl MediaCapture for HostAudioCapture {
    fn acquire(
        &self,
        source: CaptureSource,
        constraints: MediaConstraints,
    ) -> BoxFuture<'_, Result<LocalTrack, CaptureError>> {
        let input_level = Arc::clone(&self.input_level);
        Box::pin(async move {
            if source != CaptureSource::Microphone {
                return Err(CaptureError::Unsupported(source));
            }

            let device_id = constraints.audio.device_id;
            tokio::task::spawn_blocking(move || open_microphone(device_id, input_level))
                .await
                .map_err(|e| CaptureError::Backend(e.to_string()))?
        })
    }

    fn capabilities(&self) -> CaptureCapabilities {
        let host = cpal::default_host();
        let microphone = host.default_input_device().is_some();
        CaptureCapabilities {
            microphone,
            camera: false,
            screen: false,
            details: vec![
                format!("Audio host: {:?}", host.id()),
                format!("Default input device: {}", if microphone { "Yes" } else { "No" }),
            ],
        }
    }
}

fn find_input_device(device_id: Option<&str>) -> Result<Device, CaptureError> {
    let host = cpal::default_host();
    match device_id {
        Some(wanted) => host
            .input_devices()
            .map_err(|e| CaptureError::Backend(e.to_string()))?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
            .ok_or(CaptureError::DeviceNotFound(CaptureSource::Microphone)),
        None => host
            .default_input_device()
            .ok_or(CaptureError::DeviceNotFound(CaptureSource::Microphone)),
    }
}

/// Findet eine F32-Konfiguration, bevorzugt 48kHz
fn select_input_config(device: &Device) -> Result<StreamConfig, CaptureError> {
    let configs: Vec<_> = device
        .supported_input_configs()
        .map_err(|e| CaptureError::Backend(e.to_string()))?
        .filter(|c| c.sample_format() == SampleFormat::F32)
        .collect();

    let target_rate = cpal::SampleRate(SAMPLE_RATE);
    if let Some(config) = configs
        .iter()
        .find(|c| c.min_sample_rate() <= target_rate && c.max_sample_rate() >= target_rate)
    {
        return Ok(config.clone().with_sample_rate(target_rate).into());
    }

    configs
        .first()
        .map(|c| c.clone().with_max_sample_rate().into())
        .ok_or(CaptureError::Unsupported(CaptureSource::Microphone))
}

fn open_microphone(
    device_id: Option<String>,
    input_level: Arc<Mutex<f32>>,
) -> Result<LocalTrack, CaptureError> {
    let enabled = Arc::new(AtomicBool::new(true));
    let (stop_tx, stop_rx) = mpsc::channel::<()>();
    let (ready_tx, ready_rx) = mpsc::channel::<Result<String, CaptureError>>();

    let thread_enabled = Arc::clone(&enabled);
    std::thread::spawn(move || {
        let opened = find_input_device(device_id.as_deref()).and_then(|device| {
            let name = device.name().unwrap_or_else(|_| "unknown".to_string());
            let config = select_input_config(&device)?;

            tracing::info!(
                "Starting microphone capture: {} Hz, {} channels",
                config.sample_rate.0,
                config.channels
            );

            let stream = device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        if !thread_enabled.load(Ordering::Relaxed) || data.is_empty() {
                            *input_level.lock() = 0.0;
                            return;
                        }
                        let rms: f32 =
                            (data.iter().map(|s| s * s).sum::<f32>() / data.len() as f32).sqrt();
                        *input_level.lock() = rms.min(1.0);
                    },
                    |err| {
                        tracing::error!("Audio capture error: {}", err);
                    },
                    None,
                )
                .map_err(|e| match e {
                    cpal::BuildStreamError::DeviceNotAvailable => {
                        CaptureError::DeviceNotFound(CaptureSource::Microphone)
                    }
                    other => CaptureError::Backend(other.to_string()),
                })?;

            stream
                .play()
                .map_err(|e| CaptureError::Backend(e.to_string()))?;

            Ok((name, stream))
        });

        match opened {
            Ok((name, stream)) => {
                let _ = ready_tx.send(Ok(name));
                // Blockiert bis stop() oder der Track gedroppt wird
                let _ = stop_rx.recv();
                drop(stream);
                tracing::info!("Microphone capture stopped");
            }
            Err(e) => {
                let _ = ready_tx.send(Err(e));
            }
        }
    });

    let label = ready_rx
        .recv()
        .map_err(|e| CaptureError::Backend(e.to_string()))??;

    Ok(LocalTrack::new(
        CaptureSource::Microphone,
        label,
        Box::new(Microphone {
            enabled,
            stop_tx: Some(stop_tx),
        }),
    ))
}
