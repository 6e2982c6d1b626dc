//! Media Module - Capture-Schicht und Stream Registry
//!
//! Dieses Modul verwaltet:
//! - Anforderung von Mikrofon, Kamera und Bildschirm über [`MediaCapture`]
//! - Besitz lokaler Tracks (Freigabe beim Drop)
//! - Zuordnung Teilnehmer → Stream
//! - Host-Audio über cpal (Feature `host-audio`)

mod capture;
mod constraints;
#[cfg(test)]
pub(crate) mod fake;
#[cfg(feature = "host-audio")]
mod host;
mod registry;

pub use capture::{
    CaptureCapabilities, CaptureDevice, CaptureError, CaptureSource, LocalTrack, MediaCapture,
    MediaKind,
};
pub use constraints::{AudioConstraints, MediaConstraints, VideoConstraints, VideoQuality};
#[cfg(feature = "host-audio")]
pub use host::{list_audio_devices, AudioDevice, DeviceInventory, HostAudioCapture};
pub use registry::{LocalStream, RemoteStream, RemoteTrack, StreamRegistry, StreamView};
