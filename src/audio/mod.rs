//! audio - Sound card I/O and the per-block signal chain of the client
//!
//! Uses ALSA for blocking duplex I/O and runs capture, mixing, resampling
//! and playback on one dedicated real-time thread.

mod alsa_device;
mod device;
mod duplex;
mod level_meter;
mod priority;
mod resample;
mod reverb;
pub mod sample;
#[cfg(feature = "speexdsp")]
mod speex;

pub use alsa_device::AlsaDevice;
pub use duplex::DuplexClient;
