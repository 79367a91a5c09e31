//! Companion Voice - real-time audio core for a conversational AI companion
//!
//! This library provides the audio pipeline between a microphone, a remote
//! speech model and the speakers:
//! - Capture encoding (16 kHz PCM16 frames plus a loudness level)
//! - Playback scheduling (gapless 24 kHz playback with barge-in stop)
//! - Session lifecycle (idempotent init, resume, teardown)
//!
//! # Architecture
//!
//! ```text
//! ┌────────────┐  blocks   ┌────────────────┐  frames   ┌──────────────┐
//! │ Microphone ├──────────►│ CaptureEncoder ├──────────►│ speech model │
//! └────────────┘           └────────────────┘           └──────┬───────┘
//!                                                              │ base64
//! ┌────────────┐  buffers  ┌───────────────────┐               │
//! │  Speakers  │◄──────────┤ PlaybackScheduler │◄──────────────┘
//! └────────────┘           └───────────────────┘
//! ```
//!
//! Transport to the speech model is left to the caller.

pub mod config;
pub mod error;
pub mod voice;

pub use config::{AudioConfig, Config};
pub use error::{Error, Result};
pub use voice::{AudioSession, EncodedFrame, PlaybackScheduler, ScheduledBuffer};
