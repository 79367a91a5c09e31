//! Real-time voice pipeline
//!
//! Captures microphone audio into wire frames for the speech model and
//! schedules the model's synthesized speech for gapless playback.

mod capture;
mod context;
mod device;
mod pcm;
mod playback;
mod recorder;
mod resample;
mod session;

pub use capture::{
    BlockAccumulator, CaptureEncoder, DEFAULT_BLOCK_SIZE, FrameCallback, LevelCallback,
    downmix_into,
};
pub use context::{
    AudioBackend, AudioBuffer, AudioContext, BlockProcessor, ContextState, EndedCallback,
    InputContext, OutputContext, PlaybackHandle, StopOutcome,
};
pub use device::{CpalBackend, CpalInputContext, CpalOutputContext, CpalPlaybackHandle, Microphone};
pub use pcm::{
    EncodedFrame, INPUT_MIME_TYPE, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE, PcmFrame,
    decode_base64_pcm16, decode_pcm16, encode_base64, encode_pcm16, mime_type_for,
    normalize_sample, quantize_sample, rms_level,
};
pub use playback::{PlaybackScheduler, ScheduledBuffer};
pub use recorder::FrameRecorder;
pub use resample::StreamResampler;
pub use session::{AudioSession, SessionState};
