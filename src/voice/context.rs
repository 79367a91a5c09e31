//! Audio context abstraction
//!
//! An audio context owns a device stream and a clock at one fixed sample
//! rate. The session only talks to contexts through these traits, so the
//! cpal backend and test doubles are interchangeable. All futures are
//! `?Send`: the pipeline is driven from a single logical thread.

use async_trait::async_trait;

use crate::Result;

/// Lifecycle state of an audio context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// Clock advancing, device streaming
    Running,
    /// Clock frozen until resumed
    Suspended,
    /// Torn down, cannot be resumed
    Closed,
}

/// Mono float samples at a fixed sample rate
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioBuffer {
    #[must_use]
    pub const fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    #[must_use]
    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Duration in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }
}

/// Per-block handler registered on an input context
///
/// Invoked on the platform's audio thread with exactly one block of mono
/// samples at the context rate. Must not block.
pub type BlockProcessor = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// Fired once when a scheduled buffer stops producing sound
pub type EndedCallback = Box<dyn FnOnce() + Send + 'static>;

/// Result of stopping a playback handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The buffer was scheduled or playing and is now silenced
    Stopped,
    /// The buffer had already ended or been stopped
    AlreadyFinished,
}

/// Handle to one scheduled playback buffer
pub trait PlaybackHandle: Send + 'static {
    /// Context time the buffer actually starts at
    ///
    /// Later than the requested time when the context clock had already
    /// passed it by the time the buffer was queued.
    fn start_time(&self) -> f64;

    /// Silence the buffer immediately
    fn stop(&self) -> StopOutcome;
}

/// Common surface of input and output contexts
#[async_trait(?Send)]
pub trait AudioContext {
    /// Fixed sample rate of the context
    fn sample_rate(&self) -> u32;

    fn state(&self) -> ContextState;

    /// Context clock in seconds; only advances while running
    fn current_time(&self) -> f64;

    /// Resume a suspended context
    ///
    /// # Errors
    ///
    /// Returns error if the platform refuses to start the stream
    async fn resume(&self) -> Result<()>;

    /// Suspend a running context
    ///
    /// # Errors
    ///
    /// Returns error if the platform cannot pause the stream
    async fn suspend(&self) -> Result<()>;

    /// Release the device; the context cannot be resumed afterwards
    ///
    /// # Errors
    ///
    /// Returns error if the platform fails to release the stream
    async fn close(&self) -> Result<()>;
}

/// Context that turns a live microphone stream into fixed-size blocks
pub trait InputContext: AudioContext {
    /// Live input stream acquired by the caller
    type Stream;

    /// Attach `stream` as the source and register the block processor
    ///
    /// # Errors
    ///
    /// Returns error if the stream cannot be opened at the context rate
    fn attach(
        &self,
        stream: &Self::Stream,
        block_size: usize,
        processor: BlockProcessor,
    ) -> Result<()>;
}

/// Context that plays buffers at absolute times on its clock
pub trait OutputContext: AudioContext {
    type Handle: PlaybackHandle;

    /// Schedule `buffer` to start at context time `when`, or as soon as
    /// possible if `when` has passed
    ///
    /// # Errors
    ///
    /// Returns error if the context is closed or the buffer rate differs
    /// from the context rate
    fn start_buffer(
        &self,
        buffer: AudioBuffer,
        when: f64,
        on_ended: EndedCallback,
    ) -> Result<Self::Handle>;
}

/// Factory for the input and output contexts of one session
pub trait AudioBackend {
    /// Live input stream type accepted by the input context
    type Stream;
    type Input: InputContext<Stream = Self::Stream>;
    type Output: OutputContext;

    /// Create an input context at `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns error if no input context can be created
    fn create_input(&self, sample_rate: u32) -> Result<Self::Input>;

    /// Create an output context at `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns error if no output device is available
    fn create_output(&self, sample_rate: u32) -> Result<Self::Output>;
}
