//! Audio session: owns both contexts and the playback cursor
//!
//! One session lives per activation of the assistant. Re-activating while a
//! session is active only resumes the existing contexts; it never builds a
//! second capture pipeline against the same stream.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::capture::{CaptureEncoder, FrameCallback, LevelCallback};
use super::context::{AudioBackend, AudioContext, ContextState, InputContext, OutputContext};
use super::playback::{PlaybackScheduler, ScheduledBuffer};
use crate::Result;
use crate::config::AudioConfig;

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Active,
    TornDown,
}

type HandleOf<B> = <<B as AudioBackend>::Output as OutputContext>::Handle;

/// Capture and playback state for one conversation
pub struct AudioSession<B: AudioBackend> {
    backend: B,
    config: AudioConfig,
    state: SessionState,
    input: Option<B::Input>,
    output: Option<B::Output>,
    scheduler: PlaybackScheduler<HandleOf<B>>,
    frames_emitted: Option<Arc<AtomicU64>>,
}

impl<B: AudioBackend> AudioSession<B> {
    #[must_use]
    pub fn new(backend: B, config: AudioConfig) -> Self {
        Self {
            backend,
            config,
            state: SessionState::Uninitialized,
            input: None,
            output: None,
            scheduler: PlaybackScheduler::new(),
            frames_emitted: None,
        }
    }

    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Whether the session has been activated and not torn down
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Start capturing `stream`, or resume if already active
    ///
    /// On first activation this creates the input context at the configured
    /// input rate and attaches the stream with a [`CaptureEncoder`] as the
    /// per-block handler. The output context is created too unless
    /// [`init_playback`](Self::init_playback) already did.
    ///
    /// # Errors
    ///
    /// Returns error if a context cannot be created or the stream cannot be
    /// attached; capture stays inactive in that case
    pub async fn init(
        &mut self,
        stream: &B::Stream,
        on_frame: FrameCallback,
        on_level: Option<LevelCallback>,
    ) -> Result<()> {
        if self.input.is_some() {
            tracing::debug!("audio session already active, resuming");
            self.resume().await;
            return Ok(());
        }

        let input = self.backend.create_input(self.config.input_sample_rate)?;
        let encoder = CaptureEncoder::new(input.sample_rate(), on_frame, on_level);
        let frames_emitted = encoder.frame_counter();
        input.attach(stream, self.config.block_size, encoder.into_processor())?;

        if self.output.is_none() {
            self.open_output()?;
        }

        tracing::debug!(
            input_rate = input.sample_rate(),
            block_size = self.config.block_size,
            "audio session initialized"
        );

        self.input = Some(input);
        self.frames_emitted = Some(frames_emitted);
        self.state = SessionState::Active;
        Ok(())
    }

    /// Create only the output context, for playback without a microphone
    ///
    /// Resumes the existing output context if there is one.
    ///
    /// # Errors
    ///
    /// Returns error if no output context can be created
    pub async fn init_playback(&mut self) -> Result<()> {
        if self.output.is_some() {
            resume_context(self.output.as_ref(), "output").await;
            return Ok(());
        }

        self.open_output()?;
        self.state = SessionState::Active;
        Ok(())
    }

    fn open_output(&mut self) -> Result<()> {
        let output = self.backend.create_output(self.config.output_sample_rate)?;
        tracing::debug!(output_rate = output.sample_rate(), "output context created");
        self.output = Some(output);
        self.scheduler = PlaybackScheduler::new();
        Ok(())
    }

    /// Resume any suspended context
    ///
    /// Platforms may refuse until the user has interacted with the app; that
    /// is logged and the caller can retry later.
    pub async fn resume(&self) {
        resume_context(self.input.as_ref(), "input").await;
        resume_context(self.output.as_ref(), "output").await;
    }

    /// Suspend both contexts, freezing their clocks
    pub async fn suspend(&self) {
        suspend_context(self.input.as_ref(), "input").await;
        suspend_context(self.output.as_ref(), "output").await;
    }

    /// Decode and schedule one chunk of synthesized speech
    ///
    /// A no-op returning `Ok(None)` when the session has no output context.
    ///
    /// # Errors
    ///
    /// Returns error if this chunk is malformed or cannot be scheduled; the
    /// session remains usable
    pub async fn process_output_audio(
        &mut self,
        base64_audio: &str,
    ) -> Result<Option<ScheduledBuffer>> {
        let Some(output) = self.output.as_ref() else {
            tracing::trace!("no output context, dropping chunk");
            return Ok(None);
        };

        self.scheduler
            .process_output_audio(output, base64_audio)
            .await
    }

    /// Cut off all scheduled speech (barge-in)
    pub fn stop_output_audio(&mut self) -> usize {
        self.scheduler.stop()
    }

    /// Stop playback and release both contexts
    pub async fn teardown(&mut self) {
        self.scheduler.stop();

        if let Some(input) = self.input.take() {
            if let Err(e) = input.close().await {
                tracing::warn!(error = %e, "failed to close input context");
            }
        }
        if let Some(output) = self.output.take() {
            if let Err(e) = output.close().await {
                tracing::warn!(error = %e, "failed to close output context");
            }
        }

        self.frames_emitted = None;
        if self.state == SessionState::Active {
            self.state = SessionState::TornDown;
            tracing::debug!("audio session torn down");
        }
    }

    /// Frames delivered to the frame callback in this activation
    #[must_use]
    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted
            .as_ref()
            .map_or(0, |count| count.load(Ordering::Relaxed))
    }

    #[must_use]
    pub const fn input_context(&self) -> Option<&B::Input> {
        self.input.as_ref()
    }

    #[must_use]
    pub const fn output_context(&self) -> Option<&B::Output> {
        self.output.as_ref()
    }

    /// Playback cursor on the output clock
    #[must_use]
    pub const fn next_start_time(&self) -> f64 {
        self.scheduler.next_start_time()
    }

    /// Scheduled buffers that have not ended
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.scheduler.active_count()
    }

    #[must_use]
    pub const fn config(&self) -> &AudioConfig {
        &self.config
    }
}

async fn resume_context<C: AudioContext>(ctx: Option<&C>, kind: &str) {
    let Some(ctx) = ctx else { return };
    if ctx.state() != ContextState::Suspended {
        return;
    }

    match ctx.resume().await {
        Ok(()) => tracing::debug!(context = kind, "audio context resumed"),
        Err(e) => tracing::warn!(
            context = kind,
            error = %e,
            "audio context failed to resume; retry after user interaction"
        ),
    }
}

async fn suspend_context<C: AudioContext>(ctx: Option<&C>, kind: &str) {
    let Some(ctx) = ctx else { return };
    if ctx.state() != ContextState::Running {
        return;
    }

    if let Err(e) = ctx.suspend().await {
        tracing::warn!(context = kind, error = %e, "audio context failed to suspend");
    }
}
