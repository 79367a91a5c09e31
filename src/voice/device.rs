//! Native audio contexts backed by cpal
//!
//! The input context turns a microphone into fixed-size mono blocks at the
//! context rate. The output context mixes scheduled buffers against a clock
//! derived from the number of frames rendered, so scheduling math happens in
//! the same time domain the device actually plays in.

use std::cell::{Cell, RefCell};
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    Device, FromSample, Sample, SampleFormat, SampleRate, SizedSample, Stream, StreamConfig,
    SupportedStreamConfig, SupportedStreamConfigRange,
};

use super::capture::{BlockAccumulator, downmix_into};
use super::context::{
    AudioBackend, AudioBuffer, AudioContext, BlockProcessor, ContextState, EndedCallback,
    InputContext, OutputContext, PlaybackHandle, StopOutcome,
};
use super::resample::{DEFAULT_CHUNK_SIZE, StreamResampler};
use crate::{Error, Result};

/// Live microphone acquired outside the audio core
pub struct Microphone {
    device: Device,
}

impl Microphone {
    /// Open the named input device, or the default one
    ///
    /// # Errors
    ///
    /// Returns error if no matching input device exists
    pub fn open(name: Option<&str>) -> Result<Self> {
        let host = cpal::default_host();

        let device = match name {
            Some(name) => host
                .input_devices()
                .map_err(|e| Error::Audio(e.to_string()))?
                .find(|d| d.name().is_ok_and(|n| n == name))
                .ok_or_else(|| Error::Audio(format!("input device not found: {name}")))?,
            None => host
                .default_input_device()
                .ok_or_else(|| Error::Audio("no input device available".to_string()))?,
        };

        tracing::debug!(device = device.name().unwrap_or_default(), "microphone opened");
        Ok(Self { device })
    }

    #[must_use]
    pub fn name(&self) -> String {
        self.device.name().unwrap_or_default()
    }
}

/// Creates cpal-backed contexts
#[derive(Debug, Clone, Default)]
pub struct CpalBackend {
    output_device: Option<String>,
}

impl CpalBackend {
    /// Backend playing to the named output device, or the default one
    #[must_use]
    pub const fn new(output_device: Option<String>) -> Self {
        Self { output_device }
    }
}

impl AudioBackend for CpalBackend {
    type Stream = Microphone;
    type Input = CpalInputContext;
    type Output = CpalOutputContext;

    fn create_input(&self, sample_rate: u32) -> Result<CpalInputContext> {
        Ok(CpalInputContext::new(sample_rate))
    }

    fn create_output(&self, sample_rate: u32) -> Result<CpalOutputContext> {
        let host = cpal::default_host();

        let device = match self.output_device.as_deref() {
            Some(name) => host
                .output_devices()
                .map_err(|e| Error::Audio(e.to_string()))?
                .find(|d| d.name().is_ok_and(|n| n == name))
                .ok_or_else(|| Error::Audio(format!("output device not found: {name}")))?,
            None => host
                .default_output_device()
                .ok_or_else(|| Error::Audio("no output device available".to_string()))?,
        };

        CpalOutputContext::new(&device, sample_rate)
    }
}

/// Stream state shared by both context kinds
struct StreamSlot {
    sample_rate: u32,
    state: Cell<ContextState>,
    stream: RefCell<Option<Stream>>,
    /// Frames produced at the context rate
    clock: Arc<AtomicU64>,
}

impl StreamSlot {
    fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            state: Cell::new(ContextState::Running),
            stream: RefCell::new(None),
            clock: Arc::new(AtomicU64::new(0)),
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn current_time(&self) -> f64 {
        self.clock.load(Ordering::Relaxed) as f64 / f64::from(self.sample_rate)
    }

    /// Install a freshly built stream, starting it if the context is running
    fn install(&self, stream: Stream) {
        if self.state.get() == ContextState::Running {
            if let Err(e) = stream.play() {
                tracing::warn!(error = %e, "audio stream did not start, context suspended");
                self.state.set(ContextState::Suspended);
            }
        }
        *self.stream.borrow_mut() = Some(stream);
    }

    fn resume(&self) -> Result<()> {
        match self.state.get() {
            ContextState::Closed => Err(Error::Audio("context is closed".to_string())),
            ContextState::Running => Ok(()),
            ContextState::Suspended => {
                if let Some(stream) = self.stream.borrow().as_ref() {
                    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
                }
                self.state.set(ContextState::Running);
                Ok(())
            }
        }
    }

    fn suspend(&self) -> Result<()> {
        match self.state.get() {
            ContextState::Closed => Err(Error::Audio("context is closed".to_string())),
            ContextState::Suspended => Ok(()),
            ContextState::Running => {
                if let Some(stream) = self.stream.borrow().as_ref() {
                    stream.pause().map_err(|e| Error::Audio(e.to_string()))?;
                }
                self.state.set(ContextState::Suspended);
                Ok(())
            }
        }
    }

    fn close(&self) {
        if let Some(stream) = self.stream.borrow_mut().take() {
            drop(stream);
        }
        self.state.set(ContextState::Closed);
    }
}

/// Pick a config running at exactly `rate`, fewest channels first
fn exact_rate_config(
    configs: impl Iterator<Item = SupportedStreamConfigRange>,
    rate: u32,
) -> Option<SupportedStreamConfig> {
    configs
        .filter(|c| is_supported_format(c.sample_format()))
        .filter(|c| c.min_sample_rate() <= SampleRate(rate) && c.max_sample_rate() >= SampleRate(rate))
        .min_by_key(SupportedStreamConfigRange::channels)
        .map(|c| c.with_sample_rate(SampleRate(rate)))
}

const fn is_supported_format(format: SampleFormat) -> bool {
    matches!(
        format,
        SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16 | SampleFormat::I32
    )
}

fn unsupported_format(format: SampleFormat) -> Error {
    Error::Audio(format!("unsupported sample format {format:?}"))
}

/// Microphone context producing fixed-size blocks at a fixed rate
pub struct CpalInputContext {
    slot: StreamSlot,
}

impl CpalInputContext {
    fn new(sample_rate: u32) -> Self {
        Self {
            slot: StreamSlot::new(sample_rate),
        }
    }
}

#[async_trait(?Send)]
impl AudioContext for CpalInputContext {
    fn sample_rate(&self) -> u32 {
        self.slot.sample_rate
    }

    fn state(&self) -> ContextState {
        self.slot.state.get()
    }

    fn current_time(&self) -> f64 {
        self.slot.current_time()
    }

    async fn resume(&self) -> Result<()> {
        self.slot.resume()
    }

    async fn suspend(&self) -> Result<()> {
        self.slot.suspend()
    }

    async fn close(&self) -> Result<()> {
        self.slot.close();
        tracing::debug!("input context closed");
        Ok(())
    }
}

impl InputContext for CpalInputContext {
    type Stream = Microphone;

    fn attach(
        &self,
        stream: &Microphone,
        block_size: usize,
        processor: BlockProcessor,
    ) -> Result<()> {
        if self.slot.state.get() == ContextState::Closed {
            return Err(Error::Audio("input context is closed".to_string()));
        }
        if self.slot.stream.borrow().is_some() {
            return Err(Error::Audio("input context already has a source".to_string()));
        }

        let device = &stream.device;
        let rate = self.slot.sample_rate;

        let exact = device
            .supported_input_configs()
            .ok()
            .and_then(|configs| exact_rate_config(configs, rate));
        let supported = match exact {
            Some(config) => config,
            None => device
                .default_input_config()
                .map_err(|e| Error::Audio(e.to_string()))?,
        };

        let format = supported.sample_format();
        let config: StreamConfig = supported.config();
        let resampler = if config.sample_rate.0 == rate {
            None
        } else {
            Some(StreamResampler::new(config.sample_rate.0, rate, DEFAULT_CHUNK_SIZE)?)
        };

        tracing::debug!(
            device = stream.name(),
            device_rate = config.sample_rate.0,
            context_rate = rate,
            channels = config.channels,
            ?format,
            block_size,
            "attaching microphone"
        );

        let pipeline = InputPipeline {
            channels: usize::from(config.channels),
            converted: Vec::new(),
            mono: Vec::new(),
            resampled: Vec::new(),
            resampler,
            accumulator: BlockAccumulator::new(block_size),
            processor,
            clock: Arc::clone(&self.slot.clock),
        };

        let built = match format {
            SampleFormat::I16 => build_input::<i16>(device, &config, pipeline),
            SampleFormat::U16 => build_input::<u16>(device, &config, pipeline),
            SampleFormat::I32 => build_input::<i32>(device, &config, pipeline),
            SampleFormat::F32 => build_input::<f32>(device, &config, pipeline),
            other => Err(unsupported_format(other)),
        }?;

        self.slot.install(built);
        Ok(())
    }
}

/// Everything the input callback needs, owned by the audio thread
struct InputPipeline {
    channels: usize,
    converted: Vec<f32>,
    mono: Vec<f32>,
    resampled: Vec<f32>,
    resampler: Option<StreamResampler>,
    accumulator: BlockAccumulator,
    processor: BlockProcessor,
    clock: Arc<AtomicU64>,
}

impl InputPipeline {
    fn push<T>(&mut self, data: &[T])
    where
        T: Sample,
        f32: FromSample<T>,
    {
        self.converted.clear();
        self.converted
            .extend(data.iter().map(|&s| s.to_sample::<f32>()));
        downmix_into(&self.converted, self.channels, &mut self.mono);

        let samples = match self.resampler.as_mut() {
            Some(resampler) => {
                self.resampled.clear();
                if let Err(e) = resampler.process(&self.mono, &mut self.resampled) {
                    tracing::warn!(error = %e, "dropping input callback");
                    return;
                }
                &self.resampled
            }
            None => &self.mono,
        };

        self.clock.fetch_add(samples.len() as u64, Ordering::Relaxed);

        let processor = &mut self.processor;
        self.accumulator.push(samples, |block| processor(block));
    }
}

fn build_input<T>(device: &Device, config: &StreamConfig, mut pipeline: InputPipeline) -> Result<Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| pipeline.push(data),
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))
}

const VOICE_PENDING: u8 = 0;
const VOICE_FINISHED: u8 = 1;

/// One buffer waiting for or undergoing playback
struct Voice {
    samples: Vec<f32>,
    start_frame: u64,
    state: Arc<AtomicU8>,
    on_ended: Option<EndedCallback>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }

    fn is_finished(&self) -> bool {
        self.state.load(Ordering::Acquire) == VOICE_FINISHED
    }
}

/// Scheduled voices rendered against the context clock
#[derive(Default)]
struct Mixer {
    voices: Vec<Voice>,
    frames_rendered: u64,
}

impl Mixer {
    /// Render the next `out.len()` frames, collecting callbacks of voices that ended
    #[allow(clippy::cast_possible_truncation)]
    fn render(&mut self, out: &mut [f32], ended: &mut Vec<EndedCallback>) {
        out.fill(0.0);
        let start = self.frames_rendered;
        let end = start + out.len() as u64;

        for voice in &self.voices {
            if voice.is_finished() {
                continue;
            }
            let from = voice.start_frame.max(start);
            let to = voice.end_frame().min(end);
            for frame in from..to {
                out[(frame - start) as usize] += voice.samples[(frame - voice.start_frame) as usize];
            }
        }

        self.frames_rendered = end;
        self.retire(end, ended);
    }

    /// Drop voices that were stopped or played out by frame `now`
    fn retire(&mut self, now: u64, ended: &mut Vec<EndedCallback>) {
        let mut i = 0;
        while i < self.voices.len() {
            let voice = &self.voices[i];
            if voice.is_finished() || voice.end_frame() <= now {
                let mut voice = self.voices.swap_remove(i);
                voice.state.store(VOICE_FINISHED, Ordering::Release);
                ended.extend(voice.on_ended.take());
            } else {
                i += 1;
            }
        }
    }

    /// Retire every voice regardless of position
    fn clear(&mut self, ended: &mut Vec<EndedCallback>) {
        for mut voice in self.voices.drain(..) {
            voice.state.store(VOICE_FINISHED, Ordering::Release);
            ended.extend(voice.on_ended.take());
        }
    }
}

fn lock_mixer(mixer: &Mutex<Mixer>) -> std::sync::MutexGuard<'_, Mixer> {
    mixer.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle to a voice in a [`CpalOutputContext`]
#[derive(Debug, Clone)]
pub struct CpalPlaybackHandle {
    state: Arc<AtomicU8>,
    start_time: f64,
}

impl PlaybackHandle for CpalPlaybackHandle {
    fn start_time(&self) -> f64 {
        self.start_time
    }

    fn stop(&self) -> StopOutcome {
        match self.state.swap(VOICE_FINISHED, Ordering::AcqRel) {
            VOICE_FINISHED => StopOutcome::AlreadyFinished,
            _ => StopOutcome::Stopped,
        }
    }
}

/// Speaker context playing scheduled buffers at a fixed rate
pub struct CpalOutputContext {
    slot: StreamSlot,
    mixer: Arc<Mutex<Mixer>>,
}

impl CpalOutputContext {
    fn new(device: &Device, sample_rate: u32) -> Result<Self> {
        let exact = device
            .supported_output_configs()
            .ok()
            .and_then(|configs| exact_rate_config(configs, sample_rate));
        let supported = match exact {
            Some(config) => config,
            None => device
                .default_output_config()
                .map_err(|e| Error::Audio(e.to_string()))?,
        };

        let format = supported.sample_format();
        let config: StreamConfig = supported.config();
        let resampler = if config.sample_rate.0 == sample_rate {
            None
        } else {
            Some(StreamResampler::new(sample_rate, config.sample_rate.0, DEFAULT_CHUNK_SIZE)?)
        };

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            device_rate = config.sample_rate.0,
            context_rate = sample_rate,
            channels = config.channels,
            ?format,
            "audio playback initialized"
        );

        let context = Self {
            slot: StreamSlot::new(sample_rate),
            mixer: Arc::new(Mutex::new(Mixer::default())),
        };

        let renderer = OutputRenderer {
            channels: usize::from(config.channels),
            mixer: Arc::clone(&context.mixer),
            clock: Arc::clone(&context.slot.clock),
            resampler,
            mono: Vec::new(),
            fifo: Vec::new(),
            chunk: Vec::new(),
            ended: Vec::new(),
        };

        let stream = match format {
            SampleFormat::I16 => build_output::<i16>(device, &config, renderer),
            SampleFormat::U16 => build_output::<u16>(device, &config, renderer),
            SampleFormat::I32 => build_output::<i32>(device, &config, renderer),
            SampleFormat::F32 => build_output::<f32>(device, &config, renderer),
            other => Err(unsupported_format(other)),
        }?;

        context.slot.install(stream);
        Ok(context)
    }
}

#[async_trait(?Send)]
impl AudioContext for CpalOutputContext {
    fn sample_rate(&self) -> u32 {
        self.slot.sample_rate
    }

    fn state(&self) -> ContextState {
        self.slot.state.get()
    }

    fn current_time(&self) -> f64 {
        self.slot.current_time()
    }

    async fn resume(&self) -> Result<()> {
        self.slot.resume()
    }

    async fn suspend(&self) -> Result<()> {
        self.slot.suspend()
    }

    async fn close(&self) -> Result<()> {
        self.slot.close();

        let mut ended = Vec::new();
        lock_mixer(&self.mixer).clear(&mut ended);
        for on_ended in ended {
            on_ended();
        }

        tracing::debug!("output context closed");
        Ok(())
    }
}

impl OutputContext for CpalOutputContext {
    type Handle = CpalPlaybackHandle;

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn start_buffer(
        &self,
        buffer: AudioBuffer,
        when: f64,
        on_ended: EndedCallback,
    ) -> Result<CpalPlaybackHandle> {
        if self.slot.state.get() == ContextState::Closed {
            return Err(Error::Audio("output context is closed".to_string()));
        }
        if buffer.sample_rate() != self.slot.sample_rate {
            return Err(Error::Audio(format!(
                "buffer rate {} does not match context rate {}",
                buffer.sample_rate(),
                self.slot.sample_rate
            )));
        }

        let when_frame = (when.max(0.0) * f64::from(self.slot.sample_rate)).round() as u64;
        let state = Arc::new(AtomicU8::new(VOICE_PENDING));

        // Frames already rendered can no longer be played
        let mut mixer = lock_mixer(&self.mixer);
        let start_frame = when_frame.max(mixer.frames_rendered);
        mixer.voices.push(Voice {
            samples: buffer.into_samples(),
            start_frame,
            state: Arc::clone(&state),
            on_ended: Some(on_ended),
        });

        Ok(CpalPlaybackHandle {
            state,
            start_time: start_frame as f64 / f64::from(self.slot.sample_rate),
        })
    }
}

/// Everything the output callback needs, owned by the audio thread
struct OutputRenderer {
    channels: usize,
    mixer: Arc<Mutex<Mixer>>,
    clock: Arc<AtomicU64>,
    resampler: Option<StreamResampler>,
    mono: Vec<f32>,
    fifo: Vec<f32>,
    chunk: Vec<f32>,
    ended: Vec<EndedCallback>,
}

impl OutputRenderer {
    fn fill<T>(&mut self, data: &mut [T])
    where
        T: Sample + FromSample<f32>,
    {
        let frames = data.len() / self.channels.max(1);

        {
            let mut mixer = lock_mixer(&self.mixer);
            match self.resampler.as_mut() {
                None => {
                    self.mono.resize(frames, 0.0);
                    mixer.render(&mut self.mono, &mut self.ended);
                }
                Some(resampler) => {
                    while self.fifo.len() < frames {
                        self.chunk.resize(resampler.input_frames_next(), 0.0);
                        mixer.render(&mut self.chunk, &mut self.ended);
                        if let Err(e) = resampler.process(&self.chunk, &mut self.fifo) {
                            tracing::warn!(error = %e, "output resample failed");
                            self.fifo.resize(frames, 0.0);
                        }
                    }
                    self.mono.clear();
                    self.mono.extend(self.fifo.drain(..frames));
                }
            }
            self.clock.store(mixer.frames_rendered, Ordering::Relaxed);
        }

        for (frame, &sample) in data.chunks_mut(self.channels.max(1)).zip(&self.mono) {
            for out in frame.iter_mut() {
                *out = T::from_sample(sample);
            }
        }

        for on_ended in self.ended.drain(..) {
            on_ended();
        }
    }
}

fn build_output<T>(device: &Device, config: &StreamConfig, mut renderer: OutputRenderer) -> Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| renderer.fill(data),
            |err| {
                tracing::error!(error = %err, "audio playback error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))
}
