//! Capture encoder: microphone blocks to wire frames
//!
//! Each block of mono samples produces one loudness sample and one base64
//! PCM16 frame. Frames are delivered synchronously from the audio callback
//! with no buffering or backpressure.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::context::BlockProcessor;
use super::pcm::{EncodedFrame, encode_base64, encode_pcm16_into, mime_type_for, rms_level};

/// Samples per capture block
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Receives each encoded frame
pub type FrameCallback = Box<dyn FnMut(EncodedFrame) + Send + 'static>;

/// Receives the RMS level of each block
pub type LevelCallback = Box<dyn FnMut(f32) + Send + 'static>;

/// Encodes fixed-size sample blocks into wire frames
pub struct CaptureEncoder {
    mime_type: String,
    scratch: Vec<u8>,
    on_frame: FrameCallback,
    on_level: Option<LevelCallback>,
    frames_emitted: Arc<AtomicU64>,
}

impl CaptureEncoder {
    /// Create an encoder for blocks captured at `sample_rate`
    #[must_use]
    pub fn new(sample_rate: u32, on_frame: FrameCallback, on_level: Option<LevelCallback>) -> Self {
        Self {
            mime_type: mime_type_for(sample_rate),
            scratch: Vec::with_capacity(DEFAULT_BLOCK_SIZE * 2),
            on_frame,
            on_level,
            frames_emitted: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Shared counter of frames delivered so far
    #[must_use]
    pub fn frame_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.frames_emitted)
    }

    /// Encode one block and fire the callbacks
    pub fn process_block(&mut self, block: &[f32]) {
        let level = rms_level(block);
        if let Some(on_level) = self.on_level.as_mut() {
            on_level(level);
        }

        encode_pcm16_into(block, &mut self.scratch);
        let frame = EncodedFrame {
            data: encode_base64(&self.scratch),
            mime_type: self.mime_type.clone(),
        };

        self.frames_emitted.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(samples = block.len(), level, "encoded capture block");

        (self.on_frame)(frame);
    }

    /// Move the encoder into a processor for [`InputContext::attach`]
    ///
    /// [`InputContext::attach`]: super::context::InputContext::attach
    #[must_use]
    pub fn into_processor(mut self) -> BlockProcessor {
        Box::new(move |block: &[f32]| self.process_block(block))
    }
}

/// Regroups arbitrarily sized callbacks into fixed-size blocks
#[derive(Debug)]
pub struct BlockAccumulator {
    block: Vec<f32>,
    block_size: usize,
}

impl BlockAccumulator {
    #[must_use]
    pub fn new(block_size: usize) -> Self {
        let block_size = block_size.max(1);
        Self {
            block: Vec::with_capacity(block_size),
            block_size,
        }
    }

    /// Append samples, calling `on_block` for every completed block
    pub fn push(&mut self, mut samples: &[f32], mut on_block: impl FnMut(&[f32])) {
        while !samples.is_empty() {
            let take = (self.block_size - self.block.len()).min(samples.len());
            self.block.extend_from_slice(&samples[..take]);
            samples = &samples[take..];

            if self.block.len() == self.block_size {
                on_block(&self.block);
                self.block.clear();
            }
        }
    }

    /// Samples waiting for the current block to fill
    #[must_use]
    pub fn pending(&self) -> usize {
        self.block.len()
    }

    #[must_use]
    pub const fn block_size(&self) -> usize {
        self.block_size
    }
}

/// Average interleaved channels down to mono, reusing `out`
#[allow(clippy::cast_precision_loss)]
pub fn downmix_into(interleaved: &[f32], channels: usize, out: &mut Vec<f32>) {
    out.clear();
    if channels <= 1 {
        out.extend_from_slice(interleaved);
        return;
    }

    let scale = 1.0 / channels as f32;
    out.extend(
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() * scale),
    );
}
