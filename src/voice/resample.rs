//! Streaming sample-rate conversion
//!
//! Wraps a fixed-input rubato resampler so arbitrarily sized callbacks can
//! be pushed through it. Input is buffered until a full chunk is available.

use rubato::{FftFixedIn, Resampler};

use crate::{Error, Result};

/// Default input chunk for device-rate conversion
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Mono resampler accepting input of any length
pub struct StreamResampler {
    resampler: FftFixedIn<f32>,
    pending: Vec<f32>,
    from_rate: u32,
    to_rate: u32,
}

impl StreamResampler {
    /// Create a resampler from `from_rate` to `to_rate`
    ///
    /// # Errors
    ///
    /// Returns error if rubato rejects the rates or chunk size
    pub fn new(from_rate: u32, to_rate: u32, chunk_size: usize) -> Result<Self> {
        let resampler = FftFixedIn::<f32>::new(
            from_rate as usize,
            to_rate as usize,
            chunk_size,
            2,
            1,
        )
        .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?;

        tracing::debug!(from_rate, to_rate, chunk_size, "resampler initialized");

        Ok(Self {
            resampler,
            pending: Vec::with_capacity(chunk_size * 2),
            from_rate,
            to_rate,
        })
    }

    /// Input frames consumed per conversion step
    #[must_use]
    pub fn input_frames_next(&self) -> usize {
        self.resampler.input_frames_next()
    }

    /// Push input and append every completed chunk's output to `out`
    ///
    /// # Errors
    ///
    /// Returns error if rubato fails on a chunk
    pub fn process(&mut self, input: &[f32], out: &mut Vec<f32>) -> Result<()> {
        self.pending.extend_from_slice(input);

        loop {
            let chunk = self.resampler.input_frames_next();
            if self.pending.len() < chunk {
                break;
            }

            let converted = self
                .resampler
                .process(&[&self.pending[..chunk]], None)
                .map_err(|e| Error::Audio(format!("resample failed: {e}")))?;
            if let Some(channel) = converted.first() {
                out.extend_from_slice(channel);
            }
            self.pending.drain(..chunk);
        }

        Ok(())
    }

    /// Output rate divided by input rate
    #[must_use]
    pub fn ratio(&self) -> f64 {
        f64::from(self.to_rate) / f64::from(self.from_rate)
    }
}
