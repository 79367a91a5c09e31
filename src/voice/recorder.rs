//! WAV recording of outgoing frames
//!
//! Decodes wire frames back to PCM16 and appends them to a mono WAV file,
//! which makes it easy to listen to exactly what the model receives.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use super::pcm::EncodedFrame;
use crate::{Error, Result};

/// Writes encoded frames into a 16-bit mono WAV file
pub struct FrameRecorder {
    writer: hound::WavWriter<BufWriter<File>>,
    sample_rate: u32,
    samples_written: u64,
}

impl FrameRecorder {
    /// Create a WAV file at `path` for frames at `sample_rate`
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be created
    pub fn create(path: &Path, sample_rate: u32) -> Result<Self> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let writer = hound::WavWriter::create(path, spec)?;
        tracing::debug!(path = %path.display(), sample_rate, "recording frames");

        Ok(Self {
            writer,
            sample_rate,
            samples_written: 0,
        })
    }

    /// Append one frame
    ///
    /// # Errors
    ///
    /// Returns error if the frame is malformed, has a different rate, or the
    /// write fails
    pub fn write_frame(&mut self, frame: &EncodedFrame) -> Result<()> {
        let pcm = frame.decode()?;
        if pcm.sample_rate != self.sample_rate {
            return Err(Error::Audio(format!(
                "frame rate {} does not match recording rate {}",
                pcm.sample_rate, self.sample_rate
            )));
        }

        for sample in pcm.samples() {
            self.writer.write_sample(sample)?;
            self.samples_written += 1;
        }
        Ok(())
    }

    #[must_use]
    pub const fn samples_written(&self) -> u64 {
        self.samples_written
    }

    /// Flush the WAV header and close the file
    ///
    /// # Errors
    ///
    /// Returns error if the header cannot be written
    pub fn finalize(self) -> Result<()> {
        self.writer.finalize()?;
        Ok(())
    }
}
