//! Playback scheduler: gapless sequential playback of synthesized speech
//!
//! Incoming base64 PCM16 chunks are decoded and scheduled back to back on
//! the output context clock. A cursor marks where the next chunk starts;
//! when the cursor falls behind the clock it snaps to "now", so playback
//! resumes immediately after an idle gap instead of scheduling in the past.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use super::context::{AudioBuffer, ContextState, OutputContext, PlaybackHandle, StopOutcome};
use super::pcm::decode_base64_pcm16;
use crate::Result;

/// Where and for how long a chunk was scheduled
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledBuffer {
    pub id: u64,
    /// Start time on the output context clock, in seconds
    pub start: f64,
    /// Duration in seconds
    pub duration: f64,
}

impl ScheduledBuffer {
    /// Time at which this buffer stops playing
    #[must_use]
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

/// Scheduled handles keyed by buffer id
///
/// A slot is `None` between reserving the id and receiving the handle from
/// the context, so an `on_ended` that fires early still clears the slot.
type ActiveBuffers<H> = HashMap<u64, Option<H>>;

/// Schedules decoded chunks so they play in call order without gaps or overlap
pub struct PlaybackScheduler<H: PlaybackHandle> {
    next_start_time: f64,
    next_id: u64,
    active: Arc<Mutex<ActiveBuffers<H>>>,
}

impl<H: PlaybackHandle> PlaybackScheduler<H> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_start_time: 0.0,
            next_id: 0,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Cursor where the next chunk will start, unless it has fallen behind
    #[must_use]
    pub const fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    /// Buffers scheduled or playing that have not ended
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Decode one chunk and schedule it right after the previous one
    ///
    /// A suspended context is resumed before any timing is computed. Empty
    /// payloads schedule nothing and return `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns error if the context cannot be resumed, the payload is not
    /// well-formed base64 PCM16, or the context rejects the buffer. The
    /// cursor and active set are left untouched in every error case.
    pub async fn process_output_audio<C>(
        &mut self,
        ctx: &C,
        base64_audio: &str,
    ) -> Result<Option<ScheduledBuffer>>
    where
        C: OutputContext<Handle = H>,
    {
        if ctx.state() == ContextState::Suspended {
            ctx.resume().await?;
        }

        let samples = decode_base64_pcm16(base64_audio)?;
        if samples.is_empty() {
            tracing::trace!("empty output chunk, nothing to schedule");
            return Ok(None);
        }

        let buffer = AudioBuffer::new(samples, ctx.sample_rate());
        let duration = buffer.duration();

        let now = ctx.current_time();
        let requested = self.next_start_time.max(now);

        let id = self.next_id;
        self.next_id += 1;
        self.lock_active().insert(id, None);

        let on_ended = ended_callback(Arc::downgrade(&self.active), id);
        let handle = match ctx.start_buffer(buffer, requested, on_ended) {
            Ok(handle) => handle,
            Err(e) => {
                self.lock_active().remove(&id);
                return Err(e);
            }
        };

        // The clock may have moved past `requested` before the buffer was queued
        let start = handle.start_time().max(requested);
        if start > requested {
            tracing::debug!(id, requested, start, "output chunk started late");
        }

        if let Some(slot) = self.lock_active().get_mut(&id) {
            *slot = Some(handle);
        }

        self.next_start_time = start + duration;

        tracing::trace!(id, start, duration, now, "scheduled output chunk");

        Ok(Some(ScheduledBuffer {
            id,
            start,
            duration,
        }))
    }

    /// Silence everything scheduled and reset the cursor
    ///
    /// Handles that already ended are skipped silently. Returns how many
    /// buffers were actually cut off.
    pub fn stop(&mut self) -> usize {
        let handles: Vec<H> = self
            .lock_active()
            .drain()
            .filter_map(|(_, handle)| handle)
            .collect();

        // Stop outside the lock: a context may fire `on_ended` synchronously
        let stopped = handles
            .iter()
            .filter(|handle| handle.stop() == StopOutcome::Stopped)
            .count();

        self.next_start_time = 0.0;

        tracing::debug!(stopped, "output playback stopped");
        stopped
    }

    fn lock_active(&self) -> std::sync::MutexGuard<'_, ActiveBuffers<H>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<H: PlaybackHandle> Default for PlaybackScheduler<H> {
    fn default() -> Self {
        Self::new()
    }
}

/// Drop buffer `id` from the active set once it ends
fn ended_callback<H: PlaybackHandle>(
    active: Weak<Mutex<ActiveBuffers<H>>>,
    id: u64,
) -> Box<dyn FnOnce() + Send + 'static> {
    Box::new(move || {
        if let Some(active) = active.upgrade() {
            active
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
        }
    })
}
