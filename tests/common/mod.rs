//! Shared test utilities
//!
//! A mock audio backend whose clocks are driven by hand. Monitors are shared
//! with the test through `Rc`, so state stays observable after the contexts
//! have been moved into a session.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use companion_voice::voice::{
    AudioBackend, AudioBuffer, AudioContext, BlockProcessor, ContextState, EndedCallback,
    InputContext, OUTPUT_SAMPLE_RATE, OutputContext, PcmFrame, PlaybackHandle, StopOutcome,
};
use companion_voice::{Error, Result};

/// Observable state of one mock context
pub struct ContextMonitor {
    pub state: Cell<ContextState>,
    pub time: Cell<f64>,
    /// Earliest playable time; the device may have rendered past `time`
    pub rendered: Cell<f64>,
    pub fail_resume: Cell<bool>,
    pub resume_calls: Cell<usize>,
    pub suspend_calls: Cell<usize>,
    pub close_calls: Cell<usize>,
    pub attach_calls: Cell<usize>,
    pub block_size: Cell<usize>,
    pub processor: RefCell<Option<BlockProcessor>>,
    pub scheduled: RefCell<Vec<MockVoice>>,
}

impl ContextMonitor {
    fn new() -> Rc<Self> {
        Rc::new(Self {
            state: Cell::new(ContextState::Running),
            time: Cell::new(0.0),
            rendered: Cell::new(0.0),
            fail_resume: Cell::new(false),
            resume_calls: Cell::new(0),
            suspend_calls: Cell::new(0),
            close_calls: Cell::new(0),
            attach_calls: Cell::new(0),
            block_size: Cell::new(0),
            processor: RefCell::new(None),
            scheduled: RefCell::new(Vec::new()),
        })
    }

    /// Deliver one block to the attached processor, as the audio thread would
    pub fn push_block(&self, block: &[f32]) {
        let mut processor = self.processor.borrow_mut();
        let processor = processor.as_mut().expect("no processor attached");
        processor(block);
    }

    /// Advance the clock to `time`, ending every voice that has played out
    pub fn advance_to(&self, time: f64) {
        self.time.set(time);
        for voice in self.scheduled.borrow_mut().iter_mut() {
            if voice.end() <= time + 1e-9 {
                voice.finish();
            }
        }
    }

    /// Start times of everything scheduled so far
    pub fn start_times(&self) -> Vec<f64> {
        self.scheduled.borrow().iter().map(|v| v.when).collect()
    }
}

/// A buffer handed to the mock output context
pub struct MockVoice {
    pub when: f64,
    pub buffer: AudioBuffer,
    pub finished: Arc<AtomicBool>,
    on_ended: Option<EndedCallback>,
}

impl MockVoice {
    pub fn end(&self) -> f64 {
        self.when + self.buffer.duration()
    }

    /// End naturally, firing `on_ended` once
    pub fn finish(&mut self) {
        self.finished.store(true, Ordering::SeqCst);
        if let Some(on_ended) = self.on_ended.take() {
            on_ended();
        }
    }
}

pub struct MockHandle {
    finished: Arc<AtomicBool>,
    start: f64,
}

impl PlaybackHandle for MockHandle {
    fn start_time(&self) -> f64 {
        self.start
    }

    fn stop(&self) -> StopOutcome {
        if self.finished.swap(true, Ordering::SeqCst) {
            StopOutcome::AlreadyFinished
        } else {
            StopOutcome::Stopped
        }
    }
}

/// Stand-in for a live microphone stream
pub struct MockMic;

pub struct MockContext {
    sample_rate: u32,
    monitor: Rc<ContextMonitor>,
}

#[async_trait(?Send)]
impl AudioContext for MockContext {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn state(&self) -> ContextState {
        self.monitor.state.get()
    }

    fn current_time(&self) -> f64 {
        self.monitor.time.get()
    }

    async fn resume(&self) -> Result<()> {
        self.monitor.resume_calls.set(self.monitor.resume_calls.get() + 1);
        if self.monitor.fail_resume.get() {
            return Err(Error::Audio("resume requires user interaction".to_string()));
        }
        self.monitor.state.set(ContextState::Running);
        Ok(())
    }

    async fn suspend(&self) -> Result<()> {
        self.monitor.suspend_calls.set(self.monitor.suspend_calls.get() + 1);
        self.monitor.state.set(ContextState::Suspended);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.monitor.close_calls.set(self.monitor.close_calls.get() + 1);
        self.monitor.state.set(ContextState::Closed);
        Ok(())
    }
}

impl InputContext for MockContext {
    type Stream = MockMic;

    fn attach(&self, _stream: &MockMic, block_size: usize, processor: BlockProcessor) -> Result<()> {
        self.monitor.attach_calls.set(self.monitor.attach_calls.get() + 1);
        self.monitor.block_size.set(block_size);
        *self.monitor.processor.borrow_mut() = Some(processor);
        Ok(())
    }
}

impl OutputContext for MockContext {
    type Handle = MockHandle;

    fn start_buffer(
        &self,
        buffer: AudioBuffer,
        when: f64,
        on_ended: EndedCallback,
    ) -> Result<MockHandle> {
        if self.monitor.state.get() == ContextState::Closed {
            return Err(Error::Audio("closed".to_string()));
        }
        let start = when.max(self.monitor.rendered.get());
        let finished = Arc::new(AtomicBool::new(false));
        self.monitor.scheduled.borrow_mut().push(MockVoice {
            when: start,
            buffer,
            finished: Arc::clone(&finished),
            on_ended: Some(on_ended),
        });
        Ok(MockHandle { finished, start })
    }
}

/// Backend handing out mock contexts that share the monitors below
pub struct MockBackend {
    pub input: Rc<ContextMonitor>,
    pub output: Rc<ContextMonitor>,
    pub inputs_created: Rc<Cell<usize>>,
    pub outputs_created: Rc<Cell<usize>>,
    pub fail_output: Rc<Cell<bool>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            input: ContextMonitor::new(),
            output: ContextMonitor::new(),
            inputs_created: Rc::new(Cell::new(0)),
            outputs_created: Rc::new(Cell::new(0)),
            fail_output: Rc::new(Cell::new(false)),
        }
    }

    /// Clone of every shared monitor, for inspection after the backend moves
    pub fn monitors(&self) -> Monitors {
        Monitors {
            input: Rc::clone(&self.input),
            output: Rc::clone(&self.output),
            inputs_created: Rc::clone(&self.inputs_created),
            outputs_created: Rc::clone(&self.outputs_created),
            fail_output: Rc::clone(&self.fail_output),
        }
    }
}

pub struct Monitors {
    pub input: Rc<ContextMonitor>,
    pub output: Rc<ContextMonitor>,
    pub inputs_created: Rc<Cell<usize>>,
    pub outputs_created: Rc<Cell<usize>>,
    pub fail_output: Rc<Cell<bool>>,
}

impl AudioBackend for MockBackend {
    type Stream = MockMic;
    type Input = MockContext;
    type Output = MockContext;

    fn create_input(&self, sample_rate: u32) -> Result<MockContext> {
        self.inputs_created.set(self.inputs_created.get() + 1);
        self.input.state.set(ContextState::Running);
        Ok(MockContext {
            sample_rate,
            monitor: Rc::clone(&self.input),
        })
    }

    fn create_output(&self, sample_rate: u32) -> Result<MockContext> {
        if self.fail_output.get() {
            return Err(Error::Audio("no output device available".to_string()));
        }
        self.outputs_created.set(self.outputs_created.get() + 1);
        self.output.state.set(ContextState::Running);
        self.output.scheduled.borrow_mut().clear();
        Ok(MockContext {
            sample_rate,
            monitor: Rc::clone(&self.output),
        })
    }
}

/// Standalone output context for scheduler tests
pub fn output_context() -> (MockContext, Rc<ContextMonitor>) {
    let monitor = ContextMonitor::new();
    (
        MockContext {
            sample_rate: OUTPUT_SAMPLE_RATE,
            monitor: Rc::clone(&monitor),
        },
        monitor,
    )
}

/// Base64 chunk of `millis` of constant-amplitude audio at the output rate
pub fn chunk(millis: u32, amplitude: f32) -> String {
    let samples = vec![amplitude; (OUTPUT_SAMPLE_RATE * millis / 1000) as usize];
    PcmFrame::from_samples(&samples, OUTPUT_SAMPLE_RATE).encode().data
}

/// Assert two times agree to well below one sample
pub fn assert_time(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-9,
        "expected {expected}, got {actual}"
    );
}
