//! A recording [`Transport`] for development without hardware
//!
//! Clones share the same state, keep one handle to inspect the traffic
//! while the driver owns the other.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{Error, Result};
use crate::traits::Transport;

/// One call seen by the [`MockTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusCall {
    /// `init()`
    Init,
    /// `close()`
    Close,
    /// `reset()`
    Reset,
    /// `wait_ready(timeout_ms)`
    WaitReady(u32),
    /// `write_command(command)`
    Command(u16),
    /// `write_data(word)`
    Data(u16),
    /// `write_data_bulk(words)`
    DataBulk(Vec<u16>),
    /// `read_data()`
    Read,
    /// `read_data_bulk(length)`
    ReadBulk(usize),
}

impl BusCall {
    /// Whether the call put words on the bus
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            BusCall::Command(_) | BusCall::Data(_) | BusCall::DataBulk(_)
        )
    }
}

#[derive(Debug, Default)]
struct State {
    initialized: bool,
    calls: Vec<BusCall>,
    replies: VecDeque<u16>,
    failures: VecDeque<Error>,
}

/// Recording transport with scripted replies and injectable failures
///
/// Reads pop scripted replies and answer 0 once none are left, which also
/// reads as "LUT idle" when the display polls its status register.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<State>>,
}

impl MockTransport {
    /// A fresh mock without scripted replies
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues one word for the next read
    pub fn queue_reply(&self, word: u16) {
        self.lock().replies.push_back(word);
    }

    /// Queues words for the following reads
    pub fn queue_replies(&self, words: &[u16]) {
        self.lock().replies.extend(words.iter().copied());
    }

    /// Queues a 20-word device info block reporting a `width` x `height`
    /// panel with its image buffer at `0x001236E0`
    pub fn queue_device_info(&self, width: u16, height: u16) {
        let mut words = vec![width, height, 0x36E0, 0x0012];
        words.extend(version_words("1.0"));
        words.extend(version_words("M841"));
        self.queue_replies(&words);
    }

    /// The next fallible call returns `error` instead of running.
    /// Queued errors are used up in order, one per call.
    pub fn fail_next(&self, error: Error) {
        self.lock().failures.push_back(error);
    }

    /// Every call seen so far
    pub fn calls(&self) -> Vec<BusCall> {
        self.lock().calls.clone()
    }

    /// Forgets the recorded calls, keeps replies and failures
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Number of recorded calls that put words on the bus
    pub fn write_count(&self) -> usize {
        self.lock().calls.iter().filter(|c| c.is_write()).count()
    }

    /// How often `command` was sent
    pub fn command_count(&self, command: u16) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| **c == BusCall::Command(command))
            .count()
    }

    /// Whether `init()` ran and `close()` didn't since
    pub fn is_initialized(&self) -> bool {
        self.lock().initialized
    }

    fn record(&self, call: BusCall) -> Result<()> {
        let mut state = self.lock();
        state.calls.push(call);
        match state.failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn record_io(&self, call: BusCall) -> Result<()> {
        self.record(call)?;
        if self.lock().initialized {
            Ok(())
        } else {
            Err(Error::Communication("mock transport not initialized".into()))
        }
    }

    fn next_reply(&self) -> u16 {
        self.lock().replies.pop_front().unwrap_or(0)
    }
}

fn version_words(version: &str) -> Vec<u16> {
    let mut words: Vec<u16> = version.encode_utf16().take(8).collect();
    words.resize(8, 0);
    words
}

impl Transport for MockTransport {
    fn init(&mut self) -> Result<()> {
        self.record(BusCall::Init)?;
        self.lock().initialized = true;
        Ok(())
    }

    fn close(&mut self) {
        let mut state = self.lock();
        state.calls.push(BusCall::Close);
        state.initialized = false;
    }

    fn reset(&mut self) -> Result<()> {
        self.record_io(BusCall::Reset)
    }

    fn wait_ready(&mut self, timeout_ms: u32) -> Result<()> {
        self.record(BusCall::WaitReady(timeout_ms))
    }

    fn write_command(&mut self, command: u16) -> Result<()> {
        self.record_io(BusCall::Command(command))
    }

    fn write_data(&mut self, data: u16) -> Result<()> {
        self.record_io(BusCall::Data(data))
    }

    fn write_data_bulk(&mut self, data: &[u16]) -> Result<()> {
        self.record_io(BusCall::DataBulk(data.to_vec()))
    }

    fn read_data(&mut self) -> Result<u16> {
        self.record_io(BusCall::Read)?;
        Ok(self.next_reply())
    }

    fn read_data_bulk(&mut self, length: usize) -> Result<Vec<u16>> {
        self.record_io(BusCall::ReadBulk(length))?;
        Ok((0..length).map(|_| self.next_reply()).collect())
    }
}
