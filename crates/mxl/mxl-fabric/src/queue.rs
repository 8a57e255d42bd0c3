//! Typed completion and event queues the software tcp provider posts
//! into. FIFO, bounded only by memory, single consumer per endpoint.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::endpoint::EndpointId;

#[derive(Debug, Clone)]
pub enum Completion {
    /// `remote_write` distinguishes a completion observed because this
    /// endpoint's own write finished (false) from one observed because
    /// a peer wrote into a region owned by this endpoint (true).
    Data { endpoint: EndpointId, remote_write: bool, imm_data: Option<u64> },
    Error { endpoint: EndpointId, message: String },
}

#[derive(Debug, Clone)]
pub enum Event {
    ConnectionRequested { endpoint: EndpointId },
    Connected { endpoint: EndpointId },
    Shutdown { endpoint: EndpointId },
    Error { endpoint: EndpointId, message: String },
}

#[derive(Default)]
pub struct CompletionQueue {
    entries: VecDeque<Completion>,
}

impl CompletionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, c: Completion) {
        self.entries.push_back(c);
    }

    /// Non-blocking read; `none` also stands in for "too busy" here,
    /// the software provider has no separate busy signal.
    pub fn read(&mut self) -> Option<Completion> {
        self.entries.pop_front()
    }

    pub fn read_blocking(&mut self, timeout: Duration) -> Option<Completion> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(c) = self.read() {
                return Some(c);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            std::thread::sleep(remaining.min(Duration::from_millis(1)));
        }
    }
}

#[derive(Default)]
pub struct EventQueue {
    entries: VecDeque<Event>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, e: Event) {
        self.entries.push_back(e);
    }

    pub fn read(&mut self) -> Option<Event> {
        self.entries.pop_front()
    }
}
