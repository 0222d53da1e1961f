//! Scripted in-memory transport
//!
//! Input is modelled as a queue of chunks. The front chunk is what has
//! "arrived" so far; [`Transport::discard_input`] drops only that chunk,
//! the way a serial input reset drops bytes already in the UART buffer
//! but not bytes still on the wire.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{LinkError, Result};
use crate::transport::Transport;

/// Produces response chunks for every frame written
pub type Responder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>> + Send>;

#[derive(Default)]
struct MockState {
    chunks: VecDeque<Vec<u8>>,
    writes: Vec<Vec<u8>>,
    discards: usize,
    closed: bool,
    write_error: Option<String>,
    read_error: Option<String>,
    close_error: Option<String>,
    responder: Option<Responder>,
}

/// In-memory transport driven by a script of input chunks
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
    flush_before_command: bool,
}

/// Test-side handle for inspecting and feeding a [`MockTransport`]
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    /// Transport with pre-queued input
    pub fn with_chunks(chunks: Vec<Vec<u8>>) -> (Self, MockHandle) {
        let state = MockState {
            chunks: chunks.into(),
            ..MockState::default()
        };
        Self::from_state(state)
    }

    /// Transport that answers each written frame through `responder`
    pub fn with_responder<F>(responder: F) -> (Self, MockHandle)
    where
        F: FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static,
    {
        let state = MockState {
            responder: Some(Box::new(responder)),
            ..MockState::default()
        };
        Self::from_state(state)
    }

    fn from_state(state: MockState) -> (Self, MockHandle) {
        let state = Arc::new(Mutex::new(state));
        (
            Self {
                state: Arc::clone(&state),
                flush_before_command: false,
            },
            MockHandle { state },
        )
    }

    /// Behave like a serial link and reset input before each command
    pub fn flushing_before_command(mut self) -> Self {
        self.flush_before_command = true;
        self
    }
}

impl MockHandle {
    /// Queue another input chunk
    pub fn push_chunk(&self, chunk: Vec<u8>) {
        self.state.lock().chunks.push_back(chunk);
    }

    /// Frames written so far
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state.lock().writes.clone()
    }

    /// Number of input discards requested
    pub fn discards(&self) -> usize {
        self.state.lock().discards
    }

    /// Whether `close` was called
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Input chunks not yet consumed
    pub fn pending_chunks(&self) -> usize {
        self.state.lock().chunks.len()
    }

    /// Make every subsequent write fail with an IO error
    pub fn fail_writes(&self, message: impl Into<String>) {
        self.state.lock().write_error = Some(message.into());
    }

    /// Make every subsequent read fail with an IO error
    pub fn fail_reads(&self, message: impl Into<String>) {
        self.state.lock().read_error = Some(message.into());
    }

    /// Make `close` report an IO error after closing
    pub fn fail_close(&self, message: impl Into<String>) {
        self.state.lock().close_error = Some(message.into());
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn describe(&self) -> String {
        "mock".to_string()
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.closed {
            return Err(LinkError::NotConnected);
        }
        if let Some(msg) = &state.write_error {
            return Err(LinkError::io(msg.clone()));
        }

        state.writes.push(data.to_vec());
        if let Some(responder) = state.responder.as_mut() {
            let replies = responder(data);
            state.chunks.extend(replies);
        }
        Ok(())
    }

    async fn read(&mut self, max: usize, timeout: Duration) -> Result<Vec<u8>> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(LinkError::NotConnected);
            }
            if let Some(msg) = &state.read_error {
                return Err(LinkError::io(msg.clone()));
            }

            while state.chunks.front().is_some_and(Vec::is_empty) {
                state.chunks.pop_front();
            }

            if let Some(front) = state.chunks.front_mut() {
                let take = max.min(front.len());
                let out: Vec<u8> = front.drain(..take).collect();
                if front.is_empty() {
                    state.chunks.pop_front();
                }
                return Ok(out);
            }
        }

        tokio::time::sleep(timeout).await;
        Ok(Vec::new())
    }

    async fn discard_input(&mut self) -> Result<usize> {
        let mut state = self.state.lock();
        state.discards += 1;
        Ok(state.chunks.pop_front().map_or(0, |chunk| chunk.len()))
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.closed = true;
        match &state.close_error {
            Some(msg) => Err(LinkError::io(msg.clone())),
            None => Ok(()),
        }
    }

    fn flushes_before_command(&self) -> bool {
        self.flush_before_command
    }
}
