//! Bounded per-connection outbound queue
//!
//! The fanout path pushes without ever waiting; the connection's writer task
//! is the only consumer. When the queue is full, the oldest droppable frame
//! (typing, presence) makes room. If nothing can be dropped the push fails
//! and the caller evicts the connection as a slow consumer.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::events::GatewayEventType;
use crate::protocol::{CloseCode, GatewayMessage};

/// One bus event, shared by every connection it fans out to
#[derive(Debug)]
pub struct EventFrame {
    pub id: Option<Uuid>,
    pub event_type: String,
    pub data: Value,
}

impl EventFrame {
    pub fn new(id: Option<Uuid>, event_type: impl Into<String>, data: Value) -> Arc<Self> {
        Arc::new(Self {
            id,
            event_type: event_type.into(),
            data,
        })
    }

    /// Serialize as a dispatch frame with this connection's sequence number
    pub fn encode(&self, sequence: u64) -> Result<String, serde_json::Error> {
        GatewayMessage::encode_dispatch(&self.event_type, sequence, self.id.as_ref(), &self.data)
    }

    fn is_droppable(&self) -> bool {
        GatewayEventType::from_name(&self.event_type).is_some_and(GatewayEventType::is_droppable)
    }
}

/// A queued outbound frame
#[derive(Debug, Clone)]
pub enum Frame {
    /// Control frame (HELLO, HEARTBEAT_ACK)
    Message(GatewayMessage),
    /// Dispatch frame; the sequence number is assigned when written
    Event(Arc<EventFrame>),
}

impl Frame {
    fn is_droppable(&self) -> bool {
        match self {
            Self::Message(_) => false,
            Self::Event(event) => event.is_droppable(),
        }
    }
}

/// What happened to a pushed frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Queued,
    /// Queued after evicting the oldest droppable frame
    DroppedOldest,
    /// The queue was full of critical frames and this one was droppable
    Discarded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("outbound queue full")]
    SlowConsumer,

    #[error("connection closing")]
    Closed,
}

/// What the writer should do next
#[derive(Debug)]
pub enum Next {
    Frame(Frame),
    Close(CloseCode),
}

#[derive(Debug, Default)]
struct QueueState {
    frames: VecDeque<Frame>,
    close: Option<CloseCode>,
}

#[derive(Debug)]
pub struct OutboundQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    /// Wakes everyone waiting in [`OutboundQueue::closed`]
    closed: Notify,
    capacity: usize,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            closed: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    /// Non-blocking push
    pub fn push(&self, frame: Frame) -> Result<Enqueued, QueueError> {
        let outcome = {
            let mut state = self.state.lock();
            if state.close.is_some() {
                return Err(QueueError::Closed);
            }

            if state.frames.len() < self.capacity {
                state.frames.push_back(frame);
                Enqueued::Queued
            } else if let Some(pos) = state.frames.iter().position(Frame::is_droppable) {
                state.frames.remove(pos);
                state.frames.push_back(frame);
                Enqueued::DroppedOldest
            } else if frame.is_droppable() {
                return Ok(Enqueued::Discarded);
            } else {
                return Err(QueueError::SlowConsumer);
            }
        };

        self.notify.notify_one();
        Ok(outcome)
    }

    /// Discard pending frames and tell the writer to close with `code`.
    /// Only the first call has any effect.
    pub fn close(&self, code: CloseCode) -> bool {
        {
            let mut state = self.state.lock();
            if state.close.is_some() {
                return false;
            }
            state.close = Some(code);
            state.frames.clear();
        }
        self.notify.notify_one();
        self.closed.notify_waiters();
        true
    }

    /// Resolves once [`OutboundQueue::close`] has been called
    pub async fn closed(&self) {
        loop {
            let closed = self.closed.notified();
            if self.is_closed() {
                return;
            }
            closed.await;
        }
    }

    /// Wait for the next frame, or the close instruction
    pub async fn next(&self) -> Next {
        loop {
            {
                let mut state = self.state.lock();
                if let Some(code) = state.close {
                    return Next::Close(code);
                }
                if let Some(frame) = state.frames.pop_front() {
                    return Next::Frame(frame);
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn depth(&self) -> usize {
        self.state.lock().frames.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().close.is_some()
    }
}
