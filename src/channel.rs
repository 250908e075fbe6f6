//! The real-time room channel as the session sees it.
//!
//! A [`Connector`] hands back a [`Channel`] immediately; the connection itself
//! completes in the background and reports its progress as [`ChannelEvent`]s,
//! in order, on the channel's event receiver.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closing,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Opened,
    /// A text frame from the peer.
    Frame(String),
    /// The transport failed. A `Closed` always follows.
    Error(String),
    Closed,
}

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("invalid channel address {url}: {reason}")]
    InvalidAddress { url: String, reason: String },
    #[error("channel is not open ({0:?})")]
    NotOpen(ChannelState),
    #[error("channel task has stopped")]
    Disconnected,
}

/// Write side of an open channel.
pub trait ChannelSender: Send + Sync {
    /// Queues a text frame. Fails unless the channel is [`ChannelState::Open`].
    fn send(&self, text: String) -> Result<(), ChannelError>;
    /// Starts a close handshake; a [`ChannelEvent::Closed`] follows.
    fn close(&self);
    fn state(&self) -> ChannelState;
}

/// Shared handle to a channel's write side.
#[derive(Clone)]
pub struct ChannelHandle(Arc<dyn ChannelSender>);

impl ChannelHandle {
    pub fn new(sender: impl ChannelSender + 'static) -> Self {
        ChannelHandle(Arc::new(sender))
    }

    pub fn send(&self, text: String) -> Result<(), ChannelError> {
        self.0.send(text)
    }

    pub fn close(&self) {
        self.0.close();
    }

    pub fn state(&self) -> ChannelState {
        self.0.state()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }
}

impl fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelHandle({:?})", self.state())
    }
}

pub struct Channel {
    pub handle: ChannelHandle,
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
}

/// Opens one channel per room join, addressed by room id and username.
pub trait Connector: Send + Sync {
    fn connect(&self, room_id: &str, username: &str) -> Result<Channel, ChannelError>;
}
