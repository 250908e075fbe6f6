//! Client for a room-based chat service.
//!
//! [`Session`] keeps the signed-in identity, the room directory and the
//! active room's message log, and drives the room's WebSocket channel.
//! [`ReconnectWatcher`] re-joins a room whose channel was lost.

pub mod api;
pub mod channel;
pub mod config;
pub mod identity;
pub mod messages;
pub mod models;
pub mod reconnect;
pub mod session;
pub mod socket;

pub use api::{ApiError, HttpApi, RoomApi};
pub use channel::{Channel, ChannelError, ChannelEvent, ChannelHandle, ChannelSender, ChannelState, Connector};
pub use config::{ClientConfig, ConfigError};
pub use identity::{FileIdentityStore, IdentityStore, StoreError};
pub use models::{Identity, Message, MessageKind, Room};
pub use reconnect::{Backoff, ReconnectPolicy, ReconnectTracker, ReconnectWatcher};
pub use session::{Session, SessionState};
pub use socket::WsConnector;
