//! The session store: identity, room directory, and the live room channel.
//!
//! All state lives in one [`SessionState`] snapshot behind a
//! [`tokio::sync::watch`] channel. Every action applies its changes as a
//! single patch, and consumers observe them through [`Session::subscribe`].
//! Failures never escape as `Err`; they land in [`SessionState::error`].

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::watch;

use crate::api::{ApiError, HttpApi, RoomApi};
use crate::channel::{Channel, ChannelError, ChannelEvent, ChannelHandle, Connector};
use crate::config::ClientConfig;
use crate::identity::{FileIdentityStore, IdentityStore, StoreError};
use crate::messages::{presence_notice, ClientMessage, ServerMessage};
use crate::models::{now_millis, now_rfc3339, Identity, Message, MessageKind, Room};
use crate::socket::WsConnector;

pub const SET_USERNAME_FAILED: &str = "Failed to set username";
pub const FETCH_ROOMS_FAILED: &str = "Failed to fetch rooms";
pub const CREATE_ROOM_FAILED: &str = "Failed to create room";
pub const USERNAME_REQUIRED: &str = "Please set username first";
pub const JOIN_FAILED: &str = "Failed to join room. Please check your connection.";
pub const CONNECTION_FAILED: &str = "Connection failed. Please try again.";
pub const SEND_UNAVAILABLE: &str = "Unable to send message. Please try rejoining the room.";
pub const CONNECTION_LOST: &str = "Connection lost. Reconnecting...";
pub const SEND_FAILED: &str = "Failed to send message. Please try again.";

pub const USERNAME_TOO_SHORT: &str = "Username must be at least 3 characters long";
pub const ROOM_NAME_TOO_SHORT: &str = "Room name must be at least 3 characters long";
const MIN_NAME_LEN: usize = 3;

#[derive(Error, Debug)]
enum SessionError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub user: Option<Identity>,
    pub rooms: Vec<Room>,
    pub current_room: Option<Room>,
    /// The active room's log, newest first.
    pub messages: Vec<Message>,
    pub is_loading: bool,
    pub error: Option<String>,
    /// Set while the room channel is usable for sending.
    pub socket: Option<ChannelHandle>,
}

impl SessionState {
    pub fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    /// The log in display order: the room history as it was loaded on
    /// join, followed by messages received since, oldest live message first.
    pub fn chronological(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().rev()
    }

    fn current_room_id(&self) -> String {
        self.current_room
            .as_ref()
            .map(|room| room.id.clone())
            .unwrap_or_default()
    }
}

#[derive(Clone)]
pub struct Session {
    state: Arc<watch::Sender<SessionState>>,
    api: Arc<dyn RoomApi>,
    connector: Arc<dyn Connector>,
    identities: Arc<dyn IdentityStore>,
}

impl Session {
    pub fn new(
        api: impl RoomApi + 'static,
        connector: impl Connector + 'static,
        identities: impl IdentityStore + 'static,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::default());
        Session {
            state: Arc::new(state),
            api: Arc::new(api),
            connector: Arc::new(connector),
            identities: Arc::new(identities),
        }
    }

    /// A session talking to the configured service over HTTP and WebSocket.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ApiError> {
        Ok(Session::new(
            HttpApi::new(config)?,
            WsConnector::new(config),
            FileIdentityStore::new(&config.data_dir),
        ))
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.borrow().clone()
    }

    fn update(&self, patch: impl FnOnce(&mut SessionState)) {
        self.state.send_modify(patch);
    }

    pub fn set_error(&self, error: Option<String>) {
        self.update(|state| state.error = error);
    }

    pub fn dismiss_error(&self) {
        self.set_error(None);
    }

    fn fail(&self, message: &str) {
        self.set_error(Some(message.to_string()));
    }

    pub async fn set_username(&self, username: &str) {
        self.update(|state| {
            state.is_loading = true;
            state.error = None;
        });

        match self.register(username).await {
            Ok(identity) => {
                log::info!("Signed in as {} (id {})", identity.username, identity.id);
                self.update(|state| {
                    state.user = Some(identity);
                    state.is_loading = false;
                });
            }
            Err(e) => {
                log::error!("Failed to set username {username}: {e}");
                self.update(|state| {
                    state.error = Some(SET_USERNAME_FAILED.to_string());
                    state.is_loading = false;
                });
            }
        }
    }

    async fn register(&self, username: &str) -> Result<Identity, SessionError> {
        let identity = self.api.register_username(username).await?;
        self.identities.save(&identity).await?;
        Ok(identity)
    }

    /// Re-validates a previously stored identity. Returns whether the session
    /// now has a usable user.
    pub async fn restore_identity(&self) -> bool {
        let stored = match self.identities.load().await {
            Ok(Some(identity)) => identity,
            Ok(None) => return false,
            Err(e) => {
                log::error!("Ignoring stored identity: {e}");
                return false;
            }
        };

        log::info!("Restoring identity for {}", stored.username);
        self.set_username(&stored.username).await;

        let state = self.state.borrow();
        state.user.is_some() && state.error.is_none()
    }

    pub async fn logout(&self) {
        self.leave_room();
        if let Err(e) = self.identities.clear().await {
            log::error!("Failed to remove stored identity: {e}");
        }
        self.update(|state| {
            state.user = None;
            state.rooms.clear();
            state.current_room = None;
            state.messages.clear();
        });
    }

    pub async fn get_rooms(&self) {
        self.update(|state| {
            state.is_loading = true;
            state.error = None;
        });

        match self.api.list_rooms().await {
            Ok(rooms) => {
                log::debug!("Fetched {} rooms", rooms.len());
                self.update(|state| {
                    state.rooms = rooms;
                    state.is_loading = false;
                });
            }
            Err(e) => {
                log::error!("Failed to fetch rooms: {e}");
                self.update(|state| {
                    state.error = Some(FETCH_ROOMS_FAILED.to_string());
                    state.is_loading = false;
                });
            }
        }
    }

    /// Creates a room and joins it straight away.
    pub async fn create_room(&self, name: &str) {
        self.update(|state| {
            state.is_loading = true;
            state.error = None;
        });

        let room = match self.api.create_room(name).await {
            Ok(room) => room,
            Err(e) => {
                log::error!("Failed to create room {name}: {e}");
                self.update(|state| {
                    state.error = Some(CREATE_ROOM_FAILED.to_string());
                    state.is_loading = false;
                });
                return;
            }
        };

        log::info!("Created room {} ({})", room.name, room.id);
        let room_id = room.id.clone();
        self.update(|state| {
            state.rooms.push(room);
            state.is_loading = false;
        });
        self.join_room(&room_id).await;
    }

    /// Loads the room's history and opens its channel.
    ///
    /// A room missing from the local directory is still joined; it just has
    /// no `current_room`. On failure the previous room and log are kept.
    pub async fn join_room(&self, room_id: &str) {
        let user = self.state.borrow().user.clone();
        let Some(user) = user else {
            self.fail(USERNAME_REQUIRED);
            return;
        };

        if let Err(e) = self.open_room(room_id, &user).await {
            log::error!("Join room error: {e}");
            self.update(|state| {
                state.error = Some(JOIN_FAILED.to_string());
                state.socket = None;
            });
        }
    }

    async fn open_room(&self, room_id: &str, user: &Identity) -> Result<(), SessionError> {
        let mut history = self.api.room_messages(room_id).await?;
        history.reverse();

        let Channel { handle, events } = self.connector.connect(room_id, &user.username)?;

        self.update(|state| {
            state.current_room = state.rooms.iter().find(|room| room.id == room_id).cloned();
            state.messages = history;
            state.socket = Some(handle.clone());
            state.error = None;
        });

        self.spawn_event_pump(handle, events, room_id.to_string(), user.clone());
        Ok(())
    }

    fn spawn_event_pump(
        &self,
        handle: ChannelHandle,
        mut events: UnboundedReceiver<ChannelEvent>,
        room_id: String,
        user: Identity,
    ) {
        let session = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                session.handle_channel_event(&handle, &room_id, &user, event);
            }
        });
    }

    fn handle_channel_event(
        &self,
        handle: &ChannelHandle,
        room_id: &str,
        user: &Identity,
        event: ChannelEvent,
    ) {
        match event {
            ChannelEvent::Opened => {
                log::info!("Connected to room {room_id}");
                self.set_error(None);
                let join = ClientMessage::Join {
                    username: user.username.clone(),
                    room_id: room_id.to_string(),
                };
                if let Err(e) = send_frame(handle, &join) {
                    log::error!("Error sending join event: {e}");
                }
            }
            ChannelEvent::Frame(text) => match ServerMessage::parse(&text) {
                Ok(frame) => self.apply_frame(frame),
                Err(e) => log::debug!("Ignoring malformed frame in room {room_id}: {e}"),
            },
            ChannelEvent::Error(cause) => {
                log::error!("Channel error in room {room_id}: {cause}");
                self.update(|state| {
                    state.error = Some(CONNECTION_FAILED.to_string());
                    state.socket = None;
                });
            }
            ChannelEvent::Closed => {
                log::info!("Channel for room {room_id} closed");
                self.update(|state| {
                    if let Some(room) = &state.current_room {
                        let notice = presence_notice(Some(&user.username), false);
                        let notice = Message::system(notice, &room.id);
                        state.messages.insert(0, notice);
                    }
                    state.socket = None;
                });
            }
        }
    }

    fn apply_frame(&self, frame: ServerMessage) {
        match frame {
            ServerMessage::ChatMessage { message, user_id } => self.update(|state| {
                let own = state.user.as_ref();
                let incoming = Message {
                    id: message.id.filter(|id| *id != 0).unwrap_or_else(now_millis),
                    username: message.resolve_username(own.map(|user| user.username.as_str())),
                    created_at: message
                        .created_at
                        .clone()
                        .filter(|at| !at.is_empty())
                        .unwrap_or_else(now_rfc3339),
                    room_id: state.current_room_id(),
                    user_id: user_id
                        .filter(|id| *id != 0)
                        .or_else(|| own.map(|user| user.id))
                        .unwrap_or(0),
                    content: message.content,
                    kind: MessageKind::Message,
                };

                if state.messages.iter().any(|m| m.same_delivery(&incoming)) {
                    log::debug!("Dropping duplicate message from {}", incoming.username);
                } else {
                    state.messages.insert(0, incoming);
                }
            }),
            ServerMessage::ParticipantJoined { username } => {
                self.push_presence(username.as_deref(), true);
            }
            ServerMessage::ParticipantLeft { username } => {
                self.push_presence(username.as_deref(), false);
            }
            ServerMessage::Unknown => log::debug!("Ignoring unknown room event"),
        }
    }

    fn push_presence(&self, username: Option<&str>, joined: bool) {
        let notice = presence_notice(username, joined);
        self.update(|state| {
            let notice = Message::system(notice, &state.current_room_id());
            state.messages.insert(0, notice);
        });
    }

    /// Announces departure if possible, closes the channel, and clears the
    /// room fields whether or not any of that succeeded.
    pub fn leave_room(&self) {
        let (socket, room, user) = {
            let state = self.state.borrow();
            (state.socket.clone(), state.current_room.clone(), state.user.clone())
        };

        if let (Some(socket), Some(room), Some(user)) = (socket, room, user) {
            let leave = ClientMessage::Leave {
                username: user.username,
                room_id: room.id,
            };
            if let Err(e) = send_frame(&socket, &leave) {
                log::error!("Error sending leave event: {e}");
            }
            socket.close();
        }

        self.update(|state| {
            state.current_room = None;
            state.messages.clear();
            state.socket = None;
        });
    }

    /// Sends a chat message to the current room.
    ///
    /// Nothing is echoed locally; the message shows up when the room
    /// broadcasts it back. If the channel has dropped, the message is
    /// discarded and the room is re-joined.
    pub async fn send_message(&self, content: &str) {
        let (socket, room, user) = {
            let state = self.state.borrow();
            (state.socket.clone(), state.current_room.clone(), state.user.clone())
        };
        let (Some(socket), Some(room), Some(user)) = (socket, room, user) else {
            self.fail(SEND_UNAVAILABLE);
            return;
        };

        if !socket.is_open() {
            log::info!("Channel for room {} is {:?}, rejoining", room.id, socket.state());
            self.fail(CONNECTION_LOST);
            self.join_room(&room.id).await;
            return;
        }

        let frame = ClientMessage::ChatMessage {
            content: content.trim().to_string(),
            username: user.username,
            room_id: room.id,
            user_id: user.id,
            created_at: now_rfc3339(),
        };
        if let Err(e) = send_frame(&socket, &frame) {
            log::error!("Failed to send message: {e}");
            self.fail(SEND_FAILED);
        }
    }
}

fn send_frame(handle: &ChannelHandle, frame: &ClientMessage) -> Result<(), SessionError> {
    handle.send(frame.to_text()?)?;
    Ok(())
}

/// The onboarding rule for usernames, applied by front ends before
/// [`Session::set_username`].
pub fn validate_username(name: &str) -> Result<&str, &'static str> {
    validate_name(name, USERNAME_TOO_SHORT)
}

pub fn validate_room_name(name: &str) -> Result<&str, &'static str> {
    validate_name(name, ROOM_NAME_TOO_SHORT)
}

fn validate_name<'a>(name: &'a str, too_short: &'static str) -> Result<&'a str, &'static str> {
    let name = name.trim();
    if name.chars().count() < MIN_NAME_LEN {
        Err(too_short)
    } else {
        Ok(name)
    }
}
