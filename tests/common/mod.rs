#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use room_chat::api::{ApiError, RoomApi};
use room_chat::channel::{Channel, ChannelError, ChannelEvent, ChannelHandle, ChannelSender, ChannelState, Connector};
use room_chat::identity::{IdentityStore, StoreError};
use room_chat::{Identity, Message, MessageKind, Room, Session, SessionState};
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedSender};

fn scripted_failure() -> ApiError {
    ApiError::Server {
        status: 500,
        message: "scripted failure".to_string(),
    }
}

#[derive(Default)]
pub struct ApiScript {
    pub fail_register: bool,
    pub fail_rooms: bool,
    pub fail_create: bool,
    pub fail_history: bool,
    pub rooms: Vec<Room>,
    /// Served newest first, as the real service does.
    pub history: Vec<Message>,
    pub registered: Vec<String>,
    pub history_requests: Vec<String>,
}

#[derive(Clone, Default)]
pub struct FakeApi(pub Arc<Mutex<ApiScript>>);

impl FakeApi {
    pub fn script(&self) -> std::sync::MutexGuard<'_, ApiScript> {
        self.0.lock().unwrap()
    }
}

#[async_trait]
impl RoomApi for FakeApi {
    async fn register_username(&self, username: &str) -> Result<Identity, ApiError> {
        let mut script = self.script();
        script.registered.push(username.to_string());
        if script.fail_register {
            return Err(scripted_failure());
        }
        Ok(identity(username))
    }

    async fn list_rooms(&self) -> Result<Vec<Room>, ApiError> {
        let script = self.script();
        if script.fail_rooms {
            return Err(scripted_failure());
        }
        Ok(script.rooms.clone())
    }

    async fn create_room(&self, name: &str) -> Result<Room, ApiError> {
        if self.script().fail_create {
            return Err(scripted_failure());
        }
        Ok(room(&format!("room-{name}"), name))
    }

    async fn room_messages(&self, room_id: &str) -> Result<Vec<Message>, ApiError> {
        let mut script = self.script();
        script.history_requests.push(room_id.to_string());
        if script.fail_history {
            return Err(scripted_failure());
        }
        Ok(script.history.clone())
    }
}

/// The test's end of one connected channel.
#[derive(Clone)]
pub struct FakeLink {
    pub room_id: String,
    pub username: String,
    events: UnboundedSender<ChannelEvent>,
    sent: Arc<Mutex<Vec<String>>>,
    state: Arc<Mutex<ChannelState>>,
    pub fail_sends: Arc<AtomicBool>,
}

impl FakeLink {
    pub fn open(&self) {
        self.set_state(ChannelState::Open);
        let _ = self.events.send(ChannelEvent::Opened);
    }

    pub fn deliver(&self, frame: &Value) {
        self.deliver_text(frame.to_string());
    }

    pub fn deliver_text(&self, text: impl Into<String>) {
        let _ = self.events.send(ChannelEvent::Frame(text.into()));
    }

    pub fn error(&self, cause: &str) {
        self.set_state(ChannelState::Closed);
        let _ = self.events.send(ChannelEvent::Error(cause.to_string()));
    }

    pub fn closed(&self) {
        self.set_state(ChannelState::Closed);
        let _ = self.events.send(ChannelEvent::Closed);
    }

    pub fn set_state(&self, state: ChannelState) {
        *self.state.lock().unwrap() = state;
    }

    pub fn state(&self) -> ChannelState {
        *self.state.lock().unwrap()
    }

    pub fn sent_frames(&self) -> Vec<Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|text| serde_json::from_str(text).unwrap())
            .collect()
    }
}

struct FakeSender {
    events: UnboundedSender<ChannelEvent>,
    sent: Arc<Mutex<Vec<String>>>,
    state: Arc<Mutex<ChannelState>>,
    fail_sends: Arc<AtomicBool>,
}

impl ChannelSender for FakeSender {
    fn send(&self, text: String) -> Result<(), ChannelError> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ChannelError::Disconnected);
        }
        let state = *self.state.lock().unwrap();
        if state != ChannelState::Open {
            return Err(ChannelError::NotOpen(state));
        }
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    fn close(&self) {
        *self.state.lock().unwrap() = ChannelState::Closed;
        let _ = self.events.send(ChannelEvent::Closed);
    }

    fn state(&self) -> ChannelState {
        *self.state.lock().unwrap()
    }
}

#[derive(Clone, Default)]
pub struct FakeConnector {
    links: Arc<Mutex<Vec<FakeLink>>>,
    pub fail: Arc<AtomicBool>,
}

impl FakeConnector {
    pub fn connections(&self) -> usize {
        self.links.lock().unwrap().len()
    }

    pub fn last_link(&self) -> FakeLink {
        self.links.lock().unwrap().last().cloned().expect("no channel was opened")
    }
}

impl Connector for FakeConnector {
    fn connect(&self, room_id: &str, username: &str) -> Result<Channel, ChannelError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(ChannelError::InvalidAddress {
                url: format!("fake://{room_id}/{username}"),
                reason: "scripted failure".to_string(),
            });
        }

        let (events, event_rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let state = Arc::new(Mutex::new(ChannelState::Connecting));
        let fail_sends = Arc::new(AtomicBool::new(false));

        self.links.lock().unwrap().push(FakeLink {
            room_id: room_id.to_string(),
            username: username.to_string(),
            events: events.clone(),
            sent: Arc::clone(&sent),
            state: Arc::clone(&state),
            fail_sends: Arc::clone(&fail_sends),
        });

        Ok(Channel {
            handle: ChannelHandle::new(FakeSender {
                events,
                sent,
                state,
                fail_sends,
            }),
            events: event_rx,
        })
    }
}

#[derive(Clone, Default)]
pub struct MemoryIdentityStore(pub Arc<Mutex<Option<Identity>>>, pub Arc<AtomicBool>);

impl MemoryIdentityStore {
    pub fn fail_saves(&self) {
        self.1.store(true, Ordering::SeqCst);
    }

    pub fn stored(&self) -> Option<Identity> {
        self.0.lock().unwrap().clone()
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn load(&self) -> Result<Option<Identity>, StoreError> {
        Ok(self.stored())
    }

    async fn save(&self, identity: &Identity) -> Result<(), StoreError> {
        if self.1.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::other("disk full")));
        }
        *self.0.lock().unwrap() = Some(identity.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        *self.0.lock().unwrap() = None;
        Ok(())
    }
}

pub struct Fixture {
    pub session: Session,
    pub api: FakeApi,
    pub connector: FakeConnector,
    pub identities: MemoryIdentityStore,
}

impl Fixture {
    pub fn new() -> Self {
        let api = FakeApi::default();
        let connector = FakeConnector::default();
        let identities = MemoryIdentityStore::default();
        let session = Session::new(api.clone(), connector.clone(), identities.clone());
        Fixture {
            session,
            api,
            connector,
            identities,
        }
    }

    /// Signs in as `username`, lists `r1`, joins it and opens the channel.
    pub async fn joined(username: &str) -> (Self, FakeLink) {
        let fixture = Fixture::new();
        fixture.api.script().rooms = vec![room("r1", "general")];
        fixture.session.set_username(username).await;
        fixture.session.get_rooms().await;
        fixture.session.join_room("r1").await;

        let link = fixture.connector.last_link();
        link.open();
        let join_sent = link.clone();
        eventually(move || !join_sent.sent_frames().is_empty()).await;
        (fixture, link)
    }
}

pub fn identity(username: &str) -> Identity {
    Identity {
        id: 7,
        username: username.to_string(),
        created_at: "2024-05-01T10:00:00.000Z".to_string(),
        expires_at: "2024-05-02T10:00:00.000Z".to_string(),
    }
}

pub fn room(id: &str, name: &str) -> Room {
    Room {
        id: id.to_string(),
        name: name.to_string(),
        created_at: "2024-05-01T10:00:00.000Z".to_string(),
        expires_at: "2024-05-02T10:00:00.000Z".to_string(),
    }
}

pub fn history_message(id: i64, content: &str, username: &str, created_at: &str) -> Message {
    Message {
        id,
        content: content.to_string(),
        created_at: created_at.to_string(),
        room_id: "r1".to_string(),
        user_id: 1,
        username: username.to_string(),
        kind: MessageKind::Message,
    }
}

/// Polls `condition` until it holds, failing the test after five seconds.
pub async fn eventually(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never held");
}

pub async fn wait_for_state(session: &Session, predicate: impl FnMut(&SessionState) -> bool) {
    let mut states = session.subscribe();
    tokio::time::timeout(Duration::from_secs(5), states.wait_for(predicate))
        .await
        .expect("state never matched")
        .expect("session dropped");
}

pub fn contents(state: &SessionState) -> Vec<String> {
    state.chronological().map(|m| m.content.clone()).collect()
}
