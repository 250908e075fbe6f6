use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::channel::{Channel, ChannelError, ChannelEvent, ChannelHandle, ChannelSender, ChannelState, Connector};
use crate::config::ClientConfig;

/// How long a locally initiated close waits for the peer's close frame.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Opens room channels over WebSocket at `{ws_url}/ws/{room_id}/{username}`.
pub struct WsConnector {
    base_url: String,
}

impl WsConnector {
    pub fn new(config: &ClientConfig) -> Self {
        WsConnector {
            base_url: config.ws_url.clone(),
        }
    }

    pub fn channel_url(&self, room_id: &str, username: &str) -> String {
        format!(
            "{}/ws/{}/{}",
            self.base_url,
            urlencoding::encode(room_id),
            urlencoding::encode(username)
        )
    }
}

impl Connector for WsConnector {
    fn connect(&self, room_id: &str, username: &str) -> Result<Channel, ChannelError> {
        let url = self.channel_url(room_id, username);
        let request = url
            .as_str()
            .into_client_request()
            .map_err(|e| ChannelError::InvalidAddress {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let state = Arc::new(SharedState::new(ChannelState::Connecting));
        let token = CancellationToken::new();

        tokio::spawn(run_socket(
            request,
            Arc::clone(&state),
            token.clone(),
            outbound_rx,
            event_tx,
        ));

        Ok(Channel {
            handle: ChannelHandle::new(WsSender {
                outbound: outbound_tx,
                state,
                token,
            }),
            events: event_rx,
        })
    }
}

struct WsSender {
    outbound: UnboundedSender<String>,
    state: Arc<SharedState>,
    token: CancellationToken,
}

impl ChannelSender for WsSender {
    fn send(&self, text: String) -> Result<(), ChannelError> {
        match self.state.load() {
            ChannelState::Open => self
                .outbound
                .send(text)
                .map_err(|_| ChannelError::Disconnected),
            other => Err(ChannelError::NotOpen(other)),
        }
    }

    fn close(&self) {
        self.state.begin_closing();
        self.token.cancel();
    }

    fn state(&self) -> ChannelState {
        self.state.load()
    }
}

struct SharedState(AtomicU8);

impl SharedState {
    fn new(state: ChannelState) -> Self {
        SharedState(AtomicU8::new(Self::encode(state)))
    }

    fn encode(state: ChannelState) -> u8 {
        match state {
            ChannelState::Connecting => 0,
            ChannelState::Open => 1,
            ChannelState::Closing => 2,
            ChannelState::Closed => 3,
        }
    }

    fn load(&self) -> ChannelState {
        match self.0.load(Ordering::Acquire) {
            0 => ChannelState::Connecting,
            1 => ChannelState::Open,
            2 => ChannelState::Closing,
            _ => ChannelState::Closed,
        }
    }

    fn store(&self, state: ChannelState) {
        self.0.store(Self::encode(state), Ordering::Release);
    }

    /// Moves to `Closing` unless the socket is already fully closed.
    fn begin_closing(&self) {
        let closed = Self::encode(ChannelState::Closed);
        let closing = Self::encode(ChannelState::Closing);
        let _ = self
            .0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != closed).then_some(closing)
            });
    }
}

async fn run_socket(
    request: Request,
    state: Arc<SharedState>,
    token: CancellationToken,
    mut outbound: UnboundedReceiver<String>,
    events: UnboundedSender<ChannelEvent>,
) {
    let uri = request.uri().to_string();
    log::debug!("Connecting to room channel '{uri}'...");

    let connected = tokio::select! {
        result = connect_async(request) => result,
        () = token.cancelled() => {
            log::debug!("Cancelling connect to '{uri}'");
            state.store(ChannelState::Closed);
            let _ = events.send(ChannelEvent::Closed);
            return;
        }
    };

    let ws_stream = match connected {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => {
            log::error!("Failed to connect to '{uri}': {e}");
            state.store(ChannelState::Closed);
            let _ = events.send(ChannelEvent::Error(e.to_string()));
            let _ = events.send(ChannelEvent::Closed);
            return;
        }
    };

    log::info!("Room channel connected: {uri}");
    state.store(ChannelState::Open);
    let _ = events.send(ChannelEvent::Opened);

    let (mut write, mut read) = ws_stream.split();

    loop {
        // Queued frames go out before a close request is honoured.
        tokio::select! {
            biased;
            Some(text) = outbound.recv() => {
                if let Err(e) = write.send(Message::text(text)).await {
                    log::error!("Failed to send on '{uri}': {e}");
                    let _ = events.send(ChannelEvent::Error(e.to_string()));
                    break;
                }
            }
            () = token.cancelled() => {
                state.store(ChannelState::Closing);
                if let Err(e) = write.send(Message::Close(None)).await {
                    log::debug!("Close frame not sent on '{uri}': {e}");
                    break;
                }
                let drain = async { while let Some(Ok(_)) = read.next().await {} };
                if tokio::time::timeout(CLOSE_TIMEOUT, drain).await.is_err() {
                    log::debug!("Peer did not acknowledge close on '{uri}'");
                }
                break;
            }
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(ChannelEvent::Frame(text.as_str().to_owned()));
                }
                Some(Ok(Message::Close(frame))) => {
                    log::debug!("Peer closed '{uri}': {frame:?}");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    log::error!("Room channel error on '{uri}': {e}");
                    let _ = events.send(ChannelEvent::Error(e.to_string()));
                    break;
                }
                None => break,
            }
        }
    }

    log::info!("Room channel closed: {uri}");
    state.store(ChannelState::Closed);
    let _ = events.send(ChannelEvent::Closed);
}
