use std::error::Error as StdError;
use std::path::PathBuf;

use clap::Parser;
use log::{error, info};
use room_chat::reconnect::{ReconnectPolicy, ReconnectWatcher};
use room_chat::session::{validate_room_name, validate_username, Session, SessionState};
use room_chat::{ClientConfig, Message};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::task::JoinHandle;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;
type Input = Lines<BufReader<Stdin>>;

#[derive(Parser, Debug)]
#[command(name = "room-chat", about = "Terminal client for room chat")]
struct Args {
    /// REST base URL (overrides ROOM_CHAT_API_URL)
    #[arg(long)]
    api_url: Option<String>,
    /// WebSocket base URL (overrides ROOM_CHAT_WS_URL)
    #[arg(long)]
    ws_url: Option<String>,
    /// Directory for the stored identity (overrides ROOM_CHAT_DATA_DIR)
    #[arg(long)]
    data_dir: Option<PathBuf>,
    /// Sign in with this username instead of the stored one
    #[arg(long, short)]
    username: Option<String>,
    /// Room id to join right away
    #[arg(long, short)]
    room: Option<String>,
}

enum RoomExit {
    Leave,
    Quit,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        info!("TLS crypto provider already installed");
    }

    if let Err(e) = run(Args::parse()).await {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), BoxError> {
    let mut config = ClientConfig::from_env()?;
    if let Some(url) = args.api_url {
        config.api_url = url;
    }
    if let Some(url) = args.ws_url {
        config.ws_url = url;
    }
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }
    let config = config.validate()?;
    info!("Using chat service at {}", config.api_url);

    let session = Session::from_config(&config)?;
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    if !sign_in(&session, args.username, &mut input).await? {
        return Ok(());
    }

    let mut next_room = args.room;
    loop {
        session.get_rooms().await;
        print_rooms(&session.snapshot());

        let room_id = match next_room.take() {
            Some(room_id) => {
                session.join_room(&room_id).await;
                room_id
            }
            None => match pick_room(&session, &mut input).await? {
                Some(room_id) => room_id,
                None => return Ok(()),
            },
        };

        let state = session.snapshot();
        if let Some(error) = &state.error {
            println!("! {error}");
            continue;
        }

        match chat(&session, &room_id, &mut input).await? {
            RoomExit::Leave => continue,
            RoomExit::Quit => return Ok(()),
        }
    }
}

async fn sign_in(session: &Session, username: Option<String>, input: &mut Input) -> Result<bool, BoxError> {
    if username.is_none() && session.restore_identity().await {
        if let Some(user) = session.snapshot().user {
            println!("Welcome back, {}", user.username);
        }
        return Ok(true);
    }

    let mut candidate = username;
    loop {
        let name = match candidate.take() {
            Some(name) => name,
            None => {
                println!("Choose a username:");
                match input.next_line().await? {
                    Some(line) => line,
                    None => return Ok(false),
                }
            }
        };
        let name = match validate_username(&name) {
            Ok(name) => name,
            Err(reason) => {
                println!("! {reason}");
                continue;
            }
        };

        session.set_username(name).await;
        match session.snapshot().error {
            Some(error) => println!("! {error}"),
            None => return Ok(true),
        }
    }
}

fn print_rooms(state: &SessionState) {
    if let Some(error) = &state.error {
        println!("! {error}");
    }
    if state.rooms.is_empty() {
        println!("No rooms yet.");
    }
    for (index, room) in state.rooms.iter().enumerate() {
        println!("  [{}] {} ({})", index + 1, room.name, room.id);
    }
}

/// Reads a room choice: a list number, a room id, or `+name` to create one.
async fn pick_room(session: &Session, input: &mut Input) -> Result<Option<String>, BoxError> {
    loop {
        println!("Join a room by number or id, `+name` to create one, `/logout` or `/quit`:");
        let Some(line) = input.next_line().await? else {
            return Ok(None);
        };
        let line = line.trim();

        match line {
            "" => continue,
            "/quit" => return Ok(None),
            "/logout" => {
                session.logout().await;
                println!("Signed out.");
                return Ok(None);
            }
            _ => {}
        }

        if let Some(name) = line.strip_prefix('+') {
            let name = match validate_room_name(name) {
                Ok(name) => name,
                Err(reason) => {
                    println!("! {reason}");
                    continue;
                }
            };
            session.create_room(name).await;
            let state = session.snapshot();
            if let Some(error) = &state.error {
                println!("! {error}");
                continue;
            }
            if let Some(room) = state.rooms.last() {
                return Ok(Some(room.id.clone()));
            }
            continue;
        }

        let rooms = session.snapshot().rooms;
        let room_id = line
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|index| rooms.get(index))
            .map_or_else(|| line.to_string(), |room| room.id.clone());
        session.join_room(&room_id).await;
        return Ok(Some(room_id));
    }
}

async fn chat(session: &Session, room_id: &str, input: &mut Input) -> Result<RoomExit, BoxError> {
    let title = session
        .snapshot()
        .current_room
        .map_or_else(|| room_id.to_string(), |room| room.name);
    println!("-- {title} -- (/leave, /reconnect, /rooms, /logout, /quit)");

    let printer = spawn_printer(session);
    let watcher = ReconnectWatcher::spawn(session.clone(), room_id, ReconnectPolicy::default());

    let exit = loop {
        let Some(line) = input.next_line().await? else {
            break RoomExit::Quit;
        };
        match line.trim() {
            "" => {}
            "/leave" => break RoomExit::Leave,
            "/quit" => break RoomExit::Quit,
            "/reconnect" => watcher.manual_reconnect(),
            "/rooms" => {
                session.get_rooms().await;
                print_rooms(&session.snapshot());
            }
            "/logout" => {
                watcher.shutdown();
                printer.abort();
                session.logout().await;
                println!("Signed out.");
                return Ok(RoomExit::Quit);
            }
            text => session.send_message(text).await,
        }
    };

    watcher.shutdown();
    printer.abort();
    session.leave_room();
    Ok(exit)
}

/// Prints new log entries and errors as the session changes.
fn spawn_printer(session: &Session) -> JoinHandle<()> {
    let mut states = session.subscribe();
    tokio::spawn(async move {
        let mut cursor = PrintCursor::default();
        let mut last_error: Option<String> = None;
        let mut was_connected = false;
        loop {
            {
                let state = states.borrow_and_update();
                let fresh = cursor.advance(&state.messages);
                for message in state.messages[..fresh].iter().rev() {
                    print_message(message);
                }

                if state.error != last_error {
                    if let Some(error) = &state.error {
                        println!("! {error}");
                    }
                    last_error.clone_from(&state.error);
                }
                if was_connected && !state.is_connected() {
                    println!("! Disconnected. Type /reconnect to try again.");
                }
                was_connected = state.is_connected();
            }
            if states.changed().await.is_err() {
                break;
            }
        }
    })
}

/// Remembers how much of the newest-first log has been printed.
///
/// Entries only ever arrive at the front, so the oldest entry stays put
/// until a join replaces the whole log.
#[derive(Debug, Default)]
struct PrintCursor {
    printed: usize,
    oldest: Option<i64>,
}

impl PrintCursor {
    /// Returns how many entries at the front of `messages` are unprinted.
    fn advance(&mut self, messages: &[Message]) -> usize {
        let oldest = messages.last().map(|m| m.id);
        if messages.len() < self.printed || oldest != self.oldest {
            self.printed = 0;
        }
        let fresh = messages.len() - self.printed;
        self.printed = messages.len();
        self.oldest = oldest;
        fresh
    }
}

fn print_message(message: &Message) {
    let time = message.created_at.get(11..16).unwrap_or(&message.created_at);
    if message.is_system() {
        println!("   * {} ({time})", message.content);
    } else {
        println!("[{time}] {}: {}", message.username, message.content);
    }
}
