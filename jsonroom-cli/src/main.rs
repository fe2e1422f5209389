//! jsonroom — edit a shared JSON document from the terminal.
//!
//! Connects to a relay on start-up, optionally creates or joins a room, then
//! reads commands from stdin. Events from the room (joins, remote changes,
//! relay errors) are printed as they arrive.

mod command;

use std::error::Error;

use clap::Parser;
use log::info;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use command::{Command, HELP};
use jsonroom_collab::{ClientConfig, ClientError, RoomClient, SessionState, SyncEvent};
use jsonroom_core::document::to_pretty_json;

#[derive(Parser, Debug)]
#[command(name = "jsonroom")]
#[command(about = "Collaborative JSON editing over a room relay")]
struct Args {
    /// Relay WebSocket URL
    #[arg(long, env = "JSONROOM_SERVER", default_value = "ws://localhost:8080")]
    server: String,

    /// Join this room on start-up
    #[arg(long, conflicts_with = "create")]
    join: Option<String>,

    /// Create a room on start-up and join it
    #[arg(long)]
    create: bool,

    /// Room requests held while connecting
    #[arg(long, default_value_t = 64)]
    queue_capacity: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let args = Args::parse();

    info!("Starting jsonroom against {}", args.server);

    let mut client = RoomClient::new(ClientConfig {
        server_url: args.server.clone(),
        send_queue_capacity: args.queue_capacity,
        ..Default::default()
    });
    let events = client.take_event_rx().ok_or("event stream already taken")?;
    tokio::spawn(print_events(events));

    if let Err(e) = client.connect().await {
        eprintln!("! {e}");
    }
    if args.create {
        report(client.create_room().await);
    } else if let Some(room) = &args.join {
        report(client.join(room).await);
    }

    println!("type 'help' for commands");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match command::parse_line(&line) {
            Ok(None) => {}
            Ok(Some(Command::Quit)) => break,
            Ok(Some(cmd)) => run(&client, cmd).await,
            Err(e) => eprintln!("! {e}"),
        }
    }

    client.disconnect().await?;
    Ok(())
}

async fn run(client: &RoomClient, cmd: Command) {
    match cmd {
        Command::Create => report(client.create_room().await),
        Command::Join(room) => report(client.join(&room).await),
        Command::Edit(intent) => match client.edit(intent).await {
            Ok(true) => {}
            Ok(false) => println!("(no change)"),
            Err(e) => eprintln!("! {e}"),
        },
        Command::Show => match client.snapshot().await {
            Ok(document) => println!("{}", to_pretty_json(&document)),
            Err(e) => eprintln!("! {e}"),
        },
        Command::Save(path) => match client.snapshot().await {
            Ok(document) => {
                let text = to_pretty_json(&document) + "\n";
                match tokio::fs::write(&path, text).await {
                    Ok(()) => println!("saved {}", path.display()),
                    Err(e) => eprintln!("! could not write {}: {e}", path.display()),
                }
            }
            Err(e) => eprintln!("! {e}"),
        },
        Command::Status => match client.status().await {
            Ok(status) => {
                let room = match &status.session {
                    SessionState::InRoom(room) => room.as_str(),
                    _ => "-",
                };
                println!(
                    "connection: {:?}  room: {room}  client: {}  queued: {}",
                    status.connection,
                    status.client_id.as_deref().unwrap_or("-"),
                    status.queued_requests
                );
            }
            Err(e) => eprintln!("! {e}"),
        },
        Command::Help => println!("{HELP}"),
        Command::Quit => {}
    }
}

fn report(result: Result<(), ClientError>) {
    if let Err(e) = result {
        eprintln!("! {e}");
    }
}

async fn print_events(mut events: mpsc::Receiver<SyncEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            SyncEvent::Connected => println!("* connected"),
            SyncEvent::Disconnected => println!("* disconnected"),
            SyncEvent::TransportError(reason) => println!("* connection failed: {reason}"),
            SyncEvent::ClientId(id) => println!("* client id {id}"),
            SyncEvent::RoomCreated(room) => println!("* room created: {room}"),
            SyncEvent::Joined { room, document } => {
                println!("* joined {room}\n{}", to_pretty_json(&document));
            }
            SyncEvent::DocumentChanged { origin, document } => {
                println!("* {} change\n{}", origin.as_str(), to_pretty_json(&document));
            }
            SyncEvent::ServerError(message) => println!("* relay error: {message}"),
            SyncEvent::MessageDropped { kind, reason } => {
                println!("* dropped {kind}: {reason}");
            }
            SyncEvent::RequestRejected(reason) => println!("* request rejected: {reason}"),
        }
    }
}
