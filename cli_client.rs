use futures_util::{SinkExt, StreamExt};
use pubgoods_protocol::{ClientToServer, PublicRoom, ServerToClient, Settings};
use std::io::{self, Write};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("Public Goods Game CLI Client");
    println!("============================");

    print!("Enter your name: ");
    io::stdout().flush()?;
    let mut player_name = String::new();
    io::stdin().read_line(&mut player_name)?;
    let player_name = player_name.trim().to_string();
    if player_name.is_empty() {
        println!("Name cannot be empty");
        return Ok(());
    }

    let url = std::env::var("PUBGOODS_URL").unwrap_or_else(|_| "ws://127.0.0.1:9001/ws".into());
    println!("Connecting to {}...", url);
    let (ws_stream, _) = connect_async(url.as_str()).await?;
    println!("Connected.");

    let (mut write, mut read) = ws_stream.split();

    tokio::spawn(async move {
        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    if let Ok(server_msg) = serde_json::from_str::<ServerToClient>(&text) {
                        handle_server_message(server_msg);
                    }
                }
                Ok(Message::Close(_)) => {
                    println!("Connection closed by server");
                    break;
                }
                Err(e) => {
                    println!("WebSocket error: {}", e);
                    break;
                }
                _ => {}
            }
        }
    });

    print_help();

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line == "quit" {
            break;
        }
        if line == "help" {
            print_help();
            continue;
        }
        match parse_command(line, &player_name) {
            Some(msg) => {
                let json = serde_json::to_string(&msg)?;
                write.send(Message::Text(json)).await?;
            }
            None => println!("Unknown command: {}", line),
        }
    }

    println!("Goodbye!");
    Ok(())
}

fn print_help() {
    println!("\nCommands:");
    println!("  list                 - Show rooms waiting for players");
    println!("  create [group_size]  - Create a room and lead it");
    println!("  join <room> [id]     - Join a room, optionally resuming an earlier id");
    println!("  status <room>        - Room status and time left");
    println!("  ready                - Mark yourself as ready");
    println!("  start                - Start the game (leader)");
    println!("  give <amount>        - Contribute to your group's pool");
    println!("  next                 - Next round (leader)");
    println!("  leave                - Leave the room");
    println!("  quit                 - Exit");
}

fn handle_server_message(msg: ServerToClient) {
    match msg {
        ServerToClient::Hello { your_id } => println!("Your id: {}", your_id),
        ServerToClient::RoomCreated { room_id, snapshot } => {
            println!("Room {} created. Share this id with the players.", room_id);
            print_room(&snapshot);
        }
        ServerToClient::Joined { snapshot, your_id, is_leader } => {
            let role = if is_leader { "leader" } else { "player" };
            println!("Joined room {} as {} ({})", snapshot.id, role, your_id);
            print_room(&snapshot);
        }
        ServerToClient::UpdateState { .. } => {}
        ServerToClient::YourState { state } => {
            println!(
                "You have {:.2} coins{}",
                state.coins,
                state
                    .current_contribution
                    .map(|c| format!(", contributed {:.2} this round", c))
                    .unwrap_or_default()
            );
        }
        ServerToClient::PlayerJoined { player_name, .. } => println!("{} joined", player_name),
        ServerToClient::PlayerReady { player_name, .. } => println!("{} is ready", player_name),
        ServerToClient::PlayerConnection { player_id, connected } => {
            let what = if connected { "reconnected" } else { "disconnected" };
            println!("Player {} {}", player_id, what);
        }
        ServerToClient::StartEligibilityChanged {
            can_start,
            reason,
            ready_count,
            total_players,
        } => {
            if can_start {
                println!("Ready {}/{}: the game can start", ready_count, total_players);
            } else {
                println!(
                    "Ready {}/{}: {}",
                    ready_count,
                    total_players,
                    reason.unwrap_or_default()
                );
            }
        }
        ServerToClient::GameStarted { current_round, groups }
        | ServerToClient::NextRoundStarted { current_round, groups } => {
            println!("\n=== Round {} ({} groups) ===", current_round, groups.len());
        }
        ServerToClient::TimerTick { time_left, .. } => {
            if time_left <= 5 || time_left % 10 == 0 {
                println!("{}s left", time_left);
            }
        }
        ServerToClient::ContributionAccepted { amount } => println!("Contribution of {:.2} accepted", amount),
        ServerToClient::ContributionReceived {
            submitted_count,
            total_players,
        } => println!("{}/{} contributions in", submitted_count, total_players),
        ServerToClient::RoundResolved { current_round, results } => {
            println!("\n--- Results of round {} ---", current_round);
            for g in results.groups.iter() {
                println!(
                    "Group {}: pool {:.2} -> {:.2}, {:.2} each",
                    g.group_number, g.total_contribution, g.total_pool, g.payout_per_player
                );
                for p in g.players.iter() {
                    println!(
                        "  {:<12} gave {:>6.2}{}  {:>7.2} -> {:>7.2}",
                        p.name,
                        p.contribution,
                        if p.timed_out { " (timeout)" } else { "" },
                        p.old_balance,
                        p.new_balance
                    );
                }
            }
        }
        ServerToClient::GameFinished { summary } => {
            println!("\n=== Game over after {} rounds ===", summary.rounds_played);
            for p in summary.players.iter() {
                println!(
                    "  {:<12} final {:>7.2}  contributed {:>7.2}  profit {:>7.2}",
                    p.name, p.final_balance, p.total_contributed, p.total_profit
                );
            }
        }
        ServerToClient::RoomList { rooms } => {
            if rooms.is_empty() {
                println!("No rooms are waiting for players");
            }
            for r in rooms {
                println!(
                    "  {}  led by {:<12} {} players, groups of {}, {}",
                    r.id, r.leader_name, r.players, r.group_size, r.end_mode
                );
            }
        }
        ServerToClient::RoomStatus {
            room_id,
            status,
            current_round,
            time_left,
        } => {
            println!(
                "Room {}: {} (round {}){}",
                room_id,
                status,
                current_round,
                time_left.map(|t| format!(", {}s left", t)).unwrap_or_default()
            );
        }
        ServerToClient::Error { kind, message } => println!("Error ({:?}): {}", kind, message),
    }
}

fn print_room(snapshot: &PublicRoom) {
    println!("Room {} led by {} [{}]", snapshot.id, snapshot.leader_name, snapshot.status);
    println!(
        "  groups of {}, multiplier {}, {} coins each, {}",
        snapshot.settings.group_size,
        snapshot.settings.multiplier,
        snapshot.settings.initial_coins,
        snapshot.settings.end_mode
    );
    for p in snapshot.players.iter() {
        println!(
            "  {:<12} {:>7.2}{}",
            p.name,
            p.coins,
            if p.ready { " ready" } else { "" }
        );
    }
}

fn parse_command(input: &str, name: &str) -> Option<ClientToServer> {
    let parts: Vec<&str> = input.split_whitespace().collect();
    let (cmd, rest) = parts.split_first()?;

    match cmd.to_lowercase().as_str() {
        "list" => Some(ClientToServer::ListRooms),
        "create" => {
            let mut settings = Settings::default();
            if let Some(size) = rest.first() {
                settings.group_size = size.parse().ok()?;
            }
            Some(ClientToServer::CreateRoom {
                leader_name: name.to_string(),
                settings,
            })
        }
        "join" => Some(ClientToServer::Join {
            room_id: rest.first()?.to_string(),
            name: name.to_string(),
            resume: match rest.get(1) {
                Some(id) => Some(Uuid::parse_str(id).ok()?),
                None => None,
            },
        }),
        "status" => Some(ClientToServer::RoomStatus {
            room_id: rest.first()?.to_string(),
        }),
        "ready" => Some(ClientToServer::SetReady),
        "start" => Some(ClientToServer::StartGame),
        "give" => Some(ClientToServer::SubmitContribution {
            amount: rest.first()?.parse().ok()?,
        }),
        "next" => Some(ClientToServer::RequestNextRound),
        "leave" => Some(ClientToServer::Leave),
        _ => None,
    }
}
