use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use pubgoods_protocol::{ClientToServer, EndMode, RoomStatus, ServerToClient, Settings};
use rand::Rng;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use uuid::Uuid;

/// Scripted participant. As leader it creates a room, starts it once everyone
/// is ready and keeps advancing rounds; otherwise it joins a room, readies up
/// and contributes a random share of its coins every round.
#[derive(Parser, Debug)]
#[command(name = "demo_cli")]
struct Args {
    #[arg(long, default_value = "ws://127.0.0.1:9001/ws")]
    url: String,

    /// Display name. Defaults to one derived from the process id.
    #[arg(long)]
    name: Option<String>,

    /// Room to join. Without it the first open room is used.
    #[arg(long)]
    room: Option<String>,

    /// Create a room and moderate it instead of playing.
    #[arg(long)]
    lead: bool,

    #[arg(long, default_value_t = 4)]
    group_size: usize,

    #[arg(long, default_value_t = 3)]
    rounds: u32,

    #[arg(long, default_value_t = 20)]
    round_seconds: u64,
}

struct Bot {
    name: String,
    lead: bool,
    my_id: Option<Uuid>,
    coins: f64,
    max_contribution: f64,
    submitted_round: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let name = args
        .name
        .clone()
        .unwrap_or_else(|| format!("Bot{}", std::process::id()));

    println!("Public goods demo client [{}]", name);
    let (ws_stream, _) = connect_async(args.url.as_str()).await?;
    let (mut write, mut read) = ws_stream.split();

    let opening = if args.lead {
        ClientToServer::CreateRoom {
            leader_name: name.clone(),
            settings: Settings {
                group_size: args.group_size,
                round_duration_seconds: args.round_seconds,
                end_mode: EndMode::FixedRounds {
                    max_rounds: args.rounds,
                },
                ..Settings::default()
            },
        }
    } else if let Some(room_id) = args.room.clone() {
        join(room_id, &name)
    } else {
        ClientToServer::ListRooms
    };
    write
        .send(Message::Text(serde_json::to_string(&opening)?))
        .await?;

    let mut bot = Bot {
        name: name.clone(),
        lead: args.lead,
        my_id: None,
        coins: 0.0,
        max_contribution: 0.0,
        submitted_round: 0,
    };

    while let Some(msg) = read.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Err(e) => {
                println!("[{}] connection error: {}", name, e);
                break;
            }
            _ => continue,
        };
        let Ok(server_msg) = serde_json::from_str::<ServerToClient>(&text) else {
            continue;
        };
        let finished = matches!(server_msg, ServerToClient::GameFinished { .. });
        for reply in bot.react(server_msg) {
            tokio::time::sleep(tokio::time::Duration::from_millis(400)).await;
            write.send(Message::Text(serde_json::to_string(&reply)?)).await?;
        }
        if finished {
            break;
        }
    }

    println!("[{}] done", name);
    Ok(())
}

fn join(room_id: String, name: &str) -> ClientToServer {
    ClientToServer::Join {
        room_id,
        name: name.to_string(),
        resume: None,
    }
}

impl Bot {
    fn react(&mut self, msg: ServerToClient) -> Vec<ClientToServer> {
        match msg {
            ServerToClient::Hello { your_id } => {
                self.my_id = Some(your_id);
                vec![]
            }
            ServerToClient::RoomList { rooms } => match rooms.first() {
                Some(room) => {
                    println!("[{}] joining room {} led by {}", self.name, room.id, room.leader_name);
                    vec![join(room.id.clone(), &self.name)]
                }
                None => {
                    println!("[{}] no open rooms", self.name);
                    vec![]
                }
            },
            ServerToClient::RoomCreated { room_id, .. } => {
                println!("[{}] created room {}", self.name, room_id);
                vec![]
            }
            ServerToClient::Joined { snapshot, .. } => {
                self.max_contribution = snapshot.settings.max_contribution;
                println!("[{}] joined room {}", self.name, snapshot.id);
                if self.lead {
                    vec![]
                } else {
                    vec![ClientToServer::SetReady]
                }
            }
            ServerToClient::YourState { state } => {
                self.coins = state.coins;
                vec![]
            }
            ServerToClient::StartEligibilityChanged {
                can_start,
                ready_count,
                total_players,
                ..
            } => {
                println!("[{}] ready {}/{}", self.name, ready_count, total_players);
                if self.lead && can_start {
                    vec![ClientToServer::StartGame]
                } else {
                    vec![]
                }
            }
            ServerToClient::GameStarted { current_round, .. }
            | ServerToClient::NextRoundStarted { current_round, .. } => {
                println!("[{}] round {} begins", self.name, current_round);
                self.contribute(current_round)
            }
            ServerToClient::UpdateState { snapshot } => {
                self.max_contribution = snapshot.settings.max_contribution;
                if snapshot.status == RoomStatus::Playing {
                    self.contribute(snapshot.current_round)
                } else {
                    vec![]
                }
            }
            ServerToClient::RoundResolved { current_round, results } => {
                if let Some(me) = self.my_id.and_then(|id| results.player(id)) {
                    println!(
                        "[{}] round {}: gave {:.2}, balance {:.2} -> {:.2}",
                        self.name, current_round, me.contribution, me.old_balance, me.new_balance
                    );
                }
                if self.lead {
                    vec![ClientToServer::RequestNextRound]
                } else {
                    vec![]
                }
            }
            ServerToClient::GameFinished { summary } => {
                println!("[{}] game over after {} rounds", self.name, summary.rounds_played);
                for p in summary.players.iter() {
                    println!("  {:<12} final {:>7.2} profit {:>7.2}", p.name, p.final_balance, p.total_profit);
                }
                vec![]
            }
            ServerToClient::Error { kind, message } => {
                println!("[{}] error ({:?}): {}", self.name, kind, message);
                vec![]
            }
            _ => vec![],
        }
    }

    fn contribute(&mut self, round: u32) -> Vec<ClientToServer> {
        if self.lead || self.submitted_round >= round {
            return vec![];
        }
        let limit = self.coins.min(self.max_contribution).max(0.0);
        let amount = (rand::thread_rng().gen_range(0.0..=1.0) * limit * 100.0).floor() / 100.0;
        self.submitted_round = round;
        vec![ClientToServer::SubmitContribution { amount }]
    }
}
