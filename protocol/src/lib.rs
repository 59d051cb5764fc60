use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Decimal places kept for every coin amount.
pub const MONEY_DECIMALS: i32 = 2;

/// Round a coin amount to [`MONEY_DECIMALS`] places so drift does not
/// accumulate across rounds.
pub fn round_money(value: f64) -> f64 {
    let scale = 10f64.powi(MONEY_DECIMALS);
    (value * scale).round() / scale
}

// ---- Room lifecycle ----
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Waiting,
    Playing,
    RoundResults,
    Finished,
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomStatus::Waiting => write!(f, "waiting"),
            RoomStatus::Playing => write!(f, "playing"),
            RoomStatus::RoundResults => write!(f, "round_results"),
            RoomStatus::Finished => write!(f, "finished"),
        }
    }
}

// ---- End of game ----
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum EndMode {
    /// Stop after exactly `max_rounds` rounds.
    FixedRounds { max_rounds: u32 },
    /// Always play `min_rounds`; afterwards continue with `continue_probability`
    /// until `max_rounds` is reached.
    Probability {
        continue_probability: f64,
        min_rounds: u32,
        max_rounds: u32,
    },
    /// Each decision samples a probability from `[min_probability, max_probability]`
    /// and continues with it.
    ProbabilityRange {
        min_probability: f64,
        max_probability: f64,
    },
}

impl Default for EndMode {
    fn default() -> Self {
        EndMode::Probability {
            continue_probability: 0.5,
            min_rounds: 1,
            max_rounds: 20,
        }
    }
}

impl fmt::Display for EndMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndMode::FixedRounds { max_rounds } => write!(f, "{max_rounds} fixed rounds"),
            EndMode::Probability {
                continue_probability,
                min_rounds,
                max_rounds,
            } => write!(
                f,
                "p={continue_probability} (min {min_rounds}, max {max_rounds} rounds)"
            ),
            EndMode::ProbabilityRange {
                min_probability,
                max_probability,
            } => write!(f, "p in [{min_probability}, {max_probability}]"),
        }
    }
}

// ---- Room settings (immutable once the room exists) ----
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub initial_coins: f64,
    pub max_contribution: f64,
    pub group_size: usize,
    pub multiplier: f64,
    pub round_duration_seconds: u64,
    /// Keep the groups drawn at game start for every round.
    pub fixed_groups: bool,
    pub end_mode: EndMode,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            initial_coins: 10.0,
            max_contribution: 10.0,
            group_size: 4,
            multiplier: 2.0,
            round_duration_seconds: 60,
            fixed_groups: true,
            end_mode: EndMode::default(),
        }
    }
}

pub const MAX_GROUP_SIZE: usize = 64;
pub const MAX_ROUND_DURATION_SECONDS: u64 = 3600;

impl Settings {
    /// Checks numeric bounds. The message is meant for display to the leader.
    pub fn validate(&self) -> Result<(), String> {
        fn positive(name: &str, v: f64) -> Result<(), String> {
            if !v.is_finite() || v <= 0.0 {
                return Err(format!("{name} must be a positive number (got {v})"));
            }
            Ok(())
        }
        fn probability(name: &str, v: f64) -> Result<(), String> {
            if !v.is_finite() || !(0.0..=1.0).contains(&v) {
                return Err(format!("{name} must be between 0 and 1 (got {v})"));
            }
            Ok(())
        }

        positive("initial coins", self.initial_coins)?;
        positive("maximum contribution", self.max_contribution)?;
        positive("multiplier", self.multiplier)?;
        if self.group_size < 2 || self.group_size > MAX_GROUP_SIZE {
            return Err(format!(
                "group size must be between 2 and {MAX_GROUP_SIZE} (got {})",
                self.group_size
            ));
        }
        if self.round_duration_seconds == 0
            || self.round_duration_seconds > MAX_ROUND_DURATION_SECONDS
        {
            return Err(format!(
                "round duration must be between 1 and {MAX_ROUND_DURATION_SECONDS} seconds (got {})",
                self.round_duration_seconds
            ));
        }

        match self.end_mode {
            EndMode::FixedRounds { max_rounds } => {
                if max_rounds == 0 {
                    return Err("at least one round is required".into());
                }
            }
            EndMode::Probability {
                continue_probability,
                min_rounds,
                max_rounds,
            } => {
                probability("continue probability", continue_probability)?;
                if max_rounds == 0 {
                    return Err("at least one round is required".into());
                }
                if min_rounds > max_rounds {
                    return Err(format!(
                        "minimum rounds ({min_rounds}) exceed maximum rounds ({max_rounds})"
                    ));
                }
            }
            EndMode::ProbabilityRange {
                min_probability,
                max_probability,
            } => {
                probability("minimum probability", min_probability)?;
                probability("maximum probability", max_probability)?;
                if min_probability > max_probability {
                    return Err(format!(
                        "minimum probability ({min_probability}) exceeds maximum probability ({max_probability})"
                    ));
                }
            }
        }
        Ok(())
    }
}

// ---- Payout breakdown ----
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerResult {
    pub player_id: Uuid,
    pub name: String,
    pub contribution: f64,
    pub old_balance: f64,
    pub new_balance: f64,
    pub profit: f64,
    /// True when the contribution was filled in because the deadline passed.
    pub timed_out: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupResult {
    pub group_number: usize,
    pub total_contribution: f64,
    pub total_pool: f64,
    pub payout_per_player: f64,
    pub players: Vec<PlayerResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoundResults {
    pub round: u32,
    pub groups: Vec<GroupResult>,
}

impl RoundResults {
    pub fn player(&self, id: Uuid) -> Option<&PlayerResult> {
        self.groups
            .iter()
            .flat_map(|g| g.players.iter())
            .find(|p| p.player_id == id)
    }

    pub fn average_contribution(&self) -> f64 {
        let (sum, n) = self
            .groups
            .iter()
            .flat_map(|g| g.players.iter())
            .fold((0.0, 0usize), |(s, n), p| (s + p.contribution, n + 1));
        if n == 0 {
            0.0
        } else {
            round_money(sum / n as f64)
        }
    }
}

// ---- Public snapshots ----
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicPlayer {
    pub id: Uuid,
    pub name: String,
    pub coins: f64,
    pub ready: bool,
    pub connected: bool,
    pub submitted: bool,
    pub balance_history: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublicGroup {
    pub group_number: usize,
    pub members: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicRoom {
    pub id: String,
    pub leader_name: String,
    pub settings: Settings,
    pub status: RoomStatus,
    pub current_round: u32,
    pub players: Vec<PublicPlayer>,
    pub groups: Vec<PublicGroup>,
    pub submitted_count: usize,
    pub round_results: Option<RoundResults>,
    pub round_started_at: Option<String>, // RFC 3339
    pub time_left: Option<u64>,
}

/// Private economic state, only ever sent to the player it belongs to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerState {
    pub coins: f64,
    pub current_contribution: Option<f64>,
    pub balance_history: Vec<f64>,
    pub contribution_history: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSummary {
    pub id: String,
    pub leader_name: String,
    pub players: usize,
    pub group_size: usize,
    pub end_mode: EndMode,
}

// ---- Final evaluation ----
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerSummary {
    pub player_id: Uuid,
    pub name: String,
    pub final_balance: f64,
    pub total_contributed: f64,
    pub total_profit: f64,
    pub balance_history: Vec<f64>,
    pub contribution_history: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameSummary {
    pub rounds_played: u32,
    pub players: Vec<PlayerSummary>,
    /// Mean contribution across all participants, one entry per round.
    pub average_contribution_per_round: Vec<f64>,
    pub rounds: Vec<RoundResults>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    NameTaken,
    Precondition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientToServer {
    CreateRoom {
        leader_name: String,
        #[serde(default)]
        settings: Settings,
    },
    /// `resume` carries a previously issued player id when reconnecting.
    Join {
        room_id: String,
        name: String,
        #[serde(default)]
        resume: Option<Uuid>,
    },
    Leave,
    SetReady,
    StartGame,
    SubmitContribution {
        amount: f64,
    },
    RequestNextRound,
    ListRooms,
    RoomStatus {
        room_id: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerToClient {
    Hello {
        your_id: Uuid,
    },
    RoomCreated {
        room_id: String,
        snapshot: PublicRoom,
    },
    Joined {
        snapshot: PublicRoom,
        your_id: Uuid,
        is_leader: bool,
    },
    UpdateState {
        snapshot: PublicRoom,
    },
    YourState {
        state: PlayerState,
    },
    PlayerJoined {
        player_id: Uuid,
        player_name: String,
    },
    PlayerReady {
        player_id: Uuid,
        player_name: String,
    },
    PlayerConnection {
        player_id: Uuid,
        connected: bool,
    },
    StartEligibilityChanged {
        can_start: bool,
        reason: Option<String>,
        ready_count: usize,
        total_players: usize,
    },
    GameStarted {
        current_round: u32,
        groups: Vec<PublicGroup>,
    },
    TimerTick {
        current_round: u32,
        time_left: u64,
    },
    ContributionAccepted {
        amount: f64,
    },
    ContributionReceived {
        submitted_count: usize,
        total_players: usize,
    },
    RoundResolved {
        current_round: u32,
        results: RoundResults,
    },
    NextRoundStarted {
        current_round: u32,
        groups: Vec<PublicGroup>,
    },
    GameFinished {
        summary: GameSummary,
    },
    RoomList {
        rooms: Vec<RoomSummary>,
    },
    RoomStatus {
        room_id: String,
        status: RoomStatus,
        current_round: u32,
        time_left: Option<u64>,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_valid() {
        assert_eq!(Settings::default().validate(), Ok(()));
    }

    #[test]
    fn rejects_small_groups_and_bad_multiplier() {
        let s = Settings {
            group_size: 1,
            ..Settings::default()
        };
        assert!(s.validate().unwrap_err().contains("group size"));

        let s = Settings {
            multiplier: 0.0,
            ..Settings::default()
        };
        assert!(s.validate().unwrap_err().contains("multiplier"));

        let s = Settings {
            initial_coins: f64::NAN,
            ..Settings::default()
        };
        assert!(s.validate().is_err());
    }

    #[test]
    fn rejects_inverted_probability_range() {
        let s = Settings {
            end_mode: EndMode::ProbabilityRange {
                min_probability: 0.9,
                max_probability: 0.2,
            },
            ..Settings::default()
        };
        assert!(s.validate().unwrap_err().contains("exceeds"));
    }

    #[test]
    fn money_is_rounded_to_cents() {
        assert_eq!(round_money(0.1 + 0.2), 0.3);
        assert_eq!(round_money(6.666_666), 6.67);
        assert_eq!(round_money(-1.005_1), -1.01);
    }

    #[test]
    fn settings_deserialize_with_defaults() {
        let s: Settings =
            serde_json::from_str(r#"{"group_size":3,"end_mode":{"mode":"fixed_rounds","max_rounds":3}}"#)
                .unwrap();
        assert_eq!(s.group_size, 3);
        assert_eq!(s.initial_coins, 10.0);
        assert_eq!(s.end_mode, EndMode::FixedRounds { max_rounds: 3 });
    }

    #[test]
    fn client_messages_are_tagged() {
        let msg: ClientToServer =
            serde_json::from_str(r#"{"type":"submit_contribution","amount":4.5}"#).unwrap();
        assert!(matches!(msg, ClientToServer::SubmitContribution { amount } if amount == 4.5));
    }
}
