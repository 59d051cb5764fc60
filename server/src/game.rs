use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use pubgoods_protocol::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{GameError, GameResult};
use crate::partition::{partition, Group};
use crate::payout::{settle_round, Stake};

pub const MAX_NAME_LEN: usize = 32;

/// Moderator of a room. Never contributes, never grouped, never paid.
#[derive(Debug, Clone)]
pub struct Leader {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct Player {
    pub id: Uuid,
    pub name: String,
    pub coins: f64,
    /// Pending contribution for the round in progress.
    pub current_contribution: Option<f64>,
    pub ready: bool,
    pub connected: bool,
    /// Starts with the endowment, one entry per resolved round after that.
    pub balance_history: Vec<f64>,
    /// One entry per round, appended as soon as the contribution is accepted.
    pub contribution_history: Vec<f64>,
}

impl Player {
    fn new(id: Uuid, name: String, initial_coins: f64) -> Self {
        Player {
            id,
            name,
            coins: initial_coins,
            current_contribution: None,
            ready: false,
            connected: true,
            balance_history: vec![initial_coins],
            contribution_history: vec![],
        }
    }

    pub fn private_state(&self) -> PlayerState {
        PlayerState {
            coins: self.coins,
            current_contribution: self.current_contribution,
            balance_history: self.balance_history.clone(),
            contribution_history: self.contribution_history.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    /// Known player id coming back, membership unchanged.
    Rejoined,
    LeaderRejoined,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartCheck {
    pub can_start: bool,
    pub reason: Option<String>,
    pub ready_count: usize,
    pub total_players: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmitOutcome {
    /// Amount as recorded, rounded to cents.
    pub amount: f64,
    pub submitted_count: usize,
    pub total_players: usize,
    /// Set when this submission was the last one and closed the round.
    pub resolved: Option<RoundResults>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Advance {
    Continued { round: u32 },
    Finished(GameSummary),
}

/// Decides whether another round is played after `completed_round`.
pub fn should_continue<R: Rng + ?Sized>(end_mode: &EndMode, completed_round: u32, rng: &mut R) -> bool {
    match *end_mode {
        EndMode::FixedRounds { max_rounds } => completed_round < max_rounds,
        EndMode::Probability {
            continue_probability,
            min_rounds,
            max_rounds,
        } => {
            if completed_round < min_rounds {
                return true;
            }
            completed_round < max_rounds && rng.gen::<f64>() < continue_probability
        }
        EndMode::ProbabilityRange {
            min_probability,
            max_probability,
        } => {
            let p = rng.gen_range(min_probability..=max_probability);
            rng.gen::<f64>() < p
        }
    }
}

#[derive(Debug)]
pub struct Room {
    pub id: String,
    pub leader: Leader,
    pub settings: Settings,
    /// Non-leader members in join order.
    pub players: Vec<Player>,
    pub status: RoomStatus,
    pub current_round: u32,
    pub groups: Vec<Group>,
    pub submitted: HashSet<Uuid>,
    pub contributions: HashMap<Uuid, f64>,
    pub round_results: Option<RoundResults>,
    pub history: Vec<RoundResults>,
    pub round_started_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    rng: StdRng,
}

impl Room {
    pub fn new(id: String, leader: Leader, settings: Settings) -> GameResult<Self> {
        settings.validate().map_err(GameError::Validation)?;
        Ok(Room {
            id,
            leader,
            settings,
            players: vec![],
            status: RoomStatus::Waiting,
            current_round: 0,
            groups: vec![],
            submitted: HashSet::new(),
            contributions: HashMap::new(),
            round_results: None,
            history: vec![],
            round_started_at: None,
            created_at: Utc::now(),
            rng: StdRng::from_entropy(),
        })
    }

    /// Fixes grouping and continuation draws, mostly for tests.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn is_leader(&self, id: Uuid) -> bool {
        self.leader.id == id
    }

    pub fn is_member(&self, id: Uuid) -> bool {
        self.is_leader(id) || self.player(id).is_some()
    }

    pub fn player(&self, id: Uuid) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    fn player_mut(&mut self, id: Uuid) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.id == id)
    }

    pub fn display_name(&self, id: Uuid) -> Option<&str> {
        if self.is_leader(id) {
            return Some(&self.leader.name);
        }
        self.player(id).map(|p| p.name.as_str())
    }

    /// Players placed in a group this round.
    pub fn participants(&self) -> usize {
        self.groups.iter().map(|g| g.members.len()).sum()
    }

    pub fn group_of(&self, id: Uuid) -> Option<&Group> {
        self.groups.iter().find(|g| g.contains(id))
    }

    pub fn ready_count(&self) -> usize {
        self.players.iter().filter(|p| p.ready).count()
    }

    /* ---------------- admission ---------------- */

    pub fn add_player(&mut self, id: Uuid, name: &str) -> GameResult<JoinOutcome> {
        if self.is_leader(id) {
            return Ok(JoinOutcome::LeaderRejoined);
        }
        if let Some(p) = self.player_mut(id) {
            p.connected = true;
            debug!(room = %self.id, player = %id, "player rejoined");
            return Ok(JoinOutcome::Rejoined);
        }
        if self.status != RoomStatus::Waiting {
            return Err(GameError::precondition(
                "the game has already started; only existing players can rejoin",
            ));
        }

        let name = name.trim();
        if name.is_empty() {
            return Err(GameError::validation("name cannot be empty"));
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(GameError::validation(format!(
                "name must be at most {MAX_NAME_LEN} characters"
            )));
        }
        let taken = self.leader.name.eq_ignore_ascii_case(name)
            || self.players.iter().any(|p| p.name.eq_ignore_ascii_case(name));
        if taken {
            return Err(GameError::NameTaken(name.to_string()));
        }

        self.players
            .push(Player::new(id, name.to_string(), self.settings.initial_coins));
        info!(room = %self.id, player = %id, name, total = self.players.len(), "player joined");
        Ok(JoinOutcome::Joined)
    }

    /// Marks a player ready. Returns whether anything changed; the leader is
    /// always ready and calls for it are accepted without effect.
    pub fn set_ready(&mut self, id: Uuid) -> GameResult<bool> {
        if self.is_leader(id) {
            return Ok(false);
        }
        if self.status != RoomStatus::Waiting {
            return Err(GameError::precondition(
                "readiness can only be changed before the game starts",
            ));
        }
        let room = self.id.clone();
        let p = self
            .player_mut(id)
            .ok_or_else(|| GameError::player_not_found(id))?;
        if p.ready {
            return Ok(false);
        }
        p.ready = true;
        debug!(room = %room, player = %id, "player ready");
        Ok(true)
    }

    pub fn set_connected(&mut self, id: Uuid, connected: bool) -> bool {
        match self.player_mut(id) {
            Some(p) if p.connected != connected => {
                p.connected = connected;
                true
            }
            _ => false,
        }
    }

    /* ---------------- start gating ---------------- */

    /// All non-leader members must be ready, and there must be a positive
    /// multiple of the group size of them.
    pub fn can_start(&self) -> StartCheck {
        let total = self.players.len();
        let ready = self.ready_count();
        let g = self.settings.group_size;

        let reason = if self.status != RoomStatus::Waiting {
            Some(format!("the game is already {}", self.status))
        } else if total < g {
            Some(format!("need at least {g} players (currently {total})"))
        } else if total % g != 0 {
            Some(format!(
                "the number of players ({total}) must be divisible by the group size ({g})"
            ))
        } else if ready < total {
            Some(format!("waiting for players: {ready}/{total} ready"))
        } else {
            None
        };

        StartCheck {
            can_start: reason.is_none(),
            reason,
            ready_count: ready,
            total_players: total,
        }
    }

    pub fn start_game(&mut self, requester: Uuid) -> GameResult<()> {
        if !self.is_leader(requester) {
            return Err(GameError::precondition("only the leader can start the game"));
        }
        let check = self.can_start();
        if let Some(reason) = check.reason {
            return Err(GameError::Precondition(format!("cannot start: {reason}")));
        }

        self.status = RoomStatus::Playing;
        self.current_round = 1;
        self.regroup();
        self.begin_round();
        info!(
            room = %self.id,
            players = self.players.len(),
            groups = self.groups.len(),
            "game started"
        );
        Ok(())
    }

    fn regroup(&mut self) {
        let ids: Vec<Uuid> = self.players.iter().map(|p| p.id).collect();
        self.groups = partition(&ids, self.settings.group_size, &mut self.rng);
    }

    fn begin_round(&mut self) {
        self.submitted.clear();
        self.contributions.clear();
        for p in self.players.iter_mut() {
            p.current_contribution = None;
        }
        self.round_results = None;
        self.round_started_at = Some(Utc::now());
    }

    /* ---------------- contributions ---------------- */

    pub fn submit_contribution(&mut self, id: Uuid, amount: f64) -> GameResult<SubmitOutcome> {
        if self.status != RoomStatus::Playing {
            return Err(GameError::precondition(format!(
                "round {} is not accepting contributions",
                self.current_round
            )));
        }
        if self.is_leader(id) {
            return Err(GameError::precondition("the leader does not contribute"));
        }
        let player = self.player(id).ok_or_else(|| GameError::player_not_found(id))?;
        if self.group_of(id).is_none() {
            return Err(GameError::precondition("you are not in a group this round"));
        }
        if self.submitted.contains(&id) {
            return Err(GameError::precondition(
                "you already submitted a contribution this round",
            ));
        }
        if !amount.is_finite() || amount < 0.0 {
            return Err(GameError::validation("contribution must be zero or more"));
        }
        let limit = player.coins.min(self.settings.max_contribution);
        if amount > limit {
            return Err(GameError::validation(format!(
                "contribution {amount} exceeds the limit of {limit}"
            )));
        }
        // rounding to cents must not push an accepted amount over the limit
        let amount = round_money(amount).min(limit);

        let round = self.current_round;
        if let Some(p) = self.player_mut(id) {
            p.current_contribution = Some(amount);
            p.contribution_history.push(amount);
        }
        self.contributions.insert(id, amount);
        self.submitted.insert(id);

        let submitted_count = self.submitted.len();
        let total_players = self.participants();
        debug!(room = %self.id, player = %id, round, amount, submitted_count, total_players, "contribution accepted");

        let resolved = if submitted_count == total_players {
            Some(self.resolve_round(round)?)
        } else {
            None
        };
        Ok(SubmitOutcome {
            amount,
            submitted_count,
            total_players,
            resolved,
        })
    }

    /// Closes `round`: missing contributions count as zero, the payout engine
    /// runs once, balances move. Any later call for the same round loses.
    pub fn resolve_round(&mut self, round: u32) -> GameResult<RoundResults> {
        if self.status != RoomStatus::Playing || self.current_round != round {
            return Err(GameError::RaceLoss { round });
        }

        let mut timed_out = HashSet::new();
        let missing: Vec<Uuid> = self
            .groups
            .iter()
            .flat_map(|g| g.members.iter().copied())
            .filter(|id| !self.submitted.contains(id))
            .collect();
        for id in missing {
            self.contributions.insert(id, 0.0);
            self.submitted.insert(id);
            timed_out.insert(id);
            if let Some(p) = self.player_mut(id) {
                p.contribution_history.push(0.0);
            }
        }

        let stakes = self.groups.iter().map(|g| {
            let members = g
                .members
                .iter()
                .filter_map(|id| self.player(*id))
                .map(|p| Stake {
                    player_id: p.id,
                    name: p.name.clone(),
                    balance: p.coins,
                    contribution: self.contributions.get(&p.id).copied().unwrap_or(0.0),
                    timed_out: timed_out.contains(&p.id),
                })
                .collect::<Vec<_>>();
            (g.group_number, members)
        });
        let results = settle_round(round, self.settings.multiplier, stakes.collect::<Vec<_>>());

        let grouped: HashSet<Uuid> = self.groups.iter().flat_map(|g| g.members.iter().copied()).collect();
        for p in self.players.iter_mut() {
            match results.player(p.id) {
                Some(r) => {
                    p.coins = r.new_balance;
                    p.balance_history.push(r.new_balance);
                }
                None if !grouped.contains(&p.id) => {
                    // sat out this round; keep the histories parallel
                    p.balance_history.push(p.coins);
                    p.contribution_history.push(0.0);
                }
                None => {}
            }
            p.current_contribution = None;
        }

        self.status = RoomStatus::RoundResults;
        self.submitted.clear();
        self.contributions.clear();
        self.round_results = Some(results.clone());
        self.history.push(results.clone());
        info!(
            room = %self.id,
            round,
            timed_out = timed_out.len(),
            "round resolved"
        );
        Ok(results)
    }

    /* ---------------- progression ---------------- */

    pub fn advance_round(&mut self, requester: Uuid) -> GameResult<Advance> {
        if !self.is_leader(requester) {
            return Err(GameError::precondition(
                "only the leader can start the next round",
            ));
        }
        if self.status != RoomStatus::RoundResults {
            return Err(GameError::Precondition(format!(
                "the next round can only be requested after results (room is {})",
                self.status
            )));
        }

        if should_continue(&self.settings.end_mode, self.current_round, &mut self.rng) {
            self.current_round += 1;
            if !self.settings.fixed_groups {
                self.regroup();
            }
            self.begin_round();
            self.status = RoomStatus::Playing;
            info!(room = %self.id, round = self.current_round, "next round started");
            Ok(Advance::Continued {
                round: self.current_round,
            })
        } else {
            self.status = RoomStatus::Finished;
            info!(room = %self.id, rounds = self.current_round, "game finished");
            Ok(Advance::Finished(self.summary()))
        }
    }

    /* ---------------- views ---------------- */

    pub fn summary(&self) -> GameSummary {
        let initial = self.settings.initial_coins;
        GameSummary {
            rounds_played: self.history.len() as u32,
            players: self
                .players
                .iter()
                .map(|p| PlayerSummary {
                    player_id: p.id,
                    name: p.name.clone(),
                    final_balance: p.coins,
                    total_contributed: round_money(p.contribution_history.iter().sum()),
                    total_profit: round_money(p.coins - initial),
                    balance_history: p.balance_history.clone(),
                    contribution_history: p.contribution_history.clone(),
                })
                .collect(),
            average_contribution_per_round: self
                .history
                .iter()
                .map(RoundResults::average_contribution)
                .collect(),
            rounds: self.history.clone(),
        }
    }

    pub fn public_groups(&self) -> Vec<PublicGroup> {
        self.groups.iter().map(Group::public).collect()
    }

    pub fn snapshot(&self, time_left: Option<u64>) -> PublicRoom {
        PublicRoom {
            id: self.id.clone(),
            leader_name: self.leader.name.clone(),
            settings: self.settings,
            status: self.status,
            current_round: self.current_round,
            players: self
                .players
                .iter()
                .map(|p| PublicPlayer {
                    id: p.id,
                    name: p.name.clone(),
                    coins: p.coins,
                    ready: p.ready,
                    connected: p.connected,
                    submitted: self.submitted.contains(&p.id),
                    balance_history: p.balance_history.clone(),
                })
                .collect(),
            groups: self.public_groups(),
            submitted_count: self.submitted.len(),
            round_results: self.round_results.clone(),
            round_started_at: self.round_started_at.map(|t| t.to_rfc3339()),
            time_left,
        }
    }

    pub fn room_summary(&self) -> RoomSummary {
        RoomSummary {
            id: self.id.clone(),
            leader_name: self.leader.name.clone(),
            players: self.players.len(),
            group_size: self.settings.group_size,
            end_mode: self.settings.end_mode,
        }
    }
}
