use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use pubgoods_protocol::*;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{GameError, GameResult};
use crate::game::{Advance, JoinOutcome, Leader, Room};
use crate::timer::RoundTimer;

pub type Outbox = mpsc::UnboundedSender<ServerToClient>;

/// One room plus everything that lives next to it: connections of its
/// members and the countdown of the round in progress. All access goes
/// through the slot's mutex, which is what serializes room actions.
pub type SharedRoom = Arc<Mutex<RoomSlot>>;

pub struct RoomSlot {
    pub room: Room,
    members: HashMap<Uuid, Outbox>,
    timer: Option<RoundTimer>,
    last_activity: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomStatusView {
    pub status: RoomStatus,
    pub current_round: u32,
    pub time_left: Option<u64>,
}

impl RoomSlot {
    fn new(room: Room) -> Self {
        RoomSlot {
            room,
            members: HashMap::new(),
            timer: None,
            last_activity: Instant::now(),
        }
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn time_left(&self) -> Option<u64> {
        if self.room.status != RoomStatus::Playing {
            return None;
        }
        self.timer.as_ref().map(RoundTimer::time_left)
    }

    pub fn snapshot(&self) -> PublicRoom {
        self.room.snapshot(self.time_left())
    }

    pub fn status_view(&self) -> RoomStatusView {
        RoomStatusView {
            status: self.room.status,
            current_round: self.room.current_round,
            time_left: self.time_left(),
        }
    }

    fn broadcast(&self, msg: ServerToClient) {
        for (id, tx) in self.members.iter() {
            if tx.send(msg.clone()).is_err() {
                debug!(room = %self.room.id, player = %id, "broadcast to closed connection");
            }
        }
    }

    fn broadcast_state(&self) {
        self.broadcast(ServerToClient::UpdateState {
            snapshot: self.snapshot(),
        });
    }

    fn send_to(&self, id: Uuid, msg: ServerToClient) {
        if let Some(tx) = self.members.get(&id) {
            let _ = tx.send(msg);
        }
    }

    fn send_private_state(&self, id: Uuid) {
        if let Some(p) = self.room.player(id) {
            self.send_to(
                id,
                ServerToClient::YourState {
                    state: p.private_state(),
                },
            );
        }
    }

    fn broadcast_eligibility(&self) {
        let check = self.room.can_start();
        self.broadcast(ServerToClient::StartEligibilityChanged {
            can_start: check.can_start,
            reason: check.reason,
            ready_count: check.ready_count,
            total_players: check.total_players,
        });
    }

    fn stop_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stop();
        }
    }

    fn finish_round(&mut self, results: RoundResults) {
        self.stop_timer();
        self.broadcast(ServerToClient::RoundResolved {
            current_round: results.round,
            results,
        });
        for p in self.room.players.iter() {
            self.send_private_state(p.id);
        }
        self.broadcast_state();
    }

    /// Deadline path. Goes through the same state-machine guard as the last
    /// submission, so whichever gets the lock second loses quietly.
    fn resolve_expired(&mut self, round: u32) {
        match self.room.resolve_round(round) {
            Ok(results) => {
                info!(room = %self.room.id, round, "round closed by deadline");
                self.touch();
                self.finish_round(results);
            }
            Err(GameError::RaceLoss { round }) => {
                debug!(room = %self.room.id, round, "deadline lost the race, round already resolved");
            }
            Err(e) => warn!(room = %self.room.id, round, error = %e, "deadline resolution failed"),
        }
    }
}

fn arm_timer(shared: &SharedRoom, slot: &mut RoomSlot) {
    let round = slot.room.current_round;
    let duration = Duration::from_secs(slot.room.settings.round_duration_seconds);

    let on_tick = {
        let weak = Arc::downgrade(shared);
        move |time_left: u64| {
            if let Some(shared) = weak.upgrade() {
                let slot = shared.lock();
                if slot.room.status == RoomStatus::Playing && slot.room.current_round == round {
                    slot.broadcast(ServerToClient::TimerTick {
                        current_round: round,
                        time_left,
                    });
                }
            }
        }
    };
    let on_expire = {
        let weak = Arc::downgrade(shared);
        move || {
            if let Some(shared) = weak.upgrade() {
                shared.lock().resolve_expired(round);
            }
        }
    };

    slot.stop_timer();
    slot.timer = Some(RoundTimer::start(duration, on_tick, on_expire));
    debug!(room = %slot.room.id, round, secs = duration.as_secs(), "round timer armed");
}

/// The process-wide room store. Only the map itself sits behind the outer
/// lock; each room is serialized by its own mutex.
#[derive(Clone, Default)]
pub struct Lobby {
    rooms: Arc<Mutex<HashMap<String, SharedRoom>>>,
}

impl Lobby {
    pub fn new() -> Self {
        Self::default()
    }

    fn room(&self, room_id: &str) -> GameResult<SharedRoom> {
        self.rooms
            .lock()
            .get(room_id)
            .cloned()
            .ok_or_else(|| GameError::room_not_found(room_id))
    }

    pub fn room_count(&self) -> usize {
        self.rooms.lock().len()
    }

    #[cfg(test)]
    pub fn snapshot(&self, room_id: &str) -> GameResult<PublicRoom> {
        Ok(self.room(room_id)?.lock().snapshot())
    }

    pub fn create_room(
        &self,
        leader_id: Uuid,
        leader_name: &str,
        settings: Settings,
        tx: Outbox,
    ) -> GameResult<String> {
        self.create_room_with(leader_id, leader_name, settings, tx, None)
    }

    /// Like [`Lobby::create_room`] with a fixed random seed for the room.
    pub fn create_room_with(
        &self,
        leader_id: Uuid,
        leader_name: &str,
        settings: Settings,
        tx: Outbox,
        seed: Option<u64>,
    ) -> GameResult<String> {
        let leader_name = leader_name.trim();
        if leader_name.is_empty() {
            return Err(GameError::validation("leader name cannot be empty"));
        }
        let leader = Leader {
            id: leader_id,
            name: leader_name.to_string(),
        };

        let mut rooms = self.rooms.lock();
        let room_id = loop {
            let candidate = Uuid::new_v4().simple().to_string()[..8].to_string();
            if !rooms.contains_key(&candidate) {
                break candidate;
            }
        };
        let mut room = Room::new(room_id.clone(), leader, settings)?;
        if let Some(seed) = seed {
            room = room.with_seed(seed);
        }

        let mut slot = RoomSlot::new(room);
        slot.members.insert(leader_id, tx);
        slot.send_to(
            leader_id,
            ServerToClient::RoomCreated {
                room_id: room_id.clone(),
                snapshot: slot.snapshot(),
            },
        );
        rooms.insert(room_id.clone(), Arc::new(Mutex::new(slot)));
        info!(room = %room_id, leader = %leader_id, name = leader_name, "room created");
        Ok(room_id)
    }

    pub fn join_room(
        &self,
        room_id: &str,
        player_id: Uuid,
        name: &str,
        tx: Outbox,
    ) -> GameResult<JoinOutcome> {
        let shared = self.room(room_id)?;
        let mut slot = shared.lock();
        let outcome = slot.room.add_player(player_id, name)?;
        slot.touch();
        slot.members.insert(player_id, tx);

        slot.send_to(
            player_id,
            ServerToClient::Joined {
                snapshot: slot.snapshot(),
                your_id: player_id,
                is_leader: outcome == JoinOutcome::LeaderRejoined,
            },
        );
        match outcome {
            JoinOutcome::Joined => {
                let player_name = slot
                    .room
                    .display_name(player_id)
                    .unwrap_or_default()
                    .to_string();
                slot.broadcast(ServerToClient::PlayerJoined {
                    player_id,
                    player_name,
                });
                slot.send_private_state(player_id);
                slot.broadcast_eligibility();
            }
            JoinOutcome::Rejoined => {
                slot.broadcast(ServerToClient::PlayerConnection {
                    player_id,
                    connected: true,
                });
                slot.send_private_state(player_id);
            }
            JoinOutcome::LeaderRejoined => {
                debug!(room = %room_id, "leader reconnected");
            }
        }
        slot.broadcast_state();
        Ok(outcome)
    }

    pub fn set_ready(&self, room_id: &str, player_id: Uuid) -> GameResult<()> {
        let shared = self.room(room_id)?;
        let mut slot = shared.lock();
        if !slot.room.is_member(player_id) {
            return Err(GameError::player_not_found(player_id));
        }
        if slot.room.set_ready(player_id)? {
            slot.touch();
            let player_name = slot
                .room
                .display_name(player_id)
                .unwrap_or_default()
                .to_string();
            slot.broadcast(ServerToClient::PlayerReady {
                player_id,
                player_name,
            });
        }
        slot.broadcast_eligibility();
        slot.broadcast_state();
        Ok(())
    }

    pub fn start_game(&self, room_id: &str, player_id: Uuid) -> GameResult<()> {
        let shared = self.room(room_id)?;
        let mut slot = shared.lock();
        // gate check and transition happen under the same lock
        slot.room.start_game(player_id)?;
        slot.touch();
        slot.broadcast(ServerToClient::GameStarted {
            current_round: slot.room.current_round,
            groups: slot.room.public_groups(),
        });
        arm_timer(&shared, &mut slot);
        slot.broadcast_state();
        Ok(())
    }

    pub fn submit_contribution(&self, room_id: &str, player_id: Uuid, amount: f64) -> GameResult<()> {
        let shared = self.room(room_id)?;
        let mut slot = shared.lock();
        let outcome = slot.room.submit_contribution(player_id, amount)?;
        slot.touch();

        slot.send_to(
            player_id,
            ServerToClient::ContributionAccepted {
                amount: outcome.amount,
            },
        );
        slot.send_private_state(player_id);
        slot.broadcast(ServerToClient::ContributionReceived {
            submitted_count: outcome.submitted_count,
            total_players: outcome.total_players,
        });
        if let Some(results) = outcome.resolved {
            slot.finish_round(results);
        }
        Ok(())
    }

    pub fn request_next_round(&self, room_id: &str, player_id: Uuid) -> GameResult<Advance> {
        let shared = self.room(room_id)?;
        let mut slot = shared.lock();
        let advance = slot.room.advance_round(player_id)?;
        slot.touch();
        match &advance {
            Advance::Continued { round } => {
                slot.broadcast(ServerToClient::NextRoundStarted {
                    current_round: *round,
                    groups: slot.room.public_groups(),
                });
                for p in slot.room.players.iter() {
                    slot.send_private_state(p.id);
                }
                arm_timer(&shared, &mut slot);
            }
            Advance::Finished(summary) => {
                slot.stop_timer();
                slot.broadcast(ServerToClient::GameFinished {
                    summary: summary.clone(),
                });
            }
        }
        slot.broadcast_state();
        Ok(advance)
    }

    /// Drops the connection but keeps the membership so the player can
    /// come back. A stale connection closing never unbinds a newer one.
    pub fn disconnect(&self, room_id: &str, player_id: Uuid, tx: &Outbox) {
        let Ok(shared) = self.room(room_id) else {
            return;
        };
        let mut slot = shared.lock();
        let current = slot
            .members
            .get(&player_id)
            .is_some_and(|bound| bound.same_channel(tx));
        if !current {
            return;
        }
        slot.members.remove(&player_id);
        if slot.room.set_connected(player_id, false) {
            slot.broadcast(ServerToClient::PlayerConnection {
                player_id,
                connected: false,
            });
        }
        debug!(room = %room_id, player = %player_id, "connection closed");
    }

    pub fn room_status(&self, room_id: &str) -> GameResult<RoomStatusView> {
        Ok(self.room(room_id)?.lock().status_view())
    }

    /// Rooms still accepting players, oldest first.
    pub fn available_rooms(&self) -> Vec<RoomSummary> {
        let rooms = self.rooms.lock();
        let mut open: Vec<_> = rooms
            .values()
            .filter_map(|shared| {
                let slot = shared.lock();
                (slot.room.status == RoomStatus::Waiting)
                    .then(|| (slot.room.created_at, slot.room.room_summary()))
            })
            .collect();
        open.sort_by_key(|(created, _)| *created);
        open.into_iter().map(|(_, summary)| summary).collect()
    }

    /// Evicts rooms idle for longer than `ttl`. Returns how many went away.
    pub fn sweep_idle(&self, ttl: Duration) -> usize {
        let mut rooms = self.rooms.lock();
        let before = rooms.len();
        rooms.retain(|id, shared| {
            let mut slot = shared.lock();
            let keep = slot.last_activity.elapsed() < ttl;
            if !keep {
                slot.stop_timer();
                info!(room = %id, status = %slot.room.status, "evicting idle room");
            }
            keep
        });
        before - rooms.len()
    }
}
