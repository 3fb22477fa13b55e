use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use uuid::Uuid;

use crate::registry::Registry;
use crate::scoring;
use crate::types::*;

/// Fixed per-question answer window, in seconds.
pub const QUESTION_SECONDS: u64 = 20;

/// Commands the WebSocket handler sends to a room task. Ticks arrive on the
/// same channel, so every mutation of one room is serialized.
#[derive(Debug, Clone)]
pub enum RoomCommand {
    Join {
        conn_id: String,
        name: String,
    },
    Rejoin {
        conn_id: String,
        token: Option<String>,
        name: Option<String>,
    },
    StartGame {
        conn_id: String,
    },
    AdvancePhase {
        conn_id: String,
    },
    SubmitAnswer {
        conn_id: String,
        answer: AnswerKey,
    },
    StateRequest {
        conn_id: String,
    },
    Tick {
        epoch: u64,
    },
    PlayerDisconnect {
        conn_id: String,
    },
    HostDisconnect {
        conn_id: String,
    },
}

/// A message addressed to one connection. The room shapes each payload once
/// and fans out one `Outbound` per target; the gateway filters by `conn_id`.
#[derive(Debug, Clone)]
pub struct Outbound {
    pub conn_id: String,
    pub msg: ServerMsg,
}

#[derive(Clone)]
pub struct RoomHandle {
    pub room_code: String,
    pub cmd_tx: mpsc::Sender<RoomCommand>,
    pub event_tx: broadcast::Sender<Outbound>,
}

/// Join rejections surfaced to the requesting connection only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinError {
    GameInProgress,
    NameTaken,
    AlreadyJoined,
}

impl std::fmt::Display for JoinError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::GameInProgress => write!(f, "Game already in progress"),
            Self::NameTaken => write!(f, "Name already taken"),
            Self::AlreadyJoined => write!(f, "Already in this room"),
        }
    }
}

#[derive(Debug)]
struct Player {
    conn_id: String,
    name: String,
    /// Rejoin token issued at join, presented to reclaim the identity.
    token: String,
    connected: bool,
    score: u32,
    answer: Option<(AnswerKey, Instant)>,
    /// Retained so a reconnecting player can be shown what it missed.
    last_feedback: Option<AnswerFeedback>,
    final_result: Option<FinalStanding>,
}

/// The state machine of one running session. Owned by its room task; all
/// mutation goes through the command channel.
pub struct Room {
    code: String,
    host_id: String,
    questions: Vec<Question>,
    phase: Phase,
    current: usize,
    players: Vec<Player>,
    time_remaining: u64,
    question_started: Instant,
    /// Countdown task. Present iff phase is `Question`.
    ticker: Option<tokio::task::JoinHandle<()>>,
    /// Bumped on every ticker start/cancel so a tick already queued behind
    /// a phase change is ignored when it is finally handled.
    timer_epoch: u64,
    cmd_tx: mpsc::Sender<RoomCommand>,
}

impl Room {
    pub fn new(
        code: String,
        host_id: String,
        questions: Vec<Question>,
        cmd_tx: mpsc::Sender<RoomCommand>,
    ) -> Self {
        Self {
            code,
            host_id,
            questions,
            phase: Phase::Lobby,
            current: 0,
            players: Vec::new(),
            time_remaining: 0,
            question_started: Instant::now(),
            ticker: None,
            timer_epoch: 0,
            cmd_tx,
        }
    }

    // ─── Fan-out (unicast / host / room multicast) ────────────────────

    fn send_to(&self, tx: &broadcast::Sender<Outbound>, conn_id: &str, msg: ServerMsg) {
        let _ = tx.send(Outbound {
            conn_id: conn_id.to_string(),
            msg,
        });
    }

    fn to_host(&self, tx: &broadcast::Sender<Outbound>, msg: ServerMsg) {
        self.send_to(tx, &self.host_id, msg);
    }

    fn broadcast_players(&self, tx: &broadcast::Sender<Outbound>, msg: ServerMsg) {
        for p in self.players.iter().filter(|p| p.connected) {
            self.send_to(tx, &p.conn_id, msg.clone());
        }
    }

    // ─── Projections ──────────────────────────────────────────────────

    fn public_roster(&self) -> Vec<PlayerPublic> {
        let mut roster: Vec<PlayerPublic> = self
            .players
            .iter()
            .map(|p| PlayerPublic {
                id: p.conn_id.clone(),
                name: p.name.clone(),
                score: p.score,
            })
            .collect();
        roster.sort_by_key(|p| std::cmp::Reverse(p.score));
        roster
    }

    /// Player indices in rank order: descending score, ties keep join order
    /// (stable sort).
    fn standings(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.players.len()).collect();
        order.sort_by_key(|&i| std::cmp::Reverse(self.players[i].score));
        order
    }

    fn leaderboard_entries(&self) -> Vec<LeaderboardEntry> {
        self.standings()
            .iter()
            .enumerate()
            .map(|(pos, &i)| LeaderboardEntry {
                name: self.players[i].name.clone(),
                score: self.players[i].score,
                rank: pos + 1,
            })
            .collect()
    }

    fn answered_count(&self) -> usize {
        self.players.iter().filter(|p| p.answer.is_some()).count()
    }

    /// True when every connected player has answered. A round with no
    /// connected players left runs out its countdown instead.
    fn all_answered(&self) -> bool {
        let mut connected = self.players.iter().filter(|p| p.connected).peekable();
        connected.peek().is_some() && connected.all(|p| p.answer.is_some())
    }

    fn player_question(&self) -> QuestionForPlayer {
        let q = &self.questions[self.current];
        QuestionForPlayer {
            question: q.question.clone(),
            answers: q.answers.clone(),
            question_number: self.current + 1,
            total_questions: self.questions.len(),
            time_limit: QUESTION_SECONDS,
        }
    }

    pub fn state_snapshot(&self) -> RoomState {
        RoomState {
            room_code: self.code.clone(),
            phase: self.phase,
            players: self.public_roster(),
            current_question_index: self.current,
            total_questions: self.questions.len(),
            time_remaining: self.time_remaining,
            answered_count: self.answered_count(),
        }
    }

    // ─── Countdown ────────────────────────────────────────────────────

    fn spawn_ticker(&mut self) {
        self.timer_epoch += 1;
        let epoch = self.timer_epoch;
        let cmd_tx = self.cmd_tx.clone();
        self.ticker = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(1)).await;
                if cmd_tx.send(RoomCommand::Tick { epoch }).await.is_err() {
                    break;
                }
            }
        }));
    }

    /// Stop the countdown. Idempotent; bumping the epoch invalidates any
    /// tick already sitting in the command queue.
    fn cancel_countdown(&mut self) {
        if let Some(handle) = self.ticker.take() {
            handle.abort();
        }
        self.timer_epoch += 1;
    }

    pub fn tick(&mut self, tx: &broadcast::Sender<Outbound>, epoch: u64) {
        if self.phase != Phase::Question || epoch != self.timer_epoch {
            return;
        }
        self.time_remaining = self.time_remaining.saturating_sub(1);

        self.to_host(
            tx,
            ServerMsg::HostTick {
                time_remaining: self.time_remaining,
                answered_count: self.answered_count(),
            },
        );
        // Players never see the answered count.
        self.broadcast_players(
            tx,
            ServerMsg::PlayerTick {
                time_remaining: self.time_remaining,
            },
        );

        if self.time_remaining == 0 {
            self.end_question(tx);
        }
    }

    // ─── Roster membership ────────────────────────────────────────────

    pub fn join(
        &mut self,
        tx: &broadcast::Sender<Outbound>,
        registry: &Registry,
        conn_id: String,
        name: String,
    ) -> Result<(), JoinError> {
        if self.phase != Phase::Lobby {
            return Err(JoinError::GameInProgress);
        }
        // One seat per connection; a second join would leave a roster entry
        // no disconnect can ever reach.
        if self.players.iter().any(|p| p.conn_id == conn_id) {
            return Err(JoinError::AlreadyJoined);
        }
        if self
            .players
            .iter()
            .any(|p| p.name.to_lowercase() == name.to_lowercase())
        {
            return Err(JoinError::NameTaken);
        }

        let token = Uuid::new_v4().to_string();
        self.players.push(Player {
            conn_id: conn_id.clone(),
            name: name.clone(),
            token: token.clone(),
            connected: true,
            score: 0,
            answer: None,
            last_feedback: None,
            final_result: None,
        });
        registry.bind_player(&conn_id, &self.code);

        self.send_to(
            tx,
            &conn_id,
            ServerMsg::Joined {
                room_code: self.code.clone(),
                name,
                token,
            },
        );
        self.to_host(
            tx,
            ServerMsg::RosterChanged {
                players: self.public_roster(),
            },
        );
        Ok(())
    }

    pub fn player_disconnect(
        &mut self,
        tx: &broadcast::Sender<Outbound>,
        registry: &Registry,
        conn_id: &str,
    ) {
        registry.unbind_player(conn_id);
        let Some(idx) = self.players.iter().position(|p| p.conn_id == conn_id) else {
            return;
        };

        if self.phase == Phase::Lobby {
            self.players.remove(idx);
        } else {
            // Keep score and history for the reconnection grace.
            self.players[idx].connected = false;
        }

        self.to_host(
            tx,
            ServerMsg::RosterChanged {
                players: self.public_roster(),
            },
        );

        // A departing non-answerer must not block the round.
        if self.phase == Phase::Question && self.all_answered() {
            self.end_question(tx);
        }
    }

    pub fn rejoin(
        &mut self,
        tx: &broadcast::Sender<Outbound>,
        registry: &Registry,
        conn_id: String,
        token: Option<String>,
        name: Option<String>,
    ) {
        let found = self.players.iter().position(|p| match (&token, &name) {
            (Some(t), _) => p.token == *t,
            (None, Some(n)) => p.name.to_lowercase() == n.to_lowercase(),
            (None, None) => false,
        });
        let Some(idx) = found else {
            self.send_to(
                tx,
                &conn_id,
                ServerMsg::Error {
                    message: "Player not found".to_string(),
                },
            );
            return;
        };

        // Last reconnect wins: displace a connection still holding the seat.
        let old_conn = self.players[idx].conn_id.clone();
        if self.players[idx].connected && old_conn != conn_id {
            self.send_to(
                tx,
                &old_conn,
                ServerMsg::SessionClosed {
                    message: "Reconnected from another connection".to_string(),
                },
            );
        }
        registry.unbind_player(&old_conn);
        registry.bind_player(&conn_id, &self.code);

        self.players[idx].conn_id = conn_id.clone();
        self.players[idx].connected = true;

        let snapshot = self.reconnect_snapshot(idx);
        self.send_to(tx, &conn_id, ServerMsg::Reconnected(snapshot));
        self.to_host(
            tx,
            ServerMsg::RosterChanged {
                players: self.public_roster(),
            },
        );

        tracing::info!("Player rejoined room {}", self.code);
    }

    fn reconnect_snapshot(&self, idx: usize) -> ReconnectSnapshot {
        let p = &self.players[idx];
        let in_question = self.phase == Phase::Question;
        ReconnectSnapshot {
            room_code: self.code.clone(),
            name: p.name.clone(),
            score: p.score,
            token: p.token.clone(),
            phase: self.phase,
            question: in_question.then(|| self.player_question()),
            time_remaining: in_question.then_some(self.time_remaining),
            already_answered: p.answer.is_some(),
            feedback: matches!(self.phase, Phase::Reveal | Phase::Leaderboard)
                .then(|| p.last_feedback.clone())
                .flatten(),
            final_result: p.final_result.clone(),
        }
    }

    // ─── Phase transitions ────────────────────────────────────────────

    pub fn start_game(&mut self, tx: &broadcast::Sender<Outbound>, conn_id: &str) {
        if conn_id != self.host_id
            || self.phase != Phase::Lobby
            || self.players.is_empty()
            || self.questions.is_empty()
        {
            return;
        }
        self.current = 0;
        self.start_question(tx);
    }

    /// Host-driven advance. In `question` this ends the round early; in
    /// `reveal` it shows the leaderboard; in `leaderboard` it moves to the
    /// next question or finishes. Anything else is a stale message.
    pub fn advance(&mut self, tx: &broadcast::Sender<Outbound>, conn_id: &str) {
        if conn_id != self.host_id {
            return;
        }
        match self.phase {
            Phase::Question => self.end_question(tx),
            Phase::Reveal => self.show_leaderboard(tx),
            Phase::Leaderboard => self.next_or_finish(tx),
            Phase::Lobby | Phase::Finished => {}
        }
    }

    fn start_question(&mut self, tx: &broadcast::Sender<Outbound>) {
        self.phase = Phase::Question;
        self.time_remaining = QUESTION_SECONDS;
        self.question_started = Instant::now();
        for p in &mut self.players {
            p.answer = None;
        }

        let q = &self.questions[self.current];
        let host_payload = ServerMsg::HostQuestion(QuestionForHost {
            question: q.question.clone(),
            answers: q.answers.clone(),
            question_number: self.current + 1,
            total_questions: self.questions.len(),
        });
        self.to_host(tx, host_payload);
        self.to_host(tx, ServerMsg::RoomState(self.state_snapshot()));
        self.broadcast_players(tx, ServerMsg::PlayerQuestion(self.player_question()));

        self.spawn_ticker();
    }

    pub fn submit_answer(
        &mut self,
        tx: &broadcast::Sender<Outbound>,
        conn_id: &str,
        answer: AnswerKey,
    ) {
        if self.phase != Phase::Question {
            return;
        }
        let Some(player) = self.players.iter_mut().find(|p| p.conn_id == conn_id) else {
            return;
        };
        // First answer wins; repeats are silently dropped.
        if player.answer.is_some() {
            return;
        }
        player.answer = Some((answer, Instant::now()));

        self.to_host(
            tx,
            ServerMsg::HostTick {
                time_remaining: self.time_remaining,
                answered_count: self.answered_count(),
            },
        );

        if self.all_answered() {
            self.end_question(tx);
        }
    }

    fn end_question(&mut self, tx: &broadcast::Sender<Outbound>) {
        self.cancel_countdown();
        self.phase = Phase::Reveal;
        self.time_remaining = 0;

        let q = self.questions[self.current].clone();
        let limit = Duration::from_secs(QUESTION_SECONDS);

        // Single pass: tally the distribution and apply scores.
        let mut distribution = AnswerTally::default();
        let mut earned = Vec::with_capacity(self.players.len());
        for p in &mut self.players {
            if let Some((key, _)) = p.answer {
                distribution.record(key);
            }
            let pts = match p.answer {
                Some((key, at)) => scoring::points(
                    Some(key),
                    q.correct,
                    at.saturating_duration_since(self.question_started),
                    limit,
                ),
                None => 0,
            };
            p.score += pts;
            earned.push(pts);
        }

        self.to_host(
            tx,
            ServerMsg::Reveal(RevealData {
                correct_answer: q.correct,
                explanation: q.explanation.clone(),
                distribution,
                question_text: q.question.clone(),
                answers: q.answers.clone(),
            }),
        );

        let total_players = self.players.len();
        let feedback: Vec<(usize, AnswerFeedback)> = self
            .standings()
            .iter()
            .enumerate()
            .map(|(pos, &i)| {
                let p = &self.players[i];
                (
                    i,
                    AnswerFeedback {
                        correct: matches!(p.answer, Some((key, _)) if key == q.correct),
                        points_earned: earned[i],
                        total_score: p.score,
                        rank: pos + 1,
                        total_players,
                        correct_answer: q.correct,
                    },
                )
            })
            .collect();

        for (i, fb) in feedback {
            if self.players[i].connected {
                let conn = self.players[i].conn_id.clone();
                self.send_to(tx, &conn, ServerMsg::Feedback(fb.clone()));
            }
            self.players[i].last_feedback = Some(fb);
        }
    }

    fn show_leaderboard(&mut self, tx: &broadcast::Sender<Outbound>) {
        self.phase = Phase::Leaderboard;
        self.to_host(
            tx,
            ServerMsg::Leaderboard {
                entries: self.leaderboard_entries(),
            },
        );
        // Players already hold their feedback; they only need the phase.
        self.broadcast_players(
            tx,
            ServerMsg::PhaseChanged {
                phase: Phase::Leaderboard,
            },
        );
    }

    fn next_or_finish(&mut self, tx: &broadcast::Sender<Outbound>) {
        if self.current + 1 >= self.questions.len() {
            self.finish(tx);
        } else {
            self.current += 1;
            self.start_question(tx);
        }
    }

    fn finish(&mut self, tx: &broadcast::Sender<Outbound>) {
        self.phase = Phase::Finished;
        self.to_host(
            tx,
            ServerMsg::HostFinished {
                entries: self.leaderboard_entries(),
            },
        );

        let total_players = self.players.len();
        let standings: Vec<(usize, FinalStanding)> = self
            .standings()
            .iter()
            .enumerate()
            .map(|(pos, &i)| {
                (
                    i,
                    FinalStanding {
                        rank: pos + 1,
                        score: self.players[i].score,
                        total_players,
                    },
                )
            })
            .collect();

        for (i, standing) in standings {
            if self.players[i].connected {
                let conn = self.players[i].conn_id.clone();
                self.send_to(tx, &conn, ServerMsg::PlayerFinished(standing.clone()));
            }
            self.players[i].final_result = Some(standing);
        }

        tracing::info!("Room {} finished", self.code);
    }

    pub fn state_request(&self, tx: &broadcast::Sender<Outbound>, conn_id: &str) {
        if conn_id != self.host_id {
            return;
        }
        self.send_to(tx, conn_id, ServerMsg::RoomState(self.state_snapshot()));
    }

    /// Fatal teardown on host disconnect: stop the countdown, tell every
    /// player, and drop the room from the registry.
    pub fn teardown(&mut self, tx: &broadcast::Sender<Outbound>, registry: &Registry) {
        self.cancel_countdown();
        self.broadcast_players(
            tx,
            ServerMsg::SessionClosed {
                message: "Host disconnected".to_string(),
            },
        );
        registry.remove_room(&self.code);
        tracing::info!("Room {} destroyed (host disconnected)", self.code);
    }
}

/// Create a new room and spawn its task. Returns the room handle.
pub fn create_room(
    registry: &Arc<Registry>,
    host_conn_id: String,
    questions: Vec<Question>,
) -> RoomHandle {
    let code = registry.allocate_code();

    let (cmd_tx, cmd_rx) = mpsc::channel(256);
    let (event_tx, _) = broadcast::channel(256);

    let handle = RoomHandle {
        room_code: code.clone(),
        cmd_tx: cmd_tx.clone(),
        event_tx: event_tx.clone(),
    };

    registry.rooms.insert(code.clone(), handle.clone());
    registry
        .host_conns
        .insert(host_conn_id.clone(), code.clone());

    let room = Room::new(code.clone(), host_conn_id, questions, cmd_tx);
    tokio::spawn(room_task(room, cmd_rx, event_tx, registry.clone()));

    tracing::info!("Room created: {}", code);

    handle
}

pub async fn room_task(
    mut room: Room,
    mut cmd_rx: mpsc::Receiver<RoomCommand>,
    event_tx: broadcast::Sender<Outbound>,
    registry: Arc<Registry>,
) {
    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            RoomCommand::Join { conn_id, name } => {
                if let Err(err) = room.join(&event_tx, &registry, conn_id.clone(), name) {
                    room.send_to(
                        &event_tx,
                        &conn_id,
                        ServerMsg::Error {
                            message: err.to_string(),
                        },
                    );
                }
            }
            RoomCommand::Rejoin {
                conn_id,
                token,
                name,
            } => {
                room.rejoin(&event_tx, &registry, conn_id, token, name);
            }
            RoomCommand::StartGame { conn_id } => {
                room.start_game(&event_tx, &conn_id);
            }
            RoomCommand::AdvancePhase { conn_id } => {
                room.advance(&event_tx, &conn_id);
            }
            RoomCommand::SubmitAnswer { conn_id, answer } => {
                room.submit_answer(&event_tx, &conn_id, answer);
            }
            RoomCommand::StateRequest { conn_id } => {
                room.state_request(&event_tx, &conn_id);
            }
            RoomCommand::Tick { epoch } => {
                room.tick(&event_tx, epoch);
            }
            RoomCommand::PlayerDisconnect { conn_id } => {
                room.player_disconnect(&event_tx, &registry, &conn_id);
            }
            RoomCommand::HostDisconnect { conn_id } => {
                if conn_id == room.host_id {
                    room.teardown(&event_tx, &registry);
                    break;
                }
            }
        }
    }

    // Channel closed or torn down. Release the timer before the registry
    // entry so no recurring callback outlives the room.
    room.cancel_countdown();
    registry.remove_room(&room.code);
    tracing::info!("Room {} task ended", room.code);
}
