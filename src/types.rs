use serde::{Deserialize, Serialize};

/// One of the four labeled answer options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerKey {
    A,
    B,
    C,
    D,
}

/// The four option texts of a question, keyed a..d.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerOptions {
    pub a: String,
    pub b: String,
    pub c: String,
    pub d: String,
}

/// How many players picked each option, computed at reveal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnswerTally {
    pub a: u32,
    pub b: u32,
    pub c: u32,
    pub d: u32,
}

impl AnswerTally {
    pub fn record(&mut self, key: AnswerKey) {
        match key {
            AnswerKey::A => self.a += 1,
            AnswerKey::B => self.b += 1,
            AnswerKey::C => self.c += 1,
            AnswerKey::D => self.d += 1,
        }
    }
}

/// A single question. Loaded once at startup, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: u32,
    pub question: String,
    pub answers: AnswerOptions,
    pub correct: AnswerKey,
    pub explanation: String,
}

/// The quiz definition loaded from config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizData {
    pub title: String,
    pub questions: Vec<Question>,
}

/// Session lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Lobby,
    Question,
    Reveal,
    Leaderboard,
    Finished,
}

/// Roster projection sent to the host. Never carries answer state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerPublic {
    pub id: String,
    pub name: String,
    pub score: u32,
}

/// Question payload for the host screen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionForHost {
    pub question: String,
    pub answers: AnswerOptions,
    pub question_number: usize,
    pub total_questions: usize,
}

/// Question payload for player devices. Never includes the answer key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionForPlayer {
    pub question: String,
    pub answers: AnswerOptions,
    pub question_number: usize,
    pub total_questions: usize,
    pub time_limit: u64,
}

/// Reveal payload for the host screen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevealData {
    pub correct_answer: AnswerKey,
    pub explanation: String,
    pub distribution: AnswerTally,
    pub question_text: String,
    pub answers: AnswerOptions,
}

/// Per-player round feedback, unicast at reveal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerFeedback {
    pub correct: bool,
    pub points_earned: u32,
    pub total_score: u32,
    pub rank: usize,
    pub total_players: usize,
    pub correct_answer: AnswerKey,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub name: String,
    pub score: u32,
    pub rank: usize,
}

/// A player's final placement, unicast when the game finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalStanding {
    pub rank: usize,
    pub score: u32,
    pub total_players: usize,
}

/// Read-only session snapshot used for host resynchronization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomState {
    pub room_code: String,
    pub phase: Phase,
    pub players: Vec<PlayerPublic>,
    pub current_question_index: usize,
    pub total_questions: usize,
    pub time_remaining: u64,
    pub answered_count: usize,
}

/// State handed to a reconnecting player so it can resume as if it had
/// never dropped. Phase-dependent fields are `None` outside their phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectSnapshot {
    pub room_code: String,
    pub name: String,
    pub score: u32,
    pub token: String,
    pub phase: Phase,
    pub question: Option<QuestionForPlayer>,
    pub time_remaining: Option<u64>,
    pub already_answered: bool,
    pub feedback: Option<AnswerFeedback>,
    pub final_result: Option<FinalStanding>,
}

/// Messages sent from server to clients via WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMsg {
    RoomCreated {
        room_code: String,
    },
    Joined {
        room_code: String,
        name: String,
        token: String,
    },
    RosterChanged {
        players: Vec<PlayerPublic>,
    },
    HostQuestion(QuestionForHost),
    PlayerQuestion(QuestionForPlayer),
    HostTick {
        time_remaining: u64,
        answered_count: usize,
    },
    PlayerTick {
        time_remaining: u64,
    },
    Reveal(RevealData),
    Feedback(AnswerFeedback),
    Leaderboard {
        entries: Vec<LeaderboardEntry>,
    },
    PhaseChanged {
        phase: Phase,
    },
    HostFinished {
        entries: Vec<LeaderboardEntry>,
    },
    PlayerFinished(FinalStanding),
    RoomState(RoomState),
    Reconnected(ReconnectSnapshot),
    SessionClosed {
        message: String,
    },
    Error {
        message: String,
    },
}

/// Messages sent from clients to server via WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMsg {
    // Host actions
    CreateRoom,
    StartGame {
        room_code: String,
    },
    AdvancePhase {
        room_code: String,
    },
    GetState {
        room_code: String,
    },

    // Player actions
    Join {
        room_code: String,
        name: String,
    },
    SubmitAnswer {
        room_code: String,
        answer: AnswerKey,
    },
    Rejoin {
        room_code: String,
        #[serde(default)]
        token: Option<String>,
        #[serde(default)]
        name: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answer_key_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&AnswerKey::C).unwrap(), "\"c\"");
        let key: AnswerKey = serde_json::from_str("\"a\"").unwrap();
        assert_eq!(key, AnswerKey::A);
    }

    #[test]
    fn client_msg_roundtrips_tagged() {
        let raw = r#"{"type":"SubmitAnswer","room_code":"ABC234","answer":"b"}"#;
        let msg: ClientMsg = serde_json::from_str(raw).unwrap();
        match msg {
            ClientMsg::SubmitAnswer { room_code, answer } => {
                assert_eq!(room_code, "ABC234");
                assert_eq!(answer, AnswerKey::B);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn rejoin_token_and_name_are_optional() {
        let raw = r#"{"type":"Rejoin","room_code":"ABC234"}"#;
        let msg: ClientMsg = serde_json::from_str(raw).unwrap();
        match msg {
            ClientMsg::Rejoin { token, name, .. } => {
                assert!(token.is_none());
                assert!(name.is_none());
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn tally_records_per_option() {
        let mut tally = AnswerTally::default();
        tally.record(AnswerKey::B);
        tally.record(AnswerKey::B);
        tally.record(AnswerKey::D);
        assert_eq!((tally.a, tally.b, tally.c, tally.d), (0, 2, 0, 1));
    }
}
