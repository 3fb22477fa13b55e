use std::fs;
use std::path::{Path, PathBuf};

use crate::types::QuizData;

/// Resolves a path relative to the config directory.
fn config_path(sub: &str) -> PathBuf {
    let base = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config".to_string());
    Path::new(&base).join(sub)
}

/// Initialize the config directory with a default quiz if missing.
pub fn init() {
    let base = config_path("");
    if !base.exists() {
        fs::create_dir_all(&base).expect("Failed to create config directory");
    }

    let quiz_path = config_path("questions.json");
    if !quiz_path.exists() {
        let example = serde_json::json!({
            "title": "Example Quiz",
            "questions": [
                {
                    "id": 1,
                    "question": "Which option is correct?",
                    "answers": { "a": "No", "b": "Yes", "c": "No", "d": "No" },
                    "correct": "b",
                    "explanation": "The second option was the correct one."
                }
            ]
        });
        fs::write(
            &quiz_path,
            serde_json::to_string_pretty(&example).unwrap(),
        )
        .expect("Failed to write default questions.json");
        tracing::info!("Wrote default quiz to {}", quiz_path.display());
    }
}

/// Load the quiz every room is created from.
pub fn load_quiz() -> QuizData {
    let path = config_path("questions.json");
    let data = fs::read_to_string(&path).expect("Failed to read questions.json");
    parse_quiz(&data)
}

/// A quiz with no questions would leave every room unable to start, so it
/// is rejected at bootstrap rather than discovered per-room.
fn parse_quiz(data: &str) -> QuizData {
    let quiz: QuizData = serde_json::from_str(data).expect("Failed to parse questions.json");
    assert!(
        !quiz.questions.is_empty(),
        "questions.json must contain at least one question"
    );
    quiz
}
