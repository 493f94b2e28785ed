use std::sync::Mutex;


pub const INITIAL_RATING: f64 = 1500.0;

const RATING_K: f64 = 32.0;

// Outcome of a finished game, keyed by the argument order of `post_result`
// (not by game role).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MatchResult {
    Draw,
    FirstWon,
    SecondWon,
}

// A user of the system. The username never changes; the rating evolves with
// each finished game. At most one `Player` per username exists for the process
// lifetime (the player registry owns it until exit).
#[derive(Debug)]
pub struct Player {
    name: String,
    rating: Mutex<f64>,
}

impl Player {
    pub fn new(name: impl Into<String>) -> Self {
        Player {
            name: name.into(),
            rating: Mutex::new(INITIAL_RATING),
        }
    }

    pub fn name(&self) -> &str { &self.name }

    // Best-effort snapshot; a concurrent `post_result` may land before or
    // after it.
    pub fn rating(&self) -> f64 { *self.rating.lock().unwrap() }
}

// Elo update as used by the US Chess Federation: each player scores 0, 0.5
// or 1; expectations E = 1 / (1 + 10^((R_them - R_us) / 400)); ratings move
// by K * (score - expectation). Each rating is adjusted atomically, the pair
// is not.
pub fn post_result(first: &Player, second: &Player, result: MatchResult) {
    let (score1, score2) = match result {
        MatchResult::Draw => (0.5, 0.5),
        MatchResult::FirstWon => (1.0, 0.0),
        MatchResult::SecondWon => (0.0, 1.0),
    };
    let r1 = first.rating();
    let r2 = second.rating();
    let expected1 = 1.0 / (1.0 + 10f64.powf((r2 - r1) / 400.0));
    let expected2 = 1.0 / (1.0 + 10f64.powf((r1 - r2) / 400.0));
    *first.rating.lock().unwrap() += RATING_K * (score1 - expected1);
    *second.rating.lock().unwrap() += RATING_K * (score2 - expected2);
}
