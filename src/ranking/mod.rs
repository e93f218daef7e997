// src/ranking/mod.rs
// Epsilon-greedy tool ranking over recorded usage

use crate::db::{Database, UsageEvent};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;

pub const DEFAULT_EPSILON: f64 = 0.1;

/// Scoring window over the tool's history.
const WINDOW_SECS: i64 = 7 * 86_400;
/// Recency half-life: one day.
const HALF_LIFE_HOURS: f64 = 24.0;
/// Usage count at which frequency saturates.
const FREQUENCY_SATURATION: f64 = 100.0;

const WEIGHT_FREQUENCY: f64 = 0.6;
const WEIGHT_RECENCY: f64 = 0.3;
const WEIGHT_RATING: f64 = 0.1;

/// Rating of unrated tools: dead neutral.
const NEUTRAL_RATING: f64 = 0.5;

/// The bandit: exploits high-scoring tools with probability 1 - epsilon,
/// explores uniformly otherwise. Owns its RNG; the process-global RNG is
/// never touched.
pub struct ToolRanker {
    epsilon: f64,
    rng: Mutex<StdRng>,
}

impl ToolRanker {
    pub fn new(epsilon: f64) -> Self {
        Self {
            epsilon,
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Deterministic construction for reproducible tests.
    pub fn with_seed(epsilon: f64, seed: u64) -> Self {
        Self {
            epsilon,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Order `candidates` best-first. Exploration shuffles; exploitation
    /// sorts by descending score with deterministic name tie-breaks.
    pub fn rank(&self, candidates: &[String], db: &Database) -> Vec<String> {
        match candidates.len() {
            0 => return Vec::new(),
            1 => return vec![candidates[0].clone()],
            _ => {}
        }

        if self.explore() {
            let mut shuffled: Vec<String> = candidates.to_vec();
            let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
            shuffled.shuffle(&mut *rng);
            return shuffled;
        }

        let now = chrono::Utc::now().timestamp();
        let mut scored: Vec<(String, f64)> = candidates
            .iter()
            .map(|name| {
                let events = db.events_for_tool_since(name, now - WINDOW_SECS);
                (name.clone(), score_events(&events, now))
            })
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.into_iter().map(|(name, _)| name).collect()
    }

    /// Pick a single candidate: the head of `rank`.
    pub fn select(&self, candidates: &[String], db: &Database) -> Option<String> {
        self.rank(candidates, db).into_iter().next()
    }

    fn explore(&self) -> bool {
        if self.epsilon <= 0.0 {
            return false;
        }
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        rng.random::<f64>() < self.epsilon
    }
}

/// Frequency/recency/rating score for one tool's windowed history.
pub fn score_events(events: &[UsageEvent], now: i64) -> f64 {
    let frequency = (events.len() as f64 / FREQUENCY_SATURATION).min(1.0);

    let recency = if events.is_empty() {
        0.0
    } else {
        let sum: f64 = events
            .iter()
            .map(|e| {
                let hours_since = (now - e.timestamp).max(0) as f64 / 3600.0;
                (-std::f64::consts::LN_2 * hours_since / HALF_LIFE_HOURS).exp()
            })
            .sum();
        sum / events.len() as f64
    };

    let rated: Vec<f64> = events
        .iter()
        .filter(|e| e.rating > 0)
        .map(|e| f64::from(e.rating))
        .collect();
    let rating = if rated.is_empty() {
        NEUTRAL_RATING
    } else {
        rated.iter().sum::<f64>() / rated.len() as f64 / 5.0
    };

    WEIGHT_FREQUENCY * frequency + WEIGHT_RECENCY * recency + WEIGHT_RATING * rating
}
