//! Scheduling oracle for the review engine.
//!
//! Pure functions: previous memory state + rating + clock in, next memory
//! state and interval out. Nothing in here touches the store; the review
//! orchestrator owns all writes.

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

const DECAY: f64 = -0.5;
const FACTOR: f64 = 19.0 / 81.0;

const MIN_INTERVAL_DAYS: f64 = 1.0;
const MAX_INTERVAL_DAYS: f64 = 36500.0;

pub const MIN_DIFFICULTY: f64 = 1.0;
pub const MAX_DIFFICULTY: f64 = 10.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerParams {
    pub w: [f64; 17],
    pub desired_retention: f64,
}

impl Default for SchedulerParams {
    fn default() -> Self {
        Self {
            w: [
                0.4, 0.6, 2.4, 5.8, // w0-w3: initial stability per rating
                4.93, 0.94, 0.86, 0.01, 1.49, // w4-w8
                0.14, 0.94, 2.18, 0.05, 0.34, // w9-w13
                1.26, 0.29, 2.61, // w14-w16
            ],
            desired_retention: 0.9,
        }
    }
}

impl SchedulerParams {
    pub fn from_env() -> Self {
        let mut params = Self::default();
        if let Some(value) = std::env::var("DESIRED_RETENTION")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
        {
            if (0.7..=0.99).contains(&value) {
                params.desired_retention = value;
            }
        }
        params
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Rating {
    Again = 1,
    Hard = 2,
    Good = 3,
    Easy = 4,
}

impl Rating {
    pub fn from_value(value: i64) -> Option<Self> {
        match value {
            1 => Some(Self::Again),
            2 => Some(Self::Hard),
            3 => Some(Self::Good),
            4 => Some(Self::Easy),
            _ => None,
        }
    }

    pub fn value(self) -> i64 {
        self as i64
    }
}

/// FSM position of a card. Cards cycle indefinitely; there is no terminal
/// state (suspension is a flag on the record, not a phase).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CardPhase {
    New,
    Learning,
    Review,
    Relearning,
}

impl CardPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Learning => "LEARNING",
            Self::Review => "REVIEW",
            Self::Relearning => "RELEARNING",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "NEW" => Some(Self::New),
            "LEARNING" => Some(Self::Learning),
            "REVIEW" => Some(Self::Review),
            "RELEARNING" => Some(Self::Relearning),
            _ => None,
        }
    }
}

/// The slice of a card's state the oracle needs.
#[derive(Debug, Clone)]
pub struct MemorySnapshot {
    pub phase: CardPhase,
    pub stability: f64,
    pub difficulty: f64,
    pub last_review: Option<NaiveDateTime>,
}

#[derive(Debug, Clone)]
pub struct ScheduleOutput {
    pub phase: CardPhase,
    pub stability: f64,
    pub difficulty: f64,
    pub due: NaiveDateTime,
    pub scheduled_days: f64,
    pub elapsed_days: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewIntervals {
    pub again: f64,
    pub hard: f64,
    pub good: f64,
    pub easy: f64,
}

/// One FSM step: next phase, next memory parameters, next due date.
pub fn schedule(
    params: &SchedulerParams,
    prev: &MemorySnapshot,
    rating: Rating,
    now: NaiveDateTime,
) -> ScheduleOutput {
    let elapsed_days = elapsed_days_since(prev.last_review, now);
    let (stability, difficulty) = next_memory_state(params, prev, rating, elapsed_days);
    let phase = next_phase(prev.phase, rating);

    let scheduled_days = if phase == CardPhase::Review {
        next_interval(stability, params.desired_retention)
    } else {
        learning_step_days(rating)
    };

    ScheduleOutput {
        phase,
        stability,
        difficulty,
        due: now + days_to_duration(scheduled_days),
        scheduled_days,
        elapsed_days,
    }
}

/// FSM edges. Graduation out of RELEARNING happens on Good or Easy;
/// Again and Hard keep the card in its current sub-day loop.
pub fn next_phase(phase: CardPhase, rating: Rating) -> CardPhase {
    match phase {
        CardPhase::New | CardPhase::Learning => {
            if rating == Rating::Easy {
                CardPhase::Review
            } else {
                CardPhase::Learning
            }
        }
        CardPhase::Review => {
            if rating == Rating::Again {
                CardPhase::Relearning
            } else {
                CardPhase::Review
            }
        }
        CardPhase::Relearning => {
            if rating as i64 >= Rating::Good as i64 {
                CardPhase::Review
            } else {
                CardPhase::Relearning
            }
        }
    }
}

/// Estimated recall probability right now. Never-reviewed cards report 0:
/// there is no memory to decay yet.
pub fn retrievability(prev: &MemorySnapshot, now: NaiveDateTime) -> f64 {
    if prev.last_review.is_none() {
        return 0.0;
    }
    let elapsed = elapsed_days_since(prev.last_review, now);
    forgetting_curve(prev.stability, elapsed)
}

/// Projected next interval (in days) for each possible rating, without
/// committing anything. The `again <= hard <= good <= easy` ordering is an
/// interface guarantee, enforced after the per-rating projections.
pub fn preview_intervals(
    params: &SchedulerParams,
    prev: &MemorySnapshot,
    now: NaiveDateTime,
) -> PreviewIntervals {
    let project = |rating: Rating| schedule(params, prev, rating, now).scheduled_days;

    let again = project(Rating::Again);
    let hard = project(Rating::Hard).max(again);
    let good = project(Rating::Good).max(hard);
    let easy = project(Rating::Easy).max(good);

    PreviewIntervals {
        again,
        hard,
        good,
        easy,
    }
}

fn next_memory_state(
    params: &SchedulerParams,
    prev: &MemorySnapshot,
    rating: Rating,
    elapsed_days: f64,
) -> (f64, f64) {
    let w = &params.w;
    let rating_val = rating as i64;

    if prev.phase == CardPhase::New || prev.stability <= 0.0 {
        return (
            initial_stability(w, rating_val),
            initial_difficulty(w, rating_val),
        );
    }

    let r = forgetting_curve(prev.stability, elapsed_days);
    let difficulty = next_difficulty(w, prev.difficulty, rating_val);
    let stability = if rating == Rating::Again {
        next_forget_stability(w, prev.difficulty, prev.stability, r)
    } else {
        next_recall_stability(w, prev.difficulty, prev.stability, r, rating_val)
    };

    (stability, difficulty)
}

fn forgetting_curve(stability: f64, elapsed_days: f64) -> f64 {
    if stability <= 0.0 {
        return 0.0;
    }
    let safe_elapsed = elapsed_days.max(0.0);
    (1.0 + FACTOR * safe_elapsed / stability).powf(DECAY)
}

fn initial_stability(w: &[f64; 17], rating: i64) -> f64 {
    w[(rating - 1) as usize].max(0.1)
}

fn initial_difficulty(w: &[f64; 17], rating: i64) -> f64 {
    let d = w[4] - (rating - 3) as f64 * w[5];
    d.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY)
}

fn next_difficulty(w: &[f64; 17], d: f64, rating: i64) -> f64 {
    let delta = -(rating - 3) as f64;
    let d_new = d + w[6] * delta;
    let d_mean = w[7] * (w[4] - 3.0 * w[5]) + (1.0 - w[7]) * d_new;
    d_mean.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY)
}

fn next_recall_stability(w: &[f64; 17], d: f64, s: f64, r: f64, rating: i64) -> f64 {
    let hard_penalty = if rating == 2 { w[15] } else { 1.0 };
    let easy_bonus = if rating == 4 { w[16] } else { 1.0 };

    let new_s = s
        * (1.0
            + w[8].exp()
                * (11.0 - d)
                * s.powf(-w[9])
                * ((1.0 - r) * w[10]).exp_m1()
                * hard_penalty
                * easy_bonus);
    new_s.max(0.1)
}

fn next_forget_stability(w: &[f64; 17], d: f64, s: f64, r: f64) -> f64 {
    let new_s =
        w[11] * d.powf(-w[12]) * ((s + 1.0).powf(w[13]) - 1.0) * ((1.0 - r) * w[14]).exp();
    new_s.clamp(0.1, s)
}

fn next_interval(stability: f64, desired_retention: f64) -> f64 {
    let safe_retention = desired_retention.clamp(0.0001, 0.9999);
    let interval = stability / FACTOR * (safe_retention.powf(1.0 / DECAY) - 1.0);
    interval.clamp(MIN_INTERVAL_DAYS, MAX_INTERVAL_DAYS)
}

/// Sub-day steps for cards still in a learning loop, expressed in days.
fn learning_step_days(rating: Rating) -> f64 {
    let minutes = match rating {
        Rating::Again => 1.0,
        Rating::Hard => 5.0,
        Rating::Good => 10.0,
        Rating::Easy => 10.0,
    };
    minutes / (24.0 * 60.0)
}

pub fn elapsed_days_since(last_review: Option<NaiveDateTime>, now: NaiveDateTime) -> f64 {
    match last_review {
        Some(last) => {
            let millis = (now - last).num_milliseconds();
            (millis as f64 / 86_400_000.0).max(0.0)
        }
        None => 0.0,
    }
}

fn days_to_duration(days: f64) -> Duration {
    Duration::milliseconds((days * 86_400_000.0).round() as i64)
}
