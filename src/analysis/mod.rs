//! Scoring and fleet-wide aggregation of completed runs.

pub mod aggregator;
pub mod score;

pub use aggregator::{Aggregate, DuplicateGroup, OldestInstance, ScoringAggregator, ServiceTally};
pub use score::{calculate_score, Rating, Scorecard, OFFLINE_SCORE};
