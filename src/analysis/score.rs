//! Per-instance score and rating bucket.

use serde::Serialize;

use crate::instance::Instance;

/// Score recorded for instances whose probe failed.
pub const OFFLINE_SCORE: f64 = -1.0;

/// Coarse health bucket derived from a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    Bad,
    Medium,
    Partial,
    Decent,
    Good,
    Working,
}

impl Rating {
    /// Bucket a score in `[0, 100]`. Negative scores have no rating.
    pub fn from_score(score: f64) -> Option<Self> {
        if score < 0.0 {
            return None;
        }
        Some(if score == 0.0 {
            Rating::Bad
        } else if score < 25.0 {
            Rating::Medium
        } else if score < 50.0 {
            Rating::Partial
        } else if score < 75.0 {
            Rating::Decent
        } else if score < 100.0 {
            Rating::Good
        } else {
            Rating::Working
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Scorecard {
    pub score: f64,
    pub rating: Option<Rating>,
    pub passed: usize,
    pub total: usize,
}

impl Scorecard {
    pub fn offline() -> Self {
        Self {
            score: OFFLINE_SCORE,
            rating: None,
            passed: 0,
            total: 0,
        }
    }

    fn from_counts(passed: usize, total: usize) -> Self {
        let score = if total == 0 {
            0.0
        } else {
            100.0 * passed as f64 / total as f64
        };
        Self {
            score,
            rating: Rating::from_score(score),
            passed,
            total,
        }
    }
}

/// Score an instance from its recorded results. The front-end check counts
/// like any other service.
pub fn calculate_score(instance: &Instance) -> Scorecard {
    if !instance.is_api_healthy() {
        return Scorecard::offline();
    }
    let results = instance.results();
    let passed = results.iter().filter(|r| r.success).count();
    Scorecard::from_counts(passed, results.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::{InstanceDescriptor, ProbeState, Protocol, TestResult};

    fn online() -> Instance {
        let instance = Instance::new(InstanceDescriptor {
            api: "api.example.com".to_string(),
            front_end: None,
            protocol: Protocol::Https,
        });
        instance.set_probe_state(ProbeState {
            api_healthy: true,
            ..ProbeState::default()
        });
        instance
    }

    #[test]
    fn test_rating_buckets() {
        assert_eq!(Rating::from_score(0.0), Some(Rating::Bad));
        assert_eq!(Rating::from_score(0.1), Some(Rating::Medium));
        assert_eq!(Rating::from_score(24.99), Some(Rating::Medium));
        assert_eq!(Rating::from_score(25.0), Some(Rating::Partial));
        assert_eq!(Rating::from_score(50.0), Some(Rating::Decent));
        assert_eq!(Rating::from_score(75.0), Some(Rating::Good));
        assert_eq!(Rating::from_score(99.9), Some(Rating::Good));
        assert_eq!(Rating::from_score(100.0), Some(Rating::Working));
        assert_eq!(Rating::from_score(OFFLINE_SCORE), None);
    }

    #[test]
    fn test_score_is_pass_ratio() {
        let instance = online();
        instance.add_result(TestResult::pass("youtube", "ok"));
        instance.add_result(TestResult::pass("vimeo", "ok"));
        instance.add_result(TestResult::pass("frontend", "Working"));
        instance.add_result(TestResult::fail("twitter", "nope"));

        let card = calculate_score(&instance);
        assert_eq!(card.passed, 3);
        assert_eq!(card.total, 4);
        assert_eq!(card.score, 75.0);
        assert_eq!(card.rating, Some(Rating::Good));
    }

    #[test]
    fn test_online_without_results_scores_zero() {
        let card = calculate_score(&online());
        assert_eq!(card.score, 0.0);
        assert_eq!(card.rating, Some(Rating::Bad));
    }

    #[test]
    fn test_offline_gets_sentinel() {
        let instance = online();
        instance.set_probe_state(ProbeState::offline());
        assert_eq!(calculate_score(&instance), Scorecard::offline());
    }
}
