use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tracing::{info, warn};

use crate::analysis::score::calculate_score;
use crate::instance::Instance;

/// Pass/total counter for one service across the fleet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ServiceTally {
    pub passed: usize,
    pub total: usize,
}

/// Per-service counters that any task may record into.
#[derive(Debug, Default)]
pub struct TallyBoard {
    tallies: Mutex<BTreeMap<String, ServiceTally>>,
}

impl TallyBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, service: &str, success: bool) {
        let mut tallies = self.tallies.lock().unwrap_or_else(PoisonError::into_inner);
        let tally = tallies.entry(service.to_string()).or_default();
        tally.total += 1;
        if success {
            tally.passed += 1;
        }
    }

    pub fn snapshot(&self) -> BTreeMap<String, ServiceTally> {
        self.tallies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Instances reporting the same non-zero start time, likely one deployment
/// behind several hostnames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateGroup {
    pub start_time: u64,
    pub apis: Vec<String>,
}

/// Longest-running online instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OldestInstance {
    pub api: String,
    pub start_time: u64,
}

/// Fleet-wide view computed once both phases are done.
#[derive(Debug, Clone, Serialize)]
pub struct Aggregate {
    pub tallies: BTreeMap<String, ServiceTally>,
    pub duplicates: Vec<DuplicateGroup>,
    pub oldest: Option<OldestInstance>,
}

/// Scores instances and builds the fleet-wide aggregate.
pub struct ScoringAggregator;

impl ScoringAggregator {
    /// Score every instance, storing the scorecard on it, and tally results.
    pub fn score_all(instances: &[Arc<Instance>]) -> Aggregate {
        let board = TallyBoard::new();
        let mut online = 0usize;

        for instance in instances {
            let card = calculate_score(instance);
            instance.set_scorecard(card);
            if !instance.is_api_healthy() {
                continue;
            }
            online += 1;
            for result in instance.results() {
                board.record(&result.service, result.success);
            }
            info!(
                api = %instance.api(),
                score = card.score,
                passed = card.passed,
                total = card.total,
                "instance scored"
            );
        }

        let duplicates = Self::find_duplicates(instances);
        for group in &duplicates {
            warn!(start_time = group.start_time, apis = ?group.apis, "instances share a start time");
        }

        let oldest = Self::find_oldest(instances);
        if let Some(o) = &oldest {
            info!(api = %o.api, start_time = o.start_time, "longest running instance");
        }

        info!(total = instances.len(), online, "scoring complete");
        Aggregate {
            tallies: board.snapshot(),
            duplicates,
            oldest,
        }
    }

    /// Groups of two or more instances with an identical non-zero start time.
    pub fn find_duplicates(instances: &[Arc<Instance>]) -> Vec<DuplicateGroup> {
        let mut by_start: BTreeMap<u64, Vec<String>> = BTreeMap::new();
        for instance in instances {
            let start_time = instance.probe_state().start_time;
            if start_time != 0 {
                by_start
                    .entry(start_time)
                    .or_default()
                    .push(instance.api().to_string());
            }
        }
        by_start
            .into_iter()
            .filter(|(_, apis)| apis.len() > 1)
            .map(|(start_time, mut apis)| {
                apis.sort();
                DuplicateGroup { start_time, apis }
            })
            .collect()
    }

    fn find_oldest(instances: &[Arc<Instance>]) -> Option<OldestInstance> {
        instances
            .iter()
            .map(|i| (i, i.probe_state()))
            .filter(|(_, state)| state.api_healthy && state.start_time != 0)
            .min_by_key(|(_, state)| state.start_time)
            .map(|(i, state)| OldestInstance {
                api: i.api().to_string(),
                start_time: state.start_time,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::score::Scorecard;
    use crate::instance::{InstanceDescriptor, ProbeState, Protocol, TestResult};

    fn instance(api: &str, healthy: bool, start_time: u64) -> Arc<Instance> {
        let instance = Instance::new(InstanceDescriptor {
            api: api.to_string(),
            front_end: None,
            protocol: Protocol::Https,
        });
        instance.set_probe_state(if healthy {
            ProbeState {
                api_healthy: true,
                start_time,
                ..ProbeState::default()
            }
        } else {
            ProbeState::offline()
        });
        Arc::new(instance)
    }

    #[test]
    fn test_tally_board_concurrent_records() {
        let board = Arc::new(TallyBoard::new());
        let handles: Vec<_> = (0..8)
            .map(|n| {
                let board = Arc::clone(&board);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        board.record("youtube", n % 2 == 0);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let tally = board.snapshot()["youtube"];
        assert_eq!(tally.total, 800);
        assert_eq!(tally.passed, 400);
    }

    #[test]
    fn test_score_all_tallies_online_only() {
        let a = instance("a.com", true, 100);
        a.add_result(TestResult::pass("youtube", "ok"));
        a.add_result(TestResult::fail("vimeo", "no"));
        let b = instance("b.com", true, 200);
        b.add_result(TestResult::pass("youtube", "ok"));
        let c = instance("c.com", false, 0);

        let aggregate = ScoringAggregator::score_all(&[a.clone(), b.clone(), c.clone()]);

        assert_eq!(aggregate.tallies["youtube"], ServiceTally { passed: 2, total: 2 });
        assert_eq!(aggregate.tallies["vimeo"], ServiceTally { passed: 0, total: 1 });
        assert_eq!(a.scorecard().unwrap().score, 50.0);
        assert_eq!(b.scorecard().unwrap().score, 100.0);
        assert_eq!(c.scorecard(), Some(Scorecard::offline()));
        assert_eq!(
            aggregate.oldest,
            Some(OldestInstance {
                api: "a.com".to_string(),
                start_time: 100
            })
        );
    }

    #[test]
    fn test_duplicates_ignore_zero_start_time() {
        let instances = vec![
            instance("b.com", true, 42),
            instance("a.com", true, 42),
            instance("c.com", true, 7),
            instance("d.com", true, 0),
            instance("e.com", true, 0),
        ];
        let groups = ScoringAggregator::find_duplicates(&instances);
        assert_eq!(
            groups,
            vec![DuplicateGroup {
                start_time: 42,
                apis: vec!["a.com".to_string(), "b.com".to_string()],
            }]
        );
    }

    #[test]
    fn test_no_oldest_without_start_times() {
        let aggregate = ScoringAggregator::score_all(&[instance("a.com", true, 0)]);
        assert!(aggregate.oldest.is_none());
        assert!(aggregate.duplicates.is_empty());
    }
}
