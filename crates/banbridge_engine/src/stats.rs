//! Per-subject statistic deltas.
//!
//! Observations are added to atomic counters and periodically drained into a
//! [`StatsBatchRequest`]. A batch that fails to send is handed back through
//! [`StatsAccumulator::requeue`] so the next flush carries it.

use banbridge_protocol::{PlayerDelta, StatsBatchRequest};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Name reported for subjects whose display name was never seen.
pub const UNKNOWN_NAME: &str = "Unknown";

#[derive(Debug, Default)]
struct SubjectCounters {
    playtime_seconds: AtomicU64,
    kills: AtomicU64,
    deaths: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
enum Counter {
    Playtime,
    Kills,
    Deaths,
}

impl SubjectCounters {
    fn get(&self, counter: Counter) -> &AtomicU64 {
        match counter {
            Counter::Playtime => &self.playtime_seconds,
            Counter::Kills => &self.kills,
            Counter::Deaths => &self.deaths,
        }
    }
}

/// Concurrent accumulator of playtime, kill and death deltas.
///
/// Counters are reset with an atomic swap, so an increment racing a drain
/// lands in exactly one batch.
#[derive(Debug, Default)]
pub struct StatsAccumulator {
    counters: RwLock<HashMap<String, Arc<SubjectCounters>>>,
    names: RwLock<HashMap<String, String>>,
}

impl StatsAccumulator {
    /// Creates an empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remembers the display name of a subject that joined.
    pub fn mark_online(&self, subject_id: &str, name: &str) {
        self.remember_name(subject_id, Some(name));
    }

    /// Called when a subject leaves. Counters stay until the next drain.
    pub fn mark_offline(&self, _subject_id: &str) {}

    /// Adds playtime seconds. Zero is ignored.
    pub fn record_playtime(&self, subject_id: &str, name: Option<&str>, seconds: u64) {
        self.add(subject_id, name, Counter::Playtime, seconds);
    }

    /// Adds kills. Zero is ignored.
    pub fn record_kill(&self, subject_id: &str, name: Option<&str>, n: u64) {
        self.add(subject_id, name, Counter::Kills, n);
    }

    /// Adds deaths. Zero is ignored.
    pub fn record_death(&self, subject_id: &str, name: Option<&str>, n: u64) {
        self.add(subject_id, name, Counter::Deaths, n);
    }

    /// Last non-empty name recorded for `subject_id`, or [`UNKNOWN_NAME`].
    pub fn last_known_name(&self, subject_id: &str) -> String {
        self.names
            .read()
            .get(subject_id)
            .cloned()
            .unwrap_or_else(|| UNKNOWN_NAME.to_string())
    }

    /// Reads and resets every counter, returning the non-zero deltas.
    pub fn drain_batch(&self) -> StatsBatchRequest {
        let subjects: Vec<(String, Arc<SubjectCounters>)> = self
            .counters
            .read()
            .iter()
            .map(|(subject, counters)| (subject.clone(), Arc::clone(counters)))
            .collect();

        let mut players = Vec::new();
        for (subject_id, counters) in subjects {
            let playtime_delta_seconds = counters.playtime_seconds.swap(0, Ordering::AcqRel);
            let kills_delta = counters.kills.swap(0, Ordering::AcqRel);
            let deaths_delta = counters.deaths.swap(0, Ordering::AcqRel);

            if playtime_delta_seconds == 0 && kills_delta == 0 && deaths_delta == 0 {
                continue;
            }

            let name = self.last_known_name(&subject_id);
            players.push(PlayerDelta {
                subject_id,
                name,
                playtime_delta_seconds,
                kills_delta,
                deaths_delta,
            });
        }

        players.sort_by(|a, b| a.subject_id.cmp(&b.subject_id));
        StatsBatchRequest { players }
    }

    /// Adds a drained batch back onto the live counters.
    ///
    /// A batch name only fills in a missing name; it never replaces one
    /// recorded after the drain.
    pub fn requeue(&self, batch: StatsBatchRequest) {
        for delta in batch.players {
            let name = self.requeue_name(&delta);
            let name = name.as_deref();
            self.record_playtime(&delta.subject_id, name, delta.playtime_delta_seconds);
            self.record_kill(&delta.subject_id, name, delta.kills_delta);
            self.record_death(&delta.subject_id, name, delta.deaths_delta);
        }
    }

    fn requeue_name(&self, delta: &PlayerDelta) -> Option<String> {
        if delta.name == UNKNOWN_NAME || self.names.read().contains_key(&delta.subject_id) {
            None
        } else {
            Some(delta.name.clone())
        }
    }

    fn add(&self, subject_id: &str, name: Option<&str>, counter: Counter, delta: u64) {
        let subject_id = subject_id.trim();
        if subject_id.is_empty() || delta == 0 {
            return;
        }
        self.remember_name(subject_id, name);

        let existing = self.counters.read().get(subject_id).cloned();
        let counters = match existing {
            Some(counters) => counters,
            None => Arc::clone(
                self.counters
                    .write()
                    .entry(subject_id.to_string())
                    .or_default(),
            ),
        };
        counters.get(counter).fetch_add(delta, Ordering::AcqRel);
    }

    fn remember_name(&self, subject_id: &str, name: Option<&str>) {
        let subject_id = subject_id.trim();
        let Some(name) = name.map(str::trim).filter(|n| !n.is_empty()) else {
            return;
        };
        if subject_id.is_empty() {
            return;
        }
        let mut names = self.names.write();
        if names.get(subject_id).map(String::as_str) != Some(name) {
            names.insert(subject_id.to_string(), name.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn totals(batch: &StatsBatchRequest) -> (u64, u64, u64) {
        batch.players.iter().fold((0, 0, 0), |(p, k, d), delta| {
            (
                p + delta.playtime_delta_seconds,
                k + delta.kills_delta,
                d + delta.deaths_delta,
            )
        })
    }

    #[test]
    fn records_and_drains() {
        let stats = StatsAccumulator::new();
        stats.record_playtime("P1", Some("Steve"), 60);
        stats.record_playtime("P1", None, 60);
        stats.record_kill("P1", None, 2);
        stats.record_death("P2", Some("Alex"), 1);

        let batch = stats.drain_batch();
        assert_eq!(
            batch.players,
            vec![
                PlayerDelta {
                    subject_id: "P1".into(),
                    name: "Steve".into(),
                    playtime_delta_seconds: 120,
                    kills_delta: 2,
                    deaths_delta: 0,
                },
                PlayerDelta {
                    subject_id: "P2".into(),
                    name: "Alex".into(),
                    playtime_delta_seconds: 0,
                    kills_delta: 0,
                    deaths_delta: 1,
                },
            ]
        );
    }

    #[test]
    fn second_drain_is_empty() {
        let stats = StatsAccumulator::new();
        stats.record_kill("P1", Some("Steve"), 1);
        assert_eq!(stats.drain_batch().len(), 1);
        assert!(stats.drain_batch().is_empty());
    }

    #[test]
    fn zero_deltas_and_blank_subjects_are_ignored() {
        let stats = StatsAccumulator::new();
        stats.record_playtime("P1", Some("Steve"), 0);
        stats.record_kill("", Some("Nobody"), 3);
        stats.record_death("   ", None, 1);
        assert!(stats.drain_batch().is_empty());
        assert_eq!(stats.last_known_name(""), UNKNOWN_NAME);
    }

    #[test]
    fn unknown_name_placeholder() {
        let stats = StatsAccumulator::new();
        stats.record_death("P9", Some("   "), 1);
        let batch = stats.drain_batch();
        assert_eq!(batch.players[0].name, UNKNOWN_NAME);
    }

    #[test]
    fn latest_name_wins() {
        let stats = StatsAccumulator::new();
        stats.mark_online("P1", "Steve");
        stats.record_kill("P1", Some(" Steve2 "), 1);
        assert_eq!(stats.last_known_name("P1"), "Steve2");

        stats.mark_offline("P1");
        assert_eq!(stats.drain_batch().players[0].name, "Steve2");
    }

    #[test]
    fn requeue_is_additive() {
        let stats = StatsAccumulator::new();
        stats.record_playtime("P1", Some("Steve"), 60);
        stats.record_kill("P1", None, 1);

        let failed = stats.drain_batch();
        stats.requeue(failed);
        stats.record_playtime("P1", None, 30);

        let batch = stats.drain_batch();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.players[0].playtime_delta_seconds, 90);
        assert_eq!(batch.players[0].kills_delta, 1);
    }

    #[test]
    fn requeue_keeps_newer_name() {
        let stats = StatsAccumulator::new();
        stats.record_kill("P1", Some("Old"), 1);
        let failed = stats.drain_batch();
        stats.mark_online("P1", "New");

        stats.requeue(failed);
        assert_eq!(stats.last_known_name("P1"), "New");
    }

    #[test]
    fn requeue_restores_name_into_fresh_accumulator() {
        let stats = StatsAccumulator::new();
        stats.requeue(StatsBatchRequest {
            players: vec![PlayerDelta {
                subject_id: "P1".into(),
                name: "Steve".into(),
                playtime_delta_seconds: 0,
                kills_delta: 0,
                deaths_delta: 2,
            }],
        });
        let batch = stats.drain_batch();
        assert_eq!(batch.players[0].name, "Steve");
        assert_eq!(batch.players[0].deaths_delta, 2);
    }

    #[test]
    fn concurrent_records_survive_concurrent_drains() {
        const THREADS: u64 = 8;
        const PER_THREAD: u64 = 2_000;

        let stats = Arc::new(StatsAccumulator::new());
        let writers: Vec<_> = (0..THREADS)
            .map(|t| {
                let stats = Arc::clone(&stats);
                thread::spawn(move || {
                    let subject = format!("P{}", t % 3);
                    for _ in 0..PER_THREAD {
                        stats.record_playtime(&subject, Some("x"), 1);
                        stats.record_kill(&subject, None, 1);
                    }
                })
            })
            .collect();

        let drainer = {
            let stats = Arc::clone(&stats);
            thread::spawn(move || {
                let mut sum = (0, 0, 0);
                for _ in 0..200 {
                    let (p, k, d) = totals(&stats.drain_batch());
                    sum = (sum.0 + p, sum.1 + k, sum.2 + d);
                    thread::yield_now();
                }
                sum
            })
        };

        for writer in writers {
            writer.join().unwrap();
        }
        let drained = drainer.join().unwrap();
        let (p, k, d) = totals(&stats.drain_batch());

        assert_eq!(drained.0 + p, THREADS * PER_THREAD);
        assert_eq!(drained.1 + k, THREADS * PER_THREAD);
        assert_eq!(drained.2 + d, 0);
    }
}
