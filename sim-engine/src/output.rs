//! Output recorder (spec §3 "SimulationOutput", §4.8 `on_payload`, §6
//! "Output artifact"). Per-application e2e delay log and duplicate counter.
//! Converting this into a compressed on-disk artifact / numpy-style arrays
//! is the batch-orchestration collaborator's job (spec §1 Non-goals); this
//! module only owns the in-memory accumulation and the thin interface
//! boundary described in spec §6.

use std::collections::HashMap;
use std::hash::Hash;

use serde::Serialize;

use crate::time::SimTime;

/// One `(sim_time, e2e_delay)` entry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DelayEntry {
    pub time: SimTime,
    pub delay_ms: u64,
}

#[derive(Default)]
struct AppLog {
    e2e_delays: Vec<DelayEntry>,
    e2e_delays_online_only: Vec<DelayEntry>,
    already_seen: u64,
}

/// Per-application mapping from application to its ordered delay log, plus
/// the online-only sublist and a duplicate-delivery counter.
pub struct SimulationOutput<A> {
    logs: HashMap<A, AppLog>,
}

impl<A: Eq + Hash + Clone> Default for SimulationOutput<A> {
    fn default() -> Self {
        Self {
            logs: HashMap::new(),
        }
    }
}

impl<A: Eq + Hash + Clone> SimulationOutput<A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a first-time delivery. `delay_ms` must be `>= 0` by
    /// construction (it is always `now - created_at` with `now >=
    /// created_at`, spec §8 property 4).
    pub fn log_e2e_delay(&mut self, app: A, now: SimTime, delay_ms: u64, delivered_online: bool) {
        let log = self.logs.entry(app).or_default();
        log.e2e_delays.push(DelayEntry {
            time: now,
            delay_ms,
        });
        if delivered_online {
            log.e2e_delays_online_only.push(DelayEntry {
                time: now,
                delay_ms,
            });
        }
    }

    pub fn log_already_seen(&mut self, app: A) {
        self.logs.entry(app).or_default().already_seen += 1;
    }

    pub fn e2e_delays(&self, app: &A) -> &[DelayEntry] {
        self.logs
            .get(app)
            .map(|l| l.e2e_delays.as_slice())
            .unwrap_or(&[])
    }

    pub fn e2e_delays_online_only(&self, app: &A) -> &[DelayEntry] {
        self.logs
            .get(app)
            .map(|l| l.e2e_delays_online_only.as_slice())
            .unwrap_or(&[])
    }

    pub fn already_seen(&self, app: &A) -> u64 {
        self.logs.get(app).map(|l| l.already_seen).unwrap_or(0)
    }

    pub fn applications(&self) -> impl Iterator<Item = &A> {
        self.logs.keys()
    }
}

/// The external output artifact shape from spec §6: scalar `sim_time_ms`,
/// parallel `t`/`delay` arrays for both the full and online-only e2e logs,
/// and the summed duplicate count across every application.
#[derive(Debug, Serialize)]
pub struct OutputArtifact {
    pub sim_time_ms: u64,
    pub e2e_entries_t: Vec<u64>,
    pub e2e_entries_d: Vec<u64>,
    pub e2e_entries_online_t: Vec<u64>,
    pub e2e_entries_online_d: Vec<u64>,
    pub already_seen: u64,
}

impl OutputArtifact {
    pub fn from_output<A: Eq + Hash + Clone>(output: &SimulationOutput<A>, sim_time_ms: u64) -> Self {
        let mut e2e_entries_t = Vec::new();
        let mut e2e_entries_d = Vec::new();
        let mut e2e_entries_online_t = Vec::new();
        let mut e2e_entries_online_d = Vec::new();
        let mut already_seen = 0u64;

        for app in output.applications() {
            for entry in output.e2e_delays(app) {
                e2e_entries_t.push(entry.time.millis());
                e2e_entries_d.push(entry.delay_ms);
            }
            for entry in output.e2e_delays_online_only(app) {
                e2e_entries_online_t.push(entry.time.millis());
                e2e_entries_online_d.push(entry.delay_ms);
            }
            already_seen += output.already_seen(app);
        }

        Self {
            sim_time_ms,
            e2e_entries_t,
            e2e_entries_d,
            e2e_entries_online_t,
            e2e_entries_online_d,
            already_seen,
        }
    }

    /// Thin ambient-persistence helper (spec §6), mirroring the teacher's
    /// `NaiveSubscriber`/`write_json_record` plain-JSON sink without
    /// reimplementing its streaming/subscriber machinery.
    pub fn write_json<W: std::io::Write>(&self, writer: W) -> serde_json::Result<()> {
        serde_json::to_writer(writer, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_delivery_logs_once_then_counts_duplicates() {
        let mut output: SimulationOutput<&str> = SimulationOutput::new();
        output.log_e2e_delay("app", SimTime(100), 50, true);
        output.log_already_seen("app");
        output.log_already_seen("app");

        assert_eq!(output.e2e_delays(&"app").len(), 1);
        assert_eq!(output.e2e_delays_online_only(&"app").len(), 1);
        assert_eq!(output.already_seen(&"app"), 2);
    }

    #[test]
    fn offline_delivery_is_excluded_from_online_only_sublist() {
        let mut output: SimulationOutput<&str> = SimulationOutput::new();
        output.log_e2e_delay("app", SimTime(10), 5, false);
        assert_eq!(output.e2e_delays(&"app").len(), 1);
        assert!(output.e2e_delays_online_only(&"app").is_empty());
    }

    #[test]
    fn artifact_aggregates_across_applications() {
        let mut output: SimulationOutput<&str> = SimulationOutput::new();
        output.log_e2e_delay("a", SimTime(1), 1, true);
        output.log_e2e_delay("b", SimTime(2), 2, false);
        output.log_already_seen("a");

        let artifact = OutputArtifact::from_output(&output, 1_000);
        assert_eq!(artifact.sim_time_ms, 1_000);
        assert_eq!(artifact.e2e_entries_t.len(), 2);
        assert_eq!(artifact.e2e_entries_online_t.len(), 1);
        assert_eq!(artifact.already_seen, 1);
    }
}
