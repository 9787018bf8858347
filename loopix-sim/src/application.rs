//! The application layer (spec §4.8): payload generation, de-duplication,
//! and e2e delay recording. Ported from `original_source/simulation/apps.py`
//! — `InteractiveApp`/`InteractiveMultimessageApp`/`NoOperationApp` collapse
//! into one `Application` struct with a `kind` tag rather than a class
//! hierarchy, matching the reimplementation guidance for multicast
//! strategies (spec §9) extended to this sibling dispatch point.

use std::collections::{HashMap, HashSet};

use sim_engine::{DeterministicRng, SimTime, SimulationOutput};

use crate::ids::{AppId, UserId};
use crate::node::user::User;
use crate::payload::Payload;

/// Immutable group membership (spec §3 "Group").
#[derive(Clone, Debug)]
pub struct Group {
    pub id: sim_engine::GroupId,
    pub members: Vec<UserId>,
}

pub enum AppKind {
    NoOp,
    Interactive {
        init_rate_per_second: f64,
        user_weight: HashMap<UserId, f64>,
    },
    InteractiveMultimessage {
        init_rate_per_second: f64,
        user_weight: HashMap<UserId, f64>,
        multi_message: usize,
    },
}

pub struct Application {
    pub id: AppId,
    pub name: String,
    pub group: Group,
    payload_nonce: u64,
    seen_deliveries: HashSet<(UserId, u64)>,
    kind: AppKind,
}

fn weight_table(members: &[UserId], heavy_user_percentage: f64, heavy_user_weight: f64) -> HashMap<UserId, f64> {
    let mut table: HashMap<UserId, f64> = members.iter().map(|&u| (u, 1.0)).collect();
    let heavy_count = (heavy_user_percentage / 100.0 * members.len() as f64) as usize;
    for &heavy in members.iter().take(heavy_count) {
        table.insert(heavy, heavy_user_weight);
    }
    table
}

impl Application {
    pub fn no_op(id: AppId, name: impl Into<String>, group: Group) -> Self {
        Self {
            id,
            name: name.into(),
            group,
            payload_nonce: 0,
            seen_deliveries: HashSet::new(),
            kind: AppKind::NoOp,
        }
    }

    pub fn interactive(
        id: AppId,
        name: impl Into<String>,
        group: Group,
        init_rate_per_second: f64,
        heavy_user_percentage: f64,
        heavy_user_weight: f64,
    ) -> Self {
        let user_weight = weight_table(&group.members, heavy_user_percentage, heavy_user_weight);
        Self {
            id,
            name: name.into(),
            group,
            payload_nonce: 0,
            seen_deliveries: HashSet::new(),
            kind: AppKind::Interactive {
                init_rate_per_second,
                user_weight,
            },
        }
    }

    pub fn interactive_multimessage(
        id: AppId,
        name: impl Into<String>,
        group: Group,
        init_rate_per_second: f64,
        multi_message: usize,
        heavy_user_percentage: f64,
        heavy_user_weight: f64,
    ) -> Self {
        let user_weight = weight_table(&group.members, heavy_user_percentage, heavy_user_weight);
        Self {
            id,
            name: name.into(),
            group,
            payload_nonce: 0,
            seen_deliveries: HashSet::new(),
            kind: AppKind::InteractiveMultimessage {
                init_rate_per_second,
                user_weight,
                multi_message,
            },
        }
    }

    fn create_payload(&mut self, now: SimTime) -> Payload {
        self.payload_nonce += 1;
        Payload {
            nonce: self.payload_nonce,
            created_at: now,
        }
    }

    /// De-duplicates by `(recipient, payload.nonce)`. First occurrence logs
    /// the e2e delay (and into the online-only sublist iff delivered while
    /// online); later occurrences only bump the duplicate counter.
    pub fn on_payload(
        &mut self,
        recipient: UserId,
        now: SimTime,
        payload: Payload,
        delivered_online: bool,
        output: &mut SimulationOutput<AppId>,
    ) {
        if self.seen_deliveries.insert((recipient, payload.nonce)) {
            let delay_ms = now.saturating_sub_millis(payload.created_at.millis());
            output.log_e2e_delay(self.id, now, delay_ms, delivered_online);
        } else {
            output.log_already_seen(self.id);
        }
    }

    /// Per tick, with Poisson probability at `init_rate_per_second`, picks a
    /// weighted-random online sender and returns the payload(s) it should
    /// push into its multicast strategy. `NoOp` never fires.
    pub fn tick(&mut self, now: SimTime, users: &[User], rng: &mut DeterministicRng) -> Option<(UserId, Vec<Payload>)> {
        let (rate, user_weight, count) = match &self.kind {
            AppKind::NoOp => return None,
            AppKind::Interactive {
                init_rate_per_second,
                user_weight,
            } => (*init_rate_per_second, user_weight, 1usize),
            AppKind::InteractiveMultimessage {
                init_rate_per_second,
                user_weight,
                multi_message,
            } => (*init_rate_per_second, user_weight, *multi_message),
        };

        if !rng.poisson_event(rate) {
            return None;
        }

        let online_members: Vec<UserId> = self
            .group
            .members
            .iter()
            .copied()
            .filter(|m| users[m.0].online)
            .collect();
        if online_members.is_empty() {
            return None;
        }
        let shuffled = rng.shuffle(&online_members);
        let weights: Vec<f64> = shuffled.iter().map(|u| *user_weight.get(u).unwrap_or(&1.0)).collect();
        let sender = *rng.choice_with_weights(&shuffled, &weights);

        let payloads = (0..count).map(|_| self.create_payload(now)).collect();
        Some((sender, payloads))
    }

    pub fn clean(&mut self) {
        self.seen_deliveries.clear();
    }

    /// Whether any payload has ever been delivered to `user` (inspection
    /// helper for tests; production code reads deliveries off
    /// `SimulationOutput` instead).
    pub fn has_delivered(&self, user: UserId) -> bool {
        self.seen_deliveries.iter().any(|&(u, _)| u == user)
    }
}
