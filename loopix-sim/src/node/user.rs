//! A user (spec §4.7): the only entity that originates application traffic
//! and the only consumer of `Multicast` strategies. Ported from
//! `original_source/simulation/loopix.py::User`.

use std::collections::{HashMap, VecDeque};

use sim_engine::{
    wrap_multi, DeliveryOnlineState, Delta, Envelope, OutboundKind, OutboundMessage, PlainBody,
    SimTime, SimulationOutput, Tag,
};

use crate::application::Application;
use crate::ids::{AppId, NodeRef, ProviderId, UserId};
use crate::multicast::Multicast;
use crate::network::Network;
use crate::payload::{Env, Out};

pub struct User {
    pub id: UserId,
    pub name: String,
    pub provider: ProviderId,
    multicast: HashMap<sim_engine::GroupId, (AppId, Multicast)>,
    out_buffer: VecDeque<Out>,
    rate_payload: f64,
    rate_drop: f64,
    rate_loop: f64,
    rate_delay: f64,
    time_between_pulls: f64,
    time_until_pull: f64,
    waiting_for_split: VecDeque<Out>,
    split: usize,
    pub online: bool,
    /// One entry per second-of-day (spec §6 "online schedule"); `None` means
    /// always online.
    online_schedule: Option<Vec<bool>>,
}

impl User {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: UserId,
        name: impl Into<String>,
        provider: ProviderId,
        rate_payload: f64,
        rate_drop: f64,
        rate_loop: f64,
        rate_delay: f64,
        rate_pull: f64,
        online_schedule: Option<Vec<bool>>,
    ) -> Self {
        let time_between_pulls = 1_000.0 / rate_pull;
        let online = online_schedule.as_ref().map_or(true, |s| s[0]);
        Self {
            id,
            name: name.into(),
            provider,
            multicast: HashMap::new(),
            out_buffer: VecDeque::new(),
            rate_payload,
            rate_drop,
            rate_loop,
            rate_delay,
            time_between_pulls,
            time_until_pull: time_between_pulls,
            waiting_for_split: VecDeque::new(),
            split: 1,
            online,
            online_schedule,
        }
    }

    pub fn add_multicast(&mut self, group_id: sim_engine::GroupId, app_id: AppId, multicast: Multicast) {
        self.multicast.insert(group_id, (app_id, multicast));
    }

    /// Rescales the cover-traffic rates so their ratio to `rate_payload`
    /// stays constant as the batch size changes (spec §4.11: a
    /// `p`-restricted strategy needs `p` messages per flush instead of `1`).
    pub fn set_split(&mut self, split: usize) {
        if split == self.split {
            return;
        }
        let factor = split as f64 / self.split as f64;
        self.rate_drop *= factor;
        self.rate_loop *= factor;
        self.rate_payload *= factor;
        self.split = split;
    }

    fn schedule_for_send(&mut self, message: Out) {
        self.out_buffer.push_back(message);
    }

    /// Hands a freshly created payload to the group's multicast strategy and
    /// queues whatever it produces.
    pub fn send_payload_to_group(
        &mut self,
        group_id: sim_engine::GroupId,
        payload: crate::payload::Payload,
        group_members: &[UserId],
        now: SimTime,
    ) {
        let Some((_, multicast)) = self.multicast.get_mut(&group_id) else {
            return;
        };
        let generated = multicast.send_to_group(self.id, group_members, payload, now);
        for m in generated {
            self.schedule_for_send(m);
        }
    }

    /// Whether this user's pull duty will run this tick; the engine only
    /// needs to drain the provider's postbox when this is true.
    pub fn due_for_pull(&self) -> bool {
        self.time_until_pull <= 0.0
    }

    /// Whether the online schedule (if any) marks this user online at `now`,
    /// without mutating `self.online`. The engine uses this to decide
    /// whether draining the provider's postbox this tick would actually be
    /// consumed (an offline user's `tick` returns before touching its
    /// postbox argument, so handing it one here would lose those entries).
    pub fn is_online_at(&self, now: SimTime) -> bool {
        self.online_schedule
            .as_ref()
            .map_or(true, |s| s[now.second_of_day()])
    }

    #[allow(clippy::too_many_arguments)]
    pub fn tick(
        &mut self,
        now: SimTime,
        delta: Delta,
        network: &Network,
        user_providers: &[ProviderId],
        postbox: Vec<(SimTime, Env)>,
        apps: &mut [Application],
        multiplier_layer: usize,
        output: &mut SimulationOutput<AppId>,
        rng: &mut sim_engine::DeterministicRng,
    ) -> Vec<(NodeRef, Env)> {
        if let Some(schedule) = &self.online_schedule {
            self.online = schedule[now.second_of_day()];
            if !self.online {
                return Vec::new();
            }
        }

        if self.due_for_pull() {
            self.time_until_pull = self.time_between_pulls;
            self.process_inbox(now, postbox, apps, output);
        }
        self.time_until_pull -= delta.millis() as f64;

        if rng.poisson_event(self.rate_payload) {
            if let Some(m) = self.out_buffer.pop_front() {
                self.waiting_for_split.push_back(m);
            } else {
                let provider = network.random_provider(rng);
                self.waiting_for_split
                    .push_back(OutboundMessage::drop_message(NodeRef::Provider(provider)));
            }
        }

        if rng.poisson_event(self.rate_drop) {
            let provider = network.random_provider(rng);
            self.waiting_for_split
                .push_back(OutboundMessage::drop_message(NodeRef::Provider(provider)));
        }

        if rng.poisson_event(self.rate_loop) {
            self.waiting_for_split
                .push_back(OutboundMessage::loop_message(NodeRef::User(self.id)));
        }

        let mut out = Vec::new();
        if self.waiting_for_split.len() >= self.split {
            out.extend(self.flush(now, network, user_providers, multiplier_layer, rng));
        }

        let mut generated = Vec::new();
        for (_, multicast) in self.multicast.values_mut() {
            generated.extend(multicast.tick(self.id, now));
        }
        for m in generated {
            self.schedule_for_send(m);
        }

        out
    }

    /// Sets the delivery-online state on each postbox entry and routes
    /// `Payload`-tagged envelopes to their group's multicast strategy; drop
    /// and loop arrivals are discarded (spec §4.7).
    fn process_inbox(
        &mut self,
        now: SimTime,
        postbox: Vec<(SimTime, Env)>,
        apps: &mut [Application],
        output: &mut SimulationOutput<AppId>,
    ) {
        for (delivery_time, mut envelope) in postbox {
            let online_state = if delivery_time > now.saturating_sub_millis(self.time_between_pulls as u64) {
                DeliveryOnlineState::Online
            } else {
                DeliveryOnlineState::Offline
            };
            envelope.set_delivery_online_state(online_state);

            if envelope.tag() != Tag::Payload {
                continue;
            }
            let Envelope::Plain { body, .. } = envelope else {
                continue;
            };
            let group_id = match &body {
                PlainBody::Application { group_id, .. } => *group_id,
                PlainBody::Rollercoaster { group_id, .. } => *group_id,
                PlainBody::Empty => continue,
            };
            let Some((app_id, multicast)) = self.multicast.get_mut(&group_id) else {
                continue;
            };
            let generated = multicast.on_receive(self.id, now, body, online_state, &mut apps[app_id.0], output);
            for m in generated {
                self.out_buffer.push_back(m);
            }
        }
    }

    /// Pops the top `split` waiting messages, fires Rollercoaster's
    /// send-callback on any that need one, and wraps the batch into a single
    /// multi-message (spec §4.9). Ported from
    /// `original_source/simulation/messages.py::wrap_messages_in_multi_message`.
    fn flush(
        &mut self,
        now: SimTime,
        network: &Network,
        user_providers: &[ProviderId],
        multiplier_layer: usize,
        rng: &mut sim_engine::DeterministicRng,
    ) -> Vec<(NodeRef, Env)> {
        let batch: Vec<Out> = (0..self.split).filter_map(|_| self.waiting_for_split.pop_front()).collect();

        for m in &batch {
            if let OutboundKind::Rollercoaster { group_id, .. } = &m.kind {
                if let Some((_, multicast)) = self.multicast.get_mut(group_id) {
                    multicast.on_send_callback(self.id, now, m);
                }
            }
        }

        let mut prefix = vec![NodeRef::Provider(self.provider)];
        for layer in 0..multiplier_layer {
            prefix.push(NodeRef::Mix(network.random_mix_in_layer(layer, rng)));
        }

        let suffix_mixes: Vec<Vec<NodeRef>> = batch
            .iter()
            .map(|_| {
                (multiplier_layer..network.num_layers())
                    .map(|layer| NodeRef::Mix(network.random_mix_in_layer(layer, rng)))
                    .collect()
            })
            .collect();

        let mut next = 0usize;
        let envelope = wrap_multi(
            batch,
            &prefix,
            |m| {
                let mut suffix = suffix_mixes[next].clone();
                next += 1;
                if let NodeRef::User(uid) = m.recipient {
                    suffix.push(NodeRef::Provider(user_providers[uid.0]));
                }
                suffix
            },
            self.rate_delay,
            rng,
        );

        vec![(*envelope.recipient(), envelope)]
    }

    /// Clears temporary state data between simulation runs (spec §4.7).
    pub fn clean(&mut self) {
        self.out_buffer.clear();
        self.waiting_for_split.clear();
        self.online_schedule = None;
        self.online = true;
        for (_, multicast) in self.multicast.values_mut() {
            multicast.clean();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::Group;
    use crate::multicast::UnicastState;
    use sim_engine::{Delta as D, SimulationOutput};

    fn network() -> Network {
        Network::new(3, 3, 2)
    }

    #[test]
    fn flushes_a_batch_once_split_is_reached() {
        let mut user = User::new(
            UserId(0),
            "u0",
            ProviderId(0),
            1_000.0,
            0.0,
            0.0,
            5.0,
            10.0,
            None,
        );
        user.add_multicast(
            sim_engine::GroupId(0),
            AppId(0),
            Multicast::Unicast(UnicastState::new(sim_engine::GroupId(0))),
        );
        let group_members = vec![UserId(0), UserId(1)];
        let payload = crate::payload::Payload { nonce: 1, created_at: SimTime(0) };
        user.send_payload_to_group(sim_engine::GroupId(0), payload, &group_members, SimTime(0));
        assert_eq!(user.out_buffer.len(), 1);

        let net = network();
        let user_providers = vec![ProviderId(0), ProviderId(0)];
        let mut apps = vec![Application::no_op(
            AppId(0),
            "app",
            Group { id: sim_engine::GroupId(0), members: group_members },
        )];
        let mut output: SimulationOutput<AppId> = SimulationOutput::new();
        let mut rng = sim_engine::DeterministicRng::new(1, D::from_millis(10));

        // force the payload-rate Poisson event to fire deterministically by
        // retrying ticks until the batch is flushed onto the wire.
        let mut produced = Vec::new();
        for _ in 0..10_000 {
            let out = user.tick(SimTime(0), D::from_millis(10), &net, &user_providers, Vec::new(), &mut apps, 2, &mut output, &mut rng);
            if !out.is_empty() {
                produced = out;
                break;
            }
        }
        assert_eq!(produced.len(), 1);
        assert!(matches!(produced[0].0, NodeRef::Provider(_)));
    }

    #[test]
    fn offline_user_skips_every_duty() {
        let mut schedule = vec![true; 86_400];
        schedule[0] = false;
        let mut user = User::new(UserId(0), "u0", ProviderId(0), 1_000.0, 1_000.0, 1_000.0, 5.0, 10.0, Some(schedule));
        let net = network();
        let user_providers = vec![ProviderId(0)];
        let mut apps: Vec<Application> = Vec::new();
        let mut output: SimulationOutput<AppId> = SimulationOutput::new();
        let mut rng = sim_engine::DeterministicRng::new(1, D::from_millis(10));

        let out = user.tick(SimTime(0), D::from_millis(10), &net, &user_providers, Vec::new(), &mut apps, 2, &mut output, &mut rng);
        assert!(out.is_empty());
        assert!(!user.online);
    }
}
