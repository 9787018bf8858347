//! Rollercoaster: reliable (k+1)-ary broadcast with timeout-based
//! retransmission (spec §4.11). Ported from
//! `original_source/simulation/multicast/rollercoaster.py`.
//!
//! Every session is owned by the user who originated it (keyed only by
//! `nonce`, never `(source, nonce)`): a `RollercoasterState` only ever tracks
//! sessions for messages it itself sent as source, and acknowledgements are
//! addressed directly back to `source` rather than relayed hop-by-hop.

use std::collections::{HashMap, HashSet};

use sim_engine::{DeliveryOnlineState, GroupId, PlainBody, RollercoasterBody, Schedule, SimTime};

use crate::application::Application;
use crate::ids::{AppId, NodeRef, UserId};
use crate::payload::{Out, Payload};

fn as_user(r: NodeRef) -> UserId {
    match r {
        NodeRef::User(id) => id,
        _ => unreachable!("Rollercoaster only ever addresses Users"),
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum DeliveryState {
    InProgress,
    Delivered,
}

#[derive(Clone, Copy, Debug)]
struct TimeoutEntry {
    deadline: SimTime,
    node: UserId,
    role: UserId,
}

struct MessagingSession {
    nonce: u64,
    payload: Payload,
    member_state: HashMap<UserId, DeliveryState>,
    timeouts: Vec<TimeoutEntry>,
    schedule: Schedule<UserId>,
}

impl MessagingSession {
    fn mark_acked(&mut self, node: UserId, role: UserId) {
        self.member_state.insert(node, DeliveryState::Delivered);
        self.timeouts.retain(|t| !(t.node == node && t.role == role));
    }

    fn set_timeout(&mut self, node: UserId, role: UserId, deadline: SimTime) {
        self.timeouts.push(TimeoutEntry { deadline, node, role });
    }
}

/// LIFO substitute-candidate stack; each node appears at most once.
#[derive(Default)]
struct LastSeen {
    stack: Vec<UserId>,
}

impl LastSeen {
    fn mark_seen(&mut self, node: UserId) {
        self.stack.retain(|n| *n != node);
        self.stack.push(node);
    }

    fn mark_failed(&mut self, node: UserId) {
        self.stack.retain(|n| *n != node);
    }

    fn pop_candidate(&mut self) -> Option<UserId> {
        self.stack.pop()
    }
}

pub struct RollercoasterState {
    group_id: GroupId,
    k: usize,
    timeout_multiplier: f64,
    timeouts_active: bool,
    drop_offline: bool,
    msg_delay: f64,
    queue_delay: f64,
    nonce_counter: u64,
    sessions: HashMap<u64, MessagingSession>,
    last_seen: LastSeen,
    seen: HashSet<(UserId, u64, UserId)>,
}

impl RollercoasterState {
    /// `num_mix_layers` (`L`) and the user's own `rate_delay`/`rate_payload`
    /// derive `msg_delay`/`queue_delay` at construction (spec §4.11).
    pub fn new(
        group_id: GroupId,
        k: usize,
        timeout_multiplier: f64,
        timeouts_active: bool,
        drop_offline: bool,
        num_mix_layers: usize,
        user_rate_delay: f64,
        user_rate_payload: f64,
    ) -> Self {
        const BASE_FACTOR: f64 = 2.0;
        let msg_delay = 1000.0 * BASE_FACTOR * (num_mix_layers as f64 + 1.0) / user_rate_delay;
        let queue_delay = 1000.0 / user_rate_payload;
        Self {
            group_id,
            k,
            timeout_multiplier,
            timeouts_active,
            drop_offline,
            msg_delay,
            queue_delay,
            nonce_counter: 0,
            sessions: HashMap::new(),
            last_seen: LastSeen::default(),
            seen: HashSet::new(),
        }
    }

    pub fn send_to_group(
        &mut self,
        self_id: UserId,
        group_members: &[UserId],
        payload: Payload,
        _now: SimTime,
    ) -> Vec<Out> {
        let nonce = self.nonce_counter;
        self.nonce_counter += 1;

        let schedule = Schedule::new(self_id, group_members, self.k, nonce);
        let member_state = group_members
            .iter()
            .filter(|&&m| m != self_id)
            .map(|&m| (m, DeliveryState::InProgress))
            .collect();
        let children = schedule.direct_children(&self_id);

        let mut out = Vec::new();
        for r in &children {
            out.push(sim_engine::OutboundMessage::rollercoaster(
                NodeRef::User(*r),
                self.group_id,
                NodeRef::User(self_id),
                nonce,
                NodeRef::User(*r),
                NodeRef::User(self_id),
                RollercoasterBody::Data(payload),
            ));
        }

        self.sessions.insert(
            nonce,
            MessagingSession {
                nonce,
                payload,
                member_state,
                timeouts: Vec::new(),
                schedule,
            },
        );
        out
    }

    /// Fires when `sent` leaves the user's first hop. Arms timeouts for the
    /// direct recipient and every recursive descendant of its role; a no-op
    /// for ACKs, for envelopes this user didn't originate, or when timeouts
    /// are disabled.
    pub fn on_send_callback(&mut self, self_id: UserId, now: SimTime, sent: &Out) {
        if !self.timeouts_active {
            return;
        }
        let sim_engine::OutboundKind::Rollercoaster {
            source,
            nonce,
            role,
            body,
            ..
        } = &sent.kind
        else {
            return;
        };
        if body.is_ack() || *source != NodeRef::User(self_id) {
            return;
        }
        let Some(session) = self.sessions.get_mut(nonce) else {
            return;
        };
        let role = as_user(*role);
        let recipient = as_user(sent.recipient);

        if recipient != self_id {
            let deadline_ms = (self.timeout_multiplier * session.schedule.estimated_rtt(&role, &role, self.msg_delay, self.queue_delay))
                as u64;
            session.set_timeout(recipient, role, now + deadline_ms);
        }
        for c in session.schedule.recursive_children(&role) {
            let deadline_ms = (self.timeout_multiplier * session.schedule.estimated_rtt(&role, &c, self.msg_delay, self.queue_delay)) as u64;
            session.set_timeout(c, role, now + deadline_ms);
        }
    }

    pub fn on_receive(
        &mut self,
        self_id: UserId,
        now: SimTime,
        body: PlainBody<NodeRef, Payload>,
        delivery_online_state: DeliveryOnlineState,
        app: &mut Application,
        output: &mut sim_engine::SimulationOutput<AppId>,
    ) -> Vec<Out> {
        let PlainBody::Rollercoaster {
            group_id,
            source,
            nonce,
            role,
            sender,
            body,
        } = body
        else {
            return Vec::new();
        };
        self.last_seen.mark_seen(as_user(sender));

        match body {
            RollercoasterBody::Ack => {
                if let Some(session) = self.sessions.get_mut(&nonce) {
                    session.mark_acked(as_user(sender), as_user(role));
                }
                Vec::new()
            }
            RollercoasterBody::Data(payload) => {
                if self.drop_offline && delivery_online_state == DeliveryOnlineState::Offline {
                    app.on_payload(self_id, now, payload, false, output);
                    return Vec::new();
                }

                let msg_id = (as_user(source), nonce, as_user(role));
                if !self.seen.insert(msg_id) {
                    return vec![ack_message(self_id, source, group_id, nonce, role)];
                }

                let delivered_online = delivery_online_state == DeliveryOnlineState::Online;
                app.on_payload(self_id, now, payload, delivered_online, output);

                let schedule = Schedule::new(as_user(source), &app.group.members, self.k, nonce);
                let mut out: Vec<Out> = schedule
                    .direct_children(&as_user(role))
                    .into_iter()
                    .filter(|child| *child != self_id)
                    .map(|child| {
                        sim_engine::OutboundMessage::rollercoaster(
                            NodeRef::User(child),
                            group_id,
                            source,
                            nonce,
                            NodeRef::User(child),
                            NodeRef::User(self_id),
                            RollercoasterBody::Data(payload),
                        )
                    })
                    .collect();
                out.push(ack_message(self_id, source, group_id, nonce, role));
                out
            }
        }
    }

    pub fn tick(&mut self, self_id: UserId, now: SimTime) -> Vec<Out> {
        if !self.timeouts_active {
            return Vec::new();
        }
        let group_id = self.group_id;
        let mut out = Vec::new();

        for session in self.sessions.values_mut() {
            let failed: Vec<TimeoutEntry> = session.timeouts.iter().filter(|t| t.deadline <= now).copied().collect();
            if failed.is_empty() {
                continue;
            }
            session.timeouts.retain(|t| t.deadline > now);

            for entry in failed {
                self.last_seen.mark_failed(entry.node);
                if session.schedule.is_leaf(&entry.role) {
                    continue;
                }
                let new_recipient = self
                    .last_seen
                    .pop_candidate()
                    .unwrap_or_else(|| session.schedule.next_receiver(&entry.node));
                tracing::debug!(
                    nonce = session.nonce,
                    failed_node = entry.node.0,
                    role = entry.role.0,
                    substitute = new_recipient.0,
                    "rollercoaster timeout fired, retrying via substitute"
                );

                out.push(sim_engine::OutboundMessage::rollercoaster(
                    NodeRef::User(new_recipient),
                    group_id,
                    NodeRef::User(self_id),
                    session.nonce,
                    NodeRef::User(entry.role),
                    NodeRef::User(self_id),
                    RollercoasterBody::Data(session.payload),
                ));

                for c in session.schedule.recursive_children(&entry.role) {
                    session.timeouts.retain(|t| !(t.node == c && t.role == c));
                }
            }
        }
        out
    }

    pub fn clean(&mut self) {
        self.sessions.clear();
        self.last_seen = LastSeen::default();
        self.seen.clear();
    }
}

fn ack_message(self_id: UserId, source: NodeRef, group_id: GroupId, nonce: u64, role: NodeRef) -> Out {
    sim_engine::OutboundMessage::rollercoaster(
        source,
        group_id,
        source,
        nonce,
        role,
        NodeRef::User(self_id),
        RollercoasterBody::Ack,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::Group;

    fn group(id: u64, n: usize) -> Group {
        Group {
            id: GroupId(id),
            members: (0..n).map(UserId).collect(),
        }
    }

    #[test]
    fn send_to_group_registers_a_session_and_enqueues_direct_children() {
        let mut state = RollercoasterState::new(GroupId(0), 1, 1.5, true, false, 2, 10.0, 5.0);
        let members: Vec<UserId> = (0..7).map(UserId).collect();
        let out = state.send_to_group(UserId(0), &members, Payload { nonce: 1, created_at: SimTime(0) }, SimTime(0));
        // k=1 over 7 members gives the source 3 direct children (1, 2, 4).
        assert_eq!(out.len(), 3);
        assert!(state.sessions.contains_key(&0));
    }

    #[test]
    fn duplicate_payload_only_acks() {
        let mut state = RollercoasterState::new(GroupId(0), 1, 1.5, true, false, 2, 10.0, 5.0);
        let mut app = Application::no_op(AppId(0), "app", group(0, 3));
        let mut output: sim_engine::SimulationOutput<AppId> = sim_engine::SimulationOutput::new();
        let payload = Payload { nonce: 1, created_at: SimTime(0) };
        let body = PlainBody::Rollercoaster {
            group_id: GroupId(0),
            source: NodeRef::User(UserId(0)),
            nonce: 7,
            role: NodeRef::User(UserId(1)),
            sender: NodeRef::User(UserId(0)),
            body: RollercoasterBody::Data(payload),
        };
        let first = state.on_receive(UserId(1), SimTime(10), body.clone(), DeliveryOnlineState::Online, &mut app, &mut output);
        assert!(!first.is_empty());

        let second = state.on_receive(UserId(1), SimTime(20), body, DeliveryOnlineState::Online, &mut app, &mut output);
        assert_eq!(second.len(), 1);
        assert!(matches!(
            second[0].kind,
            sim_engine::OutboundKind::Rollercoaster { ref body, .. } if body.is_ack()
        ));
    }
}
