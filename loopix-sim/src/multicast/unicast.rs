//! Sequential unicast multicast strategy (spec §4.12): no reliability
//! machinery at all, just one direct envelope per group member. Ported from
//! `original_source/simulation/multicast/unicast.py::SequentialUnicastStrategy`.

use sim_engine::{DeliveryOnlineState, GroupId, OutboundMessage, PlainBody, SimTime, SimulationOutput};

use crate::application::Application;
use crate::ids::{AppId, NodeRef, UserId};
use crate::payload::{Out, Payload};

pub struct UnicastState {
    group_id: GroupId,
}

impl UnicastState {
    pub fn new(group_id: GroupId) -> Self {
        Self { group_id }
    }

    pub fn send_to_group(&mut self, self_id: UserId, group_members: &[UserId], payload: Payload) -> Vec<Out> {
        group_members
            .iter()
            .copied()
            .filter(|&m| m != self_id)
            .map(|m| OutboundMessage::application(NodeRef::User(m), self.group_id, payload))
            .collect()
    }

    pub fn on_receive(
        &mut self,
        self_id: UserId,
        now: SimTime,
        body: PlainBody<NodeRef, Payload>,
        delivery_online_state: DeliveryOnlineState,
        app: &mut Application,
        output: &mut SimulationOutput<AppId>,
    ) -> Vec<Out> {
        if let PlainBody::Application { payload, .. } = body {
            let delivered_online = delivery_online_state == DeliveryOnlineState::Online;
            app.on_payload(self_id, now, payload, delivered_online, output);
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sends_one_envelope_per_other_member() {
        let mut state = UnicastState::new(GroupId(0));
        let members: Vec<UserId> = (0..4).map(UserId).collect();
        let out = state.send_to_group(UserId(0), &members, Payload { nonce: 1, created_at: SimTime(0) });
        assert_eq!(out.len(), 3);
    }
}
