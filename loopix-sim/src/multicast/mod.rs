//! Per-user, per-group multicast strategies (spec §4.11, §4.12): a thin
//! dispatching enum over `RollercoasterState`/`UnicastState` rather than a
//! trait-object hierarchy, matching the reimplementation guidance for
//! Loopix's dynamic-dispatch-heavy strategy pattern (spec §9).

pub mod rollercoaster;
pub mod unicast;

pub use rollercoaster::RollercoasterState;
pub use unicast::UnicastState;

use sim_engine::{DeliveryOnlineState, GroupId, PlainBody, SimTime, SimulationOutput};

use crate::application::Application;
use crate::ids::{AppId, NodeRef, UserId};
use crate::payload::{Out, Payload};
use crate::settings::StrategyConfig;

pub enum Multicast {
    Rollercoaster(RollercoasterState),
    Unicast(UnicastState),
}

/// Builds the strategy a settings-file group selects (spec §6 "Rollercoaster
/// ... parsed from a dash-separated strategy name") and the split `p` the
/// owning user should be set to (spec §4.11/§4.7 `set_split`). Plain unicast
/// has no batching discipline of its own, so it leaves the user's split at 1.
pub fn build(
    strategy: StrategyConfig,
    group_id: GroupId,
    num_mix_layers: usize,
    user_rate_delay: f64,
    user_rate_payload: f64,
) -> (Multicast, usize) {
    match strategy {
        StrategyConfig::Unicast => (Multicast::Unicast(UnicastState::new(group_id)), 1),
        StrategyConfig::Rollercoaster(params) => (
            Multicast::Rollercoaster(RollercoasterState::new(
                group_id,
                params.k,
                params.timeout_multiplier,
                params.timeouts_active,
                params.drop_offline,
                num_mix_layers,
                user_rate_delay,
                user_rate_payload,
            )),
            params.p,
        ),
    }
}

impl Multicast {
    pub fn send_to_group(&mut self, self_id: UserId, group_members: &[UserId], payload: Payload, now: SimTime) -> Vec<Out> {
        match self {
            Multicast::Rollercoaster(s) => s.send_to_group(self_id, group_members, payload, now),
            Multicast::Unicast(s) => s.send_to_group(self_id, group_members, payload),
        }
    }

    pub fn on_send_callback(&mut self, self_id: UserId, now: SimTime, sent: &Out) {
        if let Multicast::Rollercoaster(s) = self {
            s.on_send_callback(self_id, now, sent);
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn on_receive(
        &mut self,
        self_id: UserId,
        now: SimTime,
        body: PlainBody<NodeRef, Payload>,
        delivery_online_state: DeliveryOnlineState,
        app: &mut Application,
        output: &mut SimulationOutput<AppId>,
    ) -> Vec<Out> {
        match self {
            Multicast::Rollercoaster(s) => s.on_receive(self_id, now, body, delivery_online_state, app, output),
            Multicast::Unicast(s) => s.on_receive(self_id, now, body, delivery_online_state, app, output),
        }
    }

    pub fn tick(&mut self, self_id: UserId, now: SimTime) -> Vec<Out> {
        match self {
            Multicast::Rollercoaster(s) => s.tick(self_id, now),
            Multicast::Unicast(_) => Vec::new(),
        }
    }

    pub fn clean(&mut self) {
        if let Multicast::Rollercoaster(s) = self {
            s.clean();
        }
    }
}
