//! A single mix node (spec §4.5). Owns a delay buffer of in-flight wrapped
//! envelopes and emits its own loop cover traffic; has no notion of users,
//! providers, or payloads beyond what travels through the onion layers
//! addressed to it. Ported from `original_source/simulation/loopix.py::MixNode`.

use sim_engine::{DelayBuffer, DeterministicRng, Envelope, OutboundMessage, SimTime};

use crate::ids::MixId;
use crate::network::Network;
use crate::payload::Env;

pub struct MixNode {
    pub id: MixId,
    pub name: String,
    pub rate_loop: f64,
    pub rate_loop_delay: f64,
    inbox: DelayBuffer<crate::ids::NodeRef, crate::payload::Payload>,
}

impl MixNode {
    pub fn new(id: MixId, name: impl Into<String>, rate_loop: f64, rate_loop_delay: f64) -> Self {
        Self {
            id,
            name: name.into(),
            rate_loop,
            rate_loop_delay,
            inbox: DelayBuffer::new(),
        }
    }

    pub fn deliver(&mut self, now: SimTime, envelope: Env) {
        self.inbox.add(now, envelope);
    }

    /// Runs this mix's tick and returns `(recipient, envelope)` pairs to be
    /// handed to the engine's in-transit bus.
    pub fn tick(
        &mut self,
        now: SimTime,
        network: &Network,
        rng: &mut DeterministicRng,
    ) -> Vec<(crate::ids::NodeRef, Env)> {
        let mut out = Vec::new();

        if rng.poisson_event(self.rate_loop) {
            let path = network.loop_path(self.id, rng);
            let msg = OutboundMessage::loop_message(crate::ids::NodeRef::Mix(self.id));
            let envelope = msg.wrap_chain(&path, self.rate_loop_delay, rng);
            out.push((*envelope.recipient(), envelope));
        }

        let own = crate::ids::NodeRef::Mix(self.id);
        for envelope in self.inbox.pop_current_round(now) {
            for inner in envelope.unwrap_one() {
                // A terminal Plain addressed back to this mix is its own
                // loop cover traffic arriving home (spec §4.5: the loop path
                // ends at the originating mix); it carries no further hop to
                // deliver. Re-emitting it would have the engine insert a
                // Plain into this mix's own delay buffer (violating spec
                // §4.2: only Wrapped/MultiWrapped envelopes are ever
                // inserted), and since unwrapping a Plain just returns it
                // unchanged, it would bounce between this mix and the engine
                // forever. Terminal Plains addressed elsewhere (a forwarded
                // payload's or drop's actual destination) still need to go
                // out.
                if matches!(inner, Envelope::Plain { .. }) && *inner.recipient() == own {
                    continue;
                }
                out.push((*inner.recipient(), inner));
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_engine::Delta;

    #[test]
    fn forwards_a_released_wrapped_envelope_after_its_delay() {
        let network = Network::new(1, 4, 2);
        let mut rng = DeterministicRng::new(1, Delta::from_millis(2));
        let m0 = MixId { layer: 0, index: 0 };
        let mut mix = MixNode::new(m0, "m0", 0.0, 1.0);

        let dummy = crate::ids::NodeRef::Provider(crate::ids::ProviderId(0));
        let inner = Envelope::Plain {
            recipient: dummy,
            tag: sim_engine::Tag::Payload,
            body: sim_engine::PlainBody::Empty,
            delivery_online_state: sim_engine::DeliveryOnlineState::Unset,
        };
        let wrapped = Envelope::Wrapped {
            recipient: crate::ids::NodeRef::Mix(m0),
            tag: sim_engine::Tag::Payload,
            body: Box::new(inner),
            delay_ms: 100,
            delivery_online_state: sim_engine::DeliveryOnlineState::Unset,
        };
        mix.deliver(SimTime(0), wrapped);

        let released = mix.tick(SimTime(100), &network, &mut rng);
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].0, dummy);
    }

    #[test]
    fn self_addressed_loop_terminus_is_not_re_emitted() {
        let network = Network::new(1, 4, 2);
        let mut rng = DeterministicRng::new(1, Delta::from_millis(2));
        let m0 = MixId { layer: 0, index: 0 };
        let mut mix = MixNode::new(m0, "m0", 0.0, 1.0);
        let own = crate::ids::NodeRef::Mix(m0);

        let inner = Envelope::Plain {
            recipient: own,
            tag: sim_engine::Tag::Loop,
            body: sim_engine::PlainBody::Empty,
            delivery_online_state: sim_engine::DeliveryOnlineState::Unset,
        };
        let wrapped = Envelope::Wrapped {
            recipient: own,
            tag: sim_engine::Tag::Loop,
            body: Box::new(inner),
            delay_ms: 100,
            delivery_online_state: sim_engine::DeliveryOnlineState::Unset,
        };
        mix.deliver(SimTime(0), wrapped);

        let released = mix.tick(SimTime(100), &network, &mut rng);
        assert!(released.is_empty());
    }
}
