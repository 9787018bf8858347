//! A provider (spec §4.6): the egress/ingress relay between a mix network
//! and the users it hosts. Ported from
//! `original_source/simulation/loopix.py::Provider`.

use std::collections::HashMap;

use sim_engine::{DelayBuffer, Envelope, SimTime, Tag};

use crate::ids::{NodeRef, ProviderId, UserId};
use crate::payload::Env;

pub struct Provider {
    pub id: ProviderId,
    pub name: String,
    inbox: DelayBuffer<NodeRef, crate::payload::Payload>,
    postboxes: HashMap<UserId, Vec<(SimTime, Env)>>,
}

impl Provider {
    pub fn new(id: ProviderId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            inbox: DelayBuffer::new(),
            postboxes: HashMap::new(),
        }
    }

    /// Drop-tagged envelopes are discarded on arrival; everything else
    /// enters the provider's own delay buffer just like a mix inbox.
    pub fn deliver(&mut self, now: SimTime, envelope: Env) {
        if envelope.tag() == Tag::Drop {
            return;
        }
        self.inbox.add(now, envelope);
    }

    /// Runs this provider's tick. Envelopes whose unwrapped recipient is a
    /// User are appended to that user's postbox; everything else is hopped
    /// onward (the provider acting as egress relay for mix-terminated loops
    /// whose last hop happens to traverse it).
    pub fn tick(&mut self, now: SimTime) -> Vec<(NodeRef, Env)> {
        let mut forward = Vec::new();
        for envelope in self.inbox.pop_current_round(now) {
            for inner in envelope.unwrap_one() {
                match inner.recipient() {
                    NodeRef::User(uid) => {
                        self.postboxes.entry(*uid).or_default().push((now, inner));
                    }
                    _ => forward.push((*inner.recipient(), inner)),
                }
            }
        }
        forward
    }

    /// Drains and returns this user's postbox, resetting it empty.
    pub fn take_postbox(&mut self, user: UserId) -> Vec<(SimTime, Env)> {
        self.postboxes.remove(&user).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sim_engine::{DeliveryOnlineState, PlainBody};

    #[test]
    fn drop_tag_is_discarded_on_arrival() {
        let mut provider = Provider::new(ProviderId(0), "p0");
        let env = Envelope::Plain {
            recipient: NodeRef::Provider(ProviderId(0)),
            tag: Tag::Drop,
            body: PlainBody::Empty,
            delivery_online_state: DeliveryOnlineState::Unset,
        };
        provider.deliver(SimTime(0), env);
        assert!(provider.tick(SimTime(0)).is_empty());
    }

    #[test]
    fn unwrapped_user_recipient_lands_in_postbox() {
        let mut provider = Provider::new(ProviderId(0), "p0");
        let uid = UserId(3);
        let inner = Envelope::Plain {
            recipient: NodeRef::User(uid),
            tag: Tag::Payload,
            body: PlainBody::Empty,
            delivery_online_state: DeliveryOnlineState::Unset,
        };
        let wrapped = Envelope::Wrapped {
            recipient: NodeRef::Provider(ProviderId(0)),
            tag: Tag::Payload,
            body: Box::new(inner),
            delay_ms: 0,
            delivery_online_state: DeliveryOnlineState::Unset,
        };
        provider.deliver(SimTime(0), wrapped);
        assert!(provider.tick(SimTime(0)).is_empty());
        let postbox = provider.take_postbox(uid);
        assert_eq!(postbox.len(), 1);
    }
}
