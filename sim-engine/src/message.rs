//! The envelope model (spec §3 "Envelope", §4.9). Onion-like nested
//! envelopes with per-hop delay, plus the "multi-message" fan-out at a
//! designated layer. Modeled as tagged variants (sum types) rather than a
//! class hierarchy, per spec §9 "Dynamic dispatch over envelope kinds".

use serde::{Deserialize, Serialize};

use crate::rng::DeterministicRng;

/// The fixed tag alphabet an envelope may carry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tag {
    Payload,
    Drop,
    Loop,
    Multi,
}

/// Group identifier a payload/Rollercoaster envelope is addressed to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupId(pub u64);

/// Whether an envelope was delivered while its recipient was online. `Unset`
/// is the construction-time default; it is replaced during the recipient's
/// pull duty (spec §4.7) and propagated recursively into wrapped bodies.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryOnlineState {
    Unset,
    Online,
    Offline,
}

/// The Rollercoaster application body: either the real payload or the
/// acknowledgement sentinel (spec §4.11). A tagged enum instead of the
/// original's string sentinel comparison.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum RollercoasterBody<P> {
    Data(P),
    Ack,
}

impl<P> RollercoasterBody<P> {
    pub fn is_ack(&self) -> bool {
        matches!(self, RollercoasterBody::Ack)
    }
}

/// A message queued by a user (spec §3 "out_buffer"/"waiting_for_split")
/// before it is onion-wrapped and flushed as part of a split batch (§4.7,
/// §4.9). This is the "logical" message; it becomes the innermost body of
/// the wire envelope it is wrapped into.
#[derive(Clone, Debug)]
pub struct OutboundMessage<R, P> {
    pub recipient: R,
    pub tag: Tag,
    pub kind: OutboundKind<R, P>,
}

#[derive(Clone, Debug)]
pub enum OutboundKind<R, P> {
    Loop,
    Drop,
    Application {
        group_id: GroupId,
        payload: P,
    },
    Rollercoaster {
        group_id: GroupId,
        source: R,
        nonce: u64,
        role: R,
        sender: R,
        body: RollercoasterBody<P>,
    },
}

impl<R: Clone + PartialEq, P> OutboundMessage<R, P> {
    pub fn loop_message(recipient: R) -> Self {
        Self {
            recipient,
            tag: Tag::Loop,
            kind: OutboundKind::Loop,
        }
    }

    pub fn drop_message(recipient: R) -> Self {
        Self {
            recipient,
            tag: Tag::Drop,
            kind: OutboundKind::Drop,
        }
    }

    pub fn application(recipient: R, group_id: GroupId, payload: P) -> Self {
        Self {
            recipient,
            tag: Tag::Payload,
            kind: OutboundKind::Application { group_id, payload },
        }
    }

    /// `recipient != sender` and `role != source` are invariants of every
    /// Rollercoaster envelope (spec §3).
    pub fn rollercoaster(
        recipient: R,
        group_id: GroupId,
        source: R,
        nonce: u64,
        role: R,
        sender: R,
        body: RollercoasterBody<P>,
    ) -> Self {
        debug_assert!(recipient != sender, "Rollercoaster envelope recipient == sender");
        debug_assert!(role != source, "Rollercoaster envelope role == source");
        Self {
            recipient,
            tag: Tag::Payload,
            kind: OutboundKind::Rollercoaster {
                group_id,
                source,
                nonce,
                role,
                sender,
                body,
            },
        }
    }

    fn into_plain_body(self) -> PlainBody<R, P> {
        match self.kind {
            OutboundKind::Loop | OutboundKind::Drop => PlainBody::Empty,
            OutboundKind::Application { group_id, payload } => {
                PlainBody::Application { group_id, payload }
            }
            OutboundKind::Rollercoaster {
                group_id,
                source,
                nonce,
                role,
                sender,
                body,
            } => PlainBody::Rollercoaster {
                group_id,
                source,
                nonce,
                role,
                sender,
                body,
            },
        }
    }
}

/// The non-wrapped terminal body of an envelope chain (spec §3: "every
/// Wrapped/MultiWrapped chain terminates in a non-wrapped payload").
/// `Empty` covers loop/drop cover traffic; `Application`/`Rollercoaster`
/// carry the application/multicast payload.
#[derive(Clone, Debug)]
pub enum PlainBody<R, P> {
    Empty,
    Application {
        group_id: GroupId,
        payload: P,
    },
    Rollercoaster {
        group_id: GroupId,
        source: R,
        nonce: u64,
        role: R,
        sender: R,
        body: RollercoasterBody<P>,
    },
}

/// A wire envelope, possibly nested arbitrarily deep (spec §3/§4.9).
#[derive(Clone, Debug)]
pub enum Envelope<R, P> {
    Plain {
        recipient: R,
        tag: Tag,
        body: PlainBody<R, P>,
        delivery_online_state: DeliveryOnlineState,
    },
    Wrapped {
        recipient: R,
        tag: Tag,
        body: Box<Envelope<R, P>>,
        delay_ms: u64,
        delivery_online_state: DeliveryOnlineState,
    },
    MultiWrapped {
        recipient: R,
        body: Vec<Envelope<R, P>>,
        delay_ms: u64,
        delivery_online_state: DeliveryOnlineState,
    },
}

impl<R: Clone, P> Envelope<R, P> {
    pub fn recipient(&self) -> &R {
        match self {
            Envelope::Plain { recipient, .. }
            | Envelope::Wrapped { recipient, .. }
            | Envelope::MultiWrapped { recipient, .. } => recipient,
        }
    }

    pub fn tag(&self) -> Tag {
        match self {
            Envelope::Plain { tag, .. } | Envelope::Wrapped { tag, .. } => *tag,
            Envelope::MultiWrapped { .. } => Tag::Multi,
        }
    }

    /// Sets the delivery-online state on this envelope and, for wrapped
    /// envelopes, recursively on the body (spec §3: "Propagate this state
    /// recursively into wrapped bodies").
    pub fn set_delivery_online_state(&mut self, state: DeliveryOnlineState) {
        match self {
            Envelope::Plain {
                delivery_online_state,
                ..
            } => *delivery_online_state = state,
            Envelope::Wrapped {
                delivery_online_state,
                body,
                ..
            } => {
                *delivery_online_state = state;
                body.set_delivery_online_state(state);
            }
            Envelope::MultiWrapped {
                delivery_online_state,
                body,
                ..
            } => {
                *delivery_online_state = state;
                for inner in body.iter_mut() {
                    inner.set_delivery_online_state(state);
                }
            }
        }
    }

    pub fn delivery_online_state(&self) -> DeliveryOnlineState {
        match self {
            Envelope::Plain {
                delivery_online_state,
                ..
            }
            | Envelope::Wrapped {
                delivery_online_state,
                ..
            }
            | Envelope::MultiWrapped {
                delivery_online_state,
                ..
            } => *delivery_online_state,
        }
    }

    /// Unwraps exactly one layer. For a `Wrapped` envelope this yields its
    /// single inner envelope; for a `MultiWrapped` envelope this yields all
    /// inner envelopes (spec §4.5 "if the inner is a list ... send each
    /// inner to its recipient; otherwise send the single inner").
    pub fn unwrap_one(self) -> Vec<Envelope<R, P>> {
        match self {
            Envelope::Wrapped { body, .. } => vec![*body],
            Envelope::MultiWrapped { body, .. } => body,
            plain @ Envelope::Plain { .. } => vec![plain],
        }
    }
}

impl<R: Clone + PartialEq, P> OutboundMessage<R, P> {
    /// Creates a chain of `Wrapped(Wrapped(...))` envelopes following
    /// `chain`: the outermost envelope is addressed to `chain[0]`, the
    /// innermost body is `self` addressed to `chain.last()`, and each layer's
    /// delay is drawn i.i.d. from `poisson_delay(rate_delay)` (spec §4.9).
    pub fn wrap_chain(
        self,
        chain: &[R],
        rate_delay: f64,
        rng: &mut DeterministicRng,
    ) -> Envelope<R, P> {
        debug_assert!(!chain.is_empty());
        let tag = self.tag;
        let recipient = self.recipient.clone();
        let mut envelope = Envelope::Plain {
            recipient,
            tag,
            body: self.into_plain_body(),
            delivery_online_state: DeliveryOnlineState::Unset,
        };
        for hop in chain.iter().rev() {
            envelope = Envelope::Wrapped {
                recipient: hop.clone(),
                tag,
                body: Box::new(envelope),
                delay_ms: rng.poisson_delay(rate_delay),
                delivery_online_state: DeliveryOnlineState::Unset,
            };
        }
        envelope
    }
}

/// Builds per-suffix wrapped chains (one per message, each with its own
/// tag), groups them into a `MultiWrapped` envelope addressed to
/// `prefix.last()`, then extends the prefix with further `Wrapped` layers
/// tagged `Multi` (spec §4.9).
pub fn wrap_multi<R: Clone + PartialEq, P>(
    messages: Vec<OutboundMessage<R, P>>,
    prefix: &[R],
    mut suffix_for: impl FnMut(&OutboundMessage<R, P>) -> Vec<R>,
    rate_delay: f64,
    rng: &mut DeterministicRng,
) -> Envelope<R, P> {
    debug_assert!(!prefix.is_empty());
    let wrapped: Vec<Envelope<R, P>> = messages
        .into_iter()
        .map(|m| {
            let suffix = suffix_for(&m);
            m.wrap_chain(&suffix, rate_delay, rng)
        })
        .collect();

    let mut envelope = Envelope::MultiWrapped {
        recipient: prefix.last().unwrap().clone(),
        body: wrapped,
        delay_ms: rng.poisson_delay(rate_delay),
        delivery_online_state: DeliveryOnlineState::Unset,
    };
    for hop in prefix[..prefix.len() - 1].iter().rev() {
        envelope = Envelope::Wrapped {
            recipient: hop.clone(),
            tag: Tag::Multi,
            body: Box::new(envelope),
            delay_ms: rng.poisson_delay(rate_delay),
            delivery_online_state: DeliveryOnlineState::Unset,
        };
    }
    envelope
}

/// Depth-first walk over an envelope chain, yielding every layer from
/// outermost to innermost (fanning into every branch of a `MultiWrapped`).
/// Ported from `original_source/simulation/utils.py::traverse_message`,
/// used by the envelope-integrity property test (spec §8 property 5).
pub fn iter_chain<R, P>(envelope: &Envelope<R, P>) -> Vec<&Envelope<R, P>> {
    let mut out = vec![envelope];
    match envelope {
        Envelope::Wrapped { body, .. } => out.extend(iter_chain(body)),
        Envelope::MultiWrapped { body, .. } => {
            for inner in body {
                out.extend(iter_chain(inner));
            }
        }
        Envelope::Plain { .. } => {}
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::Delta;

    #[test]
    fn wrap_chain_unwraps_to_original_hops_and_body() {
        let mut rng = DeterministicRng::new(1, Delta::from_millis(1));
        let msg = OutboundMessage::<u32, ()>::application(99, GroupId(0), ());
        let chain = vec![10u32, 20, 30, 99];
        let envelope = msg.wrap_chain(&chain, 2.0, &mut rng);

        let mut current = envelope;
        for expected_hop in &chain {
            assert_eq!(current.recipient(), expected_hop);
            let mut next = current.unwrap_one();
            assert_eq!(next.len(), 1);
            current = next.remove(0);
        }
        match current {
            Envelope::Plain {
                body: PlainBody::Application { group_id, .. },
                ..
            } => assert_eq!(group_id, GroupId(0)),
            _ => panic!("expected terminal Plain/Application body"),
        }
    }

    #[test]
    fn multi_wrap_fans_out_at_prefix_end() {
        let mut rng = DeterministicRng::new(2, Delta::from_millis(1));
        let a = OutboundMessage::<u32, ()>::application(100, GroupId(0), ());
        let b = OutboundMessage::<u32, ()>::application(200, GroupId(0), ());
        let prefix = vec![1u32, 2, 3];
        let envelope = wrap_multi(
            vec![a, b],
            &prefix,
            |m| vec![m.recipient],
            1.5,
            &mut rng,
        );

        assert_eq!(*envelope.recipient(), 1);
        let mut layer = envelope.unwrap_one();
        assert_eq!(layer.len(), 1);
        let mut current = layer.remove(0);
        assert_eq!(*current.recipient(), 2);
        layer = current.unwrap_one();
        current = layer.remove(0);
        assert_eq!(*current.recipient(), 3);

        let fanned = current.unwrap_one();
        assert_eq!(fanned.len(), 2);
        let recipients: Vec<u32> = fanned.iter().map(|e| *e.recipient()).collect();
        assert_eq!(recipients, vec![100, 200]);
    }

    #[test]
    fn delivery_online_state_propagates_into_wrapped_body() {
        let mut rng = DeterministicRng::new(3, Delta::from_millis(1));
        let msg = OutboundMessage::<u32, ()>::loop_message(5);
        let mut envelope = msg.wrap_chain(&[1, 5], 1.0, &mut rng);
        envelope.set_delivery_online_state(DeliveryOnlineState::Online);

        let inner = envelope.unwrap_one().remove(0);
        assert_eq!(inner.delivery_online_state(), DeliveryOnlineState::Online);
    }
}
