//! Stable handles into the simulation's entity arenas (spec §9 "Cyclic
//! ownership"): rather than give users/providers/mixes direct references to
//! each other (which would require a garbage collector, as the original
//! Python implementation relies on), every cross-entity reference is one of
//! these small `Copy` ids, resolved against the owning `Simulation`'s
//! vectors.

use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub usize);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProviderId(pub usize);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MixId {
    pub layer: usize,
    pub index: usize,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AppId(pub usize);

/// Any entity that can appear as an envelope's `recipient` field. Only the
/// `Mix`/`Provider` variants are ever used as the top-level recipient of an
/// in-transit envelope the engine dispatches `deliver` to; `User` appears
/// only as the terminal addressee carried *inside* an envelope chain (spec
/// §4.6: "if the unwrapped envelope's recipient is a User, append to that
/// user's postbox").
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeRef {
    User(UserId),
    Provider(ProviderId),
    Mix(MixId),
}

impl From<UserId> for NodeRef {
    fn from(id: UserId) -> Self {
        NodeRef::User(id)
    }
}
impl From<ProviderId> for NodeRef {
    fn from(id: ProviderId) -> Self {
        NodeRef::Provider(id)
    }
}
impl From<MixId> for NodeRef {
    fn from(id: MixId) -> Self {
        NodeRef::Mix(id)
    }
}
