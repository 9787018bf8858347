//! The application payload carried inside envelopes (spec §3 "Payload"),
//! plus the concrete envelope/outbound-message aliases this crate uses
//! throughout (`sim_engine`'s envelope model is generic over recipient and
//! payload types; here we fix them to `NodeRef`/`Payload`).

use serde::{Deserialize, Serialize};
use sim_engine::{Envelope, OutboundMessage};

use crate::ids::NodeRef;

/// Created by an application; `nonce` is monotonically increasing per
/// (application, session).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub nonce: u64,
    pub created_at: sim_engine::SimTime,
}

pub type Env = Envelope<NodeRef, Payload>;
pub type Out = OutboundMessage<NodeRef, Payload>;
