//! Protocol-agnostic discrete-event simulation kernel: deterministic RNG,
//! envelope model, delay buffer, broadcast schedule, and output
//! accumulation. The Loopix/Rollercoaster node state machines that use
//! these primitives live in the `loopix-sim` crate.

pub mod delay_buffer;
pub mod error;
pub mod message;
pub mod output;
pub mod rng;
pub mod schedule;
pub mod time;

pub use delay_buffer::DelayBuffer;
pub use error::{SimError, SimResult};
pub use message::{
    iter_chain, wrap_multi, DeliveryOnlineState, Envelope, GroupId, OutboundKind, OutboundMessage,
    PlainBody, RollercoasterBody, Tag,
};
pub use output::{OutputArtifact, SimulationOutput};
pub use rng::DeterministicRng;
pub use schedule::Schedule;
pub use time::{Delta, SimTime};
