//! Loopix/Rollercoaster simulation entities built on top of the
//! protocol-agnostic `sim-engine` kernel.

pub mod application;
pub mod engine;
pub mod ids;
pub mod log;
pub mod multicast;
pub mod network;
pub mod node;
pub mod payload;
pub mod settings;

pub use engine::Simulation;
pub use settings::Settings;
