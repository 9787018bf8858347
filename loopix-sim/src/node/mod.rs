//! Node state machines (spec §4.5-§4.7): the three kinds of entity an
//! envelope can be addressed to.

pub mod mix;
pub mod provider;
pub mod user;

pub use mix::MixNode;
pub use provider::Provider;
pub use user::User;
