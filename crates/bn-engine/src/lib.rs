//! banna/crates/bn-engine/src/lib.rs
//!
//! Detection, resolution and remediation of impersonators, plus the startup
//! and event plumbing that drives them.

pub mod compare;
pub mod detection;
pub mod engine;
pub mod invite;
pub mod lifecycle;
pub mod punishment;
pub mod resolver;

pub use detection::AvatarVerdict;
pub use engine::{ConfigUpdate, CustomMember, Engine, EngineOptions, Evaluation, Ports, SkipReason};
pub use lifecycle::{EventDispatcher, InboundEvent, LifecycleState};
