//! Conversation orchestration: per-contact locks, the delayed-start timer
//! registry, keyword detection, and the funnel state machine engine.

pub mod engine;
pub mod keywords;
pub mod locks;
pub mod timers;

pub use engine::FunnelEngine;
pub use keywords::KeywordMatcher;
pub use locks::{ContactGuard, ContactLocks};
pub use timers::TimerRegistry;
