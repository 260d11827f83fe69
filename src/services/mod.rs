pub mod circuit_breaker;
pub mod classifier;
pub mod clock;
pub mod dead_letter;
pub mod events;
pub mod platform;
pub mod queue;
pub mod retry;
pub mod stats;
pub mod worker;
