//! Per-event RSVP state and the pure transition engine.

/// Pure transition function.
pub mod engine;
/// Event state and its invariants.
pub mod state;
