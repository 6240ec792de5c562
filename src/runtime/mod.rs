//! Per-event actor dispatcher, registry, and event stream.

/// Sync event payloads emitted after each transition.
pub mod events;
/// Dispatcher handle and per-event actor loop.
pub mod handle;
/// Event id → state map.
pub mod registry;
