//! Capacity-limited RSVP coordination with per-event serial actors.
//!
//! # Examples
//!
//! Pure transitions with [`core::engine::RsvpEngine`]:
//! ```
//! use nexus_rsvp::{
//!     action::Action,
//!     core::{engine::RsvpEngine, state::EventState},
//!     types::Placement,
//! };
//!
//! let state = EventState::new("raid-night", 1);
//! let (state, report) = RsvpEngine::apply(&state, &Action::join("alice")).expect("join");
//! assert_eq!(report.to, Placement::Confirmed);
//! let (state, report) = RsvpEngine::apply(&state, &Action::join("bob")).expect("join");
//! assert_eq!(report.to, Placement::Waitlist);
//! let (state, report) = RsvpEngine::apply(&state, &Action::cancel("alice")).expect("cancel");
//! assert_eq!(report.promoted, vec!["bob".to_string()]);
//! assert_eq!(state.version(), 3);
//! ```
//!
//! Dispatcher with a SQLite sync journal:
//! ```no_run
//! use std::sync::Arc;
//!
//! use nexus_rsvp::{
//!     action::ActionRequest,
//!     config::RuntimeConfig,
//!     notify::{sqlite::SqliteSyncJournal, SyncSubscriber},
//!     runtime::handle::spawn_dispatcher,
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let journal = SqliteSyncJournal::open("rsvp-sync.db").expect("open sqlite");
//! let subscribers: Vec<Arc<dyn SyncSubscriber>> = vec![Arc::new(journal)];
//! let handle = spawn_dispatcher(RuntimeConfig::default(), subscribers);
//! let applied = handle
//!     .submit(ActionRequest::join("raid-night", "alice").with_capacity(10))
//!     .await
//!     .expect("join");
//! assert_eq!(applied.snapshot.confirmed_count(), 1);
//! handle.shutdown().await;
//! # }
//! ```
#![deny(missing_docs)]

/// Action model and request validation.
pub mod action;
/// Layered runtime configuration.
pub mod config;
/// Event state and the pure transition engine.
pub mod core;
/// Outbound sync notifications.
pub mod notify;
/// Snapshots, change reports, and event metadata.
pub mod rsvp;
/// Per-event actor dispatcher.
pub mod runtime;
/// Shared primitive types.
pub mod types;
