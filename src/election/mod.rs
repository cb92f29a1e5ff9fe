//! Per-node election state machine.
//!
//! ```text
//!            timer fires
//!   Pending ─────────────► Leading
//!      ▲                      │
//!      └──────────────────────┘
//!    rival Heartbeat/Command, or self abdication
//!
//!   any state ── shutdown ──► Terminated
//! ```
//!
//! Collisions are resolved by whoever is heard first: a leader that hears any
//! foreign heartbeat or command steps down immediately, without comparing
//! identities. Two leaders may coexist briefly; they collapse as soon as each
//! hears the other.

pub mod node;
pub mod state;
pub mod timer;

pub use node::{DictatorNode, NodeContext};
pub use state::ElectionState;
