//! hubdeploy-state — embedded state store for the hub deploy engine.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for deploys, deploy tasks, reservations, cluster metadata, and the
//! repository records the schedulers resolve tasks against.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Deploys and tasks are keyed by sequence-assigned `u64` ids so the FIFO
//! scheduler's cursor is a plain range scan. Status changes go through the
//! [`lifecycle`] table and are persisted by [`StateStore::apply_transition`],
//! which writes the task and its deploy in one transaction.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod lifecycle;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use lifecycle::{TaskEvent, Transition};
pub use store::StateStore;
pub use types::*;
