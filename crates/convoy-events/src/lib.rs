//! Event bus for the convoy agent.
//!
//! The bus provides a typed event enum, sequential identifiers, and a bounded replay ring so
//! late observers (status writers, tests) can inspect recent history. Internally it uses
//! `tokio::broadcast`; when the channel overflows, the oldest events are dropped for slow
//! subscribers.
#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]
#![allow(clippy::module_name_repetitions, clippy::multiple_crate_versions)]

pub mod error;
pub mod payloads;
pub mod routing;

pub use error::{EventBusError, EventBusResult};
pub use payloads::{DEFAULT_REPLAY_CAPACITY, Event, EventEnvelope, EventId};
pub use routing::{EventBus, EventStream};
