//! # outbox-core
//!
//! Pure logic for the offline outbox (no I/O, instant tests).
//!
//! This crate implements the queue bookkeeping and the state machines that
//! drive delivery, without any network or disk I/O.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects:
//! - [`OutboxBuffer`] owns the in-memory view of the queue
//! - [`on_outcome`] maps a delivery result to the next record state
//! - [`ConnectivityState`] turns platform signals into transitions and drain
//!   requests
//! - [`SyncSession`] accumulates one drain pass into a [`SyncSummary`]
//!
//! The actual I/O (store, network, timers) is performed by `outbox-client`,
//! which interprets what these produce.
//!
//! [`SyncSummary`]: outbox_types::SyncSummary

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod connectivity;
pub mod delivery;
pub mod lease;
pub mod session;

pub use buffer::{BufferError, InsertOutcome, OutboxBuffer, QueueCounts};
pub use connectivity::{ConnectivityAction, ConnectivityState, DrainReason, Signal, Transition};
pub use delivery::{on_outcome, reset_for_retry, DeliveryFailure, DeliveryOutcome, RetryPolicy, StatusChange};
pub use lease::{Lease, DRAIN_LEASE};
pub use session::SyncSession;
