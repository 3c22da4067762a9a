//! Sendwatch Store - a sled-backed message store for the sendwatch dispatcher.
//!
//! Every committed [`Transaction`] publishes exactly one
//! [`ChangeEvent`](sendwatch_core::ChangeEvent) on the store's feed, and
//! [`DeliveryProjector`] projects a message to its delivery state so a
//! [`Dispatcher`](sendwatch_core::Dispatcher) can report delivery transitions.

pub mod config;
pub mod error;
pub mod message;
pub mod projector;
pub mod store;
pub mod transaction;

pub use config::StoreConfig;
pub use error::Error;
pub use message::{current_timestamp, DeliveryState, Message, MessageId};
pub use projector::{attach_dispatcher, DeliveryProjection, DeliveryProjector};
pub use store::MessageStore;
pub use transaction::{Transaction, TransactionOp};

/// Re-export the dispatcher crate.
pub use sendwatch_core as core;
