//! Sendwatch Core - change-notification dispatch over a store's commit feed.
//!
//! A [`Dispatcher`] tracks individual entities of an external store. Whenever
//! the store commits a transaction it publishes a [`ChangeEvent`] on its
//! [`ChangeFeed`]; the dispatcher recomputes the [`Projector`] value for every
//! tracked entity touched by that commit and calls the registered
//! [`Observer`] only when the value actually differs from the last one seen.

pub mod config;
pub mod dispatcher;
pub mod event;
pub mod feed;
pub mod global;
pub mod observer;
pub mod projector;
pub mod stats;
pub mod token;

pub use config::DispatcherConfig;
pub use dispatcher::Dispatcher;
pub use event::ChangeEvent;
pub use feed::{ChangeFeed, FeedRecv, FeedSubscription, DEFAULT_FEED_CAPACITY};
pub use global::{
    add_observer, global_instance, remove_observer, setup_global_instance,
    teardown_global_instance, try_global_instance,
};
pub use observer::Observer;
pub use projector::Projector;
pub use stats::DispatcherStats;
pub use token::ObserverToken;
