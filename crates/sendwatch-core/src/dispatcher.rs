//! Change-notification dispatcher.
//!
//! The dispatcher owns the subscription registry and a shadow copy of the last
//! projection seen for every subscription. For each committed transaction it
//! walks the registry in registration order, re-projects the entities that
//! the transaction touched and notifies only the observers whose projection
//! actually moved.
//!
//! ## Context binding
//!
//! A [`Dispatcher`] is an `Rc` handle and therefore neither `Send` nor `Sync`:
//! all registration, revocation and delivery happen on the context that
//! created it. Stores may commit from other threads; their events reach the
//! dispatcher through the [`ChangeFeed`] and are delivered when that context
//! calls [`Dispatcher::process_pending`] or drives [`Dispatcher::run`].
//!
//! ## Re-entrancy
//!
//! Observers are invoked with no internal borrow held, so a callback may
//! register or unregister subscriptions on the same dispatcher. A token
//! revoked mid-event is not invoked afterwards; a token registered mid-event
//! starts with the next event.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

use tokio::sync::Notify;
use tracing::{debug, info, trace, warn};

use crate::config::DispatcherConfig;
use crate::event::ChangeEvent;
use crate::feed::{ChangeFeed, FeedRecv, FeedSubscription};
use crate::observer::Observer;
use crate::projector::Projector;
use crate::stats::DispatcherStats;
use crate::token::{ObserverToken, TokenCounter};

/// A registered (entity, observer) pair.
struct Subscription<K> {
    key: K,
    observer: Rc<dyn Observer>,
}

/// Mutable registry state.
struct State<P: Projector> {
    /// Live subscriptions, iterated in registration order.
    subscriptions: BTreeMap<ObserverToken, Subscription<P::Key>>,
    /// Last projection observed per live subscription.
    shadows: HashMap<ObserverToken, P::Projection>,
    counter: TokenCounter,
    stats: DispatcherStats,
}

impl<P: Projector> State<P> {
    fn new() -> Self {
        Self {
            subscriptions: BTreeMap::new(),
            shadows: HashMap::new(),
            counter: TokenCounter::default(),
            stats: DispatcherStats::default(),
        }
    }
}

struct Inner<P: Projector> {
    projector: P,
    config: DispatcherConfig,
    state: RefCell<State<P>>,
    feed: RefCell<Option<FeedSubscription<P::Key>>>,
    /// Bound to a feed and not yet torn down. Stays set while `run` holds
    /// the receiver.
    attached: Cell<bool>,
    torn_down: Cell<bool>,
    /// Wakes a `run` loop parked on the feed when the dispatcher is torn down.
    shutdown: Notify,
}

/// Handle to a change-notification dispatcher.
///
/// Cloning the handle is cheap and every clone refers to the same registry.
/// The registry is released when [`teardown`](Self::teardown) is called, when
/// the change feed closes, or when the last handle is dropped.
pub struct Dispatcher<P: Projector> {
    inner: Rc<Inner<P>>,
}

impl<P: Projector> Clone for Dispatcher<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<P: Projector> Dispatcher<P> {
    /// Create a dispatcher bound to a store's change feed.
    pub fn attach(projector: P, feed: &ChangeFeed<P::Key>, config: DispatcherConfig) -> Self {
        let dispatcher = Self::build(projector, config, Some(feed.subscribe()));
        info!(
            subscribers = feed.subscriber_count(),
            "dispatcher attached to change feed"
        );
        dispatcher
    }

    /// Create a dispatcher with no feed. Events must be handed to
    /// [`on_change_event`](Self::on_change_event) directly.
    pub fn detached(projector: P, config: DispatcherConfig) -> Self {
        Self::build(projector, config, None)
    }

    fn build(
        projector: P,
        config: DispatcherConfig,
        feed: Option<FeedSubscription<P::Key>>,
    ) -> Self {
        Self {
            inner: Rc::new(Inner {
                projector,
                config,
                state: RefCell::new(State::new()),
                attached: Cell::new(feed.is_some()),
                feed: RefCell::new(feed),
                torn_down: Cell::new(false),
                shutdown: Notify::new(),
            }),
        }
    }

    /// Start tracking `key`.
    ///
    /// The current projection is captured as the baseline, so the observer
    /// only fires once the projection moves away from its state at
    /// registration time.
    ///
    /// After [`teardown`](Self::teardown) a fresh token is still issued but
    /// nothing is stored, so the observer is never invoked.
    pub fn register(&self, key: P::Key, observer: Rc<dyn Observer>) -> ObserverToken {
        if self.inner.torn_down.get() {
            let token = self.inner.state.borrow_mut().counter.next();
            warn!(
                token = token.get(),
                key = ?key,
                "register on torn down dispatcher ignored"
            );
            return token;
        }

        let baseline = self.inner.projector.project(&key);

        let mut state = self.inner.state.borrow_mut();
        let token = state.counter.next();

        debug!(
            token = token.get(),
            key = ?key,
            baseline = ?baseline,
            "observer registered"
        );

        state
            .subscriptions
            .insert(token, Subscription { key, observer });
        state.shadows.insert(token, baseline);
        token
    }

    /// Stop tracking the subscription behind `token`.
    ///
    /// Unknown or already revoked tokens are ignored. Returns whether a
    /// subscription was removed.
    pub fn unregister(&self, token: ObserverToken) -> bool {
        let mut state = self.inner.state.borrow_mut();
        let removed = state.subscriptions.remove(&token);
        state.shadows.remove(&token);

        match removed {
            Some(sub) => {
                debug!(token = token.get(), key = ?sub.key, "observer unregistered");
                true
            }
            None => {
                trace!(token = token.get(), "unregister of unknown token ignored");
                false
            }
        }
    }

    /// Diff every tracked entity touched by `event` and notify observers
    /// whose projection changed.
    ///
    /// Observers fire in registration order. Returns the number notified.
    pub fn on_change_event(&self, event: &ChangeEvent<P::Key>) -> usize {
        if event.is_empty() {
            trace!("empty change event ignored");
            return 0;
        }

        let candidates: Vec<(ObserverToken, P::Key)> = {
            let mut state = self.inner.state.borrow_mut();
            state.stats.events_processed += 1;
            state
                .subscriptions
                .iter()
                .filter(|(_, sub)| event.contains(&sub.key))
                .map(|(token, sub)| (*token, sub.key.clone()))
                .collect()
        };

        if candidates.is_empty() {
            trace!(changed = event.len(), "change event touched no tracked entity");
            return 0;
        }

        self.deliver(candidates, |key| {
            if event.is_deleted(key) {
                self.inner.projector.deleted(key)
            } else {
                self.inner.projector.project(key)
            }
        })
    }

    /// Re-diff every tracked entity against its current projection.
    ///
    /// Used after the feed drops events, when it is unknown which entities
    /// changed. Returns the number of observers notified.
    pub fn resync(&self) -> usize {
        let candidates: Vec<(ObserverToken, P::Key)> = {
            let mut state = self.inner.state.borrow_mut();
            state.stats.resyncs += 1;
            state
                .subscriptions
                .iter()
                .map(|(token, sub)| (*token, sub.key.clone()))
                .collect()
        };

        let notified = self.deliver(candidates, |key| self.inner.projector.project(key));
        debug!(notified, "dispatcher resynced");
        notified
    }

    /// Compare fresh projections with the shadows and invoke observers.
    fn deliver<F>(&self, candidates: Vec<(ObserverToken, P::Key)>, project: F) -> usize
    where
        F: Fn(&P::Key) -> P::Projection,
    {
        let mut notified = 0;

        for (token, key) in candidates {
            // Revoked by an earlier callback in this pass
            if !self.is_registered(token) {
                continue;
            }

            let current = project(&key);

            let observer = {
                let mut guard = self.inner.state.borrow_mut();
                let state = &mut *guard;

                let Some(sub) = state.subscriptions.get(&token) else {
                    continue;
                };
                debug_assert!(
                    state.shadows.contains_key(&token),
                    "live token {token} has no shadow"
                );
                let Some(previous) = state.shadows.get_mut(&token) else {
                    continue;
                };

                if *previous == current {
                    state.stats.no_op_changes += 1;
                    trace!(token = token.get(), key = ?key, "projection unchanged");
                    continue;
                }

                debug!(
                    token = token.get(),
                    key = ?key,
                    from = ?previous,
                    to = ?current,
                    "projection changed"
                );
                *previous = current;

                state.stats.notifications_sent += 1;
                Rc::clone(&sub.observer)
            };

            // Shadow already updated; callbacks may re-enter the dispatcher.
            observer.on_change();
            notified += 1;
        }

        notified
    }

    /// Drain every event queued on the change feed and deliver it.
    ///
    /// Returns the number of observers notified. A closed feed tears the
    /// dispatcher down.
    pub fn process_pending(&self) -> usize {
        let mut notified = 0;
        let mut handled = 0usize;

        loop {
            if let Some(max) = self.inner.config.max_events_per_pump {
                if handled >= max {
                    break;
                }
            }

            let next = {
                let mut feed = self.inner.feed.borrow_mut();
                match feed.as_mut() {
                    Some(sub) => sub.try_next(),
                    None => break,
                }
            };

            match next {
                FeedRecv::Event(event) => {
                    handled += 1;
                    notified += self.on_change_event(&event);
                }
                FeedRecv::Lagged(skipped) => {
                    handled += 1;
                    notified += self.handle_lag(skipped);
                }
                FeedRecv::Empty => break,
                FeedRecv::Closed => {
                    info!("change feed closed");
                    self.teardown();
                    break;
                }
            }
        }

        notified
    }

    /// Deliver feed events as they arrive until the feed closes or the
    /// dispatcher is torn down.
    ///
    /// Must be driven on the dispatcher's own context, e.g. with
    /// `tokio::task::LocalSet::spawn_local`. While `run` is waiting,
    /// [`process_pending`](Self::process_pending) finds nothing to drain.
    /// A [`teardown`](Self::teardown) wakes the loop, which then drops the
    /// receiver and returns.
    pub async fn run(&self) {
        debug!("dispatcher run loop started");

        loop {
            if self.inner.torn_down.get() {
                break;
            }

            // The receiver is taken out for the await so no borrow spans it.
            let Some(mut sub) = self.inner.feed.borrow_mut().take() else {
                break;
            };

            let next = tokio::select! {
                biased;
                _ = self.inner.shutdown.notified() => None,
                next = sub.next() => Some(next),
            };

            let Some(next) = next.filter(|_| !self.inner.torn_down.get()) else {
                break;
            };
            *self.inner.feed.borrow_mut() = Some(sub);

            match next {
                FeedRecv::Event(event) => {
                    self.on_change_event(&event);
                }
                FeedRecv::Lagged(skipped) => {
                    self.handle_lag(skipped);
                }
                FeedRecv::Empty => {}
                FeedRecv::Closed => {
                    info!("change feed closed");
                    self.teardown();
                    break;
                }
            }
        }

        debug!("dispatcher run loop stopped");
    }

    fn handle_lag(&self, skipped: u64) -> usize {
        warn!(
            skipped,
            resync = self.inner.config.resync_on_lag,
            "change feed lagged; events were dropped"
        );

        if self.inner.config.resync_on_lag {
            self.resync()
        } else {
            0
        }
    }

    /// Detach from the change feed and release every subscription.
    ///
    /// Idempotent. Counters are kept and tokens are never reissued.
    pub fn teardown(&self) {
        if self.inner.torn_down.replace(true) {
            return;
        }

        self.inner.attached.set(false);
        self.inner.feed.borrow_mut().take();
        // Stored as a permit if `run` is not parked right now
        self.inner.shutdown.notify_one();

        let released = {
            let mut state = self.inner.state.borrow_mut();
            let released = state.subscriptions.len();
            state.subscriptions.clear();
            state.shadows.clear();
            released
        };

        info!(released, "dispatcher torn down");
    }

    /// Whether the dispatcher is still receiving from a change feed.
    pub fn is_attached(&self) -> bool {
        self.inner.attached.get()
    }

    /// Whether `token` refers to a live subscription.
    pub fn is_registered(&self, token: ObserverToken) -> bool {
        self.inner.state.borrow().subscriptions.contains_key(&token)
    }

    /// Current baseline projection for `token`.
    pub fn shadow(&self, token: ObserverToken) -> Option<P::Projection> {
        self.inner.state.borrow().shadows.get(&token).cloned()
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.inner.state.borrow().subscriptions.len()
    }

    /// Whether there are no live subscriptions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the dispatcher counters.
    pub fn stats(&self) -> DispatcherStats {
        let state = self.inner.state.borrow();
        DispatcherStats {
            active_subscriptions: state.subscriptions.len(),
            ..state.stats.clone()
        }
    }

    /// The projection policy.
    pub fn projector(&self) -> &P {
        &self.inner.projector
    }

    /// The dispatcher configuration.
    pub fn config(&self) -> &DispatcherConfig {
        &self.inner.config
    }
}

impl<P: Projector> fmt::Debug for Dispatcher<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Dispatcher")
            .field("subscriptions", &state.subscriptions.len())
            .field("tokens_issued", &state.counter.issued())
            .field("attached", &self.is_attached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Delivery {
        Pending,
        Sent,
        Delivered,
        Gone,
    }

    /// Projector over an in-memory table the test mutates directly.
    #[derive(Default)]
    struct TableProjector {
        rows: RefCell<Map<u32, Delivery>>,
        projections: Cell<usize>,
    }

    impl TableProjector {
        fn set(&self, key: u32, state: Delivery) {
            self.rows.borrow_mut().insert(key, state);
        }
    }

    impl Projector for Rc<TableProjector> {
        type Key = u32;
        type Projection = Delivery;

        fn project(&self, key: &u32) -> Delivery {
            self.projections.set(self.projections.get() + 1);
            self.rows.borrow().get(key).copied().unwrap_or(Delivery::Gone)
        }

        fn deleted(&self, _key: &u32) -> Delivery {
            Delivery::Gone
        }
    }

    #[derive(Default)]
    struct Counter {
        hits: Cell<usize>,
    }

    impl Observer for Counter {
        fn on_change(&self) {
            self.hits.set(self.hits.get() + 1);
        }
    }

    fn setup() -> (Rc<TableProjector>, Dispatcher<Rc<TableProjector>>) {
        let table = Rc::new(TableProjector::default());
        let dispatcher = Dispatcher::detached(Rc::clone(&table), DispatcherConfig::default());
        (table, dispatcher)
    }

    fn updated(key: u32) -> ChangeEvent<u32> {
        ChangeEvent::new().with_updated(key)
    }

    #[test]
    fn test_register_captures_baseline() {
        let (table, dispatcher) = setup();
        table.set(1, Delivery::Pending);

        let token = dispatcher.register(1, Rc::new(Counter::default()));

        assert_eq!(token.get(), 1);
        assert!(dispatcher.is_registered(token));
        assert_eq!(dispatcher.shadow(token), Some(Delivery::Pending));
        assert_eq!(dispatcher.len(), 1);
    }

    #[test]
    fn test_tokens_never_reused() {
        let (_table, dispatcher) = setup();

        let t1 = dispatcher.register(1, Rc::new(Counter::default()));
        dispatcher.unregister(t1);
        let t2 = dispatcher.register(1, Rc::new(Counter::default()));

        assert_ne!(t1, t2);
        assert!(t2 > t1);
    }

    #[test]
    fn test_delivery_state_scenario() {
        let (table, dispatcher) = setup();
        table.set(1, Delivery::Pending);
        let counter = Rc::new(Counter::default());
        let token = dispatcher.register(1, counter.clone());

        // Save without a state change
        dispatcher.on_change_event(&updated(1));
        assert_eq!(counter.hits.get(), 0);

        table.set(1, Delivery::Sent);
        assert_eq!(dispatcher.on_change_event(&updated(1)), 1);
        assert_eq!(counter.hits.get(), 1);

        // Redundant save
        dispatcher.on_change_event(&updated(1));
        assert_eq!(counter.hits.get(), 1);

        assert!(dispatcher.unregister(token));
        table.set(1, Delivery::Delivered);
        dispatcher.on_change_event(&updated(1));
        assert_eq!(counter.hits.get(), 1);
    }

    #[test]
    fn test_unrelated_entity_ignored() {
        let (table, dispatcher) = setup();
        table.set(1, Delivery::Pending);
        let counter = Rc::new(Counter::default());
        dispatcher.register(1, counter.clone());

        table.set(2, Delivery::Sent);
        assert_eq!(dispatcher.on_change_event(&updated(2)), 0);
        assert_eq!(counter.hits.get(), 0);
    }

    #[test]
    fn test_untracked_entity_has_no_effect() {
        let (table, dispatcher) = setup();
        table.set(5, Delivery::Sent);
        let before = table.projections.get();

        assert_eq!(dispatcher.on_change_event(&updated(5)), 0);
        assert_eq!(table.projections.get(), before);
        assert!(dispatcher.is_empty());
    }

    #[test]
    fn test_empty_event_skips_projection() {
        let (table, dispatcher) = setup();
        table.set(1, Delivery::Pending);
        dispatcher.register(1, Rc::new(Counter::default()));
        let before = table.projections.get();

        assert_eq!(dispatcher.on_change_event(&ChangeEvent::new()), 0);
        assert_eq!(table.projections.get(), before);
        assert_eq!(dispatcher.stats().events_processed, 0);
    }

    #[test]
    fn test_unregister_unknown_token_is_noop() {
        let (_table, dispatcher) = setup();
        let token = dispatcher.register(1, Rc::new(Counter::default()));

        assert!(dispatcher.unregister(token));
        assert!(!dispatcher.unregister(token));
        assert!(!dispatcher.unregister(ObserverToken::from_raw(99).unwrap()));
        assert!(dispatcher.shadow(token).is_none());
    }

    #[test]
    fn test_reregistration_has_independent_baseline() {
        let (table, dispatcher) = setup();
        table.set(1, Delivery::Pending);
        let first = Rc::new(Counter::default());
        dispatcher.register(1, first.clone());

        table.set(1, Delivery::Sent);
        let second = Rc::new(Counter::default());
        let t2 = dispatcher.register(1, second.clone());
        assert_eq!(dispatcher.shadow(t2), Some(Delivery::Sent));

        dispatcher.on_change_event(&updated(1));
        assert_eq!(first.hits.get(), 1);
        assert_eq!(second.hits.get(), 0);
    }

    #[test]
    fn test_callbacks_fire_in_registration_order() {
        let (table, dispatcher) = setup();
        let order = Rc::new(RefCell::new(Vec::new()));

        for key in [3u32, 1, 2] {
            table.set(key, Delivery::Pending);
            let order = Rc::clone(&order);
            dispatcher.register(key, Rc::new(move || order.borrow_mut().push(key)));
        }

        let mut event = ChangeEvent::new();
        for key in [1u32, 2, 3] {
            table.set(key, Delivery::Sent);
            event.updated.insert(key);
        }

        assert_eq!(dispatcher.on_change_event(&event), 3);
        assert_eq!(*order.borrow(), vec![3, 1, 2]);
    }

    #[test]
    fn test_deletion_uses_terminal_projection() {
        let (table, dispatcher) = setup();
        table.set(1, Delivery::Sent);
        let counter = Rc::new(Counter::default());
        let token = dispatcher.register(1, counter.clone());
        let before = table.projections.get();

        // Row still present; the deleted set must win without projecting
        dispatcher.on_change_event(&ChangeEvent::new().with_deleted(1));

        assert_eq!(counter.hits.get(), 1);
        assert_eq!(dispatcher.shadow(token), Some(Delivery::Gone));
        assert_eq!(table.projections.get(), before);
    }

    #[test]
    fn test_shadow_updated_before_callback() {
        let (table, dispatcher) = setup();
        table.set(1, Delivery::Pending);

        let seen = Rc::new(Cell::new(None));
        let token_slot = Rc::new(Cell::new(None));
        let observer = {
            let dispatcher = dispatcher.clone();
            let seen = Rc::clone(&seen);
            let token_slot = Rc::clone(&token_slot);
            move || {
                if let Some(token) = token_slot.get() {
                    seen.set(dispatcher.shadow(token));
                }
            }
        };
        let token = dispatcher.register(1, Rc::new(observer));
        token_slot.set(Some(token));

        table.set(1, Delivery::Delivered);
        dispatcher.on_change_event(&updated(1));

        assert_eq!(seen.get(), Some(Delivery::Delivered));
    }

    #[test]
    fn test_unregister_inside_callback_suppresses_later_delivery() {
        let (table, dispatcher) = setup();
        table.set(1, Delivery::Pending);
        table.set(2, Delivery::Pending);

        let victim = Rc::new(Counter::default());
        let victim_token = Rc::new(Cell::new(None));

        let killer = {
            let dispatcher = dispatcher.clone();
            let victim_token = Rc::clone(&victim_token);
            move || {
                if let Some(token) = victim_token.get() {
                    dispatcher.unregister(token);
                }
            }
        };
        dispatcher.register(1, Rc::new(killer));
        victim_token.set(Some(dispatcher.register(2, victim.clone())));

        table.set(1, Delivery::Sent);
        table.set(2, Delivery::Sent);
        let event = ChangeEvent::new().with_updated(1).with_updated(2);

        assert_eq!(dispatcher.on_change_event(&event), 1);
        assert_eq!(victim.hits.get(), 0);
        assert_eq!(dispatcher.len(), 1);
    }

    #[test]
    fn test_register_inside_callback_starts_next_event() {
        let (table, dispatcher) = setup();
        table.set(1, Delivery::Pending);

        let late = Rc::new(Counter::default());
        let registered = Rc::new(Cell::new(false));
        let observer = {
            let dispatcher = dispatcher.clone();
            let late = Rc::clone(&late);
            let registered = Rc::clone(&registered);
            move || {
                if !registered.replace(true) {
                    dispatcher.register(1, late.clone());
                }
            }
        };
        dispatcher.register(1, Rc::new(observer));

        table.set(1, Delivery::Sent);
        assert_eq!(dispatcher.on_change_event(&updated(1)), 1);
        assert_eq!(late.hits.get(), 0);
        assert_eq!(dispatcher.len(), 2);

        table.set(1, Delivery::Delivered);
        assert_eq!(dispatcher.on_change_event(&updated(1)), 2);
        assert_eq!(late.hits.get(), 1);
    }

    #[test]
    fn test_resync_notifies_only_changed() {
        let (table, dispatcher) = setup();
        table.set(1, Delivery::Pending);
        table.set(2, Delivery::Pending);
        let a = Rc::new(Counter::default());
        let b = Rc::new(Counter::default());
        dispatcher.register(1, a.clone());
        dispatcher.register(2, b.clone());

        table.set(2, Delivery::Sent);
        assert_eq!(dispatcher.resync(), 1);
        assert_eq!(a.hits.get(), 0);
        assert_eq!(b.hits.get(), 1);
        assert_eq!(dispatcher.stats().resyncs, 1);
    }

    #[test]
    fn test_stats() {
        let (table, dispatcher) = setup();
        table.set(1, Delivery::Pending);
        dispatcher.register(1, Rc::new(Counter::default()));

        dispatcher.on_change_event(&updated(1));
        table.set(1, Delivery::Sent);
        dispatcher.on_change_event(&updated(1));

        let stats = dispatcher.stats();
        assert_eq!(stats.events_processed, 2);
        assert_eq!(stats.notifications_sent, 1);
        assert_eq!(stats.no_op_changes, 1);
        assert_eq!(stats.active_subscriptions, 1);
    }

    #[test]
    fn test_process_pending_drains_feed() {
        let table = Rc::new(TableProjector::default());
        let feed: ChangeFeed<u32> = ChangeFeed::default();
        let dispatcher = Dispatcher::attach(Rc::clone(&table), &feed, DispatcherConfig::default());
        assert!(dispatcher.is_attached());

        table.set(1, Delivery::Pending);
        let counter = Rc::new(Counter::default());
        dispatcher.register(1, counter.clone());

        table.set(1, Delivery::Sent);
        feed.publish(updated(1));
        feed.publish(updated(1));

        assert_eq!(dispatcher.process_pending(), 1);
        assert_eq!(counter.hits.get(), 1);
        assert_eq!(dispatcher.stats().events_processed, 2);
        assert_eq!(dispatcher.process_pending(), 0);
    }

    #[test]
    fn test_max_events_per_pump() {
        let table = Rc::new(TableProjector::default());
        let feed: ChangeFeed<u32> = ChangeFeed::default();
        let config = DispatcherConfig::new().with_max_events_per_pump(1);
        let dispatcher = Dispatcher::attach(Rc::clone(&table), &feed, config);

        table.set(1, Delivery::Pending);
        dispatcher.register(1, Rc::new(Counter::default()));

        feed.publish(updated(1));
        feed.publish(updated(1));

        dispatcher.process_pending();
        assert_eq!(dispatcher.stats().events_processed, 1);
        dispatcher.process_pending();
        assert_eq!(dispatcher.stats().events_processed, 2);
    }

    #[test]
    fn test_lag_triggers_resync() {
        let table = Rc::new(TableProjector::default());
        let feed: ChangeFeed<u32> = ChangeFeed::new(1);
        let dispatcher = Dispatcher::attach(Rc::clone(&table), &feed, DispatcherConfig::default());

        table.set(1, Delivery::Pending);
        let counter = Rc::new(Counter::default());
        dispatcher.register(1, counter.clone());

        table.set(1, Delivery::Sent);
        feed.publish(updated(1));
        feed.publish(updated(7));

        // Lag resync delivers the transition; the retained event touches 7 only
        assert_eq!(dispatcher.process_pending(), 1);
        assert_eq!(counter.hits.get(), 1);
        assert_eq!(dispatcher.stats().resyncs, 1);
    }

    #[test]
    fn test_lag_without_resync() {
        let table = Rc::new(TableProjector::default());
        let feed: ChangeFeed<u32> = ChangeFeed::new(1);
        let config = DispatcherConfig::new().without_resync();
        let dispatcher = Dispatcher::attach(Rc::clone(&table), &feed, config);

        table.set(1, Delivery::Pending);
        let counter = Rc::new(Counter::default());
        dispatcher.register(1, counter.clone());

        table.set(1, Delivery::Sent);
        feed.publish(updated(1));
        feed.publish(updated(7));

        assert_eq!(dispatcher.process_pending(), 0);
        assert_eq!(counter.hits.get(), 0);
        assert_eq!(dispatcher.stats().resyncs, 0);
    }

    #[test]
    fn test_feed_close_tears_down() {
        let table = Rc::new(TableProjector::default());
        let feed: ChangeFeed<u32> = ChangeFeed::default();
        let dispatcher = Dispatcher::attach(Rc::clone(&table), &feed, DispatcherConfig::default());
        dispatcher.register(1, Rc::new(Counter::default()));

        drop(feed);
        dispatcher.process_pending();

        assert!(!dispatcher.is_attached());
        assert!(dispatcher.is_empty());
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let table = Rc::new(TableProjector::default());
        let feed: ChangeFeed<u32> = ChangeFeed::default();
        let dispatcher = Dispatcher::attach(Rc::clone(&table), &feed, DispatcherConfig::default());
        let token = dispatcher.register(1, Rc::new(Counter::default()));
        assert_eq!(feed.subscriber_count(), 1);

        dispatcher.teardown();
        dispatcher.teardown();

        assert_eq!(feed.subscriber_count(), 0);
        assert!(!dispatcher.is_registered(token));
        assert!(dispatcher.shadow(token).is_none());

        let next = dispatcher.register(1, Rc::new(Counter::default()));
        assert!(next > token);
        assert!(!dispatcher.is_registered(next));
    }

    #[test]
    fn test_register_after_teardown_stores_nothing() {
        let (table, dispatcher) = setup();
        table.set(1, Delivery::Pending);
        dispatcher.teardown();
        let before = table.projections.get();

        let counter = Rc::new(Counter::default());
        let token = dispatcher.register(1, counter.clone());

        assert!(!dispatcher.is_registered(token));
        assert!(dispatcher.shadow(token).is_none());
        assert!(dispatcher.is_empty());
        assert_eq!(table.projections.get(), before);

        table.set(1, Delivery::Sent);
        assert_eq!(dispatcher.on_change_event(&updated(1)), 0);
        assert_eq!(counter.hits.get(), 0);
    }

    #[test]
    fn test_detached_is_never_attached() {
        let (_table, dispatcher) = setup();
        assert!(!dispatcher.is_attached());
    }
}
