//! Delivery-state projection for stored messages.

use std::sync::{Arc, Weak};

use sendwatch_core::{Dispatcher, DispatcherConfig, Projector};
use tracing::{trace, warn};

use crate::message::{DeliveryState, MessageId};
use crate::store::MessageStore;

/// What the dispatcher compares for a tracked message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeliveryProjection {
    /// The message exists with this delivery state.
    State(DeliveryState),
    /// The message could not be read, or the store is gone.
    Missing,
    /// The message does not exist: deleted by a commit, or never stored.
    Deleted,
}

/// Projects a message id to its current delivery state.
///
/// Holds the store weakly so that dropping the last store handle closes
/// its feed and tears down the attached dispatcher.
#[derive(Clone)]
pub struct DeliveryProjector {
    store: Weak<MessageStore>,
}

impl DeliveryProjector {
    /// Create a projector reading from `store`.
    pub fn new(store: &Arc<MessageStore>) -> Self {
        Self {
            store: Arc::downgrade(store),
        }
    }

    /// The store this projector reads from, if it is still open.
    pub fn store(&self) -> Option<Arc<MessageStore>> {
        self.store.upgrade()
    }
}

impl Projector for DeliveryProjector {
    type Key = MessageId;
    type Projection = DeliveryProjection;

    fn project(&self, key: &MessageId) -> DeliveryProjection {
        let Some(store) = self.store.upgrade() else {
            trace!(id = %key, "store dropped; projecting as missing");
            return DeliveryProjection::Missing;
        };

        match store.get(key) {
            Ok(Some(message)) => DeliveryProjection::State(message.delivery),
            // Same terminal value a delete commit yields
            Ok(None) => DeliveryProjection::Deleted,
            Err(e) => {
                warn!(id = %key, error = %e, "failed to read message for projection");
                DeliveryProjection::Missing
            }
        }
    }

    fn deleted(&self, _key: &MessageId) -> DeliveryProjection {
        DeliveryProjection::Deleted
    }
}

/// Create a delivery-state dispatcher attached to `store`'s change feed.
pub fn attach_dispatcher(
    store: &Arc<MessageStore>,
    config: DispatcherConfig,
) -> Dispatcher<DeliveryProjector> {
    Dispatcher::attach(DeliveryProjector::new(store), store.feed(), config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::message::Message;

    fn open() -> (Arc<MessageStore>, DeliveryProjector) {
        let store = Arc::new(MessageStore::open(StoreConfig::temporary()).unwrap());
        let projector = DeliveryProjector::new(&store);
        (store, projector)
    }

    #[test]
    fn test_project_existing() {
        let (store, projector) = open();
        let id = store.insert(Message::new([2; 16], "hi")).unwrap();

        assert_eq!(
            projector.project(&id),
            DeliveryProjection::State(DeliveryState::Pending)
        );

        store.mark_sent(&id).unwrap();
        assert_eq!(
            projector.project(&id),
            DeliveryProjection::State(DeliveryState::Sent)
        );
    }

    #[test]
    fn test_absent_record_projects_as_deleted() {
        let (store, projector) = open();
        assert_eq!(
            projector.project(&MessageId::generate()),
            DeliveryProjection::Deleted
        );

        let id = store.insert(Message::new([2; 16], "hi")).unwrap();
        store.delete(&id).unwrap();
        assert_eq!(projector.project(&id), projector.deleted(&id));
    }

    #[test]
    fn test_deleted_is_terminal() {
        let (store, projector) = open();
        let id = store.insert(Message::new([2; 16], "hi")).unwrap();

        // Does not consult the store
        assert_eq!(projector.deleted(&id), DeliveryProjection::Deleted);
    }

    #[test]
    fn test_projector_does_not_keep_store_alive() {
        let (store, projector) = open();
        let id = store.insert(Message::new([2; 16], "hi")).unwrap();
        assert!(projector.store().is_some());

        drop(store);

        assert!(projector.store().is_none());
        assert_eq!(projector.project(&id), DeliveryProjection::Missing);
    }
}
