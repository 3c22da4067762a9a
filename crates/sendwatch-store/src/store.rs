//! Message store implementation.

use parking_lot::{Mutex, MutexGuard};
use sendwatch_core::{ChangeEvent, ChangeFeed};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Tree};
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::error::Error;
use crate::message::{DeliveryState, Message, MessageId};
use crate::transaction::Transaction;

/// Tree name for message records.
const MESSAGES_TREE: &str = "messages";

/// Sled-backed message store.
///
/// Writes go through [`Transaction`]s. Each successful commit publishes one
/// change event on [`feed`](Self::feed). The store is `Send + Sync`; commits
/// from different threads are serialized so events are published in commit
/// order.
///
/// The feed closes when the store is dropped, which tears down any
/// dispatcher attached to it.
pub struct MessageStore {
    /// The underlying sled database.
    db: Db,

    /// Tree for message records keyed by message id.
    messages: Tree,

    /// Commit notifications.
    feed: ChangeFeed<MessageId>,

    commit_lock: Mutex<()>,
}

impl MessageStore {
    /// Open or create a message store with the given configuration.
    pub fn open(config: StoreConfig) -> Result<Self, Error> {
        let db = config.to_sled_config().open()?;
        let messages = db.open_tree(MESSAGES_TREE)?;

        info!(
            path = %config.path.display(),
            temporary = config.temporary,
            recovered = db.was_recovered(),
            messages = messages.len(),
            "message store opened"
        );

        Ok(Self {
            db,
            messages,
            feed: ChangeFeed::new(config.feed_capacity),
            commit_lock: Mutex::new(()),
        })
    }

    /// Get a message by id.
    pub fn get(&self, id: &MessageId) -> Result<Option<Message>, Error> {
        match self.messages.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(Message::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Check whether a message exists.
    pub fn contains(&self, id: &MessageId) -> Result<bool, Error> {
        Ok(self.messages.contains_key(id.as_bytes())?)
    }

    /// Number of stored messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the store holds no messages.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Commit notifications for this store.
    pub fn feed(&self) -> &ChangeFeed<MessageId> {
        &self.feed
    }

    /// Begin a new transaction.
    pub fn transaction(&self) -> Transaction<'_> {
        Transaction::new(self)
    }

    /// Insert a message in its own transaction.
    pub fn insert(&self, message: Message) -> Result<MessageId, Error> {
        let id = message.id;
        let mut tx = self.transaction();
        tx.insert(message);
        tx.commit()?;
        Ok(id)
    }

    /// Change a message's delivery state in its own transaction.
    ///
    /// The commit is published even when the state is unchanged.
    pub fn set_delivery(&self, id: &MessageId, state: DeliveryState) -> Result<(), Error> {
        self.modify(id, |message| message.set_delivery(state))
    }

    /// Mark a message as sent.
    pub fn mark_sent(&self, id: &MessageId) -> Result<(), Error> {
        self.set_delivery(id, DeliveryState::Sent)
    }

    /// Mark a message as delivered.
    pub fn mark_delivered(&self, id: &MessageId) -> Result<(), Error> {
        self.set_delivery(id, DeliveryState::Delivered)
    }

    /// Mark a message as failed.
    pub fn mark_failed(&self, id: &MessageId) -> Result<(), Error> {
        self.set_delivery(id, DeliveryState::FailedToSend)
    }

    /// Replace a message's text without touching its delivery state.
    pub fn edit_text(&self, id: &MessageId, text: impl Into<String>) -> Result<(), Error> {
        let text = text.into();
        self.modify(id, |message| {
            message.text.clone_from(&text);
            message.touch();
        })
    }

    /// Save a message again without changing its content.
    pub fn touch(&self, id: &MessageId) -> Result<(), Error> {
        self.modify(id, Message::touch)
    }

    /// Delete a message in its own transaction.
    pub fn delete(&self, id: &MessageId) -> Result<(), Error> {
        let mut tx = self.transaction();
        tx.delete(*id);
        tx.commit()?;
        Ok(())
    }

    /// Flush pending writes to disk. Returns the number of bytes flushed.
    pub fn flush(&self) -> Result<usize, Error> {
        Ok(self.db.flush()?)
    }

    /// Read, change and write back one message atomically.
    ///
    /// The read happens inside the sled transaction and under the commit
    /// lock, so concurrent writers never overwrite each other's fields.
    /// `change` may run more than once if sled retries the transaction.
    fn modify<F>(&self, id: &MessageId, change: F) -> Result<(), Error>
    where
        F: Fn(&mut Message),
    {
        let _guard = self.commit_lock();

        let result: Result<(), TransactionError<Error>> = self.messages.transaction(|tx| {
            let bytes = tx
                .get(id.as_bytes())?
                .ok_or(ConflictableTransactionError::Abort(Error::NotFound(*id)))?;
            let mut message =
                Message::from_bytes(&bytes).map_err(ConflictableTransactionError::Abort)?;
            change(&mut message);
            let encoded = message
                .to_bytes()
                .map_err(ConflictableTransactionError::Abort)?;
            tx.insert(&id.as_bytes()[..], encoded)?;
            Ok(())
        });
        result?;

        self.publish(&ChangeEvent::new().with_updated(*id));
        Ok(())
    }

    /// Publish a committed change. Callers hold the commit lock.
    pub(crate) fn publish(&self, event: &ChangeEvent<MessageId>) {
        let receivers = self.feed.publish(event.clone());

        debug!(
            inserted = event.inserted.len(),
            updated = event.updated.len(),
            deleted = event.deleted.len(),
            receivers,
            "transaction committed"
        );
    }

    pub(crate) fn messages_tree(&self) -> &Tree {
        &self.messages
    }

    pub(crate) fn commit_lock(&self) -> MutexGuard<'_, ()> {
        self.commit_lock.lock()
    }
}
