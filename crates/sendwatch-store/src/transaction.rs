//! Atomic multi-message transactions.

use sendwatch_core::ChangeEvent;
use sled::transaction::{ConflictableTransactionError, TransactionError, TransactionalTree};

use crate::error::Error;
use crate::message::{Message, MessageId};
use crate::store::MessageStore;

/// A pending operation in a transaction.
#[derive(Debug, Clone)]
pub enum TransactionOp {
    /// Store a new message. Fails if the id already exists.
    Insert(Message),
    /// Overwrite an existing message. Fails if the id does not exist.
    Update(Message),
    /// Remove an existing message. Fails if the id does not exist.
    Delete(MessageId),
}

impl TransactionOp {
    fn id(&self) -> MessageId {
        match self {
            Self::Insert(message) | Self::Update(message) => message.id,
            Self::Delete(id) => *id,
        }
    }
}

/// An operation with its record already serialized.
enum EncodedOp {
    Insert(MessageId, Vec<u8>),
    Update(MessageId, Vec<u8>),
    Delete(MessageId),
}

/// A transaction for atomic multi-message operations.
///
/// Operations are collected and executed atomically on commit. A successful
/// commit that touched anything publishes exactly one [`ChangeEvent`] on the
/// store's feed.
pub struct Transaction<'a> {
    store: &'a MessageStore,
    ops: Vec<TransactionOp>,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(store: &'a MessageStore) -> Self {
        Self {
            store,
            ops: Vec::new(),
        }
    }

    /// Queue an insert.
    pub fn insert(&mut self, message: Message) -> &mut Self {
        self.ops.push(TransactionOp::Insert(message));
        self
    }

    /// Queue an update.
    pub fn update(&mut self, message: Message) -> &mut Self {
        self.ops.push(TransactionOp::Update(message));
        self
    }

    /// Queue a delete.
    pub fn delete(&mut self, id: MessageId) -> &mut Self {
        self.ops.push(TransactionOp::Delete(id));
        self
    }

    /// Get the pending operations.
    pub fn operations(&self) -> &[TransactionOp] {
        &self.ops
    }

    /// Get the number of pending operations.
    pub fn operation_count(&self) -> usize {
        self.ops.len()
    }

    /// Discard all pending operations.
    pub fn rollback(self) {
        drop(self.ops);
    }

    /// Commit the transaction atomically.
    ///
    /// All operations succeed or none do. Returns the change event that was
    /// published; an empty transaction publishes nothing and returns an empty
    /// event.
    pub fn commit(self) -> Result<ChangeEvent<MessageId>, Error> {
        if self.ops.is_empty() {
            return Ok(ChangeEvent::new());
        }

        let encoded = self.encode()?;

        // Held through publish so feed order matches commit order
        let _guard = self.store.commit_lock();

        let result: Result<(), TransactionError<Error>> =
            self.store.messages_tree().transaction(|tx| {
                for op in &encoded {
                    Self::execute(tx, op)?;
                }
                Ok(())
            });
        result?;

        let event = self.change_event();
        self.store.publish(&event);
        Ok(event)
    }

    fn encode(&self) -> Result<Vec<EncodedOp>, Error> {
        self.ops
            .iter()
            .map(|op| {
                Ok(match op {
                    TransactionOp::Insert(message) => {
                        EncodedOp::Insert(message.id, message.to_bytes()?)
                    }
                    TransactionOp::Update(message) => {
                        EncodedOp::Update(message.id, message.to_bytes()?)
                    }
                    TransactionOp::Delete(id) => EncodedOp::Delete(*id),
                })
            })
            .collect()
    }

    /// Execute one operation within a sled transaction.
    fn execute(
        tx: &TransactionalTree,
        op: &EncodedOp,
    ) -> Result<(), ConflictableTransactionError<Error>> {
        match op {
            EncodedOp::Insert(id, bytes) => {
                if tx.get(id.as_bytes())?.is_some() {
                    return Err(ConflictableTransactionError::Abort(Error::AlreadyExists(*id)));
                }
                tx.insert(&id.as_bytes()[..], bytes.as_slice())?;
            }
            EncodedOp::Update(id, bytes) => {
                if tx.get(id.as_bytes())?.is_none() {
                    return Err(ConflictableTransactionError::Abort(Error::NotFound(*id)));
                }
                tx.insert(&id.as_bytes()[..], bytes.as_slice())?;
            }
            EncodedOp::Delete(id) => {
                if tx.remove(&id.as_bytes()[..])?.is_none() {
                    return Err(ConflictableTransactionError::Abort(Error::NotFound(*id)));
                }
            }
        }
        Ok(())
    }

    /// Build the change event for the committed operations.
    ///
    /// A message deleted by this transaction is reported only as deleted.
    fn change_event(&self) -> ChangeEvent<MessageId> {
        let mut event = ChangeEvent::new();
        for op in &self.ops {
            let id = op.id();
            match op {
                TransactionOp::Insert(_) => event.inserted.insert(id),
                TransactionOp::Update(_) => event.updated.insert(id),
                TransactionOp::Delete(_) => event.deleted.insert(id),
            };
        }

        let ChangeEvent {
            inserted,
            updated,
            deleted,
        } = &mut event;
        inserted.retain(|id| !deleted.contains(id));
        updated.retain(|id| !deleted.contains(id));

        event
    }
}
