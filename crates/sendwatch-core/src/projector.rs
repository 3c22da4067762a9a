//! Projection policy supplied by the embedding application.

use std::fmt::Debug;
use std::hash::Hash;

/// Maps a tracked entity to the value whose transitions are reported.
///
/// The dispatcher never looks inside a projection; it only compares two of
/// them for equality. Projections should be cheap to compute because they
/// are evaluated for every tracked entity touched by a commit.
pub trait Projector {
    /// Stable identity of a tracked entity.
    type Key: Clone + Eq + Hash + Debug;

    /// Comparable projected state.
    type Projection: Clone + PartialEq + Debug;

    /// Project the current persisted state of `key`.
    ///
    /// An entity that no longer exists should project to the same value as
    /// [`deleted`](Self::deleted). A resync after lag only has `project` to
    /// go on and must not report a delete twice.
    fn project(&self, key: &Self::Key) -> Self::Projection;

    /// Terminal projection for an entity deleted by a commit.
    ///
    /// Called instead of [`project`](Self::project) so implementations never
    /// have to read a record that no longer exists.
    fn deleted(&self, key: &Self::Key) -> Self::Projection;
}
