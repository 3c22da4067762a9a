//! Subscription tokens.

use std::fmt;
use std::num::NonZeroU64;

/// Opaque handle returned by [`Dispatcher::register`](crate::Dispatcher::register).
///
/// Tokens are never zero, so embedders can keep `0` as a "no subscription"
/// sentinel. Within one dispatcher a token is never reissued, even after it
/// has been revoked.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverToken(NonZeroU64);

impl ObserverToken {
    /// Rebuild a token from its raw value. Returns `None` for zero.
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(Self)
    }

    /// The raw numeric value.
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Debug for ObserverToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObserverToken({})", self.0)
    }
}

impl fmt::Display for ObserverToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonic token allocator.
#[derive(Debug, Default)]
pub(crate) struct TokenCounter {
    last: u64,
}

impl TokenCounter {
    /// Allocate the next token (previous + 1, starting at 1).
    pub(crate) fn next(&mut self) -> ObserverToken {
        // Saturates at u64::MAX; unreachable in practice.
        let token = NonZeroU64::MIN.saturating_add(self.last);
        self.last = token.get();
        ObserverToken(token)
    }

    /// Number of tokens issued so far.
    pub(crate) fn issued(&self) -> u64 {
        self.last
    }
}
