//! Process-wide definition identities.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter backing [`DefnId::next`].
static NEXT_DEFN_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identity of a definition (function, global, type parameter).
///
/// Ids are allocated from a process-wide counter and never reused, so
/// they stay valid across package loads and unloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DefnId(u64);

impl DefnId {
    /// Allocate a fresh id.
    pub fn next() -> DefnId {
        DefnId(NEXT_DEFN_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw counter value.
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DefnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
