use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of connection identifiers.
///
/// Constant-initialised, so it exists from process start; it is only ever
/// incremented. Ids start at 1 so that 0 can mean "no connection" across
/// the C boundary.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of one hub connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate the next identifier. Never returns the same value twice.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Per-connection invocation id generator.
#[derive(Debug, Default)]
pub(crate) struct InvocationIds(AtomicU64);

impl InvocationIds {
    pub(crate) fn next(&self) -> String {
        (self.0.fetch_add(1, Ordering::Relaxed) + 1).to_string()
    }
}
