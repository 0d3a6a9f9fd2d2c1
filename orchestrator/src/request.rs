use std::sync::atomic::{AtomicU64, Ordering};

use engine::RequestId;

/// Source of [`RequestId`]s. Issuing a new id invalidates every result
/// tagged with an older one.
#[derive(Debug, Default)]
pub struct RequestCounter(AtomicU64);

impl RequestCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance the counter and return the new current id.
    pub fn next(&self) -> RequestId {
        RequestId(self.0.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Advance only if `id` is still current. Lets a task retry its own
    /// request without clobbering a newer one issued meanwhile.
    pub fn advance_from(&self, id: RequestId) -> Option<RequestId> {
        self.0
            .compare_exchange(id.0, id.0 + 1, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|prev| RequestId(prev + 1))
    }

    pub fn current(&self) -> RequestId {
        RequestId(self.0.load(Ordering::SeqCst))
    }

    pub fn is_current(&self, id: RequestId) -> bool {
        self.current() == id
    }
}
