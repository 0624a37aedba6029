//! Capacity-1 overwrite mailboxes carrying parameter updates to workers.

use parking_lot::Mutex;
use std::sync::Arc;
use world::ParamMap;

/// A single-entry mailbox with newest-wins semantics.
///
/// Producers never block: posting into an occupied mailbox replaces the
/// pending map.  The owning worker drains it from its control task; only the
/// latest map is ever observed (two posts before one take leave exactly the
/// second map applied).
#[derive(Clone, Debug, Default)]
pub struct ControlMailbox {
    pending: Arc<Mutex<Option<ParamMap>>>,
}

impl ControlMailbox {
    /// Creates an empty mailbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Posts a parameter map; returns `true` if a pending map was replaced.
    pub fn post(&self, params: ParamMap) -> bool {
        self.pending.lock().replace(params).is_some()
    }

    /// Takes the pending map, if any. Never blocks.
    pub fn take(&self) -> Option<ParamMap> {
        self.pending.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newest_wins_on_double_post() {
        let mailbox = ControlMailbox::new();
        assert!(!mailbox.post(ParamMap::new().with("target_fps", 20i64)));
        assert!(mailbox.post(ParamMap::new().with("target_fps", 30i64)));

        let taken = mailbox.take().expect("pending map");
        assert_eq!(taken.get_i64("target_fps"), Some(30));
        assert!(mailbox.take().is_none());
    }

    #[test]
    fn take_on_empty_is_none() {
        let mailbox = ControlMailbox::new();
        assert!(mailbox.take().is_none());
    }
}
