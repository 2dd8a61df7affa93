use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Post IDs whose bot reply has been taken on by some execution path.
///
/// A claim is held while a reply is pending and kept forever once the reply
/// is committed. Failed attempts release their claim so another trigger can
/// retry. Clones share the same set.
#[derive(Clone, Default)]
pub struct MentionCache {
    claimed_ids: Arc<Mutex<HashSet<u64>>>,
}

impl MentionCache {
    pub fn new() -> Self {
        MentionCache {
            claimed_ids: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub async fn is_claimed(&self, post_id: u64) -> bool {
        let set = self.claimed_ids.lock().await;
        set.contains(&post_id)
    }

    /// Check-and-set under one lock acquisition.
    ///
    /// Returns `false` when this call took the claim and `true` when the post
    /// was already claimed.
    pub async fn try_claim(&self, post_id: u64) -> bool {
        let mut set = self.claimed_ids.lock().await;
        !set.insert(post_id)
    }

    pub async fn release(&self, post_id: u64) {
        let mut set = self.claimed_ids.lock().await;
        set.remove(&post_id);
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.claimed_ids.lock().await.len()
    }
}
