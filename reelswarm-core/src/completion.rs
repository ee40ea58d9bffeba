use crate::error::StoreResult;
use crate::store::KeyValueStore;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AchievementKind {
    Cover,
    Trailer,
}

impl fmt::Display for AchievementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AchievementKind::Cover => write!(f, "cover"),
            AchievementKind::Trailer => write!(f, "trailer"),
        }
    }
}

/// Cardinalities of the two goal sets at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    pub covers: u64,
    pub trailers: u64,
    pub target: u64,
}

impl Progress {
    pub fn is_satisfied(&self) -> bool {
        self.covers >= self.target && self.trailers >= self.target
    }
}

/// Counts distinct movies that reached each goal and decides when the swarm
/// is done.
///
/// Termination is advisory: workers poll [`CompletionTracker::is_satisfied`]
/// before dispatching and stop on their own, so a few in-flight items may
/// land after the target is met.
pub struct CompletionTracker {
    store: Arc<dyn KeyValueStore>,
    cover_key: String,
    trailer_key: String,
    target: u64,
}

impl CompletionTracker {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        cover_key: impl Into<String>,
        trailer_key: impl Into<String>,
        target: u64,
    ) -> Self {
        Self {
            store,
            cover_key: cover_key.into(),
            trailer_key: trailer_key.into(),
            target,
        }
    }

    fn key(&self, kind: AchievementKind) -> &str {
        match kind {
            AchievementKind::Cover => &self.cover_key,
            AchievementKind::Trailer => &self.trailer_key,
        }
    }

    /// Idempotent. Returns true if `movie_id` was new to the set.
    pub async fn record(&self, movie_id: &str, kind: AchievementKind) -> StoreResult<bool> {
        self.store.set_add(self.key(kind), movie_id).await
    }

    pub async fn progress(&self) -> StoreResult<Progress> {
        Ok(Progress {
            covers: self.store.set_len(&self.cover_key).await?,
            trailers: self.store.set_len(&self.trailer_key).await?,
            target: self.target,
        })
    }

    pub async fn is_satisfied(&self) -> StoreResult<bool> {
        Ok(self.progress().await?.is_satisfied())
    }

    pub fn target(&self) -> u64 {
        self.target
    }

    /// Operator reset of both goal sets.
    pub async fn reset(&self) -> StoreResult<u64> {
        self.store
            .delete(&[self.cover_key.clone(), self.trailer_key.clone()])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn tracker(target: u64) -> CompletionTracker {
        CompletionTracker::new(
            Arc::new(MemoryStore::new()),
            "douban:cover_ids",
            "douban:trailer_ids",
            target,
        )
    }

    #[tokio::test]
    async fn test_record_is_idempotent() {
        let tracker = tracker(10);
        assert!(tracker.record("1", AchievementKind::Cover).await.unwrap());
        assert!(!tracker.record("1", AchievementKind::Cover).await.unwrap());
        assert!(tracker.record("2", AchievementKind::Cover).await.unwrap());
        assert!(tracker.record("1", AchievementKind::Trailer).await.unwrap());

        let progress = tracker.progress().await.unwrap();
        assert_eq!(progress.covers, 2);
        assert_eq!(progress.trailers, 1);
    }

    #[tokio::test]
    async fn test_satisfied_needs_both_sets() {
        let tracker = tracker(2);
        tracker.record("A", AchievementKind::Cover).await.unwrap();
        tracker.record("B", AchievementKind::Cover).await.unwrap();
        tracker.record("A", AchievementKind::Trailer).await.unwrap();
        assert!(!tracker.is_satisfied().await.unwrap());

        tracker.record("B", AchievementKind::Trailer).await.unwrap();
        assert!(tracker.is_satisfied().await.unwrap());
    }

    #[tokio::test]
    async fn test_reset_clears_progress() {
        let tracker = tracker(1);
        tracker.record("A", AchievementKind::Cover).await.unwrap();
        tracker.record("A", AchievementKind::Trailer).await.unwrap();
        assert!(tracker.is_satisfied().await.unwrap());

        assert_eq!(tracker.reset().await.unwrap(), 2);
        assert_eq!(tracker.progress().await.unwrap().covers, 0);
    }

    #[test]
    fn test_zero_target_is_trivially_satisfied() {
        assert!(Progress::default().is_satisfied());
    }
}
