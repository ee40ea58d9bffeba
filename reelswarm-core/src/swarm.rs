use crate::config::SwarmKeys;
use crate::error::{Result, StoreResult};
use crate::frontier::{Frontier, PushOutcome};
use crate::listing::ListingPage;
use crate::request::CrawlRequest;
use crate::store::{KeyValueStore, QueueKeys};
use std::sync::Arc;
use tracing::info;

/// Deletes every key a run accumulates: frontier, fingerprints, movie ledger
/// and both goal sets. Node records are left for their owners to remove.
pub async fn reset_swarm(store: &Arc<dyn KeyValueStore>, keys: &SwarmKeys) -> StoreResult<u64> {
    let mut doomed = QueueKeys::new(&keys.requests).all();
    doomed.extend([
        keys.dupefilter.clone(),
        keys.movie_ids.clone(),
        keys.cover_ids.clone(),
        keys.trailer_ids.clone(),
    ]);
    let removed = store.delete(&doomed).await?;
    info!("Reset swarm state ({} keys removed)", removed);
    Ok(removed)
}

/// Pushes the first listing page of every movie type. Returns how many were
/// new to the frontier.
pub async fn seed_frontier(frontier: &Frontier, listing_url: &str) -> Result<usize> {
    let mut queued = 0;
    for page in ListingPage::seeds() {
        if frontier
            .push(&CrawlRequest::listing(&page, listing_url))
            .await?
            == PushOutcome::Queued
        {
            queued += 1;
        }
    }
    info!("Seeded frontier with {} listing requests", queued);
    Ok(queued)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing::DEFAULT_LISTING_URL;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_seed_and_reset() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let keys = SwarmKeys::new("douban", "crawler:nodes");
        let frontier = Frontier::new(store.clone(), &keys.requests);

        assert_eq!(seed_frontier(&frontier, DEFAULT_LISTING_URL).await.unwrap(), 31);
        assert_eq!(seed_frontier(&frontier, DEFAULT_LISTING_URL).await.unwrap(), 0);
        assert_eq!(frontier.len().await.unwrap(), 31);

        store.set_add(&keys.dupefilter, "x").await.unwrap();
        store.set_add(&keys.cover_ids, "1").await.unwrap();
        store.hash_set(&keys.nodes, "n", "{}").await.unwrap();

        reset_swarm(&store, &keys).await.unwrap();
        assert_eq!(frontier.len().await.unwrap(), 0);
        assert_eq!(store.set_len(&keys.dupefilter).await.unwrap(), 0);
        assert_eq!(store.set_len(&keys.cover_ids).await.unwrap(), 0);
        assert_eq!(store.hash_get_all(&keys.nodes).await.unwrap().len(), 1);
    }
}
