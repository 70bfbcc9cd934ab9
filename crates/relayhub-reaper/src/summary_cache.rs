//! Summary Manager delegate (§4.7, §4.11 step 4): bounds the durable
//! per-room summary table by age and by count. `relayhub-agent` owns writing
//! summaries; this module only owns evicting stale ones.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use relayhub_store::MessageStore;
use tracing::warn;

/// Deletes summaries untouched for longer than `max_age`, then — if more
/// than `max_count` remain — deletes the oldest survivors down to that cap.
/// Returns the number of rows deleted.
pub async fn clip_summaries(store: &Arc<dyn MessageStore>, max_age: chrono::Duration, max_count: usize) -> usize {
    let ages = match store.list_summaries_oldest_first().await {
        Ok(ages) => ages,
        Err(e) => {
            warn!(error = %e, "reaper: failed to list summaries for clipping");
            return 0;
        }
    };

    let cutoff = Utc::now() - max_age;
    let mut deleted = 0usize;
    let mut survivors = Vec::with_capacity(ages.len());

    for entry in ages {
        let updated_at = entry
            .updated_at
            .parse::<DateTime<Utc>>()
            .unwrap_or_else(|_| Utc::now());
        if updated_at < cutoff {
            if delete(store, &entry.room_id).await {
                deleted += 1;
            }
        } else {
            survivors.push(entry);
        }
    }

    if survivors.len() > max_count {
        let excess = survivors.len() - max_count;
        for entry in survivors.into_iter().take(excess) {
            if delete(store, &entry.room_id).await {
                deleted += 1;
            }
        }
    }

    deleted
}

/// Heap-critical tier (§4.11 step 6): clip down to a hard cap regardless of age.
pub async fn clip_to_count(store: &Arc<dyn MessageStore>, max_count: usize) -> usize {
    let ages = match store.list_summaries_oldest_first().await {
        Ok(ages) => ages,
        Err(e) => {
            warn!(error = %e, "reaper: failed to list summaries for clipping");
            return 0;
        }
    };
    if ages.len() <= max_count {
        return 0;
    }
    let excess = ages.len() - max_count;
    let mut deleted = 0usize;
    for entry in ages.into_iter().take(excess) {
        if delete(store, &entry.room_id).await {
            deleted += 1;
        }
    }
    deleted
}

async fn delete(store: &Arc<dyn MessageStore>, room_id: &str) -> bool {
    match store.delete_summary(room_id).await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, room_id, "reaper: failed to delete stale summary");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relayhub_store::{sqlite::SqliteStore, ConversationSummaryRecord};

    fn store() -> Arc<dyn MessageStore> {
        Arc::new(SqliteStore::open_in_memory().unwrap())
    }

    #[tokio::test]
    async fn clips_to_max_count() {
        let store = store();
        for i in 0..5 {
            store
                .upsert_summary(&ConversationSummaryRecord {
                    room_id: format!("room-{i}"),
                    summary: "s".into(),
                    message_count: 1,
                    last_message_id: None,
                    last_message_timestamp: None,
                })
                .await
                .unwrap();
        }
        let deleted = clip_to_count(&store, 3).await;
        assert_eq!(deleted, 2);
        assert_eq!(store.list_summaries_oldest_first().await.unwrap().len(), 3);
    }
}
