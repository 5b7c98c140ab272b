//! Tracks which stories a user has already started

use async_trait::async_trait;
use std::collections::HashSet;
use tokio::sync::RwLock;

/// "Story already started" lookup keyed by (user, story)
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn has_started(&self, user_id: &str, story_id: &str) -> bool;

    async fn mark_started(&self, user_id: &str, story_id: &str);
}

/// Process-local progress store
#[derive(Debug, Default)]
pub struct InMemoryProgress {
    started: RwLock<HashSet<(String, String)>>,
}

impl InMemoryProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProgressStore for InMemoryProgress {
    async fn has_started(&self, user_id: &str, story_id: &str) -> bool {
        self.started
            .read()
            .await
            .contains(&(user_id.to_string(), story_id.to_string()))
    }

    async fn mark_started(&self, user_id: &str, story_id: &str) {
        self.started
            .write()
            .await
            .insert((user_id.to_string(), story_id.to_string()));
    }
}
