use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use greenroom_common::types::{FeatureFlags, WebinarStatus};
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Snapshot of a webinar's lifecycle state and feature flags, as managed by
/// the external webinar admin service. Read here to gate writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WebinarContext {
    pub status: WebinarStatus,
    pub flags: FeatureFlags,
}

impl WebinarContext {
    pub fn live(flags: FeatureFlags) -> Self {
        Self { status: WebinarStatus::Live, flags }
    }
}

/// Read-only directory of webinars. The Postgres variant reads the webinars
/// table this service shares with the admin surface; the Memory variant backs
/// tests and local development.
#[derive(Clone)]
pub enum WebinarDirectory {
    Postgres(PgPool),
    Memory(Arc<RwLock<HashMap<Uuid, WebinarContext>>>),
}

impl WebinarDirectory {
    pub fn memory() -> Self {
        Self::Memory(Arc::new(RwLock::new(HashMap::new())))
    }

    pub async fn lookup(&self, webinar_id: Uuid) -> Result<Option<WebinarContext>> {
        match self {
            Self::Postgres(pool) => lookup_pg(pool, webinar_id).await,
            Self::Memory(state) => Ok(state.read().await.get(&webinar_id).copied()),
        }
    }

    /// Seeds the in-memory directory. Postgres-backed directories are
    /// populated externally.
    pub async fn set_for_tests(&self, webinar_id: Uuid, context: WebinarContext) {
        if let Self::Memory(state) = self {
            state.write().await.insert(webinar_id, context);
        }
    }
}

async fn lookup_pg(pool: &PgPool, webinar_id: Uuid) -> Result<Option<WebinarContext>> {
    let row = sqlx::query_as::<_, (String, bool, bool, bool, bool)>(
        "SELECT status, chat_enabled, qa_enabled, polls_enabled, replay_enabled
         FROM webinars WHERE id = $1",
    )
    .bind(webinar_id)
    .fetch_optional(pool)
    .await
    .context("failed to look up webinar")?;

    let Some((status, chat_enabled, qa_enabled, polls_enabled, replay_enabled)) = row else {
        return Ok(None);
    };

    Ok(Some(WebinarContext {
        status: WebinarStatus::from_db_value(&status)
            .with_context(|| format!("unknown webinar status '{status}'"))?,
        flags: FeatureFlags { chat_enabled, qa_enabled, polls_enabled, replay_enabled },
    }))
}

#[cfg(test)]
mod tests {
    use super::{WebinarContext, WebinarDirectory};
    use greenroom_common::types::{FeatureFlags, WebinarStatus};
    use uuid::Uuid;

    #[tokio::test]
    async fn memory_directory_returns_seeded_context() {
        let directory = WebinarDirectory::memory();
        let webinar_id = Uuid::new_v4();
        directory
            .set_for_tests(webinar_id, WebinarContext::live(FeatureFlags::default()))
            .await;

        let context = directory
            .lookup(webinar_id)
            .await
            .expect("lookup should succeed")
            .expect("webinar should exist");

        assert_eq!(context.status, WebinarStatus::Live);
        assert!(context.flags.chat_enabled);
    }

    #[tokio::test]
    async fn memory_directory_misses_for_unknown_webinars() {
        let directory = WebinarDirectory::memory();

        let context = directory.lookup(Uuid::new_v4()).await.expect("lookup should succeed");

        assert!(context.is_none());
    }
}
