use async_trait::async_trait;
use chat_core::{ConversationRecord, TenantRecord};
use chat_error::{ChatError, Result};
use sqlx::{PgPool, Row};
use tracing::instrument;

use crate::directory::{ConversationDirectory, TenantDirectory};

/// Postgres 目录实现，表结构由外部迁移维护
pub struct PgDirectory {
    db_pool: PgPool,
}

impl PgDirectory {
    pub fn new(db_pool: PgPool) -> Self {
        Self { db_pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| ChatError::Configuration {
                key: "DATABASE_URL".to_string(),
                reason: format!("Failed to connect to database: {}", e),
            })?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl TenantDirectory for PgDirectory {
    #[instrument(skip(self))]
    async fn find_tenant(&self, tenant_id: &str) -> Result<Option<TenantRecord>> {
        let row = sqlx::query("SELECT id, name, chat_enabled FROM tenants WHERE id = $1")
            .bind(tenant_id)
            .fetch_optional(&self.db_pool)
            .await
            .map_err(|e| ChatError::Database {
                message: format!("find_tenant: {}", e),
            })?;

        row.map(|row| {
            Ok(TenantRecord {
                id: row.try_get("id").map_err(db_err)?,
                name: row.try_get("name").map_err(db_err)?,
                chat_enabled: row.try_get("chat_enabled").map_err(db_err)?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl ConversationDirectory for PgDirectory {
    #[instrument(skip(self))]
    async fn find_conversation(&self, conversation_id: &str) -> Result<Option<ConversationRecord>> {
        let row = sqlx::query("SELECT id, tenant_id FROM conversations WHERE id = $1")
            .bind(conversation_id)
            .fetch_optional(&self.db_pool)
            .await
            .map_err(|e| ChatError::Database {
                message: format!("find_conversation: {}", e),
            })?;

        row.map(|row| {
            Ok(ConversationRecord {
                id: row.try_get("id").map_err(db_err)?,
                tenant_id: row.try_get("tenant_id").map_err(db_err)?,
            })
        })
        .transpose()
    }
}

fn db_err(e: sqlx::Error) -> ChatError {
    ChatError::Database {
        message: e.to_string(),
    }
}
