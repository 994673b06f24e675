use async_trait::async_trait;
use chat_core::{ConversationRecord, TenantRecord};
use chat_error::Result;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// 租户查询（外部数据存储）
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn find_tenant(&self, tenant_id: &str) -> Result<Option<TenantRecord>>;
}

/// 会话归属查询（外部数据存储）
#[async_trait]
pub trait ConversationDirectory: Send + Sync {
    async fn find_conversation(&self, conversation_id: &str) -> Result<Option<ConversationRecord>>;
}

/// 基于内存的目录，用于开发环境与测试
#[derive(Default)]
pub struct MemoryDirectory {
    tenants: RwLock<HashMap<String, TenantRecord>>,
    conversations: RwLock<HashMap<String, ConversationRecord>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_tenant(&self, tenant: TenantRecord) {
        self.tenants.write().await.insert(tenant.id.clone(), tenant);
    }

    pub async fn insert_conversation(&self, conversation: ConversationRecord) {
        self.conversations
            .write()
            .await
            .insert(conversation.id.clone(), conversation);
    }
}

#[async_trait]
impl TenantDirectory for MemoryDirectory {
    async fn find_tenant(&self, tenant_id: &str) -> Result<Option<TenantRecord>> {
        Ok(self.tenants.read().await.get(tenant_id).cloned())
    }
}

#[async_trait]
impl ConversationDirectory for MemoryDirectory {
    async fn find_conversation(&self, conversation_id: &str) -> Result<Option<ConversationRecord>> {
        Ok(self.conversations.read().await.get(conversation_id).cloned())
    }
}
