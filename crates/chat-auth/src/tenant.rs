use chat_core::{ConversationId, TenantId};
use chat_error::{ChatError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::directory::{ConversationDirectory, TenantDirectory};

/// 租户校验结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantValidation {
    pub valid: bool,
    pub error: Option<String>,
}

impl TenantValidation {
    fn ok() -> Self {
        Self {
            valid: true,
            error: None,
        }
    }

    fn invalid(reason: &str) -> Self {
        Self {
            valid: false,
            error: Some(reason.to_string()),
        }
    }
}

/// 租户与会话归属校验
///
/// 只接受已清洗的 `TenantId`，格式校验在进入这里之前完成，不会为非法标识访问数据存储。
pub struct TenantValidator {
    tenants: Arc<dyn TenantDirectory>,
    conversations: Arc<dyn ConversationDirectory>,
}

impl TenantValidator {
    pub fn new(
        tenants: Arc<dyn TenantDirectory>,
        conversations: Arc<dyn ConversationDirectory>,
    ) -> Self {
        Self {
            tenants,
            conversations,
        }
    }

    /// 租户存在且聊天功能未被显式关闭
    pub async fn validate_tenant(&self, tenant_id: &TenantId) -> Result<TenantValidation> {
        let record = self.tenants.find_tenant(tenant_id.as_str()).await?;

        let validation = match record {
            None => TenantValidation::invalid("tenant not found"),
            Some(tenant) if tenant.chat_enabled == Some(false) => {
                TenantValidation::invalid("chat disabled for tenant")
            }
            Some(_) => TenantValidation::ok(),
        };

        if !validation.valid {
            debug!(tenant_id = %tenant_id, reason = ?validation.error, "tenant validation failed");
        }
        Ok(validation)
    }

    /// 每条消息都重新校验会话归属
    ///
    /// 会话不存在与属于其他租户返回同一个 NotFound，避免通过猜测 id 探测会话。
    pub async fn validate_conversation_ownership(
        &self,
        conversation_id: &ConversationId,
        tenant_id: &TenantId,
    ) -> Result<()> {
        let record = self
            .conversations
            .find_conversation(conversation_id.as_str())
            .await?;

        match record {
            Some(conversation) if conversation.tenant_id == tenant_id.as_str() => Ok(()),
            Some(conversation) => {
                warn!(
                    tenant_id = %tenant_id,
                    conversation_id = %conversation_id,
                    owner = %conversation.tenant_id,
                    "cross-tenant conversation access rejected"
                );
                Err(ChatError::NotFound {
                    resource: format!("conversation {}", conversation_id),
                })
            }
            None => Err(ChatError::NotFound {
                resource: format!("conversation {}", conversation_id),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemoryDirectory;
    use chat_core::{ConversationRecord, TenantRecord};

    async fn create_test_validator() -> TenantValidator {
        let directory = Arc::new(MemoryDirectory::new());
        directory
            .insert_tenant(TenantRecord {
                id: "abc123".into(),
                name: Some("Cafe".into()),
                chat_enabled: Some(true),
            })
            .await;
        directory
            .insert_tenant(TenantRecord {
                id: "legacy".into(),
                name: None,
                chat_enabled: None,
            })
            .await;
        directory
            .insert_tenant(TenantRecord {
                id: "disabled".into(),
                name: None,
                chat_enabled: Some(false),
            })
            .await;
        directory
            .insert_conversation(ConversationRecord {
                id: "conv-1".into(),
                tenant_id: "abc123".into(),
            })
            .await;
        TenantValidator::new(directory.clone(), directory)
    }

    fn tenant(raw: &str) -> TenantId {
        TenantId::parse(raw).unwrap()
    }

    fn conversation(raw: &str) -> ConversationId {
        ConversationId::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn test_validate_tenant() {
        let validator = create_test_validator().await;

        assert!(validator.validate_tenant(&tenant("abc123")).await.unwrap().valid);
        // 未设置开关视为启用
        assert!(validator.validate_tenant(&tenant("legacy")).await.unwrap().valid);

        let disabled = validator.validate_tenant(&tenant("disabled")).await.unwrap();
        assert!(!disabled.valid);
        assert!(disabled.error.is_some());

        let missing = validator.validate_tenant(&tenant("nobody")).await.unwrap();
        assert!(!missing.valid);
    }

    #[tokio::test]
    async fn test_conversation_ownership() {
        let validator = create_test_validator().await;

        validator
            .validate_conversation_ownership(&conversation("conv-1"), &tenant("abc123"))
            .await
            .unwrap();

        let foreign = validator
            .validate_conversation_ownership(&conversation("conv-1"), &tenant("legacy"))
            .await
            .unwrap_err();
        let missing = validator
            .validate_conversation_ownership(&conversation("conv-404"), &tenant("abc123"))
            .await
            .unwrap_err();

        assert!(matches!(foreign, ChatError::NotFound { .. }));
        assert!(matches!(missing, ChatError::NotFound { .. }));
        assert_eq!(foreign.user_message(), missing.user_message());
    }
}
