//! 租户与会话标识
//!
//! 两种标识只能通过清洗函数构造，下游拿到的一定是格式合法的值。

use serde::{Deserialize, Serialize};
use std::fmt;

pub const MAX_ID_LEN: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantId(String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConversationId(String);

/// 清洗租户标识：去掉首尾空白后要求 1-100 个字母、数字或连字符
pub fn sanitize_tenant_id(raw: &str) -> Option<TenantId> {
    let trimmed = raw.trim();
    if is_valid(trimmed, |c| c.is_ascii_alphanumeric() || c == '-') {
        Some(TenantId(trimmed.to_string()))
    } else {
        None
    }
}

/// 会话标识额外允许下划线
pub fn sanitize_conversation_id(raw: &str) -> Option<ConversationId> {
    let trimmed = raw.trim();
    if is_valid(trimmed, |c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        Some(ConversationId(trimmed.to_string()))
    } else {
        None
    }
}

fn is_valid(s: &str, allowed: impl Fn(char) -> bool) -> bool {
    !s.is_empty() && s.len() <= MAX_ID_LEN && s.chars().all(allowed)
}

impl TenantId {
    pub fn parse(raw: &str) -> Option<Self> {
        sanitize_tenant_id(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl ConversationId {
    pub fn parse(raw: &str) -> Option<Self> {
        sanitize_conversation_id(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TenantId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        sanitize_tenant_id(&value).ok_or_else(|| format!("invalid tenant id: {:?}", value))
    }
}

impl TryFrom<String> for ConversationId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        sanitize_conversation_id(&value)
            .ok_or_else(|| format!("invalid conversation id: {:?}", value))
    }
}

impl From<TenantId> for String {
    fn from(id: TenantId) -> Self {
        id.0
    }
}

impl From<ConversationId> for String {
    fn from(id: ConversationId) -> Self {
        id.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
