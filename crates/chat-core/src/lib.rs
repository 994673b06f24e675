use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod ids;

pub use ids::{sanitize_conversation_id, sanitize_tenant_id, ConversationId, TenantId};

/// 请求分类：各自独立的限流预算与缓存 TTL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationClass {
    Message,
    KbQuery,
    DbLookup,
}

impl OperationClass {
    pub const ALL: [OperationClass; 3] = [
        OperationClass::Message,
        OperationClass::KbQuery,
        OperationClass::DbLookup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationClass::Message => "message",
            OperationClass::KbQuery => "kb_query",
            OperationClass::DbLookup => "db_lookup",
        }
    }
}

impl fmt::Display for OperationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 路由意图
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    KbQuestion,
    DbLookup,
    ActionRequest,
    Complaint,
    Greeting,
    Fallback,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::KbQuestion => "kb_question",
            Intent::DbLookup => "db_lookup",
            Intent::ActionRequest => "action_request",
            Intent::Complaint => "complaint",
            Intent::Greeting => "greeting",
            Intent::Fallback => "fallback",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentClassification {
    pub intent: Intent,
    pub confidence: f32,
    pub extracted_value: Option<String>,
}

/// 客服语气意图，仅用于分析与回复语气，不参与路由
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupportIntent {
    Faq,
    Policy,
    HowTo,
    Complaint,
    PreSales,
    EscalationRisk,
    General,
}

impl SupportIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            SupportIntent::Faq => "faq",
            SupportIntent::Policy => "policy",
            SupportIntent::HowTo => "how_to",
            SupportIntent::Complaint => "complaint",
            SupportIntent::PreSales => "pre_sales",
            SupportIntent::EscalationRisk => "escalation_risk",
            SupportIntent::General => "general",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupportIntentClassification {
    pub intent: SupportIntent,
    pub confidence: f32,
    pub sentiment: Option<Sentiment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplexityEstimate {
    pub is_simple: bool,
    pub requires_full_reasoning: bool,
    pub complexity: Complexity,
}

impl ComplexityEstimate {
    pub fn new(complexity: Complexity) -> Self {
        Self {
            is_simple: complexity == Complexity::Simple,
            requires_full_reasoning: complexity == Complexity::Complex,
            complexity,
        }
    }
}

/// 交给应答服务的检索深度建议
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextDepth {
    pub top_k: u16,
    pub multi_query: bool,
}

impl From<ComplexityEstimate> for ContextDepth {
    fn from(estimate: ComplexityEstimate) -> Self {
        match estimate.complexity {
            Complexity::Simple => ContextDepth {
                top_k: 3,
                multi_query: false,
            },
            Complexity::Medium => ContextDepth {
                top_k: 5,
                multi_query: false,
            },
            Complexity::Complex => ContextDepth {
                top_k: 8,
                multi_query: true,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,
    pub tenant_id: String,
    pub conversation_id: String,
    pub is_active: bool,
    pub expires_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantRecord {
    pub id: String,
    pub name: Option<String>,
    /// 未设置视为启用，只有显式 false 才禁用
    pub chat_enabled: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: String,
    pub tenant_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Coverage {
    Complete,
    Partial,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub document_id: String,
    pub chunk_id: String,
    pub score: f32,
    pub snippet: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerRequest {
    pub query: String,
    pub tenant_id: String,
    pub conversation_id: String,
    /// 主分类结果，投诉与操作请求由应答服务按意图处理
    pub intent: Intent,
    pub context_depth: ContextDepth,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerResponse {
    pub answer: String,
    pub confidence: f32,
    #[serde(default)]
    pub citations: Vec<Citation>,
    pub coverage: Coverage,
}

/// 缓存中保存的应答
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedAnswer {
    pub text: String,
    pub score: f32,
}

/// 原始入站消息，字段在管道中校验
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageRequest {
    pub tenant_id: Option<String>,
    pub conversation_id: Option<String>,
    pub text: Option<String>,
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessageResponse {
    pub success: bool,
    pub message_id: String,
    pub text: String,
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
}

pub use chat_error::{ChatError as Error, FailureKind, Result};
