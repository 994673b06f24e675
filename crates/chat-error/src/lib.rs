use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, warn};

#[cfg(feature = "axum")]
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json},
};

/// 系统统一错误类型
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum ChatError {
    // === 请求拒绝（终止，原样返回给调用方） ===
    #[error("请求无效: {reason}")]
    InvalidRequest { reason: String },

    #[error("认证失败: {message}")]
    Authentication { message: String },

    #[error("权限不足: {operation}")]
    Unauthorized { operation: String },

    #[error("资源未找到: {resource}")]
    NotFound { resource: String },

    #[error("请求过于频繁: {operation_class} 需等待 {retry_after_secs}s")]
    RateLimited {
        operation_class: String,
        retry_after_secs: u64,
        remaining: u32,
        reset_at: DateTime<Utc>,
    },

    // === 协作方错误 ===
    #[error("数据库错误: {message}")]
    Database { message: String },

    #[error("应答服务错误 ({provider})")]
    AnswerService {
        provider: String,
        message: String,
        status: Option<u16>,
    },

    #[error("应答服务返回无效数据: {service}")]
    InvalidResponse { service: String, message: String },

    #[error("外部服务不可用: {service}")]
    ServiceUnavailable {
        service: String,
        #[serde(skip)]
        retry_after: Option<std::time::Duration>,
    },

    #[error("网络错误: {operation}")]
    Network { operation: String, message: String },

    #[error("超时错误: {operation} 超过 {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    // === 系统错误 ===
    #[error("内部系统错误: {message}")]
    Internal {
        message: String,
        details: Option<String>,
    },

    #[error("配置错误: {key} - {reason}")]
    Configuration { key: String, reason: String },

    #[error("序列化错误: {format}")]
    Serialization { format: String, message: String },

    #[error("并发错误: {operation}")]
    Concurrency { operation: String, message: String },
}

/// 降级处理使用的封闭失败分类
///
/// 每个协作方错误都会映射到其中一种，降级解析器据此穷举匹配，不再依赖错误文本。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Unavailable,
    UpstreamRateLimited,
    Network,
    InvalidResponse,
    NoAnswer,
    Internal,
}

impl FailureKind {
    pub const ALL: [FailureKind; 7] = [
        FailureKind::Timeout,
        FailureKind::Unavailable,
        FailureKind::UpstreamRateLimited,
        FailureKind::Network,
        FailureKind::InvalidResponse,
        FailureKind::NoAnswer,
        FailureKind::Internal,
    ];

    /// 稍后重试可能成功的失败
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FailureKind::Timeout
                | FailureKind::Unavailable
                | FailureKind::UpstreamRateLimited
                | FailureKind::Network
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Unavailable => "unavailable",
            FailureKind::UpstreamRateLimited => "upstream_rate_limited",
            FailureKind::Network => "network",
            FailureKind::InvalidResponse => "invalid_response",
            FailureKind::NoAnswer => "no_answer",
            FailureKind::Internal => "internal",
        }
    }
}

/// 错误严重级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Low,      // 可预期的请求拒绝
    Medium,   // 协作方错误，已降级
    High,     // 影响核心功能的错误
    Critical, // 系统级严重错误
}

/// 错误元数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMetadata {
    pub error_id: String,
    pub severity: ErrorSeverity,
    pub component: String,
    pub operation: Option<String>,
    pub tenant_id: Option<String>,
    pub conversation_id: Option<String>,
    pub request_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub context: std::collections::HashMap<String, String>,
}

impl ChatError {
    /// 获取错误的严重级别
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            ChatError::InvalidRequest { .. }
            | ChatError::Authentication { .. }
            | ChatError::Unauthorized { .. }
            | ChatError::NotFound { .. }
            | ChatError::RateLimited { .. } => ErrorSeverity::Low,
            ChatError::AnswerService { .. }
            | ChatError::ServiceUnavailable { .. }
            | ChatError::Network { .. }
            | ChatError::Timeout { .. } => ErrorSeverity::Medium,
            ChatError::Database { .. }
            | ChatError::InvalidResponse { .. }
            | ChatError::Serialization { .. }
            | ChatError::Concurrency { .. } => ErrorSeverity::High,
            ChatError::Internal { .. } | ChatError::Configuration { .. } => {
                ErrorSeverity::Critical
            }
        }
    }

    /// 是否为有意的请求拒绝（400/401/403/404/429）
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ChatError::InvalidRequest { .. }
                | ChatError::Authentication { .. }
                | ChatError::Unauthorized { .. }
                | ChatError::NotFound { .. }
                | ChatError::RateLimited { .. }
        )
    }

    /// 映射到降级分类
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            ChatError::Timeout { .. } => FailureKind::Timeout,
            ChatError::ServiceUnavailable { .. } | ChatError::Database { .. } => {
                FailureKind::Unavailable
            }
            ChatError::AnswerService { status, .. } => match status {
                Some(429) => FailureKind::UpstreamRateLimited,
                Some(s) if *s >= 500 => FailureKind::Unavailable,
                _ => FailureKind::Internal,
            },
            ChatError::Network { .. } => FailureKind::Network,
            ChatError::InvalidResponse { .. } | ChatError::Serialization { .. } => {
                FailureKind::InvalidResponse
            }
            ChatError::InvalidRequest { .. }
            | ChatError::Authentication { .. }
            | ChatError::Unauthorized { .. }
            | ChatError::NotFound { .. }
            | ChatError::RateLimited { .. }
            | ChatError::Internal { .. }
            | ChatError::Configuration { .. }
            | ChatError::Concurrency { .. } => FailureKind::Internal,
        }
    }

    /// 记录错误日志
    pub fn log(&self, metadata: &ErrorMetadata) {
        match metadata.severity {
            ErrorSeverity::Low => {
                warn!(
                    error_id = %metadata.error_id,
                    component = %metadata.component,
                    operation = ?metadata.operation,
                    tenant_id = ?metadata.tenant_id,
                    conversation_id = ?metadata.conversation_id,
                    request_id = ?metadata.request_id,
                    error = %self,
                    "请求被拒绝"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_id = %metadata.error_id,
                    component = %metadata.component,
                    operation = ?metadata.operation,
                    tenant_id = ?metadata.tenant_id,
                    conversation_id = ?metadata.conversation_id,
                    request_id = ?metadata.request_id,
                    error = %self,
                    context = ?metadata.context,
                    "协作方错误"
                );
            }
            ErrorSeverity::High | ErrorSeverity::Critical => {
                error!(
                    error_id = %metadata.error_id,
                    component = %metadata.component,
                    operation = ?metadata.operation,
                    tenant_id = ?metadata.tenant_id,
                    conversation_id = ?metadata.conversation_id,
                    request_id = ?metadata.request_id,
                    error = %self,
                    context = ?metadata.context,
                    severity = ?metadata.severity,
                    "严重错误"
                );
            }
        }
    }

    /// 转换为 HTTP 状态码
    pub fn to_http_status(&self) -> u16 {
        match self {
            ChatError::InvalidRequest { .. } => 400,
            ChatError::Authentication { .. } => 401,
            ChatError::Unauthorized { .. } => 403,
            ChatError::NotFound { .. } => 404,
            ChatError::RateLimited { .. } => 429,
            ChatError::ServiceUnavailable { .. } => 503,
            _ => 500,
        }
    }

    /// 获取返回给调用方的错误消息
    ///
    /// 授权类错误刻意不区分"不存在"与"无权访问"。
    pub fn user_message(&self) -> String {
        match self {
            ChatError::InvalidRequest { reason } => reason.clone(),
            ChatError::Authentication { .. } => {
                "Your chat session is invalid or has expired. Please start a new conversation."
                    .to_string()
            }
            ChatError::Unauthorized { .. } => {
                "Chat is not available for this business.".to_string()
            }
            ChatError::NotFound { .. } => "Conversation not found.".to_string(),
            ChatError::RateLimited {
                retry_after_secs, ..
            } => format!(
                "Too many messages. Please wait {} seconds and try again.",
                retry_after_secs
            ),
            _ => "Something went wrong while processing your message.".to_string(),
        }
    }
}

/// 创建错误元数据的便捷构造器
pub struct ErrorMetadataBuilder {
    metadata: ErrorMetadata,
}

impl ErrorMetadataBuilder {
    pub fn new(component: &str) -> Self {
        Self {
            metadata: ErrorMetadata {
                error_id: uuid::Uuid::new_v4().to_string(),
                severity: ErrorSeverity::Medium,
                component: component.to_string(),
                operation: None,
                tenant_id: None,
                conversation_id: None,
                request_id: None,
                timestamp: Utc::now(),
                context: std::collections::HashMap::new(),
            },
        }
    }

    pub fn operation(mut self, operation: &str) -> Self {
        self.metadata.operation = Some(operation.to_string());
        self
    }

    pub fn tenant_id(mut self, tenant_id: &str) -> Self {
        self.metadata.tenant_id = Some(tenant_id.to_string());
        self
    }

    pub fn conversation_id(mut self, conversation_id: &str) -> Self {
        self.metadata.conversation_id = Some(conversation_id.to_string());
        self
    }

    pub fn request_id(mut self, request_id: &str) -> Self {
        self.metadata.request_id = Some(request_id.to_string());
        self
    }

    pub fn context(mut self, key: &str, value: &str) -> Self {
        self.metadata
            .context
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn build(mut self, error: &ChatError) -> ErrorMetadata {
        self.metadata.severity = error.severity();
        self.metadata
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;

// === 转换实现 ===

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::Serialization {
            format: "json".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ChatError::Timeout {
                operation: "http_request".to_string(),
                timeout_ms: 0,
            }
        } else if err.is_connect() {
            ChatError::Network {
                operation: "connect".to_string(),
                message: err.to_string(),
            }
        } else if err.is_decode() {
            ChatError::InvalidResponse {
                service: "http".to_string(),
                message: err.to_string(),
            }
        } else {
            ChatError::Network {
                operation: "http_request".to_string(),
                message: err.to_string(),
            }
        }
    }
}

impl From<tokio::task::JoinError> for ChatError {
    fn from(err: tokio::task::JoinError) -> Self {
        ChatError::Concurrency {
            operation: "task_join".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for ChatError {
    fn from(err: anyhow::Error) -> Self {
        ChatError::Internal {
            message: err.to_string(),
            details: None,
        }
    }
}

// Axum integration
#[cfg(feature = "axum")]
impl IntoResponse for ChatError {
    fn into_response(self) -> axum::response::Response {
        let status_code =
            StatusCode::from_u16(self.to_http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let mut body = serde_json::json!({
            "success": false,
            "error": self.user_message(),
        });

        if let ChatError::RateLimited {
            retry_after_secs,
            remaining,
            reset_at,
            ..
        } = &self
        {
            body["retryAfter"] = serde_json::json!(retry_after_secs);
            body["remaining"] = serde_json::json!(remaining);
            body["resetTime"] = serde_json::json!(reset_at.to_rfc3339());

            let mut response = (status_code, Json(body)).into_response();
            if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
            return response;
        }

        (status_code, Json(body)).into_response()
    }
}
