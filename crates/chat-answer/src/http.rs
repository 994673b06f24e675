use async_trait::async_trait;
use chat_core::{AnswerRequest, AnswerResponse};
use chat_error::{ChatError, Result};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

use crate::AnswerEngine;

const PROVIDER: &str = "answer_service";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpAnswerConfig {
    pub base_url: String,
    pub path: String,
    /// 令牌所在的环境变量名，令牌本身不写进配置文件
    pub token_env: Option<String>,
    pub timeout_ms: u64,
}

impl Default for HttpAnswerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8081".to_string(),
            path: "/v1/answer".to_string(),
            token_env: Some("ANSWER_SERVICE_TOKEN".to_string()),
            timeout_ms: 15_000,
        }
    }
}

/// 通过 HTTP 调用外部应答服务，单次请求，不重试
#[derive(Clone)]
pub struct HttpAnswerEngine {
    http: Client,
    url: String,
    token: Option<String>,
    timeout_ms: u64,
}

impl HttpAnswerEngine {
    pub fn new(cfg: &HttpAnswerConfig, token: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| ChatError::Configuration {
                key: "answer_service".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            http,
            url: format!(
                "{}/{}",
                cfg.base_url.trim_end_matches('/'),
                cfg.path.trim_start_matches('/')
            ),
            token,
            timeout_ms: cfg.timeout_ms,
        })
    }

    /// 按配置读取令牌环境变量后创建
    pub fn from_env(cfg: &HttpAnswerConfig) -> Result<Self> {
        let token = cfg
            .token_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|t| !t.is_empty());
        Self::new(cfg, token)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn send_error(&self, err: reqwest::Error) -> ChatError {
        if err.is_timeout() {
            ChatError::Timeout {
                operation: PROVIDER.to_string(),
                timeout_ms: self.timeout_ms,
            }
        } else {
            ChatError::Network {
                operation: PROVIDER.to_string(),
                message: err.to_string(),
            }
        }
    }
}

/// 非 2xx 状态转换为错误，状态码保留给降级分类使用
pub(crate) fn status_error(status: StatusCode, body: &str) -> ChatError {
    if status == StatusCode::SERVICE_UNAVAILABLE {
        return ChatError::ServiceUnavailable {
            service: PROVIDER.to_string(),
            retry_after: None,
        };
    }
    let snippet: String = body.chars().take(200).collect();
    ChatError::AnswerService {
        provider: PROVIDER.to_string(),
        message: format!("status={} body={}", status, snippet),
        status: Some(status.as_u16()),
    }
}

#[async_trait]
impl AnswerEngine for HttpAnswerEngine {
    #[instrument(skip(self, req), fields(tenant_id = %req.tenant_id, top_k = req.context_depth.top_k))]
    async fn answer(&self, req: AnswerRequest) -> Result<AnswerResponse> {
        let mut builder = self.http.post(&self.url).json(&req);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let resp = builder.send().await.map_err(|e| self.send_error(e))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let txt = resp.text().await.unwrap_or_default();
            return Err(status_error(status, &txt));
        }

        let data: AnswerResponse = resp.json().await.map_err(|e| ChatError::InvalidResponse {
            service: PROVIDER.to_string(),
            message: e.to_string(),
        })?;
        debug!(
            confidence = data.confidence,
            citations = data.citations.len(),
            coverage = ?data.coverage,
            "answer service responded"
        );
        Ok(data)
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_error::FailureKind;

    #[test]
    fn test_url_joins_base_and_path() {
        let engine = HttpAnswerEngine::new(
            &HttpAnswerConfig {
                base_url: "http://answers.internal/".into(),
                path: "/v1/answer".into(),
                ..HttpAnswerConfig::default()
            },
            None,
        )
        .unwrap();
        assert_eq!(engine.url(), "http://answers.internal/v1/answer");
    }

    #[test]
    fn test_status_mapping_feeds_failure_kind() {
        assert_eq!(
            status_error(StatusCode::TOO_MANY_REQUESTS, "").failure_kind(),
            FailureKind::UpstreamRateLimited
        );
        assert_eq!(
            status_error(StatusCode::BAD_GATEWAY, "upstream").failure_kind(),
            FailureKind::Unavailable
        );
        assert_eq!(
            status_error(StatusCode::SERVICE_UNAVAILABLE, "").failure_kind(),
            FailureKind::Unavailable
        );
        assert_eq!(
            status_error(StatusCode::BAD_REQUEST, "bad").failure_kind(),
            FailureKind::Internal
        );
    }

    #[test]
    fn test_response_body_tolerates_missing_citations() {
        let resp: AnswerResponse =
            serde_json::from_str(r#"{"answer":"ok","confidence":0.4,"coverage":"partial"}"#).unwrap();
        assert!(resp.citations.is_empty());
    }
}
