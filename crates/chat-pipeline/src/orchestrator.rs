//! 单条消息的处理流程
//!
//! 校验 → 限流 → 分类 → (固定回复 | 缓存查询) → (命中 | 计算 → 写缓存) → 响应。
//! 校验、授权与限流失败直接拒绝；之后的任何失败都转为降级文本。

use chat_answer::AnswerEngine;
use chat_auth::{SessionValidator, TenantValidator};
use chat_core::{
    AnswerRequest, CachedAnswer, ChatMessageRequest, ChatMessageResponse, ContextDepth,
    ConversationId, Coverage, Intent, OperationClass, TenantId,
};
use chat_error::{ChatError, ErrorMetadataBuilder, FailureKind, Result};
use chat_intent::{analyze, classify, classify_support};
use chat_limits::{RateLimiter, ResponseCache};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, instrument};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::events::{EventSink, PipelineEvent};
use crate::fallback::{FallbackResolver, FallbackResponse};
use crate::replies::short_circuit_reply;

/// 处理结果
#[derive(Debug, Clone)]
pub enum PipelineOutcome {
    /// 正常应答（含固定回复与缓存命中）
    Answered(ChatMessageResponse),
    /// 输入、授权或限流拒绝
    Rejected(ChatError),
    /// 应答计算失败或未预期错误，附带可直接展示的降级文本
    Degraded {
        message_id: String,
        kind: Option<FailureKind>,
        fallback: FallbackResponse,
    },
}

impl PipelineOutcome {
    pub fn http_status(&self) -> u16 {
        match self {
            PipelineOutcome::Answered(_) => 200,
            PipelineOutcome::Rejected(err) => err.to_http_status(),
            PipelineOutcome::Degraded { .. } => 500,
        }
    }
}

/// 通过校验的消息
struct Admitted {
    tenant_id: TenantId,
    conversation_id: ConversationId,
    text: String,
}

enum Step {
    Answered(ChatMessageResponse),
    Degraded(FailureKind),
}

/// 每次定期清理的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub windows: usize,
    pub cache_entries: usize,
}

pub struct ChatPipeline {
    tenants: TenantValidator,
    sessions: SessionValidator,
    limiter: RateLimiter,
    cache: Arc<ResponseCache>,
    engine: Arc<dyn AnswerEngine>,
    events: Arc<dyn EventSink>,
    fallback: FallbackResolver,
    config: PipelineConfig,
}

impl ChatPipeline {
    pub fn new(
        tenants: TenantValidator,
        sessions: SessionValidator,
        limiter: RateLimiter,
        cache: Arc<ResponseCache>,
        engine: Arc<dyn AnswerEngine>,
        events: Arc<dyn EventSink>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            tenants,
            sessions,
            limiter,
            cache,
            engine,
            events,
            fallback: FallbackResolver::new(),
            config,
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub async fn handle(&self, req: ChatMessageRequest) -> PipelineOutcome {
        self.handle_at(req, Utc::now()).await
    }

    /// 处理一条消息，永不返回错误：所有失败都体现在 `PipelineOutcome` 中
    #[instrument(skip(self, req, now), fields(tenant_id = ?req.tenant_id))]
    pub async fn handle_at(&self, req: ChatMessageRequest, now: DateTime<Utc>) -> PipelineOutcome {
        let message_id = Uuid::new_v4().to_string();
        let mut op_class = OperationClass::Message;
        let tenant_hint = req.tenant_id.clone().unwrap_or_default();
        let conversation_hint = req.conversation_id.clone().unwrap_or_default();

        match self.process(req, now, &message_id, &mut op_class).await {
            Ok(Step::Answered(resp)) => PipelineOutcome::Answered(resp),
            Ok(Step::Degraded(kind)) => self.degrade(message_id, &tenant_hint, op_class, Some(kind)),
            Err(err) if err.is_rejection() => {
                debug!(error = %err, status = err.to_http_status(), "message rejected");
                PipelineOutcome::Rejected(err)
            }
            Err(err) => {
                let metadata = ErrorMetadataBuilder::new("chat-pipeline")
                    .operation(op_class.as_str())
                    .tenant_id(&tenant_hint)
                    .conversation_id(&conversation_hint)
                    .request_id(&message_id)
                    .build(&err);
                err.log(&metadata);
                let kind = err.failure_kind();
                self.degrade(message_id, &tenant_hint, op_class, Some(kind))
            }
        }
    }

    async fn process(
        &self,
        req: ChatMessageRequest,
        now: DateTime<Utc>,
        message_id: &str,
        op_class: &mut OperationClass,
    ) -> Result<Step> {
        // Validating
        let msg = self.admit(req, now).await?;

        // RateLimiting
        self.charge(&msg.tenant_id, OperationClass::Message, now)?;

        // Classifying
        let classification = classify(&msg.text);
        let support = classify_support(&msg.text);
        self.events.emit(PipelineEvent::Classified {
            tenant_id: msg.tenant_id.to_string(),
            conversation_id: msg.conversation_id.to_string(),
            intent: classification.intent,
            confidence: classification.confidence,
            extracted_value: classification.extracted_value.clone(),
            support_intent: support.intent,
            sentiment: support.sentiment,
        });

        if let Some(reply) = short_circuit_reply(classification.intent) {
            self.events.emit(PipelineEvent::ShortCircuited {
                tenant_id: msg.tenant_id.to_string(),
                intent: classification.intent,
            });
            return Ok(Step::Answered(ChatMessageResponse {
                success: true,
                message_id: message_id.to_string(),
                text: reply.to_string(),
                score: classification.confidence,
                intent: Some(classification.intent),
            }));
        }

        let class = match classification.intent {
            Intent::DbLookup => OperationClass::DbLookup,
            Intent::KbQuestion
            | Intent::ActionRequest
            | Intent::Complaint
            | Intent::Greeting
            | Intent::Fallback => OperationClass::KbQuery,
        };
        *op_class = class;
        self.charge(&msg.tenant_id, class, now)?;

        // CacheLookup
        if let Some(hit) = self.cache.get_at(&msg.tenant_id, class, &msg.text, now) {
            self.events.emit(PipelineEvent::CacheHit {
                tenant_id: msg.tenant_id.to_string(),
                op_class: class,
            });
            return Ok(Step::Answered(ChatMessageResponse {
                success: true,
                message_id: message_id.to_string(),
                text: hit.text,
                score: hit.score,
                intent: Some(classification.intent),
            }));
        }
        self.events.emit(PipelineEvent::CacheMiss {
            tenant_id: msg.tenant_id.to_string(),
            op_class: class,
        });

        // Compute → CacheWrite，放在独立任务里，调用方断开也会完成
        let task = ComputeTask {
            engine: self.engine.clone(),
            cache: self.cache.clone(),
            events: self.events.clone(),
            tenant_id: msg.tenant_id,
            conversation_id: msg.conversation_id,
            class,
            intent: classification.intent,
            text: msg.text,
            log_query_chars: self.config.log_query_chars,
            now,
        };
        match tokio::spawn(task.run()).await? {
            Ok(answer) => Ok(Step::Answered(ChatMessageResponse {
                success: true,
                message_id: message_id.to_string(),
                text: answer.text,
                score: answer.score,
                intent: Some(classification.intent),
            })),
            Err(kind) => Ok(Step::Degraded(kind)),
        }
    }

    /// 格式校验在任何数据存储访问之前完成
    async fn admit(&self, req: ChatMessageRequest, now: DateTime<Utc>) -> Result<Admitted> {
        let tenant_id = req
            .tenant_id
            .as_deref()
            .and_then(TenantId::parse)
            .ok_or_else(|| invalid("Invalid tenant ID"))?;
        let conversation_id = req
            .conversation_id
            .as_deref()
            .and_then(ConversationId::parse)
            .ok_or_else(|| invalid("Invalid conversation ID"))?;
        let raw_text = req.text.unwrap_or_default();
        if raw_text.trim().is_empty() {
            return Err(invalid("Message text is required"));
        }
        if raw_text.chars().count() > self.config.max_raw_chars {
            return Err(invalid("Message text is too long"));
        }
        let text: String = raw_text.trim().chars().take(self.config.max_text_chars).collect();

        let validation = self.tenants.validate_tenant(&tenant_id).await?;
        if !validation.valid {
            return Err(ChatError::Unauthorized {
                operation: "chat".to_string(),
            });
        }

        if let Some(token) = req.session_id.as_deref().filter(|t| !t.trim().is_empty()) {
            let session = self
                .sessions
                .validate_session_at(token, &tenant_id, &conversation_id, now)
                .await?;
            if session.is_none() {
                return Err(ChatError::Authentication {
                    message: "session invalid or expired".to_string(),
                });
            }
        }

        self.tenants
            .validate_conversation_ownership(&conversation_id, &tenant_id)
            .await?;

        Ok(Admitted {
            tenant_id,
            conversation_id,
            text,
        })
    }

    fn charge(&self, tenant_id: &TenantId, class: OperationClass, now: DateTime<Utc>) -> Result<()> {
        let decision = self.limiter.check_limit_at(tenant_id, class, now);
        if decision.allowed {
            return Ok(());
        }
        let retry_after_secs = decision.retry_after_secs.unwrap_or(1);
        self.events.emit(PipelineEvent::RateLimited {
            tenant_id: tenant_id.to_string(),
            op_class: class,
            retry_after_secs,
        });
        Err(ChatError::RateLimited {
            operation_class: class.as_str().to_string(),
            retry_after_secs,
            remaining: decision.remaining,
            reset_at: decision.reset_at,
        })
    }

    fn degrade(
        &self,
        message_id: String,
        tenant_id: &str,
        class: OperationClass,
        kind: Option<FailureKind>,
    ) -> PipelineOutcome {
        self.events.emit(PipelineEvent::Fallback {
            tenant_id: tenant_id.to_string(),
            op_class: class,
            kind,
        });
        PipelineOutcome::Degraded {
            message_id,
            kind,
            fallback: self.fallback.resolve(class, kind.as_ref()),
        }
    }

    /// 显式关闭会话，只有会话所属租户可以关闭
    pub async fn close_session(&self, tenant_id: Option<&str>, session_id: Option<&str>) -> Result<bool> {
        let tenant_id = tenant_id
            .and_then(TenantId::parse)
            .ok_or_else(|| invalid("Invalid tenant ID"))?;
        let token = session_id
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| invalid("Session ID is required"))?;
        self.sessions.close_session(token, &tenant_id).await
    }

    pub fn sweep_expired(&self) -> SweepStats {
        self.sweep_expired_at(Utc::now())
    }

    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> SweepStats {
        SweepStats {
            windows: self.limiter.sweep_at(now),
            cache_entries: self.cache.sweep_at(now),
        }
    }
}

fn invalid(reason: &str) -> ChatError {
    ChatError::InvalidRequest {
        reason: reason.to_string(),
    }
}

/// 应答服务给出的置信度收敛到 [0, 1]，NaN 记为 0
fn clamp_score(confidence: f32) -> f32 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

/// 应答计算 → 写缓存 → 分析事件
struct ComputeTask {
    engine: Arc<dyn AnswerEngine>,
    cache: Arc<ResponseCache>,
    events: Arc<dyn EventSink>,
    tenant_id: TenantId,
    conversation_id: ConversationId,
    class: OperationClass,
    intent: Intent,
    text: String,
    log_query_chars: usize,
    now: DateTime<Utc>,
}

impl ComputeTask {
    async fn run(self) -> std::result::Result<CachedAnswer, FailureKind> {
        let estimate = analyze(&self.text);
        let request = AnswerRequest {
            query: self.text.clone(),
            tenant_id: self.tenant_id.to_string(),
            conversation_id: self.conversation_id.to_string(),
            intent: self.intent,
            context_depth: ContextDepth::from(estimate),
        };

        let started = Instant::now();
        let result = self.engine.answer(request).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let outcome = match result {
            Ok(resp) if resp.coverage != Coverage::None && !resp.answer.trim().is_empty() => Ok(resp),
            Ok(resp) => {
                debug!(
                    tenant_id = %self.tenant_id,
                    coverage = ?resp.coverage,
                    "answer service returned no usable answer"
                );
                Err((FailureKind::NoAnswer, Some(resp.coverage)))
            }
            Err(err) => {
                let query: String = self.text.chars().take(self.log_query_chars).collect();
                let kind = err.failure_kind();
                error!(
                    tenant_id = %self.tenant_id,
                    conversation_id = %self.conversation_id,
                    op_class = %self.class,
                    engine = self.engine.name(),
                    query = %query,
                    error = %err,
                    ?kind,
                    transient = kind.is_transient(),
                    "answer computation failed"
                );
                Err((kind, None))
            }
        };

        self.events.emit(PipelineEvent::Computed {
            tenant_id: self.tenant_id.to_string(),
            op_class: self.class,
            complexity: estimate.complexity,
            duration_ms,
            coverage: match &outcome {
                Ok(resp) => Some(resp.coverage),
                Err((_, coverage)) => *coverage,
            },
            success: outcome.is_ok(),
        });

        let resp = outcome.map_err(|(kind, _)| kind)?;
        let answer = CachedAnswer {
            text: resp.answer,
            score: clamp_score(resp.confidence),
        };
        self.cache
            .set_at(&self.tenant_id, self.class, &self.text, answer.clone(), self.now);
        Ok(answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingEventSink;
    use async_trait::async_trait;
    use chat_auth::{ConversationDirectory, MemoryDirectory, MemorySessionStore, SessionStore, TenantDirectory};
    use chat_core::{AnswerResponse, ChatSession, ConversationRecord, TenantRecord};
    use chat_limits::{CacheConfig, MemoryStore, RateLimitConfig};
    use chrono::Duration;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::Notify;

    struct CountingDirectory {
        inner: MemoryDirectory,
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    impl CountingDirectory {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn check(&self) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(ChatError::Database {
                    message: "connection reset".to_string(),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl TenantDirectory for CountingDirectory {
        async fn find_tenant(&self, tenant_id: &str) -> Result<Option<TenantRecord>> {
            self.check()?;
            self.inner.find_tenant(tenant_id).await
        }
    }

    #[async_trait]
    impl ConversationDirectory for CountingDirectory {
        async fn find_conversation(&self, conversation_id: &str) -> Result<Option<ConversationRecord>> {
            self.check()?;
            self.inner.find_conversation(conversation_id).await
        }
    }

    struct CountingEngine {
        result: Result<AnswerResponse>,
        calls: AtomicUsize,
        last_query: Mutex<Option<String>>,
        last_intent: Mutex<Option<Intent>>,
    }

    impl CountingEngine {
        fn answering(text: &str) -> Self {
            Self::with_result(Ok(AnswerResponse {
                answer: text.to_string(),
                confidence: 0.87,
                citations: vec![],
                coverage: Coverage::Complete,
            }))
        }

        fn with_result(result: Result<AnswerResponse>) -> Self {
            Self {
                result,
                calls: AtomicUsize::new(0),
                last_query: Mutex::new(None),
                last_intent: Mutex::new(None),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AnswerEngine for CountingEngine {
        async fn answer(&self, req: AnswerRequest) -> Result<AnswerResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_intent.lock().unwrap() = Some(req.intent);
            *self.last_query.lock().unwrap() = Some(req.query);
            self.result.clone()
        }
    }

    /// 进入应答计算后等待放行的引擎
    struct GatedEngine {
        entered: Notify,
        release: Notify,
    }

    #[async_trait]
    impl AnswerEngine for GatedEngine {
        async fn answer(&self, _req: AnswerRequest) -> Result<AnswerResponse> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(AnswerResponse {
                answer: "We open at 9am.".to_string(),
                confidence: 0.8,
                citations: vec![],
                coverage: Coverage::Complete,
            })
        }
    }

    struct Harness<E = CountingEngine> {
        pipeline: ChatPipeline,
        directory: Arc<CountingDirectory>,
        engine: Arc<E>,
        events: Arc<RecordingEventSink>,
        sessions: Arc<MemorySessionStore>,
    }

    async fn create_test_pipeline(engine: CountingEngine) -> Harness {
        create_harness(engine).await
    }

    async fn create_harness<E: AnswerEngine + 'static>(engine: E) -> Harness<E> {
        let inner = MemoryDirectory::new();
        for (id, enabled) in [("abc123", None), ("other", Some(true)), ("disabled-co", Some(false))] {
            inner
                .insert_tenant(TenantRecord {
                    id: id.to_string(),
                    name: None,
                    chat_enabled: enabled,
                })
                .await;
        }
        for (id, tenant) in [("conv-1", "abc123"), ("conv-2", "other"), ("conv-3", "disabled-co")] {
            inner
                .insert_conversation(ConversationRecord {
                    id: id.to_string(),
                    tenant_id: tenant.to_string(),
                })
                .await;
        }
        let directory = Arc::new(CountingDirectory {
            inner,
            calls: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
        });
        let sessions = Arc::new(MemorySessionStore::new());
        let engine = Arc::new(engine);
        let events = Arc::new(RecordingEventSink::new());
        let store = Arc::new(MemoryStore::new());

        let pipeline = ChatPipeline::new(
            TenantValidator::new(directory.clone(), directory.clone()),
            SessionValidator::new(sessions.clone()),
            RateLimiter::new(
                store.clone(),
                RateLimitConfig {
                    sweep_probability: 0.0,
                    ..RateLimitConfig::default()
                },
            ),
            Arc::new(ResponseCache::new(
                store,
                CacheConfig {
                    sweep_probability: 0.0,
                    ..CacheConfig::default()
                },
            )),
            engine.clone(),
            events.clone(),
            PipelineConfig::default(),
        );

        Harness {
            pipeline,
            directory,
            engine,
            events,
            sessions,
        }
    }

    fn message(tenant: &str, conversation: &str, text: &str) -> ChatMessageRequest {
        ChatMessageRequest {
            tenant_id: Some(tenant.to_string()),
            conversation_id: Some(conversation.to_string()),
            text: Some(text.to_string()),
            session_id: None,
        }
    }

    fn answered(outcome: PipelineOutcome) -> ChatMessageResponse {
        match outcome {
            PipelineOutcome::Answered(resp) => resp,
            other => panic!("expected answer, got {:?}", other),
        }
    }

    fn rejected(outcome: PipelineOutcome) -> ChatError {
        match outcome {
            PipelineOutcome::Rejected(err) => err,
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_greeting_short_circuits() {
        let h = create_test_pipeline(CountingEngine::answering("unused")).await;

        let resp = answered(h.pipeline.handle(message("abc123", "conv-1", "hi")).await);
        assert!(resp.success);
        assert_eq!(resp.intent, Some(Intent::Greeting));
        assert!(!resp.text.is_empty());
        assert!(!resp.message_id.is_empty());

        assert_eq!(h.engine.calls(), 0);
        assert!(h.pipeline.cache().is_empty());
        assert_eq!(h.events.count("cache_hit") + h.events.count("cache_miss"), 0);
        assert_eq!(h.events.count("short_circuited"), 1);
    }

    #[tokio::test]
    async fn test_identifier_lookup_routes_to_db_lookup() {
        let h = create_test_pipeline(CountingEngine::answering("Order A100 shipped yesterday.")).await;

        let resp = answered(
            h.pipeline
                .handle(message("abc123", "conv-1", "order #A100 status?"))
                .await,
        );
        assert_eq!(resp.intent, Some(Intent::DbLookup));
        assert_eq!(resp.text, "Order A100 shipped yesterday.");
        assert_eq!(h.engine.calls(), 1);

        let extracted = h.events.events().into_iter().find_map(|e| match e {
            PipelineEvent::Classified { extracted_value, .. } => extracted_value,
            _ => None,
        });
        assert_eq!(extracted.as_deref(), Some("A100"));
    }

    #[tokio::test]
    async fn test_kb_query_limit_returns_429() {
        let h = create_test_pipeline(CountingEngine::answering("We open at 9am.")).await;
        let now = Utc::now();

        for i in 0..20 {
            let outcome = h
                .pipeline
                .handle_at(message("abc123", "conv-1", "What are your hours?"), now + Duration::seconds(i))
                .await;
            assert_eq!(outcome.http_status(), 200, "request {}", i + 1);
        }

        let err = rejected(
            h.pipeline
                .handle_at(message("abc123", "conv-1", "What are your hours?"), now + Duration::seconds(20))
                .await,
        );
        assert_eq!(err.to_http_status(), 429);
        match err {
            ChatError::RateLimited {
                operation_class,
                retry_after_secs,
                ..
            } => {
                assert_eq!(operation_class, "kb_query");
                assert!(retry_after_secs > 0 && retry_after_secs <= 60);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(h.events.count("rate_limited"), 1);
        // 缓存命中不退还配额，但只计算了一次
        assert_eq!(h.engine.calls(), 1);
    }

    #[tokio::test]
    async fn test_repeated_question_served_from_cache() {
        let h = create_test_pipeline(CountingEngine::answering("Yes, we have vegan options.")).await;

        let first = answered(
            h.pipeline
                .handle(message("abc123", "conv-1", "Do you have vegan options?"))
                .await,
        );
        let second = answered(
            h.pipeline
                .handle(message("abc123", "conv-1", "  do you have VEGAN options  "))
                .await,
        );

        assert_eq!(h.engine.calls(), 1);
        assert_eq!(first.text, second.text);
        assert_eq!(second.score, 0.87);
        assert_ne!(first.message_id, second.message_id);
        assert_eq!(h.events.count("cache_hit"), 1);
        assert_eq!(h.events.count("cache_miss"), 1);
    }

    #[tokio::test]
    async fn test_cache_is_not_shared_across_tenants() {
        let h = create_test_pipeline(CountingEngine::answering("answer")).await;

        h.pipeline.handle(message("abc123", "conv-1", "What is the wifi password?")).await;
        h.pipeline.handle(message("other", "conv-2", "What is the wifi password?")).await;
        assert_eq!(h.engine.calls(), 2);
    }

    #[tokio::test]
    async fn test_malformed_ids_rejected_before_datastore() {
        let h = create_test_pipeline(CountingEngine::answering("unused")).await;

        let too_long = "a".repeat(101);
        for tenant in ["bad tenant!", "", "   ", "abc/123", too_long.as_str()] {
            let err = rejected(h.pipeline.handle(message(tenant, "conv-1", "hello")).await);
            assert_eq!(err.to_http_status(), 400, "tenant {:?}", tenant);
        }
        let err = rejected(h.pipeline.handle(message("abc123", "conv 1;drop", "hello")).await);
        assert_eq!(err.to_http_status(), 400);

        let missing = ChatMessageRequest {
            tenant_id: None,
            ..message("abc123", "conv-1", "hello")
        };
        assert_eq!(rejected(h.pipeline.handle(missing).await).to_http_status(), 400);

        assert_eq!(h.directory.calls(), 0);
    }

    #[tokio::test]
    async fn test_text_validation() {
        let h = create_test_pipeline(CountingEngine::answering("ok")).await;

        let err = rejected(h.pipeline.handle(message("abc123", "conv-1", "   ")).await);
        assert_eq!(err.to_http_status(), 400);
        let err = rejected(h.pipeline.handle(message("abc123", "conv-1", &"x".repeat(10_001))).await);
        assert_eq!(err.to_http_status(), 400);

        // 超过 2000 字符的部分截断后再交给应答服务
        answered(h.pipeline.handle(message("abc123", "conv-1", &"x".repeat(2500))).await);
        let query = h.engine.last_query.lock().unwrap().clone().unwrap();
        assert_eq!(query.chars().count(), 2000);
    }

    #[tokio::test]
    async fn test_foreign_or_missing_conversation_is_not_found() {
        let h = create_test_pipeline(CountingEngine::answering("unused")).await;

        let foreign = rejected(h.pipeline.handle(message("abc123", "conv-2", "hello")).await);
        let missing = rejected(h.pipeline.handle(message("abc123", "conv-404", "hello")).await);
        assert_eq!(foreign.to_http_status(), 404);
        assert_eq!(missing.to_http_status(), 404);
        assert_eq!(foreign.user_message(), missing.user_message());
        assert_eq!(h.engine.calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_or_disabled_tenant_is_forbidden() {
        let h = create_test_pipeline(CountingEngine::answering("unused")).await;

        let unknown = rejected(h.pipeline.handle(message("nobody", "conv-1", "hello")).await);
        let disabled = rejected(h.pipeline.handle(message("disabled-co", "conv-3", "hello")).await);
        assert_eq!(unknown.to_http_status(), 403);
        assert_eq!(disabled.to_http_status(), 403);
        assert_eq!(unknown.user_message(), disabled.user_message());
    }

    #[tokio::test]
    async fn test_session_checks() {
        let h = create_test_pipeline(CountingEngine::answering("unused")).await;
        let now = Utc::now();
        for (id, conversation, expires_at) in [
            ("sess-ok", "conv-1", now + Duration::hours(1)),
            ("sess-old", "conv-1", now - Duration::minutes(1)),
            ("sess-elsewhere", "conv-9", now + Duration::hours(1)),
        ] {
            h.sessions
                .save_session(&ChatSession {
                    id: id.to_string(),
                    tenant_id: "abc123".to_string(),
                    conversation_id: conversation.to_string(),
                    is_active: true,
                    expires_at,
                })
                .await
                .unwrap();
        }

        let with_session = |token: &str| ChatMessageRequest {
            session_id: Some(token.to_string()),
            ..message("abc123", "conv-1", "hi")
        };

        answered(h.pipeline.handle_at(with_session("sess-ok"), now).await);
        for token in ["sess-old", "sess-elsewhere", "sess-missing"] {
            let err = rejected(h.pipeline.handle_at(with_session(token), now).await);
            assert_eq!(err.to_http_status(), 401, "{}", token);
        }
        let expired = h.sessions.get_session("sess-old").await.unwrap().unwrap();
        assert!(!expired.is_active);

        // 空令牌视为未提供
        answered(h.pipeline.handle_at(with_session(""), now).await);
    }

    #[tokio::test]
    async fn test_compute_failure_becomes_fallback() {
        let h = create_test_pipeline(CountingEngine::with_result(Err(ChatError::Timeout {
            operation: "answer_service".to_string(),
            timeout_ms: 15_000,
        })))
        .await;

        let outcome = h
            .pipeline
            .handle(message("abc123", "conv-1", "What are your hours?"))
            .await;
        assert_eq!(outcome.http_status(), 500);
        match outcome {
            PipelineOutcome::Degraded { kind, fallback, .. } => {
                assert_eq!(kind, Some(FailureKind::Timeout));
                assert!(!fallback.text.is_empty());
            }
            other => panic!("expected fallback, got {:?}", other),
        }

        // 失败结果不缓存
        h.pipeline
            .handle(message("abc123", "conv-1", "What are your hours?"))
            .await;
        assert_eq!(h.engine.calls(), 2);
        assert!(h.pipeline.cache().is_empty());
        assert_eq!(h.events.count("fallback"), 2);
    }

    #[tokio::test]
    async fn test_no_coverage_becomes_fallback() {
        let h = create_test_pipeline(CountingEngine::with_result(Ok(AnswerResponse {
            answer: "I don't know.".to_string(),
            confidence: 0.1,
            citations: vec![],
            coverage: Coverage::None,
        })))
        .await;

        match h
            .pipeline
            .handle(message("abc123", "conv-1", "Do you sell gift cards?"))
            .await
        {
            PipelineOutcome::Degraded { kind, .. } => assert_eq!(kind, Some(FailureKind::NoAnswer)),
            other => panic!("expected fallback, got {:?}", other),
        }
        assert!(h.pipeline.cache().is_empty());
    }

    #[tokio::test]
    async fn test_directory_failure_is_absorbed() {
        let h = create_test_pipeline(CountingEngine::answering("unused")).await;
        h.directory.fail.store(true, Ordering::SeqCst);

        let outcome = h.pipeline.handle(message("abc123", "conv-1", "hello")).await;
        match outcome {
            PipelineOutcome::Degraded { kind, fallback, .. } => {
                assert_eq!(kind, Some(FailureKind::Unavailable));
                assert!(!fallback.text.is_empty());
            }
            other => panic!("expected fallback, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_close_session_and_sweep() {
        let h = create_test_pipeline(CountingEngine::answering("answer")).await;
        let now = Utc::now();
        h.sessions
            .save_session(&ChatSession {
                id: "sess-1".to_string(),
                tenant_id: "abc123".to_string(),
                conversation_id: "conv-1".to_string(),
                is_active: true,
                expires_at: now + Duration::hours(1),
            })
            .await
            .unwrap();

        assert!(!h.pipeline.close_session(Some("other"), Some("sess-1")).await.unwrap());
        assert!(h.pipeline.close_session(Some("abc123"), Some("sess-1")).await.unwrap());
        assert_eq!(
            h.pipeline
                .close_session(Some("abc 123"), Some("sess-1"))
                .await
                .unwrap_err()
                .to_http_status(),
            400
        );

        h.pipeline
            .handle_at(message("abc123", "conv-1", "What are your hours?"), now)
            .await;
        assert!(h.pipeline.limiter().window_count() > 0);
        assert_eq!(h.pipeline.cache().len(), 1);

        let stats = h.pipeline.sweep_expired_at(now + Duration::minutes(10));
        assert_eq!(stats.windows, 2);
        assert_eq!(stats.cache_entries, 1);
    }

    #[tokio::test]
    async fn test_complaint_and_action_reach_answer_service() {
        let h = create_test_pipeline(CountingEngine::answering(
            "Returns are accepted within 60 days with a receipt.",
        ))
        .await;

        let resp = answered(
            h.pipeline
                .handle(message("abc123", "conv-1", "Can I return an item after 30 days?"))
                .await,
        );
        assert_eq!(resp.intent, Some(Intent::ActionRequest));
        assert_eq!(resp.text, "Returns are accepted within 60 days with a receipt.");
        assert_eq!(h.engine.calls(), 1);
        assert_eq!(*h.engine.last_intent.lock().unwrap(), Some(Intent::ActionRequest));

        let resp = answered(
            h.pipeline
                .handle(message("abc123", "conv-1", "My delivery never arrived"))
                .await,
        );
        assert_eq!(resp.intent, Some(Intent::Complaint));
        assert_eq!(h.engine.calls(), 2);
        assert_eq!(*h.engine.last_intent.lock().unwrap(), Some(Intent::Complaint));

        assert_eq!(h.events.count("short_circuited"), 0);
        assert_eq!(h.events.count("cache_miss"), 2);
        assert_eq!(h.pipeline.cache().len(), 2);
    }

    #[tokio::test]
    async fn test_answer_score_is_clamped() {
        for (confidence, expected) in [(7.5, 1.0), (-0.3, 0.0), (f32::NAN, 0.0), (0.42, 0.42)] {
            let h = create_test_pipeline(CountingEngine::with_result(Ok(AnswerResponse {
                answer: "We open at 9am.".to_string(),
                confidence,
                citations: vec![],
                coverage: Coverage::Partial,
            })))
            .await;

            let resp = answered(
                h.pipeline
                    .handle(message("abc123", "conv-1", "When do you open?"))
                    .await,
            );
            assert_eq!(resp.score, expected, "confidence {}", confidence);

            let cached = answered(
                h.pipeline
                    .handle(message("abc123", "conv-1", "When do you open?"))
                    .await,
            );
            assert_eq!(cached.score, expected);
            assert_eq!(h.engine.calls(), 1);
        }
    }

    #[tokio::test]
    async fn test_compute_survives_dropped_handler() {
        let h = Arc::new(
            create_harness(GatedEngine {
                entered: Notify::new(),
                release: Notify::new(),
            })
            .await,
        );

        let handler = {
            let h = h.clone();
            tokio::spawn(async move {
                h.pipeline
                    .handle(message("abc123", "conv-1", "What are your hours?"))
                    .await
            })
        };
        h.engine.entered.notified().await;
        handler.abort();
        assert!(handler.await.unwrap_err().is_cancelled());

        h.engine.release.notify_one();
        for _ in 0..200 {
            if h.events.count("computed") > 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        assert_eq!(h.events.count("computed"), 1);
        assert_eq!(h.pipeline.cache().len(), 1);
        let tenant = TenantId::parse("abc123").unwrap();
        let hit = h
            .pipeline
            .cache()
            .get(&tenant, OperationClass::KbQuery, "What are your hours?");
        assert_eq!(hit.map(|a| a.text).as_deref(), Some("We open at 9am."));
    }
}
