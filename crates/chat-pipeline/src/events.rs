//! 管道分析事件
//!
//! 每次限流拒绝、缓存命中/未命中、分类结果、应答耗时与降级都会产生一个事件，
//! 交给外部的分析/观测系统。

use chat_core::{Complexity, Coverage, Intent, OperationClass, Sentiment, SupportIntent};
use chat_error::FailureKind;
use serde::Serialize;
use std::sync::Mutex;
use tracing::{info, warn};

pub const EVENT_TARGET: &str = "chat_pipeline::events";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    RateLimited {
        tenant_id: String,
        op_class: OperationClass,
        retry_after_secs: u64,
    },
    Classified {
        tenant_id: String,
        conversation_id: String,
        intent: Intent,
        confidence: f32,
        extracted_value: Option<String>,
        support_intent: SupportIntent,
        sentiment: Option<Sentiment>,
    },
    ShortCircuited {
        tenant_id: String,
        intent: Intent,
    },
    CacheHit {
        tenant_id: String,
        op_class: OperationClass,
    },
    CacheMiss {
        tenant_id: String,
        op_class: OperationClass,
    },
    Computed {
        tenant_id: String,
        op_class: OperationClass,
        complexity: Complexity,
        duration_ms: u64,
        coverage: Option<Coverage>,
        success: bool,
    },
    Fallback {
        tenant_id: String,
        op_class: OperationClass,
        kind: Option<FailureKind>,
    },
}

impl PipelineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineEvent::RateLimited { .. } => "rate_limited",
            PipelineEvent::Classified { .. } => "classified",
            PipelineEvent::ShortCircuited { .. } => "short_circuited",
            PipelineEvent::CacheHit { .. } => "cache_hit",
            PipelineEvent::CacheMiss { .. } => "cache_miss",
            PipelineEvent::Computed { .. } => "computed",
            PipelineEvent::Fallback { .. } => "fallback",
        }
    }
}

/// 事件接收方，实现不得阻塞
pub trait EventSink: Send + Sync {
    fn emit(&self, event: PipelineEvent);
}

/// 以 tracing 事件输出
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: PipelineEvent) {
        match &event {
            PipelineEvent::RateLimited {
                tenant_id,
                op_class,
                retry_after_secs,
            } => warn!(
                target: EVENT_TARGET,
                event = event.name(),
                tenant_id = %tenant_id,
                op_class = %op_class,
                retry_after_secs
            ),
            PipelineEvent::Classified {
                tenant_id,
                intent,
                confidence,
                support_intent,
                ..
            } => info!(
                target: EVENT_TARGET,
                event = event.name(),
                tenant_id = %tenant_id,
                intent = %intent,
                confidence,
                support_intent = support_intent.as_str()
            ),
            PipelineEvent::Computed {
                tenant_id,
                op_class,
                duration_ms,
                success,
                ..
            } => info!(
                target: EVENT_TARGET,
                event = event.name(),
                tenant_id = %tenant_id,
                op_class = %op_class,
                duration_ms,
                success
            ),
            _ => {
                let payload = serde_json::to_string(&event).unwrap_or_default();
                info!(target: EVENT_TARGET, event = event.name(), payload = %payload);
            }
        }
    }
}

/// 在内存中记录事件，供测试与诊断使用
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<PipelineEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events().iter().filter(|e| e.name() == name).count()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: PipelineEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
