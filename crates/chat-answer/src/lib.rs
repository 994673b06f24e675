use async_trait::async_trait;
use chat_core::{AnswerRequest, AnswerResponse};

pub mod http;

pub use chat_error::{ChatError, Result};
pub use http::{HttpAnswerConfig, HttpAnswerEngine};

/// 外部应答服务（检索 + 生成）的统一抽象
///
/// 管道只通过这个接口调用昂贵的应答计算，失败以 `ChatError` 返回，
/// 由调用方决定降级文本。实现不做自动重试。
#[async_trait]
pub trait AnswerEngine: Send + Sync {
    async fn answer(&self, req: AnswerRequest) -> Result<AnswerResponse>;

    /// 服务名，用于日志与错误上下文
    fn name(&self) -> &str {
        "answer_engine"
    }
}
