//! 降级应答
//!
//! 应答计算失败或出现未预期错误时给出确定的安全文本。
//! 调用方无法区分"知识库没有答案"与"计算失败"，两者使用同一套文案。

use chat_core::OperationClass;
use chat_error::FailureKind;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackResponse {
    pub text: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackResolver;

impl FallbackResolver {
    pub fn new() -> Self {
        Self
    }

    /// 对任意 (分类, 失败类型) 组合返回非空文本，`None` 表示无法识别的错误
    pub fn resolve(&self, class: OperationClass, kind: Option<&FailureKind>) -> FallbackResponse {
        let lead = match class {
            OperationClass::Message => "Sorry, I couldn't process your message.",
            OperationClass::KbQuery => "Sorry, I couldn't find an answer to that just now.",
            OperationClass::DbLookup => "Sorry, I couldn't look up that record just now.",
        };

        // 穷举匹配，不加通配分支
        let follow_up = match kind {
            Some(
                FailureKind::Timeout
                | FailureKind::Unavailable
                | FailureKind::UpstreamRateLimited
                | FailureKind::Network,
            ) => "Please try again in a moment.",
            Some(FailureKind::InvalidResponse | FailureKind::NoAnswer | FailureKind::Internal)
            | None => {
                "Please try again, or contact the business directly if you need help right away."
            }
        };

        FallbackResponse {
            text: format!("{} {}", lead, follow_up),
        }
    }
}
