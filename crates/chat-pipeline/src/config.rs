use serde::{Deserialize, Serialize};

/// 消息文本限制
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// 超出部分截断
    pub max_text_chars: usize,
    /// 原始文本超过该长度直接拒绝
    pub max_raw_chars: usize,
    /// 错误日志中保留的查询长度
    pub log_query_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_text_chars: 2000,
            max_raw_chars: 10_000,
            log_query_chars: 100,
        }
    }
}
