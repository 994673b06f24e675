use chat_core::Intent;

/// 不需要应答计算的意图直接返回固定回复
///
/// 只有问候与空白输入走固定回复；投诉与操作请求需要结合租户知识作答，
/// 与一般问题一样进入缓存与应答计算。
pub fn short_circuit_reply(intent: Intent) -> Option<&'static str> {
    match intent {
        Intent::Greeting => Some("Hello! How can I help you today?"),
        Intent::Fallback => Some("Could you tell me a little more about what you're looking for?"),
        Intent::KbQuestion | Intent::DbLookup | Intent::ActionRequest | Intent::Complaint => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_greeting_and_fallback_short_circuit() {
        for intent in [
            Intent::KbQuestion,
            Intent::DbLookup,
            Intent::ActionRequest,
            Intent::Complaint,
        ] {
            assert!(short_circuit_reply(intent).is_none(), "{}", intent);
        }
        for intent in [Intent::Greeting, Intent::Fallback] {
            assert!(!short_circuit_reply(intent).unwrap_or_default().is_empty());
        }
    }
}
