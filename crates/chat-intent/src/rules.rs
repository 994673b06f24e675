//! 有序规则表
//!
//! 分类器都表示为 `(名称, 规则)` 的有序列表，按顺序求值，第一条命中的规则生效。
//! 优先级即列表顺序，每条规则可单独测试。

/// 预处理后的消息文本
#[derive(Debug, Clone)]
pub struct Prepared<'a> {
    pub raw: &'a str,
    pub lower: String,
    pub word_count: usize,
}

impl<'a> Prepared<'a> {
    pub fn new(raw: &'a str) -> Self {
        let trimmed = raw.trim();
        Self {
            raw: trimmed,
            lower: trimmed.to_lowercase(),
            word_count: trimmed.split_whitespace().count(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn question_marks(&self) -> usize {
        self.raw.matches('?').count()
    }
}

/// 单条规则：命中时返回结果
pub struct Rule<O> {
    pub name: &'static str,
    pub apply: fn(&Prepared<'_>) -> Option<O>,
}

/// 按顺序求值，返回第一条命中的规则名与结果
pub fn first_match<O>(rules: &[Rule<O>], input: &Prepared<'_>) -> Option<(&'static str, O)> {
    rules
        .iter()
        .find_map(|rule| (rule.apply)(input).map(|out| (rule.name, out)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn short(p: &Prepared<'_>) -> Option<&'static str> {
        (p.word_count <= 2).then_some("short")
    }

    fn any(_: &Prepared<'_>) -> Option<&'static str> {
        Some("any")
    }

    #[test]
    fn test_first_match_respects_order() {
        let rules = [
            Rule { name: "short", apply: short },
            Rule { name: "any", apply: any },
        ];
        assert_eq!(
            first_match(&rules, &Prepared::new("hi there")),
            Some(("short", "short"))
        );
        assert_eq!(
            first_match(&rules, &Prepared::new("a much longer message")),
            Some(("any", "any"))
        );
    }

    #[test]
    fn test_prepared_normalizes() {
        let p = Prepared::new("  Hello   World?? ");
        assert_eq!(p.raw, "Hello   World??");
        assert_eq!(p.lower, "hello   world??");
        assert_eq!(p.word_count, 2);
        assert_eq!(p.question_marks(), 2);
        assert!(Prepared::new("   ").is_blank());
    }
}
