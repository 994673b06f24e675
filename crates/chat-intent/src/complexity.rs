//! 快速路径复杂度估计
//!
//! 只根据词法特征决定检索深度，不调用应答服务。

use once_cell::sync::Lazy;
use regex::Regex;

use crate::rules::Prepared;
use chat_core::{Complexity, ComplexityEstimate};

static ACKNOWLEDGEMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:hi|hello|hey|ok|okay|k|thanks|thank you|thx|ty|yes|yep|yeah|no|nope|cool|great|got it|sounds good|perfect|bye|goodbye)(?:\s+(?:there|so much|a lot))?[\s!.,]*$",
    )
    .unwrap()
});

static CONNECTORS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(and also|as well as|in addition|additionally|furthermore|moreover|also|after that|and then|besides|on top of that)\b",
    )
    .unwrap()
});

static ANALYSIS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(compare|comparison|difference|differences|differ|versus|vs\.?|analy[sz]e|analysis|evaluate|explain why|why does|why is|pros and cons|trade-?offs?|recommend|which is better|better than)\b",
    )
    .unwrap()
});

const PRONOUNS: &[&str] = &["it", "this", "that", "they", "them", "those", "these", "its"];

const LONG_MESSAGE_WORDS: usize = 30;
const MEDIUM_MESSAGE_WORDS: usize = 15;

/// 估计消息复杂度，相同输入得到相同结果
pub fn analyze(text: &str) -> ComplexityEstimate {
    ComplexityEstimate::new(complexity_of(&Prepared::new(text)))
}

fn complexity_of(p: &Prepared<'_>) -> Complexity {
    if p.is_blank() || (p.word_count <= 4 && ACKNOWLEDGEMENT.is_match(p.raw)) {
        return Complexity::Simple;
    }

    let score = score(p);
    match score {
        0..=1 => Complexity::Simple,
        2..=3 => Complexity::Medium,
        _ => Complexity::Complex,
    }
}

fn score(p: &Prepared<'_>) -> u32 {
    let mut score = 0;

    if p.word_count > LONG_MESSAGE_WORDS {
        score += 2;
    } else if p.word_count > MEDIUM_MESSAGE_WORDS {
        score += 1;
    }

    score += match CONNECTORS.find_iter(&p.lower).count() {
        0 => 0,
        1 => 1,
        _ => 2,
    };

    if ANALYSIS.is_match(&p.lower) {
        score += 2;
    }

    if p.question_marks() >= 2 {
        score += 2;
    }

    // 代词过多意味着指代不清，需要更多上下文
    let pronouns = p
        .lower
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| PRONOUNS.contains(w))
        .count();
    if pronouns >= 2 && pronouns * 4 >= p.word_count {
        score += 1;
    }

    score
}
