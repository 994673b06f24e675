//! 客服意图分类器
//!
//! 与主分类器完全独立的规则集，只为分析事件和回复语气提供信号，
//! 结果不会回流到路由决策。

use once_cell::sync::Lazy;
use regex::Regex;

use crate::rules::{first_match, Prepared, Rule};
use chat_core::{Sentiment, SupportIntent, SupportIntentClassification};

static ESCALATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(manager|supervisor|lawyer|attorney|legal action|sue|suing|chargeback|dispute the charge|report (?:you|this)|better business bureau|(?:speak|talk) (?:to|with) (?:a |an )?(?:human|person|someone|real person|agent)|real person|cancel my (?:account|subscription|membership)|never (?:coming back|ordering again))\b",
    )
    .unwrap()
});

static COMPLAINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(complain(?:t|ts|ing)?|not happy|unhappy|disappointed|terrible|awful|horrible|worst|rude|broken|not working|doesn'?t work|wrong|missing|late again|cold|overcharged|unacceptable)\b",
    )
    .unwrap()
});

static PRE_SALES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(price|prices|pricing|cost|costs|how much|quote|discount|coupon|promo|deal|deals|plans?|free trial|trial|demo|buy|purchase|catering|bulk order|wholesale|gift card)\b",
    )
    .unwrap()
});

static POLICY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(polic(?:y|ies)|terms|conditions|warranty|guarantee|privacy|cancellation|allerg(?:y|ies|en|ens)|deposit|age limit|dress code|pets? allowed)\b",
    )
    .unwrap()
});

static HOW_TO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(how (?:do|can|should) i|how to|steps? to|guide|tutorial|set ?up|configure|install|instructions|walk me through)\b",
    )
    .unwrap()
});

static FAQ: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(^(?:what|when|where|who|which|do you|does|are you|is there|can i)\b|\b(hours|open|opening|closing|location|address|parking|delivery|menu|wifi|reservations?)\b)",
    )
    .unwrap()
});

const POSITIVE_WORDS: &[&str] = &[
    "thanks", "thank", "great", "awesome", "love", "loved", "perfect", "excellent", "amazing",
    "happy", "appreciate", "wonderful", "delicious", "helpful", "fantastic",
];

const NEGATIVE_WORDS: &[&str] = &[
    "bad", "terrible", "awful", "hate", "angry", "upset", "broken", "worst", "disappointed",
    "horrible", "annoyed", "frustrated", "unacceptable", "rude", "disgusting", "useless",
];

pub static SUPPORT_RULES: &[Rule<(SupportIntent, f32)>] = &[
    Rule {
        name: "escalation_risk",
        apply: |p| ESCALATION.is_match(&p.lower).then_some((SupportIntent::EscalationRisk, 0.90)),
    },
    Rule {
        name: "complaint",
        apply: |p| COMPLAINT.is_match(&p.lower).then_some((SupportIntent::Complaint, 0.85)),
    },
    Rule {
        name: "pre_sales",
        apply: |p| PRE_SALES.is_match(&p.lower).then_some((SupportIntent::PreSales, 0.80)),
    },
    Rule {
        name: "policy",
        apply: |p| POLICY.is_match(&p.lower).then_some((SupportIntent::Policy, 0.80)),
    },
    Rule {
        name: "how_to",
        apply: |p| HOW_TO.is_match(&p.lower).then_some((SupportIntent::HowTo, 0.75)),
    },
    Rule {
        name: "faq",
        apply: |p| {
            (FAQ.is_match(&p.lower) || p.raw.contains('?')).then_some((SupportIntent::Faq, 0.70))
        },
    },
];

pub fn classify_support(text: &str) -> SupportIntentClassification {
    let prepared = Prepared::new(text);
    let (intent, confidence) = first_match(SUPPORT_RULES, &prepared)
        .map(|(_, out)| out)
        .unwrap_or((SupportIntent::General, 0.50));

    SupportIntentClassification {
        intent,
        confidence,
        sentiment: sentiment(&prepared),
    }
}

/// 基于词表的情感倾向，空文本不给出判断
fn sentiment(p: &Prepared<'_>) -> Option<Sentiment> {
    if p.is_blank() {
        return None;
    }

    let mut score: i32 = 0;
    for word in p
        .lower
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
    {
        if POSITIVE_WORDS.contains(&word) {
            score += 1;
        } else if NEGATIVE_WORDS.contains(&word) {
            score -= 1;
        }
    }
    if p.lower.contains("not working") || p.lower.contains("not happy") {
        score -= 1;
    }

    Some(match score {
        s if s > 0 => Sentiment::Positive,
        s if s < 0 => Sentiment::Negative,
        _ => Sentiment::Neutral,
    })
}
