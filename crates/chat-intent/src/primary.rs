//! 主意图分类器
//!
//! 纯函数，无 I/O。规则顺序即优先级：
//! 投诉 > 操作请求 > 编号查询 > 问候 > 一般问题 > 默认知识库问题。
//! 投诉与写操作必须排在只读知识库查询之前；问候排在编号查询之后，
//! 以免 "hi, order #A100?" 这类消息被当成问候。
//!
//! 置信度是按规则具体程度给出的固定值，便于审计，不是统计概率。

use once_cell::sync::Lazy;
use regex::Regex;

use crate::rules::{first_match, Prepared, Rule};
use chat_core::{Intent, IntentClassification};

pub const COMPLAINT_CONFIDENCE: f32 = 0.90;
pub const ACTION_CONFIDENCE: f32 = 0.85;
pub const EXPLICIT_LOOKUP_CONFIDENCE: f32 = 0.95;
pub const BARE_ID_CONFIDENCE: f32 = 0.75;
pub const GREETING_CONFIDENCE: f32 = 0.95;
pub const QUESTION_CONFIDENCE: f32 = 0.80;
pub const DEFAULT_CONFIDENCE: f32 = 0.50;

/// 裸编号只在短消息中识别
const BARE_ID_MAX_WORDS: usize = 6;
const GREETING_MAX_WORDS: usize = 7;

static COMPLAINT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(not working|doesn'?t work|does not work|isn'?t working|stopped working|broken|terrible|awful|horrible|worst|disappointed|disappointing|unacceptable|ridiculous|rude|complain(?:t|ts|ing)?|frustrat(?:ed|ing)|angry|furious|never (?:arrived|came|showed up)|still waiting|wrong order|cold food|damaged|poor service|bad service|waste of)\b",
    )
    .unwrap()
});

const ACTION_VERBS: &str = r"cancel|book|reserve|schedule|reschedule|refund|return|change|update|modify|delete|remove|add|subscribe|unsubscribe|upgrade|downgrade|place an order|place my order|make a reservation|make a booking";

static ACTION_IMPERATIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)^(?:please\s+)?(?:{})\b", ACTION_VERBS)).unwrap()
});

static ACTION_REQUEST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?:i want to|i'd like to|i would like to|i need to|can you|could you|would you|can i|please|help me)\s+(?:\w+\s+)?(?:{})\b",
        ACTION_VERBS
    ))
    .unwrap()
});

const LOOKUP_NOUNS: &str =
    r"order|ticket|booking|reservation|invoice|case|tracking|confirmation|receipt";

/// 带显式标记的编号：`order #A100`、`booking number is B-7781`、`ticket id: 55120`
static MARKED_LOOKUP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?:{})(?:\s+(?:number|no|id)\b\.?|\s*#|\s*:|\s+is\b)(?:\s+is\b)?\s*[#:]?\s*([A-Za-z0-9][A-Za-z0-9-]{{0,39}})",
        LOOKUP_NOUNS
    ))
    .unwrap()
});

/// 无标记时只接受像编号的值：字母数字混合，或至少三位数字
static UNMARKED_LOOKUP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)\b(?:{})\s+([A-Za-z]+-?\d[A-Za-z0-9-]*|\d+[A-Za-z][A-Za-z0-9-]*|\d{{3,}}[A-Za-z0-9-]*)\b",
        LOOKUP_NOUNS
    ))
    .unwrap()
});

static HASH_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"#\s?([A-Za-z0-9][A-Za-z0-9-]{0,39})").unwrap());

static BARE_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Za-z]{1,4}-?\d{3,}[A-Za-z0-9]*|\d{5,})\b").unwrap());

static GREETING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:hi|hello|hey|hiya|howdy|greetings|yo|good\s+(?:morning|afternoon|evening|day))(?:\s+(?:there|all|everyone|team|folks))?(?:[\s,!.]+how\s+are\s+you(?:\s+doing)?(?:\s+today)?)?[\s,!.?:)]*$",
    )
    .unwrap()
});

static QUESTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:what|what's|whats|when|where|who|whom|whose|which|why|how|can|could|do|does|did|is|are|was|were|will|would|should|may|have|has)\b",
    )
    .unwrap()
});

/// 主分类规则表，顺序即优先级
pub static PRIMARY_RULES: &[Rule<IntentClassification>] = &[
    Rule {
        name: "complaint",
        apply: complaint_rule,
    },
    Rule {
        name: "action_request",
        apply: action_rule,
    },
    Rule {
        name: "identifier_lookup",
        apply: lookup_rule,
    },
    Rule {
        name: "greeting",
        apply: greeting_rule,
    },
    Rule {
        name: "question",
        apply: question_rule,
    },
];

/// 对原始文本分类
pub fn classify(text: &str) -> IntentClassification {
    let prepared = Prepared::new(text);
    if prepared.is_blank() {
        return result(Intent::Fallback, 0.0, None);
    }

    match first_match(PRIMARY_RULES, &prepared) {
        Some((_, classification)) => classification,
        None => result(Intent::KbQuestion, DEFAULT_CONFIDENCE, None),
    }
}

fn result(intent: Intent, confidence: f32, extracted_value: Option<String>) -> IntentClassification {
    IntentClassification {
        intent,
        confidence,
        extracted_value,
    }
}

fn complaint_rule(p: &Prepared<'_>) -> Option<IntentClassification> {
    COMPLAINT
        .is_match(&p.lower)
        .then(|| result(Intent::Complaint, COMPLAINT_CONFIDENCE, None))
}

fn action_rule(p: &Prepared<'_>) -> Option<IntentClassification> {
    (ACTION_IMPERATIVE.is_match(&p.lower) || ACTION_REQUEST.is_match(&p.lower))
        .then(|| result(Intent::ActionRequest, ACTION_CONFIDENCE, None))
}

fn lookup_rule(p: &Prepared<'_>) -> Option<IntentClassification> {
    if let Some(value) = extract_identifier(p.raw) {
        return Some(result(
            Intent::DbLookup,
            EXPLICIT_LOOKUP_CONFIDENCE,
            Some(value),
        ));
    }

    if p.word_count <= BARE_ID_MAX_WORDS {
        if let Some(m) = BARE_ID.captures(p.raw).and_then(|c| c.get(1)) {
            return Some(result(
                Intent::DbLookup,
                BARE_ID_CONFIDENCE,
                Some(m.as_str().to_string()),
            ));
        }
    }

    None
}

fn greeting_rule(p: &Prepared<'_>) -> Option<IntentClassification> {
    (p.word_count <= GREETING_MAX_WORDS && GREETING.is_match(p.raw))
        .then(|| result(Intent::Greeting, GREETING_CONFIDENCE, None))
}

fn question_rule(p: &Prepared<'_>) -> Option<IntentClassification> {
    (p.raw.contains('?') || QUESTION.is_match(&p.lower))
        .then(|| result(Intent::KbQuestion, QUESTION_CONFIDENCE, None))
}

/// 提取显式编号，如 "order #A100"、"ticket 12345"、"#B-77"
///
/// 候选值必须包含数字，避免把 "order status" 中的 "status" 当成编号；
/// 没有 `#`、`number`、`no.`、`id` 或 `is` 标记时，"order 2 pizzas" 里的数量不算编号。
pub fn extract_identifier(text: &str) -> Option<String> {
    MARKED_LOOKUP
        .captures_iter(text)
        .chain(UNMARKED_LOOKUP.captures_iter(text))
        .chain(HASH_ID.captures_iter(text))
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim_end_matches('-'))
        .find(|value| value.chars().any(|c| c.is_ascii_digit()))
        .map(str::to_string)
}
