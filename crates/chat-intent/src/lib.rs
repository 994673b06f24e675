pub mod complexity;
pub mod primary;
pub mod rules;
pub mod support;

pub use complexity::analyze;
pub use primary::classify;
pub use rules::{first_match, Prepared, Rule};
pub use support::classify_support;

pub use chat_core::{
    Complexity, ComplexityEstimate, Intent, IntentClassification, Sentiment, SupportIntent,
    SupportIntentClassification,
};
