use crate::config::TriggerLists;
use crate::types::VoteCategory;

/// Maps free text to a vote by ordered keyword triggers.
///
/// Categories are checked in the fixed order positive, neutral, negative and
/// the first trigger found wins. A body containing both a positive and a
/// negative trigger is therefore positive, wherever the keywords sit in the
/// text.
#[derive(Debug, Clone)]
pub struct SentimentClassifier {
    positive: Vec<String>,
    neutral: Vec<String>,
    negative: Vec<String>,
}

impl SentimentClassifier {
    pub fn new(triggers: &TriggerLists) -> Self {
        let lower = |list: &[String]| list.iter().map(|t| t.to_lowercase()).collect();
        Self {
            positive: lower(&triggers.positive),
            neutral: lower(&triggers.neutral),
            negative: lower(&triggers.negative),
        }
    }

    pub fn classify(&self, text: &str) -> Option<VoteCategory> {
        let text = text.to_lowercase();
        let ordered = [
            (VoteCategory::Positive, &self.positive),
            (VoteCategory::Neutral, &self.neutral),
            (VoteCategory::Negative, &self.negative),
        ];

        ordered.into_iter().find_map(|(category, triggers)| {
            triggers
                .iter()
                .any(|trigger| text.contains(trigger.as_str()))
                .then_some(category)
        })
    }
}
