use serde::{Deserialize, Serialize};

use crate::prompt::FormattedPrompt;

pub const NO_CONTEXT_REPLY: &str = "I can only answer questions about the loaded data, and no matching records were found.";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractiveConfig {
    /// Most context lines quoted in one answer.
    pub max_lines: usize,
    /// Word cap for the fallback summary when no line matches.
    pub summary_words: usize,
}

impl Default for ExtractiveConfig {
    fn default() -> Self {
        Self {
            max_lines: 3,
            summary_words: 40,
        }
    }
}

/// Offline backend that answers by quoting the context lines sharing the
/// most words with the question.
#[derive(Debug, Clone)]
pub struct ExtractiveModel {
    config: ExtractiveConfig,
}

impl ExtractiveModel {
    pub fn new(config: ExtractiveConfig) -> Self {
        Self { config }
    }

    pub fn answer(&self, prompt: &FormattedPrompt) -> String {
        let Some(context) = prompt.context.as_deref() else {
            return NO_CONTEXT_REPLY.to_string();
        };
        let question = terms(&prompt.question);
        let mut scored: Vec<(usize, usize, &str)> = context
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .enumerate()
            .map(|(position, line)| {
                let overlap = terms(line).iter().filter(|t| question.contains(*t)).count();
                (position, overlap, line)
            })
            .filter(|(_, overlap, _)| *overlap > 0)
            .collect();
        if scored.is_empty() {
            return format!("Based on the data: {}", summarize_text(context, self.config.summary_words));
        }
        scored.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(self.config.max_lines.max(1));
        scored.sort_by_key(|(position, _, _)| *position);
        let lines = scored
            .into_iter()
            .map(|(_, _, line)| line)
            .collect::<Vec<_>>()
            .join("\n");
        format!("Based on the data:\n{lines}")
    }
}

fn terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.chars().count() > 2)
        .map(str::to_lowercase)
        .collect()
}

fn summarize_text(text: &str, max_words: usize) -> String {
    text.split_whitespace()
        .take(max_words.max(1))
        .collect::<Vec<_>>()
        .join(" ")
}
