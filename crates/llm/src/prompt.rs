use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tiktoken_rs::CoreBPE;

pub const DEFAULT_PERSONA: &str = "You are an AI assistant for MSME analytics.";
pub const GROUNDING_INSTRUCTION: &str =
    "Use the provided context to answer questions about the data. If you cannot answer from the context, say so.";

static CL100K: Lazy<Option<CoreBPE>> = Lazy::new(|| tiktoken_rs::cl100k_base().ok());

/// Response language requested from the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Hi,
    Bn,
    Ta,
    Te,
    Mr,
}

impl Language {
    pub const ALL: [Language; 6] = [
        Language::En,
        Language::Hi,
        Language::Bn,
        Language::Ta,
        Language::Te,
        Language::Mr,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Hi => "hi",
            Language::Bn => "bn",
            Language::Ta => "ta",
            Language::Te => "te",
            Language::Mr => "mr",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Language::En => "English",
            Language::Hi => "Hindi",
            Language::Bn => "Bengali",
            Language::Ta => "Tamil",
            Language::Te => "Telugu",
            Language::Mr => "Marathi",
        }
    }

    /// English needs no directive.
    pub fn directive(&self) -> Option<String> {
        match self {
            Language::En => None,
            other => Some(format!("Respond in {}.", other.name())),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let lower = value.trim().to_lowercase();
        Language::ALL
            .into_iter()
            .find(|lang| lang.code() == lower || lang.name().to_lowercase() == lower)
            .ok_or_else(|| format!("unsupported language '{value}'"))
    }
}

/// Literal strings wrapped around each role segment of a rendered prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleMarkers {
    pub system: String,
    pub user: String,
    pub assistant: String,
    pub end: String,
}

impl RoleMarkers {
    /// Phi-3 instruct chat template.
    pub fn phi3() -> Self {
        Self {
            system: "<|system|>\n".to_string(),
            user: "<|user|>\n".to_string(),
            assistant: "<|assistant|>\n".to_string(),
            end: "<|end|>\n".to_string(),
        }
    }

    pub fn plain() -> Self {
        Self {
            system: "System: ".to_string(),
            user: "User: ".to_string(),
            assistant: "Assistant:".to_string(),
            end: "\n\n".to_string(),
        }
    }

    /// Non-empty markers with surrounding whitespace removed, used to find
    /// role boundaries in generated text.
    pub fn boundaries(&self) -> Vec<&str> {
        [&self.system, &self.user, &self.assistant, &self.end]
            .into_iter()
            .map(|marker| marker.trim())
            .filter(|marker| !marker.is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerPreset {
    Phi3,
    Plain,
}

/// Either a named preset or explicit marker strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MarkerSetting {
    Preset(MarkerPreset),
    Custom(RoleMarkers),
}

impl MarkerSetting {
    pub fn resolve(&self) -> RoleMarkers {
        match self {
            MarkerSetting::Preset(MarkerPreset::Phi3) => RoleMarkers::phi3(),
            MarkerSetting::Preset(MarkerPreset::Plain) => RoleMarkers::plain(),
            MarkerSetting::Custom(markers) => markers.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub persona: String,
    pub language: Language,
    pub context: Option<String>,
    pub question: String,
}

impl GenerationRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            persona: DEFAULT_PERSONA.to_string(),
            language: Language::default(),
            context: None,
            question: question.into(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }
}

/// A prompt rendered for one backend.
///
/// `text` is the single marker-delimited string a local model consumes.
/// Chat APIs take `system` and `user` separately. The raw `context` and
/// `question` are kept for backends that work on them directly.
#[derive(Debug, Clone, PartialEq)]
pub struct FormattedPrompt {
    pub system: String,
    pub user: String,
    pub text: String,
    pub context: Option<String>,
    pub question: String,
    pub token_estimate: usize,
}

#[derive(Debug, Clone)]
pub struct PromptFormatter {
    context_budget: usize,
}

impl PromptFormatter {
    pub fn new(context_budget: usize) -> Self {
        Self { context_budget }
    }

    pub fn context_budget(&self) -> usize {
        self.context_budget
    }

    pub fn format(&self, request: &GenerationRequest, markers: &RoleMarkers) -> FormattedPrompt {
        let context = request
            .context
            .as_deref()
            .map(str::trim)
            .filter(|context| !context.is_empty())
            .map(|context| truncate_chars(context, self.context_budget).to_string());

        let mut system = request.persona.trim().to_string();
        if context.is_some() {
            push_sentence(&mut system, GROUNDING_INSTRUCTION);
        }
        if let Some(directive) = request.language.directive() {
            push_sentence(&mut system, &directive);
        }

        let question = request.question.trim().to_string();
        let user = match &context {
            Some(context) => format!("Context: {context}\n\nQuestion: {question}"),
            None => question.clone(),
        };

        let text = format!(
            "{}{}{}{}{}{}{}",
            markers.system, system, markers.end, markers.user, user, markers.end, markers.assistant
        );
        let token_estimate = estimate_tokens(&text);
        FormattedPrompt {
            system,
            user,
            text,
            context,
            question,
            token_estimate,
        }
    }
}

impl Default for PromptFormatter {
    fn default() -> Self {
        Self::new(1000)
    }
}

fn push_sentence(target: &mut String, sentence: &str) {
    if !target.is_empty() {
        target.push(' ');
    }
    target.push_str(sentence);
}

/// cl100k token count, or a chars/4 estimate when the encoder is unavailable.
pub fn estimate_tokens(text: &str) -> usize {
    match CL100K.as_ref() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => text.chars().count().div_ceil(4),
    }
}

/// Longest prefix of `text` holding at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte, _)) => &text[..byte],
        None => text,
    }
}
