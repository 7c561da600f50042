use std::time::Instant;

use datachat_llm::{
    truncate_chars, BackendKind, BackendRegistry, FormattedPrompt, GenerationRequest, Language,
    PromptFormatter, RoleMarkers,
};

/// Prefix marking a displayable failure message.
pub const ERROR_PREFIX: &str = "[error] ";

/// Substituted when a backend produces nothing usable.
pub const EMPTY_ANSWER: &str = "The model did not return an answer. Please try rephrasing the question.";

pub fn is_error_message(message: &str) -> bool {
    message.starts_with(ERROR_PREFIX)
}

/// Turns a question plus context into a displayable answer using one of the
/// registered backends. Every outcome, including failures, is a string.
pub struct Orchestrator {
    registry: BackendRegistry,
    formatter: PromptFormatter,
    persona: String,
    max_response_chars: usize,
}

impl Orchestrator {
    pub fn new(
        registry: BackendRegistry,
        formatter: PromptFormatter,
        persona: impl Into<String>,
        max_response_chars: usize,
    ) -> Self {
        Self {
            registry,
            formatter,
            persona: persona.into(),
            max_response_chars,
        }
    }

    pub fn registry(&self) -> &BackendRegistry {
        &self.registry
    }

    pub fn answer(&self, question: &str, context: Option<&str>, language: Language, backend_id: &str) -> String {
        let Some(backend) = self.registry.get(backend_id) else {
            return format!("{ERROR_PREFIX}unknown backend '{backend_id}'");
        };
        if let Err(err) = backend.initialize() {
            return format!("{ERROR_PREFIX}failed to initialize backend '{backend_id}': {err}");
        }

        let mut request = GenerationRequest::new(question).with_language(language);
        request.persona = self.persona.clone();
        request.context = context.map(str::to_string);
        let prompt = self.formatter.format(&request, backend.markers());
        tracing::debug!(
            backend = backend_id,
            language = %language,
            prompt_tokens = prompt.token_estimate,
            "dispatching generation"
        );

        let started = Instant::now();
        match backend.generate(&prompt) {
            Ok(raw) => {
                let answer = match backend.kind() {
                    // quotes table rows verbatim; a column may be named like a role label
                    BackendKind::Extractive => bound_answer(raw.trim(), self.max_response_chars),
                    _ => clean_output(&raw, &prompt, backend.markers(), self.max_response_chars),
                };
                tracing::info!(
                    backend = backend_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    answer_chars = answer.chars().count(),
                    "answer ready"
                );
                answer
            }
            Err(err) => {
                tracing::warn!(backend = backend_id, error = %err, "generation failed");
                format!("{ERROR_PREFIX}generation failed on backend '{backend_id}': {err}")
            }
        }
    }
}

/// Normalizes raw model output: drops an echoed prompt and a leading
/// assistant marker, cuts at the first leaked role marker, and bounds the
/// length to `max_chars`.
pub fn clean_output(raw: &str, prompt: &FormattedPrompt, markers: &RoleMarkers, max_chars: usize) -> String {
    let mut text = strip_echo(raw, prompt).trim_start();
    let assistant = markers.assistant.trim();
    if !assistant.is_empty() {
        if let Some(rest) = text.strip_prefix(assistant) {
            text = rest.trim_start();
        }
    }

    let cut = markers
        .boundaries()
        .into_iter()
        .filter_map(|marker| find_boundary(text, marker))
        .min()
        .unwrap_or(text.len());
    bound_answer(text[..cut].trim(), max_chars)
}

/// Removes the prompt when the model repeated it before answering. Only a
/// leading echo counts; the user segment alone must be followed by a line
/// break, so an answer that opens with the question's words is kept.
fn strip_echo<'a>(raw: &'a str, prompt: &FormattedPrompt) -> &'a str {
    if !prompt.text.is_empty() {
        if let Some(rest) = raw.strip_prefix(prompt.text.as_str()) {
            return rest;
        }
    }
    let trimmed = raw.trim_start();
    let full = prompt.text.trim();
    if !full.is_empty() {
        if let Some(rest) = trimmed.strip_prefix(full) {
            return rest;
        }
    }
    let user = prompt.user.trim();
    if !user.is_empty() {
        if let Some(rest) = trimmed.strip_prefix(user) {
            if rest.is_empty() || rest.starts_with(['\n', '\r']) {
                return rest;
            }
        }
    }
    raw
}

/// Position of `marker` as a role boundary. Template tokens such as
/// `<|end|>` match anywhere; word labels such as `User:` only at the start
/// of a line.
fn find_boundary(text: &str, marker: &str) -> Option<usize> {
    if !marker.starts_with(char::is_alphanumeric) {
        return text.find(marker);
    }
    text.match_indices(marker)
        .map(|(pos, _)| pos)
        .find(|&pos| pos == 0 || text[..pos].ends_with('\n'))
}

fn bound_answer(text: &str, max_chars: usize) -> String {
    let bounded = truncate_chars(text, max_chars).trim_end();
    if bounded.is_empty() {
        truncate_chars(EMPTY_ANSWER, max_chars).to_string()
    } else {
        bounded.to_string()
    }
}
