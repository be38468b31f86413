use crate::cancel::CancellationToken;
use crate::error::LlmError;
use crate::models::{Chunk, RetrievalResult};
use crate::retry::{retry_with, RetryPolicy};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

pub const DEFAULT_MISTRAL_ENDPOINT: &str = "https://api.mistral.ai/v1/chat/completions";
pub const DEFAULT_MISTRAL_MODEL: &str = "mistral-small-latest";
pub const OFFLINE_SNIPPET_CHARS: usize = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

pub trait ChatCompletion {
    fn complete(&self, prompt: &str, temperature: f32) -> Result<Completion, LlmError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnswerLanguage {
    #[default]
    Auto,
    Portuguese,
    English,
}

impl FromStr for AnswerLanguage {
    type Err = std::convert::Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value.trim().to_lowercase().as_str() {
            "pt" | "pt-br" | "portugues" | "português" => Self::Portuguese,
            "en" | "en-us" | "english" => Self::English,
            _ => Self::Auto,
        })
    }
}

impl AnswerLanguage {
    fn instruction(self) -> &'static str {
        match self {
            Self::Auto => "",
            Self::Portuguese => "Responda em português do Brasil.\n",
            Self::English => "Answer in English.\n",
        }
    }
}

pub fn build_answer_prompt(
    question: &str,
    contexts: &[RetrievalResult],
    language: AnswerLanguage,
) -> String {
    let context_text = contexts
        .iter()
        .map(|context| format!("[Page {}] {}", context.page, context.text))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "{}Summarize or answer the question using only the provided context. \
         If there is no answer, say you don't know.\n\n\
         Question: {question}\n\n\
         Context:\n{context_text}",
        language.instruction()
    )
}

pub fn offline_answer(contexts: &[RetrievalResult], snippet_chars: usize) -> String {
    if contexts.is_empty() {
        return "[Offline] No context found.".to_string();
    }

    let mut lines = vec!["[Offline] No call to LLM. Relevant chunks:".to_string()];
    for (position, context) in contexts.iter().enumerate() {
        let text = context.text.trim();
        let text = if text.chars().count() > snippet_chars {
            let cut = text.chars().take(snippet_chars).collect::<String>();
            format!("{}...", cut.trim_end())
        } else {
            text.to_string()
        };
        lines.push(format!(
            "{}) Page {} (score {:.3}): {}",
            position + 1,
            context.page,
            context.score,
            text
        ));
    }
    lines.join("\n")
}

pub fn answer_question<C>(
    client: &C,
    question: &str,
    contexts: &[RetrievalResult],
    language: AnswerLanguage,
) -> Result<Completion, LlmError>
where
    C: ChatCompletion + ?Sized,
{
    let prompt = build_answer_prompt(question, contexts, language);
    client.complete(&prompt, 0.2)
}

fn title_prompt(chunk_text: &str) -> String {
    format!(
        "Generate ONLY ONE SHORT TITLE for the text below.\n\
         Title rules:\n\
         - It must have between 2 and 5 words.\n\
         - Do not describe long sentences.\n\
         - Do not write explanations.\n\
         - Do not use colons.\n\n\
         Text:\n{chunk_text}"
    )
}

pub fn generate_chunk_title<C, S>(
    client: &C,
    chunk_text: &str,
    policy: RetryPolicy,
    sleep: S,
) -> Result<String, LlmError>
where
    C: ChatCompletion + ?Sized,
    S: FnMut(Duration),
{
    let prompt = title_prompt(chunk_text);
    retry_with(
        policy,
        |attempt| {
            debug!(attempt, "requesting chunk title");
            client
                .complete(&prompt, 0.1)
                .map(|completion| completion.text.trim().to_string())
        },
        LlmError::is_rate_limited,
        sleep,
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutlineEntry {
    pub page: usize,
    pub title: String,
}

/// Titles the first chunk of every distinct page, in chunk order. The
/// token is checked before each page.
pub fn semantic_outline<C, S>(
    client: &C,
    chunks: &[Chunk],
    policy: RetryPolicy,
    cancel: &CancellationToken,
    mut sleep: S,
) -> Result<Vec<OutlineEntry>, LlmError>
where
    C: ChatCompletion + ?Sized,
    S: FnMut(Duration),
{
    let mut seen = HashSet::new();
    let mut outline = Vec::new();

    for chunk in chunks {
        if !seen.insert(chunk.page) {
            continue;
        }
        if cancel.is_cancelled() {
            return Err(LlmError::Cancelled);
        }
        let title = generate_chunk_title(client, &chunk.text, policy, &mut sleep)?;
        info!(page = chunk.page, %title, "outlined page");
        outline.push(OutlineEntry {
            page: chunk.page,
            title,
        });
    }

    Ok(outline)
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl ChatResponse {
    fn into_completion(self) -> Result<Completion, LlmError> {
        let text = self
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or(LlmError::EmptyResponse)?;
        Ok(Completion {
            text,
            usage: self.usage,
        })
    }
}

#[derive(Clone)]
pub struct MistralClient {
    endpoint: String,
    model: String,
    api_key: String,
    client: Client,
}

impl MistralClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self, LlmError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(LlmError::MissingApiKey);
        }
        Ok(Self {
            endpoint: DEFAULT_MISTRAL_ENDPOINT.to_string(),
            model: model.into(),
            api_key,
            client: Client::new(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl ChatCompletion for MistralClient {
    fn complete(&self, prompt: &str, temperature: f32) -> Result<Completion, LlmError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(LlmError::RateLimited);
        }
        if !status.is_success() {
            let details = response.text().unwrap_or_default();
            return Err(LlmError::BackendResponse {
                status: status.as_u16(),
                details,
            });
        }

        let body = response.text()?;
        let parsed: ChatResponse = serde_json::from_str(&body)?;
        parsed.into_completion()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn result(page: usize, score: f32, text: &str) -> RetrievalResult {
        RetrievalResult {
            score,
            page,
            text: text.to_string(),
        }
    }

    struct ScriptedClient {
        replies: RefCell<Vec<Result<Completion, LlmError>>>,
        prompts: RefCell<Vec<String>>,
    }

    impl ScriptedClient {
        fn new(mut replies: Vec<Result<Completion, LlmError>>) -> Self {
            replies.reverse();
            Self {
                replies: RefCell::new(replies),
                prompts: RefCell::new(Vec::new()),
            }
        }
    }

    impl ChatCompletion for ScriptedClient {
        fn complete(&self, prompt: &str, _temperature: f32) -> Result<Completion, LlmError> {
            self.prompts.borrow_mut().push(prompt.to_string());
            self.replies
                .borrow_mut()
                .pop()
                .unwrap_or(Err(LlmError::EmptyResponse))
        }
    }

    fn reply(text: &str) -> Result<Completion, LlmError> {
        Ok(Completion {
            text: text.to_string(),
            usage: None,
        })
    }

    fn no_wait() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::ZERO,
        }
    }

    #[test]
    fn language_aliases_resolve() {
        assert_eq!(
            "PT-BR".parse::<AnswerLanguage>(),
            Ok(AnswerLanguage::Portuguese)
        );
        assert_eq!(
            "english".parse::<AnswerLanguage>(),
            Ok(AnswerLanguage::English)
        );
        assert_eq!("klingon".parse::<AnswerLanguage>(), Ok(AnswerLanguage::Auto));
    }

    #[test]
    fn answer_prompt_cites_pages_and_language() {
        let prompt = build_answer_prompt(
            "What is the limit?",
            &[result(2, 0.9, "Below 200 bar."), result(0, 0.5, "Intro.")],
            AnswerLanguage::English,
        );
        assert!(prompt.starts_with("Answer in English.\n"));
        assert!(prompt.contains("Question: What is the limit?"));
        assert!(prompt.contains("[Page 2] Below 200 bar.\n\n[Page 0] Intro."));
    }

    #[test]
    fn offline_answer_truncates_long_passages() {
        let long = "word ".repeat(200);
        let answer = offline_answer(&[result(4, 0.25, &long)], OFFLINE_SNIPPET_CHARS);
        let line = answer.lines().nth(1).unwrap_or_default();
        assert!(line.starts_with("1) Page 4 (score 0.250): "));
        assert!(line.ends_with("..."));

        assert_eq!(offline_answer(&[], 10), "[Offline] No context found.");
    }

    #[test]
    fn title_generation_retries_rate_limits() -> Result<(), LlmError> {
        let client = ScriptedClient::new(vec![
            Err(LlmError::RateLimited),
            reply("  Pump Pressure Limits \n"),
        ]);
        let title = generate_chunk_title(&client, "text", no_wait(), |_| {})?;
        assert_eq!(title, "Pump Pressure Limits");
        assert_eq!(client.prompts.borrow().len(), 2);
        Ok(())
    }

    #[test]
    fn title_generation_does_not_retry_other_errors() {
        let client = ScriptedClient::new(vec![
            Err(LlmError::BackendResponse {
                status: 401,
                details: "unauthorized".to_string(),
            }),
            reply("never used"),
        ]);
        let result = generate_chunk_title(&client, "text", no_wait(), |_| {});
        assert!(matches!(
            result,
            Err(LlmError::BackendResponse { status: 401, .. })
        ));
        assert_eq!(client.prompts.borrow().len(), 1);
    }

    #[test]
    fn outline_titles_first_chunk_of_each_page() -> Result<(), LlmError> {
        let chunks = [(0, "a"), (0, "b"), (1, "c"), (3, "d")]
            .into_iter()
            .map(|(page, text)| Chunk {
                page,
                text: text.to_string(),
                start: 0,
                end: 1,
            })
            .collect::<Vec<_>>();
        let client = ScriptedClient::new(vec![reply("One"), reply("Two"), reply("Three")]);

        let outline = semantic_outline(
            &client,
            &chunks,
            no_wait(),
            &CancellationToken::new(),
            |_| {},
        )?;
        assert_eq!(
            outline.iter().map(|entry| entry.page).collect::<Vec<_>>(),
            vec![0, 1, 3]
        );
        assert_eq!(outline[2].title, "Three");
        assert!(client.prompts.borrow()[1].ends_with("Text:\nc"));
        Ok(())
    }

    #[test]
    fn cancelled_outline_sends_no_requests() {
        let chunks = [(0, "a"), (1, "b"), (2, "c")]
            .into_iter()
            .map(|(page, text)| Chunk {
                page,
                text: text.to_string(),
                start: 0,
                end: 1,
            })
            .collect::<Vec<_>>();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let client = ScriptedClient::new(vec![reply("One"), reply("Two"), reply("Three")]);

        let result = semantic_outline(&client, &chunks, no_wait(), &cancel, |_| {});
        assert!(matches!(result, Err(LlmError::Cancelled)));
        assert_eq!(client.prompts.borrow().len(), 0);
    }

    #[test]
    fn outline_cancelled_during_backoff_does_not_title_the_next_page() {
        let chunks = [(0, "a"), (1, "b")]
            .into_iter()
            .map(|(page, text)| Chunk {
                page,
                text: text.to_string(),
                start: 0,
                end: 1,
            })
            .collect::<Vec<_>>();
        let cancel = CancellationToken::new();
        let client = ScriptedClient::new(vec![
            Err(LlmError::RateLimited),
            reply("First Page"),
            reply("never used"),
        ]);

        let result = semantic_outline(&client, &chunks, no_wait(), &cancel, |_| cancel.cancel());
        assert!(matches!(result, Err(LlmError::Cancelled)));
        assert_eq!(client.prompts.borrow().len(), 2);
    }

    #[test]
    fn chat_response_parsing_keeps_usage() -> Result<(), LlmError> {
        let body = r#"{
            "choices": [{"message": {"role": "assistant", "content": "200 bar"}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
        }"#;
        let completion = serde_json::from_str::<ChatResponse>(body)?.into_completion()?;
        assert_eq!(completion.text, "200 bar");
        assert_eq!(completion.usage.map(|usage| usage.total_tokens), Some(15));

        let empty = serde_json::from_str::<ChatResponse>(r#"{"choices": []}"#)?;
        assert!(matches!(
            empty.into_completion(),
            Err(LlmError::EmptyResponse)
        ));
        Ok(())
    }

    #[test]
    fn client_requires_api_key() {
        assert!(matches!(
            MistralClient::new("  ", DEFAULT_MISTRAL_MODEL),
            Err(LlmError::MissingApiKey)
        ));
    }
}
