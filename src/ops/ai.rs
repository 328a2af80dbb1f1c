// ============================================================================
// AI ASSISTANT - hosted vision-model chat about the current image
// ============================================================================
//
// Each request runs on its own thread and comes back through an mpsc channel that
// the UI drains every frame.  Replies are plain text for the transcript; they
// never touch the image session.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::blocking::Client as HttpClient;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;
use uuid::Uuid;

use crate::{log_info, log_warn};

const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";
const OPENAI_MODEL: &str = "gpt-4o";
const OPENAI_MAX_TOKENS: u32 = 500;

const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_MODEL: &str = "claude-3-5-sonnet-20241022";
const ANTHROPIC_MAX_TOKENS: u32 = 1024;
const ANTHROPIC_VERSION: &str = "2023-06-01";

const GEMINI_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent";

// ---------------------------------------------------------------------------
//  Provider selection
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum AiProvider {
    #[default]
    OpenAi,
    Anthropic,
    Gemini,
}

impl AiProvider {
    pub fn label(&self) -> &'static str {
        match self {
            AiProvider::OpenAi => "OpenAI",
            AiProvider::Anthropic => "Anthropic",
            AiProvider::Gemini => "Google Gemini",
        }
    }

    /// Settings-file name.
    pub fn key(&self) -> &'static str {
        match self {
            AiProvider::OpenAi => "openai",
            AiProvider::Anthropic => "anthropic",
            AiProvider::Gemini => "gemini",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key.trim().to_lowercase().as_str() {
            "openai" => Some(AiProvider::OpenAi),
            "anthropic" => Some(AiProvider::Anthropic),
            "gemini" | "google" => Some(AiProvider::Gemini),
            _ => None,
        }
    }

    pub fn all() -> &'static [AiProvider] {
        &[AiProvider::OpenAi, AiProvider::Anthropic, AiProvider::Gemini]
    }
}

/// Everything a client needs to talk to one provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderConfig {
    pub provider: AiProvider,
    pub api_key: String,
    /// `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl ProviderConfig {
    pub fn new(provider: AiProvider, api_key: impl Into<String>) -> Self {
        Self {
            provider,
            api_key: api_key.into(),
            timeout: None,
        }
    }

    pub fn has_key(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

// ---------------------------------------------------------------------------
//  Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ProviderError {
    MissingKey(AiProvider),
    /// Transport failure (DNS, TLS, timeout, ...).
    Http(String),
    /// The provider answered with an error message.
    Api(String),
    /// The body did not have the shape the provider documents.
    MalformedResponse(String),
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderError::MissingKey(p) => write!(f, "no API key configured for {}", p.label()),
            ProviderError::Http(e) => write!(f, "request failed: {}", e),
            ProviderError::Api(msg) => write!(f, "{}", msg),
            ProviderError::MalformedResponse(e) => write!(f, "unexpected response: {}", e),
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::Http(e.to_string())
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(e: serde_json::Error) -> Self {
        ProviderError::MalformedResponse(e.to_string())
    }
}

// ---------------------------------------------------------------------------
//  Request / response shapes
// ---------------------------------------------------------------------------

/// URL for a request.  Gemini carries the key in the query string.
pub fn endpoint(provider: AiProvider, api_key: &str) -> String {
    match provider {
        AiProvider::OpenAi => OPENAI_URL.to_string(),
        AiProvider::Anthropic => ANTHROPIC_URL.to_string(),
        AiProvider::Gemini => format!("{}?key={}", GEMINI_URL, api_key),
    }
}

/// JSON body for `prompt`, with the PNG attached when given (base64).
pub fn build_payload(provider: AiProvider, prompt: &str, image_b64: Option<&str>) -> Value {
    match (provider, image_b64) {
        (AiProvider::OpenAi, Some(data)) => json!({
            "model": OPENAI_MODEL,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt },
                    { "type": "image_url", "image_url": { "url": format!("data:image/png;base64,{data}") } }
                ]
            }],
            "max_tokens": OPENAI_MAX_TOKENS
        }),
        (AiProvider::OpenAi, None) => json!({
            "model": OPENAI_MODEL,
            "messages": [{ "role": "user", "content": prompt }],
            "max_tokens": OPENAI_MAX_TOKENS
        }),
        // Anthropic wants the image block ahead of the text.
        (AiProvider::Anthropic, Some(data)) => json!({
            "model": ANTHROPIC_MODEL,
            "max_tokens": ANTHROPIC_MAX_TOKENS,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "image", "source": { "type": "base64", "media_type": "image/png", "data": data } },
                    { "type": "text", "text": prompt }
                ]
            }]
        }),
        (AiProvider::Anthropic, None) => json!({
            "model": ANTHROPIC_MODEL,
            "max_tokens": ANTHROPIC_MAX_TOKENS,
            "messages": [{ "role": "user", "content": prompt }]
        }),
        (AiProvider::Gemini, Some(data)) => json!({
            "contents": [{
                "parts": [
                    { "text": prompt },
                    { "inline_data": { "mime_type": "image/png", "data": data } }
                ]
            }]
        }),
        (AiProvider::Gemini, None) => json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        })
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Deserialize)]
struct OpenAiMessage {
    content: String,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicBlock>,
}

#[derive(Deserialize)]
struct AnthropicBlock {
    text: Option<String>,
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Vec<GeminiCandidate>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: GeminiContent,
}

#[derive(Deserialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

/// Pull the reply text out of a response body.  An `error.message` field
/// wins over everything else.
pub fn extract_text(provider: AiProvider, body: &str) -> Result<String, ProviderError> {
    let value: Value = serde_json::from_str(body)?;
    if value.get("error").is_some_and(|e| !e.is_null()) {
        let envelope: ErrorEnvelope = serde_json::from_value(value.clone())?;
        let message = envelope
            .error
            .and_then(|e| e.message)
            .unwrap_or_else(|| value["error"].to_string());
        return Err(ProviderError::Api(message));
    }

    let text = match provider {
        AiProvider::OpenAi => {
            let r: OpenAiResponse = serde_json::from_value(value)?;
            r.choices.into_iter().next().map(|c| c.message.content)
        }
        AiProvider::Anthropic => {
            let r: AnthropicResponse = serde_json::from_value(value)?;
            r.content.into_iter().next().and_then(|b| b.text)
        }
        AiProvider::Gemini => {
            let r: GeminiResponse = serde_json::from_value(value)?;
            r.candidates
                .into_iter()
                .next()
                .and_then(|c| c.content.parts.into_iter().next())
                .and_then(|p| p.text)
        }
    };
    text.ok_or_else(|| ProviderError::MalformedResponse("no text in reply".to_string()))
}

// ---------------------------------------------------------------------------
//  Clients
// ---------------------------------------------------------------------------

pub trait AiClient: Send + Sync {
    /// Send `prompt`, optionally with the current image as PNG bytes.
    fn send_message(&self, prompt: &str, image_png: Option<&[u8]>) -> Result<String, ProviderError>;
}

pub struct HttpAiClient {
    config: ProviderConfig,
    http: HttpClient,
}

impl HttpAiClient {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        if !config.has_key() {
            return Err(ProviderError::MissingKey(config.provider));
        }
        // The blocking client defaults to 30 s; passing `None` removes the limit.
        let http = HttpClient::builder().timeout(config.timeout).build()?;
        Ok(Self { config, http })
    }
}

impl AiClient for HttpAiClient {
    fn send_message(&self, prompt: &str, image_png: Option<&[u8]>) -> Result<String, ProviderError> {
        let provider = self.config.provider;
        let image_b64 = image_png.map(|bytes| BASE64.encode(bytes));
        let payload = build_payload(provider, prompt, image_b64.as_deref());

        let mut request = self
            .http
            .post(endpoint(provider, &self.config.api_key))
            .header(CONTENT_TYPE, "application/json");
        request = match provider {
            AiProvider::OpenAi => request.bearer_auth(&self.config.api_key),
            AiProvider::Anthropic => request
                .header("x-api-key", &self.config.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION),
            AiProvider::Gemini => request,
        };

        let response = request.json(&payload).send()?;
        let status = response.status();
        let body = response.text()?;
        match extract_text(provider, &body) {
            Ok(text) => Ok(text),
            Err(ProviderError::MalformedResponse(_)) if !status.is_success() => {
                Err(ProviderError::Api(format!("HTTP {}", status)))
            }
            Err(e) => Err(e),
        }
    }
}

// ---------------------------------------------------------------------------
//  Chat transcript + background worker
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Speaker {
    You,
    Ai,
    System,
    Error,
}

impl Speaker {
    pub fn label(&self) -> &'static str {
        match self {
            Speaker::You => "You",
            Speaker::Ai => "AI",
            Speaker::System => "System",
            Speaker::Error => "Error",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ChatEntry {
    pub speaker: Speaker,
    pub text: String,
    pub time: String,
}

struct AiReply {
    id: Uuid,
    result: Result<String, ProviderError>,
}

/// Transcript plus the channel replies arrive on.
pub struct AiChat {
    transcript: Vec<ChatEntry>,
    tx: Sender<AiReply>,
    rx: Receiver<AiReply>,
    /// Id of the most recent request; only its reply clears the indicator.
    pending: Option<Uuid>,
}

impl Default for AiChat {
    fn default() -> Self {
        Self::new()
    }
}

impl AiChat {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        let mut chat = Self {
            transcript: Vec::new(),
            tx,
            rx,
            pending: None,
        };
        chat.push(Speaker::Ai, "Hello! Ask me anything about the current image.");
        chat
    }

    pub fn transcript(&self) -> &[ChatEntry] {
        &self.transcript
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    fn push(&mut self, speaker: Speaker, text: impl Into<String>) {
        let time = crate::logger::clock_time();
        self.transcript.push(ChatEntry {
            speaker,
            text: text.into(),
            time: time.get(..5).unwrap_or(time.as_str()).to_string(),
        });
    }

    /// Post `prompt` with an HTTP client built from `config`.  With no key
    /// configured a System line is added and nothing is sent.
    pub fn send(&mut self, prompt: &str, config: &ProviderConfig, image_png: Option<Vec<u8>>) -> Option<Uuid> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return None;
        }
        if !config.has_key() {
            self.push(Speaker::You, prompt);
            self.push(
                Speaker::System,
                format!("Please configure your {} API key first (Settings > AI).", config.provider.label()),
            );
            return None;
        }
        match HttpAiClient::new(config.clone()) {
            Ok(client) => self.send_with(Arc::new(client), prompt, image_png),
            Err(e) => {
                self.push(Speaker::You, prompt);
                self.push(Speaker::Error, format!("Failed to get AI response: {}", e));
                None
            }
        }
    }

    /// Post `prompt` through any client.  Returns the request id.
    pub fn send_with(&mut self, client: Arc<dyn AiClient>, prompt: &str, image_png: Option<Vec<u8>>) -> Option<Uuid> {
        let prompt = prompt.trim().to_string();
        if prompt.is_empty() {
            return None;
        }
        self.push(Speaker::You, prompt.clone());

        let id = Uuid::new_v4();
        self.pending = Some(id);
        log_info!("AI request {} dispatched (image: {})", id, image_png.is_some());

        // Off the rayon pool: a request may never return.
        let tx = self.tx.clone();
        std::thread::spawn(move || {
            let result = client.send_message(&prompt, image_png.as_deref());
            let _ = tx.send(AiReply { id, result });
        });
        Some(id)
    }

    /// Drain finished replies into the transcript.  Returns how many arrived.
    pub fn poll(&mut self) -> usize {
        let mut received = 0;
        while let Ok(reply) = self.rx.try_recv() {
            received += 1;
            match reply.result {
                Ok(text) => {
                    log_info!("AI request {} answered ({} chars)", reply.id, text.len());
                    self.push(Speaker::Ai, text);
                }
                Err(e) => {
                    log_warn!("AI request {} failed: {}", reply.id, e);
                    self.push(Speaker::Error, format!("Failed to get AI response: {}", e));
                }
            }
            if self.pending == Some(reply.id) {
                self.pending = None;
            }
        }
        received
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Instant;

    struct CannedClient {
        reply: Result<String, String>,
        seen: Mutex<Vec<(String, bool)>>,
    }

    impl AiClient for CannedClient {
        fn send_message(&self, prompt: &str, image_png: Option<&[u8]>) -> Result<String, ProviderError> {
            if let Ok(mut seen) = self.seen.lock() {
                seen.push((prompt.to_string(), image_png.is_some()));
            }
            self.reply.clone().map_err(ProviderError::Api)
        }
    }

    fn wait_for(chat: &mut AiChat, replies: usize) {
        let start = Instant::now();
        let mut got = 0;
        while got < replies && start.elapsed() < Duration::from_secs(10) {
            got += chat.poll();
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(got, replies, "timed out waiting for replies");
    }

    #[test]
    fn openai_payload_with_image() {
        let v = build_payload(AiProvider::OpenAi, "describe", Some("QUJD"));
        assert_eq!(v["model"], "gpt-4o");
        assert_eq!(v["max_tokens"], 500);
        let content = &v["messages"][0]["content"];
        assert_eq!(content[0]["text"], "describe");
        assert_eq!(content[1]["image_url"]["url"], "data:image/png;base64,QUJD");
    }

    #[test]
    fn anthropic_puts_image_first() {
        let v = build_payload(AiProvider::Anthropic, "hi", Some("QUJD"));
        assert_eq!(v["model"], ANTHROPIC_MODEL);
        assert_eq!(v["max_tokens"], 1024);
        let content = &v["messages"][0]["content"];
        assert_eq!(content[0]["type"], "image");
        assert_eq!(content[0]["source"]["data"], "QUJD");
        assert_eq!(content[1]["text"], "hi");
    }

    #[test]
    fn text_only_payloads_use_plain_content() {
        let v = build_payload(AiProvider::Anthropic, "quote \"me\"\n", None);
        assert_eq!(v["messages"][0]["content"], "quote \"me\"\n");
        let g = build_payload(AiProvider::Gemini, "x", None);
        assert_eq!(g["contents"][0]["parts"][0]["text"], "x");
        assert!(g["contents"][0]["parts"].get(1).is_none());
    }

    #[test]
    fn gemini_key_travels_in_query() {
        assert!(endpoint(AiProvider::Gemini, "abc").ends_with(":generateContent?key=abc"));
        assert_eq!(endpoint(AiProvider::OpenAi, "abc"), OPENAI_URL);
        let v = build_payload(AiProvider::Gemini, "look", Some("Zm9v"));
        assert_eq!(v["contents"][0]["parts"][1]["inline_data"]["mime_type"], "image/png");
    }

    #[test]
    fn extracts_reply_text_per_provider() {
        let openai = r#"{"choices":[{"message":{"role":"assistant","content":"a cat"}}]}"#;
        assert_eq!(extract_text(AiProvider::OpenAi, openai).unwrap(), "a cat");
        let anthropic = r#"{"content":[{"type":"text","text":"a dog"}]}"#;
        assert_eq!(extract_text(AiProvider::Anthropic, anthropic).unwrap(), "a dog");
        let gemini = r#"{"candidates":[{"content":{"parts":[{"text":"a bird"}]}}]}"#;
        assert_eq!(extract_text(AiProvider::Gemini, gemini).unwrap(), "a bird");
    }

    #[test]
    fn error_message_becomes_api_error() {
        let body = r#"{"error":{"message":"Invalid API key","type":"auth"}}"#;
        let err = extract_text(AiProvider::OpenAi, body).unwrap_err();
        assert_eq!(err.to_string(), "Invalid API key");
    }

    #[test]
    fn unexpected_shapes_are_malformed() {
        assert!(matches!(
            extract_text(AiProvider::OpenAi, r#"{"choices":[]}"#),
            Err(ProviderError::MalformedResponse(_))
        ));
        assert!(matches!(
            extract_text(AiProvider::Gemini, "<html>"),
            Err(ProviderError::MalformedResponse(_))
        ));
    }

    #[test]
    fn missing_key_adds_system_line_without_request() {
        let mut chat = AiChat::new();
        let config = ProviderConfig::new(AiProvider::Anthropic, "  ");
        assert!(chat.send("hello", &config, None).is_none());
        assert!(!chat.is_pending());
        let last = chat.transcript().last().unwrap();
        assert_eq!(last.speaker, Speaker::System);
        assert!(last.text.contains("Anthropic"));
        assert!(HttpAiClient::new(config).is_err());
    }

    #[test]
    fn reply_lands_in_transcript() {
        let client = Arc::new(CannedClient { reply: Ok("looks sharp".into()), seen: Mutex::new(Vec::new()) });
        let mut chat = AiChat::new();
        let id = chat.send_with(client.clone(), "  how is it? ", Some(vec![1, 2, 3]));
        assert!(id.is_some());
        assert!(chat.is_pending());
        wait_for(&mut chat, 1);
        assert!(!chat.is_pending());

        let speakers: Vec<_> = chat.transcript().iter().map(|e| e.speaker).collect();
        assert_eq!(speakers, vec![Speaker::Ai, Speaker::You, Speaker::Ai]);
        assert_eq!(chat.transcript()[2].text, "looks sharp");
        assert_eq!(client.seen.lock().unwrap()[0], ("how is it?".to_string(), true));
    }

    #[test]
    fn failures_show_as_error_lines() {
        let client = Arc::new(CannedClient { reply: Err("quota".into()), seen: Mutex::new(Vec::new()) });
        let mut chat = AiChat::new();
        chat.send_with(client, "hi", None);
        wait_for(&mut chat, 1);
        let last = chat.transcript().last().unwrap();
        assert_eq!(last.speaker, Speaker::Error);
        assert_eq!(last.text, "Failed to get AI response: quota");
    }

    #[test]
    fn overlapping_requests_both_post() {
        let client = Arc::new(CannedClient { reply: Ok("ok".into()), seen: Mutex::new(Vec::new()) });
        let mut chat = AiChat::new();
        chat.send_with(client.clone(), "one", None);
        chat.send_with(client, "two", None);
        wait_for(&mut chat, 2);
        assert!(!chat.is_pending());
        assert_eq!(chat.transcript().iter().filter(|e| e.text == "ok").count(), 2);
    }

    /// Never answers.
    struct StalledClient;

    impl AiClient for StalledClient {
        fn send_message(&self, _prompt: &str, _image_png: Option<&[u8]>) -> Result<String, ProviderError> {
            loop {
                std::thread::park();
            }
        }
    }

    #[test]
    fn stalled_requests_leave_pixel_work_running() {
        let client: Arc<dyn AiClient> = Arc::new(StalledClient);
        let mut chat = AiChat::new();
        for _ in 0..rayon::current_num_threads() + 1 {
            chat.send_with(client.clone(), "anyone there?", None);
        }
        assert!(chat.is_pending());

        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let buf = crate::canvas::PixelBuffer::transparent(64, 48);
            let rotated = crate::ops::transform::rotate_90cw(&buf);
            let _ = tx.send(rotated.dimensions());
        });
        assert_eq!(rx.recv_timeout(Duration::from_secs(10)), Ok((48, 64)));
        assert_eq!(chat.poll(), 0);
        assert!(chat.is_pending());
    }

    #[test]
    fn empty_prompt_is_ignored() {
        let client = Arc::new(CannedClient { reply: Ok("x".into()), seen: Mutex::new(Vec::new()) });
        let mut chat = AiChat::new();
        assert!(chat.send_with(client, "   ", None).is_none());
        assert_eq!(chat.transcript().len(), 1);
    }
}
