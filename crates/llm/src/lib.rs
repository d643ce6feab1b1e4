//! LLM gateway: the single surface every agent call goes through.
//!
//! The gateway wraps a [`CompletionBackend`] with retry/backoff, a shared
//! keyed response cache, per-caller token budgets, and usage accounting.
//! Callers must always have a deterministic fallback ready — a persistent
//! [`LlmError`] is an expected outcome, not a panic.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

// ── Chat message types ────────────────────────────────────────────────────────

/// Role in a chat conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A single message in a completion request.  `image_url` carries an inline
/// data URL for vision requests; text-only callers leave it empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into(), image_url: None }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into(), image_url: None }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into(), image_url: None }
    }
    pub fn user_with_image(content: impl Into<String>, image_url: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into(), image_url: Some(image_url.into()) }
    }
}

/// One completion call.  `timeout` is the per-call deadline; the gateway
/// enforces it around the whole backend round-trip.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, system: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system: system.into(),
            messages: Vec::new(),
            max_tokens: 1024,
            temperature: 0.4,
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_user(mut self, content: impl Into<String>) -> Self {
        self.messages.push(ChatMessage::user(content));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl Usage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub usage: Usage,
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Typed gateway failure.  `is_transient` governs the retry policy.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// Network-level failure reaching the backend.
    #[error("llm transport error: {0}")]
    Transport(String),
    /// Non-success HTTP status from the backend.
    #[error("llm http error: status {status}")]
    Http { status: u16, transient: bool },
    /// The per-call deadline elapsed.
    #[error("llm call timed out after {0:?}")]
    Timeout(Duration),
    /// The backend answered but the payload was malformed.  Never retried.
    #[error("llm protocol error: {0}")]
    Protocol(String),
    /// The caller's token budget for this session is exhausted.
    #[error("token budget exhausted for {0}")]
    BudgetExhausted(&'static str),
}

impl LlmError {
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Transport(_) | LlmError::Timeout(_) => true,
            LlmError::Http { transient, .. } => *transient,
            LlmError::Protocol(_) | LlmError::BudgetExhausted(_) => false,
        }
    }
}

// ── Backend trait + HTTP implementation ───────────────────────────────────────

/// A completion provider.  The production implementation speaks the
/// OpenAI-compatible `/chat/completions` protocol; tests use deterministic
/// doubles.
#[async_trait::async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError>;
}

/// Reqwest-based backend for any OpenAI-compatible endpoint (Ollama's
/// `/v1`, OpenRouter, vLLM, …).
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    fn payload(request: &CompletionRequest) -> serde_json::Value {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if !request.system.is_empty() {
            messages.push(json!({ "role": "system", "content": request.system }));
        }
        for m in &request.messages {
            let role = match m.role {
                ChatRole::System => "system",
                ChatRole::User => "user",
                ChatRole::Assistant => "assistant",
            };
            match &m.image_url {
                // Vision messages use the content-parts form.
                Some(url) => messages.push(json!({
                    "role": role,
                    "content": [
                        { "type": "text", "text": m.content },
                        { "type": "image_url", "image_url": { "url": url } }
                    ]
                })),
                None => messages.push(json!({ "role": role, "content": m.content })),
            }
        }
        json!({
            "model": request.model,
            "messages": messages,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        })
    }
}

#[async_trait::async_trait]
impl CompletionBackend for HttpBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        let endpoint = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let mut builder = self.client.post(&endpoint).json(&Self::payload(request));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            // Rate limits and server-side failures are worth retrying.
            let transient = status.as_u16() == 429 || status.is_server_error();
            return Err(LlmError::Http { status: status.as_u16(), transient });
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::Protocol(format!("invalid json body: {e}")))?;

        let text = body
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| LlmError::Protocol(format!("response missing content: {body}")))?
            .to_string();

        let usage = Usage {
            prompt_tokens: body
                .pointer("/usage/prompt_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as u32,
            completion_tokens: body
                .pointer("/usage/completion_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as u32,
        };

        Ok(Completion { text, usage })
    }
}

// ── Caller roles and budgets ──────────────────────────────────────────────────

/// Which pipeline stage is calling.  Budgets and usage accounting are keyed
/// by this, not by agent instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallerRole {
    Socratic,
    Domain,
    Cognitive,
    Analysis,
    Context,
    Synthesis,
}

impl CallerRole {
    pub const ALL: [CallerRole; 6] = [
        CallerRole::Socratic,
        CallerRole::Domain,
        CallerRole::Cognitive,
        CallerRole::Analysis,
        CallerRole::Context,
        CallerRole::Synthesis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CallerRole::Socratic => "socratic",
            CallerRole::Domain => "domain",
            CallerRole::Cognitive => "cognitive",
            CallerRole::Analysis => "analysis",
            CallerRole::Context => "context",
            CallerRole::Synthesis => "synthesis",
        }
    }
}

/// Per-role maximum completion tokens for a single call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBudgets {
    pub socratic: u32,
    pub domain: u32,
    pub cognitive: u32,
    pub analysis: u32,
    pub context: u32,
    pub synthesis: u32,
}

impl Default for TokenBudgets {
    fn default() -> Self {
        Self {
            socratic: 1500,
            domain: 1500,
            cognitive: 1200,
            analysis: 2000,
            context: 1200,
            synthesis: 1500,
        }
    }
}

impl TokenBudgets {
    pub fn for_role(&self, role: CallerRole) -> u32 {
        match role {
            CallerRole::Socratic => self.socratic,
            CallerRole::Domain => self.domain,
            CallerRole::Cognitive => self.cognitive,
            CallerRole::Analysis => self.analysis,
            CallerRole::Context => self.context,
            CallerRole::Synthesis => self.synthesis,
        }
    }
}

/// Accumulated token usage per caller role, reported at session end.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageReport {
    pub per_role: HashMap<String, Usage>,
}

impl UsageReport {
    pub fn total_tokens(&self) -> u32 {
        self.per_role.values().map(|u| u.total()).sum()
    }
}

// ── Gateway ───────────────────────────────────────────────────────────────────

const MAX_RETRIES: u32 = 2;
const BACKOFF_BASE_MS: u64 = 250;

/// The process-wide gateway.  Cheap to clone; the cache and accounting are
/// shared behind `Arc`.
#[derive(Clone)]
pub struct Gateway {
    backend: Arc<dyn CompletionBackend>,
    cache: Arc<Mutex<LruCache<String, Completion>>>,
    usage: Arc<Mutex<HashMap<CallerRole, Usage>>>,
    budgets: TokenBudgets,
}

impl Gateway {
    pub fn new(backend: Arc<dyn CompletionBackend>, budgets: TokenBudgets, cache_capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            backend,
            cache: Arc::new(Mutex::new(LruCache::new(capacity))),
            usage: Arc::new(Mutex::new(HashMap::new())),
            budgets,
        }
    }

    /// Complete a request on behalf of `role`.
    ///
    /// The requested `max_tokens` is clamped to the role's budget.  Identical
    /// requests (same model, temperature, and full prompt) are served from
    /// the cache.  Transient failures are retried at most twice with
    /// exponential backoff; the per-call deadline covers each attempt.
    pub async fn complete(
        &self,
        role: CallerRole,
        mut request: CompletionRequest,
    ) -> Result<Completion, LlmError> {
        request.max_tokens = request.max_tokens.min(self.budgets.for_role(role));

        let key = cache_key(&request);
        if let Some(hit) = self.cache.lock().expect("llm cache poisoned").get(&key).cloned() {
            debug!(role = role.as_str(), "gateway cache hit");
            return Ok(hit);
        }

        let mut last_err: Option<LlmError> = None;
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let backoff = Duration::from_millis(BACKOFF_BASE_MS * (1 << (attempt - 1)));
                tokio::time::sleep(backoff).await;
            }

            let outcome = tokio::time::timeout(request.timeout, self.backend.complete(&request)).await;
            let result = match outcome {
                Ok(result) => result,
                Err(_) => Err(LlmError::Timeout(request.timeout)),
            };

            match result {
                Ok(completion) => {
                    self.record_usage(role, completion.usage);
                    self.cache
                        .lock()
                        .expect("llm cache poisoned")
                        .put(key, completion.clone());
                    return Ok(completion);
                }
                Err(err) if err.is_transient() && attempt < MAX_RETRIES => {
                    warn!(role = role.as_str(), attempt, error = %err, "transient llm failure, retrying");
                    last_err = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_err.unwrap_or_else(|| LlmError::Transport("retries exhausted".to_string())))
    }

    fn record_usage(&self, role: CallerRole, usage: Usage) {
        let mut map = self.usage.lock().expect("usage accounting poisoned");
        let entry = map.entry(role).or_default();
        entry.prompt_tokens += usage.prompt_tokens;
        entry.completion_tokens += usage.completion_tokens;
    }

    pub fn usage_report(&self) -> UsageReport {
        let map = self.usage.lock().expect("usage accounting poisoned");
        UsageReport {
            per_role: map
                .iter()
                .map(|(role, usage)| (role.as_str().to_string(), *usage))
                .collect(),
        }
    }
}

/// Cache key over everything that affects the completion text.
fn cache_key(request: &CompletionRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request.model.as_bytes());
    hasher.update(request.temperature.to_bits().to_le_bytes());
    hasher.update(request.system.as_bytes());
    for m in &request.messages {
        hasher.update([match m.role {
            ChatRole::System => 0u8,
            ChatRole::User => 1,
            ChatRole::Assistant => 2,
        }]);
        hasher.update(m.content.as_bytes());
        if let Some(url) = &m.image_url {
            hasher.update(url.as_bytes());
        }
    }
    format!("{:x}", hasher.finalize())
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Backend that fails with a transient error `failures` times, then
    /// answers with a canned completion.
    struct FlakyBackend {
        failures: AtomicU32,
        calls: AtomicU32,
    }

    impl FlakyBackend {
        fn new(failures: u32) -> Self {
            Self { failures: AtomicU32::new(failures), calls: AtomicU32::new(0) }
        }
    }

    #[async_trait::async_trait]
    impl CompletionBackend for FlakyBackend {
        async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(LlmError::Transport("connection reset".to_string()));
            }
            Ok(Completion {
                text: format!("echo: {}", request.messages.last().map(|m| m.content.as_str()).unwrap_or("")),
                usage: Usage { prompt_tokens: 10, completion_tokens: 5 },
            })
        }
    }

    struct ProtocolFailBackend;

    #[async_trait::async_trait]
    impl CompletionBackend for ProtocolFailBackend {
        async fn complete(&self, _request: &CompletionRequest) -> Result<Completion, LlmError> {
            Err(LlmError::Protocol("garbled".to_string()))
        }
    }

    fn request(text: &str) -> CompletionRequest {
        CompletionRequest::new("test-model", "you are a test").with_user(text)
    }

    #[tokio::test]
    async fn retries_transient_failures_then_succeeds() {
        let backend = Arc::new(FlakyBackend::new(2));
        let gateway = Gateway::new(backend.clone(), TokenBudgets::default(), 8);

        let completion = gateway.complete(CallerRole::Socratic, request("hi")).await.unwrap();
        assert_eq!(completion.text, "echo: hi");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_two_retries() {
        let backend = Arc::new(FlakyBackend::new(5));
        let gateway = Gateway::new(backend.clone(), TokenBudgets::default(), 8);

        let err = gateway.complete(CallerRole::Domain, request("hi")).await.unwrap_err();
        assert!(err.is_transient());
        // 1 initial + 2 retries.
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn protocol_errors_are_not_retried() {
        let backend = Arc::new(ProtocolFailBackend);
        let gateway = Gateway::new(backend, TokenBudgets::default(), 8);

        let err = gateway.complete(CallerRole::Context, request("hi")).await.unwrap_err();
        assert!(matches!(err, LlmError::Protocol(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn identical_requests_hit_the_cache() {
        let backend = Arc::new(FlakyBackend::new(0));
        let gateway = Gateway::new(backend.clone(), TokenBudgets::default(), 8);

        let first = gateway.complete(CallerRole::Analysis, request("same")).await.unwrap();
        let second = gateway.complete(CallerRole::Analysis, request("same")).await.unwrap();
        assert_eq!(first.text, second.text);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn different_prompts_miss_the_cache() {
        let backend = Arc::new(FlakyBackend::new(0));
        let gateway = Gateway::new(backend.clone(), TokenBudgets::default(), 8);

        gateway.complete(CallerRole::Analysis, request("one")).await.unwrap();
        gateway.complete(CallerRole::Analysis, request("two")).await.unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn max_tokens_clamped_to_role_budget() {
        struct CaptureBackend(Mutex<u32>);

        #[async_trait::async_trait]
        impl CompletionBackend for CaptureBackend {
            async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
                *self.0.lock().unwrap() = request.max_tokens;
                Ok(Completion { text: String::new(), usage: Usage::default() })
            }
        }

        let backend = Arc::new(CaptureBackend(Mutex::new(0)));
        let gateway = Gateway::new(backend.clone(), TokenBudgets::default(), 8);

        let mut req = request("big");
        req.max_tokens = 100_000;
        gateway.complete(CallerRole::Cognitive, req).await.unwrap();
        assert_eq!(*backend.0.lock().unwrap(), 1200);
    }

    #[tokio::test]
    async fn usage_is_accounted_per_role() {
        let backend = Arc::new(FlakyBackend::new(0));
        let gateway = Gateway::new(backend, TokenBudgets::default(), 8);

        gateway.complete(CallerRole::Socratic, request("a")).await.unwrap();
        gateway.complete(CallerRole::Socratic, request("b")).await.unwrap();
        gateway.complete(CallerRole::Domain, request("c")).await.unwrap();

        let report = gateway.usage_report();
        assert_eq!(report.per_role["socratic"].total(), 30);
        assert_eq!(report.per_role["domain"].total(), 15);
        assert_eq!(report.total_tokens(), 45);
    }

    #[tokio::test]
    async fn deadline_is_enforced() {
        struct SlowBackend;

        #[async_trait::async_trait]
        impl CompletionBackend for SlowBackend {
            async fn complete(&self, _request: &CompletionRequest) -> Result<Completion, LlmError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(Completion { text: String::new(), usage: Usage::default() })
            }
        }

        tokio::time::pause();
        let gateway = Gateway::new(Arc::new(SlowBackend), TokenBudgets::default(), 8);
        let mut req = request("slow");
        req.timeout = Duration::from_millis(50);

        let err = gateway.complete(CallerRole::Synthesis, req).await.unwrap_err();
        // Timeout is transient, so the gateway retried before giving up.
        assert!(matches!(err, LlmError::Timeout(_)));
    }

    #[test]
    fn cache_key_differs_by_temperature() {
        let a = request("same");
        let mut b = request("same");
        b.temperature = 0.9;
        assert_ne!(cache_key(&a), cache_key(&b));
    }

    #[test]
    fn vision_payload_uses_content_parts() {
        let mut req = request("describe this");
        req.messages = vec![ChatMessage::user_with_image("describe this", "data:image/png;base64,AAAA")];
        let payload = HttpBackend::payload(&req);
        let content = &payload["messages"][1]["content"];
        assert!(content.is_array());
        assert_eq!(content[0]["type"], "text");
        assert_eq!(content[1]["type"], "image_url");
    }
}
