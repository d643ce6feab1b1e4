//! LLM-assisted move classification for sentences the keyword rules cannot
//! place.  Cached by sentence hash, so a repeated sentence never costs a
//! second call.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Duration;

use lru::LruCache;
use sha2::{Digest, Sha256};
use tracing::warn;

use atelier_llm::{CallerRole, CompletionRequest, Gateway};
use atelier_types::{MoveFocus, MoveType};

pub struct MoveClassifier {
    gateway: Gateway,
    model: String,
    timeout: Duration,
    cache: Mutex<LruCache<String, Option<(MoveType, MoveFocus)>>>,
}

impl MoveClassifier {
    pub fn new(gateway: Gateway, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            gateway,
            model: model.into(),
            timeout,
            cache: Mutex::new(LruCache::new(NonZeroUsize::new(512).expect("nonzero"))),
        }
    }

    /// Classify one sentence into (type, focus), or `None` when the model
    /// declines or answers outside the vocabulary.
    pub async fn classify(&self, sentence: &str) -> Option<(MoveType, MoveFocus)> {
        let key = sentence_hash(sentence);
        if let Some(hit) = self.cache.lock().expect("move classifier cache poisoned").get(&key) {
            return *hit;
        }

        let system = "Classify one sentence from an architecture student as a design move. \
                      Reply with exactly two words separated by a slash: \
                      TYPE/FOCUS where TYPE is one of analysis, synthesis, evaluation, \
                      transformation, reflection and FOCUS is one of function, form, \
                      structure, material, environment, culture. \
                      Reply NONE if the sentence is not a design move.";
        let request = CompletionRequest::new(&self.model, system)
            .with_user(sentence)
            .max_tokens(8)
            .temperature(0.0)
            .timeout(self.timeout);

        let resolved = match self.gateway.complete(CallerRole::Context, request).await {
            Ok(completion) => parse_labels(&completion.text),
            Err(err) => {
                warn!(error = %err, "move classification call failed");
                None
            }
        };
        self.cache
            .lock()
            .expect("move classifier cache poisoned")
            .put(key, resolved);
        resolved
    }
}

fn parse_labels(raw: &str) -> Option<(MoveType, MoveFocus)> {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("none") {
        return None;
    }
    let (type_label, focus_label) = trimmed.split_once('/')?;
    Some((MoveType::parse(type_label)?, MoveFocus::parse(focus_label)?))
}

fn sentence_hash(sentence: &str) -> String {
    let normalized = sentence.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    format!("{:x}", Sha256::digest(normalized.as_bytes()))
}
