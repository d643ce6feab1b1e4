use std::env;
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Default experimental condition for new sessions when the caller does
    /// not specify one: "MENTOR", "GENERIC", or "CONTROL".
    pub default_mode: String,
    pub session_timeout_minutes: u64,
    /// How many recent messages the context classifier sees.
    pub message_window: usize,
    /// Directory for transcripts and export files.
    pub export_dir: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_mode: "MENTOR".to_string(),
            session_timeout_minutes: 45,
            message_window: 12,
            export_dir: "sessions".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible completion endpoint.
    pub base_url: String,
    pub model: String,
    pub vision_model: String,
    pub temperature: f32,
    pub llm_timeout_seconds: u64,
    /// Environment variable holding the API key.  The key itself never
    /// appears in config files.
    pub api_key_env: String,
    /// Entries kept in the shared response cache.
    pub cache_capacity: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".to_string(),
            model: "llama3.1:8b".to_string(),
            vision_model: "llava:13b".to_string(),
            temperature: 0.4,
            llm_timeout_seconds: 30,
            api_key_env: "ATELIER_API_KEY".to_string(),
            cache_capacity: 512,
        }
    }
}

/// Per-agent maximum completion tokens, enforced by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentBudgetConfig {
    pub socratic: u32,
    pub domain: u32,
    pub cognitive: u32,
    pub analysis: u32,
    pub context: u32,
    pub synthesis: u32,
}

impl Default for AgentBudgetConfig {
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

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkographyConfig {
    /// Cosine similarity a conceptual link must clear.
    pub link_similarity_threshold: f32,
    /// How many preceding moves each new move is compared against.
    pub link_window_size: usize,
    /// Patterns are recomputed every this many moves.
    pub pattern_recompute_interval: usize,
    /// A move with no conceptual links after this many subsequent moves is
    /// an orphan.
    pub orphan_grace_moves: usize,
    /// Intra-link share a candidate chunk must reach.
    pub chunk_modularity_threshold: f32,
    /// Local conceptual link density that qualifies as a web.
    pub web_density_threshold: f32,
}

impl Default for LinkographyConfig {
    fn default() -> Self {
        Self {
            link_similarity_threshold: 0.5,
            link_window_size: 30,
            pattern_recompute_interval: 5,
            orphan_grace_moves: 5,
            chunk_modularity_threshold: 0.35,
            web_density_threshold: 0.6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseConfig {
    /// Spatial keyword score needed to leave ideation.
    pub spatial_score_threshold: f32,
    /// Material keyword score needed to leave visualization.
    pub material_score_threshold: f32,
    pub ideation_min_user_messages: usize,
    pub visualization_min_user_messages: usize,
    /// Image-derived keyword evidence counts at this fraction of text weight.
    pub image_evidence_weight: f32,
    /// Minimum tokens for a user response to count as substantive.
    pub substantive_token_minimum: usize,
}

impl Default for PhaseConfig {
    fn default() -> Self {
        Self {
            spatial_score_threshold: 6.0,
            material_score_threshold: 8.0,
            ideation_min_user_messages: 8,
            visualization_min_user_messages: 15,
            image_evidence_weight: 0.5,
            substantive_token_minimum: 25,
        }
    }
}

/// Ideal scaffolding rate per skill level, used by the SE metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaffoldingConfig {
    pub beginner: f32,
    pub intermediate: f32,
    pub advanced: f32,
    pub expert: f32,
}

impl Default for ScaffoldingConfig {
    fn default() -> Self {
        Self { beginner: 0.8, intermediate: 0.5, advanced: 0.3, expert: 0.1 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Minimum passages the domain expert wants before answering from
    /// retrieval alone.
    pub min_passages: usize,
    /// Similarity floor for a passage to count.
    pub similarity_threshold: f32,
    pub weight_similarity: f32,
    pub weight_recency: f32,
    pub weight_authority: f32,
    pub weight_phase_match: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            min_passages: 3,
            similarity_threshold: 0.35,
            weight_similarity: 0.55,
            weight_recency: 0.05,
            weight_authority: 0.2,
            weight_phase_match: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Global word cap on the merged assistant reply.
    pub max_words: usize,
    /// Sentences at or above this Jaccard similarity are duplicates.
    pub dedup_jaccard: f32,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self { max_words: 350, dedup_jaccard: 0.8 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self { log_level: "info".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub session: SessionConfig,
    pub llm: LlmConfig,
    pub budgets: AgentBudgetConfig,
    pub linkography: LinkographyConfig,
    pub phase: PhaseConfig,
    pub scaffolding: ScaffoldingConfig,
    pub retrieval: RetrievalConfig,
    pub synthesis: SynthesisConfig,
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = fs::read_to_string(path) {
            config = toml::from_str(&raw)?;
        }

        if let Ok(value) = env::var("ATELIER_LLM_BASE_URL") {
            if !value.is_empty() {
                config.llm.base_url = value;
            }
        }
        if let Ok(value) = env::var("ATELIER_LLM_MODEL") {
            if !value.is_empty() {
                config.llm.model = value;
            }
        }

        Ok(config)
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }

    /// Ideal scaffolding vector in skill-rank order (beginner..expert).
    pub fn scaffolding_ideal(&self) -> [f32; 4] {
        [
            self.scaffolding.beginner,
            self.scaffolding.intermediate,
            self.scaffolding.advanced,
            self.scaffolding.expert,
        ]
    }
}
