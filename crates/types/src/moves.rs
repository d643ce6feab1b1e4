use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conversation::DesignPhase;

/// Kind of design thinking a move expresses (Goldschmidt's taxonomy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveType {
    Analysis,
    Synthesis,
    Evaluation,
    Transformation,
    Reflection,
}

impl MoveType {
    pub const ALL: [MoveType; 5] = [
        MoveType::Analysis,
        MoveType::Synthesis,
        MoveType::Evaluation,
        MoveType::Transformation,
        MoveType::Reflection,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MoveType::Analysis => "analysis",
            MoveType::Synthesis => "synthesis",
            MoveType::Evaluation => "evaluation",
            MoveType::Transformation => "transformation",
            MoveType::Reflection => "reflection",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        MoveType::ALL.iter().copied().find(|t| t.as_str() == normalized)
    }
}

/// Design aspect the move is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveFocus {
    Function,
    Form,
    Structure,
    Material,
    Environment,
    Culture,
}

impl MoveFocus {
    pub const ALL: [MoveFocus; 6] = [
        MoveFocus::Function,
        MoveFocus::Form,
        MoveFocus::Structure,
        MoveFocus::Material,
        MoveFocus::Environment,
        MoveFocus::Culture,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MoveFocus::Function => "function",
            MoveFocus::Form => "form",
            MoveFocus::Structure => "structure",
            MoveFocus::Material => "material",
            MoveFocus::Environment => "environment",
            MoveFocus::Culture => "culture",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase();
        MoveFocus::ALL.iter().copied().find(|f| f.as_str() == normalized)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveModality {
    Text,
    Image,
    Verbal,
}

impl MoveModality {
    pub fn as_str(&self) -> &'static str {
        match self {
            MoveModality::Text => "text",
            MoveModality::Image => "image",
            MoveModality::Verbal => "verbal",
        }
    }
}

/// Who produced the move.  `AiPrompted` marks moves the student made in
/// direct response to an agent question, as opposed to self-initiated ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveSource {
    User,
    AiProvided,
    AiPrompted,
    #[serde(rename = "self")]
    SelfGenerated,
}

impl MoveSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            MoveSource::User => "user",
            MoveSource::AiProvided => "ai_provided",
            MoveSource::AiPrompted => "ai_prompted",
            MoveSource::SelfGenerated => "self",
        }
    }
}

/// A minimal, labeled act of design thinking extracted from a turn.
/// Immutable once created; the linkograph references moves by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignMove {
    pub id: Uuid,
    pub session_id: Uuid,
    pub turn_id: u32,
    pub ts: DateTime<Utc>,
    pub phase: DesignPhase,
    pub move_type: MoveType,
    pub focus: MoveFocus,
    pub modality: MoveModality,
    pub source: MoveSource,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding: Vec<f32>,
    pub cognitive_load: f32,
}
