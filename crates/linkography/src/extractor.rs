//! Move extraction: sentence-level candidates classified by keyword rules.
//!
//! A sentence becomes a move when it asserts, proposes, evaluates, or
//! reflects.  Small talk and bare questions are dropped.

use atelier_types::{MoveFocus, MoveModality, MoveSource, MoveType};

/// A move before ids, timestamps, phase, and embedding are attached.
#[derive(Debug, Clone, PartialEq)]
pub struct MoveDraft {
    pub content: String,
    pub move_type: MoveType,
    pub focus: MoveFocus,
    pub modality: MoveModality,
    pub source: MoveSource,
    pub cognitive_load: f32,
}

/// Cues per move type, checked in declaration order; the densest hit wins.
const TYPE_CUES: &[(MoveType, &[&str])] = &[
    (
        MoveType::Reflection,
        &[
            "i think", "i believe", "i realize", "i realized", "i learned",
            "looking back", "i wonder", "i assumed", "my approach", "it occurred to me",
            "i notice", "i keep",
        ],
    ),
    (
        MoveType::Transformation,
        &[
            "instead of", "change the", "changing the", "replace", "convert",
            "reorganize", "flip", "rotate", "shift the", "swap", "turn the",
        ],
    ),
    (
        MoveType::Evaluation,
        &[
            "better", "worse", "works well", "doesn't work", "does not work",
            "too small", "too large", "too dark", "problem with", "i like",
            "i don't like", "succeeds", "fails", "is perfect", "feels wrong",
            "feels right",
        ],
    ),
    (
        MoveType::Synthesis,
        &[
            "i propose", "what if", "combine", "could place", "could add",
            "my idea", "the concept", "i'll add", "i will add", "plan to",
            "imagine a", "a new", "introduce", "create a", "i want to",
        ],
    ),
    (
        MoveType::Analysis,
        &[
            "because", "the site", "constraint", "requires", "depends on",
            "the problem is", "the context", "users need", "the brief",
            "zoning", "the program calls", "consists of", "is organized",
        ],
    ),
];

const FOCUS_CUES: &[(MoveFocus, &[&str])] = &[
    (
        MoveFocus::Material,
        &[
            "material", "concrete", "timber", "wood", "steel", "brick",
            "glass", "stone", "finish", "texture", "rammed earth", "clay",
        ],
    ),
    (
        MoveFocus::Structure,
        &[
            "structure", "structural", "beam", "column", "span", "load",
            "frame", "truss", "cantilever", "foundation", "grid",
        ],
    ),
    (
        MoveFocus::Environment,
        &[
            "site", "daylight", "sunlight", "light", "wind", "landscape",
            "climate", "energy", "orientation", "street", "shade", "garden",
        ],
    ),
    (
        MoveFocus::Culture,
        &[
            "community", "culture", "cultural", "history", "identity",
            "social", "memory", "tradition", "neighborhood", "ritual",
        ],
    ),
    (
        MoveFocus::Form,
        &[
            "shape", "form", "massing", "volume", "geometry", "curve",
            "facade", "proportion", "silhouette", "profile",
        ],
    ),
    (
        MoveFocus::Function,
        &[
            "program", "function", "activity", "room", "circulation",
            "entrance", "lobby", "use", "flow", "layout", "spaces",
        ],
    ),
];

/// Split text into trimmed sentences on terminal punctuation.
fn sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                out.push(trimmed.to_string());
            }
            current.clear();
        }
    }
    let tail = current.trim();
    if !tail.is_empty() {
        out.push(tail.to_string());
    }
    out
}

/// Cue-count classification; `None` when no cue of any type hits.
fn classify_type(lower: &str) -> Option<MoveType> {
    TYPE_CUES
        .iter()
        .map(|(ty, cues)| (*ty, cues.iter().filter(|c| lower.contains(*c)).count()))
        .filter(|(_, hits)| *hits > 0)
        .max_by_key(|(_, hits)| *hits)
        .map(|(ty, _)| ty)
}

fn classify_focus(lower: &str) -> MoveFocus {
    FOCUS_CUES
        .iter()
        .map(|(focus, cues)| (*focus, cues.iter().filter(|c| lower.contains(*c)).count()))
        .max_by_key(|(_, hits)| *hits)
        .filter(|(_, hits)| *hits > 0)
        .map(|(focus, _)| focus)
        // Architecture talk without a clearer signal is about use.
        .unwrap_or(MoveFocus::Function)
}

/// Rough effort estimate from sentence length and clause structure.
fn cognitive_load(sentence: &str) -> f32 {
    let words = sentence.split_whitespace().count() as f32;
    let clauses = sentence.matches([',', ';', ':']).count() as f32
        + sentence.to_lowercase().matches(" because ").count() as f32;
    ((words / 40.0) * 0.7 + (clauses / 4.0) * 0.3).clamp(0.05, 1.0)
}

/// Extract design moves from one side of a turn.
///
/// `source` tags provenance: `User` for self-initiated student text,
/// `AiPrompted` when the student is answering an agent question,
/// `AiProvided` for content the agents contributed.
pub fn extract_moves(text: &str, source: MoveSource, modality: MoveModality) -> Vec<MoveDraft> {
    sentences(text)
        .into_iter()
        .filter_map(|sentence| {
            if sentence.split_whitespace().count() < 4 {
                return None;
            }
            let lower = sentence.to_lowercase();
            let move_type = classify_type(&lower)?;
            let focus = classify_focus(&lower);
            let load = cognitive_load(&sentence);
            Some(MoveDraft {
                content: sentence,
                move_type,
                focus,
                modality,
                source,
                cognitive_load: load,
            })
        })
        .collect()
}

/// Rule-based extraction with the LLM picking up sentences the rules could
/// not place.  The classifier is cached per sentence, so repeats are free.
pub async fn extract_moves_assisted(
    text: &str,
    source: MoveSource,
    modality: MoveModality,
    classifier: &crate::assist::MoveClassifier,
) -> Vec<MoveDraft> {
    let mut drafts = Vec::new();
    for sentence in sentences(text) {
        if sentence.split_whitespace().count() < 4 {
            continue;
        }
        let lower = sentence.to_lowercase();
        let (move_type, focus) = match classify_type(&lower) {
            Some(move_type) => (move_type, classify_focus(&lower)),
            None => match classifier.classify(&sentence).await {
                Some(labels) => labels,
                None => continue,
            },
        };
        let load = cognitive_load(&sentence);
        drafts.push(MoveDraft {
            content: sentence,
            move_type,
            focus,
            modality,
            source,
            cognitive_load: load,
        });
    }
    drafts
}
