//! Phase detection: where the session stands in the design process and
//! which socratic step it is on.
//!
//! MENTOR sessions advance on content evidence (keyword scores plus move
//! types); GENERIC and CONTROL sessions advance on interaction counts
//! alone.  The session mode is fixed at creation, so the two rule sets
//! never mix within a session.

use serde::{Deserialize, Serialize};
use tracing::info;

use atelier_types::{DesignMove, DesignPhase, MoveFocus, MoveType, PhaseState, SessionMode};

/// One of the four question stances forming a cycle within each phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SocraticCategory {
    Clarifying,
    Challenging,
    Exploratory,
    Metacognitive,
}

impl SocraticCategory {
    pub const ALL: [SocraticCategory; 4] = [
        SocraticCategory::Clarifying,
        SocraticCategory::Challenging,
        SocraticCategory::Exploratory,
        SocraticCategory::Metacognitive,
    ];
}

/// Thresholds mirroring the `[phase]` config section.
#[derive(Debug, Clone, Copy)]
pub struct PhasePolicy {
    pub spatial_score_threshold: f32,
    pub material_score_threshold: f32,
    pub ideation_min_user_messages: usize,
    pub visualization_min_user_messages: usize,
    pub image_evidence_weight: f32,
    pub substantive_token_minimum: usize,
}

impl Default for PhasePolicy {
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

const SPATIAL_KEYWORDS: &[&str] = &[
    "space", "spatial", "plan", "section", "sketch", "drawing", "form",
    "massing", "volume", "layout", "geometry", "axis", "proportion", "scale",
    "diagram", "elevation",
];

const MATERIAL_KEYWORDS: &[&str] = &[
    "material", "concrete", "steel", "timber", "wood", "brick", "glass",
    "detail", "construction", "structure", "joint", "assembly", "facade",
    "insulation", "cladding", "cost",
];

const REGRESSION_MARKERS: &[&str] = &["go back to", "revisit", "return to", "step back to"];

const CATEGORY_CUES: &[(SocraticCategory, &[&str])] = &[
    (
        SocraticCategory::Clarifying,
        &[
            "what do you mean", "could you clarify", "can you describe",
            "tell me more about", "which of these", "what exactly",
        ],
    ),
    (
        SocraticCategory::Challenging,
        &[
            "have you considered", "what would happen if", "why do you",
            "is that assumption", "what evidence", "does that still hold",
        ],
    ),
    (
        SocraticCategory::Exploratory,
        &[
            "what other", "what alternatives", "what possibilities",
            "how else might", "where else could", "what if you explored",
        ],
    ),
    (
        SocraticCategory::Metacognitive,
        &[
            "how did you decide", "what did you learn", "your process",
            "how are you approaching", "looking back", "what guided your",
        ],
    ),
];

/// What one completed turn contributes to phase evidence.
pub struct TurnEvidence<'a> {
    pub user_text: &'a str,
    pub assistant_text: &'a str,
    /// Moves extracted from this turn's user text.
    pub turn_moves: &'a [DesignMove],
    /// Vision-model description of attached images, when any.
    pub image_description: Option<&'a str>,
    /// Total user messages in the session including this turn.
    pub user_message_count: usize,
}

/// Outcome of observing a turn.
#[derive(Debug, Clone)]
pub struct PhaseUpdate {
    pub state: PhaseState,
    /// True when the user explicitly asked to revisit an earlier phase this
    /// turn; the state store only honors regression when this is set.
    pub explicit_regression: bool,
}

/// Per-category progress toward the next step.
#[derive(Debug, Clone, Copy, Default)]
struct CategoryProgress {
    issued: bool,
    answered: bool,
}

/// Stateful per-session detector.
pub struct PhaseDetector {
    policy: PhasePolicy,
    mode: SessionMode,
    phase: DesignPhase,
    coverage: [CategoryProgress; 4],
    /// Category the assistant raised most recently, awaiting a substantive
    /// user answer.
    pending: Option<SocraticCategory>,
    spatial_score: f32,
    material_score: f32,
    saw_synthesis_move: bool,
    saw_material_evaluation: bool,
}

impl PhaseDetector {
    pub fn new(policy: PhasePolicy, mode: SessionMode) -> Self {
        Self {
            policy,
            mode,
            phase: DesignPhase::Ideation,
            coverage: [CategoryProgress::default(); 4],
            pending: None,
            spatial_score: 0.0,
            material_score: 0.0,
            saw_synthesis_move: false,
            saw_material_evaluation: false,
        }
    }

    pub fn phase(&self) -> DesignPhase {
        self.phase
    }

    /// Fold one completed turn into the detector and return the new state.
    pub fn observe_turn(&mut self, evidence: &TurnEvidence<'_>) -> PhaseUpdate {
        // A pending question is answered by a substantive response: long
        // enough, and carrying an analysis/synthesis/reflection move.
        if let Some(category) = self.pending.take() {
            if self.is_substantive(evidence) {
                self.coverage[category_index(category)].answered = true;
            }
        }

        for (category, cues) in CATEGORY_CUES {
            let lower = evidence.assistant_text.to_lowercase();
            if cues.iter().any(|c| lower.contains(c)) {
                self.coverage[category_index(*category)].issued = true;
                self.pending = Some(*category);
                break;
            }
        }

        self.accumulate_scores(evidence);
        for mv in evidence.turn_moves {
            if mv.move_type == MoveType::Synthesis {
                self.saw_synthesis_move = true;
            }
            if mv.move_type == MoveType::Evaluation && mv.focus == MoveFocus::Material {
                self.saw_material_evaluation = true;
            }
        }

        let regression = detect_regression(evidence.user_text);
        if let Some(target) = regression {
            if target < self.phase {
                info!(from = self.phase.as_str(), to = target.as_str(), "explicit phase regression");
                self.phase = target;
                self.reset_step_progress();
                return PhaseUpdate { state: self.current_state(), explicit_regression: true };
            }
        }

        if self.should_advance_phase(evidence.user_message_count) {
            let next = self.phase.next().expect("advance checked");
            info!(from = self.phase.as_str(), to = next.as_str(), "phase advance");
            self.phase = next;
            self.reset_step_progress();
        }

        PhaseUpdate { state: self.current_state(), explicit_regression: false }
    }

    fn is_substantive(&self, evidence: &TurnEvidence<'_>) -> bool {
        let tokens = evidence.user_text.split_whitespace().count();
        if tokens < self.policy.substantive_token_minimum {
            return false;
        }
        evidence.turn_moves.iter().any(|m| {
            matches!(
                m.move_type,
                MoveType::Analysis | MoveType::Synthesis | MoveType::Reflection
            )
        })
    }

    /// Keyword evidence; image-derived hits count at half the text weight.
    fn accumulate_scores(&mut self, evidence: &TurnEvidence<'_>) {
        let text = evidence.user_text.to_lowercase();
        self.spatial_score += keyword_hits(&text, SPATIAL_KEYWORDS) as f32;
        self.material_score += keyword_hits(&text, MATERIAL_KEYWORDS) as f32;

        if let Some(image) = evidence.image_description {
            let image_lower = image.to_lowercase();
            let w = self.policy.image_evidence_weight;
            self.spatial_score += keyword_hits(&image_lower, SPATIAL_KEYWORDS) as f32 * w;
            self.material_score += keyword_hits(&image_lower, MATERIAL_KEYWORDS) as f32 * w;
        }
    }

    fn should_advance_phase(&self, user_messages: usize) -> bool {
        match (self.phase, self.mode) {
            (DesignPhase::Ideation, SessionMode::Mentor) => {
                user_messages >= self.policy.ideation_min_user_messages
                    && self.spatial_score >= self.policy.spatial_score_threshold
                    && self.saw_synthesis_move
            }
            (DesignPhase::Visualization, SessionMode::Mentor) => {
                user_messages >= self.policy.visualization_min_user_messages
                    && self.material_score >= self.policy.material_score_threshold
                    && self.saw_material_evaluation
            }
            // GENERIC and CONTROL advance on interaction counts alone.
            (DesignPhase::Ideation, _) => user_messages >= self.policy.ideation_min_user_messages,
            (DesignPhase::Visualization, _) => {
                user_messages >= self.policy.visualization_min_user_messages
            }
            (DesignPhase::Materialization, _) => false,
        }
    }

    fn reset_step_progress(&mut self) {
        self.coverage = [CategoryProgress::default(); 4];
        self.pending = None;
    }

    fn current_state(&self) -> PhaseState {
        let satisfied = self
            .coverage
            .iter()
            .filter(|c| c.issued && c.answered)
            .count() as u8;
        let criteria_met: usize = self
            .coverage
            .iter()
            .map(|c| usize::from(c.issued) + usize::from(c.answered))
            .sum();
        PhaseState {
            current: self.phase,
            step: (1 + satisfied).min(4),
            progress: criteria_met as f32 / 8.0,
        }
    }
}

fn category_index(category: SocraticCategory) -> usize {
    SocraticCategory::ALL
        .iter()
        .position(|c| *c == category)
        .expect("category in table")
}

fn keyword_hits(lower: &str, keywords: &[&str]) -> usize {
    keywords.iter().filter(|k| lower.contains(*k)).count()
}

/// The phase the user explicitly asked to revisit, if any.
pub fn detect_regression(user_text: &str) -> Option<DesignPhase> {
    let lower = user_text.to_lowercase();
    if !REGRESSION_MARKERS.iter().any(|m| lower.contains(m)) {
        return None;
    }
    if lower.contains("ideation") || lower.contains("concept") || lower.contains("the idea") {
        Some(DesignPhase::Ideation)
    } else if lower.contains("visualization") || lower.contains("sketch") || lower.contains("drawing") {
        Some(DesignPhase::Visualization)
    } else {
        None
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;
    use atelier_types::{MoveModality, MoveSource};

    fn mv(move_type: MoveType, focus: MoveFocus) -> DesignMove {
        DesignMove {
            id: Uuid::new_v4(),
            session_id: Uuid::nil(),
            turn_id: 0,
            ts: Utc::now(),
            phase: DesignPhase::Ideation,
            move_type,
            focus,
            modality: MoveModality::Text,
            source: MoveSource::User,
            content: String::new(),
            embedding: vec![],
            cognitive_load: 0.3,
        }
    }

    const LONG_ANSWER: &str = "I think the massing should step down toward the park because \
        the neighboring houses are low and the afternoon light comes from the west, so the \
        section wants to open in that direction while the street side stays calm and closed.";

    fn evidence<'a>(
        user: &'a str,
        assistant: &'a str,
        moves: &'a [DesignMove],
        count: usize,
    ) -> TurnEvidence<'a> {
        TurnEvidence {
            user_text: user,
            assistant_text: assistant,
            turn_moves: moves,
            image_description: None,
            user_message_count: count,
        }
    }

    #[test]
    fn starts_in_ideation_step_one() {
        let detector = PhaseDetector::new(PhasePolicy::default(), SessionMode::Mentor);
        assert_eq!(detector.phase(), DesignPhase::Ideation);
    }

    #[test]
    fn step_advances_after_question_and_substantive_answer() {
        let mut detector = PhaseDetector::new(PhasePolicy::default(), SessionMode::Mentor);
        let moves = [mv(MoveType::Analysis, MoveFocus::Form)];

        // Assistant raises a clarifying question.
        let update = detector.observe_turn(&evidence(
            "short reply",
            "Tell me more about how the entry works. What exactly happens at the threshold?",
            &[],
            1,
        ));
        assert_eq!(update.state.step, 1);
        assert!(update.state.progress > 0.0);

        // The student answers substantively next turn.
        let update = detector.observe_turn(&evidence(LONG_ANSWER, "Good. Keep going.", &moves, 2));
        assert_eq!(update.state.step, 2);
    }

    #[test]
    fn short_answers_do_not_satisfy_a_category() {
        let mut detector = PhaseDetector::new(PhasePolicy::default(), SessionMode::Mentor);
        let moves = [mv(MoveType::Analysis, MoveFocus::Form)];

        detector.observe_turn(&evidence("hm", "Tell me more about the entry sequence.", &[], 1));
        let update = detector.observe_turn(&evidence("it works", "And the roof?", &moves, 2));
        assert_eq!(update.state.step, 1);
    }

    #[test]
    fn mentor_needs_content_evidence_to_leave_ideation() {
        let mut detector = PhaseDetector::new(PhasePolicy::default(), SessionMode::Mentor);

        // Plenty of messages, no spatial vocabulary, no synthesis move.
        for i in 0..10 {
            let update = detector.observe_turn(&evidence("we talked again", "Noted.", &[], i + 1));
            assert_eq!(update.state.current, DesignPhase::Ideation);
        }

        // Now spatial evidence plus a synthesis move push it over.
        let moves = [mv(MoveType::Synthesis, MoveFocus::Form)];
        let spatial = "The plan and section sketch the massing as three volumes along an axis, \
             and the layout follows the scale and proportion of the block geometry.";
        let update = detector.observe_turn(&evidence(spatial, "Go on.", &moves, 11));
        assert_eq!(update.state.current, DesignPhase::Visualization);
    }

    #[test]
    fn generic_mode_advances_on_message_count_alone() {
        let mut detector = PhaseDetector::new(PhasePolicy::default(), SessionMode::Generic);
        let mut phase = DesignPhase::Ideation;
        for i in 0..8 {
            phase = detector.observe_turn(&evidence("anything", "answer", &[], i + 1)).state.current;
        }
        assert_eq!(phase, DesignPhase::Visualization);
    }

    #[test]
    fn materialization_needs_material_evaluation_in_mentor() {
        let mut detector = PhaseDetector::new(PhasePolicy::default(), SessionMode::Mentor);
        // Jump to visualization by satisfying ideation criteria.
        let synth = [mv(MoveType::Synthesis, MoveFocus::Form)];
        let spatial = "Plan, section, massing, layout, geometry, axis, scale, and proportion \
             drawings with spatial volume studies and a diagram of the form.";
        for i in 0..8 {
            detector.observe_turn(&evidence(spatial, "Go on.", &synth, i + 1));
        }
        assert_eq!(detector.phase(), DesignPhase::Visualization);

        // Material vocabulary alone is not enough without the evaluation move.
        let material_talk = "Concrete, steel, timber, brick, and glass details with construction \
             joints, assembly, facade cladding, and structure cost studies.";
        for i in 8..20 {
            detector.observe_turn(&evidence(material_talk, "Noted.", &[], i + 1));
        }
        assert_eq!(detector.phase(), DesignPhase::Visualization);

        let eval = [mv(MoveType::Evaluation, MoveFocus::Material)];
        detector.observe_turn(&evidence(material_talk, "Noted.", &eval, 21));
        assert_eq!(detector.phase(), DesignPhase::Materialization);
    }

    #[test]
    fn image_evidence_counts_at_half_weight() {
        let policy = PhasePolicy::default();
        let mut with_image = PhaseDetector::new(policy, SessionMode::Mentor);
        let mut without_image = PhaseDetector::new(policy, SessionMode::Mentor);

        let text_evidence = evidence("here is my latest attempt", "ok", &[], 1);
        without_image.observe_turn(&text_evidence);

        let image_evidence = TurnEvidence {
            user_text: "here is my latest attempt",
            assistant_text: "ok",
            turn_moves: &[],
            image_description: Some("a plan drawing showing massing volume and layout geometry"),
            user_message_count: 1,
        };
        with_image.observe_turn(&image_evidence);

        assert_eq!(without_image.spatial_score, 0.0);
        // Six spatial keywords in the image description, at half weight.
        assert!((with_image.spatial_score - 3.0).abs() < 1e-6);
    }

    #[test]
    fn regression_only_on_explicit_request() {
        let mut detector = PhaseDetector::new(PhasePolicy::default(), SessionMode::Generic);
        for i in 0..8 {
            detector.observe_turn(&evidence("anything", "answer", &[], i + 1));
        }
        assert_eq!(detector.phase(), DesignPhase::Visualization);

        let update = detector.observe_turn(&evidence(
            "I want to go back to the concept for a moment",
            "Sure.",
            &[],
            9,
        ));
        assert!(update.explicit_regression);
        assert_eq!(update.state.current, DesignPhase::Ideation);
    }

    #[test]
    fn no_regression_without_marker() {
        assert_eq!(detect_regression("the concept is strong"), None);
        assert_eq!(
            detect_regression("let's go back to the concept"),
            Some(DesignPhase::Ideation)
        );
        assert_eq!(detect_regression("revisit the sketch stage"), Some(DesignPhase::Visualization));
    }
}
