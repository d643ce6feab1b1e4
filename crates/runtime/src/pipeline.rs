//! The per-turn pipeline and session lifecycle.
//!
//! One session is processed strictly in turn order behind its own async
//! lock; different sessions run in parallel.  Within a turn the order is
//! fixed: append user → classify → route → agents (in decision order) →
//! synthesize → append assistant → extract moves → link → phase → metrics.
//! Move extraction runs after the reply is final, so it can never influence
//! the current turn.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::join_all;
use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use atelier_agents::{
    run_agent, self_direction_text, synthesize, AgentDeps, AgentInput, RetrievalPolicy,
    SynthesisPolicy,
};
use atelier_classify::{Classifier, ClassifierInput};
use atelier_config::AppConfig;
use atelier_export::{write_session_export, ExportManifest, InteractionRow, SessionExport};
use atelier_knowledge::{jaccard, Embedder, RerankWeights, Retriever};
use atelier_llm::{CallerRole, ChatMessage, CompletionRequest, Gateway};
use atelier_linkography::{
    extract_moves, extract_moves_assisted, LinkPolicy, LinkographyEngine, MoveClassifier,
};
use atelier_metrics::{MetricsEvaluator, TurnObservation};
use atelier_phase::{PhaseDetector, PhasePolicy, TurnEvidence};
use atelier_state::{SessionState, StateError, TranscriptWriter, TurnAppend};
use atelier_types::{
    AgentResult, DesignMove, DesignPhase, Message, MetricSnapshot, MoveModality, MoveSource,
    PhaseState, Role, RouteDecision, RouteType, Session, SessionMode, SkillLevel,
};

use crate::error::RuntimeError;
use crate::router;

/// An uploaded image, already encoded as a data URL by the outer surface.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub name: String,
    pub data_url: String,
}

/// What `submit_turn` hands back to the caller.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub assistant_text: String,
    pub route: RouteType,
    pub phase: PhaseState,
    pub metrics: MetricSnapshot,
    pub state_repaired: bool,
    /// Set when this turn closed the session (timeout).
    pub session_closed: bool,
}

/// Everything one live session owns.  Exclusively held by its worker; any
/// cross-worker read goes through a snapshot copy.
struct SessionEntry {
    state: SessionState,
    detector: PhaseDetector,
    engine: LinkographyEngine,
    metrics: MetricsEvaluator,
    transcript: TranscriptWriter,
    interactions: Vec<InteractionRow>,
    last_turn_at: Option<DateTime<Utc>>,
}

/// The orchestration runtime: owns the session registry and the injected
/// process-wide services (gateway, knowledge store, embedder).
pub struct Runtime {
    config: AppConfig,
    gateway: Gateway,
    retriever: Arc<dyn Retriever>,
    embedder: Arc<dyn Embedder>,
    classifier: Classifier,
    move_classifier: MoveClassifier,
    sessions: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<SessionEntry>>>>,
}

impl Runtime {
    pub fn new(
        config: AppConfig,
        gateway: Gateway,
        retriever: Arc<dyn Retriever>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        let timeout = Duration::from_secs(config.llm.llm_timeout_seconds);
        let classifier = Classifier::new(gateway.clone(), config.llm.model.clone(), timeout);
        let move_classifier = MoveClassifier::new(gateway.clone(), config.llm.model.clone(), timeout);
        Self {
            config,
            gateway,
            retriever,
            embedder,
            classifier,
            move_classifier,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Start a session under the given condition.  The mode string must be
    /// one of MENTOR, GENERIC, CONTROL.
    pub fn start_session(
        &self,
        mode: &str,
        participant_id: &str,
        skill_level: &str,
        brief: &str,
    ) -> Result<Uuid, RuntimeError> {
        let mode = SessionMode::parse(mode)
            .ok_or_else(|| RuntimeError::InvalidMode(mode.to_string()))?;
        let skill = SkillLevel::parse(skill_level).unwrap_or_else(|| {
            warn!(skill_level, "unknown skill level, defaulting to intermediate");
            SkillLevel::Intermediate
        });

        let session = Session::new(mode, participant_id, skill, brief);
        let id = session.id;
        let entry = SessionEntry {
            detector: PhaseDetector::new(self.phase_policy(), mode),
            engine: LinkographyEngine::new(self.link_policy()),
            metrics: MetricsEvaluator::new(mode, self.config.scaffolding_ideal()),
            transcript: TranscriptWriter::new(&self.config.session.export_dir, id),
            interactions: Vec::new(),
            last_turn_at: None,
            state: SessionState::new(session),
        };
        self.sessions
            .lock()
            .expect("session registry poisoned")
            .insert(id, Arc::new(tokio::sync::Mutex::new(entry)));
        info!(session = %id, mode = mode.as_str(), "session started");
        Ok(id)
    }

    /// Process one turn.  Always returns assistant text on success; internal
    /// failures degrade to deterministic fallbacks rather than erroring.
    #[instrument(skip(self, user_text, attachments), fields(session = %session_id))]
    pub async fn submit_turn(
        &self,
        session_id: Uuid,
        user_text: &str,
        attachments: &[Attachment],
    ) -> Result<TurnOutcome, RuntimeError> {
        let entry_arc = self.lookup(session_id)?;
        let mut guard = entry_arc.lock().await;
        let entry = &mut *guard;
        if entry.state.is_ended() {
            return Err(RuntimeError::SessionNotFound(session_id));
        }

        let timeout = ChronoDuration::minutes(self.config.session.session_timeout_minutes as i64);
        if Utc::now() - entry.state.session.created_at > timeout {
            return self.close_out(entry, user_text);
        }

        let mode = entry.state.mode();
        let turn_id = entry
            .state
            .begin_turn(user_text)
            .map_err(|e| self.map_state_error(session_id, e))?;
        let snapshot = entry.state.snapshot_copy();

        // Classify against the window of messages before this turn.
        let prior = &snapshot.messages[..snapshot.messages.len().saturating_sub(1)];
        let window_start = prior.len().saturating_sub(self.config.session.message_window);
        let context = self
            .classifier
            .classify(ClassifierInput {
                user_text,
                recent_messages: &prior[window_start..],
                phase: snapshot.phase.current,
                profile: &snapshot.student_profile,
                turn_counter: snapshot.turn_counter,
            })
            .await;

        let decision = router::decide(&context, &snapshot, mode);

        let image_description = if attachments.is_empty() {
            None
        } else {
            self.describe_images(attachments).await
        };

        // Agents run in decision order; each degrades internally.
        let deps = self.agent_deps();
        let mut results: Vec<AgentResult> = Vec::with_capacity(decision.agents.len());
        for agent_id in &decision.agents {
            let input = AgentInput {
                snapshot: &snapshot,
                context: &context,
                mode,
                brief: &entry.state.session.brief,
                user_text,
            };
            results.push(run_agent(*agent_id, &input, &deps).await);
        }

        let assistant_text = if decision.route == RouteType::SelfDirection {
            self_direction_text(snapshot.phase.current)
        } else {
            synthesize(decision.route, &results, &self.synthesis_policy())
        };
        // A turn that cannot be completed still answers: short apology plus
        // one clarification question.
        let assistant_text = if assistant_text.trim().is_empty() {
            "Sorry — I lost the thread on that one. Which part of the design should we look at together?".to_string()
        } else {
            assistant_text
        };

        // Apply assessment deltas before sealing the turn.
        let mut skill_adapted = false;
        for result in &results {
            let delta = &result.metrics_delta;
            if delta.skill_update.is_some() || delta.engagement_signal.is_some() {
                skill_adapted |= delta.skill_update.is_some();
                entry
                    .state
                    .apply_profile(delta.skill_update, delta.engagement_signal);
            }
        }

        entry
            .state
            .complete_turn(
                user_text,
                TurnAppend {
                    assistant_text: assistant_text.clone(),
                    route: decision.route,
                },
            )
            .map_err(|e| self.map_state_error(session_id, e))?;
        let state_repaired = entry.state.state_repaired;

        if let Err(err) = entry.transcript.append("user", user_text, turn_id) {
            warn!(error = %err, "transcript append failed");
        }
        if let Err(err) = entry.transcript.append("assistant", &assistant_text, turn_id) {
            warn!(error = %err, "transcript append failed");
        }

        // Move extraction and linking, strictly after the reply is final.
        let phase_now = entry.state.state().phase.current;
        let turn_moves = self
            .extract_turn_moves(
                session_id,
                turn_id,
                phase_now,
                user_text,
                &assistant_text,
                image_description.as_deref(),
                prior,
            )
            .await;
        for mv in &turn_moves {
            let events = entry.engine.add_move(mv.clone());
            for event in &events {
                info!(pattern = event.kind.as_str(), at = event.at_move_index, "linkograph pattern");
            }
            entry.metrics.observe_patterns(&events);
        }

        // Phase, then metrics, then the export row.
        let user_message_count = entry.state.state().user_messages().count();
        let update = entry.detector.observe_turn(&TurnEvidence {
            user_text,
            assistant_text: &assistant_text,
            turn_moves: &turn_moves,
            image_description: image_description.as_deref(),
            user_message_count,
        });
        entry.state.apply_phase(update.state.clone(), update.explicit_regression);

        let seconds_since_last_turn = entry.last_turn_at.map(|t| (Utc::now() - t).num_seconds());
        let skill_level = entry.state.state().student_profile.skill_level;
        let metrics = entry.metrics.observe_turn(&TurnObservation {
            user_text,
            assistant_text: &assistant_text,
            route: decision.route,
            offloading_risk: context.offloading_risk,
            skill_level,
            turn_moves: &turn_moves,
            graph: entry.engine.graph(),
            seconds_since_last_turn,
        });
        entry.last_turn_at = Some(Utc::now());

        let phase = entry.state.state().phase.clone();
        entry.interactions.push(self.interaction_row(
            session_id,
            turn_id,
            user_text,
            &assistant_text,
            &decision,
            &phase,
            context.classification_confidence,
            skill_adapted,
        ));

        Ok(TurnOutcome {
            assistant_text,
            route: decision.route,
            phase,
            metrics,
            state_repaired,
            session_closed: false,
        })
    }

    /// End a session: final pattern sweep, aggregate, export, removal.
    pub async fn end_session(&self, session_id: Uuid) -> Result<ExportManifest, RuntimeError> {
        let entry_arc = self
            .sessions
            .lock()
            .expect("session registry poisoned")
            .remove(&session_id)
            .ok_or(RuntimeError::SessionNotFound(session_id))?;
        let mut guard = entry_arc.lock().await;
        let entry = &mut *guard;
        entry.state.end();
        entry.engine.scan_now();

        let aggregate = entry.metrics.session_aggregate();
        let usage = serde_json::to_value(self.gateway.usage_report()).unwrap_or(json!({}));
        let configuration = json!({
            "mode": entry.state.mode().as_str(),
            "link_similarity_threshold": self.config.linkography.link_similarity_threshold,
            "link_window_size": self.config.linkography.link_window_size,
            "pattern_recompute_interval": self.config.linkography.pattern_recompute_interval,
            "llm_timeout_seconds": self.config.llm.llm_timeout_seconds,
            "session_timeout_minutes": self.config.session.session_timeout_minutes,
        });
        let export = SessionExport {
            session: &entry.state.session,
            interactions: &entry.interactions,
            moves: &entry.engine.graph().moves,
            linkograph: entry.engine.graph(),
            snapshots: entry.metrics.snapshots(),
            aggregate: &aggregate,
            token_usage: usage,
            configuration,
        };
        let manifest = write_session_export(&self.config.session.export_dir, &export)
            .map_err(|e| RuntimeError::TurnFailed(format!("export failed: {e}")))?;
        info!(session = %session_id, turns = aggregate.turns, "session ended and exported");
        Ok(manifest)
    }

    /// Read-only copy of a session's conversation state.  Cross-worker
    /// reads never touch the live state.
    pub async fn session_snapshot(
        &self,
        session_id: Uuid,
    ) -> Result<atelier_types::ConversationState, RuntimeError> {
        let entry_arc = self.lookup(session_id)?;
        let guard = entry_arc.lock().await;
        Ok(guard.state.snapshot_copy())
    }

    /// Per-role token accounting from the shared gateway.
    pub fn usage_report(&self) -> atelier_llm::UsageReport {
        self.gateway.usage_report()
    }

    // ── internals ─────────────────────────────────────────────────────────

    fn lookup(&self, session_id: Uuid) -> Result<Arc<tokio::sync::Mutex<SessionEntry>>, RuntimeError> {
        self.sessions
            .lock()
            .expect("session registry poisoned")
            .get(&session_id)
            .cloned()
            .ok_or(RuntimeError::SessionNotFound(session_id))
    }

    fn map_state_error(&self, session_id: Uuid, err: StateError) -> RuntimeError {
        match err {
            StateError::SessionEnded => RuntimeError::SessionNotFound(session_id),
            StateError::Inconsistent(msg) => RuntimeError::TurnFailed(msg),
        }
    }

    /// Graceful timeout close: a synthesized farewell, a route entry to keep
    /// the invariants, one last snapshot.
    fn close_out(
        &self,
        entry: &mut SessionEntry,
        user_text: &str,
    ) -> Result<TurnOutcome, RuntimeError> {
        let session_id = entry.state.session.id;
        let phase = entry.state.state().phase.clone();
        let closing = format!(
            "We are out of time for this session. You carried the design into the {} phase — \
             hold on to the questions still open, they are where the next session starts.",
            phase.current.as_str()
        );
        let turn_id = entry
            .state
            .begin_turn(user_text)
            .map_err(|e| self.map_state_error(session_id, e))?;
        entry
            .state
            .complete_turn(
                user_text,
                TurnAppend { assistant_text: closing.clone(), route: RouteType::SelfDirection },
            )
            .map_err(|e| self.map_state_error(session_id, e))?;
        let _ = entry.transcript.append("user", user_text, turn_id);
        let _ = entry.transcript.append("assistant", &closing, turn_id);

        let skill_level = entry.state.state().student_profile.skill_level;
        let metrics = entry.metrics.observe_turn(&TurnObservation {
            user_text,
            assistant_text: &closing,
            route: RouteType::SelfDirection,
            offloading_risk: 0.0,
            skill_level,
            turn_moves: &[],
            graph: entry.engine.graph(),
            seconds_since_last_turn: None,
        });
        entry.state.end();
        info!(session = %session_id, "session timed out, closed gracefully");
        Ok(TurnOutcome {
            assistant_text: closing,
            route: RouteType::SelfDirection,
            phase,
            metrics,
            state_repaired: false,
            session_closed: true,
        })
    }

    /// Extract and embed this turn's moves from the user text, any image
    /// description, and the assistant reply.
    #[allow(clippy::too_many_arguments)]
    async fn extract_turn_moves(
        &self,
        session_id: Uuid,
        turn_id: u32,
        phase: DesignPhase,
        user_text: &str,
        assistant_text: &str,
        image_description: Option<&str>,
        prior: &[Message],
    ) -> Vec<DesignMove> {
        // Student text counts as prompted when it answers an agent question.
        let user_source = if prior
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .is_some_and(|m| m.text.contains('?'))
        {
            MoveSource::AiPrompted
        } else {
            MoveSource::User
        };

        // The user's own words get the LLM-assisted path; image descriptions
        // and the assistant reply stay on the cheap rule path.
        let mut drafts =
            extract_moves_assisted(user_text, user_source, MoveModality::Text, &self.move_classifier)
                .await;
        if let Some(description) = image_description {
            drafts.extend(extract_moves(description, MoveSource::User, MoveModality::Image));
        }
        drafts.extend(extract_moves(assistant_text, MoveSource::AiProvided, MoveModality::Text));
        if drafts.is_empty() {
            return Vec::new();
        }

        let texts: Vec<String> = drafts.iter().map(|d| d.content.clone()).collect();
        let embeddings = match self.embedder.embed(&texts).await {
            Ok(embeddings) => embeddings,
            Err(err) => {
                // Moves survive without embeddings; they just cannot link.
                warn!(error = %err, "embedding failed, moves will be unlinked");
                vec![Vec::new(); drafts.len()]
            }
        };

        drafts
            .into_iter()
            .zip(embeddings)
            .map(|(draft, embedding)| DesignMove {
                id: Uuid::new_v4(),
                session_id,
                turn_id,
                ts: Utc::now(),
                phase,
                move_type: draft.move_type,
                focus: draft.focus,
                modality: draft.modality,
                source: draft.source,
                content: draft.content,
                embedding,
                cognitive_load: draft.cognitive_load,
            })
            .collect()
    }

    /// Describe attachments through the vision model; failures degrade to no
    /// image evidence.  Independent calls run concurrently.
    async fn describe_images(&self, attachments: &[Attachment]) -> Option<String> {
        let calls = attachments.iter().map(|attachment| {
            let mut request = CompletionRequest::new(
                &self.config.llm.vision_model,
                "Describe this architectural drawing or model photo factually: spaces, massing, \
                 structure, and materials visible. Three sentences at most.",
            )
            .timeout(Duration::from_secs(self.config.llm.llm_timeout_seconds));
            request.messages.push(ChatMessage::user_with_image(
                format!("Uploaded file: {}", attachment.name),
                attachment.data_url.clone(),
            ));
            self.gateway.complete(CallerRole::Analysis, request)
        });

        let descriptions: Vec<String> = join_all(calls)
            .await
            .into_iter()
            .filter_map(|result| match result {
                Ok(completion) => Some(completion.text),
                Err(err) => {
                    warn!(error = %err, "image analysis failed");
                    None
                }
            })
            .collect();
        if descriptions.is_empty() {
            None
        } else {
            Some(descriptions.join("\n"))
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn interaction_row(
        &self,
        session_id: Uuid,
        turn_index: u32,
        user_text: &str,
        assistant_text: &str,
        decision: &RouteDecision,
        phase: &PhaseState,
        classification_confidence: f32,
        skill_adapted: bool,
    ) -> InteractionRow {
        let scaffolding = matches!(
            decision.route,
            RouteType::SupportiveScaffolding
                | RouteType::FoundationalBuilding
                | RouteType::BalancedGuidance
                | RouteType::SocraticClarification
                | RouteType::ProgressiveOpening
        );
        let asks = assistant_text.contains('?');
        InteractionRow {
            session_id,
            timestamp: Utc::now(),
            turn_index,
            user_text: user_text.to_string(),
            assistant_text: assistant_text.to_string(),
            route: decision.route.as_str().to_string(),
            primary_agent: decision
                .agents
                .first()
                .map(|a| a.as_str().to_string())
                .unwrap_or_else(|| "none".to_string()),
            agents_used: decision
                .agents
                .iter()
                .map(|a| a.as_str())
                .collect::<Vec<_>>()
                .join("|"),
            phase: phase.current.as_str().to_string(),
            step: phase.step,
            prevents_cognitive_offloading: !decision.route.permits_direct_answer(),
            encourages_deep_thinking: asks,
            provides_scaffolding: scaffolding,
            maintains_engagement: asks || decision.route == RouteType::SelfDirection,
            adapts_to_skill_level: scaffolding || skill_adapted,
            response_coherence: (0.5 + jaccard(user_text, assistant_text)).clamp(0.0, 1.0),
            classification_confidence,
        }
    }

    fn agent_deps(&self) -> AgentDeps {
        AgentDeps {
            gateway: self.gateway.clone(),
            retriever: self.retriever.clone(),
            model: self.config.llm.model.clone(),
            timeout: Duration::from_secs(self.config.llm.llm_timeout_seconds),
            retrieval: RetrievalPolicy {
                min_passages: self.config.retrieval.min_passages,
                similarity_threshold: self.config.retrieval.similarity_threshold,
                weights: RerankWeights {
                    similarity: self.config.retrieval.weight_similarity,
                    recency: self.config.retrieval.weight_recency,
                    authority: self.config.retrieval.weight_authority,
                    phase_match: self.config.retrieval.weight_phase_match,
                },
            },
        }
    }

    fn synthesis_policy(&self) -> SynthesisPolicy {
        SynthesisPolicy {
            max_words: self.config.synthesis.max_words,
            dedup_jaccard: self.config.synthesis.dedup_jaccard,
        }
    }

    fn link_policy(&self) -> LinkPolicy {
        LinkPolicy {
            similarity_threshold: self.config.linkography.link_similarity_threshold,
            window_size: self.config.linkography.link_window_size,
            recompute_interval: self.config.linkography.pattern_recompute_interval,
            orphan_grace: self.config.linkography.orphan_grace_moves,
            chunk_modularity: self.config.linkography.chunk_modularity_threshold,
            web_density: self.config.linkography.web_density_threshold,
        }
    }

    fn phase_policy(&self) -> PhasePolicy {
        PhasePolicy {
            spatial_score_threshold: self.config.phase.spatial_score_threshold,
            material_score_threshold: self.config.phase.material_score_threshold,
            ideation_min_user_messages: self.config.phase.ideation_min_user_messages,
            visualization_min_user_messages: self.config.phase.visualization_min_user_messages,
            image_evidence_weight: self.config.phase.image_evidence_weight,
            substantive_token_minimum: self.config.phase.substantive_token_minimum,
        }
    }
}
