use std::collections::HashSet;

use tracing::debug;
use uuid::Uuid;

use atelier_knowledge::cosine_similarity;
use atelier_types::{DesignMove, Link, LinkKind, Linkograph, MoveStats, PatternEvent, PatternKind};

use crate::patterns::detect_patterns;

/// Linking parameters.  Mirrors the `[linkography]` config section; the
/// runtime converts so this crate stays config-free.
#[derive(Debug, Clone, Copy)]
pub struct LinkPolicy {
    /// Cosine similarity a conceptual link must clear.
    pub similarity_threshold: f32,
    /// How many preceding moves each new move is compared against.
    pub window_size: usize,
    /// Pattern scan cadence, in moves.
    pub recompute_interval: usize,
    /// Subsequent moves before a linkless move counts as an orphan.
    pub orphan_grace: usize,
    /// Maximum external-link share for a chunk.
    pub chunk_modularity: f32,
    /// Minimum local conceptual density for a web.
    pub web_density: f32,
}

impl Default for LinkPolicy {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.5,
            window_size: 30,
            recompute_interval: 5,
            orphan_grace: 5,
            chunk_modularity: 0.35,
            web_density: 0.6,
        }
    }
}

/// Incremental linkograph builder for one session.
///
/// Moves are immutable once added; links only ever point forward in time,
/// so `from.ts <= to.ts` holds by construction and self-loops cannot form.
pub struct LinkographyEngine {
    policy: LinkPolicy,
    graph: Linkograph,
    stats: Vec<MoveStats>,
    moves_since_scan: usize,
    emitted: HashSet<(PatternKind, Uuid, Uuid)>,
}

impl LinkographyEngine {
    pub fn new(policy: LinkPolicy) -> Self {
        Self {
            policy,
            graph: Linkograph::default(),
            stats: Vec::new(),
            moves_since_scan: 0,
            emitted: HashSet::new(),
        }
    }

    /// Rebuild a graph from an ordered move list (embeddings included), as
    /// used when re-importing an exported session.  Links come out identical
    /// to the live graph within floating-point tolerance.
    pub fn from_moves(moves: Vec<DesignMove>, policy: LinkPolicy) -> Self {
        let mut engine = Self::new(policy);
        for mv in moves {
            engine.add_move(mv);
        }
        engine.scan_now();
        engine
    }

    pub fn graph(&self) -> &Linkograph {
        &self.graph
    }

    pub fn stats(&self) -> &[MoveStats] {
        &self.stats
    }

    pub fn policy(&self) -> LinkPolicy {
        self.policy
    }

    /// Append a move, form its links, and return any newly detected
    /// patterns (the scan runs every `recompute_interval` moves).
    pub fn add_move(&mut self, mv: DesignMove) -> Vec<PatternEvent> {
        let idx = self.graph.moves.len();
        self.stats.push(MoveStats::default());

        if idx > 0 {
            let prev = &self.graph.moves[idx - 1];
            self.graph.links.push(Link {
                from_move: prev.id,
                to_move: mv.id,
                kind: LinkKind::Temporal,
                weight: 1.0,
                distance: 1,
            });
        }

        let window_start = idx.saturating_sub(self.policy.window_size);
        for i in window_start..idx {
            let earlier = &self.graph.moves[i];
            if earlier.id == mv.id {
                continue;
            }
            let similarity = cosine_similarity(&earlier.embedding, &mv.embedding);
            if similarity >= self.policy.similarity_threshold {
                let distance = idx - i;
                self.graph.links.push(Link {
                    from_move: earlier.id,
                    to_move: mv.id,
                    kind: LinkKind::Conceptual,
                    weight: similarity.min(1.0),
                    distance,
                });
                self.stats[i].forelinks += 1;
                self.stats[idx].backlinks += 1;
                self.stats[i].horizon = self.stats[i].horizon.max(distance);
                self.stats[idx].horizon = self.stats[idx].horizon.max(distance);
            }
        }

        self.graph.moves.push(mv);
        self.moves_since_scan += 1;

        if self.moves_since_scan >= self.policy.recompute_interval {
            self.scan_now()
        } else {
            Vec::new()
        }
    }

    /// Run pattern detection immediately and return the new events.
    pub fn scan_now(&mut self) -> Vec<PatternEvent> {
        self.moves_since_scan = 0;
        let candidates = detect_patterns(&self.graph, &self.stats, &self.policy);

        let mut fresh = Vec::new();
        for event in candidates {
            let key = event_key(&event);
            if self.emitted.insert(key) {
                fresh.push(event);
            }
        }
        if !fresh.is_empty() {
            debug!(count = fresh.len(), "new linkograph patterns");
            self.graph.patterns.extend(fresh.iter().cloned());
        }
        fresh
    }
}

fn event_key(event: &PatternEvent) -> (PatternKind, Uuid, Uuid) {
    let first = event.move_ids.first().copied().unwrap_or_default();
    let last = event.move_ids.last().copied().unwrap_or_default();
    (event.kind, first, last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use atelier_types::{DesignPhase, MoveFocus, MoveModality, MoveSource, MoveType};

    fn mv(embedding: Vec<f32>) -> DesignMove {
        DesignMove {
            id: Uuid::new_v4(),
            session_id: Uuid::nil(),
            turn_id: 0,
            ts: Utc::now(),
            phase: DesignPhase::Ideation,
            move_type: MoveType::Synthesis,
            focus: MoveFocus::Form,
            modality: MoveModality::Text,
            source: MoveSource::User,
            content: "move".to_string(),
            embedding,
            cognitive_load: 0.3,
        }
    }

    #[test]
    fn consecutive_moves_get_temporal_links() {
        let mut engine = LinkographyEngine::new(LinkPolicy::default());
        engine.add_move(mv(vec![1.0, 0.0]));
        engine.add_move(mv(vec![0.0, 1.0]));

        let graph = engine.graph();
        assert_eq!(graph.links.len(), 1);
        assert_eq!(graph.links[0].kind, LinkKind::Temporal);
        assert_eq!(graph.links[0].weight, 1.0);
        assert_eq!(graph.links[0].distance, 1);
    }

    #[test]
    fn similar_moves_get_conceptual_links() {
        let mut engine = LinkographyEngine::new(LinkPolicy::default());
        engine.add_move(mv(vec![1.0, 0.0]));
        engine.add_move(mv(vec![1.0, 0.1]));

        let graph = engine.graph();
        let conceptual: Vec<_> = graph.links.iter().filter(|l| l.kind == LinkKind::Conceptual).collect();
        assert_eq!(conceptual.len(), 1);
        assert!(conceptual[0].weight >= 0.5);
        assert_eq!(engine.stats()[0].forelinks, 1);
        assert_eq!(engine.stats()[1].backlinks, 1);
    }

    #[test]
    fn dissimilar_moves_stay_unlinked() {
        let mut engine = LinkographyEngine::new(LinkPolicy::default());
        engine.add_move(mv(vec![1.0, 0.0]));
        engine.add_move(mv(vec![0.0, 1.0]));
        assert_eq!(engine.graph().conceptual_link_count(), 0);
    }

    #[test]
    fn linking_respects_the_window() {
        let policy = LinkPolicy { window_size: 2, ..Default::default() };
        let mut engine = LinkographyEngine::new(policy);
        // Four identical moves; the fourth can only see moves 2 and 3.
        for _ in 0..4 {
            engine.add_move(mv(vec![1.0, 0.0]));
        }
        let last_backlinks = engine.stats()[3].backlinks;
        assert_eq!(last_backlinks, 2);
    }

    #[test]
    fn conceptual_links_satisfy_invariants() {
        let mut engine = LinkographyEngine::new(LinkPolicy::default());
        for i in 0..6 {
            engine.add_move(mv(vec![1.0, 0.05 * i as f32]));
        }
        for link in &engine.graph().links {
            assert_ne!(link.from_move, link.to_move);
            assert!(link.distance >= 1);
            if link.kind == LinkKind::Conceptual {
                assert!(link.weight >= 0.5 && link.weight <= 1.0);
            }
        }
    }

    #[test]
    fn rebuild_reproduces_links() {
        let mut engine = LinkographyEngine::new(LinkPolicy::default());
        for i in 0..8 {
            let angle = i as f32 * 0.2;
            engine.add_move(mv(vec![angle.cos(), angle.sin()]));
        }

        let rebuilt = LinkographyEngine::from_moves(engine.graph().moves.clone(), LinkPolicy::default());
        assert_eq!(rebuilt.graph().links.len(), engine.graph().links.len());
        for (a, b) in engine.graph().links.iter().zip(&rebuilt.graph().links) {
            assert_eq!(a.from_move, b.from_move);
            assert_eq!(a.to_move, b.to_move);
            assert_eq!(a.kind, b.kind);
            assert!((a.weight - b.weight).abs() < 1e-6);
        }
    }

    #[test]
    fn scan_cadence_follows_recompute_interval() {
        let policy = LinkPolicy { recompute_interval: 5, ..Default::default() };
        let mut engine = LinkographyEngine::new(policy);
        // Four adds: no scan yet, so no patterns can have been emitted.
        for _ in 0..4 {
            let events = engine.add_move(mv(vec![1.0, 0.0]));
            assert!(events.is_empty());
        }
        // Fifth add triggers the scan and resets the cadence counter.
        engine.add_move(mv(vec![1.0, 0.0]));
        assert_eq!(engine.moves_since_scan, 0);
    }

    #[test]
    fn patterns_are_not_re_emitted() {
        let mut engine = LinkographyEngine::new(LinkPolicy::default());
        for _ in 0..10 {
            engine.add_move(mv(vec![1.0, 0.0]));
        }
        let first_total = engine.graph().patterns.len();
        let again = engine.scan_now();
        assert!(again.is_empty());
        assert_eq!(engine.graph().patterns.len(), first_total);
    }
}
