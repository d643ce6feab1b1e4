use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::moves::DesignMove;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    /// Adjacency link between consecutive moves; always weight 1.0.
    Temporal,
    /// Semantic link formed when embedding similarity clears the threshold.
    Conceptual,
}

/// A directed link between two moves.
///
/// Invariants (enforced by the linkography engine): `from_move` precedes
/// `to_move` in time, conceptual weights are at least the configured
/// threshold, and self-loops are rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    pub from_move: Uuid,
    pub to_move: Uuid,
    pub kind: LinkKind,
    pub weight: f32,
    /// Move-index delta between the endpoints; always positive.
    pub distance: usize,
}

/// Per-move link bookkeeping maintained incrementally by the engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveStats {
    /// Conceptual links arriving from earlier moves.
    pub backlinks: usize,
    /// Conceptual links departing to later moves.
    pub forelinks: usize,
    /// Largest index distance over this move's links.
    pub horizon: usize,
}

impl MoveStats {
    pub fn degree(&self) -> usize {
        self.backlinks + self.forelinks
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    CriticalMove,
    Chunk,
    Web,
    Orphan,
    Sawtooth,
    Struggle,
    Breakthrough,
}

impl PatternKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternKind::CriticalMove => "critical_move",
            PatternKind::Chunk => "chunk",
            PatternKind::Web => "web",
            PatternKind::Orphan => "orphan",
            PatternKind::Sawtooth => "sawtooth",
            PatternKind::Struggle => "struggle",
            PatternKind::Breakthrough => "breakthrough",
        }
    }
}

/// A detected structural pattern in the link graph.  Emitted by the engine
/// and consumed by the metrics evaluator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternEvent {
    pub kind: PatternKind,
    /// The moves participating in the pattern, in session order.
    pub move_ids: Vec<Uuid>,
    /// Index of the last participating move at detection time.
    pub at_move_index: usize,
}

/// The derived link graph for one session: moves, links, and the patterns
/// detected so far.  Rebuilt incrementally as moves arrive.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Linkograph {
    pub moves: Vec<DesignMove>,
    pub links: Vec<Link>,
    pub patterns: Vec<PatternEvent>,
}

impl Linkograph {
    /// Conceptual link count; temporal links are structural filler.
    pub fn conceptual_link_count(&self) -> usize {
        self.links.iter().filter(|l| l.kind == LinkKind::Conceptual).count()
    }

    /// Conceptual link density: links per possible pair among n moves.
    pub fn link_density(&self) -> f32 {
        let n = self.moves.len();
        if n < 2 {
            return 0.0;
        }
        let possible = (n * (n - 1)) / 2;
        self.conceptual_link_count() as f32 / possible as f32
    }
}
