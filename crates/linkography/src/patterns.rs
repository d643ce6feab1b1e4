//! Structural pattern detection over the link graph.
//!
//! Detection is stateless over the current graph; the engine deduplicates
//! emissions across scans.  Previously emitted chunks (carried in
//! `graph.patterns`) feed the breakthrough detector, which asks whether a
//! critical move reaches back into several earlier chunks.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use atelier_types::{LinkKind, Linkograph, MoveStats, PatternEvent, PatternKind};

use crate::engine::LinkPolicy;

/// Minimum conceptual degree before a move can be critical, independent of
/// the percentile, so tiny sessions don't mark everything.
const CRITICAL_MIN_DEGREE: usize = 3;
/// Chunk candidates are grown up to this many moves.
const CHUNK_MAX_SPAN: usize = 8;
/// Web windows scanned at these sizes.
const WEB_SIZES: [usize; 2] = [5, 4];
const SAWTOOTH_MIN_RUN: usize = 5;
const STRUGGLE_MIN_RUN: usize = 3;
/// A struggle and a breakthrough cannot be reported within this many moves
/// of each other; the breakthrough evidence dominates.
const EXCLUSION_WINDOW: usize = 5;

struct GraphView {
    /// Conceptual links as (from_idx, to_idx, distance).
    conceptual: Vec<(usize, usize, usize)>,
    /// Conceptual partner indices per move.
    partners: Vec<Vec<usize>>,
}

fn view(graph: &Linkograph) -> GraphView {
    let id_to_idx: HashMap<Uuid, usize> = graph
        .moves
        .iter()
        .enumerate()
        .map(|(i, m)| (m.id, i))
        .collect();
    let mut conceptual = Vec::new();
    let mut partners = vec![Vec::new(); graph.moves.len()];
    for link in &graph.links {
        if link.kind != LinkKind::Conceptual {
            continue;
        }
        let (Some(&from), Some(&to)) = (id_to_idx.get(&link.from_move), id_to_idx.get(&link.to_move))
        else {
            continue;
        };
        conceptual.push((from, to, link.distance));
        partners[from].push(to);
        partners[to].push(from);
    }
    GraphView { conceptual, partners }
}

/// Detect all patterns present in the current graph.
pub fn detect_patterns(graph: &Linkograph, stats: &[MoveStats], policy: &LinkPolicy) -> Vec<PatternEvent> {
    let n = graph.moves.len();
    if n == 0 {
        return Vec::new();
    }
    let graph_view = view(graph);
    let mut events = Vec::new();

    let critical = critical_moves(stats);
    for &idx in &critical {
        events.push(PatternEvent {
            kind: PatternKind::CriticalMove,
            move_ids: vec![graph.moves[idx].id],
            at_move_index: idx,
        });
    }

    let orphans = orphan_indices(stats, n, policy.orphan_grace);
    for &idx in &orphans {
        events.push(PatternEvent {
            kind: PatternKind::Orphan,
            move_ids: vec![graph.moves[idx].id],
            at_move_index: idx,
        });
    }

    let chunks = find_chunks(&graph_view, n, policy);
    for &(start, end) in &chunks {
        events.push(PatternEvent {
            kind: PatternKind::Chunk,
            move_ids: graph.moves[start..=end].iter().map(|m| m.id).collect(),
            at_move_index: end,
        });
    }

    for (start, end) in find_webs(&graph_view, n, policy) {
        events.push(PatternEvent {
            kind: PatternKind::Web,
            move_ids: graph.moves[start..=end].iter().map(|m| m.id).collect(),
            at_move_index: end,
        });
    }

    for (start, end) in find_sawtooths(&graph_view, stats, n) {
        events.push(PatternEvent {
            kind: PatternKind::Sawtooth,
            move_ids: graph.moves[start..=end].iter().map(|m| m.id).collect(),
            at_move_index: end,
        });
    }

    let breakthroughs = find_breakthroughs(graph, &graph_view, &critical, &chunks);
    let breakthrough_indices: Vec<usize> = breakthroughs.iter().map(|e| e.at_move_index).collect();
    events.extend(breakthroughs);

    // Struggles last: suppressed near any breakthrough.
    for (start, end) in consecutive_runs(&orphans, STRUGGLE_MIN_RUN) {
        let near_breakthrough = breakthrough_indices.iter().any(|&b| {
            end + EXCLUSION_WINDOW > b && start <= b + EXCLUSION_WINDOW
        });
        if near_breakthrough {
            continue;
        }
        events.push(PatternEvent {
            kind: PatternKind::Struggle,
            move_ids: graph.moves[start..=end].iter().map(|m| m.id).collect(),
            at_move_index: end,
        });
    }

    events
}

/// Moves whose conceptual degree reaches the 95th percentile of the session.
fn critical_moves(stats: &[MoveStats]) -> Vec<usize> {
    let mut degrees: Vec<usize> = stats.iter().map(|s| s.degree()).collect();
    if degrees.is_empty() {
        return Vec::new();
    }
    degrees.sort_unstable();
    let rank = ((0.95 * degrees.len() as f32).ceil() as usize)
        .saturating_sub(1)
        .min(degrees.len() - 1);
    let p95 = degrees[rank];
    stats
        .iter()
        .enumerate()
        .filter(|(_, s)| s.degree() >= p95.max(CRITICAL_MIN_DEGREE))
        .map(|(i, _)| i)
        .collect()
}

/// Moves with zero conceptual links after the grace window has passed.
fn orphan_indices(stats: &[MoveStats], n: usize, grace: usize) -> Vec<usize> {
    stats
        .iter()
        .enumerate()
        .filter(|(i, s)| s.degree() == 0 && n - 1 - i >= grace)
        .map(|(i, _)| i)
        .collect()
}

/// Maximal consecutive runs of at least `min_len` indices.
fn consecutive_runs(indices: &[usize], min_len: usize) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut iter = indices.iter().copied();
    let Some(mut start) = iter.next() else {
        return runs;
    };
    let mut prev = start;
    for idx in iter {
        if idx != prev + 1 {
            if prev - start + 1 >= min_len {
                runs.push((start, prev));
            }
            start = idx;
        }
        prev = idx;
    }
    if prev - start + 1 >= min_len {
        runs.push((start, prev));
    }
    runs
}

/// Count links fully inside / crossing the window boundary.
fn window_links(graph_view: &GraphView, start: usize, end: usize) -> (usize, usize) {
    let mut intra = 0;
    let mut external = 0;
    for &(from, to, _) in &graph_view.conceptual {
        let from_in = (start..=end).contains(&from);
        let to_in = (start..=end).contains(&to);
        match (from_in, to_in) {
            (true, true) => intra += 1,
            (true, false) | (false, true) => external += 1,
            (false, false) => {}
        }
    }
    (intra, external)
}

/// Greedy left-to-right chunking: grow the longest qualifying window of
/// consecutive moves.  A window qualifies when it is internally dense
/// (at least `size - 1` intra links, every member linked inside) and its
/// external link share stays at or below the modularity threshold.
fn find_chunks(graph_view: &GraphView, n: usize, policy: &LinkPolicy) -> Vec<(usize, usize)> {
    let member_linked_within = |idx: usize, start: usize, end: usize| {
        graph_view.partners[idx].iter().any(|&p| p >= start && p <= end)
    };
    let mut chunks = Vec::new();
    let mut i = 0;
    while i + 2 < n {
        let mut best: Option<(usize, usize)> = None;
        let max_end = (i + CHUNK_MAX_SPAN - 1).min(n - 1);
        for end in (i + 2)..=max_end {
            let size = end - i + 1;
            let (intra, external) = window_links(graph_view, i, end);
            if intra < size - 1 {
                continue;
            }
            if !(i..=end).all(|idx| member_linked_within(idx, i, end)) {
                continue;
            }
            let share = if intra + external == 0 {
                1.0
            } else {
                external as f32 / (intra + external) as f32
            };
            if share <= policy.chunk_modularity {
                best = Some((i, end));
            }
        }
        match best {
            Some((start, end)) => {
                chunks.push((start, end));
                i = end + 1;
            }
            None => i += 1,
        }
    }
    chunks
}

/// Dense local regions: fixed-size windows whose conceptual link density
/// reaches the web threshold.  Non-overlapping, larger windows preferred.
fn find_webs(graph_view: &GraphView, n: usize, policy: &LinkPolicy) -> Vec<(usize, usize)> {
    let mut webs = Vec::new();
    let mut i = 0;
    'outer: while i < n {
        for size in WEB_SIZES {
            if i + size > n {
                continue;
            }
            let end = i + size - 1;
            let (intra, _) = window_links(graph_view, i, end);
            let possible = size * (size - 1) / 2;
            if possible > 0 && intra as f32 / possible as f32 >= policy.web_density {
                webs.push((i, end));
                i = end + 1;
                continue 'outer;
            }
        }
        i += 1;
    }
    webs
}

/// Chains of moves connected only by adjacent single backlinks: every
/// conceptual link at distance 1, at most one in each direction.
fn find_sawtooths(graph_view: &GraphView, stats: &[MoveStats], n: usize) -> Vec<(usize, usize)> {
    let member = |idx: usize| -> bool {
        let s = &stats[idx];
        if s.degree() == 0 || s.backlinks > 1 || s.forelinks > 1 {
            return false;
        }
        graph_view
            .conceptual
            .iter()
            .filter(|(from, to, _)| *from == idx || *to == idx)
            .all(|(_, _, distance)| *distance == 1)
    };
    let members: Vec<usize> = (0..n).filter(|&i| member(i)).collect();
    consecutive_runs(&members, SAWTOOTH_MIN_RUN)
}

/// A critical move whose conceptual links reach back into at least three
/// previously formed chunks.
fn find_breakthroughs(
    graph: &Linkograph,
    graph_view: &GraphView,
    critical: &[usize],
    current_chunks: &[(usize, usize)],
) -> Vec<PatternEvent> {
    // Chunk ranges from this scan plus everything emitted before.
    let id_to_idx: HashMap<Uuid, usize> = graph
        .moves
        .iter()
        .enumerate()
        .map(|(i, m)| (m.id, i))
        .collect();
    let mut chunk_ranges: HashSet<(usize, usize)> = current_chunks.iter().copied().collect();
    for event in graph.patterns.iter().filter(|e| e.kind == PatternKind::Chunk) {
        let indices: Vec<usize> = event
            .move_ids
            .iter()
            .filter_map(|id| id_to_idx.get(id).copied())
            .collect();
        if let (Some(&min), Some(&max)) = (indices.iter().min(), indices.iter().max()) {
            chunk_ranges.insert((min, max));
        }
    }

    critical
        .iter()
        .filter_map(|&idx| {
            let spanned = chunk_ranges
                .iter()
                .filter(|(start, end)| {
                    *end < idx
                        && graph_view.partners[idx]
                            .iter()
                            .any(|&p| p >= *start && p <= *end)
                })
                .count();
            (spanned >= 3).then(|| PatternEvent {
                kind: PatternKind::Breakthrough,
                move_ids: vec![graph.moves[idx].id],
                at_move_index: idx,
            })
        })
        .collect()
}
