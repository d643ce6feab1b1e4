//! Persisted session exports: stable CSV/JSON schemas that downstream
//! benchmarking dashboards and report exporters rely on.
//!
//! Five files per session: `interactions_{id}.csv`, `moves_{id}.csv`,
//! `linkography_{id}.json`, `metrics_{id}.csv`, `session_{id}.json`.
//! Columns are versioned by position; the cognitive-flag booleans are
//! required and always written, never omitted.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use atelier_metrics::SessionAggregate;
use atelier_types::{DesignMove, Linkograph, MetricSnapshot, Session};

/// One row of `interactions_{id}.csv`.  Field order is the column order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InteractionRow {
    pub session_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub turn_index: u32,
    pub user_text: String,
    pub assistant_text: String,
    pub route: String,
    pub primary_agent: String,
    /// Agents invoked this turn, joined with `|`.
    pub agents_used: String,
    pub phase: String,
    pub step: u8,
    // The cognitive-flag columns are required by downstream consumers.  On
    // read they are back-filled with defaults when an older file lacks them.
    #[serde(default)]
    pub prevents_cognitive_offloading: bool,
    #[serde(default)]
    pub encourages_deep_thinking: bool,
    #[serde(default)]
    pub provides_scaffolding: bool,
    #[serde(default)]
    pub maintains_engagement: bool,
    #[serde(default)]
    pub adapts_to_skill_level: bool,
    #[serde(default = "default_coherence")]
    pub response_coherence: f32,
    #[serde(default = "default_confidence")]
    pub classification_confidence: f32,
}

fn default_coherence() -> f32 {
    0.5
}

fn default_confidence() -> f32 {
    0.5
}

/// One row of `moves_{id}.csv`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveRow {
    pub move_id: Uuid,
    pub turn_index: u32,
    pub phase: String,
    #[serde(rename = "type")]
    pub move_type: String,
    pub focus: String,
    pub modality: String,
    pub source: String,
    pub cognitive_load: f32,
}

impl MoveRow {
    pub fn from_move(mv: &DesignMove) -> Self {
        Self {
            move_id: mv.id,
            turn_index: mv.turn_id,
            phase: mv.phase.as_str().to_string(),
            move_type: mv.move_type.as_str().to_string(),
            focus: mv.focus.as_str().to_string(),
            modality: mv.modality.as_str().to_string(),
            source: mv.source.as_str().to_string(),
            cognitive_load: mv.cognitive_load,
        }
    }
}

/// One row of `metrics_{id}.csv`: the snapshot flattened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsRow {
    pub turn_index: u32,
    pub ts: DateTime<Utc>,
    pub cop: f32,
    pub dte: f32,
    pub se: f32,
    pub ki: f32,
    pub lp: f32,
    pub ma: f32,
    pub cai: f32,
    pub ads: f32,
    pub nes: f32,
    pub pbi: f32,
    pub brs: f32,
    pub effectiveness: f32,
}

impl MetricsRow {
    pub fn from_snapshot(s: &MetricSnapshot) -> Self {
        Self {
            turn_index: s.turn_index,
            ts: s.ts,
            cop: s.cop,
            dte: s.dte,
            se: s.se,
            ki: s.ki,
            lp: s.lp,
            ma: s.ma,
            cai: s.cai,
            ads: s.ads,
            nes: s.nes,
            pbi: s.pbi,
            brs: s.brs,
            effectiveness: s.effectiveness,
        }
    }

    pub fn into_snapshot(self) -> MetricSnapshot {
        MetricSnapshot {
            turn_index: self.turn_index,
            ts: self.ts,
            cop: self.cop,
            dte: self.dte,
            se: self.se,
            ki: self.ki,
            lp: self.lp,
            ma: self.ma,
            cai: self.cai,
            ads: self.ads,
            nes: self.nes,
            pbi: self.pbi,
            brs: self.brs,
            effectiveness: self.effectiveness,
        }
    }
}

/// `session_{id}.json`: session record, aggregate, and runtime info.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session: Session,
    pub aggregate: SessionAggregate,
    /// Per-role token usage, as reported by the gateway.
    pub token_usage: serde_json::Value,
    pub configuration: serde_json::Value,
}

/// Paths of everything written for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportManifest {
    pub session_id: Uuid,
    pub interactions: PathBuf,
    pub moves: PathBuf,
    pub linkography: PathBuf,
    pub metrics: PathBuf,
    pub session: PathBuf,
}

/// Everything a session export needs, handed over at session end.
pub struct SessionExport<'a> {
    pub session: &'a Session,
    pub interactions: &'a [InteractionRow],
    pub moves: &'a [DesignMove],
    pub linkograph: &'a Linkograph,
    pub snapshots: &'a [MetricSnapshot],
    pub aggregate: &'a SessionAggregate,
    pub token_usage: serde_json::Value,
    pub configuration: serde_json::Value,
}

/// Write all five export files under `dir/{session_id}/`.
pub fn write_session_export(dir: impl AsRef<Path>, export: &SessionExport<'_>) -> Result<ExportManifest> {
    let id = export.session.id;
    let base = dir.as_ref().join(id.to_string());
    fs::create_dir_all(&base).with_context(|| format!("create export dir {}", base.display()))?;

    let interactions = base.join(format!("interactions_{id}.csv"));
    let mut wtr = csv::Writer::from_path(&interactions)?;
    for row in export.interactions {
        wtr.serialize(row)?;
    }
    wtr.flush()?;

    let moves = base.join(format!("moves_{id}.csv"));
    let mut wtr = csv::Writer::from_path(&moves)?;
    for mv in export.moves {
        wtr.serialize(MoveRow::from_move(mv))?;
    }
    wtr.flush()?;

    let linkography = base.join(format!("linkography_{id}.json"));
    fs::write(&linkography, serde_json::to_string_pretty(export.linkograph)?)?;

    let metrics = base.join(format!("metrics_{id}.csv"));
    let mut wtr = csv::Writer::from_path(&metrics)?;
    for snapshot in export.snapshots {
        wtr.serialize(MetricsRow::from_snapshot(snapshot))?;
    }
    wtr.flush()?;

    let session = base.join(format!("session_{id}.json"));
    let summary = SessionSummary {
        session: export.session.clone(),
        aggregate: export.aggregate.clone(),
        token_usage: export.token_usage.clone(),
        configuration: export.configuration.clone(),
    };
    fs::write(&session, serde_json::to_string_pretty(&summary)?)?;

    Ok(ExportManifest {
        session_id: id,
        interactions,
        moves,
        linkography,
        metrics,
        session,
    })
}

/// Read back `metrics_{id}.csv` — round-trips snapshots bit-for-bit.
pub fn read_metrics(path: impl AsRef<Path>) -> Result<Vec<MetricSnapshot>> {
    let mut rdr = csv::Reader::from_path(path.as_ref())
        .with_context(|| format!("open metrics csv {}", path.as_ref().display()))?;
    let mut out = Vec::new();
    for row in rdr.deserialize::<MetricsRow>() {
        out.push(row?.into_snapshot());
    }
    Ok(out)
}

/// Read back `linkography_{id}.json` — the graph with embeddings intact so
/// the linkograph can be rebuilt and compared against the live links.
pub fn read_linkography(path: impl AsRef<Path>) -> Result<Linkograph> {
    let raw = fs::read_to_string(path.as_ref())
        .with_context(|| format!("open linkography json {}", path.as_ref().display()))?;
    Ok(serde_json::from_str(&raw)?)
}

/// Read back `interactions_{id}.csv`.  Files written before the cognitive
/// flags were added parse with the flags back-filled to their defaults.
pub fn read_interactions(path: impl AsRef<Path>) -> Result<Vec<InteractionRow>> {
    let mut rdr = csv::Reader::from_path(path.as_ref())
        .with_context(|| format!("open interactions csv {}", path.as_ref().display()))?;
    let mut out = Vec::new();
    for row in rdr.deserialize::<InteractionRow>() {
        out.push(row?);
    }
    Ok(out)
}

/// Read back `moves_{id}.csv` rows.
pub fn read_moves(path: impl AsRef<Path>) -> Result<Vec<MoveRow>> {
    let mut rdr = csv::Reader::from_path(path.as_ref())
        .with_context(|| format!("open moves csv {}", path.as_ref().display()))?;
    let mut out = Vec::new();
    for row in rdr.deserialize::<MoveRow>() {
        out.push(row?);
    }
    Ok(out)
}

// ── Tests ────────────────────────────────────────────────────────────────────
