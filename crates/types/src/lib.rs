//! Shared data model for the Atelier tutoring runtime.
//!
//! Every other crate in the workspace builds on these types.  They are plain
//! serde-derived structs and closed enums; all behavior lives in the owning
//! crates (state store, linkography engine, router, …).

mod agent;
mod context;
mod conversation;
mod linkograph;
mod metrics;
mod moves;
mod route;
mod session;

pub use agent::{AgentId, AgentResult, Citation, MetricsDelta, MoveSeed};
pub use context::{ContextPackage, Intent};
pub use conversation::{ConversationState, DesignPhase, Message, PhaseState, Role};
pub use linkograph::{Link, LinkKind, Linkograph, MoveStats, PatternEvent, PatternKind};
pub use metrics::MetricSnapshot;
pub use moves::{DesignMove, MoveFocus, MoveModality, MoveSource, MoveType};
pub use route::{RouteDecision, RouteType};
pub use session::{ConfidenceLevel, Session, SessionMode, SkillLevel, StudentProfile};
