//! Per-session state store: the only writer of [`ConversationState`].
//!
//! Each turn mutates state through one atomic append; a snapshot is taken
//! after every turn so a detected inconsistency can be repaired by reverting
//! to the last valid state instead of failing the turn.

mod building_type;
mod store;
mod transcript;

pub use building_type::{detect_building_type, is_explicit_type_change};
pub use store::{SessionState, StateError, TurnAppend};
pub use transcript::{TranscriptWriter, TurnRecord};
