//! Game Logic Module
//!
//! All encounter simulation code. 100% deterministic.
//!
//! ## Module Structure
//!
//! - `input`: Input events, key flags, wire codec
//! - `effects`: Side-channel events for the presentation layer
//! - `player`: Player resources, movement, deaths and bombs
//! - `boss`: Boss attack sequencing, spell bonuses, item drops
//! - `progress`: Persistent spellcard statistics and hiscores
//! - `stage`: Per-stage simulation driver and desync checkpoints

pub mod input;
pub mod effects;
pub mod player;
pub mod boss;
pub mod progress;
pub mod stage;

// Re-export key types
pub use input::{InputEvent, InputFlags, Key};
pub use effects::{EffectSink, StageEffect};
pub use player::Player;
pub use boss::{Attack, AttackType, Boss, SpellBonus};
pub use progress::{ProgressStore, SpellId};
pub use stage::{Difficulty, FrameResult, ReplayMode, StageMode, StageSim};
