//! # Spellframe
//!
//! Deterministic boss-encounter and replay engine for a bullet-hell shooter.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       SPELLFRAME                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── fixed.rs    - Q16.16 fixed-point arithmetic             │
//! │  ├── vec2.rs     - 2D vector with fixed-point                │
//! │  ├── rng.rs      - Deterministic Xorshift128+ PRNG           │
//! │  └── hash.rs     - State hashing for desync detection        │
//! │                                                              │
//! │  game/           - Encounter logic (deterministic)           │
//! │  ├── input.rs    - Input events and wire codec               │
//! │  ├── player.rs   - Player resources, deaths, bombs           │
//! │  ├── boss.rs     - Attack sequencing and spell bonuses       │
//! │  ├── progress.rs - Persistent spellcard statistics           │
//! │  └── stage.rs    - Per-stage simulation driver               │
//! │                                                              │
//! │  replay/         - Recording and playback                    │
//! │  ├── mod.rs      - Replay model, capture, restore            │
//! │  └── format.rs   - Binary serialization (zlib streams)       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism Guarantee
//!
//! The `core/` and `game/` modules are **100% deterministic**:
//! - No floating-point arithmetic in game logic
//! - No HashMap (uses BTreeMap for sorted iteration)
//! - No system time dependencies
//! - All randomness from seeded Xorshift128+
//!
//! Given the same seed and the same recorded input events, a stage
//! simulation produces **identical results** on any platform, which is
//! what makes replays and their periodic desync checkpoints work.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod replay;

// Re-export commonly used types
pub use core::fixed::{Fixed, FIXED_ONE, FIXED_HALF, FIXED_SCALE, FPS};
pub use core::rng::GameRng;
pub use core::vec2::FixedVec2;
pub use game::input::{InputEvent, InputFlags, Key};
pub use game::stage::{Difficulty, ReplayMode, StageMode, StageSim};
pub use replay::{Replay, ReplayStage};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
