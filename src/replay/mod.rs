//! Replay Model
//!
//! A replay is the seed plus the useful input events of a run. Playing
//! it back through the same simulation code reproduces the run exactly;
//! periodic checksum events catch any divergence.
//!
//! The in-memory model lives here; the binary format is in [`format`].

pub mod format;

use serde::{Serialize, Deserialize};

use crate::core::fixed::FIXED_SCALE;
use crate::game::input::InputEvent;
use crate::game::stage::{Difficulty, ReplayMode, StageSim};

/// The run was completed without a game over.
pub const REPLAY_FLAG_CLEAR: u32 = 1 << 0;
/// A cheat input (invincibility, power keys) was used.
pub const REPLAY_FLAG_CHEATS: u32 = 1 << 1;
/// A continue was used.
pub const REPLAY_FLAG_CONTINUES: u32 = 1 << 2;

/// Version of the game that produced a replay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
    pub tweak: u16,
}

impl GameVersion {
    /// Version of this build.
    pub fn current() -> Self {
        Self {
            major: 0,
            minor: 1,
            patch: 0,
            tweak: 0,
        }
    }
}

/// One recorded input event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayEvent {
    pub frame: u32,
    pub ev: InputEvent,
}

/// Everything needed to replay one stage: the entry snapshot of the
/// player, the seed, and the event stream.
///
/// The snapshot field widths match the wire format exactly; positions
/// are stored in whole pixels, which is lossless at stage entry (the
/// spawn point is pixel-aligned).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayStage {
    pub flags: u32,
    pub stage: u16,
    pub seed: u32,
    pub diff: u8,

    pub plr_points: u32,
    pub plr_continues_used: u8,
    pub plr_char: u8,
    pub plr_shot: u8,
    pub plr_pos_x: i16,
    pub plr_pos_y: i16,
    pub plr_focus: u8,
    pub plr_power: u16,
    pub plr_lives: u8,
    pub plr_life_fragments: u8,
    pub plr_bombs: u8,
    pub plr_bomb_fragments: u8,
    pub plr_inputflags: u8,

    pub events: Vec<ReplayEvent>,
}

impl ReplayStage {
    /// Snapshot the state of a freshly initialized stage. Call before
    /// the first frame runs, [`commit`](Self::commit) after the last.
    pub fn begin(sim: &StageSim) -> Self {
        let p = &sim.player;
        Self {
            flags: 0,
            stage: sim.stage_id,
            seed: sim.seed,
            diff: sim.diff.level() as u8,
            plr_points: p.points,
            plr_continues_used: p.continues_used.min(u8::MAX as u32) as u8,
            plr_char: p.char_id,
            plr_shot: p.shot_id,
            plr_pos_x: (p.pos.x >> FIXED_SCALE).clamp(i16::MIN as i32, i16::MAX as i32) as i16,
            plr_pos_y: (p.pos.y >> FIXED_SCALE).clamp(i16::MIN as i32, i16::MAX as i32) as i16,
            plr_focus: p.focus.clamp(0, u8::MAX as i16) as u8,
            plr_power: p.power.max(0) as u16,
            plr_lives: p.lives.clamp(0, u8::MAX as i32) as u8,
            plr_life_fragments: p.life_fragments.clamp(0, u8::MAX as i32) as u8,
            plr_bombs: p.bombs.clamp(0, u8::MAX as i32) as u8,
            plr_bomb_fragments: p.bomb_fragments.clamp(0, u8::MAX as i32) as u8,
            plr_inputflags: p.inputflags.0,
            events: Vec::new(),
        }
    }

    /// Take the recorded events and flags out of a finished stage.
    pub fn commit(&mut self, sim: &StageSim) {
        self.flags |= sim.replay_flags;
        self.events = sim.recorded_events.clone();
    }

    /// Append one event to the stage's stream.
    pub fn event(&mut self, frame: u32, ev: InputEvent) {
        self.events.push(ReplayEvent { frame, ev });
    }

    /// Build a playback simulation for this stage.
    ///
    /// Restores the entry snapshot and installs the event stream.
    /// Returns `None` if the stored difficulty level is invalid.
    pub fn make_sim(&self, stage_mode: crate::game::stage::StageMode) -> Option<StageSim> {
        let diff = Difficulty::from_level(self.diff)?;
        let mut sim = StageSim::new(self.stage, diff, stage_mode, ReplayMode::Play, self.seed);

        let p = &mut sim.player;
        p.points = self.plr_points;
        p.continues_used = self.plr_continues_used as u32;
        p.char_id = self.plr_char;
        p.shot_id = self.plr_shot;
        p.pos.x = (self.plr_pos_x as i32) << FIXED_SCALE;
        p.pos.y = (self.plr_pos_y as i32) << FIXED_SCALE;
        p.focus = self.plr_focus as i16;
        p.power = self.plr_power.min(i16::MAX as u16) as i16;
        p.lives = self.plr_lives as i32;
        p.life_fragments = self.plr_life_fragments as i32;
        p.bombs = self.plr_bombs as i32;
        p.bomb_fragments = self.plr_bomb_fragments as i32;
        p.inputflags.0 = self.plr_inputflags;

        sim.replay_flags = self.flags;
        sim.playback = self.events.clone();
        Some(sim)
    }
}

/// A complete replay: header plus one entry per stage played.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replay {
    pub game_version: GameVersion,
    pub playername: String,
    pub flags: u32,
    pub stages: Vec<ReplayStage>,
}

impl Replay {
    pub fn new(playername: &str) -> Self {
        Self {
            game_version: GameVersion::current(),
            playername: playername.to_string(),
            flags: 0,
            stages: Vec::new(),
        }
    }

    /// Total number of recorded events across all stages.
    pub fn num_events(&self) -> usize {
        self.stages.iter().map(|s| s.events.len()).sum()
    }

    /// Recompute the global clear flag: set only when every stage was
    /// cleared. Call before writing the replay out.
    pub fn fix_flags(&mut self) {
        let all_clear = !self.stages.is_empty()
            && self.stages.iter().all(|s| s.flags & REPLAY_FLAG_CLEAR != 0);
        if all_clear {
            self.flags |= REPLAY_FLAG_CLEAR;
        } else {
            self.flags &= !REPLAY_FLAG_CLEAR;
        }
    }

    /// Drop the event streams, keeping only the metadata. Mirrors a
    /// metadata-only read.
    pub fn destroy_events(&mut self) {
        for stage in &mut self.stages {
            stage.events = Vec::new();
            stage.events.shrink_to_fit();
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
