//! Stage Simulation
//!
//! The deterministic per-frame driver. A [`StageSim`] owns the player,
//! the optional boss encounter, the RNG, and the effect sink, and
//! advances them one frame at a time.
//!
//! Determinism contract: given the same seed and the same input events
//! on the same frames, two runs produce bit-identical state. Recording
//! and playback run the exact same code path; the only difference is
//! where input events come from.

use serde::{Serialize, Deserialize};
use tracing::{debug, warn};

use crate::core::fixed::{FPS, PLR_DEATH_DRIFT, FIXED_SCALE};
use crate::core::hash::{compute_state_checksum, compute_state_hash, StateHash, StateHasher};
use crate::core::rng::GameRng;
use crate::core::vec2::FixedVec2;
use crate::game::boss::{process_boss, start_attack, AttackType, Boss, ProcessResult};
use crate::game::effects::{EffectSink, ItemKind, StageEffect};
use crate::game::input::{InputEvent, Key};
use crate::game::player::{
    Player, BOMB_RECOVERY, DEATHBOMB_TIME, DEATH_DELAY, PLR_START_BOMBS, PLR_START_LIVES,
    PLR_STGPRACTICE_BOMBS, PLR_STGPRACTICE_LIVES, PLR_STGPRACTICE_POWER,
    PLR_SPELLPRACTICE_POWER, POWER_VALUE,
};
use crate::game::progress::ProgressStore;
use crate::replay::{ReplayEvent, REPLAY_FLAG_CHEATS, REPLAY_FLAG_CONTINUES};

/// Boss HP drained per frame by an active bomb.
const BOMB_DAMAGE_PER_FRAME: i32 = 30;

/// Frames between desync checkpoints while recording.
const DESYNC_CHECK_INTERVAL: i32 = FPS * 5;

// =============================================================================
// MODES
// =============================================================================

/// Difficulty setting. The numeric level feeds score scaling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Difficulty {
    Easy,
    Normal,
    Hard,
    Lunatic,
}

impl Difficulty {
    /// Numeric level, 1 (Easy) through 4 (Lunatic).
    pub fn level(self) -> i32 {
        match self {
            Difficulty::Easy => 1,
            Difficulty::Normal => 2,
            Difficulty::Hard => 3,
            Difficulty::Lunatic => 4,
        }
    }

    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            1 => Some(Difficulty::Easy),
            2 => Some(Difficulty::Normal),
            3 => Some(Difficulty::Hard),
            4 => Some(Difficulty::Lunatic),
            _ => None,
        }
    }
}

/// How the stage is being played.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageMode {
    /// Normal run through the campaign.
    Story,
    /// Single stage with boosted resources.
    StagePractice,
    /// Single spellcard; failing it ends the run.
    SpellPractice,
}

/// Whether inputs come from the player or from a replay.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplayMode {
    Record,
    Play,
}

// =============================================================================
// SIMULATION CONTEXT
// =============================================================================

/// Borrowed view of the stage handed to boss processing and attack
/// rules. Carries everything a rule may read or mutate except the boss
/// itself.
pub struct SimContext<'a> {
    pub frame: i32,
    pub diff: Difficulty,
    pub stage_mode: StageMode,
    pub replay_mode: ReplayMode,
    pub dialog: bool,
    pub rng: &'a mut GameRng,
    pub player: &'a mut Player,
    pub effects: &'a mut EffectSink,
    pub progress: &'a mut ProgressStore,
    /// Set by rules or boss processing; copied back to the stage.
    pub game_over: bool,
}

// =============================================================================
// STAGE SIMULATION
// =============================================================================

/// Result of advancing one frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameResult {
    /// Set on the frame the boss is defeated; the payload is whether it fled.
    pub boss_defeated: Option<bool>,
    pub game_over: bool,
}

pub struct StageSim {
    pub stage_id: u16,
    pub diff: Difficulty,
    pub stage_mode: StageMode,
    pub replay_mode: ReplayMode,
    pub seed: u32,

    pub frame: i32,
    pub rng: GameRng,
    pub player: Player,
    pub boss: Option<Boss>,
    pub effects: EffectSink,
    pub progress: ProgressStore,

    pub dialog_active: bool,
    pub game_over: bool,

    /// Events captured while recording, in application order.
    pub recorded_events: Vec<ReplayEvent>,
    /// Replay flags accumulated while recording (cheats, continues).
    pub replay_flags: u32,

    /// Event stream fed back in during playback.
    pub playback: Vec<ReplayEvent>,
    playback_pos: usize,
    /// A desync checkpoint failed during playback.
    pub desynced: bool,
}

impl StageSim {
    pub fn new(
        stage_id: u16,
        diff: Difficulty,
        stage_mode: StageMode,
        replay_mode: ReplayMode,
        seed: u32,
    ) -> Self {
        let mut player = Player::new();
        match stage_mode {
            StageMode::Story => {}
            StageMode::StagePractice => {
                player.lives = PLR_STGPRACTICE_LIVES;
                player.bombs = PLR_STGPRACTICE_BOMBS;
                player.power = PLR_STGPRACTICE_POWER;
            }
            StageMode::SpellPractice => {
                player.power = PLR_SPELLPRACTICE_POWER;
            }
        }
        player.stage_pre_init();

        Self {
            stage_id,
            diff,
            stage_mode,
            replay_mode,
            seed,
            frame: 0,
            rng: GameRng::new(seed as u64),
            player,
            boss: None,
            effects: EffectSink::new(),
            progress: ProgressStore::new(),
            dialog_active: false,
            game_over: false,
            recorded_events: Vec::new(),
            replay_flags: 0,
            playback: Vec::new(),
            playback_pos: 0,
            desynced: false,
        }
    }

    /// Put a boss on the field and start its first runnable attack.
    pub fn spawn_boss(&mut self, mut boss: Boss) {
        debug!(boss = %boss.name, frame = self.frame, "boss spawned");
        boss.birthtime = self.frame;

        let first = (0..boss.attacks.len()).find(|&i| !boss.should_skip(i));
        if let Some(first) = first {
            let (boss_slot, mut ctx) = self.split_ctx();
            *boss_slot = Some(boss);
            if let Some(b) = boss_slot.as_mut() {
                start_attack(b, &mut ctx, first);
            }
            let game_over = ctx.game_over;
            self.game_over = game_over;
        } else {
            self.boss = Some(boss);
        }
    }

    fn split_ctx(&mut self) -> (&mut Option<Boss>, SimContext<'_>) {
        let ctx = SimContext {
            frame: self.frame,
            diff: self.diff,
            stage_mode: self.stage_mode,
            replay_mode: self.replay_mode,
            dialog: self.dialog_active,
            rng: &mut self.rng,
            player: &mut self.player,
            effects: &mut self.effects,
            progress: &mut self.progress,
            game_over: self.game_over,
        };
        (&mut self.boss, ctx)
    }

    // -------------------------------------------------------------------------
    // Frame driver
    // -------------------------------------------------------------------------

    /// Advance the simulation by one frame.
    pub fn frame(&mut self) -> FrameResult {
        let mut result = FrameResult::default();

        // 1. Input events: feed queued replay events, or drop a desync
        //    checkpoint after this frame's live events. Both paths see
        //    the same state: post-input, pre-logic.
        match self.replay_mode {
            ReplayMode::Play => {
                while self.playback_pos < self.playback.len()
                    && self.playback[self.playback_pos].frame == self.frame as u32
                {
                    let ev = self.playback[self.playback_pos].ev;
                    self.playback_pos += 1;
                    let (useful, cheat) = self.player_event(ev);
                    let bookkeeping =
                        matches!(ev, InputEvent::CheckDesync(_) | InputEvent::Fps(_));
                    if !useful && !bookkeeping {
                        warn!(frame = self.frame, ?ev, "useless event in replay");
                    }
                    if cheat && self.replay_flags & REPLAY_FLAG_CHEATS == 0 {
                        warn!(frame = self.frame, ?ev, "cheat event in non-cheat replay");
                    }
                    if matches!(ev, InputEvent::Continue)
                        && self.replay_flags & REPLAY_FLAG_CONTINUES == 0
                    {
                        warn!(frame = self.frame, "unflagged continue in replay");
                    }
                }
            }
            ReplayMode::Record => {
                if self.frame > 0 && self.frame % DESYNC_CHECK_INTERVAL == 0 {
                    let cs = self.state_checksum();
                    self.recorded_events.push(ReplayEvent {
                        frame: self.frame as u32,
                        ev: InputEvent::CheckDesync(cs),
                    });
                }
            }
        }

        // 2. Player state machine
        self.player_logic();

        // 3. Boss encounter
        if self.boss.is_some() {
            let (boss_slot, mut ctx) = self.split_ctx();
            let outcome = match boss_slot.as_mut() {
                Some(b) => process_boss(b, &mut ctx),
                None => ProcessResult::Alive,
            };
            let game_over = ctx.game_over;
            self.game_over = game_over;

            if let ProcessResult::Defeated { fled } = outcome {
                result.boss_defeated = Some(fled);
                self.boss = None;
            }
        }

        // 4. Advance the clock
        self.frame += 1;

        result.game_over = self.game_over;
        result
    }

    // -------------------------------------------------------------------------
    // Player logic
    // -------------------------------------------------------------------------

    fn player_logic(&mut self) {
        let frame = self.frame;

        if self.player.continuetime == frame {
            self.apply_continue();
        }

        // Respawn: drift up from below the field until deathtime hits -1
        if self.player.deathtime < -1 {
            self.player.deathtime += 1;
            self.player.pos.y -= PLR_DEATH_DRIFT;
        }

        self.player.update_focus();
        self.player.apply_movement();

        if self.player.deathtime == frame {
            self.realdeath();
        }

        if self.player.bombing(frame) {
            if self.player.bombcanceltime != 0
                && frame == self.player.bombcanceltime + self.player.bombcanceldelay
            {
                // A queued cancel ends the bomb early
                self.player.recovery = frame;
                self.player.bombcanceltime = 0;
                self.player.bombcanceldelay = 0;
                return;
            }

            // An active bomb drains the boss and keeps the field clear
            if let Some(boss) = &mut self.boss {
                boss.damage(frame, BOMB_DAMAGE_PER_FRAME);
            }
            self.effects.push(frame, StageEffect::ClearHazards { now: false });
            self.fail_spell();
        }
    }

    fn apply_continue(&mut self) {
        let frame = self.frame;
        debug!(frame, "continue used");

        self.player.continuetime = -1;
        self.player.continues_used += 1;
        self.player.lives = PLR_START_LIVES;
        self.player.bombs = PLR_START_BOMBS;
        self.player.life_fragments = 0;
        self.player.bomb_fragments = 0;
        self.player.set_power(0, frame, &mut self.effects);
        self.game_over = false;

        self.effects.push(frame, StageEffect::ClearHazards { now: true });
        self.effects.push(
            frame,
            StageEffect::SpawnItems {
                pos: self.player.deathpos,
                kind: ItemKind::Power,
                count: 4,
            },
        );
    }

    /// The deathbomb window closed without a bomb: the death is real.
    fn realdeath(&mut self) {
        let frame = self.frame;

        self.player.deathtime = -DEATH_DELAY - 1;
        self.player.respawntime = frame;
        self.effects.push(frame, StageEffect::ClearHazards { now: true });

        if self.player.iddqd {
            return;
        }

        // Dying to an extra spell costs nothing outside spell practice
        if self.stage_mode != StageMode::SpellPractice {
            if let Some(boss) = &self.boss {
                if let Some(idx) = boss.current {
                    if boss.attacks[idx].kind == AttackType::ExtraSpell {
                        return;
                    }
                }
            }
        }

        self.fail_spell();

        let drop = ((self.player.power as i32 * 15 / 100) / POWER_VALUE as i32).max(2) as u32;
        let newpow = (self.player.power as i32 * 7 / 10) as i16;
        self.player.set_power(newpow, frame, &mut self.effects);

        self.player.deathpos = self.player.pos;
        self.effects.push(
            frame,
            StageEffect::SpawnItems {
                pos: self.player.deathpos,
                kind: ItemKind::Power,
                count: drop,
            },
        );

        self.player.bombs = PLR_START_BOMBS;
        self.player.bomb_fragments = 0;
        self.player.recovery = -(frame + DEATH_DELAY + 150);

        // Respawn below the field; the drift walks the player back to
        // the spawn point over DEATH_DELAY frames
        self.player.pos = Player::spawn_pos()
            .add(FixedVec2::new(0, DEATH_DELAY << FIXED_SCALE));

        self.player.lives -= 1;
        if self.player.lives == -1 {
            if self.replay_mode == ReplayMode::Play {
                self.player.lives = 0;
            } else {
                self.game_over = true;
            }
        }
    }

    /// Mark the boss's current attack as failed. Extra spells end
    /// immediately on failure instead of running out their timer.
    fn fail_spell(&mut self) {
        let frame = self.frame;

        let should_finish = {
            let Some(boss) = &mut self.boss else { return };
            let Some(idx) = boss.current else { return };
            let a = &mut boss.attacks[idx];

            if a.finished || a.failtime != 0 || a.starttime >= frame {
                return;
            }
            a.failtime = frame;
            a.kind == AttackType::ExtraSpell
        };

        if should_finish {
            let (boss_slot, mut ctx) = self.split_ctx();
            if let Some(b) = boss_slot.as_mut() {
                crate::game::boss::finish_current_attack(b, &mut ctx);
            }
            let game_over = ctx.game_over;
            self.game_over = game_over;
        }
    }

    // -------------------------------------------------------------------------
    // Bombing
    // -------------------------------------------------------------------------

    /// Fire a bomb if the player can. A bomb fired inside the deathbomb
    /// window saves the run but costs an extra bomb.
    pub fn player_bomb(&mut self) {
        let frame = self.frame;

        // Extra spells must be survived clean
        if let Some(boss) = &self.boss {
            if let Some(idx) = boss.current {
                if boss.attacks[idx].kind == AttackType::ExtraSpell {
                    return;
                }
            }
        }

        let p = &self.player;
        let can_bomb = frame - p.recovery >= 0
            && p.deathtime >= -1
            && p.bombs > 0
            && frame >= p.respawntime + 60;
        if !can_bomb {
            return;
        }

        self.fail_spell();

        self.player.bombs -= 1;
        if self.player.deathtime > 0 {
            // Deathbomb: the save costs one more bomb, and the bomb is
            // backdated to the frame of the hit
            let hit_frame = self.player.deathtime - DEATHBOMB_TIME;
            self.player.deathtime = -1;
            if self.player.bombs > 0 {
                self.player.bombs -= 1;
            } else {
                self.player.bomb_fragments = 0;
            }
            self.run_bomb_logic(hit_frame, frame);
        }

        self.player.bombcanceltime = 0;
        self.player.bombcanceldelay = 0;
        self.player.recovery = frame + BOMB_RECOVERY;

        self.effects.push(frame, StageEffect::Sound("bomb"));
        self.effects.push(
            frame,
            StageEffect::PlayerBomb {
                char_id: self.player.char_id,
                shot_id: self.player.shot_id,
            },
        );
    }

    /// Re-run the per-frame bomb drain for frames the deathbomb grace
    /// window already consumed.
    ///
    /// Runs against a sandboxed effect sink that is merged back
    /// afterwards, so observers see the missed frames in order while
    /// live effects from the current frame are unaffected. The range is
    /// bounded by DEATHBOMB_TIME; there is no recursion into full frame
    /// logic.
    fn run_bomb_logic(&mut self, from: i32, to: i32) {
        let mut sandbox = EffectSink::new();
        for f in from..to {
            if let Some(boss) = self.boss.as_mut() {
                if boss.is_vulnerable(f) {
                    boss.damage(f, BOMB_DAMAGE_PER_FRAME);
                }
            }
            sandbox.push(f, StageEffect::ClearHazards { now: false });
        }
        for ev in sandbox.take() {
            self.effects.push(ev.frame, ev.effect);
        }
    }

    // -------------------------------------------------------------------------
    // Input events
    // -------------------------------------------------------------------------

    /// Apply one input event. Returns `(useful, cheat)`: `useful` means
    /// the event changed something and belongs in a recording, `cheat`
    /// taints the replay flags.
    pub fn player_event(&mut self, ev: InputEvent) -> (bool, bool) {
        let frame = self.frame;

        match ev {
            InputEvent::Press(key) => self.key_press(key),
            InputEvent::Release(key) => (self.player.set_input_flag(key, false), false),
            InputEvent::AxisLr(v) => (self.player.set_axis_lr(v as u16), false),
            InputEvent::AxisUd(v) => (self.player.set_axis_ud(v as u16), false),
            InputEvent::InputFlags(flags) => (self.player.update_input_flags(flags), false),

            // End-of-stage marker; state untouched
            InputEvent::Over => (true, false),

            InputEvent::Continue => {
                if self.player.continuetime == -1 {
                    self.player.continuetime = frame + 1;
                    (true, false)
                } else {
                    (false, false)
                }
            }

            InputEvent::CheckDesync(expected) => {
                if self.replay_mode == ReplayMode::Play {
                    let got = self.state_checksum();
                    if got != expected {
                        self.desynced = true;
                        warn!(
                            frame,
                            expected,
                            got,
                            state = %hex::encode(self.compute_hash()),
                            "replay desync"
                        );
                    }
                }
                (false, false)
            }

            InputEvent::Fps(_) => (false, false),
        }
    }

    fn key_press(&mut self, key: Key) -> (bool, bool) {
        let frame = self.frame;

        match key {
            Key::Bomb => {
                self.player_bomb();
                (true, false)
            }

            Key::Iddqd => {
                self.player.iddqd = !self.player.iddqd;
                (true, true)
            }

            Key::PowerUp => {
                let npow = self.player.power + POWER_VALUE;
                (self.player.set_power(npow, frame, &mut self.effects), true)
            }

            Key::PowerDown => {
                let npow = self.player.power - POWER_VALUE;
                (self.player.set_power(npow, frame, &mut self.effects), true)
            }

            Key::Shot | Key::Skip => {
                let mut useful = self.player.set_input_flag(key, true);
                if self.dialog_active {
                    self.dialog_active = false;
                    useful = true;
                }
                (useful, false)
            }

            _ => (self.player.set_input_flag(key, true), false),
        }
    }

    /// Apply an input event and record it if it was useful.
    pub fn player_event_with_replay(&mut self, ev: InputEvent) -> bool {
        let (useful, cheat) = self.player_event(ev);

        if self.replay_mode == ReplayMode::Record && useful {
            self.recorded_events.push(ReplayEvent {
                frame: self.frame as u32,
                ev,
            });
            if cheat {
                self.replay_flags |= REPLAY_FLAG_CHEATS;
            }
            if matches!(ev, InputEvent::Continue) {
                self.replay_flags |= REPLAY_FLAG_CONTINUES;
            }
        }

        useful
    }

    // -------------------------------------------------------------------------
    // State hashing
    // -------------------------------------------------------------------------

    fn hash_state(&self, h: &mut StateHasher) {
        let p = &self.player;
        h.update_vec2(p.pos);
        h.update_u32(p.points);
        h.update_u32(p.graze);
        h.update_i32(p.lives);
        h.update_i32(p.bombs);
        h.update_i32(p.life_fragments);
        h.update_i32(p.bomb_fragments);
        h.update_i32(p.power as i32);
        h.update_i32(p.deathtime);
        h.update_i32(p.recovery);
        h.update_i32(p.continuetime);
        h.update_u8(p.inputflags.0);

        h.update_bool(self.dialog_active);

        if let Some(boss) = &self.boss {
            h.update_vec2(boss.pos);
            h.update_u32(boss.failed_spells);
            if let Some(idx) = boss.current {
                let a = &boss.attacks[idx];
                h.update_u32(idx as u32);
                h.update_i32(a.hp);
                h.update_i32(a.starttime);
                h.update_i32(a.endtime);
                h.update_i32(a.failtime);
                h.update_bool(a.finished);
            }
        }
    }

    /// Full state hash for verification and tests.
    pub fn compute_hash(&self) -> StateHash {
        compute_state_hash(self.frame as u32, self.rng.state(), |h| self.hash_state(h))
    }

    /// 16-bit fold of the state hash, stored in desync check events.
    pub fn state_checksum(&self) -> u16 {
        compute_state_checksum(self.frame as u32, self.rng.state(), |h| self.hash_state(h))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::boss::{idle_rule, ATTACK_END_DELAY_SPELL, BOSS_DEATH_DELAY};
    use crate::game::input::InputFlags;
    use crate::game::player::{DEATHBOMB_TIME, PLR_MAX_POWER};

    fn story_sim() -> StageSim {
        StageSim::new(1, Difficulty::Normal, StageMode::Story, ReplayMode::Record, 42)
    }

    fn run_frames(sim: &mut StageSim, n: i32) {
        for _ in 0..n {
            sim.frame();
        }
    }

    #[test]
    fn test_practice_mode_resources() {
        let sp = StageSim::new(1, Difficulty::Hard, StageMode::StagePractice, ReplayMode::Record, 0);
        assert_eq!(sp.player.lives, PLR_STGPRACTICE_LIVES);
        assert_eq!(sp.player.bombs, PLR_STGPRACTICE_BOMBS);
        assert_eq!(sp.player.power, PLR_STGPRACTICE_POWER);

        let spell = StageSim::new(1, Difficulty::Hard, StageMode::SpellPractice, ReplayMode::Record, 0);
        assert_eq!(spell.player.power, PLR_SPELLPRACTICE_POWER);
        assert_eq!(spell.player.lives, PLR_START_LIVES);
    }

    #[test]
    fn test_movement_through_events() {
        let mut sim = story_sim();
        let start = sim.player.pos;

        sim.player_event_with_replay(InputEvent::Press(Key::Left));
        run_frames(&mut sim, 10);
        assert!(sim.player.pos.x < start.x);

        sim.player_event_with_replay(InputEvent::Release(Key::Left));
        let held = sim.player.pos;
        run_frames(&mut sim, 10);
        assert_eq!(sim.player.pos, held);
    }

    #[test]
    fn test_deathbomb_saves_at_double_cost() {
        let mut sim = story_sim();
        run_frames(&mut sim, 100);

        let bombs = sim.player.bombs;
        sim.player.death(sim.frame, &mut sim.effects);
        assert!(sim.player.deathtime > sim.frame);

        // Bomb inside the window
        run_frames(&mut sim, 5);
        sim.player_event_with_replay(InputEvent::Press(Key::Bomb));

        assert_eq!(sim.player.deathtime, -1);
        assert_eq!(sim.player.bombs, bombs - 2);
        assert!(sim.player.bombing(sim.frame));
        assert_eq!(sim.player.lives, PLR_START_LIVES);
    }

    #[test]
    fn test_missed_deathbomb_window_is_death() {
        let mut sim = story_sim();
        run_frames(&mut sim, 100);

        sim.player.power = 300;
        sim.player.death(sim.frame, &mut sim.effects);
        run_frames(&mut sim, DEATHBOMB_TIME + 1);

        assert_eq!(sim.player.lives, PLR_START_LIVES - 1);
        assert_eq!(sim.player.power, 210);
        assert_eq!(sim.player.bombs, PLR_START_BOMBS);
        assert!(sim.player.deathtime < -1);
        assert!(sim.player.recovery < 0);
        assert!(!sim.game_over);

        let drops: Vec<_> = sim
            .effects
            .take()
            .into_iter()
            .filter_map(|e| match e.effect {
                StageEffect::SpawnItems { kind: ItemKind::Power, count, .. } => Some(count),
                _ => None,
            })
            .collect();
        assert!(drops.contains(&2));
    }

    #[test]
    fn test_respawn_drifts_back_to_spawn() {
        let mut sim = story_sim();
        run_frames(&mut sim, 100);

        sim.player.death(sim.frame, &mut sim.effects);
        run_frames(&mut sim, DEATHBOMB_TIME + 1);
        assert_eq!(sim.player.deathtime, -DEATH_DELAY - 1);

        run_frames(&mut sim, DEATH_DELAY);
        assert_eq!(sim.player.deathtime, -1);
        assert_eq!(sim.player.pos, Player::spawn_pos());
    }

    #[test]
    fn test_gameover_on_last_life() {
        let mut sim = story_sim();
        run_frames(&mut sim, 100);
        sim.player.lives = 0;

        sim.player.death(sim.frame, &mut sim.effects);
        run_frames(&mut sim, DEATHBOMB_TIME + 1);

        assert!(sim.game_over);
        assert_eq!(sim.player.lives, -1);
    }

    #[test]
    fn test_playback_clamps_lives_instead_of_gameover() {
        let mut sim = StageSim::new(1, Difficulty::Normal, StageMode::Story, ReplayMode::Play, 42);
        run_frames(&mut sim, 100);
        sim.player.lives = 0;

        sim.player.death(sim.frame, &mut sim.effects);
        run_frames(&mut sim, DEATHBOMB_TIME + 1);

        assert!(!sim.game_over);
        assert_eq!(sim.player.lives, 0);
    }

    #[test]
    fn test_iddqd_death_is_free() {
        let mut sim = story_sim();
        run_frames(&mut sim, 100);
        sim.player_event_with_replay(InputEvent::Press(Key::Iddqd));
        assert_ne!(sim.replay_flags & REPLAY_FLAG_CHEATS, 0);

        sim.player.death(sim.frame, &mut sim.effects);
        run_frames(&mut sim, DEATHBOMB_TIME + 1);

        assert_eq!(sim.player.lives, PLR_START_LIVES);
        // The respawn animation still plays
        assert!(sim.player.deathtime < -1);
    }

    #[test]
    fn test_continue_restores_resources() {
        let mut sim = story_sim();
        run_frames(&mut sim, 100);
        sim.player.lives = 0;
        sim.player.death(sim.frame, &mut sim.effects);
        run_frames(&mut sim, DEATHBOMB_TIME + 1);
        assert!(sim.game_over);

        sim.player_event_with_replay(InputEvent::Continue);
        run_frames(&mut sim, 2);

        assert!(!sim.game_over);
        assert_eq!(sim.player.lives, PLR_START_LIVES);
        assert_eq!(sim.player.bombs, PLR_START_BOMBS);
        assert_eq!(sim.player.continues_used, 1);
        assert_eq!(sim.player.power, 0);
        assert_ne!(sim.replay_flags & REPLAY_FLAG_CONTINUES, 0);
    }

    #[test]
    fn test_power_keys_are_cheats() {
        let mut sim = story_sim();
        sim.player_event_with_replay(InputEvent::Press(Key::PowerUp));
        assert_eq!(sim.player.power, POWER_VALUE);
        assert_ne!(sim.replay_flags & REPLAY_FLAG_CHEATS, 0);

        sim.player.power = PLR_MAX_POWER;
        sim.player_event_with_replay(InputEvent::Press(Key::PowerDown));
        assert_eq!(sim.player.power, PLR_MAX_POWER - POWER_VALUE);
    }

    #[test]
    fn test_shot_press_skips_dialog() {
        let mut sim = story_sim();
        sim.dialog_active = true;

        assert!(sim.player_event_with_replay(InputEvent::Press(Key::Shot)));
        assert!(!sim.dialog_active);
        assert!(sim.player.inputflags.contains(InputFlags::SHOT));
    }

    #[test]
    fn test_useless_events_not_recorded() {
        let mut sim = story_sim();
        sim.player_event_with_replay(InputEvent::Press(Key::Left));
        // Same press again changes nothing
        sim.player_event_with_replay(InputEvent::Press(Key::Left));
        sim.player_event_with_replay(InputEvent::Fps(60));

        assert_eq!(sim.recorded_events.len(), 1);
    }

    #[test]
    fn test_death_during_spellcard_fails_it() {
        let mut sim = story_sim();
        let mut boss = Boss::new("b", FixedVec2::new(240 << 16, 100 << 16), 0);
        boss.add_attack(AttackType::Spellcard, "s", 30 * FPS, 100000, idle_rule);
        sim.spawn_boss(boss);

        // Past the charge-up
        run_frames(&mut sim, 120);
        sim.player.death(sim.frame, &mut sim.effects);
        run_frames(&mut sim, DEATHBOMB_TIME + 1);

        let boss = sim.boss.as_ref().unwrap();
        assert_ne!(boss.attacks[0].failtime, 0);
    }

    #[test]
    fn test_bomb_drains_boss_and_fails_spell() {
        let mut sim = story_sim();
        let mut boss = Boss::new("b", FixedVec2::new(240 << 16, 100 << 16), 0);
        boss.add_attack(AttackType::Spellcard, "s", 60 * FPS, 100000, idle_rule);
        sim.spawn_boss(boss);

        run_frames(&mut sim, 120);
        let hp_before = sim.boss.as_ref().unwrap().attacks[0].hp;

        sim.player_event_with_replay(InputEvent::Press(Key::Bomb));
        run_frames(&mut sim, 10);

        let boss = sim.boss.as_ref().unwrap();
        assert!(boss.attacks[0].hp < hp_before);
        assert_ne!(boss.attacks[0].failtime, 0);
    }

    #[test]
    fn test_bombs_blocked_during_extra_spell() {
        let mut sim = story_sim();
        let mut boss = Boss::new("b", FixedVec2::new(240 << 16, 100 << 16), 0);
        boss.add_attack(AttackType::ExtraSpell, "x", 60 * FPS, 1000, idle_rule);
        sim.spawn_boss(boss);
        run_frames(&mut sim, 200);

        let bombs = sim.player.bombs;
        sim.player_bomb();
        assert_eq!(sim.player.bombs, bombs);
    }

    #[test]
    fn test_extra_spell_death_is_free_in_story() {
        let mut sim = story_sim();
        let mut boss = Boss::new("b", FixedVec2::new(240 << 16, 100 << 16), 0);
        boss.add_attack(AttackType::ExtraSpell, "x", 60 * FPS, 1000, idle_rule);
        sim.spawn_boss(boss);
        run_frames(&mut sim, 200);

        sim.player.death(sim.frame, &mut sim.effects);
        run_frames(&mut sim, DEATHBOMB_TIME + 1);

        assert_eq!(sim.player.lives, PLR_START_LIVES);
        // The extra spell itself is not failed by the death either
        assert_eq!(sim.boss.as_ref().unwrap().attacks[0].failtime, 0);
    }

    #[test]
    fn test_full_encounter_and_defeat() {
        let mut sim = story_sim();
        let mut boss = Boss::new("b", FixedVec2::new(240 << 16, 100 << 16), 0);
        boss.add_attack(AttackType::Normal, "n", 0, 600, idle_rule);
        boss.add_attack(AttackType::Spellcard, "s", 60 * FPS, 600, idle_rule);
        sim.spawn_boss(boss);

        let mut defeated = None;
        for _ in 0..5000 {
            // Hold damage on the boss whenever it is vulnerable
            if let Some(boss) = &mut sim.boss {
                boss.damage(sim.frame, 40);
            }
            let r = sim.frame();
            if r.boss_defeated.is_some() {
                defeated = r.boss_defeated;
                break;
            }
        }

        assert_eq!(defeated, Some(false));
        assert!(sim.boss.is_none());
        // The spellcard capture paid out
        assert!(sim.player.points > 0);
    }

    #[test]
    fn test_record_then_playback_matches() {
        let script: &[(i32, InputEvent)] = &[
            (10, InputEvent::Press(Key::Left)),
            (60, InputEvent::Release(Key::Left)),
            (61, InputEvent::Press(Key::Down)),
            (90, InputEvent::Press(Key::Focus)),
            (200, InputEvent::Release(Key::Down)),
            (260, InputEvent::Press(Key::Bomb)),
            (400, InputEvent::Release(Key::Focus)),
            (520, InputEvent::Press(Key::Right)),
            (640, InputEvent::Release(Key::Right)),
        ];

        let build_boss = || {
            let mut boss = Boss::new("b", FixedVec2::new(240 << 16, 100 << 16), 0);
            boss.add_attack(AttackType::Spellcard, "s", 30 * FPS, 50000, idle_rule);
            boss
        };

        let mut rec = story_sim();
        rec.spawn_boss(build_boss());
        for f in 0..700 {
            for (when, ev) in script {
                if *when == f {
                    rec.player_event_with_replay(*ev);
                }
            }
            rec.frame();
        }
        let rec_hash = rec.compute_hash();
        assert!(rec
            .recorded_events
            .iter()
            .any(|e| matches!(e.ev, InputEvent::CheckDesync(_))));

        let mut play = StageSim::new(1, Difficulty::Normal, StageMode::Story, ReplayMode::Play, 42);
        play.playback = rec.recorded_events.clone();
        play.spawn_boss(build_boss());
        for _ in 0..700 {
            play.frame();
        }

        assert!(!play.desynced);
        assert_eq!(play.compute_hash(), rec_hash);
        assert_eq!(play.player.pos, rec.player.pos);
        assert_eq!(play.player.bombs, rec.player.bombs);
    }

    #[test]
    fn test_playback_detects_desync() {
        let mut rec = story_sim();
        rec.player_event_with_replay(InputEvent::Press(Key::Left));
        for _ in 0..400 {
            rec.frame();
        }

        let mut play = StageSim::new(1, Difficulty::Normal, StageMode::Story, ReplayMode::Play, 42);
        play.playback = rec.recorded_events.clone();
        // Tampered stream: the initial key press is gone, so the player
        // never moves and the checkpoint at frame 300 must not match
        play.playback.retain(|e| !matches!(e.ev, InputEvent::Press(_)));
        for _ in 0..400 {
            play.frame();
        }

        assert!(play.desynced);
    }

    #[test]
    fn test_state_hash_sensitivity() {
        let a = story_sim();
        let mut b = story_sim();
        assert_eq!(a.compute_hash(), b.compute_hash());

        b.player.points += 1;
        assert_ne!(a.compute_hash(), b.compute_hash());
    }

    #[test]
    fn test_state_checksum_is_hash_fold() {
        let sim = story_sim();
        let hash = sim.compute_hash();
        assert_eq!(sim.state_checksum(), u16::from_le_bytes([hash[0], hash[1]]));
    }

    #[test]
    fn test_boss_death_delay_runs_out() {
        let mut sim = story_sim();
        let mut boss = Boss::new("b", FixedVec2::new(240 << 16, 100 << 16), 0);
        boss.add_attack(AttackType::Normal, "n", 0, 1, idle_rule);
        sim.spawn_boss(boss);
        run_frames(&mut sim, 61);

        // One hit kills; defeat lands BOSS_DEATH_DELAY later
        sim.boss.as_mut().unwrap().damage(sim.frame, 10);
        let mut waited = 0;
        loop {
            let r = sim.frame();
            if let Some(fled) = r.boss_defeated {
                assert!(!fled);
                break;
            }
            waited += 1;
            assert!(waited <= BOSS_DEATH_DELAY + 2, "boss never died");
        }
    }

    #[test]
    fn test_encounter_advances_through_move_and_kill() {
        let mut sim = story_sim();
        let mut boss = Boss::new("b", FixedVec2::new(240 << 16, 100 << 16), 0);
        boss.add_attack(AttackType::Move, "approach", 60, 0, idle_rule);
        boss.add_attack(AttackType::Spellcard, "a", 30 * FPS, 1000, idle_rule);
        boss.add_attack(AttackType::ExtraSpell, "x", 30 * FPS, 500, idle_rule);
        sim.spawn_boss(boss);

        // The opening move ends on its timer alone and hands over
        run_frames(&mut sim, 200);
        assert_eq!(sim.boss.as_ref().unwrap().current, Some(1));

        // Kill the spellcard at frame 500
        while sim.frame < 500 {
            sim.frame();
        }
        assert!(sim.boss.as_mut().unwrap().damage(500, 100_000));
        sim.frame();
        {
            let boss = sim.boss.as_ref().unwrap();
            assert!(boss.attacks[1].finished);
            assert_eq!(boss.attacks[1].failtime, 0);
            assert_eq!(boss.attacks[1].endtime, 500 + ATTACK_END_DELAY_SPELL);
        }

        // The boss holds position until the end delay runs out, then
        // moves on to the extra spell
        while sim.frame < 500 + ATTACK_END_DELAY_SPELL {
            sim.frame();
        }
        assert_eq!(sim.boss.as_ref().unwrap().current, Some(1));
        sim.frame();
        assert_eq!(sim.boss.as_ref().unwrap().current, Some(2));

        // The capture settled exactly once
        let announces = sim
            .effects
            .take()
            .iter()
            .filter(|e| matches!(e.effect, StageEffect::BonusAnnounce { clear: true, .. }))
            .count();
        assert_eq!(announces, 1);
    }

    #[test]
    fn test_encounter_timeout_skips_extra_and_ends() {
        let mut sim = story_sim();
        let mut boss = Boss::new("b", FixedVec2::new(240 << 16, 100 << 16), 0);
        boss.add_attack(AttackType::Move, "approach", 60, 0, idle_rule);
        boss.add_attack(AttackType::Spellcard, "a", 10 * FPS, 100_000, idle_rule);
        boss.add_attack(AttackType::ExtraSpell, "x", 10 * FPS, 500, idle_rule);
        sim.spawn_boss(boss);

        let mut defeated = None;
        let mut extra_seen = false;
        for _ in 0..5000 {
            if sim.boss.as_ref().map_or(false, |b| b.current == Some(2)) {
                extra_seen = true;
            }
            let r = sim.frame();
            if r.boss_defeated.is_some() {
                defeated = r.boss_defeated;
                break;
            }
        }

        // The failed card locks the extra spell out; the boss dies
        // without ever running it
        assert_eq!(defeated, Some(false));
        assert!(!extra_seen);
        assert!(sim.boss.is_none());
        assert!(sim
            .effects
            .take()
            .iter()
            .any(|e| matches!(e.effect, StageEffect::BonusAnnounce { clear: false, .. })));
    }
}
