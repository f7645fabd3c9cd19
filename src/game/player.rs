//! Player State
//!
//! Lives, bombs, power, focus, and the death/recovery state machine.
//!
//! Everything here is self-contained player state. Operations that need
//! the rest of the stage (bombing during a boss fight, spell failure,
//! continues) live on [`StageSim`](crate::game::stage::StageSim), which
//! owns both sides.
//!
//! ## Timer conventions
//!
//! - `deathtime == -1`: alive. `deathtime > frame`: hit, deathbomb window
//!   open until that frame. `deathtime < -1`: respawning, counts up to -1.
//! - `recovery > 0`: bombing until that frame, bomb fragments drain boss HP.
//!   `recovery < 0`: passive post-death invulnerability until `-recovery`.

use serde::{Serialize, Deserialize};

use crate::core::fixed::{
    Fixed, FIXED_ONE, fixed_clamp, fixed_div,
    VIEWPORT_W, VIEWPORT_H, PLR_MIN_BORDER_DIST, PLR_MOVE_SPEED, PLR_FOCUS_SPEED,
};
use crate::core::vec2::FixedVec2;
use crate::game::effects::{EffectSink, ItemKind, StageEffect};
use crate::game::input::{InputFlags, Key};

// =============================================================================
// PLAYER CONSTANTS
// =============================================================================

pub const PLR_MAX_POWER: i16 = 400;
pub const PLR_MAX_LIVES: i32 = 9;
pub const PLR_MAX_BOMBS: i32 = 9;

pub const PLR_MAX_LIFE_FRAGMENTS: i32 = 5;
pub const PLR_MAX_BOMB_FRAGMENTS: i32 = 5;

pub const PLR_START_LIVES: i32 = 2;
pub const PLR_START_BOMBS: i32 = 3;

pub const PLR_SCORE_PER_LIFE_FRAG: u32 = 55000;
pub const PLR_SCORE_PER_BOMB_FRAG: u32 = 22000;

pub const PLR_SPELLPRACTICE_POWER: i16 = 200;
pub const PLR_STGPRACTICE_POWER: i16 = 200;
pub const PLR_STGPRACTICE_LIVES: i32 = 4;
pub const PLR_STGPRACTICE_BOMBS: i32 = 4;

/// Worth of one power item, in power units.
pub const POWER_VALUE: i16 = 100;

/// Length of the bomb invulnerability window, frames.
pub const BOMB_RECOVERY: i32 = 300;

/// Frames after a hit during which a bomb still saves the player.
pub const DEATHBOMB_TIME: i32 = 12;

/// Frames the respawn animation takes.
pub const DEATH_DELAY: i32 = 70;

/// Maximum absolute gamepad axis value.
pub const GAMEPAD_AXIS_MAX: i32 = 32767;

/// Frames the focus indicator takes to fade in fully.
pub const FOCUS_MAX: i16 = 30;

// =============================================================================
// PLAYER STATE
// =============================================================================

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Player {
    pub pos: FixedVec2,
    pub deathpos: FixedVec2,

    /// Focus fade-in counter, 0..=FOCUS_MAX. Render-facing but simulated.
    pub focus: i16,

    pub graze: u32,
    pub points: u32,

    pub lives: i32,
    pub bombs: i32,
    pub life_fragments: i32,
    pub bomb_fragments: i32,
    pub power: i16,
    pub continues_used: u32,

    /// Frame on which a queued continue takes effect, -1 if none.
    pub continuetime: i32,
    pub recovery: i32,
    pub deathtime: i32,
    pub respawntime: i32,
    pub bombcanceltime: i32,
    pub bombcanceldelay: i32,

    pub inputflags: InputFlags,
    pub gamepadmove: bool,
    pub lastmovedir: FixedVec2,
    pub axis_ud: i16,
    pub axis_lr: i16,

    /// Invincibility cheat toggle.
    pub iddqd: bool,

    /// Selected character and shot mode (opaque to the simulation,
    /// recorded in the replay stage snapshot).
    pub char_id: u8,
    pub shot_id: u8,
}

impl Default for Player {
    fn default() -> Self {
        Self::new()
    }
}

impl Player {
    /// Fresh player with story-mode defaults, at the spawn point.
    pub fn new() -> Self {
        Self {
            pos: Self::spawn_pos(),
            deathpos: FixedVec2::ZERO,
            focus: 0,
            graze: 0,
            points: 0,
            lives: PLR_START_LIVES,
            bombs: PLR_START_BOMBS,
            life_fragments: 0,
            bomb_fragments: 0,
            power: 0,
            continues_used: 0,
            continuetime: -1,
            recovery: 0,
            deathtime: -1,
            respawntime: 0,
            bombcanceltime: 0,
            bombcanceldelay: 0,
            inputflags: InputFlags::NONE,
            gamepadmove: false,
            lastmovedir: FixedVec2::ZERO,
            axis_ud: 0,
            axis_lr: 0,
            iddqd: false,
            char_id: 0,
            shot_id: 0,
        }
    }

    /// Default spawn point: bottom center, 64 pixels above the border.
    pub fn spawn_pos() -> FixedVec2 {
        FixedVec2::new(VIEWPORT_W / 2, VIEWPORT_H - (64 << 16))
    }

    /// Reset state that does not carry over between stages.
    pub fn stage_pre_init(&mut self) {
        self.recovery = 0;
        self.respawntime = 0;
        self.deathtime = -1;
        self.graze = 0;
        self.axis_lr = 0;
        self.axis_ud = 0;
    }

    // -------------------------------------------------------------------------
    // Power
    // -------------------------------------------------------------------------

    /// Set power, clamped to [0, PLR_MAX_POWER].
    ///
    /// Returns true if the value changed. Reaching max power from below
    /// announces it and clears hazards.
    pub fn set_power(&mut self, npow: i16, frame: i32, effects: &mut EffectSink) -> bool {
        let npow = npow.clamp(0, PLR_MAX_POWER);

        let oldpow = self.power;
        self.power = npow;

        if self.power == PLR_MAX_POWER && oldpow < PLR_MAX_POWER {
            effects.push(frame, StageEffect::Sound("full_power"));
            effects.push(frame, StageEffect::ClearHazards { now: false });
            effects.push(
                frame,
                StageEffect::StageText {
                    text: "Full Power!".to_owned(),
                },
            );
        }

        oldpow != self.power
    }

    // -------------------------------------------------------------------------
    // Movement
    // -------------------------------------------------------------------------

    /// Move by a unit-length direction, scaled by the current speed,
    /// clamped to the playfield border band.
    pub fn move_delta(&mut self, dir: FixedVec2) {
        let speed: Fixed = if self.inputflags.contains(InputFlags::FOCUS) {
            PLR_FOCUS_SPEED
        } else {
            PLR_MOVE_SPEED
        };

        let delta = dir.scale(speed);
        let lastpos = self.pos;
        self.pos = lastpos.add(delta).clamp_to_viewport(PLR_MIN_BORDER_DIST);

        // Track the actual direction after clamping
        let realdir = self.pos.sub(lastpos);
        if realdir.length_squared() > 0 {
            self.lastmovedir = realdir.normalize();
        }
    }

    /// Apply held keys or gamepad axes to position for this frame.
    /// Does nothing while the respawn animation runs.
    pub fn apply_movement(&mut self) {
        if self.deathtime < -1 {
            return;
        }

        if self.apply_movement_gamepad() {
            return;
        }

        let dir = self.inputflags.move_direction();
        if dir.length_squared() > 0 {
            self.move_delta(dir.normalize());
        }
    }

    /// Free-axis gamepad movement. Returns true if the gamepad is driving.
    fn apply_movement_gamepad(&mut self) -> bool {
        if self.axis_lr == 0 && self.axis_ud == 0 {
            if self.gamepadmove {
                self.gamepadmove = false;
                self.inputflags.remove(InputFlags::MOVE_MASK);
            }
            return false;
        }

        let x = fixed_div((self.axis_lr as i32) << 16, GAMEPAD_AXIS_MAX << 16);
        let y = fixed_div((self.axis_ud as i32) << 16, GAMEPAD_AXIS_MAX << 16);
        let mut direction = FixedVec2::new(x, y);

        if direction.length() > FIXED_ONE {
            direction = direction.normalize();
        }

        // Mirror the axis sign into the movement flags so animation and
        // focus logic see a consistent view.
        let mut flags = InputFlags::NONE;
        flags.set(InputFlags::LEFT, direction.x < 0);
        flags.set(InputFlags::RIGHT, direction.x > 0);
        flags.set(InputFlags::UP, direction.y < 0);
        flags.set(InputFlags::DOWN, direction.y > 0);
        self.update_input_flags_moveonly(flags);

        self.gamepadmove = true;
        self.move_delta(direction);
        true
    }

    // -------------------------------------------------------------------------
    // Input flags
    // -------------------------------------------------------------------------

    /// Replace the full flag set. Returns true if anything changed.
    pub fn update_input_flags(&mut self, flags: InputFlags) -> bool {
        if flags == self.inputflags {
            return false;
        }
        self.inputflags = flags;
        true
    }

    /// Replace only the movement bits.
    pub fn update_input_flags_moveonly(&mut self, flags: InputFlags) -> bool {
        self.update_input_flags(self.inputflags.merge_moveflags(flags))
    }

    /// Set or clear the flag for one key. Returns true if it changed,
    /// false for keys with no sustained flag.
    pub fn set_input_flag(&mut self, key: Key, pressed: bool) -> bool {
        let Some(flag) = key.flag() else {
            return false;
        };
        let mut newflags = self.inputflags;
        newflags.set(flag, pressed);
        self.update_input_flags(newflags)
    }

    /// Update a gamepad axis. Returns true if the value changed.
    pub fn set_axis_lr(&mut self, value: u16) -> bool {
        let new = value as i16;
        if self.axis_lr == new {
            return false;
        }
        self.axis_lr = new;
        true
    }

    /// Update a gamepad axis. Returns true if the value changed.
    pub fn set_axis_ud(&mut self, value: u16) -> bool {
        let new = value as i16;
        if self.axis_ud == new {
            return false;
        }
        self.axis_ud = new;
        true
    }

    // -------------------------------------------------------------------------
    // Shooting / vulnerability queries
    // -------------------------------------------------------------------------

    /// Whether the shot stream should fire this frame.
    ///
    /// `extra` gates weapons that must not fire while dead or invulnerable.
    pub fn should_shoot(&self, extra: bool, dialog_active: bool, frame: i32) -> bool {
        self.inputflags.contains(InputFlags::SHOT)
            && !dialog_active
            && (!extra || (frame - self.recovery >= 0 && self.deathtime >= -1))
    }

    /// True while the bomb invulnerability window is open.
    #[inline]
    pub fn bombing(&self, frame: i32) -> bool {
        frame - self.recovery < 0
    }

    /// True while any invulnerability (bomb or post-death) is active.
    #[inline]
    pub fn invulnerable(&self, frame: i32) -> bool {
        frame - self.recovery.abs() < 0
    }

    // -------------------------------------------------------------------------
    // Death
    // -------------------------------------------------------------------------

    /// The player got hit. Opens the deathbomb window; the actual death
    /// is resolved by the stage once the window closes.
    ///
    /// No-op while already dying or invulnerable.
    pub fn death(&mut self, frame: i32, effects: &mut EffectSink) {
        if self.deathtime == -1 && frame - self.recovery.abs() > 0 {
            effects.push(frame, StageEffect::Sound("death"));
            effects.push(
                frame,
                StageEffect::Particles {
                    pos: self.pos,
                    kind: "flare",
                    count: 20,
                },
            );
            effects.push(
                frame,
                StageEffect::Particles {
                    pos: self.pos,
                    kind: "blast",
                    count: 1,
                },
            );
            effects.push(frame, StageEffect::ClearHazards { now: false });

            self.deathtime = frame + DEATHBOMB_TIME;
        }
    }

    // -------------------------------------------------------------------------
    // Bomb cancellation
    // -------------------------------------------------------------------------

    /// Request that the running bomb ends `delay` frames from now.
    ///
    /// Repeated requests only ever shorten the bomb.
    pub fn cancel_bomb(&mut self, delay: i32, frame: i32) {
        if frame - self.recovery >= 0 {
            // not bombing
            return;
        }

        if self.bombcanceltime != 0 {
            let canceltime_queued = self.bombcanceltime + self.bombcanceldelay;
            let canceltime_requested = frame + delay;

            if canceltime_queued > canceltime_requested {
                self.bombcanceldelay -= canceltime_queued - canceltime_requested;
            }
        } else {
            self.bombcanceltime = frame;
            self.bombcanceldelay = delay;
        }
    }

    /// Normalized bomb timeline position for bomb-driven visuals.
    ///
    /// Returns `(t, speed)`: `t` counts 0..=BOMB_RECOVERY over the bomb's
    /// lifetime, compressed after a cancellation so the animation speeds
    /// up instead of jumping; `speed` is the current playback factor.
    /// `speed` never feeds back into simulation state.
    pub fn bomb_progress(&self, frame: i32) -> (i32, f64) {
        if frame - self.recovery >= 0 {
            return (BOMB_RECOVERY, 1.0);
        }

        let start_time = self.recovery - BOMB_RECOVERY;
        let end_time = self.recovery;

        if self.bombcanceltime == 0 || self.bombcanceltime + self.bombcanceldelay >= end_time {
            return (BOMB_RECOVERY - (end_time - frame), 1.0);
        }

        // The cancel carves the tail off the timeline: the part already
        // played keeps its pace, the remainder is squeezed into the
        // shortened window.
        let cancel_time = self.bombcanceltime + self.bombcanceldelay;
        let passed_time = self.bombcanceltime - start_time;

        let shortened_total_time = (BOMB_RECOVERY - passed_time) - (end_time - cancel_time);
        let shortened_passed_time = frame - self.bombcanceltime;

        let passed_fraction = passed_time as f64 / BOMB_RECOVERY as f64;
        let mut shortened_fraction = shortened_passed_time as f64 / shortened_total_time as f64;
        shortened_fraction *= 1.0 - passed_fraction;

        let speed = (BOMB_RECOVERY - passed_time) as f64 / shortened_total_time as f64;
        let t = (BOMB_RECOVERY as f64 * (passed_fraction + shortened_fraction)).round() as i32;
        (t, speed)
    }

    // -------------------------------------------------------------------------
    // Score and fragments
    // -------------------------------------------------------------------------

    /// Add points. Outside spell practice, crossing a score threshold
    /// drops a life or bomb fragment item.
    pub fn add_points(
        &mut self,
        points: u32,
        spell_practice: bool,
        frame: i32,
        effects: &mut EffectSink,
    ) {
        let old = self.points;
        self.points = self.points.wrapping_add(points);

        if !spell_practice {
            self.try_spawn_bonus_item(ItemKind::LifeFragment, old, PLR_SCORE_PER_LIFE_FRAG, frame, effects);
            self.try_spawn_bonus_item(ItemKind::BombFragment, old, PLR_SCORE_PER_BOMB_FRAG, frame, effects);
        }
    }

    fn try_spawn_bonus_item(
        &mut self,
        kind: ItemKind,
        oldpoints: u32,
        reqpoints: u32,
        frame: i32,
        effects: &mut EffectSink,
    ) {
        let items = self.points / reqpoints - oldpoints / reqpoints;

        if items > 0 {
            // Drop from above the player's column
            let pos = FixedVec2::new(self.pos.x, 0);
            effects.push(frame, StageEffect::SpawnItems { pos, kind, count: items });
        }
    }

    /// Register a graze: one counter tick plus points.
    pub fn graze(
        &mut self,
        pos: FixedVec2,
        points: u32,
        spell_practice: bool,
        frame: i32,
        effects: &mut EffectSink,
    ) {
        self.graze += 1;
        self.add_points(points, spell_practice, frame, effects);

        effects.push(frame, StageEffect::Sound("graze"));
        effects.push(
            frame,
            StageEffect::Particles {
                pos,
                kind: "flare",
                count: 5,
            },
        );
    }

    fn add_fragments(
        whole: &mut i32,
        frags_store: &mut i32,
        frags: i32,
        maxfrags: i32,
        maxwhole: i32,
        frame: i32,
        effects: &mut EffectSink,
        fragsnd: &'static str,
        upsnd: &'static str,
    ) {
        if *whole >= maxwhole {
            return;
        }

        *frags_store += frags;
        let up = *frags_store / maxfrags;

        *whole += up;
        *frags_store %= maxfrags;

        if up > 0 {
            effects.push(frame, StageEffect::Sound(upsnd));
        }

        if frags != 0 {
            effects.push(frame, StageEffect::Sound(fragsnd));
        }

        if *whole >= maxwhole {
            *whole = maxwhole;
            *frags_store = 0;
        }
    }

    /// Collect life fragments; every PLR_MAX_LIFE_FRAGMENTS becomes a life.
    pub fn add_life_fragments(&mut self, frags: i32, frame: i32, effects: &mut EffectSink) {
        Self::add_fragments(
            &mut self.lives,
            &mut self.life_fragments,
            frags,
            PLR_MAX_LIFE_FRAGMENTS,
            PLR_MAX_LIVES,
            frame,
            effects,
            "item_generic",
            "extra_life",
        );
    }

    /// Collect bomb fragments; every PLR_MAX_BOMB_FRAGMENTS becomes a bomb.
    pub fn add_bomb_fragments(&mut self, frags: i32, frame: i32, effects: &mut EffectSink) {
        Self::add_fragments(
            &mut self.bombs,
            &mut self.bomb_fragments,
            frags,
            PLR_MAX_BOMB_FRAGMENTS,
            PLR_MAX_BOMBS,
            frame,
            effects,
            "item_generic",
            "extra_bomb",
        );
    }

    /// Add a whole life (as a full set of fragments, shared cap logic).
    pub fn add_lives(&mut self, frame: i32, effects: &mut EffectSink) {
        self.add_life_fragments(PLR_MAX_LIFE_FRAGMENTS, frame, effects);
    }

    /// Add a whole bomb.
    pub fn add_bombs(&mut self, frame: i32, effects: &mut EffectSink) {
        self.add_bomb_fragments(PLR_MAX_BOMB_FRAGMENTS, frame, effects);
    }

    /// Advance the focus fade toward its target.
    pub fn update_focus(&mut self) {
        let target = if self.inputflags.contains(InputFlags::FOCUS) {
            FOCUS_MAX
        } else {
            0
        };

        if self.focus < target {
            self.focus += 1;
        } else if self.focus > target {
            self.focus -= 1;
        }
    }
}

/// Clamp helper kept for rule code operating on raw coordinates.
pub fn clamp_to_border(pos: FixedVec2) -> FixedVec2 {
    FixedVec2::new(
        fixed_clamp(pos.x, PLR_MIN_BORDER_DIST, VIEWPORT_W - PLR_MIN_BORDER_DIST),
        fixed_clamp(pos.y, PLR_MIN_BORDER_DIST, VIEWPORT_H - PLR_MIN_BORDER_DIST),
    )
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixed::to_fixed;

    #[test]
    fn test_new_player_defaults() {
        let plr = Player::new();
        assert_eq!(plr.lives, PLR_START_LIVES);
        assert_eq!(plr.bombs, PLR_START_BOMBS);
        assert_eq!(plr.deathtime, -1);
        assert_eq!(plr.continuetime, -1);
        assert_eq!(plr.power, 0);
        assert!(plr.pos.is_in_viewport());
    }

    #[test]
    fn test_set_power_clamps() {
        let mut plr = Player::new();
        let mut fx = EffectSink::new();

        assert!(plr.set_power(150, 0, &mut fx));
        assert_eq!(plr.power, 150);

        // Above cap
        assert!(plr.set_power(9999, 0, &mut fx));
        assert_eq!(plr.power, PLR_MAX_POWER);

        // Below zero
        assert!(plr.set_power(-50, 0, &mut fx));
        assert_eq!(plr.power, 0);

        // No change reports false
        assert!(!plr.set_power(0, 0, &mut fx));
    }

    #[test]
    fn test_full_power_announced_once() {
        let mut plr = Player::new();
        let mut fx = EffectSink::new();

        plr.set_power(PLR_MAX_POWER, 0, &mut fx);
        let announced = fx
            .take()
            .iter()
            .any(|e| e.effect == StageEffect::Sound("full_power"));
        assert!(announced);

        // Setting max again (already at max): nothing new
        plr.set_power(PLR_MAX_POWER + 100, 1, &mut fx);
        assert!(fx.is_empty());
    }

    #[test]
    fn test_move_clamps_to_border() {
        let mut plr = Player::new();
        plr.pos = FixedVec2::new(to_fixed(17.0), to_fixed(300.0));

        // Push hard left for many frames
        for _ in 0..100 {
            plr.move_delta(FixedVec2::new(-FIXED_ONE, 0));
        }

        assert_eq!(plr.pos.x, PLR_MIN_BORDER_DIST);
    }

    #[test]
    fn test_focus_halves_speed() {
        let mut fast = Player::new();
        let mut slow = Player::new();
        slow.inputflags.insert(InputFlags::FOCUS);

        let start = fast.pos;
        fast.move_delta(FixedVec2::new(FIXED_ONE, 0));
        slow.move_delta(FixedVec2::new(FIXED_ONE, 0));

        let fast_dx = fast.pos.x - start.x;
        let slow_dx = slow.pos.x - start.x;
        assert_eq!(fast_dx, PLR_MOVE_SPEED);
        assert_eq!(slow_dx, PLR_FOCUS_SPEED);
    }

    #[test]
    fn test_death_opens_deathbomb_window() {
        let mut plr = Player::new();
        let mut fx = EffectSink::new();

        plr.death(100, &mut fx);
        assert_eq!(plr.deathtime, 100 + DEATHBOMB_TIME);

        // Second hit while dying changes nothing
        plr.death(105, &mut fx);
        assert_eq!(plr.deathtime, 100 + DEATHBOMB_TIME);
    }

    #[test]
    fn test_death_ignored_while_invulnerable() {
        let mut plr = Player::new();
        let mut fx = EffectSink::new();

        // Bomb invulnerability active until frame 400
        plr.recovery = 400;
        plr.death(100, &mut fx);
        assert_eq!(plr.deathtime, -1);

        // Post-death invulnerability is the negative encoding
        plr.recovery = -400;
        plr.death(100, &mut fx);
        assert_eq!(plr.deathtime, -1);
    }

    #[test]
    fn test_bomb_progress_uncancelled() {
        let mut plr = Player::new();

        // Not bombing: progress pinned at the end
        assert_eq!(plr.bomb_progress(50), (BOMB_RECOVERY, 1.0));

        // Bomb started at frame 100
        plr.recovery = 100 + BOMB_RECOVERY;
        assert_eq!(plr.bomb_progress(100), (0, 1.0));
        assert_eq!(plr.bomb_progress(250), (150, 1.0));
    }

    #[test]
    fn test_bomb_progress_cancelled_monotonic() {
        let mut plr = Player::new();
        plr.recovery = 100 + BOMB_RECOVERY;

        // Cancel at frame 150 with a 30 frame tail
        plr.cancel_bomb(30, 150);
        assert_eq!(plr.bombcanceltime, 150);
        assert_eq!(plr.bombcanceldelay, 30);

        // Progress must be monotonically nondecreasing and speed > 1
        let mut last_t = 0;
        for frame in 150..180 {
            let (t, speed) = plr.bomb_progress(frame);
            assert!(t >= last_t, "progress went backwards at frame {}", frame);
            assert!(speed > 1.0);
            last_t = t;
        }
    }

    #[test]
    fn test_cancel_bomb_only_shortens() {
        let mut plr = Player::new();
        plr.recovery = 100 + BOMB_RECOVERY;

        plr.cancel_bomb(30, 150);
        let queued = plr.bombcanceltime + plr.bombcanceldelay;

        // A later request for an even later time is ignored
        plr.cancel_bomb(120, 151);
        assert_eq!(plr.bombcanceltime + plr.bombcanceldelay, queued);

        // An earlier request pulls the cancel in
        plr.cancel_bomb(5, 152);
        assert!(plr.bombcanceltime + plr.bombcanceldelay < queued);
    }

    #[test]
    fn test_cancel_bomb_noop_when_not_bombing() {
        let mut plr = Player::new();
        plr.cancel_bomb(30, 100);
        assert_eq!(plr.bombcanceltime, 0);
        assert_eq!(plr.bombcanceldelay, 0);
    }

    #[test]
    fn test_life_fragments_roll_over() {
        let mut plr = Player::new();
        let mut fx = EffectSink::new();

        plr.add_life_fragments(PLR_MAX_LIFE_FRAGMENTS + 2, 0, &mut fx);
        assert_eq!(plr.lives, PLR_START_LIVES + 1);
        assert_eq!(plr.life_fragments, 2);
    }

    #[test]
    fn test_fragments_capped_at_max() {
        let mut plr = Player::new();
        let mut fx = EffectSink::new();

        plr.lives = PLR_MAX_LIVES;
        plr.add_life_fragments(3, 0, &mut fx);
        // At the cap: fragments are not even accumulated
        assert_eq!(plr.lives, PLR_MAX_LIVES);
        assert_eq!(plr.life_fragments, 0);

        plr.bombs = PLR_MAX_BOMBS - 1;
        plr.add_bomb_fragments(PLR_MAX_BOMB_FRAGMENTS * 3, 0, &mut fx);
        assert_eq!(plr.bombs, PLR_MAX_BOMBS);
        assert_eq!(plr.bomb_fragments, 0);
    }

    #[test]
    fn test_score_threshold_drops_fragment_item() {
        let mut plr = Player::new();
        let mut fx = EffectSink::new();

        plr.add_points(PLR_SCORE_PER_BOMB_FRAG - 1, false, 0, &mut fx);
        assert!(fx.take().is_empty());

        plr.add_points(2, false, 1, &mut fx);
        let events = fx.take();
        assert!(events.iter().any(|e| matches!(
            e.effect,
            StageEffect::SpawnItems {
                kind: ItemKind::BombFragment,
                count: 1,
                ..
            }
        )));
    }

    #[test]
    fn test_no_bonus_items_in_spell_practice() {
        let mut plr = Player::new();
        let mut fx = EffectSink::new();

        plr.add_points(PLR_SCORE_PER_LIFE_FRAG * 2, true, 0, &mut fx);
        assert!(fx
            .take()
            .iter()
            .all(|e| !matches!(e.effect, StageEffect::SpawnItems { .. })));
    }

    #[test]
    fn test_input_flag_edges() {
        let mut plr = Player::new();

        assert!(plr.set_input_flag(Key::Left, true));
        assert!(plr.inputflags.contains(InputFlags::LEFT));

        // Same state again: not useful
        assert!(!plr.set_input_flag(Key::Left, true));

        assert!(plr.set_input_flag(Key::Left, false));
        assert!(!plr.inputflags.contains(InputFlags::LEFT));

        // Keys without flags are never useful here
        assert!(!plr.set_input_flag(Key::Bomb, true));
    }

    #[test]
    fn test_gamepad_axis_overrides_keys() {
        let mut plr = Player::new();
        plr.inputflags.insert(InputFlags::SHOT);
        plr.set_axis_lr(0x8000); // -32768, hard left

        let before = plr.pos;
        plr.apply_movement();

        assert!(plr.gamepadmove);
        assert!(plr.pos.x < before.x);
        // Non-movement flags survive
        assert!(plr.inputflags.contains(InputFlags::SHOT));
        assert!(plr.inputflags.contains(InputFlags::LEFT));

        // Releasing the stick clears the synthesized movement flags
        plr.set_axis_lr(0);
        plr.apply_movement();
        assert!(!plr.gamepadmove);
        assert!(!plr.inputflags.contains(InputFlags::LEFT));
    }

    #[test]
    fn test_focus_fade() {
        let mut plr = Player::new();
        plr.inputflags.insert(InputFlags::FOCUS);

        for _ in 0..FOCUS_MAX + 10 {
            plr.update_focus();
        }
        assert_eq!(plr.focus, FOCUS_MAX);

        plr.inputflags.remove(InputFlags::FOCUS);
        plr.update_focus();
        assert_eq!(plr.focus, FOCUS_MAX - 1);
    }

    #[test]
    fn test_should_shoot() {
        let mut plr = Player::new();
        assert!(!plr.should_shoot(false, false, 100));

        plr.inputflags.insert(InputFlags::SHOT);
        assert!(plr.should_shoot(false, false, 100));

        // Dialog blocks shooting
        assert!(!plr.should_shoot(false, true, 100));

        // Extra weapons stay quiet while bombing
        plr.recovery = 400;
        assert!(plr.should_shoot(false, false, 100));
        assert!(!plr.should_shoot(true, false, 100));
    }
}
