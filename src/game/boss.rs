//! Boss Encounters
//!
//! A boss is an entity with an ordered list of attacks. Exactly one
//! attack is current at any time; it runs from a scripted birth, through
//! per-frame ticks, to a death event, then the boss advances to the next
//! attack (skipping extra spells once any spell has been failed). When
//! the list is exhausted the boss is defeated, or flees if its final
//! attack is a plain movement.
//!
//! Attack behavior lives in plain function pointers so the whole
//! encounter stays deterministic and copy-free; scripted content
//! registers `AttackRule` callbacks that read and mutate the boss and
//! the simulation context.

use serde::{Serialize, Deserialize};
use tracing::debug;

use crate::core::fixed::{Fixed, FIXED_ONE, FPS};
use crate::core::vec2::FixedVec2;
use crate::game::effects::{ItemKind, StageEffect};
use crate::game::progress::SpellId;
use crate::game::stage::{ReplayMode, SimContext, StageMode};

// =============================================================================
// CONSTANTS
// =============================================================================

/// Frames between an attack becoming current and its logic starting.
pub const ATTACK_START_DELAY: i32 = 60;
/// Extra spells get a longer charge-up.
pub const ATTACK_START_DELAY_EXTRA: i32 = 150;

/// Post-attack delay before the boss moves on, by attack type.
pub const ATTACK_END_DELAY: i32 = 20;
pub const ATTACK_END_DELAY_MOVE: i32 = 0;
pub const ATTACK_END_DELAY_SPELL: i32 = 60;
pub const ATTACK_END_DELAY_SURV: i32 = 20;
pub const ATTACK_END_DELAY_EXTRA: i32 = 150;
/// Added breathing room before an extra spell starts.
pub const ATTACK_END_DELAY_PRE_EXTRA: i32 = 60;

/// Delay between the final attack ending and the boss despawning.
pub const BOSS_DEATH_DELAY: i32 = 120;

/// Movement rules home in on their destination at this rate per frame.
const MOVE_LERP_RATE: Fixed = FIXED_ONE / 10;

// =============================================================================
// ATTACK TYPES
// =============================================================================

/// Category of a boss attack.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttackType {
    /// Regular (non-spell) pattern.
    Normal,
    /// Pure repositioning, no combat.
    Move,
    /// Named spellcard with a capture bonus.
    Spellcard,
    /// Spellcard cleared by surviving the timer; the boss is invulnerable.
    SurvivalSpell,
    /// Optional bonus spellcard, skipped after any earlier spell failure.
    ExtraSpell,
}

impl AttackType {
    pub fn is_spell(self) -> bool {
        matches!(
            self,
            AttackType::Spellcard | AttackType::SurvivalSpell | AttackType::ExtraSpell
        )
    }

    /// Healthbar tint the renderer uses for this attack type.
    pub fn healthbar_color(self) -> [f32; 3] {
        match self {
            AttackType::Normal | AttackType::Move => [1.00, 0.55, 0.45],
            AttackType::Spellcard => [0.30, 0.70, 1.00],
            AttackType::SurvivalSpell => [1.00, 0.00, 0.10],
            AttackType::ExtraSpell => [1.00, 0.30, 0.20],
        }
    }
}

/// Lifecycle event passed to an attack rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttackPhase {
    /// The attack just became current. Fires once, before the start delay.
    Birth,
    /// Per-frame update; the payload is frames since `starttime`
    /// (negative during the charge-up).
    Tick(i32),
    /// The attack finished (cleared, failed, or boss defeated).
    Death,
}

/// Scripted behavior of one attack.
pub type AttackRule = fn(&mut Boss, &mut SimContext<'_>, AttackPhase);

/// Boss-wide behavior, run every frame regardless of the current attack.
/// The payload is frames since the boss was spawned.
pub type BossRule = fn(&mut Boss, &mut SimContext<'_>, i32);

/// Static description of an attack, as declared by stage content.
#[derive(Clone, Copy, Debug)]
pub struct AttackInfo {
    pub kind: AttackType,
    pub name: &'static str,
    /// Time limit in frames. Zero means no timeout.
    pub timeout: i32,
    pub hp: i32,
    pub rule: AttackRule,
    /// Where a movement rule should park the boss.
    pub pos_dest: Option<FixedVec2>,
    /// Spellcards carry a stable id for progress tracking.
    pub spell_id: Option<SpellId>,
}

/// A live attack instance.
pub struct Attack {
    pub kind: AttackType,
    pub name: String,
    pub timeout: i32,
    pub maxhp: i32,
    pub hp: i32,
    /// Frame at which the rule starts ticking with non-negative time.
    pub starttime: i32,
    /// Frame at which the boss advances past this attack; 0 = still running.
    pub endtime: i32,
    /// Frame at which the attack was failed (bombed or timed out); 0 = not failed.
    pub failtime: i32,
    pub finished: bool,
    /// Base value the capture bonus is derived from.
    pub scorevalue: i64,
    pub rule: AttackRule,
    pub info: Option<&'static AttackInfo>,
}

impl Attack {
    fn new(
        kind: AttackType,
        name: &str,
        timeout: i32,
        hp: i32,
        rule: AttackRule,
        info: Option<&'static AttackInfo>,
    ) -> Self {
        let mut scorevalue = 2000 + (hp as i64) * 6 / 10;
        if kind == AttackType::ExtraSpell {
            scorevalue = scorevalue * 5 / 4;
        }

        Self {
            kind,
            name: name.to_string(),
            timeout,
            maxhp: hp,
            hp,
            starttime: 0,
            endtime: 0,
            failtime: 0,
            finished: false,
            scorevalue,
            rule,
            info,
        }
    }

    /// True once the timer ran out (survival spells clear this way).
    /// The window is inclusive: the attack still runs on its last frame.
    pub fn timed_out(&self, frame: i32) -> bool {
        self.timeout > 0 && frame > self.starttime + self.timeout
    }
}

// =============================================================================
// SPELL BONUS
// =============================================================================

/// Score breakdown awarded when a spellcard ends.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpellBonus {
    pub clear: i64,
    pub time: i64,
    pub endurance: i64,
    pub survival: i64,
    pub total: i64,
    /// True if the spell was captured (never failed).
    pub captured: bool,
}

impl SpellBonus {
    /// Compute the bonus for an ending spellcard at the given frame.
    ///
    /// The base value scales with max hp; a capture pays half of it
    /// outright plus a bonus for the time left on the clock. A fail
    /// still pays a reduced time component and a small endurance reward
    /// for how long the player lasted before failing. Survival spells
    /// pay extra since there is no hp to reward.
    pub fn compute(attack: &Attack, diff_level: i64, frame: i32) -> Self {
        let sv = attack.scorevalue;
        let captured = attack.failtime == 0;
        let timeout = attack.timeout.max(1) as i64;
        let time_left = (attack.starttime + attack.timeout - frame).max(0) as i64;

        let clear = if captured { sv / 2 } else { 0 };

        let mut time = sv * time_left / timeout;
        if !captured {
            time /= 4;
        }

        let endurance = if captured {
            0
        } else {
            let lasted = (attack.failtime - attack.starttime).max(0) as i64;
            sv * lasted / (10 * timeout)
        };

        let survival = if captured && attack.kind == AttackType::SurvivalSpell {
            sv * (50 * FPS as i64 + timeout) / (50 * FPS as i64)
        } else {
            0
        };

        let total = (clear + time + endurance + survival) * (6 + 2 * diff_level) / 10;

        Self {
            clear,
            time,
            endurance,
            survival,
            total,
            captured,
        }
    }
}

// =============================================================================
// BOSS
// =============================================================================

/// Outcome of one frame of boss processing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessResult {
    Alive,
    /// The boss is gone. `fled` means it left via a final movement
    /// attack instead of being destroyed.
    Defeated { fled: bool },
}

pub struct Boss {
    pub name: String,
    pub pos: FixedVec2,
    pub attacks: Vec<Attack>,
    /// Index of the current attack.
    pub current: Option<usize>,
    /// Frame the boss was spawned at.
    pub birthtime: i32,
    /// Spells failed so far; any failure locks out extra spells.
    pub failed_spells: u32,
    pub lastdamageframe: i32,
    pub global_rule: Option<BossRule>,
    /// Renderer theme colors; not part of the simulated state.
    pub glow_color: [f32; 3],
    pub shadow_color: [f32; 3],
}

impl Boss {
    pub fn new(name: &str, pos: FixedVec2, birthtime: i32) -> Self {
        Self {
            name: name.to_string(),
            pos,
            attacks: Vec::new(),
            current: None,
            birthtime,
            failed_spells: 0,
            lastdamageframe: birthtime,
            global_rule: None,
            glow_color: [0.2, 0.4, 0.5],
            shadow_color: [0.0, 0.0, 0.0],
        }
    }

    /// Append an ad-hoc attack. Returns its index.
    pub fn add_attack(
        &mut self,
        kind: AttackType,
        name: &str,
        timeout: i32,
        hp: i32,
        rule: AttackRule,
    ) -> usize {
        self.attacks.push(Attack::new(kind, name, timeout, hp, rule, None));
        self.attacks.len() - 1
    }

    /// Append an attack declared in static stage content.
    ///
    /// A declared destination gets a companion movement attack prepended,
    /// stamped with the same info block so the skip rule treats the pair
    /// as one unit.
    pub fn add_attack_from_info(&mut self, info: &'static AttackInfo) -> usize {
        if info.kind != AttackType::Move && info.pos_dest.is_some() {
            self.attacks.push(Attack::new(
                AttackType::Move,
                "Generic Move",
                1,
                0,
                generic_move_rule,
                Some(info),
            ));
        }
        self.attacks
            .push(Attack::new(info.kind, info.name, info.timeout, info.hp, info.rule, Some(info)));
        self.attacks.len() - 1
    }

    /// Extra spells become unreachable once any spell has been failed.
    /// A movement attack attached to an extra spell is skipped with it.
    pub fn should_skip(&self, idx: usize) -> bool {
        if self.failed_spells == 0 {
            return false;
        }
        let a = &self.attacks[idx];
        a.kind == AttackType::ExtraSpell
            || a.info.map_or(false, |i| i.kind == AttackType::ExtraSpell)
    }

    /// Index of the last attack that will actually run.
    pub fn final_attack_index(&self) -> Option<usize> {
        (0..self.attacks.len()).rev().find(|&i| !self.should_skip(i))
    }

    /// Next runnable attack after `idx`.
    fn next_attack_index(&self, idx: usize) -> Option<usize> {
        (idx + 1..self.attacks.len()).find(|&i| !self.should_skip(i))
    }

    pub fn is_final(&self, idx: usize) -> bool {
        self.final_attack_index() == Some(idx)
    }

    fn current_attack(&self) -> Option<&Attack> {
        self.current.map(|i| &self.attacks[i])
    }

    /// The final attack ended and the despawn countdown is running.
    pub fn is_dying(&self) -> bool {
        match self.current {
            Some(idx) => {
                let a = &self.attacks[idx];
                a.finished && a.endtime != 0 && self.is_final(idx)
            }
            None => false,
        }
    }

    /// Dying via a final movement attack rather than destruction.
    pub fn is_fleeing(&self) -> bool {
        match self.current {
            Some(idx) => self.attacks[idx].kind == AttackType::Move && self.is_final(idx),
            None => false,
        }
    }

    /// Whether player shots can hurt the boss right now.
    pub fn is_vulnerable(&self, frame: i32) -> bool {
        match self.current_attack() {
            Some(a) => {
                a.kind != AttackType::Move
                    && a.kind != AttackType::SurvivalSpell
                    && a.starttime < frame
                    && !a.finished
            }
            None => false,
        }
    }

    /// Apply damage from the player. Returns true if any was dealt.
    pub fn damage(&mut self, frame: i32, dmg: i32) -> bool {
        if !self.is_vulnerable(frame) {
            return false;
        }

        if let Some(idx) = self.current {
            let a = &mut self.attacks[idx];
            a.hp -= dmg;

            // Rate-limited so the hit flash doesn't strobe
            if dmg > 0 && frame - self.lastdamageframe > 2 {
                self.lastdamageframe = frame;
            }
            return dmg > 0;
        }
        false
    }
}

// =============================================================================
// ATTACK LIFECYCLE
// =============================================================================

fn attack_end_delay(boss: &Boss, idx: usize) -> i32 {
    let mut delay = if boss.is_final(idx) {
        BOSS_DEATH_DELAY
    } else {
        match boss.attacks[idx].kind {
            AttackType::Spellcard => ATTACK_END_DELAY_SPELL,
            AttackType::SurvivalSpell => ATTACK_END_DELAY_SURV,
            AttackType::ExtraSpell => ATTACK_END_DELAY_EXTRA,
            AttackType::Move => ATTACK_END_DELAY_MOVE,
            AttackType::Normal => ATTACK_END_DELAY,
        }
    };

    if delay != 0 {
        if let Some(next) = boss.next_attack_index(idx) {
            if boss.attacks[next].kind == AttackType::ExtraSpell {
                delay += ATTACK_END_DELAY_PRE_EXTRA;
            }
        }
    }

    delay
}

/// Make the attack at `idx` current and run its birth event.
pub fn start_attack(boss: &mut Boss, ctx: &mut SimContext<'_>, idx: usize) {
    let extra = boss.attacks[idx].kind == AttackType::ExtraSpell;
    let is_spell = boss.attacks[idx].kind.is_spell();
    let start_delay = if extra {
        ATTACK_START_DELAY_EXTRA
    } else {
        ATTACK_START_DELAY
    };

    debug!(boss = %boss.name, attack = %boss.attacks[idx].name, "attack starting");

    if ctx.replay_mode == ReplayMode::Record {
        if let Some(spell) = boss.attacks[idx].info.and_then(|i| i.spell_id) {
            let cont = ctx.player.continues_used;
            let p = ctx.progress.get_or_create(spell, ctx.diff.level() as u8);
            p.num_played += 1;
            // Practice unlocks are earned in story runs only.
            if !p.unlocked && cont == 0 && ctx.stage_mode == StageMode::Story {
                p.unlocked = true;
            }
        }
    }

    boss.attacks[idx].starttime = ctx.frame + start_delay;
    boss.current = Some(idx);

    let rule = boss.attacks[idx].rule;
    rule(boss, ctx, AttackPhase::Birth);

    if is_spell {
        ctx.effects.push(ctx.frame, StageEffect::Sound("charge_spell"));
    } else {
        ctx.effects.push(ctx.frame, StageEffect::Sound("charge_generic"));
    }

    // Active bombs must not eat into the fresh attack
    ctx.player.cancel_bomb(start_delay, ctx.frame);
    ctx.effects.push(ctx.frame, StageEffect::ClearHazards { now: false });
}

/// End the current attack: run its death event, settle the spell bonus
/// and progress, drop items, and schedule the advance.
pub fn finish_current_attack(boss: &mut Boss, ctx: &mut SimContext<'_>) {
    let idx = match boss.current {
        Some(idx) => idx,
        None => return,
    };

    boss.attacks[idx].hp = 0;
    boss.attacks[idx].finished = true;

    let rule = boss.attacks[idx].rule;
    rule(boss, ctx, AttackPhase::Death);

    let kind = boss.attacks[idx].kind;
    if kind != AttackType::Move {
        ctx.effects.push(ctx.frame, StageEffect::ClearHazards { now: false });
    }

    if kind.is_spell() {
        let bonus = SpellBonus::compute(&boss.attacks[idx], ctx.diff.level() as i64, ctx.frame);
        let spell_practice = ctx.stage_mode == StageMode::SpellPractice;
        ctx.player
            .add_points(bonus.total.max(0) as u32, spell_practice, ctx.frame, ctx.effects);
        ctx.effects.push(
            ctx.frame,
            StageEffect::BonusAnnounce {
                total: bonus.total,
                clear: bonus.captured,
            },
        );

        if ctx.replay_mode == ReplayMode::Record {
            if let Some(spell) = boss.attacks[idx].info.and_then(|i| i.spell_id) {
                let p = ctx.progress.get_or_create(spell, ctx.diff.level() as u8);
                if bonus.captured {
                    p.num_cleared += 1;
                }
            }
        }

        if !bonus.captured && kind != AttackType::ExtraSpell {
            boss.failed_spells += 1;
        }

        // Captures shower the player with pickups; survivals pay via
        // the bonus alone
        if kind != AttackType::SurvivalSpell {
            let base: u32 = if bonus.captured { 12 } else { 6 };
            let extra = kind == AttackType::ExtraSpell;
            let power = if extra { base * 5 / 4 } else { base };
            let points = if extra { base * 2 } else { base };

            ctx.effects.push(
                ctx.frame,
                StageEffect::SpawnItems {
                    pos: boss.pos,
                    kind: ItemKind::Power,
                    count: power,
                },
            );
            ctx.effects.push(
                ctx.frame,
                StageEffect::SpawnItems {
                    pos: boss.pos,
                    kind: ItemKind::Point,
                    count: points,
                },
            );
        }
    }

    boss.attacks[idx].endtime = ctx.frame + attack_end_delay(boss, idx);
}

// =============================================================================
// PER-FRAME PROCESSING
// =============================================================================

/// Advance the boss by one frame.
pub fn process_boss(boss: &mut Boss, ctx: &mut SimContext<'_>) -> ProcessResult {
    if let Some(global) = boss.global_rule {
        global(boss, ctx, ctx.frame - boss.birthtime);
    }

    let idx = match boss.current {
        Some(idx) => idx,
        None => return ProcessResult::Alive,
    };

    if ctx.dialog {
        return ProcessResult::Alive;
    }

    let (kind, starttime, endtime, timeout, finished) = {
        let a = &boss.attacks[idx];
        (a.kind, a.starttime, a.endtime, a.timeout, a.finished)
    };
    let time = ctx.frame - starttime;

    // Ambient dressing, counts only; never draws from the RNG
    if kind != AttackType::ExtraSpell && ctx.frame % 13 == 0 {
        ctx.effects.push(
            ctx.frame,
            StageEffect::Particles { pos: boss.pos, kind: "smoke", count: 1 },
        );
    }
    let spell_active = kind.is_spell() && endtime == 0 && time >= 0 && !finished;
    if spell_active || boss.is_dying() {
        let period = if kind == AttackType::ExtraSpell { 4 } else { 2 };
        if ctx.frame % period == 0 {
            ctx.effects.push(
                ctx.frame,
                StageEffect::Particles { pos: boss.pos, kind: "boss_glow", count: 1 },
            );
        }
    }

    // Audible countdown over the last seconds of a timed attack
    if endtime == 0 && !finished && kind != AttackType::Move && timeout > 0 {
        let remaining = starttime + timeout - ctx.frame;
        if remaining > 0 && remaining % FPS == 0 {
            if remaining <= 6 * FPS {
                ctx.effects.push(ctx.frame, StageEffect::Sound("timeout_critical"));
            } else if remaining <= 11 * FPS {
                ctx.effects.push(ctx.frame, StageEffect::Sound("timeout_warning"));
            }
        }
    }

    if endtime == 0 {
        let rule = boss.attacks[idx].rule;
        rule(boss, ctx, AttackPhase::Tick(time));
    }

    // Extra spells rumble while active
    if kind == AttackType::ExtraSpell && endtime == 0 && time >= 0 && time % FPS == 0 {
        ctx.effects.push(ctx.frame, StageEffect::ScreenShake(5.0));
    }

    let a = &boss.attacks[idx];
    let timedout = a.timed_out(ctx.frame);
    let over = finished && ctx.frame >= endtime;

    // Movement attacks carry hp 0 and only ever end on their timer
    if (kind != AttackType::Move && a.hp <= 0) || timedout {
        if !finished {
            if timedout && kind != AttackType::SurvivalSpell {
                boss.attacks[idx].failtime = ctx.frame;
            }
            finish_current_attack(boss, ctx);
        } else if kind != AttackType::Move || !boss.is_final(idx) {
            // Residual hazards keep getting swept while the attack winds down
            ctx.effects.push(ctx.frame, StageEffect::ClearHazards { now: true });
        }
    }

    if boss.is_dying() {
        let endtime = boss.attacks[idx].endtime;
        let t = (ctx.frame - endtime + BOSS_DEATH_DELAY) as f32 / BOSS_DEATH_DELAY as f32;

        ctx.effects.push(
            ctx.frame,
            StageEffect::Particles { pos: boss.pos, kind: "petal", count: 1 },
        );
        if kind != AttackType::ExtraSpell {
            ctx.effects
                .push(ctx.frame, StageEffect::ScreenShake(5.0 * (t + t * t + t * t * t)));
        }
        if ctx.frame == endtime - BOSS_DEATH_DELAY {
            ctx.effects.push(ctx.frame, StageEffect::Sound("boss_death"));
        }
        // Final flourish lands on the despawn frame itself
        if ctx.frame == endtime {
            ctx.effects.push(
                ctx.frame,
                StageEffect::Particles { pos: boss.pos, kind: "boss_glow", count: 10 },
            );
            ctx.effects.push(
                ctx.frame,
                StageEffect::Particles { pos: boss.pos, kind: "flare", count: 256 },
            );
            ctx.effects.push(
                ctx.frame,
                StageEffect::Particles { pos: boss.pos, kind: "blast", count: 2 },
            );
        }
    }

    if over {
        // In spell practice a failed attempt ends the run
        if ctx.stage_mode == StageMode::SpellPractice
            && kind != AttackType::Move
            && boss.attacks[idx].failtime != 0
        {
            ctx.game_over = true;
            return ProcessResult::Alive;
        }

        match boss.next_attack_index(idx) {
            Some(next) => {
                start_attack(boss, ctx, next);
            }
            None => {
                return boss_death(boss, ctx);
            }
        }
    }

    ProcessResult::Alive
}

fn boss_death(boss: &mut Boss, ctx: &mut SimContext<'_>) -> ProcessResult {
    let fled = match boss.final_attack_index() {
        Some(f) => boss.attacks[f].kind == AttackType::Move,
        None => {
            debug!(boss = %boss.name, "boss has no runnable attacks");
            false
        }
    };

    if !fled {
        ctx.effects.push(
            ctx.frame,
            StageEffect::Particles {
                pos: boss.pos,
                kind: "petal",
                count: 35,
            },
        );
        ctx.effects.push(ctx.frame, StageEffect::ClearHazards { now: true });
    }

    boss.current = None;
    ProcessResult::Defeated { fled }
}

// =============================================================================
// STOCK RULES
// =============================================================================

/// Movement attack: glide toward the destination declared in the
/// attack's info block.
pub fn generic_move_rule(boss: &mut Boss, _ctx: &mut SimContext<'_>, phase: AttackPhase) {
    if let AttackPhase::Tick(_) = phase {
        let dest = boss
            .current
            .and_then(|i| boss.attacks[i].info)
            .and_then(|i| i.pos_dest);
        if let Some(dest) = dest {
            boss.pos = boss.pos.lerp(dest, MOVE_LERP_RATE);
        }
    }
}

/// Rule that does nothing; useful for pure timer attacks and tests.
pub fn idle_rule(_boss: &mut Boss, _ctx: &mut SimContext<'_>, _phase: AttackPhase) {}

/// Dressing rule for extra spells: an expanding particle ring pulse.
/// Call it from the spell's own rule on each tick.
pub fn extra_ring_rule(boss: &mut Boss, ctx: &mut SimContext<'_>, phase: AttackPhase) {
    if let AttackPhase::Tick(t) = phase {
        if t >= 0 && t % 6 == 0 {
            ctx.effects.push(
                ctx.frame,
                StageEffect::Particles { pos: boss.pos, kind: "extra_ring", count: 20 },
            );
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
