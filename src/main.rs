//! Spellframe Demo
//!
//! Records a scripted boss encounter, serializes the replay, reads it
//! back, and plays it to verify that both runs end in the same state.

use anyhow::{bail, Result};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use spellframe::core::fixed::{FIXED_SCALE, FPS};
use spellframe::core::vec2::FixedVec2;
use spellframe::game::boss::{generic_move_rule, idle_rule, AttackInfo, AttackType, Boss};
use spellframe::game::input::{InputEvent, Key};
use spellframe::game::progress::SpellId;
use spellframe::game::stage::{Difficulty, ReplayMode, StageMode, StageSim};
use spellframe::replay::format::{read_replay, write_replay, ReadMode};
use spellframe::replay::{Replay, ReplayStage, REPLAY_FLAG_CLEAR};
use spellframe::VERSION;

// =============================================================================
// DEMO STAGE CONTENT
// =============================================================================

static OPENING_MOVE: AttackInfo = AttackInfo {
    kind: AttackType::Move,
    name: "Opening Move",
    timeout: 2 * FPS,
    hp: 0,
    rule: generic_move_rule,
    pos_dest: Some(FixedVec2::new(240 << FIXED_SCALE, 120 << FIXED_SCALE)),
    spell_id: None,
};

static VOLLEY: AttackInfo = AttackInfo {
    kind: AttackType::Normal,
    name: "Warmup Volley",
    timeout: 20 * FPS,
    hp: 4500,
    rule: idle_rule,
    pos_dest: None,
    spell_id: None,
};

static MOONLIGHT_SIGN: AttackInfo = AttackInfo {
    kind: AttackType::Spellcard,
    name: "Moonlight Sign ~ Demo Lunacy",
    timeout: 30 * FPS,
    hp: 6000,
    rule: idle_rule,
    pos_dest: None,
    spell_id: Some(SpellId(101)),
};

fn demo_boss() -> Boss {
    let spawn = FixedVec2::new(240 << FIXED_SCALE, -40 << FIXED_SCALE);
    let mut boss = Boss::new("Sagume", spawn, 0);
    boss.add_attack_from_info(&OPENING_MOVE);
    boss.add_attack_from_info(&VOLLEY);
    boss.add_attack_from_info(&MOONLIGHT_SIGN);
    boss
}

/// Canned player inputs, keyed by frame number.
fn scripted_events(frame: i32) -> &'static [InputEvent] {
    match frame {
        5 => &[InputEvent::Press(Key::Shot)],
        30 => &[InputEvent::AxisLr(-25000)],
        90 => &[InputEvent::AxisLr(0), InputEvent::Press(Key::Left)],
        150 => &[InputEvent::Release(Key::Left), InputEvent::Press(Key::Focus)],
        240 => &[InputEvent::Release(Key::Focus)],
        300 | 900 | 1500 => &[InputEvent::Press(Key::Bomb)],
        305 | 905 | 1505 => &[InputEvent::Release(Key::Bomb)],
        _ => &[],
    }
}

// =============================================================================
// RECORD / PLAYBACK
// =============================================================================

fn record_run(seed: u32) -> (Replay, i32, u16) {
    let mut sim = StageSim::new(1, Difficulty::Normal, StageMode::Story, ReplayMode::Record, seed);
    let mut stage = ReplayStage::begin(&sim);
    sim.spawn_boss(demo_boss());

    let mut frames = 0;
    let defeated = loop {
        for &ev in scripted_events(sim.frame) {
            sim.player_event_with_replay(ev);
        }
        let result = sim.frame();
        frames += 1;

        if let Some(fled) = result.boss_defeated {
            break Some(fled);
        }
        if result.game_over || sim.frame >= 120 * FPS {
            break None;
        }
    };

    let checksum = sim.state_checksum();
    stage.commit(&sim);

    if defeated.is_some() {
        stage.flags |= REPLAY_FLAG_CLEAR;
    }
    let mut replay = Replay::new("DEMO");
    replay.stages.push(stage);
    replay.fix_flags();

    match defeated {
        Some(true) => info!(frames, "boss fled"),
        Some(false) => info!(frames, "boss defeated"),
        None => info!(frames, "stage ended without a boss kill"),
    }

    (replay, frames, checksum)
}

fn playback_run(replay: &Replay, frames: i32) -> Result<(u16, bool)> {
    let Some(stage) = replay.stages.first() else {
        bail!("replay has no stages");
    };
    let Some(mut sim) = stage.make_sim(StageMode::Story) else {
        bail!("replay stage metadata is invalid");
    };
    sim.spawn_boss(demo_boss());

    for _ in 0..frames {
        sim.frame();
    }

    Ok((sim.state_checksum(), sim.desynced))
}

// =============================================================================
// MAIN
// =============================================================================

fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("spellframe v{}", VERSION);

    let seed = 0x00C0_FFEE;
    let (replay, frames, recorded_checksum) = record_run(seed);
    info!(
        seed,
        frames,
        events = replay.num_events(),
        checksum = format!("{recorded_checksum:04x}"),
        "recording finished"
    );

    // Serialize, then play back the decoded copy
    let mut buf = Vec::new();
    write_replay(&mut buf, &replay, true)?;
    info!(bytes = buf.len(), "replay written");

    let meta = read_replay(&mut buf.as_slice(), ReadMode::Meta)?;
    info!(
        player = %meta.playername,
        stages = meta.stages.len(),
        "replay metadata"
    );

    let decoded = read_replay(&mut buf.as_slice(), ReadMode::Full)?;
    let (playback_checksum, desynced) = playback_run(&decoded, frames)?;

    if desynced {
        warn!("playback desynced at a checkpoint");
    }
    if playback_checksum != recorded_checksum {
        bail!(
            "final state mismatch: recorded {recorded_checksum:04x}, played back {playback_checksum:04x}"
        );
    }

    info!(
        checksum = format!("{playback_checksum:04x}"),
        "playback matched the recording"
    );
    Ok(())
}
