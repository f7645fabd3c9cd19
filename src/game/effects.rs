//! Presentation Effects
//!
//! The simulation never talks to audio, rendering, or the item system
//! directly. It pushes effect requests into an [`EffectSink`] and the
//! frontend drains them once per frame. Effects carry no feedback into
//! the simulation, so a headless replay can simply discard them.

use serde::{Serialize, Deserialize};
use crate::core::vec2::FixedVec2;

/// Kinds of collectible items the simulation can request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemKind {
    Power,
    Point,
    Life,
    Bomb,
    LifeFragment,
    BombFragment,
}

/// A single presentation effect request.
///
/// Magnitudes are plain floats: they only feed the renderer and never
/// flow back into game state.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum StageEffect {
    /// Play a named sound.
    Sound(&'static str),

    /// Shake the viewport with the given magnitude.
    ScreenShake(f32),

    /// Flash the viewport (bomb, boss explosion).
    ScreenFlash(f32),

    /// Drop items at a position.
    SpawnItems {
        pos: FixedVec2,
        kind: ItemKind,
        count: u32,
    },

    /// Scatter a named particle effect.
    Particles {
        pos: FixedVec2,
        kind: &'static str,
        count: u32,
    },

    /// Clear all bullets and lasers on screen. `now` skips the
    /// turn-into-items animation.
    ClearHazards { now: bool },

    /// Show text on the playfield ("Full Power!", spellcard names).
    StageText { text: String },

    /// Announce a spell bonus total on the HUD.
    BonusAnnounce { total: i64, clear: bool },

    /// The player fired a bomb; the frontend picks visuals by shot mode.
    PlayerBomb { char_id: u8, shot_id: u8 },
}

/// An effect with the frame it was emitted on.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EffectEvent {
    /// Frame when the effect was requested
    pub frame: i32,
    /// Effect payload
    pub effect: StageEffect,
}

/// Collects effects during a frame; drained by the frontend afterwards.
#[derive(Clone, Debug, Default, Serialize)]
pub struct EffectSink {
    pending: Vec<EffectEvent>,
}

impl EffectSink {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
        }
    }

    /// Queue an effect for the current frame.
    pub fn push(&mut self, frame: i32, effect: StageEffect) {
        self.pending.push(EffectEvent { frame, effect });
    }

    /// Drain all pending effects, in emission order.
    pub fn take(&mut self) -> Vec<EffectEvent> {
        std::mem::take(&mut self.pending)
    }

    /// Number of queued effects.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_preserves_order() {
        let mut sink = EffectSink::new();
        sink.push(5, StageEffect::Sound("graze"));
        sink.push(5, StageEffect::ScreenShake(10.0));
        sink.push(6, StageEffect::Sound("death"));

        let events = sink.take();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].effect, StageEffect::Sound("graze"));
        assert_eq!(events[1].effect, StageEffect::ScreenShake(10.0));
        assert_eq!(events[2].frame, 6);

        // Drained
        assert!(sink.is_empty());
        assert!(sink.take().is_empty());
    }
}
