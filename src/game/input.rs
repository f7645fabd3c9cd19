//! Input Events and Key Flags
//!
//! Defines the game key set, the per-frame input flag bitset, and the
//! replay event vocabulary. Wire values are frozen: replays written by
//! older builds must keep decoding to the same events forever.

use serde::{Serialize, Deserialize};
use crate::core::fixed::Fixed;
use crate::core::vec2::FixedVec2;

// =============================================================================
// GAME KEYS
// =============================================================================

/// Logical game keys.
///
/// The discriminants are the wire encoding of press/release events.
/// Never reorder or renumber.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum Key {
    Up = 0,
    Down = 1,
    Left = 2,
    Right = 3,
    Focus = 4,
    Shot = 5,
    Skip = 6,
    Bomb = 7,
    Iddqd = 8,
    PowerUp = 9,
    PowerDown = 10,
}

impl Key {
    /// Decode from replay wire value.
    pub fn from_wire(value: u16) -> Option<Self> {
        Some(match value {
            0 => Key::Up,
            1 => Key::Down,
            2 => Key::Left,
            3 => Key::Right,
            4 => Key::Focus,
            5 => Key::Shot,
            6 => Key::Skip,
            7 => Key::Bomb,
            8 => Key::Iddqd,
            9 => Key::PowerUp,
            10 => Key::PowerDown,
            _ => return None,
        })
    }

    /// Encode to replay wire value.
    #[inline]
    pub fn to_wire(self) -> u16 {
        self as u16
    }

    /// Sustained input flag for this key, if it has one.
    ///
    /// Movement, focus, shot, and skip are level-triggered and tracked
    /// in [`InputFlags`]; bombs and power cheats are edge-triggered.
    pub fn flag(self) -> Option<InputFlags> {
        Some(match self {
            Key::Up => InputFlags::UP,
            Key::Down => InputFlags::DOWN,
            Key::Left => InputFlags::LEFT,
            Key::Right => InputFlags::RIGHT,
            Key::Focus => InputFlags::FOCUS,
            Key::Shot => InputFlags::SHOT,
            Key::Skip => InputFlags::SKIP,
            _ => return None,
        })
    }
}

// =============================================================================
// INPUT FLAGS
// =============================================================================

/// Bitset of currently held level-triggered keys.
///
/// Bit layout is frozen (replay event payload).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputFlags(pub u8);

impl InputFlags {
    pub const NONE: Self = Self(0);
    pub const UP: Self = Self(1);
    pub const DOWN: Self = Self(2);
    pub const LEFT: Self = Self(4);
    pub const RIGHT: Self = Self(8);
    pub const FOCUS: Self = Self(16);
    pub const SHOT: Self = Self(32);
    pub const SKIP: Self = Self(64);

    /// All movement direction bits.
    pub const MOVE_MASK: Self = Self(1 | 2 | 4 | 8);

    #[inline]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    #[inline]
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    #[inline]
    pub fn set(&mut self, other: Self, on: bool) {
        if on {
            self.insert(other);
        } else {
            self.remove(other);
        }
    }

    /// Keep only the movement direction bits.
    #[inline]
    pub fn move_only(self) -> Self {
        Self(self.0 & Self::MOVE_MASK.0)
    }

    /// Replace the movement bits with those from `other`, keeping the rest.
    #[inline]
    pub fn merge_moveflags(self, other: Self) -> Self {
        Self((self.0 & !Self::MOVE_MASK.0) | (other.0 & Self::MOVE_MASK.0))
    }

    /// Movement direction implied by the held keys.
    ///
    /// Opposite directions cancel. The result is axis-aligned or diagonal,
    /// not normalized; callers scale by the per-frame speed.
    pub fn move_direction(self) -> FixedVec2 {
        use crate::core::fixed::FIXED_ONE;

        let mut x: Fixed = 0;
        let mut y: Fixed = 0;
        if self.contains(Self::LEFT) {
            x -= FIXED_ONE;
        }
        if self.contains(Self::RIGHT) {
            x += FIXED_ONE;
        }
        if self.contains(Self::UP) {
            y -= FIXED_ONE;
        }
        if self.contains(Self::DOWN) {
            y += FIXED_ONE;
        }
        FixedVec2::new(x, y)
    }
}

// =============================================================================
// REPLAY EVENTS
// =============================================================================

/// Wire event type codes. Frozen.
pub const EV_PRESS: u8 = 0;
pub const EV_RELEASE: u8 = 1;
pub const EV_OVER: u8 = 2;
pub const EV_AXIS_LR: u8 = 3;
pub const EV_AXIS_UD: u8 = 4;
pub const EV_CHECK_DESYNC: u8 = 5;
pub const EV_FPS: u8 = 6;
pub const EV_INFLAGS: u8 = 7;
pub const EV_CONTINUE: u8 = 8;

/// A single input or bookkeeping event, as stored in a replay stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputEvent {
    /// A key went down.
    Press(Key),
    /// A key went up.
    Release(Key),
    /// The stage ended (last event of a recorded stage).
    Over,
    /// Analog horizontal axis, -32768..32767.
    AxisLr(i16),
    /// Analog vertical axis, -32768..32767.
    AxisUd(i16),
    /// Folded state checksum recorded every few seconds while recording.
    CheckDesync(u16),
    /// Renderer FPS sample (diagnostic only, no gameplay effect).
    Fps(u16),
    /// Full input flag snapshot (used when focus returns to the game).
    InputFlags(InputFlags),
    /// The player used a continue.
    Continue,
}

impl InputEvent {
    /// Encode to the wire pair (event type, 16-bit value).
    pub fn to_wire(self) -> (u8, u16) {
        match self {
            InputEvent::Press(key) => (EV_PRESS, key.to_wire()),
            InputEvent::Release(key) => (EV_RELEASE, key.to_wire()),
            InputEvent::Over => (EV_OVER, 0),
            InputEvent::AxisLr(v) => (EV_AXIS_LR, v as u16),
            InputEvent::AxisUd(v) => (EV_AXIS_UD, v as u16),
            InputEvent::CheckDesync(cs) => (EV_CHECK_DESYNC, cs),
            InputEvent::Fps(fps) => (EV_FPS, fps),
            InputEvent::InputFlags(flags) => (EV_INFLAGS, flags.0 as u16),
            InputEvent::Continue => (EV_CONTINUE, 0),
        }
    }

    /// Decode from the wire pair. Unknown event types decode to `None`;
    /// the replay reader rejects the whole stream on one, since an
    /// event the simulation cannot apply makes playback meaningless.
    pub fn from_wire(ev_type: u8, value: u16) -> Option<Self> {
        Some(match ev_type {
            EV_PRESS => InputEvent::Press(Key::from_wire(value)?),
            EV_RELEASE => InputEvent::Release(Key::from_wire(value)?),
            EV_OVER => InputEvent::Over,
            EV_AXIS_LR => InputEvent::AxisLr(value as i16),
            EV_AXIS_UD => InputEvent::AxisUd(value as i16),
            EV_CHECK_DESYNC => InputEvent::CheckDesync(value),
            EV_FPS => InputEvent::Fps(value),
            EV_INFLAGS => InputEvent::InputFlags(InputFlags(value as u8)),
            EV_CONTINUE => InputEvent::Continue,
            _ => return None,
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixed::FIXED_ONE;

    #[test]
    fn test_key_wire_roundtrip() {
        for raw in 0..=10u16 {
            let key = Key::from_wire(raw).unwrap();
            assert_eq!(key.to_wire(), raw);
        }
        assert_eq!(Key::from_wire(11), None);
        assert_eq!(Key::from_wire(u16::MAX), None);
    }

    #[test]
    fn test_key_flags() {
        assert_eq!(Key::Up.flag(), Some(InputFlags::UP));
        assert_eq!(Key::Focus.flag(), Some(InputFlags::FOCUS));
        assert_eq!(Key::Bomb.flag(), None);
        assert_eq!(Key::Iddqd.flag(), None);
    }

    #[test]
    fn test_input_flags_ops() {
        let mut flags = InputFlags::NONE;
        flags.insert(InputFlags::LEFT);
        flags.insert(InputFlags::SHOT);
        assert!(flags.contains(InputFlags::LEFT));
        assert!(flags.contains(InputFlags::SHOT));
        assert!(!flags.contains(InputFlags::FOCUS));

        flags.remove(InputFlags::LEFT);
        assert!(!flags.contains(InputFlags::LEFT));

        flags.set(InputFlags::FOCUS, true);
        assert!(flags.contains(InputFlags::FOCUS));
        flags.set(InputFlags::FOCUS, false);
        assert!(!flags.contains(InputFlags::FOCUS));
    }

    #[test]
    fn test_merge_moveflags() {
        let held = InputFlags(InputFlags::SHOT.0 | InputFlags::LEFT.0);
        let fresh = InputFlags(InputFlags::RIGHT.0 | InputFlags::FOCUS.0);

        // Movement comes from `fresh`, the rest stays from `held`
        let merged = held.merge_moveflags(fresh);
        assert!(merged.contains(InputFlags::SHOT));
        assert!(merged.contains(InputFlags::RIGHT));
        assert!(!merged.contains(InputFlags::LEFT));
        assert!(!merged.contains(InputFlags::FOCUS));
    }

    #[test]
    fn test_move_direction() {
        let mut flags = InputFlags::NONE;
        flags.insert(InputFlags::LEFT);
        assert_eq!(flags.move_direction(), FixedVec2::new(-FIXED_ONE, 0));

        flags.insert(InputFlags::RIGHT);
        // Opposite directions cancel
        assert_eq!(flags.move_direction(), FixedVec2::ZERO);

        flags.remove(InputFlags::RIGHT);
        flags.insert(InputFlags::DOWN);
        assert_eq!(flags.move_direction(), FixedVec2::new(-FIXED_ONE, FIXED_ONE));
    }

    #[test]
    fn test_event_wire_roundtrip() {
        let events = [
            InputEvent::Press(Key::Shot),
            InputEvent::Release(Key::Bomb),
            InputEvent::Over,
            InputEvent::AxisLr(-12000),
            InputEvent::AxisUd(32767),
            InputEvent::CheckDesync(0xBEEF),
            InputEvent::Fps(59),
            InputEvent::InputFlags(InputFlags(0x35)),
            InputEvent::Continue,
        ];

        for ev in events {
            let (t, v) = ev.to_wire();
            assert_eq!(InputEvent::from_wire(t, v), Some(ev));
        }

        // Unknown event types are skipped, not errors
        assert_eq!(InputEvent::from_wire(200, 0), None);
    }

    #[test]
    fn test_negative_axis_survives_wire() {
        let (t, v) = InputEvent::AxisLr(-1).to_wire();
        assert_eq!(v, 0xFFFF);
        assert_eq!(InputEvent::from_wire(t, v), Some(InputEvent::AxisLr(-1)));
    }
}
