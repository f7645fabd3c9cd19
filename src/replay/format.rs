//! Replay Binary Format
//!
//! Layout (little-endian):
//!
//! ```text
//! Header:   [u8;8 magic] [u16 version, high bit = compressed]
//!           [game version: u8 u8 u8 u16]
//!           [if compressed: u32 absolute event-section offset]
//! Meta:     playername (REV1: u8 length, REV0: u16 length)
//!           [REV1: u32 replay flags]
//!           u16 num_stages
//!           per stage: [REV1: u32 flags] u16 stage u32 seed u8 diff
//!                      u32 points [REV1: u8 continues] u8 char u8 shot
//!                      i16 pos_x i16 pos_y u8 focus u16 power
//!                      u8 lives u8 life_frags u8 bombs u8 bomb_frags
//!                      u8 inputflags u16 num_events u32 checksum
//! Events:   per stage, num_events x { u32 frame, u8 type, u16 value }
//! Trailer:  u8 sentinel
//! ```
//!
//! The per-stage checksum is an additive sum over the snapshot fields
//! and the event count, stored negated; a reader sums everything and
//! adds the stored value, rejecting the file on anything but zero. It
//! is deliberately weak and is never upgraded, for compatibility with
//! files already in the wild.
//!
//! When the compression bit is set, the meta and event sections are
//! independent zlib streams; the offset field marks where the event
//! stream begins so it can be decompressed without draining the meta
//! stream first. Unknown event discriminants fail the read: an event
//! the simulation cannot apply makes the whole replay unplayable.

use std::io::{self, Read, Write};

use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use thiserror::Error;

use crate::game::input::InputEvent;
use super::{GameVersion, Replay, ReplayEvent, ReplayStage};

/// Replay file magic.
pub const REPLAY_MAGIC: [u8; 8] = [0x00, 0x73, 0x66, 0x72, 0x70, 0x6c, 0x79, 0x1b];

/// First structure revision: u16 player name length, no flag fields.
pub const REPLAY_VERSION_REV0: u16 = 1;
/// Adds replay/stage flags and the continue counter. Current write version.
pub const REPLAY_VERSION_REV1: u16 = 2;

/// Set in the version field when both payload sections are zlib streams.
pub const REPLAY_COMPRESSION_BIT: u16 = 0x8000;

/// Last byte of the file, for truncation detection.
const EOF_SENTINEL: u8 = 0x1b;

/// Sanity caps.
const MAX_PAYLOAD: usize = 64 << 20;
const MAX_STAGES: usize = 1 << 10;
const MAX_NAME_LEN: usize = 255;

/// Bytes before the payload: magic + version + game version.
const BASE_HEADER_LEN: usize = 8 + 2 + 5;
/// Compressed files add the u32 event-section offset.
const COMPRESSED_HEADER_LEN: usize = BASE_HEADER_LEN + 4;

const EVENT_SIZE: usize = 4 + 1 + 2;

/// How much of a replay to load.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadMode {
    /// Header and stage metadata only; event streams stay empty.
    Meta,
    /// Everything.
    Full,
}

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("not a replay file")]
    BadMagic,

    #[error("unsupported replay version {0}")]
    UnsupportedVersion(u16),

    #[error("replay file ends prematurely")]
    PrematureEof,

    #[error("stage {stage} metadata checksum mismatch")]
    ChecksumMismatch { stage: usize },

    #[error("unknown event type 0x{ev_type:02x}")]
    UnknownEvent { ev_type: u8 },

    #[error("invalid event section offset")]
    InvalidOffset,

    #[error("replay payload too large ({0} bytes)")]
    TooLarge(usize),

    #[error("player name is not valid utf-8")]
    MalformedName(#[from] std::string::FromUtf8Error),

    #[error("malformed replay: {0}")]
    Malformed(&'static str),
}

// =============================================================================
// WRITING
// =============================================================================

/// Serialize a replay at the current revision. `compress` wraps both
/// payload sections in zlib.
pub fn write_replay<W: Write>(
    writer: &mut W,
    replay: &Replay,
    compress: bool,
) -> Result<(), ReplayError> {
    let meta = encode_meta(replay)?;
    let mut events = encode_events(replay);
    events.push(EOF_SENTINEL);

    writer.write_all(&REPLAY_MAGIC)?;

    let mut version = REPLAY_VERSION_REV1;
    if compress {
        version |= REPLAY_COMPRESSION_BIT;
    }
    writer.write_all(&version.to_le_bytes())?;
    write_game_version(writer, replay.game_version)?;

    if compress {
        let zmeta = zlib_compress(&meta)?;
        let zevents = zlib_compress(&events)?;
        let offset = (COMPRESSED_HEADER_LEN + zmeta.len()) as u32;
        writer.write_all(&offset.to_le_bytes())?;
        writer.write_all(&zmeta)?;
        writer.write_all(&zevents)?;
    } else {
        writer.write_all(&meta)?;
        writer.write_all(&events)?;
    }

    Ok(())
}

fn write_game_version<W: Write>(writer: &mut W, gv: GameVersion) -> Result<(), ReplayError> {
    writer.write_all(&[gv.major, gv.minor, gv.patch])?;
    writer.write_all(&gv.tweak.to_le_bytes())?;
    Ok(())
}

fn encode_meta(replay: &Replay) -> Result<Vec<u8>, ReplayError> {
    let mut buf = Vec::new();

    let name = replay.playername.as_bytes();
    if name.len() > MAX_NAME_LEN {
        return Err(ReplayError::Malformed("player name too long"));
    }
    buf.push(name.len() as u8);
    buf.extend_from_slice(name);

    buf.extend_from_slice(&replay.flags.to_le_bytes());
    buf.extend_from_slice(&(replay.stages.len() as u16).to_le_bytes());

    for stage in &replay.stages {
        if stage.events.len() > u16::MAX as usize {
            return Err(ReplayError::Malformed("too many events in stage"));
        }
        let num_events = stage.events.len() as u16;

        buf.extend_from_slice(&stage.flags.to_le_bytes());
        buf.extend_from_slice(&stage.stage.to_le_bytes());
        buf.extend_from_slice(&stage.seed.to_le_bytes());
        buf.push(stage.diff);
        buf.extend_from_slice(&stage.plr_points.to_le_bytes());
        buf.push(stage.plr_continues_used);
        buf.push(stage.plr_char);
        buf.push(stage.plr_shot);
        buf.extend_from_slice(&stage.plr_pos_x.to_le_bytes());
        buf.extend_from_slice(&stage.plr_pos_y.to_le_bytes());
        buf.push(stage.plr_focus);
        buf.extend_from_slice(&stage.plr_power.to_le_bytes());
        buf.push(stage.plr_lives);
        buf.push(stage.plr_life_fragments);
        buf.push(stage.plr_bombs);
        buf.push(stage.plr_bomb_fragments);
        buf.push(stage.plr_inputflags);
        buf.extend_from_slice(&num_events.to_le_bytes());

        let checksum = stage_checksum(stage, num_events).wrapping_neg();
        buf.extend_from_slice(&checksum.to_le_bytes());
    }

    Ok(buf)
}

fn encode_events(replay: &Replay) -> Vec<u8> {
    let mut buf = Vec::with_capacity(replay.num_events() * EVENT_SIZE + 1);

    for stage in &replay.stages {
        for event in &stage.events {
            let (ev_type, value) = event.ev.to_wire();
            buf.extend_from_slice(&event.frame.to_le_bytes());
            buf.push(ev_type);
            buf.extend_from_slice(&value.to_le_bytes());
        }
    }

    buf
}

/// Additive sum over the snapshot fields and the event count.
fn stage_checksum(stage: &ReplayStage, num_events: u16) -> u32 {
    let mut sum: u32 = 0;
    sum = sum.wrapping_add(stage.flags);
    sum = sum.wrapping_add(stage.stage as u32);
    sum = sum.wrapping_add(stage.seed);
    sum = sum.wrapping_add(stage.diff as u32);
    sum = sum.wrapping_add(stage.plr_points);
    sum = sum.wrapping_add(stage.plr_continues_used as u32);
    sum = sum.wrapping_add(stage.plr_char as u32);
    sum = sum.wrapping_add(stage.plr_shot as u32);
    sum = sum.wrapping_add(stage.plr_pos_x as u16 as u32);
    sum = sum.wrapping_add(stage.plr_pos_y as u16 as u32);
    sum = sum.wrapping_add(stage.plr_focus as u32);
    sum = sum.wrapping_add(stage.plr_power as u32);
    sum = sum.wrapping_add(stage.plr_lives as u32);
    sum = sum.wrapping_add(stage.plr_life_fragments as u32);
    sum = sum.wrapping_add(stage.plr_bombs as u32);
    sum = sum.wrapping_add(stage.plr_bomb_fragments as u32);
    sum = sum.wrapping_add(stage.plr_inputflags as u32);
    sum = sum.wrapping_add(num_events as u32);
    sum
}

// =============================================================================
// READING
// =============================================================================

/// Deserialize a replay.
pub fn read_replay<R: Read>(reader: &mut R, mode: ReadMode) -> Result<Replay, ReplayError> {
    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic).map_err(eof)?;
    if magic != REPLAY_MAGIC {
        return Err(ReplayError::BadMagic);
    }

    let mut vbuf = [0u8; 2];
    reader.read_exact(&mut vbuf).map_err(eof)?;
    let raw_version = u16::from_le_bytes(vbuf);
    let compressed = raw_version & REPLAY_COMPRESSION_BIT != 0;
    let version = raw_version & !REPLAY_COMPRESSION_BIT;
    if version != REPLAY_VERSION_REV0 && version != REPLAY_VERSION_REV1 {
        return Err(ReplayError::UnsupportedVersion(version));
    }
    let rev1 = version >= REPLAY_VERSION_REV1;

    let mut gvbuf = [0u8; 5];
    reader.read_exact(&mut gvbuf).map_err(eof)?;
    let game_version = GameVersion {
        major: gvbuf[0],
        minor: gvbuf[1],
        patch: gvbuf[2],
        tweak: u16::from_le_bytes([gvbuf[3], gvbuf[4]]),
    };

    let mut offset = 0usize;
    if compressed {
        let mut obuf = [0u8; 4];
        reader.read_exact(&mut obuf).map_err(eof)?;
        offset = u32::from_le_bytes(obuf) as usize;
    }

    let mut rest = Vec::new();
    reader
        .by_ref()
        .take(MAX_PAYLOAD as u64 + 1)
        .read_to_end(&mut rest)?;
    if rest.len() > MAX_PAYLOAD {
        return Err(ReplayError::TooLarge(rest.len()));
    }

    let (meta_bytes, event_bytes);
    let zmeta;
    let zevents;
    if compressed {
        let split = offset
            .checked_sub(COMPRESSED_HEADER_LEN)
            .filter(|&s| s <= rest.len())
            .ok_or(ReplayError::InvalidOffset)?;
        zmeta = zlib_decompress(&rest[..split])?;
        meta_bytes = zmeta.as_slice();
        if mode == ReadMode::Full {
            zevents = zlib_decompress(&rest[split..])?;
            event_bytes = zevents.as_slice();
        } else {
            event_bytes = &[];
        }
    } else {
        meta_bytes = rest.as_slice();
        event_bytes = rest.as_slice();
    }

    let mut cursor = SliceReader::new(meta_bytes);
    let (mut replay, event_counts) = parse_meta(&mut cursor, game_version, rev1)?;

    if mode == ReadMode::Full {
        let mut events = if compressed {
            SliceReader::new(event_bytes)
        } else {
            // Uncompressed: the event section follows the metadata in
            // the same buffer
            SliceReader::new(&event_bytes[cursor.pos..])
        };
        parse_events(&mut events, &mut replay, &event_counts)?;

        if events.read_u8()? != EOF_SENTINEL {
            return Err(ReplayError::PrematureEof);
        }
    }

    Ok(replay)
}

/// Refill the event streams of a metadata-only replay from the same
/// file. The inverse of [`Replay::destroy_events`].
pub fn read_events<R: Read>(reader: &mut R, replay: &mut Replay) -> Result<(), ReplayError> {
    let full = read_replay(reader, ReadMode::Full)?;
    if full.stages.len() != replay.stages.len() {
        return Err(ReplayError::Malformed("stage count changed between reads"));
    }
    for (dst, src) in replay.stages.iter_mut().zip(full.stages) {
        dst.events = src.events;
    }
    Ok(())
}

fn parse_meta(
    cursor: &mut SliceReader<'_>,
    game_version: GameVersion,
    rev1: bool,
) -> Result<(Replay, Vec<u16>), ReplayError> {
    let name_len = if rev1 {
        cursor.read_u8()? as usize
    } else {
        cursor.read_u16()? as usize
    };
    if name_len > MAX_NAME_LEN {
        return Err(ReplayError::Malformed("player name too long"));
    }
    let playername = String::from_utf8(cursor.read_bytes(name_len)?.to_vec())?;

    let flags = if rev1 { cursor.read_u32()? } else { 0 };
    let num_stages = cursor.read_u16()? as usize;
    if num_stages > MAX_STAGES {
        return Err(ReplayError::Malformed("too many stages"));
    }

    let mut replay = Replay {
        game_version,
        playername,
        flags,
        stages: Vec::with_capacity(num_stages),
    };
    let mut event_counts = Vec::with_capacity(num_stages);

    for i in 0..num_stages {
        let stage = ReplayStage {
            flags: if rev1 { cursor.read_u32()? } else { 0 },
            stage: cursor.read_u16()?,
            seed: cursor.read_u32()?,
            diff: cursor.read_u8()?,
            plr_points: cursor.read_u32()?,
            plr_continues_used: if rev1 { cursor.read_u8()? } else { 0 },
            plr_char: cursor.read_u8()?,
            plr_shot: cursor.read_u8()?,
            plr_pos_x: cursor.read_i16()?,
            plr_pos_y: cursor.read_i16()?,
            plr_focus: cursor.read_u8()?,
            plr_power: cursor.read_u16()?,
            plr_lives: cursor.read_u8()?,
            plr_life_fragments: cursor.read_u8()?,
            plr_bombs: cursor.read_u8()?,
            plr_bomb_fragments: cursor.read_u8()?,
            plr_inputflags: cursor.read_u8()?,
            events: Vec::new(),
        };
        let num_events = cursor.read_u16()?;
        let stored = cursor.read_u32()?;

        if stage_checksum(&stage, num_events).wrapping_add(stored) != 0 {
            return Err(ReplayError::ChecksumMismatch { stage: i });
        }

        replay.stages.push(stage);
        event_counts.push(num_events);
    }

    Ok((replay, event_counts))
}

fn parse_events(
    cursor: &mut SliceReader<'_>,
    replay: &mut Replay,
    event_counts: &[u16],
) -> Result<(), ReplayError> {
    for (stage, &count) in replay.stages.iter_mut().zip(event_counts) {
        stage.events.reserve(count as usize);

        for _ in 0..count {
            let frame = cursor.read_u32()?;
            let ev_type = cursor.read_u8()?;
            let value = cursor.read_u16()?;

            let ev = InputEvent::from_wire(ev_type, value)
                .ok_or(ReplayError::UnknownEvent { ev_type })?;
            stage.events.push(ReplayEvent { frame, ev });
        }
    }

    Ok(())
}

// =============================================================================
// HELPERS
// =============================================================================

struct SliceReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> SliceReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], ReplayError> {
        if self.buf.len() - self.pos < n {
            return Err(ReplayError::PrematureEof);
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn read_u8(&mut self) -> Result<u8, ReplayError> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16, ReplayError> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn read_u32(&mut self) -> Result<u32, ReplayError> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_i16(&mut self) -> Result<i16, ReplayError> {
        Ok(self.read_u16()? as i16)
    }
}

fn zlib_compress(data: &[u8]) -> Result<Vec<u8>, ReplayError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn zlib_decompress(data: &[u8]) -> Result<Vec<u8>, ReplayError> {
    let mut out = Vec::new();
    ZlibDecoder::new(data)
        .take(MAX_PAYLOAD as u64 + 1)
        .read_to_end(&mut out)?;
    if out.len() > MAX_PAYLOAD {
        return Err(ReplayError::TooLarge(out.len()));
    }
    Ok(out)
}

fn eof(e: io::Error) -> ReplayError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        ReplayError::PrematureEof
    } else {
        ReplayError::Io(e)
    }
}

// =============================================================================
// TESTS
// =============================================================================
