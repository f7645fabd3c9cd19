//! Persistent Spell Progress
//!
//! Tracks per-spellcard play/clear counters and practice unlocks in a
//! small binary file.
//!
//! File structure (little-endian):
//!
//! ```text
//! [u8;8 magic] [u32 checksum] [array of commands]
//! command: [u8 cmd] [u16 size] [{size} payload bytes]
//! ```
//!
//! The checksum covers the whole command array; a mismatch invalidates
//! the file. Unknown commands are preserved verbatim across a
//! read-modify-write cycle, so newer builds can add commands without
//! older builds destroying them.

use std::collections::BTreeMap;
use std::io::{self, Read, Write};

use flate2::Crc;
use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::warn;

/// Progress file magic.
pub const PROGRESS_MAGIC: [u8; 8] = [0x00, 0x73, 0x66, 0x70, 0x72, 0x6f, 0x67, 0x01];

/// Sanity cap on file size.
pub const PROGRESS_MAX_FILESIZE: usize = 1 << 20;

/// CRC salt so a truncated/foreign stream can't accidentally validate.
const CHECKSUM_SALT: u32 = 0xB16B_00B5;

/// Per-spell playinfo entries.
const PCMD_SPELL_PLAYINFO: u8 = 0x01;
/// Session high score.
const PCMD_HISCORE: u8 = 0x02;

const PLAYINFO_ENTRY_SIZE: usize = 2 + 1 + 4 + 4 + 1;

/// Stable identifier of a spellcard, shared with stage definitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SpellId(pub u16);

/// Play statistics for one spell at one difficulty.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpellProgress {
    pub num_played: u32,
    pub num_cleared: u32,
    /// Available in spell practice.
    pub unlocked: bool,
}

/// An unrecognized command, carried through untouched.
#[derive(Clone, Debug, PartialEq, Eq)]
struct RawCommand {
    cmd: u8,
    payload: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid progress file header")]
    BadMagic,

    #[error("progress file too large ({0} bytes)")]
    TooLarge(usize),

    #[error("progress checksum mismatch (expected {expected:#010x}, got {found:#010x})")]
    ChecksumMismatch { expected: u32, found: u32 },

    #[error("truncated command stream")]
    Truncated,
}

/// In-memory progress store.
///
/// Entries are keyed by (spell, difficulty level) in a BTreeMap so the
/// on-disk order is deterministic.
#[derive(Clone, Debug, Default)]
pub struct ProgressStore {
    spells: BTreeMap<(SpellId, u8), SpellProgress>,
    pub hiscore: u32,
    unknown: Vec<RawCommand>,
}

impl ProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up progress for a spell/difficulty pair.
    pub fn get(&self, spell: SpellId, diff: u8) -> Option<&SpellProgress> {
        self.spells.get(&(spell, diff))
    }

    /// Look up progress, creating a zeroed entry if missing.
    pub fn get_or_create(&mut self, spell: SpellId, diff: u8) -> &mut SpellProgress {
        self.spells.entry((spell, diff)).or_default()
    }

    /// Number of tracked spell entries.
    pub fn len(&self) -> usize {
        self.spells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spells.is_empty()
    }

    /// Record a new score; keeps the maximum.
    pub fn register_hiscore(&mut self, score: u32) {
        if score > self.hiscore {
            self.hiscore = score;
        }
    }

    // -------------------------------------------------------------------------
    // Codec
    // -------------------------------------------------------------------------

    /// Serialize to a writer.
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<(), ProgressError> {
        let mut body = Vec::new();

        // Spell playinfo: one command with all non-empty entries
        let entries: Vec<_> = self
            .spells
            .iter()
            .filter(|(_, p)| p.num_played > 0 || p.num_cleared > 0 || p.unlocked)
            .collect();

        if !entries.is_empty() {
            body.push(PCMD_SPELL_PLAYINFO);
            let size = (entries.len() * PLAYINFO_ENTRY_SIZE) as u16;
            body.extend_from_slice(&size.to_le_bytes());

            for (&(spell, diff), p) in entries {
                body.extend_from_slice(&spell.0.to_le_bytes());
                body.push(diff);
                body.extend_from_slice(&p.num_played.to_le_bytes());
                body.extend_from_slice(&p.num_cleared.to_le_bytes());
                body.push(p.unlocked as u8);
            }
        }

        if self.hiscore > 0 {
            body.push(PCMD_HISCORE);
            body.extend_from_slice(&4u16.to_le_bytes());
            body.extend_from_slice(&self.hiscore.to_le_bytes());
        }

        for raw in &self.unknown {
            body.push(raw.cmd);
            body.extend_from_slice(&(raw.payload.len() as u16).to_le_bytes());
            body.extend_from_slice(&raw.payload);
        }

        writer.write_all(&PROGRESS_MAGIC)?;
        writer.write_all(&checksum(&body).to_le_bytes())?;
        writer.write_all(&body)?;
        Ok(())
    }

    /// Deserialize from a reader.
    pub fn read<R: Read>(reader: &mut R) -> Result<Self, ProgressError> {
        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic).map_err(eof_as_truncated)?;
        if magic != PROGRESS_MAGIC {
            return Err(ProgressError::BadMagic);
        }

        let mut cs_bytes = [0u8; 4];
        if let Err(e) = reader.read_exact(&mut cs_bytes) {
            // Empty command array: file ends right after the magic
            if e.kind() == io::ErrorKind::UnexpectedEof {
                return Ok(Self::new());
            }
            return Err(e.into());
        }
        let stored = u32::from_le_bytes(cs_bytes);

        let mut body = Vec::new();
        reader
            .by_ref()
            .take(PROGRESS_MAX_FILESIZE as u64 + 1)
            .read_to_end(&mut body)?;
        if body.len() > PROGRESS_MAX_FILESIZE {
            return Err(ProgressError::TooLarge(body.len()));
        }

        let computed = checksum(&body);
        if computed != stored {
            return Err(ProgressError::ChecksumMismatch {
                expected: computed,
                found: stored,
            });
        }

        let mut store = Self::new();
        let mut pos = 0usize;

        while pos < body.len() {
            if body.len() - pos < 3 {
                return Err(ProgressError::Truncated);
            }

            let cmd = body[pos];
            let size = u16::from_le_bytes([body[pos + 1], body[pos + 2]]) as usize;
            pos += 3;

            if body.len() - pos < size {
                return Err(ProgressError::Truncated);
            }
            let payload = &body[pos..pos + size];
            pos += size;

            match cmd {
                PCMD_SPELL_PLAYINFO => {
                    if size % PLAYINFO_ENTRY_SIZE != 0 {
                        warn!(cmd, size, "malformed playinfo command ignored");
                        continue;
                    }

                    for chunk in payload.chunks_exact(PLAYINFO_ENTRY_SIZE) {
                        let spell = SpellId(u16::from_le_bytes([chunk[0], chunk[1]]));
                        let diff = chunk[2];
                        let p = store.get_or_create(spell, diff);
                        p.num_played = u32::from_le_bytes([chunk[3], chunk[4], chunk[5], chunk[6]]);
                        p.num_cleared = u32::from_le_bytes([chunk[7], chunk[8], chunk[9], chunk[10]]);
                        p.unlocked = chunk[11] != 0;
                    }
                }

                PCMD_HISCORE => {
                    if size != 4 {
                        warn!(cmd, size, "malformed hiscore command ignored");
                        continue;
                    }
                    store.hiscore =
                        u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
                }

                _ => {
                    // Unknown command: keep it for the next write
                    store.unknown.push(RawCommand {
                        cmd,
                        payload: payload.to_vec(),
                    });
                }
            }
        }

        Ok(store)
    }
}

fn checksum(body: &[u8]) -> u32 {
    let mut crc = Crc::new();
    crc.update(&CHECKSUM_SALT.to_le_bytes());
    crc.update(body);
    crc.sum()
}

fn eof_as_truncated(e: io::Error) -> ProgressError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        ProgressError::Truncated
    } else {
        ProgressError::Io(e)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let mut store = ProgressStore::new();
        {
            let p = store.get_or_create(SpellId(7), 2);
            p.num_played = 12;
            p.num_cleared = 3;
            p.unlocked = true;
        }
        store.get_or_create(SpellId(9), 4).num_played = 1;
        store.register_hiscore(123456);

        let mut buf = Vec::new();
        store.write(&mut buf).unwrap();

        let restored = ProgressStore::read(&mut buf.as_slice()).unwrap();
        assert_eq!(restored.get(SpellId(7), 2), store.get(SpellId(7), 2));
        assert_eq!(restored.get(SpellId(9), 4), store.get(SpellId(9), 4));
        assert_eq!(restored.hiscore, 123456);
        assert_eq!(restored.len(), 2);
    }

    #[test]
    fn test_empty_entries_not_written() {
        let mut store = ProgressStore::new();
        store.get_or_create(SpellId(1), 1); // all zero

        let mut buf = Vec::new();
        store.write(&mut buf).unwrap();

        let restored = ProgressStore::read(&mut buf.as_slice()).unwrap();
        assert!(restored.is_empty());
    }

    #[test]
    fn test_bad_magic_rejected() {
        let buf = vec![0xFFu8; 16];
        assert!(matches!(
            ProgressStore::read(&mut buf.as_slice()),
            Err(ProgressError::BadMagic)
        ));
    }

    #[test]
    fn test_corruption_detected() {
        let mut store = ProgressStore::new();
        store.get_or_create(SpellId(3), 1).num_played = 5;

        let mut buf = Vec::new();
        store.write(&mut buf).unwrap();

        // Flip a byte in the command array
        let last = buf.len() - 1;
        buf[last] ^= 0x01;

        assert!(matches!(
            ProgressStore::read(&mut buf.as_slice()),
            Err(ProgressError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_unknown_commands_preserved() {
        let mut store = ProgressStore::new();
        store.register_hiscore(10);

        let mut buf = Vec::new();
        store.write(&mut buf).unwrap();

        // Append an unknown command and re-checksum
        let mut body = buf[12..].to_vec();
        body.push(0x7F);
        body.extend_from_slice(&3u16.to_le_bytes());
        body.extend_from_slice(&[1, 2, 3]);

        let mut fixed = PROGRESS_MAGIC.to_vec();
        fixed.extend_from_slice(&checksum(&body).to_le_bytes());
        fixed.extend_from_slice(&body);

        let restored = ProgressStore::read(&mut fixed.as_slice()).unwrap();
        assert_eq!(restored.unknown.len(), 1);
        assert_eq!(restored.unknown[0].cmd, 0x7F);

        // And it survives a rewrite
        let mut rewritten = Vec::new();
        restored.write(&mut rewritten).unwrap();
        let again = ProgressStore::read(&mut rewritten.as_slice()).unwrap();
        assert_eq!(again.unknown, restored.unknown);
        assert_eq!(again.hiscore, 10);
    }

    #[test]
    fn test_magic_only_file_is_empty_store() {
        let buf = PROGRESS_MAGIC.to_vec();
        let store = ProgressStore::read(&mut buf.as_slice()).unwrap();
        assert!(store.is_empty());
        assert_eq!(store.hiscore, 0);
    }
}
