//! Append-only journal backing one database.
//!
//! On-disk format, one frame per committed transaction:
//! ```text
//! [4 bytes: payload length (little-endian u32)]
//! [4 bytes: CRC32 of payload (little-endian u32)]
//! [N bytes: payload (bincode-serialized JournalFrame)]
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::SyncMode;
use crate::error::{StoreError, StoreResult};
use crate::key::Key;

/// A single mutation recorded in the journal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalOp {
    SetVersion(u64),
    CreateCollection { name: String, key_path: String },
    DropCollection { name: String },
    /// Record body is JSON bytes; bincode cannot carry `serde_json::Value`.
    Put { collection: String, key: Key, body: Vec<u8> },
    Delete { collection: String, key: Key },
    Clear { collection: String },
}

/// All operations of one committed transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalFrame {
    pub ops: Vec<JournalOp>,
}

impl JournalFrame {
    pub fn new(ops: Vec<JournalOp>) -> Self {
        Self { ops }
    }
}

/// Header size: 4 bytes length + 4 bytes CRC.
const HEADER_SIZE: usize = 8;

/// Result of decoding the frame at the front of a byte slice.
#[derive(Debug)]
enum Decoded {
    Frame { frame: JournalFrame, len: usize },
    End,
    Damaged(String),
}

/// Decode one frame from the start of `bytes`.
fn read_frame(bytes: &[u8]) -> Decoded {
    if bytes.is_empty() {
        return Decoded::End;
    }
    let Some((header, rest)) = bytes.split_first_chunk::<HEADER_SIZE>() else {
        return Decoded::Damaged(format!("torn header ({} bytes)", bytes.len()));
    };
    let [l0, l1, l2, l3, c0, c1, c2, c3] = *header;
    let length = u32::from_le_bytes([l0, l1, l2, l3]) as usize;
    let crc = u32::from_le_bytes([c0, c1, c2, c3]);

    if length == 0 {
        return Decoded::Damaged("zero-length frame".into());
    }
    let Some(payload) = rest.get(..length) else {
        return Decoded::Damaged(format!("torn payload ({} of {length} bytes)", rest.len()));
    };
    if crc32fast::hash(payload) != crc {
        return Decoded::Damaged("checksum mismatch".into());
    }
    match bincode::deserialize::<JournalFrame>(payload) {
        Ok(frame) => Decoded::Frame {
            frame,
            len: HEADER_SIZE + length,
        },
        Err(e) => Decoded::Damaged(format!("undecodable frame: {e}")),
    }
}

struct JournalWriter {
    file: File,
    offset: u64,
}

impl JournalWriter {
    /// Append `bytes` as one unit; a failed write leaves the file as it was.
    fn write_whole(&mut self, bytes: &[u8]) -> io::Result<()> {
        if let Err(e) = self.file.write_all(bytes) {
            self.discard_tail()?;
            return Err(e);
        }
        self.offset += bytes.len() as u64;
        Ok(())
    }

    /// Cut everything past the last complete frame.
    fn discard_tail(&mut self) -> io::Result<()> {
        self.file.set_len(self.offset)
    }
}

/// Crash-tolerant append-only journal.
///
/// Every frame is one committed transaction, so recovery keeps the longest
/// intact prefix: the first damaged frame and everything after it are cut
/// off.
pub struct Journal {
    path: PathBuf,
    writer: Mutex<JournalWriter>,
    sync_mode: SyncMode,
}

impl Journal {
    /// Open (or create) the journal file at `path`.
    pub fn open(path: &Path, sync_mode: SyncMode) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        let offset = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(JournalWriter { file, offset }),
            sync_mode,
        })
    }

    /// Append one frame. Returns the byte offset it was written at.
    pub fn append(&self, frame: &JournalFrame) -> StoreResult<u64> {
        let bytes = frame_bytes(&encode(frame)?)?;
        let mut w = self.writer.lock().map_err(|_| StoreError::Poisoned)?;
        let frame_offset = w.offset;

        w.write_whole(&bytes)?;
        if self.sync_mode == SyncMode::EveryCommit {
            w.file.sync_all()?;
        }

        debug!(path = %self.path.display(), offset = frame_offset, ops = frame.ops.len(), "journal append");
        Ok(frame_offset)
    }

    /// Read back every committed frame in write order, cutting off a damaged
    /// tail so later appends follow the last good frame.
    pub fn recover(&self) -> StoreResult<Vec<JournalFrame>> {
        let mut w = self.writer.lock().map_err(|_| StoreError::Poisoned)?;
        let bytes = fs::read(&self.path)?;
        let mut frames = Vec::new();
        let mut valid = 0usize;

        loop {
            match read_frame(&bytes[valid..]) {
                Decoded::Frame { frame, len } => {
                    frames.push(frame);
                    valid += len;
                }
                Decoded::End => break,
                Decoded::Damaged(reason) => {
                    warn!(
                        path = %self.path.display(),
                        offset = valid,
                        discarded = bytes.len() - valid,
                        %reason,
                        "damaged journal tail; truncating"
                    );
                    w.offset = valid as u64;
                    w.discard_tail()?;
                    break;
                }
            }
        }

        debug!(path = %self.path.display(), recovered = frames.len(), "journal recovery complete");
        Ok(frames)
    }

    /// Replace the whole journal with `frames`.
    ///
    /// The new content is written to a sibling file and renamed over the
    /// journal, so a crash leaves either the old or the new journal intact.
    pub fn rewrite(&self, frames: &[JournalFrame]) -> StoreResult<()> {
        let tmp_path = self.path.with_extension("journal.tmp");
        let mut contents = Vec::new();
        for frame in frames {
            contents.extend(frame_bytes(&encode(frame)?)?);
        }
        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(&contents)?;
            tmp.sync_all()?;
        }

        let mut w = self.writer.lock().map_err(|_| StoreError::Poisoned)?;
        fs::rename(&tmp_path, &self.path)?;
        w.file = OpenOptions::new().read(true).append(true).open(&self.path)?;
        w.offset = contents.len() as u64;

        debug!(path = %self.path.display(), frames = frames.len(), bytes = contents.len(), "journal rewritten");
        Ok(())
    }

    /// Current end-of-journal offset.
    pub fn offset(&self) -> u64 {
        self.writer.lock().map(|w| w.offset).unwrap_or_default()
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("path", &self.path)
            .field("offset", &self.offset())
            .finish()
    }
}

fn encode(frame: &JournalFrame) -> StoreResult<Vec<u8>> {
    bincode::serialize(frame).map_err(|e| StoreError::Serialization(e.to_string()))
}

/// Header plus payload, ready to be written in one call.
fn frame_bytes(payload: &[u8]) -> StoreResult<Vec<u8>> {
    let length = u32::try_from(payload.len())
        .map_err(|_| StoreError::Serialization(format!("frame of {} bytes is too large", payload.len())))?;
    let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
    bytes.extend_from_slice(&length.to_le_bytes());
    bytes.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
    bytes.extend_from_slice(payload);
    Ok(bytes)
}
