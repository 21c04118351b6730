// Crash-safe per-segment completion state.
//
// The bitfield file is the sole resume authority: file-existence checks may
// clear a suspicious bit on load, never set one. Persistence goes through
// the atomic writer so a reader only ever sees a complete file.

use crate::atomic;
use crate::crc32::ieee_crc32;
use crate::error::DownloadError;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// State file name inside the task workdir.
pub const STATE_FILE_NAME: &str = "download_state.bitfield";

const MAGIC: u32 = 0x4D33_5538; // "M3U8"
const VERSION: u16 = 1;
const HEADER_LEN: usize = 14;

/// Segment file name for `index`: `segment_NNNNNN.ts`.
pub fn segment_file_name(index: usize) -> String {
    format!("segment_{index:06}.ts")
}

pub fn state_file_path(workdir: &Path) -> PathBuf {
    workdir.join(STATE_FILE_NAME)
}

/// Per-segment completion bitmap, one bit per segment.
///
/// Bit `i` lives at byte `i / 8`, mask `1 << (7 - i % 8)` (MSB-first), so a
/// fully-complete 3-segment job serializes its payload as `0xE0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentBitfield {
    segment_count: u32,
    bytes: Vec<u8>,
}

impl SegmentBitfield {
    pub fn new(segment_count: u32) -> Self {
        let len = (segment_count as usize).div_ceil(8);
        Self {
            segment_count,
            bytes: vec![0u8; len],
        }
    }

    pub fn segment_count(&self) -> u32 {
        self.segment_count
    }

    pub fn set(&mut self, index: usize) {
        debug_assert!(index < self.segment_count as usize);
        self.bytes[index / 8] |= 1 << (7 - index % 8);
    }

    pub fn clear(&mut self, index: usize) {
        debug_assert!(index < self.segment_count as usize);
        self.bytes[index / 8] &= !(1 << (7 - index % 8));
    }

    pub fn is_set(&self, index: usize) -> bool {
        self.bytes
            .get(index / 8)
            .map(|&b| b & (1 << (7 - index % 8)) != 0)
            .unwrap_or(false)
    }

    pub fn count_set(&self) -> usize {
        (0..self.segment_count as usize)
            .filter(|&i| self.is_set(i))
            .count()
    }

    pub fn is_complete(&self) -> bool {
        self.count_set() == self.segment_count as usize
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes
    }

    /// Serialize with the magic/version/count/CRC header (big-endian).
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.bytes.len());
        out.extend_from_slice(&MAGIC.to_be_bytes());
        out.extend_from_slice(&VERSION.to_be_bytes());
        out.extend_from_slice(&self.segment_count.to_be_bytes());
        out.extend_from_slice(&ieee_crc32(&self.bytes).to_be_bytes());
        out.extend_from_slice(&self.bytes);
        out
    }

    /// Decode a state file. Any mismatch — magic, version, CRC, payload
    /// length, or a segment count different from `expected_count` — is an
    /// integrity failure: the caller discards the state and starts fresh.
    pub fn decode(data: &[u8], expected_count: u32) -> Result<Self, DownloadError> {
        if data.len() < HEADER_LEN {
            return Err(integrity("truncated header"));
        }
        let magic = u32::from_be_bytes(data[0..4].try_into().unwrap());
        if magic != MAGIC {
            return Err(integrity("bad magic"));
        }
        let version = u16::from_be_bytes(data[4..6].try_into().unwrap());
        if version != VERSION {
            return Err(integrity("unsupported version"));
        }
        let segment_count = u32::from_be_bytes(data[6..10].try_into().unwrap());
        if segment_count != expected_count {
            return Err(integrity("segment count mismatch"));
        }
        let stored_crc = u32::from_be_bytes(data[10..14].try_into().unwrap());

        let payload = &data[HEADER_LEN..];
        if payload.len() != (segment_count as usize).div_ceil(8) {
            return Err(integrity("payload length mismatch"));
        }
        if ieee_crc32(payload) != stored_crc {
            return Err(integrity("CRC mismatch"));
        }

        Ok(Self {
            segment_count,
            bytes: payload.to_vec(),
        })
    }
}

fn integrity(reason: &str) -> DownloadError {
    DownloadError::Integrity {
        reason: reason.to_owned(),
    }
}

/// Durable store for one job's bitfield. "Set bit + persist" is a single
/// critical section so concurrent segment completions serialize.
pub struct StateStore {
    path: PathBuf,
    inner: Mutex<SegmentBitfield>,
}

impl StateStore {
    /// Load the state file from `workdir`, discarding it on any integrity
    /// failure, then downgrade bits whose segment file is missing or empty.
    ///
    /// Returns the store plus the surviving completed indices.
    pub async fn load_or_init(
        workdir: &Path,
        segment_count: u32,
    ) -> Result<(Self, Vec<usize>), DownloadError> {
        let path = state_file_path(workdir);
        let mut bitfield = match tokio::fs::read(&path).await {
            Ok(data) => match SegmentBitfield::decode(&data, segment_count) {
                Ok(bitfield) => bitfield,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "discarding resume state");
                    SegmentBitfield::new(segment_count)
                }
            },
            Err(_) => {
                debug!(path = %path.display(), "no resume state, starting fresh");
                SegmentBitfield::new(segment_count)
            }
        };

        // Downgrade pass: a set bit must be backed by a non-empty segment file.
        let mut survivors = Vec::new();
        let mut downgraded = false;
        for index in 0..segment_count as usize {
            if !bitfield.is_set(index) {
                continue;
            }
            let seg_path = workdir.join(segment_file_name(index));
            let ok = tokio::fs::metadata(&seg_path)
                .await
                .map(|m| m.is_file() && m.len() > 0)
                .unwrap_or(false);
            if ok {
                survivors.push(index);
            } else {
                warn!(segment = index, "completed bit without segment file, clearing");
                bitfield.clear(index);
                downgraded = true;
            }
        }

        let store = Self {
            path,
            inner: Mutex::new(bitfield),
        };
        if downgraded {
            store.persist().await?;
        }
        Ok((store, survivors))
    }

    /// Mark segment `index` complete and persist the bitfield atomically.
    ///
    /// Callers must only invoke this after the segment file's rename has
    /// returned.
    pub async fn mark_complete(&self, index: usize) -> Result<(), DownloadError> {
        let mut guard = self.inner.lock().await;
        guard.set(index);
        let encoded = guard.encode();
        atomic::write_bytes(&self.path, &encoded).await?;
        Ok(())
    }

    pub async fn persist(&self) -> Result<(), DownloadError> {
        let guard = self.inner.lock().await;
        let encoded = guard.encode();
        atomic::write_bytes(&self.path, &encoded).await?;
        Ok(())
    }

    pub async fn snapshot(&self) -> SegmentBitfield {
        self.inner.lock().await.clone()
    }

    /// Delete the state file (job completed; the workdir is going away).
    pub async fn remove(&self) -> Result<(), DownloadError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
