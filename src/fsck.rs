//! Integrity scanner — a forward pass over every block past the reserved
//! region, independent of the stream/B+Tree layers above it. Useful after a
//! crash or suspected bit rot, when the registries themselves might be the
//! thing in question.
//!
//! Every block is self-describing (it carries its own stream id and chain
//! pointers once unsealed), so the scan needs nothing but the encryption
//! key — it does not walk the entry tree or the path tree, and does not
//! require the archive to open cleanly at all.

use crate::block::BlockDevice;
use crate::error::Result;
use crate::header::RESERVED_BLOCKS;

/// Health verdict for one scanned block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockHealth {
    /// GCM tag and SHA-1 digest both checked out.
    Healthy,
    /// The block failed to unseal or its digest didn't match — `reason`
    /// carries the underlying error text for diagnostics.
    Corrupt { reason: String },
}

impl BlockHealth {
    pub fn is_usable(&self) -> bool {
        matches!(self, BlockHealth::Healthy)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanQuality {
    /// All scanned blocks healthy.
    Full,
    /// Some blocks corrupt, most healthy.
    Partial,
    /// Fewer than half of scanned blocks healthy.
    Catastrophic,
}

#[derive(Debug)]
pub struct FsckReport {
    pub total_scanned: usize,
    pub healthy: usize,
    pub corrupt: usize,
    /// `(block index, health)` for every block past the reserved region.
    pub block_log: Vec<(u64, BlockHealth)>,
    pub quality: ScanQuality,
}

impl FsckReport {
    pub fn health_pct(&self) -> f64 {
        if self.total_scanned == 0 {
            return 100.0;
        }
        self.healthy as f64 / self.total_scanned as f64 * 100.0
    }

    pub fn summary(&self) -> String {
        format!(
            "{:?}: {}/{} blocks healthy ({:.1}%)",
            self.quality,
            self.healthy,
            self.total_scanned,
            self.health_pct()
        )
    }
}

/// Scan every block in `dev` from the first non-reserved block to the end,
/// never returning `Err` for corrupt block content — only a genuine I/O
/// failure on the underlying file propagates.
pub fn scan(dev: &mut BlockDevice) -> Result<FsckReport> {
    let total_blocks = dev.size();
    let mut block_log = Vec::new();
    let mut healthy = 0usize;
    let mut corrupt = 0usize;

    let mut idx = RESERVED_BLOCKS.min(total_blocks);
    while idx < total_blocks {
        let health = match dev.load_block(idx) {
            Ok(_) => {
                healthy += 1;
                BlockHealth::Healthy
            }
            Err(e) => {
                corrupt += 1;
                BlockHealth::Corrupt { reason: e.to_string() }
            }
        };
        block_log.push((idx, health));
        idx += 1;
    }

    let total_scanned = block_log.len();
    let quality = if total_scanned == 0 {
        ScanQuality::Full
    } else {
        let pct = healthy as f64 / total_scanned as f64;
        if pct >= 0.999 {
            ScanQuality::Full
        } else if pct >= 0.5 {
            ScanQuality::Partial
        } else {
            ScanQuality::Catastrophic
        }
    };

    Ok(FsckReport {
        total_scanned,
        healthy,
        corrupt,
        block_log,
        quality,
    })
}

/// Convenience: open `path` read-only-ish (still takes the exclusive lock,
/// since [`BlockDevice`] has no read-only mode) and scan it.
pub fn scan_file(path: &std::path::Path, key: [u8; 32]) -> Result<FsckReport> {
    let mut dev = BlockDevice::open(path, key)?;
    let report = scan(&mut dev)?;
    dev.close()?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn clean_archive_is_fully_healthy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.vlt");
        let key = [6u8; 32];
        {
            let mut dev = BlockDevice::open(&path, key).unwrap();
            crate::header::create(
                &mut dev,
                Uuid::new_v4(),
                Uuid::nil(),
                Uuid::nil(),
                Uuid::nil(),
                1_700_000_000,
                "t".into(),
            )
            .unwrap();
            dev.close().unwrap();
        }
        let report = scan_file(&path, key).unwrap();
        assert_eq!(report.quality, ScanQuality::Full);
        assert_eq!(report.corrupt, 0);
    }

    #[test]
    fn tampered_block_is_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f2.vlt");
        let key = [6u8; 32];
        {
            let mut dev = BlockDevice::open(&path, key).unwrap();
            crate::header::create(
                &mut dev,
                Uuid::new_v4(),
                Uuid::nil(),
                Uuid::nil(),
                Uuid::nil(),
                1_700_000_000,
                "t".into(),
            )
            .unwrap();
            dev.close().unwrap();
        }
        {
            use std::io::{Seek, SeekFrom, Write};
            let mut f = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
            f.seek(SeekFrom::Start(5 * crate::block::BLOCK_SIZE as u64 + 200)).unwrap();
            f.write_all(&[0xFFu8; 4]).unwrap();
        }
        let report = scan_file(&path, key).unwrap();
        assert!(report.corrupt >= 1);
        assert_ne!(report.quality, ScanQuality::Full);
    }
}
