// SPDX-License-Identifier: MIT

//! Invalid-cluster-value normalization.
//!
//! Two passes that sanitize the allocation table before the cross-link,
//! lost-chain and file-size checks walk it. Pass A sweeps the raw table
//! for reserved and out-of-range slot values; pass B walks every record's
//! chain looking for bad and free links.

#[cfg(all(not(feature = "std"), feature = "alloc"))]
use alloc::vec::Vec;

use fatio::prelude::*;

use crate::core::checker::CheckMode;
use crate::core::errors::*;
use crate::fs::fat::chkdsk::classify::{self, ClusterClass};
use crate::fs::fat::chkdsk::log::ReportLog;
use crate::fs::fat::chkdsk::walker::{DirRecord, RecordVisitor, Visit, traverse};
use crate::fs::fat::constant::*;
use crate::fs::fat::meta::FatMeta;
use crate::fs::fat::table::{self, Link};

/// Pass A: rewrite reserved and out-of-range slot values to end-of-chain.
///
/// Free and bad values are left alone; the chain validation of pass B and
/// the chain checks deal with those.
pub fn rewrite_invalid_slots<IO: BlockIO + ?Sized>(
    io: &mut IO,
    meta: &FatMeta,
    log: &mut ReportLog,
    mode: CheckMode,
) -> FsCheckResult<()> {
    for cluster in FAT_FIRST_CLUSTER..meta.cluster_limit() {
        let value = table::read_entry(io, meta, cluster, 0)?;
        match classify::classify(meta, value) {
            ClusterClass::Reserved | ClusterClass::OutOfRange => {
                log.add_invalid_cluster(meta, value);
                if mode.fixing() {
                    table::write_entry(io, meta, cluster, meta.eoc())?;
                }
            }
            _ => {}
        }
    }
    table::flush(io)?;
    Ok(())
}

/// Pass B: walk every record's chain validating its links.
pub fn validate_chains<IO: BlockIO + ?Sized>(
    io: &mut IO,
    meta: &FatMeta,
    log: &mut ReportLog,
    mode: CheckMode,
) -> FsCheckResult<()> {
    let mut visitor = ChainValidator { log, mode };
    traverse(io, meta, &mut visitor, true, false)?;
    Ok(())
}

struct ChainValidator<'l> {
    log: &'l mut ReportLog,
    mode: CheckMode,
}

impl<'l, IO: BlockIO + ?Sized> RecordVisitor<IO> for ChainValidator<'l> {
    fn visit(&mut self, io: &mut IO, meta: &FatMeta, record: &DirRecord) -> FsCheckResult<Visit> {
        let start = record.entry.first_cluster(meta.kind);
        if !classify::is_valid_link_target(meta, start) {
            return Ok(Visit::Clean);
        }

        let mut previous: Option<u32> = None;
        let mut current = start;
        let mut followed = 0u32;

        loop {
            followed += 1;
            if followed > meta.cluster_count {
                break;
            }

            match table::read_link(io, meta, current)? {
                Link::Next(next) => {
                    previous = Some(current);
                    current = next;
                }
                Link::EndOfChain => break,
                // Reserved and out-of-range values were already handled by
                // the slot sweep.
                Link::Invalid(_) => break,
                Link::Bad => {
                    self.handle_bad_link(io, meta, start, previous, current)?;
                    break;
                }
                Link::Free => {
                    // A free slot inside a chain; the cluster before it is
                    // the real chain end.
                    if current == start {
                        break;
                    }
                    self.log.add_invalid_cluster(meta, FAT_FREE_CLUSTER);
                    if self.mode.fixing() {
                        if let Some(prev) = previous {
                            table::write_eoc(io, meta, prev)?;
                            table::flush(io)?;
                        }
                    }
                    break;
                }
            }
        }

        Ok(Visit::Clean)
    }
}

impl<'l> ChainValidator<'l> {
    /// A chain slot carries the bad-cluster marker. Decide whether the
    /// cluster is really unreadable before rewriting anything.
    fn handle_bad_link<IO: BlockIO + ?Sized>(
        &mut self,
        io: &mut IO,
        meta: &FatMeta,
        chain_start: u32,
        previous: Option<u32>,
        cluster: u32,
    ) -> FsCheckResult<()> {
        self.log.add_invalid_cluster(meta, meta.bad_marker());

        if !self.mode.fixing() {
            return Ok(());
        }

        let bps = meta.bytes_per_sector as usize;
        let mut sector_buf = vec![0u8; bps];
        let start_sector = meta.cluster_to_sector(cluster);
        let mut readable = true;
        for s in 0..meta.sectors_per_cluster as u64 {
            if io
                .read_at(meta.sector_offset(start_sector + s), &mut sector_buf)
                .is_err()
            {
                readable = false;
                break;
            }
        }

        if readable {
            // Every sector reads fine: the marker was wrong, the chain
            // simply ends here.
            table::write_eoc(io, meta, cluster)?;
            table::flush(io)?;
        } else if cluster != chain_start {
            // Genuinely unreadable: cut the chain before it and leave the
            // bad marker in place.
            if let Some(prev) = previous {
                table::write_eoc(io, meta, prev)?;
                table::flush(io)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::fat::chkdsk::log::LogId;

    #[test]
    fn test_rewrite_invalid_slots() {
        let meta = FatMeta::fat16(4 * 1024 * 1024, 2048);
        let mut buf = vec![0u8; meta.volume_size_bytes as usize];
        let mut io = MemBlockIO::new(&mut buf);

        table::write_entry(&mut io, &meta, 5, 0xFFF0).unwrap(); // reserved
        table::write_entry(&mut io, &meta, 6, meta.cluster_limit() + 7).unwrap(); // out of range
        table::write_entry(&mut io, &meta, 7, meta.bad_marker()).unwrap(); // untouched
        table::write_entry(&mut io, &meta, 8, meta.eoc()).unwrap(); // untouched

        let mut log = ReportLog::new();
        rewrite_invalid_slots(&mut io, &meta, &mut log, CheckMode::Fix).unwrap();

        assert_eq!(table::read_entry(&mut io, &meta, 5, 0).unwrap(), meta.eoc());
        assert_eq!(table::read_entry(&mut io, &meta, 6, 0).unwrap(), meta.eoc());
        assert_eq!(
            table::read_entry(&mut io, &meta, 7, 0).unwrap(),
            meta.bad_marker()
        );
        assert_eq!(table::read_entry(&mut io, &meta, 8, 0).unwrap(), meta.eoc());

        assert_eq!(log.count(LogId::DdrClusterReserved), 1);
        assert_eq!(log.count(LogId::DdrClusterOutOfRange), 1);
    }

    #[test]
    fn test_report_mode_leaves_slots() {
        let meta = FatMeta::fat16(4 * 1024 * 1024, 2048);
        let mut buf = vec![0u8; meta.volume_size_bytes as usize];
        let mut io = MemBlockIO::new(&mut buf);

        table::write_entry(&mut io, &meta, 5, 0xFFF3).unwrap();

        let mut log = ReportLog::new();
        rewrite_invalid_slots(&mut io, &meta, &mut log, CheckMode::ReportOnly).unwrap();

        assert_eq!(table::read_entry(&mut io, &meta, 5, 0).unwrap(), 0xFFF3);
        assert_eq!(log.count(LogId::DdrClusterReserved), 1);
    }
}
