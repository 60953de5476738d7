// SPDX-License-Identifier: MIT

//! Damaged-directory-record check.
//!
//! Runs after the invalid-cluster normalizer so that the chain values it
//! reads have already been sanitized. Per visited record it validates the
//! start cluster, the long-name chain, the stored short name and, for
//! directories, the size field and the `.` / `..` pair.

#[cfg(all(not(feature = "std"), feature = "alloc"))]
use alloc::vec::Vec;

use fatio::prelude::*;

use crate::core::checker::CheckMode;
use crate::core::errors::*;
use crate::fs::fat::chkdsk::classify::{self, ClusterClass};
use crate::fs::fat::chkdsk::log::{LogId, ReportLog, TestCase};
use crate::fs::fat::chkdsk::walker::{
    DirRecord, LfnOp, RecordVisitor, Visit, traverse, traverse_lfn_records,
};
use crate::fs::fat::chkdsk::{normalize, salvage};
use crate::fs::fat::constant::*;
use crate::fs::fat::meta::FatMeta;
use crate::fs::fat::table;
use crate::fs::fat::types::DirEntry;
use crate::fs::fat::utils;
use zerocopy::{FromBytes, IntoBytes};

/// Driver for the directory-record check: normalize invalid cluster
/// values, walk every record, then write the per-kind counters out.
pub fn run<IO: BlockIO + ?Sized>(
    io: &mut IO,
    meta: &FatMeta,
    log: &mut ReportLog,
    mode: CheckMode,
) -> FsCheckResult<()> {
    log.clear_records();

    normalize::rewrite_invalid_slots(io, meta, log, mode)?;
    normalize::validate_chains(io, meta, log, mode)?;

    let mut visitor = DirRecordCheck {
        log: &mut *log,
        mode,
        root_checked: false,
    };
    traverse(io, meta, &mut visitor, false, false)?;

    let mut started = false;
    for id in &LogId::ALL[LogId::DDR_FIRST..=LogId::DDR_LAST] {
        if !log.is_zero(*id) {
            if !started {
                log.start_test_case(TestCase::DirRecords);
                started = true;
            }
            log.write_record(io, meta, *id)?;
        }
    }
    if started {
        log.end_test_case(io, meta)?;
    }
    Ok(())
}

struct DirRecordCheck<'l> {
    log: &'l mut ReportLog,
    mode: CheckMode,
    root_checked: bool,
}

impl<'l, IO: BlockIO + ?Sized> RecordVisitor<IO> for DirRecordCheck<'l> {
    fn visit(&mut self, io: &mut IO, meta: &FatMeta, record: &DirRecord) -> FsCheckResult<Visit> {
        if !self.root_checked {
            self.root_checked = true;
            self.check_root(io, meta)?;
        }

        let cluster = record.entry.first_cluster(meta.kind);
        if cluster == 0 {
            // Empty files legitimately carry no cluster.
            return Ok(Visit::Clean);
        }

        if classify::classify(meta, cluster) != ClusterClass::Valid {
            self.log.add_invalid_cluster(meta, cluster);
            if self.mode.fixing() {
                salvage::delete_record_and_lfn(io, meta, record)?;
                return Ok(Visit::DiskChanged);
            }
            return Ok(Visit::Clean);
        }

        if table::read_entry(io, meta, cluster, 0)? == FAT_FREE_CLUSTER {
            // Record points at a cluster the table says is free.
            self.log.add(LogId::DdrClusterFree);
            if self.mode.fixing() {
                salvage::delete_record_and_lfn(io, meta, record)?;
                return Ok(Visit::DiskChanged);
            }
        }

        let mut changed = false;

        if let Some(lfn_start) = &record.lfn_start {
            changed |= self.check_lfn_chain(io, meta, lfn_start, &record.entry.name)?;
        }

        if utils::has_illegal_sfn_chars(&record.entry.name) {
            // Report only; renaming is not the checker's call.
            self.log.add(LogId::DdrSfnIllegalChar);
        }

        if record.entry.is_dir() {
            changed |= self.check_dir(io, meta, record, cluster)?;
        }

        Ok(if changed { Visit::DiskChanged } else { Visit::Clean })
    }
}

impl<'l> DirRecordCheck<'l> {
    /// Once per check: validate the root's own anchor.
    fn check_root<IO: BlockIO + ?Sized>(&mut self, io: &mut IO, meta: &FatMeta) -> FsCheckResult<()> {
        if meta.is_fat32() {
            let value = table::read_entry(io, meta, meta.root_cluster, 0)?;
            if matches!(
                classify::classify(meta, value),
                ClusterClass::Free
                    | ClusterClass::Reserved
                    | ClusterClass::Bad
                    | ClusterClass::OutOfRange
            ) {
                self.log.add(LogId::DdrRootStartCluster);
            }
        } else {
            let root_bytes = meta.root_entry_count as u64 * DIR_ENTRY_SIZE as u64;
            if root_bytes != meta.root_dir_sectors() * meta.bytes_per_sector as u64 {
                self.log.add(LogId::DdrRootDirRange);
            }
        }
        Ok(())
    }

    /// Validates every long-name continuation record of one chain.
    fn check_lfn_chain<IO: BlockIO + ?Sized>(
        &mut self,
        io: &mut IO,
        meta: &FatMeta,
        lfn_start: &crate::fs::fat::chkdsk::walker::RecordLocation,
        sfn_name: &[u8; 11],
    ) -> FsCheckResult<bool> {
        let expected = utils::sfn_checksum(sfn_name);
        let fixing = self.mode.fixing();

        let mut checksum_errors = 0u16;
        let mut cluster_errors = 0u16;
        let mut total_chars = 0usize;

        let changed = traverse_lfn_records(io, meta, lfn_start, |lfn| {
            if lfn.checksum != expected {
                checksum_errors += 1;
            }
            total_chars += lfn.char_count();

            if lfn.cluster != 0 {
                cluster_errors += 1;
                if fixing {
                    lfn.cluster = 0;
                    return Ok(LfnOp::Rewrite);
                }
            }
            Ok(LfnOp::Keep)
        })?;

        for _ in 0..checksum_errors {
            self.log.add(LogId::DdrLfnChecksum);
        }
        for _ in 0..cluster_errors {
            self.log.add(LogId::DdrLfnCluster);
        }
        if total_chars > MAX_LFN_CHARS {
            self.log.add(LogId::DdrLfnExceedMax);
        }

        Ok(changed)
    }

    /// Directory-specific checks: size field, `.` and `..` targets.
    fn check_dir<IO: BlockIO + ?Sized>(
        &mut self,
        io: &mut IO,
        meta: &FatMeta,
        record: &DirRecord,
        cluster: u32,
    ) -> FsCheckResult<bool> {
        let mut changed = false;

        let declared = record.entry.file_size;
        if declared != 0 {
            self.log.add(LogId::DdrDirSize);
            if self.mode.fixing() {
                let mut entry = record.entry;
                entry.file_size = 0;
                salvage::rewrite_record_at(io, meta, &record.location, &entry)?;
                changed = true;
            }
        }

        // The directory's own head sector carries its `.` / `..` pair.
        let bps = meta.bytes_per_sector as usize;
        let head_sector = meta.cluster_to_sector(cluster);
        let mut head = vec![0u8; bps];
        io.read_at(meta.sector_offset(head_sector), &mut head)?;

        let mut dot = DirEntry::read_from_bytes(&head[0..DIR_ENTRY_SIZE])
            .map_err(|_| FsCheckError::Invalid("dot record"))?;
        let mut dotdot = DirEntry::read_from_bytes(&head[DIR_ENTRY_SIZE..2 * DIR_ENTRY_SIZE])
            .map_err(|_| FsCheckError::Invalid("dot-dot record"))?;
        let mut head_dirty = false;

        if dot.first_cluster(meta.kind) != cluster {
            self.log.add(LogId::DdrDot);
            if self.mode.fixing() {
                dot.set_first_cluster(meta.kind, cluster);
                head[0..DIR_ENTRY_SIZE].copy_from_slice(dot.as_bytes());
                head_dirty = true;
            }
        }

        let parent_cluster = record.parent.cluster;
        let dotdot_cl = dotdot.first_cluster(meta.kind);
        if dotdot_cl != parent_cluster || dotdot_cl == cluster {
            self.log.add(LogId::DdrDotDot);
            if self.mode.fixing() {
                dotdot.set_first_cluster(meta.kind, parent_cluster);
                head[DIR_ENTRY_SIZE..2 * DIR_ENTRY_SIZE].copy_from_slice(dotdot.as_bytes());
                head_dirty = true;
            }
        }

        if head_dirty {
            io.write_at(meta.sector_offset(head_sector), &head)?;
            changed = true;
        }

        Ok(changed)
    }
}
