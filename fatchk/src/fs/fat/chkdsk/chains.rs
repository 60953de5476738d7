// SPDX-License-Identifier: MIT

//! Lost-cluster-chain and cross-linked-chain detection and resolution.
//!
//! Both checks share the 2-bit cluster state map and the same chain
//! marking walker; they differ only in what the four state codes mean and
//! in what a repeat visit implies.

#[cfg(all(not(feature = "std"), feature = "alloc"))]
use alloc::vec::Vec;

use fatio::prelude::*;

use crate::core::checker::{CheckMode, ClusterStateMap};
use crate::core::errors::*;
use crate::fs::fat::chkdsk::classify::{self, ClusterClass};
use crate::fs::fat::chkdsk::log::{LogId, ReportLog, TestCase};
use crate::fs::fat::chkdsk::walker::{DirRecord, RecordVisitor, Visit, traverse};
use crate::fs::fat::chkdsk::{salvage, sizes};
use crate::fs::fat::constant::*;
use crate::fs::fat::meta::FatMeta;
use crate::fs::fat::table::{self, Link};
use crate::fs::fat::types::DirEntry;
use crate::fs::fat::utils;
use zerocopy::{FromBytes, IntoBytes};

// Shared state codes. The issue code is candidate-lost-chain for the lost
// check and cross-linked for the cross-link check; the demoted code is
// not-a-chain-head respectively chain-resolved.
const STATE_FREE: u8 = 0;
const STATE_ON_DISK: u8 = 1;
const STATE_ISSUE: u8 = 2;
const STATE_DEMOTED: u8 = 3;

/// Follows the chain from `start`, setting every visited cluster's state.
///
/// Stops when the next link is free or invalid (marking the current
/// cluster once more), on the bad-cluster marker (mark once, stop), and
/// after `cluster_count` steps on cyclic input.
pub fn mark_chain<IO: BlockIO + ?Sized>(
    io: &mut IO,
    meta: &FatMeta,
    map: &mut ClusterStateMap,
    start: u32,
    state: u8,
) -> FsCheckResult<()> {
    if !classify::is_valid_link_target(meta, start) {
        return Ok(());
    }

    let mut current = start;
    let mut followed = 0u32;
    loop {
        followed += 1;
        if followed > meta.cluster_count {
            break;
        }

        map.set(current, state);
        match table::read_link(io, meta, current)? {
            Link::Next(next) => {
                // The cluster before a freed slot is the real chain end.
                if table::read_entry(io, meta, next, 0)? == FAT_FREE_CLUSTER {
                    break;
                }
                current = next;
            }
            _ => break,
        }
    }
    Ok(())
}

// === Lost cluster chains ===

/// Driver for the lost-cluster-chain check.
///
/// Phase 1 marks every chain reachable from the tree (salvage output from
/// earlier runs included) as present on disk; phase 2 turns every
/// allocated-but-unreached cluster into a candidate; phase 3 demotes
/// candidates some other candidate points at, leaving only chain heads;
/// phase 4 salvages each head.
pub fn run_lost<IO: BlockIO + ?Sized>(
    io: &mut IO,
    meta: &FatMeta,
    log: &mut ReportLog,
    mode: CheckMode,
    files_only: bool,
) -> FsCheckResult<()> {
    log.clear_records();
    let mut map = ClusterStateMap::new(FAT_FIRST_CLUSTER, meta.cluster_count as usize);

    let mut marker = LostChainMark { map: &mut map };
    traverse(io, meta, &mut marker, true, true)?;

    if meta.is_fat32() {
        // The root's own chain is never reached by the tree scan that
        // starts below it.
        let mut cl = meta.root_cluster;
        let mut followed = 0u32;
        loop {
            followed += 1;
            if followed > meta.cluster_count {
                break;
            }
            map.set(cl, STATE_ON_DISK);
            match table::read_link(io, meta, cl)? {
                Link::Next(next) => cl = next,
                _ => break,
            }
        }
    }

    // Phase 2: allocated but unreached -> candidate.
    for cl in FAT_FIRST_CLUSTER..meta.cluster_limit() {
        if map.get(cl) == STATE_FREE && table::read_entry(io, meta, cl, 0)? != FAT_FREE_CLUSTER {
            map.set(cl, STATE_ISSUE);
        }
    }

    // Phase 3: demote every candidate some candidate links to; what
    // remains tagged is a true chain head.
    for cl in FAT_FIRST_CLUSTER..meta.cluster_limit() {
        if matches!(map.get(cl), STATE_ISSUE | STATE_DEMOTED) {
            let value = table::read_entry(io, meta, cl, 0)?;
            if classify::classify(meta, value) == ClusterClass::Valid
                && matches!(map.get(value), STATE_ISSUE | STATE_DEMOTED)
            {
                map.set(value, STATE_DEMOTED);
            }
        }
    }

    // Phase 4: salvage each head.
    let mut folder: Option<u32> = None;
    let mut file_seq = 0u16;
    let mut dir_seq = 0u16;
    let bps = meta.bytes_per_sector as usize;
    let mut head_buf = vec![0u8; bps];

    for cl in FAT_FIRST_CLUSTER..meta.cluster_limit() {
        if map.get(cl) != STATE_ISSUE {
            continue;
        }

        if log.is_zero(LogId::LostChain) {
            log.start_test_case(TestCase::LostChains);
        }
        log.add(LogId::LostChain);

        if !mode.fixing() {
            continue;
        }

        if folder.is_none() {
            folder = Some(
                salvage::make_recovery_dir(io, meta, LOST_CHAIN_FOLDER)
                    .map_err(FsCheckError::Salvage)?,
            );
        }
        let folder_cl = folder.unwrap_or(0);

        io.read_at(meta.sector_offset(meta.cluster_to_sector(cl)), &mut head_buf)?;
        let looks_like_dir = !files_only && is_dir_head(meta, &head_buf, cl);

        if looks_like_dir {
            let name = utils::sequenced_name(LOST_CHAIN_DIR_PREFIX, dir_seq, RECOVERY_EXTENSION);
            dir_seq += 1;
            salvage::create_salvage_entry(io, meta, folder_cl, name, false, cl, 0)
                .map_err(FsCheckError::Salvage)?;
        } else {
            let clusters = table::chain_len(io, meta, cl)?;
            let size = (clusters.max(1) as u64 * meta.bytes_per_cluster as u64) as u32;
            let name = utils::sequenced_name(LOST_CHAIN_FILE_PREFIX, file_seq, RECOVERY_EXTENSION);
            file_seq += 1;
            salvage::create_salvage_entry(io, meta, folder_cl, name, true, cl, size)
                .map_err(FsCheckError::Salvage)?;
        }
    }

    if !log.is_zero(LogId::LostChain) {
        log.write_record(io, meta, LogId::LostChain)?;
        log.end_test_case(io, meta)?;
    }
    Ok(())
}

/// A lost head is salvaged as a directory only when its first sector
/// opens with a self-referencing `.` / `..` pair.
fn is_dir_head(meta: &FatMeta, head: &[u8], cluster: u32) -> bool {
    if head.len() < 2 * DIR_ENTRY_SIZE {
        return false;
    }
    if head[0] != b'.' || head[DIR_ENTRY_SIZE] != b'.' || head[DIR_ENTRY_SIZE + 1] != b'.' {
        return false;
    }
    DirEntry::read_from_bytes(&head[0..DIR_ENTRY_SIZE])
        .map(|dot| dot.first_cluster(meta.kind) == cluster)
        .unwrap_or(false)
}

struct LostChainMark<'m> {
    map: &'m mut ClusterStateMap,
}

impl<'m, IO: BlockIO + ?Sized> RecordVisitor<IO> for LostChainMark<'m> {
    fn visit(&mut self, io: &mut IO, meta: &FatMeta, record: &DirRecord) -> FsCheckResult<Visit> {
        let start = record.entry.first_cluster(meta.kind);
        mark_chain(io, meta, self.map, start, STATE_ON_DISK)?;
        Ok(Visit::Clean)
    }
}

// === Cross-linked chains ===

/// Driver for the cross-linked-chain check: a marking pass over every
/// record's chain, then a resolve pass with long-name context retained.
pub fn run_cross<IO: BlockIO + ?Sized>(
    io: &mut IO,
    meta: &FatMeta,
    log: &mut ReportLog,
    mode: CheckMode,
    files_only: bool,
) -> FsCheckResult<()> {
    log.clear_records();
    let mut map = ClusterStateMap::new(FAT_FIRST_CLUSTER, meta.cluster_count as usize);

    let mut marker = CrossLinkMark { map: &mut map };
    traverse(io, meta, &mut marker, true, false)?;

    let mut resolver = CrossLinkResolve {
        map: &mut map,
        log: &mut *log,
        mode,
        files_only,
        folder: None,
        file_seq: 0,
        dir_seq: 0,
    };
    traverse(io, meta, &mut resolver, false, false)?;

    if !log.is_zero(LogId::CrossLinked) {
        log.write_record(io, meta, LogId::CrossLinked)?;
        log.end_test_case(io, meta)?;
    }
    Ok(())
}

struct CrossLinkMark<'m> {
    map: &'m mut ClusterStateMap,
}

impl<'m, IO: BlockIO + ?Sized> RecordVisitor<IO> for CrossLinkMark<'m> {
    fn visit(&mut self, io: &mut IO, meta: &FatMeta, record: &DirRecord) -> FsCheckResult<Visit> {
        let start = record.entry.first_cluster(meta.kind);
        if !classify::is_valid_link_target(meta, start) {
            return Ok(Visit::Clean);
        }

        let mut current = start;
        let mut followed = 0u32;
        loop {
            followed += 1;
            if followed > meta.cluster_count {
                break;
            }

            let state = self.map.get(current);
            if state != STATE_ON_DISK && state != STATE_ISSUE {
                self.map.set(current, STATE_ON_DISK);
            } else if state != STATE_ISSUE && self.map.get(start) != STATE_ISSUE {
                // Seen before through some other record: cross-linked. A
                // chain whose own head is already flagged counts as one
                // event; its remaining clusters are not flagged again.
                self.map.set(current, STATE_ISSUE);
            }

            match table::read_link(io, meta, current)? {
                Link::Next(next) => current = next,
                Link::EndOfChain => break,
                Link::Bad => return Err(FsChainError::Defective(current).into()),
                Link::Free | Link::Invalid(_) => return Err(FsCheckError::InvalidCluster),
            }
        }
        Ok(Visit::Clean)
    }
}

struct CrossLinkResolve<'m> {
    map: &'m mut ClusterStateMap,
    log: &'m mut ReportLog,
    mode: CheckMode,
    files_only: bool,
    folder: Option<u32>,
    file_seq: u16,
    dir_seq: u16,
}

impl<'m, IO: BlockIO + ?Sized> RecordVisitor<IO> for CrossLinkResolve<'m> {
    fn visit(&mut self, io: &mut IO, meta: &FatMeta, record: &DirRecord) -> FsCheckResult<Visit> {
        let start = record.entry.first_cluster(meta.kind);
        if !classify::is_valid_link_target(meta, start) {
            return Ok(Visit::Clean);
        }

        let bpc = meta.bytes_per_cluster as u64;
        let mut previous = 0u32;
        let mut traversed = 0u32;
        let mut current = start;
        let mut followed = 0u32;

        loop {
            followed += 1;
            if followed > meta.cluster_count {
                break;
            }

            if self.map.get(current) == STATE_ISSUE {
                if self.log.is_zero(LogId::CrossLinked) {
                    self.log.start_test_case(TestCase::CrossLinks);
                    self.folder = None;
                    self.file_seq = 0;
                    self.dir_seq = 0;
                }
                self.log.add(LogId::CrossLinked);

                if self.mode.fixing() {
                    self.salvage_tail(io, meta, record, current, traversed)?;
                }

                // Count each shared chain once, fixed or not.
                mark_chain(io, meta, self.map, current, STATE_DEMOTED)?;
            }

            if self.mode.fixing() && self.map.get(current) == STATE_DEMOTED {
                if previous != 0 {
                    if !record.entry.is_dir() {
                        let mut entry = record.entry;
                        entry.file_size = (traversed as u64 * bpc) as u32;
                        salvage::rewrite_record_at(io, meta, &record.location, &entry)?;
                    }
                    table::write_eoc(io, meta, previous)?;
                    table::flush(io)?;
                } else {
                    // The record's own start cluster is shared: the whole
                    // record goes away.
                    salvage::delete_record_and_lfn(io, meta, record)?;
                }
                return Ok(Visit::DiskChanged);
            }

            previous = current;
            match table::read_link(io, meta, current)? {
                Link::Next(next) => {
                    current = next;
                    traversed += 1;
                }
                Link::EndOfChain => break,
                Link::Bad => return Err(FsChainError::Defective(current).into()),
                Link::Free | Link::Invalid(_) => return Err(FsCheckError::InvalidCluster),
            }
        }
        Ok(Visit::Clean)
    }
}

impl<'m> CrossLinkResolve<'m> {
    /// Creates the salvage entry preserving the shared remainder starting
    /// at `cluster`.
    fn salvage_tail<IO: BlockIO + ?Sized>(
        &mut self,
        io: &mut IO,
        meta: &FatMeta,
        record: &DirRecord,
        cluster: u32,
        traversed: u32,
    ) -> FsCheckResult<()> {
        if self.folder.is_none() {
            self.folder = Some(
                salvage::make_recovery_dir(io, meta, CROSS_LINK_FOLDER)
                    .map_err(FsCheckError::Salvage)?,
            );
        }
        let folder_cl = self.folder.unwrap_or(0);
        let bpc = meta.bytes_per_cluster as u64;

        if record.entry.is_dir() {
            let bps = meta.bytes_per_sector as usize;
            let mut head = vec![0u8; bps];
            io.read_at(meta.sector_offset(meta.cluster_to_sector(cluster)), &mut head)?;

            if !self.files_only && is_dir_head(meta, &head, cluster) {
                let name = utils::sequenced_name(CROSS_LINK_DIR_PREFIX, self.dir_seq, RECOVERY_EXTENSION);
                self.dir_seq += 1;
                salvage::create_salvage_entry(io, meta, folder_cl, name, false, cluster, 0)
                    .map_err(FsCheckError::Salvage)?;

                // Rewire the salvaged directory's `..` to the recovery
                // folder.
                let mut dotdot =
                    DirEntry::read_from_bytes(&head[DIR_ENTRY_SIZE..2 * DIR_ENTRY_SIZE])
                        .map_err(|_| FsCheckError::Invalid("dot-dot record"))?;
                dotdot.set_first_cluster(meta.kind, folder_cl);
                head[DIR_ENTRY_SIZE..2 * DIR_ENTRY_SIZE].copy_from_slice(dotdot.as_bytes());
                io.write_at(meta.sector_offset(meta.cluster_to_sector(cluster)), &head)?;
            } else {
                // A cross-link into the middle of a directory listing is
                // preserved as a plain file.
                let size = sizes::exact_size(io, meta, cluster)?.max(bpc);
                let name = utils::sequenced_name(CROSS_LINK_FILE_PREFIX, self.file_seq, RECOVERY_EXTENSION);
                self.file_seq += 1;
                salvage::create_salvage_entry(io, meta, folder_cl, name, true, cluster, size as u32)
                    .map_err(FsCheckError::Salvage)?;
            }
        } else {
            let declared = record.entry.file_size as u64;
            let size = declared.saturating_sub(traversed as u64 * bpc).max(bpc);
            let name = utils::sequenced_name(CROSS_LINK_FILE_PREFIX, self.file_seq, RECOVERY_EXTENSION);
            self.file_seq += 1;
            salvage::create_salvage_entry(io, meta, folder_cl, name, true, cluster, size as u32)
                .map_err(FsCheckError::Salvage)?;
        }
        Ok(())
    }
}
