// SPDX-License-Identifier: MIT

//! Iterative pre-order walk over the on-disk directory hierarchy.
//!
//! The engine keeps an explicit stack of resume positions instead of
//! recursing: when a subdirectory record is met, the current position is
//! pushed first (to continue with its siblings later) and the child second,
//! so the child is scanned next. A child whose computed start sector equals
//! the sector currently being scanned is not descended into; such loops are
//! left to the cross-link check.

#[cfg(all(not(feature = "std"), feature = "alloc"))]
use alloc::vec::Vec;

use fatio::prelude::*;
use zerocopy::FromBytes;

use crate::core::errors::*;
use crate::fs::fat::chkdsk::classify;
use crate::fs::fat::constant::*;
use crate::fs::fat::meta::FatMeta;
use crate::fs::fat::table::{self, Link};
use crate::fs::fat::types::{DirEntry, LfnEntry};

/// "Return address" of one 32-byte record on disk. Recomputed at every
/// visit, never cached beyond one record's processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLocation {
    /// Cluster holding the record; 0 inside the FAT12/16 static root.
    pub cluster: u32,
    pub sector: u64,
    pub offset: usize,
    pub static_root: bool,
}

impl RecordLocation {
    pub const fn zeroed() -> Self {
        Self {
            cluster: 0,
            sector: 0,
            offset: 0,
            static_root: false,
        }
    }
}

/// One visited short-name record, built fresh per visit and owned by the
/// engine for the duration of one visitor call.
#[derive(Debug, Clone)]
pub struct DirRecord {
    pub entry: DirEntry,
    pub location: RecordLocation,
    /// Start of the containing directory (cluster 0 when that is the root).
    pub parent: RecordLocation,
    /// First long-name continuation record preceding this one, when the
    /// walk was asked to track them.
    pub lfn_start: Option<RecordLocation>,
}

/// What a visitor did to the disk. `DiskChanged` makes the engine discard
/// and reread its sector buffer before continuing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    Clean,
    DiskChanged,
}

pub trait RecordVisitor<IO: BlockIO + ?Sized> {
    fn visit(&mut self, io: &mut IO, meta: &FatMeta, record: &DirRecord) -> FsCheckResult<Visit>;
}

struct Frame {
    pos: RecordLocation,
    /// Start cluster of the directory being scanned; 0 for the root.
    dir_start: u32,
}

/// Pre-order traversal of every directory record on the volume.
///
/// `skip_lfn` suppresses long-name tracking entirely; `include_recovery`
/// lets the walk enter entries carrying the recovery or log extension.
/// Terminates on the first visitor error, the first I/O error, or
/// exhaustion of the tree.
pub fn traverse<IO, V>(
    io: &mut IO,
    meta: &FatMeta,
    visitor: &mut V,
    skip_lfn: bool,
    include_recovery: bool,
) -> FsCheckResult<()>
where
    IO: BlockIO + ?Sized,
    V: RecordVisitor<IO>,
{
    let mut stack: Vec<Frame> = Vec::new();

    if meta.is_fat32() {
        let mut root_cl = meta.root_cluster;
        let mut seen = 0u32;
        loop {
            seen += 1;
            if seen > meta.cluster_count {
                return Err(FsChainError::LoopDetected.into());
            }
            let seed = Frame {
                pos: RecordLocation {
                    cluster: root_cl,
                    sector: meta.cluster_to_sector(root_cl),
                    offset: 0,
                    static_root: false,
                },
                dir_start: 0,
            };
            run_stack(io, meta, &mut stack, seed, visitor, skip_lfn, include_recovery)?;

            match table::read_link(io, meta, root_cl)? {
                Link::Next(next) => root_cl = next,
                Link::EndOfChain => break,
                Link::Bad => return Err(FsChainError::Defective(root_cl).into()),
                Link::Free | Link::Invalid(_) => return Err(FsCheckError::InvalidCluster),
            }
        }
    } else {
        let seed = Frame {
            pos: RecordLocation {
                cluster: 0,
                sector: meta.root_start_sector(),
                offset: 0,
                static_root: true,
            },
            dir_start: 0,
        };
        run_stack(io, meta, &mut stack, seed, visitor, skip_lfn, include_recovery)?;
    }

    Ok(())
}

fn run_stack<IO, V>(
    io: &mut IO,
    meta: &FatMeta,
    stack: &mut Vec<Frame>,
    seed: Frame,
    visitor: &mut V,
    skip_lfn: bool,
    include_recovery: bool,
) -> FsCheckResult<()>
where
    IO: BlockIO + ?Sized,
    V: RecordVisitor<IO>,
{
    stack.push(seed);
    while let Some(frame) = stack.pop() {
        scan_directory(io, meta, stack, frame, visitor, skip_lfn, include_recovery)?;
    }
    Ok(())
}

/// Location handed to visitors as the containing directory of a record.
fn parent_location(meta: &FatMeta, dir_start: u32) -> RecordLocation {
    if dir_start == 0 {
        if meta.is_fat32() {
            RecordLocation::zeroed()
        } else {
            RecordLocation {
                cluster: 0,
                sector: meta.root_start_sector(),
                offset: 0,
                static_root: true,
            }
        }
    } else {
        RecordLocation {
            cluster: dir_start,
            sector: meta.cluster_to_sector(dir_start),
            offset: 0,
            static_root: false,
        }
    }
}

/// Scans one directory from `frame.pos` until its data ends or a child
/// descent is scheduled on the stack.
fn scan_directory<IO, V>(
    io: &mut IO,
    meta: &FatMeta,
    stack: &mut Vec<Frame>,
    frame: Frame,
    visitor: &mut V,
    skip_lfn: bool,
    include_recovery: bool,
) -> FsCheckResult<()>
where
    IO: BlockIO + ?Sized,
    V: RecordVisitor<IO>,
{
    let bps = meta.bytes_per_sector as usize;
    let spc = meta.sectors_per_cluster as u64;

    let mut cluster = frame.pos.cluster;
    let mut sector = frame.pos.sector;
    let mut offset = frame.pos.offset;
    let mut lfn_start: Option<RecordLocation> = None;
    let mut followed = 0u32;

    let mut buf = vec![0u8; bps];
    let parent = parent_location(meta, frame.dir_start);

    loop {
        let end_sector = if frame.pos.static_root {
            meta.first_data_sector()
        } else {
            meta.cluster_to_sector(cluster) + spc
        };

        while sector < end_sector {
            io.read_at(meta.sector_offset(sector), &mut buf)?;

            let mut i = offset;
            while i + DIR_ENTRY_SIZE <= bps {
                let first = buf[i];
                if first == FAT_ENTRY_END_OF_DIR {
                    return Ok(());
                }
                if first == FAT_ENTRY_DELETED {
                    // An open long-name run whose owner got deleted is
                    // orphaned; forget it.
                    lfn_start = None;
                    i += DIR_ENTRY_SIZE;
                    continue;
                }

                let entry = DirEntry::read_from_bytes(&buf[i..i + DIR_ENTRY_SIZE])
                    .map_err(|_| FsCheckError::Invalid("short directory record"))?;

                if entry.is_lfn() {
                    if !skip_lfn && lfn_start.is_none() {
                        lfn_start = Some(RecordLocation {
                            cluster,
                            sector,
                            offset: i,
                            static_root: frame.pos.static_root,
                        });
                    }
                    i += DIR_ENTRY_SIZE;
                    continue;
                }
                if entry.is_dot() || entry.is_dotdot() || entry.is_volume_label() {
                    lfn_start = None;
                    i += DIR_ENTRY_SIZE;
                    continue;
                }
                if !include_recovery
                    && (entry.extension() == RECOVERY_EXTENSION || entry.extension() == LOG_EXTENSION)
                {
                    lfn_start = None;
                    i += DIR_ENTRY_SIZE;
                    continue;
                }

                let record = DirRecord {
                    entry,
                    location: RecordLocation {
                        cluster,
                        sector,
                        offset: i,
                        static_root: frame.pos.static_root,
                    },
                    parent,
                    lfn_start: lfn_start.take(),
                };

                if visitor.visit(io, meta, &record)? == Visit::DiskChanged {
                    io.read_at(meta.sector_offset(sector), &mut buf)?;
                }

                // The visitor may have deleted the record under us.
                if buf[i] == FAT_ENTRY_DELETED {
                    i += DIR_ENTRY_SIZE;
                    continue;
                }

                if entry.is_dir() {
                    let child = entry.first_cluster(meta.kind);
                    if classify::is_valid_link_target(meta, child) {
                        let child_sector = meta.cluster_to_sector(child);
                        if child_sector != sector {
                            stack.push(Frame {
                                pos: RecordLocation {
                                    cluster,
                                    sector,
                                    offset: i + DIR_ENTRY_SIZE,
                                    static_root: frame.pos.static_root,
                                },
                                dir_start: frame.dir_start,
                            });
                            stack.push(Frame {
                                pos: RecordLocation {
                                    cluster: child,
                                    sector: child_sector,
                                    offset: 0,
                                    static_root: false,
                                },
                                dir_start: child,
                            });
                            return Ok(());
                        }
                        // Child starts in the sector being scanned: a cycle
                        // the cross-link check owns.
                    }
                }

                i += DIR_ENTRY_SIZE;
            }

            sector += 1;
            offset = 0;
        }

        if frame.pos.static_root {
            return Ok(());
        }
        if frame.dir_start == 0 {
            // FAT32 root cluster: the caller advances the root chain.
            return Ok(());
        }

        followed += 1;
        if followed > meta.cluster_count {
            return Err(FsChainError::LoopDetected.into());
        }

        match table::read_link(io, meta, cluster)? {
            Link::Next(next) => {
                // A continuation whose own slot is already free is a
                // dangling link the normalizer rewrites; stop here.
                if table::read_entry(io, meta, next, 0)? == FAT_FREE_CLUSTER {
                    return Ok(());
                }
                cluster = next;
                sector = meta.cluster_to_sector(next);
                offset = 0;
            }
            _ => return Ok(()),
        }
    }
}

/// What an operation did to one long-name continuation record.
pub enum LfnOp {
    Keep,
    Rewrite,
}

/// Walks the long-name continuation records starting at `start`, applying
/// `op` to each until the owning short-name record is reached. Rewritten
/// records are flushed back sector by sector. Returns whether the disk
/// was changed.
pub fn traverse_lfn_records<IO, F>(
    io: &mut IO,
    meta: &FatMeta,
    start: &RecordLocation,
    mut op: F,
) -> FsCheckResult<bool>
where
    IO: BlockIO + ?Sized,
    F: FnMut(&mut LfnEntry) -> FsCheckResult<LfnOp>,
{
    let bps = meta.bytes_per_sector as usize;
    let spc = meta.sectors_per_cluster as u64;

    let mut cluster = start.cluster;
    let mut sector = start.sector;
    let mut offset = start.offset;
    let mut changed = false;
    let mut followed = 0u32;

    let mut buf = vec![0u8; bps];

    loop {
        let end_sector = if start.static_root {
            meta.first_data_sector()
        } else {
            meta.cluster_to_sector(cluster) + spc
        };

        while sector < end_sector {
            io.read_at(meta.sector_offset(sector), &mut buf)?;
            let mut dirty = false;

            let mut i = offset;
            while i + DIR_ENTRY_SIZE <= bps {
                if buf[i + 11] != 0x0F {
                    // Owning short-name record: done.
                    if dirty {
                        io.write_at(meta.sector_offset(sector), &buf)?;
                    }
                    return Ok(changed);
                }
                let mut lfn = LfnEntry::read_from_bytes(&buf[i..i + DIR_ENTRY_SIZE])
                    .map_err(|_| FsCheckError::Invalid("long-name record"))?;
                if matches!(op(&mut lfn)?, LfnOp::Rewrite) {
                    use zerocopy::IntoBytes;
                    buf[i..i + DIR_ENTRY_SIZE].copy_from_slice(lfn.as_bytes());
                    dirty = true;
                    changed = true;
                }
                i += DIR_ENTRY_SIZE;
            }

            if dirty {
                io.write_at(meta.sector_offset(sector), &buf)?;
            }
            sector += 1;
            offset = 0;
        }

        if start.static_root {
            return Ok(changed);
        }

        followed += 1;
        if followed > meta.cluster_count {
            return Err(FsChainError::LoopDetected.into());
        }

        match table::read_link(io, meta, cluster)? {
            Link::Next(next) => {
                cluster = next;
                sector = meta.cluster_to_sector(next);
                offset = 0;
            }
            _ => return Ok(changed),
        }
    }
}
