// SPDX-License-Identifier: MIT

//! Directory and file plumbing for recovery artifacts.
//!
//! Salvage entries do not copy data: they are fresh directory records
//! pointed at clusters that already hold the orphaned content. Only the
//! recovery folders and the report log allocate new clusters.

#[cfg(all(not(feature = "std"), feature = "alloc"))]
use alloc::vec::Vec;

use fatio::prelude::*;
use zerocopy::{FromBytes, IntoBytes};

use crate::core::errors::*;
use crate::core::meta::FsMeta;
use crate::fs::fat::attr::FatAttributes;
use crate::fs::fat::chkdsk::walker::RecordLocation;
use crate::fs::fat::constant::*;
use crate::fs::fat::meta::FatMeta;
use crate::fs::fat::table::{self, Link};
use crate::fs::fat::types::DirEntry;
use crate::fs::fat::utils;

/// Scans the allocation table for a free cluster, starting at `hint`.
pub fn find_free_cluster<IO: BlockIO + ?Sized>(
    io: &mut IO,
    meta: &FatMeta,
    hint: u32,
) -> FsSalvageResult<u32> {
    let start = hint.clamp(FAT_FIRST_CLUSTER, meta.cluster_limit());
    let span = (start..meta.cluster_limit()).chain(FAT_FIRST_CLUSTER..start);
    for cl in span {
        if table::read_entry(io, meta, cl, 0)? == FAT_FREE_CLUSTER {
            return Ok(cl);
        }
    }
    Err(FsSalvageError::NoSpace)
}

/// Allocates one cluster: claims a free slot with the end-of-chain marker
/// and zero-fills its data area.
pub fn alloc_cluster<IO: BlockIO + ?Sized>(io: &mut IO, meta: &FatMeta) -> FsSalvageResult<u32> {
    let cl = find_free_cluster(io, meta, FAT_FIRST_CLUSTER)?;
    table::write_entry(io, meta, cl, meta.eoc())?;
    io.zero_fill(meta.unit_offset(cl), meta.unit_size())?;
    Ok(cl)
}

/// Reads the record stored at `loc`.
pub fn read_record_at<IO: BlockIO + ?Sized>(
    io: &mut IO,
    meta: &FatMeta,
    loc: &RecordLocation,
) -> BlockIOResult<DirEntry> {
    let mut raw = [0u8; DIR_ENTRY_SIZE];
    io.read_at(meta.sector_offset(loc.sector) + loc.offset as u64, &mut raw)?;
    DirEntry::read_from_bytes(&raw).map_err(|_| BlockIOError::Other("short directory record"))
}

/// Rewrites the record stored at `loc` in place.
pub fn rewrite_record_at<IO: BlockIO + ?Sized>(
    io: &mut IO,
    meta: &FatMeta,
    loc: &RecordLocation,
    entry: &DirEntry,
) -> BlockIOResult {
    io.write_at(
        meta.sector_offset(loc.sector) + loc.offset as u64,
        entry.as_bytes(),
    )
}

/// Marks the record at `loc` deleted.
pub fn delete_record_at<IO: BlockIO + ?Sized>(
    io: &mut IO,
    meta: &FatMeta,
    loc: &RecordLocation,
) -> BlockIOResult {
    io.write_at(
        meta.sector_offset(loc.sector) + loc.offset as u64,
        &[FAT_ENTRY_DELETED],
    )
}

/// Frees every slot of the chain starting at `start`.
pub fn free_chain<IO: BlockIO + ?Sized>(
    io: &mut IO,
    meta: &FatMeta,
    start: u32,
) -> FsSalvageResult<()> {
    let mut current = start;
    let mut freed = 0u32;
    loop {
        freed += 1;
        if freed > meta.cluster_count {
            break;
        }
        let link = table::read_link(io, meta, current)?;
        table::write_entry(io, meta, current, FAT_FREE_CLUSTER)?;
        match link {
            Link::Next(next) => current = next,
            _ => break,
        }
    }
    Ok(())
}

/// Walks the slots of directory `dir_start` (0 = root) calling `f` with
/// each slot's location and first name byte; stops when `f` returns
/// `Some(_)` or the directory data ends. The end-of-directory marker is
/// also handed out, once, as the final slot.
fn scan_slots<IO, T, F>(
    io: &mut IO,
    meta: &FatMeta,
    dir_start: u32,
    mut f: F,
) -> FsSalvageResult<Option<T>>
where
    IO: BlockIO + ?Sized,
    F: FnMut(&RecordLocation, &[u8; DIR_ENTRY_SIZE]) -> Option<T>,
{
    let bps = meta.bytes_per_sector as usize;
    let spc = meta.sectors_per_cluster as u64;
    let fat32_root = dir_start == 0 && meta.is_fat32();
    let static_root = dir_start == 0 && !meta.is_fat32();

    let mut cluster = if fat32_root { meta.root_cluster } else { dir_start };
    let mut sector = if static_root {
        meta.root_start_sector()
    } else {
        meta.cluster_to_sector(cluster)
    };
    let mut followed = 0u32;
    let mut buf = vec![0u8; bps];

    loop {
        let end_sector = if static_root {
            meta.first_data_sector()
        } else {
            meta.cluster_to_sector(cluster) + spc
        };

        while sector < end_sector {
            io.read_at(meta.sector_offset(sector), &mut buf)?;
            for i in (0..bps).step_by(DIR_ENTRY_SIZE) {
                let loc = RecordLocation {
                    cluster: if static_root { 0 } else { cluster },
                    sector,
                    offset: i,
                    static_root,
                };
                let raw: &[u8; DIR_ENTRY_SIZE] = buf[i..i + DIR_ENTRY_SIZE].try_into().unwrap();
                if let Some(out) = f(&loc, raw) {
                    return Ok(Some(out));
                }
                if raw[0] == FAT_ENTRY_END_OF_DIR {
                    return Ok(None);
                }
            }
            sector += 1;
        }

        if static_root {
            return Ok(None);
        }

        followed += 1;
        if followed > meta.cluster_count {
            return Ok(None);
        }

        match table::read_link(io, meta, cluster)? {
            Link::Next(next) => {
                cluster = next;
                sector = meta.cluster_to_sector(next);
            }
            _ => return Ok(None),
        }
    }
}

/// Finds a live record by stored 8.3 name in directory `dir_start`.
pub fn find_entry<IO: BlockIO + ?Sized>(
    io: &mut IO,
    meta: &FatMeta,
    dir_start: u32,
    name: &[u8; 11],
) -> FsSalvageResult<Option<(RecordLocation, DirEntry)>> {
    scan_slots(io, meta, dir_start, |loc, raw| {
        if raw[0] == FAT_ENTRY_END_OF_DIR || raw[0] == FAT_ENTRY_DELETED {
            return None;
        }
        if raw[11] == FatAttributes::LFN.bits() {
            return None;
        }
        if &raw[0..11] == name {
            let entry = DirEntry::read_from_bytes(&raw[..]).ok()?;
            return Some((*loc, entry));
        }
        None
    })
}

/// Appends a record to directory `dir_start` (0 = root), claiming the
/// first deleted or end-of-directory slot. A full cluster-chain directory
/// is extended by one cluster; a full static root is an error.
pub fn append_entry<IO: BlockIO + ?Sized>(
    io: &mut IO,
    meta: &FatMeta,
    dir_start: u32,
    entry: &DirEntry,
) -> FsSalvageResult<RecordLocation> {
    let slot = scan_slots(io, meta, dir_start, |loc, raw| {
        (raw[0] == FAT_ENTRY_END_OF_DIR || raw[0] == FAT_ENTRY_DELETED).then_some(*loc)
    })?;

    let loc = match slot {
        Some(loc) => loc,
        None => {
            if dir_start == 0 && !meta.is_fat32() {
                return Err(FsSalvageError::NoSpace);
            }
            // Directory full: grow it by one cluster.
            let head = if dir_start == 0 { meta.root_cluster } else { dir_start };
            let mut last = head;
            let mut followed = 0u32;
            while let Link::Next(next) = table::read_link(io, meta, last)? {
                followed += 1;
                if followed > meta.cluster_count {
                    return Err(FsSalvageError::Invalid("directory chain loop"));
                }
                last = next;
            }
            let fresh = alloc_cluster(io, meta)?;
            table::write_entry(io, meta, last, fresh)?;
            RecordLocation {
                cluster: fresh,
                sector: meta.cluster_to_sector(fresh),
                offset: 0,
                static_root: false,
            }
        }
    };

    rewrite_record_at(io, meta, &loc, entry)?;
    table::flush(io)?;
    Ok(loc)
}

/// Creates a subdirectory of the root holding a freshly allocated cluster
/// with its `.` / `..` pair. Returns the new directory's cluster.
pub fn create_root_dir<IO: BlockIO + ?Sized>(
    io: &mut IO,
    meta: &FatMeta,
    name: [u8; 11],
    attrs: FatAttributes,
) -> FsSalvageResult<u32> {
    let cluster = alloc_cluster(io, meta)?;
    let (date, time, _) = utils::datetime_now();

    let dot = DirEntry::dot(meta.kind, cluster, date, time);
    let dotdot = DirEntry::dotdot(meta.kind, 0, date, time);
    let mut head = [0u8; DIR_ENTRY_SIZE * 2];
    head[..DIR_ENTRY_SIZE].copy_from_slice(dot.as_bytes());
    head[DIR_ENTRY_SIZE..].copy_from_slice(dotdot.as_bytes());
    io.write_at(meta.unit_offset(cluster), &head)?;

    let entry = DirEntry::new(
        name,
        (FatAttributes::DIRECTORY | attrs).bits(),
        meta.kind,
        cluster,
        0,
        date,
        time,
        0,
    );
    append_entry(io, meta, 0, &entry)?;
    Ok(cluster)
}

/// Creates the hidden system recovery folder `<base>.NNN`, picking the
/// first unused numeric extension so earlier runs keep their output.
pub fn make_recovery_dir<IO: BlockIO + ?Sized>(
    io: &mut IO,
    meta: &FatMeta,
    base: &str,
) -> FsSalvageResult<u32> {
    for n in 0..=254u8 {
        let name = utils::numbered_dir_name(base, n);
        if find_entry(io, meta, 0, &name)?.is_none() {
            return create_root_dir(io, meta, name, FatAttributes::hidden_system());
        }
    }
    Err(FsSalvageError::NoSpace)
}

/// Marks a record deleted together with its long-name continuation chain.
pub fn delete_record_and_lfn<IO: BlockIO + ?Sized>(
    io: &mut IO,
    meta: &FatMeta,
    record: &crate::fs::fat::chkdsk::walker::DirRecord,
) -> FsCheckResult<()> {
    use crate::fs::fat::chkdsk::walker::{LfnOp, traverse_lfn_records};

    if let Some(lfn) = &record.lfn_start {
        traverse_lfn_records(io, meta, lfn, |lfn_rec| {
            lfn_rec.order = FAT_ENTRY_DELETED;
            Ok(LfnOp::Rewrite)
        })?;
    }
    delete_record_at(io, meta, &record.location)?;
    Ok(())
}

/// Creates a salvage record in `dir_cluster` pointing at `cluster`, which
/// already holds the orphaned data.
pub fn create_salvage_entry<IO: BlockIO + ?Sized>(
    io: &mut IO,
    meta: &FatMeta,
    dir_cluster: u32,
    name: [u8; 11],
    is_file: bool,
    cluster: u32,
    size: u32,
) -> FsSalvageResult<RecordLocation> {
    let (date, time, _) = utils::datetime_now();
    let attr = if is_file {
        FatAttributes::ARCHIVE.bits()
    } else {
        FatAttributes::DIRECTORY.bits()
    };
    let entry = DirEntry::new(name, attr, meta.kind, cluster, size, date, time, 0);
    append_entry(io, meta, dir_cluster, &entry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::fat::meta::FatMeta;

    fn fixture() -> (FatMeta, Vec<u8>) {
        let meta = FatMeta::fat16(4 * 1024 * 1024, 2048);
        let buf = vec![0u8; meta.volume_size_bytes as usize];
        (meta, buf)
    }

    #[test]
    fn test_alloc_cluster_claims_slot() {
        let (meta, mut buf) = fixture();
        let mut io = MemBlockIO::new(&mut buf);

        let a = alloc_cluster(&mut io, &meta).unwrap();
        let b = alloc_cluster(&mut io, &meta).unwrap();
        assert_ne!(a, b);
        assert_eq!(table::read_entry(&mut io, &meta, a, 0).unwrap(), meta.eoc());
        assert_eq!(table::read_entry(&mut io, &meta, b, 0).unwrap(), meta.eoc());
    }

    #[test]
    fn test_root_append_and_find() {
        let (meta, mut buf) = fixture();
        let mut io = MemBlockIO::new(&mut buf);

        let name = utils::short_name("HELLO.TXT");
        let entry = DirEntry::new(name, 0x20, meta.kind, 9, 123, 0, 0, 0);
        append_entry(&mut io, &meta, 0, &entry).unwrap();

        let (loc, found) = find_entry(&mut io, &meta, 0, &name).unwrap().unwrap();
        assert!(loc.static_root);
        assert_eq!(found.first_cluster(meta.kind), 9);
        let size = found.file_size;
        assert_eq!(size, 123);
    }

    #[test]
    fn test_recovery_dir_numbering() {
        let (meta, mut buf) = fixture();
        let mut io = MemBlockIO::new(&mut buf);

        let first = make_recovery_dir(&mut io, &meta, LOST_CHAIN_FOLDER).unwrap();
        let second = make_recovery_dir(&mut io, &meta, LOST_CHAIN_FOLDER).unwrap();
        assert_ne!(first, second);

        let name0 = utils::numbered_dir_name(LOST_CHAIN_FOLDER, 0);
        let name1 = utils::numbered_dir_name(LOST_CHAIN_FOLDER, 1);
        let (_, e0) = find_entry(&mut io, &meta, 0, &name0).unwrap().unwrap();
        let (_, e1) = find_entry(&mut io, &meta, 0, &name1).unwrap().unwrap();
        assert!(e0.is_dir() && e1.is_dir());
        assert_eq!(e0.attr & 0x06, 0x06); // hidden + system

        // Dot entry of the new folder points at the folder itself.
        let dot = read_record_at(
            &mut io,
            &meta,
            &RecordLocation {
                cluster: first,
                sector: meta.cluster_to_sector(first),
                offset: 0,
                static_root: false,
            },
        )
        .unwrap();
        assert!(dot.is_dot());
        assert_eq!(dot.first_cluster(meta.kind), first);
    }

    #[test]
    fn test_free_chain() {
        let (meta, mut buf) = fixture();
        let mut io = MemBlockIO::new(&mut buf);

        table::write_entry(&mut io, &meta, 2, 3).unwrap();
        table::write_entry(&mut io, &meta, 3, meta.eoc()).unwrap();
        free_chain(&mut io, &meta, 2).unwrap();
        assert_eq!(table::read_entry(&mut io, &meta, 2, 0).unwrap(), 0);
        assert_eq!(table::read_entry(&mut io, &meta, 3, 0).unwrap(), 0);
    }
}
