// SPDX-License-Identifier: MIT

//! End-to-end check-disk scenarios over hand-laid in-memory volumes.

use fatio::prelude::*;

use fatchk::FsMeta;
use fatchk::fat::*;
use fatchk::fs::fat::chkdsk::salvage;
use fatchk::fs::fat::utils;

fn fat16_volume() -> (FatMeta, Vec<u8>) {
    let meta = FatMeta::fat16(4 * 1024 * 1024, 2048);
    let buf = vec![0u8; meta.volume_size_bytes as usize];
    (meta, buf)
}

/// Links `clusters` into one chain ending with the end-of-chain marker.
fn lay_chain<IO: BlockIO>(io: &mut IO, meta: &FatMeta, clusters: &[u32]) {
    for pair in clusters.windows(2) {
        table::write_entry(io, meta, pair[0], pair[1]).unwrap();
    }
    table::write_entry(io, meta, *clusters.last().unwrap(), meta.eoc()).unwrap();
}

/// Lays the chain and appends a matching file record to the root.
fn add_file<IO: BlockIO>(io: &mut IO, meta: &FatMeta, name: &str, clusters: &[u32], size: u32) {
    lay_chain(io, meta, clusters);
    let entry = DirEntry::new(
        utils::short_name(name),
        FatAttributes::ARCHIVE.bits(),
        meta.kind,
        clusters[0],
        size,
        0,
        0,
        0,
    );
    salvage::append_entry(io, meta, 0, &entry).unwrap();
}

fn find_in_root<IO: BlockIO>(io: &mut IO, meta: &FatMeta, name: &[u8; 11]) -> Option<DirEntry> {
    salvage::find_entry(io, meta, 0, name)
        .unwrap()
        .map(|(_, entry)| entry)
}

fn read_file<IO: BlockIO>(io: &mut IO, meta: &FatMeta, entry: &DirEntry) -> Vec<u8> {
    let size = entry.file_size as usize;
    let mut out = Vec::new();
    let mut cluster_buf = vec![0u8; meta.bytes_per_cluster as usize];
    let mut cluster = entry.first_cluster(meta.kind);
    while out.len() < size {
        io.read_at(meta.unit_offset(cluster), &mut cluster_buf).unwrap();
        out.extend_from_slice(&cluster_buf);
        match table::read_link(io, meta, cluster).unwrap() {
            Link::Next(next) => cluster = next,
            _ => break,
        }
    }
    out.truncate(size);
    out
}

fn log_text<IO: BlockIO>(io: &mut IO, meta: &FatMeta) -> String {
    let name = utils::short_name(DEFAULT_LOG_FILE);
    let entry = find_in_root(io, meta, &name).expect("report log present");
    String::from_utf8(read_file(io, meta, &entry)).unwrap()
}

#[test]
fn test_clean_volume_reports_clean() {
    let (meta, mut buf) = fat16_volume();
    let mut io = MemBlockIO::new(&mut buf);

    let outcome = check_disk(&mut io, &meta, CheckFlags::ALL, CheckMode::Fix).unwrap();
    assert_eq!(outcome, CheckOutcome::Clean);

    // A clean run leaves no report log behind.
    let name = utils::short_name(DEFAULT_LOG_FILE);
    assert!(find_in_root(&mut io, &meta, &name).is_none());
}

#[test]
fn test_lost_chain_salvaged() {
    let (meta, mut buf) = fat16_volume();
    let mut io = MemBlockIO::new(&mut buf);

    // Three allocated clusters reachable from no directory record.
    lay_chain(&mut io, &meta, &[10, 11, 12]);

    let outcome = check_disk(&mut io, &meta, CheckFlags::LOST_CHAINS, CheckMode::Fix).unwrap();
    assert_eq!(outcome, CheckOutcome::LogCreated);

    let text = log_text(&mut io, &meta);
    assert!(text.contains("<START LOST CLUSTER CHAINS TEST RESULTS>"));
    assert!(text.contains("<\"Total Lost Cluster Chains Found\",1>"));

    let folder = find_in_root(&mut io, &meta, &utils::numbered_dir_name(LOST_CHAIN_FOLDER, 0))
        .expect("recovery folder created");
    assert!(folder.is_dir());
    let attr = folder.attr;
    assert_eq!(attr & 0x06, 0x06, "recovery folder is hidden+system");

    let salvage_name = utils::sequenced_name(LOST_CHAIN_FILE_PREFIX, 0, RECOVERY_EXTENSION);
    let (_, rescued) =
        salvage::find_entry(&mut io, &meta, folder.first_cluster(meta.kind), &salvage_name)
            .unwrap()
            .expect("salvage entry created");
    assert_eq!(rescued.first_cluster(meta.kind), 10);
    let size = rescued.file_size;
    assert_eq!(size, 3 * meta.bytes_per_cluster);

    // The salvaged chain is reachable now; a second run is clean.
    let outcome = check_disk(&mut io, &meta, CheckFlags::LOST_CHAINS, CheckMode::Fix).unwrap();
    assert_eq!(outcome, CheckOutcome::Clean);
}

#[test]
fn test_lost_chain_report_only_counts_without_repair() {
    let (meta, mut buf) = fat16_volume();
    let mut io = MemBlockIO::new(&mut buf);

    lay_chain(&mut io, &meta, &[10, 11, 12]);

    let outcome = check_disk(&mut io, &meta, CheckFlags::LOST_CHAINS, CheckMode::ReportOnly).unwrap();
    assert_eq!(outcome, CheckOutcome::LogCreated);
    assert!(log_text(&mut io, &meta).contains("<\"Total Lost Cluster Chains Found\",1>"));

    // No recovery folder, table untouched.
    assert!(find_in_root(&mut io, &meta, &utils::numbered_dir_name(LOST_CHAIN_FOLDER, 0)).is_none());
    assert_eq!(table::read_entry(&mut io, &meta, 10, 0).unwrap(), 11);
}

#[test]
fn test_lost_chain_fat32_skips_root_chain() {
    let meta = FatMeta::fat32(64 * 1024 * 1024, 4096);
    let mut buf = vec![0u8; meta.volume_size_bytes as usize];
    let mut io = MemBlockIO::new(&mut buf);

    // Allocate the root directory chain; it must never be reported lost.
    table::write_entry(&mut io, &meta, meta.root_cluster, meta.eoc()).unwrap();
    lay_chain(&mut io, &meta, &[10, 11]);

    let outcome = check_disk(&mut io, &meta, CheckFlags::LOST_CHAINS, CheckMode::Fix).unwrap();
    assert_eq!(outcome, CheckOutcome::LogCreated);
    assert!(log_text(&mut io, &meta).contains("<\"Total Lost Cluster Chains Found\",1>"));

    let folder = find_in_root(&mut io, &meta, &utils::numbered_dir_name(LOST_CHAIN_FOLDER, 0))
        .expect("recovery folder created");
    let salvage_name = utils::sequenced_name(LOST_CHAIN_FILE_PREFIX, 0, RECOVERY_EXTENSION);
    let (_, rescued) =
        salvage::find_entry(&mut io, &meta, folder.first_cluster(meta.kind), &salvage_name)
            .unwrap()
            .expect("salvage entry created");
    assert_eq!(rescued.first_cluster(meta.kind), 10);
    let size = rescued.file_size;
    assert_eq!(size, 2 * meta.bytes_per_cluster);
}

#[test]
fn test_lost_chain_fat12_volume() {
    let meta = FatMeta::fat12(1024 * 1024, 1024);
    let mut buf = vec![0u8; meta.volume_size_bytes as usize];
    let mut io = MemBlockIO::new(&mut buf);

    lay_chain(&mut io, &meta, &[10, 11]);

    let outcome = check_disk(&mut io, &meta, CheckFlags::LOST_CHAINS, CheckMode::Fix).unwrap();
    assert_eq!(outcome, CheckOutcome::LogCreated);
    assert!(log_text(&mut io, &meta).contains("<\"Total Lost Cluster Chains Found\",1>"));
}

#[test]
fn test_cross_linked_tail_truncated_and_salvaged() {
    let (meta, mut buf) = fat16_volume();
    let mut io = MemBlockIO::new(&mut buf);
    let bpc = meta.bytes_per_cluster;

    // Two files whose chains converge on cluster 9.
    add_file(&mut io, &meta, "A.BIN", &[5, 6, 9], 3 * bpc);
    add_file(&mut io, &meta, "B.BIN", &[7, 8, 9], 3 * bpc);

    let outcome = check_disk(&mut io, &meta, CheckFlags::CROSS_LINKS, CheckMode::Fix).unwrap();
    assert_eq!(outcome, CheckOutcome::LogCreated);
    assert!(log_text(&mut io, &meta).contains("<\"Total Cross-linked Chains Found\",1>"));

    // Both owners now stop before the shared cluster, sizes shrunk to the
    // retained clusters.
    assert_eq!(table::read_entry(&mut io, &meta, 6, 0).unwrap(), meta.eoc());
    assert_eq!(table::read_entry(&mut io, &meta, 8, 0).unwrap(), meta.eoc());
    let a = find_in_root(&mut io, &meta, &utils::short_name("A.BIN")).unwrap();
    let b = find_in_root(&mut io, &meta, &utils::short_name("B.BIN")).unwrap();
    let a_size = a.file_size;
    let b_size = b.file_size;
    assert_eq!(a_size, 2 * bpc);
    assert_eq!(b_size, 2 * bpc);

    // The shared tail lives on under the recovery folder.
    let folder = find_in_root(&mut io, &meta, &utils::numbered_dir_name(CROSS_LINK_FOLDER, 0))
        .expect("recovery folder created");
    let salvage_name = utils::sequenced_name(CROSS_LINK_FILE_PREFIX, 0, RECOVERY_EXTENSION);
    let (_, rescued) =
        salvage::find_entry(&mut io, &meta, folder.first_cluster(meta.kind), &salvage_name)
            .unwrap()
            .expect("salvage entry created");
    assert_eq!(rescued.first_cluster(meta.kind), 9);
    assert_eq!(table::read_entry(&mut io, &meta, 9, 0).unwrap(), meta.eoc());

    // Nothing left to report afterwards.
    let outcome = check_disk(&mut io, &meta, CheckFlags::CROSS_LINKS, CheckMode::Fix).unwrap();
    assert_eq!(outcome, CheckOutcome::Clean);
}

#[test]
fn test_dot_entry_repair() {
    let (meta, mut buf) = fat16_volume();
    let mut io = MemBlockIO::new(&mut buf);

    let dir_cl =
        salvage::create_root_dir(&mut io, &meta, utils::short_name("SUB"), FatAttributes::empty())
            .unwrap();

    // Point `.` somewhere else; its cluster word sits at offset 26.
    let head = meta.unit_offset(dir_cl);
    io.write_u16_at(head + 26, (dir_cl + 5) as u16).unwrap();

    let outcome = check_disk(&mut io, &meta, CheckFlags::DIR_RECORDS, CheckMode::Fix).unwrap();
    assert_eq!(outcome, CheckOutcome::LogCreated);
    assert!(log_text(&mut io, &meta).contains("<\"Invalid DOT Entries\",1>"));

    assert_eq!(io.read_u16_at(head + 26).unwrap() as u32, dir_cl);
}

#[test]
fn test_dotdot_entry_repair() {
    let (meta, mut buf) = fat16_volume();
    let mut io = MemBlockIO::new(&mut buf);

    let dir_cl =
        salvage::create_root_dir(&mut io, &meta, utils::short_name("SUB"), FatAttributes::empty())
            .unwrap();

    // `..` must name the parent and must differ from the directory itself.
    let head = meta.unit_offset(dir_cl);
    io.write_u16_at(head + 32 + 26, dir_cl as u16).unwrap();

    let outcome = check_disk(&mut io, &meta, CheckFlags::DIR_RECORDS, CheckMode::Fix).unwrap();
    assert_eq!(outcome, CheckOutcome::LogCreated);
    assert!(log_text(&mut io, &meta).contains("<\"Invalid DOT DOT Entries\",1>"));

    // Repaired back to the root.
    assert_eq!(io.read_u16_at(head + 32 + 26).unwrap(), 0);
}

#[test]
fn test_mirror_mismatch_fix_and_report() {
    let (meta, mut buf) = fat16_volume();
    let mut io = MemBlockIO::new(&mut buf);

    table::write_entry(&mut io, &meta, 2, meta.eoc()).unwrap();
    // Corrupt one byte of the secondary table copy.
    io.write_at(meta.fat_entry_offset(2, 1), &[0x5A]).unwrap();

    // Report-only: distinct status, both copies untouched, no log file.
    let outcome = check_disk(&mut io, &meta, CheckFlags::FAT_MIRROR, CheckMode::ReportOnly).unwrap();
    assert_eq!(outcome, CheckOutcome::TablesDiffer);
    assert_ne!(
        table::read_entry(&mut io, &meta, 2, 1).unwrap(),
        table::read_entry(&mut io, &meta, 2, 0).unwrap()
    );
    assert!(find_in_root(&mut io, &meta, &utils::short_name(DEFAULT_LOG_FILE)).is_none());

    // Fix: secondary resynchronized from the primary, one message logged.
    let outcome = check_disk(&mut io, &meta, CheckFlags::FAT_MIRROR, CheckMode::Fix).unwrap();
    assert_eq!(outcome, CheckOutcome::LogCreated);
    let text = log_text(&mut io, &meta);
    assert!(text.contains("<START COMPARED FAT TABLES TEST RESULTS>"));
    assert!(text.contains("<\"FAT Tables Mismatch\",1>"));
    assert_eq!(table::read_entry(&mut io, &meta, 2, 1).unwrap(), meta.eoc());
}

#[test]
fn test_file_size_greater_truncates_and_salvages() {
    let (meta, mut buf) = fat16_volume();
    let mut io = MemBlockIO::new(&mut buf);
    let bpc = meta.bytes_per_cluster;

    // Three clusters behind a 100-byte declared size.
    add_file(&mut io, &meta, "F.BIN", &[30, 31, 32], 100);

    let outcome = check_disk(&mut io, &meta, CheckFlags::FILE_SIZES, CheckMode::Fix).unwrap();
    assert_eq!(outcome, CheckOutcome::LogCreated);
    let text = log_text(&mut io, &meta);
    assert!(text.contains("<START FILES SIZES TEST RESULTS>"));
    assert!(text.contains("<\"Total Invalid File Lengths Found\",1>"));
    assert!(text.contains("<\"Files Greater Than Size On Disk\",1>"));

    // Chain cut after the first cluster; declared size untouched.
    assert_eq!(table::read_entry(&mut io, &meta, 30, 0).unwrap(), meta.eoc());
    let f = find_in_root(&mut io, &meta, &utils::short_name("F.BIN")).unwrap();
    let f_size = f.file_size;
    assert_eq!(f_size, 100);

    // The excess clusters became a salvage file.
    let folder = find_in_root(&mut io, &meta, &utils::numbered_dir_name(FILE_LEN_FOLDER, 0))
        .expect("recovery folder created");
    let salvage_name = utils::sequenced_name(FILE_LEN_FILE_PREFIX, 1, RECOVERY_EXTENSION);
    let (_, rescued) =
        salvage::find_entry(&mut io, &meta, folder.first_cluster(meta.kind), &salvage_name)
            .unwrap()
            .expect("salvage entry created");
    assert_eq!(rescued.first_cluster(meta.kind), 31);
    let size = rescued.file_size;
    assert_eq!(size, 2 * bpc);

    let outcome = check_disk(&mut io, &meta, CheckFlags::FILE_SIZES, CheckMode::Fix).unwrap();
    assert_eq!(outcome, CheckOutcome::Clean);
}

#[test]
fn test_file_size_less_shrinks_declared_size() {
    let (meta, mut buf) = fat16_volume();
    let mut io = MemBlockIO::new(&mut buf);

    // Two clusters of chain, 3000 bytes of data, 5000 bytes declared.
    add_file(&mut io, &meta, "G.BIN", &[40, 41], 5000);
    io.write_at(meta.unit_offset(40), &vec![0x42u8; 3000]).unwrap();

    let outcome = check_disk(&mut io, &meta, CheckFlags::FILE_SIZES, CheckMode::Fix).unwrap();
    assert_eq!(outcome, CheckOutcome::LogCreated);
    assert!(log_text(&mut io, &meta).contains("<\"Files Less Than Size On Disk\",1>"));

    // Declared size shrunk to the end of the stored data; chain intact, no
    // salvage output.
    let g = find_in_root(&mut io, &meta, &utils::short_name("G.BIN")).unwrap();
    let g_size = g.file_size;
    assert_eq!(g_size, 3000);
    assert_eq!(table::read_entry(&mut io, &meta, 40, 0).unwrap(), 41);
    assert!(find_in_root(&mut io, &meta, &utils::numbered_dir_name(FILE_LEN_FOLDER, 0)).is_none());

    let outcome = check_disk(&mut io, &meta, CheckFlags::FILE_SIZES, CheckMode::Fix).unwrap();
    assert_eq!(outcome, CheckOutcome::Clean);
}

#[test]
fn test_lfn_cluster_field_repair() {
    let (meta, mut buf) = fat16_volume();
    let mut io = MemBlockIO::new(&mut buf);

    let sfn = utils::short_name("LONGFI~1.TXT");
    table::write_entry(&mut io, &meta, 70, meta.eoc()).unwrap();

    // One continuation record carrying "long.txt", with a corrupt non-zero
    // cluster field at offset 26.
    let mut lfn_raw = [0xFFu8; 32];
    lfn_raw[0] = 0x41;
    lfn_raw[11] = 0x0F;
    lfn_raw[12] = 0x00;
    lfn_raw[13] = utils::sfn_checksum(&sfn);
    let slots: [usize; 13] = [1, 3, 5, 7, 9, 14, 16, 18, 20, 22, 24, 28, 30];
    for (i, c) in "long.txt".encode_utf16().enumerate() {
        lfn_raw[slots[i]] = (c & 0xFF) as u8;
        lfn_raw[slots[i] + 1] = (c >> 8) as u8;
    }
    lfn_raw[slots[8]] = 0x00;
    lfn_raw[slots[8] + 1] = 0x00;
    lfn_raw[26] = 0x07;
    lfn_raw[27] = 0x00;

    let root = meta.sector_offset(meta.root_start_sector());
    io.write_at(root, &lfn_raw).unwrap();
    let entry = DirEntry::new(sfn, FatAttributes::ARCHIVE.bits(), meta.kind, 70, 10, 0, 0, 0);
    salvage::append_entry(&mut io, &meta, 0, &entry).unwrap();

    let outcome = check_disk(&mut io, &meta, CheckFlags::DIR_RECORDS, CheckMode::Fix).unwrap();
    assert_eq!(outcome, CheckOutcome::LogCreated);
    assert!(log_text(&mut io, &meta).contains("<\"Invalid LFN Cluster Value\",1>"));

    let mut repaired = [0u8; 32];
    io.read_at(root, &mut repaired).unwrap();
    assert_eq!(&repaired[26..28], &[0, 0]);
}

#[test]
fn test_invalid_start_cluster_record_deleted() {
    let (meta, mut buf) = fat16_volume();
    let mut io = MemBlockIO::new(&mut buf);

    // Start cluster 1 is reserved for every width.
    let entry = DirEntry::new(
        utils::short_name("BAD.BIN"),
        FatAttributes::ARCHIVE.bits(),
        meta.kind,
        1,
        10,
        0,
        0,
        0,
    );
    salvage::append_entry(&mut io, &meta, 0, &entry).unwrap();

    let outcome = check_disk(&mut io, &meta, CheckFlags::DIR_RECORDS, CheckMode::Fix).unwrap();
    assert_eq!(outcome, CheckOutcome::LogCreated);
    assert!(log_text(&mut io, &meta).contains("<\"Reserved Cluster Value\",1>"));
    assert!(find_in_root(&mut io, &meta, &utils::short_name("BAD.BIN")).is_none());
}

#[test]
fn test_chain_checks_demand_record_check_for_invalid_values() {
    let (meta, mut buf) = fat16_volume();
    let mut io = MemBlockIO::new(&mut buf);

    // A chain that runs into a free slot mid-way.
    table::write_entry(&mut io, &meta, 50, 60).unwrap();
    let entry = DirEntry::new(
        utils::short_name("H.BIN"),
        FatAttributes::ARCHIVE.bits(),
        meta.kind,
        50,
        4096,
        0,
        0,
        0,
    );
    salvage::append_entry(&mut io, &meta, 0, &entry).unwrap();

    // Without the directory-record check, the caller is told to request it.
    let err = check_disk(&mut io, &meta, CheckFlags::CROSS_LINKS, CheckMode::Fix).unwrap_err();
    assert_eq!(err, FsCheckError::InvalidCluster);

    // Requested together in report mode, the finding is logged instead.
    let outcome = check_disk(
        &mut io,
        &meta,
        CheckFlags::DIR_RECORDS | CheckFlags::CROSS_LINKS,
        CheckMode::ReportOnly,
    )
    .unwrap();
    assert_eq!(outcome, CheckOutcome::LogCreated);
    assert!(log_text(&mut io, &meta).contains("<\"Free Cluster Value In Chain\",1>"));
}

#[test]
fn test_fix_run_is_idempotent_across_all_checks() {
    let (meta, mut buf) = fat16_volume();
    let mut io = MemBlockIO::new(&mut buf);
    let bpc = meta.bytes_per_cluster;

    // Cross-linked pair.
    add_file(&mut io, &meta, "A.BIN", &[5, 6, 9], 3 * bpc);
    add_file(&mut io, &meta, "B.BIN", &[7, 8, 9], 3 * bpc);
    // Orphaned chain.
    lay_chain(&mut io, &meta, &[10, 11, 12]);
    // Chain longer than the declared size covers.
    add_file(&mut io, &meta, "F.BIN", &[30, 31, 32], 100);
    // Declared size beyond the stored data.
    add_file(&mut io, &meta, "G.BIN", &[40, 41], 5000);
    io.write_at(meta.unit_offset(40), &vec![0x42u8; 3000]).unwrap();
    // Broken self-reference in a subdirectory.
    let sub =
        salvage::create_root_dir(&mut io, &meta, utils::short_name("SUB"), FatAttributes::empty())
            .unwrap();
    io.write_u16_at(meta.unit_offset(sub) + 26, 0).unwrap();
    // One stale byte in the secondary table copy.
    io.write_at(meta.fat_entry_offset(40, 1), &[0x11]).unwrap();

    let first = check_disk(&mut io, &meta, CheckFlags::ALL, CheckMode::Fix).unwrap();
    assert_eq!(first, CheckOutcome::LogCreated);

    // Every category was repaired; a second pass finds nothing.
    let second = check_disk(&mut io, &meta, CheckFlags::ALL, CheckMode::Fix).unwrap();
    assert_eq!(second, CheckOutcome::Clean);
}

#[test]
fn test_check_over_file_backed_image() {
    use std::io::Write;

    let meta = FatMeta::fat16(2 * 1024 * 1024, 2048);
    let mut file = tempfile::tempfile().unwrap();
    file.write_all(&vec![0u8; meta.volume_size_bytes as usize]).unwrap();

    let mut io = StdBlockIO::new(&mut file);
    lay_chain(&mut io, &meta, &[10, 11]);

    let outcome = check_disk(&mut io, &meta, CheckFlags::ALL, CheckMode::Fix).unwrap();
    assert_eq!(outcome, CheckOutcome::LogCreated);
    assert!(log_text(&mut io, &meta).contains("<\"Total Lost Cluster Chains Found\",1>"));
}
