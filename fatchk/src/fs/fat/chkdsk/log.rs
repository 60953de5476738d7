// SPDX-License-Identifier: MIT

//! Buffered structured-text report log, persisted as a hidden system file
//! on the volume being checked.
//!
//! Format, per test case:
//!
//! ```text
//! <START LOST CLUSTER CHAINS TEST RESULTS>
//! <"ERROR MESSAGE" , NUMBER>
//! <"Total Lost Cluster Chains Found",1>
//! <END TEST>
//! ```

#[cfg(all(not(feature = "std"), feature = "alloc"))]
use alloc::vec::Vec;

use fatio::prelude::*;

use crate::core::errors::*;
use crate::core::meta::FsMeta;
use crate::fs::fat::attr::FatAttributes;
use crate::fs::fat::chkdsk::{salvage, walker::RecordLocation};
use crate::fs::fat::constant::*;
use crate::fs::fat::meta::FatMeta;
use crate::fs::fat::table::{self, Link};
use crate::fs::fat::types::DirEntry;
use crate::fs::fat::utils;

const MAX_LOG_BUFF_SIZE: usize = 512;
const CRLF: &[u8] = b"\r\n";
const COLUMN_HEADER: &[u8] = b"<\"ERROR MESSAGE\" , NUMBER>";
const END_TEST: &[u8] = b"<END TEST>";

/// Issue kinds tracked by the log record table. Order is the write-out
/// order of the directory-record check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum LogId {
    FatTableMismatch,
    DdrDot,
    DdrDotDot,
    DdrDirSize,
    DdrLfnCluster,
    DdrClusterOutOfRange,
    DdrClusterBad,
    DdrClusterFree,
    DdrClusterFreeInChain,
    DdrClusterReserved,
    DdrRootDirRange,
    DdrRootStartCluster,
    DdrSfnIllegalChar,
    DdrLfnExceedMax,
    DdrLfnChecksum,
    FileLengths,
    FilesLess,
    FilesGreater,
    CrossLinked,
    LostChain,
}

impl LogId {
    pub const COUNT: usize = 20;

    pub const DDR_FIRST: usize = LogId::DdrDot as usize;
    pub const DDR_LAST: usize = LogId::DdrLfnChecksum as usize;

    pub const ALL: [LogId; LogId::COUNT] = [
        LogId::FatTableMismatch,
        LogId::DdrDot,
        LogId::DdrDotDot,
        LogId::DdrDirSize,
        LogId::DdrLfnCluster,
        LogId::DdrClusterOutOfRange,
        LogId::DdrClusterBad,
        LogId::DdrClusterFree,
        LogId::DdrClusterFreeInChain,
        LogId::DdrClusterReserved,
        LogId::DdrRootDirRange,
        LogId::DdrRootStartCluster,
        LogId::DdrSfnIllegalChar,
        LogId::DdrLfnExceedMax,
        LogId::DdrLfnChecksum,
        LogId::FileLengths,
        LogId::FilesLess,
        LogId::FilesGreater,
        LogId::CrossLinked,
        LogId::LostChain,
    ];

    pub fn message(self) -> &'static str {
        match self {
            LogId::FatTableMismatch => "FAT Tables Mismatch",
            LogId::DdrDot => "Invalid DOT Entries",
            LogId::DdrDotDot => "Invalid DOT DOT Entries",
            LogId::DdrDirSize => "Invalid Directory Size",
            LogId::DdrLfnCluster => "Invalid LFN Cluster Value",
            LogId::DdrClusterOutOfRange => "Cluster Value Out Of Range",
            LogId::DdrClusterBad => "Bad Cluster Value In Chain",
            LogId::DdrClusterFree => "Directory Record Cluster Free",
            LogId::DdrClusterFreeInChain => "Free Cluster Value In Chain",
            LogId::DdrClusterReserved => "Reserved Cluster Value",
            LogId::DdrRootDirRange => "Invalid Root Directory Range",
            LogId::DdrRootStartCluster => "Invalid Root Start Cluster",
            LogId::DdrSfnIllegalChar => "Illegal Characters In SFN",
            LogId::DdrLfnExceedMax => "LFN Exceeds Maximum Length",
            LogId::DdrLfnChecksum => "Invalid LFN Checksum",
            LogId::FileLengths => "Total Invalid File Lengths Found",
            LogId::FilesLess => "Files Less Than Size On Disk",
            LogId::FilesGreater => "Files Greater Than Size On Disk",
            LogId::CrossLinked => "Total Cross-linked Chains Found",
            LogId::LostChain => "Total Lost Cluster Chains Found",
        }
    }
}

/// Test-case headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestCase {
    FatTables,
    DirRecords,
    CrossLinks,
    LostChains,
    FileSizes,
}

impl TestCase {
    fn title(self) -> &'static str {
        match self {
            TestCase::FatTables => "COMPARED FAT TABLES TEST RESULTS",
            TestCase::DirRecords => "DIRECTORY RECORDS TEST RESULTS",
            TestCase::CrossLinks => "CROSS-LINKED CHAINS TEST RESULTS",
            TestCase::LostChains => "LOST CLUSTER CHAINS TEST RESULTS",
            TestCase::FileSizes => "FILES SIZES TEST RESULTS",
        }
    }
}

/// On-volume log file state.
#[derive(Debug, Clone)]
struct LogFile {
    name: [u8; 11],
    entry_loc: RecordLocation,
    start_cluster: u32,
    last_cluster: u32,
    size: u32,
}

/// Per-issue-kind counters plus the buffered log writer.
#[derive(Debug, Default)]
pub struct ReportLog {
    counts: [u16; LogId::COUNT],
    buf: Vec<u8>,
    file: Option<LogFile>,
}

impl ReportLog {
    pub fn new() -> Self {
        Self {
            counts: [0; LogId::COUNT],
            buf: Vec::with_capacity(MAX_LOG_BUFF_SIZE),
            file: None,
        }
    }

    // --- record table ---

    /// Resets every per-kind counter; called at the start of each check.
    pub fn clear_records(&mut self) {
        self.counts = [0; LogId::COUNT];
    }

    /// Counts one occurrence of `id`. File-length sub-kinds also feed the
    /// aggregate invalid-file-lengths counter.
    pub fn add(&mut self, id: LogId) {
        if matches!(id, LogId::FilesLess | LogId::FilesGreater) {
            self.counts[LogId::FileLengths as usize] =
                self.counts[LogId::FileLengths as usize].saturating_add(1);
        }
        self.counts[id as usize] = self.counts[id as usize].saturating_add(1);
    }

    /// Counts the invalid-cluster sub-kind matching `value` for `meta`.
    pub fn add_invalid_cluster(&mut self, meta: &FatMeta, value: u32) {
        use crate::fs::fat::chkdsk::classify::{ClusterClass, classify};
        match classify(meta, value) {
            ClusterClass::Bad => self.add(LogId::DdrClusterBad),
            ClusterClass::Reserved => self.add(LogId::DdrClusterReserved),
            ClusterClass::Free => self.add(LogId::DdrClusterFreeInChain),
            ClusterClass::OutOfRange => self.add(LogId::DdrClusterOutOfRange),
            ClusterClass::EndOfChain | ClusterClass::Valid => {}
        }
    }

    pub fn count(&self, id: LogId) -> u16 {
        self.counts[id as usize]
    }

    pub fn is_zero(&self, id: LogId) -> bool {
        self.counts[id as usize] == 0
    }

    // --- log file ---

    /// Creates (or truncates) the log file in the root directory, hidden
    /// and system-flagged.
    pub fn start<IO: BlockIO + ?Sized>(
        &mut self,
        io: &mut IO,
        meta: &FatMeta,
        file_name: &str,
    ) -> FsLogResult<()> {
        let name = utils::short_name(file_name);
        let attrs = FatAttributes::ARCHIVE | FatAttributes::hidden_system();

        let state = match salvage::find_entry(io, meta, 0, &name).map_err(log_err)? {
            Some((loc, mut entry)) => {
                let old_start = entry.first_cluster(meta.kind);
                if old_start != 0 {
                    salvage::free_chain(io, meta, old_start).map_err(log_err)?;
                }
                entry.set_first_cluster(meta.kind, 0);
                entry.file_size = 0;
                entry.attr = attrs.bits();
                salvage::rewrite_record_at(io, meta, &loc, &entry)?;
                LogFile {
                    name,
                    entry_loc: loc,
                    start_cluster: 0,
                    last_cluster: 0,
                    size: 0,
                }
            }
            None => {
                let (date, time, _) = utils::datetime_now();
                let entry = DirEntry::new(name, attrs.bits(), meta.kind, 0, 0, date, time, 0);
                let loc = salvage::append_entry(io, meta, 0, &entry).map_err(log_err)?;
                LogFile {
                    name,
                    entry_loc: loc,
                    start_cluster: 0,
                    last_cluster: 0,
                    size: 0,
                }
            }
        };

        self.file = Some(state);
        self.buf.clear();
        Ok(())
    }

    /// Appends raw bytes to the log file, allocating clusters on demand.
    fn write_file<IO: BlockIO + ?Sized>(
        &mut self,
        io: &mut IO,
        meta: &FatMeta,
        data: &[u8],
    ) -> FsLogResult<()> {
        let Some(file) = self.file.as_mut() else {
            return Err(FsLogError::Invalid("log file not open"));
        };
        let bpc = meta.bytes_per_cluster as usize;

        let mut written = 0usize;
        while written < data.len() {
            let used = file.size as usize % bpc;
            if file.start_cluster == 0 {
                let fresh = salvage::alloc_cluster(io, meta).map_err(log_err)?;
                file.start_cluster = fresh;
                file.last_cluster = fresh;
            } else if used == 0 && file.size > 0 {
                let fresh = salvage::alloc_cluster(io, meta).map_err(log_err)?;
                table::write_entry(io, meta, file.last_cluster, fresh)?;
                file.last_cluster = fresh;
            }

            let room = bpc - used;
            let chunk = room.min(data.len() - written);
            io.write_at(
                meta.unit_offset(file.last_cluster) + used as u64,
                &data[written..written + chunk],
            )?;
            written += chunk;
            file.size += chunk as u32;
        }
        Ok(())
    }

    /// Rewrites the log file's directory record and flushes the device.
    pub fn flush<IO: BlockIO + ?Sized>(&mut self, io: &mut IO, meta: &FatMeta) -> FsLogResult<()> {
        let Some(file) = self.file.as_ref() else {
            return Ok(());
        };
        let mut entry = salvage::read_record_at(io, meta, &file.entry_loc)?;
        entry.set_first_cluster(meta.kind, file.start_cluster);
        entry.file_size = file.size;
        salvage::rewrite_record_at(io, meta, &file.entry_loc, &entry)?;
        io.flush()?;
        Ok(())
    }

    /// Closes the logger, leaving the file in place.
    pub fn stop<IO: BlockIO + ?Sized>(&mut self, io: &mut IO, meta: &FatMeta) -> FsLogResult<()> {
        self.flush(io, meta)?;
        self.buf.clear();
        Ok(())
    }

    /// Size in bytes of the log file, 0 when nothing was ever flushed.
    pub fn file_size(&self) -> u32 {
        self.file.as_ref().map(|f| f.size).unwrap_or(0)
    }

    /// Deletes the log file; used when a run ends with no findings.
    pub fn delete<IO: BlockIO + ?Sized>(&mut self, io: &mut IO, meta: &FatMeta) -> FsLogResult<()> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        if file.start_cluster != 0 {
            salvage::free_chain(io, meta, file.start_cluster).map_err(log_err)?;
        }
        salvage::delete_record_at(io, meta, &file.entry_loc)?;
        io.flush()?;
        Ok(())
    }

    // --- structured text ---

    /// Opens a test-case section in the buffer.
    pub fn start_test_case(&mut self, case: TestCase) {
        self.buf.clear();
        self.buf.extend_from_slice(b"<START ");
        self.buf.extend_from_slice(case.title().as_bytes());
        self.buf.extend_from_slice(b">");
        self.buf.extend_from_slice(CRLF);
        self.buf.extend_from_slice(COLUMN_HEADER);
        self.buf.extend_from_slice(CRLF);
    }

    /// Appends one `<"text",count>` row, draining the buffer to disk first
    /// if the row would overflow it.
    pub fn write_message<IO: BlockIO + ?Sized>(
        &mut self,
        io: &mut IO,
        meta: &FatMeta,
        text: &str,
        count: u16,
    ) -> FsLogResult<()> {
        let mut digits = [0u8; 5];
        let digits = format_u16(count, &mut digits);

        let line_len = 1 + 1 + text.len() + 2 + digits.len() + 1 + CRLF.len();
        if self.buf.len() + line_len > MAX_LOG_BUFF_SIZE {
            let pending = core::mem::take(&mut self.buf);
            self.write_file(io, meta, &pending)?;
        }

        self.buf.extend_from_slice(b"<\"");
        self.buf.extend_from_slice(text.as_bytes());
        self.buf.extend_from_slice(b"\",");
        self.buf.extend_from_slice(digits);
        self.buf.extend_from_slice(b">");
        self.buf.extend_from_slice(CRLF);
        Ok(())
    }

    /// Appends the row for `id` from the record table.
    pub fn write_record<IO: BlockIO + ?Sized>(
        &mut self,
        io: &mut IO,
        meta: &FatMeta,
        id: LogId,
    ) -> FsLogResult<()> {
        self.write_message(io, meta, id.message(), self.count(id))
    }

    /// Closes the test-case section and drains the buffer to disk.
    pub fn end_test_case<IO: BlockIO + ?Sized>(
        &mut self,
        io: &mut IO,
        meta: &FatMeta,
    ) -> FsLogResult<()> {
        self.buf.extend_from_slice(END_TEST);
        self.buf.extend_from_slice(CRLF);
        let pending = core::mem::take(&mut self.buf);
        self.write_file(io, meta, &pending)?;
        self.flush(io, meta)
    }
}

#[inline]
fn log_err(e: FsSalvageError) -> FsLogError {
    match e {
        FsSalvageError::IO(io) => FsLogError::IO(io),
        FsSalvageError::NoSpace => FsLogError::NoSpace,
        FsSalvageError::Invalid(msg) => FsLogError::Invalid(msg),
        FsSalvageError::Other(msg) => FsLogError::Other(msg),
    }
}

fn format_u16(value: u16, out: &mut [u8; 5]) -> &[u8] {
    let mut n = value;
    let mut len = 0;
    loop {
        out[len] = b'0' + (n % 10) as u8;
        n /= 10;
        len += 1;
        if n == 0 {
            break;
        }
    }
    out[..len].reverse();
    &out[..len]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_u16() {
        let mut buf = [0u8; 5];
        assert_eq!(format_u16(0, &mut buf), b"0");
        let mut buf = [0u8; 5];
        assert_eq!(format_u16(1, &mut buf), b"1");
        let mut buf = [0u8; 5];
        assert_eq!(format_u16(65535, &mut buf), b"65535");
    }

    #[test]
    fn test_record_table() {
        let mut log = ReportLog::new();
        log.add(LogId::LostChain);
        log.add(LogId::FilesGreater);
        assert_eq!(log.count(LogId::LostChain), 1);
        assert_eq!(log.count(LogId::FilesGreater), 1);
        // Sub-kind feeds the aggregate counter.
        assert_eq!(log.count(LogId::FileLengths), 1);
        assert!(log.is_zero(LogId::CrossLinked));

        log.clear_records();
        assert!(log.is_zero(LogId::LostChain));
    }

    #[test]
    fn test_test_case_layout() {
        let mut log = ReportLog::new();
        log.start_test_case(TestCase::LostChains);
        let text = core::str::from_utf8(&log.buf).unwrap();
        assert!(text.starts_with("<START LOST CLUSTER CHAINS TEST RESULTS>\r\n"));
        assert!(text.contains("<\"ERROR MESSAGE\" , NUMBER>\r\n"));
    }
}
