// SPDX-License-Identifier: MIT

pub mod attr;
pub mod chkdsk;
pub mod constant;
pub mod meta;
pub mod table;
pub mod types;
pub mod utils;

pub mod prelude {
    pub use super::attr::FatAttributes;
    pub use super::chkdsk::classify::{ClusterClass, classify, is_valid_link_target};
    pub use super::chkdsk::log::{LogId, ReportLog, TestCase};
    pub use super::chkdsk::walker::{DirRecord, RecordLocation, RecordVisitor, Visit, traverse};
    pub use super::chkdsk::{
        CheckFlags, CheckOptions, CheckOutcome, check_disk, check_disk_with,
    };
    pub use super::constant::*;
    pub use super::meta::{FatKind, FatMeta};
    pub use super::table::{self, Link};
    pub use super::types::{DirEntry, LfnEntry};

    pub use crate::core::checker::{CheckMode, WaitMode};
    pub use crate::core::errors::*;
}
