// SPDX-License-Identifier: MIT

// === Disk Layout Parameters ===

pub const FAT_SECTOR_SIZE: u16 = 512; // BPB_BytsPerSec
pub const FAT_NUM_FATS: u8 = 2; // BPB_NumFATs
pub const FAT_FIRST_CLUSTER: u32 = 2;
pub const DEFAULT_FAT_RESERVED_SECTORS: u16 = 1;
pub const DEFAULT_FAT32_RESERVED_SECTORS: u16 = 32;
pub const FAT_ROOT_CLUSTER: u32 = 2; // BPB_RootClus (FAT32)

// === Cluster value windows (width-specific masks applied on top) ===

pub const FAT12_MASK: u32 = 0x0000_0FFF;
pub const FAT16_MASK: u32 = 0x0000_FFFF;
pub const FAT32_MASK: u32 = 0x0FFF_FFFF;

pub const FAT_FREE_CLUSTER: u32 = 0;
/// Masked per width: 0x?FF8..=0x?FFF is end-of-chain.
pub const FAT_EOC_THRESHOLD: u32 = 0x0FFF_FFF8;
/// Masked per width: 0x?FF7.
pub const FAT_BAD_CLUSTER: u32 = 0x0FFF_FFF7;
/// Masked per width: 0x?FF0..=0x?FF6 plus the special value 1.
pub const FAT_RESERVED_START: u32 = 0x0FFF_FFF0;
pub const FAT_RESERVED_END: u32 = 0x0FFF_FFF6;
pub const FAT_RESERVED_SPECIAL: u32 = 1;

// === Directory records ===

pub const DIR_ENTRY_SIZE: usize = 32;
pub const FAT_ENTRY_DELETED: u8 = 0xE5;
pub const FAT_ENTRY_END_OF_DIR: u8 = 0x00;
/// A first name byte of 0x05 stands for a real 0xE5 (kanji lead byte).
pub const FAT_SFN_KANJI_ESCAPE: u8 = 0x05;
pub const FAT_DOT_NAME: &[u8; 11] = b".          ";
pub const FAT_DOTDOT_NAME: &[u8; 11] = b"..         ";
pub const MAX_LFN_CHARS: usize = 255;

// === Check-disk artifacts ===

/// Fixed name of the on-volume report file.
pub const DEFAULT_LOG_FILE: &str = "CHKDSK.LOG";
pub const LOG_EXTENSION: &[u8; 3] = b"LOG";
/// Extension carried by every salvage entry.
pub const RECOVERY_EXTENSION: &[u8; 3] = b"CHK";

/// Recovery folder base names; a numeric extension `.000`..`.254` is
/// appended so repeated runs keep older salvage output.
pub const LOST_CHAIN_FOLDER: &str = "LOSTCLC";
pub const CROSS_LINK_FOLDER: &str = "CROSSLC";
pub const FILE_LEN_FOLDER: &str = "BADLEN";

/// Salvage entry name prefixes, completed by a sequence number.
pub const LOST_CHAIN_FILE_PREFIX: &str = "FL_LC";
pub const LOST_CHAIN_DIR_PREFIX: &str = "DIR_LC";
pub const CROSS_LINK_FILE_PREFIX: &str = "FL_CL";
pub const CROSS_LINK_DIR_PREFIX: &str = "DIR_CL";
pub const FILE_LEN_FILE_PREFIX: &str = "FL_IV";
