// SPDX-License-Identifier: MIT

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FatAttributes: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN    = 0x02;
        const SYSTEM    = 0x04;
        const VOLUME_ID = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE   = 0x20;
        const LFN       = 0x0F;
    }
}

impl FatAttributes {
    /// Attributes for recovery folders and the report log file.
    #[inline]
    pub fn hidden_system() -> Self {
        FatAttributes::HIDDEN | FatAttributes::SYSTEM
    }
}
