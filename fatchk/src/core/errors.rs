// SPDX-License-Identifier: MIT

use core::fmt;

pub use fatio::errors::*;

/// Errors met while following a cluster chain through the allocation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsChainError {
    IO(BlockIOError),
    /// The chain links to the bad-cluster marker.
    Defective(u32),
    /// The chain links to a reserved or out-of-range value.
    Invalid(u32),
    LoopDetected,
    Other(&'static str),
}

impl FsChainError {
    pub fn msg(&self) -> &'static str {
        match self {
            FsChainError::IO(_) => "IO error",
            FsChainError::Defective(_) => "Bad cluster in chain",
            FsChainError::Invalid(_) => "Invalid cluster in chain",
            FsChainError::LoopDetected => "Loop detected in cluster chain",
            FsChainError::Other(msg) => msg,
        }
    }

    pub fn source(&self) -> Option<FsError> {
        match self {
            FsChainError::IO(e) => Some(FsError::IO(*e)),
            _ => None,
        }
    }
}

impl fmt::Display for FsChainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg())?;
        match self {
            FsChainError::Defective(cl) | FsChainError::Invalid(cl) => {
                write!(f, " (cluster: {cl})")?;
            }
            _ => {}
        }
        let mut current = self.source();
        while let Some(src) = current {
            write!(f, "\n  caused by: {}", src.msg())?;
            current = src.source();
        }
        Ok(())
    }
}

/// Errors from the on-disk report log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsLogError {
    IO(BlockIOError),
    NoSpace,
    Invalid(&'static str),
    Other(&'static str),
}

impl FsLogError {
    pub fn msg(&self) -> &'static str {
        match self {
            FsLogError::IO(_) => "IO error",
            FsLogError::NoSpace => "No space for log file",
            FsLogError::Invalid(msg) => msg,
            FsLogError::Other(msg) => msg,
        }
    }

    pub fn source(&self) -> Option<FsError> {
        match self {
            FsLogError::IO(e) => Some(FsError::IO(*e)),
            _ => None,
        }
    }
}

impl fmt::Display for FsLogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg())?;
        let mut current = self.source();
        while let Some(src) = current {
            write!(f, "\n  caused by: {}", src.msg())?;
            current = src.source();
        }
        Ok(())
    }
}

/// Errors from recovery-folder and salvage-entry creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsSalvageError {
    IO(BlockIOError),
    /// No free cluster or directory slot left for a recovery entry.
    NoSpace,
    Invalid(&'static str),
    Other(&'static str),
}

impl FsSalvageError {
    pub fn msg(&self) -> &'static str {
        match self {
            FsSalvageError::IO(_) => "IO error",
            FsSalvageError::NoSpace => "No space for recovery entry",
            FsSalvageError::Invalid(msg) => msg,
            FsSalvageError::Other(msg) => msg,
        }
    }

    pub fn source(&self) -> Option<FsError> {
        match self {
            FsSalvageError::IO(e) => Some(FsError::IO(*e)),
            _ => None,
        }
    }
}

impl fmt::Display for FsSalvageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg())?;
        let mut current = self.source();
        while let Some(src) = current {
            write!(f, "\n  caused by: {}", src.msg())?;
            current = src.source();
        }
        Ok(())
    }
}

/// Errors returned by the check-disk engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsCheckError {
    IO(BlockIOError),
    Chain(FsChainError),
    Log(FsLogError),
    Salvage(FsSalvageError),
    /// An invalid cluster value was met and the directory-record check was
    /// not requested alongside the check that needed it.
    InvalidCluster,
    /// Another check-disk invocation holds the session lock.
    Busy,
    Invalid(&'static str),
    Other(&'static str),
}

impl FsCheckError {
    pub fn msg(&self) -> &'static str {
        match self {
            FsCheckError::IO(_) => "IO error",
            FsCheckError::Chain(_) => "Cluster chain error",
            FsCheckError::Log(_) => "Report log error",
            FsCheckError::Salvage(_) => "Salvage error",
            FsCheckError::InvalidCluster => "Invalid cluster value encountered",
            FsCheckError::Busy => "Check disk session busy",
            FsCheckError::Invalid(msg) => msg,
            FsCheckError::Other(msg) => msg,
        }
    }

    pub fn source(&self) -> Option<FsError> {
        match self {
            FsCheckError::IO(e) => Some(FsError::IO(*e)),
            FsCheckError::Chain(e) => Some(FsError::Chain(*e)),
            FsCheckError::Log(e) => Some(FsError::Log(*e)),
            FsCheckError::Salvage(e) => Some(FsError::Salvage(*e)),
            _ => None,
        }
    }
}

impl fmt::Display for FsCheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg())?;
        let mut current = self.source();
        while let Some(src) = current {
            write!(f, "\n  caused by: {}", src.msg())?;
            current = src.source();
        }
        Ok(())
    }
}

/// Top-level error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    IO(BlockIOError),
    Chain(FsChainError),
    Log(FsLogError),
    Salvage(FsSalvageError),
    Check(FsCheckError),
    Other(&'static str),
}

impl FsError {
    pub fn msg(&self) -> &'static str {
        match self {
            FsError::IO(e) => e.msg(),
            FsError::Chain(e) => e.msg(),
            FsError::Log(e) => e.msg(),
            FsError::Salvage(e) => e.msg(),
            FsError::Check(e) => e.msg(),
            FsError::Other(msg) => msg,
        }
    }

    pub fn source(&self) -> Option<FsError> {
        match self {
            FsError::Chain(e) => e.source(),
            FsError::Log(e) => e.source(),
            FsError::Salvage(e) => e.source(),
            FsError::Check(e) => e.source(),
            FsError::IO(_) => None,
            FsError::Other(_) => None,
        }
    }
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg())?;
        let mut current = self.source();
        while let Some(src) = current {
            write!(f, "\n  caused by: {}", src.msg())?;
            current = src.source();
        }
        Ok(())
    }
}

// === type Fs*Result ===

pub type FsResult<T = ()> = Result<T, FsError>;
pub type FsChainResult<T = ()> = Result<T, FsChainError>;
pub type FsLogResult<T = ()> = Result<T, FsLogError>;
pub type FsSalvageResult<T = ()> = Result<T, FsSalvageError>;
pub type FsCheckResult<T = ()> = Result<T, FsCheckError>;

crate::error_wiring! {
    top => FsError {
        BlockIOError   : IO,
        FsChainError   : Chain,
        FsLogError     : Log,
        FsSalvageError : Salvage,
        FsCheckError   : Check,
    },
    str_into => [
        FsChainError,
        FsLogError,
        FsSalvageError,
        FsCheckError,
    ],
    sub => {
        BlockIOError   => [ FsChainError::IO, FsLogError::IO, FsSalvageError::IO, FsCheckError::IO ],
        FsChainError   => [ FsCheckError::Chain ],
        FsLogError     => [ FsCheckError::Log ],
        FsSalvageError => [ FsCheckError::Salvage ],
    },
}
