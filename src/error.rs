use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid magic signature")]
    InvalidMagic,
    #[error("invalid byte order mark")]
    InvalidBom,
    #[error("invalid header field {field}: {detail}")]
    HeaderError { field: &'static str, detail: String },
    #[error("loop detected while walking the master FAT (DIFAT)")]
    MasterLoop,
    #[error("normal FAT is implausibly large ({0} sectors)")]
    LargeNormalFat(usize),
    #[error("mini FAT is implausibly large ({0} sectors)")]
    LargeMiniFat(usize),
    #[error("document has no mini FAT but a mini-stream was opened")]
    NoMiniFat,
    #[error("loop detected while walking a FAT chain starting at sector {0}")]
    NormalLoop(u32),
    #[error("loop detected in the directory hierarchy at index {0}")]
    DirLoop(usize),
    #[error("no entity found at path {0}")]
    NotFound(String),
    #[error("entity at path {0} is a storage, not a stream")]
    NotStream(String),
    #[error("cannot write container: {0}")]
    WriteError(String),
    #[error("internal error: {0}")]
    Internal(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Utf16(#[from] std::string::FromUtf16Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Non-fatal diagnostics raised while reading a container. Mirrors the
/// warning family this library tracks (name, type, timestamp, sector,
/// truncation, loop), flattened to one enum carrying an entity/sector
/// index payload per variant.
#[derive(Clone, Debug)]
pub enum Warning {
    HeaderVersion { minor: u16 },
    HeaderDllVersion { value: u16 },
    HeaderMiniCutoff { value: u32 },
    HeaderSectorSize { declared: u32 },
    MasterSector { sector: u32 },
    DirName { index: usize, detail: String },
    DirType { index: usize, detail: String },
    DirIndex { index: usize, detail: String },
    DirTime { index: usize, detail: String },
    DirSector { index: usize, detail: String },
    DirSize { index: usize, detail: String },
    DirEntry { index: usize, detail: String },
    Truncated { detail: String },
    Emulation { detail: String },
}

impl Warning {
    fn tag(&self) -> &'static str {
        match self {
            Warning::HeaderVersion { .. } => "header-version",
            Warning::HeaderDllVersion { .. } => "header-dll-version",
            Warning::HeaderMiniCutoff { .. } => "header-mini-cutoff",
            Warning::HeaderSectorSize { .. } => "header-sector-size",
            Warning::MasterSector { .. } => "master-sector",
            Warning::DirName { .. } => "dir-name",
            Warning::DirType { .. } => "dir-type",
            Warning::DirIndex { .. } => "dir-index",
            Warning::DirTime { .. } => "dir-time",
            Warning::DirSector { .. } => "dir-sector",
            Warning::DirSize { .. } => "dir-size",
            Warning::DirEntry { .. } => "dir-entry",
            Warning::Truncated { .. } => "truncated",
            Warning::Emulation { .. } => "emulation",
        }
    }

    fn index(&self) -> Option<u32> {
        match self {
            Warning::MasterSector { sector } => Some(*sector),
            Warning::DirName { index, .. }
            | Warning::DirType { index, .. }
            | Warning::DirIndex { index, .. }
            | Warning::DirTime { index, .. }
            | Warning::DirSector { index, .. }
            | Warning::DirSize { index, .. }
            | Warning::DirEntry { index, .. } => Some(*index as u32),
            _ => None,
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::HeaderVersion { minor } => {
                write!(f, "unexpected minor version 0x{minor:04x} in header")
            }
            Warning::HeaderDllVersion { value } => {
                write!(f, "unknown dll version {value}, falling back to sector-shift-derived behavior")
            }
            Warning::HeaderMiniCutoff { value } => {
                write!(f, "non-standard mini-stream cutoff {value}")
            }
            Warning::HeaderSectorSize { declared } => {
                write!(f, "sector size {declared} does not match declared major version")
            }
            Warning::MasterSector { sector } => {
                write!(f, "FAT sector {sector} is referenced by the DIFAT but not self-marked as FATSECT")
            }
            Warning::DirName { index, detail }
            | Warning::DirType { index, detail }
            | Warning::DirIndex { index, detail }
            | Warning::DirTime { index, detail }
            | Warning::DirSector { index, detail }
            | Warning::DirSize { index, detail }
            | Warning::DirEntry { index, detail } => write!(f, "directory entry {index}: {detail}"),
            Warning::Truncated { detail } => write!(f, "stream truncated: {detail}"),
            Warning::Emulation { detail } => write!(f, "{detail}"),
        }
    }
}

/// Receives warnings as they are raised. The default sink forwards to
/// `log::warn!`; callers that want structured access instead use
/// `Diagnostics::warnings()`.
pub trait DiagnosticSink {
    fn observe(&self, warning: &Warning);
}

pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn observe(&self, warning: &Warning) {
        log::warn!("{warning}");
    }
}

/// Collects warnings for one read or write pass, de-duplicating repeats of
/// the same warning kind against the same entity/sector index.
pub struct Diagnostics {
    sink: Box<dyn DiagnosticSink>,
    seen: RefCell<HashSet<(Option<u32>, &'static str)>>,
    log: RefCell<Vec<Warning>>,
}

impl Diagnostics {
    pub fn new(sink: Box<dyn DiagnosticSink>) -> Self {
        Self {
            sink,
            seen: RefCell::new(HashSet::new()),
            log: RefCell::new(Vec::new()),
        }
    }

    pub fn default_sink() -> Self {
        Self::new(Box::new(LogSink))
    }

    pub fn warn(&self, warning: Warning) {
        let key = (warning.index(), warning.tag());
        if self.seen.borrow_mut().insert(key) {
            self.sink.observe(&warning);
            self.log.borrow_mut().push(warning);
        }
    }

    pub fn warnings(&self) -> Vec<Warning> {
        self.log.borrow().clone()
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::default_sink()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingSink {
        count: RefCell<usize>,
    }

    impl DiagnosticSink for CountingSink {
        fn observe(&self, _warning: &Warning) {
            *self.count.borrow_mut() += 1;
        }
    }

    #[test]
    fn deduplicates_same_warning_for_same_entity() {
        let sink = CountingSink {
            count: RefCell::new(0),
        };
        let diagnostics = Diagnostics::new(Box::new(sink));
        diagnostics.warn(Warning::DirName {
            index: 3,
            detail: "missing NUL terminator".into(),
        });
        diagnostics.warn(Warning::DirName {
            index: 3,
            detail: "missing NUL terminator".into(),
        });
        diagnostics.warn(Warning::DirName {
            index: 4,
            detail: "missing NUL terminator".into(),
        });
        assert_eq!(diagnostics.warnings().len(), 2);
    }
}
