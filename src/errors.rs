use thiserror::Error;

/// Runtime error signal.
///
/// Three families share this type: fatal load/format errors (a scrambled
/// game image has no safe continue state), script-bug errors (bad argument
/// counts and the like, caught only by the top-level driver), and
/// user-invoked control flow (quit/restart/exit-object), which unwinds
/// through every active frame to a recovery point in the driver loop.
/// Conditions a running game is expected to hit (file not found, nothing to
/// undo, word not present) are *not* signalled; they come back as sentinel
/// values or small typed results so script code can branch on them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TadsError {
    // -- fatal load/format errors --
    #[error("unable to open game file")]
    OpenGame,
    #[error("error reading game file")]
    ReadGame,
    #[error("file is not a TADS2 game image")]
    BadHeader,
    #[error("game file has an unsupported format version")]
    BadVersion,
    #[error("error reading resource file {0}")]
    ReadResource(String),
    #[error("{0} is not a TADS2 resource file")]
    BadResourceHeader(String),
    #[error("unknown object type in game file")]
    UnknownObjType,
    #[error("object too large for its reserved cache slot")]
    LoadTooBig,
    #[error("object cache space exhausted")]
    CacheFull,
    #[error("file is not a TADS2 character map")]
    BadCharmap,

    // -- script-bug errors --
    #[error("wrong number of arguments to built-in")]
    BifArgCount,
    #[error("invalid argument type for built-in {0}")]
    BifArgType(&'static str),
    #[error("invalid argument value for built-in {0}")]
    BifArgValue(&'static str),
    #[error("numeric value required")]
    NumRequired,
    #[error("stack overflow")]
    StackOverflow,
    #[error("stack underflow")]
    StackUnderflow,
    #[error("heap space exhausted")]
    HeapOverflow,
    #[error("reference to invalid object {0}")]
    InvalidObject(u16),
    #[error("object {0} is not resident and has no load source")]
    NotReserved(u16),
    #[error("stale heap handle")]
    StaleHandle,
    #[error("invalid opcode {0:#04x}")]
    BadOpcode(u8),
    #[error("invalid built-in index {0}")]
    BadBuiltin(u16),
    #[error("invalid file handle")]
    BadFileHandle,
    #[error("too many fuses")]
    ManyFuses,
    #[error("too many daemons")]
    ManyDaemons,
    #[error("too many notifiers")]
    ManyNotifiers,
    #[error("fuse/daemon argument may not be a string or list")]
    SchedArgValue,

    // -- expected conditions carried as typed results internally --
    #[error("no fuse/daemon/notifier matches")]
    SchedNotFound,
    #[error("vocabulary word not found")]
    WordNotFound,
    #[error("nothing to undo")]
    NoUndo,
    #[error("undo record is incomplete")]
    IncompleteUndo,

    // -- user-invoked control flow --
    #[error("quit signal")]
    Quit,
    #[error("restart signal")]
    Restart,
    #[error("exit-object signal")]
    ExitObj,
    #[error("abort-command signal")]
    AbortCommand,
}

impl TadsError {
    /// True for the signals that are normal control flow rather than
    /// failures; the driver loop fields these at its recovery points.
    pub fn is_control_flow(&self) -> bool {
        matches!(
            self,
            TadsError::Quit | TadsError::Restart | TadsError::ExitObj | TadsError::AbortCommand
        )
    }
}

/// Result code from a restore attempt.  Callers must distinguish these for
/// user messaging, so restore reports through this enum rather than
/// signalling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreCode {
    Success,
    FileNotFound,
    NotSaveFile,
    BadFormatVersion,
    BadGameVersion,
    ReadError,
}

impl RestoreCode {
    pub fn is_success(self) -> bool {
        self == RestoreCode::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_flow_classification() {
        assert!(TadsError::Quit.is_control_flow());
        assert!(TadsError::Restart.is_control_flow());
        assert!(!TadsError::BadHeader.is_control_flow());
        assert!(!TadsError::NoUndo.is_control_flow());
    }
}
