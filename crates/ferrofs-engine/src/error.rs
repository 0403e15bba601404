use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("peer disconnected")]
    Disconnected,

    #[error("truncated {what}: {got} of {need} bytes")]
    Truncated {
        what: &'static str,
        got: usize,
        need: usize,
    },

    #[error("frame length mismatch: header declares {declared}, read {actual}")]
    LengthMismatch { declared: u32, actual: usize },

    #[error("unknown inode: {ino}")]
    UnknownInode { ino: u64 },

    #[error("stale or invalid handle: {fh:#x}")]
    StaleHandle { fh: u64 },

    #[error("unsupported kernel protocol major version {kernel_major}")]
    ProtocolVersion { kernel_major: u32 },

    #[error("capacity exhausted: {what}")]
    Capacity { what: &'static str },

    #[error("reply buffer full")]
    BufferFull,

    #[error("wait deadline elapsed")]
    WaitTimeout,

    #[error("unimplemented opcode: {opcode}")]
    Unimplemented { opcode: u32 },

    #[error("invalid argument: {msg}")]
    InvalidArgument { msg: String },
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    pub fn to_errno(&self) -> i32 {
        use libc::*;
        match self {
            EngineError::Io(e) => e.raw_os_error().unwrap_or(EIO),
            EngineError::Disconnected => EIO,
            EngineError::Truncated { .. } => EIO,
            EngineError::LengthMismatch { .. } => EIO,
            EngineError::UnknownInode { .. } => ENOENT,
            EngineError::StaleHandle { .. } => EIO,
            EngineError::ProtocolVersion { .. } => EPROTO,
            EngineError::Capacity { .. } => ENOMEM,
            EngineError::BufferFull => ENOBUFS,
            EngineError::WaitTimeout => ETIMEDOUT,
            EngineError::Unimplemented { .. } => ENOSYS,
            EngineError::InvalidArgument { .. } => EINVAL,
        }
    }
}

/// Raw errno carried by backend operations and error replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Errno(pub i32);

impl Errno {
    pub const NOSYS: Errno = Errno(libc::ENOSYS);
    pub const NOENT: Errno = Errno(libc::ENOENT);
    pub const IO: Errno = Errno(libc::EIO);
    pub const ACCES: Errno = Errno(libc::EACCES);
    pub const NOBUFS: Errno = Errno(libc::ENOBUFS);
    pub const INVAL: Errno = Errno(libc::EINVAL);
}

impl From<EngineError> for Errno {
    fn from(e: EngineError) -> Self {
        Errno(e.to_errno())
    }
}

impl std::fmt::Display for Errno {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "errno {}", self.0)
    }
}

pub type OpResult<T> = std::result::Result<T, Errno>;
