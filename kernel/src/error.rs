//! Kernel error codes.
//!
//! Syscalls hand these back to user space negated in `eax`; the user library
//! turns them back into [`KernelError`] with [`KernelError::from_errno`].

use core::fmt::{self, Display, Formatter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// unspecified or unknown problem
    Unspecified,
    /// environment doesn't exist or otherwise cannot be used in requested action
    BadEnv,
    /// invalid parameter
    Inval,
    /// request failed due to memory shortage
    NoMem,
    /// attempt to create a new environment beyond the maximum allowed
    NoFreeEnv,
    /// memory fault; the caller has been destroyed
    Fault,
    /// attempt to send to env that is not recving
    IpcNotRecv,
    /// no block device attached
    NoDisk,
    /// network adapter can't take or has no packet right now
    NetNotReady,
    /// packet doesn't fit into the caller's buffer
    NetTooSmall,
}

pub type KResult<T> = Result<T, KernelError>;

impl KernelError {
    pub fn errno(self) -> i32 {
        match self {
            KernelError::Unspecified => 1,
            KernelError::BadEnv => 2,
            KernelError::Inval => 3,
            KernelError::NoMem => 4,
            KernelError::NoFreeEnv => 5,
            KernelError::Fault => 6,
            KernelError::IpcNotRecv => 7,
            KernelError::NoDisk => 9,
            KernelError::NetNotReady => 16,
            KernelError::NetTooSmall => 17,
        }
    }

    /// Decode a (positive) errno; unknown numbers become `Unspecified`.
    pub fn from_errno(errno: i32) -> Self {
        match errno {
            2 => KernelError::BadEnv,
            3 => KernelError::Inval,
            4 => KernelError::NoMem,
            5 => KernelError::NoFreeEnv,
            6 => KernelError::Fault,
            7 => KernelError::IpcNotRecv,
            9 => KernelError::NoDisk,
            16 => KernelError::NetNotReady,
            17 => KernelError::NetTooSmall,
            _ => KernelError::Unspecified,
        }
    }

    /// Value written into `eax` for a failed syscall.
    pub fn as_ret(self) -> i32 {
        -self.errno()
    }
}

impl Display for KernelError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let msg = match self {
            KernelError::Unspecified => "unspecified error",
            KernelError::BadEnv => "bad environment",
            KernelError::Inval => "invalid parameter",
            KernelError::NoMem => "out of memory",
            KernelError::NoFreeEnv => "out of environments",
            KernelError::Fault => "segmentation fault",
            KernelError::IpcNotRecv => "env is not recving",
            KernelError::NoDisk => "no disk attached",
            KernelError::NetNotReady => "network adapter not ready",
            KernelError::NetTooSmall => "buffer too small for packet",
        };
        f.write_str(msg)
    }
}
