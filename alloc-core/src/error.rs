//! Internal error type for the OS-primitive wrappers in [`crate::os`].
//!
//! This never crosses the public allocator contract: `allocate`,
//! `reallocate` and `zero_allocate` flatten every variant here to a null
//! pointer, per spec. It exists only so the primitives in `os.rs` have
//! something richer than `Option<()>` to reason about internally, in the
//! same shape as the teacher's `openexr` error type.

use std::fmt;

pub struct Error {
    repr: Repr,
}

enum Repr {
    Os(errno::Errno),
    ConstMessage(&'static str),
}

impl Error {
    pub(crate) fn from_errno() -> Error {
        Error { repr: Repr::Os(errno::errno()) }
    }

    pub(crate) const fn message(msg: &'static str) -> Error {
        Error { repr: Repr::ConstMessage(msg) }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            Repr::Os(errno) => f.debug_struct("Error").field("errno", errno).finish(),
            Repr::ConstMessage(msg) => f.debug_struct("Error").field("message", msg).finish(),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            Repr::Os(errno) => fmt::Display::fmt(errno, f),
            Repr::ConstMessage(msg) => f.write_str(msg),
        }
    }
}

impl std::error::Error for Error {}

pub(crate) type Result<T> = std::result::Result<T, Error>;
