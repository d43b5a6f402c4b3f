use crate::error::Result;
use crate::fd::{CodeHash, Fd, HashKind, ProcessId, ProgramLocator};

/// The VM capability set this library is built on.
///
/// Every call blocks until it completes or fails. Implementations are cheap
/// handles (`Clone`) so each pipe endpoint can carry one.
pub trait Syscalls: Clone {
    /// Create a pipe, returning `(read_end, write_end)`.
    fn create_pipe(&self) -> Result<(Fd, Fd)>;

    /// Start `program` with `args`, handing `inherited` descriptors over to it.
    ///
    /// On success the descriptors belong to the child; the caller must not
    /// use them again.
    fn spawn(&self, program: &ProgramLocator, args: &[String], inherited: &[Fd])
        -> Result<ProcessId>;

    /// Read up to `buf.len()` bytes. `Ok(0)` means the write end is closed.
    fn raw_read(&self, fd: Fd, buf: &mut [u8]) -> Result<usize>;

    /// Write `buf`, returning the number of bytes accepted.
    fn raw_write(&self, fd: Fd, buf: &[u8]) -> Result<usize>;

    /// End the calling process with `code`.
    fn terminate(&self, code: i32) -> !;

    /// Find the program stored in the dependency cell matching `hash`.
    fn resolve_dependency(&self, hash: &CodeHash, kind: HashKind) -> Result<ProgramLocator>;

    /// Descriptors this process received from its parent at spawn time.
    fn inherited_fds(&self) -> Result<Vec<Fd>>;
}
