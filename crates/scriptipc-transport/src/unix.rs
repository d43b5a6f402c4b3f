//! Host provider backed by real OS pipes and processes.
//!
//! Descriptors are renumbered after `pipe(2)` so the VM parity convention
//! holds: read ends even, write ends odd. Spawned programs receive their
//! descriptors open across `exec`, listed in [`INHERITED_FDS_ENV`].

use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, Command};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::error::{Result, TransportError};
use crate::fd::{CodeHash, Fd, HashKind, ProcessId, ProgramLocator};
use crate::syscalls::Syscalls;

/// Environment variable carrying the inherited descriptors, comma separated.
pub const INHERITED_FDS_ENV: &str = "SCRIPTIPC_INHERITED_FDS";

/// [`Syscalls`] over the host operating system (Linux/macOS).
#[derive(Clone, Default)]
pub struct HostSyscalls {
    children: Arc<Mutex<HashMap<ProcessId, Child>>>,
    dependencies: Arc<HashMap<(CodeHash, HashKind), ProgramLocator>>,
}

impl HostSyscalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `hash` to the executable at `program`.
    pub fn with_dependency(mut self, hash: CodeHash, kind: HashKind, program: ProgramLocator) -> Self {
        Arc::make_mut(&mut self.dependencies).insert((hash, kind), program);
        self
    }

    /// Close a descriptor owned by this process.
    pub fn close(&self, fd: Fd) -> Result<()> {
        let raw = to_raw(fd)?;
        // SAFETY: closing an integer descriptor has no memory-safety impact;
        // the caller gives up every handle referring to it.
        let rc = unsafe { libc::close(raw) };
        if rc != 0 {
            return Err(os_error(fd));
        }
        debug!(%fd, "closed descriptor");
        Ok(())
    }

    /// Wait for a process started by [`Syscalls::spawn`] and return its exit
    /// code. Death by signal `n` is reported as `128 + n`.
    pub fn wait(&self, pid: ProcessId) -> Result<i32> {
        let child = self
            .children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&pid);
        let mut child = child.ok_or(TransportError::UnknownProcess(pid.0))?;
        let status = child.wait()?;
        let code = status
            .code()
            .or_else(|| status.signal().map(|signal| 128 + signal))
            .unwrap_or(-1);
        debug!(%pid, code, "child exited");
        Ok(code)
    }
}

impl std::fmt::Debug for HostSyscalls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostSyscalls")
            .field("dependencies", &self.dependencies.len())
            .finish()
    }
}

impl Syscalls for HostSyscalls {
    fn create_pipe(&self) -> Result<(Fd, Fd)> {
        let mut raw: [libc::c_int; 2] = [-1; 2];
        // SAFETY: `raw` is a writable array of two ints, as pipe(2) requires.
        let rc = unsafe { libc::pipe(raw.as_mut_ptr()) };
        if rc != 0 {
            return Err(io::Error::last_os_error().into());
        }

        let read_end = renumber(raw[0], 0);
        let write_end = renumber(raw[1], 1);
        match (read_end, write_end) {
            (Ok(r), Ok(w)) => {
                let pair = (Fd(r as u64), Fd(w as u64));
                debug!(read_end = %pair.0, write_end = %pair.1, "pipe created");
                Ok(pair)
            }
            (Err(err), other) | (other, Err(err)) => {
                if let Ok(fd) = other {
                    close_raw(fd);
                }
                Err(err.into())
            }
        }
    }

    fn spawn(
        &self,
        program: &ProgramLocator,
        args: &[String],
        inherited: &[Fd],
    ) -> Result<ProcessId> {
        let raws = inherited
            .iter()
            .map(|fd| to_raw(*fd))
            .collect::<Result<Vec<RawFd>>>()?;
        let listed = inherited
            .iter()
            .map(Fd::to_string)
            .collect::<Vec<_>>()
            .join(",");

        let mut command = Command::new(program.as_str());
        command.args(args).env(INHERITED_FDS_ENV, listed);
        let keep = raws.clone();
        // SAFETY: the hook runs in the child between fork and exec. It only
        // calls fcntl(2), which is async-signal-safe, and does not allocate.
        unsafe {
            command.pre_exec(move || {
                for &fd in &keep {
                    let flags = libc::fcntl(fd, libc::F_GETFD);
                    if flags < 0 || libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) < 0 {
                        return Err(io::Error::last_os_error());
                    }
                }
                Ok(())
            });
        }

        let child = command.spawn().map_err(|source| TransportError::Spawn {
            program: program.clone(),
            source,
        })?;
        for raw in raws {
            close_raw(raw);
        }

        let pid = ProcessId(u64::from(child.id()));
        debug!(%pid, %program, inherited = ?inherited, "spawned");
        self.children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pid, child);
        Ok(pid)
    }

    fn raw_read(&self, fd: Fd, buf: &mut [u8]) -> Result<usize> {
        let raw = to_raw(fd)?;
        loop {
            // SAFETY: `buf` is valid for writes of `buf.len()` bytes.
            let n = unsafe { libc::read(raw, buf.as_mut_ptr().cast(), buf.len()) };
            if n >= 0 {
                return Ok(n as usize);
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(classify(fd, err));
            }
        }
    }

    fn raw_write(&self, fd: Fd, buf: &[u8]) -> Result<usize> {
        let raw = to_raw(fd)?;
        let mut written = 0;
        while written < buf.len() {
            let rest = &buf[written..];
            // SAFETY: `rest` is valid for reads of `rest.len()` bytes.
            let n = unsafe { libc::write(raw, rest.as_ptr().cast(), rest.len()) };
            if n >= 0 {
                written += n as usize;
                continue;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(classify(fd, err));
            }
        }
        Ok(written)
    }

    fn terminate(&self, code: i32) -> ! {
        std::process::exit(code)
    }

    fn resolve_dependency(&self, hash: &CodeHash, kind: HashKind) -> Result<ProgramLocator> {
        self.dependencies
            .get(&(*hash, kind))
            .cloned()
            .ok_or(TransportError::DependencyNotFound { hash: *hash, kind })
    }

    fn inherited_fds(&self) -> Result<Vec<Fd>> {
        let Ok(listed) = std::env::var(INHERITED_FDS_ENV) else {
            return Ok(Vec::new());
        };
        parse_inherited(&listed)
    }
}

/// Parse the comma separated descriptor list from [`INHERITED_FDS_ENV`].
pub fn parse_inherited(listed: &str) -> Result<Vec<Fd>> {
    listed
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            item.parse::<u64>().map(Fd).map_err(|_| {
                TransportError::Io(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("invalid descriptor {item:?} in {INHERITED_FDS_ENV}"),
                ))
            })
        })
        .collect()
}

fn to_raw(fd: Fd) -> Result<RawFd> {
    RawFd::try_from(fd.0).map_err(|_| TransportError::InvalidFd(fd))
}

fn classify(fd: Fd, err: io::Error) -> TransportError {
    match err.raw_os_error() {
        Some(libc::EPIPE) => TransportError::OtherEndClosed,
        Some(libc::EBADF) => TransportError::InvalidFd(fd),
        _ => TransportError::Io(err),
    }
}

fn os_error(fd: Fd) -> TransportError {
    classify(fd, io::Error::last_os_error())
}

fn close_raw(fd: RawFd) {
    // SAFETY: `fd` was created by this module and has no other owner.
    unsafe {
        libc::close(fd);
    }
}

/// Move `fd` to a close-on-exec descriptor whose parity is `parity`.
///
/// `fd` is consumed: on success it is either returned or closed, on failure
/// it is closed.
fn renumber(fd: RawFd, parity: RawFd) -> io::Result<RawFd> {
    if fd % 2 == parity {
        set_cloexec(fd).inspect_err(|_| close_raw(fd))?;
        return Ok(fd);
    }

    let mut min = fd + 1;
    let outcome = loop {
        // SAFETY: F_DUPFD_CLOEXEC duplicates an open descriptor; no memory is passed.
        let dup = unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, min) };
        if dup < 0 {
            break Err(io::Error::last_os_error());
        }
        if dup % 2 == parity {
            break Ok(dup);
        }
        close_raw(dup);
        min = dup + 1;
    };
    close_raw(fd);
    outcome
}

fn set_cloexec(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl on an owned descriptor with integer arguments only.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above.
    if unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
