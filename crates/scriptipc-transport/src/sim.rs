//! In-process simulation of the script VM.
//!
//! Pipes are in-memory byte queues and descriptors follow the VM numbering:
//! the first pipe is `(2, 3)`, read ends even, write ends odd. Programs are
//! closures registered under a name; spawning one runs it on its own thread
//! with a [`SimProcess`] handle that only sees the descriptors it owns.
//!
//! `terminate` unwinds the simulated process with a [`SimExit`] payload and
//! records the code, so a fatal error in a spawned program is observable
//! through [`SimVm::wait`]. Calling it on the root handle unwinds the
//! calling thread.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;

use tracing::{debug, warn};

use crate::error::{Result, TransportError};
use crate::fd::{CodeHash, Fd, HashKind, ProcessId, ProgramLocator};
use crate::syscalls::Syscalls;

/// First descriptor handed out; 0 and 1 are never valid pipe ends.
pub const FIRST_FD: u64 = 2;

/// Process id of the handle returned by [`SimVm::root`].
pub const ROOT_PID: ProcessId = ProcessId(0);

/// Exit code recorded when a program panics instead of returning.
pub const PANIC_EXIT_CODE: i32 = -1;

type Program = Arc<dyn Fn(SimProcess, Vec<String>) -> i32 + Send + Sync>;

/// Unwind payload used by [`SimProcess::terminate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimExit(pub i32);

struct Pipe {
    data: VecDeque<u8>,
    reader_open: bool,
    writer_open: bool,
}

struct FdEntry {
    pipe: usize,
    owner: ProcessId,
}

#[derive(Default)]
struct ProcessEntry {
    inherited: Vec<Fd>,
    exit_code: Option<i32>,
}

struct State {
    next_fd: u64,
    next_pid: u64,
    pipes: Vec<Pipe>,
    fds: HashMap<Fd, FdEntry>,
    processes: HashMap<ProcessId, ProcessEntry>,
    programs: HashMap<String, Program>,
    dependencies: HashMap<(CodeHash, HashKind), ProgramLocator>,
}

impl State {
    /// Resolve `fd` for `pid`, rejecting descriptors it does not own.
    fn owned(&self, pid: ProcessId, fd: Fd) -> Result<usize> {
        match self.fds.get(&fd) {
            Some(entry) if entry.owner == pid => Ok(entry.pipe),
            _ => Err(TransportError::InvalidFd(fd)),
        }
    }

    fn close(&mut self, fd: Fd) {
        if let Some(entry) = self.fds.remove(&fd) {
            let pipe = &mut self.pipes[entry.pipe];
            if fd.is_read_end() {
                pipe.reader_open = false;
                pipe.data.clear();
            } else {
                pipe.writer_open = false;
            }
        }
    }
}

struct Shared {
    state: Mutex<State>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, State>) -> MutexGuard<'a, State> {
        self.changed
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// A simulated VM instance: program table, dependency cells and pipes.
#[derive(Clone)]
pub struct SimVm {
    shared: Arc<Shared>,
}

impl SimVm {
    pub fn new() -> Self {
        let mut processes = HashMap::new();
        processes.insert(ROOT_PID, ProcessEntry::default());
        let state = State {
            next_fd: FIRST_FD,
            next_pid: ROOT_PID.0 + 1,
            pipes: Vec::new(),
            fds: HashMap::new(),
            processes,
            programs: HashMap::new(),
            dependencies: HashMap::new(),
        };
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                changed: Condvar::new(),
            }),
        }
    }

    /// Handle for the initial process, which inherits nothing.
    pub fn root(&self) -> SimProcess {
        SimProcess {
            shared: Arc::clone(&self.shared),
            pid: ROOT_PID,
        }
    }

    /// Make `program` spawnable under `name`.
    ///
    /// The closure's return value becomes the process exit code.
    pub fn register_program<F>(&self, name: impl Into<String>, program: F)
    where
        F: Fn(SimProcess, Vec<String>) -> i32 + Send + Sync + 'static,
    {
        self.shared
            .lock()
            .programs
            .insert(name.into(), Arc::new(program));
    }

    /// Store a dependency cell so `hash` resolves to `program`.
    pub fn register_dependency(&self, hash: CodeHash, kind: HashKind, program: ProgramLocator) {
        self.shared
            .lock()
            .dependencies
            .insert((hash, kind), program);
    }

    /// Block until `pid` exits and return its exit code.
    pub fn wait(&self, pid: ProcessId) -> Result<i32> {
        let mut state = self.shared.lock();
        loop {
            match state.processes.get(&pid) {
                None => return Err(TransportError::UnknownProcess(pid.0)),
                Some(ProcessEntry {
                    exit_code: Some(code),
                    ..
                }) => return Ok(*code),
                Some(_) => state = self.shared.wait(state),
            }
        }
    }
}

impl Default for SimVm {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SimVm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("SimVm")
            .field("pipes", &state.pipes.len())
            .field("processes", &state.processes.len())
            .field("programs", &state.programs.len())
            .finish()
    }
}

/// The syscall view of one simulated process.
#[derive(Clone)]
pub struct SimProcess {
    shared: Arc<Shared>,
    pid: ProcessId,
}

impl SimProcess {
    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    /// Close one owned descriptor. Closing a write end delivers end of
    /// stream to the reader once the queued bytes are drained.
    pub fn close(&self, fd: Fd) -> Result<()> {
        let mut state = self.shared.lock();
        state.owned(self.pid, fd)?;
        state.close(fd);
        drop(state);
        self.shared.changed.notify_all();
        Ok(())
    }

    /// Close every owned descriptor and record `code` as the exit code.
    pub fn exit(&self, code: i32) {
        let mut state = self.shared.lock();
        let owned: Vec<Fd> = state
            .fds
            .iter()
            .filter(|(_, entry)| entry.owner == self.pid)
            .map(|(fd, _)| *fd)
            .collect();
        for fd in owned {
            state.close(fd);
        }
        if let Some(process) = state.processes.get_mut(&self.pid) {
            process.exit_code = Some(code);
        }
        drop(state);
        debug!(pid = %self.pid, code, "simulated process exited");
        self.shared.changed.notify_all();
    }
}

impl Syscalls for SimProcess {
    fn create_pipe(&self) -> Result<(Fd, Fd)> {
        let mut state = self.shared.lock();
        let read_end = Fd(state.next_fd);
        let write_end = Fd(state.next_fd + 1);
        state.next_fd += 2;

        let pipe = state.pipes.len();
        state.pipes.push(Pipe {
            data: VecDeque::new(),
            reader_open: true,
            writer_open: true,
        });
        for fd in [read_end, write_end] {
            state.fds.insert(
                fd,
                FdEntry {
                    pipe,
                    owner: self.pid,
                },
            );
        }
        debug!(pid = %self.pid, %read_end, %write_end, "pipe created");
        Ok((read_end, write_end))
    }

    fn spawn(
        &self,
        program: &ProgramLocator,
        args: &[String],
        inherited: &[Fd],
    ) -> Result<ProcessId> {
        let mut state = self.shared.lock();
        let entry = state
            .programs
            .get(program.as_str())
            .cloned()
            .ok_or_else(|| TransportError::UnknownProgram(program.clone()))?;
        for fd in inherited {
            state.owned(self.pid, *fd)?;
        }

        let pid = ProcessId(state.next_pid);
        state.next_pid += 1;
        for fd in inherited {
            if let Some(fd_entry) = state.fds.get_mut(fd) {
                fd_entry.owner = pid;
            }
        }
        state.processes.insert(
            pid,
            ProcessEntry {
                inherited: inherited.to_vec(),
                exit_code: None,
            },
        );
        drop(state);

        let child = SimProcess {
            shared: Arc::clone(&self.shared),
            pid,
        };
        let args = args.to_vec();
        let spawned = thread::Builder::new()
            .name(format!("sim-{program}-{pid}"))
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| entry(child.clone(), args)));
                let code = match outcome {
                    Ok(code) => code,
                    Err(payload) => match payload.downcast::<SimExit>() {
                        Ok(exit) => exit.0,
                        Err(_) => {
                            warn!(pid = %child.pid, "simulated program panicked");
                            PANIC_EXIT_CODE
                        }
                    },
                };
                child.exit(code);
            });

        if let Err(source) = spawned {
            let mut state = self.shared.lock();
            for fd in inherited {
                if let Some(fd_entry) = state.fds.get_mut(fd) {
                    fd_entry.owner = self.pid;
                }
            }
            state.processes.remove(&pid);
            return Err(TransportError::Spawn {
                program: program.clone(),
                source,
            });
        }

        debug!(parent = %self.pid, %pid, %program, inherited = ?inherited, "spawned");
        Ok(pid)
    }

    fn raw_read(&self, fd: Fd, buf: &mut [u8]) -> Result<usize> {
        if !fd.is_read_end() {
            return Err(TransportError::InvalidFd(fd));
        }
        let mut state = self.shared.lock();
        loop {
            let index = state.owned(self.pid, fd)?;
            let pipe = &mut state.pipes[index];
            if !pipe.data.is_empty() {
                let n = buf.len().min(pipe.data.len());
                for (slot, byte) in buf.iter_mut().zip(pipe.data.drain(..n)) {
                    *slot = byte;
                }
                drop(state);
                self.shared.changed.notify_all();
                return Ok(n);
            }
            if !pipe.writer_open {
                return Ok(0);
            }
            state = self.shared.wait(state);
        }
    }

    fn raw_write(&self, fd: Fd, buf: &[u8]) -> Result<usize> {
        if !fd.is_write_end() {
            return Err(TransportError::InvalidFd(fd));
        }
        let mut state = self.shared.lock();
        let index = state.owned(self.pid, fd)?;
        let pipe = &mut state.pipes[index];
        if !pipe.reader_open {
            return Err(TransportError::OtherEndClosed);
        }
        pipe.data.extend(buf);
        drop(state);
        self.shared.changed.notify_all();
        Ok(buf.len())
    }

    fn terminate(&self, code: i32) -> ! {
        debug!(pid = %self.pid, code, "terminate");
        panic::resume_unwind(Box::new(SimExit(code)))
    }

    fn resolve_dependency(&self, hash: &CodeHash, kind: HashKind) -> Result<ProgramLocator> {
        self.shared
            .lock()
            .dependencies
            .get(&(*hash, kind))
            .cloned()
            .ok_or(TransportError::DependencyNotFound { hash: *hash, kind })
    }

    fn inherited_fds(&self) -> Result<Vec<Fd>> {
        Ok(self
            .shared
            .lock()
            .processes
            .get(&self.pid)
            .map(|process| process.inherited.clone())
            .unwrap_or_default())
    }
}

impl fmt::Debug for SimProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimProcess").field("pid", &self.pid).finish()
    }
}
