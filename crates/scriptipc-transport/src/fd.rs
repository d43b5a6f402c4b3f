use std::fmt;

/// A pipe descriptor as handed out by the VM.
///
/// Parity encodes the role: read ends are even, write ends are odd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fd(pub u64);

/// Which end of a pipe a descriptor refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FdRole {
    Read,
    Write,
}

impl Fd {
    pub fn role(self) -> FdRole {
        if self.0 % 2 == 0 {
            FdRole::Read
        } else {
            FdRole::Write
        }
    }

    pub fn is_read_end(self) -> bool {
        self.role() == FdRole::Read
    }

    pub fn is_write_end(self) -> bool {
        self.role() == FdRole::Write
    }
}

impl fmt::Display for Fd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Fd {
    fn from(raw: u64) -> Self {
        Fd(raw)
    }
}

impl fmt::Display for FdRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FdRole::Read => f.write_str("read"),
            FdRole::Write => f.write_str("write"),
        }
    }
}

/// Identifier of a spawned process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(pub u64);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Names a program that can be spawned.
///
/// Interpretation is up to the [`Syscalls`](crate::Syscalls) provider: the
/// simulated VM looks it up in its program table, the host provider treats
/// it as an executable path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProgramLocator(String);

impl ProgramLocator {
    pub fn new(locator: impl Into<String>) -> Self {
        Self(locator.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProgramLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProgramLocator {
    fn from(locator: &str) -> Self {
        Self::new(locator)
    }
}

/// 32-byte code hash identifying a dependency cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CodeHash(pub [u8; 32]);

impl fmt::Display for CodeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// How a [`CodeHash`] is matched against dependency cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashKind {
    Data,
    Type,
    Data1,
    Data2,
}

impl fmt::Display for HashKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HashKind::Data => "data",
            HashKind::Type => "type",
            HashKind::Data1 => "data1",
            HashKind::Data2 => "data2",
        };
        f.write_str(name)
    }
}
