use scriptipc_frame::PayloadAllocator;
use scriptipc_transport::{split_io_buffer, FatalError};

/// Called with an exit code when a fatal error reaches the process boundary.
pub type PanicHandler = fn(i32) -> !;

/// Process-wide IPC setup, built once and consumed when a channel is
/// established.
///
/// Defaults: heap-backed payloads, unbuffered pipes, and termination through
/// the [`Syscalls`](scriptipc_transport::Syscalls) provider on fatal errors.
#[derive(Default)]
pub struct IpcConfig<'r> {
    allocator: PayloadAllocator<'r>,
    io_buffer: Option<(&'r mut [u8], &'r mut [u8])>,
    panic_handler: Option<PanicHandler>,
}

impl<'r> IpcConfig<'r> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store payloads in two equal slots of `region`. Its length must be even.
    pub fn with_fixed_region(mut self, region: &'r mut [u8]) -> Result<Self, FatalError> {
        self.allocator = PayloadAllocator::fixed(region)?;
        Ok(self)
    }

    pub fn with_allocator(mut self, allocator: PayloadAllocator<'r>) -> Self {
        self.allocator = allocator;
        self
    }

    /// Buffer both pipe ends in `region`: first half inbound, second half
    /// outbound. At least 1024 bytes, even length.
    pub fn with_io_buffer(mut self, region: &'r mut [u8]) -> Result<Self, FatalError> {
        self.io_buffer = Some(split_io_buffer(region)?);
        Ok(self)
    }

    pub fn with_panic_handler(mut self, handler: PanicHandler) -> Self {
        self.panic_handler = Some(handler);
        self
    }

    pub fn is_buffered(&self) -> bool {
        self.io_buffer.is_some()
    }

    pub fn panic_handler(&self) -> Option<PanicHandler> {
        self.panic_handler
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        PayloadAllocator<'r>,
        Option<(&'r mut [u8], &'r mut [u8])>,
        Option<PanicHandler>,
    ) {
        (self.allocator, self.io_buffer, self.panic_handler)
    }
}

impl std::fmt::Debug for IpcConfig<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcConfig")
            .field("allocator", &self.allocator)
            .field(
                "io_buffer",
                &self.io_buffer.as_ref().map(|(r, w)| r.len() + w.len()),
            )
            .field("panic_handler", &self.panic_handler.is_some())
            .finish()
    }
}
