use scriptipc_transport::{FatalError, Syscalls};
use tracing::error;

use crate::config::PanicHandler;
use crate::error::PeerError;

/// The single place where fatal errors become process termination.
///
/// Uses the configured [`PanicHandler`] when there is one, otherwise
/// [`Syscalls::terminate`]. The exit status is [`FatalError::exit_code`].
#[derive(Clone)]
pub struct Terminator<S> {
    sys: S,
    handler: Option<PanicHandler>,
}

impl<S: Syscalls> Terminator<S> {
    pub fn new(sys: S, handler: Option<PanicHandler>) -> Self {
        Self { sys, handler }
    }

    pub fn terminate(&self, fatal: &FatalError) -> ! {
        let code = fatal.exit_code();
        error!(code, error = %fatal, "fatal ipc error, terminating");
        match self.handler {
            Some(handler) => handler(code),
            None => self.sys.terminate(code),
        }
    }

    /// Pass `result` through, terminating if it carries a fatal error.
    pub fn check<T>(&self, result: Result<T, PeerError>) -> Result<T, PeerError> {
        if let Err(err) = &result {
            if let Some(fatal) = err.fatal() {
                self.terminate(fatal);
            }
        }
        result
    }
}

impl<S> std::fmt::Debug for Terminator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Terminator")
            .field("custom_handler", &self.handler.is_some())
            .finish()
    }
}
