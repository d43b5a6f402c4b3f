//! Typed services on top of the byte-level call path.
//!
//! A [`Service`] receives and answers serde values instead of raw payloads.
//! Values travel as JSON documents under method id [`SERVICE_METHOD_ID`];
//! a request the service cannot decode is answered with
//! [`ProtocolErrorCode::DeserializeError`], an answer it cannot encode with
//! [`ProtocolErrorCode::SerializeError`].

use std::convert::Infallible;

use scriptipc_frame::{Allocator, ProtocolErrorCode, Request, Response};
use scriptipc_transport::{FatalError, Syscalls};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::client::Client;
use crate::config::IpcConfig;
use crate::error::{PeerError, Result};
use crate::server::{run_server, Handler};

/// Method id carrying typed service calls.
pub const SERVICE_METHOD_ID: u64 = 0;

/// Application logic answering typed requests.
pub trait Service {
    type Req: Serialize + DeserializeOwned;
    type Resp: Serialize + DeserializeOwned;

    /// Answer one request. An `Err` is sent to the client as its error code.
    fn serve(&mut self, req: Self::Req) -> std::result::Result<Self::Resp, ProtocolErrorCode>;

    /// Name of the operation `req` asks for, used in logs.
    fn method(&self, _req: &Self::Req) -> Option<&'static str> {
        None
    }
}

/// Adapts a [`Service`] to the byte-level [`Handler`] interface.
#[derive(Debug)]
pub struct ServiceHandler<T> {
    service: T,
}

impl<T: Service> ServiceHandler<T> {
    pub fn new(service: T) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &T {
        &self.service
    }

    pub fn into_inner(self) -> T {
        self.service
    }
}

impl<T, A> Handler<A> for ServiceHandler<T>
where
    T: Service,
    A: Allocator + ?Sized,
{
    fn handle(
        &mut self,
        request: &Request,
        alloc: &mut A,
    ) -> std::result::Result<Response, FatalError> {
        if request.method_id != SERVICE_METHOD_ID {
            return Ok(Response::error(ProtocolErrorCode::UNKNOWN_METHOD));
        }
        let req: T::Req = match serde_json::from_slice(request.payload(alloc)) {
            Ok(req) => req,
            Err(err) => {
                debug!(error = %err, "undecodable service request");
                return Ok(Response::error(ProtocolErrorCode::DeserializeError));
            }
        };

        let method = self.service.method(&req).unwrap_or("-");
        let resp = match self.service.serve(req) {
            Ok(resp) => resp,
            Err(code) => {
                debug!(method, %code, "service refused request");
                return Ok(Response::error(code));
            }
        };
        match serde_json::to_vec(&resp) {
            Ok(encoded) => Response::with_payload(alloc, &encoded),
            Err(err) => {
                debug!(method, error = %err, "unencodable service response");
                Ok(Response::error(ProtocolErrorCode::SerializeError))
            }
        }
    }
}

impl<'r, S: Syscalls> Client<'r, S> {
    /// Send `req` to a [`Service`] and decode its answer.
    ///
    /// A non-zero error code becomes [`PeerError::Remote`].
    pub fn call_service<Req, Resp>(&mut self, req: &Req) -> Result<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let encoded = serde_json::to_vec(req).map_err(PeerError::Encode)?;
        let response = self.call(SERVICE_METHOD_ID, &encoded)?;
        let decoded = serde_json::from_slice(self.payload(&response));
        self.release(response)?;
        decoded.map_err(PeerError::Decode)
    }
}

/// Adopt the inherited channel and answer typed requests with `service`.
///
/// Same termination rules as [`run_server`].
pub fn run_service<'r, S, T>(sys: &S, config: IpcConfig<'r>, service: T) -> Result<Infallible>
where
    S: Syscalls,
    T: Service,
{
    run_server(sys, config, ServiceHandler::new(service))
}
