//! Channel lifecycle and call orchestration for script-VM IPC.
//!
//! A client spawns a server program and talks to it over two pipes:
//! - [`establish_client_channel`] creates the pipes, spawns the server and
//!   returns a [`Client`]
//! - [`adopt_server_channel`] turns the server's inherited descriptors into a
//!   [`Server`]; [`run_server`] adopts and serves in one call
//! - [`run_service`] and [`Client::call_service`] exchange serde values with
//!   a typed [`Service`]
//!
//! All setup goes through [`IpcConfig`]. Fatal errors end the process at a
//! single [`Terminator`] boundary.

pub mod channel;
pub mod client;
pub mod config;
pub mod connector;
pub mod error;
pub mod fatal;
pub mod listener;
pub mod server;
pub mod service;

pub use channel::{Channel, ChannelReader, ChannelWriter};
pub use client::Client;
pub use config::{IpcConfig, PanicHandler};
pub use connector::{establish_client_channel, establish_client_channel_by_dependency};
pub use error::{PeerError, Result};
pub use fatal::Terminator;
pub use listener::adopt_server_channel;
pub use server::{run_server, Handler, ServeState, Server};
pub use service::{run_service, Service, ServiceHandler, SERVICE_METHOD_ID};
