//! # rpc
//!
//! A half-duplex, line-oriented request/response protocol for driving a
//! worker process over a pair of byte streams (a child's stdin/stdout, an
//! ssh session, ...).
//!
//! ## Core Concepts
//!
//! - **Message**: one sanitized JSON object per line, tagged `control`,
//!   `function_call`, `log` or `return`
//! - **Controller**: the driving side; issues one call at a time and
//!   re-emits the worker's log records locally
//! - **Worker**: the executing side; dispatches calls through a
//!   [`Registry`] of executors and forwards its own logging as frames
//!
//! Any line that is not valid UTF-8 or contains control characters is a
//! protocol violation and ends the session.
//!
//! ## Example
//!
//! ```ignore
//! let mut registry = rpc::Registry::new();
//! registry.register("exec", ExecExecutor::default)?;
//!
//! // executing side
//! rpc::Worker::new(std::io::stdin(), rpc::Sink::new(std::io::stdout()), &registry).run()?;
//!
//! // driving side
//! let mut ctrl = rpc::Controller::start("web1", child_stdout, child_stdin)?;
//! let value = ctrl.call("exec", serde_json::json!({ "cmd": "true" }))?;
//! ctrl.close()?;
//! ```

pub mod controller;
pub mod error;
pub mod frame;
pub mod logging;
pub mod message;
pub mod registry;
pub mod sanitize;
pub mod worker;

pub use controller::Controller;
pub use error::{Error, Result};
pub use frame::Sink;
pub use logging::{LogFields, RpcLogger};
pub use message::{Message, Return, State};
pub use registry::{Executor, Registry};
pub use worker::Worker;
