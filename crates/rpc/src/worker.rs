//! Executing side of a session.

use std::any::Any;
use std::io::{BufReader, Read};
use std::panic::{self, AssertUnwindSafe};

use serde_json::Value;

use crate::error::{Error, Result};
use crate::frame::{Sink, read_frame};
use crate::message::{Message, Return, State};
use crate::registry::Registry;

const SIDE: &str = "worker";

/// Serves function calls read from `reader`, answering on `sink`.
pub struct Worker<'a, R: Read> {
    reader: BufReader<R>,
    sink: Sink,
    registry: &'a Registry,
}

impl<'a, R: Read> Worker<'a, R> {
    pub fn new(reader: R, sink: Sink, registry: &'a Registry) -> Self {
        Self {
            reader: BufReader::new(reader),
            sink,
            registry,
        }
    }

    /// Run until an exit request or end of stream.
    ///
    /// Protocol violations and trapped executor panics end the loop with
    /// an error after a fatal `Return` has been sent, so the controller
    /// is never left waiting. Callers should exit the process non-zero
    /// on [`Error::Fatal`].
    pub fn run(&mut self) -> Result<()> {
        match self.serve() {
            Err(e) if e.is_session_terminal() && !matches!(e, Error::Fatal(_)) => {
                let _ = self.sink.send(&Message::Return(Return::fatal(e.to_string())));
                Err(e)
            }
            result => result,
        }
    }

    fn serve(&mut self) -> Result<()> {
        while let Some(line) = read_frame(&mut self.reader)? {
            let msg = Message::decode(&line, SIDE)?;
            log::trace!("message: {}", msg.kind());

            match msg {
                Message::Control { state: State::Exit } => return Ok(()),
                Message::FunctionCall { function, params } => self.dispatch(&function, params)?,
                other => {
                    return Err(Error::UnexpectedMessage {
                        side: SIDE,
                        kind: other.kind().to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn dispatch(&self, function: &str, params: Value) -> Result<()> {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.registry.call(function, params)
        }));

        let rv = match outcome {
            Ok(Ok(value)) => Return::value(value),
            Ok(Err(e)) => Return::error(e.to_string()),
            Err(payload) => {
                let message = format!("{function}: {}", panic_message(payload.as_ref()));
                let _ = self.sink.send(&Message::Return(Return::fatal(message.clone())));
                return Err(Error::Fatal(message));
            }
        };

        self.sink.send(&Message::Return(rv))
    }
}

impl<R: Read> std::fmt::Debug for Worker<'_, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("registry", self.registry)
            .finish_non_exhaustive()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}
