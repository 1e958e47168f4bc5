//! Driving side of a session.
//!
//! A [`Controller`] owns the write half of the pipe pair and a background
//! thread that reads the other half. `Log` frames are re-emitted locally
//! as they arrive; `Return` frames are handed to the call waiting for
//! them. The protocol has no call identifiers, so only one call may be
//! outstanding; `call` takes `&mut self` to enforce that. A `Return`
//! that arrives while no call is outstanding ends the session.

use std::io::{BufReader, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

use serde::Serialize;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::frame::{Sink, read_frame};
use crate::logging::forward;
use crate::message::{self, Message, Return};

const SIDE: &str = "controller";

enum Reply {
    Return(Return),
    Terminated(String),
}

/// Drives one worker over a pipe pair
pub struct Controller {
    label: String,
    sink: Sink,
    replies: Receiver<Reply>,
    reader: Option<JoinHandle<Result<()>>>,
    pending: Arc<AtomicBool>,
    fatal: Arc<AtomicBool>,
}

impl Controller {
    /// Start the background read loop and return a ready controller.
    ///
    /// `label` prefixes every forwarded log line, usually the host name.
    pub fn start(
        label: impl Into<String>,
        reader: impl Read + Send + 'static,
        writer: impl Write + Send + 'static,
    ) -> Result<Self> {
        let label = label.into();
        let (tx, rx) = mpsc::channel();
        let pending = Arc::new(AtomicBool::new(false));
        let fatal = Arc::new(AtomicBool::new(false));

        let handle = {
            let label = label.clone();
            let state = Flags {
                pending: Arc::clone(&pending),
                fatal: Arc::clone(&fatal),
            };
            thread::Builder::new()
                .name(format!("rpc-{label}"))
                .spawn(move || read_loop(&label, reader, &tx, &state))?
        };

        Ok(Self {
            label,
            sink: Sink::new(writer),
            replies: rx,
            reader: Some(handle),
            pending,
            fatal,
        })
    }

    /// Invoke `function` on the worker and wait for its return value.
    pub fn call(&mut self, function: &str, params: impl Serialize) -> Result<Value> {
        let msg = Message::FunctionCall {
            function: function.to_string(),
            params: serde_json::to_value(params)?,
        };
        log::trace!("{}: call {}", self.label, function);
        self.pending.store(true, Ordering::SeqCst);
        if let Err(e) = self.sink.send(&msg) {
            self.pending.store(false, Ordering::SeqCst);
            return Err(e);
        }

        match self.replies.recv() {
            Ok(Reply::Return(rv)) => rv.into_result(),
            Ok(Reply::Terminated(reason)) => Err(Error::Closed(reason)),
            Err(_) => Err(Error::Closed("end of stream".into())),
        }
    }

    /// Whether a fatal return has been observed
    pub fn is_fatal(&self) -> bool {
        self.fatal.load(Ordering::SeqCst)
    }

    /// End the session and join the read loop.
    ///
    /// Sends an exit request unless the worker already reported a fatal
    /// error. The read loop's terminal error, if any, wins over a failure
    /// to deliver the exit request.
    pub fn close(mut self) -> Result<()> {
        let sent = if self.is_fatal() {
            Ok(())
        } else {
            self.sink.send(&Message::Control {
                state: message::State::Exit,
            })
        };
        // Closing our end lets a worker that ignored the exit see EOF.
        drop(self.sink);

        let joined = match self.reader.take() {
            Some(handle) => handle
                .join()
                .unwrap_or_else(|_| Err(Error::Closed("read loop panicked".into()))),
            None => Ok(()),
        };

        joined.and(sent)
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("label", &self.label)
            .field("fatal", &self.is_fatal())
            .finish_non_exhaustive()
    }
}

/// Flags shared between a controller and its read loop
struct Flags {
    pending: Arc<AtomicBool>,
    fatal: Arc<AtomicBool>,
}

fn read_loop(label: &str, reader: impl Read, replies: &Sender<Reply>, state: &Flags) -> Result<()> {
    let result = demux(label, reader, replies, state);
    if let Err(e) = &result {
        log::debug!("{label}: session terminated: {e}");
        let _ = replies.send(Reply::Terminated(e.to_string()));
    }
    result
}

fn demux(label: &str, reader: impl Read, replies: &Sender<Reply>, state: &Flags) -> Result<()> {
    let mut reader = BufReader::new(reader);
    while let Some(line) = read_frame(&mut reader)? {
        match Message::decode(&line, SIDE)? {
            Message::Log { fields } => forward(&fields, label)?,
            Message::Return(rv) => {
                if !state.pending.swap(false, Ordering::SeqCst) {
                    return Err(Error::UnexpectedMessage {
                        side: SIDE,
                        kind: "return without a pending call".to_string(),
                    });
                }

                let fatal_error = rv
                    .fatal
                    .then(|| rv.error.clone().unwrap_or_else(|| "worker terminated".into()));
                // The caller must observe the flag as soon as it gets the reply.
                if fatal_error.is_some() {
                    state.fatal.store(true, Ordering::SeqCst);
                }
                // A closed receiver only means nobody is waiting anymore.
                let _ = replies.send(Reply::Return(rv));

                if let Some(message) = fatal_error {
                    return Err(Error::Fatal(message));
                }
            }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Executor, Registry};
    use crate::worker::Worker;
    use serde_json::json;
    use std::io::{PipeReader, PipeWriter};

    struct Echo;

    impl Executor for Echo {
        type Params = Value;
        type Output = Value;

        fn execute(&self, params: Value) -> anyhow::Result<Value> {
            log::info!("echoing {params}");
            Ok(params)
        }
    }

    struct Fail;

    impl Executor for Fail {
        type Params = Value;
        type Output = Value;

        fn execute(&self, _params: Value) -> anyhow::Result<Value> {
            anyhow::bail!("task failed")
        }
    }

    struct Explode;

    impl Executor for Explode {
        type Params = Value;
        type Output = Value;

        fn execute(&self, _params: Value) -> anyhow::Result<Value> {
            panic!("kaboom")
        }
    }

    /// Controller connected to an in-process worker thread.
    fn session() -> (Controller, JoinHandle<Result<()>>) {
        let (to_worker_r, to_worker_w) = std::io::pipe().unwrap();
        let (to_ctrl_r, to_ctrl_w) = std::io::pipe().unwrap();

        let worker = thread::spawn(move || {
            let mut registry = Registry::new();
            registry.register("echo", || Echo)?;
            registry.register("fail", || Fail)?;
            registry.register("explode", || Explode)?;
            Worker::new(to_worker_r, Sink::new(to_ctrl_w), &registry).run()
        });

        let ctrl = Controller::start("test", to_ctrl_r, to_worker_w).unwrap();
        (ctrl, worker)
    }

    /// Controller fed by a raw pipe the test writes into.
    fn raw_session() -> (Controller, PipeWriter, PipeReader) {
        let (to_worker_r, to_worker_w) = std::io::pipe().unwrap();
        let (to_ctrl_r, to_ctrl_w) = std::io::pipe().unwrap();
        let ctrl = Controller::start("raw", to_ctrl_r, to_worker_w).unwrap();
        (ctrl, to_ctrl_w, to_worker_r)
    }

    /// Wait for the first call frame, then write `frames` and hang up.
    ///
    /// Hands back the inbound pipe so the controller's exit request still
    /// has somewhere to go.
    fn answer_first_call(
        to_worker: PipeReader,
        mut from_worker: PipeWriter,
        frames: Vec<Message>,
    ) -> JoinHandle<BufReader<PipeReader>> {
        thread::spawn(move || {
            let mut inbound = BufReader::new(to_worker);
            let line = read_frame(&mut inbound).unwrap().unwrap();
            assert!(matches!(
                Message::decode(&line, "test").unwrap(),
                Message::FunctionCall { .. }
            ));
            for frame in frames {
                from_worker.write_all(frame.encode().unwrap().as_bytes()).unwrap();
            }
            inbound
        })
    }

    #[test]
    fn test_returns_match_calls_in_issue_order() {
        let (mut ctrl, worker) = session();
        for i in 0..50 {
            let value = ctrl.call("echo", json!({ "n": i })).unwrap();
            assert_eq!(value, json!({ "n": i }));
        }
        ctrl.close().unwrap();
        worker.join().unwrap().unwrap();
    }

    #[test]
    fn test_remote_error_keeps_session_alive() {
        let (mut ctrl, worker) = session();
        let err = ctrl.call("fail", json!(null)).unwrap_err();
        assert_eq!(err.to_string(), "task failed");
        assert!(!err.is_session_terminal());

        assert_eq!(ctrl.call("echo", json!("again")).unwrap(), json!("again"));
        ctrl.close().unwrap();
        worker.join().unwrap().unwrap();
    }

    #[test]
    fn test_fatal_return_skips_exit_handshake() {
        let (mut ctrl, worker) = session();
        let err = ctrl.call("explode", json!(null)).unwrap_err();
        assert!(matches!(&err, Error::Fatal(m) if m == "explode: kaboom"));
        assert!(ctrl.is_fatal());

        let closed = ctrl.close().unwrap_err();
        assert!(matches!(closed, Error::Fatal(_)));
        assert!(matches!(worker.join().unwrap(), Err(Error::Fatal(_))));
    }

    #[test]
    fn test_fatal_flag_is_set_when_the_fatal_call_returns() {
        for _ in 0..100 {
            let (mut ctrl, worker) = session();
            assert!(ctrl.call("explode", json!(null)).is_err());
            assert!(ctrl.is_fatal());
            assert!(ctrl.close().is_err());
            assert!(worker.join().unwrap().is_err());
        }
    }

    #[test]
    fn test_return_without_a_call_ends_the_session() {
        let (ctrl, mut from_worker, _to_worker) = raw_session();
        let stale = Message::Return(Return::value(json!("stale")));
        from_worker.write_all(stale.encode().unwrap().as_bytes()).unwrap();
        drop(from_worker);

        let err = ctrl.close().unwrap_err();
        assert!(matches!(
            err,
            Error::UnexpectedMessage { side: "controller", kind } if kind.starts_with("return")
        ));
    }

    #[test]
    fn test_second_return_for_one_call_ends_the_session() {
        let (mut ctrl, from_worker, to_worker) = raw_session();
        let peer = answer_first_call(to_worker, from_worker, vec![
            Message::Return(Return::value(json!("one"))),
            Message::Return(Return::value(json!("two"))),
        ]);

        assert_eq!(ctrl.call("echo", json!(null)).unwrap(), json!("one"));
        let _to_worker = peer.join().unwrap();
        assert!(matches!(ctrl.close(), Err(Error::UnexpectedMessage { .. })));
    }

    #[test]
    fn test_unsanitized_frame_fails_the_waiting_call() {
        let (mut ctrl, mut from_worker, _to_worker) = raw_session();
        from_worker.write_all(b"\x1b]0;owned\x07\n").unwrap();

        let err = ctrl.call("echo", json!(1)).unwrap_err();
        assert!(matches!(&err, Error::Closed(m) if m.contains("controller received invalid data")));

        let closed = ctrl.close().unwrap_err();
        assert!(matches!(closed, Error::Unsanitized { side: "controller", .. }));
    }

    #[test]
    fn test_function_call_from_worker_is_a_protocol_error() {
        let (ctrl, mut from_worker, _to_worker) = raw_session();
        let frame = Message::FunctionCall {
            function: "echo".into(),
            params: json!(null),
        }
        .encode()
        .unwrap();
        from_worker.write_all(frame.as_bytes()).unwrap();
        drop(from_worker);

        let err = ctrl.close().unwrap_err();
        assert!(matches!(
            err,
            Error::UnexpectedMessage { side: "controller", kind } if kind == "function_call"
        ));
    }

    #[test]
    fn test_worker_exit_mid_call_does_not_hang() {
        let (mut ctrl, from_worker, _to_worker) = raw_session();
        drop(from_worker);

        let err = ctrl.call("echo", json!(1)).unwrap_err();
        assert!(matches!(err, Error::Closed(_)));
    }

    #[test]
    fn test_log_frames_are_consumed_before_the_return() {
        let (mut ctrl, from_worker, to_worker) = raw_session();
        let peer = answer_first_call(to_worker, from_worker, vec![
            Message::Log {
                fields: r#"{"level":"INFO","msg":"working","target":"t"}"#.into(),
            },
            Message::Return(Return::value(json!("done"))),
        ]);

        assert_eq!(ctrl.call("anything", json!(null)).unwrap(), json!("done"));
        let _to_worker = peer.join().unwrap();
        ctrl.close().unwrap();
    }
}
