//! Line framing over byte streams.

use std::io::{BufRead, Write};
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::Result;
use crate::message::Message;

/// A shared, sanitizing frame writer.
///
/// The worker's return path and its log forwarder write to the same
/// stream; the lock keeps their frames from interleaving mid-line.
#[derive(Clone)]
pub struct Sink {
    inner: Arc<Mutex<Box<dyn Write + Send>>>,
}

impl Sink {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(writer))),
        }
    }

    /// Encode and write one message, flushing immediately.
    pub fn send(&self, msg: &Message) -> Result<()> {
        let line = msg.encode()?;
        let mut writer = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        writer.write_all(line.as_bytes())?;
        writer.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for Sink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sink").finish_non_exhaustive()
    }
}

/// Read the next line, without its terminator. `None` on end of stream.
pub fn read_frame(reader: &mut impl BufRead) -> Result<Option<Vec<u8>>> {
    let mut line = Vec::new();
    if reader.read_until(b'\n', &mut line)? == 0 {
        return Ok(None);
    }
    if line.last() == Some(&b'\n') {
        line.pop();
    }
    Ok(Some(line))
}
