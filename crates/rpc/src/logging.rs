//! Log forwarding between worker and controller.
//!
//! The worker installs [`RpcLogger`] as its global logger so every
//! record becomes a `Log` frame on the outbound stream. The controller
//! parses those frames with [`forward`] and re-emits them through its
//! own logger.

use log::{Level, LevelFilter, Metadata, Record};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::frame::Sink;
use crate::message::Message;
use crate::sanitize::escape_controls;

/// Structured payload of a `Log` frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFields {
    pub level: String,
    pub msg: String,
    #[serde(default)]
    pub target: String,
}

/// A `log::Log` that writes records as `Log` frames
#[derive(Debug)]
pub struct RpcLogger {
    sink: Sink,
    level: LevelFilter,
    prefix: String,
}

impl RpcLogger {
    /// `prefix` is prepended to every message, typically `"<hostname>: "`.
    pub fn new(sink: Sink, level: LevelFilter, prefix: impl Into<String>) -> Self {
        Self {
            sink,
            level,
            prefix: prefix.into(),
        }
    }

    /// Install as the process-wide logger.
    pub fn install(self) -> std::result::Result<(), log::SetLoggerError> {
        let level = self.level;
        log::set_boxed_logger(Box::new(self))?;
        log::set_max_level(level);
        Ok(())
    }

    fn frame(&self, record: &Record) -> Result<Message> {
        let fields = LogFields {
            level: record.level().to_string(),
            msg: escape_controls(&format!("{}{}", self.prefix, record.args())),
            target: record.target().to_string(),
        };
        Ok(Message::Log {
            fields: serde_json::to_string(&fields)?,
        })
    }
}

impl log::Log for RpcLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        // Nowhere left to report a failure to; the frame is dropped.
        if let Ok(msg) = self.frame(record) {
            let _ = self.sink.send(&msg);
        }
    }

    fn flush(&self) {}
}

/// Parse a forwarded record.
pub fn parse(fields: &str) -> Result<(Level, LogFields)> {
    let fields: LogFields = serde_json::from_str(fields)?;
    let level = fields
        .level
        .parse::<Level>()
        .map_err(|_| Error::InvalidLevel(fields.level.clone()))?;
    Ok((level, fields))
}

/// Re-emit a forwarded record through the local logger, prefixed with `label`.
///
/// Control characters in the message are escaped whatever the peer sent.
pub fn forward(fields: &str, label: &str) -> Result<()> {
    let (level, fields) = parse(fields)?;
    let target = if fields.target.is_empty() {
        "worker".to_string()
    } else {
        escape_controls(&fields.target)
    };
    log::log!(target: target.as_str(), level, "{}: {}", label, escape_controls(&fields.msg));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::read_frame;
    use log::Log;
    use std::io::BufReader;

    #[test]
    fn test_records_become_log_frames() {
        let (reader, writer) = std::io::pipe().unwrap();
        let logger = RpcLogger::new(Sink::new(writer), LevelFilter::Debug, "web1: ");

        logger.log(
            &Record::builder()
                .level(Level::Info)
                .target("orch::tasks")
                .args(format_args!("wrote {} bytes", 12))
                .build(),
        );
        logger.log(
            &Record::builder()
                .level(Level::Trace)
                .args(format_args!("filtered out"))
                .build(),
        );
        drop(logger);

        let mut reader = BufReader::new(reader);
        let line = read_frame(&mut reader).unwrap().unwrap();
        let Message::Log { fields } = Message::decode(&line, "test").unwrap() else {
            panic!("expected a log frame");
        };
        let (level, fields) = parse(&fields).unwrap();
        assert_eq!(level, Level::Info);
        assert_eq!(fields.msg, "web1: wrote 12 bytes");
        assert_eq!(fields.target, "orch::tasks");
        assert!(read_frame(&mut reader).unwrap().is_none());
    }

    #[test]
    fn test_escape_sequences_in_messages_are_neutralized() {
        let (reader, writer) = std::io::pipe().unwrap();
        let logger = RpcLogger::new(Sink::new(writer), LevelFilter::Info, "");
        logger.log(
            &Record::builder()
                .level(Level::Warn)
                .args(format_args!("evil\n\x1b[2J\u{9b}"))
                .build(),
        );
        drop(logger);

        let mut reader = BufReader::new(reader);
        let line = read_frame(&mut reader).unwrap().unwrap();
        let Message::Log { fields } = Message::decode(&line, "test").unwrap() else {
            panic!("expected a log frame");
        };
        let msg = parse(&fields).unwrap().1.msg;
        assert_eq!(msg, "evil\\n\\u{1b}[2J\\u{9b}");
        assert!(!msg.contains('\x1b'));
    }

    #[test]
    fn test_forward_accepts_json_escaped_controls() {
        // Passes the frame check, decodes to raw ESC and BEL.
        let line = br#"{"type":"log","fields":"{\"level\":\"INFO\",\"msg\":\"\\u001b]0;pwned\\u0007\"}"}"#;
        let Message::Log { fields } = Message::decode(line, "test").unwrap() else {
            panic!("expected a log frame");
        };
        assert!(parse(&fields).unwrap().1.msg.contains('\x1b'));
        forward(&fields, "web1").unwrap();
        assert_eq!(escape_controls(&parse(&fields).unwrap().1.msg), "\\u{1b}]0;pwned\\u{7}");
    }

    #[test]
    fn test_unknown_level_is_rejected() {
        let err = parse(r#"{"level":"LOUD","msg":"x"}"#).unwrap_err();
        assert!(matches!(err, Error::InvalidLevel(l) if l == "LOUD"));
    }
}
