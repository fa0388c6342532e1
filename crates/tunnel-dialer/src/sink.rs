//! Sink adapters for forwarding output
//!
//! Forwarders report progress through plain [`std::io::Write`] sinks, the same
//! way a port-forward session writes to stdout/stderr. These adapters turn a
//! byte-consuming closure into such a writer and route each written chunk into
//! a [`TunnelLog`] as one trimmed line.

use std::io::{self, Write};
use std::sync::Arc;

/// Line-oriented log collaborator
pub trait TunnelLog: Send + Sync {
    fn log(&self, line: &str);
    fn log_error(&self, line: &str);
}

/// Emits forwarder output through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

impl TunnelLog for TracingLog {
    fn log(&self, line: &str) {
        tracing::info!(target: "tunnel_dialer::forward", "{}", line);
    }

    fn log_error(&self, line: &str) {
        tracing::error!(target: "tunnel_dialer::forward", "{}", line);
    }
}

/// A writer backed by a `consume(bytes) -> count` function
pub struct WriterFn<F> {
    consume: F,
}

impl<F> Write for WriterFn<F>
where
    F: FnMut(&[u8]) -> io::Result<usize>,
{
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (self.consume)(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Wrap `consume` so it can be handed to anything expecting a writer
pub fn writer_from_fn<F>(consume: F) -> WriterFn<F>
where
    F: FnMut(&[u8]) -> io::Result<usize>,
{
    WriterFn { consume }
}

/// Owned writer handed to forwarders
pub type SinkWriter = Box<dyn Write + Send>;

fn trim_line(line: &str) -> &str {
    line.trim_end_matches(&[' ', '\n', '\r'][..])
}

/// Informational and error sinks for one tunnel session
#[derive(Clone)]
pub struct LogSinks {
    log: Arc<dyn TunnelLog>,
}

impl LogSinks {
    pub fn new(log: Arc<dyn TunnelLog>) -> Self {
        Self { log }
    }

    /// Sinks that end up in `tracing`
    pub fn tracing() -> Self {
        Self::new(Arc::new(TracingLog))
    }

    /// Writer whose output is logged as informational lines
    pub fn out(&self) -> SinkWriter {
        let log = self.log.clone();
        Box::new(writer_from_fn(move |p: &[u8]| {
            log.log(trim_line(&String::from_utf8_lossy(p)));
            Ok(p.len())
        }))
    }

    /// Writer whose output is logged as error lines
    pub fn err(&self) -> SinkWriter {
        let log = self.log.clone();
        Box::new(writer_from_fn(move |p: &[u8]| {
            log.log_error(trim_line(&String::from_utf8_lossy(p)));
            Ok(p.len())
        }))
    }

    pub fn log(&self, line: &str) {
        self.log.log(trim_line(line));
    }

    pub fn log_error(&self, line: &str) {
        self.log.log_error(trim_line(line));
    }
}

impl std::fmt::Debug for LogSinks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSinks").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingLog {
        lines: Mutex<Vec<String>>,
        errors: Mutex<Vec<String>>,
    }

    impl TunnelLog for RecordingLog {
        fn log(&self, line: &str) {
            self.lines.lock().unwrap().push(line.to_string());
        }

        fn log_error(&self, line: &str) {
            self.errors.lock().unwrap().push(line.to_string());
        }
    }

    #[test]
    fn test_writer_from_fn_delegates() {
        let mut seen = Vec::new();
        {
            let mut writer = writer_from_fn(|p: &[u8]| {
                seen.extend_from_slice(p);
                Ok(p.len())
            });
            writer.write_all(b"hello").unwrap();
            writer.flush().unwrap();
        }
        assert_eq!(seen, b"hello");
    }

    #[test]
    fn test_writer_from_fn_propagates_error() {
        let mut writer =
            writer_from_fn(|_: &[u8]| Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed")));
        let err = writer.write(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_sinks_trim_and_route() {
        let log = Arc::new(RecordingLog::default());
        let sinks = LogSinks::new(log.clone());

        let mut out = sinks.out();
        let line = b"Forwarding from 127.0.0.1:54321 -> 9090 \n";
        let written = out.write(line).unwrap();
        assert_eq!(written, line.len());

        let mut err = sinks.err();
        err.write_all(b"an error occurred\n\n").unwrap();

        assert_eq!(
            *log.lines.lock().unwrap(),
            vec!["Forwarding from 127.0.0.1:54321 -> 9090".to_string()]
        );
        assert_eq!(
            *log.errors.lock().unwrap(),
            vec!["an error occurred".to_string()]
        );
    }

    #[test]
    fn test_trim_keeps_leading_whitespace() {
        assert_eq!(trim_line("  indented \r\n"), "  indented");
        assert_eq!(trim_line("\n"), "");
    }
}
