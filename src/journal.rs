use std::borrow::Cow;
use std::io::Write;
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::bytes::Regex;

// ESC followed by either a CSI sequence (params, intermediates, final byte)
// or a single C1 shorthand char. OSC payloads lose their introducer, which is
// enough to keep the journal readable.
static ESCAPE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\x1b(?:\[[0-?]*[ -/]*[@-~]|[@-Z\-_])").unwrap());

/// Removes terminal escape sequences from a chunk of journal data.
pub fn strip_escapes(data: &[u8]) -> Cow<'_, [u8]> {
    if data.is_empty() {
        return Cow::Borrowed(data);
    }
    ESCAPE_RE.replace_all(data, &b""[..])
}

/// Line-oriented journal over an underlying byte sink.
///
/// Incoming data is buffered until a line feed arrives; each complete line is
/// stripped of escape sequences and written with an RFC3339-nanosecond UTC
/// timestamp prefix. Writers may share one `Journal`; lines never interleave.
pub struct Journal<W> {
    inner: Mutex<Inner<W>>,
}

struct Inner<W> {
    sink: W,
    buf: Vec<u8>,
}

impl<W: Write> Journal<W> {
    pub fn new(sink: W) -> Self {
        Journal {
            inner: Mutex::new(Inner {
                sink,
                buf: Vec::new(),
            }),
        }
    }

    /// Appends bytes to the journal. Complete lines are flushed to the sink;
    /// a trailing partial line stays buffered until its terminator arrives.
    /// A sink error leaves the pending line in the buffer, so a later write
    /// retries it.
    pub fn write_all(&self, data: &[u8]) -> std::io::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.buf.extend_from_slice(data);

        while let Some(idx) = inner.buf.iter().position(|&b| b == b'\n') {
            // timestamp belongs to the moment the terminator arrived
            let stamp = Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true);
            let cleaned = strip_escapes(&inner.buf[..=idx]).into_owned();

            inner.sink.write_all(stamp.as_bytes())?;
            inner.sink.write_all(b" ")?;
            inner.sink.write_all(&cleaned)?;

            // only consume the line once the sink accepted it
            inner.buf.drain(..=idx);
        }
        Ok(())
    }

    pub fn flush(&self) -> std::io::Result<()> {
        self.inner.lock().unwrap().sink.flush()
    }

    /// Consumes the journal and hands back the sink, dropping any buffered
    /// partial line. The supervisor uses this to close the log file before
    /// sealing.
    pub fn into_sink(self) -> W {
        self.inner.into_inner().unwrap().sink
    }
}
