//! Output sinks for rendered events

use crate::events::{CaptureEvent, EventRecord, RenderOptions};
use parking_lot::Mutex;
use std::fmt;
use std::io::Write;
use tracing::debug;

/// Destination for decoded events.
///
/// Called from each module's capture task; implementations must be cheap and
/// must not block for long.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &dyn CaptureEvent, opts: &RenderOptions, hex: bool);
}

/// Line-oriented output shared by the text and JSON sinks
struct LineWriter(Mutex<Box<dyn Write + Send>>);

impl LineWriter {
    fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    fn new(writer: Box<dyn Write + Send>) -> Self {
        Self(Mutex::new(writer))
    }

    fn write_line(&self, line: &str) {
        let mut out = self.0.lock();
        if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
            debug!("output write failed: {}", e);
        }
    }
}

/// Human-readable output, stdout by default
pub struct TextSink {
    out: LineWriter,
}

impl TextSink {
    pub fn new() -> Self {
        Self {
            out: LineWriter::stdout(),
        }
    }

    pub fn with_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            out: LineWriter::new(Box::new(writer)),
        }
    }
}

impl Default for TextSink {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TextSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextSink").finish_non_exhaustive()
    }
}

impl EventSink for TextSink {
    fn emit(&self, event: &dyn CaptureEvent, opts: &RenderOptions, hex: bool) {
        let body = if hex {
            event.render_hex(opts)
        } else {
            event.render(opts)
        };
        let ts = chrono::Local::now().format("%Y/%m/%d %H:%M:%S");
        self.out.write_line(&format!("{} [{}] {}", ts, event.module(), body));
    }
}

/// One JSON object per line, stdout by default
pub struct JsonSink {
    out: LineWriter,
}

impl JsonSink {
    pub fn new() -> Self {
        Self {
            out: LineWriter::stdout(),
        }
    }

    pub fn with_writer(writer: impl Write + Send + 'static) -> Self {
        Self {
            out: LineWriter::new(Box::new(writer)),
        }
    }
}

impl Default for JsonSink {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for JsonSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonSink").finish_non_exhaustive()
    }
}

impl EventSink for JsonSink {
    fn emit(&self, event: &dyn CaptureEvent, opts: &RenderOptions, _hex: bool) {
        match serde_json::to_string(&event.to_record(opts)) {
            Ok(line) => self.out.write_line(&line),
            Err(e) => debug!("failed to serialize event: {}", e),
        }
    }
}

/// Keeps rendered text and records in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    rendered: Mutex<Vec<String>>,
    records: Mutex<Vec<EventRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rendered(&self) -> Vec<String> {
        self.rendered.lock().clone()
    }

    pub fn records(&self) -> Vec<EventRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &dyn CaptureEvent, opts: &RenderOptions, hex: bool) {
        let body = if hex {
            event.render_hex(opts)
        } else {
            event.render(opts)
        };
        self.rendered.lock().push(body);
        self.records.lock().push(event.to_record(opts));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::stub::StubEvent;
    use crate::filter::CommFilter;
    use std::sync::Arc;

    /// Cloneable in-memory writer
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn lines(&self) -> Vec<String> {
            String::from_utf8(self.0.lock().clone())
                .unwrap()
                .lines()
                .map(str::to_string)
                .collect()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn curl_only() -> RenderOptions {
        RenderOptions {
            filter: CommFilter::from_setting("curl"),
            ..Default::default()
        }
    }

    #[test]
    fn test_json_sink_writes_one_object_per_line() {
        let buf = SharedBuf::default();
        let sink = JsonSink::with_writer(buf.clone());

        sink.emit(&StubEvent::new("curl", b"cookie"), &curl_only(), false);
        sink.emit(&StubEvent::new("wget", b"cookie"), &curl_only(), false);

        let lines = buf.lines();
        assert_eq!(lines.len(), 2);

        let passed: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(passed["module"], "stub");
        assert_eq!(passed["pid"], 7);
        assert_eq!(passed["ignored"], false);
        assert_eq!(passed["payload"], "cookie");
        assert_eq!(passed["payload_hex"], "636f6f6b6965");

        let filtered: serde_json::Value = serde_json::from_str(&lines[1]).unwrap();
        assert_eq!(filtered["comm"], "wget");
        assert_eq!(filtered["len"], 6);
        assert_eq!(filtered["ignored"], true);
        assert_eq!(filtered["payload"], "");
        assert_eq!(filtered["payload_hex"], "");
    }

    #[test]
    fn test_text_sink_prefixes_module() {
        let buf = SharedBuf::default();
        let sink = TextSink::with_writer(buf.clone());

        sink.emit(&StubEvent::new("curl", b"GET /"), &RenderOptions::default(), false);
        sink.emit(&StubEvent::new("wget", b"GET /"), &curl_only(), false);
        sink.emit(&StubEvent::new("curl", b"GET /"), &RenderOptions::default(), true);

        let lines = buf.lines();
        assert!(lines[0].ends_with("[stub] Comm:curl, Payload:GET /"));
        assert!(lines[1].ends_with("[stub] Comm:wget, Payload:[ignore]"));
        assert!(lines[2].contains("[stub] 00000000  47 45 54 20 2f"));
    }

    #[test]
    fn test_memory_sink_keeps_both_views() {
        let sink = MemorySink::new();
        assert!(sink.is_empty());
        sink.emit(&StubEvent::new("curl", b"hi"), &RenderOptions::default(), false);

        assert_eq!(sink.len(), 1);
        assert_eq!(sink.rendered(), vec!["Comm:curl, Payload:hi".to_string()]);
        assert_eq!(sink.records()[0].payload, "hi");
    }
}
