//! Verbatim capture of the installer's stderr.

use serde::Serialize;

/// Stderr lines in arrival order. Read-only once frozen into an outcome.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DiagnosticBuffer {
    lines: Vec<String>,
}

impl DiagnosticBuffer {
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }
}

/// Appends stderr records without interpreting them.
///
/// Installers print benign status text on stderr, so nothing here is treated
/// as a warning; the outcome decides how the buffer is replayed.
#[derive(Debug, Default)]
pub struct DiagnosticCollector {
    buffer: DiagnosticBuffer,
}

impl DiagnosticCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: &[u8]) {
        self.buffer
            .lines
            .push(String::from_utf8_lossy(record).into_owned());
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn finish(self) -> DiagnosticBuffer {
        self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_kept_verbatim_in_order() {
        let mut collector = DiagnosticCollector::new();
        collector.push(b"  WARN  deprecated request@2.88.2");
        collector.push(b"");
        collector.push(b"Progress: resolved 10");

        let buffer = collector.finish();
        assert_eq!(
            buffer.lines(),
            &[
                "  WARN  deprecated request@2.88.2".to_string(),
                String::new(),
                "Progress: resolved 10".to_string(),
            ]
        );
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut collector = DiagnosticCollector::new();
        collector.push(&[b'o', b'k', 0xff]);
        assert_eq!(collector.finish().lines()[0], "ok\u{fffd}");
    }

    #[test]
    fn test_serializes_as_list() {
        let mut collector = DiagnosticCollector::new();
        collector.push(b"line");
        let json = serde_json::to_string(&collector.finish()).unwrap();
        assert_eq!(json, r#"["line"]"#);
    }
}
