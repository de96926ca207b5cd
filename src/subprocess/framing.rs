//! Newline framing for raw subprocess output.
//!
//! A [`LineFramer`] turns a byte stream into one record per line. The final
//! unterminated chunk at end of stream is still emitted as a record. When a
//! maximum line length is configured, longer lines are truncated to the limit
//! and the remainder of that line is discarded, so memory per record stays
//! bounded.

use futures::stream::Stream;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Default upper bound for a single record (1 MiB)
pub const DEFAULT_MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Splits a buffered reader into newline-delimited byte records
pub struct LineFramer<R> {
    reader: R,
    max_line_length: Option<usize>,
}

impl<R> LineFramer<R>
where
    R: AsyncBufRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            max_line_length: Some(DEFAULT_MAX_LINE_LENGTH),
        }
    }

    /// Set the per-record limit; `None` disables truncation
    pub fn with_max_line_length(mut self, limit: Option<usize>) -> Self {
        self.max_line_length = limit;
        self
    }

    /// Read the next record, without its `\n` or `\r\n` terminator.
    ///
    /// Returns `Ok(None)` once the underlying reader is exhausted.
    pub async fn next_record(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        let limit = self.max_line_length;
        let mut record = Vec::new();
        let mut truncated = false;
        let mut saw_data = false;

        loop {
            let (consumed, terminated) = {
                let available = self.reader.fill_buf().await?;
                if available.is_empty() {
                    break;
                }
                saw_data = true;

                match available.iter().position(|b| *b == b'\n') {
                    Some(idx) => {
                        append_bounded(&mut record, &available[..idx], limit, &mut truncated);
                        (idx + 1, true)
                    }
                    None => {
                        append_bounded(&mut record, available, limit, &mut truncated);
                        (available.len(), false)
                    }
                }
            };
            self.reader.consume(consumed);

            if terminated {
                return Ok(Some(finish_record(record, truncated, limit)));
            }
        }

        if saw_data {
            Ok(Some(finish_record(record, truncated, limit)))
        } else {
            Ok(None)
        }
    }

    /// Convert into a stream of records; the stream ends after the first IO error
    pub fn into_stream(self) -> impl Stream<Item = std::io::Result<Vec<u8>>> + Send
    where
        R: Send + 'static,
    {
        futures::stream::unfold(Some(self), |state| async move {
            let mut framer = state?;
            match framer.next_record().await {
                Ok(Some(record)) => Some((Ok(record), Some(framer))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

fn append_bounded(record: &mut Vec<u8>, chunk: &[u8], limit: Option<usize>, truncated: &mut bool) {
    match limit {
        Some(max) if record.len() + chunk.len() > max => {
            let room = max.saturating_sub(record.len());
            record.extend_from_slice(&chunk[..room]);
            *truncated = true;
        }
        _ => record.extend_from_slice(chunk),
    }
}

fn finish_record(mut record: Vec<u8>, truncated: bool, limit: Option<usize>) -> Vec<u8> {
    if truncated {
        tracing::warn!(
            "Output line exceeded {} bytes and was truncated",
            limit.unwrap_or_default()
        );
    } else if record.last() == Some(&b'\r') {
        record.pop();
    }
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use tokio::io::BufReader;

    async fn frame_all(input: &'static [u8], limit: Option<usize>) -> Vec<Vec<u8>> {
        LineFramer::new(BufReader::new(input))
            .with_max_line_length(limit)
            .into_stream()
            .map(|r| r.unwrap())
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_splits_on_newlines() {
        let records = frame_all(b"one\ntwo\nthree\n", None).await;
        assert_eq!(
            records,
            vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]
        );
    }

    #[tokio::test]
    async fn test_emits_unterminated_trailing_record() {
        let records = frame_all(b"first\npartial", None).await;
        assert_eq!(records, vec![b"first".to_vec(), b"partial".to_vec()]);
    }

    #[tokio::test]
    async fn test_strips_carriage_return() {
        let records = frame_all(b"windows\r\nline\r\n", None).await;
        assert_eq!(records, vec![b"windows".to_vec(), b"line".to_vec()]);
    }

    #[tokio::test]
    async fn test_keeps_empty_lines() {
        let records = frame_all(b"a\n\nb\n", None).await;
        assert_eq!(records, vec![b"a".to_vec(), Vec::new(), b"b".to_vec()]);
    }

    #[tokio::test]
    async fn test_empty_input_yields_nothing() {
        let records = frame_all(b"", None).await;
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_truncates_long_lines_and_resyncs() {
        let records = frame_all(b"abcdefghij\nshort\n", Some(4)).await;
        assert_eq!(records, vec![b"abcd".to_vec(), b"shor".to_vec()]);

        let records = frame_all(b"0123456789\nok\n", Some(4)).await;
        assert_eq!(records[1], b"ok".to_vec());
    }

    #[tokio::test]
    async fn test_record_spanning_small_buffer() {
        // Force fill_buf to return partial chunks
        let reader = BufReader::with_capacity(3, &b"{\"name\":\"x\"}\nnext\n"[..]);
        let mut framer = LineFramer::new(reader);
        assert_eq!(
            framer.next_record().await.unwrap(),
            Some(b"{\"name\":\"x\"}".to_vec())
        );
        assert_eq!(framer.next_record().await.unwrap(), Some(b"next".to_vec()));
        assert_eq!(framer.next_record().await.unwrap(), None);
    }
}
