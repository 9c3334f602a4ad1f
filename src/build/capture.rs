//! Safe capture of subprocess output.
//!
//! Two reader tasks (stdout, stderr) feed one bounded channel. Lines are
//! length-capped before they are buffered, and when the channel is full the
//! line is dropped instead of blocking the reader: build logs are advisory,
//! a wedged consumer must never back-pressure the subprocess pipes.

use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::ChildStdin;
use tokio::sync::mpsc;
use tracing::trace;

/// Lines longer than this are truncated.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Capacity of the capture channel shared by both readers.
pub const CHANNEL_CAPACITY: usize = 100;

/// Interval between `y\n` writes that auto-answer interactive prompts.
pub const PROMPT_ANSWER_INTERVAL_MS: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    pub fn label(&self) -> &'static str {
        match self {
            StreamKind::Stdout => "STDOUT",
            StreamKind::Stderr => "STDERR",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CapturedLine {
    pub kind: StreamKind,
    pub line: String,
}

impl CapturedLine {
    /// `[HH:MM:SS] STDOUT: text` - the format appended to the job log.
    pub fn render(&self) -> String {
        format!(
            "[{}] {}: {}",
            Utc::now().format("%H:%M:%S"),
            self.kind.label(),
            self.line
        )
    }
}

/// Scan a pipe line-by-line into the capture channel until EOF.
///
/// Lines are capped at [`MAX_LINE_LEN`]; overflow bytes are discarded and
/// the line is marked. `try_send` drops the line when the channel is full.
pub async fn scan_lines<R>(reader: R, kind: StreamKind, tx: mpsc::Sender<CapturedLine>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line: Vec<u8> = Vec::with_capacity(256);
    let mut truncated = false;

    loop {
        let available = match reader.fill_buf().await {
            Ok(buf) => buf,
            Err(_) => break,
        };
        if available.is_empty() {
            break;
        }

        let (consumed, complete) = match available.iter().position(|&b| b == b'\n') {
            Some(pos) => (pos + 1, true),
            None => (available.len(), false),
        };
        let payload_len = if complete { consumed - 1 } else { consumed };
        let payload = &available[..payload_len];

        if line.len() < MAX_LINE_LEN {
            let room = MAX_LINE_LEN - line.len();
            if payload.len() > room {
                line.extend_from_slice(&payload[..room]);
                truncated = true;
            } else {
                line.extend_from_slice(payload);
            }
        } else {
            truncated = true;
        }
        reader.consume(consumed);

        if complete {
            emit(&tx, kind, &mut line, &mut truncated);
        }
    }

    // Trailing output without a final newline still counts.
    if !line.is_empty() {
        emit(&tx, kind, &mut line, &mut truncated);
    }
}

fn emit(tx: &mpsc::Sender<CapturedLine>, kind: StreamKind, line: &mut Vec<u8>, truncated: &mut bool) {
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    let mut text = String::from_utf8_lossy(line).into_owned();
    if *truncated {
        text.push_str(" [truncated]");
    }

    if tx.try_send(CapturedLine { kind, line: text }).is_err() {
        trace!("Capture channel full, dropping line");
    }

    line.clear();
    *truncated = false;
}

/// Best-effort auto-answerer: write `y\n` every 500 ms so interactive
/// prompts from the toolchain never stall a build. Exits when the pipe
/// closes, which happens as soon as the subprocess is gone.
pub async fn pump_stdin(mut stdin: ChildStdin) {
    let mut ticker =
        tokio::time::interval(std::time::Duration::from_millis(PROMPT_ANSWER_INTERVAL_MS));
    loop {
        ticker.tick().await;
        if stdin.write_all(b"y\n").await.is_err() {
            break;
        }
        if stdin.flush().await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(input: &'static [u8], capacity: usize) -> Vec<CapturedLine> {
        let (tx, mut rx) = mpsc::channel(capacity);
        scan_lines(input, StreamKind::Stdout, tx).await;
        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        lines
    }

    #[tokio::test]
    async fn test_splits_lines() {
        let lines = collect(b"one\ntwo\nthree\n", 16).await;
        let texts: Vec<&str> = lines.iter().map(|l| l.line.as_str()).collect();
        assert_eq!(texts, vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_trailing_partial_line_is_kept() {
        let lines = collect(b"complete\npartial", 16).await;
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1].line, "partial");
    }

    #[tokio::test]
    async fn test_strips_carriage_return() {
        let lines = collect(b"windows line\r\n", 16).await;
        assert_eq!(lines[0].line, "windows line");
    }

    #[tokio::test]
    async fn test_truncates_long_lines() {
        let big: &'static [u8] = Box::leak(
            {
                let mut v = vec![b'x'; MAX_LINE_LEN + 512];
                v.push(b'\n');
                v.extend_from_slice(b"after\n");
                v
            }
            .into_boxed_slice(),
        );

        let lines = collect(big, 16).await;
        assert_eq!(lines.len(), 2);
        assert!(lines[0].line.ends_with(" [truncated]"));
        assert_eq!(lines[0].line.len(), MAX_LINE_LEN + " [truncated]".len());
        assert_eq!(lines[1].line, "after");
    }

    #[tokio::test]
    async fn test_drops_lines_when_channel_full() {
        let lines = collect(b"1\n2\n3\n4\n5\n", 2).await;
        // Only the first two fit; the rest were dropped, not blocked on.
        assert_eq!(lines.len(), 2);
    }

    #[tokio::test]
    async fn test_render_format() {
        let line = CapturedLine {
            kind: StreamKind::Stderr,
            line: "warning: slow".to_string(),
        };
        let rendered = line.render();
        assert!(rendered.contains("STDERR: warning: slow"));
        assert!(rendered.starts_with('['));
        assert_eq!(&rendered[9..11], "] ");
    }
}
