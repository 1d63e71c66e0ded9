//! Combined stdout/stderr line reading for child processes.
//!
//! Services (and the cargo/just wrappers in front of them) write to both
//! streams, and may emit non-UTF8 bytes. Lines are read as raw bytes with
//! `read_until`, which keeps partially read data in our buffer when a bounded
//! read is cancelled, so a poll timeout never loses output.

use std::io;
use std::string::FromUtf8Error;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout};
use tokio::task::JoinHandle;
use tracing::debug;

/// What a single read attempt produced.
#[derive(Debug, PartialEq, Eq)]
pub enum ReadEvent {
    /// One complete line, without its trailing newline.
    Line(Vec<u8>),
    /// One of the two streams reached EOF or failed; the other may still be open.
    StreamClosed,
    /// Both streams are closed. Nothing more will ever arrive.
    AllClosed,
}

/// Both output pipes of a child, read as one stream of lines.
pub struct ChildOutput {
    stdout: Option<BufReader<ChildStdout>>,
    stderr: Option<BufReader<ChildStderr>>,
    stdout_buf: Vec<u8>,
    stderr_buf: Vec<u8>,
}

impl ChildOutput {
    /// Take the piped stdout/stderr out of `child`.
    ///
    /// Streams that were not piped are treated as already closed.
    pub fn from_child(child: &mut Child) -> Self {
        Self {
            stdout: child.stdout.take().map(BufReader::new),
            stderr: child.stderr.take().map(BufReader::new),
            stdout_buf: Vec::with_capacity(1024),
            stderr_buf: Vec::with_capacity(1024),
        }
    }

    pub const fn is_closed(&self) -> bool {
        self.stdout.is_none() && self.stderr.is_none()
    }

    /// Wait at most `wait` for the next complete line from either stream.
    ///
    /// Returns `None` if nothing complete arrived in time or the streams are
    /// closed. Bytes of an unfinished line are kept for the next call.
    pub async fn next_line(&mut self, wait: Duration) -> Option<Vec<u8>> {
        if self.is_closed() {
            return None;
        }

        match tokio::time::timeout(wait, self.read_event()).await {
            Ok(ReadEvent::Line(line)) => Some(line),
            Ok(ReadEvent::StreamClosed | ReadEvent::AllClosed) | Err(_) => None,
        }
    }

    /// Wait for the next line, however long it takes. `None` once both streams are closed.
    pub async fn next_line_until_closed(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.read_event().await {
                ReadEvent::Line(line) => return Some(line),
                ReadEvent::StreamClosed => {}
                ReadEvent::AllClosed => return None,
            }
        }
    }

    /// Read until either stream yields a line or closes.
    ///
    /// Cancel-safe: dropping the future keeps any partial line in the buffers.
    pub async fn read_event(&mut self) -> ReadEvent {
        let Self {
            stdout,
            stderr,
            stdout_buf,
            stderr_buf,
        } = self;

        let stdout_open = stdout.is_some();
        let stderr_open = stderr.is_some();

        let (result, is_stdout) = tokio::select! {
            res = read_chunk(stdout, stdout_buf), if stdout_open => (res, true),
            res = read_chunk(stderr, stderr_buf), if stderr_open => (res, false),
            else => return ReadEvent::AllClosed,
        };

        let buf = if is_stdout { stdout_buf } else { stderr_buf };

        match result {
            // EOF: flush an unterminated last line before reporting the close
            Ok(0) => {
                if is_stdout {
                    *stdout = None;
                } else {
                    *stderr = None;
                }
                if buf.is_empty() {
                    ReadEvent::StreamClosed
                } else {
                    ReadEvent::Line(take_line(buf))
                }
            }
            Ok(_) => ReadEvent::Line(take_line(buf)),
            Err(e) => {
                debug!(
                    error = %e,
                    stdout = is_stdout,
                    "output reader closing stream after read error"
                );
                if is_stdout {
                    *stdout = None;
                } else {
                    *stderr = None;
                }
                buf.clear();
                ReadEvent::StreamClosed
            }
        }
    }
}

async fn read_chunk<R: AsyncRead + Unpin>(
    reader: &mut Option<BufReader<R>>,
    buf: &mut Vec<u8>,
) -> io::Result<usize> {
    match reader {
        Some(reader) => reader.read_until(b'\n', buf).await,
        None => std::future::pending().await,
    }
}

/// Move the buffered line out, trimming the trailing `\n` / `\r\n`.
fn take_line(buf: &mut Vec<u8>) -> Vec<u8> {
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    }
    std::mem::take(buf)
}

/// Strict UTF-8 decoding of one line.
pub fn decode_line(bytes: Vec<u8>) -> Result<String, FromUtf8Error> {
    String::from_utf8(bytes)
}

/// Keep echoing a child's output after readiness so its pipes never fill up.
///
/// Lines are printed as `   <prefix>: <line>`, decoded lossily.
pub fn spawn_forwarder(mut output: ChildOutput, prefix: &'static str) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(bytes) = output.next_line_until_closed().await {
            println!("   {prefix}: {}", String::from_utf8_lossy(&bytes));
        }
        debug!(%prefix, "output forwarder exiting");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::process::Command;

    fn spawn_sh(script: &str) -> Child {
        Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .expect("failed to spawn sh")
    }

    #[tokio::test]
    async fn reads_lines_from_both_streams() {
        let mut child = spawn_sh("echo out-line; echo err-line 1>&2");
        let mut output = ChildOutput::from_child(&mut child);

        let mut lines = Vec::new();
        while let Some(line) = output.next_line_until_closed().await {
            lines.push(String::from_utf8(line).unwrap());
        }
        lines.sort();

        assert_eq!(lines, vec!["err-line", "out-line"]);
        assert!(output.is_closed());
        let _ = child.wait().await;
    }

    #[tokio::test]
    async fn bounded_read_returns_none_without_losing_partial_line() {
        let mut child =
            spawn_sh("printf 'Server2 lis'; sleep 0.5; printf 'tening on 1\\n'; sleep 5");
        let mut output = ChildOutput::from_child(&mut child);

        // Only half the line is available within the window
        assert_eq!(output.next_line(Duration::from_millis(100)).await, None);

        let line = output.next_line(Duration::from_secs(5)).await.expect("line");
        assert_eq!(line, b"Server2 listening on 1".to_vec());

        child.kill().await.unwrap();
    }

    #[tokio::test]
    async fn unterminated_last_line_is_flushed_at_eof() {
        let mut child = spawn_sh("printf 'no newline'");
        let mut output = ChildOutput::from_child(&mut child);

        assert_eq!(
            output.next_line_until_closed().await,
            Some(b"no newline".to_vec())
        );
        assert_eq!(output.next_line_until_closed().await, None);
        let _ = child.wait().await;
    }

    #[tokio::test]
    async fn crlf_is_trimmed() {
        let mut child = spawn_sh("printf 'windows line\\r\\n'");
        let mut output = ChildOutput::from_child(&mut child);

        assert_eq!(
            output.next_line_until_closed().await,
            Some(b"windows line".to_vec())
        );
        let _ = child.wait().await;
    }

    #[test]
    fn decode_line_rejects_invalid_utf8() {
        assert!(decode_line(vec![0xff, 0xfe, b'a']).is_err());
        assert_eq!(decode_line(b"ok".to_vec()).unwrap(), "ok");
    }
}
