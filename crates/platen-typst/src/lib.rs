//! Typesetter subprocess invocation.
//!
//! The renderer shells out to the `typst` binary:
//!
//! ```text
//! typst compile <input.typ> <output.pdf> [--font-path <dir>]...
//! ```
//!
//! Exit code 0 means success; anything else is a render failure carrying
//! the stderr tail. The child is polled with a deadline and killed on
//! timeout or cancellation. When configured, `SOURCE_DATE_EPOCH` is set in
//! the child environment for reproducible PDFs.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use platen_cancel::CancelToken;

/// How often the child and the cancellation token are polled. Kept short
/// so cancellation is observed promptly.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// How much trailing output per stream is surfaced.
pub const OUTPUT_TAIL_BYTES: usize = 4096;

/// One typesetter invocation.
#[derive(Debug, Clone)]
pub struct CompileRequest {
    /// Typesetter binary; resolved via `PATH` when not absolute.
    pub bin_path: String,
    /// Source file inside the scratch directory.
    pub input: PathBuf,
    /// Output PDF path.
    pub output: PathBuf,
    /// Extra `--font-path` directories.
    pub font_dirs: Vec<PathBuf>,
    /// Working directory for the child (the scratch directory, so relative
    /// image paths resolve).
    pub working_dir: PathBuf,
    /// Kill-after deadline.
    pub timeout: Duration,
    /// When set, exported as `SOURCE_DATE_EPOCH`.
    pub source_date_epoch: Option<i64>,
}

/// Outcome of a typesetter run.
#[derive(Debug, Clone)]
pub struct CompileOutput {
    /// Exit code, `-1` when the child was killed.
    pub exit_code: i32,
    /// Last [`OUTPUT_TAIL_BYTES`] of stdout.
    pub stdout_tail: String,
    /// Last [`OUTPUT_TAIL_BYTES`] of stderr.
    pub stderr_tail: String,
    pub timed_out: bool,
    pub cancelled: bool,
    pub duration: Duration,
}

impl CompileOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0 && !self.timed_out && !self.cancelled
    }
}

/// Run the typesetter, polling for completion with a deadline and
/// observing `cancel`.
pub fn compile(request: &CompileRequest, cancel: &CancelToken) -> Result<CompileOutput> {
    let start = Instant::now();

    let mut command = Command::new(&request.bin_path);
    command
        .arg("compile")
        .arg(&request.input)
        .arg(&request.output)
        .current_dir(&request.working_dir)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for dir in &request.font_dirs {
        command.arg("--font-path").arg(dir);
    }
    if let Some(epoch) = request.source_date_epoch {
        command.env("SOURCE_DATE_EPOCH", epoch.to_string());
    }

    let mut child = command
        .spawn()
        .with_context(|| format!("failed to spawn typesetter: {}", request.bin_path))?;

    // Both pipes are drained on reader threads so a chatty child can never
    // fill a pipe buffer and stall before `try_wait` sees it exit.
    let stdout_reader = spawn_pipe_reader(child.stdout.take());
    let stderr_reader = spawn_pipe_reader(child.stderr.take());

    let deadline = start + request.timeout;
    loop {
        match child
            .try_wait()
            .with_context(|| format!("failed to poll typesetter: {}", request.bin_path))?
        {
            Some(status) => {
                return Ok(CompileOutput {
                    exit_code: status.code().unwrap_or(-1),
                    stdout_tail: tail(&drain_reader(stdout_reader), OUTPUT_TAIL_BYTES),
                    stderr_tail: tail(&drain_reader(stderr_reader), OUTPUT_TAIL_BYTES),
                    timed_out: false,
                    cancelled: false,
                    duration: start.elapsed(),
                });
            }
            None => {
                let cancelled = cancel.is_cancelled();
                let timed_out = Instant::now() >= deadline;
                if cancelled || timed_out {
                    let _ = child.kill();
                    let _ = child.wait();

                    let mut stderr = tail(&drain_reader(stderr_reader), OUTPUT_TAIL_BYTES);
                    if timed_out {
                        stderr.push_str(&format!(
                            "\ntypesetter timed out after {:?}",
                            request.timeout
                        ));
                    }

                    return Ok(CompileOutput {
                        exit_code: -1,
                        stdout_tail: tail(&drain_reader(stdout_reader), OUTPUT_TAIL_BYTES),
                        stderr_tail: stderr,
                        timed_out,
                        cancelled: cancelled && !timed_out,
                        duration: start.elapsed(),
                    });
                }

                std::thread::sleep(POLL_INTERVAL);
            }
        }
    }
}

fn spawn_pipe_reader<R: Read + Send + 'static>(
    stream: Option<R>,
) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Some(mut s) = stream {
            let _ = s.read_to_end(&mut buffer);
        }
        String::from_utf8_lossy(&buffer).to_string()
    })
}

/// How long to wait for a pipe reader after the child is gone.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Join a pipe reader. The reader finishes as soon as the child's end of
/// the pipe closes; orphaned descendants of a killed child can keep it
/// open, so the wait is bounded and a stuck reader is detached with its
/// output forfeited.
fn drain_reader(reader: std::thread::JoinHandle<String>) -> String {
    let deadline = Instant::now() + DRAIN_GRACE;
    while !reader.is_finished() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    if reader.is_finished() {
        reader.join().unwrap_or_default()
    } else {
        String::new()
    }
}

/// Last `max_bytes` of `s`, on a char boundary.
pub fn tail(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let mut start = s.len() - max_bytes;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    s[start..].to_string()
}

/// Count the pages of a PDF by scanning for page objects.
///
/// Counts `/Type /Page` dictionary entries (excluding the `/Pages` tree
/// nodes); falls back to the root `/Count` entry for files without
/// recognizable page objects. Not a full PDF parser, but stable for the
/// typesetter's output.
pub fn page_count(pdf: &[u8]) -> u32 {
    let mut count = 0u32;
    let mut i = 0usize;
    while let Some(pos) = find(pdf, b"/Type", i) {
        let mut j = pos + b"/Type".len();
        while j < pdf.len() && pdf[j].is_ascii_whitespace() {
            j += 1;
        }
        if pdf[j..].starts_with(b"/Page") {
            let after = j + b"/Page".len();
            let next = pdf.get(after).copied();
            if next != Some(b's') {
                count += 1;
            }
        }
        i = pos + 1;
    }
    if count > 0 {
        return count;
    }

    // Fallback: the page tree root carries "/Count N".
    let mut i = 0usize;
    while let Some(pos) = find(pdf, b"/Count", i) {
        let mut j = pos + b"/Count".len();
        while j < pdf.len() && pdf[j].is_ascii_whitespace() {
            j += 1;
        }
        let digits_start = j;
        while j < pdf.len() && pdf[j].is_ascii_digit() {
            j += 1;
        }
        if j > digits_start
            && let Ok(n) = std::str::from_utf8(&pdf[digits_start..j])
                .unwrap_or("0")
                .parse::<u32>()
        {
            return n;
        }
        i = pos + 1;
    }
    0
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}
