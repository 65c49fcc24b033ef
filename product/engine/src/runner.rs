use crate::cmd;
use crossbeam_channel::Sender;
use std::ffi::OsString;
use std::io::{ErrorKind, Read};
use std::path::PathBuf;
use std::thread::{self, JoinHandle};
use thiserror::Error;

const READ_CHUNK_BYTES: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: Stream,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, OsString)>,
    pub working_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            working_dir: None,
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn program_name(&self) -> String {
        self.program.to_string_lossy().to_string()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutput {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("could not start process: {0}")]
    Spawn(std::io::Error),

    #[error("failed while running process: {0}")]
    Wait(std::io::Error),
}

/// Runs one child process per call. Every non-empty output line reaches
/// `on_line` before `run` returns.
pub trait ProcessRunner: Send + Sync {
    fn run(
        &self,
        spec: &CommandSpec,
        on_line: &mut dyn FnMut(OutputLine),
    ) -> Result<RunOutput, RunError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(
        &self,
        spec: &CommandSpec,
        on_line: &mut dyn FnMut(OutputLine),
    ) -> Result<RunOutput, RunError> {
        let mut child = cmd::from_spec(spec).spawn().map_err(RunError::Spawn)?;
        tracing::debug!(program = %spec.program_name(), pid = child.id(), "spawned");

        let stdout = child.stdout.take().ok_or_else(|| {
            RunError::Wait(std::io::Error::new(ErrorKind::Other, "stdout pipe missing"))
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            RunError::Wait(std::io::Error::new(ErrorKind::Other, "stderr pipe missing"))
        })?;

        let (tx, rx) = crossbeam_channel::unbounded::<OutputLine>();
        let stdout_handle = spawn_reader(stdout, Stream::Stdout, tx.clone());
        let stderr_handle = spawn_reader(stderr, Stream::Stderr, tx);

        // Drains until both readers hit EOF and drop their senders.
        for line in rx.iter() {
            on_line(line);
        }

        let stdout = stdout_handle.join().unwrap_or_default();
        let stderr = stderr_handle.join().unwrap_or_default();
        let status = child.wait().map_err(RunError::Wait)?;

        Ok(RunOutput {
            code: status.code(),
            stdout,
            stderr,
        })
    }
}

fn spawn_reader<R>(mut source: R, stream: Stream, tx: Sender<OutputLine>) -> JoinHandle<String>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut all = Vec::new();
        let mut splitter = LineSplitter::default();
        let mut buf = [0_u8; READ_CHUNK_BYTES];
        loop {
            let n = match source.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(_) => break,
            };
            all.extend_from_slice(&buf[..n]);
            for text in splitter.push(&buf[..n]) {
                let _ = tx.send(OutputLine { stream, text });
            }
        }
        if let Some(text) = splitter.finish() {
            let _ = tx.send(OutputLine { stream, text });
        }
        String::from_utf8_lossy(&all).to_string()
    })
}

/// Splits a byte stream on `\n`, `\r\n` and bare `\r`, dropping blank lines.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\n' || byte == b'\r' {
                if let Some(line) = self.take_line() {
                    lines.push(line);
                }
            } else {
                self.pending.push(byte);
            }
        }
        lines
    }

    pub fn finish(&mut self) -> Option<String> {
        self.take_line()
    }

    fn take_line(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let bytes = std::mem::take(&mut self.pending);
        let line = String::from_utf8_lossy(&bytes).to_string();
        if line.trim().is_empty() {
            None
        } else {
            Some(line)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splitter_handles_every_line_ending() {
        let mut splitter = LineSplitter::default();
        let lines = splitter.push(b"one\ntwo\r\nthree\rfour");
        assert_eq!(lines, vec!["one", "two", "three"]);
        assert_eq!(splitter.finish().as_deref(), Some("four"));
        assert_eq!(splitter.finish(), None);
    }

    #[test]
    fn splitter_drops_blank_lines() {
        let mut splitter = LineSplitter::default();
        let lines = splitter.push(b"\n\n  \r\nkeep\n\r\n");
        assert_eq!(lines, vec!["keep"]);
    }

    #[test]
    fn splitter_joins_lines_across_chunks() {
        let mut splitter = LineSplitter::default();
        assert!(splitter.push(b"[download]  42.0% of ").is_empty());
        let lines = splitter.push("3.1MiB \u{00e9}\n".as_bytes());
        assert_eq!(lines, vec!["[download]  42.0% of 3.1MiB \u{00e9}"]);
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let spec = CommandSpec::new("audiofetch-definitely-not-a-real-program");
        let mut seen = 0;
        let err = SystemRunner
            .run(&spec, &mut |_| seen += 1)
            .expect_err("spawn should fail");
        assert!(matches!(err, RunError::Spawn(_)));
        assert_eq!(seen, 0);
    }

    #[cfg(unix)]
    #[test]
    fn lines_are_streamed_in_order_per_stream() {
        let spec = CommandSpec::new("sh").args([
            "-c",
            "printf 'a\\nb\\r\\n\\nc'; printf 'err1\\nerr2\\n' >&2; exit 3",
        ]);
        let mut stdout_lines = Vec::new();
        let mut stderr_lines = Vec::new();
        let output = SystemRunner
            .run(&spec, &mut |line| match line.stream {
                Stream::Stdout => stdout_lines.push(line.text),
                Stream::Stderr => stderr_lines.push(line.text),
            })
            .expect("run");

        assert_eq!(stdout_lines, vec!["a", "b", "c"]);
        assert_eq!(stderr_lines, vec!["err1", "err2"]);
        assert_eq!(output.code, Some(3));
        assert!(!output.success());
        assert!(output.stderr.contains("err2"));
    }

    #[cfg(unix)]
    #[test]
    fn environment_and_working_dir_are_applied() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spec = CommandSpec::new("sh")
            .args(["-c", "echo \"$AUDIOFETCH_TEST_VAR\"; pwd"])
            .env("AUDIOFETCH_TEST_VAR", "hello")
            .current_dir(dir.path());
        let mut lines = Vec::new();
        let output = SystemRunner
            .run(&spec, &mut |line| lines.push(line.text))
            .expect("run");

        assert!(output.success());
        assert_eq!(lines[0], "hello");
        let reported = std::fs::canonicalize(&lines[1]).expect("canonical pwd");
        let expected = std::fs::canonicalize(dir.path()).expect("canonical dir");
        assert_eq!(reported, expected);
    }
}
