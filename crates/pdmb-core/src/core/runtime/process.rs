//! Child processes spawned during a build: interpreters, setup scripts
//! and version-control tools.

use std::{
    fmt,
    io::{self, Read, Write},
    path::{Path, PathBuf},
    process::{Command, Stdio},
    thread,
};

use anyhow::{anyhow, Context, Result};

/// Bytes kept per stream; a chatty compiler keeps only its tail.
const CAPTURE_LIMIT: usize = 1024 * 1024;
const TRUNCATED_MARKER: &str = "\n[...truncated...]\n";

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Both streams, for error reports.
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr.trim_end()),
            (false, true) => self.stdout.trim_end().to_string(),
            _ => self.stderr.trim_end().to_string(),
        }
    }
}

/// A tool invocation with captured output.
///
/// The child never inherits our stdout: with [`ToolCommand::echo`] its
/// output is mirrored to stderr so that the front-end's stdout stays
/// machine-readable.
#[derive(Debug, Clone)]
pub(crate) struct ToolCommand {
    program: String,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    cwd: PathBuf,
    isolated: bool,
    echo: bool,
}

impl ToolCommand {
    pub(crate) fn new(program: impl Into<String>, cwd: &Path) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            cwd: cwd.to_path_buf(),
            isolated: false,
            echo: false,
        }
    }

    pub(crate) fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub(crate) fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Replaces the inherited environment with exactly `envs`.
    pub(crate) fn isolated_env(mut self, envs: &[(String, String)]) -> Self {
        self.envs = envs.to_vec();
        self.isolated = true;
        self
    }

    pub(crate) fn echo(mut self) -> Self {
        self.echo = true;
        self
    }

    pub(crate) fn run(&self) -> Result<RunOutput> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .current_dir(&self.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if self.isolated {
            command.env_clear();
        }
        command.envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        tracing::trace!(command = %self, cwd = %self.cwd.display(), "spawning");

        let mut child = command
            .spawn()
            .with_context(|| format!("failed to start {}", self.program))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("stdout missing for {}", self.program))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("stderr missing for {}", self.program))?;
        let echo = self.echo;
        let stdout_reader = thread::spawn(move || drain(stdout, echo));
        let stderr_reader = thread::spawn(move || drain(stderr, echo));

        let status = child
            .wait()
            .with_context(|| format!("failed to wait for {}", self.program))?;
        let stdout = stdout_reader
            .join()
            .map_err(|_| anyhow!("stdout reader for {} panicked", self.program))??;
        let stderr = stderr_reader
            .join()
            .map_err(|_| anyhow!("stderr reader for {} panicked", self.program))??;
        Ok(RunOutput {
            code: status.code().unwrap_or(-1),
            stdout,
            stderr,
        })
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

fn drain(mut reader: impl Read, echo: bool) -> Result<String> {
    let mut tail = TailBuffer::new(CAPTURE_LIMIT);
    let mut chunk = [0u8; 8192];
    let mut sink = io::stderr();
    loop {
        let read = reader.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        if echo {
            sink.write_all(&chunk[..read])?;
        }
        tail.push(&chunk[..read]);
    }
    if echo {
        sink.flush().ok();
    }
    Ok(tail.into_string())
}

/// Keeps the last `limit` bytes of a stream, where build errors usually are.
struct TailBuffer {
    bytes: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl TailBuffer {
    fn new(limit: usize) -> Self {
        Self {
            bytes: Vec::new(),
            limit,
            truncated: false,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
        if self.bytes.len() > self.limit {
            let excess = self.bytes.len() - self.limit;
            self.bytes.drain(..excess);
            self.truncated = true;
        }
    }

    fn into_string(self) -> String {
        let mut text = String::from_utf8_lossy(&self.bytes).into_owned();
        if self.truncated {
            text.insert_str(0, TRUNCATED_MARKER.trim_start());
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn captures_both_streams_and_exit_code() -> Result<()> {
        let output = ToolCommand::new("/bin/sh", Path::new("."))
            .args(["-c", "printf out && printf err >&2; exit 7"])
            .run()?;
        assert_eq!(output.code, 7);
        assert!(!output.success());
        assert_eq!(output.combined(), "out\nerr");
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn isolated_env_hides_the_parent_environment() -> Result<()> {
        let output = ToolCommand::new("/bin/sh", Path::new("."))
            .arg("-c")
            .arg("printf \"${HOME:-unset}-$LC_ALL\"")
            .isolated_env(&[("LC_ALL".to_string(), "C".to_string())])
            .run()?;
        assert_eq!(output.stdout, "unset-C");
        Ok(())
    }

    #[test]
    fn display_joins_program_and_arguments() {
        let command = ToolCommand::new("python", Path::new(".")).args(["setup.py", "build"]);
        assert_eq!(command.to_string(), "python setup.py build");
    }

    #[test]
    fn tail_buffer_keeps_the_end() {
        let mut tail = TailBuffer::new(4);
        tail.push(b"abcd");
        tail.push(b"ef");
        assert_eq!(tail.into_string(), "[...truncated...]\ncdef");
    }
}
