//! External process execution for reduce steps and sweep units.

use std::path::PathBuf;
use std::process::{Command, Stdio};

use farm_core::FarmError;
use serde::{Deserialize, Serialize};

/// A program invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    /// Collect stdout/stderr instead of inheriting the parent's streams.
    #[serde(default)]
    pub capture_output: bool,
}

impl ProcessCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            capture_output: false,
        }
    }

    /// Run `line` through the platform shell.
    pub fn shell(line: impl Into<String>) -> Self {
        if cfg!(windows) {
            Self::new("cmd").with_args(["/C".to_string(), line.into()])
        } else {
            Self::new("sh").with_args(["-c".to_string(), line.into()])
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn capturing(mut self) -> Self {
        self.capture_output = true;
        self
    }

    /// Human-readable command line for logs.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// What a finished process left behind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `-1` when the process was killed by a signal.
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Run `command` to completion. Blocks the calling thread.
///
/// Only a failure to start the process is an error; a nonzero exit is
/// reported through [`ProcessOutput::exit_code`].
pub fn run(command: &ProcessCommand) -> Result<ProcessOutput, FarmError> {
    let mut cmd = Command::new(&command.program);
    cmd.args(&command.args);
    if let Some(ref dir) = command.working_dir {
        cmd.current_dir(dir);
    }

    let spawn_err =
        |e: std::io::Error| FarmError::Process(format!("failed to start '{}': {}", command.program, e));

    if command.capture_output {
        let out = cmd
            .stdin(Stdio::null())
            .output()
            .map_err(spawn_err)?;
        Ok(ProcessOutput {
            exit_code: out.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
        })
    } else {
        let status = cmd.status().map_err(spawn_err)?;
        Ok(ProcessOutput {
            exit_code: status.code().unwrap_or(-1),
            ..Default::default()
        })
    }
}

/// Run an optional reduce step off the async runtime.
///
/// No command means there is nothing to reduce, which counts as success.
pub(crate) async fn run_reduce(step: Option<&ProcessCommand>) -> Result<bool, FarmError> {
    let Some(command) = step.cloned() else {
        tracing::debug!("No reduce step configured");
        return Ok(true);
    };

    let line = command.display();
    tracing::info!("Running reduce step: {}", line);
    let output = tokio::task::spawn_blocking(move || run(&command))
        .await
        .map_err(|e| FarmError::Process(format!("reduce step panicked: {e}")))??;

    if !output.success() {
        return Err(FarmError::Process(format!(
            "'{}' exited with code {}",
            line, output.exit_code
        )));
    }
    Ok(true)
}
