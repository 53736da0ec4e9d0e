//! Git process boundary
//!
//! Turnback never links against a git implementation. Every interaction with
//! the object store goes through the [`GitRunner`] trait: run one subcommand in
//! a working directory, optionally with extra environment variables, and get
//! back stdout, stderr and the exit code. [`SystemGit`] spawns the real `git`
//! executable; tests wrap it to inject failures.

use crate::error::{Result, TurnbackError};
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, trace};

/// A single git subcommand with its arguments and environment overrides
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitInvocation {
    /// Arguments after the `git` executable, subcommand first
    pub args: Vec<String>,
    /// Extra environment variables for this invocation only
    pub env: Vec<(String, OsString)>,
}

impl GitInvocation {
    /// Create an invocation from its arguments
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            env: Vec::new(),
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set an environment variable for this invocation
    pub fn env(mut self, key: impl Into<String>, value: impl AsRef<OsStr>) -> Self {
        self.env.push((key.into(), value.as_ref().to_os_string()));
        self
    }

    /// The subcommand name, e.g. `"commit-tree"`
    pub fn subcommand(&self) -> &str {
        self.args.first().map(String::as_str).unwrap_or("")
    }
}

impl fmt::Display for GitInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.args.join(" "))
    }
}

/// Captured result of a finished git process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitOutput {
    /// Standard output, lossily decoded
    pub stdout: String,
    /// Standard error, lossily decoded
    pub stderr: String,
    /// Exit code; `None` when terminated by a signal
    pub code: Option<i32>,
}

impl GitOutput {
    /// Whether the process exited with status zero
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Standard output without the trailing newline
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim_end_matches(['\n', '\r'])
    }

    /// Turn a non-zero exit into [`TurnbackError::Git`]
    pub fn check(self, invocation: &GitInvocation) -> Result<GitOutput> {
        if self.success() {
            Ok(self)
        } else {
            Err(TurnbackError::Git {
                command: invocation.to_string(),
                code: self.code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Capability to run git subcommands
///
/// Implementations must not interpret the exit code: a non-zero exit is a
/// normal `Ok(GitOutput)`. Only failures to run the process at all are errors.
pub trait GitRunner {
    /// Run `invocation` with `cwd` as the working directory
    fn run(&self, cwd: &Path, invocation: &GitInvocation) -> Result<GitOutput>;
}

impl<T: GitRunner + ?Sized> GitRunner for &T {
    fn run(&self, cwd: &Path, invocation: &GitInvocation) -> Result<GitOutput> {
        (**self).run(cwd, invocation)
    }
}

impl<T: GitRunner + ?Sized> GitRunner for Box<T> {
    fn run(&self, cwd: &Path, invocation: &GitInvocation) -> Result<GitOutput> {
        (**self).run(cwd, invocation)
    }
}

/// [`GitRunner`] backed by the `git` executable on this machine
#[derive(Debug, Clone)]
pub struct SystemGit {
    binary: PathBuf,
}

impl SystemGit {
    /// Use `git` from `PATH`
    pub fn new() -> Self {
        Self::with_binary("git")
    }

    /// Use a specific git executable
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for SystemGit {
    fn default() -> Self {
        Self::new()
    }
}

impl GitRunner for SystemGit {
    fn run(&self, cwd: &Path, invocation: &GitInvocation) -> Result<GitOutput> {
        debug!("git {}", invocation);

        let mut command = Command::new(&self.binary);
        command
            .args(&invocation.args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            // Never block on credential or editor prompts
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_OPTIONAL_LOCKS", "0");
        for (key, value) in &invocation.env {
            command.env(key, value);
        }

        let output = command.output()?;
        let result = GitOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            code: output.status.code(),
        };
        trace!("git {} -> {:?}", invocation.subcommand(), result.code);
        Ok(result)
    }
}
