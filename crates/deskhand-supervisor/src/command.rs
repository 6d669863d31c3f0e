//! Child process specification.
//!
//! [`ChildSpec`] describes the process a task supervises: program,
//! arguments, working directory, and extra environment. Environment
//! values are [`Secret`]s because they are commonly resolved from
//! decrypted settings -- they reach the child's environment and
//! nowhere else; `Debug` output and logs never include them.

use std::path::PathBuf;
use std::process::Stdio;

use deskhand_types::Secret;

/// Specification for the supervised child process.
///
/// Reusable: each `start()` spawns a fresh child from the same spec.
#[derive(Clone)]
pub struct ChildSpec {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    env: Vec<(String, Secret)>,
}

impl ChildSpec {
    /// Describe a child running `program`.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set the child's working directory.
    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Extend the child's environment. The value goes into the child's
    /// environment only; it is never logged.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<Secret>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// The program name (for diagnostics).
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Spawn a child from this spec with piped stdout/stderr.
    ///
    /// `kill_on_drop` is set so an abandoned control loop cannot leak
    /// the process.
    pub(crate) fn spawn(&self) -> std::io::Result<tokio::process::Child> {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env {
            cmd.env(key, value.reveal());
        }
        cmd.spawn()
    }
}

impl std::fmt::Debug for ChildSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChildSpec")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("cwd", &self.cwd)
            .field("env_keys", &self.env.iter().map(|(k, _)| k).collect::<Vec<_>>())
            .finish()
    }
}
