//! Remote commands and their captured output

use std::borrow::Cow;

use ertia_common::Secret;

/// A command to run on a node over an open session
///
/// Environment values are treated as secrets: they are rendered into the
/// shell line sent to the node but never into [`RemoteCommand::describe`],
/// which is what logs and errors use.
#[derive(Clone, Debug)]
pub struct RemoteCommand {
    program: String,
    args: Vec<String>,
    env: Vec<(String, Secret)>,
    escalate: bool,
}

impl RemoteCommand {
    /// Run `program` as the session user
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            escalate: false,
        }
    }

    /// Append an argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set an environment variable for the command
    pub fn env(mut self, key: impl Into<String>, value: impl Into<Secret>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Run the command with root privileges
    pub fn escalated(mut self) -> Self {
        self.escalate = true;
        self
    }

    /// Whether the command needs root privileges
    pub fn is_escalated(&self) -> bool {
        self.escalate
    }

    /// Names of the environment variables set for the command
    pub fn env_keys(&self) -> impl Iterator<Item = &str> {
        self.env.iter().map(|(k, _)| k.as_str())
    }

    /// The command as a POSIX shell line, every word quoted
    pub fn to_shell(&self) -> String {
        let mut words = Vec::with_capacity(self.env.len() + self.args.len() + 2);
        if !self.env.is_empty() {
            words.push("env".to_string());
            for (key, value) in &self.env {
                words.push(quote(&format!("{}={}", key, value.expose())));
            }
        }
        words.push(quote(&self.program));
        words.extend(self.args.iter().map(|a| quote(a)));
        words.join(" ")
    }

    /// Human-readable form with environment values redacted
    pub fn describe(&self) -> String {
        let mut words: Vec<String> = self.env_keys().map(|k| format!("{}=***", k)).collect();
        words.push(self.program.clone());
        words.extend(self.args.iter().cloned());
        words.join(" ")
    }
}

/// Quote a single word for a POSIX shell
pub fn quote(word: &str) -> String {
    shell_escape::unix::escape(Cow::Borrowed(word)).into_owned()
}

/// Output captured from a remote command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Whether the command exited zero
    pub success: bool,
    /// Standard output
    pub stdout: String,
    /// Standard error
    pub stderr: String,
}

impl CommandOutput {
    /// A successful result with the given stdout
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed result with the given stderr
    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Decode raw process streams, replacing invalid UTF-8
    pub(crate) fn from_streams(success: bool, stdout: &[u8], stderr: &[u8]) -> Self {
        Self {
            success,
            stdout: String::from_utf8_lossy(stdout).into_owned(),
            stderr: String::from_utf8_lossy(stderr).into_owned(),
        }
    }

    /// Stdout and stderr joined for error messages
    pub fn combined(&self) -> String {
        match (self.stdout.trim(), self.stderr.trim()) {
            ("", err) => err.to_string(),
            (out, "") => out.to_string(),
            (out, err) => format!("{}\n{}", out, err),
        }
    }
}
