//! Scripted send/expect sequences.
//!
//! A script is an ordered list of [`Action`]s run against one shell. Steps
//! run strictly one after another and the first failure stops the script.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use cfgsnap::script::ScriptBuilder;
//!
//! let actions = ScriptBuilder::new()
//!     .expect(">")
//!     .send_line("enable")
//!     .expect("Password:")
//!     .send_hidden("secret\n")
//!     .expect_within("#", Duration::from_secs(10))
//!     .build();
//! assert_eq!(actions.len(), 5);
//! ```

use std::fmt;
use std::time::{Duration, Instant};

use log::debug;

use crate::error::ScriptError;
use crate::session::Shell;

/// One scripted step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Write text verbatim.
    Send {
        /// Text to write, including any line terminator.
        text: String,
        /// Mask the text in logs and errors (passwords).
        hidden: bool,
    },

    /// Wait for a literal substring.
    Expect {
        /// Substring to wait for.
        needle: String,
        /// Overrides the runner's default timeout.
        timeout: Option<Duration>,
    },
}

impl Action {
    /// Send text verbatim.
    pub fn send(text: impl Into<String>) -> Self {
        Action::Send {
            text: text.into(),
            hidden: false,
        }
    }

    /// Send text followed by a newline.
    pub fn send_line(text: impl AsRef<str>) -> Self {
        Self::send(format!("{}\n", text.as_ref()))
    }

    /// Send text that must not show up in logs.
    pub fn send_hidden(text: impl Into<String>) -> Self {
        Action::Send {
            text: text.into(),
            hidden: true,
        }
    }

    /// Wait for `needle` using the runner's default timeout.
    pub fn expect(needle: impl Into<String>) -> Self {
        Action::Expect {
            needle: needle.into(),
            timeout: None,
        }
    }

    /// Wait for `needle` for at most `timeout`.
    pub fn expect_within(needle: impl Into<String>, timeout: Duration) -> Self {
        Action::Expect {
            needle: needle.into(),
            timeout: Some(timeout),
        }
    }

    /// Whether this is a send step.
    pub fn is_send(&self) -> bool {
        matches!(self, Action::Send { .. })
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Send { hidden: true, .. } => write!(f, "send <hidden>"),
            Action::Send { text, .. } => write!(f, "send {:?}", text),
            Action::Expect { needle, .. } => write!(f, "expect {:?}", needle),
        }
    }
}

/// Builder for action lists.
#[derive(Debug, Default)]
pub struct ScriptBuilder {
    actions: Vec<Action>,
}

impl ScriptBuilder {
    /// Create an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a verbatim send.
    pub fn send(mut self, text: impl Into<String>) -> Self {
        self.actions.push(Action::send(text));
        self
    }

    /// Add a send with a trailing newline.
    pub fn send_line(mut self, text: impl AsRef<str>) -> Self {
        self.actions.push(Action::send_line(text));
        self
    }

    /// Add a send that is masked in logs.
    pub fn send_hidden(mut self, text: impl Into<String>) -> Self {
        self.actions.push(Action::send_hidden(text));
        self
    }

    /// Add an expect with the default timeout.
    pub fn expect(mut self, needle: impl Into<String>) -> Self {
        self.actions.push(Action::expect(needle));
        self
    }

    /// Add an expect with its own timeout.
    pub fn expect_within(mut self, needle: impl Into<String>, timeout: Duration) -> Self {
        self.actions.push(Action::expect_within(needle, timeout));
        self
    }

    /// Finish the script.
    pub fn build(self) -> Vec<Action> {
        self.actions
    }
}

/// Summary of a completed script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptReport {
    /// Number of send steps executed.
    pub sends: usize,

    /// Number of expect steps matched.
    pub expects: usize,

    /// Wall time for the whole script.
    pub elapsed: Duration,
}

impl ScriptReport {
    /// Total steps executed.
    pub fn steps(&self) -> usize {
        self.sends + self.expects
    }
}

/// Runs action lists for one job/target pair.
#[derive(Debug, Clone)]
pub struct ScriptRunner<'a> {
    job: &'a str,
    target: &'a str,
    default_timeout: Duration,
}

impl<'a> ScriptRunner<'a> {
    /// Create a runner. `job` and `target` label logs and errors.
    pub fn new(job: &'a str, target: &'a str, default_timeout: Duration) -> Self {
        Self {
            job,
            target,
            default_timeout,
        }
    }

    /// Execute `actions` in order against `shell`, stopping at the first failure.
    pub async fn run<S: Shell>(
        &self,
        shell: &mut S,
        actions: &[Action],
    ) -> Result<ScriptReport, ScriptError> {
        let start = Instant::now();
        let mut report = ScriptReport {
            sends: 0,
            expects: 0,
            elapsed: Duration::ZERO,
        };

        for (step, action) in actions.iter().enumerate() {
            debug!("job '{}' {}: step {} {}", self.job, self.target, step, action);

            let result = match action {
                Action::Send { text, .. } => shell.send(text).await.map(|()| report.sends += 1),
                Action::Expect { needle, timeout } => shell
                    .expect(needle, timeout.unwrap_or(self.default_timeout))
                    .await
                    .map(|()| report.expects += 1),
            };

            if let Err(source) = result {
                return Err(ScriptError {
                    job: self.job.to_string(),
                    target: self.target.to_string(),
                    step,
                    action: action.to_string(),
                    source,
                });
            }
        }

        report.elapsed = start.elapsed();
        Ok(report)
    }
}
