//! Command Policy - gate for commands submitted with a task
//!
//! Every save runs the task's command through [`CommandPolicy::validate`].
//! The checks run in a fixed order and the first failing one is reported:
//!
//! 1. empty / whitespace-only
//! 2. denylisted program name (case-insensitive substring)
//! 3. shell metacharacters (`; & | ` $ ( ) < >`)
//! 4. percent or `\x` escapes
//!
//! Denylist matching is plain substring containment, not tokenization, so a
//! command that merely mentions a denylisted word (for example inside a
//! quoted string) is rejected as well.
//!
//! ```rust,ignore
//! let policy = CommandPolicy::default();
//!
//! match policy.validate("echo hello") {
//!     Ok(()) => { /* persist */ }
//!     Err(reason) => { /* reject the save */ }
//! }
//! ```

use regex::Regex;
use std::sync::OnceLock;
use thiserror::Error;
use tracing::debug;

/// Program names that are never allowed to appear in a command
pub const DEFAULT_DENYLIST: &[&str] = &[
    // File removal / formatting / device writes
    "rm", "rmdir", "del", "format", "mkfs", "dd", "mv",
    // Network transfer and remote shells
    "curl", "wget", "nc", "netcat", "telnet", "ssh", "ftp",
    // Permission, ownership and privilege changes
    "chmod", "chown", "sudo", "su",
    // Shell re-entry
    "exec", "eval", "source",
    // Process / service / system control
    "systemctl", "service", "reboot", "shutdown", "init", "kill", "killall",
];

/// Chaining, redirection, substitution and piping
pub const DEFAULT_INJECTION_PATTERN: &str = r"[;&|`$()<>]";

/// Percent- and hex-escaped payload markers
pub const DEFAULT_ENCODED_MARKERS: &[&str] = &["%", "\\x"];

static INJECTION_REGEX: OnceLock<Regex> = OnceLock::new();

fn default_injection_regex() -> &'static Regex {
    INJECTION_REGEX.get_or_init(|| {
        Regex::new(DEFAULT_INJECTION_PATTERN).expect("default injection pattern is valid")
    })
}

/// Why a command was refused
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RejectionReason {
    #[error("Command cannot be empty")]
    EmptyCommand,

    #[error("Command contains potentially dangerous operation: {0}")]
    DangerousOperation(String),

    #[error("Command contains potentially malicious characters")]
    InjectionCharacters,

    #[error("Command contains potentially encoded malicious content")]
    EncodedContent,
}

/// Denylist and patterns, loaded once and shared by reference
#[derive(Debug, Clone)]
pub struct CommandPolicy {
    /// Lowercased, in reporting order
    denylist: Vec<String>,
    injection: Regex,
    encoded_markers: Vec<String>,
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self {
            denylist: DEFAULT_DENYLIST.iter().map(|s| s.to_string()).collect(),
            injection: default_injection_regex().clone(),
            encoded_markers: DEFAULT_ENCODED_MARKERS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl CommandPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a policy from explicit parts
    pub fn with_rules(
        denylist: impl IntoIterator<Item = impl Into<String>>,
        injection_pattern: &str,
        encoded_markers: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            denylist: denylist
                .into_iter()
                .map(|s| s.into().to_lowercase())
                .collect(),
            injection: Regex::new(injection_pattern)?,
            encoded_markers: encoded_markers.into_iter().map(Into::into).collect(),
        })
    }

    /// Validate a command, returning the first failing check
    pub fn validate(&self, command: &str) -> Result<(), RejectionReason> {
        if command.trim().is_empty() {
            return Err(RejectionReason::EmptyCommand);
        }

        let lower = command.trim().to_lowercase();
        if let Some(term) = self.denylist.iter().find(|term| lower.contains(term.as_str())) {
            debug!("Command rejected: matches denylisted '{}'", term);
            return Err(RejectionReason::DangerousOperation(term.clone()));
        }

        if self.injection.is_match(command) {
            debug!("Command rejected: shell metacharacters");
            return Err(RejectionReason::InjectionCharacters);
        }

        if self
            .encoded_markers
            .iter()
            .any(|marker| command.contains(marker.as_str()))
        {
            debug!("Command rejected: encoded content");
            return Err(RejectionReason::EncodedContent);
        }

        Ok(())
    }

    pub fn is_allowed(&self, command: &str) -> bool {
        self.validate(command).is_ok()
    }
}
