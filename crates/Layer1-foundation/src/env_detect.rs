//! Environment Detection - host OS and command shell
//!
//! The local executor asks this module which shell to launch commands with.
//! Detection reads the OS name the process reports at call time rather than a
//! compile-time `cfg!`, so the choice follows the host the binary runs on.

use std::env;

/// Operating system family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsType {
    Windows,
    MacOS,
    Linux,
    Unknown,
}

impl OsType {
    /// Detect from the OS name reported by the running process
    pub fn detect() -> Self {
        Self::from_name(env::consts::OS)
    }

    /// Classify an OS name (`"windows"`, `"Windows 11"`, `"linux"`, ...)
    pub fn from_name(name: &str) -> Self {
        let name = name.to_lowercase();
        if name.contains("mac") || name.contains("darwin") {
            Self::MacOS
        } else if name.contains("win") {
            Self::Windows
        } else if name.contains("linux") {
            Self::Linux
        } else {
            Self::Unknown
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Windows => "Windows",
            Self::MacOS => "macOS",
            Self::Linux => "Linux",
            Self::Unknown => "Unknown",
        }
    }

    pub fn is_windows(&self) -> bool {
        matches!(self, Self::Windows)
    }

    /// Default command shell for this OS
    pub fn default_shell(&self) -> ShellKind {
        if self.is_windows() {
            ShellKind::Cmd
        } else {
            ShellKind::Sh
        }
    }
}

/// Shell used to interpret raw command text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellKind {
    /// Windows command interpreter
    Cmd,
    /// POSIX shell
    Sh,
}

impl ShellKind {
    /// Detect the shell for the current host
    pub fn detect() -> Self {
        OsType::detect().default_shell()
    }

    /// Program to spawn
    pub fn program(&self) -> &'static str {
        match self {
            Self::Cmd => "cmd",
            Self::Sh => "sh",
        }
    }

    /// Flag that makes the shell run the next argument as a command string
    pub fn command_flag(&self) -> &'static str {
        match self {
            Self::Cmd => "/C",
            Self::Sh => "-c",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Cmd => "CMD",
            Self::Sh => "sh",
        }
    }
}
