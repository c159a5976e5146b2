//! SHS-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, ShsError>;

/// Top-level error type for the Shai-Hulud scanner.
#[derive(Debug, Error)]
pub enum ShsError {
    #[error("[SHS-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[SHS-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[SHS-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[SHS-1101] unsupported platform: {details}")]
    UnsupportedPlatform { details: String },

    #[error("[SHS-1201] source-control tool {tool:?} is not invocable: {details}")]
    ToolUnavailable { tool: String, details: String },

    #[error("[SHS-1301] unsupported denylist format for {path}: {details}")]
    DenylistFormat { path: PathBuf, details: String },

    #[error("[SHS-1302] denylist {path} ({kind}) yielded no entries")]
    DenylistEmpty { path: PathBuf, kind: &'static str },

    #[error("[SHS-2001] mount table parse failure: {details}")]
    MountParse { details: String },

    #[error("[SHS-2002] manifest parse failure at {path}: {details}")]
    ManifestParse { path: PathBuf, details: String },

    #[error("[SHS-2003] unexpected output from `{command}`: {details}")]
    CommandOutput { command: String, details: String },

    #[error("[SHS-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[SHS-3001] permission denied for {path}")]
    PermissionDenied { path: PathBuf },

    #[error("[SHS-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[SHS-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[SHS-3004] `{command}` failed (exit {exit_code}): {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("[SHS-3005] `{command}` exceeded its {timeout_secs}s deadline")]
    CommandTimeout { command: String, timeout_secs: u64 },

    #[error("[SHS-3006] scan cancelled")]
    Cancelled,

    #[error("[SHS-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl ShsError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "SHS-1001",
            Self::MissingConfig { .. } => "SHS-1002",
            Self::ConfigParse { .. } => "SHS-1003",
            Self::UnsupportedPlatform { .. } => "SHS-1101",
            Self::ToolUnavailable { .. } => "SHS-1201",
            Self::DenylistFormat { .. } => "SHS-1301",
            Self::DenylistEmpty { .. } => "SHS-1302",
            Self::MountParse { .. } => "SHS-2001",
            Self::ManifestParse { .. } => "SHS-2002",
            Self::CommandOutput { .. } => "SHS-2003",
            Self::Serialization { .. } => "SHS-2101",
            Self::PermissionDenied { .. } => "SHS-3001",
            Self::Io { .. } => "SHS-3002",
            Self::ChannelClosed { .. } => "SHS-3003",
            Self::CommandFailed { .. } => "SHS-3004",
            Self::CommandTimeout { .. } => "SHS-3005",
            Self::Cancelled => "SHS-3006",
            Self::Runtime { .. } => "SHS-3900",
        }
    }

    /// Whether this error must abort the run before any scanning begins.
    ///
    /// Everything else is a per-unit condition: logged, the unit skipped,
    /// and the scan continues.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig { .. }
                | Self::MissingConfig { .. }
                | Self::ConfigParse { .. }
                | Self::UnsupportedPlatform { .. }
                | Self::ToolUnavailable { .. }
                | Self::DenylistFormat { .. }
                | Self::DenylistEmpty { .. }
        )
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        if source.kind() == std::io::ErrorKind::PermissionDenied {
            return Self::PermissionDenied { path };
        }
        Self::Io { path, source }
    }
}

impl From<serde_json::Error> for ShsError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for ShsError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
