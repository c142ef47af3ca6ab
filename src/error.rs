//! The closed set of failures the backend can report.
//!
//! Every public operation returns [`enum@Error`]; the CLI turns it into a single
//! user-readable message. Internal detail stays out of the variants unless it
//! is actionable for the user.

use std::fmt;
use std::path::PathBuf;

/// Result alias used throughout the backend
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The Meson subcommand a failure originated from
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[allow(missing_docs)]
pub enum MesonPhase {
    Setup,
    Compile,
    Install,
    Dist,
    Introspect,
}

impl fmt::Display for MesonPhase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            MesonPhase::Setup => write!(f, "setup"),
            MesonPhase::Compile => write!(f, "compile"),
            MesonPhase::Install => write!(f, "install"),
            MesonPhase::Dist => write!(f, "dist"),
            MesonPhase::Introspect => write!(f, "introspect"),
        }
    }
}

/// All errors the backend surfaces to the front-end
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid user configuration, with a JSON pointer to the offending field
    #[error("invalid configuration at `{pointer}`: {message}")]
    Config {
        /// JSON pointer into pyproject.toml, e.g. `/tool/meson-python/limited-api`
        pointer: String,
        /// What is wrong with the value
        message: String,
    },

    /// A `config_settings` key outside the recognized set
    #[error("unknown config setting `{key}`{}", suggestion_text(.suggestion))]
    UnknownConfigSetting {
        /// The key as the front-end passed it
        key: String,
        /// Closest recognized key, if any is close enough
        suggestion: Option<String>,
    },

    /// The running interpreter is not in the recognized set
    #[error("unsupported Python interpreter `{implementation}`: only CPython and PyPy are supported")]
    UnsupportedInterpreter {
        /// `sys.implementation.name` as reported by the interpreter
        implementation: String,
    },

    /// `ARCHFLAGS` and `_PYTHON_HOST_PLATFORM` request different targets
    #[error(
        "conflicting cross-compilation settings: ARCHFLAGS requests `{archflags_arch}` \
         but _PYTHON_HOST_PLATFORM is `{host_platform}`"
    )]
    ConflictingCrossConfig {
        /// Architecture selected through `ARCHFLAGS`
        archflags_arch: String,
        /// Value of `_PYTHON_HOST_PLATFORM`
        host_platform: String,
    },

    /// A Meson subprocess failed or its introspection data was unreadable
    #[error("meson {phase} failed:\n{output}")]
    Meson {
        /// Which phase of the pipeline failed
        phase: MesonPhase,
        /// Captured stderr, or a description of the introspection problem
        output: String,
    },

    /// An install plan entry survived filtering but has no wheel location
    #[error(
        "unable to map `{}` (destined for `{destination}`) to a wheel location",
        source_path.display()
    )]
    UnmappedFile {
        /// Path in the build or source tree
        source_path: PathBuf,
        /// Meson destination, placeholder form
        destination: String,
    },

    /// A top-level Python package is split between purelib and platlib
    #[error(
        "the `{package}` package is split between purelib and platlib; \
         all of a package must target a single location"
    )]
    SplitPackage {
        /// First path component shared by both locations
        package: String,
    },

    /// Internal shared libraries on Windows require explicit opt-in
    #[error(
        "internal shared libraries targeting the system library directory are not \
         supported on Windows unless `tool.meson-python.allow-windows-internal-shared-libs` \
         is set and the package extends the DLL search path itself"
    )]
    WindowsInternalLibForbidden,

    /// Rewriting the dynamic-linker search path of a binary failed
    #[error("failed to rewrite `{}`: {reason}", path.display())]
    Rewrite {
        /// The binary that could not be rewritten
        path: PathBuf,
        /// Why, including missing external utilities
        reason: String,
    },

    /// Metadata assembly or validation failed
    #[error("invalid package metadata: {0}")]
    Metadata(String),

    /// Filesystem failure; fs-err bakes the path into the message
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Formatting into an in-memory buffer failed
    #[error(transparent)]
    Fmt(#[from] std::fmt::Error),

    /// Zip archive construction failed
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
}

fn suggestion_text(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(suggestion) => format!(", did you mean `{suggestion}`?"),
        None => String::new(),
    }
}

impl Error {
    /// Shorthand for a [`Error::Config`] with a formatted message
    pub(crate) fn config(pointer: impl Into<String>, message: impl fmt::Display) -> Self {
        Error::Config {
            pointer: pointer.into(),
            message: message.to_string(),
        }
    }

    /// Shorthand for a [`Error::Meson`] with a formatted message
    pub(crate) fn meson(phase: MesonPhase, output: impl fmt::Display) -> Self {
        Error::Meson {
            phase,
            output: output.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_config_setting_message() {
        let with_suggestion = Error::UnknownConfigSetting {
            key: "build-dirs".to_string(),
            suggestion: Some("build-dir".to_string()),
        };
        assert_eq!(
            with_suggestion.to_string(),
            "unknown config setting `build-dirs`, did you mean `build-dir`?"
        );

        let without = Error::UnknownConfigSetting {
            key: "frobnicate".to_string(),
            suggestion: None,
        };
        assert_eq!(without.to_string(), "unknown config setting `frobnicate`");
    }

    #[test]
    fn meson_phase_display() {
        assert_eq!(MesonPhase::Setup.to_string(), "setup");
        assert_eq!(MesonPhase::Dist.to_string(), "dist");
    }
}
