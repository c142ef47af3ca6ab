//! Probing the Python interpreter the wheel is built for

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::str::FromStr;

use serde::Deserialize;
use tracing::{debug, instrument};

use crate::error::{Error, Result};

/// This snippet gives us the interpreter properties the tag resolver and the
/// native file generator need, as json through stdout
const GET_INTERPRETER_METADATA: &str = include_str!("get_interpreter_metadata.py");

/// The recognized interpreter implementations
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
#[allow(missing_docs)]
pub enum InterpreterKind {
    CPython,
    PyPy,
}

impl InterpreterKind {
    /// Is this a CPython interpreter?
    pub fn is_cpython(&self) -> bool {
        matches!(self, InterpreterKind::CPython)
    }

    /// Is this a PyPy interpreter?
    pub fn is_pypy(&self) -> bool {
        matches!(self, InterpreterKind::PyPy)
    }

    /// The python tag prefix, `cp` or `pp`
    pub fn tag_prefix(&self) -> &'static str {
        match self {
            InterpreterKind::CPython => "cp",
            InterpreterKind::PyPy => "pp",
        }
    }
}

impl fmt::Display for InterpreterKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            InterpreterKind::CPython => write!(f, "CPython"),
            InterpreterKind::PyPy => write!(f, "PyPy"),
        }
    }
}

impl FromStr for InterpreterKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cpython" => Ok(InterpreterKind::CPython),
            "pypy" => Ok(InterpreterKind::PyPy),
            unknown => Err(Error::UnsupportedInterpreter {
                implementation: unknown.to_string(),
            }),
        }
    }
}

/// The output format of [GET_INTERPRETER_METADATA]
#[derive(Deserialize)]
struct InterpreterMetadataMessage {
    implementation_name: String,
    executable: Option<String>,
    major: usize,
    minor: usize,
    abiflags: String,
    soabi: Option<String>,
    ext_suffix: Option<String>,
    // comes from `sysconfig.get_platform()`
    platform: String,
    pointer_width: usize,
    paths: InstallPathsMessage,
}

#[derive(Deserialize)]
struct InstallPathsMessage {
    purelib: PathBuf,
    platlib: PathBuf,
    scripts: PathBuf,
    data: PathBuf,
}

/// The install scheme of the probed interpreter, fed into the Meson native
/// file so the install plan uses `{py_purelib}`/`{py_platlib}` placeholders
/// that match the interpreter
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct InstallPaths {
    /// `sysconfig.get_path("purelib")`
    pub purelib: PathBuf,
    /// `sysconfig.get_path("platlib")`
    pub platlib: PathBuf,
    /// `sysconfig.get_path("scripts")`
    pub scripts: PathBuf,
    /// `sysconfig.get_path("data")`, the install prefix for everything else
    pub data: PathBuf,
}

/// The location and properties of an interpreter
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PythonInterpreter {
    /// CPython or PyPy
    pub kind: InterpreterKind,
    /// Path to the python interpreter, e.g. /usr/bin/python3.11
    pub executable: PathBuf,
    /// Python's major version
    pub major: usize,
    /// Python's minor version
    pub minor: usize,
    /// The ABI flag string, e.g. "" or "t" (free-threaded) or "d" (pydebug)
    pub abiflags: String,
    /// `sysconfig.get_config_var("SOABI")`,
    /// e.g. `cpython-311-x86_64-linux-gnu` or `pypy310-pp73-x86_64-linux-gnu`
    pub soabi: Option<String>,
    /// Suffix of extension modules, e.g. `.cpython-311-x86_64-linux-gnu.so`
    pub ext_suffix: String,
    /// Comes from `sysconfig.get_platform()`, e.g. `linux-x86_64` or
    /// `macosx-11.0-arm64`
    pub platform: String,
    /// 32 or 64
    pub pointer_width: usize,
    /// The interpreter's install scheme
    pub paths: InstallPaths,
}

impl PythonInterpreter {
    /// Queries the given executable for its properties.
    ///
    /// Fails with [`Error::UnsupportedInterpreter`] for implementations
    /// outside the recognized set.
    #[instrument(skip_all, fields(executable = %executable.as_ref().display()))]
    pub fn query(executable: impl AsRef<Path>) -> Result<PythonInterpreter> {
        let executable = executable.as_ref();
        let output = Command::new(executable)
            .env("PYTHONNOUSERSITE", "1")
            .args(["-c", GET_INTERPRETER_METADATA])
            .output()
            .map_err(|err| {
                io::Error::new(
                    err.kind(),
                    format!("failed to run python at {}: {err}", executable.display()),
                )
            })?;

        if !output.status.success() {
            return Err(Error::UnsupportedInterpreter {
                implementation: format!(
                    "{} (probing failed: {})",
                    executable.display(),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        let message: InterpreterMetadataMessage = serde_json::from_slice(&output.stdout)
            .map_err(|err| Error::UnsupportedInterpreter {
                implementation: format!(
                    "{} (unexpected probe output: {err})",
                    executable.display()
                ),
            })?;

        let kind = message.implementation_name.parse::<InterpreterKind>()?;

        let ext_suffix = message
            .ext_suffix
            .ok_or_else(|| Error::UnsupportedInterpreter {
                implementation: format!(
                    "{} (sysconfig does not define EXT_SUFFIX)",
                    executable.display()
                ),
            })?;

        let interpreter = PythonInterpreter {
            kind,
            executable: message
                .executable
                .map(PathBuf::from)
                .unwrap_or_else(|| executable.to_path_buf()),
            major: message.major,
            minor: message.minor,
            abiflags: message.abiflags,
            soabi: message.soabi,
            ext_suffix,
            platform: message.platform,
            pointer_width: message.pointer_width,
            paths: InstallPaths {
                purelib: message.paths.purelib,
                platlib: message.paths.platlib,
                scripts: message.paths.scripts,
                data: message.paths.data,
            },
        };
        debug!("Found {interpreter}");
        Ok(interpreter)
    }

    /// Locates `python3` (falling back to `python`) on PATH and queries it
    pub fn from_path() -> Result<PythonInterpreter> {
        let executable = which::which("python3")
            .or_else(|_| which::which("python"))
            .map_err(|err| {
                io::Error::new(io::ErrorKind::NotFound, format!("no python on PATH: {err}"))
            })?;
        Self::query(executable)
    }

    /// The python tag for this interpreter, e.g. `cp311` or `pp310`
    pub fn python_tag(&self) -> String {
        format!("{}{}{}", self.kind.tag_prefix(), self.major, self.minor)
    }
}

impl fmt::Display for PythonInterpreter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} {}.{}{} at {}",
            self.kind,
            self.major,
            self.minor,
            self.abiflags,
            self.executable.display()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(implementation: &str) -> InterpreterMetadataMessage {
        serde_json::from_str(&format!(
            r#"{{
                "implementation_name": "{implementation}",
                "executable": "/usr/bin/python3.11",
                "major": 3,
                "minor": 11,
                "abiflags": "",
                "soabi": "cpython-311-x86_64-linux-gnu",
                "ext_suffix": ".cpython-311-x86_64-linux-gnu.so",
                "platform": "linux-x86_64",
                "system": "Linux",
                "pointer_width": 64,
                "paths": {{
                    "purelib": "/usr/lib/python3.11/site-packages",
                    "platlib": "/usr/lib64/python3.11/site-packages",
                    "scripts": "/usr/bin",
                    "data": "/usr"
                }}
            }}"#
        ))
        .unwrap()
    }

    #[test]
    fn parse_probe_message() {
        let message = message("cpython");
        assert_eq!(message.major, 3);
        assert_eq!(message.minor, 11);
        assert_eq!(message.platform, "linux-x86_64");
        assert_eq!(
            message.paths.scripts,
            PathBuf::from("/usr/bin"),
        );
    }

    #[test]
    fn interpreter_kind_from_str() {
        assert_eq!(
            "cpython".parse::<InterpreterKind>().unwrap(),
            InterpreterKind::CPython
        );
        assert_eq!(
            "pypy".parse::<InterpreterKind>().unwrap(),
            InterpreterKind::PyPy
        );
        let err = "graalpy".parse::<InterpreterKind>().unwrap_err();
        assert!(matches!(err, Error::UnsupportedInterpreter { .. }));
    }

    #[test]
    fn python_tag() {
        let interpreter = PythonInterpreter {
            kind: InterpreterKind::CPython,
            executable: PathBuf::from("/usr/bin/python3.11"),
            major: 3,
            minor: 11,
            abiflags: String::new(),
            soabi: Some("cpython-311-x86_64-linux-gnu".to_string()),
            ext_suffix: ".cpython-311-x86_64-linux-gnu.so".to_string(),
            platform: "linux-x86_64".to_string(),
            pointer_width: 64,
            paths: InstallPaths {
                purelib: PathBuf::from("/usr/lib/python3.11/site-packages"),
                platlib: PathBuf::from("/usr/lib64/python3.11/site-packages"),
                scripts: PathBuf::from("/usr/bin"),
                data: PathBuf::from("/usr"),
            },
        };
        assert_eq!(interpreter.python_tag(), "cp311");
    }
}
