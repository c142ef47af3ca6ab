//! Deriving the wheel's `(python, abi, platform)` tag triple

use std::env;
use std::fmt;

use itertools::Itertools as _;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};
use crate::python_interpreter::{InterpreterKind, PythonInterpreter};

/// Operating systems we know how to tag
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[allow(missing_docs)]
pub enum Os {
    Linux,
    Windows,
    Macos,
    Ios,
    FreeBsd,
    NetBsd,
    OpenBsd,
    Dragonfly,
    Solaris,
    Illumos,
}

impl Os {
    /// The operating system this process runs on
    pub fn host() -> Option<Os> {
        match env::consts::OS {
            "linux" | "android" => Some(Os::Linux),
            "windows" => Some(Os::Windows),
            "macos" => Some(Os::Macos),
            "ios" => Some(Os::Ios),
            "freebsd" => Some(Os::FreeBsd),
            "netbsd" => Some(Os::NetBsd),
            "openbsd" => Some(Os::OpenBsd),
            "dragonfly" => Some(Os::Dragonfly),
            "solaris" => Some(Os::Solaris),
            "illumos" => Some(Os::Illumos),
            _ => None,
        }
    }

    /// Whether binaries on this platform use the ELF format
    pub fn is_elf(&self) -> bool {
        !matches!(self, Os::Windows | Os::Macos | Os::Ios)
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Os::Linux => write!(f, "Linux"),
            Os::Windows => write!(f, "Windows"),
            Os::Macos => write!(f, "macOS"),
            Os::Ios => write!(f, "iOS"),
            Os::FreeBsd => write!(f, "FreeBSD"),
            Os::NetBsd => write!(f, "NetBSD"),
            Os::OpenBsd => write!(f, "OpenBSD"),
            Os::Dragonfly => write!(f, "DragonFly"),
            Os::Solaris => write!(f, "Solaris"),
            Os::Illumos => write!(f, "Illumos"),
        }
    }
}

/// A wheel tag triple, e.g. `cp311-cp311-linux_x86_64`
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct WheelTag {
    /// e.g. `cp311`, `pp310`, `py3`
    pub python: String,
    /// e.g. `cp311`, `abi3`, `none`
    pub abi: String,
    /// e.g. `linux_x86_64`, `macosx_11_0_arm64`, `any`
    pub platform: String,
}

impl WheelTag {
    /// The tag of a pure, architecture-independent wheel
    pub fn pure() -> WheelTag {
        WheelTag {
            python: "py3".to_string(),
            abi: "none".to_string(),
            platform: "any".to_string(),
        }
    }
}

impl fmt::Display for WheelTag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}-{}-{}", self.python, self.abi, self.platform)
    }
}

/// A cross-compilation target selected through `ARCHFLAGS` (macOS only)
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CrossTarget {
    /// The target CPU as the platform tag spells it, e.g. `arm64`
    pub arch: String,
}

impl CrossTarget {
    /// The value for the `cpu_family` entry of a Meson cross file
    pub fn cpu_family(&self) -> &str {
        match self.arch.as_str() {
            "arm64" => "aarch64",
            other => other,
        }
    }
}

/// Environment inputs of the tag resolver, captured once so resolution stays
/// a pure function
#[derive(Debug, Clone, Default)]
#[allow(missing_docs)]
pub struct TagEnvironment {
    pub macosx_deployment_target: Option<String>,
    pub iphoneos_deployment_target: Option<String>,
    pub archflags: Option<String>,
    pub python_host_platform: Option<String>,
}

impl TagEnvironment {
    /// Reads the documented environment variables
    pub fn capture() -> TagEnvironment {
        TagEnvironment {
            macosx_deployment_target: env::var("MACOSX_DEPLOYMENT_TARGET").ok(),
            iphoneos_deployment_target: env::var("IPHONEOS_DEPLOYMENT_TARGET").ok(),
            archflags: env::var("ARCHFLAGS").ok(),
            python_host_platform: env::var("_PYTHON_HOST_PLATFORM").ok(),
        }
    }
}

/// The output of tag resolution for one invocation
#[derive(Debug, Clone)]
pub struct ResolvedTags {
    /// The platform-dependent tag triple; pure wheels use
    /// [`WheelTag::pure`] instead, decided after install plan mapping
    pub tag: WheelTag,
    /// Present when `ARCHFLAGS` selected a non-native macOS target
    pub cross: Option<CrossTarget>,
    /// Whether the limited API is in effect (disabled again on PyPy)
    pub limited_api: bool,
}

/// Derives the wheel tag triple from the build interpreter, the host
/// operating system, and the environment.
pub fn resolve(
    interpreter: &PythonInterpreter,
    os: Os,
    limited_api: bool,
    env: &TagEnvironment,
) -> Result<ResolvedTags> {
    let limited_api = match (limited_api, interpreter.kind) {
        (true, InterpreterKind::CPython) => true,
        (true, InterpreterKind::PyPy) => {
            eprintln!("⚠️  Warning: PyPy does not support the limited API, ignoring `limited-api`");
            false
        }
        (false, _) => false,
    };

    let python = interpreter.python_tag();
    let abi = if limited_api {
        "abi3".to_string()
    } else {
        abi_tag(interpreter)
    };

    let cross = cross_target(interpreter, os, env)?;
    let platform = platform_tag(interpreter, os, cross.as_ref(), env)?;

    Ok(ResolvedTags {
        tag: WheelTag {
            python,
            abi,
            platform,
        },
        cross,
        limited_api,
    })
}

/// The full ABI tag of the interpreter, e.g. `cp311`, `cp313t`, `pypy310_pp73`
fn abi_tag(interpreter: &PythonInterpreter) -> String {
    match interpreter.kind {
        InterpreterKind::CPython => format!(
            "cp{}{}{}",
            interpreter.major, interpreter.minor, interpreter.abiflags
        ),
        InterpreterKind::PyPy => match &interpreter.soabi {
            // "pypy310-pp73-x86_64-linux-gnu" -> "pypy310_pp73"
            Some(soabi) => soabi.split('-').take(2).collect::<Vec<_>>().join("_"),
            None => format!("pp{}{}", interpreter.major, interpreter.minor),
        },
    }
}

/// Normalizes a sysconfig-style platform string into a tag component
fn normalize(platform: &str) -> String {
    platform
        .to_ascii_lowercase()
        .replace(['-', '.', ' '], "_")
}

static ARCH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"-arch\s+(\S+)").unwrap());

/// Parses repeated `-arch` tokens out of `ARCHFLAGS`
fn archflags_arches(archflags: &str) -> Vec<String> {
    ARCH_RE
        .captures_iter(archflags)
        .map(|capture| capture[1].to_string())
        .unique()
        .collect()
}

/// The architecture component of a macOS/iOS sysconfig platform string,
/// e.g. "macosx-11.0-arm64" -> "arm64"
fn darwin_arch(platform: &str) -> Option<&str> {
    platform.rsplit('-').next()
}

/// Detects an `ARCHFLAGS`-driven macOS cross target and validates it against
/// `_PYTHON_HOST_PLATFORM`
fn cross_target(
    interpreter: &PythonInterpreter,
    os: Os,
    env: &TagEnvironment,
) -> Result<Option<CrossTarget>> {
    if os != Os::Macos {
        return Ok(None);
    }
    let Some(archflags) = env.archflags.as_deref() else {
        return Ok(None);
    };

    let arches = archflags_arches(archflags);
    match arches.as_slice() {
        [] => Ok(None),
        [arch] => {
            if let Some(host_platform) = env.python_host_platform.as_deref() {
                if darwin_arch(host_platform) != Some(arch.as_str()) {
                    return Err(Error::ConflictingCrossConfig {
                        archflags_arch: arch.clone(),
                        host_platform: host_platform.to_string(),
                    });
                }
            }
            if darwin_arch(&interpreter.platform) == Some(arch.as_str()) {
                // Building for the native architecture is not a cross build
                Ok(None)
            } else {
                Ok(Some(CrossTarget { arch: arch.clone() }))
            }
        }
        _ => Err(Error::config(
            "/environment/ARCHFLAGS",
            "multiple architectures are not supported; build one wheel per architecture",
        )),
    }
}

/// A macOS version as found in deployment targets and platform tags
fn parse_macos_version(version: &str) -> Option<(u32, u32)> {
    let mut parts = version.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().map_or(Some(0), |minor| minor.parse().ok())?;
    Some((major, minor))
}

/// Assembles the macOS platform tag following the packaging conventions:
/// the deployment target wins over the interpreter's build target, major
/// versions 11+ always report minor zero, and arm64 starts at 11.0.
fn macos_platform_tag(
    interpreter: &PythonInterpreter,
    cross: Option<&CrossTarget>,
    env: &TagEnvironment,
) -> Result<String> {
    let arch = match cross {
        Some(cross) => cross.arch.clone(),
        None => darwin_arch(&interpreter.platform)
            .unwrap_or("x86_64")
            .to_string(),
    };

    // "macosx-11.0-arm64" -> "11.0"
    let interpreter_version = interpreter
        .platform
        .split('-')
        .nth(1)
        .and_then(parse_macos_version);

    let (mut major, mut minor) = env
        .macosx_deployment_target
        .as_deref()
        .and_then(parse_macos_version)
        .or(interpreter_version)
        .ok_or_else(|| {
            Error::config(
                "/environment/MACOSX_DEPLOYMENT_TARGET",
                format!(
                    "unable to determine the macOS deployment target from `{}`",
                    interpreter.platform
                ),
            )
        })?;

    if arch == "arm64" && major < 11 {
        (major, minor) = (11, 0);
    }
    if major >= 11 {
        minor = 0;
    }

    Ok(format!("macosx_{major}_{minor}_{arch}"))
}

/// The iOS platform tag, e.g. `ios_13_0_arm64_iphoneos`
fn ios_platform_tag(interpreter: &PythonInterpreter, env: &TagEnvironment) -> String {
    // sysconfig reports e.g. "ios-13.0-arm64-iphoneos"
    let mut parts: Vec<&str> = interpreter.platform.split('-').collect();
    if let (Some(target), true) = (env.iphoneos_deployment_target.as_deref(), parts.len() >= 2) {
        parts[1] = target;
    }
    normalize(&parts.join("_"))
}

/// The platform tag for uname-convention platforms (the BSDs, Solaris and
/// Illumos), e.g. `freebsd_14_1_release_amd64`
fn uname_platform_tag() -> Result<String> {
    use platform_info::{PlatformInfo, PlatformInfoAPI, UNameAPI};

    let info = PlatformInfo::new()
        .map_err(|err| Error::config("/environment", format!("uname failed: {err}")))?;
    Ok(normalize(&format!(
        "{}_{}_{}",
        info.sysname().to_string_lossy(),
        info.release().to_string_lossy(),
        info.machine().to_string_lossy(),
    )))
}

fn platform_tag(
    interpreter: &PythonInterpreter,
    os: Os,
    cross: Option<&CrossTarget>,
    env: &TagEnvironment,
) -> Result<String> {
    match os {
        Os::Linux | Os::Windows => {
            // `_PYTHON_HOST_PLATFORM` carries e.g. "manylinux2014-x86_64"
            // when a distributor targets a specific platform convention
            let platform = env
                .python_host_platform
                .as_deref()
                .unwrap_or(&interpreter.platform);
            Ok(normalize(platform))
        }
        Os::Macos => {
            if let Some(host_platform) = env.python_host_platform.as_deref() {
                return Ok(normalize(host_platform));
            }
            macos_platform_tag(interpreter, cross, env)
        }
        Os::Ios => Ok(ios_platform_tag(interpreter, env)),
        Os::FreeBsd | Os::NetBsd | Os::OpenBsd | Os::Dragonfly | Os::Solaris | Os::Illumos => {
            uname_platform_tag()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use crate::python_interpreter::InstallPaths;

    use super::*;

    fn interpreter(kind: InterpreterKind, platform: &str) -> PythonInterpreter {
        PythonInterpreter {
            kind,
            executable: PathBuf::from("/usr/bin/python3"),
            major: 3,
            minor: 11,
            abiflags: String::new(),
            soabi: match kind {
                InterpreterKind::CPython => Some("cpython-311-x86_64-linux-gnu".to_string()),
                InterpreterKind::PyPy => Some("pypy311-pp73-x86_64-linux-gnu".to_string()),
            },
            ext_suffix: ".so".to_string(),
            platform: platform.to_string(),
            pointer_width: 64,
            paths: InstallPaths {
                purelib: PathBuf::from("/usr/lib/python3.11/site-packages"),
                platlib: PathBuf::from("/usr/lib64/python3.11/site-packages"),
                scripts: PathBuf::from("/usr/bin"),
                data: PathBuf::from("/usr"),
            },
        }
    }

    #[test]
    fn linux_tags() {
        let tags = resolve(
            &interpreter(InterpreterKind::CPython, "linux-x86_64"),
            Os::Linux,
            false,
            &TagEnvironment::default(),
        )
        .unwrap();
        assert_eq!(tags.tag.to_string(), "cp311-cp311-linux_x86_64");
        assert!(tags.cross.is_none());
    }

    #[test]
    fn linux_host_platform_override() {
        let env = TagEnvironment {
            python_host_platform: Some("manylinux2014-aarch64".to_string()),
            ..Default::default()
        };
        let tags = resolve(
            &interpreter(InterpreterKind::CPython, "linux-x86_64"),
            Os::Linux,
            false,
            &env,
        )
        .unwrap();
        assert_eq!(tags.tag.platform, "manylinux2014_aarch64");
    }

    #[test]
    fn limited_api_cpython() {
        let tags = resolve(
            &interpreter(InterpreterKind::CPython, "linux-x86_64"),
            Os::Linux,
            true,
            &TagEnvironment::default(),
        )
        .unwrap();
        assert_eq!(tags.tag.python, "cp311");
        assert_eq!(tags.tag.abi, "abi3");
        assert!(tags.limited_api);
    }

    #[test]
    fn limited_api_pypy_falls_back() {
        let tags = resolve(
            &interpreter(InterpreterKind::PyPy, "linux-x86_64"),
            Os::Linux,
            true,
            &TagEnvironment::default(),
        )
        .unwrap();
        assert_eq!(tags.tag.python, "pp311");
        assert_eq!(tags.tag.abi, "pypy311_pp73");
        assert!(!tags.limited_api);
    }

    #[test]
    fn freethreaded_abi() {
        let mut interpreter = interpreter(InterpreterKind::CPython, "linux-x86_64");
        interpreter.minor = 13;
        interpreter.abiflags = "t".to_string();
        assert_eq!(abi_tag(&interpreter), "cp313t");
    }

    #[rstest]
    #[case("10.15", "macosx-10.9-x86_64", "macosx_10_15_x86_64")]
    #[case("12.4", "macosx-10.9-x86_64", "macosx_12_0_x86_64")]
    #[case("11", "macosx-11.0-arm64", "macosx_11_0_arm64")]
    fn macos_deployment_target(
        #[case] target: &str,
        #[case] sys_platform: &str,
        #[case] expected: &str,
    ) {
        let env = TagEnvironment {
            macosx_deployment_target: Some(target.to_string()),
            ..Default::default()
        };
        let tags = resolve(
            &interpreter(InterpreterKind::CPython, sys_platform),
            Os::Macos,
            false,
            &env,
        )
        .unwrap();
        assert_eq!(tags.tag.platform, expected);
    }

    #[test]
    fn macos_arm64_floors_at_11() {
        let env = TagEnvironment {
            macosx_deployment_target: Some("10.15".to_string()),
            archflags: Some("-arch arm64".to_string()),
            ..Default::default()
        };
        let tags = resolve(
            &interpreter(InterpreterKind::CPython, "macosx-10.15-x86_64"),
            Os::Macos,
            false,
            &env,
        )
        .unwrap();
        assert_eq!(tags.tag.platform, "macosx_11_0_arm64");
        assert_eq!(
            tags.cross,
            Some(CrossTarget {
                arch: "arm64".to_string()
            })
        );
    }

    #[test]
    fn archflags_native_arch_is_not_cross() {
        let env = TagEnvironment {
            archflags: Some("-arch x86_64".to_string()),
            ..Default::default()
        };
        let tags = resolve(
            &interpreter(InterpreterKind::CPython, "macosx-11.0-x86_64"),
            Os::Macos,
            false,
            &env,
        )
        .unwrap();
        assert!(tags.cross.is_none());
        assert_eq!(tags.tag.platform, "macosx_11_0_x86_64");
    }

    #[test]
    fn archflags_conflicts_with_host_platform() {
        let env = TagEnvironment {
            archflags: Some("-arch arm64".to_string()),
            python_host_platform: Some("macosx-11.0-x86_64".to_string()),
            ..Default::default()
        };
        let err = resolve(
            &interpreter(InterpreterKind::CPython, "macosx-11.0-x86_64"),
            Os::Macos,
            false,
            &env,
        )
        .unwrap_err();
        assert!(matches!(err, Error::ConflictingCrossConfig { .. }), "{err}");
    }

    #[test]
    fn archflags_multiple_arches_rejected() {
        let env = TagEnvironment {
            archflags: Some("-arch arm64 -arch x86_64".to_string()),
            ..Default::default()
        };
        let err = resolve(
            &interpreter(InterpreterKind::CPython, "macosx-11.0-x86_64"),
            Os::Macos,
            false,
            &env,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config { .. }), "{err}");
    }

    #[test]
    fn windows_platform() {
        let tags = resolve(
            &interpreter(InterpreterKind::CPython, "win-amd64"),
            Os::Windows,
            false,
            &TagEnvironment::default(),
        )
        .unwrap();
        assert_eq!(tags.tag.platform, "win_amd64");
    }

    #[test]
    fn ios_platform() {
        let env = TagEnvironment {
            iphoneos_deployment_target: Some("14.0".to_string()),
            ..Default::default()
        };
        let tags = resolve(
            &interpreter(InterpreterKind::CPython, "ios-13.0-arm64-iphoneos"),
            Os::Ios,
            false,
            &env,
        )
        .unwrap();
        assert_eq!(tags.tag.platform, "ios_14_0_arm64_iphoneos");
    }

    #[test]
    fn pure_tag() {
        assert_eq!(WheelTag::pure().to_string(), "py3-none-any");
    }
}
