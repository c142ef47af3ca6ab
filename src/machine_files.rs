//! Meson machine description files.
//!
//! Meson learns about the build interpreter and a potential cross target
//! through INI-like "machine files" passed as `--native-file` and
//! `--cross-file`. Both are generated fresh under the build directory on
//! every invocation; rendering is a pure function of its inputs.

use std::env;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use fs_err as fs;
use tracing::debug;

use crate::error::Result;
use crate::python_interpreter::PythonInterpreter;
use crate::tags::CrossTarget;

const NATIVE_FILE_NAME: &str = "mesonpy-native-file.ini";
const CROSS_FILE_NAME: &str = "mesonpy-cross-file.ini";

/// The machine files generated for one invocation
#[derive(Debug, Clone)]
pub struct MachineFiles {
    /// Always generated, passed as `--native-file`
    pub native_file: PathBuf,
    /// Generated for cross builds, passed as `--cross-file`
    pub cross_file: Option<PathBuf>,
}

/// Compiler and tool overrides honored from the environment
#[derive(Debug, Clone, Default)]
#[allow(missing_docs)]
pub struct ToolEnvironment {
    pub cc: Option<String>,
    pub cxx: Option<String>,
    pub ar: Option<String>,
    pub strip: Option<String>,
}

impl ToolEnvironment {
    /// Reads the conventional compiler environment variables
    pub fn capture() -> ToolEnvironment {
        ToolEnvironment {
            cc: env::var("CC").ok(),
            cxx: env::var("CXX").ok(),
            ar: env::var("AR").ok(),
            strip: env::var("STRIP").ok(),
        }
    }
}

/// Writes the native file and, for cross builds, the cross file into
/// `build_dir`, returning their paths.
pub fn write_machine_files(
    build_dir: &Path,
    interpreter: &PythonInterpreter,
    cross: Option<&CrossTarget>,
    tools: &ToolEnvironment,
) -> Result<MachineFiles> {
    fs::create_dir_all(build_dir)?;

    let native_file = build_dir.join(NATIVE_FILE_NAME);
    fs::write(&native_file, render_native_file(interpreter, tools))?;
    debug!("Wrote native file to {}", native_file.display());

    let cross_file = match cross {
        Some(cross) => {
            let path = build_dir.join(CROSS_FILE_NAME);
            fs::write(&path, render_cross_file(cross, tools))?;
            debug!("Wrote cross file to {}", path.display());
            Some(path)
        }
        None => None,
    };

    Ok(MachineFiles {
        native_file,
        cross_file,
    })
}

/// Quotes a value as a Meson machine-file string literal
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn render_native_file(interpreter: &PythonInterpreter, tools: &ToolEnvironment) -> String {
    let mut out = String::new();

    out.push_str("[binaries]\n");
    let _ = writeln!(
        out,
        "python = {}",
        quote(&interpreter.executable.to_string_lossy())
    );
    for (binary, tool) in [
        ("c", &tools.cc),
        ("cpp", &tools.cxx),
        ("ar", &tools.ar),
        ("strip", &tools.strip),
    ] {
        if let Some(tool) = tool {
            let _ = writeln!(out, "{binary} = {}", quote(tool));
        }
    }

    out.push_str("\n[built-in options]\n");
    let _ = writeln!(
        out,
        "prefix = {}",
        quote(&interpreter.paths.data.to_string_lossy())
    );
    let _ = writeln!(
        out,
        "python.purelibdir = {}",
        quote(&interpreter.paths.purelib.to_string_lossy())
    );
    let _ = writeln!(
        out,
        "python.platlibdir = {}",
        quote(&interpreter.paths.platlib.to_string_lossy())
    );

    out
}

fn render_cross_file(cross: &CrossTarget, tools: &ToolEnvironment) -> String {
    let cc = tools.cc.as_deref().unwrap_or("cc");
    let cxx = tools.cxx.as_deref().unwrap_or("c++");
    let arch_args = format!("'-arch', {}", quote(&cross.arch));

    let mut out = String::new();
    out.push_str("[binaries]\n");
    let _ = writeln!(out, "c = [{}, {arch_args}]", quote(cc));
    let _ = writeln!(out, "cpp = [{}, {arch_args}]", quote(cxx));
    // Meson requires explicit Objective-C entries on macOS cross builds
    let _ = writeln!(out, "objc = [{}, {arch_args}]", quote(cc));
    let _ = writeln!(out, "objcpp = [{}, {arch_args}]", quote(cxx));
    let _ = writeln!(out, "strip = {}", quote(tools.strip.as_deref().unwrap_or("strip")));

    out.push_str("\n[host_machine]\n");
    out.push_str("system = 'darwin'\n");
    let _ = writeln!(out, "cpu = {}", quote(&cross.arch));
    let _ = writeln!(out, "cpu_family = {}", quote(cross.cpu_family()));
    out.push_str("endian = 'little'\n");

    out.push_str("\n[properties]\n");
    out.push_str("needs_exe_wrapper = true\n");

    out
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use expect_test::expect;

    use crate::python_interpreter::{InstallPaths, InterpreterKind};

    use super::*;

    fn interpreter() -> PythonInterpreter {
        PythonInterpreter {
            kind: InterpreterKind::CPython,
            executable: PathBuf::from("/venv/bin/python3"),
            major: 3,
            minor: 11,
            abiflags: String::new(),
            soabi: Some("cpython-311-x86_64-linux-gnu".to_string()),
            ext_suffix: ".cpython-311-x86_64-linux-gnu.so".to_string(),
            platform: "linux-x86_64".to_string(),
            pointer_width: 64,
            paths: InstallPaths {
                purelib: PathBuf::from("/venv/lib/python3.11/site-packages"),
                platlib: PathBuf::from("/venv/lib/python3.11/site-packages"),
                scripts: PathBuf::from("/venv/bin"),
                data: PathBuf::from("/venv"),
            },
        }
    }

    #[test]
    fn native_file_contents() {
        let rendered = render_native_file(&interpreter(), &ToolEnvironment::default());
        expect![[r#"
            [binaries]
            python = '/venv/bin/python3'

            [built-in options]
            prefix = '/venv'
            python.purelibdir = '/venv/lib/python3.11/site-packages'
            python.platlibdir = '/venv/lib/python3.11/site-packages'
        "#]]
        .assert_eq(&rendered);
    }

    #[test]
    fn native_file_honors_tool_overrides() {
        let tools = ToolEnvironment {
            cc: Some("clang".to_string()),
            cxx: Some("clang++".to_string()),
            ..Default::default()
        };
        let rendered = render_native_file(&interpreter(), &tools);
        assert!(rendered.contains("c = 'clang'"));
        assert!(rendered.contains("cpp = 'clang++'"));
        assert!(!rendered.contains("ar = "));
    }

    #[test]
    fn cross_file_contents() {
        let cross = CrossTarget {
            arch: "arm64".to_string(),
        };
        let rendered = render_cross_file(&cross, &ToolEnvironment::default());
        expect![[r#"
            [binaries]
            c = ['cc', '-arch', 'arm64']
            cpp = ['c++', '-arch', 'arm64']
            objc = ['cc', '-arch', 'arm64']
            objcpp = ['c++', '-arch', 'arm64']
            strip = 'strip'

            [host_machine]
            system = 'darwin'
            cpu = 'arm64'
            cpu_family = 'aarch64'
            endian = 'little'

            [properties]
            needs_exe_wrapper = true
        "#]]
        .assert_eq(&rendered);
    }

    #[test]
    fn quoting_escapes() {
        assert_eq!(quote(r"C:\python\python.exe"), r"'C:\\python\\python.exe'");
        assert_eq!(quote("it's"), r"'it\'s'");
    }

    #[test]
    fn files_land_in_build_dir() {
        let dir = tempfile::tempdir().unwrap();
        let files = write_machine_files(
            dir.path(),
            &interpreter(),
            Some(&CrossTarget {
                arch: "arm64".to_string(),
            }),
            &ToolEnvironment::default(),
        )
        .unwrap();
        assert!(files.native_file.is_file());
        assert!(files.cross_file.as_deref().unwrap().is_file());
    }
}
