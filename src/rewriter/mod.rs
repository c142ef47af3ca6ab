//! Rewriting dynamic-linker search paths of native artifacts.
//!
//! When the wheel relocates shared libraries (into the package directory or
//! into the hidden `.{distname}.mesonpy.libs` directory), every binary that
//! links them must find them again relative to its own install location.
//! Rewriting is strictly local to each binary: search paths only, no symbol
//! changes, no re-linking. PE has no comparable mechanism, so Windows
//! binaries are never touched (the install plan mapper gates that case).

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};
use crate::install_plan::{FileKind, InstallPlan, MappedFile};
use crate::tags::Os;

mod elf;
mod macho;

/// Plans and applies search-path rewrites for one wheel's native artifacts
#[derive(Debug)]
pub struct Rewriter {
    os: Os,
    build_dir: PathBuf,
    /// Shared library file name to the wheel directory holding it
    libraries: BTreeMap<String, PathBuf>,
}

impl Rewriter {
    /// Collects the wheel locations of every relocatable shared library in
    /// the plan. `wheel_path` maps a plan entry to its path inside the wheel
    /// archive.
    pub fn new(
        os: Os,
        build_dir: &Path,
        plan: &InstallPlan,
        wheel_path: impl Fn(&MappedFile) -> PathBuf,
    ) -> Rewriter {
        let mut libraries = BTreeMap::new();
        for file in &plan.files {
            if file.kind == FileKind::SharedLibrary {
                let path = wheel_path(file);
                if let (Some(name), Some(parent)) = (
                    path.file_name().map(|name| name.to_string_lossy().into_owned()),
                    path.parent(),
                ) {
                    libraries.insert(name, parent.to_path_buf());
                }
            }
        }
        Rewriter {
            os,
            build_dir: build_dir.to_path_buf(),
            libraries,
        }
    }

    /// Whether this plan needs any rewriting at all
    pub fn is_needed(&self) -> bool {
        !self.libraries.is_empty() && self.os != Os::Windows
    }

    /// Rewrites `binary` (a staged, writable copy of a native artifact that
    /// will live at `wheel_location` inside the wheel) so that its references
    /// to relocated libraries resolve after installation. No-op when the
    /// binary references none of them.
    pub fn rewrite(&self, binary: &Path, wheel_location: &Path) -> Result<()> {
        if self.os == Os::Windows {
            return Ok(());
        }
        let binary_dir = wheel_location.parent().unwrap_or(Path::new(""));

        if self.os.is_elf() {
            elf::rewrite(binary, &self.build_dir, &self.libraries, binary_dir)
        } else {
            macho::rewrite(binary, &self.build_dir, &self.libraries, binary_dir)
        }
    }
}

/// Renders a wheel-relative directory as a loader-relative search path
fn render_origin(os: Os, relative: &Path) -> String {
    let token = match os {
        Os::Macos | Os::Ios => "@loader_path",
        _ => "$ORIGIN",
    };
    if relative == Path::new("") || relative == Path::new(".") {
        token.to_string()
    } else {
        format!("{token}/{}", relative.display())
    }
}

/// Computes the relative path from one wheel directory to another. Both are
/// archive-relative, so there are no symlinks or `..` components to chase.
fn relative_to(from: &Path, to: &Path) -> PathBuf {
    let from: Vec<Component> = from.components().collect();
    let to: Vec<Component> = to.components().collect();

    let common = from
        .iter()
        .zip(&to)
        .take_while(|(a, b)| a == b)
        .count();

    let mut relative = PathBuf::new();
    for _ in common..from.len() {
        relative.push("..");
    }
    for component in &to[common..] {
        relative.push(component);
    }
    relative
}

pub(crate) fn rewrite_error(path: &Path, reason: impl std::fmt::Display) -> Error {
    Error::Rewrite {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
}

pub(crate) fn run_rewrite_tool(
    binary: &Path,
    mut command: std::process::Command,
) -> Result<()> {
    debug!("Running {command:?}");
    let output = command
        .output()
        .map_err(|err| rewrite_error(binary, err))?;
    if !output.status.success() {
        return Err(rewrite_error(
            binary,
            format!(
                "{:?} exited with {}: {}",
                command.get_program(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn relative_paths_between_wheel_dirs() {
        assert_eq!(
            relative_to(Path::new("mypkg"), Path::new(".sample.mesonpy.libs")),
            PathBuf::from("../.sample.mesonpy.libs")
        );
        assert_eq!(
            relative_to(Path::new("mypkg/sub"), Path::new("mypkg")),
            PathBuf::from("..")
        );
        assert_eq!(
            relative_to(Path::new("mypkg"), Path::new("mypkg")),
            PathBuf::from("")
        );
        assert_eq!(
            relative_to(
                Path::new("sample-1.0.0.data/scripts"),
                Path::new(".sample.mesonpy.libs")
            ),
            PathBuf::from("../../.sample.mesonpy.libs")
        );
    }

    #[test]
    fn origin_rendering() {
        assert_eq!(render_origin(Os::Linux, Path::new("")), "$ORIGIN");
        assert_eq!(
            render_origin(Os::Linux, Path::new("../.sample.mesonpy.libs")),
            "$ORIGIN/../.sample.mesonpy.libs"
        );
        assert_eq!(
            render_origin(Os::Macos, Path::new("..")),
            "@loader_path/.."
        );
    }
}
