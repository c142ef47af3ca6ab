//! Mach-O load command rewriting through `install_name_tool`.
//!
//! References into the build tree become `@loader_path`-relative so they
//! survive relocation into the installed wheel. Both `LC_LOAD_DYLIB` and
//! `LC_RPATH` commands are adjusted; nothing else in the binary changes.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::process::Command;

use fs_err as fs;
use tracing::debug;

use crate::error::Result;

use super::{relative_to, render_origin, rewrite_error, run_rewrite_tool};
use crate::tags::Os;

/// Load commands read out of a Mach-O binary
struct LoadState {
    dylibs: Vec<String>,
    rpaths: Vec<String>,
}

fn read_load_state(binary: &Path) -> Result<Option<LoadState>> {
    let contents = fs::read(binary)?;
    let macho = match goblin::mach::Mach::parse(&contents) {
        Ok(goblin::mach::Mach::Binary(macho)) => macho,
        Ok(goblin::mach::Mach::Fat(fat)) => match fat.get(0) {
            // all architectures carry the same load commands for our purposes
            Ok(goblin::mach::SingleArch::MachO(macho)) => macho,
            _ => return Ok(None),
        },
        Err(_) => return Ok(None),
    };

    Ok(Some(LoadState {
        dylibs: macho
            .libs
            .iter()
            // goblin lists the binary itself as "self"
            .filter(|lib| **lib != "self")
            .map(|lib| lib.to_string())
            .collect(),
        rpaths: macho.rpaths.iter().map(|rpath| rpath.to_string()).collect(),
    }))
}

/// Rewrites load commands of `binary` so that references to relocated
/// internal libraries resolve `@loader_path`-relative from `binary_dir`.
pub(super) fn rewrite(
    binary: &Path,
    build_dir: &Path,
    libraries: &BTreeMap<String, PathBuf>,
    binary_dir: &Path,
) -> Result<()> {
    let Some(state) = read_load_state(binary)? else {
        return Ok(());
    };

    let loader_path_for = |name: &str| -> Option<String> {
        let dir = libraries.get(name)?;
        let prefix = render_origin(Os::Macos, &relative_to(binary_dir, dir));
        Some(format!("{prefix}/{name}"))
    };

    // absolute build-tree references become @loader_path-relative
    let mut changes: Vec<(String, String)> = Vec::new();
    // libraries referenced through @rpath need a matching LC_RPATH entry
    let mut rpath_additions: BTreeSet<String> = BTreeSet::new();

    for dylib in &state.dylibs {
        let dylib_path = Path::new(dylib);
        let name = dylib_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        if dylib_path.starts_with(build_dir) {
            if let Some(replacement) = loader_path_for(&name) {
                changes.push((dylib.clone(), replacement));
            }
        } else if let Some(rest) = dylib.strip_prefix("@rpath/") {
            if let Some(dir) = libraries.get(rest) {
                let entry = render_origin(Os::Macos, &relative_to(binary_dir, dir));
                if !state.rpaths.contains(&entry) {
                    rpath_additions.insert(entry);
                }
            }
        }
    }

    let rpath_deletions: Vec<&String> = state
        .rpaths
        .iter()
        .filter(|rpath| Path::new(rpath).starts_with(build_dir))
        .collect();

    if changes.is_empty() && rpath_additions.is_empty() && rpath_deletions.is_empty() {
        debug!("No load command changes needed for {}", binary.display());
        return Ok(());
    }

    let install_name_tool = which::which("install_name_tool").map_err(|_| {
        rewrite_error(
            binary,
            "install_name_tool is required to relocate internal shared libraries on macOS \
             but was not found on PATH",
        )
    })?;

    let mut command = Command::new(install_name_tool);
    for (old, new) in &changes {
        command.arg("-change").arg(old).arg(new);
    }
    for rpath in &rpath_deletions {
        command.arg("-delete_rpath").arg(rpath);
    }
    for rpath in &rpath_additions {
        command.arg("-add_rpath").arg(rpath);
    }
    command.arg(binary);
    run_rewrite_tool(binary, command)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn non_macho_input_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        fs::write(&path, b"\x00\x01\x02\x03not a binary").unwrap();
        assert!(read_load_state(&path).unwrap().is_none());
    }

    #[test]
    fn loader_path_composition() {
        let rel = relative_to(Path::new("mypkg"), Path::new(".sample.mesonpy.libs"));
        assert_eq!(
            format!("{}/libfoo.dylib", render_origin(Os::Macos, &rel)),
            "@loader_path/../.sample.mesonpy.libs/libfoo.dylib"
        );
    }
}
