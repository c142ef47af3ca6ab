//! ELF RUNPATH rewriting through the external `patchelf` utility.
//!
//! goblin reads the dynamic section; `patchelf` performs the modification.
//! `patchelf` must be installed on Linux, which `get_requires_for_build_*`
//! declares as a build requirement when it is missing.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::process::Command;

use fs_err as fs;
use tracing::debug;

use crate::error::Result;

use super::{relative_to, render_origin, rewrite_error, run_rewrite_tool};
use crate::tags::Os;

/// The dynamic-section state of an ELF binary we care about
struct DynamicState {
    needed: BTreeSet<String>,
    runpaths: Vec<String>,
}

fn read_dynamic_state(binary: &Path) -> Result<Option<DynamicState>> {
    let contents = fs::read(binary)?;
    match goblin::Object::parse(&contents) {
        Ok(goblin::Object::Elf(elf)) => {
            let raw = if !elf.runpaths.is_empty() {
                &elf.runpaths
            } else {
                &elf.rpaths
            };
            // a single DT_RUNPATH entry may itself be colon-separated
            let runpaths = raw
                .iter()
                .flat_map(|entry| entry.split(':'))
                .filter(|entry| !entry.is_empty())
                .map(String::from)
                .collect();
            Ok(Some(DynamicState {
                needed: elf.libraries.iter().map(|lib| lib.to_string()).collect(),
                runpaths,
            }))
        }
        // statically linked or stripped of a dynamic section
        Ok(_) | Err(_) => Ok(None),
    }
}

/// Rewrites the RUNPATH of `binary` so that every relocated internal library
/// it links resolves `$ORIGIN`-relative from `binary_dir`. Existing entries
/// pointing into the build tree would dangle after install and are removed.
pub(super) fn rewrite(
    binary: &Path,
    build_dir: &Path,
    libraries: &BTreeMap<String, PathBuf>,
    binary_dir: &Path,
) -> Result<()> {
    let Some(state) = read_dynamic_state(binary)? else {
        return Ok(());
    };

    let kept: Vec<String> = state
        .runpaths
        .iter()
        .filter(|entry| !Path::new(entry).starts_with(build_dir))
        .cloned()
        .collect();

    let additions: BTreeSet<String> = libraries
        .iter()
        .filter(|(name, _)| state.needed.contains(*name))
        .map(|(_, dir)| render_origin(Os::Linux, &relative_to(binary_dir, dir)))
        .filter(|entry| !kept.contains(entry))
        .collect();

    let mut rpath: Vec<String> = kept;
    rpath.extend(additions);

    if rpath == state.runpaths {
        debug!("No RUNPATH changes needed for {}", binary.display());
        return Ok(());
    }

    let patchelf = which::which("patchelf").map_err(|_| {
        rewrite_error(
            binary,
            "patchelf is required to relocate internal shared libraries on this platform \
             but was not found on PATH",
        )
    })?;

    let mut command = Command::new(patchelf);
    if rpath.is_empty() {
        command.arg("--remove-rpath");
    } else {
        command.arg("--set-rpath").arg(rpath.join(":"));
    }
    command.arg(binary);
    run_rewrite_tool(binary, command)
}
