//! The build-backend hook surface consumed by Python build front-ends.
//!
//! These functions mirror the PEP 517 contract one to one; the CLI and any
//! embedding front-end shim call straight through to them. All of them
//! operate on a source tree containing a `pyproject.toml` and a
//! `meson.build`.

use std::path::Path;

use tracing::debug;

use crate::build_context::BuildContext;
use crate::config_settings::ConfigSettings;
use crate::error::Result;
use crate::meson;

/// Builds a wheel into `output_dir` and returns its file name.
///
/// `metadata_dir` is the directory a front-end got back from
/// [`prepare_metadata_for_build_wheel`]. Metadata assembly is cheap and the
/// project version may be dynamic, so the built wheel's metadata is always
/// recomputed from the configured build rather than copied from there; the
/// contract only requires the two to match, which recomputing guarantees.
pub fn build_wheel(
    source_dir: &Path,
    output_dir: &Path,
    settings: &ConfigSettings,
    metadata_dir: Option<&Path>,
) -> Result<String> {
    if let Some(metadata_dir) = metadata_dir {
        debug!(
            "Prepared metadata at {} will be superseded by freshly assembled metadata",
            metadata_dir.display()
        );
    }
    let context = BuildContext::new(source_dir, settings)?;
    let wheel = context.build_wheel(output_dir)?;
    Ok(file_name(&wheel))
}

/// Builds a source distribution into `output_dir` and returns its file name
pub fn build_sdist(
    source_dir: &Path,
    output_dir: &Path,
    settings: &ConfigSettings,
) -> Result<String> {
    let context = BuildContext::new(source_dir, settings)?;
    let sdist = context.build_sdist(output_dir)?;
    Ok(file_name(&sdist))
}

/// Builds an editable wheel into `output_dir` and returns its file name.
///
/// Editable installs rebuild on import, so the build directory must outlive
/// this invocation: when the user has not selected one, a persistent
/// `.mesonpy-build` directory inside the source tree is used. `metadata_dir`
/// is handled as in [`build_wheel`].
pub fn build_editable(
    source_dir: &Path,
    output_dir: &Path,
    settings: &ConfigSettings,
    metadata_dir: Option<&Path>,
) -> Result<String> {
    if let Some(metadata_dir) = metadata_dir {
        debug!(
            "Prepared metadata at {} will be superseded by freshly assembled metadata",
            metadata_dir.display()
        );
    }
    let mut settings = settings.clone();
    if settings.build_dir.is_none() {
        settings.build_dir = Some(source_dir.join(".mesonpy-build"));
    }
    let context = BuildContext::new(source_dir, &settings)?;
    let wheel = context.build_editable(output_dir)?;
    Ok(file_name(&wheel))
}

/// Writes the `.dist-info` directory ahead of a wheel build and returns its
/// name
pub fn prepare_metadata_for_build_wheel(
    source_dir: &Path,
    output_dir: &Path,
    settings: &ConfigSettings,
) -> Result<String> {
    let context = BuildContext::new(source_dir, settings)?;
    context.prepare_metadata(output_dir)
}

/// The extra requirements of a wheel build: a ninja when no usable one is
/// installed, and patchelf on Linux where the rewriter depends on it
pub fn get_requires_for_build_wheel(_settings: &ConfigSettings) -> Vec<String> {
    let mut requires = Vec::new();
    if meson::find_ninja().is_none() {
        requires.push("ninja".to_string());
    }
    if cfg!(target_os = "linux") && which::which("patchelf").is_err() {
        requires.push("patchelf".to_string());
    }
    requires
}

/// The extra requirements of an sdist build (`meson dist` compiles, so it
/// needs ninja too)
pub fn get_requires_for_build_sdist(_settings: &ConfigSettings) -> Vec<String> {
    if meson::find_ninja().is_none() {
        vec!["ninja".to_string()]
    } else {
        Vec::new()
    }
}

/// The extra requirements of an editable build, identical to a wheel build
pub fn get_requires_for_build_editable(settings: &ConfigSettings) -> Vec<String> {
    get_requires_for_build_wheel(settings)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
