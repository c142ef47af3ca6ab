//! The editable wheel variant.
//!
//! An editable wheel installs only two files: a `.pth` entry naming a loader
//! module and the loader module itself. The loader is interpreter-level
//! source generated from a template with a handful of substitutions; at the
//! first import of any of the project's top-level packages it recompiles the
//! persistent build directory, resolves modules back to the source and
//! build trees, and answers data-file resource queries by reading the
//! source tree.

use std::collections::BTreeSet;
use std::path::Path;

use crate::install_plan::{InstallPlan, WheelLocation};
use crate::metadata::Metadata;

const LOADER_TEMPLATE: &str = include_str!("loader.py");

/// The generated loader module and its `.pth` hook
#[derive(Debug, Clone)]
pub struct EditableLoader {
    /// Module name, e.g. `_mesonpy_sample_loader`
    pub module_name: String,
    /// Rendered loader module source
    pub module_source: String,
    /// Content of the `.pth` file triggering the loader at startup
    pub pth_content: String,
}

impl EditableLoader {
    /// Renders the loader for one project.
    ///
    /// `rebuild_command` is the exact compile invocation of the Meson
    /// driver, so an editable import rebuilds precisely what a regular
    /// build would.
    pub fn new(
        metadata: &Metadata,
        plan: &InstallPlan,
        build_dir: &Path,
        rebuild_command: &[String],
        verbose: bool,
    ) -> EditableLoader {
        let module_name = format!("_mesonpy_{}_loader", metadata.get_distribution_escaped());
        let packages = top_level_names(plan);

        let module_source = LOADER_TEMPLATE
            .replace(
                "@PACKAGES@",
                &serde_json::to_string(&packages).expect("string set serializes"),
            )
            .replace(
                "@BUILD_DIR@",
                &serde_json::to_string(&build_dir.to_string_lossy()).expect("string serializes"),
            )
            .replace(
                "@REBUILD_COMMAND@",
                &serde_json::to_string(rebuild_command).expect("string list serializes"),
            )
            .replace("@VERBOSE@", if verbose { "True" } else { "False" });

        EditableLoader {
            pth_content: format!("import {module_name}\n"),
            module_name,
            module_source,
        }
    }

    /// The file name of the loader module inside the wheel
    pub fn module_file_name(&self) -> String {
        format!("{}.py", self.module_name)
    }

    /// The file name of the `.pth` hook inside the wheel
    pub fn pth_file_name(&self) -> String {
        format!("{}.pth", self.module_name)
    }
}

/// The top-level importable names of the install plan: first path components
/// of purelib and platlib entries, with module file suffixes stripped
fn top_level_names(plan: &InstallPlan) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for file in &plan.files {
        if !matches!(file.location, WheelLocation::Purelib | WheelLocation::Platlib) {
            continue;
        }
        let Some(std::path::Component::Normal(first)) = file.relative.components().next() else {
            continue;
        };
        let Some(first) = first.to_str() else { continue };
        // `pkg/...` keeps the package name, `module.py` or `module.<abi>.so`
        // strips everything after the first dot
        let name = match first.split_once('.') {
            Some((stem, _)) => stem,
            None => first,
        };
        if !name.is_empty() {
            names.insert(name.to_string());
        }
    }
    names
}
