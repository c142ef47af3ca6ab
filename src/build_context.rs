//! High level API for building wheels, sdists and editable wheels from a
//! Meson project.
//!
//! A [`BuildContext`] owns the invocation state: the loaded configuration,
//! the probed interpreter, the resolved tags, and the build directory. The
//! wheel pipeline runs strictly in order: setup, compile, introspect, map,
//! rewrite, package; each step observes the completed state of the previous
//! ones.

use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use fs_err as fs;
use tempfile::TempDir;
use tracing::debug;

use crate::config_settings::ConfigSettings;
use crate::editable::EditableLoader;
use crate::error::{Error, Result};
use crate::install_plan::{InstallFilters, InstallPlan, map_install_plan};
use crate::machine_files::{self, MachineFiles, ToolEnvironment};
use crate::meson::Meson;
use crate::metadata::Metadata;
use crate::module_writer::{
    ModuleWriter as _, SDistWriter, WheelWriter, rewrite_python_shebang, write_dist_info,
};
use crate::pyproject_toml::ProjectConfig;
use crate::python_interpreter::PythonInterpreter;
use crate::rewriter::Rewriter;
use crate::tags::{self, Os, ResolvedTags, TagEnvironment, WheelTag};

/// The state of one backend invocation
pub struct BuildContext {
    /// The loaded and merged project configuration
    pub config: ProjectConfig,
    /// The interpreter the wheel is built for
    pub interpreter: PythonInterpreter,
    /// The resolved wheel tags
    pub tags: ResolvedTags,
    /// The host operating system
    pub os: Os,
    meson: Meson,
    machine_files: MachineFiles,
    // Keeps the temporary build directory alive for the whole invocation;
    // dropped (and deleted) with the context on every exit path
    _temp_build_dir: Option<TempDir>,
}

impl BuildContext {
    /// Prepares an invocation for the project at `source_dir`.
    ///
    /// The build directory persists across invocations iff the user selected
    /// one through the `build-dir` config setting; otherwise a temporary
    /// directory scoped to this context is used.
    pub fn new(source_dir: &Path, settings: &ConfigSettings) -> Result<BuildContext> {
        let config = ProjectConfig::load(source_dir, settings)?;
        let interpreter = PythonInterpreter::from_path()?;
        let os = Os::host().ok_or_else(|| {
            Error::config(
                "/environment",
                format!("unsupported operating system `{}`", std::env::consts::OS),
            )
        })?;
        let tags = tags::resolve(&interpreter, os, config.limited_api, &TagEnvironment::capture())?;

        let (build_dir, temp_build_dir) = match &config.build_dir {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                (dunce::canonicalize(dir)?, None)
            }
            None => {
                let temp = tempfile::Builder::new().prefix(".mesonpy-").tempdir()?;
                (temp.path().to_path_buf(), Some(temp))
            }
        };
        debug!("Using build directory {}", build_dir.display());

        let machine_files = machine_files::write_machine_files(
            &build_dir,
            &interpreter,
            tags.cross.as_ref(),
            &ToolEnvironment::capture(),
        )?;
        let meson = Meson::new(&config, build_dir)?;

        Ok(BuildContext {
            config,
            interpreter,
            tags,
            os,
            meson,
            machine_files,
            _temp_build_dir: temp_build_dir,
        })
    }

    /// Configures the build directory
    fn setup(&self) -> Result<()> {
        self.meson.setup(&self.machine_files, self.config.setup_args())
    }

    /// Runs setup and returns assembled metadata, resolving a dynamic
    /// version from Meson's project info
    fn configure_and_assemble_metadata(&self) -> Result<Metadata> {
        self.setup()?;
        let project_info = self.meson.introspect_project_info()?;
        Metadata::from_pyproject(
            &self.config.pyproject,
            &self.config.source_dir,
            Some(&project_info.version),
        )
    }

    /// Maps the introspected install plan against the wheel layout
    fn mapped_plan(&self) -> Result<InstallPlan> {
        let introspected = self.meson.introspect_install_plan()?;
        let filters = InstallFilters::from_install_args(self.config.install_args());
        map_install_plan(
            &introspected,
            &self.config,
            &filters,
            self.os,
            &self.interpreter.ext_suffix,
            self.meson.build_dir(),
        )
    }

    /// Builds a wheel into `output_dir` and returns its path
    pub fn build_wheel(&self, output_dir: &Path) -> Result<PathBuf> {
        let metadata = self.configure_and_assemble_metadata()?;
        self.meson.compile(self.config.compile_args())?;
        let plan = self.mapped_plan()?;
        self.assemble_wheel(output_dir, &metadata, &plan)
    }

    /// Builds an editable wheel into `output_dir` and returns its path.
    ///
    /// The wheel contains only the loader stub; imports resolve against the
    /// source tree and the persistent build directory.
    pub fn build_editable(&self, output_dir: &Path) -> Result<PathBuf> {
        let metadata = self.configure_and_assemble_metadata()?;
        // compile now so the first import does not pay for a cold build
        self.meson.compile(self.config.compile_args())?;
        let plan = self.mapped_plan()?;

        let loader = EditableLoader::new(
            &metadata,
            &plan,
            self.meson.build_dir(),
            &self.meson.rebuild_command(self.config.compile_args()),
            self.config.editable_verbose,
        );

        let tag = self.wheel_tag(&plan);
        fs::create_dir_all(output_dir)?;
        let mut writer = WheelWriter::new(&tag, output_dir, &metadata)?;
        writer.add_bytes(loader.pth_file_name(), loader.pth_content.clone().into_bytes(), false)?;
        writer.add_bytes(
            loader.module_file_name(),
            loader.module_source.clone().into_bytes(),
            false,
        )?;
        let dist_info_dir = write_dist_info(
            &mut writer,
            &self.config.source_dir,
            &metadata,
            &tag,
            plan.is_pure(),
        )?;
        writer.finish(&dist_info_dir)
    }

    /// Builds a source distribution into `output_dir` and returns its path.
    ///
    /// `meson dist` produces the base archive (honoring version control and
    /// export-ignore attributes); re-packing normalizes it and injects the
    /// PKG-INFO metadata file.
    pub fn build_sdist(&self, output_dir: &Path) -> Result<PathBuf> {
        let metadata = self.configure_and_assemble_metadata()?;
        let archive = self.meson.dist(self.config.dist_args())?;

        // pin entry mtimes to the metadata file for reproducibility
        let mtime = fs::metadata(self.config.source_dir.join("pyproject.toml"))?
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0);

        fs::create_dir_all(output_dir)?;
        let root = format!(
            "{}-{}",
            metadata.get_distribution_escaped(),
            metadata.get_version_escaped()
        );
        let mut writer = SDistWriter::new(output_dir, &metadata, mtime)?;
        writer.add_bytes(
            Path::new(&root).join("PKG-INFO"),
            metadata.to_file_contents()?.into_bytes(),
            false,
        )?;
        writer.append_meson_dist(&archive, &root)?;
        writer.finish()
    }

    /// Writes the `.dist-info` directory into `output_dir` ahead of a wheel
    /// build and returns its name.
    ///
    /// Projects with a dynamic version need Meson configured; projects with
    /// fully static metadata skip Meson entirely.
    pub fn prepare_metadata(&self, output_dir: &Path) -> Result<String> {
        let metadata = if self.config.pyproject.has_dynamic_version() {
            self.configure_and_assemble_metadata()?
        } else {
            Metadata::from_pyproject(&self.config.pyproject, &self.config.source_dir, None)?
        };

        let dist_info_dir = metadata.get_dist_info_dir();
        let dist_info = output_dir.join(&dist_info_dir);
        fs::create_dir_all(&dist_info)?;
        fs::write(dist_info.join("METADATA"), metadata.to_file_contents()?)?;
        Ok(dist_info_dir.to_string_lossy().into_owned())
    }

    /// The tag triple of the produced wheel: platform-dependent content (or
    /// relocated internal libraries) forces the resolved platform triple,
    /// everything else ships as `py3-none-any`
    fn wheel_tag(&self, plan: &InstallPlan) -> WheelTag {
        if plan.is_pure() {
            WheelTag::pure()
        } else {
            self.tags.tag.clone()
        }
    }

    /// Packages a mapped install plan into a wheel archive
    fn assemble_wheel(
        &self,
        output_dir: &Path,
        metadata: &Metadata,
        plan: &InstallPlan,
    ) -> Result<PathBuf> {
        let pure = plan.is_pure();
        let tag = self.wheel_tag(plan);
        let data_dir = metadata.get_data_dir();
        let libs_dir = metadata.internal_libs_dir();

        fs::create_dir_all(output_dir)?;
        let mut writer = WheelWriter::new(&tag, output_dir, metadata)?;

        let rewriter = Rewriter::new(self.os, self.meson.build_dir(), plan, |file| {
            file.wheel_path(&data_dir, &libs_dir, pure)
        });
        // native artifacts are rewritten on staged copies; the build tree
        // stays untouched so rebuilds stay incremental
        let staging = tempfile::tempdir()?;

        for (index, file) in plan.files.iter().enumerate() {
            let target = file.wheel_path(&data_dir, &libs_dir, pure);
            let executable = file.executable();

            // scripts beginning with an interpreter line pointing at the
            // build's python get the wheel shebang convention instead
            if file.location == crate::install_plan::WheelLocation::Scripts {
                let data = fs::read(&file.source)?;
                if let Some(rewritten) = rewrite_python_shebang(&data) {
                    writer.add_bytes(&target, rewritten, true)?;
                    continue;
                }
            }

            if file.kind.is_native() && rewriter.is_needed() {
                let staged_dir = staging.path().join(index.to_string());
                fs::create_dir_all(&staged_dir)?;
                let staged = staged_dir.join(
                    file.source
                        .file_name()
                        .map(|name| name.to_os_string())
                        .unwrap_or_else(|| "artifact".into()),
                );
                fs::copy(&file.source, &staged)?;
                rewriter.rewrite(&staged, &target)?;
                writer.add_file(&target, &staged, executable)?;
            } else {
                writer.add_file(&target, &file.source, executable)?;
            }
        }

        let dist_info_dir =
            write_dist_info(&mut writer, &self.config.source_dir, metadata, &tag, pure)?;
        writer.finish(&dist_info_dir)
    }
}
