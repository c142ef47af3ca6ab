//! A pyproject.toml as specified in PEP 517, plus the `[tool.meson-python]` table

use std::path::{Path, PathBuf};

use fs_err as fs;
use pyproject_toml::PyProjectToml as ProjectToml;
use serde::Deserialize;

use crate::config_settings::ConfigSettings;
use crate::error::{Error, Result};

/// The `[tool]` section of a pyproject.toml
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case")]
pub struct Tool {
    meson_python: Option<ToolMesonPython>,
}

/// Extra arguments for each Meson phase, `[tool.meson-python.args]`
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct MesonArgs {
    /// Appended to `meson setup`
    #[serde(default)]
    pub setup: Vec<String>,
    /// Appended to the compile step
    #[serde(default)]
    pub compile: Vec<String>,
    /// Appended to `meson install`
    #[serde(default)]
    pub install: Vec<String>,
    /// Appended to `meson dist`
    #[serde(default)]
    pub dist: Vec<String>,
}

/// Wheel content filters, `[tool.meson-python.wheel]`
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ToolWheel {
    /// Shell-style globs dropping files from the wheel
    #[serde(default)]
    pub exclude: Vec<String>,
    /// Shell-style globs rescuing files the exclude list dropped
    #[serde(default)]
    pub include: Vec<String>,
}

/// The `[tool.meson-python]` section of a pyproject.toml
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ToolMesonPython {
    #[serde(default)]
    args: MesonArgs,
    /// Build extension modules against the CPython limited API
    #[serde(default)]
    limited_api: bool,
    /// Permit relocating internal shared libraries on Windows. The package
    /// must extend the DLL search path at runtime itself.
    #[serde(default)]
    allow_windows_internal_shared_libs: bool,
    /// Meson executable to use instead of the one on PATH
    meson: Option<PathBuf>,
    #[serde(default)]
    wheel: ToolWheel,
}

/// A pyproject.toml as specified in PEP 517
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case")]
pub struct PyProjectToml {
    #[serde(flatten)]
    inner: ProjectToml,
    /// The `[tool]` table; we read `[tool.meson-python]`
    pub tool: Option<Tool>,
}

impl std::ops::Deref for PyProjectToml {
    type Target = ProjectToml;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl PyProjectToml {
    /// Parses the pyproject.toml in `source_dir`
    pub fn open(source_dir: impl AsRef<Path>) -> Result<PyProjectToml> {
        let path = source_dir.as_ref().join("pyproject.toml");
        let contents = fs::read_to_string(&path)?;
        toml::from_str(&contents).map_err(|err| Error::Config {
            pointer: String::new(),
            message: format!("{}: {err}", path.display()),
        })
    }

    /// Returns the values of `[tool.meson-python]`, if present
    #[inline]
    pub fn meson_python(&self) -> Option<&ToolMesonPython> {
        self.tool.as_ref()?.meson_python.as_ref()
    }

    /// Returns the value of `[project.name]`
    pub fn project_name(&self) -> Option<&str> {
        self.project.as_ref().map(|project| project.name.as_str())
    }

    /// Whether `[project.dynamic]` marks the version as provided by Meson
    pub fn has_dynamic_version(&self) -> bool {
        self.project
            .as_ref()
            .and_then(|project| project.dynamic.as_ref())
            .is_some_and(|dynamic| dynamic.iter().any(|field| field == "version"))
    }
}

/// Everything the build pipeline needs to know about an invocation.
///
/// Declared project configuration merged with the front-end's config
/// settings. Immutable once constructed; per-phase argument lists already
/// have the config-settings extras appended.
#[derive(Debug, Clone)]
pub struct ProjectConfig {
    /// The parsed pyproject.toml
    pub pyproject: PyProjectToml,
    /// Root of the source tree (the directory holding pyproject.toml)
    pub source_dir: PathBuf,
    /// Persistent build directory, when the user selected one
    pub build_dir: Option<PathBuf>,
    /// Build extension modules against the CPython limited API
    pub limited_api: bool,
    /// Windows internal shared library opt-in
    pub allow_windows_internal_shared_libs: bool,
    /// Meson executable override from `[tool.meson-python.meson]`
    pub meson: Option<PathBuf>,
    /// Stream editable rebuild output
    pub editable_verbose: bool,
    /// Compiled wheel exclude patterns
    pub wheel_exclude: Vec<glob::Pattern>,
    /// Compiled wheel include patterns
    pub wheel_include: Vec<glob::Pattern>,
    args: MesonArgs,
}

impl ProjectConfig {
    /// Loads the project configuration for `source_dir`, overlaying the
    /// front-end's config settings.
    pub fn load(source_dir: impl AsRef<Path>, settings: &ConfigSettings) -> Result<ProjectConfig> {
        let source_dir = dunce::canonicalize(source_dir.as_ref())?;
        let pyproject = PyProjectToml::open(&source_dir)?;
        let tool = pyproject.meson_python().cloned().unwrap_or_default();

        let mut args = tool.args;
        args.setup.extend(settings.setup_args.iter().cloned());
        args.compile.extend(settings.compile_args.iter().cloned());
        args.install.extend(settings.install_args.iter().cloned());
        args.dist.extend(settings.dist_args.iter().cloned());

        let wheel_exclude = compile_globs("/tool/meson-python/wheel/exclude", &tool.wheel.exclude)?;
        let wheel_include = compile_globs("/tool/meson-python/wheel/include", &tool.wheel.include)?;

        Ok(ProjectConfig {
            pyproject,
            source_dir,
            build_dir: settings.build_dir.clone(),
            limited_api: tool.limited_api,
            allow_windows_internal_shared_libs: tool.allow_windows_internal_shared_libs,
            meson: tool.meson,
            editable_verbose: settings.editable_verbose,
            wheel_exclude,
            wheel_include,
            args,
        })
    }

    /// The composed argument list for a Meson phase: declared
    /// `[tool.meson-python.args]` first, per-invocation settings after.
    pub fn setup_args(&self) -> &[String] {
        &self.args.setup
    }

    /// See [`ProjectConfig::setup_args`]
    pub fn compile_args(&self) -> &[String] {
        &self.args.compile
    }

    /// See [`ProjectConfig::setup_args`]
    pub fn install_args(&self) -> &[String] {
        &self.args.install
    }

    /// See [`ProjectConfig::setup_args`]
    pub fn dist_args(&self) -> &[String] {
        &self.args.dist
    }
}

fn compile_globs(pointer: &str, patterns: &[String]) -> Result<Vec<glob::Pattern>> {
    patterns
        .iter()
        .map(|pattern| {
            glob::Pattern::new(pattern)
                .map_err(|err| Error::config(pointer, format!("invalid glob `{pattern}`: {err}")))
        })
        .collect()
}
