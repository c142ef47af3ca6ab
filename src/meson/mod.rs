//! Driving the external Meson binary.
//!
//! Meson is always invoked as a subprocess over its stable command-line
//! protocol; build state is read back from the introspection JSON it deposits
//! in the build directory. This keeps the backend independent from Meson's
//! internal APIs and lets the user point us at any Meson installation.

use std::env;
use std::io::{self, IsTerminal as _};
use std::path::{Path, PathBuf};
use std::process::Command;

use fs_err as fs;
use indexmap::IndexMap;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::error::{Error, MesonPhase, Result};
use crate::machine_files::MachineFiles;
use crate::pyproject_toml::ProjectConfig;

/// The minimum Meson version implementing the `intro-install_plan.json`
/// introspection contract we rely on
const MINIMUM_MESON_VERSION: (u64, u64, u64) = (0, 63, 3);

/// The minimum usable ninja; older versions predate the tools we need
const MINIMUM_NINJA_VERSION: (u64, u64, u64) = (1, 8, 2);

/// Handle on a located and version-checked Meson binary, bound to one
/// source/build directory pair
#[derive(Debug, Clone)]
pub struct Meson {
    executable: PathBuf,
    source_dir: PathBuf,
    build_dir: PathBuf,
    ninja: Option<PathBuf>,
}

impl Meson {
    /// Locates Meson (configuration override wins over the `MESON`
    /// environment variable, which wins over PATH), checks its version, and
    /// binds it to the given directories.
    pub fn new(
        config: &ProjectConfig,
        build_dir: impl Into<PathBuf>,
    ) -> Result<Meson> {
        let executable = find_meson(config.meson.as_deref())?;

        let version = query_version(&executable, MesonPhase::Setup)?;
        if version < MINIMUM_MESON_VERSION {
            return Err(Error::config(
                "/tool/meson-python/meson",
                format!(
                    "meson {}.{}.{} is too old, at least {}.{}.{} is required",
                    version.0,
                    version.1,
                    version.2,
                    MINIMUM_MESON_VERSION.0,
                    MINIMUM_MESON_VERSION.1,
                    MINIMUM_MESON_VERSION.2,
                ),
            ));
        }

        Ok(Meson {
            executable,
            source_dir: config.source_dir.clone(),
            build_dir: build_dir.into(),
            ninja: find_ninja(),
        })
    }

    /// The build directory this driver operates on
    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    /// Configures the build directory. Passes `--reconfigure` iff the build
    /// directory already holds a valid Meson configuration.
    #[instrument(skip_all)]
    pub fn setup(&self, machine_files: &MachineFiles, extra_args: &[String]) -> Result<()> {
        let mut command = Command::new(&self.executable);
        command
            .arg("setup")
            .arg(&self.build_dir)
            .arg(&self.source_dir)
            .arg("--native-file")
            .arg(&machine_files.native_file);
        if let Some(cross_file) = &machine_files.cross_file {
            command.arg("--cross-file").arg(cross_file);
        }
        command
            .arg("-Dbuildtype=release")
            .arg("-Db_ndebug=if-release");
        if cfg!(windows) {
            command.arg("-Db_vscrt=md");
        }
        command.args(extra_args);
        if self
            .build_dir
            .join("meson-private")
            .join("coredata.dat")
            .exists()
        {
            command.arg("--reconfigure");
        }

        self.run(MesonPhase::Setup, command)
    }

    /// Runs the compile step: ninja directly on Unix, `meson compile` on
    /// Windows so the MSVC environment gets activated.
    #[instrument(skip_all)]
    pub fn compile(&self, extra_args: &[String]) -> Result<()> {
        let command = self.compile_command(extra_args);
        self.run(MesonPhase::Compile, command)
    }

    fn compile_command(&self, extra_args: &[String]) -> Command {
        if cfg!(windows) {
            let mut command = Command::new(&self.executable);
            command.arg("compile").arg("-C").arg(&self.build_dir);
            if !extra_args.is_empty() {
                // meson evaluates this as a list literal
                let ninja_args = extra_args
                    .iter()
                    .map(|arg| format!("'{}'", arg.replace('\'', "\\'")))
                    .collect::<Vec<_>>()
                    .join(", ");
                command.arg(format!("--ninja-args=[{ninja_args}]"));
            }
            command
        } else {
            let ninja = self.ninja.clone().unwrap_or_else(|| PathBuf::from("ninja"));
            let mut command = Command::new(ninja);
            command.arg("-C").arg(&self.build_dir).args(extra_args);
            command
        }
    }

    /// The compile invocation as a command line, embedded into editable
    /// wheels so an import rebuilds exactly what a regular build would
    pub fn rebuild_command(&self, extra_args: &[String]) -> Vec<String> {
        let command = self.compile_command(extra_args);
        std::iter::once(command.get_program())
            .chain(command.get_args())
            .map(|part| part.to_string_lossy().into_owned())
            .collect()
    }

    /// Stages the install tree into `destdir` without rebuilding
    #[instrument(skip_all)]
    pub fn install(&self, destdir: &Path, extra_args: &[String]) -> Result<()> {
        let mut command = Command::new(&self.executable);
        command
            .arg("install")
            .arg("-C")
            .arg(&self.build_dir)
            .arg("--destdir")
            .arg(destdir)
            .arg("--no-rebuild")
            .arg("--quiet")
            .args(extra_args);
        self.run(MesonPhase::Install, command)
    }

    /// Runs `meson dist` and returns the path of the produced gzipped
    /// tarball of the source tree
    #[instrument(skip_all)]
    pub fn dist(&self, extra_args: &[String]) -> Result<PathBuf> {
        let mut command = Command::new(&self.executable);
        command
            .arg("dist")
            .arg("-C")
            .arg(&self.build_dir)
            .arg("--no-tests")
            .arg("--allow-dirty")
            .arg("--formats")
            .arg("gztar")
            .arg("--include-subprojects")
            .args(extra_args);
        self.run(MesonPhase::Dist, command)?;

        let project = self.introspect_project_info()?;
        let archive = self
            .build_dir
            .join("meson-dist")
            .join(format!("{}-{}.tar.gz", project.descriptive_name, project.version));
        if !archive.is_file() {
            return Err(Error::meson(
                MesonPhase::Dist,
                format!("expected archive at {} was not produced", archive.display()),
            ));
        }
        Ok(archive)
    }

    /// Reads the install plan Meson deposited during setup
    pub fn introspect_install_plan(&self) -> Result<IntrospectedInstallPlan> {
        self.read_introspection("intro-install_plan.json")
    }

    /// Reads the project name, version and subproject listing
    pub fn introspect_project_info(&self) -> Result<ProjectInfo> {
        self.read_introspection("intro-projectinfo.json")
    }

    fn read_introspection<T: serde::de::DeserializeOwned>(&self, file_name: &str) -> Result<T> {
        let path = self.build_dir.join("meson-info").join(file_name);
        let contents = fs::read_to_string(&path).map_err(|err| {
            Error::meson(
                MesonPhase::Introspect,
                format!("missing introspection data, did setup run? {err}"),
            )
        })?;
        serde_json::from_str(&contents).map_err(|err| {
            Error::meson(
                MesonPhase::Introspect,
                format!("malformed {}: {err}", path.display()),
            )
        })
    }

    /// Runs a phase command, streaming output when attached to a terminal
    /// and capturing it otherwise
    fn run(&self, phase: MesonPhase, mut command: Command) -> Result<()> {
        debug!("Running {command:?}");
        if io::stderr().is_terminal() {
            let status = command.status()?;
            if !status.success() {
                return Err(Error::meson(phase, format!("exited with {status}")));
            }
        } else {
            let output = command.output()?;
            if !output.status.success() {
                return Err(Error::meson(
                    phase,
                    format!(
                        "exited with {}\n{}",
                        output.status,
                        String::from_utf8_lossy(&output.stderr)
                    ),
                ));
            }
        }
        Ok(())
    }
}

/// Locates the Meson executable. The configuration override wins over the
/// `MESON` environment variable, which wins over PATH.
fn find_meson(configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = configured {
        return Ok(path.to_path_buf());
    }
    if let Some(path) = env::var_os("MESON") {
        return Ok(PathBuf::from(path));
    }
    which::which("meson").map_err(|err| {
        io::Error::new(io::ErrorKind::NotFound, format!("meson not found: {err}")).into()
    })
}

/// Locates a usable ninja, honoring the `NINJA` environment variable.
/// Returns `None` when nothing usable is found; callers decide whether that
/// is fatal (compiling) or a build requirement (`get_requires`).
pub fn find_ninja() -> Option<PathBuf> {
    let candidate = env::var_os("NINJA")
        .map(PathBuf::from)
        .or_else(|| which::which("ninja").ok())?;
    let version = query_version(&candidate, MesonPhase::Compile).ok()?;
    (version >= MINIMUM_NINJA_VERSION).then_some(candidate)
}

/// Runs `<tool> --version` and parses the leading version triple
fn query_version(executable: &Path, phase: MesonPhase) -> Result<(u64, u64, u64)> {
    let output = Command::new(executable).arg("--version").output()?;
    if !output.status.success() {
        return Err(Error::meson(
            phase,
            format!("{} --version failed", executable.display()),
        ));
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_version(stdout.trim()).ok_or_else(|| {
        Error::meson(
            phase,
            format!(
                "could not parse version from `{}` reported by {}",
                stdout.trim(),
                executable.display()
            ),
        )
    })
}

/// Parses a `major.minor[.patch]` prefix, ignoring any suffix such as
/// `1.11.1.git.kitware.jobserver-1`
fn parse_version(version: &str) -> Option<(u64, u64, u64)> {
    let mut parts = version.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts
        .next()
        .map_or(Some(0), |patch| {
            patch
                .chars()
                .take_while(char::is_ascii_digit)
                .collect::<String>()
                .parse()
                .ok()
        })?;
    Some((major, minor, patch))
}

/// One file of the introspected install plan, still in placeholder form
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct IntrospectedEntry {
    /// Destination as `{placeholder}/relative/path`
    pub destination: String,
    /// Meson install tag, e.g. `runtime`, `python-runtime`, `devel`
    #[serde(default)]
    pub tag: Option<String>,
    /// Name of the subproject that produced the file, absent for the main
    /// project
    #[serde(default)]
    pub subproject: Option<String>,
}

/// The contents of `intro-install_plan.json`: category (`targets`, `python`,
/// `data`, `headers`, `man`, `install_subdirs`, ...) to source path to entry
#[derive(Deserialize, Debug, Clone, Default)]
pub struct IntrospectedInstallPlan(pub IndexMap<String, IndexMap<PathBuf, IntrospectedEntry>>);

/// The contents of `intro-projectinfo.json`
#[derive(Deserialize, Debug, Clone)]
pub struct ProjectInfo {
    /// The project name as declared in `meson.build`
    pub descriptive_name: String,
    /// The project version
    pub version: String,
    /// Declared subprojects
    #[serde(default)]
    pub subprojects: Vec<SubprojectInfo>,
}

/// One subproject from the project info introspection
#[derive(Deserialize, Debug, Clone)]
pub struct SubprojectInfo {
    /// The subproject name, matching install plan `subproject` fields
    pub name: String,
}
