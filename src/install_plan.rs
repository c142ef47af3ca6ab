//! Mapping Meson's install plan onto the wheel layout.
//!
//! Meson expresses install destinations as `{placeholder}/relative` paths.
//! A single declarative table maps each placeholder to a wheel location;
//! everything else in this module is filtering and invariant checking on top
//! of that table.

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::meson::{IntrospectedEntry, IntrospectedInstallPlan};
use crate::pyproject_toml::ProjectConfig;
use crate::tags::Os;

/// What an installed file is, derived from its introspection category and
/// its destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum FileKind {
    Executable,
    SharedLibrary,
    StaticLibrary,
    Header,
    Man,
    Data,
    PythonSource,
    ExtensionModule,
    Generic,
}

impl FileKind {
    /// Native artifacts get their dynamic-linker search path rewritten
    pub fn is_native(&self) -> bool {
        matches!(
            self,
            FileKind::Executable | FileKind::SharedLibrary | FileKind::ExtensionModule
        )
    }
}

/// Where a file lands inside the wheel
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[allow(missing_docs)]
pub enum WheelLocation {
    Purelib,
    Platlib,
    Scripts,
    Headers,
    Data,
    /// The hidden `.{distname}.mesonpy.libs` directory for shared libraries
    /// that originally targeted the system library directory
    InternalLibs,
}

/// One file Meson would install, classified against the wheel layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedFile {
    /// Path in the build or source tree to read the content from
    pub source: PathBuf,
    /// The original Meson destination, placeholder form
    pub destination: String,
    /// Location within the wheel
    pub location: WheelLocation,
    /// Path relative to the location root
    pub relative: PathBuf,
    /// Classification of the file
    pub kind: FileKind,
    /// Meson install tags; may be empty
    pub tags: BTreeSet<String>,
    /// Subproject the file originates from, absent for the main project
    pub subproject: Option<String>,
}

impl MappedFile {
    /// The path of this file inside the wheel archive.
    ///
    /// The wheel root holds platlib content (`Root-Is-Purelib: false`)
    /// unless the wheel is pure; everything else nests under the
    /// `{distribution}-{version}.data` directory or the hidden internal
    /// library directory.
    pub fn wheel_path(&self, data_dir: &Path, libs_dir: &Path, pure: bool) -> PathBuf {
        match self.location {
            WheelLocation::Platlib => self.relative.clone(),
            WheelLocation::Purelib => {
                if pure {
                    self.relative.clone()
                } else {
                    data_dir.join("purelib").join(&self.relative)
                }
            }
            WheelLocation::Scripts => data_dir.join("scripts").join(&self.relative),
            WheelLocation::Headers => data_dir.join("headers").join(&self.relative),
            WheelLocation::Data => data_dir.join("data").join(&self.relative),
            WheelLocation::InternalLibs => libs_dir.join(&self.relative),
        }
    }

    /// Whether the packaged file keeps an executable mode
    pub fn executable(&self) -> bool {
        if matches!(self.kind, FileKind::Executable) || self.location == WheelLocation::Scripts {
            return true;
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt as _;
            if let Ok(metadata) = self.source.metadata() {
                return metadata.permissions().mode() & 0o100 == 0o100;
            }
        }
        false
    }
}

/// The fully mapped and validated install plan
#[derive(Debug, Clone)]
pub struct InstallPlan {
    /// Mapped files, ordered by location and relative path
    pub files: Vec<MappedFile>,
    /// Whether anything outside purelib forces a platform tag
    pub platform_dependent: bool,
}

impl InstallPlan {
    /// Whether the wheel needs the hidden internal library directory
    pub fn has_internal_libs(&self) -> bool {
        self.files
            .iter()
            .any(|file| file.location == WheelLocation::InternalLibs)
    }

    /// A wheel is pure iff nothing maps outside purelib
    pub fn is_pure(&self) -> bool {
        !self.platform_dependent
    }
}

/// Which subprojects `--skip-subprojects` drops
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SkipSubprojects {
    /// Flag absent
    #[default]
    None,
    /// Bare `--skip-subprojects`: drop every subproject file
    All,
    /// `--skip-subprojects=a,b`
    Named(Vec<String>),
}

impl SkipSubprojects {
    fn drops(&self, subproject: Option<&str>) -> bool {
        match (self, subproject) {
            (SkipSubprojects::None, _) | (_, None) => false,
            (SkipSubprojects::All, Some(_)) => true,
            (SkipSubprojects::Named(names), Some(name)) => {
                names.iter().any(|skip| skip == name)
            }
        }
    }
}

/// Install-phase filters recovered from the user's install arguments
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallFilters {
    /// `--tags=a,b`: retain only entries whose tag set intersects
    pub tags: Option<Vec<String>>,
    /// `--skip-subprojects[=a,b]`
    pub skip_subprojects: SkipSubprojects,
}

impl InstallFilters {
    /// Parses `--tags` and `--skip-subprojects` out of the install argument
    /// list; every other argument is passed through to Meson untouched.
    pub fn from_install_args(args: &[String]) -> InstallFilters {
        let mut filters = InstallFilters::default();
        let mut args = args.iter().peekable();
        while let Some(arg) = args.next() {
            if let Some(value) = arg.strip_prefix("--tags=") {
                filters.tags = Some(split_list(value));
            } else if arg == "--tags" {
                if let Some(value) = args.peek() {
                    filters.tags = Some(split_list(value));
                    args.next();
                }
            } else if let Some(value) = arg.strip_prefix("--skip-subprojects=") {
                filters.skip_subprojects = SkipSubprojects::Named(split_list(value));
            } else if arg == "--skip-subprojects" {
                filters.skip_subprojects = SkipSubprojects::All;
            }
        }
        filters
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(String::from)
        .collect()
}

/// The placeholder mapping table. Returns the wheel location and the prefix
/// the relative path keeps inside that location.
fn placeholder_location(placeholder: &str) -> Option<(WheelLocation, &'static str)> {
    match placeholder {
        "py_purelib" => Some((WheelLocation::Purelib, "")),
        "py_platlib" => Some((WheelLocation::Platlib, "")),
        "bindir" => Some((WheelLocation::Scripts, "")),
        "includedir" => Some((WheelLocation::Headers, "")),
        "libdir_shared" => Some((WheelLocation::InternalLibs, "")),
        // the wheel data directory mirrors the install prefix
        "datadir" => Some((WheelLocation::Data, "share")),
        "mandir" => Some((WheelLocation::Data, "share/man")),
        _ => None,
    }
}

/// Splits a destination of the form `{placeholder}/relative/path`
fn split_destination(destination: &str) -> Option<(&str, &str)> {
    let rest = destination.strip_prefix('{')?;
    let (placeholder, relative) = rest.split_once('}')?;
    Some((placeholder, relative.trim_start_matches(['/', '\\'])))
}

/// Classifies a file from its introspection category, destination and name
fn classify(category: &str, location: WheelLocation, file_name: &str, ext_suffix: &str) -> FileKind {
    match category {
        "python" => FileKind::PythonSource,
        "headers" => FileKind::Header,
        "man" => FileKind::Man,
        "data" | "install_subdirs" => FileKind::Data,
        "targets" => {
            if file_name.ends_with(ext_suffix)
                && matches!(location, WheelLocation::Platlib | WheelLocation::Purelib)
            {
                FileKind::ExtensionModule
            } else if file_name.ends_with(".a") || file_name.ends_with(".lib") {
                FileKind::StaticLibrary
            } else if file_name.contains(".so")
                || file_name.ends_with(".dylib")
                || file_name.ends_with(".dll")
                || file_name.ends_with(".pyd")
            {
                // ".so" may carry a version suffix, e.g. libfoo.so.1.2
                if matches!(location, WheelLocation::Platlib | WheelLocation::Purelib)
                    && (file_name.ends_with(".so") || file_name.ends_with(".pyd"))
                    && file_name.matches('.').count() > 1
                {
                    // e.g. foo.cpython-311-x86_64-linux-gnu.so with an
                    // abbreviated suffix on limited-api builds
                    FileKind::ExtensionModule
                } else {
                    FileKind::SharedLibrary
                }
            } else if location == WheelLocation::Scripts {
                FileKind::Executable
            } else {
                FileKind::Generic
            }
        }
        _ => FileKind::Generic,
    }
}

/// Maps the introspected install plan onto the wheel layout and enforces the
/// layout invariants. Rebuilding the plan is cheap relative to compilation,
/// so this runs from scratch on every invocation.
pub fn map_install_plan(
    plan: &IntrospectedInstallPlan,
    config: &ProjectConfig,
    filters: &InstallFilters,
    os: Os,
    ext_suffix: &str,
    build_dir: &Path,
) -> Result<InstallPlan> {
    let mut files = Vec::new();

    for (category, entries) in &plan.0 {
        for (source, entry) in entries {
            if source.is_dir() {
                // install_subdir() entries name a directory; walk it so
                // every contained file is classified individually
                for child in WalkDir::new(source).sort_by_file_name() {
                    let child = child.map_err(io::Error::from)?;
                    if !child.file_type().is_file() && !child.file_type().is_symlink() {
                        continue;
                    }
                    let below = child.path().strip_prefix(source).expect("walkdir below root");
                    let destination = format!(
                        "{}/{}",
                        entry.destination.trim_end_matches('/'),
                        below.to_string_lossy().replace('\\', "/")
                    );
                    if let Some(file) =
                        map_entry(category, child.path(), &destination, entry, ext_suffix)?
                    {
                        files.push(file);
                    }
                }
            } else if let Some(file) =
                map_entry(category, source, &entry.destination, entry, ext_suffix)?
            {
                files.push(file);
            }
        }
    }

    // exclude first, include rescues afterwards
    files.retain(|file| {
        let relative = file.relative.to_string_lossy();
        let excluded = config
            .wheel_exclude
            .iter()
            .any(|pattern| pattern.matches(&relative));
        let included = config
            .wheel_include
            .iter()
            .any(|pattern| pattern.matches(&relative));
        if excluded && !included {
            debug!("Excluding {} from the wheel", file.relative.display());
            false
        } else {
            true
        }
    });

    if let Some(tags) = &filters.tags {
        files.retain(|file| file.tags.iter().any(|tag| tags.contains(tag)));
    }
    files.retain(|file| !filters.skip_subprojects.drops(file.subproject.as_deref()));

    for file in &mut files {
        resolve_symlink(file, &config.source_dir, build_dir)?;
    }

    check_split_packages(&files)?;

    let platform_dependent = files
        .iter()
        .any(|file| file.location != WheelLocation::Purelib);

    if os == Os::Windows
        && !config.allow_windows_internal_shared_libs
        && files
            .iter()
            .any(|file| file.location == WheelLocation::InternalLibs)
    {
        return Err(Error::WindowsInternalLibForbidden);
    }

    files.sort_by(|a, b| {
        (a.location, &a.relative).cmp(&(b.location, &b.relative))
    });

    Ok(InstallPlan {
        files,
        platform_dependent,
    })
}

fn map_entry(
    category: &str,
    source: &Path,
    destination: &str,
    entry: &IntrospectedEntry,
    ext_suffix: &str,
) -> Result<Option<MappedFile>> {
    let unmapped = || Error::UnmappedFile {
        source_path: source.to_path_buf(),
        destination: destination.to_string(),
    };

    let (placeholder, relative) = split_destination(destination).ok_or_else(unmapped)?;

    if placeholder == "libdir_static" {
        eprintln!(
            "⚠️  Warning: skipping static library `{relative}`, static libraries cannot be shipped in wheels"
        );
        return Ok(None);
    }

    let (location, prefix) = placeholder_location(placeholder).ok_or_else(unmapped)?;
    if relative.is_empty() {
        return Err(unmapped());
    }

    let relative = if prefix.is_empty() {
        PathBuf::from(relative)
    } else {
        Path::new(prefix).join(relative)
    };

    let file_name = source.file_name().map(|name| name.to_string_lossy());
    let kind = classify(
        category,
        location,
        file_name.as_deref().unwrap_or_default(),
        ext_suffix,
    );

    Ok(Some(MappedFile {
        source: source.to_path_buf(),
        destination: destination.to_string(),
        location,
        relative,
        kind,
        tags: entry.tags(),
        subproject: entry.subproject.clone(),
    }))
}

/// Symlinks inside the source or build tree are materialized as the file
/// they point at; links escaping both trees fail the build.
fn resolve_symlink(file: &mut MappedFile, source_dir: &Path, build_dir: &Path) -> Result<()> {
    if !file.source.is_symlink() {
        return Ok(());
    }
    let resolved = dunce::canonicalize(&file.source)?;
    if !resolved.starts_with(source_dir) && !resolved.starts_with(build_dir) {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "symlink `{}` points outside the source tree to `{}`",
                file.source.display(),
                resolved.display()
            ),
        )
        .into());
    }
    file.source = resolved;
    Ok(())
}

/// No top-level Python package may appear in both purelib and platlib;
/// installers are free to place the two locations on different paths, which
/// would tear such a package apart.
fn check_split_packages(files: &[MappedFile]) -> Result<()> {
    let mut top_level: BTreeMap<&str, BTreeSet<WheelLocation>> = BTreeMap::new();
    for file in files {
        if !matches!(file.location, WheelLocation::Purelib | WheelLocation::Platlib) {
            continue;
        }
        if let Some(std::path::Component::Normal(first)) = file.relative.components().next() {
            if let Some(name) = first.to_str() {
                top_level.entry(name).or_default().insert(file.location);
            }
        }
    }
    for (name, locations) in top_level {
        if locations.len() > 1 {
            return Err(Error::SplitPackage {
                package: name.to_string(),
            });
        }
    }
    Ok(())
}

impl IntrospectedEntry {
    /// The entry's install tags as a set; Meson reports at most one
    pub fn tags(&self) -> BTreeSet<String> {
        self.tag.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use fs_err as fs;
    use indoc::{formatdoc, indoc};
    use pretty_assertions::assert_eq;

    use crate::config_settings::ConfigSettings;

    use super::*;

    const EXT_SUFFIX: &str = ".cpython-311-x86_64-linux-gnu.so";

    fn config_with(dir: &Path, tool: &str) -> ProjectConfig {
        fs::write(
            dir.join("pyproject.toml"),
            formatdoc! {r#"
                [project]
                name = "sample"
                version = "1.0.0"

                {tool}
            "#},
        )
        .unwrap();
        ProjectConfig::load(dir, &ConfigSettings::default()).unwrap()
    }

    fn plan(json: &str) -> IntrospectedInstallPlan {
        serde_json::from_str(json).unwrap()
    }

    fn map(
        plan_json: &str,
        config: &ProjectConfig,
        filters: &InstallFilters,
        os: Os,
    ) -> Result<InstallPlan> {
        let build_dir = config.source_dir.join("build");
        map_install_plan(
            &plan(plan_json),
            config,
            filters,
            os,
            EXT_SUFFIX,
            &build_dir,
        )
    }

    const PURE_PLAN: &str = r#"{
        "python": {
            "/src/mypkg/__init__.py": {
                "destination": "{py_purelib}/mypkg/__init__.py",
                "tag": "python-runtime"
            },
            "/src/mypkg/util.py": {
                "destination": "{py_purelib}/mypkg/util.py",
                "tag": "python-runtime"
            }
        }
    }"#;

    #[test]
    fn pure_project_maps_to_purelib() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with(dir.path(), "");
        let plan = map(PURE_PLAN, &config, &InstallFilters::default(), Os::Linux).unwrap();

        assert!(plan.is_pure());
        assert!(!plan.has_internal_libs());
        assert_eq!(plan.files.len(), 2);
        assert!(
            plan.files
                .iter()
                .all(|file| file.location == WheelLocation::Purelib
                    && file.kind == FileKind::PythonSource)
        );
    }

    #[test]
    fn mapping_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with(dir.path(), "");
        let first = map(PURE_PLAN, &config, &InstallFilters::default(), Os::Linux).unwrap();
        let second = map(PURE_PLAN, &config, &InstallFilters::default(), Os::Linux).unwrap();
        assert_eq!(first.files, second.files);
    }

    #[test]
    fn extension_module_is_platform_dependent() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with(dir.path(), "");
        let plan = map(
            &format!(
                r#"{{
                    "targets": {{
                        "/build/mypkg/_native{EXT_SUFFIX}": {{
                            "destination": "{{py_platlib}}/mypkg/_native{EXT_SUFFIX}",
                            "tag": "runtime"
                        }}
                    }}
                }}"#
            ),
            &config,
            &InstallFilters::default(),
            Os::Linux,
        )
        .unwrap();

        assert!(!plan.is_pure());
        let file = &plan.files[0];
        assert_eq!(file.kind, FileKind::ExtensionModule);
        assert_eq!(file.location, WheelLocation::Platlib);
        assert_eq!(
            file.relative,
            PathBuf::from(format!("mypkg/_native{EXT_SUFFIX}"))
        );
    }

    #[test]
    fn shared_library_targeting_libdir_goes_to_internal_libs() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with(dir.path(), "");
        let plan = map(
            r#"{
                "targets": {
                    "/build/libfoo.so": {
                        "destination": "{libdir_shared}/libfoo.so",
                        "tag": "runtime"
                    }
                }
            }"#,
            &config,
            &InstallFilters::default(),
            Os::Linux,
        )
        .unwrap();

        assert!(plan.has_internal_libs());
        assert!(!plan.is_pure());
        assert_eq!(plan.files[0].kind, FileKind::SharedLibrary);
    }

    #[test]
    fn internal_libs_forbidden_on_windows_without_opt_in() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with(dir.path(), "");
        let err = map(
            r#"{
                "targets": {
                    "/build/foo.dll": {
                        "destination": "{libdir_shared}/foo.dll",
                        "tag": "runtime"
                    }
                }
            }"#,
            &config,
            &InstallFilters::default(),
            Os::Windows,
        )
        .unwrap_err();
        assert!(matches!(err, Error::WindowsInternalLibForbidden), "{err}");
    }

    #[test]
    fn internal_libs_allowed_on_windows_with_opt_in() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with(
            dir.path(),
            "[tool.meson-python]\nallow-windows-internal-shared-libs = true",
        );
        let plan = map(
            r#"{
                "targets": {
                    "/build/foo.dll": {
                        "destination": "{libdir_shared}/foo.dll",
                        "tag": "runtime"
                    }
                }
            }"#,
            &config,
            &InstallFilters::default(),
            Os::Windows,
        )
        .unwrap();
        assert!(plan.has_internal_libs());
    }

    #[test]
    fn static_library_dropped_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with(dir.path(), "");
        let plan = map(
            r#"{
                "targets": {
                    "/build/libfoo.a": {
                        "destination": "{libdir_static}/libfoo.a",
                        "tag": "devel"
                    }
                }
            }"#,
            &config,
            &InstallFilters::default(),
            Os::Linux,
        )
        .unwrap();
        assert!(plan.files.is_empty());
        assert!(plan.is_pure());
    }

    #[test]
    fn unrecognized_placeholder_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with(dir.path(), "");
        let err = map(
            r#"{
                "data": {
                    "/src/weird.cfg": {
                        "destination": "{sysconfdir}/weird.cfg",
                        "tag": null
                    }
                }
            }"#,
            &config,
            &InstallFilters::default(),
            Os::Linux,
        )
        .unwrap_err();
        match err {
            Error::UnmappedFile {
                source_path,
                destination,
            } => {
                assert_eq!(source_path, PathBuf::from("/src/weird.cfg"));
                assert_eq!(destination, "{sysconfdir}/weird.cfg");
            }
            other => panic!("expected UnmappedFile, got {other}"),
        }
    }

    #[test]
    fn split_package_detected() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with(dir.path(), "");
        let err = map(
            &format!(
                r#"{{
                    "python": {{
                        "/src/mypkg/a.py": {{
                            "destination": "{{py_purelib}}/mypkg/a.py",
                            "tag": "python-runtime"
                        }}
                    }},
                    "targets": {{
                        "/build/mypkg/_native{EXT_SUFFIX}": {{
                            "destination": "{{py_platlib}}/mypkg/_native{EXT_SUFFIX}",
                            "tag": "runtime"
                        }}
                    }}
                }}"#
            ),
            &config,
            &InstallFilters::default(),
            Os::Linux,
        )
        .unwrap_err();
        match err {
            Error::SplitPackage { package } => assert_eq!(package, "mypkg"),
            other => panic!("expected SplitPackage, got {other}"),
        }
    }

    #[test]
    fn data_and_man_share_the_data_location() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with(dir.path(), "");
        let plan = map(
            r#"{
                "data": {
                    "/src/sample.conf": {
                        "destination": "{datadir}/sample/sample.conf",
                        "tag": null
                    }
                },
                "man": {
                    "/src/sample.1": {
                        "destination": "{mandir}/man1/sample.1",
                        "tag": "man"
                    }
                }
            }"#,
            &config,
            &InstallFilters::default(),
            Os::Linux,
        )
        .unwrap();

        let relatives: Vec<_> = plan
            .files
            .iter()
            .map(|file| file.relative.to_string_lossy().into_owned())
            .collect();
        assert_eq!(relatives, ["share/man/man1/sample.1", "share/sample/sample.conf"]);
        assert!(
            plan.files
                .iter()
                .all(|file| file.location == WheelLocation::Data)
        );
    }

    #[test]
    fn scripts_map_to_scripts() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with(dir.path(), "");
        let plan = map(
            r#"{
                "targets": {
                    "/build/sample-tool": {
                        "destination": "{bindir}/sample-tool",
                        "tag": "runtime"
                    }
                }
            }"#,
            &config,
            &InstallFilters::default(),
            Os::Linux,
        )
        .unwrap();
        let file = &plan.files[0];
        assert_eq!(file.location, WheelLocation::Scripts);
        assert_eq!(file.kind, FileKind::Executable);
    }

    #[test]
    fn exclude_then_include_rescues() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with(
            dir.path(),
            indoc! {r#"
                [tool.meson-python.wheel]
                exclude = ["mypkg/*.py"]
                include = ["mypkg/__init__.py"]
            "#},
        );
        let plan = map(PURE_PLAN, &config, &InstallFilters::default(), Os::Linux).unwrap();
        let relatives: Vec<_> = plan
            .files
            .iter()
            .map(|file| file.relative.to_string_lossy().into_owned())
            .collect();
        assert_eq!(relatives, ["mypkg/__init__.py"]);
    }

    #[test]
    fn tag_filter_drops_non_matching() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with(dir.path(), "");
        let filters = InstallFilters {
            tags: Some(vec!["runtime".to_string()]),
            ..Default::default()
        };
        let plan = map(
            r#"{
                "python": {
                    "/src/mypkg/__init__.py": {
                        "destination": "{py_purelib}/mypkg/__init__.py",
                        "tag": "python-runtime"
                    }
                },
                "headers": {
                    "/src/sample.h": {
                        "destination": "{includedir}/sample.h",
                        "tag": "devel"
                    }
                }
            }"#,
            &config,
            &filters,
            Os::Linux,
        )
        .unwrap();
        assert!(plan.files.is_empty());
    }

    #[test]
    fn subproject_filter() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with(dir.path(), "");
        let json = r#"{
            "python": {
                "/src/mypkg/__init__.py": {
                    "destination": "{py_purelib}/mypkg/__init__.py",
                    "tag": "python-runtime"
                },
                "/src/subprojects/dep/dep.py": {
                    "destination": "{py_purelib}/dep/dep.py",
                    "tag": "python-runtime",
                    "subproject": "dep"
                }
            }
        }"#;

        let all = InstallFilters {
            skip_subprojects: SkipSubprojects::All,
            ..Default::default()
        };
        let plan = map(json, &config, &all, Os::Linux).unwrap();
        assert_eq!(plan.files.len(), 1);
        assert_eq!(plan.files[0].relative, PathBuf::from("mypkg/__init__.py"));

        let named = InstallFilters {
            skip_subprojects: SkipSubprojects::Named(vec!["other".to_string()]),
            ..Default::default()
        };
        let plan = map(json, &config, &named, Os::Linux).unwrap();
        assert_eq!(plan.files.len(), 2);
    }

    #[test]
    fn install_filters_from_args() {
        let args = vec![
            "--quiet".to_string(),
            "--tags=runtime,python-runtime".to_string(),
            "--skip-subprojects".to_string(),
        ];
        let filters = InstallFilters::from_install_args(&args);
        assert_eq!(
            filters.tags,
            Some(vec!["runtime".to_string(), "python-runtime".to_string()])
        );
        assert_eq!(filters.skip_subprojects, SkipSubprojects::All);

        let named = InstallFilters::from_install_args(&[
            "--skip-subprojects=dep".to_string(),
            "--tags".to_string(),
            "runtime".to_string(),
        ]);
        assert_eq!(
            named.skip_subprojects,
            SkipSubprojects::Named(vec!["dep".to_string()])
        );
        assert_eq!(named.tags, Some(vec!["runtime".to_string()]));
    }

    #[test]
    fn symlink_outside_tree_fails() {
        #[cfg(unix)]
        {
            let dir = tempfile::tempdir().unwrap();
            let source_dir = dir.path().join("project");
            fs::create_dir_all(&source_dir).unwrap();
            let config = config_with(&source_dir, "");

            let outside = dir.path().join("outside.py");
            fs::write(&outside, "x = 1\n").unwrap();
            let link = source_dir.join("link.py");
            std::os::unix::fs::symlink(&outside, &link).unwrap();

            let json = format!(
                r#"{{
                    "python": {{
                        "{}": {{
                            "destination": "{{py_purelib}}/mypkg/link.py",
                            "tag": "python-runtime"
                        }}
                    }}
                }}"#,
                link.display()
            );
            let err = map(&json, &config, &InstallFilters::default(), Os::Linux).unwrap_err();
            assert!(matches!(err, Error::Io(_)), "{err}");
        }
    }

    #[test]
    fn symlink_inside_tree_is_materialized() {
        #[cfg(unix)]
        {
            let dir = tempfile::tempdir().unwrap();
            let source_dir = dir.path().join("project");
            fs::create_dir_all(&source_dir).unwrap();
            let config = config_with(&source_dir, "");

            let real = config.source_dir.join("real.py");
            fs::write(&real, "x = 1\n").unwrap();
            let link = config.source_dir.join("link.py");
            std::os::unix::fs::symlink(&real, &link).unwrap();

            let json = format!(
                r#"{{
                    "python": {{
                        "{}": {{
                            "destination": "{{py_purelib}}/mypkg/link.py",
                            "tag": "python-runtime"
                        }}
                    }}
                }}"#,
                link.display()
            );
            let plan = map(&json, &config, &InstallFilters::default(), Os::Linux).unwrap();
            assert_eq!(plan.files[0].source, real);
        }
    }
}
