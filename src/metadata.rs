//! Assembling core metadata for the `METADATA` and `PKG-INFO` files.
//!
//! Declared `[project]` metadata merges with values introspected from Meson:
//! a project may mark `version` as dynamic and let `meson.build` be the
//! single source of truth for it.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use fs_err as fs;
use indexmap::IndexMap;
use itertools::Itertools as _;
use pep440_rs::Version;
use pyproject_toml::{Contact, License, Project, ReadMe};

use crate::error::{Error, Result};
use crate::pyproject_toml::PyProjectToml;

const PLAINTEXT_CONTENT_TYPE: &str = "text/plain; charset=UTF-8";
const GFM_CONTENT_TYPE: &str = "text/markdown; charset=UTF-8; variant=GFM";

/// Guess a Description-Content-Type based on the file extension,
/// defaulting to plaintext if the extension is unknown or absent.
///
/// See https://packaging.python.org/specifications/core-metadata/#description-content-type
fn path_to_content_type(path: &Path) -> String {
    path.extension()
        .map_or(String::from(PLAINTEXT_CONTENT_TYPE), |ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            let type_str = match ext.as_str() {
                "rst" => "text/x-rst; charset=UTF-8",
                "md" | "markdown" => GFM_CONTENT_TYPE,
                _ => PLAINTEXT_CONTENT_TYPE,
            };
            String::from(type_str)
        })
}

/// Python core metadata for one distribution, ready to render as `METADATA`
/// (wheel) or `PKG-INFO` (sdist)
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(missing_docs)]
pub struct Metadata {
    /// The distribution name as declared
    pub name: String,
    /// The distribution version, declared or resolved from Meson
    pub version: Version,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub description_content_type: Option<String>,
    pub keywords: Option<String>,
    pub author: Option<String>,
    pub author_email: Option<String>,
    pub maintainer: Option<String>,
    pub maintainer_email: Option<String>,
    /// Classic `License:` value from a text declaration
    pub license: Option<String>,
    /// PEP 639 SPDX license expression
    pub license_expression: Option<String>,
    /// Files copied into `.dist-info/licenses/`, source-tree relative
    pub license_files: Vec<PathBuf>,
    pub classifiers: Vec<String>,
    pub requires_dist: Vec<String>,
    pub requires_python: Option<String>,
    pub project_urls: IndexMap<String, String>,
    pub provides_extra: Vec<String>,
    /// `[project.scripts]` for entry_points.txt
    pub scripts: IndexMap<String, String>,
    /// `[project.gui-scripts]` for entry_points.txt
    pub gui_scripts: IndexMap<String, String>,
    /// `[project.entry-points.*]` for entry_points.txt
    pub entry_points: IndexMap<String, IndexMap<String, String>>,
}

impl Metadata {
    /// Assembles metadata from the declared `[project]` table, resolving
    /// dynamic fields from Meson's introspected project version.
    pub fn from_pyproject(
        pyproject: &PyProjectToml,
        source_dir: &Path,
        meson_version: Option<&str>,
    ) -> Result<Metadata> {
        let project = pyproject
            .project
            .as_ref()
            .ok_or_else(|| Error::config("/project", "the `[project]` table is required"))?;

        let dynamic: Vec<&str> = project
            .dynamic
            .iter()
            .flatten()
            .map(String::as_str)
            .collect();
        if let Some(unsupported) = dynamic.iter().find(|field| **field != "version") {
            return Err(Error::config(
                "/project/dynamic",
                format!("unsupported dynamic field `{unsupported}`, only `version` may be dynamic"),
            ));
        }

        let version = match (&project.version, dynamic.contains(&"version")) {
            (Some(version), false) => version.clone(),
            (None, true) => {
                let meson_version = meson_version.ok_or_else(|| {
                    Error::Metadata(
                        "`version` is dynamic but Meson has not been configured yet".to_string(),
                    )
                })?;
                meson_version.parse().map_err(|err| {
                    Error::Metadata(format!(
                        "Meson reports project version `{meson_version}`, which is not a valid \
                         Python version: {err}"
                    ))
                })?
            }
            (Some(_), true) => {
                return Err(Error::config(
                    "/project/version",
                    "`version` cannot both be declared and listed in `dynamic`",
                ));
            }
            (None, false) => {
                return Err(Error::config(
                    "/project/version",
                    "`version` must either be declared or listed in `dynamic`",
                ));
            }
        };

        let (description, description_content_type) = readme(project, source_dir)?;
        let (author, author_email) = contacts(project.authors.as_deref());
        let (maintainer, maintainer_email) = contacts(project.maintainers.as_deref());
        let (license, license_expression) = license_fields(project, source_dir)?;
        let license_files = expand_license_files(project, source_dir)?;

        Ok(Metadata {
            name: project.name.clone(),
            version,
            summary: project.description.clone(),
            description,
            description_content_type,
            keywords: project.keywords.as_ref().map(|keywords| keywords.join(",")),
            author,
            author_email,
            maintainer,
            maintainer_email,
            license,
            license_expression,
            license_files,
            classifiers: project.classifiers.clone().unwrap_or_default(),
            requires_dist: requires_dist(project),
            requires_python: project
                .requires_python
                .as_ref()
                .map(|specifiers| specifiers.to_string()),
            project_urls: project.urls.clone().unwrap_or_default(),
            provides_extra: project
                .optional_dependencies
                .as_ref()
                .map(|extras| extras.keys().cloned().collect())
                .unwrap_or_default(),
            scripts: project.scripts.clone().unwrap_or_default(),
            gui_scripts: project.gui_scripts.clone().unwrap_or_default(),
            entry_points: project.entry_points.clone().unwrap_or_default(),
        })
    }

    /// The metadata format version this content needs: PEP 639 license
    /// fields push it to 2.4, everything else fits 2.1
    pub fn metadata_version(&self) -> &'static str {
        if self.license_expression.is_some() || !self.license_files.is_empty() {
            "2.4"
        } else {
            "2.1"
        }
    }

    /// Formats the metadata into the core-metadata RFC 822 format used by
    /// both `METADATA` and `PKG-INFO`
    pub fn to_file_contents(&self) -> Result<String> {
        let mut fields = vec![
            ("Metadata-Version", self.metadata_version().to_string()),
            ("Name", self.name.clone()),
            ("Version", self.version.to_string()),
        ];

        let mut add_option = |name: &'static str, value: &Option<String>| {
            if let Some(value) = value {
                fields.push((name, value.clone()));
            }
        };
        add_option("Summary", &self.summary);
        add_option("Keywords", &self.keywords);
        add_option("Author", &self.author);
        add_option("Author-email", &self.author_email);
        add_option("Maintainer", &self.maintainer);
        add_option("Maintainer-email", &self.maintainer_email);
        add_option("License", &self.license);
        add_option("License-Expression", &self.license_expression);

        for path in &self.license_files {
            fields.push(("License-File", path.display().to_string()));
        }
        for classifier in &self.classifiers {
            fields.push(("Classifier", classifier.clone()));
        }
        if let Some(requires_python) = &self.requires_python {
            fields.push(("Requires-Python", requires_python.clone()));
        }
        for requirement in &self.requires_dist {
            fields.push(("Requires-Dist", requirement.clone()));
        }
        for (label, url) in &self.project_urls {
            fields.push(("Project-URL", format!("{label}, {url}")));
        }
        for extra in &self.provides_extra {
            fields.push(("Provides-Extra", extra.clone()));
        }
        if let Some(content_type) = &self.description_content_type {
            fields.push(("Description-Content-Type", content_type.clone()));
        }

        let mut out = String::new();
        for (key, value) in fields {
            // continuation lines keep multi-line values (e.g. license text) valid
            let value = value.trim().replace('\n', "\n        ");
            writeln!(out, "{key}: {value}")?;
        }
        if let Some(description) = &self.description {
            out.push('\n');
            out.push_str(description);
            if !description.ends_with('\n') {
                out.push('\n');
            }
        }
        Ok(out)
    }

    /// The distribution name normalized and escaped for file names,
    /// e.g. `My-Package` becomes `my_package`
    pub fn get_distribution_escaped(&self) -> String {
        let mut escaped = String::with_capacity(self.name.len());
        let mut separator = false;
        for c in self.name.chars() {
            if matches!(c, '-' | '_' | '.') {
                separator = true;
            } else {
                if separator && !escaped.is_empty() {
                    escaped.push('_');
                }
                separator = false;
                escaped.push(c.to_ascii_lowercase());
            }
        }
        escaped
    }

    /// The version escaped for file names
    pub fn get_version_escaped(&self) -> String {
        self.version.to_string().replace('-', "_")
    }

    /// The `{distribution}-{version}.dist-info` directory name
    pub fn get_dist_info_dir(&self) -> PathBuf {
        PathBuf::from(format!(
            "{}-{}.dist-info",
            self.get_distribution_escaped(),
            self.get_version_escaped()
        ))
    }

    /// The `{distribution}-{version}.data` directory name
    pub fn get_data_dir(&self) -> PathBuf {
        PathBuf::from(format!(
            "{}-{}.data",
            self.get_distribution_escaped(),
            self.get_version_escaped()
        ))
    }

    /// The hidden top-level directory internal shared libraries relocate to
    pub fn internal_libs_dir(&self) -> PathBuf {
        PathBuf::from(format!(".{}.mesonpy.libs", self.get_distribution_escaped()))
    }

    /// Whether any entry points are declared
    pub fn has_entry_points(&self) -> bool {
        !self.scripts.is_empty() || !self.gui_scripts.is_empty() || !self.entry_points.is_empty()
    }
}

/// Resolves the readme declaration into description text and content type
fn readme(project: &Project, source_dir: &Path) -> Result<(Option<String>, Option<String>)> {
    match &project.readme {
        None => Ok((None, None)),
        Some(ReadMe::RelativePath(path)) => {
            let readme_path = source_dir.join(path);
            let text = fs::read_to_string(&readme_path)?;
            Ok((Some(text), Some(path_to_content_type(&readme_path))))
        }
        Some(ReadMe::Table {
            file,
            text,
            content_type,
        }) => {
            let description = match (file, text) {
                (Some(_), Some(_)) => {
                    return Err(Error::config(
                        "/project/readme",
                        "`file` and `text` are mutually exclusive",
                    ));
                }
                (Some(file), None) => Some(fs::read_to_string(source_dir.join(file))?),
                (None, Some(text)) => Some(text.clone()),
                (None, None) => None,
            };
            Ok((description, content_type.clone()))
        }
    }
}

/// Folds PEP 621 contacts into the `Author`/`Author-email` field pair:
/// plain names go into the name field, names with an address render as
/// `Name <email>` in the email field.
fn contacts(contacts: Option<&[Contact]>) -> (Option<String>, Option<String>) {
    let mut names = Vec::new();
    let mut emails = Vec::new();
    for contact in contacts.unwrap_or_default() {
        match (contact.name(), contact.email()) {
            (Some(name), Some(email)) => emails.push(format!("{name} <{email}>")),
            (None, Some(email)) => emails.push(email.to_string()),
            (Some(name), None) => names.push(name.to_string()),
            (None, None) => {}
        }
    }
    let join = |values: Vec<String>| (!values.is_empty()).then(|| values.join(", "));
    (join(names), join(emails))
}

/// Splits the license declaration into the classic field and the PEP 639
/// expression
fn license_fields(
    project: &Project,
    source_dir: &Path,
) -> Result<(Option<String>, Option<String>)> {
    match &project.license {
        None => Ok((None, None)),
        Some(License::Spdx(expression)) => Ok((None, Some(expression.clone()))),
        Some(License::Text { text }) => Ok((Some(text.clone()), None)),
        Some(License::File { file }) => {
            let text = fs::read_to_string(source_dir.join(file))?;
            Ok((Some(text), None))
        }
    }
}

/// Expands `license-files` glob patterns relative to the source tree
fn expand_license_files(project: &Project, source_dir: &Path) -> Result<Vec<PathBuf>> {
    let Some(patterns) = &project.license_files else {
        return Ok(Vec::new());
    };
    let mut files = Vec::new();
    for pattern in patterns {
        let full_pattern = source_dir.join(pattern);
        let matches = glob::glob(&full_pattern.to_string_lossy()).map_err(|err| {
            Error::config(
                "/project/license-files",
                format!("invalid glob `{pattern}`: {err}"),
            )
        })?;
        for path in matches.filter_map(std::result::Result::ok) {
            if path.is_file() {
                files.push(
                    path.strip_prefix(source_dir)
                        .unwrap_or(&path)
                        .to_path_buf(),
                );
            }
        }
    }
    files.sort();
    Ok(files.into_iter().unique().collect())
}

/// Renders `dependencies` and `optional-dependencies` into `Requires-Dist`
/// strings, attaching `extra == '...'` markers
fn requires_dist(project: &Project) -> Vec<String> {
    let mut requirements: Vec<String> = project
        .dependencies
        .iter()
        .flatten()
        .map(pep508_rs::Requirement::to_string)
        .collect();

    for (extra, dependencies) in project.optional_dependencies.iter().flatten() {
        for requirement in dependencies {
            let rendered = requirement.to_string();
            let with_marker = match rendered.split_once(';') {
                Some((requirement, marker)) => {
                    format!("{}; ({}) and extra == '{extra}'", requirement.trim_end(), marker.trim())
                }
                None => format!("{rendered} ; extra == '{extra}'"),
            };
            requirements.push(with_marker);
        }
    }
    requirements
}
