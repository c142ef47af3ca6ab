//! Writing the packaged artifacts: wheels and source distributions.
//!
//! Both writers share a small entry-based interface so that dist-info
//! assembly and content staging do not care which archive format they are
//! feeding.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use fs_err as fs;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::bytes::Regex;
use tracing::debug;

use crate::error::Result;
use crate::metadata::Metadata;
use crate::tags::WheelTag;

mod sdist_writer;
mod util;
mod wheel_writer;

pub use sdist_writer::SDistWriter;
pub use wheel_writer::WheelWriter;

mod private {
    pub trait Sealed {}
}

/// Content for one archive entry: either bytes generated by the backend or
/// a file on disk
#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub enum ArchiveSource {
    Generated(GeneratedSourceData),
    File(FileSourceData),
}

/// Backend-generated entry content
#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub struct GeneratedSourceData {
    pub data: Vec<u8>,
    pub executable: bool,
}

/// Entry content read from the build or source tree
#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub struct FileSourceData {
    pub path: PathBuf,
    pub executable: bool,
}

impl ArchiveSource {
    pub(crate) fn executable(&self) -> bool {
        match self {
            ArchiveSource::Generated(source) => source.executable,
            ArchiveSource::File(source) => source.executable,
        }
    }

    /// Reads the content into memory
    pub(crate) fn read(self) -> Result<Vec<u8>> {
        match self {
            ArchiveSource::Generated(source) => Ok(source.data),
            ArchiveSource::File(source) => Ok(fs::read(&source.path)?),
        }
    }
}

/// Allows adding entries to a wheel or sdist archive
pub trait ModuleWriterInternal: private::Sealed {
    /// Adds an entry into the archive
    fn add_entry(&mut self, target: impl AsRef<Path>, source: ArchiveSource) -> Result<()>;
}

/// Extension trait with convenience methods for interacting with a
/// [ModuleWriterInternal]
pub trait ModuleWriter: private::Sealed {
    /// Adds a generated file with `data` as content at the archive-relative
    /// `target` path
    fn add_bytes(
        &mut self,
        target: impl AsRef<Path>,
        data: impl Into<Vec<u8>>,
        executable: bool,
    ) -> Result<()>;

    /// Copies the file at `source` to the archive-relative `target` path
    fn add_file(
        &mut self,
        target: impl AsRef<Path>,
        source: impl AsRef<Path>,
        executable: bool,
    ) -> Result<()>;
}

/// This blanket impl makes it impossible to overwrite the methods in
/// [ModuleWriter]
impl<T: ModuleWriterInternal> ModuleWriter for T {
    fn add_bytes(
        &mut self,
        target: impl AsRef<Path>,
        data: impl Into<Vec<u8>>,
        executable: bool,
    ) -> Result<()> {
        self.add_entry(
            target,
            ArchiveSource::Generated(GeneratedSourceData {
                data: data.into(),
                executable,
            }),
        )
    }

    fn add_file(
        &mut self,
        target: impl AsRef<Path>,
        source: impl AsRef<Path>,
        executable: bool,
    ) -> Result<()> {
        let target = target.as_ref();
        let source = source.as_ref();
        debug!("Adding {} from {}", target.display(), source.display());

        self.add_entry(
            target,
            ArchiveSource::File(FileSourceData {
                path: source.to_path_buf(),
                executable,
            }),
        )
    }
}

/// Creates the .dist-info directory and fills it with all metadata files
/// except RECORD
pub fn write_dist_info(
    writer: &mut impl ModuleWriterInternal,
    source_dir: &Path,
    metadata: &Metadata,
    tag: &WheelTag,
    root_is_purelib: bool,
) -> Result<PathBuf> {
    let dist_info_dir = metadata.get_dist_info_dir();

    writer.add_bytes(
        dist_info_dir.join("METADATA"),
        metadata.to_file_contents()?.into_bytes(),
        false,
    )?;

    writer.add_bytes(
        dist_info_dir.join("WHEEL"),
        wheel_file(tag, root_is_purelib).into_bytes(),
        false,
    )?;

    let mut entry_points = String::new();
    if !metadata.scripts.is_empty() {
        entry_points.push_str(&entry_points_txt("console_scripts", &metadata.scripts));
    }
    if !metadata.gui_scripts.is_empty() {
        entry_points.push_str(&entry_points_txt("gui_scripts", &metadata.gui_scripts));
    }
    for (entry_type, entries) in &metadata.entry_points {
        entry_points.push_str(&entry_points_txt(entry_type, entries));
    }
    if !entry_points.is_empty() {
        writer.add_bytes(
            dist_info_dir.join("entry_points.txt"),
            entry_points.into_bytes(),
            false,
        )?;
    }

    if !metadata.license_files.is_empty() {
        let license_files_dir = dist_info_dir.join("licenses");
        for path in &metadata.license_files {
            writer.add_file(license_files_dir.join(path), source_dir.join(path), false)?;
        }
    }

    Ok(dist_info_dir)
}

fn wheel_file(tag: &WheelTag, root_is_purelib: bool) -> String {
    let mut wheel_file = format!(
        "Wheel-Version: 1.0
Generator: {name} ({version})
Root-Is-Purelib: {root_is_purelib}
",
        name = env!("CARGO_PKG_NAME"),
        version = env!("CARGO_PKG_VERSION"),
    );
    let _ = writeln!(wheel_file, "Tag: {tag}");
    wheel_file
}

/// https://packaging.python.org/specifications/entry-points/
fn entry_points_txt(entry_type: &str, entrypoints: &IndexMap<String, String>) -> String {
    entrypoints
        .iter()
        .fold(format!("[{entry_type}]\n"), |text, (k, v)| {
            text + k + " = " + v + "\n"
        })
}

static PYTHON_SHEBANG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#![^\n]*\bpython[0-9.]*([ \t][^\n]*)?(\n|$)").unwrap());

/// Rewrites a script's shebang to the `#!python` convention installers
/// expand to the final interpreter path. Returns `None` when the content
/// does not start with a python shebang and must be left untouched.
pub fn rewrite_python_shebang(data: &[u8]) -> Option<Vec<u8>> {
    let matched = PYTHON_SHEBANG_RE.find(data)?;
    let mut rewritten = Vec::with_capacity(data.len());
    rewritten.extend_from_slice(b"#!python\n");
    rewritten.extend_from_slice(&data[matched.end()..]);
    Some(rewritten)
}

#[inline]
pub(crate) fn default_permission(executable: bool) -> u32 {
    match executable {
        true => 0o755,
        false => 0o644,
    }
}

#[cfg(test)]
mod tests {
    use indexmap::indexmap;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn wheel_file_tags() {
        let tag = WheelTag {
            python: "cp311".to_string(),
            abi: "cp311".to_string(),
            platform: "linux_x86_64".to_string(),
        };
        let expected = format!(
            "Wheel-Version: 1.0
Generator: {name} ({version})
Root-Is-Purelib: false
Tag: cp311-cp311-linux_x86_64
",
            name = env!("CARGO_PKG_NAME"),
            version = env!("CARGO_PKG_VERSION"),
        );
        assert_eq!(wheel_file(&tag, false), expected);
    }

    #[test]
    fn entry_points_format() {
        let entries = indexmap! {
            "sample".to_string() => "sample.cli:main".to_string(),
        };
        assert_eq!(
            entry_points_txt("console_scripts", &entries),
            "[console_scripts]\nsample = sample.cli:main\n"
        );
    }

    #[test]
    fn shebang_rewriting() {
        assert_eq!(
            rewrite_python_shebang(b"#!/usr/bin/python3\nprint()\n"),
            Some(b"#!python\nprint()\n".to_vec())
        );
        assert_eq!(
            rewrite_python_shebang(b"#!/venv/bin/python3.11\nprint()\n"),
            Some(b"#!python\nprint()\n".to_vec())
        );
        // only a python interpreter line qualifies
        assert_eq!(rewrite_python_shebang(b"#!/bin/sh\necho\n"), None);
        // native executables are left alone
        assert_eq!(rewrite_python_shebang(b"\x7fELF\x02\x01\x01"), None);
    }
}
