use std::io::Read as _;
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use fs_err as fs;
use fs_err::File;
use normpath::PathExt as _;
use tracing::debug;

use crate::error::Result;
use crate::metadata::Metadata;

use super::{ArchiveSource, ModuleWriterInternal, default_permission};

/// Creates a .tar.gz source distribution.
///
/// The base content comes from a `meson dist` archive; re-packing it lets us
/// normalize everything the original archive leaks from the build machine:
/// entry mtimes become the mtime of the project's metadata file, permissions
/// collapse to 0644/0755, and ownership becomes uid/gid zero.
pub struct SDistWriter {
    tar: tar::Builder<GzEncoder<Vec<u8>>>,
    path: PathBuf,
    mtime: u64,
}

impl super::private::Sealed for SDistWriter {}

impl ModuleWriterInternal for SDistWriter {
    fn add_entry(&mut self, target: impl AsRef<Path>, source: ArchiveSource) -> Result<()> {
        let target = target.as_ref();
        let executable = source.executable();
        let data = source.read()?;

        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_mode(default_permission(executable));
        header.set_uid(0);
        header.set_gid(0);
        header.set_mtime(self.mtime);
        header.set_size(data.len() as u64);

        self.tar.append_data(&mut header, target, data.as_slice())?;
        Ok(())
    }
}

impl SDistWriter {
    /// Create a source distribution .tar.gz which can be subsequently
    /// expanded. `mtime` applies to every entry; callers pass the mtime of
    /// the project's metadata file for reproducibility.
    pub fn new(out_dir: impl AsRef<Path>, metadata: &Metadata, mtime: u64) -> Result<SDistWriter> {
        let path = out_dir
            .as_ref()
            .normalize()?
            .join(format!(
                "{}-{}.tar.gz",
                metadata.get_distribution_escaped(),
                metadata.get_version_escaped()
            ))
            .into_path_buf();

        let enc = GzEncoder::new(Vec::new(), Compression::default());
        let tar = tar::Builder::new(enc);

        Ok(SDistWriter { tar, path, mtime })
    }

    /// Re-roots and appends every entry of a `meson dist` tarball under
    /// `root`, normalizing headers. A PKG-INFO at the archive root is
    /// skipped; the caller writes the authoritative one.
    pub fn append_meson_dist(&mut self, archive: &Path, root: &str) -> Result<()> {
        debug!("Repacking {}", archive.display());
        let file = File::open(archive)?;
        let mut tar = tar::Archive::new(GzDecoder::new(file));

        for entry in tar.entries()? {
            let mut entry = entry?;
            let path = entry.path()?.into_owned();
            // strip the `{name}-{version}/` root meson dist chose
            let relative: PathBuf = path.components().skip(1).collect();
            if relative.as_os_str().is_empty() {
                continue;
            }
            if relative == Path::new("PKG-INFO") {
                continue;
            }
            let target = Path::new(root).join(&relative);

            match entry.header().entry_type() {
                tar::EntryType::Directory => {
                    let mut header = tar::Header::new_gnu();
                    header.set_entry_type(tar::EntryType::Directory);
                    header.set_mode(0o755);
                    header.set_uid(0);
                    header.set_gid(0);
                    header.set_mtime(self.mtime);
                    header.set_size(0);
                    self.tar.append_data(&mut header, &target, std::io::empty())?;
                }
                tar::EntryType::Regular => {
                    let executable = entry.header().mode().map_or(false, |mode| mode & 0o111 != 0);
                    let mut data = Vec::new();
                    entry.read_to_end(&mut data)?;

                    let mut header = tar::Header::new_gnu();
                    header.set_entry_type(tar::EntryType::Regular);
                    header.set_mode(default_permission(executable));
                    header.set_uid(0);
                    header.set_gid(0);
                    header.set_mtime(self.mtime);
                    header.set_size(data.len() as u64);
                    self.tar.append_data(&mut header, &target, data.as_slice())?;
                }
                other => {
                    eprintln!(
                        "⚠️  Warning: skipping unsupported archive member `{}` of type {other:?}",
                        path.display()
                    );
                }
            }
        }
        Ok(())
    }

    /// Finishes the .tar.gz archive
    pub fn finish(self) -> Result<PathBuf> {
        let archive = self.tar.into_inner()?;
        fs::write(&self.path, archive.finish()?)?;
        Ok(self.path)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use pretty_assertions::assert_eq;

    use crate::module_writer::ModuleWriter as _;

    use super::*;

    fn test_metadata() -> Metadata {
        let pyproject: crate::pyproject_toml::PyProjectToml = toml::from_str(
            "[project]\nname = \"sample\"\nversion = \"1.0.0\"\n",
        )
        .unwrap();
        Metadata::from_pyproject(&pyproject, Path::new("."), None).unwrap()
    }

    /// Builds something shaped like a meson dist archive: project-versioned
    /// root, stray permissions, non-zero ownership
    fn fake_meson_dist(dir: &Path) -> PathBuf {
        let path = dir.join("sample-1.0.0.tar.gz");
        let enc = GzEncoder::new(Vec::new(), Compression::default());
        let mut tar = tar::Builder::new(enc);

        let mut add = |target: &str, data: &[u8], mode: u32| {
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(tar::EntryType::Regular);
            header.set_mode(mode);
            header.set_uid(1000);
            header.set_gid(1000);
            header.set_mtime(1700000000);
            header.set_size(data.len() as u64);
            tar.append_data(&mut header, target, data).unwrap();
        };
        add("sample-1.0.0/PKG-INFO", b"Metadata-Version: 1.0\n", 0o664);
        add("sample-1.0.0/meson.build", b"project('sample')\n", 0o664);
        add("sample-1.0.0/tools/gen.py", b"#!/usr/bin/env python3\n", 0o775);

        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(&tar.into_inner().unwrap().finish().unwrap())
            .unwrap();
        path
    }

    #[test]
    fn repacked_sdist_is_normalized() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = test_metadata();
        let dist = fake_meson_dist(dir.path());

        let mut writer = SDistWriter::new(dir.path(), &metadata, 1234567890).unwrap();
        writer
            .add_bytes(
                "sample-1.0.0/PKG-INFO",
                metadata.to_file_contents().unwrap().into_bytes(),
                false,
            )
            .unwrap();
        writer.append_meson_dist(&dist, "sample-1.0.0").unwrap();
        let path = writer.finish().unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "sample-1.0.0.tar.gz"
        );

        let file = std::fs::File::open(&path).unwrap();
        let mut tar = tar::Archive::new(GzDecoder::new(file));
        let mut seen = Vec::new();
        for entry in tar.entries().unwrap() {
            let mut entry = entry.unwrap();
            let header = entry.header();
            assert_eq!(header.uid().unwrap(), 0);
            assert_eq!(header.gid().unwrap(), 0);
            assert_eq!(header.mtime().unwrap(), 1234567890);
            let name = entry.path().unwrap().display().to_string();
            if name.ends_with("gen.py") {
                assert_eq!(header.mode().unwrap(), 0o755);
            } else {
                assert_eq!(header.mode().unwrap(), 0o644);
            }
            if name.ends_with("PKG-INFO") {
                let mut contents = String::new();
                entry.read_to_string(&mut contents).unwrap();
                // the meson dist PKG-INFO was replaced with ours
                assert!(contents.starts_with("Metadata-Version: 2.1\n"), "{contents}");
            }
            seen.push(name);
        }
        // PKG-INFO first so tools can find the metadata without a full scan
        assert_eq!(
            seen,
            [
                "sample-1.0.0/PKG-INFO",
                "sample-1.0.0/meson.build",
                "sample-1.0.0/tools/gen.py",
            ]
        );
    }
}
