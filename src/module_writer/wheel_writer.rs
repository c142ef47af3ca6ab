use std::collections::BTreeMap;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};

use fs_err::File;
use path_slash::PathExt as _;
use tracing::debug;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::error::Result;
use crate::metadata::Metadata;
use crate::tags::WheelTag;

use super::{ArchiveSource, ModuleWriterInternal, default_permission};
use super::util::StreamSha256;

/// Writes a wheel: a zip archive with deterministic entry ordering, POSIX
/// modes in the external attributes, and a trailing RECORD file.
///
/// Entries are buffered until [`WheelWriter::finish`] so the archive can be
/// written sorted by destination path regardless of the order content was
/// produced in.
pub struct WheelWriter {
    zip: ZipWriter<File>,
    wheel_path: PathBuf,
    entries: BTreeMap<PathBuf, ArchiveSource>,
}

impl super::private::Sealed for WheelWriter {}

impl ModuleWriterInternal for WheelWriter {
    fn add_entry(&mut self, target: impl AsRef<Path>, source: ArchiveSource) -> Result<()> {
        let target = target.as_ref();
        if self.entries.insert(target.to_path_buf(), source).is_some() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("`{}` was added to the wheel twice", target.display()),
            )
            .into());
        }
        Ok(())
    }
}

impl WheelWriter {
    /// Create a new wheel file which can be subsequently expanded
    pub fn new(tag: &WheelTag, wheel_dir: &Path, metadata: &Metadata) -> Result<WheelWriter> {
        let wheel_path = wheel_dir.join(format!(
            "{}-{}-{tag}.whl",
            metadata.get_distribution_escaped(),
            metadata.get_version_escaped(),
        ));

        let file = File::create(&wheel_path)?;

        Ok(WheelWriter {
            zip: ZipWriter::new(file),
            wheel_path,
            entries: BTreeMap::new(),
        })
    }

    /// Deterministic per-entry options: deflate compression, a fixed
    /// timestamp, and the POSIX mode in the external attributes
    fn file_options(executable: bool) -> SimpleFileOptions {
        SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .last_modified_time(zip::DateTime::default())
            .unix_permissions(default_permission(executable))
    }

    /// Writes all buffered entries sorted by path (the dist-info directory
    /// placed last, as PEP 427 recommends), appends RECORD, and finishes
    /// the archive
    pub fn finish(mut self, dist_info_dir: &Path) -> Result<PathBuf> {
        let (content, dist_info): (Vec<_>, Vec<_>) = {
            let mut content = Vec::new();
            let mut dist_info = Vec::new();
            for (target, source) in std::mem::take(&mut self.entries) {
                if target.starts_with(dist_info_dir) {
                    dist_info.push((target, source));
                } else {
                    content.push((target, source));
                }
            }
            (content, dist_info)
        };

        let mut record = Vec::new();
        for (target, source) in content.into_iter().chain(dist_info) {
            debug!("Writing {}", target.display());
            let options = Self::file_options(source.executable());
            self.zip.start_file_from_path(&target, options)?;

            let data = source.read()?;
            let mut writer = StreamSha256::new(&mut self.zip);
            io::copy(&mut data.as_slice(), &mut writer)?;
            let (hash, length) = writer.finalize()?;
            record.push((target, hash, length));
        }

        let record_path = dist_info_dir.join("RECORD");
        debug!("Writing {}", record_path.display());
        self.zip
            .start_file_from_path(&record_path, Self::file_options(false))?;
        for (target, hash, length) in record {
            writeln!(
                self.zip,
                "{},sha256={hash},{length}",
                target.to_slash_lossy()
            )?;
        }
        // the RECORD file cannot hash itself; its own entry stays empty
        writeln!(self.zip, "{},,", record_path.to_slash_lossy())?;

        self.zip.finish()?;
        Ok(self.wheel_path)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read as _;

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

    #[test]
    fn deterministic_ordering_and_record() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = test_metadata();
        let tag = WheelTag::pure();

        let mut writer = WheelWriter::new(&tag, dir.path(), &metadata).unwrap();
        // intentionally added out of order
        writer.add_bytes("sample/zeta.py", b"z = 1\n".to_vec(), false).unwrap();
        writer.add_bytes("sample/__init__.py", b"", false).unwrap();
        writer
            .add_bytes(
                metadata.get_dist_info_dir().join("METADATA"),
                metadata.to_file_contents().unwrap().into_bytes(),
                false,
            )
            .unwrap();

        let path = writer.finish(&metadata.get_dist_info_dir()).unwrap();
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            "sample-1.0.0-py3-none-any.whl"
        );

        let mut archive = zip::ZipArchive::new(std::fs::File::open(&path).unwrap()).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert_eq!(
            names,
            [
                "sample/__init__.py",
                "sample/zeta.py",
                "sample-1.0.0.dist-info/METADATA",
                "sample-1.0.0.dist-info/RECORD",
            ]
        );

        let mut record = String::new();
        archive
            .by_name("sample-1.0.0.dist-info/RECORD")
            .unwrap()
            .read_to_string(&mut record)
            .unwrap();
        let lines: Vec<&str> = record.lines().collect();
        // every entry is listed exactly once, RECORD itself with empty fields
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("sample/__init__.py,sha256="));
        assert_eq!(lines[3], "sample-1.0.0.dist-info/RECORD,,");
    }

    #[test]
    fn duplicate_entry_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = test_metadata();
        let mut writer = WheelWriter::new(&WheelTag::pure(), dir.path(), &metadata).unwrap();
        writer.add_bytes("sample/a.py", b"a = 1\n".to_vec(), false).unwrap();
        let err = writer
            .add_bytes("sample/a.py", b"a = 2\n".to_vec(), false)
            .unwrap_err();
        assert!(err.to_string().contains("twice"), "{err}");
    }

    #[test]
    fn wheels_are_reproducible() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = test_metadata();

        let mut build = |out: &Path| -> PathBuf {
            fs_err::create_dir_all(out).unwrap();
            let mut writer = WheelWriter::new(&WheelTag::pure(), out, &metadata).unwrap();
            writer.add_bytes("sample/__init__.py", b"x = 1\n".to_vec(), false).unwrap();
            writer.finish(&metadata.get_dist_info_dir()).unwrap()
        };

        let first = build(&dir.path().join("a"));
        let second = build(&dir.path().join("b"));
        assert_eq!(
            fs_err::read(first).unwrap(),
            fs_err::read(second).unwrap()
        );
    }
}
