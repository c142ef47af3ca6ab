//! The `config_settings` mapping from PEP 517 front-ends.
//!
//! Front-ends pass free-form key/value pairs (`pip install -C key=value`,
//! `python -m build -Ckey=value`). Only a fixed set of keys is recognized;
//! anything else is rejected with a suggestion so that a typo does not
//! silently change build behavior.

use std::path::PathBuf;

use crate::error::{Error, Result};

/// Recognized `config_settings` keys, with `builddir` kept as a historical
/// alias for `build-dir`.
const KNOWN_KEYS: &[&str] = &[
    "build-dir",
    "builddir",
    "setup-args",
    "compile-args",
    "install-args",
    "dist-args",
    "editable-verbose",
];

/// A single config settings value as PEP 517 defines it: a string, or a list
/// of strings when the front-end saw the key repeatedly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSettingValue {
    /// `-C setup-args=-Dfoo=bar`
    String(String),
    /// Repeated keys collected by the front-end
    List(Vec<String>),
}

impl ConfigSettingValue {
    fn into_list(self) -> Vec<String> {
        match self {
            ConfigSettingValue::String(value) => vec![value],
            ConfigSettingValue::List(values) => values,
        }
    }
}

impl From<&str> for ConfigSettingValue {
    fn from(value: &str) -> Self {
        ConfigSettingValue::String(value.to_string())
    }
}

/// Parsed and validated per-invocation settings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigSettings {
    /// Persistent build directory; a temporary directory is used when unset
    pub build_dir: Option<PathBuf>,
    /// Extra arguments appended to `meson setup`
    pub setup_args: Vec<String>,
    /// Extra arguments appended to the compile step
    pub compile_args: Vec<String>,
    /// Extra arguments appended to `meson install`
    pub install_args: Vec<String>,
    /// Extra arguments appended to `meson dist`
    pub dist_args: Vec<String>,
    /// Stream rebuild output from editable installs
    pub editable_verbose: bool,
}

impl ConfigSettings {
    /// Validates a front-end `config_settings` mapping.
    ///
    /// Unknown keys fail with [`Error::UnknownConfigSetting`]; a key that is
    /// close to a recognized one carries a did-you-mean suggestion.
    pub fn from_pairs<I, K>(pairs: I) -> Result<ConfigSettings>
    where
        I: IntoIterator<Item = (K, ConfigSettingValue)>,
        K: AsRef<str>,
    {
        let mut settings = ConfigSettings::default();
        let mut build_dir_seen = false;

        for (key, value) in pairs {
            let key = key.as_ref();
            match key {
                "build-dir" | "builddir" => {
                    let values = value.into_list();
                    if build_dir_seen || values.len() > 1 {
                        return Err(Error::config(
                            format!("/config-settings/{key}"),
                            "the build directory may only be specified once",
                        ));
                    }
                    build_dir_seen = true;
                    settings.build_dir = values.into_iter().next().map(PathBuf::from);
                }
                "setup-args" => settings.setup_args.extend(value.into_list()),
                "compile-args" => settings.compile_args.extend(value.into_list()),
                "install-args" => settings.install_args.extend(value.into_list()),
                "dist-args" => settings.dist_args.extend(value.into_list()),
                "editable-verbose" => {
                    settings.editable_verbose = parse_bool(key, value.into_list().pop())?;
                }
                unknown => {
                    return Err(Error::UnknownConfigSetting {
                        key: unknown.to_string(),
                        suggestion: suggest(unknown),
                    });
                }
            }
        }

        Ok(settings)
    }

    /// Parses `key=value` pairs from the command line, `-C` style. A bare key
    /// is treated as `key=true`, which only makes sense for boolean settings.
    pub fn from_cli_pairs<'a>(pairs: impl IntoIterator<Item = &'a str>) -> Result<ConfigSettings> {
        Self::from_pairs(pairs.into_iter().map(|pair| match pair.split_once('=') {
            Some((key, value)) => (key, ConfigSettingValue::from(value)),
            None => (pair, ConfigSettingValue::from("true")),
        }))
    }
}

fn parse_bool(key: &str, value: Option<String>) -> Result<bool> {
    let value = value.unwrap_or_default();
    match value.to_ascii_lowercase().as_str() {
        "" | "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::config(
            format!("/config-settings/{key}"),
            format!("expected a boolean, got `{other}`"),
        )),
    }
}

/// Returns the closest recognized key when it is close enough to be a
/// plausible typo (edit distance at most a third of the key length, minimum 1).
fn suggest(unknown: &str) -> Option<String> {
    let threshold = (unknown.len() / 3).max(1);
    KNOWN_KEYS
        .iter()
        .map(|known| (edit_distance(unknown, known), *known))
        .filter(|(distance, _)| *distance <= threshold)
        .min_by_key(|(distance, _)| *distance)
        .map(|(_, known)| known.to_string())
}

/// Levenshtein distance over chars, one-row rolling buffer
fn edit_distance(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut row: Vec<usize> = (0..=b_chars.len()).collect();

    for (i, a_char) in a.chars().enumerate() {
        let mut previous_diagonal = row[0];
        row[0] = i + 1;
        for (j, b_char) in b_chars.iter().enumerate() {
            let substitution = previous_diagonal + usize::from(a_char != *b_char);
            previous_diagonal = row[j + 1];
            row[j + 1] = substitution.min(row[j] + 1).min(previous_diagonal + 1);
        }
    }

    row[b_chars.len()]
}
