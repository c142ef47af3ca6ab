//! Builds Python wheels, sdists and editable wheels from Meson projects.
//!
//! The high-level api is [BuildContext], which runs the pipeline
//! setup → compile → introspect → map → rewrite → package against an
//! external Meson binary. The PEP 517 hook surface lives in [hooks].
//!
//! The backend never executes project code: Meson describes the install
//! plan through its introspection JSON, the [install_plan] module
//! classifies every file against the wheel layout, the [rewriter] adjusts
//! dynamic-linker search paths of relocated native artifacts, and the
//! [module_writer] emits deterministic archives.

#![deny(missing_docs)]

pub use crate::build_context::BuildContext;
pub use crate::config_settings::{ConfigSettingValue, ConfigSettings};
pub use crate::error::{Error, MesonPhase, Result};
pub use crate::metadata::Metadata;
pub use crate::pyproject_toml::{ProjectConfig, PyProjectToml};
pub use crate::python_interpreter::{InterpreterKind, PythonInterpreter};
pub use crate::tags::{Os, WheelTag};

mod build_context;
pub mod config_settings;
pub mod editable;
mod error;
pub mod hooks;
pub mod install_plan;
pub mod machine_files;
pub mod meson;
pub mod metadata;
pub mod module_writer;
pub mod pyproject_toml;
pub mod python_interpreter;
pub mod rewriter;
pub mod tags;
