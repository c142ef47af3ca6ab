//! Command line front-end over the build backend hooks.
//!
//! Run with --help for usage information.

use std::env;
use std::io::{self, IsTerminal as _};
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use mesonpy::ConfigSettings;
use mesonpy::hooks;

#[derive(Debug, Parser)]
#[command(name = "mesonpy", version)]
/// Build Python wheels and sdists from Meson projects
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[clap(rename_all = "lower")]
enum Hook {
    Wheel,
    Sdist,
    Editable,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Build a wheel
    BuildWheel {
        #[command(flatten)]
        common: CommonArgs,
        /// A .dist-info directory produced by prepare-metadata, handed back
        /// as PEP 517 front-ends do
        #[arg(long = "metadata-dir", value_name = "DIR")]
        metadata_dir: Option<PathBuf>,
    },
    /// Build a source distribution
    BuildSdist {
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Build an editable wheel that rebuilds and imports from the source
    /// and build trees
    BuildEditable {
        #[command(flatten)]
        common: CommonArgs,
        /// A .dist-info directory produced by prepare-metadata, handed back
        /// as PEP 517 front-ends do
        #[arg(long = "metadata-dir", value_name = "DIR")]
        metadata_dir: Option<PathBuf>,
    },
    /// Write the .dist-info directory ahead of a wheel build
    PrepareMetadata {
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Print the extra build requirements of the given hook, one per line
    Requires {
        /// Which build hook to compute requirements for
        #[arg(value_enum, default_value = "wheel")]
        hook: Hook,
        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Debug, clap::Args)]
struct CommonArgs {
    /// The directory to place the artifact in
    #[arg(short = 'o', long = "out", default_value = "dist")]
    out: PathBuf,
    /// Backend config settings, e.g. -C setup-args=-Ddefault_library=static
    #[arg(short = 'C', long = "config-setting", value_name = "KEY=VALUE")]
    config_settings: Vec<String>,
    /// Path to the project source tree
    #[arg(default_value = ".")]
    source_dir: PathBuf,
}

impl CommonArgs {
    fn settings(&self) -> Result<ConfigSettings, mesonpy::Error> {
        ConfigSettings::from_cli_pairs(self.config_settings.iter().map(String::as_str))
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::BuildWheel {
            common,
            metadata_dir,
        } => {
            let wheel = hooks::build_wheel(
                &common.source_dir,
                &common.out,
                &common.settings()?,
                metadata_dir.as_deref(),
            )?;
            eprintln!("📦 Built wheel {wheel}");
        }
        Command::BuildSdist { common } => {
            let sdist = hooks::build_sdist(&common.source_dir, &common.out, &common.settings()?)?;
            eprintln!("📦 Built sdist {sdist}");
        }
        Command::BuildEditable {
            common,
            metadata_dir,
        } => {
            let wheel = hooks::build_editable(
                &common.source_dir,
                &common.out,
                &common.settings()?,
                metadata_dir.as_deref(),
            )?;
            eprintln!("📦 Built editable wheel {wheel}");
        }
        Command::PrepareMetadata { common } => {
            let dist_info = hooks::prepare_metadata_for_build_wheel(
                &common.source_dir,
                &common.out,
                &common.settings()?,
            )?;
            println!("{dist_info}");
        }
        Command::Requires { hook, common } => {
            let settings = common.settings()?;
            let requires = match hook {
                Hook::Wheel => hooks::get_requires_for_build_wheel(&settings),
                Hook::Sdist => hooks::get_requires_for_build_sdist(&settings),
                Hook::Editable => hooks::get_requires_for_build_editable(&settings),
            };
            for requirement in requires {
                println!("{requirement}");
            }
        }
    }

    Ok(())
}

/// `NO_COLOR` wins over `FORCE_COLOR`; otherwise color only a terminal
fn use_color() -> bool {
    if env::var_os("NO_COLOR").is_some_and(|value| !value.is_empty()) {
        return false;
    }
    if env::var_os("FORCE_COLOR").is_some_and(|value| !value.is_empty()) {
        return true;
    }
    io::stderr().is_terminal()
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_env("MESONPY_LOG"))
        .with_writer(io::stderr)
        .init();
}

fn main() {
    setup_logging();

    if let Err(error) = run() {
        if use_color() {
            eprintln!("\x1b[31m💥 {error}\x1b[0m");
        } else {
            eprintln!("💥 {error}");
        }
        std::process::exit(1);
    }
}
