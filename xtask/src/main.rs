//! Workspace build tasks
//!
//! Usage:
//!   cargo xtask test    - Run all tests
//!   cargo xtask docs    - Generate documentation
//!   cargo xtask check   - Check code quality

use std::env;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "xtask", about = "workspace build tasks")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all tests
    Test {
        /// Run only the DSP facility's tests
        #[arg(long)]
        dsp: bool,
    },
    /// Generate documentation
    Docs {
        /// Open in browser
        #[arg(short, long)]
        open: bool,
    },
    /// Check code quality (clippy + fmt)
    Check,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let root = project_root()?;

    match cli.command {
        Commands::Test { dsp } => run_tests(&root, dsp),
        Commands::Docs { open } => generate_docs(&root, open),
        Commands::Check => check_quality(&root),
    }
}

fn project_root() -> Result<PathBuf> {
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").context("CARGO_MANIFEST_DIR not set")?;

    Ok(Path::new(&manifest_dir)
        .parent()
        .context("failed to get parent directory")?
        .to_path_buf())
}

fn run_tests(root: &Path, dsp_only: bool) -> Result<()> {
    println!("Running tests...\n");

    let mut args = vec!["test"];
    if dsp_only {
        args.extend(["--package", "rf-dsp"]);
    } else {
        args.push("--workspace");
    }

    let status = Command::new("cargo")
        .current_dir(root)
        .args(&args)
        .status()
        .context("failed to run tests")?;

    if !status.success() {
        bail!("tests failed");
    }

    println!("\nAll tests passed.");
    Ok(())
}

fn generate_docs(root: &Path, open: bool) -> Result<()> {
    println!("Generating documentation...\n");

    let mut args = vec!["doc", "--workspace", "--no-deps"];
    if open {
        args.push("--open");
    }

    let status = Command::new("cargo")
        .current_dir(root)
        .args(&args)
        .status()
        .context("failed to generate docs")?;

    if !status.success() {
        bail!("documentation generation failed");
    }

    Ok(())
}

fn check_quality(root: &Path) -> Result<()> {
    println!("Running clippy...");
    let clippy_status = Command::new("cargo")
        .current_dir(root)
        .args(["clippy", "--workspace", "--", "-D", "warnings"])
        .status()
        .context("failed to run clippy")?;

    if !clippy_status.success() {
        bail!("clippy found issues");
    }

    println!("\nChecking formatting...");
    let fmt_status = Command::new("cargo")
        .current_dir(root)
        .args(["fmt", "--all", "--check"])
        .status()
        .context("failed to check formatting")?;

    if !fmt_status.success() {
        println!("formatting issues found, run 'cargo fmt' to fix");
    }

    println!("\nCode quality check complete.");
    Ok(())
}
