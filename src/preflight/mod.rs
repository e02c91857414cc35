//! Preflight checks for build validation.
//!
//! Validates that the host has the tools the requested outputs and the
//! image backend need before any image is pulled. This prevents failing
//! after a long assembly.
//!
//! # Example
//!
//! ```rust
//! use initrd_assembler::preflight::{command_exists, check_required_tools};
//!
//! if !command_exists("mkfs.ext4") {
//!     println!("e2fsprogs not installed");
//! }
//!
//! let tools = &[("cpio", "cpio"), ("gzip", "gzip")];
//! if let Err(e) = check_required_tools(tools) {
//!     eprintln!("{}", e);
//! }
//! ```

use anyhow::{bail, Result};

use crate::output::OutputFormat;

/// Check if a command exists in PATH.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// Host tools needed to write `format`.
///
/// Each tuple is (command_name, package_name).
pub fn tools_for(format: OutputFormat) -> &'static [(&'static str, &'static str)] {
    match format {
        OutputFormat::Tar | OutputFormat::TarZst => &[],
        OutputFormat::KernelInitrd => &[
            ("sh", "coreutils"),
            ("find", "findutils"),
            ("cpio", "cpio"),
            ("gzip", "gzip"),
        ],
        OutputFormat::Raw => &[("mkfs.ext4", "e2fsprogs")],
    }
}

/// Check that specific tools are available.
///
/// # Returns
///
/// * `Ok(())` if all tools are found
/// * `Err` with list of missing tools and their packages
pub fn check_required_tools(tools: &[(&str, &str)]) -> Result<()> {
    let mut missing = Vec::new();

    for (tool, package) in tools {
        if !command_exists(tool) {
            missing.push((*tool, *package));
        }
    }

    if !missing.is_empty() {
        let msg = missing
            .iter()
            .map(|(t, p)| format!("  {} (install: {})", t, p))
            .collect::<Vec<_>>()
            .join("\n");
        bail!("Missing required host tools:\n{}", msg);
    }

    Ok(())
}

/// Check the image backend binary and every tool the selected outputs need.
pub fn check_build_tools(backend_binary: &str, formats: &[OutputFormat]) -> Result<()> {
    let mut tools = vec![(backend_binary, "docker")];
    for format in formats {
        for tool in tools_for(*format) {
            if !tools.contains(tool) {
                tools.push(*tool);
            }
        }
    }
    check_required_tools(&tools)
}
