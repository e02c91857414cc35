//! Output formats.
//!
//! The assembled initrd tar is converted into one or more artifacts next to
//! each other under a common base path:
//!
//! - `tar` - `<base>.tar`, the archive as assembled
//! - `tar-zst` - `<base>.tar.zst`
//! - `kernel+initrd` - `<base>-kernel`, `<base>-initrd.img`, `<base>-cmdline`
//! - `raw` - `<base>.img`, a fixed-size ext4 filesystem image
//!
//! Every artifact is written to a temporary file and renamed into place,
//! and gets a `.sha256` file alongside.

mod kernel_initrd;
mod raw;

use std::ffi::OsString;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

/// Zstd level used for `tar-zst`.
const ZSTD_LEVEL: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Tar,
    TarZst,
    KernelInitrd,
    Raw,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 4] = [
        OutputFormat::Tar,
        OutputFormat::TarZst,
        OutputFormat::KernelInitrd,
        OutputFormat::Raw,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            OutputFormat::Tar => "tar",
            OutputFormat::TarZst => "tar-zst",
            OutputFormat::KernelInitrd => "kernel+initrd",
            OutputFormat::Raw => "raw",
        }
    }

    /// Whether the format has a fixed size and needs `--size`.
    pub fn is_fixed_size(&self) -> bool {
        matches!(self, OutputFormat::Raw)
    }

    /// Write this format for `archive` and return the files created.
    pub fn write(&self, base: &Path, archive: &[u8], options: &OutputOptions) -> Result<Vec<PathBuf>> {
        tracing::info!(format = self.name(), base = %base.display(), "writing output");
        let written = match self {
            OutputFormat::Tar => {
                let path = with_suffix(base, ".tar");
                write_atomic(&path, |file| Ok(file.write_all(archive)?))?;
                vec![path]
            }
            OutputFormat::TarZst => {
                let path = with_suffix(base, ".tar.zst");
                write_atomic(&path, |file| {
                    let mut encoder = zstd::stream::Encoder::new(file, ZSTD_LEVEL)?;
                    encoder.write_all(archive)?;
                    encoder.finish()?;
                    Ok(())
                })?;
                vec![path]
            }
            OutputFormat::KernelInitrd => kernel_initrd::write(base, archive)?,
            OutputFormat::Raw => raw::write(base, archive, options.size_mb)?,
        };

        for path in &written {
            write_checksum(path)?;
        }
        Ok(written)
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match OutputFormat::ALL.iter().find(|format| format.name() == s.trim()) {
            Some(format) => Ok(*format),
            None => bail!(
                "unknown output format '{}'; expected one of: {}",
                s,
                OutputFormat::ALL
                    .iter()
                    .map(|f| f.name())
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputOptions {
    /// Image size in megabytes for fixed-size formats.
    pub size_mb: u64,
}

/// Parse `--output` values, which may repeat and may be comma separated.
///
/// Duplicates are dropped; an empty list selects `kernel+initrd`.
pub fn parse_formats<S: AsRef<str>>(values: &[S]) -> Result<Vec<OutputFormat>> {
    let mut formats = Vec::new();
    for value in values {
        for name in value.as_ref().split(',').filter(|name| !name.trim().is_empty()) {
            let format: OutputFormat = name.parse()?;
            if !formats.contains(&format) {
                formats.push(format);
            }
        }
    }
    if formats.is_empty() {
        formats.push(OutputFormat::KernelInitrd);
    }
    Ok(formats)
}

/// Write every format in turn, stopping at the first failure.
///
/// Sizes are checked for every fixed-size format before anything is written.
pub fn write_outputs(
    base: &Path,
    archive: &[u8],
    formats: &[OutputFormat],
    options: &OutputOptions,
) -> Result<Vec<PathBuf>> {
    if let Some(parent) = base.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating output directory '{}'", parent.display()))?;
    }

    if let Some(format) = formats.iter().find(|f| f.is_fixed_size()) {
        if options.size_mb == 0 {
            bail!("the {format} output needs a non-zero --size");
        }
    }

    let mut written = Vec::new();
    for format in formats {
        let files = format
            .write(base, archive, options)
            .with_context(|| format!("writing {} output", format))?;
        written.extend(files);
    }
    Ok(written)
}

/// `base` with `suffix` appended to its final component.
pub(crate) fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Write `path` through a temporary file in the same directory.
///
/// The destination only appears once `fill` has succeeded.
pub(crate) fn write_atomic<F>(path: &Path, fill: F) -> Result<()>
where
    F: FnOnce(&mut File) -> Result<()>,
{
    let mut temp = temp_sibling(path)?;
    fill(temp.as_file_mut()).with_context(|| format!("writing '{}'", path.display()))?;
    persist(temp, path)
}

pub(crate) fn temp_sibling(path: &Path) -> Result<NamedTempFile> {
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    NamedTempFile::new_in(dir)
        .with_context(|| format!("creating temporary file in '{}'", dir.display()))
}

pub(crate) fn persist(temp: NamedTempFile, path: &Path) -> Result<()> {
    temp.as_file()
        .sync_all()
        .with_context(|| format!("syncing '{}'", path.display()))?;
    temp.persist(path)
        .with_context(|| format!("moving output into place at '{}'", path.display()))?;
    Ok(())
}

/// Unpack `archive` into `dir` with modes and mtimes intact.
pub(crate) fn unpack(archive: &[u8], dir: &Path) -> Result<()> {
    let mut archive = tar::Archive::new(archive);
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(true);
    archive
        .unpack(dir)
        .with_context(|| format!("unpacking image into '{}'", dir.display()))
}

/// Write `<path>.sha256` in `sha256sum -c` format.
fn write_checksum(path: &Path) -> Result<PathBuf> {
    let file = File::open(path).with_context(|| format!("opening '{}'", path.display()))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    let hash = format!("{:x}", hasher.finalize());

    let filename = path
        .file_name()
        .context("output path has no file name")?
        .to_string_lossy();
    let checksum_path = with_suffix(path, ".sha256");
    let content = format!("{hash}  {filename}\n");
    write_atomic(&checksum_path, |file| Ok(file.write_all(content.as_bytes())?))?;

    tracing::debug!(file = %path.display(), sha256 = %hash, "wrote checksum");
    Ok(checksum_path)
}
