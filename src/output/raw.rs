//! `raw` output: a fixed-size ext4 image populated from the archive.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tempfile::TempDir;

use super::{persist, temp_sibling, with_suffix};
use crate::process::Cmd;

const FS_LABEL: &str = "linuxkit";

pub(super) fn write(base: &Path, archive: &[u8], size_mb: u64) -> Result<Vec<PathBuf>> {
    if size_mb == 0 {
        bail!("the raw output needs a non-zero --size");
    }

    let Some(size_bytes) = size_mb.checked_mul(1024 * 1024) else {
        bail!("raw image size {size_mb}M is too large");
    };

    let staging = TempDir::new().context("creating raw image staging directory")?;
    super::unpack(archive, staging.path())?;

    let image_path = with_suffix(base, ".img");
    let temp = temp_sibling(&image_path)?;
    // Sparse until mkfs fills it.
    temp.as_file()
        .set_len(size_bytes)
        .with_context(|| format!("sizing '{}' to {size_mb}M", image_path.display()))?;

    Cmd::new("mkfs.ext4")
        .args(["-q", "-F", "-L", FS_LABEL])
        .args(["-E", "root_owner=0:0"])
        .arg("-d")
        .arg_path(staging.path())
        .arg_path(temp.path())
        .error_msg(format!(
            "mkfs.ext4 -d failed for '{}'. Check that e2fsprogs supports -d and that {size_mb}M fits the image.",
            image_path.display()
        ))
        .run()?;

    persist(temp, &image_path)?;
    Ok(vec![image_path])
}
