//! `kernel+initrd` output: the kernel and cmdline lifted out of `boot/`,
//! everything else packed as a gzipped newc cpio.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tar::{Archive, Builder};
use tempfile::TempDir;

use super::{persist, temp_sibling, with_suffix, write_atomic};
use crate::artifact::cpio::build_cpio;

const GZIP_LEVEL: u32 = 9;

const BOOT_DIR: &str = "boot";
const BOOT_KERNEL: &str = "boot/kernel";
const BOOT_CMDLINE: &str = "boot/cmdline";

#[derive(Debug)]
pub(super) struct BootSplit {
    pub kernel: Vec<u8>,
    pub cmdline: Vec<u8>,
    /// The archive without the boot entries.
    pub rest: Vec<u8>,
}

pub(super) fn write(base: &Path, archive: &[u8]) -> Result<Vec<PathBuf>> {
    let split = split_boot(archive)?;

    let kernel_path = with_suffix(base, "-kernel");
    write_atomic(&kernel_path, |file| Ok(file.write_all(&split.kernel)?))?;

    let staging = TempDir::new().context("creating initrd staging directory")?;
    super::unpack(&split.rest, staging.path())?;

    let initrd_path = with_suffix(base, "-initrd.img");
    let temp = temp_sibling(&initrd_path)?;
    build_cpio(staging.path(), temp.path(), GZIP_LEVEL)?;
    persist(temp, &initrd_path)?;

    let cmdline_path = with_suffix(base, "-cmdline");
    write_atomic(&cmdline_path, |file| Ok(file.write_all(&split.cmdline)?))?;

    Ok(vec![kernel_path, initrd_path, cmdline_path])
}

/// Separate `boot/kernel` and `boot/cmdline` from the rest of the archive.
pub(super) fn split_boot(archive: &[u8]) -> Result<BootSplit> {
    let mut kernel = None;
    let mut cmdline = Vec::new();
    let mut rest = Builder::new(Vec::new());

    let mut entries = Archive::new(archive);
    for entry in entries.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.to_string_lossy().into_owned();
        match path.trim_end_matches('/') {
            BOOT_KERNEL => {
                let mut data = Vec::new();
                entry.read_to_end(&mut data)?;
                kernel = Some(data);
            }
            BOOT_CMDLINE => {
                cmdline.clear();
                entry.read_to_end(&mut cmdline)?;
            }
            BOOT_DIR => {}
            _ => {
                let mut header = entry.header().clone();
                match entry.link_name()?.map(|l| l.into_owned()) {
                    Some(target) => rest.append_link(&mut header, &path, target)?,
                    None => rest.append_data(&mut header, &path, &mut entry)?,
                }
            }
        }
    }

    let Some(kernel) = kernel else {
        bail!("image has no {BOOT_KERNEL}; the kernel+initrd output needs a kernel section");
    };
    Ok(BootSplit {
        kernel,
        cmdline,
        rest: rest.into_inner()?,
    })
}
