//! Kernel image splitting.
//!
//! A kernel container exports the kernel binary and a `kernel.tar` holding
//! the modules and firmware for the root filesystem. The binary is moved to
//! `boot/kernel` next to a `boot/cmdline` file; the nested tarball is
//! passed through untouched.

use std::io::{self, Read};

use tar::{Archive, Builder, EntryType, Header};

use crate::error::{AssemblyError, Result};

/// Mode of the generated `boot/` directory and `boot/cmdline` file.
const BOOT_MODE: u32 = 0o700;

/// Entry names looked up in a kernel container export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelEntryNames {
    pub primary: String,
    pub alternate: String,
    /// Nested tarball with the kernel's filesystem contribution.
    pub filesystem_tar: String,
}

impl Default for KernelEntryNames {
    fn default() -> Self {
        Self {
            primary: "kernel".to_string(),
            alternate: "bzImage".to_string(),
            filesystem_tar: "kernel.tar".to_string(),
        }
    }
}

impl KernelEntryNames {
    fn is_kernel(&self, name: &[u8]) -> bool {
        name == self.primary.as_bytes() || name == self.alternate.as_bytes()
    }
}

/// The two fragments produced from a kernel container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitKernel {
    /// `boot/`, `boot/kernel` and `boot/cmdline`.
    pub boot: Vec<u8>,
    /// The nested kernel filesystem tarball, verbatim.
    pub filesystem: Vec<u8>,
}

/// Split a kernel container export in a single pass.
///
/// Exactly one entry may match either kernel name. Entries matching
/// neither the kernel names nor the filesystem tarball are skipped.
pub fn split_kernel<R: Read>(
    container_tar: R,
    names: &KernelEntryNames,
    cmdline: &str,
) -> Result<SplitKernel> {
    let mut archive = Archive::new(container_tar);
    let mut boot = None;
    let mut filesystem = None;

    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = entry.path_bytes().into_owned();

        if names.is_kernel(&name) {
            if boot.is_some() {
                return Err(AssemblyError::DuplicateKernel);
            }
            let mode = entry.header().mode()?;
            let size = entry.header().size()?;
            tracing::debug!(
                entry = %String::from_utf8_lossy(&name),
                size,
                "found kernel binary"
            );
            boot = Some(boot_fragment(&mut entry, mode, size, cmdline)?);
        } else if name == names.filesystem_tar.as_bytes() {
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes)?;
            tracing::debug!(size = bytes.len(), "found kernel filesystem tarball");
            filesystem = Some(bytes);
        }
    }

    let boot = boot.ok_or(AssemblyError::MissingKernel)?;
    let filesystem = filesystem.ok_or(AssemblyError::MissingFilesystemTar)?;
    Ok(SplitKernel { boot, filesystem })
}

fn boot_fragment<R: Read>(kernel: &mut R, mode: u32, size: u64, cmdline: &str) -> io::Result<Vec<u8>> {
    let mut builder = Builder::new(Vec::new());

    let mut header = boot_header(EntryType::Directory, BOOT_MODE, 0);
    builder.append_data(&mut header, "boot/", io::empty())?;

    let mut header = boot_header(EntryType::Regular, mode, size);
    builder.append_data(&mut header, "boot/kernel", kernel)?;

    let mut header = boot_header(EntryType::Regular, BOOT_MODE, cmdline.len() as u64);
    builder.append_data(&mut header, "boot/cmdline", cmdline.as_bytes())?;

    builder.into_inner()
}

fn boot_header(entry_type: EntryType, mode: u32, size: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mode(mode);
    header.set_size(size);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header
}
