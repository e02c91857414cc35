//! CPIO archive creation for initramfs.
//!
//! Provides utilities for creating compressed cpio archives
//! used as initramfs images.

use anyhow::Result;
use std::path::Path;

use crate::process::Cmd;

/// Build a compressed cpio archive from a directory.
///
/// Creates a gzip-compressed cpio archive in newc format, suitable for
/// use as a Linux initramfs. Entries are sorted and owned by root so the
/// same tree always yields the same archive.
///
/// # Arguments
///
/// * `root` - Directory containing the initramfs contents
/// * `output` - Path for the output .cpio.gz file
/// * `gzip_level` - Gzip compression level (1-9, higher = smaller but slower)
///
/// # Example
///
/// ```rust,ignore
/// use initrd_assembler::artifact::cpio::build_cpio;
/// use std::path::Path;
///
/// build_cpio(
///     Path::new("/tmp/initrd-root"),
///     Path::new("/tmp/initrd.img"),
///     6,
/// )?;
/// ```
pub fn build_cpio(root: &Path, output: &Path, gzip_level: u32) -> Result<()> {
    // - find . -print0 | sort -z: stable entry order
    // - cpio -H newc -R 0:0: newc format (required for Linux initramfs), root owned
    // - gzip -n: no name or timestamp in the gzip header
    const PIPELINE: &str = "cd \"$1\" && find . -print0 | LC_ALL=C sort -z \
        | cpio --null --quiet -o -H newc -R 0:0 | gzip -n -\"$3\" > \"$2\"";

    Cmd::new("sh")
        .args(["-c", PIPELINE, "build_cpio"])
        .arg_path(root)
        .arg_path(output)
        .arg(gzip_level.clamp(1, 9).to_string())
        .error_msg(format!("building cpio archive from '{}'", root.display()))
        .run()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_build_cpio() {
        if !crate::preflight::command_exists("cpio") {
            return;
        }
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("root");
        let output = temp.path().join("test.cpio.gz");

        // Create a simple directory structure
        fs::create_dir_all(root.join("bin")).unwrap();
        fs::write(root.join("bin/test"), "#!/bin/sh\necho hello\n").unwrap();
        fs::write(root.join("init"), "#!/bin/sh\nexec /bin/sh\n").unwrap();

        // Build the cpio archive
        build_cpio(&root, &output, 6).unwrap();

        // Verify output exists and is gzip
        let bytes = fs::read(&output).unwrap();
        assert!(bytes.len() > 2);
        assert_eq!(&bytes[..2], &[0x1f, 0x8b]);
    }
}
