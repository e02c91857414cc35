//! Archive builders for the assembled image.
//!
//! - [`initrd`] - Concatenates tar fragments into the initrd archive
//! - [`kernel`] - Splits a kernel image into boot entries and its filesystem tar
//! - [`overlay`] - Builds the tar fragment for the `files` section
//! - [`cpio`] - Compressed newc cpio archives for the kernel+initrd output

pub mod cpio;
pub mod initrd;
pub mod kernel;
pub mod overlay;
