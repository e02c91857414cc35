//! File overlay fragment.
//!
//! Entries from the `files` section are written in declaration order into a
//! tar fragment that lands last in the initrd, so it can override anything
//! the containers provided.

use std::fs;
use std::io;

use anyhow::{Context, Result};
use tar::{Builder, EntryType, Header};

use crate::config::FileSpec;

const DEFAULT_DIR_MODE: u32 = 0o755;
const DEFAULT_FILE_MODE: u32 = 0o644;
const SYMLINK_MODE: u32 = 0o777;

/// Build the overlay tar fragment for `files`.
pub fn build_overlay(files: &[FileSpec]) -> Result<Vec<u8>> {
    let mut builder = Builder::new(Vec::new());

    for file in files {
        let path = file.path.trim_end_matches('/');

        if file.directory {
            let mut header = overlay_header(
                EntryType::Directory,
                file.mode.unwrap_or(DEFAULT_DIR_MODE),
                0,
            );
            builder
                .append_data(&mut header, format!("{path}/"), io::empty())
                .with_context(|| format!("adding overlay directory '{path}'"))?;
            continue;
        }

        if let Some(target) = &file.symlink {
            let mut header = overlay_header(EntryType::Symlink, SYMLINK_MODE, 0);
            builder
                .append_link(&mut header, path, target)
                .with_context(|| format!("adding overlay symlink '{path}' -> '{target}'"))?;
            continue;
        }

        let contents = match (&file.contents, &file.source) {
            (Some(contents), _) => contents.as_bytes().to_vec(),
            (None, Some(source)) => fs::read(source)
                .with_context(|| format!("reading overlay source '{}'", source.display()))?,
            (None, None) => Vec::new(),
        };
        let mut header = overlay_header(
            EntryType::Regular,
            file.mode.unwrap_or(DEFAULT_FILE_MODE),
            contents.len() as u64,
        );
        builder
            .append_data(&mut header, path, &contents[..])
            .with_context(|| format!("adding overlay file '{path}'"))?;
    }

    builder
        .into_inner()
        .context("finalizing filesystem overlay")
}

fn overlay_header(entry_type: EntryType, mode: u32, size: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mode(mode);
    header.set_size(size);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header
}
