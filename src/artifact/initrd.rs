//! The initrd archive being assembled.
//!
//! Fragments produced by the image backend are tar streams. They are
//! re-emitted entry by entry into a single output archive, keeping each
//! entry's header fields and content exactly as read.

use std::borrow::Cow;
use std::io::{Read, Write};

use tar::{Archive, Builder, EntryType, Header};

use crate::error::Result;

/// Name of the pseudo-entry carrying a GNU long name or link target.
const LONG_LINK: &[u8] = b"././@LongLink";

/// Append-only writer for the output initrd.
///
/// The end-of-archive trailer is written by [`InitrdWriter::finish`], which
/// consumes the writer so nothing can be appended after it.
pub struct InitrdWriter<W: Write> {
    builder: Builder<W>,
    entries: usize,
}

impl<W: Write> InitrdWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            builder: Builder::new(inner),
            entries: 0,
        }
    }

    /// Number of entries appended so far.
    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Copy every entry of `fragment` into the output.
    ///
    /// Header blocks are copied as read, so names and link targets keep
    /// their exact bytes (`./` prefixes and absolute paths included).
    /// Names that needed a GNU or PAX extension are re-emitted with a GNU
    /// long-name record ahead of the original header. Returns the number
    /// of entries appended. Reaching the end of the fragment does not
    /// finalize the output.
    pub fn append_fragment<R: Read>(&mut self, fragment: R) -> Result<usize> {
        let mut archive = Archive::new(fragment);
        let mut appended = 0;

        for entry in archive.entries()? {
            let mut entry = entry?;
            let header = entry.header().clone();
            let path = entry.path_bytes().into_owned();
            let link = entry.link_name_bytes().map(Cow::into_owned);

            if header.path_bytes().as_ref() != path.as_slice() {
                self.append_long_name(EntryType::GNULongName, &path)?;
            }
            if let Some(link) = &link {
                if header.link_name_bytes().as_deref() != Some(link.as_slice()) {
                    self.append_long_name(EntryType::GNULongLink, link)?;
                }
            }
            self.builder.append(&header, &mut entry)?;
            appended += 1;
        }

        self.entries += appended;
        Ok(appended)
    }

    fn append_long_name(&mut self, kind: EntryType, name: &[u8]) -> Result<()> {
        let mut header = Header::new_gnu();
        if let Some(gnu) = header.as_gnu_mut() {
            gnu.name[..LONG_LINK.len()].copy_from_slice(LONG_LINK);
        }
        header.set_entry_type(kind);
        header.set_mode(0o644);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mtime(0);
        header.set_size(name.len() as u64 + 1);
        header.set_cksum();
        self.builder.append(&header, name.chain(&[0u8][..]))?;
        Ok(())
    }

    /// Write the archive trailer and hand back the underlying writer.
    pub fn finish(self) -> Result<W> {
        Ok(self.builder.into_inner()?)
    }
}
