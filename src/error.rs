//! Error taxonomy for the assembly pipeline.

use std::fmt;
use std::num::ParseIntError;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, AssemblyError>;

/// Boxed error returned by an [`ImageBackend`](crate::backend::ImageBackend).
pub type BackendError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors raised while assembling an initrd.
///
/// Trust policy evaluation is total and has no variant here.
#[derive(Error, Debug)]
pub enum AssemblyError {
    /// Size string was not a number with an optional `M`/`G` suffix.
    #[error("invalid size '{input}': {source}")]
    InvalidSize {
        input: String,
        #[source]
        source: ParseIntError,
    },

    /// Size parsed but does not fit in a megabyte count.
    #[error("size '{input}' is too large")]
    SizeTooLarge { input: String },

    #[error("found more than one possible kernel image")]
    DuplicateKernel,

    #[error("did not find kernel in kernel image")]
    MissingKernel,

    #[error("did not find kernel filesystem tarball in kernel image")]
    MissingFilesystemTar,

    /// Read or write failure on a tar stream.
    #[error("archive I/O error: {0}")]
    ArchiveIo(#[from] std::io::Error),

    /// An external collaborator (pull, extract, bundle, overlay) failed.
    #[error("{stage} failed for '{image}': {source}")]
    Collaborator {
        stage: Stage,
        image: String,
        #[source]
        source: BackendError,
    },

    /// Archive or kernel error raised while handling a specific image.
    #[error("{stage} failed for '{image}': {source}")]
    Image {
        stage: Stage,
        image: String,
        #[source]
        source: Box<AssemblyError>,
    },
}

impl AssemblyError {
    pub(crate) fn collaborator(
        stage: Stage,
        image: impl Into<String>,
        source: impl Into<BackendError>,
    ) -> Self {
        AssemblyError::Collaborator {
            stage,
            image: image.into(),
            source: source.into(),
        }
    }

    /// Attach the image and pipeline step this error was raised in.
    pub(crate) fn in_image(self, stage: Stage, image: impl Into<String>) -> Self {
        AssemblyError::Image {
            stage,
            image: image.into(),
            source: Box::new(self),
        }
    }

    /// The underlying error, without image context.
    pub fn root_cause(&self) -> &AssemblyError {
        match self {
            AssemblyError::Image { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Image reference the error was raised for, if known.
    pub fn image(&self) -> Option<&str> {
        match self {
            AssemblyError::Collaborator { image, .. } | AssemblyError::Image { image, .. } => {
                Some(image)
            }
            _ => None,
        }
    }
}

/// Pipeline step a collaborator error was raised from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Pull,
    Extract,
    OciConfig,
    Bundle,
    Overlay,
    KernelSplit,
    Append,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Pull => write!(f, "pull"),
            Stage::Extract => write!(f, "extract"),
            Stage::OciConfig => write!(f, "OCI config"),
            Stage::Bundle => write!(f, "bundle"),
            Stage::Overlay => write!(f, "filesystem overlay"),
            Stage::KernelSplit => write!(f, "kernel split"),
            Stage::Append => write!(f, "append"),
        }
    }
}
