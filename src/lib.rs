//! Assembles a bootable initrd from container images.
//!
//! A build description names a kernel image, init images, on-boot
//! containers and long-running services. Each is exported by an image
//! backend as a tar fragment and appended, in order, to one archive:
//!
//! ```text
//! build description (YAML)
//!     │
//!     ├── kernel   ─► boot/kernel, boot/cmdline, kernel filesystem tar
//!     ├── init     ─► image filesystems, as-is
//!     ├── onboot   ─► containers/onboot/NNN-<name>/{config.json,rootfs/}
//!     ├── services ─► containers/services/<name>/{config.json,rootfs/}
//!     └── files    ─► literal files, directories and symlinks
//!                          │
//!                          ▼
//!                  initrd tar ─► tar | tar-zst | kernel+initrd | raw
//! ```
//!
//! Images listed in the trust policy are pulled with signature
//! verification before use.
//!
//! # Example
//!
//! ```rust,ignore
//! use initrd_assembler::backend::DockerBackend;
//! use initrd_assembler::config::load_build_spec;
//! use initrd_assembler::pipeline::build_initrd;
//!
//! let spec = load_build_spec(&std::fs::read_to_string("linuxkit.yml")?)?;
//! let initrd = build_initrd(&spec, &DockerBackend::new(), false)?;
//! ```

pub mod artifact;
pub mod backend;
pub mod config;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod preflight;
pub mod process;
pub mod size;
pub mod trust;

pub use backend::{DockerBackend, ImageBackend};
pub use config::{load_build_spec, BuildSpec};
pub use error::{AssemblyError, Result};
pub use output::{OutputFormat, OutputOptions};
pub use pipeline::build_initrd;
pub use size::parse_size_mb;
pub use trust::TrustPolicy;
