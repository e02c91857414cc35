//! Image backends.
//!
//! The assembly pipeline never talks to a registry or container engine
//! directly. It asks an [`ImageBackend`] to pull images and to export them
//! as tar fragments, either as a plain filesystem (kernel and init images)
//! or as an OCI runtime bundle (onboot and service containers).
//!
//! - [`docker`] - Backend driving the `docker` CLI
//! - [`oci`] - OCI runtime configuration written into bundles

pub mod docker;
pub mod oci;

use anyhow::Result;

use crate::artifact::overlay::build_overlay;
use crate::config::{BuildSpec, ContainerSpec};

pub use docker::DockerBackend;
pub use oci::OciConfig;

/// Collaborator supplying image contents to the pipeline.
///
/// `verify` asks for content trust verification; `allow_pull` permits the
/// backend to fetch an image it does not have locally.
pub trait ImageBackend {
    /// Fetch `image`, verifying its signature when `verify` is set.
    fn pull(&self, image: &str, verify: bool) -> Result<()>;

    /// Export the root filesystem of `image` as a tar stream.
    ///
    /// An empty `platform` uses the engine default.
    fn extract_filesystem(
        &self,
        image: &str,
        platform: &str,
        verify: bool,
        allow_pull: bool,
    ) -> Result<Vec<u8>>;

    /// Export `image` as an OCI bundle rooted at `path` inside the tar stream.
    fn build_oci_bundle(
        &self,
        path: &str,
        image: &str,
        config: &OciConfig,
        verify: bool,
        allow_pull: bool,
    ) -> Result<Vec<u8>>;

    /// Runtime configuration for a container entry.
    fn oci_config(&self, container: &ContainerSpec) -> Result<OciConfig> {
        OciConfig::from_container(container)
    }

    /// Tar fragment holding the `files` section.
    fn filesystem_overlay(&self, spec: &BuildSpec) -> Result<Vec<u8>> {
        build_overlay(&spec.files)
    }
}
