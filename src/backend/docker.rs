//! Docker CLI backend.
//!
//! Images are exported through a throwaway container:
//! `docker create` → `docker export` → `docker rm`. Content trust is
//! requested from Docker with `DOCKER_CONTENT_TRUST=1`.

use std::io;

use anyhow::{Context, Result};
use tar::{Archive, Builder, EntryType, Header};

use super::oci::OciConfig;
use super::ImageBackend;
use crate::process::Cmd;

const DEFAULT_DOCKER: &str = "docker";

/// Entries Docker injects into every exported container.
const DOCKER_INJECTED: &[&str] = &[
    ".dockerenv",
    "Dockerfile",
    "dev/console",
    "dev/pts",
    "dev/shm",
    "etc/hostname",
    "etc/hosts",
    "etc/mtab",
    "etc/resolv.conf",
];

#[derive(Debug, Clone)]
pub struct DockerBackend {
    binary: String,
}

impl Default for DockerBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerBackend {
    pub fn new() -> Self {
        Self {
            binary: DEFAULT_DOCKER.to_string(),
        }
    }

    /// Use a different Docker-compatible CLI, such as `podman`.
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn docker(&self, verify: bool) -> Cmd {
        let cmd = Cmd::new(&self.binary);
        if verify {
            cmd.env("DOCKER_CONTENT_TRUST", "1")
        } else {
            cmd
        }
    }

    /// Raw `docker export` stream of a fresh container from `image`.
    fn export(&self, image: &str, platform: &str, verify: bool, allow_pull: bool) -> Result<Vec<u8>> {
        if allow_pull {
            self.pull(image, verify)?;
        }

        let mut create = self.docker(verify).arg("create");
        if !platform.is_empty() {
            create = create.args(["--platform", platform]);
        }
        let created = create
            .args(["--entrypoint", "/dev/null", image])
            .error_msg(format!("docker create failed for '{image}'"))
            .run()?;
        let container = created.stdout.trim().to_string();
        tracing::debug!(%image, %container, "created export container");

        let exported = self
            .docker(false)
            .args(["export", container.as_str()])
            .error_msg(format!("docker export failed for '{image}'"))
            .run_bytes();

        let removed = self
            .docker(false)
            .args(["rm", container.as_str()])
            .allow_fail()
            .run();
        match removed {
            Ok(result) if result.success() => {}
            Ok(result) => {
                tracing::warn!(%container, stderr = %result.stderr, "failed to remove export container")
            }
            Err(e) => tracing::warn!(%container, error = %e, "failed to remove export container"),
        }

        exported
    }
}

impl ImageBackend for DockerBackend {
    fn pull(&self, image: &str, verify: bool) -> Result<()> {
        tracing::info!(%image, verify, "pulling image");
        self.docker(verify)
            .args(["pull", image])
            .error_msg(format!("docker pull failed for '{image}'"))
            .run()?;
        Ok(())
    }

    fn extract_filesystem(
        &self,
        image: &str,
        platform: &str,
        verify: bool,
        allow_pull: bool,
    ) -> Result<Vec<u8>> {
        let export = self.export(image, platform, verify, allow_pull)?;
        let mut builder = Builder::new(Vec::new());
        rewrite_export(&export, "", &mut builder)
            .with_context(|| format!("filtering export of '{image}'"))?;
        Ok(builder.into_inner()?)
    }

    fn build_oci_bundle(
        &self,
        path: &str,
        image: &str,
        config: &OciConfig,
        verify: bool,
        allow_pull: bool,
    ) -> Result<Vec<u8>> {
        let export = self.export(image, "", verify, allow_pull)?;
        bundle_fragment(path, config, &export)
            .with_context(|| format!("building OCI bundle '{path}' from '{image}'"))
    }
}

/// Lay out an OCI bundle: `path/`, `path/config.json`, `path/rootfs/...`.
pub fn bundle_fragment(path: &str, config: &OciConfig, export: &[u8]) -> Result<Vec<u8>> {
    let path = path.trim_end_matches('/');
    let mut builder = Builder::new(Vec::new());

    let mut header = bundle_header(EntryType::Directory, 0o755, 0);
    builder.append_data(&mut header, format!("{path}/"), io::empty())?;

    let json = config.to_json()?;
    let mut header = bundle_header(EntryType::Regular, 0o644, json.len() as u64);
    builder.append_data(&mut header, format!("{path}/config.json"), &json[..])?;

    let rootfs = format!("{path}/rootfs/");
    let mut header = bundle_header(EntryType::Directory, 0o755, 0);
    builder.append_data(&mut header, &rootfs, io::empty())?;

    rewrite_export(export, &rootfs, &mut builder)?;
    Ok(builder.into_inner()?)
}

/// Copy an export into `builder` under `prefix`, dropping Docker's own files.
fn rewrite_export(export: &[u8], prefix: &str, builder: &mut Builder<Vec<u8>>) -> Result<()> {
    let mut archive = Archive::new(export);
    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.to_string_lossy().into_owned();
        let relative = name.trim_start_matches("./");
        if is_docker_injected(relative) {
            continue;
        }

        let mut header = entry.header().clone();
        let path = format!("{prefix}{relative}");
        let link = entry
            .link_name()?
            .map(|target| target.to_string_lossy().into_owned());
        match link {
            // Hard link targets are archive paths and move with the prefix.
            Some(target) if header.entry_type() == EntryType::Link => {
                let target = format!("{prefix}{}", target.trim_start_matches("./"));
                builder.append_link(&mut header, &path, &target)?;
            }
            Some(target) => builder.append_link(&mut header, &path, &target)?,
            None => builder.append_data(&mut header, &path, &mut entry)?,
        }
    }
    Ok(())
}

fn is_docker_injected(path: &str) -> bool {
    let path = path.trim_end_matches('/');
    DOCKER_INJECTED.iter().any(|injected| {
        path == *injected
            || path
                .strip_prefix(injected)
                .is_some_and(|rest| rest.starts_with('/'))
    })
}

fn bundle_header(entry_type: EntryType, mode: u32, size: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(entry_type);
    header.set_mode(mode);
    header.set_size(size);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header
}
