//! Initrd assembly pipeline.
//!
//! Fragments are appended in a fixed order that the boot-time init relies
//! on:
//!
//! ```text
//! boot/kernel, boot/cmdline        kernel image, split
//! <kernel.tar contents>            kernel image, passed through
//! <init images>                    in list order
//! containers/onboot/000-<name>/    in list order, index is boot priority
//! containers/services/<name>/      in list order
//! <files overlay>                  last, overrides everything above
//! ```
//!
//! Everything runs sequentially. The first error aborts the build and no
//! archive is returned.

use std::io::Cursor;

use crate::artifact::initrd::InitrdWriter;
use crate::artifact::kernel::{split_kernel, KernelEntryNames};
use crate::backend::ImageBackend;
use crate::config::{BuildSpec, ContainerSpec, KernelSpec};
use crate::error::{AssemblyError, Result, Stage};

const ONBOOT_DIR: &str = "containers/onboot";
const SERVICES_DIR: &str = "containers/services";
/// Image name reported for errors in the `files` overlay.
const OVERLAY_IMAGE: &str = "files";

/// Bundle path of the onboot container at list position `index`.
///
/// The zero-padded index makes lexical order match boot order.
pub fn onboot_bundle_path(index: usize, name: &str) -> String {
    format!("{ONBOOT_DIR}/{index:03}-{name}")
}

pub fn service_bundle_path(name: &str) -> String {
    format!("{SERVICES_DIR}/{name}")
}

/// Assemble the initrd for `spec` and return the finished tar archive.
///
/// `pull` forces every image to be fetched again before use.
pub fn build_initrd(spec: &BuildSpec, backend: &dyn ImageBackend, pull: bool) -> Result<Vec<u8>> {
    let mut initrd = InitrdWriter::new(Vec::new());

    if let Some(kernel) = &spec.kernel {
        add_kernel(&mut initrd, spec, kernel, backend, pull)?;
    }

    if !spec.init.is_empty() {
        tracing::info!(count = spec.init.len(), "adding init images");
    }
    for image in &spec.init {
        let verify = spec.trust.requires_trust(image);
        tracing::info!(%image, verify, "processing init image");
        let fragment = backend
            .extract_filesystem(image, "", verify, pull)
            .map_err(|e| AssemblyError::collaborator(Stage::Extract, image, e))?;
        initrd
            .append_fragment(Cursor::new(fragment))
            .map_err(|e| e.in_image(Stage::Append, image))?;
    }

    if !spec.onboot.is_empty() {
        tracing::info!(count = spec.onboot.len(), "adding onboot containers");
    }
    for (index, container) in spec.onboot.iter().enumerate() {
        let path = onboot_bundle_path(index, &container.name);
        add_bundle(&mut initrd, spec, container, &path, backend, pull)?;
    }

    if !spec.services.is_empty() {
        tracing::info!(count = spec.services.len(), "adding service containers");
    }
    for container in &spec.services {
        let path = service_bundle_path(&container.name);
        add_bundle(&mut initrd, spec, container, &path, backend, pull)?;
    }

    tracing::info!(files = spec.files.len(), "adding filesystem overlay");
    let overlay = backend
        .filesystem_overlay(spec)
        .map_err(|e| AssemblyError::collaborator(Stage::Overlay, OVERLAY_IMAGE, e))?;
    initrd
        .append_fragment(Cursor::new(overlay))
        .map_err(|e| e.in_image(Stage::Append, OVERLAY_IMAGE))?;

    let entries = initrd.entries();
    let archive = initrd.finish()?;
    tracing::info!(entries, bytes = archive.len(), "initrd assembled");
    Ok(archive)
}

fn add_kernel(
    initrd: &mut InitrdWriter<Vec<u8>>,
    spec: &BuildSpec,
    kernel: &KernelSpec,
    backend: &dyn ImageBackend,
    pull: bool,
) -> Result<()> {
    let image = kernel.image.as_str();
    let verify = spec.trust.requires_trust(image);

    if pull || verify {
        tracing::info!(%image, verify, "pulling kernel image");
        backend
            .pull(image, verify)
            .map_err(|e| AssemblyError::collaborator(Stage::Pull, image, e))?;
    }

    tracing::info!(%image, "extracting kernel image");
    let export = backend
        .extract_filesystem(image, "", verify, pull)
        .map_err(|e| AssemblyError::collaborator(Stage::Extract, image, e))?;

    let split = split_kernel(Cursor::new(export), &KernelEntryNames::default(), &kernel.cmdline)
        .map_err(|e| e.in_image(Stage::KernelSplit, image))?;
    initrd
        .append_fragment(Cursor::new(split.boot))
        .map_err(|e| e.in_image(Stage::Append, image))?;
    initrd
        .append_fragment(Cursor::new(split.filesystem))
        .map_err(|e| e.in_image(Stage::Append, image))?;
    Ok(())
}

fn add_bundle(
    initrd: &mut InitrdWriter<Vec<u8>>,
    spec: &BuildSpec,
    container: &ContainerSpec,
    path: &str,
    backend: &dyn ImageBackend,
    pull: bool,
) -> Result<()> {
    let image = container.image.as_str();
    let verify = spec.trust.requires_trust(image);
    tracing::info!(%image, %path, verify, "creating OCI bundle");

    let config = backend
        .oci_config(container)
        .map_err(|e| AssemblyError::collaborator(Stage::OciConfig, image, e))?;
    let fragment = backend
        .build_oci_bundle(path, image, &config, verify, pull)
        .map_err(|e| AssemblyError::collaborator(Stage::Bundle, image, e))?;
    let appended = initrd
        .append_fragment(Cursor::new(fragment))
        .map_err(|e| e.in_image(Stage::Append, image))?;
    tracing::debug!(%path, appended, "bundle appended");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::docker::bundle_fragment;
    use crate::backend::OciConfig;
    use crate::config::FileSpec;
    use crate::trust::TrustPolicy;
    use anyhow::bail;
    use std::cell::RefCell;
    use std::io::Read;
    use tar::{Archive, Builder, EntryType, Header};

    /// Backend serving single-file images and recording every call.
    #[derive(Default)]
    struct FakeBackend {
        calls: RefCell<Vec<String>>,
        fail_bundle: Option<String>,
        /// Image whose bundle comes back cut short.
        truncate_bundle: Option<String>,
    }

    fn tar_of(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = Builder::new(Vec::new());
        for (path, data) in entries {
            let mut header = Header::new_gnu();
            header.set_entry_type(EntryType::Regular);
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_mtime(0);
            builder.append_data(&mut header, path, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    impl ImageBackend for FakeBackend {
        fn pull(&self, image: &str, verify: bool) -> anyhow::Result<()> {
            self.calls.borrow_mut().push(format!("pull {image} verify={verify}"));
            Ok(())
        }

        fn extract_filesystem(
            &self,
            image: &str,
            _platform: &str,
            verify: bool,
            allow_pull: bool,
        ) -> anyhow::Result<Vec<u8>> {
            self.calls
                .borrow_mut()
                .push(format!("extract {image} verify={verify} pull={allow_pull}"));
            if image.starts_with("kernel") {
                let nested = tar_of(&[("lib/modules/modules.dep", &b"dep"[..])]);
                return Ok(tar_of(&[("kernel", &b"KERNEL"[..]), ("kernel.tar", &nested[..])]));
            }
            let file = format!("init/{}", image.replace('/', "_"));
            Ok(tar_of(&[(file.as_str(), image.as_bytes())]))
        }

        fn build_oci_bundle(
            &self,
            path: &str,
            image: &str,
            config: &OciConfig,
            verify: bool,
            _allow_pull: bool,
        ) -> anyhow::Result<Vec<u8>> {
            self.calls
                .borrow_mut()
                .push(format!("bundle {path} {image} verify={verify}"));
            if self.fail_bundle.as_deref() == Some(image) {
                bail!("registry unavailable");
            }
            let export = tar_of(&[("bin/app", image.as_bytes())]);
            let mut bundle = bundle_fragment(path, config, &export)?;
            if self.truncate_bundle.as_deref() == Some(image) {
                bundle.truncate(1024 + 100);
            }
            Ok(bundle)
        }
    }

    fn container(name: &str, image: &str) -> ContainerSpec {
        ContainerSpec {
            name: name.to_string(),
            image: image.to_string(),
            ..ContainerSpec::default()
        }
    }

    fn full_spec() -> BuildSpec {
        BuildSpec {
            kernel: Some(KernelSpec {
                image: "kernel/linux:4.9".to_string(),
                cmdline: "console=ttyS0".to_string(),
            }),
            init: vec!["linuxkit/init".to_string(), "linuxkit/runc".to_string()],
            onboot: vec![
                container("sysctl", "linuxkit/sysctl"),
                container("dhcpcd", "linuxkit/dhcpcd"),
                container("mount", "linuxkit/mount"),
            ],
            services: vec![container("getty", "linuxkit/getty")],
            trust: TrustPolicy::default(),
            files: vec![FileSpec {
                path: "etc/hostname".to_string(),
                contents: Some("moby\n".to_string()),
                ..FileSpec::default()
            }],
        }
    }

    fn entry_names(archive: &[u8]) -> Vec<String> {
        let mut archive = Archive::new(archive);
        archive
            .entries()
            .unwrap()
            .map(|e| {
                let path = e.unwrap().path().unwrap().to_string_lossy().into_owned();
                path.trim_end_matches('/').to_string()
            })
            .collect()
    }

    fn first_index(names: &[String], prefix: &str) -> usize {
        names
            .iter()
            .position(|n| n.starts_with(prefix))
            .unwrap_or_else(|| panic!("no entry starting with {prefix}"))
    }

    #[test]
    fn fragments_appear_in_boot_order() {
        let backend = FakeBackend::default();
        let archive = build_initrd(&full_spec(), &backend, false).unwrap();
        let names = entry_names(&archive);

        let order = [
            "boot",
            "lib/modules/modules.dep",
            "init/linuxkit_init",
            "init/linuxkit_runc",
            "containers/onboot/000-sysctl",
            "containers/onboot/001-dhcpcd",
            "containers/onboot/002-mount",
            "containers/services/getty",
            "etc/hostname",
        ];
        let positions: Vec<usize> = order.iter().map(|p| first_index(&names, p)).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{names:?}");
        assert_eq!(&names[..3], &["boot", "boot/kernel", "boot/cmdline"]);
        assert_eq!(names.last().map(String::as_str), Some("etc/hostname"));
    }

    #[test]
    fn boot_files_have_expected_content() {
        let archive = build_initrd(&full_spec(), &FakeBackend::default(), false).unwrap();
        let mut archive = Archive::new(&archive[..]);
        let mut found = Vec::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            let path = entry.path().unwrap().to_string_lossy().into_owned();
            if path.starts_with("boot/") && path != "boot/" {
                let mut data = String::new();
                entry.read_to_string(&mut data).unwrap();
                found.push((path, data));
            }
        }
        assert_eq!(
            found,
            vec![
                ("boot/kernel".to_string(), "KERNEL".to_string()),
                ("boot/cmdline".to_string(), "console=ttyS0".to_string()),
            ]
        );
    }

    #[test]
    fn builds_are_byte_identical() {
        let spec = full_spec();
        let first = build_initrd(&spec, &FakeBackend::default(), false).unwrap();
        let second = build_initrd(&spec, &FakeBackend::default(), false).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn trust_policy_forces_verified_pull() {
        let mut spec = full_spec();
        spec.trust.org_matches.insert("kernel".to_string());
        spec.trust.image_matches.insert("linuxkit/getty".to_string());

        let backend = FakeBackend::default();
        build_initrd(&spec, &backend, false).unwrap();
        let calls = backend.calls.borrow();

        assert_eq!(calls[0], "pull kernel/linux:4.9 verify=true");
        assert_eq!(calls[1], "extract kernel/linux:4.9 verify=true pull=false");
        assert!(calls.contains(&"extract linuxkit/init verify=false pull=false".to_string()));
        assert!(calls
            .contains(&"bundle containers/services/getty linuxkit/getty verify=true".to_string()));
    }

    #[test]
    fn no_pull_without_flag_or_trust() {
        let backend = FakeBackend::default();
        build_initrd(&full_spec(), &backend, false).unwrap();
        assert!(!backend.calls.borrow().iter().any(|c| c.starts_with("pull")));

        let backend = FakeBackend::default();
        build_initrd(&full_spec(), &backend, true).unwrap();
        let calls = backend.calls.borrow();
        assert_eq!(calls[0], "pull kernel/linux:4.9 verify=false");
        assert!(calls.contains(&"extract linuxkit/init verify=false pull=true".to_string()));
    }

    #[test]
    fn first_error_aborts_build() {
        let backend = FakeBackend {
            fail_bundle: Some("linuxkit/dhcpcd".to_string()),
            ..FakeBackend::default()
        };
        let err = build_initrd(&full_spec(), &backend, false).unwrap_err();
        match &err {
            AssemblyError::Collaborator { stage, image, .. } => {
                assert_eq!(*stage, Stage::Bundle);
                assert_eq!(image, "linuxkit/dhcpcd");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.image(), Some("linuxkit/dhcpcd"));
        assert!(err.to_string().contains("'linuxkit/dhcpcd'"));

        let calls = backend.calls.borrow();
        assert_eq!(
            calls.last().map(String::as_str),
            Some("bundle containers/onboot/001-dhcpcd linuxkit/dhcpcd verify=false")
        );
        assert!(!calls.iter().any(|c| c.contains("002-mount")));
        assert!(!calls.iter().any(|c| c.contains("services")));
    }

    #[test]
    fn kernel_errors_propagate() {
        struct NoKernel;
        impl ImageBackend for NoKernel {
            fn pull(&self, _: &str, _: bool) -> anyhow::Result<()> {
                Ok(())
            }
            fn extract_filesystem(&self, _: &str, _: &str, _: bool, _: bool) -> anyhow::Result<Vec<u8>> {
                Ok(tar_of(&[("kernel.tar", &b""[..])]))
            }
            fn build_oci_bundle(
                &self,
                _: &str,
                _: &str,
                _: &OciConfig,
                _: bool,
                _: bool,
            ) -> anyhow::Result<Vec<u8>> {
                unreachable!("kernel failure stops the build first")
            }
        }
        let err = build_initrd(&full_spec(), &NoKernel, false).unwrap_err();
        assert!(matches!(err.root_cause(), AssemblyError::MissingKernel));
        match &err {
            AssemblyError::Image { stage, image, .. } => {
                assert_eq!(*stage, Stage::KernelSplit);
                assert_eq!(image, "kernel/linux:4.9");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(err.to_string().contains("kernel/linux:4.9"));
    }

    #[test]
    fn corrupt_bundle_names_its_image() {
        let backend = FakeBackend {
            truncate_bundle: Some("linuxkit/dhcpcd".to_string()),
            ..FakeBackend::default()
        };
        let err = build_initrd(&full_spec(), &backend, false).unwrap_err();
        match &err {
            AssemblyError::Image { stage, image, .. } => {
                assert_eq!(*stage, Stage::Append);
                assert_eq!(image, "linuxkit/dhcpcd");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(matches!(err.root_cause(), AssemblyError::ArchiveIo(_)));
        assert!(err.to_string().starts_with("append failed for 'linuxkit/dhcpcd'"));
        assert!(!backend.calls.borrow().iter().any(|c| c.contains("002-mount")));
    }

    #[test]
    fn build_without_kernel_still_gets_overlay() {
        let spec = BuildSpec {
            files: full_spec().files,
            ..BuildSpec::default()
        };
        let backend = FakeBackend::default();
        let archive = build_initrd(&spec, &backend, false).unwrap();
        assert_eq!(entry_names(&archive), vec!["etc/hostname"]);
        assert!(backend.calls.borrow().is_empty());
    }

    #[test]
    fn bundle_paths() {
        assert_eq!(onboot_bundle_path(0, "sysctl"), "containers/onboot/000-sysctl");
        assert_eq!(onboot_bundle_path(12, "mount"), "containers/onboot/012-mount");
        assert_eq!(service_bundle_path("getty"), "containers/services/getty");
    }
}
