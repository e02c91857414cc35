//! Declarative build config.
//!
//! The build config is a YAML document naming the kernel, init images,
//! onboot and service containers, file overlays and the trust policy:
//!
//! ```yaml
//! kernel:
//!   image: linuxkit/kernel:4.9.x
//!   cmdline: console=ttyS0
//! init:
//!   - linuxkit/init:v0.1
//! onboot:
//!   - name: sysctl
//!     image: linuxkit/sysctl:v0.1
//! services:
//!   - name: getty
//!     image: linuxkit/getty:v0.1
//!     env: [INSECURE=true]
//! files:
//!   - path: etc/hostname
//!     contents: "moby\n"
//! trust:
//!   org: [linuxkit]
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{de, Deserialize, Deserializer};

use crate::trust::TrustPolicy;

/// Config name used when the build config is read from stdin.
pub const STDIN_NAME: &str = "moby";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildSpec {
    #[serde(default)]
    pub kernel: Option<KernelSpec>,
    #[serde(default)]
    pub init: Vec<String>,
    /// Run once, in list order, before services start.
    #[serde(default)]
    pub onboot: Vec<ContainerSpec>,
    #[serde(default)]
    pub services: Vec<ContainerSpec>,
    #[serde(default)]
    pub trust: TrustPolicy,
    #[serde(default)]
    pub files: Vec<FileSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KernelSpec {
    pub image: String,
    #[serde(default)]
    pub cmdline: String,
}

/// A named container, run either on boot or as a service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// `source:destination[:options]` bind mounts.
    #[serde(default)]
    pub binds: Vec<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub readonly: bool,
    /// `host` shares the host network namespace.
    #[serde(default)]
    pub net: Option<String>,
    /// `host` shares the host pid namespace.
    #[serde(default)]
    pub pid: Option<String>,
}

/// A path added to the root filesystem after all containers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileSpec {
    pub path: String,
    #[serde(default)]
    pub directory: bool,
    #[serde(default)]
    pub symlink: Option<String>,
    #[serde(default)]
    pub contents: Option<String>,
    /// Host file whose bytes become the contents.
    #[serde(default)]
    pub source: Option<PathBuf>,
    /// Permission bits. Written in octal: `0644`, `"0644"` or `0o644`.
    #[serde(default, deserialize_with = "deserialize_mode")]
    pub mode: Option<u32>,
}

impl BuildSpec {
    /// Drop the trust policy so nothing requires verification.
    pub fn disable_trust(&mut self) {
        self.trust = TrustPolicy::default();
    }
}

/// Parse and validate a YAML build config.
pub fn load_build_spec(yaml: &str) -> Result<BuildSpec> {
    let spec: BuildSpec = serde_yaml::from_str(yaml).context("parsing build config")?;
    validate(&spec)?;
    Ok(spec)
}

/// Where the build config comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Stdin,
    File(PathBuf),
}

impl ConfigSource {
    /// `-` is stdin; a path without a `.yml`/`.yaml` extension gets `.yml`.
    pub fn from_arg(arg: &str) -> Self {
        if arg == "-" {
            return ConfigSource::Stdin;
        }
        let path = PathBuf::from(arg);
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yml") | Some("yaml") => ConfigSource::File(path),
            _ => ConfigSource::File(PathBuf::from(format!("{arg}.yml"))),
        }
    }

    /// Default base name for output files.
    pub fn default_name(&self) -> String {
        match self {
            ConfigSource::Stdin => STDIN_NAME.to_string(),
            ConfigSource::File(path) => path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or(STDIN_NAME)
                .to_string(),
        }
    }

    pub fn read(&self) -> Result<String> {
        match self {
            ConfigSource::Stdin => {
                let mut yaml = String::new();
                std::io::stdin()
                    .read_to_string(&mut yaml)
                    .context("reading build config from stdin")?;
                Ok(yaml)
            }
            ConfigSource::File(path) => fs::read_to_string(path)
                .with_context(|| format!("reading build config '{}'", path.display())),
        }
    }
}

fn validate(spec: &BuildSpec) -> Result<()> {
    if let Some(kernel) = &spec.kernel {
        if kernel.image.trim().is_empty() {
            bail!("invalid build config: kernel.image must not be empty");
        }
    }

    for (index, image) in spec.init.iter().enumerate() {
        if image.trim().is_empty() {
            bail!("invalid build config: init[{index}] must not be empty");
        }
    }

    validate_containers("onboot", &spec.onboot)?;
    validate_containers("services", &spec.services)?;

    for file in &spec.files {
        validate_file(file)?;
    }

    Ok(())
}

fn validate_containers(section: &str, containers: &[ContainerSpec]) -> Result<()> {
    let mut names = BTreeSet::new();
    for container in containers {
        if container.name.is_empty() {
            bail!("invalid build config: {section} entry for '{}' has no name", container.image);
        }
        if container.name.contains('/') || container.name == "." || container.name == ".." {
            bail!(
                "invalid build config: {section} name '{}' is not a plain directory name",
                container.name
            );
        }
        if container.image.trim().is_empty() {
            bail!(
                "invalid build config: {section} container '{}' has no image",
                container.name
            );
        }
        if !names.insert(container.name.as_str()) {
            bail!(
                "invalid build config: duplicate {section} container name '{}'",
                container.name
            );
        }
    }
    Ok(())
}

fn validate_file(file: &FileSpec) -> Result<()> {
    validate_relative_path(&file.path, "files.path")?;

    let kinds = [
        file.directory,
        file.symlink.is_some(),
        file.contents.is_some(),
        file.source.is_some(),
    ];
    if kinds.iter().filter(|set| **set).count() > 1 {
        bail!(
            "invalid build config: file '{}' must use only one of directory, symlink, contents or source",
            file.path
        );
    }
    Ok(())
}

fn deserialize_mode<'de, D>(deserializer: D) -> std::result::Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Mode {
        Number(u32),
        Text(String),
    }

    match Option::<Mode>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Mode::Number(mode)) if mode <= MAX_MODE => Ok(Some(mode)),
        Some(Mode::Number(mode)) => Err(de::Error::custom(format!(
            "file mode {mode:#o} is out of range"
        ))),
        Some(Mode::Text(text)) => parse_octal_mode(&text).map(Some).map_err(de::Error::custom),
    }
}

const MAX_MODE: u32 = 0o7777;

fn parse_octal_mode(text: &str) -> std::result::Result<u32, String> {
    let trimmed = text.trim();
    let digits = trimmed.strip_prefix("0o").unwrap_or(trimmed);
    u32::from_str_radix(digits, 8)
        .ok()
        .filter(|mode| *mode <= MAX_MODE)
        .ok_or_else(|| format!("invalid file mode '{text}', expected octal such as 0644"))
}

fn validate_relative_path(raw: &str, field: &str) -> Result<()> {
    let candidate = Path::new(raw);
    if raw.is_empty() {
        bail!("{field} must not be empty");
    }
    if candidate.is_absolute() {
        bail!("{field} must be relative, got absolute path '{}'", raw);
    }
    for component in candidate.components() {
        if matches!(
            component,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        ) {
            bail!(
                "{field} contains invalid traversal/root component in '{}'",
                raw
            );
        }
    }
    Ok(())
}
