//! OCI runtime configuration for onboot and service containers.
//!
//! Only the subset of the runtime spec the boot-time runner consumes is
//! produced: process, root, hostname, mounts and namespaces.

use anyhow::{bail, Result};
use serde::Serialize;

use crate::config::ContainerSpec;

pub const OCI_VERSION: &str = "1.0.0";

const DEFAULT_PATH: &str = "PATH=/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Capabilities granted by `all`.
const ALL_CAPABILITIES: &[&str] = &[
    "CAP_AUDIT_CONTROL",
    "CAP_AUDIT_READ",
    "CAP_AUDIT_WRITE",
    "CAP_BLOCK_SUSPEND",
    "CAP_CHOWN",
    "CAP_DAC_OVERRIDE",
    "CAP_DAC_READ_SEARCH",
    "CAP_FOWNER",
    "CAP_FSETID",
    "CAP_IPC_LOCK",
    "CAP_IPC_OWNER",
    "CAP_KILL",
    "CAP_LEASE",
    "CAP_LINUX_IMMUTABLE",
    "CAP_MAC_ADMIN",
    "CAP_MAC_OVERRIDE",
    "CAP_MKNOD",
    "CAP_NET_ADMIN",
    "CAP_NET_BIND_SERVICE",
    "CAP_NET_BROADCAST",
    "CAP_NET_RAW",
    "CAP_SETFCAP",
    "CAP_SETGID",
    "CAP_SETPCAP",
    "CAP_SETUID",
    "CAP_SYSLOG",
    "CAP_SYS_ADMIN",
    "CAP_SYS_BOOT",
    "CAP_SYS_CHROOT",
    "CAP_SYS_MODULE",
    "CAP_SYS_NICE",
    "CAP_SYS_PACCT",
    "CAP_SYS_PTRACE",
    "CAP_SYS_RAWIO",
    "CAP_SYS_RESOURCE",
    "CAP_SYS_TIME",
    "CAP_SYS_TTY_CONFIG",
    "CAP_WAKE_ALARM",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OciConfig {
    pub oci_version: String,
    pub process: Process,
    pub root: Root,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    pub mounts: Vec<Mount>,
    pub linux: Linux,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Process {
    pub terminal: bool,
    pub user: User,
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub cwd: String,
    pub capabilities: Capabilities,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub uid: u32,
    pub gid: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub bounding: Vec<String>,
    pub effective: Vec<String>,
    pub inheritable: Vec<String>,
    pub permitted: Vec<String>,
    pub ambient: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Root {
    pub path: String,
    pub readonly: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mount {
    pub destination: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub source: String,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Linux {
    pub namespaces: Vec<Namespace>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Namespace {
    #[serde(rename = "type")]
    pub kind: String,
}

impl OciConfig {
    /// Translate a container entry into its runtime configuration.
    pub fn from_container(container: &ContainerSpec) -> Result<Self> {
        let capabilities = expand_capabilities(&container.capabilities)?;

        let mut env = container.env.clone();
        if !env.iter().any(|var| var.starts_with("PATH=")) {
            env.insert(0, DEFAULT_PATH.to_string());
        }

        let mut mounts = default_mounts();
        for bind in &container.binds {
            mounts.push(parse_bind(bind)?);
        }

        Ok(Self {
            oci_version: OCI_VERSION.to_string(),
            process: Process {
                terminal: false,
                user: User { uid: 0, gid: 0 },
                args: container.command.clone(),
                env,
                cwd: container.cwd.clone().unwrap_or_else(|| "/".to_string()),
                capabilities: Capabilities {
                    bounding: capabilities.clone(),
                    effective: capabilities.clone(),
                    inheritable: capabilities.clone(),
                    permitted: capabilities.clone(),
                    ambient: capabilities,
                },
            },
            root: Root {
                path: "rootfs".to_string(),
                readonly: container.readonly,
            },
            hostname: container.hostname.clone(),
            mounts,
            linux: Linux {
                namespaces: namespaces(container),
            },
        })
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}

fn expand_capabilities(requested: &[String]) -> Result<Vec<String>> {
    let mut capabilities = Vec::new();
    for capability in requested {
        let upper = capability.trim().to_ascii_uppercase();
        if upper == "ALL" || upper == "CAP_ALL" {
            return Ok(ALL_CAPABILITIES.iter().map(|c| c.to_string()).collect());
        }
        let name = if upper.starts_with("CAP_") {
            upper
        } else {
            format!("CAP_{upper}")
        };
        if !ALL_CAPABILITIES.contains(&name.as_str()) {
            bail!("unknown capability '{}'", capability);
        }
        if !capabilities.contains(&name) {
            capabilities.push(name);
        }
    }
    Ok(capabilities)
}

fn default_mounts() -> Vec<Mount> {
    vec![
        Mount {
            destination: "/proc".to_string(),
            kind: "proc".to_string(),
            source: "proc".to_string(),
            options: vec!["nosuid".into(), "noexec".into(), "nodev".into()],
        },
        Mount {
            destination: "/dev".to_string(),
            kind: "tmpfs".to_string(),
            source: "tmpfs".to_string(),
            options: vec!["nosuid".into(), "strictatime".into(), "mode=755".into()],
        },
        Mount {
            destination: "/sys".to_string(),
            kind: "sysfs".to_string(),
            source: "sysfs".to_string(),
            options: vec!["nosuid".into(), "noexec".into(), "nodev".into(), "ro".into()],
        },
    ]
}

fn parse_bind(bind: &str) -> Result<Mount> {
    let parts: Vec<&str> = bind.split(':').collect();
    let (source, destination, options) = match parts.as_slice() {
        [source, destination] => (*source, *destination, vec!["rw"]),
        [source, destination, options] => (*source, *destination, options.split(',').collect()),
        _ => bail!("invalid bind '{}': expected source:destination[:options]", bind),
    };
    if !source.starts_with('/') || !destination.starts_with('/') {
        bail!("invalid bind '{}': source and destination must be absolute", bind);
    }

    let mut options: Vec<String> = options.into_iter().map(str::to_string).collect();
    options.insert(0, "rbind".to_string());
    Ok(Mount {
        destination: destination.to_string(),
        kind: "bind".to_string(),
        source: source.to_string(),
        options,
    })
}

fn namespaces(container: &ContainerSpec) -> Vec<Namespace> {
    let shares_host = |value: &Option<String>| value.as_deref() == Some("host");
    let mut kinds = vec!["mount", "ipc", "uts"];
    if !shares_host(&container.net) {
        kinds.push("network");
    }
    if !shares_host(&container.pid) {
        kinds.push("pid");
    }
    kinds
        .into_iter()
        .map(|kind| Namespace {
            kind: kind.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container() -> ContainerSpec {
        ContainerSpec {
            name: "dhcpcd".to_string(),
            image: "linuxkit/dhcpcd:v0.1".to_string(),
            command: vec!["/sbin/dhcpcd".to_string(), "--nobackground".to_string()],
            ..ContainerSpec::default()
        }
    }

    #[test]
    fn defaults() {
        let config = OciConfig::from_container(&container()).unwrap();
        assert_eq!(config.oci_version, OCI_VERSION);
        assert_eq!(config.process.args, vec!["/sbin/dhcpcd", "--nobackground"]);
        assert_eq!(config.process.env, vec![DEFAULT_PATH.to_string()]);
        assert_eq!(config.process.cwd, "/");
        assert_eq!(config.root.path, "rootfs");
        assert_eq!(config.mounts.len(), 3);
        let kinds: Vec<_> = config.linux.namespaces.iter().map(|n| n.kind.as_str()).collect();
        assert_eq!(kinds, vec!["mount", "ipc", "uts", "network", "pid"]);
    }

    #[test]
    fn host_namespaces_are_shared() {
        let spec = ContainerSpec {
            net: Some("host".to_string()),
            pid: Some("host".to_string()),
            ..container()
        };
        let config = OciConfig::from_container(&spec).unwrap();
        let kinds: Vec<_> = config.linux.namespaces.iter().map(|n| n.kind.as_str()).collect();
        assert_eq!(kinds, vec!["mount", "ipc", "uts"]);
    }

    #[test]
    fn capabilities_are_normalized() {
        let spec = ContainerSpec {
            capabilities: vec!["net_admin".to_string(), "CAP_NET_RAW".to_string(), "net_admin".to_string()],
            ..container()
        };
        let config = OciConfig::from_container(&spec).unwrap();
        assert_eq!(config.process.capabilities.effective, vec!["CAP_NET_ADMIN", "CAP_NET_RAW"]);

        let spec = ContainerSpec {
            capabilities: vec!["all".to_string()],
            ..container()
        };
        let config = OciConfig::from_container(&spec).unwrap();
        assert_eq!(config.process.capabilities.bounding.len(), ALL_CAPABILITIES.len());

        let spec = ContainerSpec {
            capabilities: vec!["flying".to_string()],
            ..container()
        };
        assert!(OciConfig::from_container(&spec).is_err());
    }

    #[test]
    fn binds_become_mounts() {
        let spec = ContainerSpec {
            binds: vec!["/var:/var".to_string(), "/etc/resolv.conf:/etc/resolv.conf:ro".to_string()],
            ..container()
        };
        let config = OciConfig::from_container(&spec).unwrap();
        let bind = &config.mounts[3];
        assert_eq!(bind.kind, "bind");
        assert_eq!(bind.options, vec!["rbind", "rw"]);
        assert_eq!(config.mounts[4].options, vec!["rbind", "ro"]);

        let spec = ContainerSpec {
            binds: vec!["var:/var".to_string()],
            ..container()
        };
        assert!(OciConfig::from_container(&spec).is_err());
    }

    #[test]
    fn serializes_runtime_spec_keys() {
        let json = OciConfig::from_container(&container()).unwrap().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&json).unwrap();
        assert_eq!(value["ociVersion"], OCI_VERSION);
        assert_eq!(value["root"]["path"], "rootfs");
        assert_eq!(value["mounts"][0]["type"], "proc");
        assert!(value.get("hostname").is_none());
    }
}
