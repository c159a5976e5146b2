//! PAL trait, the Linux mount-table implementation, and local volume selection.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, ShsError};

/// Mount-point metadata parsed from the kernel mount table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MountPoint {
    pub path: PathBuf,
    pub device: String,
    pub fs_type: String,
    pub is_ram_backed: bool,
    pub is_readonly: bool,
}

/// A local, writable filesystem root that gets scanned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Volume {
    pub path: PathBuf,
    pub device: String,
    pub fs_type: String,
}

impl Volume {
    /// A volume for an explicitly requested scan root.
    #[must_use]
    pub fn from_root(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            device: "explicit".to_string(),
            fs_type: "unknown".to_string(),
        }
    }
}

/// Why a mount was not selected as a scan volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeExclusion {
    Pseudo,
    RamBacked,
    Network,
    ReadOnly,
    ExcludedPath,
}

/// OS abstraction used by the repository locator.
pub trait Platform: Send + Sync {
    fn mount_points(&self) -> Result<Vec<MountPoint>>;
}

/// Linux implementation reading `/proc/self/mounts`.
#[derive(Debug, Default)]
pub struct LinuxPlatform;

impl LinuxPlatform {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Platform for LinuxPlatform {
    fn mount_points(&self) -> Result<Vec<MountPoint>> {
        let raw = fs::read_to_string("/proc/self/mounts").map_err(|source| ShsError::Io {
            path: PathBuf::from("/proc/self/mounts"),
            source,
        })?;
        let mut mounts = parse_proc_mounts(&raw);
        for mount in &mut mounts {
            // Options can lag behind remounts; statvfs is authoritative.
            if !mount.is_readonly && statvfs_readonly(&mount.path) {
                mount.is_readonly = true;
            }
        }
        Ok(mounts)
    }
}

/// In-memory mock implementation for deterministic tests.
#[derive(Debug, Clone, Default)]
pub struct MockPlatform {
    mounts: Vec<MountPoint>,
}

impl MockPlatform {
    #[must_use]
    pub fn new(mounts: Vec<MountPoint>) -> Self {
        Self { mounts }
    }

    /// One writable ext4 mount per path.
    #[must_use]
    pub fn with_local_roots(paths: &[PathBuf]) -> Self {
        let mounts = paths
            .iter()
            .enumerate()
            .map(|(i, path)| MountPoint {
                path: path.clone(),
                device: format!("/dev/mock{i}"),
                fs_type: "ext4".to_string(),
                is_ram_backed: false,
                is_readonly: false,
            })
            .collect();
        Self { mounts }
    }
}

impl Platform for MockPlatform {
    fn mount_points(&self) -> Result<Vec<MountPoint>> {
        Ok(self.mounts.clone())
    }
}

/// Detect active platform implementation.
pub fn detect_platform() -> Result<Arc<dyn Platform>> {
    #[cfg(target_os = "linux")]
    {
        Ok(Arc::new(LinuxPlatform::new()))
    }
    #[cfg(not(target_os = "linux"))]
    {
        Err(ShsError::UnsupportedPlatform {
            details: "volume enumeration is only implemented for Linux; pass explicit roots"
                .to_string(),
        })
    }
}

/// Every mounted local, writable filesystem root, minus excluded pseudo volumes.
///
/// Output is sorted by path so drive enumeration order is stable across runs.
pub fn list_volumes(platform: &dyn Platform, excluded_paths: &[PathBuf]) -> Result<Vec<Volume>> {
    let mut volumes: Vec<Volume> = platform
        .mount_points()?
        .into_iter()
        .filter(|mount| classify_mount(mount, excluded_paths).is_none())
        .map(|mount| Volume {
            path: mount.path,
            device: mount.device,
            fs_type: mount.fs_type,
        })
        .collect();
    volumes.sort_by(|a, b| a.path.cmp(&b.path));
    volumes.dedup_by(|a, b| a.path == b.path);
    Ok(volumes)
}

/// `None` if the mount is an eligible scan volume, otherwise why it is not.
#[must_use]
pub fn classify_mount(mount: &MountPoint, excluded_paths: &[PathBuf]) -> Option<VolumeExclusion> {
    if is_pseudo_fs(&mount.fs_type) {
        return Some(VolumeExclusion::Pseudo);
    }
    if mount.is_ram_backed {
        return Some(VolumeExclusion::RamBacked);
    }
    if is_network_fs(&mount.fs_type) {
        return Some(VolumeExclusion::Network);
    }
    if mount.is_readonly {
        return Some(VolumeExclusion::ReadOnly);
    }
    if excluded_paths
        .iter()
        .any(|excluded| mount.path.starts_with(excluded))
    {
        return Some(VolumeExclusion::ExcludedPath);
    }
    None
}

fn parse_proc_mounts(raw: &str) -> Vec<MountPoint> {
    let mut mounts = Vec::new();
    for line in raw.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 3 {
            eprintln!("[SHS-PAL] warning: skipping malformed /proc/self/mounts line: {line}");
            continue;
        }
        let fs_type = fields[2].to_string();
        let is_readonly = fields
            .get(3)
            .is_some_and(|opts| opts.split(',').any(|opt| opt == "ro"));
        mounts.push(MountPoint {
            path: unescape_mount_path(fields[1]),
            device: fields[0].to_string(),
            is_ram_backed: is_ram_fs(&fs_type),
            is_readonly,
            fs_type,
        });
    }
    mounts
}

fn is_ram_fs(fs_type: &str) -> bool {
    matches!(
        fs_type.to_ascii_lowercase().as_str(),
        "tmpfs" | "ramfs" | "devtmpfs"
    )
}

fn is_pseudo_fs(fs_type: &str) -> bool {
    matches!(
        fs_type.to_ascii_lowercase().as_str(),
        "proc"
            | "sysfs"
            | "devpts"
            | "cgroup"
            | "cgroup2"
            | "securityfs"
            | "debugfs"
            | "tracefs"
            | "pstore"
            | "bpf"
            | "mqueue"
            | "hugetlbfs"
            | "configfs"
            | "fusectl"
            | "autofs"
            | "binfmt_misc"
            | "efivarfs"
            | "nsfs"
            | "rpc_pipefs"
            | "selinuxfs"
            | "squashfs"
    )
}

fn is_network_fs(fs_type: &str) -> bool {
    let lower = fs_type.to_ascii_lowercase();
    matches!(
        lower.as_str(),
        "nfs" | "nfs4" | "cifs" | "smb3" | "smbfs" | "afs" | "ceph" | "glusterfs" | "davfs"
    ) || lower.starts_with("fuse.sshfs")
        || lower.starts_with("fuse.rclone")
}

#[cfg(unix)]
fn statvfs_readonly(path: &Path) -> bool {
    nix::sys::statvfs::statvfs(path)
        .is_ok_and(|stat| stat.flags().contains(nix::sys::statvfs::FsFlags::ST_RDONLY))
}

#[cfg(not(unix))]
fn statvfs_readonly(_path: &Path) -> bool {
    false
}

/// Decode octal escape sequences (`\NNN`) used by the Linux kernel.
/// Returns a PathBuf via OsString to preserve raw bytes (e.g. invalid UTF-8).
fn unescape_mount_path(raw: &str) -> PathBuf {
    let mut bytes = Vec::with_capacity(raw.len());
    let raw_bytes = raw.as_bytes();
    let mut i = 0;
    while i < raw_bytes.len() {
        if raw_bytes[i] == b'\\' && i + 3 < raw_bytes.len() {
            let digits = &raw_bytes[i + 1..i + 4];
            if digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
                let val = (digits[0] - b'0') * 64 + (digits[1] - b'0') * 8 + (digits[2] - b'0');
                bytes.push(val);
                i += 4;
                continue;
            }
        }
        bytes.push(raw_bytes[i]);
        i += 1;
    }

    #[cfg(unix)]
    {
        use std::os::unix::ffi::OsStringExt;
        PathBuf::from(std::ffi::OsString::from_vec(bytes))
    }
    #[cfg(not(unix))]
    {
        PathBuf::from(String::from_utf8_lossy(&bytes).into_owned())
    }
}
