//! Mount primitives and mount-table inspection.
//!
//! The node service never remembers what it mounted.  Every transition asks
//! the mount table through [`mount_state`] and acts on the answer, so a
//! process restart or a crash half-way through a transition is reconciled by
//! the next call.
//!
//! All functions in this module block; callers run them on
//! `tokio::task::spawn_blocking`.

use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info, warn};

use crate::error::CsiError;

/// Default location of the kernel mount table for this process.
pub const PROC_MOUNTS: &str = "/proc/self/mounts";

/// One line of the mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    /// Mount source, e.g. `10.0.0.5:/exports/pvc-1`.
    pub source: String,
    /// Absolute path the filesystem is mounted on.
    pub mount_point: PathBuf,
    /// Filesystem type, e.g. `nfs4`.
    pub fs_type: String,
    /// Mount options in table order.
    pub options: Vec<String>,
}

impl MountEntry {
    pub fn is_read_only(&self) -> bool {
        self.options.iter().any(|o| o == "ro")
    }
}

/// The mount/unmount capability the node service is built on.
///
/// [`SystemMounter`] talks to the kernel; tests substitute an in-memory
/// table.
pub trait Mounter: Send + Sync {
    /// Mount `source` on the existing directory `target`.
    fn mount(
        &self,
        source: &str,
        target: &Path,
        fs_type: &str,
        options: &[String],
    ) -> Result<(), CsiError>;

    /// Unmount whatever is mounted on top of `target`.
    fn unmount(&self, target: &Path) -> Result<(), CsiError>;

    /// Current mount table, in mount order.
    fn mount_points(&self) -> io::Result<Vec<MountEntry>>;
}

/// Answer to "is this path a mount point".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountState {
    /// Something is mounted on the path; the topmost entry is returned.
    Mounted(MountEntry),
    /// The path exists and nothing is mounted on it.
    NotMounted,
    /// The path does not exist.
    PathMissing,
}

/// Inspect `path` against the mount table.
///
/// A path whose `stat` fails with anything but `ENOENT` (a stale NFS handle,
/// a dead FUSE daemon) is still reported as mounted when the table lists it,
/// so that cleanup can unmount it.
pub fn mount_state(mounter: &dyn Mounter, path: &Path) -> io::Result<MountState> {
    let resolved = match std::fs::symlink_metadata(path) {
        Ok(_) => std::fs::canonicalize(path).ok(),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(MountState::PathMissing),
        Err(e) => {
            let table = mounter.mount_points()?;
            return match table.into_iter().rev().find(|m| m.mount_point == path) {
                Some(entry) => {
                    warn!(path = %path.display(), error = %e, "mount point is not accessible");
                    Ok(MountState::Mounted(entry))
                }
                None => Err(e),
            };
        }
    };

    let entry = mounter.mount_points()?.into_iter().rev().find(|m| {
        m.mount_point == path || resolved.as_deref() == Some(m.mount_point.as_path())
    });
    Ok(match entry {
        Some(entry) => MountState::Mounted(entry),
        None => MountState::NotMounted,
    })
}

/// `true` when something is mounted on `path`.  A missing path is not a
/// mount point.
pub fn is_mount_point(mounter: &dyn Mounter, path: &Path) -> io::Result<bool> {
    Ok(matches!(mount_state(mounter, path)?, MountState::Mounted(_)))
}

/// Unmount `path` if it is a mount point, then remove the directory.
///
/// Succeeds when the path is already gone or was never mounted.  The
/// directory is removed with `rmdir`, so a path that still holds data after
/// the unmount is reported instead of deleted.
pub fn cleanup_mount_point(mounter: &dyn Mounter, path: &Path) -> Result<(), CsiError> {
    let unmount_failed = |reason: String| CsiError::UnmountFailed {
        path: path.display().to_string(),
        reason,
    };

    match mount_state(mounter, path) {
        Ok(MountState::PathMissing) => {
            debug!(path = %path.display(), "target path gone, nothing to clean up");
            return Ok(());
        }
        Ok(MountState::NotMounted) => {
            debug!(path = %path.display(), "target not mounted, removing directory");
        }
        Ok(MountState::Mounted(entry)) => {
            mounter.unmount(path)?;
            info!(path = %path.display(), source = %entry.source, "unmounted");
            if is_mount_point(mounter, path)
                .map_err(|e| unmount_failed(format!("inspect after unmount: {e}")))?
            {
                return Err(unmount_failed("still mounted after unmount".into()));
            }
        }
        Err(e) => return Err(unmount_failed(format!("inspect mount state: {e}"))),
    }

    match std::fs::remove_dir(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(unmount_failed(format!("remove target dir: {e}"))),
    }
}

// ---------------------------------------------------------------------------
// Mount table parsing
// ---------------------------------------------------------------------------

/// Parse the contents of `/proc/<pid>/mounts`.
///
/// Format: `<device> <mountpoint> <fstype> <options> <dump> <pass>`, with
/// whitespace and backslashes in the first two fields octal-escaped by the
/// kernel.  Malformed lines are skipped.
pub fn parse_mount_table(contents: &str) -> Vec<MountEntry> {
    contents
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let mount_point = fields.next()?;
            let fs_type = fields.next()?;
            let options = fields.next()?;
            Some(MountEntry {
                source: unescape_octal(source),
                mount_point: PathBuf::from(unescape_octal(mount_point)),
                fs_type: fs_type.to_owned(),
                options: options.split(',').map(str::to_owned).collect(),
            })
        })
        .collect()
}

/// Decode `\NNN` octal escapes (`\040` space, `\011` tab, `\012` newline,
/// `\134` backslash).
fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let value = digits
                    .iter()
                    .fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
                if let Ok(v) = u8::try_from(value) {
                    out.push(v);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

// ---------------------------------------------------------------------------
// SystemMounter
// ---------------------------------------------------------------------------

/// [`Mounter`] backed by the host's `mount(8)` helper and `umount(2)`.
///
/// Mounting goes through `mount -t <fs>` so that `mount.nfs` resolves the
/// server address and negotiates the protocol version.
#[derive(Debug, Clone)]
pub struct SystemMounter {
    mount_table: PathBuf,
}

impl SystemMounter {
    /// Use a different mount table, e.g. `/proc/1/mounts` when running in a
    /// container that shares the host mount namespace.
    pub fn with_mount_table(mount_table: impl Into<PathBuf>) -> Self {
        Self {
            mount_table: mount_table.into(),
        }
    }
}

impl Default for SystemMounter {
    fn default() -> Self {
        Self::with_mount_table(PROC_MOUNTS)
    }
}

impl Mounter for SystemMounter {
    fn mount(
        &self,
        source: &str,
        target: &Path,
        fs_type: &str,
        options: &[String],
    ) -> Result<(), CsiError> {
        let mut cmd = Command::new("mount");
        cmd.arg("-t").arg(fs_type);
        if !options.is_empty() {
            cmd.arg("-o").arg(options.join(","));
        }
        cmd.arg(source).arg(target);
        debug!("Running {:?}", cmd);

        let output = cmd.output().map_err(|e| CsiError::MountFailed {
            path: target.display().to_string(),
            reason: format!("spawn mount: {e}"),
        })?;
        if !output.status.success() {
            return Err(CsiError::MountFailed {
                path: target.display().to_string(),
                reason: format!(
                    "mount {source} exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(())
    }

    fn unmount(&self, target: &Path) -> Result<(), CsiError> {
        nix::mount::umount(target).map_err(|e| CsiError::UnmountFailed {
            path: target.display().to_string(),
            reason: e.to_string(),
        })
    }

    fn mount_points(&self) -> io::Result<Vec<MountEntry>> {
        let contents = std::fs::read_to_string(&self.mount_table)?;
        Ok(parse_mount_table(&contents))
    }
}

// ---------------------------------------------------------------------------
// In-memory mounter for tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod fake {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    /// Keeps the mount table in memory.  Targets must exist on the real
    /// filesystem, like they must for `mount(2)`.
    #[derive(Default)]
    pub(crate) struct FakeMounter {
        table: Mutex<Vec<MountEntry>>,
        mount_delay: Duration,
        mount_error: Mutex<Option<String>>,
        mount_calls: AtomicUsize,
    }

    impl FakeMounter {
        /// A mounter whose `mount` sleeps, to widen race windows.
        pub(crate) fn with_delay(mount_delay: Duration) -> Self {
            Self {
                mount_delay,
                ..Default::default()
            }
        }

        /// Make every following `mount` call fail with `reason`.
        pub(crate) fn fail_mounts(&self, reason: &str) {
            *self.mount_error.lock().unwrap() = Some(reason.to_owned());
        }

        pub(crate) fn entries(&self) -> Vec<MountEntry> {
            self.table.lock().unwrap().clone()
        }

        pub(crate) fn mount_calls(&self) -> usize {
            self.mount_calls.load(Ordering::SeqCst)
        }

        /// Insert an entry as if something else had mounted it.
        pub(crate) fn preload(&self, entry: MountEntry) {
            self.table.lock().unwrap().push(entry);
        }
    }

    impl Mounter for FakeMounter {
        fn mount(
            &self,
            source: &str,
            target: &Path,
            fs_type: &str,
            options: &[String],
        ) -> Result<(), CsiError> {
            self.mount_calls.fetch_add(1, Ordering::SeqCst);
            if !self.mount_delay.is_zero() {
                std::thread::sleep(self.mount_delay);
            }
            if let Some(reason) = self.mount_error.lock().unwrap().clone() {
                return Err(CsiError::MountFailed {
                    path: target.display().to_string(),
                    reason,
                });
            }
            if !target.is_dir() {
                return Err(CsiError::MountFailed {
                    path: target.display().to_string(),
                    reason: "No such file or directory".into(),
                });
            }
            self.table.lock().unwrap().push(MountEntry {
                source: source.to_owned(),
                mount_point: target.to_path_buf(),
                fs_type: fs_type.to_owned(),
                options: options.to_vec(),
            });
            Ok(())
        }

        fn unmount(&self, target: &Path) -> Result<(), CsiError> {
            let mut table = self.table.lock().unwrap();
            match table.iter().rposition(|m| m.mount_point == target) {
                Some(idx) => {
                    table.remove(idx);
                    Ok(())
                }
                None => Err(CsiError::UnmountFailed {
                    path: target.display().to_string(),
                    reason: "Invalid argument".into(),
                }),
            }
        }

        fn mount_points(&self) -> io::Result<Vec<MountEntry>> {
            Ok(self.entries())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeMounter;
    use super::*;

    const SAMPLE: &str = "\
sysfs /sys sysfs rw,nosuid,nodev,noexec,relatime 0 0
10.0.0.5:/exports/pvc-1 /var/lib/kubelet/pods/a/volumes/my\\040vol nfs4 rw,relatime,vers=4.1 0 0
bad-line
tmpfs /mnt/stacked tmpfs rw 0 0
10.0.0.5:/exports/pvc-2 /mnt/stacked nfs4 ro,relatime 0 0
";

    fn entry(source: &str, mount_point: &Path) -> MountEntry {
        MountEntry {
            source: source.into(),
            mount_point: mount_point.to_path_buf(),
            fs_type: "nfs".into(),
            options: vec![],
        }
    }

    #[test]
    fn parse_decodes_escapes_and_skips_garbage() {
        let table = parse_mount_table(SAMPLE);
        assert_eq!(table.len(), 4);
        assert_eq!(
            table[1].mount_point,
            PathBuf::from("/var/lib/kubelet/pods/a/volumes/my vol")
        );
        assert_eq!(table[1].fs_type, "nfs4");
        assert_eq!(table[1].options, vec!["rw", "relatime", "vers=4.1"]);
        assert!(!table[1].is_read_only());
        assert!(table[3].is_read_only());
    }

    #[test]
    fn unescape_handles_edge_cases() {
        assert_eq!(unescape_octal(r"a\134b"), r"a\b");
        assert_eq!(unescape_octal(r"tab\011x"), "tab\tx");
        assert_eq!(unescape_octal(r"short\04"), r"short\04");
        assert_eq!(unescape_octal(r"bad\09x"), r"bad\09x");
        assert_eq!(unescape_octal(r"big\777"), r"big\777");
    }

    #[test]
    fn state_is_tri_state() {
        let tmp = tempfile::tempdir().unwrap();
        let mounter = FakeMounter::default();
        let target = tmp.path().join("target");

        assert_eq!(
            mount_state(&mounter, &target).unwrap(),
            MountState::PathMissing
        );

        std::fs::create_dir(&target).unwrap();
        assert_eq!(
            mount_state(&mounter, &target).unwrap(),
            MountState::NotMounted
        );

        mounter.preload(entry("srv:/a", &target));
        assert!(matches!(
            mount_state(&mounter, &target).unwrap(),
            MountState::Mounted(e) if e.source == "srv:/a"
        ));
    }

    #[test]
    fn topmost_stacked_mount_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let mounter = FakeMounter::default();
        mounter.preload(entry("srv:/lower", tmp.path()));
        mounter.preload(entry("srv:/upper", tmp.path()));

        let MountState::Mounted(top) = mount_state(&mounter, tmp.path()).unwrap() else {
            panic!("expected a mount");
        };
        assert_eq!(top.source, "srv:/upper");
    }

    #[test]
    fn cleanup_unmounts_and_removes_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let mounter = FakeMounter::default();
        let target = tmp.path().join("target");
        std::fs::create_dir(&target).unwrap();
        mounter.preload(entry("srv:/a", &target));

        cleanup_mount_point(&mounter, &target).unwrap();
        assert!(mounter.entries().is_empty());
        assert!(!target.exists());

        // Second call finds nothing to do.
        cleanup_mount_point(&mounter, &target).unwrap();
    }

    #[test]
    fn cleanup_reports_stacked_mount() {
        let tmp = tempfile::tempdir().unwrap();
        let mounter = FakeMounter::default();
        let target = tmp.path().join("target");
        std::fs::create_dir(&target).unwrap();
        mounter.preload(entry("srv:/lower", &target));
        mounter.preload(entry("srv:/upper", &target));

        let err = cleanup_mount_point(&mounter, &target).unwrap_err();
        assert!(matches!(err, CsiError::UnmountFailed { .. }));
        assert!(target.exists());

        // A retry peels the remaining mount.
        cleanup_mount_point(&mounter, &target).unwrap();
        assert!(!target.exists());
    }

    #[test]
    fn cleanup_keeps_non_empty_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let mounter = FakeMounter::default();
        let target = tmp.path().join("target");
        std::fs::create_dir(&target).unwrap();
        std::fs::write(target.join("data"), b"keep").unwrap();

        let err = cleanup_mount_point(&mounter, &target).unwrap_err();
        assert!(matches!(err, CsiError::UnmountFailed { .. }));
        assert!(target.join("data").exists());
    }

    #[test]
    fn system_mounter_reads_custom_table() {
        let tmp = tempfile::tempdir().unwrap();
        let table = tmp.path().join("mounts");
        std::fs::write(&table, SAMPLE).unwrap();

        let mounter = SystemMounter::with_mount_table(&table);
        let entries = mounter.mount_points().unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].mount_point, PathBuf::from("/sys"));
    }
}
