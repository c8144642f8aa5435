use nix::errno::Errno;
use nix::mount::{mount, MsFlags};
use nix::sched::{unshare, CloneFlags};
use nix::sys::prctl::set_no_new_privs;
use nix::sys::signal::{kill, Signal};
use nix::sys::stat::Mode;
use nix::unistd::{chdir, mkdir, setgroups, setresgid, setresuid, Gid, Pid, Uid};
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::{error::Error, Result};

/// Directories replaced by an empty tmpfs in a private mount namespace.
const SCRATCH_DIRS: [&str; 3] = ["/tmp", "/var/tmp", "/dev/shm"];

const TMPFS_OPTIONS: &str = "size=64m,mode=1777";

/// Passes over `/proc` before giving up on processes that keep forking.
const SWEEP_PASSES: usize = 16;

/// The unprivileged credentials a job's processes run under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub uid: Uid,
    pub gid: Gid,
}

impl Identity {
    pub fn new(id: u32) -> Self {
        Self {
            uid: Uid::from_raw(id),
            gid: Gid::from_raw(id),
        }
    }

    /// Switch the calling process to this identity for good. Runs in the
    /// forked child, so it must not allocate.
    pub(crate) fn assume(self) -> std::io::Result<()> {
        setgroups(&[])?;
        // The group has to change while we still hold the privilege to do so.
        setresgid(self.gid, self.gid, self.gid)?;
        setresuid(self.uid, self.uid, self.uid)?;
        Ok(())
    }
}

/// Per-job uids. A uid is handed to exactly one job at a time, so every
/// process owned by it belongs to that job and can be killed by uid.
#[derive(Debug)]
pub(crate) struct IdentityPool {
    free: Mutex<Vec<Identity>>,
    slots: Arc<Semaphore>,
}

impl IdentityPool {
    pub(crate) fn new(uid_base: u32, uid_count: u32) -> Self {
        let free: Vec<_> = (uid_base..uid_base + uid_count)
            .rev()
            .map(Identity::new)
            .collect();
        Self {
            slots: Arc::new(Semaphore::new(free.len())),
            free: Mutex::new(free),
        }
    }

    pub(crate) async fn acquire(self: &Arc<Self>) -> Result<IdentityLease> {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|e| Error::Internal(format!("identity pool closed: {}", e)))?;
        let identity = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .ok_or_else(|| Error::Internal("identity pool exhausted".into()))?;
        debug!(uid = %identity.uid, "Leased sandbox identity");
        Ok(IdentityLease {
            identity,
            pool: Arc::clone(self),
            _permit: permit,
        })
    }

    #[cfg(test)]
    pub(crate) fn available(&self) -> usize {
        self.slots.available_permits()
    }
}

/// Exclusive use of one [`Identity`]. Dropping the lease kills whatever still
/// runs under the uid and hands the uid back to the pool.
#[derive(Debug)]
pub struct IdentityLease {
    identity: Identity,
    pool: Arc<IdentityPool>,
    _permit: OwnedSemaphorePermit,
}

impl IdentityLease {
    pub fn identity(&self) -> Identity {
        self.identity
    }
}

impl Drop for IdentityLease {
    fn drop(&mut self) {
        kill_user_processes(self.identity.uid);
        self.pool
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(self.identity);
        debug!(uid = %self.identity.uid, "Returned sandbox identity");
    }
}

/// A private mount namespace with fresh scratch directories. When the job
/// directory itself lives under one of them it is bind-mounted back to the
/// same path so the program still finds its files.
#[derive(Debug)]
pub(crate) struct PrivateMounts {
    rebind: Option<Rebind>,
}

#[derive(Debug)]
struct Rebind {
    /// Directories to recreate inside the tmpfs, outermost first
    dirs: Vec<CString>,
    target: CString,
}

impl PrivateMounts {
    /// Plan the mounts for a process whose working directory is `workdir`.
    /// Everything is converted up front because [`PrivateMounts::enter`]
    /// runs where allocation is not allowed.
    pub(crate) fn for_workdir(workdir: &Path) -> Result<Self> {
        let scratch = SCRATCH_DIRS
            .iter()
            .map(Path::new)
            .find(|scratch| workdir.starts_with(scratch));

        let rebind = match scratch {
            None => None,
            Some(scratch) => {
                let relative = workdir
                    .strip_prefix(scratch)
                    .map_err(|e| Error::Internal(e.to_string()))?;
                let mut current = PathBuf::from(scratch);
                let mut dirs = Vec::new();
                for component in relative.components() {
                    current.push(component);
                    dirs.push(c_path(&current)?);
                }
                Some(Rebind {
                    dirs,
                    target: c_path(workdir)?,
                })
            }
        };

        Ok(Self { rebind })
    }

    /// Enter the namespace. Runs in the forked child while it is still root.
    pub(crate) fn enter(&self) -> std::io::Result<()> {
        unshare(CloneFlags::CLONE_NEWNS)?;
        mount(
            None::<&str>,
            "/",
            None::<&str>,
            MsFlags::MS_REC | MsFlags::MS_PRIVATE,
            None::<&str>,
        )?;

        for dir in SCRATCH_DIRS {
            match mount(
                Some("tmpfs"),
                dir,
                Some("tmpfs"),
                MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
                Some(TMPFS_OPTIONS),
            ) {
                Ok(()) | Err(Errno::ENOENT) => {}
                Err(e) => return Err(e.into()),
            }
        }

        if let Some(rebind) = &self.rebind {
            for dir in &rebind.dirs {
                match mkdir(dir.as_c_str(), Mode::from_bits_truncate(0o755)) {
                    Ok(()) | Err(Errno::EEXIST) => {}
                    Err(e) => return Err(e.into()),
                }
            }
            // The working directory still points at the job directory on the
            // host mount.
            mount(
                Some("."),
                rebind.target.as_c_str(),
                None::<&str>,
                MsFlags::MS_BIND,
                None::<&str>,
            )?;
            chdir(rebind.target.as_c_str())?;
        }
        Ok(())
    }
}

fn c_path(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|e| Error::Internal(format!("invalid path {}: {}", path.display(), e)))
}

/// Lock the child out of setuid and file capability escalation.
pub(crate) fn lock_privileges() -> std::io::Result<()> {
    set_no_new_privs()?;
    Ok(())
}

/// Whether this host lets us create the private mounts. Container runtimes
/// commonly deny `mount` even to root.
pub(crate) fn private_mounts_supported(program: &Path) -> bool {
    let mounts = PrivateMounts { rebind: None };
    let mut command = Command::new(program);
    command
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    unsafe {
        command.pre_exec(move || mounts.enter());
    }
    match command.status() {
        Ok(status) => status.success(),
        Err(e) => {
            debug!("Private mount check failed: {}", e);
            false
        }
    }
}

/// Kill every live process whose real uid is `uid`. Processes that called
/// `setsid` or double-forked out of their group are found this way too.
pub(crate) fn kill_user_processes(uid: Uid) {
    for _ in 0..SWEEP_PASSES {
        let entries = match std::fs::read_dir("/proc") {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Cannot scan /proc for processes of uid {}: {}", uid, e);
                return;
            }
        };

        let mut found = false;
        for entry in entries.flatten() {
            let Some(pid) = entry
                .file_name()
                .to_str()
                .and_then(|name| name.parse::<i32>().ok())
            else {
                continue;
            };
            if process_owner(pid) != Some(uid) {
                continue;
            }
            found = true;
            match kill(Pid::from_raw(pid), Signal::SIGKILL) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => warn!("Failed to kill process {} of uid {}: {}", pid, uid, e),
            }
        }

        if !found {
            return;
        }
    }
    warn!("Processes of uid {} survived {} sweeps", uid, SWEEP_PASSES);
}

/// Real uid of a process that has not exited yet.
fn process_owner(pid: i32) -> Option<Uid> {
    let status = std::fs::read_to_string(format!("/proc/{}/status", pid)).ok()?;
    let mut owner = None;
    for line in status.lines() {
        if let Some(state) = line.strip_prefix("State:") {
            if matches!(state.trim_start().chars().next(), Some('Z' | 'X')) {
                return None;
            }
        } else if let Some(ids) = line.strip_prefix("Uid:") {
            owner = ids
                .split_whitespace()
                .next()
                .and_then(|id| id.parse().ok())
                .map(Uid::from_raw);
            break;
        }
    }
    owner
}
