use crate::{
    config::JudgeConfig,
    error::Error,
    isolation::{
        kill_user_processes, lock_privileges, private_mounts_supported, Identity,
        IdentityLease, IdentityPool, PrivateMounts,
    },
    types::ResourceLimits,
    Result,
};
use nix::errno::Errno;
use nix::sys::resource::{getrusage, setrlimit, Resource, UsageWho};
use nix::sys::signal::{killpg, Signal};
use nix::sys::time::TimeVal;
use nix::unistd::{geteuid, setsid, Pid};
use std::os::unix::process::ExitStatusExt;
use std::sync::Arc;
use std::{path::PathBuf, process::Stdio, time::Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration};
use tracing::{debug, info, warn};

/// How long to wait for pipe readers once the process group is gone.
const OUTPUT_GRACE: Duration = Duration::from_millis(500);

const READ_CHUNK: usize = 8 * 1024;

/// One toolchain or program execution: what to run, where, with which stdin
/// and under which limits.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub workdir: PathBuf,
    pub stdin: String,
    pub timeout: Duration,
    pub limits: ResourceLimits,
    /// Credentials to drop to; `None` keeps the judge's own
    pub identity: Option<Identity>,
}

impl Invocation {
    pub fn new(program: impl Into<PathBuf>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            workdir: workdir.into(),
            stdin: String::new(),
            timeout: Duration::from_secs(5),
            limits: ResourceLimits::default(),
            identity: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = input.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn run_as(mut self, identity: Option<Identity>) -> Self {
        self.identity = identity;
        self
    }

    fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "<program>".to_string())
    }
}

/// How a sandboxed process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited(i32),
    Signaled(i32),
    TimedOut,
    CpuLimitExceeded,
    OutputLimitExceeded,
}

#[derive(Debug, Clone)]
pub struct Outcome {
    pub termination: Termination,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl Outcome {
    pub fn success(&self) -> bool {
        self.termination == Termination::Exited(0)
    }
}

/// What a [`Sandbox`] does beyond resource limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Isolation {
    /// Jobs get a dedicated uid and gid with no supplementary groups
    pub credentials: bool,
    /// Processes see empty private `/tmp`, `/var/tmp` and `/dev/shm`
    pub private_tmp: bool,
}

/// Spawns untrusted processes under OS-level limits.
///
/// Every process runs in its own session and process group with a cleared
/// environment, and the whole group is killed before [`Sandbox::spawn`]
/// returns. When the judge runs as root, invocations carrying an
/// [`Identity`] additionally drop to that uid and get private scratch
/// directories, and everything left running under the uid is killed too.
/// The sandbox holds no per-call state, so one value can serve many
/// concurrent jobs.
#[derive(Debug, Clone)]
pub struct Sandbox {
    path_env: String,
    identities: Option<Arc<IdentityPool>>,
    private_tmp: bool,
}

impl Sandbox {
    /// A sandbox that runs everything under the judge's own credentials.
    pub fn new(path_env: impl Into<String>) -> Self {
        Self {
            path_env: path_env.into(),
            identities: None,
            private_tmp: false,
        }
    }

    /// A sandbox isolated as far as `config.sandbox` asks and the host
    /// allows.
    pub fn from_config(config: &JudgeConfig) -> Self {
        let mut sandbox = Self::new(config.path_env.clone());
        if !config.sandbox.isolate {
            info!("Sandbox isolation disabled by configuration");
            return sandbox;
        }
        if !geteuid().is_root() {
            warn!("Not running as root; submissions share the judge's uid");
            return sandbox;
        }

        sandbox.identities = Some(Arc::new(IdentityPool::new(
            config.sandbox.uid_base,
            config.sandbox.uid_count,
        )));
        if config.sandbox.private_tmp {
            sandbox.private_tmp = match which::which_in("true", Some(&config.path_env), "/") {
                Ok(program) => private_mounts_supported(&program),
                Err(_) => false,
            };
            if !sandbox.private_tmp {
                warn!("Mount namespaces unavailable; submissions share the host /tmp");
            }
        }

        info!(isolation = ?sandbox.isolation(), "Sandbox isolation enabled");
        sandbox
    }

    pub fn isolation(&self) -> Isolation {
        Isolation {
            credentials: self.identities.is_some(),
            private_tmp: self.private_tmp,
        }
    }

    /// Reserve a dedicated identity for one job, waiting while all are in
    /// use. Returns `None` when the sandbox does not isolate credentials.
    pub async fn lease(&self) -> Result<Option<IdentityLease>> {
        match &self.identities {
            Some(pool) => pool.acquire().await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn spawn(&self, invocation: &Invocation) -> Result<Outcome> {
        debug!(
            program = %invocation.program.display(),
            args = ?invocation.args,
            timeout_ms = invocation.timeout.as_millis() as u64,
            uid = ?invocation.identity.map(|identity| identity.uid.as_raw()),
            "Sandbox spawn"
        );

        // Only a dedicated identity can be dropped to; without one the
        // program keeps the judge's credentials and shares its mounts.
        let identity = invocation.identity.filter(|_| self.identities.is_some());
        let mounts = match identity {
            Some(_) if self.private_tmp => Some(PrivateMounts::for_workdir(&invocation.workdir)?),
            _ => None,
        };

        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .env_clear()
            .env("PATH", &self.path_env)
            .env("HOME", &invocation.workdir)
            .env("LANG", "C.UTF-8")
            .current_dir(&invocation.workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let limits = invocation.limits;
        unsafe {
            command.pre_exec(move || {
                apply_limits(&limits, identity.is_some())?;
                if let Some(mounts) = &mounts {
                    mounts.enter()?;
                }
                if let Some(identity) = identity {
                    identity.assume()?;
                }
                lock_privileges()
            });
        }

        let cpu_before = children_cpu_time();
        let start = Instant::now();
        let mut child = command.spawn().map_err(|e| {
            Error::Internal(format!("failed to spawn {}: {}", invocation.program_name(), e))
        })?;

        let group = match child.id() {
            Some(id) => ProcessGroup::new(Pid::from_raw(id as i32), identity),
            None => return Err(Error::Internal("process exited before it was tracked".into())),
        };

        let stdin_task = child.stdin.take().map(|mut stdin| {
            let payload = invocation.stdin.clone().into_bytes();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&payload).await {
                    // Programs are free to exit without reading their input.
                    if e.kind() != std::io::ErrorKind::BrokenPipe {
                        debug!("Failed to write stdin: {}", e);
                    }
                }
                // Dropping the handle closes the pipe so the program sees EOF.
            })
        });

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Internal("stdout was not captured".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Internal("stderr was not captured".into()))?;
        let stdout_task = tokio::spawn(read_bounded(stdout, limits.output, group.pid));
        let stderr_task = tokio::spawn(read_bounded(stderr, limits.output, group.pid));

        let status = match time::timeout(invocation.timeout, child.wait()).await {
            Ok(status) => Some(
                status.map_err(|e| Error::Internal(format!("failed to wait for process: {}", e)))?,
            ),
            Err(_) => {
                debug!("Wall-clock timeout hit, killing process group {}", group.pid);
                group.kill();
                if let Err(e) = child.kill().await {
                    warn!("Failed to reap timed out process: {}", e);
                }
                None
            }
        };
        let elapsed = start.elapsed();

        // Reap anything the program left behind in its group or under its uid.
        group.release();

        if let Some(task) = stdin_task {
            task.abort();
        }
        let (stdout, stdout_overflow) = collect(stdout_task).await;
        let (stderr, stderr_overflow) = collect(stderr_task).await;

        let termination = match status {
            None => Termination::TimedOut,
            Some(_) if stdout_overflow || stderr_overflow => Termination::OutputLimitExceeded,
            Some(status) => match (status.code(), status.signal()) {
                (Some(code), _) => Termination::Exited(code),
                (None, Some(signal)) if signal == Signal::SIGXCPU as i32 => {
                    Termination::CpuLimitExceeded
                }
                // The kernel sends SIGKILL at the hard CPU limit to programs
                // that ignore SIGXCPU.
                (None, Some(signal))
                    if signal == Signal::SIGKILL as i32
                        && children_cpu_time().saturating_sub(cpu_before)
                            >= Duration::from_secs(limits.cpu_time) =>
                {
                    Termination::CpuLimitExceeded
                }
                (None, Some(signal)) => Termination::Signaled(signal),
                (None, None) => {
                    return Err(Error::Internal(format!(
                        "unrecognised exit status: {}",
                        status
                    )))
                }
            },
        };

        debug!(?termination, elapsed_ms = elapsed.as_millis() as u64, "Sandbox finished");

        Ok(Outcome {
            termination,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            elapsed,
        })
    }
}

/// Runs in the forked child before `exec`. The process limit counts every
/// process of the real uid, so it is only meaningful under a dedicated one.
fn apply_limits(limits: &ResourceLimits, dedicated_uid: bool) -> std::io::Result<()> {
    setsid()?;
    setrlimit(Resource::RLIMIT_CPU, limits.cpu_time, limits.cpu_time + 1)?;
    setrlimit(Resource::RLIMIT_FSIZE, limits.file_size, limits.file_size)?;
    setrlimit(Resource::RLIMIT_CORE, 0, 0)?;
    if let Some(memory) = limits.memory {
        setrlimit(Resource::RLIMIT_AS, memory, memory)?;
    }
    #[cfg(target_os = "linux")]
    if let Some(processes) = limits.processes.filter(|_| dedicated_uid) {
        setrlimit(Resource::RLIMIT_NPROC, processes, processes)?;
    }
    Ok(())
}

/// CPU time of all reaped descendants of the judge so far.
fn children_cpu_time() -> Duration {
    match getrusage(UsageWho::RUSAGE_CHILDREN) {
        Ok(usage) => timeval_duration(usage.user_time()) + timeval_duration(usage.system_time()),
        Err(e) => {
            debug!("getrusage failed: {}", e);
            Duration::ZERO
        }
    }
}

fn timeval_duration(time: TimeVal) -> Duration {
    Duration::from_secs(time.tv_sec().max(0) as u64)
        + Duration::from_micros(time.tv_usec().max(0) as u64)
}

/// Kills the process group, and every process of a dedicated uid, when
/// dropped unless it was already released, so a cancelled spawn cannot
/// leave processes behind.
struct ProcessGroup {
    pid: Pid,
    identity: Option<Identity>,
    released: bool,
}

impl ProcessGroup {
    fn new(pid: Pid, identity: Option<Identity>) -> Self {
        Self {
            pid,
            identity,
            released: false,
        }
    }

    fn kill(&self) {
        kill_group(self.pid);
        if let Some(identity) = self.identity {
            kill_user_processes(identity.uid);
        }
    }

    fn release(mut self) {
        self.kill();
        self.released = true;
    }
}

impl Drop for ProcessGroup {
    fn drop(&mut self) {
        if !self.released {
            self.kill();
        }
    }
}

fn kill_group(pgid: Pid) {
    match killpg(pgid, Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!("Failed to kill process group {}: {}", pgid, e),
    }
}

/// Reads at most `limit` bytes. On overflow the process group is killed and
/// the returned flag is set.
async fn read_bounded<R>(mut reader: R, limit: usize, pgid: Pid) -> (Vec<u8>, bool)
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(limit.min(READ_CHUNK));
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let n = match reader.read(&mut chunk).await {
            Ok(0) => return (buf, false),
            Ok(n) => n,
            Err(e) => {
                debug!("Pipe read failed: {}", e);
                return (buf, false);
            }
        };
        let room = limit - buf.len();
        if n > room {
            buf.extend_from_slice(&chunk[..room]);
            kill_group(pgid);
            return (buf, true);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

async fn collect(mut task: JoinHandle<(Vec<u8>, bool)>) -> (Vec<u8>, bool) {
    match time::timeout(OUTPUT_GRACE, &mut task).await {
        Ok(Ok(captured)) => captured,
        Ok(Err(e)) => {
            warn!("Output reader failed: {}", e);
            (Vec::new(), false)
        }
        Err(_) => {
            // A descendant escaped the group and still holds the pipe open.
            warn!("Output reader did not finish, discarding");
            task.abort();
            (Vec::new(), false)
        }
    }
}
