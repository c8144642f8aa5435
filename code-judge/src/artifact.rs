use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::fs;
use tracing::{debug, warn};

use crate::{
    error::Error,
    isolation::{Identity, IdentityLease},
    types::Language,
    Result,
};

/// The on-disk materialization of one job: a private working directory with
/// the submitted source and, once compiled, the built program.
///
/// The directory is removed when the artifact is closed or dropped, so it
/// never outlives the job that created it. An owned artifact releases its
/// sandbox identity only after the directory is gone.
#[derive(Debug)]
pub struct CompileArtifact {
    dir: TempDir,
    owner: Option<IdentityLease>,
    language: Language,
    source: PathBuf,
}

impl CompileArtifact {
    /// Create a fresh, uniquely named directory under `work_root` and write
    /// `code` into `source_file` inside it.
    pub async fn create(
        work_root: &Path,
        language: Language,
        source_file: &str,
        code: &str,
    ) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(&format!("job-{}-", language))
            .tempdir_in(work_root)
            .map_err(|e| Error::Internal(format!("failed to create job directory: {}", e)))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(dir.path(), std::fs::Permissions::from_mode(0o700))
                .await
                .map_err(|e| Error::Internal(format!("failed to restrict job directory: {}", e)))?;
        }

        let source = dir.path().join(source_file);
        fs::write(&source, code)
            .await
            .map_err(|e| Error::Internal(format!("failed to write source file: {}", e)))?;

        debug!("Created artifact at {}", dir.path().display());

        Ok(Self {
            dir,
            owner: None,
            language,
            source,
        })
    }

    /// Hand the directory and source over to the leased identity so the
    /// job's processes can write build output next to the source and
    /// nowhere else. Without a lease the artifact stays owned by the judge.
    pub fn owned_by(mut self, lease: Option<IdentityLease>) -> Result<Self> {
        if let Some(lease) = &lease {
            let identity = lease.identity();
            for path in [self.dir.path(), self.source.as_path()] {
                nix::unistd::chown(path, Some(identity.uid), Some(identity.gid)).map_err(|e| {
                    Error::Internal(format!("failed to hand over {}: {}", path.display(), e))
                })?;
            }
        }
        self.owner = lease;
        Ok(self)
    }

    /// Credentials the job's processes run under, if it has its own.
    pub fn identity(&self) -> Option<Identity> {
        self.owner.as_ref().map(IdentityLease::identity)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Path of a file inside the working directory.
    pub fn file(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// Replace occurrences of the working directory in diagnostics so callers
    /// never see host paths.
    pub fn redact(&self, text: &str) -> String {
        let dir = self.dir.path().to_string_lossy();
        text.replace(&format!("{}/", dir), "").replace(dir.as_ref(), ".")
    }

    /// Remove the working directory, reporting failures instead of
    /// swallowing them as `Drop` would.
    pub fn close(self) {
        let path = self.dir.path().to_path_buf();
        match self.dir.close() {
            Ok(()) => debug!("Removed artifact at {}", path.display()),
            Err(e) => warn!("Failed to remove artifact at {}: {}", path.display(), e),
        }
    }
}
