//! Source-file provider (§6.3, §10.4).
//!
//! Materializes a submission's source on the host under a per-definition
//! scratch subdirectory and hands back a read-only mount projecting it into
//! the container at `/bg/<filename>`. Release is idempotent and tied to an
//! [`Arc`] so the last job to finish with the definition (or the dispatcher
//! itself, whichever drops last) triggers cleanup exactly once.

use std::path::PathBuf;
use std::sync::Arc;

use scopeguard::{guard, ScopeGuard};

use crate::docker::MountSpec;

/// Deletes the scratch subdirectory when the last clone is dropped.
pub type ReleaseGuard = Arc<ScopeGuard<PathBuf, fn(PathBuf)>>;

fn remove_scratch_dir(dir: PathBuf) {
    if let Err(e) = std::fs::remove_dir_all(&dir) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("failed to remove scratch dir {}: {}", dir.display(), e);
        }
    }
}

/// Writes definitions' source files under a shared root directory.
pub struct ScratchProvider {
    root: PathBuf,
}

impl ScratchProvider {
    pub fn new(root: PathBuf) -> std::io::Result<Self> {
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Write `source` to `<root>/<definition_id>/<filename>`.
    ///
    /// Returns the host path, a read-only mount of it at
    /// `/bg/<filename>`, and a guard that removes the whole subdirectory
    /// (idempotently) once every clone is dropped.
    pub fn materialize(
        &self,
        definition_id: &str,
        filename: &str,
        source: &str,
    ) -> std::io::Result<(PathBuf, MountSpec, ReleaseGuard)> {
        let dir = self.root.join(definition_id);
        std::fs::create_dir_all(&dir)?;

        let host_path = dir.join(filename);
        std::fs::write(&host_path, source)?;

        let mount = MountSpec {
            host_path: host_path.to_string_lossy().into_owned(),
            container_path: format!("/bg/{filename}"),
            read_only: true,
        };

        let release: ScopeGuard<PathBuf, fn(PathBuf)> =
            guard(dir, remove_scratch_dir as fn(PathBuf));

        Ok((host_path, mount, Arc::new(release)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn materializes_and_releases() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = ScratchProvider::new(tmp.path().to_path_buf()).unwrap();

        let (host_path, mount, release) =
            provider.materialize("def-1", "main.py", "print(1)\n").unwrap();

        assert!(host_path.exists());
        assert_eq!(mount.container_path, "/bg/main.py");
        assert!(mount.read_only);
        assert_eq!(std::fs::read_to_string(&host_path).unwrap(), "print(1)\n");

        let dir = host_path.parent().unwrap().to_path_buf();
        drop(release);
        assert!(!dir.exists());
    }

    #[test]
    fn release_is_idempotent_across_clones() {
        let tmp = tempfile::tempdir().unwrap();
        let provider = ScratchProvider::new(tmp.path().to_path_buf()).unwrap();

        let (host_path, _mount, release) =
            provider.materialize("def-2", "a.py", "x = 1\n").unwrap();
        let dir = host_path.parent().unwrap().to_path_buf();

        let second = release.clone();
        drop(release);
        assert!(dir.exists(), "directory must survive while any clone lives");

        drop(second);
        assert!(!dir.exists());
    }
}
