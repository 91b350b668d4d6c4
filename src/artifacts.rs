// report-assembly-service/src/artifacts.rs
//
// Every intermediate a generation creates (working copies, scratch images,
// unconverted outputs) is registered here the moment it exists. Whatever the
// exit path, `Drop` sweeps the leftovers, so no error branch needs its own
// deletion code.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Set of paths owned by one in-flight operation.
#[derive(Debug, Default)]
pub struct ArtifactSet {
    paths: BTreeSet<PathBuf>,
}

impl ArtifactSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a path for end-of-operation deletion. Returns the path back
    /// for call-site convenience.
    pub fn track<P: Into<PathBuf>>(&mut self, path: P) -> PathBuf {
        let path = path.into();
        self.paths.insert(path.clone());
        path
    }

    /// Release a path from the set: the artifact survives the operation.
    pub fn keep(&mut self, path: &Path) {
        self.paths.remove(path);
    }

    pub fn is_tracked(&self, path: &Path) -> bool {
        self.paths.contains(path)
    }

    /// Delete everything still tracked. Regular files and directories both
    /// work; failures are logged and the sweep continues.
    pub fn sweep(&mut self) {
        for path in std::mem::take(&mut self.paths) {
            let result = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            match result {
                Ok(()) => debug!(path = %path.display(), "artifact removed"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), %e, "artifact removal failed"),
            }
        }
    }
}

impl Drop for ArtifactSet {
    fn drop(&mut self) {
        self.sweep();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweep_removes_files_and_dirs_but_not_kept_paths() {
        let dir = tempfile::tempdir().unwrap();
        let scratch_file = dir.path().join("scratch.docx");
        let scratch_dir = dir.path().join("lo-profile");
        let output = dir.path().join("report.pdf");
        std::fs::write(&scratch_file, b"x").unwrap();
        std::fs::create_dir(&scratch_dir).unwrap();
        std::fs::write(scratch_dir.join("inner"), b"y").unwrap();
        std::fs::write(&output, b"pdf").unwrap();

        let mut set = ArtifactSet::new();
        set.track(&scratch_file);
        set.track(&scratch_dir);
        set.track(&output);
        set.keep(&output);
        drop(set);

        assert!(!scratch_file.exists());
        assert!(!scratch_dir.exists());
        assert!(output.is_file());
    }

    #[test]
    fn missing_paths_do_not_disturb_the_sweep() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real.tmp");
        std::fs::write(&real, b"x").unwrap();
        let mut set = ArtifactSet::new();
        set.track(dir.path().join("never-created.tmp"));
        set.track(&real);
        set.sweep();
        assert!(!real.exists());
        assert!(!set.is_tracked(&real));
    }
}
