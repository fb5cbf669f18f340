use std::path::{Path, PathBuf};

use tracker_core::paths::TRACKER_DIR;

/// Resolve the project root.
///
/// `--root` / `TRACKER_ROOT` wins; otherwise the nearest ancestor of the
/// working directory holding `.tracker/`, falling back to the working directory.
pub fn resolve_root(explicit: Option<&Path>) -> PathBuf {
    if let Some(p) = explicit {
        return p.to_path_buf();
    }
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    find_upward(&cwd).unwrap_or(cwd)
}

fn find_upward(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(TRACKER_DIR).is_dir())
        .map(Path::to_path_buf)
}
