use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const TRACKER_DIR: &str = ".tracker";
pub const CONFIG_FILE: &str = ".tracker/config.yaml";
pub const DB_FILE: &str = ".tracker/orders.redb";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn tracker_dir(root: &Path) -> PathBuf {
    root.join(TRACKER_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn db_path(root: &Path) -> PathBuf {
    root.join(DB_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_live_under_tracker_dir() {
        let root = Path::new("/srv/placements");
        assert!(config_path(root).starts_with(tracker_dir(root)));
        assert!(db_path(root).starts_with(tracker_dir(root)));
        assert!(db_path(root).ends_with("orders.redb"));
    }
}
