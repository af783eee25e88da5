use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const PACER_DIR: &str = ".pacer";
pub const CONFIG_FILE: &str = ".pacer/config.yaml";
pub const DB_FILE: &str = ".pacer/governor.redb";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn pacer_dir(root: &Path) -> PathBuf {
    root.join(PACER_DIR)
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
    fn paths_live_under_pacer_dir() {
        let root = Path::new("/tmp/acct");
        assert!(config_path(root).starts_with(pacer_dir(root)));
        assert!(db_path(root).starts_with(pacer_dir(root)));
        assert_eq!(db_path(root), PathBuf::from("/tmp/acct/.pacer/governor.redb"));
    }
}
