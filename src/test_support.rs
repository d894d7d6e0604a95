//! Helpers shared by unit tests.

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// Creates a fresh directory under the system temp dir. Callers remove it.
pub fn scratch_dir(name: &str) -> PathBuf {
    let nonce = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_nanos())
        .unwrap_or(0);
    let dir = std::env::temp_dir().join(format!(
        "gameshelf_{name}_{}_{nonce}",
        std::process::id()
    ));
    std::fs::create_dir_all(&dir).expect("scratch dir should be creatable");
    dir
}
