//! Path helpers for configured locations.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Expand a leading `~/` to the user's home directory.
///
/// Paths without the prefix, or systems without a home directory, are
/// returned unchanged.
pub fn expand_tilde(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    path.to_path_buf()
}

/// Expand `~` and make the path absolute against the current directory.
/// The path does not need to exist.
pub fn resolve_store_root(path: impl AsRef<Path>) -> Result<PathBuf> {
    let expanded = expand_tilde(path);
    if expanded.is_absolute() {
        return Ok(expanded);
    }
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    Ok(cwd.join(expanded))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_tilde() {
        let expanded = expand_tilde("~/.canopy/store");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expanded, home.join(".canopy/store"));
        }
    }

    #[test]
    fn test_expand_tilde_leaves_plain_paths() {
        assert_eq!(expand_tilde("/var/canopy"), PathBuf::from("/var/canopy"));
        assert_eq!(expand_tilde("rel/~x"), PathBuf::from("rel/~x"));
    }

    #[test]
    fn test_resolve_store_root_absolute() {
        let resolved = resolve_store_root("relative/store").unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("relative/store"));
    }
}
