//! Plugin discovery on disk.
//!
//! Plugins live at `root/<namespace>/<domain>/<feature>/manifest.json` and
//! are named by joining the three directory names with dots.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// File name every plugin directory must contain.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Path of the manifest for a dotted plugin name.
pub fn manifest_path(root: &Path, plugin_name: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    for segment in plugin_name.split('.') {
        path.push(segment);
    }
    path.push(MANIFEST_FILE);
    path
}

/// Scan `root` for plugin manifests, returning dotted plugin names.
///
/// Names come back sorted so discovery order is stable across runs. A
/// missing or unreadable root is logged and yields nothing.
pub async fn scan(root: &Path) -> Vec<String> {
    if !is_dir(root).await {
        warn!(root = %root.display(), "Plugin root does not exist, no plugins discovered");
        return Vec::new();
    }

    let mut names = Vec::new();
    for namespace in subdirectories(root).await {
        for domain in subdirectories(&root.join(&namespace)).await {
            for feature in subdirectories(&root.join(&namespace).join(&domain)).await {
                let name = format!("{namespace}.{domain}.{feature}");
                if is_file(&manifest_path(root, &name)).await {
                    names.push(name);
                } else {
                    debug!(plugin = %name, "Directory has no manifest, skipping");
                }
            }
        }
    }

    names.sort();
    names
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

async fn subdirectories(dir: &Path) -> Vec<String> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Could not read plugin directory");
            return Vec::new();
        }
    };

    let mut names = Vec::new();
    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => {
                let is_subdir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
                if !is_subdir {
                    continue;
                }
                match entry.file_name().into_string() {
                    Ok(name) if !name.starts_with('.') => names.push(name),
                    Ok(_) => {}
                    Err(raw) => {
                        warn!(dir = %dir.display(), name = ?raw, "Skipping non UTF-8 directory name");
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Error while listing plugin directory");
                break;
            }
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_manifest(root: &Path, name: &str) {
        let path = manifest_path(root, name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, format!(r#"{{"name": "{name}", "version": "1"}}"#)).unwrap();
    }

    #[test]
    fn test_manifest_path_follows_convention() {
        let path = manifest_path(Path::new("/plugins"), "ns.billing.recon");
        assert_eq!(path, PathBuf::from("/plugins/ns/billing/recon/manifest.json"));
    }

    #[tokio::test]
    async fn test_missing_root_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(scan(&dir.path().join("absent")).await.is_empty());
    }

    #[tokio::test]
    async fn test_scan_finds_three_level_manifests_in_order() {
        let dir = tempfile::tempdir().unwrap();
        write_manifest(dir.path(), "ns.shipping.tracker");
        write_manifest(dir.path(), "ns.billing.recon");
        write_manifest(dir.path(), "ns.billing.audit");

        // Too shallow and no-manifest directories are ignored.
        std::fs::create_dir_all(dir.path().join("ns/orders/empty")).unwrap();
        std::fs::write(dir.path().join("ns/manifest.json"), "{}").unwrap();

        let names = scan(dir.path()).await;
        assert_eq!(
            names,
            vec!["ns.billing.audit", "ns.billing.recon", "ns.shipping.tracker"]
        );
    }

    #[tokio::test]
    async fn test_root_and_manifest_must_have_the_right_file_type() {
        let dir = tempfile::tempdir().unwrap();
        let file_root = dir.path().join("plugins");
        std::fs::write(&file_root, "not a directory").unwrap();
        assert!(scan(&file_root).await.is_empty());

        // A directory named manifest.json is not a manifest.
        std::fs::create_dir_all(dir.path().join("ns/billing/recon/manifest.json")).unwrap();
        write_manifest(dir.path(), "ns.billing.audit");
        assert_eq!(scan(dir.path()).await, vec!["ns.billing.audit"]);
    }
}
