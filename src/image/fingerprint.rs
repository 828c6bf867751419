//! Content digests of the image layers, to tell which layer a rebuild has
//! to start from. Digests are chained like the builder's layer cache: a
//! change to one layer invalidates every layer after it.

use super::{ImageSpec, LayerKind};
use crate::utils::error::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerDigest {
    pub layer: LayerKind,
    pub digest: String,
}

/// Files under `path` (or `path` itself), sorted, relative to `root`.
fn collect_files(root: &Path, path: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    if path.is_file() {
        out.push(path.strip_prefix(root).unwrap_or(path).to_path_buf());
        return Ok(());
    }
    if !path.is_dir() {
        return Ok(());
    }

    let mut entries: Vec<PathBuf> = fs::read_dir(path)?
        .collect::<std::io::Result<Vec<_>>>()?
        .into_iter()
        .map(|e| e.path())
        .collect();
    entries.sort();
    for entry in entries {
        collect_files(root, &entry, out)?;
    }
    Ok(())
}

fn hash_inputs(hasher: &mut Sha256, root: &Path, inputs: &[String]) -> Result<()> {
    for input in inputs {
        let mut files = Vec::new();
        collect_files(root, &root.join(input), &mut files)?;
        if files.is_empty() {
            // 缺少的輸入也要影響摘要
            hasher.update(format!("missing:{}\n", input));
            continue;
        }
        for rel in files {
            let content = fs::read(root.join(&rel))?;
            hasher.update(rel.to_string_lossy().replace('\\', "/").as_bytes());
            hasher.update([0u8]);
            hasher.update((content.len() as u64).to_le_bytes());
            hasher.update(&content);
        }
    }
    Ok(())
}

/// One digest per layer, in build order, over the build context at `root`.
pub fn fingerprint_layers(root: &Path, spec: &ImageSpec) -> Result<Vec<LayerDigest>> {
    let mut previous = String::new();
    let mut out = Vec::new();

    for layer in spec.layers() {
        let mut hasher = Sha256::new();
        hasher.update(previous.as_bytes());
        hasher.update(layer.instruction.as_bytes());
        hash_inputs(&mut hasher, root, &layer.inputs)?;

        let digest = hex::encode(hasher.finalize());
        tracing::debug!("{} layer digest {}", layer.kind, digest);
        previous = digest.clone();
        out.push(LayerDigest {
            layer: layer.kind,
            digest,
        });
    }
    Ok(out)
}

/// First layer whose digest differs from the previous build. `None` when
/// every layer can be reused.
pub fn first_stale_layer(previous: &[LayerDigest], current: &[LayerDigest]) -> Option<LayerKind> {
    for (i, layer) in current.iter().enumerate() {
        if previous.get(i) != Some(layer) {
            return Some(layer.layer);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn context() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("Cargo.toml"), "[package]\nname = \"x\"\n").unwrap();
        fs::create_dir_all(dir.path().join("src/app")).unwrap();
        fs::write(dir.path().join("src/lib.rs"), "pub mod app;\n").unwrap();
        fs::write(dir.path().join("src/app/mod.rs"), "\n").unwrap();
        fs::create_dir_all(dir.path().join("models")).unwrap();
        fs::write(dir.path().join("models/models.toml"), "[models]\n").unwrap();
        dir
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let dir = context();
        let spec = ImageSpec::default();
        let first = fingerprint_layers(dir.path(), &spec).unwrap();
        assert_eq!(first.len(), 4);
        assert_eq!(first, fingerprint_layers(dir.path(), &spec).unwrap());
        assert_eq!(first_stale_layer(&first, &first), None);
    }

    #[test]
    fn test_source_change_keeps_dependency_layers() {
        let dir = context();
        let spec = ImageSpec::default();
        let before = fingerprint_layers(dir.path(), &spec).unwrap();

        fs::write(dir.path().join("src/app/mod.rs"), "pub fn changed() {}\n").unwrap();
        let after = fingerprint_layers(dir.path(), &spec).unwrap();

        assert_eq!(before[0], after[0]);
        assert_eq!(before[1], after[1]);
        assert_eq!(first_stale_layer(&before, &after), Some(LayerKind::Source));
    }

    #[test]
    fn test_manifest_change_stales_everything() {
        let dir = context();
        let spec = ImageSpec::default();
        let before = fingerprint_layers(dir.path(), &spec).unwrap();

        fs::write(dir.path().join("Cargo.lock"), "# lock\n").unwrap();
        let after = fingerprint_layers(dir.path(), &spec).unwrap();
        assert_eq!(first_stale_layer(&before, &after), Some(LayerKind::Manifest));
        assert!(before.iter().zip(&after).all(|(b, a)| b != a));
    }

    #[test]
    fn test_no_previous_build() {
        let dir = context();
        let current = fingerprint_layers(dir.path(), &ImageSpec::default()).unwrap();
        assert_eq!(first_stale_layer(&[], &current), Some(LayerKind::Manifest));
    }
}
