// crates/formats/src/state.rs
//
// On-disk persistence for named parameter tensors.

use anyhow::{Context, Result};
use ndarray::ArrayD;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::npz::{NpzReader, NpzWriter};

/// Named parameter tensors of a trainable module, ordered by name.
pub type StateDict = BTreeMap<String, ArrayD<f32>>;

/// Load a state dict from an NPZ file.
///
/// A missing path is an error, not an empty result.
pub fn load_tensors(path: &Path) -> Result<StateDict> {
    if !path.is_file() {
        anyhow::bail!("Path does not exist: {:?}", path);
    }

    let mut reader = NpzReader::open(path)?;
    let mut tensors = StateDict::new();
    for name in reader.names() {
        let array: ArrayD<f32> = reader.array(&name)?;
        tensors.insert(name, array);
    }
    Ok(tensors)
}

/// Save a state dict as an NPZ file and return the written path.
///
/// Overwrites `path` when it already exists as a file; otherwise creates the
/// file there, creating missing parent directories first.
pub fn save_tensors(tensors: &StateDict, path: &Path) -> Result<PathBuf> {
    if !path.is_file() {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory {:?}", parent))?;
            }
        }
    }

    let mut writer = NpzWriter::create(path)?;
    for (name, array) in tensors {
        writer.add(name, array)?;
    }
    writer.finish()?;
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn};
    use tempfile::tempdir;

    fn sample_state() -> StateDict {
        let mut state = StateDict::new();
        state.insert(
            "weight".to_string(),
            ArrayD::from_shape_vec(IxDyn(&[2, 2]), vec![1.0, 2.0, 3.0, 4.0]).unwrap(),
        );
        state.insert(
            "bias".to_string(),
            ArrayD::from_shape_vec(IxDyn(&[2]), vec![0.5, -0.5]).unwrap(),
        );
        state
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.npz");

        let state = sample_state();
        let written = save_tensors(&state, &path).unwrap();
        assert_eq!(written, path);

        let loaded = load_tensors(&path).unwrap();
        assert_eq!(state, loaded);
    }

    #[test]
    fn save_creates_missing_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/dir/state.npz");

        save_tensors(&sample_state(), &path).unwrap();
        assert!(path.is_file());
    }

    #[test]
    fn load_of_missing_path_fails() {
        let dir = tempdir().unwrap();
        let err = load_tensors(&dir.path().join("absent.npz")).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
