//! Durable snapshots of the global weights, stored as safetensors files.
//!
//! Every layer is a `F32` tensor named `layer.<index>` and the file metadata records
//! the round that produced it.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use comms::msg::Weights;
use ndarray::{ArrayD, IxDyn};
use safetensors::{
    Dtype, SafeTensors,
    tensor::TensorView,
};

use crate::error::CheckpointErr;

const LAYER_PREFIX: &str = "layer.";
const ROUND_KEY: &str = "round";

/// The content of a checkpoint file.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub weights: Weights,
    /// The round that produced these weights, if recorded.
    pub round: Option<usize>,
}

/// Writes `weights` to `path`, replacing any previous checkpoint.
///
/// The file is written next to `path` first and then renamed over it, so a crash
/// never leaves a truncated checkpoint behind.
///
/// # Arguments
/// * `path` - The checkpoint location.
/// * `weights` - The weights to persist.
/// * `round` - The round that produced them.
///
/// # Returns
/// A `CheckpointErr` if the weights couldn't be written.
pub fn save(path: &Path, weights: &Weights, round: usize) -> Result<(), CheckpointErr> {
    let buffers: Vec<Vec<u8>> = weights
        .layers()
        .iter()
        .map(|layer| layer.iter().flat_map(|x| x.to_le_bytes()).collect())
        .collect();

    let mut views = Vec::with_capacity(buffers.len());
    for (i, (layer, bytes)) in weights.layers().iter().zip(&buffers).enumerate() {
        let view = TensorView::new(Dtype::F32, layer.shape().to_vec(), bytes)?;
        views.push((format!("{LAYER_PREFIX}{i}"), view));
    }

    let metadata = HashMap::from([(ROUND_KEY.to_string(), round.to_string())]);

    let tmp = staging_path(path);
    safetensors::serialize_to_file(views, &Some(metadata), &tmp)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Reads a checkpoint written by `save`.
///
/// # Arguments
/// * `path` - The checkpoint location.
///
/// # Returns
/// The stored weights, layers in their original order, or a `CheckpointErr`.
pub fn load(path: &Path) -> Result<Checkpoint, CheckpointErr> {
    let bytes = fs::read(path)?;

    let (_, metadata) = SafeTensors::read_metadata(&bytes)?;
    let round = match metadata.metadata().as_ref().and_then(|m| m.get(ROUND_KEY)) {
        Some(raw) => Some(
            raw.parse()
                .map_err(|_| CheckpointErr::Layout(format!("invalid round {raw:?}")))?,
        ),
        None => None,
    };

    let tensors = SafeTensors::deserialize(&bytes)?;
    let mut layers = Vec::with_capacity(tensors.len());

    for (name, view) in tensors.tensors() {
        let index = layer_index(&name)?;

        if view.dtype() != Dtype::F32 {
            return Err(CheckpointErr::Layout(format!(
                "{name} is {:?}, expected F32",
                view.dtype()
            )));
        }

        let data = view
            .data()
            .chunks_exact(size_of::<f32>())
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        let layer = ArrayD::from_shape_vec(IxDyn(view.shape()), data)
            .map_err(|e| CheckpointErr::Layout(format!("{name}: {e}")))?;

        layers.push((index, layer));
    }

    layers.sort_by_key(|(index, _)| *index);

    if let Some(pos) = layers.iter().enumerate().position(|(i, (index, _))| i != *index) {
        return Err(CheckpointErr::Layout(format!("missing {LAYER_PREFIX}{pos}")));
    }

    let weights = Weights::new(layers.into_iter().map(|(_, layer)| layer).collect());
    Ok(Checkpoint { weights, round })
}

fn layer_index(name: &str) -> Result<usize, CheckpointErr> {
    name.strip_prefix(LAYER_PREFIX)
        .and_then(|index| index.parse().ok())
        .ok_or_else(|| CheckpointErr::Layout(format!("unexpected tensor {name:?}")))
}

fn staging_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use ndarray::{arr0, arr1, arr2};

    use super::*;

    fn weights(scale: f32) -> Weights {
        Weights::new(vec![
            arr2(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]).into_dyn() * scale,
            arr1(&[-0.5]).into_dyn() * scale,
            arr0(7.25).into_dyn() * scale,
        ])
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("global.safetensors");

        save(&path, &weights(1.0), 3).unwrap();
        let checkpoint = load(&path).unwrap();

        assert_eq!(checkpoint.weights, weights(1.0));
        assert_eq!(checkpoint.round, Some(3));
        assert!(!staging_path(&path).exists());
    }

    #[test]
    fn later_rounds_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("global.safetensors");

        save(&path, &weights(1.0), 1).unwrap();
        save(&path, &weights(2.0), 2).unwrap();

        let checkpoint = load(&path).unwrap();
        assert_eq!(checkpoint.weights, weights(2.0));
        assert_eq!(checkpoint.round, Some(2));
    }

    #[test]
    fn many_layers_keep_their_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deep.safetensors");

        let layers: Vec<_> = (0..12).map(|i| arr1(&[i as f32]).into_dyn()).collect();
        let deep = Weights::new(layers);

        save(&path, &deep, 0).unwrap();
        assert_eq!(load(&path).unwrap().weights, deep);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, CheckpointErr::Io(_)));
    }
}
