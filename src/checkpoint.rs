// src/checkpoint.rs
//
// Reward-model checkpoints: one shape-headed binary file per weight block
// plus a JSON metadata document carrying the iteration counter and the
// architecture. Round-trips losslessly; loading against a different
// architecture fails with expected-vs-actual shapes.
//
// Binary layout per file: ndims u64 LE, each dim u64 LE, then f32 LE data.

use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::net::{NetArch, NetParams};

const METADATA_FILE: &str = "metadata.json";

/// Everything about a checkpoint except the weights themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub arch: NetArch,
    pub iteration: u64,
    pub saved_at_ms: u64,
}

/// Write a f32 array with a shape header.
pub fn write_array_f32(path: &Path, data: &[f32], shape: &[u64]) -> Result<()> {
    let mut file = fs::File::create(path)?;
    let ndims = shape.len() as u64;
    file.write_all(&ndims.to_le_bytes())?;
    for &dim in shape {
        file.write_all(&dim.to_le_bytes())?;
    }
    for &val in data {
        file.write_all(&val.to_le_bytes())?;
    }
    Ok(())
}

/// Read a f32 array and its shape header.
pub fn read_array_f32(path: &Path) -> Result<(Vec<f32>, Vec<u64>)> {
    let mut file = fs::File::open(path)?;
    let mut u64_buf = [0u8; 8];

    file.read_exact(&mut u64_buf)
        .map_err(|_| Error::CheckpointFormat(format!("{}: missing header", path.display())))?;
    let ndims = u64::from_le_bytes(u64_buf) as usize;
    if ndims == 0 || ndims > 8 {
        return Err(Error::CheckpointFormat(format!(
            "{}: implausible rank {ndims}",
            path.display()
        )));
    }

    let mut shape = Vec::with_capacity(ndims);
    for _ in 0..ndims {
        file.read_exact(&mut u64_buf)
            .map_err(|_| Error::CheckpointFormat(format!("{}: truncated shape", path.display())))?;
        shape.push(u64::from_le_bytes(u64_buf));
    }

    let len: u64 = shape.iter().product();
    let mut data = Vec::with_capacity(len as usize);
    let mut f32_buf = [0u8; 4];
    for _ in 0..len {
        file.read_exact(&mut f32_buf)
            .map_err(|_| Error::CheckpointFormat(format!("{}: truncated data", path.display())))?;
        data.push(f32::from_le_bytes(f32_buf));
    }
    Ok((data, shape))
}

/// Persist weights and the iteration counter under `dir` (created on demand).
pub fn save(dir: &Path, params: &NetParams, iteration: u64) -> Result<()> {
    fs::create_dir_all(dir)?;

    let metadata = CheckpointMetadata {
        arch: params.arch.clone(),
        iteration,
        saved_at_ms: crate::segment::now_ms(),
    };
    let json = serde_json::to_string_pretty(&metadata)?;
    fs::write(dir.join(METADATA_FILE), json)?;

    for (name, block) in params.block_names_for().iter().zip(params.blocks()) {
        write_array_f32(&dir.join(format!("{name}.bin")), block, &[block.len() as u64])?;
    }
    info!(dir = %dir.display(), iteration, "saved reward-model checkpoint");
    Ok(())
}

/// Restore weights for the architecture the caller constructed.
///
/// The caller's `arch` is authoritative: a checkpoint for a different shape
/// is a fatal [`Error::CheckpointShape`].
pub fn load(dir: &Path, arch: &NetArch) -> Result<(NetParams, u64)> {
    let metadata_path = dir.join(METADATA_FILE);
    let raw = fs::read_to_string(&metadata_path).map_err(|_| {
        Error::CheckpointFormat(format!("{}: metadata missing", metadata_path.display()))
    })?;
    let metadata: CheckpointMetadata = serde_json::from_str(&raw)?;

    if &metadata.arch != arch {
        return Err(Error::CheckpointShape {
            expected: arch.describe(),
            actual: metadata.arch.describe(),
        });
    }

    let mut params = NetParams::init(arch.clone(), 0);
    let names = params.block_names_for();
    for (name, block) in names.iter().zip(params.blocks_mut()) {
        let path = dir.join(format!("{name}.bin"));
        let (data, shape) = read_array_f32(&path)?;
        if shape != [block.len() as u64] {
            return Err(Error::CheckpointShape {
                expected: format!("{name}: [{}]", block.len()),
                actual: format!("{name}: {shape:?}"),
            });
        }
        *block = data;
    }
    info!(dir = %dir.display(), iteration = metadata.iteration, "restored reward-model checkpoint");
    Ok((params, metadata.iteration))
}
