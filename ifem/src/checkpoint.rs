//! Checkpoint persistence for the solid state vectors.
//!
//! One checkpoint generation is three companion files, named by the
//! zero-padded step index: displacement, velocity and acceleration. Only the
//! newest generation is retained; older triples are deleted when a save
//! succeeds. Writing is the coordinator's job (callers guard on rank).

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use crate::Error;

pub const DISPLACEMENT_EXT: &str = "solid_checkpoint_displacement";
pub const VELOCITY_EXT: &str = "solid_checkpoint_velocity";
pub const ACCELERATION_EXT: &str = "solid_checkpoint_acceleration";

/// State restored from disk by [`load`].
pub struct CheckpointData {
    pub step: u32,
    pub displacement: Vec<f64>,
    pub velocity: Vec<f64>,
    pub acceleration: Vec<f64>,
}

fn stem_path(dir: &Path, step: u32) -> PathBuf {
    dir.join(format!("{:06}", step))
}

/// Serialize the three state vectors for `step` and drop every older
/// checkpoint generation.
pub fn save(
    dir: impl AsRef<Path>,
    step: u32,
    displacement: &[f64],
    velocity: &[f64],
    acceleration: &[f64],
) -> Result<(), Error> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;
    let base = stem_path(dir, step);
    for (ext, data) in [
        (DISPLACEMENT_EXT, displacement),
        (VELOCITY_EXT, velocity),
        (ACCELERATION_EXT, acceleration),
    ] {
        let path = base.with_extension(ext);
        log::info!("Prepare to save to {:?}", path);
        let writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(writer, data)?;
    }

    // Retention: keep exactly the newest generation.
    let current_stem = format!("{:06}", step);
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(DISPLACEMENT_EXT) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if stem == current_stem {
            continue;
        }
        log::info!("Removing {:?}", path);
        fs::remove_file(&path)?;
        let _ = fs::remove_file(path.with_extension(VELOCITY_EXT));
        let _ = fs::remove_file(path.with_extension(ACCELERATION_EXT));
    }
    Ok(())
}

/// Load the newest checkpoint generation, if any. Absence of a checkpoint is
/// the normal "start from the beginning" signal, not an error.
pub fn load(dir: impl AsRef<Path>) -> Result<Option<CheckpointData>, Error> {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return Ok(None);
    }
    let mut newest: Option<(String, PathBuf)> = None;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(DISPLACEMENT_EXT) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if newest.as_ref().map_or(true, |(best, _)| stem > best.as_str()) {
            newest = Some((stem.to_string(), path.clone()));
        }
    }
    let Some((stem, path)) = newest else {
        return Ok(None);
    };
    let step: u32 = stem.parse().map_err(|_| Error::Consistency {
        message: format!("malformed checkpoint stem {:?}", stem),
    })?;

    let read = |path: PathBuf| -> Result<Vec<f64>, Error> {
        let reader = BufReader::new(File::open(path)?);
        Ok(bincode::deserialize_from(reader)?)
    };
    let displacement = read(path.clone())?;
    let velocity = read(path.with_extension(VELOCITY_EXT))?;
    let acceleration = read(path.with_extension(ACCELERATION_EXT))?;
    Ok(Some(CheckpointData {
        step,
        displacement,
        velocity,
        acceleration,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_is_bit_exact() {
        let dir = tempfile::tempdir().unwrap();
        let disp = vec![1.0, -2.5, 3.25];
        let vel = vec![0.5, 0.25, -0.125];
        let acc = vec![9.81, 0.0, 1e-30];
        save(dir.path(), 42, &disp, &vel, &acc).unwrap();
        let data = load(dir.path()).unwrap().unwrap();
        assert_eq!(data.step, 42);
        assert_eq!(data.displacement, disp);
        assert_eq!(data.velocity, vel);
        assert_eq!(data.acceleration, acc);
    }

    #[test]
    fn retention_keeps_only_the_newest_generation() {
        let dir = tempfile::tempdir().unwrap();
        for step in [10, 20, 30] {
            let v = vec![step as f64];
            save(dir.path(), step, &v, &v, &v).unwrap();
        }
        let files: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(files.len(), 3);
        assert!(files.iter().all(|f| f.starts_with("000030")));
        let data = load(dir.path()).unwrap().unwrap();
        assert_eq!(data.step, 30);
    }

    #[test]
    fn missing_checkpoint_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(dir.path()).unwrap().is_none());
    }
}
