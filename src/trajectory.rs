use anyhow::{Context, Result};
use rmp_serde::{decode, encode};
use serde::{
    Deserialize, Deserializer, Serialize, Serializer,
    de::Error as _,
    ser::SerializeMap,
};
use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

/// Population snapshots indexed by step.
///
/// Serialized as a map from step index to the population vector at that
/// step. Steps are contiguous and start at `first_step`.
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    first_step: usize,
    snapshots: Vec<Vec<f64>>,
}

impl Trajectory {
    pub fn new(first_step: usize) -> Self {
        Self {
            first_step,
            snapshots: Vec::new(),
        }
    }

    pub fn push(&mut self, pop: Vec<f64>) {
        self.snapshots.push(pop);
    }

    pub fn first_step(&self) -> usize {
        self.first_step
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Snapshot taken at `step`, if recorded.
    pub fn get(&self, step: usize) -> Option<&[f64]> {
        let idx = step.checked_sub(self.first_step)?;
        self.snapshots.get(idx).map(Vec::as_slice)
    }

    /// Iterate over `(step, snapshot)` pairs in step order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &[f64])> {
        self.snapshots
            .iter()
            .enumerate()
            .map(|(i, pop)| (self.first_step + i, pop.as_slice()))
    }

    pub fn save<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);
        encode::write(&mut writer, self).context("failed to serialize trajectory")?;
        writer.flush().context("failed to flush writer stream")?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);
        let traj = decode::from_read(&mut reader).context("failed to deserialize trajectory")?;
        Ok(traj)
    }
}

impl Serialize for Trajectory {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (step, pop) in self.iter() {
            map.serialize_entry(&step, pop)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Trajectory {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = BTreeMap::<usize, Vec<f64>>::deserialize(deserializer)?;
        let first_step = map.keys().next().copied().unwrap_or(0);
        let mut traj = Trajectory::new(first_step);
        for (i, (step, pop)) in map.into_iter().enumerate() {
            if step != first_step + i {
                return Err(D::Error::custom(format!(
                    "trajectory steps must be contiguous, but step {} is missing",
                    first_step + i
                )));
            }
            traj.push(pop);
        }
        Ok(traj)
    }
}
