//! Static landmark map.
//!
//! The map is loaded once before filtering begins and is never mutated by the filter. Landmarks are stored
//! as [Landmark] records and read from / written to CSV files with an `id,x,y` header.

use crate::measurements::LandmarkObs;

use nalgebra::{Point2, distance};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;

/// A single map landmark with a fixed map-frame position.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    /// Landmark identifier
    pub id: i32,
    /// Map-frame x coordinate in meters
    pub x: f64,
    /// Map-frame y coordinate in meters
    pub y: f64,
}
impl Landmark {
    pub fn new(id: i32, x: f64, y: f64) -> Self {
        Landmark { id, x, y }
    }
    pub fn position(&self) -> Point2<f64> {
        Point2::new(self.x, self.y)
    }
}
impl From<&Landmark> for LandmarkObs {
    fn from(landmark: &Landmark) -> Self {
        LandmarkObs::with_id(landmark.id, landmark.x, landmark.y)
    }
}

/// Immutable collection of landmarks.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Map {
    landmarks: Vec<Landmark>,
}
impl From<Vec<Landmark>> for Map {
    fn from(landmarks: Vec<Landmark>) -> Self {
        Map { landmarks }
    }
}
impl Map {
    pub fn new(landmarks: Vec<Landmark>) -> Self {
        Map { landmarks }
    }
    pub fn landmarks(&self) -> &[Landmark] {
        &self.landmarks
    }
    pub fn len(&self) -> usize {
        self.landmarks.len()
    }
    pub fn is_empty(&self) -> bool {
        self.landmarks.is_empty()
    }
    /// Landmarks strictly closer than `range` to `(x, y)`, in map order, as map-frame candidates for
    /// data association.
    pub fn landmarks_within(&self, x: f64, y: f64, range: f64) -> Vec<LandmarkObs> {
        let origin = Point2::new(x, y);
        self.landmarks
            .iter()
            .filter(|landmark| distance(&origin, &landmark.position()) < range)
            .map(LandmarkObs::from)
            .collect()
    }
    /// Reads a map from a CSV file with an `id,x,y` header.
    ///
    /// # Arguments
    /// * `path` - Path to the CSV file to read.
    ///
    /// # Returns
    /// * `Ok(Map)` if successful.
    /// * `Err` if the file cannot be read or parsed.
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)?;
        let mut landmarks = Vec::new();
        for result in rdr.deserialize() {
            let landmark: Landmark = result?;
            landmarks.push(landmark);
        }
        Ok(Map { landmarks })
    }
    /// Writes the map to a CSV file with an `id,x,y` header.
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        for landmark in &self.landmarks {
            writer.serialize(landmark)?;
        }
        writer.flush()?;
        Ok(())
    }
}
