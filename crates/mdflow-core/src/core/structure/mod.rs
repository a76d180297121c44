//! # Structure Boundary
//!
//! The minimal molecular model the orchestrator needs, and the [`StructureIo`] trait
//! through which topology and coordinate files are read and written.
//!
//! ## Overview
//!
//! The orchestrator never interprets chemistry. It only needs to know which residues
//! a topology contains (to derive energy groups), which source components a merged
//! topology was built from (to write a combined parameter file), and the positions
//! and periodic cell of a starting configuration. Everything else is delegated to an
//! implementation of [`StructureIo`]; [`TextStructureIo`] is the built-in one for
//! plain-text GROMACS and Amber files.

mod text;

pub use text::TextStructureIo;

use nalgebra::{Point3, Vector3};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StructureError {
    #[error("File I/O error for '{path}': {source}", path = path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Parse error in '{path}' at line {line}: {message}", path = path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Unsupported file format for '{path}'", path = path.display())]
    UnsupportedFormat { path: PathBuf },

    #[error("Atom count mismatch: topology has {expected} atoms, coordinates have {found}")]
    AtomCountMismatch { expected: usize, found: usize },

    #[error("Structure has no coordinates attached")]
    MissingCoordinates,

    #[error("Unsupported operation: {0}")]
    Unsupported(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Residue {
    pub name: String,
    pub atoms: Vec<String>,
}

/// A source molecule type and how many copies of it the structure contains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    pub name: String,
    pub source: PathBuf,
    pub copies: u32,
}

/// Periodic cell given as edge lengths (Å) and angles (degrees).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationBox {
    pub lengths: Vector3<f64>,
    pub angles: Vector3<f64>,
}

impl SimulationBox {
    pub fn rectangular(a: f64, b: f64, c: f64) -> Self {
        Self {
            lengths: Vector3::new(a, b, c),
            angles: Vector3::new(90.0, 90.0, 90.0),
        }
    }

    pub fn is_rectangular(&self) -> bool {
        self.angles.iter().all(|angle| (angle - 90.0).abs() < 1e-6)
    }

    /// Builds the cell from three box vectors.
    pub fn from_vectors(a: Vector3<f64>, b: Vector3<f64>, c: Vector3<f64>) -> Self {
        let angle = |u: &Vector3<f64>, v: &Vector3<f64>| u.angle(v).to_degrees();
        Self {
            lengths: Vector3::new(a.norm(), b.norm(), c.norm()),
            angles: Vector3::new(angle(&b, &c), angle(&a, &c), angle(&a, &b)),
        }
    }

    /// Box vectors in the lower-triangular convention shared by both engines.
    pub fn vectors(&self) -> [Vector3<f64>; 3] {
        let (a, b, c) = (self.lengths.x, self.lengths.y, self.lengths.z);
        let (alpha, beta, gamma) = (
            self.angles.x.to_radians(),
            self.angles.y.to_radians(),
            self.angles.z.to_radians(),
        );
        let bx = b * gamma.cos();
        let by = b * gamma.sin();
        let cx = c * beta.cos();
        let cy = c * (alpha.cos() - beta.cos() * gamma.cos()) / gamma.sin();
        let cz = (c * c - cx * cx - cy * cy).max(0.0).sqrt();
        [
            Vector3::new(a, 0.0, 0.0),
            Vector3::new(bx, by, 0.0),
            Vector3::new(cx, cy, cz),
        ]
    }
}

/// Atomic positions (Å) and an optional periodic cell at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct Coordinates {
    pub positions: Vec<Point3<f64>>,
    pub cell: Option<SimulationBox>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Structure {
    pub residues: Vec<Residue>,
    pub components: Vec<Component>,
    pub coordinates: Option<Coordinates>,
}

impl Structure {
    pub fn atom_count(&self) -> usize {
        self.residues.iter().map(|r| r.atoms.len()).sum()
    }

    pub fn atom_names(&self) -> impl Iterator<Item = (usize, &Residue, &str)> {
        self.residues.iter().enumerate().flat_map(|(idx, residue)| {
            residue
                .atoms
                .iter()
                .map(move |atom| (idx + 1, residue, atom.as_str()))
        })
    }

    /// Unique residue names, sorted.
    pub fn residue_names(&self) -> BTreeSet<String> {
        self.residues.iter().map(|r| r.name.clone()).collect()
    }

    /// `copies` consecutive copies of this structure; coordinates are dropped.
    pub fn replicate(&self, copies: u32) -> Self {
        let residues = (0..copies)
            .flat_map(|_| self.residues.iter().cloned())
            .collect();
        let components = self
            .components
            .iter()
            .map(|c| Component {
                copies: c.copies * copies,
                ..c.clone()
            })
            .collect();
        Self {
            residues,
            components,
            coordinates: None,
        }
    }

    /// Concatenates structures in order; coordinates are dropped.
    pub fn merge<'a>(parts: impl IntoIterator<Item = &'a Structure>) -> Self {
        let mut merged = Structure::default();
        for part in parts {
            merged.residues.extend(part.residues.iter().cloned());
            merged.components.extend(part.components.iter().cloned());
        }
        merged
    }

    pub fn with_coordinates(&self, coordinates: Coordinates) -> Self {
        Self {
            coordinates: Some(coordinates),
            ..self.clone()
        }
    }
}

/// Narrow interface to scientific file formats, chosen by file extension.
pub trait StructureIo {
    /// Reads the first molecule type of a topology file as a single-copy structure.
    fn read_topology(&self, path: &Path) -> Result<Structure, StructureError>;

    fn read_coordinates(&self, path: &Path) -> Result<Coordinates, StructureError>;

    /// Writes a parameter/topology file describing every component of `structure`.
    fn write_parameters(&self, structure: &Structure, path: &Path) -> Result<(), StructureError>;

    /// Writes the attached coordinates of `structure`.
    fn write_coordinates(&self, structure: &Structure, path: &Path)
    -> Result<(), StructureError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn residue(name: &str, atoms: &[&str]) -> Residue {
        Residue {
            name: name.to_string(),
            atoms: atoms.iter().map(|a| a.to_string()).collect(),
        }
    }

    fn single(name: &str, residues: Vec<Residue>) -> Structure {
        Structure {
            residues,
            components: vec![Component {
                name: name.to_string(),
                source: PathBuf::from(format!("{name}.top")),
                copies: 1,
            }],
            coordinates: None,
        }
    }

    #[test]
    fn replicate_repeats_residues_and_scales_copies() {
        let water = single("SOL", vec![residue("SOL", &["OW", "HW1", "HW2"])]);
        let box_of_water = water.replicate(3);

        assert_eq!(box_of_water.residues.len(), 3);
        assert_eq!(box_of_water.atom_count(), 9);
        assert_eq!(box_of_water.components[0].copies, 3);
    }

    #[test]
    fn residue_names_do_not_depend_on_merge_order() {
        let a = single("LIG", vec![residue("LIG", &["C1"]), residue("ACE", &["C"])]);
        let b = single("SOL", vec![residue("SOL", &["OW"])]).replicate(2);

        let ab = Structure::merge([&a, &b]);
        let ba = Structure::merge([&b, &a]);

        assert_eq!(ab.residue_names(), ba.residue_names());
        assert_eq!(
            ab.residue_names().into_iter().collect::<Vec<_>>(),
            vec!["ACE", "LIG", "SOL"]
        );
        assert_eq!(ab.components.len(), 2);
    }

    #[test]
    fn atom_names_are_numbered_by_residue() {
        let s = single("X", vec![residue("AAA", &["A1", "A2"]), residue("BBB", &["B1"])]);
        let listed: Vec<_> = s.atom_names().map(|(n, r, a)| (n, r.name.as_str(), a)).collect();
        assert_eq!(
            listed,
            vec![(1, "AAA", "A1"), (1, "AAA", "A2"), (2, "BBB", "B1")]
        );
    }

    #[test]
    fn box_vectors_round_trip_through_lengths_and_angles() {
        let cell = SimulationBox {
            lengths: Vector3::new(30.0, 32.0, 35.0),
            angles: Vector3::new(80.0, 95.0, 100.0),
        };
        let [a, b, c] = cell.vectors();
        let rebuilt = SimulationBox::from_vectors(a, b, c);

        assert!((rebuilt.lengths - cell.lengths).norm() < 1e-6);
        assert!((rebuilt.angles - cell.angles).norm() < 1e-6);
        assert!(!rebuilt.is_rectangular());
        assert!(SimulationBox::rectangular(1.0, 2.0, 3.0).is_rectangular());
    }
}
