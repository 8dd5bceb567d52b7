//! Per-cell interface state exchanged between the solid and fluid solvers.
//!
//! The store is an arena keyed by stable cell id. Cross-component reads go
//! through point-in-time snapshots written here, never through shared
//! references into a solver's own vectors. Any topology change must
//! [`rebuild`](InterfaceStore::rebuild) the arena before the next solver
//! access; records from a previous mesh generation are never read.

use ahash::AHashMap;

use crate::mesh::{CellId, QuadMesh, FACES_PER_CELL};
use crate::{sym_components, Error, DIM};

/// Number of independent stress components stored per quadrature point.
pub const STRESS_COMPONENTS: usize = sym_components(DIM);

/// Which formulation governs a cell of the shared mesh.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum Indicator {
    #[default]
    Fluid,
    Solid,
}

impl Indicator {
    /// Numeric tag: fluid cells are 0, solid cells 1.
    pub fn as_index(self) -> usize {
        match self {
            Indicator::Fluid => 0,
            Indicator::Solid => 1,
        }
    }
}

/// Interface state attached to one cell.
#[derive(Clone, Debug)]
pub struct CellRecord {
    pub indicator: Indicator,
    /// Traction at each face quadrature point, `[face][q]`.
    pub fsi_traction: Vec<Vec<[f64; DIM]>>,
    /// Solid acceleration at volume quadrature points.
    pub fsi_acceleration: Vec<[f64; DIM]>,
    /// Independent symmetric stress components at volume quadrature points,
    /// ordered `(00, 10, 11)`.
    pub fsi_stress: Vec<[f64; STRESS_COMPONENTS]>,
}

impl CellRecord {
    fn zeroed(n_face_q: usize, n_volume_q: usize) -> Self {
        CellRecord {
            indicator: Indicator::Fluid,
            fsi_traction: vec![vec![[0.0; DIM]; n_face_q]; FACES_PER_CELL],
            fsi_acceleration: vec![[0.0; DIM]; n_volume_q],
            fsi_stress: vec![[0.0; STRESS_COMPONENTS]; n_volume_q],
        }
    }
}

/// Arena of interface records for the current mesh topology.
pub struct InterfaceStore {
    records: AHashMap<CellId, CellRecord>,
    n_face_q: usize,
    n_volume_q: usize,
    generation: u64,
}

impl InterfaceStore {
    pub fn new(n_face_q: usize, n_volume_q: usize) -> Self {
        InterfaceStore {
            records: AHashMap::new(),
            n_face_q,
            n_volume_q,
            generation: 0,
        }
    }

    /// Discard every record and seed zero-initialized ones for the active
    /// cells of `mesh`. Must be called after any topology change.
    pub fn rebuild(&mut self, mesh: &QuadMesh) {
        self.records.clear();
        for cell in mesh.active_cells() {
            self.records
                .insert(cell, CellRecord::zeroed(self.n_face_q, self.n_volume_q));
        }
        self.generation += 1;
    }

    /// Mesh generation the current records belong to.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record of a cell, zero-initialized on first access.
    pub fn get(&mut self, cell: CellId) -> &CellRecord {
        let (n_face_q, n_volume_q) = (self.n_face_q, self.n_volume_q);
        self.records
            .entry(cell)
            .or_insert_with(|| CellRecord::zeroed(n_face_q, n_volume_q))
    }

    pub fn get_mut(&mut self, cell: CellId) -> &mut CellRecord {
        let (n_face_q, n_volume_q) = (self.n_face_q, self.n_volume_q);
        self.records
            .entry(cell)
            .or_insert_with(|| CellRecord::zeroed(n_face_q, n_volume_q))
    }

    /// Read-only access without creating a record.
    pub fn try_get(&self, cell: CellId) -> Option<&CellRecord> {
        self.records.get(&cell)
    }

    pub fn indicator(&self, cell: CellId) -> Indicator {
        self.records
            .get(&cell)
            .map(|r| r.indicator)
            .unwrap_or(Indicator::Fluid)
    }

    /// Validate the face layout of a record against the mesh topology.
    pub fn check_cell_data(&self, cell: CellId) -> Result<(), Error> {
        let record = self
            .records
            .get(&cell)
            .ok_or(Error::WrongCellData {
                cell,
                found: 0,
                expected: FACES_PER_CELL,
            })?;
        if record.fsi_traction.len() != FACES_PER_CELL {
            return Err(Error::WrongCellData {
                cell,
                found: record.fsi_traction.len(),
                expected: FACES_PER_CELL,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_access_creates_zero_records() {
        let mut store = InterfaceStore::new(2, 4);
        let record = store.get(17);
        assert_eq!(record.indicator, Indicator::Fluid);
        assert_eq!(record.fsi_traction.len(), FACES_PER_CELL);
        assert_eq!(record.fsi_acceleration.len(), 4);
        assert!(record.fsi_stress.iter().all(|s| s.iter().all(|&v| v == 0.0)));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn rebuild_regenerates_the_arena() {
        let mut mesh = QuadMesh::subdivided_rectangle([0.0, 0.0], [1.0, 1.0], [2, 2]);
        let mut store = InterfaceStore::new(2, 4);
        store.rebuild(&mesh);
        assert_eq!(store.len(), 4);
        let gen0 = store.generation();

        store.get_mut(0).indicator = Indicator::Solid;
        mesh.flag_refine(0);
        mesh.execute_coarsening_and_refinement();
        store.rebuild(&mesh);

        assert_eq!(store.len(), mesh.n_active_cells());
        assert!(store.generation() > gen0);
        // Stale state from the previous generation is gone.
        assert_eq!(store.indicator(0), Indicator::Fluid);
    }

    #[test]
    fn check_cell_data_flags_malformed_records() {
        let mut store = InterfaceStore::new(2, 4);
        store.get_mut(3).fsi_traction.pop();
        assert!(store.check_cell_data(3).is_err());
        assert!(store.check_cell_data(99).is_err());
    }
}
