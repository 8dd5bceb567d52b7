//! Synchronization protocol for the external solid solver backend.
//!
//! When solid dynamics runs in an external program sharing the process
//! group, each step exchanges scalar mesh metadata and a liveness flag via
//! collective reductions, obtains the coupling time step from the external
//! side by a collective maximum, and moves per-contact-map buffers of
//! stress/velocity data through matched asynchronous point-to-point
//! transfers. The external mesh is structured; ghost entities are classified
//! purely from its per-dimension linear counts and validated against the
//! local mesh.

use std::rc::Rc;

use crate::comm::Communicator;
use crate::config::Parameters;
use crate::fluid::FluidSolver;
use crate::interface::InterfaceStore;
use crate::mesh::QuadMesh;
use crate::time::Time;
use crate::Error;

/// Structured layout of the external mesh, as reported over the wire.
#[derive(Copy, Clone, Debug)]
pub struct ExternalMeshLayout {
    pub dim: usize,
    /// Linear node count along one direction.
    pub nodes_one_dir: i64,
    pub n_nodes: i64,
    pub n_elements: i64,
}

/// Interior (non-ghost) node and element ids of a structured external mesh.
///
/// The external ordering is assumed grid-like: ids run fastest along x, then
/// y, then z. The one-layer outer shell is excluded per z-layer; in 2-D
/// there is a single layer and no z-shell to drop. This mirrors the external
/// program's ordering and is validated against the local mesh rather than
/// independently verified.
pub fn classify_interior(layout: ExternalMeshLayout) -> (Vec<i64>, Vec<i64>) {
    let n = layout.nodes_one_dir;
    let node_z = layout.n_nodes / (n * n);
    let (node_z_begin, node_z_end) = if layout.dim == 3 {
        (1, node_z - 1)
    } else {
        (0, node_z)
    };

    let el_one_dir = if layout.dim == 2 {
        (layout.n_elements as f64).sqrt() as i64
    } else {
        (layout.n_elements as f64).cbrt().round() as i64
    };
    let ele_z = layout.n_elements / (el_one_dir * el_one_dir);
    let (ele_z_begin, ele_z_end) = if layout.dim == 3 {
        (1, ele_z - 1)
    } else {
        (0, ele_z)
    };

    let mut non_ghost_nodes = Vec::new();
    for l in node_z_begin..node_z_end {
        let corner_node_id = l * n * n + n + 1;
        for i in 0..n - 2 {
            for j in 0..n - 2 {
                non_ghost_nodes.push(corner_node_id + j + i * n);
            }
        }
    }

    let mut non_ghost_cells = Vec::new();
    for l in ele_z_begin..ele_z_end {
        let corner_el_id = l * el_one_dir * el_one_dir + el_one_dir + 1;
        for i in 0..el_one_dir - 2 {
            for j in 0..el_one_dir - 2 {
                non_ghost_cells.push(corner_el_id + j + i * el_one_dir);
            }
        }
    }
    (non_ghost_nodes, non_ghost_cells)
}

/// Fluid-side driver coupled to the external solid program.
pub struct ExternalCoupling {
    params: Parameters,
    comm: Rc<dyn Communicator>,
    is_comm_active: bool,
    external_nodes_one_dir: i64,
    external_n_nodes: i64,
    external_n_elements: i64,
    non_ghost_nodes: Vec<i64>,
    non_ghost_cells: Vec<i64>,
}

impl ExternalCoupling {
    pub fn new(params: &Parameters, comm: Rc<dyn Communicator>) -> Result<Self, Error> {
        params.validate()?;
        Ok(ExternalCoupling {
            params: params.clone(),
            comm,
            is_comm_active: true,
            external_nodes_one_dir: 0,
            external_n_nodes: 0,
            external_n_elements: 0,
            non_ghost_nodes: Vec::new(),
            non_ghost_cells: Vec::new(),
        })
    }

    /// Collective maximum over the process group; the external side
    /// contributes the authoritative value, every local rank sends zero.
    fn receive_max(&self, local: i64) -> i64 {
        self.comm.max_int(local)
    }

    /// Group-wide liveness of the external program.
    pub fn all_active(&self, local: bool) -> bool {
        self.comm.all(local)
    }

    /// Obtain the coupling time step from the external side and advance the
    /// clock with it.
    pub fn get_external_dt(&self, time: &mut Time) {
        let dt = self.comm.max(0.0);
        if dt > 0.0 {
            time.set_delta_t(dt);
        }
        time.increment();
    }

    /// Post one receive per contact-map entry, then block on completion of
    /// the posted receives only, allowing the transfers to overlap.
    pub fn rec_data(
        &self,
        contact_ranks: &[usize],
        sizes: &[usize],
        tag: i32,
    ) -> Vec<Vec<f64>> {
        let handles: Vec<_> = contact_ranks
            .iter()
            .zip(sizes)
            .map(|(&rank, &len)| self.comm.post_recv(rank, tag, len))
            .collect();
        handles.into_iter().map(|h| self.comm.wait(h)).collect()
    }

    /// Send one buffer per contact-map entry.
    pub fn send_data(&self, buffers: &[Vec<f64>], contact_ranks: &[usize], tag: i32) {
        for (buffer, &rank) in buffers.iter().zip(contact_ranks) {
            self.comm.send(rank, tag, buffer);
        }
    }

    /// Receive the external mesh's counts and classify its ghost shell,
    /// validating the interior against the local mesh.
    pub fn synchronize_mesh_metadata(&mut self, mesh: &QuadMesh) -> Result<(), Error> {
        self.external_nodes_one_dir = self.receive_max(self.external_nodes_one_dir);
        self.external_n_elements = self.receive_max(self.external_n_elements);
        self.external_n_nodes = self.receive_max(self.external_n_nodes);
        if self.external_n_nodes == 0 {
            // Nothing reported (no external side in the group yet).
            return Ok(());
        }
        self.find_ghost_entities(mesh)
    }

    pub fn find_ghost_entities(&mut self, mesh: &QuadMesh) -> Result<(), Error> {
        let layout = ExternalMeshLayout {
            dim: crate::DIM,
            nodes_one_dir: self.external_nodes_one_dir,
            n_nodes: self.external_n_nodes,
            n_elements: self.external_n_elements,
        };
        let (nodes, cells) = classify_interior(layout);
        if nodes.len() != mesh.n_vertices() {
            return Err(Error::Consistency {
                message: format!(
                    "external mesh interior has {} nodes, local mesh has {} vertices",
                    nodes.len(),
                    mesh.n_vertices()
                ),
            });
        }
        if cells.len() != mesh.n_active_cells() {
            return Err(Error::Consistency {
                message: format!(
                    "external mesh interior has {} elements, local mesh has {} cells",
                    cells.len(),
                    mesh.n_active_cells()
                ),
            });
        }
        self.non_ghost_nodes = nodes;
        self.non_ghost_cells = cells;
        Ok(())
    }

    pub fn non_ghost_nodes(&self) -> &[i64] {
        &self.non_ghost_nodes
    }

    pub fn non_ghost_cells(&self) -> &[i64] {
        &self.non_ghost_cells
    }

    /// Fluid loop driven by the external program's clock and liveness.
    pub fn run(
        &mut self,
        fluid: &mut FluidSolver,
        store: &mut InterfaceStore,
    ) -> Result<(), Error> {
        fluid
            .mesh
            .refine_global(self.params.fluid_mesh.global_refinements);
        fluid.setup_dofs();
        fluid.set_up_boundary_values();
        fluid.initialize_system();
        store.rebuild(&fluid.mesh);

        while self.is_comm_active && !fluid.time.finished() {
            if fluid.time.current() == 0.0 {
                self.run_one_step(fluid)?;
            }
            self.get_external_dt(&mut fluid.time);
            self.run_one_step(fluid)?;
        }
        Ok(())
    }

    fn run_one_step(&mut self, fluid: &mut FluidSolver) -> Result<(), Error> {
        if fluid.time.get_timestep() == 0 {
            self.external_nodes_one_dir = 0;
            self.external_n_elements = 0;
            self.external_n_nodes = 0;
            self.synchronize_mesh_metadata(&fluid.mesh)?;
            fluid.output_results()?;
        } else {
            self.external_nodes_one_dir = 0;
            self.external_n_elements = 0;
            self.external_n_nodes = 0;
            self.external_nodes_one_dir = self.receive_max(self.external_nodes_one_dir);
            self.external_n_elements = self.receive_max(self.external_n_elements);
            self.external_n_nodes = self.receive_max(self.external_n_nodes);

            self.is_comm_active = self.all_active(self.is_comm_active);
            log::info!(
                "Received solution from the external solver at time step = {}, at t = {:.6e}",
                fluid.time.get_timestep(),
                fluid.time.current()
            );
            if fluid.time.get_timestep() % self.params.time.output_interval == 0 {
                fluid.output_results()?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::reduce;

    #[test]
    fn liveness_is_unanimous() {
        // Every rank active: the collective result stays active.
        assert!(reduce::all((0..16).map(|_| true)));
        // One inactive rank anywhere flips the group.
        for dead in 0..16 {
            let parts: Vec<bool> = (0..16).map(|r| r != dead).collect();
            assert!(!reduce::all(parts));
        }
    }

    #[test]
    fn ghost_classification_2d_matches_local_mesh() {
        // Local 4x4-cell mesh; the external mesh carries a one-cell ghost
        // shell around it.
        let mesh = QuadMesh::subdivided_rectangle([0.0, 0.0], [1.0, 1.0], [4, 4]);
        let layout = ExternalMeshLayout {
            dim: 2,
            nodes_one_dir: 7,
            n_nodes: 49,
            n_elements: 36,
        };
        let (nodes, cells) = classify_interior(layout);
        assert_eq!(nodes.len(), mesh.n_vertices());
        assert_eq!(cells.len(), mesh.n_active_cells());
    }

    #[test]
    fn ghost_classification_3d_excludes_the_shell() {
        let layout = ExternalMeshLayout {
            dim: 3,
            nodes_one_dir: 7,
            n_nodes: 343,
            n_elements: 216,
        };
        let (nodes, cells) = classify_interior(layout);
        assert_eq!(nodes.len(), 125);
        assert_eq!(cells.len(), 64);
    }

    #[test]
    fn mismatched_interior_is_a_fatal_consistency_error() {
        let mesh = QuadMesh::subdivided_rectangle([0.0, 0.0], [1.0, 1.0], [3, 3]);
        let params = crate::test_utils::default_parameters();
        let comm: Rc<dyn Communicator> = Rc::new(crate::comm::LocalComm::new());
        let mut coupling = ExternalCoupling::new(&params, comm).unwrap();
        coupling.external_nodes_one_dir = 7;
        coupling.external_n_nodes = 49;
        coupling.external_n_elements = 36;
        assert!(matches!(
            coupling.find_ghost_entities(&mesh),
            Err(Error::Consistency { .. })
        ));
    }

    #[test]
    fn matched_transfers_overlap() {
        let params = crate::test_utils::default_parameters();
        let comm: Rc<dyn Communicator> = Rc::new(crate::comm::LocalComm::new());
        let coupling = ExternalCoupling::new(&params, Rc::clone(&comm)).unwrap();
        // Two in-flight buffers on the loopback transport.
        coupling.send_data(&[vec![1.0, 2.0], vec![3.0]], &[0, 0], 5);
        let received = coupling.rec_data(&[0, 0], &[2, 1], 5);
        assert_eq!(received, vec![vec![1.0, 2.0], vec![3.0]]);
    }
}
