//! FSI orchestration: the per-step protocol between the two solvers.
//!
//! Every step runs the same sequence: re-derive the indicator from the
//! solid's current extent, solve the solid against the traction snapshot
//! taken at the end of the previous step, project solid stress/acceleration
//! into the fluid-side store, solve the fluid, extract fresh traction for
//! the solid side, then fire the periodic events. All cross-solver data
//! moves through the two interface stores as point-in-time snapshots.

use std::rc::Rc;

use crate::comm::Communicator;
use crate::config::{Parameters, RunMode};
use crate::fe::{values_at_point, FeFaceValues, FeValues};
use crate::fluid::FluidSolver;
use crate::interface::{Indicator, InterfaceStore};
use crate::mesh::{QuadMesh, FACES_PER_CELL, FACE_NORMALS};
use crate::solid::SolidSolver;
use crate::sync::ExternalCoupling;
use crate::{Error, DIM};

/// Number of face quadrature points used by the solid's traction records.
const SOLID_FACE_Q: usize = 2;
const SOLID_VOLUME_Q: usize = 4;

pub struct FsiDriver {
    pub solid: SolidSolver,
    pub fluid: FluidSolver,
    solid_store: InterfaceStore,
    fluid_store: InterfaceStore,
    params: Parameters,
    comm: Rc<dyn Communicator>,
}

impl FsiDriver {
    pub fn new(params: &Parameters, comm: Rc<dyn Communicator>) -> Result<Self, Error> {
        params.validate()?;
        let solid_mesh = QuadMesh::subdivided_rectangle(
            params.solid_mesh.lower,
            params.solid_mesh.upper,
            params.solid_mesh.subdivisions,
        );
        let fluid_mesh = QuadMesh::subdivided_rectangle(
            params.fluid_mesh.lower,
            params.fluid_mesh.upper,
            params.fluid_mesh.subdivisions,
        );
        let mut solid = SolidSolver::new(solid_mesh, params, Rc::clone(&comm))?;
        let mut fluid = FluidSolver::new(fluid_mesh, params, Rc::clone(&comm))?;
        if params.run_mode.is_fsi() {
            // The orchestrator drives refinement and checkpoints itself.
            solid.events_enabled = false;
            fluid.events_enabled = false;
        }
        let fluid_face_q = fluid.n_face_quad_points();
        let fluid_volume_q = fluid.n_volume_quad_points();
        Ok(FsiDriver {
            solid,
            fluid,
            solid_store: InterfaceStore::new(SOLID_FACE_Q, SOLID_VOLUME_Q),
            fluid_store: InterfaceStore::new(fluid_face_q, fluid_volume_q),
            params: params.clone(),
            comm,
        })
    }

    pub fn fluid_store(&self) -> &InterfaceStore {
        &self.fluid_store
    }

    pub fn solid_store(&self) -> &InterfaceStore {
        &self.solid_store
    }

    /// Entry point: dispatch on the run mode once, then loop.
    pub fn run(&mut self) -> Result<(), Error> {
        match self.params.run_mode {
            RunMode::StandAloneSolid => self.solid.run(),
            RunMode::StandAloneFluid => self.fluid.run(),
            RunMode::FsiSharedMesh => self.run_shared_mesh(),
            RunMode::FsiExternal => {
                let mut external =
                    ExternalCoupling::new(&self.params, Rc::clone(&self.comm))?;
                external.run(&mut self.fluid, &mut self.fluid_store)
            }
        }
    }

    fn run_shared_mesh(&mut self) -> Result<(), Error> {
        self.solid
            .mesh
            .refine_global(self.params.solid_mesh.global_refinements);
        self.fluid
            .mesh
            .refine_global(self.params.fluid_mesh.global_refinements);

        let loaded = self.solid.load_checkpoint()?;
        if !loaded {
            self.solid.setup_dofs()?;
            self.solid.initialize_system();
        }
        self.fluid.setup_dofs();
        self.fluid.set_up_boundary_values();
        self.fluid.initialize_system();
        self.solid_store.rebuild(&self.solid.mesh);
        self.fluid_store.rebuild(&self.fluid.mesh);

        if loaded {
            self.solid.assemble_system(false, Some(&self.solid_store))?;
            // Replay only the fluid clock; physics is not recomputed.
            while self.fluid.time.get_timestep() < self.solid.time.get_timestep() {
                self.fluid.time.increment();
            }
        } else {
            self.step(true)?;
        }
        while !self.solid.time.finished() {
            self.step(false)?;
        }
        Ok(())
    }

    fn step(&mut self, first: bool) -> Result<(), Error> {
        self.update_indicator();
        self.update_penalty_and_added_mass();
        self.solid.run_one_step(first, Some(&self.solid_store))?;
        self.project_solid_to_fluid();
        self.fluid.run_one_step(&self.fluid_store)?;
        self.extract_traction();

        if self.solid.time.time_to_output() {
            self.solid.output_results()?;
        }
        if self.solid.time.time_to_refine() {
            self.solid.refine_mesh(1, 4)?;
            // Topology changed: regenerate the records before any solver
            // touches them again.
            self.solid_store.rebuild(&self.solid.mesh);
            self.extract_traction();
            self.solid.assemble_system(false, Some(&self.solid_store))?;
        }
        if self.solid.time.time_to_save() {
            self.solid.save_checkpoint()?;
        }
        Ok(())
    }

    /// Bounding boxes of the solid cells in the current (displaced)
    /// configuration.
    fn solid_extent(&self) -> Vec<([f64; 2], [f64; 2])> {
        let handler = self.solid.handler();
        let displacement = self.solid.displacement();
        self.solid
            .mesh
            .active_cells()
            .map(|cell| {
                let mut lo = [f64::MAX; 2];
                let mut hi = [f64::MIN; 2];
                for &v in &self.solid.mesh.cell_vertices(cell) {
                    let x = self.solid.mesh.vertex_position(v);
                    let node = handler.node_of_vertex(v);
                    for c in 0..DIM {
                        let u = node
                            .map(|n| displacement[handler.dof_of_node(n, c)])
                            .unwrap_or(0.0);
                        lo[c] = lo[c].min(x[c] + u);
                        hi[c] = hi[c].max(x[c] + u);
                    }
                }
                (lo, hi)
            })
            .collect()
    }

    /// Locate a physical point in the displaced solid: the containing cell
    /// and its clamped reference coordinates.
    fn locate_in_solid(
        &self,
        extent: &[([f64; 2], [f64; 2])],
        point: [f64; 2],
    ) -> Option<(crate::mesh::CellId, [f64; 2])> {
        for (slot, cell) in self.solid.mesh.active_cells().enumerate() {
            let (lo, hi) = extent[slot];
            if point[0] < lo[0] || point[0] > hi[0] || point[1] < lo[1] || point[1] > hi[1] {
                continue;
            }
            let xi = if hi[0] > lo[0] {
                (2.0 * (point[0] - lo[0]) / (hi[0] - lo[0]) - 1.0).clamp(-1.0, 1.0)
            } else {
                0.0
            };
            let eta = if hi[1] > lo[1] {
                (2.0 * (point[1] - lo[1]) / (hi[1] - lo[1]) - 1.0).clamp(-1.0, 1.0)
            } else {
                0.0
            };
            return Some((cell, [xi, eta]));
        }
        None
    }

    /// Predict step: re-derive the indicator field from the solid's current
    /// geometric extent.
    pub fn update_indicator(&mut self) {
        let extent = self.solid_extent();
        for cell in self.fluid.mesh.active_cells() {
            let center = self.fluid.mesh.cell_center(cell);
            let inside = extent.iter().any(|(lo, hi)| {
                center[0] >= lo[0] && center[0] <= hi[0] && center[1] >= lo[1] && center[1] <= hi[1]
            });
            self.fluid_store.get_mut(cell).indicator = if inside {
                Indicator::Solid
            } else {
                Indicator::Fluid
            };
        }
    }

    /// Project the solid's recovered stress and current acceleration onto
    /// the fluid-side records of solid-indicated cells.
    fn project_solid_to_fluid(&mut self) {
        let extent = self.solid_extent();
        let rule = self.fluid.n_face_quad_points();
        let mut fe = FeValues::new(1, rule);
        let handler = self.solid.handler();
        let scalar_handler = self.solid.scalar_handler();

        for cell in self.fluid.mesh.active_cells() {
            if self.fluid_store.indicator(cell) != Indicator::Solid {
                continue;
            }
            fe.reinit(&self.fluid.mesh, cell);
            let mut stress_values = Vec::with_capacity(fe.n_quad_points());
            let mut acc_values = Vec::with_capacity(fe.n_quad_points());
            for q in 0..fe.n_quad_points() {
                let point = fe.quad_point(q);
                let mut stress = [0.0; 3];
                let mut acceleration = [0.0; DIM];
                if let Some((solid_cell, [xi, eta])) = self.locate_in_solid(&extent, point) {
                    let scalar_nodes = scalar_handler.cell_node_indices(solid_cell);
                    for (a, &node) in scalar_nodes.iter().enumerate() {
                        let phi = crate::fe::shape_value(1, a, xi, eta);
                        stress[0] += phi * self.solid.stress_component(0, 0)[node];
                        stress[1] += phi * self.solid.stress_component(1, 0)[node];
                        stress[2] += phi * self.solid.stress_component(1, 1)[node];
                    }
                    let nodes = handler.cell_node_indices(solid_cell);
                    for (a, &node) in nodes.iter().enumerate() {
                        let phi = crate::fe::shape_value(1, a, xi, eta);
                        for c in 0..DIM {
                            acceleration[c] +=
                                phi * self.solid.acceleration()[handler.dof_of_node(node, c)];
                        }
                    }
                }
                stress_values.push(stress);
                acc_values.push(acceleration);
            }
            let record = self.fluid_store.get_mut(cell);
            record.fsi_stress = stress_values;
            record.fsi_acceleration = acc_values;
        }
    }

    /// Extract interface traction from the fluid stress at the solid's
    /// boundary face quadrature points.
    fn extract_traction(&mut self) {
        let mut fe_face = FeFaceValues::new(1, SOLID_FACE_Q);
        let handler = self.solid.handler();

        for cell in self.solid.mesh.active_cells() {
            for face in 0..FACES_PER_CELL {
                if self.solid.mesh.boundary_id(cell, face).is_none() {
                    continue;
                }
                fe_face.reinit(&self.solid.mesh, cell, face);
                let normal = FACE_NORMALS[face];
                let mut tractions = Vec::with_capacity(fe_face.n_quad_points());
                for q in 0..fe_face.n_quad_points() {
                    let reference = fe_face.quad_point(q);
                    // Current position of the face quadrature point.
                    let values = values_at_point(&self.solid.mesh, cell, 1, reference);
                    let nodes = handler.cell_node_indices(cell);
                    let mut current = reference;
                    for (a, &node) in nodes.iter().enumerate() {
                        for c in 0..DIM {
                            current[c] += values[a]
                                * self.solid.displacement()[handler.dof_of_node(node, c)];
                        }
                    }
                    let traction = match self.fluid.stress_at_point(current) {
                        Some(sigma) => [
                            sigma[0][0] * normal[0] + sigma[0][1] * normal[1],
                            sigma[1][0] * normal[0] + sigma[1][1] * normal[1],
                        ],
                        None => [0.0; DIM],
                    };
                    tractions.push(traction);
                }
                let record = self.solid_store.get_mut(cell);
                record.indicator = Indicator::Solid;
                record.fsi_traction[face] = tractions;
            }
        }
    }

    /// Eulerian-Lagrangian velocity-difference penalty and the added-mass
    /// diagonal for the solid solve.
    fn update_penalty_and_added_mass(&mut self) {
        let theta = self.params.coupling.penalty_scale_factor;
        let rho_s = self.params.solid.rho;
        let rho_f = self.params.fluid.rho;
        let dt = self.solid.time.get_delta_t();
        let handler = self.solid.handler();
        let n = handler.n_dofs();

        let mut vel_diff = na::DVector::zeros(n);
        for node in 0..handler.n_nodes() {
            let x = handler.node_position(node);
            let mut current = x;
            for c in 0..DIM {
                current[c] += self.solid.displacement()[handler.dof_of_node(node, c)];
            }
            let Some(fluid_velocity) = self.fluid.velocity_at_point(current) else {
                continue;
            };
            for c in 0..DIM {
                let dof = handler.dof_of_node(node, c);
                let difference = fluid_velocity[c] - self.solid.velocity()[dof];
                vel_diff[dof] = theta * rho_s / dt * difference;
            }
        }

        // Added mass on the wetted boundary dofs from the displaced fluid
        // volume share around each node.
        let mut boundary = vec![false; handler.n_nodes()];
        for id in 0..4u32 {
            for node in handler.boundary_nodes(&self.solid.mesh, id) {
                boundary[node] = true;
            }
        }
        let mut node_volume = vec![0.0; handler.n_nodes()];
        for cell in self.solid.mesh.active_cells() {
            let extent = self.solid.mesh.cell_extent(cell);
            let share = extent[0] * extent[1] / 4.0;
            for &node in handler.cell_node_indices(cell) {
                node_volume[node] += share;
            }
        }
        let mut added_mass = na::DVector::zeros(n);
        for node in 0..handler.n_nodes() {
            if !boundary[node] {
                continue;
            }
            for c in 0..DIM {
                added_mass[handler.dof_of_node(node, c)] = theta * rho_f * node_volume[node];
            }
        }

        self.solid.set_fsi_velocity_difference(vel_diff);
        self.solid.set_added_mass(added_mass);
    }
}
