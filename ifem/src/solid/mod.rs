//! Newmark-beta solid dynamics on the Lagrangian mesh.

pub mod material;

pub use material::LinearElasticMaterial;

use std::rc::Rc;

use crate::checkpoint;
use crate::comm::Communicator;
use crate::config::{component_mask, Parameters, RunMode, SolidNeumann};
use crate::fe::{
    make_hanging_node_constraints, Constraints, DofHandler, FeFaceValues, FeValues,
    IndexPartition,
};
use crate::interface::InterfaceStore;
use crate::linsolve::{csr_from_triplets, spmv, ConjugateGradient, Status};
use crate::logging::{DiagnosticLog, OutputRecord};
use crate::mesh::{QuadMesh, FACES_PER_CELL};
use crate::time::Time;
use crate::{Error, DIM};

use sprs::CsMat;

const N_GAUSS: usize = 2;
const NODES: usize = 4;
const LOCAL_DOFS: usize = NODES * DIM;

/// Contraction of the symmetric gradients of two vector-valued shape
/// functions `(node gradient, component)`.
pub(crate) fn symgrad_dot(ga: [f64; 2], ca: usize, gb: [f64; 2], cb: usize) -> f64 {
    let dot = ga[0] * gb[0] + ga[1] * gb[1];
    0.5 * (if ca == cb { dot } else { 0.0 }) + 0.5 * ga[cb] * gb[ca]
}

/// Shared solid dynamics integrator.
///
/// Owns every solid field vector exclusively; the fluid side only ever sees
/// snapshots projected through the interface store by the orchestrator.
pub struct SolidSolver {
    pub mesh: QuadMesh,
    params: Parameters,
    comm: Rc<dyn Communicator>,
    pub time: Time,

    handler: DofHandler,
    scalar_handler: DofHandler,
    constraints: Constraints,
    partition: IndexPartition,
    materials: Vec<LinearElasticMaterial>,

    mass_matrix: CsMat<f64>,
    stiffness_matrix: CsMat<f64>,
    damping_matrix: CsMat<f64>,
    nodal_mass: na::DVector<f64>,

    system_rhs: na::DVector<f64>,
    nodal_forces_traction: na::DVector<f64>,
    nodal_forces_penalty: na::DVector<f64>,

    current_displacement: na::DVector<f64>,
    current_velocity: na::DVector<f64>,
    current_acceleration: na::DVector<f64>,
    previous_displacement: na::DVector<f64>,
    previous_velocity: na::DVector<f64>,
    previous_acceleration: na::DVector<f64>,

    /// Strain/stress components over the scalar dof space, `[i][j]`.
    strain: Vec<Vec<na::DVector<f64>>>,
    stress: Vec<Vec<na::DVector<f64>>>,

    /// Per-dof added-mass augmentation of the diagonal, set by the
    /// orchestrator in FSI runs.
    added_mass: na::DVector<f64>,
    /// Eulerian-Lagrangian velocity-difference penalty force density at the
    /// dofs, set by the orchestrator in FSI runs.
    fsi_vel_diff: na::DVector<f64>,

    ke_log: DiagnosticLog,
    pe_log: DiagnosticLog,
    output_record: OutputRecord,
    /// Output/refinement/checkpoint triggers fire inside the step loop only
    /// for stand-alone runs; the orchestrator drives them otherwise.
    pub events_enabled: bool,
}

impl SolidSolver {
    pub fn new(
        mesh: QuadMesh,
        params: &Parameters,
        comm: Rc<dyn Communicator>,
    ) -> Result<Self, Error> {
        let materials = params
            .solid
            .parts
            .iter()
            .map(|p| LinearElasticMaterial::new(p.youngs_modulus, p.poisson_ratio, params.solid.rho))
            .collect();
        let time = Time::new(
            params.time.end,
            params.time.delta_t,
            params.time.output_interval,
            params.time.refinement_interval,
            params.time.save_interval,
        );
        let is_coordinator = comm.rank() == 0;
        let ke_log = DiagnosticLog::create(
            &params.output_dir,
            "solid_ke.txt",
            &["Time", "Solid KE Rate", "Solid KE"],
            is_coordinator,
        )?;
        let pe_log = DiagnosticLog::create(
            &params.output_dir,
            "solid_pe_rate.txt",
            &["Time", "Solid PE Rate"],
            is_coordinator,
        )?;
        let output_record = OutputRecord::new(&params.output_dir, "solid_", is_coordinator);
        let events_enabled = params.run_mode == RunMode::StandAloneSolid;

        Ok(SolidSolver {
            mesh,
            params: params.clone(),
            comm,
            time,
            handler: DofHandler::distribute(&QuadMesh::subdivided_rectangle(
                [0.0, 0.0],
                [1.0, 1.0],
                [1, 1],
            ), 1, DIM),
            scalar_handler: DofHandler::distribute(
                &QuadMesh::subdivided_rectangle([0.0, 0.0], [1.0, 1.0], [1, 1]),
                1,
                1,
            ),
            constraints: Constraints::new(),
            partition: IndexPartition {
                owned: Vec::new(),
                relevant: Vec::new(),
            },
            materials,
            mass_matrix: CsMat::zero((0, 0)),
            stiffness_matrix: CsMat::zero((0, 0)),
            damping_matrix: CsMat::zero((0, 0)),
            nodal_mass: na::DVector::zeros(0),
            system_rhs: na::DVector::zeros(0),
            nodal_forces_traction: na::DVector::zeros(0),
            nodal_forces_penalty: na::DVector::zeros(0),
            current_displacement: na::DVector::zeros(0),
            current_velocity: na::DVector::zeros(0),
            current_acceleration: na::DVector::zeros(0),
            previous_displacement: na::DVector::zeros(0),
            previous_velocity: na::DVector::zeros(0),
            previous_acceleration: na::DVector::zeros(0),
            strain: Vec::new(),
            stress: Vec::new(),
            added_mass: na::DVector::zeros(0),
            fsi_vel_diff: na::DVector::zeros(0),
            ke_log,
            pe_log,
            output_record,
            events_enabled,
        })
    }

    pub fn n_dofs(&self) -> usize {
        self.handler.n_dofs()
    }

    pub fn handler(&self) -> &DofHandler {
        &self.handler
    }

    /// Owned/relevant descriptors of the displacement dof space.
    pub fn partition(&self) -> &IndexPartition {
        &self.partition
    }

    /// Separately tracked interface force channels `(traction, penalty)`.
    pub fn interface_force_channels(&self) -> (&na::DVector<f64>, &na::DVector<f64>) {
        (&self.nodal_forces_traction, &self.nodal_forces_penalty)
    }

    pub fn scalar_handler(&self) -> &DofHandler {
        &self.scalar_handler
    }

    pub fn displacement(&self) -> &na::DVector<f64> {
        &self.current_displacement
    }

    pub fn velocity(&self) -> &na::DVector<f64> {
        &self.current_velocity
    }

    pub fn acceleration(&self) -> &na::DVector<f64> {
        &self.current_acceleration
    }

    pub fn previous_displacement(&self) -> &na::DVector<f64> {
        &self.previous_displacement
    }

    pub fn previous_velocity(&self) -> &na::DVector<f64> {
        &self.previous_velocity
    }

    pub fn previous_acceleration(&self) -> &na::DVector<f64> {
        &self.previous_acceleration
    }

    pub fn stress_component(&self, i: usize, j: usize) -> &na::DVector<f64> {
        &self.stress[i][j]
    }

    pub fn set_added_mass(&mut self, added_mass: na::DVector<f64>) {
        self.added_mass = added_mass;
    }

    pub fn set_fsi_velocity_difference(&mut self, vel_diff: na::DVector<f64>) {
        self.fsi_vel_diff = vel_diff;
    }

    /// Distribute dofs over the (re)partitioned mesh and rebuild the
    /// constraint set: hanging nodes, homogeneous Dirichlet sides and user
    /// point constraints.
    pub fn setup_dofs(&mut self) -> Result<(), Error> {
        self.mesh.partition(self.comm.size());
        self.handler = DofHandler::distribute(&self.mesh, 1, DIM);
        self.scalar_handler = DofHandler::distribute(&self.mesh, 1, 1);
        self.partition = IndexPartition::build(&self.handler, &self.mesh, self.comm.rank());

        self.constraints.clear();
        make_hanging_node_constraints(&self.mesh, &self.handler, &mut self.constraints);

        for &(boundary_id, flag) in &self.params.solid.dirichlet_bcs {
            let mask = component_mask(flag);
            for node in self.handler.boundary_nodes(&self.mesh, boundary_id) {
                for (c, &constrained) in mask.iter().enumerate() {
                    if constrained {
                        self.constraints.add_line(self.handler.dof_of_node(node, c));
                    }
                }
            }
        }

        // User-specified point constraints pin single displacement components
        // at matched vertices.
        let points = self.params.solid.constrained_points.clone();
        let directions = self.params.solid.constrained_directions.clone();
        for (point, &direction) in points.iter().zip(&directions) {
            let mut found = false;
            for node in 0..self.handler.n_nodes() {
                let p = self.handler.node_position(node);
                if (p[0] - point[0]).abs() < 1e-4 && (p[1] - point[1]).abs() < 1e-4 {
                    self.constraints
                        .add_line(self.handler.dof_of_node(node, direction));
                    found = true;
                    break;
                }
            }
            if !found {
                return Err(Error::PointNotFound {
                    x: point[0],
                    y: point[1],
                });
            }
        }
        self.constraints.close();

        log::info!(
            "Number of active solid cells: {}, degrees of freedom: {}",
            self.mesh.n_active_cells(),
            self.handler.n_dofs()
        );
        Ok(())
    }

    /// Allocate state for the current dof layout and apply the initial
    /// velocity at time zero.
    pub fn initialize_system(&mut self) {
        let n = self.handler.n_dofs();
        let ns = self.scalar_handler.n_dofs();
        self.system_rhs = na::DVector::zeros(n);
        self.nodal_forces_traction = na::DVector::zeros(n);
        self.nodal_forces_penalty = na::DVector::zeros(n);
        self.nodal_mass = na::DVector::zeros(n);
        self.current_displacement = na::DVector::zeros(n);
        self.current_velocity = na::DVector::zeros(n);
        self.current_acceleration = na::DVector::zeros(n);
        self.previous_displacement = na::DVector::zeros(n);
        self.previous_velocity = na::DVector::zeros(n);
        self.previous_acceleration = na::DVector::zeros(n);
        self.added_mass = na::DVector::zeros(n);
        self.fsi_vel_diff = na::DVector::zeros(n);
        self.strain = vec![vec![na::DVector::zeros(ns); DIM]; DIM];
        self.stress = vec![vec![na::DVector::zeros(ns); DIM]; DIM];

        if self.time.current() == 0.0 {
            for node in 0..self.handler.n_nodes() {
                for c in 0..DIM {
                    self.previous_velocity[self.handler.dof_of_node(node, c)] =
                        self.params.solid.initial_velocity[c];
                }
            }
            self.constraints
                .distribute(self.previous_velocity.as_mut_slice());
            self.current_velocity = self.previous_velocity.clone();
        }
    }

    fn material_for(&self, cell: crate::mesh::CellId) -> &LinearElasticMaterial {
        if self.materials.len() == 1 {
            &self.materials[0]
        } else {
            let id = self.mesh.cell_material(cell) as usize;
            &self.materials[id.saturating_sub(1).min(self.materials.len() - 1)]
        }
    }

    /// Assemble mass/stiffness/damping and the right-hand side.
    ///
    /// The elastic stiffness keeps the two-pass integration of the original
    /// formulation: the deviatoric part with the full rule, the volumetric
    /// part with a separate one-point rule merged into the same local
    /// matrix. The two passes are not numerically equivalent to a single
    /// consistent rule and must not be collapsed into one.
    fn assemble(
        &mut self,
        is_initial: bool,
        assemble_matrix: bool,
        store: Option<&InterfaceStore>,
    ) -> Result<(), Error> {
        let n = self.handler.n_dofs();
        let is_fsi = self.params.run_mode.is_fsi();
        let implicit_penalty = self.params.coupling.implicit_penalty;
        let dt = self.time.get_delta_t();
        let gravity = self.params.gravity;

        self.system_rhs.fill(0.0);
        self.nodal_forces_traction.fill(0.0);
        self.nodal_forces_penalty.fill(0.0);

        let mut mass_triplets = Vec::new();
        let mut stiffness_triplets = Vec::new();
        let mut damping_triplets = Vec::new();
        let mut rhs = vec![0.0; n];

        let mut fe = FeValues::new(1, N_GAUSS);
        // One-point rule for the volumetric stiffness.
        let mut fe_c = FeValues::new(1, 1);
        let mut fe_face = FeFaceValues::new(1, N_GAUSS);

        let n_q = fe.n_quad_points();

        let dirichlet_ids: Vec<u32> = self
            .params
            .solid
            .dirichlet_bcs
            .iter()
            .map(|&(id, _)| id)
            .collect();

        for cell in self.mesh.active_cells() {
            let material = *self.material_for(cell);
            let rho = material.get_density();
            let lambda = material.get_lambda();
            let mu = material.get_mu();
            let dofs = self.handler.cell_dof_indices(cell);
            fe.reinit(&self.mesh, cell);
            fe_c.reinit(&self.mesh, cell);

            if let Some(store) = store {
                store.check_cell_data(cell)?;
            }

            let mut local_matrix = na::DMatrix::<f64>::zeros(LOCAL_DOFS, LOCAL_DOFS);
            let mut local_stiffness = na::DMatrix::<f64>::zeros(LOCAL_DOFS, LOCAL_DOFS);
            let mut local_damping = na::DMatrix::<f64>::zeros(LOCAL_DOFS, LOCAL_DOFS);
            let mut local_rhs = [0.0; LOCAL_DOFS];
            let mut local_traction = [0.0; LOCAL_DOFS];
            let mut local_penalty = [0.0; LOCAL_DOFS];

            // Penalty force density interpolated at the quadrature points.
            let mut vel_diff = [[0.0; DIM]; N_GAUSS * N_GAUSS];
            if is_fsi {
                for (q, vd) in vel_diff.iter_mut().enumerate() {
                    for (a, &dof0) in dofs.iter().step_by(DIM).enumerate() {
                        let phi = fe.value(a, q);
                        for c in 0..DIM {
                            vd[c] += phi * self.fsi_vel_diff[dof0 + c];
                        }
                    }
                }
            }

            for q in 0..n_q {
                let jxw = fe.jxw(q);
                for i in 0..LOCAL_DOFS {
                    let (a, ca) = (i / DIM, i % DIM);
                    let phi_a = fe.value(a, q);
                    let grad_a = fe.grad(a, q);

                    if assemble_matrix {
                        for j in 0..LOCAL_DOFS {
                            let (b, cb) = (j / DIM, j % DIM);
                            let phi_b = fe.value(b, q);
                            if ca == cb {
                                local_matrix[(i, j)] += rho * phi_a * phi_b * jxw;
                            }
                            if !is_initial {
                                let grad_b = fe.grad(b, q);
                                local_stiffness[(i, j)] +=
                                    2.0 * mu * symgrad_dot(grad_a, ca, grad_b, cb) * jxw;
                            }
                        }
                    }

                    local_rhs[i] += phi_a * gravity[ca] * rho * jxw;

                    if is_fsi {
                        local_rhs[i] += phi_a * vel_diff[q][ca] * jxw;
                        local_penalty[i] += phi_a * vel_diff[q][ca] * jxw;
                        if implicit_penalty {
                            for j in 0..LOCAL_DOFS {
                                let (b, cb) = (j / DIM, j % DIM);
                                if ca == cb {
                                    local_damping[(i, j)] +=
                                        rho * phi_a * fe.value(b, q) * jxw / dt;
                                }
                            }
                        }
                    }
                }
            }

            // Volumetric stiffness with reduced (one point) integration.
            if assemble_matrix && !is_initial {
                let jxw_c = fe_c.jxw(0);
                for i in 0..LOCAL_DOFS {
                    let (a, ca) = (i / DIM, i % DIM);
                    let div_a = fe_c.grad(a, 0)[ca];
                    for j in 0..LOCAL_DOFS {
                        let (b, cb) = (j / DIM, j % DIM);
                        let div_b = fe_c.grad(b, 0)[cb];
                        local_stiffness[(i, j)] += lambda * div_a * div_b * jxw_c;
                    }
                }
            }

            // Neumann boundaries: prescribed traction/pressure stand-alone,
            // interface-store traction in FSI runs.
            for face in 0..FACES_PER_CELL {
                let Some(boundary_id) = self.mesh.boundary_id(cell, face) else {
                    continue;
                };
                if dirichlet_ids.contains(&boundary_id) {
                    continue;
                }
                let prescribed = self
                    .params
                    .solid
                    .neumann_bcs
                    .iter()
                    .find(|&&(id, _)| id == boundary_id)
                    .map(|&(_, ref bc)| bc.clone());
                if !is_fsi && prescribed.is_none() {
                    // Traction-free boundary, do nothing.
                    continue;
                }
                fe_face.reinit(&self.mesh, cell, face);
                for q in 0..fe_face.n_quad_points() {
                    let traction: [f64; DIM] = if is_fsi {
                        match store {
                            Some(store) => store
                                .try_get(cell)
                                .map(|r| r.fsi_traction[face][q])
                                .unwrap_or([0.0; DIM]),
                            None => [0.0; DIM],
                        }
                    } else {
                        match prescribed.as_ref() {
                            Some(SolidNeumann::Traction(t)) => *t,
                            Some(SolidNeumann::Pressure(p)) => {
                                let normal = fe_face.normal();
                                [p * normal[0], p * normal[1]]
                            }
                            None => [0.0; DIM],
                        }
                    };
                    let jxw = fe_face.jxw(q);
                    for j in 0..LOCAL_DOFS {
                        let (b, cb) = (j / DIM, j % DIM);
                        let value = fe_face.value(b, q) * traction[cb] * jxw;
                        local_rhs[j] += value;
                        local_traction[j] += value;
                    }
                }
            }

            // Row-sum lumping of the consistent mass.
            if assemble_matrix {
                for i in 0..LOCAL_DOFS {
                    let sum: f64 = (0..LOCAL_DOFS).map(|j| local_matrix[(i, j)]).sum();
                    for j in 0..LOCAL_DOFS {
                        local_matrix[(i, j)] = if i == j { sum } else { 0.0 };
                    }
                }
            }

            if assemble_matrix {
                self.constraints.distribute_local_to_global(
                    &local_matrix,
                    &local_rhs,
                    &dofs,
                    &mut mass_triplets,
                    &mut rhs,
                );
                self.constraints
                    .distribute_matrix(&local_stiffness, &dofs, &mut stiffness_triplets);
            } else {
                self.constraints
                    .distribute_vector(&local_rhs, &dofs, &mut rhs);
            }
            self.constraints.distribute_vector(
                &local_traction,
                &dofs,
                self.nodal_forces_traction.as_mut_slice(),
            );
            self.constraints.distribute_vector(
                &local_penalty,
                &dofs,
                self.nodal_forces_penalty.as_mut_slice(),
            );
            if implicit_penalty {
                self.constraints
                    .distribute_matrix(&local_damping, &dofs, &mut damping_triplets);
            }
        }

        self.system_rhs = na::DVector::from_vec(rhs);
        if assemble_matrix {
            self.mass_matrix = csr_from_triplets(n, n, &mass_triplets);
            self.stiffness_matrix = csr_from_triplets(n, n, &stiffness_triplets);
            self.nodal_mass =
                na::DVector::from_vec(crate::linsolve::diagonal(&self.mass_matrix));
        }
        if implicit_penalty {
            self.damping_matrix = csr_from_triplets(n, n, &damping_triplets);
        }
        Ok(())
    }

    pub fn assemble_system(
        &mut self,
        is_initial: bool,
        store: Option<&InterfaceStore>,
    ) -> Result<(), Error> {
        self.assemble(is_initial, true, store)
    }

    pub fn assemble_rhs(&mut self, store: Option<&InterfaceStore>) -> Result<(), Error> {
        // In case of assembling the rhs only, the first flag does not matter.
        self.assemble(false, false, store)
    }

    /// Solve the added-mass-augmented Newmark system for an acceleration.
    ///
    /// The operator is `M + stiffness_coef K (+ damping_coef D + diag(a))`,
    /// applied matrix-free. The iteration budget is twice the dof count;
    /// exhausting it is fatal.
    fn solve_acceleration(
        &mut self,
        rhs: &na::DVector<f64>,
        stiffness_coef: f64,
        damping_coef: f64,
        use_added_mass: bool,
        into_current: bool,
    ) -> Result<(u32, f64), Error> {
        let n = self.handler.n_dofs();
        let mut x = vec![0.0; n];
        let mut b = rhs.as_slice().to_vec();
        let mass = &self.mass_matrix;
        let stiffness = &self.stiffness_matrix;
        let damping = &self.damping_matrix;
        let added_mass = &self.added_mass;
        let mut tmp = vec![0.0; n];

        let mut cg = ConjugateGradient::new(n, 2 * n as u32, 1e-8);
        let result = cg.solve(
            |v, out| {
                spmv(mass, v, out);
                if stiffness_coef != 0.0 {
                    spmv(stiffness, v, &mut tmp);
                    for (o, &t) in out.iter_mut().zip(&tmp) {
                        *o += stiffness_coef * t;
                    }
                }
                if damping_coef != 0.0 {
                    spmv(damping, v, &mut tmp);
                    for (o, &t) in out.iter_mut().zip(&tmp) {
                        *o += damping_coef * t;
                    }
                }
                if use_added_mass {
                    for ((o, &vi), &a) in out.iter_mut().zip(v).zip(added_mass.iter()) {
                        *o += a * vi;
                    }
                }
            },
            &mut x,
            &mut b,
        );
        if result.status != Status::Success {
            return Err(Error::SolverDiverged {
                iterations: result.iterations,
                residual: result.residual,
            });
        }
        let mut solution = na::DVector::from_vec(x);
        self.constraints.distribute(solution.as_mut_slice());
        if into_current {
            self.current_acceleration = solution;
        } else {
            self.previous_acceleration = solution;
        }
        Ok((result.iterations, result.residual))
    }

    /// Advance the solid by one step; `first_step` performs the initial
    /// acceleration solve and the matrix assembly before stepping.
    pub fn run_one_step(
        &mut self,
        first_step: bool,
        store: Option<&InterfaceStore>,
    ) -> Result<(), Error> {
        let alpha = -self.params.solid.damping;
        let gamma = 0.5 - alpha;
        let beta = (1.0 - alpha) * (1.0 - alpha) / 4.0;
        let is_fsi = self.params.run_mode.is_fsi();
        let implicit_penalty = is_fsi && self.params.coupling.implicit_penalty;

        if first_step {
            // Initial acceleration from M a0 = F0 with the lumped mass.
            self.assemble_system(true, store)?;
            self.calculate_ke()?;
            if implicit_penalty {
                let mut correction = vec![0.0; self.handler.n_dofs()];
                spmv(&self.damping_matrix, self.current_velocity.as_slice(), &mut correction);
                for (r, c) in self.system_rhs.iter_mut().zip(&correction) {
                    *r -= c;
                }
            }
            let rhs = self.system_rhs.clone();
            self.solve_acceleration(&rhs, 0.0, 0.0, is_fsi, false)?;
            self.assemble_system(false, store)?;
            self.current_acceleration = self.previous_acceleration.clone();
            self.output_results()?;
        }

        let dt = self.time.get_delta_t();
        self.time.increment();
        log::info!(
            "Solid step = {}, at t = {:.6e}",
            self.time.get_timestep(),
            self.time.current()
        );

        // The coupling forces change every step in FSI runs.
        if is_fsi {
            self.assemble_rhs(store)?;
        }

        // Newmark predictor folded into the right-hand side.
        let mut predictor = self.previous_displacement.clone();
        predictor.axpy(dt * (1.0 + alpha), &self.previous_velocity, 1.0);
        predictor.axpy(
            (0.5 - beta) * dt * dt * (1.0 + alpha),
            &self.previous_acceleration,
            1.0,
        );
        let mut rhs = self.system_rhs.clone();
        let mut stiffness_term = vec![0.0; self.handler.n_dofs()];
        spmv(&self.stiffness_matrix, predictor.as_slice(), &mut stiffness_term);
        for (r, s) in rhs.iter_mut().zip(&stiffness_term) {
            *r -= s;
        }

        let mut damping_coef = 0.0;
        if implicit_penalty {
            damping_coef = gamma * dt;
            let mut term = vec![0.0; self.handler.n_dofs()];
            spmv(&self.damping_matrix, self.previous_acceleration.as_slice(), &mut term);
            for (r, t) in rhs.iter_mut().zip(&term) {
                *r -= t;
            }
            spmv(&self.damping_matrix, self.previous_velocity.as_slice(), &mut term);
            for (r, t) in rhs.iter_mut().zip(&term) {
                *r -= t;
            }
        }

        let stiffness_coef = dt * dt * beta * (1.0 + alpha);
        let (iterations, residual) =
            self.solve_acceleration(&rhs, stiffness_coef, damping_coef, is_fsi, true)?;
        log::info!("CG iteration: {} CG residual: {:.6e}", iterations, residual);

        // Newmark corrector.
        self.current_velocity = self.previous_velocity.clone();
        self.current_velocity
            .axpy(dt * (1.0 - gamma), &self.previous_acceleration, 1.0);
        self.current_velocity
            .axpy(dt * gamma, &self.current_acceleration, 1.0);

        self.current_displacement = self.previous_displacement.clone();
        self.current_displacement
            .axpy(dt, &self.previous_velocity, 1.0);
        self.current_displacement
            .axpy(dt * dt * (0.5 - beta), &self.previous_acceleration, 1.0);
        self.current_displacement
            .axpy(dt * dt * beta, &self.current_acceleration, 1.0);

        self.previous_acceleration = self.current_acceleration.clone();
        self.previous_velocity = self.current_velocity.clone();
        self.previous_displacement = self.current_displacement.clone();

        self.update_strain_and_stress();
        self.calculate_ke()?;
        self.compute_pe_rate()?;

        if self.events_enabled {
            if self.time.time_to_output() {
                self.output_results()?;
            }
            if self.time.time_to_refine() {
                self.refine_mesh(1, 4)?;
                self.assemble_system(false, store)?;
            }
            if self.time.time_to_save() {
                self.save_checkpoint()?;
            }
        }
        Ok(())
    }

    /// Stand-alone solid time loop.
    pub fn run(&mut self) -> Result<(), Error> {
        self.mesh.refine_global(self.params.solid_mesh.global_refinements);
        let loaded = self.load_checkpoint()?;
        if !loaded {
            self.setup_dofs()?;
            self.initialize_system();
            self.run_one_step(true, None)?;
        } else {
            self.assemble_system(false, None)?;
        }
        while !self.time.finished() {
            self.run_one_step(false, None)?;
        }
        Ok(())
    }

    /// Cell-averaged strain/stress recovery at the scalar dofs.
    pub fn update_strain_and_stress(&mut self) {
        let ns = self.scalar_handler.n_dofs();
        for i in 0..DIM {
            for j in 0..DIM {
                self.strain[i][j].fill(0.0);
                self.stress[i][j].fill(0.0);
            }
        }
        let mut surrounding_cells = vec![0u32; ns];

        let mut fe = FeValues::new(1, N_GAUSS);
        let n_q = fe.n_quad_points();
        // Extrapolation weights from the 2x2 Gauss points to the corners.
        let w_near = 0.5 * (1.0 + 3.0f64.sqrt());
        let w_far = 0.5 * (1.0 - 3.0f64.sqrt());
        let w1d = [[w_near, w_far], [w_far, w_near]];

        for cell in self.mesh.active_cells() {
            let material = *self.material_for(cell);
            let dofs = self.handler.cell_dof_indices(cell);
            let scalar_nodes = self.scalar_handler.cell_node_indices(cell).to_vec();
            fe.reinit(&self.mesh, cell);

            let mut quad_strain = [[[0.0; 2]; 2]; N_GAUSS * N_GAUSS];
            let mut quad_stress = [[[0.0; 2]; 2]; N_GAUSS * N_GAUSS];
            for q in 0..n_q {
                // Displacement gradient at the quadrature point.
                let mut grad_u = [[0.0; 2]; 2];
                for (a, &dof0) in dofs.iter().step_by(DIM).enumerate() {
                    let g = fe.grad(a, q);
                    for c in 0..DIM {
                        let u = self.current_displacement[dof0 + c];
                        grad_u[c][0] += u * g[0];
                        grad_u[c][1] += u * g[1];
                    }
                }
                let mut strain = [[0.0; 2]; 2];
                for i in 0..DIM {
                    for j in 0..DIM {
                        strain[i][j] = 0.5 * (grad_u[i][j] + grad_u[j][i]);
                    }
                }
                quad_strain[q] = strain;
                quad_stress[q] = material.stress(strain);
            }

            for (k, &node) in scalar_nodes.iter().enumerate() {
                let (kx, ky) = (k % 2, k / 2);
                surrounding_cells[node] += 1;
                for i in 0..DIM {
                    for j in 0..DIM {
                        let mut strain_value = 0.0;
                        let mut stress_value = 0.0;
                        for q in 0..n_q {
                            let (qx, qy) = (q % N_GAUSS, q / N_GAUSS);
                            let w = w1d[kx][qx] * w1d[ky][qy];
                            strain_value += w * quad_strain[q][i][j];
                            stress_value += w * quad_stress[q][i][j];
                        }
                        self.strain[i][j][node] += strain_value;
                        self.stress[i][j][node] += stress_value;
                    }
                }
            }
        }

        for i in 0..DIM {
            for j in 0..DIM {
                for k in 0..ns {
                    if surrounding_cells[k] > 0 {
                        self.strain[i][j][k] /= surrounding_cells[k] as f64;
                        self.stress[i][j][k] /= surrounding_cells[k] as f64;
                    }
                }
            }
        }
    }

    /// Kinetic energy and its rate, reduced across the process group and
    /// appended to the energy log. Returns `(ke, ke_rate)`.
    pub fn calculate_ke(&mut self) -> Result<(f64, f64), Error> {
        let dt = self.time.get_delta_t();
        let mut ke = 0.0;
        let mut ke_rate = 0.0;
        for node in 0..self.handler.n_nodes() {
            if self.handler.node_owner(node) != self.comm.rank() {
                continue;
            }
            for c in 0..DIM {
                let dof = self.handler.dof_of_node(node, c);
                let v = self.current_velocity[dof];
                let v_prev = self.previous_velocity[dof];
                let m = self.nodal_mass[dof];
                // Initial effect at t = dt.
                if self.time.current() == dt {
                    ke_rate += v * m * v_prev / dt;
                }
                ke_rate += v * m * (v - v_prev) / dt;
                ke += 0.5 * v * v * m;
            }
        }
        let ke = self.comm.sum(ke);
        let ke_rate = self.comm.sum(ke_rate);
        self.ke_log.append(self.time.current(), &[ke_rate, ke])?;
        Ok((ke, ke_rate))
    }

    /// Potential-energy rate from velocity against the stress divergence,
    /// reduced and logged. Returns the global rate.
    pub fn compute_pe_rate(&mut self) -> Result<f64, Error> {
        let mut pe_rate = 0.0;
        let mut fe = FeValues::new(1, N_GAUSS);
        let rank = self.comm.rank();

        for cell in self.mesh.active_cells() {
            if self.mesh.cell_subdomain(cell) != rank {
                continue;
            }
            fe.reinit(&self.mesh, cell);
            let dofs = self.handler.cell_dof_indices(cell);
            let scalar_nodes = self.scalar_handler.cell_node_indices(cell).to_vec();

            for q in 0..fe.n_quad_points() {
                // Velocity and the stress divergence at the quadrature point.
                let mut vel = [0.0; DIM];
                for (a, &dof0) in dofs.iter().step_by(DIM).enumerate() {
                    let phi = fe.value(a, q);
                    for c in 0..DIM {
                        vel[c] += phi * self.current_velocity[dof0 + c];
                    }
                }
                let mut stress_div = [0.0; DIM];
                for i in 0..DIM {
                    for j in 0..DIM {
                        let nodal: Vec<f64> = scalar_nodes
                            .iter()
                            .map(|&node| self.stress[i][j][node])
                            .collect();
                        stress_div[i] += fe.function_grad(&nodal, q)[j];
                    }
                }
                pe_rate +=
                    (vel[0] * stress_div[0] + vel[1] * stress_div[1]) * fe.jxw(q);
            }
        }
        let pe_rate = self.comm.sum(pe_rate);
        self.pe_log.append(self.time.current(), &[pe_rate])?;
        Ok(pe_rate)
    }

    pub fn output_results(&mut self) -> Result<(), Error> {
        log::info!("Writing solid results...");
        let time = self.time.current();
        let index = self.time.get_timestep();
        self.output_record.write_current_timestep(time, index)?;
        Ok(())
    }

    /// Adaptive remeshing: gradient-recovery error estimate on the
    /// displacement, fixed-fraction marking within level bounds, transfer of
    /// the three history vectors, then dof/system re-setup and constraint
    /// redistribution.
    pub fn refine_mesh(&mut self, min_level: u32, max_level: u32) -> Result<(), Error> {
        log::info!("Refining solid mesh...");
        let errors = self.estimate_displacement_error();
        self.mesh.clear_flags();
        self.mesh
            .refine_and_coarsen_fixed_fraction(&errors, 0.6, 0.4);
        self.mesh.limit_flag_levels(min_level, max_level);

        let old_handler = std::mem::replace(
            &mut self.handler,
            DofHandler::distribute(
                &QuadMesh::subdivided_rectangle([0.0, 0.0], [1.0, 1.0], [1, 1]),
                1,
                DIM,
            ),
        );
        let old_displacement = self.previous_displacement.clone();
        let old_velocity = self.previous_velocity.clone();
        let old_acceleration = self.previous_acceleration.clone();

        self.mesh.execute_coarsening_and_refinement();
        self.setup_dofs()?;
        self.initialize_system();

        self.previous_displacement = self.transfer_vector(&old_handler, &old_displacement);
        self.previous_velocity = self.transfer_vector(&old_handler, &old_velocity);
        self.previous_acceleration = self.transfer_vector(&old_handler, &old_acceleration);

        self.constraints
            .distribute(self.previous_displacement.as_mut_slice());
        self.constraints
            .distribute(self.previous_velocity.as_mut_slice());
        self.constraints
            .distribute(self.previous_acceleration.as_mut_slice());

        self.current_displacement = self.previous_displacement.clone();
        self.current_velocity = self.previous_velocity.clone();
        self.current_acceleration = self.previous_acceleration.clone();
        Ok(())
    }

    /// Per-cell error from the mismatch between the raw displacement
    /// gradient and its node-averaged recovery.
    fn estimate_displacement_error(&self) -> Vec<f64> {
        let n_nodes = self.scalar_handler.n_nodes();
        let mut recovered = vec![[[0.0; 2]; 2]; n_nodes];
        let mut counts = vec![0u32; n_nodes];
        let mut fe = FeValues::new(1, 1);

        for cell in self.mesh.active_cells() {
            fe.reinit(&self.mesh, cell);
            let dofs = self.handler.cell_dof_indices(cell);
            let mut grad_u = [[0.0; 2]; 2];
            for (a, &dof0) in dofs.iter().step_by(DIM).enumerate() {
                let g = fe.grad(a, 0);
                for c in 0..DIM {
                    let u = self.current_displacement[dof0 + c];
                    grad_u[c][0] += u * g[0];
                    grad_u[c][1] += u * g[1];
                }
            }
            for &node in self.scalar_handler.cell_node_indices(cell) {
                counts[node] += 1;
                for i in 0..DIM {
                    for j in 0..DIM {
                        recovered[node][i][j] += grad_u[i][j];
                    }
                }
            }
        }
        for (r, &count) in recovered.iter_mut().zip(&counts) {
            if count > 0 {
                for row in r.iter_mut() {
                    for v in row.iter_mut() {
                        *v /= count as f64;
                    }
                }
            }
        }

        self.mesh
            .active_cells()
            .map(|cell| {
                let mut fe = FeValues::new(1, 1);
                fe.reinit(&self.mesh, cell);
                let dofs = self.handler.cell_dof_indices(cell);
                let mut grad_u = [[0.0; 2]; 2];
                for (a, &dof0) in dofs.iter().step_by(DIM).enumerate() {
                    let g = fe.grad(a, 0);
                    for c in 0..DIM {
                        let u = self.current_displacement[dof0 + c];
                        grad_u[c][0] += u * g[0];
                        grad_u[c][1] += u * g[1];
                    }
                }
                let nodes = self.scalar_handler.cell_node_indices(cell);
                let mut mean = [[0.0; 2]; 2];
                for &node in nodes {
                    for i in 0..DIM {
                        for j in 0..DIM {
                            mean[i][j] += recovered[node][i][j] / nodes.len() as f64;
                        }
                    }
                }
                let h = self.mesh.cell_extent(cell)[0].max(self.mesh.cell_extent(cell)[1]);
                let mut err = 0.0;
                for i in 0..DIM {
                    for j in 0..DIM {
                        let d = grad_u[i][j] - mean[i][j];
                        err += d * d;
                    }
                }
                h * err.sqrt()
            })
            .collect()
    }

    /// Conservative nodal transfer of a vector through a mesh change:
    /// surviving vertices keep their values, refinement-created vertices
    /// interpolate from their parents.
    fn transfer_vector(
        &self,
        old_handler: &DofHandler,
        old: &na::DVector<f64>,
    ) -> na::DVector<f64> {
        let nc = self.handler.n_components;
        let mut out = na::DVector::zeros(self.handler.n_dofs());
        for node in 0..self.handler.n_nodes() {
            let Some(vertex) = self.handler.vertex_of_node(node) else {
                continue;
            };
            for c in 0..nc {
                out[self.handler.dof_of_node(node, c)] =
                    self.vertex_value(old_handler, old, vertex, c, nc);
            }
        }
        out
    }

    fn vertex_value(
        &self,
        old_handler: &DofHandler,
        old: &na::DVector<f64>,
        vertex: usize,
        component: usize,
        nc: usize,
    ) -> f64 {
        if let Some(node) = old_handler.node_of_vertex(vertex) {
            return old[node * nc + component];
        }
        let parents = self.mesh.vertex_parents(vertex);
        if parents.is_empty() {
            return 0.0;
        }
        parents
            .iter()
            .map(|&p| self.vertex_value(old_handler, old, p, component, nc))
            .sum::<f64>()
            / parents.len() as f64
    }

    pub fn save_checkpoint(&mut self) -> Result<(), Error> {
        if self.comm.rank() == 0 {
            checkpoint::save(
                &self.params.output_dir,
                self.time.get_timestep(),
                self.current_displacement.as_slice(),
                self.current_velocity.as_slice(),
                self.current_acceleration.as_slice(),
            )?;
        }
        log::info!(
            "Checkpoint file successfully saved at time step {}!",
            self.time.get_timestep()
        );
        Ok(())
    }

    /// Restore the newest checkpoint if one exists; `Ok(false)` means start
    /// from the beginning.
    pub fn load_checkpoint(&mut self) -> Result<bool, Error> {
        let Some(data) = checkpoint::load(&self.params.output_dir)? else {
            log::info!("Did not find solid checkpoint files. Start from the beginning!");
            return Ok(false);
        };
        self.setup_dofs()?;
        self.initialize_system();
        if data.displacement.len() != self.handler.n_dofs() {
            return Err(Error::Consistency {
                message: format!(
                    "checkpoint has {} dofs, mesh expects {}",
                    data.displacement.len(),
                    self.handler.n_dofs()
                ),
            });
        }
        self.current_displacement = na::DVector::from_vec(data.displacement);
        self.current_velocity = na::DVector::from_vec(data.velocity);
        self.current_acceleration = na::DVector::from_vec(data.acceleration);
        self.previous_displacement = self.current_displacement.clone();
        self.previous_velocity = self.current_velocity.clone();
        self.previous_acceleration = self.current_acceleration.clone();

        // Fast-forward the clock, replaying only the output bookkeeping.
        for i in 0..=data.step {
            if (self.time.current() == 0.0 || self.time.time_to_output())
                && self.comm.rank() == 0
            {
                self.output_record
                    .write_current_timestep(self.time.current(), self.time.get_timestep())?;
            }
            if i == data.step {
                break;
            }
            self.time.increment();
        }
        log::info!(
            "Checkpoint file successfully loaded from time step {}!",
            self.time.get_timestep()
        );
        Ok(true)
    }
}
