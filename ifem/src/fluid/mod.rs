//! Indicator-blended incompressible fluid solver on the shared mesh.
//!
//! One saddle-point (velocity, pressure) system is assembled over the whole
//! mesh every step. Cells tagged solid by the indicator get the
//! added-mass-stabilized mass coefficient `(1 + theta) rho_s / dt` instead of
//! `rho_f / dt`, plus solid stress-divergence and acceleration source terms
//! read from the interface store.

mod diagnostics;

use std::rc::Rc;

use sprs::CsMat;

use crate::comm::Communicator;
use crate::config::{Parameters, RunMode};
use crate::fe::{Constraints, DofHandler, FeFaceValues, FeValues, IndexPartition};
use crate::interface::{Indicator, InterfaceStore};
use crate::linsolve::{
    csr_from_triplets, spmv, BlockDiagonalPreconditioner, ConjugateResidual, InverseMatrix,
    Jacobi, Status,
};
use crate::logging::{DiagnosticLog, OutputRecord};
use crate::mesh::{QuadMesh, FACES_PER_CELL};
use crate::time::Time;
use crate::{Error, DIM};

pub struct FluidSolver {
    pub mesh: QuadMesh,
    params: Parameters,
    comm: Rc<dyn Communicator>,
    pub time: Time,

    velocity_handler: DofHandler,
    pressure_handler: DofHandler,
    scalar_handler: DofHandler,
    constraints: Constraints,
    pressure_constraints: Constraints,
    velocity_partition: IndexPartition,
    pressure_partition: IndexPartition,

    system_matrix: CsMat<f64>,
    precond_velocity: CsMat<f64>,
    precond_pressure: CsMat<f64>,
    system_rhs: na::DVector<f64>,

    /// Block solution vector: velocity dofs followed by pressure dofs.
    solution: na::DVector<f64>,
    present_solution: na::DVector<f64>,
    previous_solution: na::DVector<f64>,

    /// Separately accumulated coupling force channels.
    fsi_force_acceleration_part: na::DVector<f64>,
    fsi_force_stress_part: na::DVector<f64>,
    fsi_force: na::DVector<f64>,
    /// Recovered fluid stress components at the scalar dofs.
    stress: Vec<Vec<na::DVector<f64>>>,

    energy_log: DiagnosticLog,
    ind_vel_log: DiagnosticLog,
    vel_norm_log: DiagnosticLog,
    div_norm_log: DiagnosticLog,
    gradp_log: DiagnosticLog,
    drag_lift_log: DiagnosticLog,
    output_record: OutputRecord,
    pub events_enabled: bool,
}

impl FluidSolver {
    pub fn new(
        mesh: QuadMesh,
        params: &Parameters,
        comm: Rc<dyn Communicator>,
    ) -> Result<Self, Error> {
        let time = Time::new(
            params.time.end,
            params.time.delta_t,
            params.time.output_interval,
            params.time.refinement_interval,
            params.time.save_interval,
        );
        let is_coordinator = comm.rank() == 0;
        let energy_log = DiagnosticLog::create(
            &params.output_dir,
            "energy_estimates.txt",
            &[
                "Time",
                "Kinetic_Energy",
                "Viscous_Dissipation",
                "Pressure_Div_Term",
                "Algorithmic_Dissipation",
                "Artificial_Algorithmic_Dissipation",
                "Boundary_Work_Inlet",
                "Boundary_Work_Outlet",
                "Pressure_Power_Inlet",
                "Shear_Power_Inlet",
                "Pressure_Power_Outlet",
                "Shear_Power_Outlet",
                "Artificial_KE",
                "Artificial_Viscous_Dissipation",
            ],
            is_coordinator,
        )?;
        let ind_vel_log = DiagnosticLog::create(
            &params.output_dir,
            "ind_vel_norm.txt",
            &["Time", "L2-norm", "Max-norm"],
            is_coordinator,
        )?;
        let vel_norm_log = DiagnosticLog::create(
            &params.output_dir,
            "velocity_L2_norm.txt",
            &["Time", "L2_norm_velocity"],
            is_coordinator,
        )?;
        let div_norm_log = DiagnosticLog::create(
            &params.output_dir,
            "divergence_L2_norm.txt",
            &["Time", "L2_norm_divergence"],
            is_coordinator,
        )?;
        let gradp_log = DiagnosticLog::create(
            &params.output_dir,
            "gradp_L2_norm.txt",
            &["Time", "L2_norm_grad_p"],
            is_coordinator,
        )?;
        let drag_lift_log = DiagnosticLog::create(
            &params.output_dir,
            "drag_lift_history.txt",
            &["Time", "Timestep", "Drag_Coefficient", "Lift_Coefficient"],
            is_coordinator,
        )?;
        let output_record = OutputRecord::new(&params.output_dir, "fluid_", is_coordinator);
        let events_enabled = params.run_mode == RunMode::StandAloneFluid;

        let dummy = QuadMesh::subdivided_rectangle([0.0, 0.0], [1.0, 1.0], [1, 1]);
        Ok(FluidSolver {
            mesh,
            params: params.clone(),
            comm,
            time,
            velocity_handler: DofHandler::distribute(&dummy, 1, DIM),
            pressure_handler: DofHandler::distribute(&dummy, 1, 1),
            scalar_handler: DofHandler::distribute(&dummy, 1, 1),
            constraints: Constraints::new(),
            pressure_constraints: Constraints::new(),
            velocity_partition: IndexPartition {
                owned: Vec::new(),
                relevant: Vec::new(),
            },
            pressure_partition: IndexPartition {
                owned: Vec::new(),
                relevant: Vec::new(),
            },
            system_matrix: CsMat::zero((0, 0)),
            precond_velocity: CsMat::zero((0, 0)),
            precond_pressure: CsMat::zero((0, 0)),
            system_rhs: na::DVector::zeros(0),
            solution: na::DVector::zeros(0),
            present_solution: na::DVector::zeros(0),
            previous_solution: na::DVector::zeros(0),
            fsi_force_acceleration_part: na::DVector::zeros(0),
            fsi_force_stress_part: na::DVector::zeros(0),
            fsi_force: na::DVector::zeros(0),
            stress: Vec::new(),
            energy_log,
            ind_vel_log,
            vel_norm_log,
            div_norm_log,
            gradp_log,
            drag_lift_log,
            output_record,
            events_enabled,
        })
    }

    pub fn n_velocity_dofs(&self) -> usize {
        self.velocity_handler.n_dofs()
    }

    pub fn n_pressure_dofs(&self) -> usize {
        self.pressure_handler.n_dofs()
    }

    pub fn n_dofs(&self) -> usize {
        self.n_velocity_dofs() + self.n_pressure_dofs()
    }

    pub fn velocity_handler(&self) -> &DofHandler {
        &self.velocity_handler
    }

    pub fn scalar_handler(&self) -> &DofHandler {
        &self.scalar_handler
    }

    /// Owned/relevant descriptors of the velocity dof space.
    pub fn velocity_partition(&self) -> &IndexPartition {
        &self.velocity_partition
    }

    /// Owned/relevant descriptors of the pressure dof space.
    pub fn pressure_partition(&self) -> &IndexPartition {
        &self.pressure_partition
    }

    pub fn solution(&self) -> &na::DVector<f64> {
        &self.present_solution
    }

    pub fn system_matrix(&self) -> &CsMat<f64> {
        &self.system_matrix
    }

    /// Assembled coupling force channels `(acceleration part, stress part,
    /// combined)`.
    pub fn fsi_force_channels(
        &self,
    ) -> (&na::DVector<f64>, &na::DVector<f64>, &na::DVector<f64>) {
        (
            &self.fsi_force_acceleration_part,
            &self.fsi_force_stress_part,
            &self.fsi_force,
        )
    }

    fn volume_rule(&self) -> usize {
        self.params.fluid.velocity_degree + 1
    }

    /// Number of volume quadrature points per cell, which is what the
    /// interface store's per-cell arrays are sized to.
    pub fn n_volume_quad_points(&self) -> usize {
        self.volume_rule() * self.volume_rule()
    }

    pub fn n_face_quad_points(&self) -> usize {
        self.volume_rule()
    }

    pub fn setup_dofs(&mut self) {
        self.mesh.partition(self.comm.size());
        let vd = self.params.fluid.velocity_degree;
        let pd = self.params.fluid.pressure_degree;
        self.velocity_handler = DofHandler::distribute(&self.mesh, vd, DIM);
        self.pressure_handler = DofHandler::distribute(&self.mesh, pd, 1);
        self.scalar_handler = DofHandler::distribute(&self.mesh, 1, 1);
        self.velocity_partition =
            IndexPartition::build(&self.velocity_handler, &self.mesh, self.comm.rank());
        self.pressure_partition =
            IndexPartition::build(&self.pressure_handler, &self.mesh, self.comm.rank());
        log::info!(
            "Number of active fluid cells: {}, velocity dofs: {}, pressure dofs: {}",
            self.mesh.n_active_cells(),
            self.n_velocity_dofs(),
            self.n_pressure_dofs()
        );
    }

    /// Inlet profile: parabolic in the cross-stream coordinate, ramped in
    /// time.
    fn inlet_velocity(&self, y: f64, t: f64) -> f64 {
        let (lo, hi) = self.domain_bounds();
        let height = hi[1] - lo[1];
        let s = (y - lo[1]) / height;
        let ramp = if self.params.fluid.inlet_ramp_time > 0.0 {
            (t / self.params.fluid.inlet_ramp_time).min(1.0)
        } else {
            1.0
        };
        self.params.fluid.inlet_velocity * 4.0 * s * (1.0 - s) * ramp
    }

    fn domain_bounds(&self) -> ([f64; 2], [f64; 2]) {
        let m = &self.params.fluid_mesh;
        (m.lower, m.upper)
    }

    /// Rebuild the constraint set: inlet/wall velocity values and the single
    /// pinned pressure dof nearest the configured reference point, chosen by
    /// a distributed minimum-distance reduction over owned pressure dofs.
    pub fn set_up_boundary_values(&mut self) {
        self.constraints.clear();
        self.pressure_constraints.clear();
        let nu = self.n_velocity_dofs();
        let t = self.time.current();

        // Inlet (left boundary) with a parabolic velocity profile.
        for node in self.velocity_handler.boundary_nodes(&self.mesh, 0) {
            let p = self.velocity_handler.node_position(node);
            let dof_x = self.velocity_handler.dof_of_node(node, 0);
            let dof_y = self.velocity_handler.dof_of_node(node, 1);
            self.constraints.add_line(dof_x);
            self.constraints
                .set_inhomogeneity(dof_x, self.inlet_velocity(p[1], t));
            self.constraints.add_line(dof_y);
        }
        // No-slip walls.
        for boundary_id in [2u32, 3] {
            for node in self.velocity_handler.boundary_nodes(&self.mesh, boundary_id) {
                for c in 0..DIM {
                    self.constraints
                        .add_line(self.velocity_handler.dof_of_node(node, c));
                }
            }
        }

        // Fix the pressure at the owned dof closest to the reference point.
        let target = self.params.fluid.pressure_pin_point;
        let mut local_best = f64::MAX;
        let mut local_dof = usize::MAX;
        for &dof in &self.pressure_partition.owned {
            let p = self
                .pressure_handler
                .node_position(self.pressure_handler.node_of_dof(dof));
            let d = ((p[0] - target[0]).powi(2) + (p[1] - target[1]).powi(2)).sqrt();
            if d < local_best {
                local_best = d;
                local_dof = dof;
            }
        }
        let global = self.comm.min_loc(local_best);
        let pinned = if global.rank == self.comm.rank() {
            local_dof
        } else {
            usize::MAX
        };
        let pinned = self.comm.broadcast_index(global.rank, pinned);
        if pinned != usize::MAX {
            self.constraints.add_line(nu + pinned);
            self.constraints.set_inhomogeneity(nu + pinned, 0.0);
            self.pressure_constraints.add_line(pinned);
        }

        self.constraints.close();
        self.pressure_constraints.close();
    }

    pub fn initialize_system(&mut self) {
        let n = self.n_dofs();
        let nu = self.n_velocity_dofs();
        let ns = self.scalar_handler.n_dofs();
        self.system_rhs = na::DVector::zeros(n);
        self.solution = na::DVector::zeros(n);
        self.present_solution = na::DVector::zeros(n);
        self.previous_solution = na::DVector::zeros(n);
        self.fsi_force_acceleration_part = na::DVector::zeros(nu);
        self.fsi_force_stress_part = na::DVector::zeros(nu);
        self.fsi_force = na::DVector::zeros(nu);
        self.stress = vec![vec![na::DVector::zeros(ns); DIM]; DIM];
    }

    /// Assemble the saddle-point system, the preconditioner blocks and the
    /// separately tracked coupling force channels.
    pub fn assemble(&mut self, store: &InterfaceStore) -> Result<(), Error> {
        let viscosity = self.params.fluid.viscosity;
        let rho_f = self.params.fluid.rho;
        let rho_s = self.params.solid.rho;
        let dt_inv = 1.0 / self.time.get_delta_t();
        let theta = self.params.coupling.penalty_scale_factor;
        let mass_coef_s = (1.0 + theta) * rho_s * dt_inv;
        let mass_coef_f = rho_f * dt_inv;
        let gravity = self.params.gravity;

        let n = self.n_dofs();
        let nu = self.n_velocity_dofs();
        let np = self.n_pressure_dofs();
        let vd = self.params.fluid.velocity_degree;
        let pd = self.params.fluid.pressure_degree;
        let rule = self.volume_rule();

        let mut fe_v = FeValues::new(vd, rule);
        let mut fe_p = FeValues::new(pd, rule);
        let mut fe_face = FeFaceValues::new(vd, rule);

        let nv_local = fe_v.n_nodes() * DIM;
        let np_local = fe_p.n_nodes();
        let local_dofs = nv_local + np_local;
        let n_q = fe_v.n_quad_points();

        let mut system_triplets = Vec::new();
        let mut precond_v_triplets = Vec::new();
        let mut precond_p_triplets = Vec::new();
        let mut rhs = vec![0.0; n];
        self.fsi_force_acceleration_part.fill(0.0);
        self.fsi_force_stress_part.fill(0.0);
        self.fsi_force.fill(0.0);

        for cell in self.mesh.active_cells() {
            if self.mesh.cell_subdomain(cell) != self.comm.rank() {
                continue;
            }
            store.check_cell_data(cell)?;
            let indicator = store.indicator(cell);
            let mass_coef = match indicator {
                Indicator::Fluid => mass_coef_f,
                Indicator::Solid => mass_coef_s,
            };
            fe_v.reinit(&self.mesh, cell);
            fe_p.reinit(&self.mesh, cell);

            let vel_dofs = self.velocity_handler.cell_dof_indices(cell);
            let pre_dofs: Vec<usize> = self
                .pressure_handler
                .cell_dof_indices(cell)
                .iter()
                .map(|&d| nu + d)
                .collect();
            let mut dofs = vel_dofs.clone();
            dofs.extend(&pre_dofs);

            let mut local_matrix = na::DMatrix::<f64>::zeros(local_dofs, local_dofs);
            let mut local_precond_v = na::DMatrix::<f64>::zeros(nv_local, nv_local);
            let mut local_precond_p = na::DMatrix::<f64>::zeros(np_local, np_local);
            let mut local_rhs = vec![0.0; local_dofs];
            let mut local_rhs_acceleration = vec![0.0; nv_local];
            let mut local_rhs_stress = vec![0.0; nv_local];
            let mut local_fsi_force = vec![0.0; nv_local];

            for q in 0..n_q {
                let jxw = fe_v.jxw(q);

                // Previous-step velocity at the quadrature point.
                let mut u_prev = [0.0; DIM];
                for (a, &dof0) in vel_dofs.iter().step_by(DIM).enumerate() {
                    let phi = fe_v.value(a, q);
                    for c in 0..DIM {
                        u_prev[c] += phi * self.present_solution[dof0 + c];
                    }
                }

                // Solid stress and acceleration snapshots from the
                // interface store.
                let mut fsi_stress_tensor = [[0.0; 2]; 2];
                let mut fsi_acc = [0.0; DIM];
                if indicator == Indicator::Solid {
                    if let Some(record) = store.try_get(cell) {
                        let components = record.fsi_stress[q];
                        fsi_stress_tensor = [
                            [components[0], components[1]],
                            [components[1], components[2]],
                        ];
                        fsi_acc = record.fsi_acceleration[q];
                    }
                }

                for i in 0..nv_local {
                    let (a, ca) = (i / DIM, i % DIM);
                    let phi_a = fe_v.value(a, q);
                    let grad_a = fe_v.grad(a, q);
                    let div_a = grad_a[ca];

                    for j in 0..nv_local {
                        let (b, cb) = (j / DIM, j % DIM);
                        let phi_b = fe_v.value(b, q);
                        let grad_b = fe_v.grad(b, q);

                        let mut value = 2.0 * viscosity
                            * crate::solid::symgrad_dot(grad_a, ca, grad_b, cb);
                        if ca == cb {
                            value += mass_coef * phi_a * phi_b;
                        }
                        local_matrix[(i, j)] += value * jxw;

                        let mut precond = viscosity
                            * if ca == cb {
                                grad_a[0] * grad_b[0] + grad_a[1] * grad_b[1]
                            } else {
                                0.0
                            };
                        if ca == cb {
                            precond += mass_coef * phi_a * phi_b;
                        }
                        local_precond_v[(i, j)] += precond * jxw;
                    }
                    for (jp, _) in pre_dofs.iter().enumerate() {
                        let phi_p = fe_p.value(jp, q);
                        // -div(v) p and the symmetric -q div(u) block.
                        local_matrix[(i, nv_local + jp)] -= div_a * phi_p * jxw;
                        local_matrix[(nv_local + jp, i)] -= phi_p * div_a * jxw;
                    }

                    local_rhs[i] += phi_a * gravity[ca] * jxw;
                    local_rhs[i] += mass_coef * phi_a * u_prev[ca] * jxw;

                    if indicator == Indicator::Solid {
                        let stress_term = grad_a[0] * fsi_stress_tensor[ca][0]
                            + grad_a[1] * fsi_stress_tensor[ca][1];
                        let acc_term = fsi_acc[ca] * rho_s * phi_a;
                        local_rhs[i] += (stress_term + acc_term) * jxw;
                        local_rhs_acceleration[i] += acc_term * jxw;
                        local_rhs_stress[i] += stress_term * jxw;
                        local_fsi_force[i] += (stress_term + acc_term) * jxw;
                    }
                }
                for ip in 0..np_local {
                    let phi_pi = fe_p.value(ip, q);
                    for jp in 0..np_local {
                        local_precond_p[(ip, jp)] +=
                            (1.0 / viscosity) * phi_pi * fe_p.value(jp, q) * jxw;
                    }
                }
            }

            // Prescribed normal traction on tagged boundary faces.
            if !self.params.fluid.neumann_bcs.is_empty() {
                for face in 0..FACES_PER_CELL {
                    let Some(boundary_id) = self.mesh.boundary_id(cell, face) else {
                        continue;
                    };
                    let Some(&(_, pressure_value)) = self
                        .params
                        .fluid
                        .neumann_bcs
                        .iter()
                        .find(|&&(id, _)| id == boundary_id)
                    else {
                        continue;
                    };
                    fe_face.reinit(&self.mesh, cell, face);
                    let normal = fe_face.normal();
                    for q in 0..fe_face.n_quad_points() {
                        let jxw = fe_face.jxw(q);
                        for i in 0..nv_local {
                            let (a, ca) = (i / DIM, i % DIM);
                            local_rhs[i] -=
                                fe_face.value(a, q) * normal[ca] * pressure_value * jxw;
                        }
                    }
                }
            }

            self.constraints.distribute_local_to_global(
                &local_matrix,
                &local_rhs,
                &dofs,
                &mut system_triplets,
                &mut rhs,
            );
            self.constraints
                .distribute_matrix(&local_precond_v, &vel_dofs, &mut precond_v_triplets);
            let pre_local_dofs: Vec<usize> =
                self.pressure_handler.cell_dof_indices(cell);
            self.pressure_constraints.distribute_matrix(
                &local_precond_p,
                &pre_local_dofs,
                &mut precond_p_triplets,
            );
            self.constraints.distribute_vector(
                &local_rhs_acceleration,
                &vel_dofs,
                self.fsi_force_acceleration_part.as_mut_slice(),
            );
            self.constraints.distribute_vector(
                &local_rhs_stress,
                &vel_dofs,
                self.fsi_force_stress_part.as_mut_slice(),
            );
            self.constraints.distribute_vector(
                &local_fsi_force,
                &vel_dofs,
                self.fsi_force.as_mut_slice(),
            );
        }

        self.system_rhs = na::DVector::from_vec(rhs);
        self.system_matrix = csr_from_triplets(n, n, &system_triplets);
        self.precond_velocity = csr_from_triplets(nu, nu, &precond_v_triplets);
        self.precond_pressure = csr_from_triplets(np, np, &precond_p_triplets);
        Ok(())
    }

    /// Block-preconditioned minimum-residual solve of the saddle-point
    /// system. Constraints are eliminated beforehand and redistributed on
    /// the solution.
    pub fn solve(&mut self) -> Result<(u32, f64), Error> {
        let n = self.n_dofs();
        let prec_a = Jacobi::from_matrix(&self.precond_velocity);
        let mp_inverse = InverseMatrix::new(&self.precond_pressure);
        let preconditioner =
            BlockDiagonalPreconditioner::new(prec_a, mp_inverse, self.n_velocity_dofs());

        let mut x = vec![0.0; n];
        let mut b = self.system_rhs.as_slice().to_vec();
        let matrix = &self.system_matrix;
        let mut cr = ConjugateResidual::new(n, n as u32, 1e-11);
        let result = cr.solve(
            |v, out| spmv(matrix, v, out),
            &preconditioner,
            &mut x,
            &mut b,
        );
        if result.status != Status::Success {
            return Err(Error::SolverDiverged {
                iterations: result.iterations,
                residual: result.residual,
            });
        }
        self.solution = na::DVector::from_vec(x);
        self.constraints.distribute(self.solution.as_mut_slice());
        Ok((result.iterations, result.residual))
    }

    /// Advance the fluid by one step against the current interface state.
    pub fn run_one_step(&mut self, store: &InterfaceStore) -> Result<(), Error> {
        self.previous_solution = self.present_solution.clone();
        self.solution = self.present_solution.clone();

        if self.time.get_timestep() == 0 {
            self.output_results()?;
            self.compute_ind_norms(store)?;
            self.compute_fluid_norms(store)?;
            self.compute_pressure_gradient_norm(store)?;
            self.compute_energy_estimates(store)?;
        }

        self.time.increment();
        log::info!(
            "Fluid step = {}, at t = {:.6e}",
            self.time.get_timestep(),
            self.time.current()
        );

        self.set_up_boundary_values();
        self.assemble(store)?;
        let (iterations, residual) = self.solve()?;
        self.present_solution = self.solution.clone();
        log::info!("ITR = {} RES = {:.6e}", iterations, residual);

        self.compute_drag_lift_coefficients()?;
        self.compute_ind_norms(store)?;
        self.compute_fluid_norms(store)?;
        self.compute_pressure_gradient_norm(store)?;
        self.compute_energy_estimates(store)?;
        self.update_stress();

        if self.time.time_to_output() {
            self.output_results()?;
        }
        if self.events_enabled && self.time.time_to_refine() {
            self.refine_mesh(3)?;
        }
        Ok(())
    }

    /// Stand-alone fluid time loop.
    pub fn run(&mut self) -> Result<(), Error> {
        log::info!("Running fluid solver on {} process(es)...", self.comm.size());
        self.mesh
            .refine_global(self.params.fluid_mesh.global_refinements);
        self.setup_dofs();
        self.set_up_boundary_values();
        self.initialize_system();
        let mut store = InterfaceStore::new(self.n_face_quad_points(), self.n_volume_quad_points());
        store.rebuild(&self.mesh);
        self.run_one_step(&store)?;
        while !self.time.finished() {
            self.run_one_step(&store)?;
        }
        Ok(())
    }

    pub fn output_results(&mut self) -> Result<(), Error> {
        log::info!("Writing fluid results...");
        let time = self.time.current();
        let index = self.time.get_timestep();
        self.output_record.write_current_timestep(time, index)?;
        Ok(())
    }

    /// Stand-alone mesh refinement: uniform subdivision up to `max_level`,
    /// with the block solution carried over by point interpolation.
    pub fn refine_mesh(&mut self, max_level: u32) -> Result<(), Error> {
        if self
            .mesh
            .active_cells()
            .all(|c| self.mesh.cell_level(c) >= max_level)
        {
            return Ok(());
        }
        log::info!("Refining fluid mesh...");
        let old_mesh = self.mesh.clone();
        let old_velocity_handler = std::mem::replace(
            &mut self.velocity_handler,
            DofHandler::distribute(
                &QuadMesh::subdivided_rectangle([0.0, 0.0], [1.0, 1.0], [1, 1]),
                1,
                DIM,
            ),
        );
        let old_pressure_handler = std::mem::replace(
            &mut self.pressure_handler,
            DofHandler::distribute(
                &QuadMesh::subdivided_rectangle([0.0, 0.0], [1.0, 1.0], [1, 1]),
                1,
                1,
            ),
        );
        let old_solution = self.present_solution.clone();
        let old_nu = old_velocity_handler.n_dofs();

        self.mesh.refine_global(1);
        self.setup_dofs();
        self.initialize_system();

        // Interpolate the old finite element function at the new support
        // points.
        let nu = self.n_velocity_dofs();
        let vd = old_velocity_handler.order;
        let pd = old_pressure_handler.order;
        for node in 0..self.velocity_handler.n_nodes() {
            let p = self.velocity_handler.node_position(node);
            if let Some(cell) = old_mesh.locate(p) {
                let values = crate::fe::values_at_point(&old_mesh, cell, vd, p);
                let old_nodes = old_velocity_handler.cell_node_indices(cell);
                for c in 0..DIM {
                    let mut v = 0.0;
                    for (a, &old_node) in old_nodes.iter().enumerate() {
                        v += values[a] * old_solution[old_node * DIM + c];
                    }
                    self.present_solution[self.velocity_handler.dof_of_node(node, c)] = v;
                }
            }
        }
        for node in 0..self.pressure_handler.n_nodes() {
            let p = self.pressure_handler.node_position(node);
            if let Some(cell) = old_mesh.locate(p) {
                let values = crate::fe::values_at_point(&old_mesh, cell, pd, p);
                let old_nodes = old_pressure_handler.cell_node_indices(cell);
                let mut v = 0.0;
                for (a, &old_node) in old_nodes.iter().enumerate() {
                    v += values[a] * old_solution[old_nu + old_node];
                }
                self.present_solution[nu + node] = v;
            }
        }
        self.previous_solution = self.present_solution.clone();
        self.solution = self.present_solution.clone();
        self.set_up_boundary_values();
        Ok(())
    }

    /// Fluid Cauchy stress `-p I + 2 nu eps(u)` at a physical point.
    pub fn stress_at_point(&self, point: [f64; 2]) -> Option<[[f64; 2]; 2]> {
        let cell = self.mesh.locate(point)?;
        Some(self.stress_in_cell(cell, point))
    }

    /// Stress evaluated with one particular cell's finite element data.
    fn stress_in_cell(&self, cell: crate::mesh::CellId, point: [f64; 2]) -> [[f64; 2]; 2] {
        let viscosity = self.params.fluid.viscosity;
        let nu = self.n_velocity_dofs();
        let vd = self.params.fluid.velocity_degree;
        let pd = self.params.fluid.pressure_degree;

        let grads = crate::fe::grads_at_point(&self.mesh, cell, vd, point);
        let vel_nodes = self.velocity_handler.cell_node_indices(cell);
        let mut grad_u = [[0.0; 2]; 2];
        for (a, &node) in vel_nodes.iter().enumerate() {
            for c in 0..DIM {
                let u = self.present_solution[node * DIM + c];
                grad_u[c][0] += u * grads[a][0];
                grad_u[c][1] += u * grads[a][1];
            }
        }
        let values = crate::fe::values_at_point(&self.mesh, cell, pd, point);
        let pre_nodes = self.pressure_handler.cell_node_indices(cell);
        let mut pressure = 0.0;
        for (a, &node) in pre_nodes.iter().enumerate() {
            pressure += values[a] * self.present_solution[nu + node];
        }

        let mut stress = [[0.0; 2]; 2];
        for i in 0..DIM {
            for j in 0..DIM {
                stress[i][j] = viscosity * (grad_u[i][j] + grad_u[j][i]);
                if i == j {
                    stress[i][j] -= pressure;
                }
            }
        }
        stress
    }

    /// Fluid velocity at a physical point.
    pub fn velocity_at_point(&self, point: [f64; 2]) -> Option<[f64; 2]> {
        let cell = self.mesh.locate(point)?;
        let vd = self.params.fluid.velocity_degree;
        let values = crate::fe::values_at_point(&self.mesh, cell, vd, point);
        let vel_nodes = self.velocity_handler.cell_node_indices(cell);
        let mut velocity = [0.0; DIM];
        for (a, &node) in vel_nodes.iter().enumerate() {
            for c in 0..DIM {
                velocity[c] += values[a] * self.present_solution[node * DIM + c];
            }
        }
        Some(velocity)
    }

    /// Nodal recovery of the fluid stress at the scalar dofs, averaged over
    /// surrounding cells.
    pub fn update_stress(&mut self) {
        let ns = self.scalar_handler.n_dofs();
        for row in self.stress.iter_mut() {
            for v in row.iter_mut() {
                v.fill(0.0);
            }
        }
        let mut counts = vec![0u32; ns];
        let mut accumulated = vec![[[0.0; 2]; 2]; ns];
        for cell in self.mesh.active_cells() {
            let scalar_nodes = self.scalar_handler.cell_node_indices(cell).to_vec();
            for &node in &scalar_nodes {
                let p = self.scalar_handler.node_position(node);
                let sigma = self.stress_in_cell(cell, p);
                counts[node] += 1;
                for i in 0..DIM {
                    for j in 0..DIM {
                        accumulated[node][i][j] += sigma[i][j];
                    }
                }
            }
        }
        for (node, sigma) in accumulated.iter().enumerate() {
            for i in 0..DIM {
                for j in 0..DIM {
                    self.stress[i][j][node] = sigma[i][j];
                }
            }
        }
        for node in 0..ns {
            if counts[node] > 0 {
                for i in 0..DIM {
                    for j in 0..DIM {
                        self.stress[i][j][node] /= counts[node] as f64;
                    }
                }
            }
        }
    }
}
