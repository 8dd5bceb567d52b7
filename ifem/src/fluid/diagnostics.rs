//! Per-step fluid diagnostics.
//!
//! None of these feed back into the coupling, but the downstream logs are
//! order-sensitive time series, so every quantity is computed and appended
//! every step.

use super::FluidSolver;
use crate::fe::{FeFaceValues, FeValues};
use crate::interface::{Indicator, InterfaceStore};
use crate::mesh::FACES_PER_CELL;
use crate::{Error, DIM};

impl FluidSolver {
    fn velocity_at_q(&self, fe_v: &FeValues, vel_dofs: &[usize], solution: &na::DVector<f64>, q: usize) -> [f64; 2] {
        let mut u = [0.0; 2];
        for (a, &dof0) in vel_dofs.iter().step_by(DIM).enumerate() {
            let phi = fe_v.value(a, q);
            for c in 0..DIM {
                u[c] += phi * solution[dof0 + c];
            }
        }
        u
    }

    fn velocity_grad_at_q(
        &self,
        fe_v: &FeValues,
        vel_dofs: &[usize],
        solution: &na::DVector<f64>,
        q: usize,
    ) -> [[f64; 2]; 2] {
        let mut grad = [[0.0; 2]; 2];
        for (a, &dof0) in vel_dofs.iter().step_by(DIM).enumerate() {
            let g = fe_v.grad(a, q);
            for c in 0..DIM {
                let u = solution[dof0 + c];
                grad[c][0] += u * g[0];
                grad[c][1] += u * g[1];
            }
        }
        grad
    }

    fn pressure_at_q(&self, fe_p: &FeValues, pre_nodes: &[usize], q: usize) -> f64 {
        let nu = self.n_velocity_dofs();
        pre_nodes
            .iter()
            .enumerate()
            .map(|(a, &node)| fe_p.value(a, q) * self.present_solution[nu + node])
            .sum()
    }

    /// Discrete energy budget of the step, split between true fluid cells
    /// and the solid-indicated ("artificial") region.
    pub fn compute_energy_estimates(&mut self, store: &InterfaceStore) -> Result<(), Error> {
        let rho_f = self.params.fluid.rho;
        let rho_s = self.params.solid.rho;
        let viscosity = self.params.fluid.viscosity;
        let dt = self.time.get_delta_t();
        let rule = self.volume_rule();
        let vd = self.params.fluid.velocity_degree;
        let pd = self.params.fluid.pressure_degree;

        let mut fe_v = FeValues::new(vd, rule);
        let mut fe_p = FeValues::new(pd, rule);
        let mut fe_face = FeFaceValues::new(vd, rule);

        let mut ke = 0.0;
        let mut visc = 0.0;
        let mut p_div_u = 0.0;
        let mut alg_diss = 0.0;
        let mut alg_diss_artificial = 0.0;
        let mut boundary_work_inlet = 0.0;
        let mut boundary_work_outlet = 0.0;
        let mut pressure_power_inlet = 0.0;
        let mut shear_power_inlet = 0.0;
        let mut pressure_power_outlet = 0.0;
        let mut shear_power_outlet = 0.0;
        let mut ke_artificial = 0.0;
        let mut visc_artificial = 0.0;

        for cell in self.mesh.active_cells() {
            if self.mesh.cell_subdomain(cell) != self.comm.rank() {
                continue;
            }
            let is_artificial = store.indicator(cell) == Indicator::Solid;
            fe_v.reinit(&self.mesh, cell);
            fe_p.reinit(&self.mesh, cell);
            let vel_dofs = self.velocity_handler.cell_dof_indices(cell);
            let pre_nodes = self.pressure_handler.cell_node_indices(cell).to_vec();

            for q in 0..fe_v.n_quad_points() {
                let jxw = fe_v.jxw(q);
                let u = self.velocity_at_q(&fe_v, &vel_dofs, &self.present_solution, q);
                let u_prev = self.velocity_at_q(&fe_v, &vel_dofs, &self.previous_solution, q);
                let grad = self.velocity_grad_at_q(&fe_v, &vel_dofs, &self.present_solution, q);
                let p = self.pressure_at_q(&fe_p, &pre_nodes, q);

                let u_sq = u[0] * u[0] + u[1] * u[1];
                let mut eps_eps = 0.0;
                for i in 0..DIM {
                    for j in 0..DIM {
                        let e = 0.5 * (grad[i][j] + grad[j][i]);
                        eps_eps += e * e;
                    }
                }
                let div_u = grad[0][0] + grad[1][1];
                let diff_sq = (u[0] - u_prev[0]).powi(2) + (u[1] - u_prev[1]).powi(2);

                if is_artificial {
                    ke_artificial += 0.5 * rho_s * u_sq * jxw;
                    visc_artificial += 2.0 * viscosity * eps_eps * jxw;
                    alg_diss_artificial += 0.5 * rho_s / dt * diff_sq * jxw;
                } else {
                    ke += 0.5 * rho_f * u_sq * jxw;
                    visc += 2.0 * viscosity * eps_eps * jxw;
                    p_div_u += p * div_u * jxw;
                    alg_diss += 0.5 * rho_f / dt * diff_sq * jxw;
                }
            }

            if is_artificial {
                continue;
            }
            for face in 0..FACES_PER_CELL {
                let Some(boundary_id) = self.mesh.boundary_id(cell, face) else {
                    continue;
                };
                if boundary_id != 0 && boundary_id != 1 {
                    continue;
                }
                fe_face.reinit(&self.mesh, cell, face);
                let normal = fe_face.normal();
                for q in 0..fe_face.n_quad_points() {
                    let jxw = fe_face.jxw(q);
                    let mut u = [0.0; 2];
                    let mut grad = [[0.0; 2]; 2];
                    for (a, &dof0) in vel_dofs.iter().step_by(DIM).enumerate() {
                        let phi = fe_face.value(a, q);
                        let g = fe_face.grad(a, q);
                        for c in 0..DIM {
                            let v = self.present_solution[dof0 + c];
                            u[c] += phi * v;
                            grad[c][0] += v * g[0];
                            grad[c][1] += v * g[1];
                        }
                    }
                    let nu_dofs = self.n_velocity_dofs();
                    let p_face: f64 = {
                        let point = fe_face.quad_point(q);
                        let values =
                            crate::fe::values_at_point(&self.mesh, cell, pd, point);
                        pre_nodes
                            .iter()
                            .enumerate()
                            .map(|(a, &node)| values[a] * self.present_solution[nu_dofs + node])
                            .sum()
                    };
                    let mut traction = [0.0; 2];
                    let mut viscous_traction = [0.0; 2];
                    for i in 0..DIM {
                        for j in 0..DIM {
                            let sym = 0.5 * (grad[i][j] + grad[j][i]);
                            traction[i] += 2.0 * viscosity * sym * normal[j];
                            viscous_traction[i] += 2.0 * viscosity * sym * normal[j];
                        }
                        traction[i] -= p_face * normal[i];
                    }
                    let integrand = u[0] * traction[0] + u[1] * traction[1];
                    let u_dot_n = u[0] * normal[0] + u[1] * normal[1];
                    let pressure_term = -p_face * u_dot_n;
                    let shear_term =
                        viscous_traction[0] * u[0] + viscous_traction[1] * u[1];
                    if boundary_id == 0 {
                        boundary_work_inlet += integrand * jxw;
                        pressure_power_inlet += pressure_term * jxw;
                        shear_power_inlet += shear_term * jxw;
                    } else {
                        boundary_work_outlet += integrand * jxw;
                        pressure_power_outlet += pressure_term * jxw;
                        shear_power_outlet += shear_term * jxw;
                    }
                }
            }
        }

        let row = [
            self.comm.sum(ke),
            self.comm.sum(visc),
            self.comm.sum(p_div_u),
            self.comm.sum(alg_diss),
            self.comm.sum(alg_diss_artificial),
            self.comm.sum(boundary_work_inlet),
            self.comm.sum(boundary_work_outlet),
            self.comm.sum(pressure_power_inlet),
            self.comm.sum(shear_power_inlet),
            self.comm.sum(pressure_power_outlet),
            self.comm.sum(shear_power_outlet),
            self.comm.sum(ke_artificial),
            self.comm.sum(visc_artificial),
        ];
        self.energy_log.append(self.time.current(), &row)?;
        Ok(())
    }

    /// L2 and max norms of the velocity restricted to solid-indicated cells.
    pub fn compute_ind_norms(&mut self, store: &InterfaceStore) -> Result<(), Error> {
        let rule = self.volume_rule();
        let mut fe_v = FeValues::new(self.params.fluid.velocity_degree, rule);
        let mut local_sum = 0.0;
        let mut local_max = 0.0f64;
        for cell in self.mesh.active_cells() {
            if self.mesh.cell_subdomain(cell) != self.comm.rank()
                || store.indicator(cell) != Indicator::Solid
            {
                continue;
            }
            fe_v.reinit(&self.mesh, cell);
            let vel_dofs = self.velocity_handler.cell_dof_indices(cell);
            for q in 0..fe_v.n_quad_points() {
                let u = self.velocity_at_q(&fe_v, &vel_dofs, &self.present_solution, q);
                let norm = (u[0] * u[0] + u[1] * u[1]).sqrt();
                local_sum += norm * norm * fe_v.jxw(q);
                local_max = local_max.max(norm);
            }
        }
        let global_sum = self.comm.sum(local_sum).sqrt();
        let global_max = self.comm.max(local_max);
        self.ind_vel_log
            .append(self.time.current(), &[global_sum, global_max])?;
        Ok(())
    }

    /// Velocity and divergence L2 norms over true fluid cells.
    pub fn compute_fluid_norms(&mut self, store: &InterfaceStore) -> Result<(), Error> {
        let rule = self.volume_rule();
        let mut fe_v = FeValues::new(self.params.fluid.velocity_degree, rule);
        let mut local_sum_vel = 0.0;
        let mut local_sum_div = 0.0;
        for cell in self.mesh.active_cells() {
            if self.mesh.cell_subdomain(cell) != self.comm.rank()
                || store.indicator(cell) == Indicator::Solid
            {
                continue;
            }
            fe_v.reinit(&self.mesh, cell);
            let vel_dofs = self.velocity_handler.cell_dof_indices(cell);
            for q in 0..fe_v.n_quad_points() {
                let u = self.velocity_at_q(&fe_v, &vel_dofs, &self.present_solution, q);
                let grad = self.velocity_grad_at_q(&fe_v, &vel_dofs, &self.present_solution, q);
                let div_u = grad[0][0] + grad[1][1];
                local_sum_vel += (u[0] * u[0] + u[1] * u[1]) * fe_v.jxw(q);
                local_sum_div += div_u * div_u * fe_v.jxw(q);
            }
        }
        let l2_vel = self.comm.sum(local_sum_vel).sqrt();
        let l2_div = self.comm.sum(local_sum_div).sqrt();
        self.vel_norm_log.append(self.time.current(), &[l2_vel])?;
        self.div_norm_log.append(self.time.current(), &[l2_div])?;
        Ok(())
    }

    /// Pressure-gradient L2 norm over true fluid cells.
    pub fn compute_pressure_gradient_norm(&mut self, store: &InterfaceStore) -> Result<(), Error> {
        let rule = self.volume_rule();
        let nu = self.n_velocity_dofs();
        let mut fe_p = FeValues::new(self.params.fluid.pressure_degree, rule);
        let mut local_sum = 0.0;
        for cell in self.mesh.active_cells() {
            if self.mesh.cell_subdomain(cell) != self.comm.rank()
                || store.indicator(cell) == Indicator::Solid
            {
                continue;
            }
            fe_p.reinit(&self.mesh, cell);
            let pre_nodes = self.pressure_handler.cell_node_indices(cell).to_vec();
            for q in 0..fe_p.n_quad_points() {
                let nodal: Vec<f64> = pre_nodes
                    .iter()
                    .map(|&node| self.present_solution[nu + node])
                    .collect();
                let g = fe_p.function_grad(&nodal, q);
                local_sum += (g[0] * g[0] + g[1] * g[1]) * fe_p.jxw(q);
            }
        }
        let l2 = self.comm.sum(local_sum).sqrt();
        self.gradp_log.append(self.time.current(), &[l2])?;
        Ok(())
    }

    /// Drag and lift coefficients integrated over the tagged surface,
    /// normalized by the configured reference diameter and velocity.
    pub fn compute_drag_lift_coefficients(&mut self) -> Result<(f64, f64), Error> {
        let viscosity = self.params.fluid.viscosity;
        let rule = self.volume_rule();
        let vd = self.params.fluid.velocity_degree;
        let pd = self.params.fluid.pressure_degree;
        let target_id = self.params.fluid.drag_boundary_id;
        let nu_dofs = self.n_velocity_dofs();
        let mut fe_face = FeFaceValues::new(vd, rule);

        let mut local_drag = 0.0;
        let mut local_lift = 0.0;
        for cell in self.mesh.active_cells() {
            if self.mesh.cell_subdomain(cell) != self.comm.rank() {
                continue;
            }
            for face in 0..FACES_PER_CELL {
                if self.mesh.boundary_id(cell, face) != Some(target_id) {
                    continue;
                }
                fe_face.reinit(&self.mesh, cell, face);
                let outward = fe_face.normal();
                // Normal pointing into the fluid from the tagged surface.
                let normal = [-outward[0], -outward[1]];
                let vel_dofs = self.velocity_handler.cell_dof_indices(cell);
                let pre_nodes = self.pressure_handler.cell_node_indices(cell).to_vec();
                for q in 0..fe_face.n_quad_points() {
                    let jxw = fe_face.jxw(q);
                    let mut grad = [[0.0; 2]; 2];
                    for (a, &dof0) in vel_dofs.iter().step_by(DIM).enumerate() {
                        let g = fe_face.grad(a, q);
                        for c in 0..DIM {
                            let v = self.present_solution[dof0 + c];
                            grad[c][0] += v * g[0];
                            grad[c][1] += v * g[1];
                        }
                    }
                    let point = fe_face.quad_point(q);
                    let values = crate::fe::values_at_point(&self.mesh, cell, pd, point);
                    let p_face: f64 = pre_nodes
                        .iter()
                        .enumerate()
                        .map(|(a, &node)| values[a] * self.present_solution[nu_dofs + node])
                        .sum();
                    let mut traction = [0.0; 2];
                    for i in 0..DIM {
                        for j in 0..DIM {
                            let sym = 0.5 * (grad[i][j] + grad[j][i]);
                            traction[i] += 2.0 * viscosity * sym * normal[j];
                        }
                        traction[i] -= p_face * normal[i];
                    }
                    local_drag += traction[0] * jxw;
                    local_lift += traction[1] * jxw;
                }
            }
        }

        let global_drag = self.comm.sum(local_drag);
        let global_lift = self.comm.sum(local_lift);
        let d = self.params.fluid.reference_diameter;
        let u_ref = self.params.fluid.reference_velocity;
        let rho = self.params.fluid.rho;
        let denominator = 0.5 * rho * u_ref * u_ref * d;
        let drag_coefficient = global_drag / denominator;
        let lift_coefficient = global_lift / denominator;

        log::debug!(
            "Drag = {:.6e} -> C_D = {:.6e}, Lift = {:.6e} -> C_L = {:.6e}",
            global_drag,
            drag_coefficient,
            global_lift,
            lift_coefficient
        );
        self.drag_lift_log.append(
            self.time.current(),
            &[
                self.time.get_timestep() as f64,
                drag_coefficient,
                lift_coefficient,
            ],
        )?;
        Ok((drag_coefficient, lift_coefficient))
    }
}
