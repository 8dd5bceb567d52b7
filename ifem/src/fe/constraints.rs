//! Algebraic constraints on dofs: hanging nodes, boundary values and pinned
//! dofs, eliminated during assembly and redistributed after each solve.

use ahash::AHashMap;

use crate::fe::dofs::DofHandler;
use crate::mesh::QuadMesh;

#[derive(Clone, Debug, Default)]
struct Line {
    entries: Vec<(usize, f64)>,
    inhomogeneity: f64,
}

/// A set of constraint lines `x_i = sum_j w_ij x_j + b_i`.
#[derive(Default)]
pub struct Constraints {
    lines: AHashMap<usize, Line>,
    closed: bool,
}

impl Constraints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.closed = false;
    }

    /// Begin constraining `dof`; with no entries this pins it to its
    /// inhomogeneity (zero by default).
    pub fn add_line(&mut self, dof: usize) {
        debug_assert!(!self.closed);
        self.lines.entry(dof).or_default();
    }

    pub fn add_entry(&mut self, dof: usize, target: usize, weight: f64) {
        debug_assert!(!self.closed);
        self.lines
            .entry(dof)
            .or_default()
            .entries
            .push((target, weight));
    }

    pub fn set_inhomogeneity(&mut self, dof: usize, value: f64) {
        debug_assert!(!self.closed);
        self.lines.entry(dof).or_default().inhomogeneity = value;
    }

    pub fn is_constrained(&self, dof: usize) -> bool {
        self.lines.contains_key(&dof)
    }

    pub fn n_constraints(&self) -> usize {
        self.lines.len()
    }

    /// Resolve chains so that no constraint entry targets a constrained dof.
    pub fn close(&mut self) {
        loop {
            let chained: Vec<usize> = self
                .lines
                .iter()
                .filter(|(_, line)| {
                    line.entries
                        .iter()
                        .any(|&(target, _)| self.lines.contains_key(&target))
                })
                .map(|(&dof, _)| dof)
                .collect();
            if chained.is_empty() {
                break;
            }
            for dof in chained {
                let line = self.lines[&dof].clone();
                let mut new_line = Line {
                    entries: Vec::new(),
                    inhomogeneity: line.inhomogeneity,
                };
                for (target, weight) in line.entries {
                    if let Some(inner) = self.lines.get(&target) {
                        new_line.inhomogeneity += weight * inner.inhomogeneity;
                        for &(it, iw) in &inner.entries {
                            new_line.entries.push((it, weight * iw));
                        }
                    } else {
                        new_line.entries.push((target, weight));
                    }
                }
                self.lines.insert(dof, new_line);
            }
        }
        self.closed = true;
    }

    fn resolution(&self, dofs: &[usize]) -> Vec<Vec<(usize, f64)>> {
        dofs.iter()
            .map(|&dof| match self.lines.get(&dof) {
                Some(line) => line.entries.clone(),
                None => vec![(dof, 1.0)],
            })
            .collect()
    }

    /// Scatter a local matrix and right-hand side into triplet/vector
    /// storage, eliminating constrained rows and columns. Constrained dofs
    /// receive a unit diagonal so the operator stays definite.
    pub fn distribute_local_to_global(
        &self,
        local_matrix: &na::DMatrix<f64>,
        local_rhs: &[f64],
        dofs: &[usize],
        triplets: &mut Vec<(usize, usize, f64)>,
        rhs: &mut [f64],
    ) {
        debug_assert!(self.closed);
        let resolution = self.resolution(dofs);
        for (i, &gi) in dofs.iter().enumerate() {
            for &(ri, wi) in &resolution[i] {
                rhs[ri] += wi * local_rhs[i];
                for (j, &gj) in dofs.iter().enumerate() {
                    let v = local_matrix[(i, j)];
                    if v == 0.0 {
                        continue;
                    }
                    for &(rj, wj) in &resolution[j] {
                        triplets.push((ri, rj, wi * wj * v));
                    }
                    if let Some(line) = self.lines.get(&gj) {
                        if line.inhomogeneity != 0.0 {
                            rhs[ri] -= wi * v * line.inhomogeneity;
                        }
                    }
                }
            }
            if self.is_constrained(gi) {
                triplets.push((gi, gi, 1.0));
            }
        }
    }

    /// Scatter a local matrix only (no right-hand side coupling).
    pub fn distribute_matrix(
        &self,
        local_matrix: &na::DMatrix<f64>,
        dofs: &[usize],
        triplets: &mut Vec<(usize, usize, f64)>,
    ) {
        debug_assert!(self.closed);
        let resolution = self.resolution(dofs);
        for (i, &gi) in dofs.iter().enumerate() {
            for &(ri, wi) in &resolution[i] {
                for (j, _) in dofs.iter().enumerate() {
                    let v = local_matrix[(i, j)];
                    if v == 0.0 {
                        continue;
                    }
                    for &(rj, wj) in &resolution[j] {
                        triplets.push((ri, rj, wi * wj * v));
                    }
                }
            }
            if self.is_constrained(gi) {
                triplets.push((gi, gi, 1.0));
            }
        }
    }

    /// Scatter a local vector, redirecting constrained contributions.
    pub fn distribute_vector(&self, local: &[f64], dofs: &[usize], global: &mut [f64]) {
        debug_assert!(self.closed);
        let resolution = self.resolution(dofs);
        for (i, _) in dofs.iter().enumerate() {
            for &(ri, wi) in &resolution[i] {
                global[ri] += wi * local[i];
            }
        }
    }

    /// Overwrite constrained entries with their constraint values.
    pub fn distribute(&self, x: &mut [f64]) {
        for (&dof, line) in &self.lines {
            let mut value = line.inhomogeneity;
            for &(target, weight) in &line.entries {
                value += weight * x[target];
            }
            x[dof] = value;
        }
    }

    /// Zero out constrained entries (used on solution vectors before a
    /// solve).
    pub fn set_zero(&self, x: &mut [f64]) {
        for &dof in self.lines.keys() {
            x[dof] = 0.0;
        }
    }
}

/// Tie each hanging vertex dof to the average of its face endpoints.
pub fn make_hanging_node_constraints(
    mesh: &QuadMesh,
    handler: &DofHandler,
    constraints: &mut Constraints,
) {
    for h in mesh.hanging_vertices() {
        let (Some(m), Some(a), Some(b)) = (
            handler.node_of_vertex(h.vertex),
            handler.node_of_vertex(h.parents[0]),
            handler.node_of_vertex(h.parents[1]),
        ) else {
            continue;
        };
        for c in 0..handler.n_components {
            let dof = handler.dof_of_node(m, c);
            constraints.add_line(dof);
            constraints.add_entry(dof, handler.dof_of_node(a, c), 0.5);
            constraints.add_entry(dof, handler.dof_of_node(b, c), 0.5);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn distribute_applies_lines() {
        let mut constraints = Constraints::new();
        constraints.add_line(2);
        constraints.add_entry(2, 0, 0.5);
        constraints.add_entry(2, 1, 0.5);
        constraints.add_line(3);
        constraints.set_inhomogeneity(3, 1.25);
        constraints.close();

        let mut x = vec![2.0, 4.0, 0.0, 0.0];
        constraints.distribute(&mut x);
        assert_relative_eq!(x[2], 3.0);
        assert_relative_eq!(x[3], 1.25);
    }

    #[test]
    fn close_resolves_chains() {
        // x2 = x1, x1 = 0.5 x0 + 1.0  =>  x2 = 0.5 x0 + 1.0.
        let mut constraints = Constraints::new();
        constraints.add_line(2);
        constraints.add_entry(2, 1, 1.0);
        constraints.add_line(1);
        constraints.add_entry(1, 0, 0.5);
        constraints.set_inhomogeneity(1, 1.0);
        constraints.close();

        let mut x = vec![4.0, 0.0, 0.0];
        constraints.distribute(&mut x);
        assert_relative_eq!(x[1], 3.0);
        assert_relative_eq!(x[2], 3.0);
    }

    #[test]
    fn elimination_preserves_the_solution() {
        // 1-D Laplace stencil on 4 dofs with x0 = 1, x3 = 0 via constraints.
        let mut constraints = Constraints::new();
        constraints.add_line(0);
        constraints.set_inhomogeneity(0, 1.0);
        constraints.add_line(3);
        constraints.close();

        let n = 4;
        let mut triplets = Vec::new();
        let mut rhs = vec![0.0; n];
        let local = na::DMatrix::from_row_slice(2, 2, &[1.0, -1.0, -1.0, 1.0]);
        let zero = [0.0, 0.0];
        for e in 0..3usize {
            constraints.distribute_local_to_global(
                &local,
                &zero,
                &[e, e + 1],
                &mut triplets,
                &mut rhs,
            );
        }
        let matrix = crate::linsolve::csr_from_triplets(n, n, &triplets);
        let mut x = vec![0.0; n];
        let mut b = rhs.clone();
        let mut cg = crate::linsolve::ConjugateGradient::new(n, 100, 1e-12);
        let result = cg.solve(
            |v, out| crate::linsolve::spmv(&matrix, v, out),
            &mut x,
            &mut b,
        );
        assert_eq!(result.status, crate::linsolve::Status::Success);
        constraints.distribute(&mut x);
        // Linear interpolation between the fixed ends.
        assert_relative_eq!(x[0], 1.0, epsilon = 1e-9);
        assert_relative_eq!(x[1], 2.0 / 3.0, epsilon = 1e-9);
        assert_relative_eq!(x[2], 1.0 / 3.0, epsilon = 1e-9);
        assert_relative_eq!(x[3], 0.0, epsilon = 1e-9);
    }
}
