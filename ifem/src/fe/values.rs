//! Shape evaluation on mesh cells and faces.
//!
//! Active cells are axis-aligned rectangles, so the reference map is diagonal
//! and the Jacobian is constant per cell.

use crate::fe::quadrature::{gauss_1d, GaussRule};
use crate::fe::shape::{nodes_per_cell, shape_grad, shape_value};
use crate::mesh::{CellId, QuadMesh, FACE_NORMALS};

/// Volume quadrature evaluator for one element order.
pub struct FeValues {
    order: usize,
    quad: GaussRule,
    ref_values: Vec<Vec<f64>>,
    ref_grads: Vec<Vec<[f64; 2]>>,
    // Per-cell state set by `reinit`.
    origin: [f64; 2],
    extent: [f64; 2],
}

impl FeValues {
    pub fn new(order: usize, n_gauss_1d: usize) -> Self {
        let quad = GaussRule::tensor(n_gauss_1d);
        let n_nodes = nodes_per_cell(order);
        let ref_values = quad
            .points
            .iter()
            .map(|p| (0..n_nodes).map(|n| shape_value(order, n, p[0], p[1])).collect())
            .collect();
        let ref_grads = quad
            .points
            .iter()
            .map(|p| (0..n_nodes).map(|n| shape_grad(order, n, p[0], p[1])).collect())
            .collect();
        FeValues {
            order,
            quad,
            ref_values,
            ref_grads,
            origin: [0.0; 2],
            extent: [1.0; 2],
        }
    }

    pub fn reinit(&mut self, mesh: &QuadMesh, cell: CellId) {
        let (lo, hi) = mesh.cell_bounds(cell);
        self.origin = lo;
        self.extent = [hi[0] - lo[0], hi[1] - lo[1]];
    }

    pub fn n_nodes(&self) -> usize {
        nodes_per_cell(self.order)
    }

    pub fn n_quad_points(&self) -> usize {
        self.quad.len()
    }

    pub fn value(&self, node: usize, q: usize) -> f64 {
        self.ref_values[q][node]
    }

    /// Physical gradient of shape function `node` at quadrature point `q`.
    pub fn grad(&self, node: usize, q: usize) -> [f64; 2] {
        let g = self.ref_grads[q][node];
        [2.0 * g[0] / self.extent[0], 2.0 * g[1] / self.extent[1]]
    }

    pub fn jxw(&self, q: usize) -> f64 {
        0.25 * self.extent[0] * self.extent[1] * self.quad.weights[q]
    }

    /// Physical location of quadrature point `q`.
    pub fn quad_point(&self, q: usize) -> [f64; 2] {
        let p = self.quad.points[q];
        [
            self.origin[0] + 0.5 * (p[0] + 1.0) * self.extent[0],
            self.origin[1] + 0.5 * (p[1] + 1.0) * self.extent[1],
        ]
    }

    /// Interpolate a scalar field given its nodal values on this cell.
    pub fn function_value(&self, nodal: &[f64], q: usize) -> f64 {
        nodal
            .iter()
            .enumerate()
            .map(|(n, &u)| u * self.value(n, q))
            .sum()
    }

    /// Interpolate the gradient of a scalar field given nodal values.
    pub fn function_grad(&self, nodal: &[f64], q: usize) -> [f64; 2] {
        let mut grad = [0.0; 2];
        for (n, &u) in nodal.iter().enumerate() {
            let g = self.grad(n, q);
            grad[0] += u * g[0];
            grad[1] += u * g[1];
        }
        grad
    }
}

/// Face quadrature evaluator: 1-D Gauss points on one face of a cell, with
/// the cell's shape functions restricted to it.
pub struct FeFaceValues {
    order: usize,
    line: Vec<(f64, f64)>,
    values: Vec<Vec<f64>>,
    grads: Vec<Vec<[f64; 2]>>,
    face: usize,
    origin: [f64; 2],
    extent: [f64; 2],
}

impl FeFaceValues {
    pub fn new(order: usize, n_gauss_1d: usize) -> Self {
        FeFaceValues {
            order,
            line: gauss_1d(n_gauss_1d),
            values: Vec::new(),
            grads: Vec::new(),
            face: 0,
            origin: [0.0; 2],
            extent: [1.0; 2],
        }
    }

    pub fn reinit(&mut self, mesh: &QuadMesh, cell: CellId, face: usize) {
        let (lo, hi) = mesh.cell_bounds(cell);
        self.origin = lo;
        self.extent = [hi[0] - lo[0], hi[1] - lo[1]];
        self.face = face;
        let n_nodes = nodes_per_cell(self.order);
        self.values.clear();
        self.grads.clear();
        for &(t, _) in &self.line {
            let [xi, eta] = face_reference_point(face, t);
            self.values
                .push((0..n_nodes).map(|n| shape_value(self.order, n, xi, eta)).collect());
            self.grads
                .push((0..n_nodes).map(|n| shape_grad(self.order, n, xi, eta)).collect());
        }
    }

    pub fn n_nodes(&self) -> usize {
        nodes_per_cell(self.order)
    }

    pub fn n_quad_points(&self) -> usize {
        self.line.len()
    }

    pub fn value(&self, node: usize, q: usize) -> f64 {
        self.values[q][node]
    }

    pub fn grad(&self, node: usize, q: usize) -> [f64; 2] {
        let g = self.grads[q][node];
        [2.0 * g[0] / self.extent[0], 2.0 * g[1] / self.extent[1]]
    }

    pub fn jxw(&self, q: usize) -> f64 {
        let len = match self.face {
            0 | 2 => self.extent[0],
            _ => self.extent[1],
        };
        0.5 * len * self.line[q].1
    }

    pub fn normal(&self) -> [f64; 2] {
        FACE_NORMALS[self.face]
    }

    pub fn quad_point(&self, q: usize) -> [f64; 2] {
        let [xi, eta] = face_reference_point(self.face, self.line[q].0);
        [
            self.origin[0] + 0.5 * (xi + 1.0) * self.extent[0],
            self.origin[1] + 0.5 * (eta + 1.0) * self.extent[1],
        ]
    }

    pub fn function_value(&self, nodal: &[f64], q: usize) -> f64 {
        nodal
            .iter()
            .enumerate()
            .map(|(n, &u)| u * self.value(n, q))
            .sum()
    }

    pub fn function_grad(&self, nodal: &[f64], q: usize) -> [f64; 2] {
        let mut grad = [0.0; 2];
        for (n, &u) in nodal.iter().enumerate() {
            let g = self.grad(n, q);
            grad[0] += u * g[0];
            grad[1] += u * g[1];
        }
        grad
    }
}

fn face_reference_point(face: usize, t: f64) -> [f64; 2] {
    match face {
        0 => [t, -1.0],
        1 => [1.0, t],
        2 => [t, 1.0],
        3 => [-1.0, t],
        _ => panic!("face index out of range"),
    }
}

/// Evaluate shape functions of a cell at an arbitrary physical point.
///
/// Used by the orchestrator's projections between the solid discretization
/// and the shared fluid representation.
pub fn values_at_point(
    mesh: &QuadMesh,
    cell: CellId,
    order: usize,
    point: [f64; 2],
) -> Vec<f64> {
    let (lo, hi) = mesh.cell_bounds(cell);
    let xi = 2.0 * (point[0] - lo[0]) / (hi[0] - lo[0]) - 1.0;
    let eta = 2.0 * (point[1] - lo[1]) / (hi[1] - lo[1]) - 1.0;
    let xi = xi.clamp(-1.0, 1.0);
    let eta = eta.clamp(-1.0, 1.0);
    (0..nodes_per_cell(order))
        .map(|n| shape_value(order, n, xi, eta))
        .collect()
}

/// Physical shape gradients of a cell at an arbitrary physical point.
pub fn grads_at_point(
    mesh: &QuadMesh,
    cell: CellId,
    order: usize,
    point: [f64; 2],
) -> Vec<[f64; 2]> {
    let (lo, hi) = mesh.cell_bounds(cell);
    let hx = hi[0] - lo[0];
    let hy = hi[1] - lo[1];
    let xi = (2.0 * (point[0] - lo[0]) / hx - 1.0).clamp(-1.0, 1.0);
    let eta = (2.0 * (point[1] - lo[1]) / hy - 1.0).clamp(-1.0, 1.0);
    (0..nodes_per_cell(order))
        .map(|n| {
            let g = shape_grad(order, n, xi, eta);
            [2.0 * g[0] / hx, 2.0 * g[1] / hy]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::FACES_PER_CELL;
    use approx::assert_relative_eq;

    #[test]
    fn cell_measures() {
        let mesh = crate::mesh::QuadMesh::subdivided_rectangle([0.0, 0.0], [2.0, 1.0], [2, 1]);
        let mut fe = FeValues::new(1, 2);
        for cell in mesh.active_cells() {
            fe.reinit(&mesh, cell);
            let area: f64 = (0..fe.n_quad_points()).map(|q| fe.jxw(q)).sum();
            assert_relative_eq!(area, 1.0, max_relative = 1e-14);
        }
    }

    #[test]
    fn face_measures_and_normals() {
        let mesh = crate::mesh::QuadMesh::subdivided_rectangle([0.0, 0.0], [2.0, 1.0], [1, 1]);
        let mut fe = FeFaceValues::new(1, 2);
        let cell = mesh.active_cells().next().unwrap();
        let expected_len = [2.0, 1.0, 2.0, 1.0];
        for face in 0..FACES_PER_CELL {
            fe.reinit(&mesh, cell, face);
            let len: f64 = (0..fe.n_quad_points()).map(|q| fe.jxw(q)).sum();
            assert_relative_eq!(len, expected_len[face], max_relative = 1e-14);
            let n = fe.normal();
            assert_relative_eq!(n[0] * n[0] + n[1] * n[1], 1.0, max_relative = 1e-14);
        }
    }

    #[test]
    fn interpolates_linear_fields_exactly() {
        let mesh = crate::mesh::QuadMesh::subdivided_rectangle([0.0, 0.0], [1.0, 1.0], [1, 1]);
        let cell = mesh.active_cells().next().unwrap();
        let mut fe = FeValues::new(1, 2);
        fe.reinit(&mesh, cell);
        // u = 2x + 3y at the cell's vertices (bl, br, tl, tr).
        let nodal = [0.0, 2.0, 3.0, 5.0];
        for q in 0..fe.n_quad_points() {
            let p = fe.quad_point(q);
            assert_relative_eq!(
                fe.function_value(&nodal, q),
                2.0 * p[0] + 3.0 * p[1],
                max_relative = 1e-13
            );
            let g = fe.function_grad(&nodal, q);
            assert_relative_eq!(g[0], 2.0, max_relative = 1e-13);
            assert_relative_eq!(g[1], 3.0, max_relative = 1e-13);
        }
    }
}
