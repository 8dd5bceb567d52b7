//! Quadrilateral mesh kernel.
//!
//! A quadtree over an axis-aligned box: base cells are laid out row-major,
//! refinement replaces an active cell with four children, and cell ids are
//! stable for the lifetime of the mesh (never reused), which is what the
//! interface store keys its records by. All active cells are rectangles, so
//! reference-to-physical maps stay diagonal.

use ahash::{AHashMap, AHashSet};

pub type CellId = usize;
pub type VertexId = usize;

pub const VERTICES_PER_CELL: usize = 4;
pub const FACES_PER_CELL: usize = 4;

/// Face endpoints as local vertex indices, in (bl, br, tl, tr) vertex order:
/// bottom, right, top, left.
pub const FACE_VERTICES: [[usize; 2]; FACES_PER_CELL] = [[0, 1], [1, 3], [2, 3], [0, 2]];

/// Outward unit normal of each face.
pub const FACE_NORMALS: [[f64; 2]; FACES_PER_CELL] =
    [[0.0, -1.0], [1.0, 0.0], [0.0, 1.0], [-1.0, 0.0]];

const QUANT: f64 = 1e9;
const GEOM_EPS: f64 = 1e-10;

#[derive(Clone, Debug)]
struct Cell {
    level: u32,
    vertices: [VertexId; VERTICES_PER_CELL],
    parent: Option<CellId>,
    children: Option<[CellId; 4]>,
    material_id: u32,
    subdomain: usize,
    active: bool,
}

/// A hanging vertex sits at the midpoint of a coarse face shared with two
/// finer neighbors; its nodal value is tied to the average of the face
/// endpoints.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HangingVertex {
    pub vertex: VertexId,
    pub parents: [VertexId; 2],
}

#[derive(Clone)]
pub struct QuadMesh {
    lower: [f64; 2],
    upper: [f64; 2],
    base_subdivisions: [usize; 2],
    vertices: Vec<[f64; 2]>,
    vertex_lookup: AHashMap<(i64, i64), VertexId>,
    /// Vertices a refinement-created vertex interpolates from (empty for base
    /// vertices). Used by the conservative solution transfer.
    vertex_parents: Vec<Vec<VertexId>>,
    cells: Vec<Cell>,
    active: Vec<CellId>,
    refine_flags: AHashSet<CellId>,
    coarsen_flags: AHashSet<CellId>,
}

impl QuadMesh {
    /// Build a structured mesh of `subdivisions` cells over the box
    /// `[lower, upper]`, all tagged with material id 1.
    pub fn subdivided_rectangle(
        lower: [f64; 2],
        upper: [f64; 2],
        subdivisions: [usize; 2],
    ) -> Self {
        assert!(upper[0] > lower[0] && upper[1] > lower[1]);
        assert!(subdivisions[0] > 0 && subdivisions[1] > 0);
        let mut mesh = QuadMesh {
            lower,
            upper,
            base_subdivisions: subdivisions,
            vertices: Vec::new(),
            vertex_lookup: AHashMap::new(),
            vertex_parents: Vec::new(),
            cells: Vec::new(),
            active: Vec::new(),
            refine_flags: AHashSet::new(),
            coarsen_flags: AHashSet::new(),
        };
        let [nx, ny] = subdivisions;
        let hx = (upper[0] - lower[0]) / nx as f64;
        let hy = (upper[1] - lower[1]) / ny as f64;
        let mut grid = vec![0; (nx + 1) * (ny + 1)];
        for iy in 0..=ny {
            for ix in 0..=nx {
                let pos = [lower[0] + ix as f64 * hx, lower[1] + iy as f64 * hy];
                grid[iy * (nx + 1) + ix] = mesh.get_or_create_vertex(pos, &[]);
            }
        }
        for iy in 0..ny {
            for ix in 0..nx {
                let v0 = grid[iy * (nx + 1) + ix];
                let v1 = grid[iy * (nx + 1) + ix + 1];
                let v2 = grid[(iy + 1) * (nx + 1) + ix];
                let v3 = grid[(iy + 1) * (nx + 1) + ix + 1];
                let id = mesh.cells.len();
                mesh.cells.push(Cell {
                    level: 0,
                    vertices: [v0, v1, v2, v3],
                    parent: None,
                    children: None,
                    material_id: 1,
                    subdomain: 0,
                    active: true,
                });
                mesh.active.push(id);
            }
        }
        mesh
    }

    pub fn n_active_cells(&self) -> usize {
        self.active.len()
    }

    pub fn n_vertices(&self) -> usize {
        self.vertices.len()
    }

    /// Active cells in deterministic (id) order.
    pub fn active_cells(&self) -> impl Iterator<Item = CellId> + '_ {
        self.active.iter().copied()
    }

    pub fn cell_vertices(&self, cell: CellId) -> [VertexId; VERTICES_PER_CELL] {
        self.cells[cell].vertices
    }

    pub fn vertex_position(&self, vertex: VertexId) -> [f64; 2] {
        self.vertices[vertex]
    }

    pub fn vertex_parents(&self, vertex: VertexId) -> &[VertexId] {
        &self.vertex_parents[vertex]
    }

    pub fn cell_level(&self, cell: CellId) -> u32 {
        self.cells[cell].level
    }

    pub fn cell_material(&self, cell: CellId) -> u32 {
        self.cells[cell].material_id
    }

    pub fn set_cell_material(&mut self, cell: CellId, material_id: u32) {
        self.cells[cell].material_id = material_id;
    }

    pub fn cell_subdomain(&self, cell: CellId) -> usize {
        self.cells[cell].subdomain
    }

    /// Assign contiguous blocks of active cells to `n_subdomains` processes.
    pub fn partition(&mut self, n_subdomains: usize) {
        let n = self.active.len();
        let n_subdomains = n_subdomains.max(1);
        let chunk = ((n + n_subdomains - 1) / n_subdomains).max(1);
        for (i, &cell) in self.active.clone().iter().enumerate() {
            self.cells[cell].subdomain = (i / chunk).min(n_subdomains - 1);
        }
    }

    /// Lower-left and upper-right corner of an active (rectangular) cell.
    pub fn cell_bounds(&self, cell: CellId) -> ([f64; 2], [f64; 2]) {
        let v = self.cells[cell].vertices;
        (self.vertices[v[0]], self.vertices[v[3]])
    }

    pub fn cell_center(&self, cell: CellId) -> [f64; 2] {
        let (lo, hi) = self.cell_bounds(cell);
        [0.5 * (lo[0] + hi[0]), 0.5 * (lo[1] + hi[1])]
    }

    pub fn cell_extent(&self, cell: CellId) -> [f64; 2] {
        let (lo, hi) = self.cell_bounds(cell);
        [hi[0] - lo[0], hi[1] - lo[1]]
    }

    /// Boundary id of a face lying on the domain box, `None` for interior
    /// faces. Ids follow the face-center geometry of the box: left 0,
    /// right 1, bottom 2, top 3.
    pub fn boundary_id(&self, cell: CellId, face: usize) -> Option<u32> {
        let [a, b] = FACE_VERTICES[face];
        let v = self.cells[cell].vertices;
        let pa = self.vertices[v[a]];
        let pb = self.vertices[v[b]];
        let on = |x: f64, target: f64| (x - target).abs() < GEOM_EPS;
        if on(pa[0], self.lower[0]) && on(pb[0], self.lower[0]) {
            Some(0)
        } else if on(pa[0], self.upper[0]) && on(pb[0], self.upper[0]) {
            Some(1)
        } else if on(pa[1], self.lower[1]) && on(pb[1], self.lower[1]) {
            Some(2)
        } else if on(pa[1], self.upper[1]) && on(pb[1], self.upper[1]) {
            Some(3)
        } else {
            None
        }
    }

    /// Set of vertices touched by at least one active cell.
    pub fn used_vertices(&self) -> AHashSet<VertexId> {
        let mut used = AHashSet::new();
        for &cell in &self.active {
            used.extend(self.cells[cell].vertices);
        }
        used
    }

    /// Enumerate hanging vertices from the coarse side of every refined face.
    pub fn hanging_vertices(&self) -> Vec<HangingVertex> {
        let used = self.used_vertices();
        let mut seen = AHashSet::new();
        let mut hanging = Vec::new();
        for &cell in &self.active {
            let v = self.cells[cell].vertices;
            for face in FACE_VERTICES {
                let a = v[face[0]];
                let b = v[face[1]];
                let pa = self.vertices[a];
                let pb = self.vertices[b];
                let mid = [0.5 * (pa[0] + pb[0]), 0.5 * (pa[1] + pb[1])];
                if let Some(&m) = self.vertex_lookup.get(&quantize(mid)) {
                    if used.contains(&m) && seen.insert(m) {
                        hanging.push(HangingVertex {
                            vertex: m,
                            parents: [a, b],
                        });
                    }
                }
            }
        }
        hanging
    }

    pub fn clear_flags(&mut self) {
        self.refine_flags.clear();
        self.coarsen_flags.clear();
    }

    pub fn flag_refine(&mut self, cell: CellId) {
        self.refine_flags.insert(cell);
    }

    pub fn flag_coarsen(&mut self, cell: CellId) {
        self.coarsen_flags.insert(cell);
    }

    /// Flag cells by the fixed-fraction rule: refine the smallest set of
    /// cells carrying `refine_fraction` of the total error, coarsen the
    /// largest set carrying no more than `coarsen_fraction` of it.
    ///
    /// `errors` is indexed in active-cell order.
    pub fn refine_and_coarsen_fixed_fraction(
        &mut self,
        errors: &[f64],
        refine_fraction: f64,
        coarsen_fraction: f64,
    ) {
        assert_eq!(errors.len(), self.active.len());
        let total: f64 = errors.iter().sum();
        let mut order: Vec<usize> = (0..errors.len()).collect();
        order.sort_by(|&i, &j| {
            errors[j]
                .partial_cmp(&errors[i])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let mut accumulated = 0.0;
        for &i in &order {
            if accumulated >= refine_fraction * total {
                break;
            }
            accumulated += errors[i];
            self.refine_flags.insert(self.active[i]);
        }
        let mut accumulated = 0.0;
        for &i in order.iter().rev() {
            accumulated += errors[i];
            if accumulated > coarsen_fraction * total {
                break;
            }
            self.coarsen_flags.insert(self.active[i]);
        }
    }

    /// Drop refine flags at or above `max_level` and coarsen flags at or
    /// below `min_level`.
    pub fn limit_flag_levels(&mut self, min_level: u32, max_level: u32) {
        let cells = &self.cells;
        self.refine_flags.retain(|&c| cells[c].level < max_level);
        self.coarsen_flags.retain(|&c| cells[c].level > min_level);
    }

    /// Apply the current flags: enforce 2:1 balance, coarsen eligible
    /// families, refine flagged cells, then clear all flags.
    pub fn execute_coarsening_and_refinement(&mut self) {
        self.balance_refine_flags();
        self.cancel_unsafe_coarsening();
        self.execute_coarsening();
        let to_refine: Vec<CellId> = {
            let mut v: Vec<CellId> = self.refine_flags.iter().copied().collect();
            v.sort_unstable();
            v
        };
        for cell in to_refine {
            if self.cells[cell].active {
                self.refine_cell(cell);
            }
        }
        self.rebuild_active();
        self.clear_flags();
    }

    /// Uniform refinement of every active cell, `times` over.
    pub fn refine_global(&mut self, times: u32) {
        for _ in 0..times {
            for cell in self.active.clone() {
                self.refine_cell(cell);
            }
            self.rebuild_active();
        }
    }

    /// Active cell containing `point`, found by quadtree descent from the
    /// base grid.
    pub fn locate(&self, point: [f64; 2]) -> Option<CellId> {
        let [nx, ny] = self.base_subdivisions;
        let fx = (point[0] - self.lower[0]) / (self.upper[0] - self.lower[0]);
        let fy = (point[1] - self.lower[1]) / (self.upper[1] - self.lower[1]);
        if !(-GEOM_EPS..=1.0 + GEOM_EPS).contains(&fx)
            || !(-GEOM_EPS..=1.0 + GEOM_EPS).contains(&fy)
        {
            return None;
        }
        let ix = ((fx * nx as f64) as usize).min(nx - 1);
        let iy = ((fy * ny as f64) as usize).min(ny - 1);
        let mut cell = iy * nx + ix;
        while let Some(children) = self.cells[cell].children {
            if self.cells[cell].active {
                break;
            }
            let center = self.cell_center(cell);
            let child = match (point[0] >= center[0], point[1] >= center[1]) {
                (false, false) => children[0],
                (true, false) => children[1],
                (false, true) => children[2],
                (true, true) => children[3],
            };
            cell = child;
        }
        Some(cell)
    }

    fn get_or_create_vertex(&mut self, pos: [f64; 2], parents: &[VertexId]) -> VertexId {
        let key = quantize(pos);
        if let Some(&v) = self.vertex_lookup.get(&key) {
            return v;
        }
        let v = self.vertices.len();
        self.vertices.push(pos);
        self.vertex_parents.push(parents.to_vec());
        self.vertex_lookup.insert(key, v);
        v
    }

    fn refine_cell(&mut self, cell: CellId) {
        debug_assert!(self.cells[cell].active);
        if let Some(children) = self.cells[cell].children {
            // A previously coarsened family: reactivate the children.
            self.cells[cell].active = false;
            for child in children {
                self.cells[child].active = true;
            }
            return;
        }
        let Cell {
            level,
            vertices: [v0, v1, v2, v3],
            material_id,
            subdomain,
            ..
        } = self.cells[cell];
        let (p0, p1, p2, p3) = (
            self.vertices[v0],
            self.vertices[v1],
            self.vertices[v2],
            self.vertices[v3],
        );
        let mid =
            |a: [f64; 2], b: [f64; 2]| [0.5 * (a[0] + b[0]), 0.5 * (a[1] + b[1])];
        let mb = self.get_or_create_vertex(mid(p0, p1), &[v0, v1]);
        let mr = self.get_or_create_vertex(mid(p1, p3), &[v1, v3]);
        let mt = self.get_or_create_vertex(mid(p2, p3), &[v2, v3]);
        let ml = self.get_or_create_vertex(mid(p0, p2), &[v0, v2]);
        let cc = self.get_or_create_vertex(mid(p0, p3), &[v0, v1, v2, v3]);

        let child_vertices = [
            [v0, mb, ml, cc],
            [mb, v1, cc, mr],
            [ml, cc, v2, mt],
            [cc, mr, mt, v3],
        ];
        let mut children = [0; 4];
        for (slot, verts) in child_vertices.into_iter().enumerate() {
            let id = self.cells.len();
            self.cells.push(Cell {
                level: level + 1,
                vertices: verts,
                parent: Some(cell),
                children: None,
                material_id,
                subdomain,
                active: true,
            });
            children[slot] = id;
        }
        let parent = &mut self.cells[cell];
        parent.children = Some(children);
        parent.active = false;
    }

    fn rebuild_active(&mut self) {
        self.active = (0..self.cells.len())
            .filter(|&c| self.cells[c].active)
            .collect();
    }

    /// Two active cells are edge neighbors when their boxes touch along a
    /// segment of positive length.
    fn edge_adjacent(&self, a: CellId, b: CellId) -> bool {
        let (alo, ahi) = self.cell_bounds(a);
        let (blo, bhi) = self.cell_bounds(b);
        let touch_x = (ahi[0] - blo[0]).abs() < GEOM_EPS || (bhi[0] - alo[0]).abs() < GEOM_EPS;
        let touch_y = (ahi[1] - blo[1]).abs() < GEOM_EPS || (bhi[1] - alo[1]).abs() < GEOM_EPS;
        let overlap_x = ahi[0].min(bhi[0]) - alo[0].max(blo[0]) > GEOM_EPS;
        let overlap_y = ahi[1].min(bhi[1]) - alo[1].max(blo[1]) > GEOM_EPS;
        (touch_x && overlap_y) || (touch_y && overlap_x)
    }

    /// Propagate refine flags so that no two edge neighbors end up more than
    /// one level apart.
    fn balance_refine_flags(&mut self) {
        loop {
            let mut added = Vec::new();
            for &cell in &self.refine_flags {
                for &other in &self.active {
                    if other != cell
                        && self.cells[other].level < self.cells[cell].level
                        && !self.refine_flags.contains(&other)
                        && self.edge_adjacent(cell, other)
                    {
                        added.push(other);
                    }
                }
            }
            if added.is_empty() {
                break;
            }
            self.refine_flags.extend(added);
        }
    }

    fn cancel_unsafe_coarsening(&mut self) {
        let mut keep = AHashSet::new();
        let flagged = self.coarsen_flags.clone();
        for &cell in &flagged {
            if !self.cells[cell].active || self.refine_flags.contains(&cell) {
                continue;
            }
            let Some(parent) = self.cells[cell].parent else {
                continue;
            };
            let children = self.cells[parent].children.expect("parent has children");
            // The whole family must be active and flagged.
            if !children
                .iter()
                .all(|&ch| self.cells[ch].active && flagged.contains(&ch))
            {
                continue;
            }
            // Coarsening must not break the 2:1 balance with finer neighbors.
            let child_level = self.cells[cell].level;
            let safe = children.iter().all(|&ch| {
                self.active.iter().all(|&other| {
                    !self.edge_adjacent(ch, other)
                        || (self.cells[other].level <= child_level
                            && !self.refine_flags.contains(&other))
                })
            });
            if safe {
                keep.extend(children);
            }
        }
        self.coarsen_flags = keep;
    }

    fn execute_coarsening(&mut self) {
        let flagged = std::mem::take(&mut self.coarsen_flags);
        let mut parents: Vec<CellId> = flagged
            .iter()
            .filter_map(|&c| self.cells[c].parent)
            .collect();
        parents.sort_unstable();
        parents.dedup();
        for parent in parents {
            let children = self.cells[parent].children.expect("parent has children");
            if children.iter().all(|&ch| flagged.contains(&ch)) {
                for child in children {
                    self.cells[child].active = false;
                }
                self.cells[parent].active = true;
            }
        }
    }
}

fn quantize(pos: [f64; 2]) -> (i64, i64) {
    ((pos[0] * QUANT).round() as i64, (pos[1] * QUANT).round() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structured_counts() {
        let mesh = QuadMesh::subdivided_rectangle([0.0, 0.0], [2.0, 1.0], [4, 2]);
        assert_eq!(mesh.n_active_cells(), 8);
        assert_eq!(mesh.n_vertices(), 15);
    }

    #[test]
    fn global_refinement_quadruples_cells() {
        let mut mesh = QuadMesh::subdivided_rectangle([0.0, 0.0], [1.0, 1.0], [2, 2]);
        mesh.refine_global(2);
        assert_eq!(mesh.n_active_cells(), 64);
    }

    #[test]
    fn boundary_ids_follow_box_sides() {
        let mesh = QuadMesh::subdivided_rectangle([0.0, 0.0], [1.5, 0.5], [3, 1]);
        let mut counts = [0usize; 4];
        for cell in mesh.active_cells() {
            for face in 0..FACES_PER_CELL {
                if let Some(id) = mesh.boundary_id(cell, face) {
                    counts[id as usize] += 1;
                }
            }
        }
        // 1 face each on left/right, 3 each on bottom/top.
        assert_eq!(counts, [1, 1, 3, 3]);
    }

    #[test]
    fn adaptive_refinement_creates_hanging_vertices() {
        let mut mesh = QuadMesh::subdivided_rectangle([0.0, 0.0], [1.0, 1.0], [2, 2]);
        mesh.flag_refine(0);
        mesh.execute_coarsening_and_refinement();
        assert_eq!(mesh.n_active_cells(), 7);
        let hanging = mesh.hanging_vertices();
        // One hanging vertex on each interior face of the refined cell.
        assert_eq!(hanging.len(), 2);
        for h in hanging {
            let mid = mesh.vertex_position(h.vertex);
            let pa = mesh.vertex_position(h.parents[0]);
            let pb = mesh.vertex_position(h.parents[1]);
            assert!((mid[0] - 0.5 * (pa[0] + pb[0])).abs() < 1e-12);
            assert!((mid[1] - 0.5 * (pa[1] + pb[1])).abs() < 1e-12);
        }
    }

    #[test]
    fn balance_keeps_one_level_jumps() {
        let mut mesh = QuadMesh::subdivided_rectangle([0.0, 0.0], [1.0, 1.0], [2, 2]);
        mesh.flag_refine(0);
        mesh.execute_coarsening_and_refinement();
        // Refining a child of cell 0 must drag its coarse neighbors along.
        let fine: Vec<CellId> = mesh
            .active_cells()
            .filter(|&c| mesh.cell_level(c) == 1)
            .collect();
        mesh.flag_refine(fine[3]);
        mesh.execute_coarsening_and_refinement();
        let levels: Vec<u32> = mesh.active_cells().map(|c| mesh.cell_level(c)).collect();
        for &cell in mesh.active.iter() {
            for &other in mesh.active.iter() {
                if mesh.edge_adjacent(cell, other) {
                    let da = mesh.cells[cell].level as i64 - mesh.cells[other].level as i64;
                    assert!(da.abs() <= 1, "unbalanced mesh: levels {:?}", levels);
                }
            }
        }
    }

    #[test]
    fn coarsening_restores_parent() {
        let mut mesh = QuadMesh::subdivided_rectangle([0.0, 0.0], [1.0, 1.0], [1, 1]);
        mesh.refine_global(1);
        assert_eq!(mesh.n_active_cells(), 4);
        for cell in mesh.active.clone() {
            mesh.flag_coarsen(cell);
        }
        mesh.execute_coarsening_and_refinement();
        assert_eq!(mesh.n_active_cells(), 1);
        assert_eq!(mesh.cell_level(mesh.active_cells().next().unwrap()), 0);
    }

    #[test]
    fn locate_descends_to_active_cells() {
        let mut mesh = QuadMesh::subdivided_rectangle([0.0, 0.0], [1.0, 1.0], [2, 2]);
        mesh.flag_refine(0);
        mesh.execute_coarsening_and_refinement();
        let cell = mesh.locate([0.1, 0.1]).unwrap();
        assert_eq!(mesh.cell_level(cell), 1);
        assert!(mesh.locate([1.2, 0.5]).is_none());
        let coarse = mesh.locate([0.75, 0.75]).unwrap();
        assert_eq!(mesh.cell_level(coarse), 0);
    }
}
