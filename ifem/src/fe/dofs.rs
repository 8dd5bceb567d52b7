//! Degree-of-freedom enumeration and distributed partition descriptors.

use ahash::AHashMap;

use crate::mesh::{CellId, QuadMesh, VertexId};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
enum EntityKey {
    Vertex(VertexId),
    Edge(VertexId, VertexId),
    Cell(CellId),
}

/// Nodes (support points) of a Qk space over the active cells of a mesh,
/// with `n_components` dofs per node, numbered node-major.
pub struct DofHandler {
    pub order: usize,
    pub n_components: usize,
    n_nodes: usize,
    cell_nodes: AHashMap<CellId, Vec<usize>>,
    node_positions: Vec<[f64; 2]>,
    vertex_node: AHashMap<VertexId, usize>,
    node_vertex: Vec<Option<VertexId>>,
    node_owner: Vec<usize>,
}

impl DofHandler {
    /// Enumerate dofs over the active cells in deterministic cell order.
    pub fn distribute(mesh: &QuadMesh, order: usize, n_components: usize) -> Self {
        assert!(order == 1 || order == 2);
        let mut entity_node: AHashMap<EntityKey, usize> = AHashMap::new();
        let mut node_positions = Vec::new();
        let mut node_owner = Vec::new();
        let mut vertex_node = AHashMap::new();
        let mut node_vertex = Vec::new();
        let mut cell_nodes = AHashMap::new();

        for cell in mesh.active_cells() {
            let subdomain = mesh.cell_subdomain(cell);
            let nodes: Vec<usize> = cell_entities(mesh, cell, order)
                .into_iter()
                .map(|(key, pos)| {
                    let next = node_positions.len();
                    let node = *entity_node.entry(key).or_insert_with(|| {
                        node_positions.push(pos);
                        node_owner.push(subdomain);
                        if let EntityKey::Vertex(v) = key {
                            vertex_node.insert(v, next);
                            node_vertex.push(Some(v));
                        } else {
                            node_vertex.push(None);
                        }
                        next
                    });
                    // A dof is owned by the lowest-rank process touching it.
                    node_owner[node] = node_owner[node].min(subdomain);
                    node
                })
                .collect();
            cell_nodes.insert(cell, nodes);
        }
        DofHandler {
            order,
            n_components,
            n_nodes: node_positions.len(),
            cell_nodes,
            node_positions,
            vertex_node,
            node_vertex,
            node_owner,
        }
    }

    pub fn n_nodes(&self) -> usize {
        self.n_nodes
    }

    pub fn n_dofs(&self) -> usize {
        self.n_nodes * self.n_components
    }

    pub fn dof_of_node(&self, node: usize, component: usize) -> usize {
        node * self.n_components + component
    }

    /// Component of a global dof index.
    pub fn component_of_dof(&self, dof: usize) -> usize {
        dof % self.n_components
    }

    pub fn node_of_dof(&self, dof: usize) -> usize {
        dof / self.n_components
    }

    pub fn node_position(&self, node: usize) -> [f64; 2] {
        self.node_positions[node]
    }

    pub fn node_owner(&self, node: usize) -> usize {
        self.node_owner[node]
    }

    pub fn node_of_vertex(&self, vertex: VertexId) -> Option<usize> {
        self.vertex_node.get(&vertex).copied()
    }

    /// Mesh vertex backing a node, `None` for edge/cell interior nodes.
    pub fn vertex_of_node(&self, node: usize) -> Option<VertexId> {
        self.node_vertex[node]
    }

    /// Node indices of a cell in local (lexicographic) order.
    pub fn cell_node_indices(&self, cell: CellId) -> &[usize] {
        &self.cell_nodes[&cell]
    }

    /// Global dof indices of a cell, node-major with components consecutive.
    pub fn cell_dof_indices(&self, cell: CellId) -> Vec<usize> {
        let nodes = &self.cell_nodes[&cell];
        let mut dofs = Vec::with_capacity(nodes.len() * self.n_components);
        for &node in nodes {
            for c in 0..self.n_components {
                dofs.push(self.dof_of_node(node, c));
            }
        }
        dofs
    }

    /// Nodes lying on the given box-boundary side of the mesh.
    pub fn boundary_nodes(&self, mesh: &QuadMesh, boundary_id: u32) -> Vec<usize> {
        let mut nodes = Vec::new();
        let mut seen = vec![false; self.n_nodes];
        for cell in mesh.active_cells() {
            for face in 0..crate::mesh::FACES_PER_CELL {
                if mesh.boundary_id(cell, face) != Some(boundary_id) {
                    continue;
                }
                for &node in &self.cell_nodes[&cell] {
                    if seen[node] {
                        continue;
                    }
                    if node_on_face(self.node_positions[node], mesh, cell, face) {
                        seen[node] = true;
                        nodes.push(node);
                    }
                }
            }
        }
        nodes.sort_unstable();
        nodes
    }
}

fn node_on_face(pos: [f64; 2], mesh: &QuadMesh, cell: CellId, face: usize) -> bool {
    let (lo, hi) = mesh.cell_bounds(cell);
    let eps = 1e-10;
    match face {
        0 => (pos[1] - lo[1]).abs() < eps,
        1 => (pos[0] - hi[0]).abs() < eps,
        2 => (pos[1] - hi[1]).abs() < eps,
        3 => (pos[0] - lo[0]).abs() < eps,
        _ => false,
    }
}

fn cell_entities(mesh: &QuadMesh, cell: CellId, order: usize) -> Vec<(EntityKey, [f64; 2])> {
    let v = mesh.cell_vertices(cell);
    let p = |a: VertexId| mesh.vertex_position(a);
    let mid = |a: VertexId, b: VertexId| {
        let (pa, pb) = (p(a), p(b));
        [0.5 * (pa[0] + pb[0]), 0.5 * (pa[1] + pb[1])]
    };
    let edge = |a: VertexId, b: VertexId| EntityKey::Edge(a.min(b), a.max(b));
    match order {
        1 => v.iter().map(|&a| (EntityKey::Vertex(a), p(a))).collect(),
        2 => vec![
            (EntityKey::Vertex(v[0]), p(v[0])),
            (edge(v[0], v[1]), mid(v[0], v[1])),
            (EntityKey::Vertex(v[1]), p(v[1])),
            (edge(v[0], v[2]), mid(v[0], v[2])),
            (EntityKey::Cell(cell), mesh.cell_center(cell)),
            (edge(v[1], v[3]), mid(v[1], v[3])),
            (EntityKey::Vertex(v[2]), p(v[2])),
            (edge(v[2], v[3]), mid(v[2], v[3])),
            (EntityKey::Vertex(v[3]), p(v[3])),
        ],
        _ => panic!("unsupported element order {}", order),
    }
}

/// Owned and ghost-extended ("relevant") dof index sets of one process.
///
/// Owned sets partition the global index space; the relevant set additionally
/// contains every index touched by locally owned cells.
#[derive(Clone, Debug)]
pub struct IndexPartition {
    pub owned: Vec<usize>,
    pub relevant: Vec<usize>,
}

impl IndexPartition {
    pub fn build(handler: &DofHandler, mesh: &QuadMesh, rank: usize) -> Self {
        let mut owned = Vec::new();
        for node in 0..handler.n_nodes() {
            if handler.node_owner(node) == rank {
                for c in 0..handler.n_components {
                    owned.push(handler.dof_of_node(node, c));
                }
            }
        }
        let mut relevant = Vec::new();
        for cell in mesh.active_cells() {
            if mesh.cell_subdomain(cell) == rank {
                relevant.extend(handler.cell_dof_indices(cell));
            }
        }
        owned.sort_unstable();
        relevant.sort_unstable();
        relevant.dedup();
        IndexPartition { owned, relevant }
    }

    pub fn is_owned(&self, dof: usize) -> bool {
        self.owned.binary_search(&dof).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn q1_dof_counts() {
        let mesh = QuadMesh::subdivided_rectangle([0.0, 0.0], [1.0, 1.0], [2, 2]);
        let handler = DofHandler::distribute(&mesh, 1, 2);
        assert_eq!(handler.n_nodes(), 9);
        assert_eq!(handler.n_dofs(), 18);
    }

    #[test]
    fn q2_dof_counts() {
        let mesh = QuadMesh::subdivided_rectangle([0.0, 0.0], [1.0, 1.0], [2, 2]);
        let handler = DofHandler::distribute(&mesh, 2, 1);
        // (2*2+1)^2 nodes for Q2 on a 2x2 grid.
        assert_eq!(handler.n_nodes(), 25);
    }

    #[test]
    fn shared_nodes_are_deduplicated() {
        let mesh = QuadMesh::subdivided_rectangle([0.0, 0.0], [1.0, 1.0], [2, 1]);
        let handler = DofHandler::distribute(&mesh, 2, 1);
        // 15 Q2 nodes: 6 vertices, 7 edges, 2 centers.
        assert_eq!(handler.n_nodes(), 15);
        let cells: Vec<_> = mesh.active_cells().collect();
        let left = handler.cell_node_indices(cells[0]);
        let right = handler.cell_node_indices(cells[1]);
        // Right edge of the left cell is the left edge of the right cell.
        assert_eq!(left[5], right[3]);
        assert_eq!(left[2], right[0]);
        assert_eq!(left[8], right[6]);
    }

    #[test]
    fn owned_sets_partition_the_dofs() {
        let mut mesh = QuadMesh::subdivided_rectangle([0.0, 0.0], [1.0, 1.0], [4, 4]);
        mesh.partition(3);
        let handler = DofHandler::distribute(&mesh, 1, 1);
        let partitions: Vec<_> = (0..3)
            .map(|rank| IndexPartition::build(&handler, &mesh, rank))
            .collect();
        let total: usize = partitions.iter().map(|p| p.owned.len()).sum();
        assert_eq!(total, handler.n_dofs());
        for p in &partitions {
            for &dof in &p.owned {
                assert!(p.relevant.binary_search(&dof).is_ok());
            }
        }
    }

    #[test]
    fn boundary_nodes_lie_on_the_side() {
        let mesh = QuadMesh::subdivided_rectangle([0.0, 0.0], [1.0, 1.0], [2, 2]);
        let handler = DofHandler::distribute(&mesh, 2, 1);
        let left = handler.boundary_nodes(&mesh, 0);
        // 5 Q2 nodes along x = 0.
        assert_eq!(left.len(), 5);
        for node in left {
            assert!(handler.node_position(node)[0].abs() < 1e-12);
        }
    }
}
