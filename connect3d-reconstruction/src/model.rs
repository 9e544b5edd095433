//! Shared reconstruction state
//!
//! `Model` owns the tetrahedralization plus one arena record per
//! combinatorial triangle and edge. Records are addressed by integer
//! handles; the per-cell lookup tables map any half-triangle or
//! half-edge to its record in O(1).

use crate::criterion::{triangle_criterion, Criterion};
use connect3d_core::{Error, Point3d, Result};
use connect3d_delaunay::{
    CellEdge, CellId, Facet, Tetrahedralization, VertexId, EDGE_VERTS,
};
use std::collections::{HashMap, HashSet};

/// Handle of a triangle record in the model arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TriangleId(pub u32);

impl TriangleId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Handle of an edge record in the model arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeId(pub u32);

impl EdgeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Non-conformity classification of a vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NcType {
    #[default]
    Conform,
    VertexConnected,
    NonPlanar,
    Isolated,
}

/// One triangle of the tetrahedralization. `edges[i]` is opposite
/// `verts[i]`.
#[derive(Debug, Clone)]
pub struct TriangleRec {
    pub verts: [VertexId; 3],
    pub edges: [EdgeId; 3],
    pub facet: Facet,
    pub finite: bool,
    pub exists: bool,
    pub open: bool,
    pub label: i32,
}

/// One edge of the tetrahedralization, shared by all cells around it.
#[derive(Debug, Clone)]
pub struct EdgeRec {
    pub verts: [VertexId; 2],
    pub rep: CellEdge,
    pub finite: bool,
    pub open: bool,
    pub nc: bool,
}

/// Mutable classification state of a vertex.
#[derive(Debug, Clone, Copy, Default)]
pub struct VertexState {
    pub open: bool,
    pub nc_type: NcType,
}

impl VertexState {
    pub fn is_nc(&self) -> bool {
        self.nc_type != NcType::Conform
    }
}

// slot of the cell edge (s, t) in the per-cell edge table
const EDGE_SLOT: [[usize; 4]; 4] = [
    [usize::MAX, 0, 1, 2],
    [0, usize::MAX, 3, 4],
    [1, 3, usize::MAX, 5],
    [2, 4, 5, usize::MAX],
];

/// Process-wide reconstruction state.
pub struct Model {
    pub dt: Tetrahedralization,
    pub triangles: Vec<TriangleRec>,
    pub edges: Vec<EdgeRec>,
    pub vertex_state: Vec<VertexState>,
    pub labels: Vec<i32>,
    pub criterion: Criterion,
    pub next_label: i32,
    cell_tris: Vec<[TriangleId; 4]>,
    cell_edges: Vec<[EdgeId; 6]>,
}

impl Model {
    /// Deduplicate exactly-equal coordinates, preserving first
    /// occurrence order.
    pub fn dedup_points(points: &[Point3d]) -> Vec<Point3d> {
        let mut seen: HashSet<[u64; 3]> = HashSet::new();
        let mut unique = Vec::with_capacity(points.len());

        for p in points {
            let key = [p.x.to_bits(), p.y.to_bits(), p.z.to_bits()];
            if seen.insert(key) {
                unique.push(*p);
            }
        }

        unique
    }

    /// Build the tetrahedralization and all triangle/edge records.
    pub fn build(points: Vec<Point3d>, criterion: Criterion) -> Result<Self> {
        let dt = Tetrahedralization::build(&points)?;

        if dt.num_vertices() != points.len() {
            return Err(Error::Internal(
                "tetrahedralization dropped input vertices".to_string(),
            ));
        }

        let num_cells = dt.num_cells();
        let mut triangles = Vec::new();
        let mut edges: Vec<EdgeRec> = Vec::new();
        let mut cell_tris = vec![[TriangleId(u32::MAX); 4]; num_cells];
        let mut cell_edges = vec![[EdgeId(u32::MAX); 6]; num_cells];
        let mut edge_map: HashMap<(VertexId, VertexId), EdgeId> = HashMap::new();

        // one traversal creates every record and links both directions
        for c in dt.cell_ids() {
            for [s, t] in EDGE_VERTS {
                let he = CellEdge::new(c, s, t);
                let (a, b) = dt.edge_vertices(he);
                let key = (a.min(b), a.max(b));

                let eid = *edge_map.entry(key).or_insert_with(|| {
                    let id = EdgeId(edges.len() as u32);
                    edges.push(EdgeRec {
                        verts: [key.0, key.1],
                        rep: he,
                        finite: !a.is_infinite() && !b.is_infinite(),
                        open: false,
                        nc: false,
                    });
                    id
                });

                cell_edges[c.index()][EDGE_SLOT[s as usize][t as usize]] = eid;
            }

            for i in 0..4u8 {
                let f = Facet::new(c, i);
                let m = dt.mirror_facet(f);

                if (f.cell, f.idx) <= (m.cell, m.idx) {
                    let verts = dt.facet_vertices(f);
                    let tid = TriangleId(triangles.len() as u32);

                    let tri_edges = [
                        edge_key_lookup(&edge_map, verts[1], verts[2]),
                        edge_key_lookup(&edge_map, verts[2], verts[0]),
                        edge_key_lookup(&edge_map, verts[0], verts[1]),
                    ];

                    triangles.push(TriangleRec {
                        verts,
                        edges: tri_edges,
                        facet: f,
                        finite: verts.iter().all(|v| !v.is_infinite()),
                        exists: false,
                        open: false,
                        label: -1,
                    });

                    cell_tris[f.cell.index()][f.idx as usize] = tid;
                    cell_tris[m.cell.index()][m.idx as usize] = tid;
                }
            }
        }

        if cell_tris
            .iter()
            .any(|tris| tris.iter().any(|t| t.0 == u32::MAX))
        {
            return Err(Error::Internal(
                "facet without a triangle record".to_string(),
            ));
        }

        let vertex_state = vec![VertexState::default(); dt.num_vertices()];
        let labels = vec![-1; num_cells];

        Ok(Self {
            dt,
            triangles,
            edges,
            vertex_state,
            labels,
            criterion,
            next_label: 0,
            cell_tris,
            cell_edges,
        })
    }

    pub fn points(&self) -> &[Point3d] {
        self.dt.points()
    }

    // ------------------------------------------------------------------
    // handle lookup
    // ------------------------------------------------------------------

    /// Triangle record behind a half-triangle
    pub fn triangle_at(&self, f: Facet) -> TriangleId {
        self.cell_tris[f.cell.index()][f.idx as usize]
    }

    /// Edge record behind a half-edge
    pub fn edge_at(&self, he: CellEdge) -> EdgeId {
        self.cell_edges[he.cell.index()][EDGE_SLOT[he.s as usize][he.t as usize]]
    }

    pub fn tri(&self, t: TriangleId) -> &TriangleRec {
        &self.triangles[t.index()]
    }

    pub fn tri_mut(&mut self, t: TriangleId) -> &mut TriangleRec {
        &mut self.triangles[t.index()]
    }

    pub fn edge(&self, e: EdgeId) -> &EdgeRec {
        &self.edges[e.index()]
    }

    pub fn edge_mut(&mut self, e: EdgeId) -> &mut EdgeRec {
        &mut self.edges[e.index()]
    }

    pub fn label(&self, c: CellId) -> i32 {
        self.labels[c.index()]
    }

    pub fn set_label(&mut self, c: CellId, label: i32) {
        self.labels[c.index()] = label;
    }

    /// Allocate a fresh space label
    pub fn fresh_label(&mut self) -> i32 {
        let label = self.next_label;
        self.next_label += 1;
        label
    }

    /// Toggle surface membership. Clearing existence also clears the
    /// open flag so stale classification cannot leak through.
    pub fn set_exists(&mut self, t: TriangleId, exists: bool) {
        let tri = &mut self.triangles[t.index()];
        tri.exists = exists;
        if !exists {
            tri.open = false;
        }
    }

    // ------------------------------------------------------------------
    // record-level helpers
    // ------------------------------------------------------------------

    /// Index of `v` within the triangle, if present
    pub fn tri_index_of_vertex(&self, t: TriangleId, v: VertexId) -> Option<u8> {
        self.tri(t).verts.iter().position(|&w| w == v).map(|i| i as u8)
    }

    /// Index of `e` within the triangle, if present
    pub fn tri_index_of_edge(&self, t: TriangleId, e: EdgeId) -> Option<u8> {
        self.tri(t).edges.iter().position(|&f| f == e).map(|i| i as u8)
    }

    /// The edge shared by two triangles
    pub fn shared_edge(&self, t0: TriangleId, t1: TriangleId) -> Option<EdgeId> {
        self.tri(t0)
            .edges
            .iter()
            .copied()
            .find(|e| self.tri(t1).edges.contains(e))
    }

    /// Criterion value of a triangle (infinite triangles rank last)
    pub fn triangle_criterion_value(&self, t: TriangleId) -> f64 {
        let tri = self.tri(t);

        if !tri.finite {
            return f64::INFINITY;
        }

        let pts = self.dt.points();
        triangle_criterion(
            self.criterion,
            &pts[tri.verts[0].index()],
            &pts[tri.verts[1].index()],
            &pts[tri.verts[2].index()],
        )
    }

    /// Criterion value with an explicit criterion override
    pub fn triangle_criterion_with(&self, t: TriangleId, criterion: Criterion) -> f64 {
        let tri = self.tri(t);

        if !tri.finite {
            return f64::INFINITY;
        }

        let pts = self.dt.points();
        triangle_criterion(
            criterion,
            &pts[tri.verts[0].index()],
            &pts[tri.verts[1].index()],
            &pts[tri.verts[2].index()],
        )
    }

    /// Sum of criteria over the cell's currently non-existing triangles
    pub fn criterion_for_missing_triangles(&self, c: CellId) -> f64 {
        let mut sum = 0.0;

        for i in 0..4u8 {
            let tid = self.triangle_at(Facet::new(c, i));
            if !self.tri(tid).exists {
                sum += self.triangle_criterion_value(tid);
            }
        }

        sum
    }

    /// Count of existing triangles around an edge
    pub fn count_edge_triangles(&self, e: EdgeId) -> usize {
        let rec = self.edge(e);
        let start = self.dt.first_facet_of_edge(rec.rep);

        self.dt
            .edge_fan(start, rec.verts[0], rec.verts[1])
            .iter()
            .filter(|(f, _)| self.tri(self.triangle_at(*f)).exists)
            .count()
    }

    /// All distinct cells around an edge, in rotational order
    pub fn cells_around_edge(&self, e: EdgeId) -> Vec<CellId> {
        let rec = self.edge(e);
        let start = self.dt.first_facet_of_edge(rec.rep);

        self.dt
            .edge_fan(start, rec.verts[0], rec.verts[1])
            .into_iter()
            .map(|(_, c)| c)
            .collect()
    }

    /// The cyclic fan of (facet, entered cell) pairs around an edge
    pub fn edge_fan(&self, e: EdgeId) -> Vec<(Facet, CellId)> {
        let rec = self.edge(e);
        let start = self.dt.first_facet_of_edge(rec.rep);
        self.dt.edge_fan(start, rec.verts[0], rec.verts[1])
    }

    /// Reset labels, triangle SB labels, and open flags to the
    /// pre-classification state.
    pub fn reset_classification(&mut self) {
        for label in &mut self.labels {
            *label = -1;
        }

        for tri in &mut self.triangles {
            tri.open = false;
            tri.label = -1;
        }

        for edge in &mut self.edges {
            edge.open = false;
            edge.nc = false;
        }

        for vs in &mut self.vertex_state {
            *vs = VertexState::default();
        }
    }

    /// Extract the existing finite triangles as an indexed face list,
    /// oriented as read from the exterior side.
    pub fn surface_faces(&self) -> Vec<[usize; 3]> {
        let mut faces = Vec::new();

        for tid in 0..self.triangles.len() {
            let tri = &self.triangles[tid];
            if !tri.exists || !tri.finite {
                continue;
            }

            // read the facet triple from the exterior-space side so
            // normals point outward
            let f = tri.facet;
            let m = self.dt.mirror_facet(f);
            let outside = if self.label(f.cell) == 0 { f } else { m };

            let verts = self.dt.facet_vertices(outside);
            if self.dt.is_infinite_cell(outside.cell) {
                // hull facet seen from an infinite cell: reuse the
                // finite side's triple reversed
                let inner = self.dt.facet_vertices(if outside == f { m } else { f });
                faces.push([
                    inner[0].index(),
                    inner[2].index(),
                    inner[1].index(),
                ]);
            } else {
                faces.push([verts[0].index(), verts[1].index(), verts[2].index()]);
            }
        }

        faces
    }
}

fn edge_key_lookup(
    map: &HashMap<(VertexId, VertexId), EdgeId>,
    a: VertexId,
    b: VertexId,
) -> EdgeId {
    map[&(a.min(b), a.max(b))]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tet_points() -> Vec<Point3d> {
        vec![
            Point3d::new(0.0, 0.0, 0.0),
            Point3d::new(1.0, 0.0, 0.0),
            Point3d::new(0.0, 1.0, 0.0),
            Point3d::new(0.0, 0.0, 1.0),
        ]
    }

    #[test]
    fn test_dedup_points() {
        let mut points = tet_points();
        points.push(points[0]);
        points.push(points[2]);

        let unique = Model::dedup_points(&points);
        assert_eq!(unique.len(), 4);
        assert_eq!(unique[0], points[0]);
    }

    #[test]
    fn test_record_creation_single_tet() {
        let model = Model::build(tet_points(), Criterion::LongestEdge).unwrap();

        // 4 finite triangles; hull edges are shared with infinite facets
        let finite_tris = model.triangles.iter().filter(|t| t.finite).count();
        assert_eq!(finite_tris, 4);

        let finite_edges = model.edges.iter().filter(|e| e.finite).count();
        assert_eq!(finite_edges, 6);

        // lookup tables are inverse to the records
        for (i, tri) in model.triangles.iter().enumerate() {
            assert_eq!(model.triangle_at(tri.facet), TriangleId(i as u32));
        }
        for (i, edge) in model.edges.iter().enumerate() {
            assert_eq!(model.edge_at(edge.rep), EdgeId(i as u32));
        }
    }

    #[test]
    fn test_triangle_edge_opposition() {
        let model = Model::build(tet_points(), Criterion::LongestEdge).unwrap();

        for tri in &model.triangles {
            for i in 0..3 {
                let edge = model.edge(tri.edges[i]);
                // the edge opposite a vertex must not contain it
                assert!(!edge.verts.contains(&tri.verts[i]));
                // but must contain the other two
                assert!(edge.verts.contains(&tri.verts[(i + 1) % 3]));
                assert!(edge.verts.contains(&tri.verts[(i + 2) % 3]));
            }
        }
    }

    #[test]
    fn test_edge_fan_lookup_consistency() {
        let mut points = tet_points();
        points.push(Point3d::new(0.25, 0.25, 0.25));
        let model = Model::build(points, Criterion::LongestEdge).unwrap();

        for (i, _) in model.edges.iter().enumerate() {
            let eid = EdgeId(i as u32);
            for (f, _) in model.edge_fan(eid) {
                // every facet of the fan contains this edge
                let tid = model.triangle_at(f);
                assert!(model.tri_index_of_edge(tid, eid).is_some());
            }
        }
    }
}
