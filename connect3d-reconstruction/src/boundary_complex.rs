//! Initial boundary complex construction
//!
//! A Kruskal-style sweep over candidate triangles in ascending
//! criterion order. A triangle is accepted when it merges two vertex
//! trees, or when it closes an external edge (an edge with exactly one
//! chosen triangle) without pushing any of its edges past two chosen
//! triangles. The sweep repeats until one tree spans all vertices and
//! no external edge remains.

use crate::model::{Model, TriangleId};
use connect3d_delaunay::VertexId;
use itertools::Itertools;
use ordered_float::OrderedFloat;

struct DisjointSet {
    parent: Vec<u32>,
    size: Vec<u32>,
    trees: usize,
}

impl DisjointSet {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n as u32).collect(),
            size: vec![1; n],
            trees: n,
        }
    }

    fn find(&mut self, mut x: u32) -> u32 {
        while self.parent[x as usize] != x {
            self.parent[x as usize] = self.parent[self.parent[x as usize] as usize];
            x = self.parent[x as usize];
        }
        x
    }

    fn union(&mut self, a: u32, b: u32) -> bool {
        let ra = self.find(a);
        let rb = self.find(b);

        if ra == rb {
            return false;
        }

        let (big, small) = if self.size[ra as usize] >= self.size[rb as usize] {
            (ra, rb)
        } else {
            (rb, ra)
        };

        self.parent[small as usize] = big;
        self.size[big as usize] += self.size[small as usize];
        self.trees -= 1;
        true
    }
}

/// Select the initial `exists` set of triangles.
pub fn construct_boundary_complex(model: &mut Model) {
    let candidates = sorted_candidates(model);

    let mut uf = DisjointSet::new(model.dt.num_vertices());
    let mut edge_count = vec![0u32; model.edges.len()];
    let mut external_edges = 0usize;

    loop {
        let mut changed = false;

        for &tid in &candidates {
            if model.tri(tid).exists {
                continue;
            }

            let verts = model.tri(tid).verts;
            let edges = model.tri(tid).edges;

            // a third triangle on any edge would break two-manifoldness
            if edges.iter().any(|e| edge_count[e.index()] >= 2) {
                continue;
            }

            let merges = {
                let r0 = uf.find(verts[0].0);
                let r1 = uf.find(verts[1].0);
                let r2 = uf.find(verts[2].0);
                r0 != r1 || r0 != r2
            };
            let closes_external = edges.iter().any(|e| edge_count[e.index()] == 1);

            if !merges && !closes_external {
                continue;
            }

            model.set_exists(tid, true);
            uf.union(verts[0].0, verts[1].0);
            uf.union(verts[0].0, verts[2].0);

            for e in edges {
                edge_count[e.index()] += 1;
                match edge_count[e.index()] {
                    1 => external_edges += 1,
                    2 => external_edges -= 1,
                    _ => unreachable!(),
                }
            }

            changed = true;
        }

        if !changed || (uf.trees == 1 && external_edges == 0) {
            break;
        }
    }
}

fn sorted_candidates(model: &Model) -> Vec<TriangleId> {
    (0..model.triangles.len() as u32)
        .map(TriangleId)
        .filter(|&t| model.tri(t).finite)
        .sorted_by_key(|&t| {
            let mut verts: [VertexId; 3] = model.tri(t).verts;
            verts.sort();
            (OrderedFloat(model.triangle_criterion_value(t)), verts)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::criterion::Criterion;
    use connect3d_core::Point3d;

    fn build_model(points: Vec<Point3d>) -> Model {
        Model::build(points, Criterion::LongestEdge).unwrap()
    }

    #[test]
    fn test_single_tetrahedron_selects_all_faces() {
        let mut model = build_model(vec![
            Point3d::new(0.0, 0.0, 0.0),
            Point3d::new(1.0, 0.0, 0.0),
            Point3d::new(0.0, 1.0, 0.0),
            Point3d::new(0.0, 0.0, 1.0),
        ]);

        construct_boundary_complex(&mut model);

        let existing = model.triangles.iter().filter(|t| t.exists).count();
        assert_eq!(existing, 4);
    }

    #[test]
    fn test_no_external_edges_and_single_tree() {
        let mut model = build_model(vec![
            Point3d::new(0.0, 0.0, 0.0),
            Point3d::new(1.0, 0.0, 0.0),
            Point3d::new(0.0, 1.0, 0.0),
            Point3d::new(0.0, 0.0, 1.0),
            Point3d::new(1.0, 1.0, 1.0),
            Point3d::new(0.3, 0.4, 0.2),
        ]);

        construct_boundary_complex(&mut model);

        // every edge of a chosen triangle is shared by exactly two
        // chosen triangles
        let mut edge_count = vec![0u32; model.edges.len()];
        for tri in model.triangles.iter().filter(|t| t.exists) {
            for e in tri.edges {
                edge_count[e.index()] += 1;
            }
        }
        for (i, &count) in edge_count.iter().enumerate() {
            assert!(count == 0 || count == 2, "edge {} has count {}", i, count);
        }

        // no isolated vertex: every vertex appears in a chosen triangle
        let mut used = vec![false; model.dt.num_vertices()];
        for tri in model.triangles.iter().filter(|t| t.exists) {
            for v in tri.verts {
                used[v.index()] = true;
            }
        }
        assert!(used.iter().all(|&u| u));
    }
}
