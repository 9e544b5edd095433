//! Bubble popping
//!
//! Face-connected tetrahedra components left outside every kept space
//! ("not belonging to cover") are collapsed into the exterior when
//! their triangle sets allow it; ties between the interior- and
//! exterior-facing sets are broken by total discrete curvature. A final
//! pass removes every triangle buried between two non-exterior spaces.

use crate::criterion::edge_curvature;
use crate::model::{EdgeId, Model, TriangleId};
use crate::segmentation::{next_existing_triangle, SbElem};
use connect3d_delaunay::{CellId, Facet, VertexId};
use std::collections::{BTreeMap, BTreeSet};

fn is_edge_connected(model: &Model, triangles: &BTreeSet<TriangleId>) -> bool {
    let mut remaining: Vec<TriangleId> = triangles.iter().copied().collect();

    if remaining.is_empty() {
        return true;
    }

    let first = remaining.remove(0);
    let mut edge_set: BTreeSet<EdgeId> = model.tri(first).edges.iter().copied().collect();
    let mut changed = true;

    while !remaining.is_empty() && changed {
        changed = false;
        let mut i = 0;

        while i < remaining.len() {
            let t = remaining[i];
            let edges = model.tri(t).edges;

            if edges.iter().any(|e| edge_set.contains(e)) {
                edge_set.extend(edges);
                remaining.swap_remove(i);
                changed = true;
            } else {
                i += 1;
            }
        }
    }

    remaining.is_empty()
}

fn contains_wall(model: &Model, triangles: &BTreeSet<TriangleId>) -> bool {
    let mut vertex_set: BTreeSet<VertexId> = BTreeSet::new();

    for &t in triangles {
        vertex_set.extend(model.tri(t).verts);
    }

    // a vertex whose every existing triangle lies in the set is
    // interior to it: the set folds onto itself somewhere
    for &v in &vertex_set {
        let mut interior = true;

        for f in model.dt.incident_facets(v) {
            let tid = model.triangle_at(f);
            if model.tri(tid).exists && !triangles.contains(&tid) {
                interior = false;
                break;
            }
        }

        if interior {
            return true;
        }
    }

    false
}

/// Curvature along each triangle of one of the paired triangle sets.
pub fn edge_curvature_between(model: &Model, e: EdgeId, t0: TriangleId, t1: TriangleId) -> f64 {
    let pts = model.dt.points();
    let rec = model.edge(e);

    let opposite = |t: TriangleId| {
        model
            .tri(t)
            .verts
            .iter()
            .copied()
            .find(|v| !rec.verts.contains(v))
            .expect("triangle has a vertex off the edge")
    };

    let u = opposite(t0);
    let w = opposite(t1);

    edge_curvature(
        &pts[rec.verts[0].index()],
        &pts[rec.verts[1].index()],
        &pts[u.index()],
        &pts[w.index()],
    )
}

// total curvature along the boundary edges of a triangle set on the
// given NBC's side
fn curvature_for_triangle_set(
    model: &Model,
    nbc_label: i32,
    triangles: &BTreeSet<TriangleId>,
) -> f64 {
    let mut edge_map: BTreeMap<EdgeId, TriangleId> = BTreeMap::new();

    for &t in triangles {
        for e in model.tri(t).edges {
            edge_map.insert(e, t);
        }
    }

    let mut sum = 0.0;

    for (&e, &t) in &edge_map {
        let mut ht = model.tri(t).facet;

        if model.label(ht.cell) != nbc_label {
            ht = model.dt.mirror_facet(ht);
        }

        let rec = model.edge(e);
        let he = model.dt.edge_in_cell(rec.verts[0], rec.verts[1], ht.cell);
        let next = next_existing_triangle(model, SbElem::new(ht, he));
        let next_tid = model.triangle_at(next.ht);

        sum += edge_curvature_between(model, e, t, next_tid);
    }

    sum
}

/// Pop all components not belonging to any kept space.
pub fn pop_nbcs(model: &mut Model, old_int_spaces: &BTreeMap<i32, CellId>) -> Vec<CellId> {
    let mut manipulated: BTreeSet<CellId> = BTreeSet::new();

    // the heuristics may have relabeled: resolve the kept interior
    // spaces through their representative cells
    let int_space_set: BTreeSet<i32> = old_int_spaces
        .values()
        .map(|&c| model.label(c))
        .collect();
    let mut all_space_set = int_space_set.clone();
    all_space_set.insert(0);

    // face-connected groups outside the kept spaces, by label
    let mut nbc_map: BTreeMap<i32, BTreeSet<CellId>> = BTreeMap::new();

    for c in model.dt.cell_ids() {
        let label = model.label(c);

        if model.dt.is_finite_cell(c) && !all_space_set.contains(&label) {
            nbc_map.entry(label).or_default().insert(c);
        }
    }

    for (&nbc_label, cell_set) in &nbc_map {
        // triangle sets facing the exterior (0) and the interior (1)
        let mut facing: [BTreeSet<TriangleId>; 2] = [BTreeSet::new(), BTreeSet::new()];

        for &c in cell_set {
            for i in 0..4u8 {
                let f = Facet::new(c, i);
                let tid = model.triangle_at(f);

                if !model.tri(tid).exists {
                    continue;
                }

                let opp = model.dt.mirror_facet(f);
                let label = model.label(opp.cell);
                let side = if label == 0 { 0 } else { 1 };

                facing[side].insert(model.triangle_at(opp));
            }
        }

        if facing[0].is_empty() {
            continue;
        }

        let mut remove_exterior = false;

        if !facing[1].is_empty()
            && is_edge_connected(model, &facing[1])
            && !contains_wall(model, &facing[0])
        {
            if contains_wall(model, &facing[1]) {
                remove_exterior = true;
            } else {
                let k0 = curvature_for_triangle_set(model, nbc_label, &facing[0]);
                let k1 = curvature_for_triangle_set(model, nbc_label, &facing[1]);
                remove_exterior = k0 > k1;
            }
        }

        if remove_exterior {
            for &t in &facing[0] {
                model.set_exists(t, false);
                manipulated.insert(model.tri(t).facet.cell);
            }

            // the bubble joins the exterior space
            for &c in cell_set {
                model.set_label(c, 0);
                manipulated.insert(c);
            }
        }
    }

    // cleanup: drop triangles buried between two non-exterior spaces
    for tid in 0..model.triangles.len() as u32 {
        let t = TriangleId(tid);
        let tri = model.tri(t);

        if !tri.exists {
            continue;
        }

        let f = tri.facet;
        let m = model.dt.mirror_facet(f);

        if model.label(f.cell) != 0 && model.label(m.cell) != 0 {
            model.set_exists(t, false);
            manipulated.insert(f.cell);
        }
    }

    manipulated.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary_complex::construct_boundary_complex;
    use crate::criterion::Criterion;
    use crate::spaces::{classify_all, relabel_spaces};
    use crate::sculpture::determine_space_map;
    use connect3d_core::Point3d;

    #[test]
    fn test_no_bubbles_on_closed_tet() {
        let mut model = Model::build(
            vec![
                Point3d::new(0.0, 0.0, 0.0),
                Point3d::new(1.0, 0.0, 0.0),
                Point3d::new(0.0, 1.0, 0.0),
                Point3d::new(0.0, 0.0, 1.0),
            ],
            Criterion::LongestEdge,
        )
        .unwrap();

        construct_boundary_complex(&mut model);
        relabel_spaces(&mut model);
        classify_all(&mut model);

        let (_, int_spaces) = determine_space_map(&model);
        pop_nbcs(&mut model, &int_spaces);

        let existing = model.triangles.iter().filter(|t| t.exists).count();
        assert_eq!(existing, 4);
    }

    #[test]
    fn test_edge_connected_detects_split_sets() {
        let mut model = Model::build(
            vec![
                Point3d::new(0.0, 0.0, 0.0),
                Point3d::new(1.0, 0.0, 0.0),
                Point3d::new(0.0, 1.0, 0.0),
                Point3d::new(0.0, 0.0, 1.0),
                Point3d::new(2.0, 2.0, 2.0),
            ],
            Criterion::LongestEdge,
        )
        .unwrap();

        construct_boundary_complex(&mut model);

        let all: BTreeSet<TriangleId> = (0..model.triangles.len() as u32)
            .map(TriangleId)
            .filter(|&t| model.tri(t).exists)
            .collect();

        // the full chosen surface is edge-connected
        assert!(is_edge_connected(&model, &all));
    }
}
