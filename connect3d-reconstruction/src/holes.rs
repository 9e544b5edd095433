//! Hole detection and filling
//!
//! An OCB is a confirmed hole when a triangle strip traced from one
//! boundary side reconnects to the boundary with matching orientation,
//! or when the component's vertex set reaches beyond every open OCB.
//! Confirmed holes are covered by a hull built over the component's
//! vertex set.

use crate::model::{EdgeId, Model, TriangleId};
use crate::segmentation::{
    cc_boundary_triangles, facet_edge, he_index_in_facet, next_existing_triangle,
    next_facing_half_triangle, OcBoundary, SbElem, Segmentation,
};
use connect3d_delaunay::{Facet, VertexId};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

type ElemMap = BTreeMap<(u32, u32), VecDeque<SbElem>>;

fn directed_pair(model: &Model, he: connect3d_delaunay::CellEdge) -> (u32, u32) {
    let (a, b) = model.dt.edge_vertices(he);
    (a.0, b.0)
}

/// Strip test: trace the triangulated region spanned by one OCB side;
/// reconnecting to the original boundary with matching orientation
/// confirms a hole.
pub fn detect_if_ocb_open(model: &Model, side: &[SbElem]) -> bool {
    let mut elem_map: ElemMap = BTreeMap::new();
    let mut original_he_set: BTreeSet<(u32, u32)> = BTreeSet::new();

    for &elem in side {
        let pair = directed_pair(model, elem.he);
        elem_map.entry(pair).or_default().push_back(elem);
        original_he_set.insert((pair.1, pair.0));
    }

    let limit = model.triangles.len() * 8;
    let mut processed = 0usize;

    while let Some((&key, _)) = elem_map.iter().next() {
        processed += 1;
        assert!(processed <= limit, "hole strip traversal failed to close");

        let bucket = elem_map.get_mut(&key).unwrap();
        let elem = bucket.pop_front().unwrap();
        if bucket.is_empty() {
            elem_map.remove(&key);
        }

        let ht = elem.ht;
        let outside_index = he_index_in_facet(ht, elem.he);

        for i in 0..3u8 {
            if i == outside_index {
                continue;
            }

            let he_i = facet_edge(ht, i);
            let pair = directed_pair(model, he_i);

            // reconnection with matching orientation: a strip through
            // the hole
            if original_he_set.contains(&pair) {
                return true;
            }

            // cancel against an entry of the same facet
            let mut removed = false;
            if let Some(bucket) = elem_map.get_mut(&pair) {
                if let Some(pos) = bucket.iter().position(|e| e.ht == ht) {
                    bucket.remove(pos);
                    if bucket.is_empty() {
                        elem_map.remove(&pair);
                    }
                    removed = true;
                }
            }

            // an open edge marks another OCB: the strip ends there
            if !removed {
                removed = model.edge(model.edge_at(he_i)).open;
            }

            if !removed {
                // advance to the next existing triangle inside the
                // component and queue its far side
                let mut new_ht = ht;
                let mut new_he = he_i;

                loop {
                    next_facing_half_triangle(model, &mut new_he, &mut new_ht);
                    if model.tri(model.triangle_at(new_ht)).exists {
                        break;
                    }
                }

                let opp = model.dt.mirror_facet(new_ht);
                let (a, b) = model.dt.edge_vertices(he_i);
                let located = model.dt.edge_in_cell(a, b, opp.cell).reversed();
                elem_map
                    .entry(directed_pair(model, located))
                    .or_default()
                    .push_back(SbElem::new(opp, located));
            }
        }
    }

    false
}

/// First-phase hole scan over all OCBs.
pub fn test_for_holes_in_ocbs(model: &Model, ocbs: &[OcBoundary]) -> Vec<usize> {
    (0..ocbs.len())
        .filter(|&i| detect_if_ocb_open(model, &ocbs[i].sides[0]))
        .collect()
}

/// The union of vertex sets of all CCs bounding an OCB: interior
/// vertices, separator vertices of every SB in the touched groups, and
/// the groups' interior boundary vertices.
pub fn cc_vertex_set_for_ocb(seg: &Segmentation, ocb: &OcBoundary) -> BTreeSet<VertexId> {
    let mut vertex_set: BTreeSet<VertexId> = BTreeSet::new();
    let mut group_set: BTreeSet<usize> = BTreeSet::new();

    for &cc in &ocb.cc_list {
        vertex_set.extend(seg.ccs[cc].interior_vertex_set.iter().copied());

        for label in &seg.ccs[cc].outside_set {
            if let Some(group) = seg.sbs[label].group {
                for sb_label in &seg.groups[group].sb_labels {
                    vertex_set.extend(seg.sbs[sb_label].sep_vertex_set.iter().copied());
                }
                group_set.insert(group);
            }
        }
    }

    for group in group_set {
        vertex_set.extend(seg.groups[group].int_vertex_set.iter().copied());
    }

    vertex_set
}

/// Second-phase test: walk the deflated region bounded by the OCB; a
/// vertex not lying on any open OCB confirms a hole rather than a
/// harmless concavity.
pub fn test_oc_has_interior_vertices(
    model: &Model,
    ocb: &OcBoundary,
    open_ocb_edge_set: &BTreeSet<EdgeId>,
) -> bool {
    let mut open_ocb_vertex_set: BTreeSet<VertexId> = BTreeSet::new();

    for &e in open_ocb_edge_set {
        for v in model.edge(e).verts {
            open_ocb_vertex_set.insert(v);
        }
    }

    // seed the edge boundary with the deflated triangles beyond each
    // OCB element
    let mut edge_boundary: BTreeMap<EdgeId, Facet> = BTreeMap::new();

    for &elem in &ocb.sides[0] {
        let eid = model.edge_at(elem.he);
        let opp_ht = model.dt.mirror_facet(elem.ht);
        let (a, b) = model.dt.edge_vertices(elem.he);
        let he = model.dt.edge_in_cell(a, b, opp_ht.cell);

        let next = next_existing_triangle(model, SbElem::new(opp_ht, he));
        let next_ht = model.dt.mirror_facet(next.ht);

        if model.tri(model.triangle_at(next_ht)).open {
            edge_boundary.insert(eid, next_ht);
        }
    }

    while let Some((&eid, &ht)) = edge_boundary.iter().next() {
        let tid = model.triangle_at(ht);

        // vertex opposite the boundary edge
        let k = model
            .tri_index_of_edge(tid, eid)
            .expect("boundary edge in triangle");
        let next_vh = model.tri(tid).verts[k as usize];

        if !open_ocb_vertex_set.contains(&next_vh) {
            return true;
        }

        edge_boundary.remove(&eid);

        let edges = model.tri(tid).edges;

        for &next_edge in &edges {
            if next_edge == eid {
                continue;
            }

            if edge_boundary.remove(&next_edge).is_none() {
                let rec = model.edge(next_edge);
                let he = model
                    .dt
                    .edge_in_cell(rec.verts[0], rec.verts[1], ht.cell);
                let next = next_existing_triangle(model, SbElem::new(ht, he));
                let next_ht = model.dt.mirror_facet(next.ht);

                if !open_ocb_edge_set.contains(&next_edge) {
                    edge_boundary.insert(next_edge, next_ht);
                }
            }
        }
    }

    false
}

/// Classify the remaining open OCBs by the interior-vertex test.
pub fn classify_ocbs_with_hull(
    model: &Model,
    seg: &Segmentation,
    open_ocbs: &[usize],
) -> Vec<usize> {
    let mut open_edge_set: BTreeSet<EdgeId> = BTreeSet::new();

    for &i in open_ocbs {
        for elem in &seg.ocbs[i].sides[0] {
            open_edge_set.insert(model.edge_at(elem.he));
        }
    }

    open_ocbs
        .iter()
        .copied()
        .filter(|&i| test_oc_has_interior_vertices(model, &seg.ocbs[i], &open_edge_set))
        .collect()
}

fn triangle_has_external_edge(model: &Model, t: TriangleId) -> bool {
    model
        .tri(t)
        .edges
        .iter()
        .any(|&e| model.count_edge_triangles(e) == 1)
}

/// Build a closed hull over a vertex set: candidate triangles with all
/// corners in the set, stripped of external-edge triangles until the
/// remainder closes. Evaluated against temporarily committed `exists`
/// flags, restored before returning.
pub fn create_hull(
    model: &mut Model,
    vertex_set: &BTreeSet<VertexId>,
    _boundary_triangles: &BTreeSet<TriangleId>,
) -> BTreeSet<TriangleId> {
    let mut candidates: BTreeSet<TriangleId> = BTreeSet::new();

    for &v in vertex_set {
        for f in model.dt.incident_facets(v) {
            let tid = model.triangle_at(f);
            let tri = model.tri(tid);

            if tri.finite && tri.verts.iter().all(|w| vertex_set.contains(w)) {
                candidates.insert(tid);
            }
        }
    }

    let mut hull = candidates.clone();

    // commit the candidates so edge counts see the whole hull
    let mut committed: Vec<TriangleId> = Vec::new();
    let mut external: BTreeSet<TriangleId> = BTreeSet::new();

    for &t in &hull {
        if !model.tri(t).exists {
            model.set_exists(t, true);
            committed.push(t);
        }
    }

    for &t in &hull {
        if triangle_has_external_edge(model, t) {
            external.insert(t);
        }
    }

    while let Some(&t) = external.iter().next() {
        external.remove(&t);

        if !model.tri(t).exists || !triangle_has_external_edge(model, t) {
            continue;
        }

        model.set_exists(t, false);
        hull.remove(&t);

        // neighbors of its edges may have become external
        let edges = model.tri(t).edges;
        for e in edges {
            for (f, _) in model.edge_fan(e) {
                let other = model.triangle_at(f);
                if other != t
                    && model.tri(other).exists
                    && triangle_has_external_edge(model, other)
                {
                    external.insert(other);
                }
            }
        }
    }

    for t in committed {
        model.set_exists(t, false);
    }

    hull
}

/// Cover each confirmed hole and merge it into the surface.
pub fn fill_holes(model: &mut Model, seg: &Segmentation, hole_ocbs: &[usize]) -> usize {
    let mut added = 0;

    for &i in hole_ocbs {
        let ocb = &seg.ocbs[i];
        let vertex_set = cc_vertex_set_for_ocb(seg, ocb);

        let mut boundary_triangles: BTreeSet<TriangleId> = BTreeSet::new();
        for &cc in &ocb.cc_list {
            boundary_triangles.extend(cc_boundary_triangles(model, seg, cc));
        }

        let hull = create_hull(model, &vertex_set, &boundary_triangles);

        for t in hull {
            if !model.tri(t).exists {
                added += 1;
                model.set_exists(t, true);
            }
        }
    }

    added
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::criterion::Criterion;
    use connect3d_core::Point3d;

    #[test]
    fn test_create_hull_closes_over_tetrahedron() {
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

        let vertex_set: BTreeSet<VertexId> = (0..4).map(VertexId).collect();
        let hull = create_hull(&mut model, &vertex_set, &BTreeSet::new());

        // the four faces of the tetrahedron form the hull
        assert_eq!(hull.len(), 4);

        // nothing was left committed
        assert!(model.triangles.iter().all(|t| !t.exists));
    }

    #[test]
    fn test_create_hull_over_five_points() {
        let mut model = Model::build(
            vec![
                Point3d::new(0.0, 0.0, 0.0),
                Point3d::new(1.0, 0.0, 0.0),
                Point3d::new(0.0, 1.0, 0.0),
                Point3d::new(0.0, 0.0, 1.0),
                Point3d::new(1.0, 1.0, 1.0),
            ],
            Criterion::LongestEdge,
        )
        .unwrap();

        let vertex_set: BTreeSet<VertexId> = (0..5).map(VertexId).collect();
        let hull = create_hull(&mut model, &vertex_set, &BTreeSet::new());

        // no external edges remain: every hull edge is shared by at
        // least two hull triangles
        assert!(!hull.is_empty());

        let mut edge_count: BTreeMap<EdgeId, usize> = BTreeMap::new();
        for &t in &hull {
            for e in model.tri(t).edges {
                *edge_count.entry(e).or_insert(0) += 1;
            }
        }
        assert!(edge_count.values().all(|&c| c >= 2));
    }
}
