//! Conformity fixing
//!
//! Non-conforming edges and vertices are repaired by adding small
//! hulls of tetrahedra to the surface. Cheap local hulls are applied
//! until nothing changes, then bounded heuristics pick the cheapest
//! repair; adding every incident tetrahedron is the final fallback
//! that always succeeds.

use crate::model::{EdgeId, Model, NcType};
use crate::spaces::{
    classify_cells, classify_cells_collect_nc, is_open_vertex_manifold, is_vertex_connected_oc,
    is_vertex_deflated,
};
use connect3d_delaunay::{CellEdge, CellId, Facet, VertexId};
use ordered_float::OrderedFloat;
use std::collections::{BTreeSet, HashMap};

/// Repair all non-conforming entities currently flagged in the model.
pub fn fix_nonconforming_entities(model: &mut Model) {
    let mut nc_vertices: BTreeSet<VertexId> = (0..model.dt.num_vertices() as u32)
        .map(VertexId)
        .filter(|v| model.vertex_state[v.index()].is_nc())
        .collect();

    let mut nc_edges: BTreeSet<EdgeId> = (0..model.edges.len() as u32)
        .map(EdgeId)
        .filter(|&e| model.edge(e).nc)
        .collect();

    let mut new_nc_edges: BTreeSet<EdgeId> = BTreeSet::new();
    let mut new_nc_vertices: BTreeSet<VertexId> = BTreeSet::new();
    let mut changed = true;

    while changed && (!nc_vertices.is_empty() || !nc_edges.is_empty()) {
        // cheap local hulls until quiescent
        while changed && (!nc_vertices.is_empty() || !nc_edges.is_empty()) {
            changed = false;

            for &e in &nc_edges {
                if !model.edge(e).nc {
                    continue;
                }

                let cells = edge_add_hull(model, e, false);

                if !cells.is_empty() {
                    classify_cells_collect_nc(model, &cells, &mut new_nc_edges, &mut new_nc_vertices);
                    changed = true;
                } else if model.edge(e).nc {
                    new_nc_edges.insert(e);
                }
            }

            for &v in &nc_vertices {
                if !model.vertex_state[v.index()].is_nc() {
                    continue;
                }

                let cells = vertex_add_hull(model, v, false);

                if !cells.is_empty() {
                    classify_cells_collect_nc(model, &cells, &mut new_nc_edges, &mut new_nc_vertices);
                    changed = true;
                } else if model.vertex_state[v.index()].is_nc() {
                    new_nc_vertices.insert(v);
                }
            }

            nc_edges = std::mem::take(&mut new_nc_edges);
            nc_vertices = std::mem::take(&mut new_nc_vertices);
        }

        // bounded heuristics, with add-all-incident as fallback
        for &e in &nc_edges {
            let mut cells = edge_add_hull_heuristic(model, e).unwrap_or_default();

            if cells.is_empty() {
                cells = edge_add_hull(model, e, true);
            }

            if !cells.is_empty() {
                classify_cells_collect_nc(model, &cells, &mut new_nc_edges, &mut new_nc_vertices);
                changed = true;
            }
        }

        for &v in &nc_vertices {
            let (mut cells, resolved) = vertex_add_hull_heuristic(model, v);

            if !resolved {
                cells.extend(vertex_add_hull(model, v, true));
            }

            if !cells.is_empty() {
                classify_cells_collect_nc(model, &cells, &mut new_nc_edges, &mut new_nc_vertices);
                changed = true;
            }
        }

        nc_edges = std::mem::take(&mut new_nc_edges);
        nc_vertices = std::mem::take(&mut new_nc_vertices);
    }
}

// commit one cell to the surface: fresh space label, all facets exist
fn add_cell(model: &mut Model, c: CellId) {
    let label = model.fresh_label();
    model.set_label(c, label);

    for i in 0..4u8 {
        let tid = model.triangle_at(Facet::new(c, i));
        if !model.tri(tid).exists {
            model.set_exists(tid, true);
        }
    }
}

/// Add exterior cells around an edge. Without `add_all`, only cells in
/// space 0 whose both edge-incident facets already exist are taken.
pub fn edge_add_hull(model: &mut Model, e: EdgeId, add_all: bool) -> Vec<CellId> {
    let mut added = Vec::new();

    for c in model.cells_around_edge(e) {
        if !model.dt.is_finite_cell(c) {
            continue;
        }

        let mut take = add_all;

        if !take && model.label(c) == 0 {
            take = true;

            for i in 0..4u8 {
                let tid = model.triangle_at(Facet::new(c, i));
                if model.tri_index_of_edge(tid, e).is_some() && !model.tri(tid).exists {
                    take = false;
                }
            }
        }

        if take && model.label(c) == 0 {
            add_cell(model, c);
            added.push(c);
        }
    }

    added
}

/// Add exterior cells around a vertex. Without `add_all`, only cells
/// whose four vertices all appear in existing triangles incident to
/// the vertex are taken.
pub fn vertex_add_hull(model: &mut Model, v: VertexId, add_all: bool) -> Vec<CellId> {
    let mut ht_vertex_set: BTreeSet<VertexId> = BTreeSet::new();

    for f in model.dt.incident_facets(v) {
        if model.tri(model.triangle_at(f)).exists {
            for w in model.dt.facet_vertices(f) {
                ht_vertex_set.insert(w);
            }
        }
    }

    let mut added = Vec::new();

    for c in model.dt.incident_cells(v) {
        if !model.dt.is_finite_cell(c) {
            continue;
        }

        let covered = model
            .dt
            .cell_vertices(c)
            .iter()
            .all(|w| ht_vertex_set.contains(w));

        if (add_all || covered) && model.label(c) == 0 {
            add_cell(model, c);
            added.push(c);
        }
    }

    added
}

/// Cheapest-subspace repair for a non-conforming edge: of the exterior
/// sub-spaces around the edge, fill the one whose newly exposed
/// triangles have the smallest criterion sum.
pub fn edge_add_hull_heuristic(model: &mut Model, e: EdgeId) -> Option<Vec<CellId>> {
    let fan = model.edge_fan(e);
    let n = fan.len();

    // cells in rotational order; the facet crossed to enter cell i is
    // fan[i].0, so fan[(i + 1) % n].0 separates cell i from cell i + 1
    let cells: Vec<CellId> = fan.iter().map(|(_, c)| *c).collect();
    let connects: Vec<bool> = (0..n)
        .map(|i| {
            let sep = fan[(i + 1) % n].0;
            !model.tri(model.triangle_at(sep)).exists
                && model.label(cells[i]) == 0
                && model.label(cells[(i + 1) % n]) == 0
        })
        .collect();

    // maximal runs of exterior cells not split by existing triangles
    let mut assignment: Vec<Option<usize>> = vec![None; n];
    let mut run_count = 0;

    for i in 0..n {
        if model.label(cells[i]) != 0 || assignment[i].is_some() {
            continue;
        }

        let run = run_count;
        run_count += 1;
        assignment[i] = Some(run);

        // extend forwards and backwards along unbroken connections
        let mut j = i;
        while connects[j] {
            let next = (j + 1) % n;
            if assignment[next].is_some() {
                break;
            }
            assignment[next] = Some(run);
            j = next;
        }

        let mut j = i;
        while connects[(j + n - 1) % n] {
            let prev = (j + n - 1) % n;
            if assignment[prev].is_some() {
                break;
            }
            assignment[prev] = Some(run);
            j = prev;
        }
    }

    if run_count < 2 {
        return None;
    }

    let mut runs: Vec<BTreeSet<CellId>> = vec![BTreeSet::new(); run_count];
    for i in 0..n {
        if let Some(r) = assignment[i] {
            runs[r].insert(cells[i]);
        }
    }

    // pick the finite run with the smallest criterion sum over the
    // triangles it would add
    let mut best: Option<(f64, usize)> = None;

    for (r, run) in runs.iter().enumerate() {
        if run.iter().any(|&c| !model.dt.is_finite_cell(c)) {
            continue;
        }

        let mut tri_set: BTreeSet<crate::model::TriangleId> = BTreeSet::new();
        for &c in run {
            for i in 0..4u8 {
                let tid = model.triangle_at(Facet::new(c, i));
                if !model.tri(tid).exists {
                    tri_set.insert(tid);
                }
            }
        }

        let sum: f64 = tri_set
            .iter()
            .map(|&t| model.triangle_criterion_value(t))
            .sum();

        if best.map_or(true, |(b, _)| sum < b) {
            best = Some((sum, r));
        }
    }

    let (_, r) = best?;
    let chosen: Vec<CellId> = runs[r].iter().copied().collect();

    for &c in &chosen {
        add_cell(model, c);
    }

    Some(chosen)
}

fn is_tetrahedron_addable(model: &Model, c: CellId, v: VertexId) -> bool {
    if !model.dt.is_finite_cell(c) || model.label(c) != 0 {
        return false;
    }

    let opposite = match model.dt.index_of_vertex(c, v) {
        Some(i) => i,
        None => return false,
    };

    // must already touch the surface at a facet containing the vertex
    (0..4u8).any(|i| {
        i != opposite && model.tri(model.triangle_at(Facet::new(c, i))).exists
    })
}

/// Greedy criterion-ordered repair for a non-conforming vertex: add
/// addable incident exterior cells cheapest-first until the vertex's
/// specific condition is resolved. Returns the added cells and whether
/// the condition was resolved.
pub fn vertex_add_hull_heuristic(model: &mut Model, v: VertexId) -> (Vec<CellId>, bool) {
    let nc_type = model.vertex_state[v.index()].nc_type;

    if nc_type == NcType::Conform {
        return (Vec::new(), true);
    }

    let mut queue: BTreeSet<(OrderedFloat<f64>, CellId)> = BTreeSet::new();
    let mut keys: HashMap<CellId, f64> = HashMap::new();

    for c in model.dt.incident_cells(v) {
        if is_tetrahedron_addable(model, c, v) {
            let cost = model.criterion_for_missing_triangles(c);
            queue.insert((OrderedFloat(cost), c));
            keys.insert(c, cost);
        }
    }

    let mut added = Vec::new();

    while let Some(&(cost, c)) = queue.iter().next() {
        queue.remove(&(cost, c));
        keys.remove(&c);

        add_cell(model, c);
        added.push(c);

        classify_cells(model, &[c]);

        let resolved = match nc_type {
            NcType::VertexConnected => !is_vertex_connected_oc(model, v),
            NcType::NonPlanar => is_open_vertex_manifold(model, v),
            NcType::Isolated => !is_vertex_deflated(model, v),
            NcType::Conform => true,
        };

        if resolved {
            return (added, true);
        }

        // re-evaluate exterior cells around the edges of the added
        // cell that touch the vertex
        let opposite = model.dt.index_of_vertex(c, v).expect("incident");
        let mut affected: BTreeSet<CellId> = BTreeSet::new();

        for t in 0..4u8 {
            if t == opposite {
                continue;
            }
            let e = model.edge_at(CellEdge::new(c, opposite, t));

            for c2 in model.cells_around_edge(e) {
                if model.label(c2) == 0 {
                    affected.insert(c2);
                }
            }
        }

        for c2 in affected {
            if let Some(old) = keys.remove(&c2) {
                queue.remove(&(OrderedFloat(old), c2));
            }

            if is_tetrahedron_addable(model, c2, v) {
                let cost = model.criterion_for_missing_triangles(c2);
                queue.insert((OrderedFloat(cost), c2));
                keys.insert(c2, cost);
            }
        }
    }

    (added, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary_complex::construct_boundary_complex;
    use crate::criterion::Criterion;
    use crate::spaces::{classify_all, relabel_spaces};
    use connect3d_core::Point3d;

    fn run_front_of_pipeline(points: Vec<Point3d>) -> Model {
        let mut model = Model::build(points, Criterion::LongestEdge).unwrap();
        construct_boundary_complex(&mut model);
        relabel_spaces(&mut model);
        classify_all(&mut model);
        fix_nonconforming_entities(&mut model);
        model
    }

    #[test]
    fn test_no_nonconforming_after_fix() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(11);

        let points: Vec<Point3d> = (0..40)
            .map(|_| {
                Point3d::new(
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                )
            })
            .collect();

        let model = run_front_of_pipeline(points);

        for edge in model.edges.iter().filter(|e| e.finite) {
            assert!(!edge.nc);
        }
        for vs in &model.vertex_state {
            assert!(!vs.is_nc());
        }
    }

    #[test]
    fn test_closed_tetrahedron_needs_no_fix() {
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

        let label_count = model.next_label;
        fix_nonconforming_entities(&mut model);

        // nothing to do: labels untouched
        assert_eq!(model.next_label, label_count);
    }
}
