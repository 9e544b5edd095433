//! Space labeling and entity classification
//!
//! A "space" is a maximal set of cells flood-connected through
//! non-existing facets; space 0 is the exterior seeded at the infinite
//! cell. Classification derives, for every triangle, edge, and vertex,
//! whether the current surface fails to separate space 0 around it
//! ("open"), and for open edges and vertices whether the local
//! topology is ambiguous ("non-conforming").

use crate::model::{EdgeId, Model, NcType, TriangleId, VertexState};
use connect3d_delaunay::{CellId, Facet, VertexId};
use std::collections::{BTreeMap, BTreeSet};

/// Flood-fill all unlabeled cells into spaces with increasing labels.
/// The infinite cell is always processed first so the exterior space
/// receives the current label counter first.
pub fn label_contiguous_spaces(model: &mut Model) {
    let infinite = model.dt.infinite_cell();
    let seeds: Vec<CellId> = std::iter::once(infinite)
        .chain(model.dt.cell_ids())
        .collect();

    for seed in seeds {
        if model.label(seed) != -1 {
            continue;
        }

        let label = model.fresh_label();
        let mut stack = vec![seed];

        while let Some(c) = stack.pop() {
            if model.label(c) != -1 {
                continue;
            }
            model.set_label(c, label);

            for i in 0..4u8 {
                let f = Facet::new(c, i);
                if !model.tri(model.triangle_at(f)).exists {
                    let n = model.dt.neighbor(c, i);
                    if model.label(n) == -1 {
                        stack.push(n);
                    }
                }
            }
        }
    }
}

/// Reset labels and re-run the flood fill from scratch.
pub fn relabel_spaces(model: &mut Model) {
    for label in &mut model.labels {
        *label = -1;
    }
    model.next_label = 0;
    label_contiguous_spaces(model);
}

/// Whether an edge belongs to the current surface (incident to at
/// least one existing triangle).
pub fn edge_in_surface(model: &Model, e: EdgeId) -> bool {
    model
        .edge_fan(e)
        .iter()
        .any(|(f, _)| model.tri(model.triangle_at(*f)).exists)
}

/// Edge openness by spaces: the cyclic fan around the edge, split into
/// sectors at existing triangles, contains two or more sectors lying
/// in space 0.
pub fn determine_if_edge_open(model: &Model, e: EdgeId) -> bool {
    let fan = model.edge_fan(e);
    let mut zero_sectors = 0;

    for (f, entered) in &fan {
        if model.tri(model.triangle_at(*f)).exists && model.label(*entered) == 0 {
            zero_sectors += 1;
        }
    }

    zero_sectors >= 2
}

/// Number of existing open triangles around an edge.
pub fn incident_open_triangle_count(model: &Model, e: EdgeId) -> usize {
    model
        .edge_fan(e)
        .iter()
        .filter(|(f, _)| {
            let tri = model.tri(model.triangle_at(*f));
            tri.exists && tri.open
        })
        .count()
}

/// Edge non-conformity: the count of incident open triangles plus the
/// number of maximal runs of non-zero-label cells around the edge must
/// be exactly two for a conforming open edge.
pub fn is_edge_nonconforming(model: &Model, e: EdgeId) -> bool {
    let rec = model.edge(e);
    if !rec.finite || !rec.open || !edge_in_surface(model, e) {
        return false;
    }

    let fan = model.edge_fan(e);
    let labels: Vec<i32> = fan.iter().map(|(_, c)| model.label(*c)).collect();
    let n = labels.len();

    // cyclic runs of cells outside space 0
    let mut runs = 0;
    for i in 0..n {
        let prev = labels[(i + n - 1) % n];
        if labels[i] != 0 && prev == 0 {
            runs += 1;
        }
    }

    if runs == 0 {
        return false;
    }

    let open_count = incident_open_triangle_count(model, e);

    open_count + runs != 2
}

/// Vertex-connectedness: the existing triangles incident to the vertex
/// do not form a single edge-connected set.
pub fn is_vertex_connected_oc(model: &Model, v: VertexId) -> bool {
    let mut unconnected: Vec<TriangleId> = Vec::new();

    for f in model.dt.incident_facets(v) {
        let tid = model.triangle_at(f);
        if model.tri(tid).exists {
            unconnected.push(tid);
        }
    }

    if unconnected.is_empty() {
        return false;
    }

    // grow an edge-connected set from the first triangle, joining over
    // the two edges that contain the vertex
    let start = unconnected.remove(0);
    let mut edge_set: BTreeSet<EdgeId> = BTreeSet::new();

    let k = model.tri_index_of_vertex(start, v).expect("incident") as usize;
    for i in 0..2 {
        edge_set.insert(model.tri(start).edges[(k + 1 + i) % 3]);
    }

    let mut changed = true;

    while changed {
        changed = false;
        let mut i = 0;

        while i < unconnected.len() {
            let tid = unconnected[i];
            let k = model.tri_index_of_vertex(tid, v).expect("incident") as usize;
            let e0 = model.tri(tid).edges[(k + 1) % 3];
            let e1 = model.tri(tid).edges[(k + 2) % 3];

            if edge_set.contains(&e0) || edge_set.contains(&e1) {
                edge_set.insert(e0);
                edge_set.insert(e1);
                unconnected.swap_remove(i);
                changed = true;
            } else {
                i += 1;
            }
        }
    }

    !unconnected.is_empty()
}

/// Whether any edge incident to the vertex is open.
pub fn is_vertex_in_open_edge(model: &Model, v: VertexId) -> bool {
    model
        .dt
        .incident_edges(v)
        .iter()
        .any(|&he| model.edge(model.edge_at(he)).open)
}

// connected components of the cells incident to `v`, where two cells
// join across a shared facet (incident to `v`) whose triangle does not
// exist
fn vertex_umbrella_components(
    model: &Model,
    v: VertexId,
    restrict: Option<&BTreeSet<CellId>>,
) -> Vec<Vec<CellId>> {
    let cells: Vec<CellId> = match restrict {
        Some(set) => set.iter().copied().collect(),
        None => model.dt.incident_cells(v),
    };
    let cell_set: BTreeSet<CellId> = cells.iter().copied().collect();

    let mut seen: BTreeSet<CellId> = BTreeSet::new();
    let mut components = Vec::new();

    for &start in &cells {
        if seen.contains(&start) {
            continue;
        }

        let mut component = Vec::new();
        let mut stack = vec![start];
        seen.insert(start);

        while let Some(c) = stack.pop() {
            component.push(c);
            let opposite = model.dt.index_of_vertex(c, v).expect("incident");

            for i in 0..4u8 {
                if i == opposite {
                    continue;
                }
                let f = Facet::new(c, i);
                if model.tri(model.triangle_at(f)).exists {
                    continue;
                }
                let n = model.dt.neighbor(c, i);
                if cell_set.contains(&n) && seen.insert(n) {
                    stack.push(n);
                }
            }
        }

        components.push(component);
    }

    components
}

/// Vertex deflation: the umbrella of incident cells meets space 0 in
/// two or more separate sub-spaces.
pub fn is_vertex_deflated(model: &Model, v: VertexId) -> bool {
    let components = vertex_umbrella_components(model, v, None);

    let zero_components = components
        .iter()
        .filter(|comp| model.label(comp[0]) == 0)
        .count();

    zero_components >= 2
}

/// Manifold test for an open vertex: all open entities at the vertex
/// must be reachable from each of at most two exterior sub-spaces.
pub fn is_open_vertex_manifold(model: &Model, v: VertexId) -> bool {
    // collect the open entities incident to the vertex
    let mut open_triangles: BTreeSet<TriangleId> = BTreeSet::new();
    let mut open_edges: BTreeSet<EdgeId> = BTreeSet::new();

    for f in model.dt.incident_facets(v) {
        let tid = model.triangle_at(f);
        let tri = model.tri(tid);

        if tri.open {
            open_triangles.insert(tid);
        }

        if let Some(k) = model.tri_index_of_vertex(tid, v) {
            for i in 0..2 {
                let e = tri.edges[(k as usize + 1 + i) % 3];
                if model.edge(e).open {
                    open_edges.insert(e);
                }
            }
        }
    }

    if open_triangles.is_empty() && open_edges.is_empty() {
        return true;
    }

    // sub-spaces of space 0 at this vertex
    let s0_cells: BTreeSet<CellId> = model
        .dt
        .incident_cells(v)
        .into_iter()
        .filter(|&c| model.label(c) == 0)
        .collect();

    let components = vertex_umbrella_components(model, v, Some(&s0_cells));

    if components.len() > 2 {
        return false;
    }

    for component in &components {
        // umbrella of the sub-space: existing facets of its cells that
        // touch the vertex, walls included
        let mut tri_cover: BTreeSet<TriangleId> = BTreeSet::new();
        let mut edge_cover: BTreeSet<EdgeId> = BTreeSet::new();

        for &c in component {
            let opposite = model.dt.index_of_vertex(c, v).expect("incident");

            for i in 0..4u8 {
                if i == opposite {
                    continue;
                }
                let tid = model.triangle_at(Facet::new(c, i));
                let tri = model.tri(tid);

                if tri.exists {
                    tri_cover.insert(tid);

                    if let Some(k) = model.tri_index_of_vertex(tid, v) {
                        for j in 0..2 {
                            edge_cover.insert(tri.edges[(k as usize + 1 + j) % 3]);
                        }
                    }
                }
            }
        }

        if !open_triangles.is_subset(&tri_cover) || !open_edges.is_subset(&edge_cover) {
            return false;
        }
    }

    true
}

/// Classify the given triangles, edges, and vertices against the
/// current labeling. Flags outside the given sets are touched only by
/// the open-propagation from triangles, exactly like a full pass would.
pub fn classify_sets(
    model: &mut Model,
    triangles: &[TriangleId],
    edges: &[EdgeId],
    vertices: &[VertexId],
) {
    for &e in edges {
        let rec = model.edge_mut(e);
        rec.open = false;
        rec.nc = false;
    }

    for &v in vertices {
        model.vertex_state[v.index()] = VertexState::default();
    }

    // triangles: open iff both adjacent cells lie in space 0
    for &t in triangles {
        let tri = model.tri(t);
        if !tri.finite || !tri.exists {
            continue;
        }

        let f = tri.facet;
        let m = model.dt.mirror_facet(f);
        let open = model.label(f.cell) == 0 && model.label(f.cell) == model.label(m.cell);

        model.tri_mut(t).open = open;

        if open {
            let (tri_edges, tri_verts) = {
                let tri = model.tri(t);
                (tri.edges, tri.verts)
            };
            for e in tri_edges {
                model.edge_mut(e).open = true;
            }
            for v in tri_verts {
                model.vertex_state[v.index()].open = true;
            }
        }
    }

    // edges: open by sub-space count, then non-conformity
    for &e in edges {
        let rec = model.edge(e);
        if !rec.finite || !edge_in_surface(model, e) {
            continue;
        }

        if !model.edge(e).open && determine_if_edge_open(model, e) {
            model.edge_mut(e).open = true;
            let verts = model.edge(e).verts;
            for v in verts {
                model.vertex_state[v.index()].open = true;
            }
        }

        if model.edge(e).open && is_edge_nonconforming(model, e) {
            model.edge_mut(e).nc = true;
        }
    }

    // vertices: vertex-connected first, then open propagation and the
    // deflation/manifold tests
    for &v in vertices {
        if is_vertex_connected_oc(model, v) {
            model.vertex_state[v.index()].open = true;
            model.vertex_state[v.index()].nc_type = NcType::VertexConnected;
        } else {
            if !model.vertex_state[v.index()].open {
                if is_vertex_in_open_edge(model, v) {
                    model.vertex_state[v.index()].open = true;
                } else if is_vertex_deflated(model, v) {
                    model.vertex_state[v.index()].open = true;
                    model.vertex_state[v.index()].nc_type = NcType::Isolated;
                }
            }

            if model.vertex_state[v.index()].open && !is_open_vertex_manifold(model, v) {
                model.vertex_state[v.index()].nc_type = NcType::NonPlanar;
            }
        }
    }
}

/// Classify every finite entity of the model.
pub fn classify_all(model: &mut Model) {
    let triangles: Vec<TriangleId> = (0..model.triangles.len() as u32)
        .map(TriangleId)
        .filter(|&t| model.tri(t).finite)
        .collect();
    let edges: Vec<EdgeId> = (0..model.edges.len() as u32)
        .map(EdgeId)
        .filter(|&e| model.edge(e).finite)
        .collect();
    let vertices: Vec<VertexId> = (0..model.dt.num_vertices() as u32).map(VertexId).collect();

    classify_sets(model, &triangles, &edges, &vertices);
}

/// Collect the entities of a cell set, classify them, and return the
/// sets for follow-up inspection.
pub fn classify_cells(
    model: &mut Model,
    cells: &[CellId],
) -> (Vec<VertexId>, Vec<EdgeId>, Vec<TriangleId>) {
    let mut triangles: BTreeSet<TriangleId> = BTreeSet::new();
    let mut edges: BTreeSet<EdgeId> = BTreeSet::new();
    let mut vertices: BTreeSet<VertexId> = BTreeSet::new();

    for &c in cells {
        for i in 0..4u8 {
            triangles.insert(model.triangle_at(Facet::new(c, i)));

            let v = model.dt.cell_vertex(c, i);
            if !v.is_infinite() {
                vertices.insert(v);
            }
        }

        for [s, t] in connect3d_delaunay::EDGE_VERTS {
            edges.insert(model.edge_at(connect3d_delaunay::CellEdge::new(c, s, t)));
        }
    }

    let triangles: Vec<TriangleId> = triangles.into_iter().collect();
    let edges: Vec<EdgeId> = edges.into_iter().collect();
    let vertices: Vec<VertexId> = vertices.into_iter().collect();

    classify_sets(model, &triangles, &edges, &vertices);

    (vertices, edges, triangles)
}

/// Classify the entities of a cell set and collect the entities that
/// remain non-conforming afterwards.
pub fn classify_cells_collect_nc(
    model: &mut Model,
    cells: &[CellId],
    nc_edges: &mut BTreeSet<EdgeId>,
    nc_vertices: &mut BTreeSet<VertexId>,
) {
    let (vertices, edges, _) = classify_cells(model, cells);

    for e in edges {
        if model.edge(e).nc {
            nc_edges.insert(e);
        }
    }

    for v in vertices {
        if model.vertex_state[v.index()].is_nc() {
            nc_vertices.insert(v);
        }
    }
}

/// Map of space label to a representative cell, for every current label
pub fn space_representatives(model: &Model) -> BTreeMap<i32, CellId> {
    let mut map = BTreeMap::new();

    for c in model.dt.cell_ids() {
        map.entry(model.label(c)).or_insert(c);
    }

    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary_complex::construct_boundary_complex;
    use crate::criterion::Criterion;
    use connect3d_core::Point3d;

    fn tet_model() -> Model {
        Model::build(
            vec![
                Point3d::new(0.0, 0.0, 0.0),
                Point3d::new(1.0, 0.0, 0.0),
                Point3d::new(0.0, 1.0, 0.0),
                Point3d::new(0.0, 0.0, 1.0),
            ],
            Criterion::LongestEdge,
        )
        .unwrap()
    }

    #[test]
    fn test_labeling_without_surface() {
        let mut model = tet_model();
        relabel_spaces(&mut model);

        // no existing triangle: everything floods into space 0
        assert_eq!(model.next_label, 1);
        for c in model.dt.cell_ids() {
            assert_eq!(model.label(c), 0);
        }
    }

    #[test]
    fn test_labeling_with_closed_surface() {
        let mut model = tet_model();
        construct_boundary_complex(&mut model);
        relabel_spaces(&mut model);

        // the closed tetrahedron separates inside from outside
        assert_eq!(model.next_label, 2);
        assert_eq!(space_representatives(&model).len(), 2);

        let interior: Vec<CellId> = model
            .dt
            .cell_ids()
            .filter(|&c| model.dt.is_finite_cell(c))
            .collect();
        assert_eq!(interior.len(), 1);
        assert_eq!(model.label(interior[0]), 1);
        assert_eq!(model.label(model.dt.infinite_cell()), 0);
    }

    #[test]
    fn test_relabel_is_idempotent() {
        let mut model = tet_model();
        construct_boundary_complex(&mut model);
        relabel_spaces(&mut model);
        let first: Vec<i32> = model.labels.clone();
        let count = model.next_label;

        relabel_spaces(&mut model);
        assert_eq!(model.labels, first);
        assert_eq!(model.next_label, count);
    }

    #[test]
    fn test_closed_surface_classifies_conform() {
        let mut model = tet_model();
        construct_boundary_complex(&mut model);
        relabel_spaces(&mut model);
        classify_all(&mut model);

        for tri in model.triangles.iter().filter(|t| t.exists) {
            assert!(!tri.open);
        }
        for edge in model.edges.iter().filter(|e| e.finite) {
            assert!(!edge.open);
            assert!(!edge.nc);
        }
        for vs in &model.vertex_state {
            assert!(!vs.open);
            assert_eq!(vs.nc_type, NcType::Conform);
        }
    }

    #[test]
    fn test_single_open_triangle_classification() {
        let mut model = tet_model();

        // one lone triangle separates nothing
        let tid = (0..model.triangles.len() as u32)
            .map(TriangleId)
            .find(|&t| model.tri(t).finite)
            .unwrap();
        model.set_exists(tid, true);

        relabel_spaces(&mut model);
        classify_all(&mut model);

        assert!(model.tri(tid).open);
        for &e in &model.tri(tid).edges.clone() {
            assert!(model.edge(e).open);
        }
        for &v in &model.tri(tid).verts.clone() {
            assert!(model.vertex_state[v.index()].open);
        }
    }
}
