//! Wall sculpting
//!
//! The dual of inflation: tetrahedra with one or two facets on the
//! cover of a kept space are removed greedily, longest boundary edge
//! first, to erode walls left by the earlier stages. Removability is
//! restricted so no vertex or edge is cut off from its space, and the
//! facet with the smallest circumradius in a tetrahedron is never
//! exposed.

use crate::model::{EdgeId, Model, TriangleId};
use crate::criterion::Criterion;
use crate::segmentation::{next_umbrella_elem, SbElem};
use connect3d_delaunay::{CellEdge, CellId, Facet, VertexId};
use ordered_float::OrderedFloat;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Existing triangles incident to a vertex, when they form exactly one
/// closed umbrella.
pub fn is_vertex_manifold(model: &Model, v: VertexId) -> bool {
    let mut existing: Vec<Facet> = Vec::new();

    for f in model.dt.incident_facets(v) {
        if model.tri(model.triangle_at(f)).exists {
            existing.push(f);
        }
    }

    if existing.is_empty() {
        return false;
    }

    // walk the umbrella from one triangle and check it visits every
    // existing triangle exactly once
    let start_ht = existing[0];
    let s = model
        .dt
        .index_of_vertex(start_ht.cell, v)
        .expect("incident facet");
    let tri = connect3d_delaunay::TRI_VERTS[start_ht.idx as usize];
    let pos = tri.iter().position(|&i| i == s).expect("vertex in facet");
    let t = tri[(pos + 1) % 3];

    let start = SbElem::new(start_ht, CellEdge::new(start_ht.cell, s, t));
    let mut curr = start;
    let mut visited: BTreeSet<TriangleId> = BTreeSet::new();

    loop {
        let tid = model.triangle_at(curr.ht);
        if !visited.insert(tid) {
            return false;
        }

        curr = next_umbrella_elem(model, curr);

        if curr == start {
            break;
        }
    }

    visited.len() == existing.len()
}

/// Interior spaces seen from vertices with a single umbrella, plus the
/// exterior, each with a representative cell.
pub fn determine_space_map(
    model: &Model,
) -> (BTreeMap<i32, CellId>, BTreeMap<i32, CellId>) {
    let mut int_space_map: BTreeMap<i32, CellId> = BTreeMap::new();
    let mut s0_cell: Option<CellId> = None;

    for v in 0..model.dt.num_vertices() as u32 {
        let vid = VertexId(v);

        if !is_vertex_manifold(model, vid) {
            continue;
        }

        // any existing triangle at a single-umbrella vertex has the
        // exterior on exactly one side
        let f = model
            .dt
            .incident_facets(vid)
            .into_iter()
            .find(|&f| model.tri(model.triangle_at(f)).exists)
            .expect("manifold vertex has existing triangles");

        let m = model.dt.mirror_facet(f);
        let sides = [(f.cell, m.cell), (m.cell, f.cell)];

        for (outside, inside) in sides {
            if model.label(outside) == 0 {
                s0_cell = Some(outside);
                int_space_map.entry(model.label(inside)).or_insert(inside);
            }
        }
    }

    let mut all_space_map = int_space_map.clone();

    if let Some(c) = s0_cell {
        all_space_map.insert(0, c);
    } else {
        all_space_map.insert(0, model.dt.infinite_cell());
    }

    (all_space_map, int_space_map)
}

/// Collect the cover of the kept spaces as half-triangles facing away
/// from them; triangles touching no kept space are dropped from the
/// surface.
pub fn boundary_ht_set(model: &mut Model, all_spaces: &BTreeMap<i32, CellId>) -> BTreeSet<Facet> {
    let mut set = BTreeSet::new();

    for tid in 0..model.triangles.len() as u32 {
        let t = TriangleId(tid);
        let tri = model.tri(t);

        if !tri.finite || !tri.exists {
            continue;
        }

        let f = tri.facet;
        let m = model.dt.mirror_facet(f);
        let in_space = [
            all_spaces.contains_key(&model.label(f.cell)),
            all_spaces.contains_key(&model.label(m.cell)),
        ];

        match (in_space[0], in_space[1]) {
            (false, false) => model.set_exists(t, false),
            (true, false) => {
                set.insert(m);
            }
            (false, true) => {
                set.insert(f);
            }
            (true, true) => {}
        }
    }

    set
}

fn triangles_in_boundary(model: &Model, c: CellId, label: i32) -> (usize, [bool; 4]) {
    let mut in_boundary = [false; 4];
    let mut count = 0;

    for i in 0..4u8 {
        let opp = model.dt.mirror_facet(Facet::new(c, i)).cell;
        in_boundary[i as usize] = model.label(opp) == label;
        if in_boundary[i as usize] {
            count += 1;
        }
    }

    (count, in_boundary)
}

fn non_boundary_edge(model: &Model, c: CellId, in_boundary: &[bool; 4]) -> EdgeId {
    // the edge shared by the two non-boundary facets
    let mut free: Vec<TriangleId> = Vec::new();

    for i in 0..4u8 {
        if !in_boundary[i as usize] {
            free.push(model.triangle_at(Facet::new(c, i)));
        }
    }

    model
        .shared_edge(free[0], free[1])
        .expect("facets of one cell share an edge")
}

fn non_boundary_vertex(model: &Model, c: CellId, in_boundary: &[bool; 4]) -> VertexId {
    let i = (0..4u8)
        .find(|&i| in_boundary[i as usize])
        .expect("boundary facet");
    model.dt.cell_vertex(c, i)
}

fn is_edge_incident_to_space(model: &Model, e: EdgeId, label: i32) -> bool {
    model
        .cells_around_edge(e)
        .iter()
        .any(|&c| model.dt.is_finite_cell(c) && model.label(c) == label)
}

fn is_vertex_incident_to_space(model: &Model, v: VertexId, label: i32) -> bool {
    model
        .dt
        .incident_cells(v)
        .iter()
        .any(|&c| model.label(c) == label)
}

fn least_circumradius_facet(model: &Model, c: CellId) -> u8 {
    let mut best = 0u8;
    let mut best_value = f64::INFINITY;

    for i in 0..4u8 {
        let tid = model.triangle_at(Facet::new(c, i));
        let value = model.triangle_criterion_with(tid, Criterion::Circumradius);

        if value < best_value {
            best_value = value;
            best = i;
        }
    }

    best
}

fn is_tetrahedron_removable(
    model: &Model,
    c: CellId,
    label: i32,
) -> Option<(usize, [bool; 4])> {
    let (count, in_boundary) = triangles_in_boundary(model, c, label);

    let mut removable = match count {
        2 => {
            let e = non_boundary_edge(model, c, &in_boundary);
            !is_edge_incident_to_space(model, e, label)
        }
        1 => {
            let v = non_boundary_vertex(model, c, &in_boundary);
            !is_vertex_incident_to_space(model, v, label)
        }
        _ => false,
    };

    // never expose past the smallest-circumradius facet
    if removable && in_boundary[least_circumradius_facet(model, c) as usize] {
        removable = false;
    }

    if removable {
        Some((count, in_boundary))
    } else {
        None
    }
}

fn longest_boundary_edge_criterion(model: &Model, c: CellId, in_boundary: &[bool; 4]) -> f64 {
    let mut max = f64::NEG_INFINITY;

    for i in 0..4u8 {
        if in_boundary[i as usize] {
            let value = model.triangle_criterion_value(model.triangle_at(Facet::new(c, i)));
            if value > max {
                max = value;
            }
        }
    }

    max
}

// cost of the swap for a two-facet candidate: criterion of the newly
// exposed facets minus the removed ones
fn exposure_cost(model: &Model, c: CellId, in_boundary: &[bool; 4]) -> f64 {
    let mut cost = 0.0;

    for i in 0..4u8 {
        let value = model.triangle_criterion_value(model.triangle_at(Facet::new(c, i)));
        if in_boundary[i as usize] {
            cost -= value;
        } else {
            cost += value;
        }
    }

    cost
}

type PqKey = (OrderedFloat<f64>, CellId, i32);

struct SculptureQueue {
    queue: BTreeSet<PqKey>,
    keys: HashMap<(CellId, i32), f64>,
}

impl SculptureQueue {
    fn new() -> Self {
        Self {
            queue: BTreeSet::new(),
            keys: HashMap::new(),
        }
    }

    fn insert(&mut self, model: &Model, c: CellId, label: i32, in_boundary: &[bool; 4]) {
        if self.keys.contains_key(&(c, label)) {
            return;
        }

        // negated so the longest boundary edge pops first
        let key = -longest_boundary_edge_criterion(model, c, in_boundary);
        self.queue.insert((OrderedFloat(key), c, label));
        self.keys.insert((c, label), key);
    }

    fn remove(&mut self, c: CellId, label: i32) {
        if let Some(key) = self.keys.remove(&(c, label)) {
            self.queue.remove(&(OrderedFloat(key), c, label));
        }
    }

    fn pop(&mut self) -> Option<(CellId, i32)> {
        let &(key, c, label) = self.queue.iter().next()?;
        self.queue.remove(&(key, c, label));
        self.keys.remove(&(c, label));
        Some((c, label))
    }
}

/// Erode walls: greedily remove removable tetrahedra from the cover of
/// every kept space.
pub fn sculpture_walls(
    model: &mut Model,
    all_spaces: &BTreeMap<i32, CellId>,
) -> Vec<CellId> {
    let mut manipulated: BTreeSet<CellId> = BTreeSet::new();
    let mut boundary = boundary_ht_set(model, all_spaces);
    let mut pq = SculptureQueue::new();

    let kept_labels: BTreeSet<i32> = all_spaces.keys().copied().collect();

    for &ht in &boundary {
        let c = ht.cell;
        let label = model.label(model.dt.mirror_facet(ht).cell);

        if let Some((_, in_boundary)) = is_tetrahedron_removable(model, c, label) {
            pq.insert(model, c, label, &in_boundary);
            manipulated.insert(c);
        }
    }

    while let Some((c, label)) = pq.pop() {
        let Some((count, in_boundary)) = is_tetrahedron_removable(model, c, label) else {
            continue;
        };

        // a two-facet swap that increases the criterion makes the
        // surface worse and is skipped
        if count == 2 && exposure_cost(model, c, &in_boundary) > 0.0 {
            continue;
        }

        // drop pending candidates of this cell for every space
        for &l in &kept_labels {
            pq.remove(c, l);
        }

        model.set_label(c, label);

        for i in 0..4u8 {
            let f = Facet::new(c, i);
            let tid = model.triangle_at(f);

            model.set_exists(tid, !in_boundary[i as usize]);

            if in_boundary[i as usize] {
                boundary.remove(&f);
            } else {
                boundary.insert(model.dt.mirror_facet(f));
            }
        }

        // re-evaluate tetrahedra sharing a vertex with the removed one
        let mut adjacent: BTreeSet<CellId> = BTreeSet::new();

        for v in model.dt.cell_vertices(c) {
            if v.is_infinite() {
                continue;
            }
            for c2 in model.dt.incident_cells(v) {
                if model.dt.is_finite_cell(c2) && !kept_labels.contains(&model.label(c2)) {
                    adjacent.insert(c2);
                }
            }
        }

        for c2 in adjacent {
            let mut touched_spaces: BTreeSet<i32> = BTreeSet::new();

            for i in 0..4u8 {
                let opp = model.dt.mirror_facet(Facet::new(c2, i)).cell;
                let l = model.label(opp);
                if kept_labels.contains(&l) {
                    touched_spaces.insert(l);
                }
            }

            for l in touched_spaces {
                pq.remove(c2, l);

                if let Some((_, in_boundary)) = is_tetrahedron_removable(model, c2, l) {
                    pq.insert(model, c2, l, &in_boundary);
                    manipulated.insert(c2);
                }
            }
        }
    }

    manipulated.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary_complex::construct_boundary_complex;
    use crate::spaces::{classify_all, relabel_spaces};
    use connect3d_core::Point3d;

    fn closed_tet_model() -> Model {
        let mut model = Model::build(
            vec![
                Point3d::new(0.0, 0.0, 0.0),
                Point3d::new(1.0, 0.0, 0.0),
                Point3d::new(0.0, 1.0, 0.0),
                Point3d::new(0.0, 0.0, 1.0),
            ],
            crate::criterion::Criterion::LongestEdge,
        )
        .unwrap();

        construct_boundary_complex(&mut model);
        relabel_spaces(&mut model);
        classify_all(&mut model);
        model
    }

    #[test]
    fn test_all_vertices_manifold_on_closed_tet() {
        let model = closed_tet_model();

        for v in 0..model.dt.num_vertices() as u32 {
            assert!(is_vertex_manifold(&model, VertexId(v)));
        }
    }

    #[test]
    fn test_space_map_of_closed_tet() {
        let model = closed_tet_model();
        let (all_spaces, int_spaces) = determine_space_map(&model);

        assert_eq!(int_spaces.len(), 1);
        assert!(all_spaces.contains_key(&0));
        assert_eq!(all_spaces.len(), 2);
    }

    #[test]
    fn test_sculpture_keeps_minimal_solid() {
        let mut model = closed_tet_model();
        let (all_spaces, _) = determine_space_map(&model);

        sculpture_walls(&mut model, &all_spaces);

        // the single tetrahedron cannot be eroded
        let existing = model.triangles.iter().filter(|t| t.exists).count();
        assert_eq!(existing, 4);
    }
}
