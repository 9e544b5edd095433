//! Component segmentation
//!
//! Traces separator boundaries (SBs) along open edges, merges
//! overlapping SBs into groups, derives the closed components (CCs)
//! they enclose, and assembles open-component boundaries (OCBs) from
//! SB loops and tree edges. The traversal state is always a pair of a
//! half-triangle and a half-edge in the same cell.

use crate::model::{EdgeId, Model, TriangleId};
use crate::spaces::incident_open_triangle_count;
use connect3d_delaunay::{CellEdge, Facet, VertexId};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// One element of a separator boundary: a half-triangle and a
/// half-edge within the same cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SbElem {
    pub ht: Facet,
    pub he: CellEdge,
}

impl SbElem {
    pub fn new(ht: Facet, he: CellEdge) -> Self {
        debug_assert_eq!(ht.cell, he.cell);
        Self { ht, he }
    }

    pub fn reverse_he(&mut self) {
        self.he = self.he.reversed();
    }

    /// Advance the half-edge within the half-triangle: keep the source,
    /// point at the triangle's remaining vertex.
    pub fn advance_edge_in_triangle(&mut self) {
        self.he.t = remaining_index(self.ht, self.he);
    }
}

/// A traced separator boundary.
#[derive(Debug, Clone, Default)]
pub struct SeparatorBoundary {
    pub label: i32,
    pub boundary: Vec<SbElem>,
    pub sep_vertex_set: BTreeSet<VertexId>,
    pub group: Option<usize>,
    pub cc: Option<usize>,
}

/// SBs that touch during the enclosing-boundary sweep form a group.
#[derive(Debug, Clone, Default)]
pub struct SbGroup {
    pub sb_labels: BTreeSet<i32>,
    pub boundary_ht_set: BTreeSet<Facet>,
    pub int_vertex_set: BTreeSet<VertexId>,
}

/// A closed component: the tetrahedra region enclosed by one or more
/// separator boundaries.
#[derive(Debug, Clone, Default)]
pub struct Cc {
    pub outside_set: BTreeSet<i32>,
    pub interior_vertex_set: BTreeSet<VertexId>,
}

/// An open-component boundary: two parallel element sequences, one per
/// side of the open region, plus the CCs touching it.
#[derive(Debug, Clone, Default)]
pub struct OcBoundary {
    pub sides: [Vec<SbElem>; 2],
    pub cc_list: Vec<usize>,
}

/// Everything the segmentation stage produces.
#[derive(Debug, Default)]
pub struct Segmentation {
    pub sbs: BTreeMap<i32, SeparatorBoundary>,
    pub groups: Vec<SbGroup>,
    pub ccs: Vec<Cc>,
    pub ocbs: Vec<OcBoundary>,
}

// ----------------------------------------------------------------------
// traversal primitives
// ----------------------------------------------------------------------

/// Local index of the cell vertex in neither the facet's opposite
/// vertex nor the edge.
pub fn remaining_index(ht: Facet, he: CellEdge) -> u8 {
    6 - ht.idx - he.s - he.t
}

/// Rotate around the half-edge to the facet behind the current one,
/// keeping the half-edge located in the new cell.
pub fn next_rhs_half_triangle(model: &Model, he: &mut CellEdge, ht: &mut Facet) {
    let old_cell = ht.cell;
    let opp_v = model.dt.cell_vertex(old_cell, remaining_index(*ht, *he));
    let (a, b) = model.dt.edge_vertices(*he);

    let mirror = model.dt.mirror_facet(*ht);
    let new_cell = mirror.cell;

    *ht = Facet::new(
        new_cell,
        model.dt.index_of_vertex(new_cell, opp_v).expect("shared vertex"),
    );
    *he = model.dt.edge_in_cell(a, b, new_cell);
}

/// Cross into the neighboring cell through the other facet of the
/// current cell that contains the half-edge.
pub fn next_facing_half_triangle(model: &Model, he: &mut CellEdge, ht: &mut Facet) {
    let old_cell = ht.cell;
    let opp_v = model.dt.cell_vertex(old_cell, remaining_index(*ht, *he));
    let (a, b) = model.dt.edge_vertices(*he);

    let other = Facet::new(
        old_cell,
        model.dt.index_of_vertex(old_cell, opp_v).expect("own vertex"),
    );
    *ht = model.dt.mirror_facet(other);
    *he = model.dt.edge_in_cell(a, b, ht.cell);
}

/// Next existing triangle in the umbrella around the half-edge's
/// source vertex.
pub fn next_umbrella_elem(model: &Model, elem: SbElem) -> SbElem {
    let mut ht = elem.ht;
    let mut he = elem.he;

    let prev_index = he.t;
    he.t = remaining_index(ht, he);
    ht = Facet::new(ht.cell, prev_index);

    while !model.tri(model.triangle_at(ht)).exists {
        next_rhs_half_triangle(model, &mut he, &mut ht);
    }

    SbElem::new(ht, he)
}

/// Rotate to the next existing triangle around the half-edge.
pub fn next_existing_triangle(model: &Model, elem: SbElem) -> SbElem {
    let mut ht = elem.ht;
    let mut he = elem.he;

    loop {
        next_rhs_half_triangle(model, &mut he, &mut ht);
        if model.tri(model.triangle_at(ht)).exists {
            return SbElem::new(ht, he);
        }
    }
}

/// Index (0..3) of the half-edge among the facet's three edges,
/// regardless of direction.
pub fn he_index_in_facet(ht: Facet, he: CellEdge) -> u8 {
    let tri = connect3d_delaunay::TRI_VERTS[ht.idx as usize];

    for i in 0..3u8 {
        let v = tri[i as usize];
        if v != he.s && v != he.t {
            return i;
        }
    }

    3
}

/// Half-edge `i` of a facet, in the facet's cyclic direction.
pub fn facet_edge(ht: Facet, i: u8) -> CellEdge {
    let tri = connect3d_delaunay::TRI_VERTS[ht.idx as usize];

    CellEdge::new(
        ht.cell,
        tri[(i as usize + 1) % 3],
        tri[(i as usize + 2) % 3],
    )
}

/// Directed global vertex pair of a half-edge.
pub fn directed_pair(model: &Model, he: CellEdge) -> (u32, u32) {
    let (a, b) = model.dt.edge_vertices(he);
    (a.0, b.0)
}

/// Undirected equality of two half-edges by their global vertices.
pub fn edges_equal(model: &Model, he0: CellEdge, he1: CellEdge) -> bool {
    let (a0, b0) = model.dt.edge_vertices(he0);
    let (a1, b1) = model.dt.edge_vertices(he1);

    (a0.min(b0), a0.max(b0)) == (a1.min(b1), a1.max(b1))
}

// ----------------------------------------------------------------------
// separator boundary tracing
// ----------------------------------------------------------------------

// open edges that still have a non-open incident triangle, both
// directions, keyed by the directed global vertex pair
fn determine_cc_boundary_edges(model: &Model) -> BTreeMap<(u32, u32), CellEdge> {
    let mut map = BTreeMap::new();

    for eidx in 0..model.edges.len() as u32 {
        let e = EdgeId(eidx);
        let rec = model.edge(e);

        if !rec.finite || !rec.open {
            continue;
        }

        let mut closed_count = 0;

        for (f, _) in model.edge_fan(e) {
            let tri = model.tri(model.triangle_at(f));
            if tri.exists && !tri.open {
                closed_count += 1;
            }
        }

        if closed_count > 0 {
            let he = rec.rep;
            map.insert(directed_pair(model, he), he);
            map.insert(directed_pair(model, he.reversed()), he.reversed());
        }
    }

    map
}

// find an existing, closed, unmarked triangle at the edge adjacent to
// a cell labeled `label_oc`, returned as the half inside that cell
fn determine_unmarked_cc_boundary_ht(
    model: &Model,
    he: CellEdge,
    label_oc: i32,
) -> Option<Facet> {
    let (a, b) = model.dt.edge_vertices(he);
    let start = model.dt.first_facet_of_edge(he);

    for (f, entered) in model.dt.edge_fan(start, a, b) {
        let tid = model.triangle_at(f);
        let tri = model.tri(tid);

        if !tri.exists || tri.open || tri.label != -1 {
            continue;
        }

        if model.label(entered) == label_oc {
            return Some(model.dt.mirror_facet(f));
        }
        if model.label(f.cell) == label_oc {
            return Some(f);
        }
    }

    None
}

// walk the umbrella to the next open edge whose inside triangle is
// unmarked or marked with this SB
fn determine_next_cc_boundary_edge(model: &Model, elem: &mut SbElem, label_sb: i32) {
    loop {
        let prev = *elem;
        *elem = next_umbrella_elem(model, *elem);

        let edge_open = model.edge(model.edge_at(elem.he)).open;
        let label = model.tri(model.triangle_at(prev.ht)).label;

        if edge_open && (label == -1 || label == label_sb) {
            let (a, b) = model.dt.edge_vertices(elem.he);
            let he = model.dt.edge_in_cell(a, b, prev.ht.cell);
            let mut next = SbElem::new(prev.ht, he);
            next.reverse_he();
            *elem = next;
            return;
        }
    }
}

/// Trace all separator boundaries along the current open edges.
pub fn segment_closed_components(model: &mut Model) -> BTreeMap<i32, SeparatorBoundary> {
    let mut boundary_he_map = determine_cc_boundary_edges(model);
    let mut sbs: BTreeMap<i32, SeparatorBoundary> = BTreeMap::new();
    let mut label_sb = 0;

    while let Some((&start_key, &start_he)) = boundary_he_map.iter().next() {
        let Some(start_ht) = determine_unmarked_cc_boundary_ht(model, start_he, 0) else {
            boundary_he_map.remove(&start_key);
            continue;
        };

        let mut sb = SeparatorBoundary {
            label: label_sb,
            ..Default::default()
        };

        let (a, b) = model.dt.edge_vertices(start_he);
        let he = model.dt.edge_in_cell(a, b, start_ht.cell);
        let start_elem = SbElem::new(start_ht, he);
        let start_pair = directed_pair(model, start_elem.he);
        let mut curr = start_elem;
        let mut visited: BTreeSet<SbElem> = BTreeSet::new();

        loop {
            if !visited.insert(curr) {
                break;
            }
            sb.boundary.push(curr);
            sb.sep_vertex_set
                .insert(model.dt.cell_vertex(curr.he.cell, curr.he.s));

            determine_next_cc_boundary_edge(model, &mut curr, label_sb);

            let marked = model.triangle_at(curr.ht);
            model.tri_mut(marked).label = label_sb;

            if determine_unmarked_cc_boundary_ht(model, curr.he, 0).is_none() {
                boundary_he_map.remove(&directed_pair(model, curr.he));
            }

            if directed_pair(model, curr.he) == start_pair {
                break;
            }
        }

        sbs.insert(label_sb, sb);
        label_sb += 1;
    }

    sbs
}

// ----------------------------------------------------------------------
// SB grouping and the enclosing boundary sweep
// ----------------------------------------------------------------------

type ElemMap = BTreeMap<(u32, u32), VecDeque<SbElem>>;

fn elem_map_pop(map: &mut ElemMap) -> Option<SbElem> {
    let key = *map.keys().next()?;
    let bucket = map.get_mut(&key).unwrap();
    let elem = bucket.pop_front().unwrap();

    if bucket.is_empty() {
        map.remove(&key);
    }

    Some(elem)
}

fn elem_map_insert(map: &mut ElemMap, key: (u32, u32), elem: SbElem) {
    map.entry(key).or_default().push_back(elem);
}

// remove an entry under `key` referring to the given facet
fn elem_map_cancel(map: &mut ElemMap, key: (u32, u32), ht: Facet) -> bool {
    if let Some(bucket) = map.get_mut(&key) {
        if let Some(pos) = bucket.iter().position(|e| e.ht == ht) {
            bucket.remove(pos);
            if bucket.is_empty() {
                map.remove(&key);
            }
            return true;
        }
    }

    false
}

/// Sweep each SB's enclosing boundary, merging SBs that touch into
/// groups and collecting each group's boundary half-triangles and
/// interior vertices.
pub fn determine_separator_boundaries(
    model: &mut Model,
    sbs: &mut BTreeMap<i32, SeparatorBoundary>,
) -> Vec<SbGroup> {
    let mut sb_set: BTreeSet<i32> = sbs.keys().copied().collect();
    let mut groups: Vec<SbGroup> = Vec::new();

    while let Some(label_sb) = sb_set.pop_first() {
        let group_id = groups.len();
        groups.push(SbGroup::default());

        let mut elem_map: ElemMap = BTreeMap::new();
        let mut other_labels: BTreeSet<i32> = BTreeSet::new();

        for elem in &sbs[&label_sb].boundary {
            elem_map_insert(&mut elem_map, directed_pair(model, elem.he), *elem);
        }

        let label_oc = match sbs[&label_sb].boundary.first() {
            Some(elem) => model.label(elem.ht.cell),
            None => 0,
        };

        let limit = model.triangles.len() * 8;
        let mut processed = 0usize;

        while let Some(elem) = elem_map_pop(&mut elem_map) {
            processed += 1;
            assert!(processed <= limit, "enclosing boundary sweep failed to close");

            let ht = elem.ht;
            let outside_index = he_index_in_facet(ht, elem.he);
            let tid = model.triangle_at(ht);

            let curr_label = model.tri(tid).label;
            let other_sb_touched = curr_label != -1 && curr_label != label_sb;

            if other_sb_touched {
                other_labels.insert(curr_label);
            }

            model.tri_mut(tid).label = label_sb;
            groups[group_id]
                .boundary_ht_set
                .insert(model.dt.mirror_facet(ht));

            let mut removed_count = 0;

            for i in 0..3u8 {
                if i == outside_index {
                    continue;
                }

                let he_i = facet_edge(ht, i);
                let pair = directed_pair(model, he_i);

                if elem_map_cancel(&mut elem_map, pair, ht) {
                    removed_count += 1;
                    continue;
                }

                // do not re-enter an edge owned by a touched SB
                if other_sb_touched
                    && sbs[&curr_label]
                        .boundary
                        .contains(&SbElem::new(ht, he_i))
                {
                    continue;
                }

                // advance inside the CC to the next facet adjacent to
                // the same open space
                let mut new_ht = ht;
                let mut new_he = he_i;

                loop {
                    next_rhs_half_triangle(model, &mut new_he, &mut new_ht);
                    let exists = model.tri(model.triangle_at(new_ht)).exists;
                    let opp = model.dt.mirror_facet(new_ht);

                    if exists && model.label(opp.cell) == label_oc {
                        let (a, b) = model.dt.edge_vertices(he_i);
                        let located = model.dt.edge_in_cell(a, b, opp.cell).reversed();
                        elem_map_insert(
                            &mut elem_map,
                            directed_pair(model, located),
                            SbElem::new(opp, located),
                        );
                        break;
                    }
                }
            }

            if removed_count == 0 {
                let tri = connect3d_delaunay::TRI_VERTS[ht.idx as usize];
                let v = model
                    .dt
                    .cell_vertex(ht.cell, tri[outside_index as usize]);
                groups[group_id].int_vertex_set.insert(v);
            }
        }

        // record group membership
        groups[group_id].sb_labels.insert(label_sb);
        sbs.get_mut(&label_sb).unwrap().group = Some(group_id);

        for other in other_labels {
            groups[group_id].sb_labels.insert(other);
            let other_sb = sbs.get_mut(&other).unwrap();
            other_sb.group = Some(group_id);
            sb_set.remove(&other);

            let sep = other_sb.sep_vertex_set.clone();
            groups[group_id].int_vertex_set = groups[group_id]
                .int_vertex_set
                .difference(&sep)
                .copied()
                .collect();
        }
    }

    groups
}

// ----------------------------------------------------------------------
// OCB location
// ----------------------------------------------------------------------

// umbrella walk to the next element whose edge is in the set; returns
// the element just before it and advances `curr` onto it
fn locate_next_edge_in_set(
    model: &Model,
    curr: &mut SbElem,
    edge_set: &BTreeSet<EdgeId>,
) -> SbElem {
    loop {
        let prev = *curr;
        *curr = next_umbrella_elem(model, *curr);

        if edge_set.contains(&model.edge_at(curr.he)) {
            return prev;
        }
    }
}

// follow the umbrella at `curr_vh` to the next boundary element whose
// edge belongs to the set
fn locate_next_outside_elem(
    model: &Model,
    start_elem: SbElem,
    curr_vh: VertexId,
    edge_set: &BTreeSet<EdgeId>,
    is_sb_loop: bool,
) -> SbElem {
    let direction = model.dt.cell_vertex(start_elem.he.cell, start_elem.he.s) == curr_vh;

    let mut start = start_elem;
    if !direction {
        start.reverse_he();
    }

    let mut curr = start;
    let mut prev = locate_next_edge_in_set(model, &mut curr, edge_set);

    if is_sb_loop {
        // circle the whole umbrella and keep the last element in the
        // set that is not an open triangle
        let mut prev_prev;

        loop {
            prev_prev = prev;
            prev = locate_next_edge_in_set(model, &mut curr, edge_set);

            if model.tri(model.triangle_at(prev.ht)).open {
                prev = prev_prev;
            }

            if edges_equal(model, curr.he, start.he) {
                break;
            }
        }

        prev = prev_prev;
    } else if edges_equal(model, curr.he, start.he) {
        // came all the way around: the vertex is hole-adjacent, find an
        // edge of the set reached twice in a row
        loop {
            let prev_he = curr.he;
            prev = locate_next_edge_in_set(model, &mut curr, edge_set);

            if edges_equal(model, curr.he, prev_he) {
                break;
            }
        }
    }

    let mut result = prev;
    result.advance_edge_in_triangle();

    if !direction {
        result.reverse_he();
    }

    result
}

// rotate inside the CC to the other boundary facet at this edge
fn get_cc_inside_ht(model: &Model, elem: SbElem, label_oc: i32) -> SbElem {
    let mut he = elem.he;
    let mut ht = elem.ht;

    loop {
        next_rhs_half_triangle(model, &mut he, &mut ht);

        if model.label(model.dt.mirror_facet(ht).cell) == label_oc {
            return SbElem::new(ht, he);
        }
    }
}

// the element on the opposite side of the open region
fn get_cc_opposite_ht(model: &Model, elem: SbElem, label_oc: i32) -> SbElem {
    let inside = get_cc_inside_ht(model, elem, label_oc);

    let opp = model.dt.mirror_facet(inside.ht);
    let (a, b) = model.dt.edge_vertices(inside.he);
    let he = model.dt.edge_in_cell(a, b, opp.cell).reversed();

    SbElem::new(opp, he)
}

fn get_cc_for_sb(
    sbs: &BTreeMap<i32, SeparatorBoundary>,
    groups: &[SbGroup],
    label: i32,
) -> Option<usize> {
    let group = sbs[&label].group?;

    groups[group]
        .sb_labels
        .iter()
        .find_map(|l| sbs[l].cc)
}

fn get_or_create_cc_for_sb(
    sbs: &mut BTreeMap<i32, SeparatorBoundary>,
    groups: &[SbGroup],
    ccs: &mut Vec<Cc>,
    label: i32,
) -> usize {
    let cc = match get_cc_for_sb(sbs, groups, label) {
        Some(cc) => cc,
        None => {
            ccs.push(Cc::default());
            ccs.len() - 1
        }
    };

    ccs[cc].outside_set.insert(label);
    sbs.get_mut(&label).unwrap().cc = Some(cc);

    cc
}

fn merge_ccs(
    sbs: &mut BTreeMap<i32, SeparatorBoundary>,
    ccs: &mut [Cc],
    keep: usize,
    drop: usize,
) {
    let moved: Vec<i32> = ccs[drop].outside_set.iter().copied().collect();

    for label in moved {
        ccs[keep].outside_set.insert(label);
        sbs.get_mut(&label).unwrap().cc = Some(keep);
    }

    ccs[drop].outside_set.clear();
}

// split each SB into loop edges (odd occurrence count) and tree edges,
// then chain the loop edges into closed loops
fn locate_sb_loops(
    model: &Model,
    sbs: &BTreeMap<i32, SeparatorBoundary>,
) -> (
    Vec<Vec<SbElem>>,
    BTreeMap<EdgeId, (SbElem, SbElem)>,
    BTreeSet<EdgeId>,
) {
    let mut loops: Vec<Vec<SbElem>> = Vec::new();
    let mut sb_tree_map: BTreeMap<EdgeId, (SbElem, SbElem)> = BTreeMap::new();
    let mut sb_loop_set: BTreeSet<EdgeId> = BTreeSet::new();

    for sb in sbs.values() {
        let mut loop_edge_map: BTreeMap<EdgeId, SbElem> = BTreeMap::new();
        let mut tree_edge_map: BTreeMap<EdgeId, (SbElem, SbElem)> = BTreeMap::new();

        for &elem in &sb.boundary {
            let eid = model.edge_at(elem.he);

            if let Some(first) = loop_edge_map.remove(&eid) {
                tree_edge_map.entry(eid).or_insert((first, elem));
            } else {
                loop_edge_map.insert(eid, elem);
            }
        }

        let mut ve_map: BTreeMap<VertexId, BTreeSet<EdgeId>> = BTreeMap::new();

        for &eid in loop_edge_map.keys() {
            for v in model.edge(eid).verts {
                ve_map.entry(v).or_default().insert(eid);
            }
            sb_loop_set.insert(eid);
        }

        while let Some((&start_eid, &start_elem)) = loop_edge_map.iter().next() {
            let mut chain: Vec<SbElem> = Vec::new();
            let mut curr_edge = start_eid;
            let mut curr_elem = start_elem;

            let start_vh = model.edge(start_eid).verts[0];
            let mut next_vh = model.edge(start_eid).verts[1];
            let mut curr_vh;

            if let Some(set) = ve_map.get_mut(&start_vh) {
                set.remove(&start_eid);
            }

            loop {
                chain.push(curr_elem);
                loop_edge_map.remove(&curr_edge);

                curr_vh = next_vh;
                let set = ve_map.get_mut(&curr_vh).expect("loop vertex");

                if curr_vh != start_vh {
                    if set.len() == 2 {
                        let next = *set.iter().find(|&&e| e != curr_edge).expect("next edge");
                        set.remove(&curr_edge);
                        set.remove(&next);
                        curr_edge = next;
                        curr_elem = loop_edge_map[&curr_edge];
                    } else {
                        let set_clone = set.clone();
                        let elem = locate_next_outside_elem(
                            model, curr_elem, curr_vh, &set_clone, true,
                        );
                        let set = ve_map.get_mut(&curr_vh).unwrap();
                        set.remove(&curr_edge);
                        curr_edge = model.edge_at(elem.he);
                        set.remove(&curr_edge);
                        curr_elem = elem;
                    }

                    let verts = model.edge(curr_edge).verts;
                    next_vh = if verts[0] == curr_vh { verts[1] } else { verts[0] };
                } else {
                    set.remove(&curr_edge);
                }

                if ve_map.get(&curr_vh).map_or(false, |s| s.is_empty()) {
                    ve_map.remove(&curr_vh);
                }

                if curr_vh == start_vh {
                    break;
                }
            }

            loops.push(chain);
        }

        sb_tree_map.extend(tree_edge_map);
    }

    (loops, sb_tree_map, sb_loop_set)
}

// overlapping SB loops join into one OCB with two parallel sides
fn combine_sb_loops_to_ocbs(
    model: &Model,
    sbs: &mut BTreeMap<i32, SeparatorBoundary>,
    groups: &[SbGroup],
    loops: &[Vec<SbElem>],
    ccs: &mut Vec<Cc>,
    ocbs: &mut Vec<OcBoundary>,
) {
    let mut loop_set: BTreeSet<usize> = (0..loops.len()).collect();
    let mut ht_loop_map: BTreeMap<Facet, usize> = BTreeMap::new();

    for (idx, chain) in loops.iter().enumerate() {
        for elem in chain {
            ht_loop_map.insert(elem.ht, idx);
        }
    }

    while let Some(first) = loop_set.pop_first() {
        let mut ocb = OcBoundary::default();
        let mut side = 0usize;
        let mut opp_loop_set: BTreeSet<usize> = BTreeSet::new();
        let mut edge_set: BTreeSet<EdgeId> = BTreeSet::new();
        let mut sb_label_set: BTreeSet<i32> = BTreeSet::new();

        let mut curr_elems: Vec<SbElem> = loops[first].clone();
        sb_label_set.insert(model.tri(model.triangle_at(curr_elems[0].ht)).label);

        while !curr_elems.is_empty() {
            for &elem in &curr_elems {
                ocb.sides[side].push(elem);
                let opp = get_cc_opposite_ht(model, elem, 0);
                ocb.sides[1 - side].push(opp);
                edge_set.insert(model.edge_at(elem.he));

                if let Some(&l) = ht_loop_map.get(&opp.ht) {
                    opp_loop_set.insert(l);
                }
            }

            side = 1 - side;
            curr_elems.clear();

            for &lidx in &opp_loop_set {
                if loop_set.remove(&lidx) {
                    for &elem in &loops[lidx] {
                        if edge_set.insert(model.edge_at(elem.he)) {
                            curr_elems.push(elem);
                        }
                    }

                    sb_label_set
                        .insert(model.tri(model.triangle_at(loops[lidx][0].ht)).label);
                }
            }

            opp_loop_set.clear();
        }

        // associate the joined SBs with one CC
        let mut cc_set: BTreeSet<usize> = BTreeSet::new();

        for &label in &sb_label_set {
            if let Some(cc) = get_cc_for_sb(sbs, groups, label) {
                cc_set.insert(cc);
            }
        }

        if cc_set.len() == 2 {
            let mut iter = cc_set.iter();
            let keep = *iter.next().unwrap();
            let drop = *iter.next().unwrap();
            merge_ccs(sbs, ccs, keep, drop);
            cc_set.remove(&drop);
        }

        let mut cc = cc_set.iter().next().copied();

        for &label in &sb_label_set {
            let id = match cc {
                Some(id) => {
                    ccs[id].outside_set.insert(label);
                    sbs.get_mut(&label).unwrap().cc = Some(id);
                    id
                }
                None => get_or_create_cc_for_sb(sbs, groups, ccs, label),
            };
            cc = Some(id);
        }

        if let Some(id) = cc {
            ocb.cc_list.push(id);
        }

        ocbs.push(ocb);
    }
}

// tree edges incident to exactly one deflated triangle or one SB loop
// still need an OCB
fn locate_loop_candidates(
    model: &Model,
    sb_tree_map: &BTreeMap<EdgeId, (SbElem, SbElem)>,
    sb_loop_set: &BTreeSet<EdgeId>,
) -> BTreeMap<EdgeId, (SbElem, SbElem)> {
    let mut candidates = BTreeMap::new();

    for (&eid, &pair) in sb_tree_map {
        let mut count = incident_open_triangle_count(model, eid);
        debug_assert!(count <= 1);

        if sb_loop_set.contains(&eid) {
            count += 1;
        }

        if count == 1 {
            candidates.insert(eid, pair);
        }
    }

    candidates
}

fn create_ocbs_from_loop_candidates(
    model: &Model,
    sbs: &mut BTreeMap<i32, SeparatorBoundary>,
    groups: &[SbGroup],
    mut candidates: BTreeMap<EdgeId, (SbElem, SbElem)>,
    ccs: &mut Vec<Cc>,
    ocbs: &mut Vec<OcBoundary>,
) {
    let mut ve_map: BTreeMap<VertexId, BTreeSet<EdgeId>> = BTreeMap::new();

    for &eid in candidates.keys() {
        for v in model.edge(eid).verts {
            ve_map.entry(v).or_default().insert(eid);
        }
    }

    while let Some((&start_eid, &(elem_a, elem_b))) = candidates.iter().next() {
        let mut ocb = OcBoundary::default();
        let mut sb_label_set: BTreeSet<i32> = BTreeSet::new();

        let mut curr_elem = [elem_a, elem_b];
        let mut curr_edge = [start_eid, start_eid];

        let start_vh = model.edge(start_eid).verts[0];
        let mut next_vh = model.edge(start_eid).verts[1];
        let mut curr_vh;

        if let Some(set) = ve_map.get_mut(&start_vh) {
            set.remove(&start_eid);
        }

        loop {
            for i in 0..2 {
                ocb.sides[i].push(curr_elem[i]);
                sb_label_set.insert(model.tri(model.triangle_at(curr_elem[i].ht)).label);
            }

            candidates.remove(&curr_edge[0]);

            curr_vh = next_vh;
            let set = ve_map.get_mut(&curr_vh).expect("candidate vertex");

            if curr_vh != start_vh {
                let prev_edge = curr_edge[0];
                let set_clone = set.clone();

                for i in 0..2 {
                    let last = *ocb.sides[i].last().unwrap();
                    curr_elem[i] =
                        locate_next_outside_elem(model, last, curr_vh, &set_clone, false);
                    curr_edge[i] = model.edge_at(curr_elem[i].he);
                }

                let set = ve_map.get_mut(&curr_vh).unwrap();
                set.remove(&prev_edge);
                set.remove(&curr_edge[0]);

                let verts = model.edge(curr_edge[0]).verts;
                next_vh = if verts[0] == curr_vh { verts[1] } else { verts[0] };
            } else {
                set.remove(&curr_edge[0]);
            }

            if ve_map.get(&curr_vh).map_or(false, |s| s.is_empty()) {
                ve_map.remove(&curr_vh);
            }

            if curr_vh == start_vh {
                break;
            }
        }

        let mut cc_set: BTreeSet<usize> = BTreeSet::new();

        for &label in &sb_label_set {
            let cc = get_or_create_cc_for_sb(sbs, groups, ccs, label);
            cc_set.insert(cc);
        }

        ocb.cc_list = cc_set.into_iter().collect();
        ocbs.push(ocb);
    }
}

/// Locate all open-component boundaries.
pub fn locate_ocbs(
    model: &mut Model,
    sbs: &mut BTreeMap<i32, SeparatorBoundary>,
    groups: &[SbGroup],
) -> (Vec<Cc>, Vec<OcBoundary>) {
    let mut ccs: Vec<Cc> = Vec::new();
    let mut ocbs: Vec<OcBoundary> = Vec::new();

    let (loops, sb_tree_map, sb_loop_set) = locate_sb_loops(model, sbs);

    combine_sb_loops_to_ocbs(model, sbs, groups, &loops, &mut ccs, &mut ocbs);

    let candidates = locate_loop_candidates(model, &sb_tree_map, &sb_loop_set);
    create_ocbs_from_loop_candidates(model, sbs, groups, candidates, &mut ccs, &mut ocbs);

    (ccs, ocbs)
}

/// Collapse each CC's boundary inward to collect its interior vertices.
pub fn determine_cc_vertex_sets(model: &Model, seg: &mut Segmentation) {
    for cc_id in 0..seg.ccs.len() {
        let mut boundary: BTreeSet<Facet> = BTreeSet::new();

        for group in cc_groups(&seg.sbs, &seg.ccs[cc_id]) {
            boundary.extend(seg.groups[group].boundary_ht_set.iter().copied());
        }

        let mut interior: BTreeSet<VertexId> = BTreeSet::new();

        while let Some(&ht) = boundary.iter().next() {
            boundary.remove(&ht);
            let cell = ht.cell;
            let mut removed_count = 0;

            for i in 0..4u8 {
                if i == ht.idx {
                    continue;
                }

                let next = Facet::new(cell, i);

                if boundary.remove(&next) {
                    removed_count += 1;
                } else {
                    boundary.insert(model.dt.mirror_facet(next));
                }
            }

            if removed_count == 0 {
                let v = model.dt.cell_vertex(cell, ht.idx);
                if !v.is_infinite() {
                    interior.insert(v);
                }
            }
        }

        seg.ccs[cc_id].interior_vertex_set = interior;
    }
}

/// The groups of all SBs attached to a CC.
pub fn cc_groups(sbs: &BTreeMap<i32, SeparatorBoundary>, cc: &Cc) -> BTreeSet<usize> {
    cc.outside_set
        .iter()
        .filter_map(|label| sbs[label].group)
        .collect()
}

/// Full segmentation pass over the current classification.
pub fn segment(model: &mut Model) -> Segmentation {
    let mut sbs = segment_closed_components(model);
    let groups = determine_separator_boundaries(model, &mut sbs);
    let (ccs, ocbs) = locate_ocbs(model, &mut sbs, &groups);

    let mut seg = Segmentation {
        sbs,
        groups,
        ccs,
        ocbs,
    };

    determine_cc_vertex_sets(model, &mut seg);

    seg
}

/// The union of boundary half-triangles over a CC's groups.
pub fn cc_boundary_ht_set(seg: &Segmentation, cc: usize) -> BTreeSet<Facet> {
    let mut set = BTreeSet::new();

    for group in cc_groups(&seg.sbs, &seg.ccs[cc]) {
        set.extend(seg.groups[group].boundary_ht_set.iter().copied());
    }

    set
}

/// Boundary triangles of a CC as records.
pub fn cc_boundary_triangles(model: &Model, seg: &Segmentation, cc: usize) -> BTreeSet<TriangleId> {
    cc_boundary_ht_set(seg, cc)
        .into_iter()
        .map(|ht| model.triangle_at(ht))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary_complex::construct_boundary_complex;
    use crate::conformity::fix_nonconforming_entities;
    use crate::criterion::Criterion;
    use crate::spaces::{classify_all, relabel_spaces};
    use connect3d_core::Point3d;

    #[test]
    fn test_closed_surface_has_no_separator_boundaries() {
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

        let seg = segment(&mut model);
        assert!(seg.sbs.is_empty());
        assert!(seg.ocbs.is_empty());
    }

    #[test]
    fn test_segmentation_after_conformity_runs_clean() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(23);

        let points: Vec<Point3d> = (0..30)
            .map(|_| {
                Point3d::new(
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                )
            })
            .collect();

        let mut model = Model::build(points, Criterion::LongestEdge).unwrap();
        construct_boundary_complex(&mut model);
        relabel_spaces(&mut model);
        classify_all(&mut model);
        fix_nonconforming_entities(&mut model);

        model.reset_classification();
        relabel_spaces(&mut model);
        classify_all(&mut model);

        let seg = segment(&mut model);

        // every traced boundary is non-trivial and its sides match up
        for sb in seg.sbs.values() {
            assert!(!sb.boundary.is_empty());
        }
        for ocb in &seg.ocbs {
            assert_eq!(ocb.sides[0].len(), ocb.sides[1].len());
        }
    }
}
