//! Boundary smoothing
//!
//! Local edge flips that reduce total discrete curvature: an exterior
//! tetrahedron carrying exactly two boundary facets can be absorbed
//! into the adjacent interior space, replacing its two facets by the
//! other two. The flip is applied when the curvature delta is negative
//! and the configuration stays manifold.

use crate::bubbles::edge_curvature_between;
use crate::model::{EdgeId, Model, TriangleId};
use connect3d_delaunay::{CellId, Facet};
use std::collections::{BTreeSet, VecDeque};

const CURVATURE_GAIN_MIN: f64 = 1e-9;

// the two existing and two absent facets of a flip candidate
struct FlipCandidate {
    cell: CellId,
    existing: [u8; 2],
    absent: [u8; 2],
    target_label: i32,
}

fn flip_candidate(model: &Model, c: CellId) -> Option<FlipCandidate> {
    if !model.dt.is_finite_cell(c) || model.label(c) != 0 {
        return None;
    }

    let mut existing = Vec::new();
    let mut absent = Vec::new();

    for i in 0..4u8 {
        if model.tri(model.triangle_at(Facet::new(c, i))).exists {
            existing.push(i);
        } else {
            absent.push(i);
        }
    }

    if existing.len() != 2 {
        return None;
    }

    // both boundary facets must face the same interior space
    let l0 = model.label(model.dt.mirror_facet(Facet::new(c, existing[0])).cell);
    let l1 = model.label(model.dt.mirror_facet(Facet::new(c, existing[1])).cell);

    if l0 != l1 || l0 == 0 {
        return None;
    }

    Some(FlipCandidate {
        cell: c,
        existing: [existing[0], existing[1]],
        absent: [absent[0], absent[1]],
        target_label: l0,
    })
}

// the other existing triangle at an edge currently shared by exactly
// two existing triangles, one of which is given
fn fan_partner(model: &Model, e: EdgeId, own: TriangleId) -> Option<TriangleId> {
    let mut partner = None;
    let mut count = 0;

    for (f, _) in model.edge_fan(e) {
        let tid = model.triangle_at(f);
        if model.tri(tid).exists {
            count += 1;
            if tid != own {
                partner = Some(tid);
            }
        }
    }

    if count == 2 {
        partner
    } else {
        None
    }
}

fn try_flip(model: &mut Model, cand: &FlipCandidate) -> bool {
    let c = cand.cell;
    let t_in = [
        model.triangle_at(Facet::new(c, cand.existing[0])),
        model.triangle_at(Facet::new(c, cand.existing[1])),
    ];
    let t_out = [
        model.triangle_at(Facet::new(c, cand.absent[0])),
        model.triangle_at(Facet::new(c, cand.absent[1])),
    ];

    // shared edge of the current pair, and of the replacement pair
    let shared_in = match model.shared_edge(t_in[0], t_in[1]) {
        Some(e) => e,
        None => return false,
    };
    let shared_out = match model.shared_edge(t_out[0], t_out[1]) {
        Some(e) => e,
        None => return false,
    };

    // the replacement edge must carry no surface yet
    if model.count_edge_triangles(shared_out) != 0 {
        return false;
    }

    // the absorbed edge must not stay exposed to the exterior
    let exposed = model
        .cells_around_edge(shared_in)
        .iter()
        .any(|&c2| c2 != c && model.label(c2) == 0);
    if exposed {
        return false;
    }

    // outer edges: each belongs to one existing and one absent facet,
    // and must currently carry a clean two-triangle fan
    let mut before = edge_curvature_between(model, shared_in, t_in[0], t_in[1]);
    let mut after = edge_curvature_between(model, shared_out, t_out[0], t_out[1]);

    for &tid_in in &t_in {
        for &e in &model.tri(tid_in).edges.clone() {
            if e == shared_in {
                continue;
            }

            let partner = match fan_partner(model, e, tid_in) {
                Some(p) => p,
                None => return false,
            };

            // the absent facet of the cell containing this edge takes
            // over after the flip
            let tid_out = t_out
                .iter()
                .copied()
                .find(|&t| model.tri_index_of_edge(t, e).is_some());
            let tid_out = match tid_out {
                Some(t) => t,
                None => return false,
            };

            before += edge_curvature_between(model, e, tid_in, partner);
            after += edge_curvature_between(model, e, tid_out, partner);
        }
    }

    if after - before >= -CURVATURE_GAIN_MIN {
        return false;
    }

    // apply: swap the facet pair and absorb the cell
    for &t in &t_in {
        model.set_exists(t, false);
    }
    for &t in &t_out {
        model.set_exists(t, true);
    }
    model.set_label(c, cand.target_label);

    true
}

/// Flip until no edge yields a curvature reduction.
pub fn smooth_boundary(model: &mut Model) {
    let mut worklist: VecDeque<CellId> = VecDeque::new();
    let mut queued: BTreeSet<CellId> = BTreeSet::new();

    for c in model.dt.cell_ids() {
        if flip_candidate(model, c).is_some() {
            worklist.push_back(c);
            queued.insert(c);
        }
    }

    let limit = model.dt.num_cells() * 16;
    let mut processed = 0usize;

    while let Some(c) = worklist.pop_front() {
        queued.remove(&c);

        processed += 1;
        if processed > limit {
            break;
        }

        let Some(cand) = flip_candidate(model, c) else {
            continue;
        };

        if !try_flip(model, &cand) {
            continue;
        }

        // neighbors of the absorbed cell may have become candidates
        for v in model.dt.cell_vertices(c) {
            if v.is_infinite() {
                continue;
            }
            for c2 in model.dt.incident_cells(v) {
                if flip_candidate(model, c2).is_some() && queued.insert(c2) {
                    worklist.push_back(c2);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary_complex::construct_boundary_complex;
    use crate::criterion::Criterion;
    use crate::spaces::{classify_all, relabel_spaces};
    use connect3d_core::Point3d;

    #[test]
    fn test_smoothing_preserves_closed_tetrahedron() {
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

        smooth_boundary(&mut model);

        let existing = model.triangles.iter().filter(|t| t.exists).count();
        assert_eq!(existing, 4);
    }

    #[test]
    fn test_smoothing_keeps_surface_closed() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(5);

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
        crate::conformity::fix_nonconforming_entities(&mut model);

        model.reset_classification();
        relabel_spaces(&mut model);
        classify_all(&mut model);
        crate::inflate::inflate_boundary(&mut model);

        // edge counts before smoothing
        let closed = |model: &Model| {
            (0..model.edges.len() as u32).all(|e| {
                let count = model.count_edge_triangles(EdgeId(e));
                count == 0 || count == 2
            })
        };

        if closed(&model) {
            smooth_boundary(&mut model);
            assert!(closed(&model));
        }
    }
}
