//! Boundary inflation
//!
//! Expands the surface outward into deflated exterior regions: a
//! priority queue over exterior tetrahedra touching the surface near
//! open vertices, popped cheapest-first (sum of criteria over the
//! triangles each would newly expose). Added tetrahedra receive fresh
//! space labels; the neighborhood is re-classified and re-seeded until
//! no vertex remains open.

use crate::model::Model;
use crate::spaces::classify_cells;
use connect3d_delaunay::{CellId, Facet, VertexId};
use ordered_float::OrderedFloat;
use std::collections::{BTreeSet, HashMap};

fn is_inflatable(model: &Model, c: CellId) -> bool {
    if !model.dt.is_finite_cell(c) || model.label(c) != 0 {
        return false;
    }

    (0..4u8).any(|i| model.tri(model.triangle_at(Facet::new(c, i))).exists)
}

fn seed_vertex(
    model: &Model,
    v: VertexId,
    queue: &mut BTreeSet<(OrderedFloat<f64>, CellId)>,
    keys: &mut HashMap<CellId, f64>,
) {
    for c in model.dt.incident_cells(v) {
        if keys.contains_key(&c) || !is_inflatable(model, c) {
            continue;
        }

        let cost = model.criterion_for_missing_triangles(c);
        queue.insert((OrderedFloat(cost), c));
        keys.insert(c, cost);
    }
}

/// Inflate until no vertex is open.
pub fn inflate_boundary(model: &mut Model) {
    loop {
        let mut queue: BTreeSet<(OrderedFloat<f64>, CellId)> = BTreeSet::new();
        let mut keys: HashMap<CellId, f64> = HashMap::new();

        for v in 0..model.dt.num_vertices() as u32 {
            let vid = VertexId(v);
            if model.vertex_state[vid.index()].open {
                seed_vertex(model, vid, &mut queue, &mut keys);
            }
        }

        if queue.is_empty() {
            break;
        }

        while let Some(&(cost, c)) = queue.iter().next() {
            queue.remove(&(cost, c));
            keys.remove(&c);

            // stale entries are skipped, not re-costed
            if !is_inflatable(model, c) || cost.0 != model.criterion_for_missing_triangles(c) {
                continue;
            }

            // the cell must still serve an open vertex
            let touches_open = model.dt.cell_vertices(c).iter().any(|&v| {
                !v.is_infinite() && model.vertex_state[v.index()].open
            });
            if !touches_open {
                continue;
            }

            let label = model.fresh_label();
            model.set_label(c, label);

            for i in 0..4u8 {
                let tid = model.triangle_at(Facet::new(c, i));
                if !model.tri(tid).exists {
                    model.set_exists(tid, true);
                }
            }

            classify_cells(model, &[c]);

            // re-seed around vertices that are still open or
            // non-conforming
            for v in model.dt.cell_vertices(c) {
                if v.is_infinite() {
                    continue;
                }
                let state = model.vertex_state[v.index()];
                if state.open || state.is_nc() {
                    seed_vertex(model, v, &mut queue, &mut keys);
                }
            }
        }
    }
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
    fn test_inflation_closes_all_open_vertices() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(31);

        let points: Vec<Point3d> = (0..35)
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

        inflate_boundary(&mut model);

        model.reset_classification();
        relabel_spaces(&mut model);
        classify_all(&mut model);

        assert!(model.vertex_state.iter().all(|vs| !vs.open));
    }

    #[test]
    fn test_closed_surface_inflates_nothing() {
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

        let labels_before = model.labels.clone();
        inflate_boundary(&mut model);

        assert_eq!(model.labels, labels_before);
    }
}
