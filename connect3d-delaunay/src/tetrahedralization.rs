//! Incremental 3D Delaunay tetrahedralization
//!
//! The structure follows the classic triangulation layout: one
//! infinite vertex, and for every hull facet an infinite cell, so that
//! each facet of each cell has exactly one mirror facet in the
//! adjacent cell. Cells store four vertex ids and four neighbor ids,
//! with neighbor `i` opposite vertex `i`.
//!
//! Local index tables fix the facet and edge numbering:
//! facet `i` of a cell consists of the vertices `TRI_VERTS[i]`, listed
//! so that for a positively oriented cell the fourth vertex lies on
//! the positive side of the triple. A facet's triple therefore appears
//! in reversed cyclic order when read from the two adjacent cells.

use crate::predicates::{insphere, orient3d, orient3d_value, Sign};
use connect3d_core::{Error, Point3d, Result};
use std::collections::{BTreeSet, HashMap};

/// Vertex handle; `VertexId::INFINITE` is the vertex at infinity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VertexId(pub u32);

impl VertexId {
    pub const INFINITE: VertexId = VertexId(u32::MAX);

    pub fn is_infinite(self) -> bool {
        self == Self::INFINITE
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Cell (tetrahedron) handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellId(pub u32);

impl CellId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A half-triangle: the facet of `cell` opposite its local vertex `idx`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Facet {
    pub cell: CellId,
    pub idx: u8,
}

impl Facet {
    pub fn new(cell: CellId, idx: u8) -> Self {
        Self { cell, idx }
    }
}

/// A directed half-edge within one cell, from local vertex `s` to `t`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellEdge {
    pub cell: CellId,
    pub s: u8,
    pub t: u8,
}

impl CellEdge {
    pub fn new(cell: CellId, s: u8, t: u8) -> Self {
        Self { cell, s, t }
    }

    /// The same edge with reversed direction
    pub fn reversed(self) -> Self {
        Self {
            cell: self.cell,
            s: self.t,
            t: self.s,
        }
    }
}

/// Vertices of facet `i`, in the orientation described in the module docs.
pub const TRI_VERTS: [[u8; 3]; 4] = [[1, 3, 2], [0, 2, 3], [0, 3, 1], [0, 1, 2]];

/// Local vertex pairs of the six edges of a cell.
pub const EDGE_VERTS: [[u8; 2]; 6] = [[0, 1], [0, 2], [0, 3], [1, 2], [1, 3], [2, 3]];

#[derive(Debug, Clone)]
struct CellData {
    verts: [VertexId; 4],
    neighbors: [CellId; 4],
}

const NO_CELL: CellId = CellId(u32::MAX);

/// A 3D Delaunay tetrahedralization over a set of points.
#[derive(Debug, Clone)]
pub struct Tetrahedralization {
    points: Vec<Point3d>,
    cells: Vec<CellData>,
    dead: Vec<bool>,
    free: Vec<u32>,
    vertex_cell: Vec<CellId>,
    infinite_cell: CellId,
}

impl Tetrahedralization {
    /// Build the tetrahedralization of `points` (already deduplicated).
    ///
    /// Fails with `InvalidData` if fewer than four points are given or
    /// all points are coplanar.
    pub fn build(points: &[Point3d]) -> Result<Self> {
        if points.len() < 4 {
            return Err(Error::InvalidData(
                "Need at least 4 points for a tetrahedralization".to_string(),
            ));
        }

        let mut dt = Self {
            points: points.to_vec(),
            cells: Vec::new(),
            dead: Vec::new(),
            free: Vec::new(),
            vertex_cell: vec![NO_CELL; points.len()],
            infinite_cell: NO_CELL,
        };

        let seed = dt.find_initial_simplex()?;
        dt.create_initial_cells(seed);

        let seed_set: BTreeSet<usize> = seed.iter().copied().collect();

        for i in 0..points.len() {
            if !seed_set.contains(&i) {
                dt.insert(VertexId(i as u32))?;
            }
        }

        dt.compact();
        dt.rebuild_vertex_cells()?;

        Ok(dt)
    }

    /// Coordinates of the finite vertices
    pub fn points(&self) -> &[Point3d] {
        &self.points
    }

    pub fn point(&self, v: VertexId) -> &Point3d {
        &self.points[v.index()]
    }

    pub fn num_vertices(&self) -> usize {
        self.points.len()
    }

    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    /// Iterate over all cell ids, finite and infinite
    pub fn cell_ids(&self) -> impl Iterator<Item = CellId> {
        (0..self.cells.len() as u32).map(CellId)
    }

    pub fn cell_vertices(&self, c: CellId) -> [VertexId; 4] {
        self.cells[c.index()].verts
    }

    pub fn cell_vertex(&self, c: CellId, i: u8) -> VertexId {
        self.cells[c.index()].verts[i as usize]
    }

    pub fn neighbor(&self, c: CellId, i: u8) -> CellId {
        self.cells[c.index()].neighbors[i as usize]
    }

    pub fn is_infinite_cell(&self, c: CellId) -> bool {
        self.cells[c.index()]
            .verts
            .iter()
            .any(|v| v.is_infinite())
    }

    pub fn is_finite_cell(&self, c: CellId) -> bool {
        !self.is_infinite_cell(c)
    }

    /// One cell incident to the vertex at infinity
    pub fn infinite_cell(&self) -> CellId {
        self.infinite_cell
    }

    pub fn has_vertex(&self, c: CellId, v: VertexId) -> bool {
        self.cells[c.index()].verts.contains(&v)
    }

    /// Local index of `v` within cell `c`
    pub fn index_of_vertex(&self, c: CellId, v: VertexId) -> Option<u8> {
        self.cells[c.index()]
            .verts
            .iter()
            .position(|&w| w == v)
            .map(|i| i as u8)
    }

    /// The three vertices of a facet, in the cell's facet orientation
    pub fn facet_vertices(&self, f: Facet) -> [VertexId; 3] {
        let verts = self.cells[f.cell.index()].verts;
        let t = TRI_VERTS[f.idx as usize];
        [
            verts[t[0] as usize],
            verts[t[1] as usize],
            verts[t[2] as usize],
        ]
    }

    pub fn facet_is_finite(&self, f: Facet) -> bool {
        self.facet_vertices(f).iter().all(|v| !v.is_infinite())
    }

    /// The same facet as seen from the adjacent cell
    pub fn mirror_facet(&self, f: Facet) -> Facet {
        let n = self.neighbor(f.cell, f.idx);
        debug_assert!(n != NO_CELL);

        // the mirror index is the one vertex of `n` not shared with `f.cell`
        for i in 0..4u8 {
            if !self.has_vertex(f.cell, self.cell_vertex(n, i)) {
                return Facet::new(n, i);
            }
        }

        unreachable!("adjacent cells share all four vertices")
    }

    /// Both endpoints of a half-edge as vertex ids
    pub fn edge_vertices(&self, e: CellEdge) -> (VertexId, VertexId) {
        let verts = self.cells[e.cell.index()].verts;
        (verts[e.s as usize], verts[e.t as usize])
    }

    pub fn edge_is_finite(&self, e: CellEdge) -> bool {
        let (a, b) = self.edge_vertices(e);
        !a.is_infinite() && !b.is_infinite()
    }

    /// Re-locate the edge `(a, b)` inside another cell that contains it
    pub fn edge_in_cell(&self, a: VertexId, b: VertexId, cell: CellId) -> CellEdge {
        let s = self.index_of_vertex(cell, a).expect("edge vertex in cell");
        let t = self.index_of_vertex(cell, b).expect("edge vertex in cell");
        CellEdge::new(cell, s, t)
    }

    /// Rotate a facet around the edge `(a, b)` it contains, advancing to
    /// the next facet in a fixed rotational sense. The facet returned
    /// belongs to the cell entered by crossing `f`.
    pub fn rotate_facet_around_edge(&self, f: Facet, a: VertexId, b: VertexId) -> Facet {
        // third vertex of the facet besides the edge endpoints
        let tri = self.facet_vertices(f);
        let third = *tri.iter().find(|&&v| v != a && v != b).expect("facet edge");

        let mirror = self.mirror_facet(f);
        let idx = self
            .index_of_vertex(mirror.cell, third)
            .expect("shared vertex in neighbor");

        Facet::new(mirror.cell, idx)
    }

    /// All facets around an edge in cyclic order, starting at `start`,
    /// paired with the cell entered by crossing each facet.
    pub fn edge_fan(&self, start: Facet, a: VertexId, b: VertexId) -> Vec<(Facet, CellId)> {
        let mut fan = Vec::new();
        let mut curr = start;

        loop {
            let next = self.rotate_facet_around_edge(curr, a, b);
            fan.push((curr, next.cell));
            curr = next;
            if curr == start {
                break;
            }
            debug_assert!(fan.len() <= self.cells.len() * 4);
        }

        fan
    }

    /// A facet containing the given edge, suitable as a fan start
    pub fn first_facet_of_edge(&self, e: CellEdge) -> Facet {
        // either facet of the cell that keeps both endpoints
        for i in 0..4u8 {
            if i != e.s && i != e.t {
                return Facet::new(e.cell, i);
            }
        }
        unreachable!()
    }

    /// All cells incident to a finite vertex
    pub fn incident_cells(&self, v: VertexId) -> Vec<CellId> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![self.vertex_cell[v.index()]];

        while let Some(c) = stack.pop() {
            if !seen.insert(c) {
                continue;
            }
            let opposite = self.index_of_vertex(c, v).expect("incident cell");
            for i in 0..4u8 {
                if i != opposite {
                    stack.push(self.neighbor(c, i));
                }
            }
        }

        seen.into_iter().collect()
    }

    /// All facets incident to a finite vertex, each global triangle once
    pub fn incident_facets(&self, v: VertexId) -> Vec<Facet> {
        let mut facets = Vec::new();

        for c in self.incident_cells(v) {
            let opposite = self.index_of_vertex(c, v).expect("incident cell");
            for i in 0..4u8 {
                if i != opposite {
                    let f = Facet::new(c, i);
                    let m = self.mirror_facet(f);
                    // canonical half keeps each triangle once
                    if (f.cell, f.idx) < (m.cell, m.idx) {
                        facets.push(f);
                    }
                }
            }
        }

        facets
    }

    /// All edges incident to a finite vertex, one half-edge out of `v` each
    pub fn incident_edges(&self, v: VertexId) -> Vec<CellEdge> {
        let mut seen = BTreeSet::new();
        let mut edges = Vec::new();

        for c in self.incident_cells(v) {
            let s = self.index_of_vertex(c, v).expect("incident cell");
            for t in 0..4u8 {
                if t != s {
                    let other = self.cell_vertex(c, t);
                    if seen.insert(other) {
                        edges.push(CellEdge::new(c, s, t));
                    }
                }
            }
        }

        edges
    }

    // ------------------------------------------------------------------
    // construction
    // ------------------------------------------------------------------

    fn find_initial_simplex(&self) -> Result<[usize; 4]> {
        let pts = &self.points;
        let i0 = 0;

        let i1 = (1..pts.len())
            .find(|&i| (pts[i] - pts[i0]).norm_squared() > 0.0)
            .ok_or_else(|| Error::InvalidData("all points coincide".to_string()))?;

        let i2 = (1..pts.len())
            .find(|&i| {
                i != i1
                    && (pts[i1] - pts[i0])
                        .cross(&(pts[i] - pts[i0]))
                        .norm_squared()
                        > 1e-20
            })
            .ok_or_else(|| Error::InvalidData("all points are collinear".to_string()))?;

        let i3 = (1..pts.len())
            .find(|&i| {
                i != i1
                    && i != i2
                    && orient3d(&pts[i0], &pts[i1], &pts[i2], &pts[i]) != Sign::Degenerate
            })
            .ok_or_else(|| Error::InvalidData("all points are coplanar".to_string()))?;

        // order positively
        if orient3d(&pts[i0], &pts[i1], &pts[i2], &pts[i3]) == Sign::Positive {
            Ok([i0, i1, i2, i3])
        } else {
            Ok([i0, i2, i1, i3])
        }
    }

    fn new_cell(&mut self, verts: [VertexId; 4]) -> CellId {
        let data = CellData {
            verts,
            neighbors: [NO_CELL; 4],
        };

        if let Some(slot) = self.free.pop() {
            self.cells[slot as usize] = data;
            self.dead[slot as usize] = false;
            CellId(slot)
        } else {
            self.cells.push(data);
            self.dead.push(false);
            CellId(self.cells.len() as u32 - 1)
        }
    }

    fn create_initial_cells(&mut self, seed: [usize; 4]) {
        let v = seed.map(|i| VertexId(i as u32));
        let c0 = self.new_cell([v[0], v[1], v[2], v[3]]);

        // one infinite cell per facet, vertices ordered to reverse the
        // shared triple
        let mut inf_cells = [NO_CELL; 4];

        for k in 0..4usize {
            let t = TRI_VERTS[k];
            let tri = [
                v[t[0] as usize],
                v[t[1] as usize],
                v[t[2] as usize],
            ];
            let ic = self.new_cell([VertexId::INFINITE, tri[0], tri[1], tri[2]]);
            inf_cells[k] = ic;

            self.cells[ic.index()].neighbors[0] = c0;
            self.cells[c0.index()].neighbors[k] = ic;
        }

        // wire infinite cells to each other through their facets that
        // contain the infinite vertex
        let mut facet_map: HashMap<(VertexId, VertexId), (CellId, u8)> = HashMap::new();

        for &ic in &inf_cells {
            for i in 1..4u8 {
                let tri = self.facet_vertices(Facet::new(ic, i));
                let finite: Vec<VertexId> =
                    tri.iter().copied().filter(|v| !v.is_infinite()).collect();
                let key = (
                    finite[0].min(finite[1]),
                    finite[0].max(finite[1]),
                );

                if let Some(&(oc, oi)) = facet_map.get(&key) {
                    self.cells[ic.index()].neighbors[i as usize] = oc;
                    self.cells[oc.index()].neighbors[oi as usize] = ic;
                } else {
                    facet_map.insert(key, (ic, i));
                }
            }
        }
    }

    fn conflicts(&self, c: CellId, p: &Point3d) -> bool {
        let verts = self.cells[c.index()].verts;

        if let Some(inf) = verts.iter().position(|v| v.is_infinite()) {
            let t = TRI_VERTS[inf];
            let tri = [
                verts[t[0] as usize],
                verts[t[1] as usize],
                verts[t[2] as usize],
            ];
            let (a, b, cc) = (
                self.point(tri[0]),
                self.point(tri[1]),
                self.point(tri[2]),
            );

            match orient3d(a, b, cc, p) {
                Sign::Positive => true,
                Sign::Negative => false,
                Sign::Degenerate => {
                    // coplanar with the hull facet: delegate to the
                    // finite neighbor behind it
                    let n = self.neighbor(c, inf as u8);
                    self.finite_conflicts(n, p)
                }
            }
        } else {
            self.finite_conflicts(c, p)
        }
    }

    fn finite_conflicts(&self, c: CellId, p: &Point3d) -> bool {
        let verts = self.cells[c.index()].verts;
        if verts.iter().any(|v| v.is_infinite()) {
            return false;
        }

        let [a, b, cc, d] = verts.map(|v| *self.point(v));
        insphere(&a, &b, &cc, &d, p) == Sign::Positive
    }

    fn live_cell_ids(&self) -> impl Iterator<Item = CellId> + '_ {
        (0..self.cells.len() as u32)
            .map(CellId)
            .filter(move |c| !self.dead[c.index()])
    }

    fn find_seed_cell(&self, p: &Point3d) -> Option<CellId> {
        self.live_cell_ids().find(|&c| self.conflicts(c, p))
    }

    /// Fallback when the banded predicates refuse every cell: locate a
    /// containing finite cell, or the hull facet most exposed to `p`.
    fn find_fallback_cell(&self, p: &Point3d) -> Option<CellId> {
        for c in self.live_cell_ids() {
            let verts = self.cells[c.index()].verts;
            if verts.iter().any(|v| v.is_infinite()) {
                continue;
            }

            let inside = (0..4usize).all(|k| {
                let t = TRI_VERTS[k];
                let tri = [
                    verts[t[0] as usize],
                    verts[t[1] as usize],
                    verts[t[2] as usize],
                ];
                orient3d(
                    self.point(tri[0]),
                    self.point(tri[1]),
                    self.point(tri[2]),
                    p,
                ) != Sign::Negative
            });

            if inside {
                return Some(c);
            }
        }

        // outside the hull: pick the infinite cell whose facet plane is
        // most strongly below p
        let mut best: Option<(f64, CellId)> = None;

        for c in self.live_cell_ids() {
            let verts = self.cells[c.index()].verts;
            let Some(inf) = verts.iter().position(|v| v.is_infinite()) else {
                continue;
            };
            let t = TRI_VERTS[inf];
            let value = orient3d_value(
                self.point(verts[t[0] as usize]),
                self.point(verts[t[1] as usize]),
                self.point(verts[t[2] as usize]),
                p,
            );

            if best.map_or(true, |(v, _)| value > v) {
                best = Some((value, c));
            }
        }

        best.map(|(_, c)| c)
    }

    fn insert(&mut self, vid: VertexId) -> Result<()> {
        let p = self.points[vid.index()];

        let seed = self
            .find_seed_cell(&p)
            .or_else(|| self.find_fallback_cell(&p))
            .ok_or_else(|| Error::Internal("no cell found for point insertion".to_string()))?;

        // collect the conflict region by flood fill
        let mut bad = BTreeSet::new();
        let mut stack = vec![seed];
        bad.insert(seed);

        while let Some(c) = stack.pop() {
            for i in 0..4u8 {
                let n = self.neighbor(c, i);
                if !bad.contains(&n) && self.conflicts(n, &p) {
                    bad.insert(n);
                    stack.push(n);
                }
            }
        }

        // cavity boundary: facets of bad cells whose neighbor is good
        let mut boundary = Vec::new();

        for &c in &bad {
            for i in 0..4u8 {
                let n = self.neighbor(c, i);
                if !bad.contains(&n) {
                    boundary.push((Facet::new(c, i), n));
                }
            }
        }

        if boundary.is_empty() {
            return Err(Error::Internal(
                "conflict region has no boundary".to_string(),
            ));
        }

        // re-fill the cavity: one new cell per boundary facet, the shared
        // triple read from the good cell so orientations stay paired
        let mut facet_map: HashMap<(VertexId, VertexId), (CellId, u8)> = HashMap::new();
        let mut new_cells = Vec::with_capacity(boundary.len());

        for &(f, good) in &boundary {
            let mirror = self.mirror_facet(f);
            debug_assert_eq!(mirror.cell, good);
            let tri = self.facet_vertices(mirror);

            let nc = self.new_cell([vid, tri[0], tri[1], tri[2]]);
            new_cells.push(nc);

            self.cells[nc.index()].neighbors[0] = good;
            self.cells[good.index()].neighbors[mirror.idx as usize] = nc;

            // link the three facets of the new cell that contain vid
            for (idx, pair) in [(1u8, (2usize, 3usize)), (2, (3, 1)), (3, (1, 2))] {
                let a = self.cells[nc.index()].verts[pair.0];
                let b = self.cells[nc.index()].verts[pair.1];
                let key = (a.min(b), a.max(b));

                if let Some(&(oc, oi)) = facet_map.get(&key) {
                    self.cells[nc.index()].neighbors[idx as usize] = oc;
                    self.cells[oc.index()].neighbors[oi as usize] = nc;
                } else {
                    facet_map.insert(key, (nc, idx));
                }
            }
        }

        // retire the conflict region
        for c in bad {
            self.dead[c.index()] = true;
            self.free.push(c.0);
        }

        // every new-cell facet must have found its partner
        if self
            .cells
            .iter()
            .enumerate()
            .any(|(i, c)| !self.dead[i] && c.neighbors.contains(&NO_CELL))
        {
            return Err(Error::Internal(
                "cavity boundary did not close during insertion".to_string(),
            ));
        }

        Ok(())
    }

    fn compact(&mut self) {
        let mut remap = vec![NO_CELL; self.cells.len()];
        let mut next = 0u32;

        for i in 0..self.cells.len() {
            if !self.dead[i] {
                remap[i] = CellId(next);
                next += 1;
            }
        }

        let mut cells = Vec::with_capacity(next as usize);

        for i in 0..self.cells.len() {
            if !self.dead[i] {
                let mut data = self.cells[i].clone();
                for n in &mut data.neighbors {
                    *n = remap[n.index()];
                }
                cells.push(data);
            }
        }

        self.cells = cells;
        self.dead = vec![false; self.cells.len()];
        self.free.clear();
    }

    fn rebuild_vertex_cells(&mut self) -> Result<()> {
        self.vertex_cell = vec![NO_CELL; self.points.len()];
        self.infinite_cell = NO_CELL;

        for (i, cell) in self.cells.iter().enumerate() {
            for &v in &cell.verts {
                if v.is_infinite() {
                    if self.infinite_cell == NO_CELL {
                        self.infinite_cell = CellId(i as u32);
                    }
                } else if self.vertex_cell[v.index()] == NO_CELL {
                    self.vertex_cell[v.index()] = CellId(i as u32);
                }
            }
        }

        if self.infinite_cell == NO_CELL {
            return Err(Error::Internal("no infinite cell after build".to_string()));
        }

        if self.vertex_cell.iter().any(|&c| c == NO_CELL) {
            return Err(Error::Internal(
                "vertex count mismatch between input and tetrahedralization".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single_tet_points() -> Vec<Point3d> {
        vec![
            Point3d::new(0.0, 0.0, 0.0),
            Point3d::new(1.0, 0.0, 0.0),
            Point3d::new(0.0, 1.0, 0.0),
            Point3d::new(0.0, 0.0, 1.0),
        ]
    }

    fn check_structure(dt: &Tetrahedralization) {
        for c in dt.cell_ids() {
            for i in 0..4u8 {
                let n = dt.neighbor(c, i);
                // neighbor relation is symmetric
                let back = (0..4u8).filter(|&j| dt.neighbor(n, j) == c).count();
                assert!(back >= 1, "asymmetric neighbor link");

                // mirror facet round-trips
                let f = Facet::new(c, i);
                let m = dt.mirror_facet(f);
                assert_eq!(dt.mirror_facet(m), f);

                // shared facet has the same vertex set on both sides
                let mut a: Vec<VertexId> = dt.facet_vertices(f).to_vec();
                let mut b: Vec<VertexId> = dt.facet_vertices(m).to_vec();
                a.sort();
                b.sort();
                assert_eq!(a, b);
            }
        }
    }

    fn check_positively_oriented(dt: &Tetrahedralization) {
        for c in dt.cell_ids() {
            if dt.is_finite_cell(c) {
                let [a, b, cc, d] = dt.cell_vertices(c).map(|v| *dt.point(v));
                assert_ne!(
                    orient3d(&a, &b, &cc, &d),
                    Sign::Negative,
                    "negatively oriented finite cell"
                );
            }
        }
    }

    fn check_delaunay(dt: &Tetrahedralization) {
        for c in dt.cell_ids() {
            if !dt.is_finite_cell(c) {
                continue;
            }
            let [a, b, cc, d] = dt.cell_vertices(c).map(|v| *dt.point(v));

            for v in 0..dt.num_vertices() {
                let vid = VertexId(v as u32);
                if dt.has_vertex(c, vid) {
                    continue;
                }
                assert_ne!(
                    insphere(&a, &b, &cc, &d, dt.point(vid)),
                    Sign::Positive,
                    "vertex strictly inside a circumsphere"
                );
            }
        }
    }

    #[test]
    fn test_single_tetrahedron() {
        let dt = Tetrahedralization::build(&single_tet_points()).unwrap();

        // one finite cell and four infinite ones
        let finite = dt.cell_ids().filter(|&c| dt.is_finite_cell(c)).count();
        assert_eq!(finite, 1);
        assert_eq!(dt.num_cells(), 5);

        check_structure(&dt);
        check_positively_oriented(&dt);
        assert!(dt.is_infinite_cell(dt.infinite_cell()));
    }

    #[test]
    fn test_point_inside_tetrahedron() {
        let mut points = single_tet_points();
        points.push(Point3d::new(0.2, 0.2, 0.2));

        let dt = Tetrahedralization::build(&points).unwrap();

        let finite = dt.cell_ids().filter(|&c| dt.is_finite_cell(c)).count();
        assert_eq!(finite, 4);

        check_structure(&dt);
        check_positively_oriented(&dt);
        check_delaunay(&dt);
    }

    #[test]
    fn test_point_outside_hull() {
        let mut points = single_tet_points();
        points.push(Point3d::new(2.0, 0.1, 0.1));

        let dt = Tetrahedralization::build(&points).unwrap();

        check_structure(&dt);
        check_positively_oriented(&dt);
        check_delaunay(&dt);
    }

    #[test]
    fn test_random_cloud() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);

        let points: Vec<Point3d> = (0..60)
            .map(|_| {
                Point3d::new(
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                    rng.gen_range(-1.0..1.0),
                )
            })
            .collect();

        let dt = Tetrahedralization::build(&points).unwrap();

        check_structure(&dt);
        check_positively_oriented(&dt);
        check_delaunay(&dt);

        // every vertex reaches its incident cells
        for v in 0..dt.num_vertices() {
            let vid = VertexId(v as u32);
            let cells = dt.incident_cells(vid);
            assert!(!cells.is_empty());
            assert!(cells.iter().all(|&c| dt.has_vertex(c, vid)));
        }
    }

    #[test]
    fn test_edge_fan_is_cyclic() {
        let mut points = single_tet_points();
        points.push(Point3d::new(0.2, 0.2, 0.2));
        let dt = Tetrahedralization::build(&points).unwrap();

        for c in dt.cell_ids() {
            for [s, t] in EDGE_VERTS {
                let e = CellEdge::new(c, s, t);
                let (a, b) = dt.edge_vertices(e);
                let start = dt.first_facet_of_edge(e);
                let fan = dt.edge_fan(start, a, b);

                // each facet in the fan contains both endpoints
                for (f, _) in &fan {
                    let tri = dt.facet_vertices(*f);
                    assert!(tri.contains(&a) && tri.contains(&b));
                }
                assert!(fan.len() >= 3);
            }
        }
    }

    #[test]
    fn test_degenerate_inputs_rejected() {
        let too_few = vec![Point3d::new(0.0, 0.0, 0.0); 3];
        assert!(Tetrahedralization::build(&too_few).is_err());

        let coplanar: Vec<Point3d> = (0..8)
            .map(|i| Point3d::new(i as f64, (i * i) as f64, 0.0))
            .collect();
        assert!(Tetrahedralization::build(&coplanar).is_err());

        let collinear: Vec<Point3d> = (0..5).map(|i| Point3d::new(i as f64, 0.0, 0.0)).collect();
        assert!(Tetrahedralization::build(&collinear).is_err());
    }

    #[test]
    fn test_grid_with_jitter() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);

        let mut points = Vec::new();
        for x in 0..4 {
            for y in 0..4 {
                for z in 0..2 {
                    points.push(Point3d::new(
                        x as f64 + rng.gen_range(-0.01..0.01),
                        y as f64 + rng.gen_range(-0.01..0.01),
                        z as f64 + rng.gen_range(-0.01..0.01),
                    ));
                }
            }
        }

        let dt = Tetrahedralization::build(&points).unwrap();
        check_structure(&dt);
        check_positively_oriented(&dt);
    }
}
