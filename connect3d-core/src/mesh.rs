//! Mesh data structures and functionality

use crate::point::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A triangle mesh with vertices and faces
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriangleMesh {
    pub vertices: Vec<Point3d>,
    pub faces: Vec<[usize; 3]>,
}

impl TriangleMesh {
    /// Create a new empty mesh
    pub fn new() -> Self {
        Self {
            vertices: Vec::new(),
            faces: Vec::new(),
        }
    }

    /// Create a mesh from vertices and faces
    pub fn from_vertices_and_faces(vertices: Vec<Point3d>, faces: Vec<[usize; 3]>) -> Self {
        Self { vertices, faces }
    }

    /// Get the number of vertices
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Get the number of faces
    pub fn face_count(&self) -> usize {
        self.faces.len()
    }

    /// Check if the mesh is empty
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty() || self.faces.is_empty()
    }

    /// Add a vertex to the mesh
    pub fn add_vertex(&mut self, vertex: Point3d) -> usize {
        let index = self.vertices.len();
        self.vertices.push(vertex);
        index
    }

    /// Add a face to the mesh
    pub fn add_face(&mut self, face: [usize; 3]) {
        self.faces.push(face);
    }

    /// Calculate face normals
    pub fn calculate_face_normals(&self) -> Vec<Vector3d> {
        self.faces
            .iter()
            .map(|face| {
                let v0 = self.vertices[face[0]];
                let v1 = self.vertices[face[1]];
                let v2 = self.vertices[face[2]];

                let edge1 = v1 - v0;
                let edge2 = v2 - v0;

                edge1.cross(&edge2).normalize()
            })
            .collect()
    }

    /// Count the distinct undirected edges of the mesh
    pub fn edge_count(&self) -> usize {
        let mut edges = HashSet::new();

        for face in &self.faces {
            for i in 0..3 {
                let a = face[i];
                let b = face[(i + 1) % 3];
                edges.insert((a.min(b), a.max(b)));
            }
        }

        edges.len()
    }

    /// Test whether every edge is shared by exactly two faces (watertightness)
    pub fn is_closed(&self) -> bool {
        let mut edge_faces: HashMap<(usize, usize), usize> = HashMap::new();

        for face in &self.faces {
            for i in 0..3 {
                let a = face[i];
                let b = face[(i + 1) % 3];
                *edge_faces.entry((a.min(b), a.max(b))).or_insert(0) += 1;
            }
        }

        edge_faces.values().all(|&count| count == 2)
    }

    /// Euler characteristic V - E + F over the vertices referenced by faces
    pub fn euler_characteristic(&self) -> isize {
        let used: HashSet<usize> = self.faces.iter().flatten().copied().collect();

        used.len() as isize - self.edge_count() as isize + self.faces.len() as isize
    }

    /// Number of face-connected components (faces connected through shared edges)
    pub fn connected_component_count(&self) -> usize {
        if self.faces.is_empty() {
            return 0;
        }

        // union faces that share an edge
        let mut parent: Vec<usize> = (0..self.faces.len()).collect();

        fn find(parent: &mut Vec<usize>, mut x: usize) -> usize {
            while parent[x] != x {
                parent[x] = parent[parent[x]];
                x = parent[x];
            }
            x
        }

        let mut edge_face: HashMap<(usize, usize), usize> = HashMap::new();

        for (fi, face) in self.faces.iter().enumerate() {
            for i in 0..3 {
                let a = face[i];
                let b = face[(i + 1) % 3];
                let key = (a.min(b), a.max(b));

                if let Some(&other) = edge_face.get(&key) {
                    let ra = find(&mut parent, fi);
                    let rb = find(&mut parent, other);
                    if ra != rb {
                        parent[ra] = rb;
                    }
                } else {
                    edge_face.insert(key, fi);
                }
            }
        }

        let roots: HashSet<usize> = (0..self.faces.len())
            .map(|f| find(&mut parent, f))
            .collect();

        roots.len()
    }

    /// Clear the mesh
    pub fn clear(&mut self) {
        self.vertices.clear();
        self.faces.clear();
    }
}

impl Default for TriangleMesh {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tetrahedron() -> TriangleMesh {
        let vertices = vec![
            Point3d::new(0.0, 0.0, 0.0),
            Point3d::new(1.0, 0.0, 0.0),
            Point3d::new(0.0, 1.0, 0.0),
            Point3d::new(0.0, 0.0, 1.0),
        ];
        let faces = vec![[0, 2, 1], [0, 1, 3], [0, 3, 2], [1, 2, 3]];
        TriangleMesh::from_vertices_and_faces(vertices, faces)
    }

    #[test]
    fn test_tetrahedron_is_closed() {
        let mesh = tetrahedron();
        assert_eq!(mesh.face_count(), 4);
        assert_eq!(mesh.edge_count(), 6);
        assert!(mesh.is_closed());
        assert_eq!(mesh.euler_characteristic(), 2);
        assert_eq!(mesh.connected_component_count(), 1);
    }

    #[test]
    fn test_open_fan_is_not_closed() {
        let vertices = vec![
            Point3d::new(0.0, 0.0, 0.0),
            Point3d::new(1.0, 0.0, 0.0),
            Point3d::new(0.0, 1.0, 0.0),
        ];
        let mesh = TriangleMesh::from_vertices_and_faces(vertices, vec![[0, 1, 2]]);
        assert!(!mesh.is_closed());
    }

    #[test]
    fn test_two_disjoint_tetrahedra() {
        let mut mesh = tetrahedron();
        let offset = mesh.vertex_count();
        let other = tetrahedron();

        for v in &other.vertices {
            mesh.add_vertex(Point3d::new(v.x + 10.0, v.y, v.z));
        }
        for f in &other.faces {
            mesh.add_face([f[0] + offset, f[1] + offset, f[2] + offset]);
        }

        assert!(mesh.is_closed());
        assert_eq!(mesh.connected_component_count(), 2);
    }

    #[test]
    fn test_face_normals() {
        use approx::assert_relative_eq;

        let mesh = tetrahedron();
        let normals = mesh.calculate_face_normals();
        assert_eq!(normals.len(), 4);
        // first face lies in the z = 0 plane
        assert_relative_eq!(normals[0].z.abs(), 1.0, epsilon = 1e-12);
    }
}
