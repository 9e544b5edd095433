//! Integration tests for connect3d-reconstruction
//!
//! Scenario tests exercising the full pipeline on synthetic point
//! clouds, asserting the watertightness and manifoldness guarantees of
//! the reconstruction.

use connect3d_core::{Error, Point3d, PointCloud};
use connect3d_reconstruction::*;

/// Golden-spiral sample of a sphere
fn sphere_cloud(radius: f64, count: usize) -> PointCloud<Point3d> {
    let golden_ratio = (1.0 + 5.0f64.sqrt()) / 2.0;
    let mut points = Vec::new();

    for i in 0..count {
        let theta = 2.0 * std::f64::consts::PI * i as f64 / golden_ratio;
        let phi = (1.0 - 2.0 * (i as f64 + 0.5) / count as f64).acos();

        points.push(Point3d::new(
            radius * phi.sin() * theta.cos(),
            radius * phi.sin() * theta.sin(),
            radius * phi.cos(),
        ));
    }

    PointCloud::from_points(points)
}

/// Jittered cube point cloud around a center
fn cube_cluster(center: Point3d, count: usize, seed: u64) -> Vec<Point3d> {
    use rand::{Rng, SeedableRng};
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);

    (0..count)
        .map(|_| {
            Point3d::new(
                center.x + rng.gen_range(-0.5..0.5),
                center.y + rng.gen_range(-0.5..0.5),
                center.z + rng.gen_range(-0.5..0.5),
            )
        })
        .collect()
}

#[test]
fn test_tetrahedron_reconstruction() {
    let cloud = PointCloud::from_points(vec![
        Point3d::new(0.0, 0.0, 0.0),
        Point3d::new(1.0, 0.0, 0.0),
        Point3d::new(0.0, 1.0, 0.0),
        Point3d::new(0.0, 0.0, 1.0),
    ]);

    let mesh = reconstruct(&cloud).unwrap();

    assert_eq!(mesh.face_count(), 4);
    assert_eq!(mesh.edge_count(), 6);
    assert!(mesh.is_closed());
    assert_eq!(mesh.euler_characteristic(), 2);
}

#[test]
fn test_sphere_satisfies_euler_formula() {
    let cloud = sphere_cloud(1.0, 200);
    let mesh = reconstruct(&cloud).unwrap();

    assert!(!mesh.is_empty());
    assert!(mesh.is_closed());
    assert_eq!(mesh.euler_characteristic(), 2);
}

#[test]
fn test_small_sphere_is_watertight() {
    let cloud = sphere_cloud(1.0, 60);
    let mesh = reconstruct(&cloud).unwrap();

    assert!(mesh.is_closed());
    assert_eq!(mesh.euler_characteristic(), 2);
}

#[test]
fn test_two_separated_clusters() {
    let mut points = cube_cluster(Point3d::new(0.0, 0.0, 0.0), 20, 1);
    points.extend(cube_cluster(Point3d::new(100.0, 0.0, 0.0), 20, 2));

    let cloud = PointCloud::from_points(points);
    let mesh = reconstruct(&cloud).unwrap();

    assert!(mesh.is_closed());

    // no triangle bridges the two clusters: the first 20 vertices are
    // the left cube, the rest the right one
    for face in &mesh.faces {
        let left = face.iter().filter(|&&v| v < 20).count();
        assert!(left == 0 || left == 3, "bridging face {:?}", face);
    }

    assert_eq!(mesh.connected_component_count(), 2);
}

#[test]
fn test_flat_grid_reconstruction() {
    use rand::{Rng, SeedableRng};
    let mut rng = rand::rngs::StdRng::seed_from_u64(3);

    let mut points = Vec::new();
    for x in 0..5 {
        for y in 0..5 {
            points.push(Point3d::new(
                x as f64,
                y as f64,
                rng.gen_range(-0.01..0.01),
            ));
        }
    }

    let cloud = PointCloud::from_points(points);
    let mesh = reconstruct(&cloud).unwrap();

    // a thin double-sided sheet, still closed and manifold
    assert!(!mesh.is_empty());
    assert!(mesh.is_closed());
}

#[test]
fn test_sphere_with_missing_cap_closes() {
    // drop the top cap of the sample: the boundary leaves an open
    // component which hole treatment and inflation must close
    let full = sphere_cloud(1.0, 150);
    let points: Vec<Point3d> = full.points.iter().copied().filter(|p| p.z < 0.8).collect();

    let cloud = PointCloud::from_points(points);
    let mesh = reconstruct(&cloud).unwrap();

    assert!(!mesh.is_empty());
    assert!(mesh.is_closed());
}

#[test]
fn test_duplicate_points_are_deduplicated() {
    let mut points = vec![
        Point3d::new(0.0, 0.0, 0.0),
        Point3d::new(1.0, 0.0, 0.0),
        Point3d::new(0.0, 1.0, 0.0),
        Point3d::new(0.0, 0.0, 1.0),
    ];
    points.push(points[0]);
    points.push(points[1]);

    let cloud = PointCloud::from_points(points);
    let mesh = reconstruct(&cloud).unwrap();

    assert_eq!(mesh.vertex_count(), 4);
    assert_eq!(mesh.face_count(), 4);
    assert!(mesh.is_closed());
}

#[test]
fn test_too_few_points_is_invalid() {
    let cloud = PointCloud::from_points(vec![
        Point3d::new(0.0, 0.0, 0.0),
        Point3d::new(1.0, 0.0, 0.0),
        Point3d::new(0.0, 1.0, 0.0),
    ]);

    assert!(matches!(
        reconstruct(&cloud),
        Err(Error::InvalidData(_))
    ));
}

#[test]
fn test_coplanar_points_are_invalid() {
    let points: Vec<Point3d> = (0..10)
        .map(|i| Point3d::new(i as f64, (i % 3) as f64, 0.0))
        .collect();

    let cloud = PointCloud::from_points(points);

    assert!(matches!(
        reconstruct(&cloud),
        Err(Error::InvalidData(_))
    ));
}

#[test]
fn test_progress_reporting_and_order() {
    let cloud = sphere_cloud(1.0, 40);
    let mut checkpoints = Vec::new();

    let mesh = reconstruct_with_progress(&cloud, |percent, phase| {
        checkpoints.push((percent, phase.to_string()));
        true
    })
    .unwrap();

    assert!(mesh.is_closed());
    assert_eq!(checkpoints.first().map(|c| c.0), Some(4));
    assert_eq!(checkpoints.last().map(|c| c.0), Some(100));

    let percents: Vec<u32> = checkpoints.iter().map(|c| c.0).collect();
    let mut sorted = percents.clone();
    sorted.sort();
    assert_eq!(percents, sorted);
}

#[test]
fn test_cancellation() {
    let cloud = sphere_cloud(1.0, 40);

    let result = reconstruct_with_progress(&cloud, |percent, _| percent < 40);

    assert!(matches!(result, Err(Error::Cancelled)));
}

#[test]
fn test_criterion_variants_all_reconstruct() {
    let cloud = sphere_cloud(1.0, 50);

    for criterion in [
        Criterion::Circumradius,
        Criterion::LongestEdge,
        Criterion::Area,
        Criterion::AspectRatio,
    ] {
        let config = ReconstructionConfig { criterion };
        let mesh = reconstruct_with_config(&cloud, &config, |_, _| true).unwrap();
        assert!(mesh.is_closed(), "criterion {:?}", criterion);
    }
}

#[test]
fn test_reconstruction_is_deterministic() {
    let cloud = sphere_cloud(1.0, 80);

    let a = reconstruct(&cloud).unwrap();
    let b = reconstruct(&cloud).unwrap();

    assert_eq!(a.faces, b.faces);
}
