//! # Connect3D Reconstruction
//!
//! Reconstructs a single watertight, two-manifold triangulated surface
//! from an unstructured 3D point cloud. The pipeline works on a 3D
//! Delaunay tetrahedralization and incrementally decides which facets
//! belong to the output surface: an initial boundary complex is grown
//! by a minimum-spanning-tree-like sweep, then repaired by conformity
//! fixing, hole filling, inflation, sculpting, bubble popping, and
//! curvature smoothing.

pub mod boundary_complex;
pub mod bubbles;
pub mod conformity;
pub mod criterion;
pub mod holes;
pub mod inflate;
pub mod model;
pub mod sculpture;
pub mod segmentation;
pub mod smooth;
pub mod spaces;

pub use criterion::Criterion;
pub use model::Model;

use connect3d_core::{Error, PointCloud, Point3d, Result, TriangleMesh};
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Configuration for surface reconstruction
#[derive(Debug, Clone, Default)]
pub struct ReconstructionConfig {
    /// Criterion ordering all greedy decisions
    pub criterion: Criterion,
}

/// Reconstruct a watertight surface from a point cloud.
pub fn reconstruct(cloud: &PointCloud<Point3d>) -> Result<TriangleMesh> {
    reconstruct_with_config(cloud, &ReconstructionConfig::default(), |_, _| true)
}

/// Reconstruct with progress reporting. The callback receives a
/// percentage and a phase description at fixed checkpoints; returning
/// `false` cancels the reconstruction.
pub fn reconstruct_with_progress<F>(cloud: &PointCloud<Point3d>, progress: F) -> Result<TriangleMesh>
where
    F: FnMut(u32, &str) -> bool,
{
    reconstruct_with_config(cloud, &ReconstructionConfig::default(), progress)
}

/// Reconstruct with an explicit configuration and progress callback.
pub fn reconstruct_with_config<F>(
    cloud: &PointCloud<Point3d>,
    config: &ReconstructionConfig,
    progress: F,
) -> Result<TriangleMesh>
where
    F: FnMut(u32, &str) -> bool,
{
    // internal invariant violations surface as a distinguished error
    // instead of aborting the caller
    catch_unwind(AssertUnwindSafe(|| run_pipeline(cloud, config, progress))).unwrap_or_else(
        |payload| {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unexpected panic".to_string());
            Err(Error::Internal(message))
        },
    )
}

fn run_pipeline<F>(
    cloud: &PointCloud<Point3d>,
    config: &ReconstructionConfig,
    mut progress: F,
) -> Result<TriangleMesh>
where
    F: FnMut(u32, &str) -> bool,
{
    let mut checkpoint = |percent: u32, phase: &str| -> Result<()> {
        if progress(percent, phase) {
            Ok(())
        } else {
            Err(Error::Cancelled)
        }
    };

    let points = Model::dedup_points(&cloud.points);

    if points.len() < 4 {
        return Err(Error::InvalidData(
            "Need at least 4 distinct points for reconstruction".to_string(),
        ));
    }

    let mut model = Model::build(points, config.criterion)?;
    checkpoint(4, "tetrahedralization built")?;

    boundary_complex::construct_boundary_complex(&mut model);
    checkpoint(15, "boundary complex constructed")?;

    spaces::relabel_spaces(&mut model);
    spaces::classify_all(&mut model);
    checkpoint(20, "spaces labeled")?;

    conformity::fix_nonconforming_entities(&mut model);
    checkpoint(25, "non-conforming entities fixed")?;

    model.reset_classification();
    spaces::relabel_spaces(&mut model);
    spaces::classify_all(&mut model);

    let seg = segmentation::segment(&mut model);
    checkpoint(40, "components segmented")?;

    let strip_holes = holes::test_for_holes_in_ocbs(&model, &seg.ocbs);
    let strip_set: std::collections::BTreeSet<usize> = strip_holes.iter().copied().collect();

    let remaining: Vec<usize> = (0..seg.ocbs.len())
        .filter(|i| !strip_set.contains(i))
        .collect();
    let deflation_holes = holes::classify_ocbs_with_hull(&model, &seg, &remaining);

    let mut hole_ocbs = strip_holes;
    hole_ocbs.extend(deflation_holes);
    checkpoint(50, "holes detected")?;

    holes::fill_holes(&mut model, &seg, &hole_ocbs);
    checkpoint(60, "holes filled")?;

    model.reset_classification();
    spaces::relabel_spaces(&mut model);
    spaces::classify_all(&mut model);
    conformity::fix_nonconforming_entities(&mut model);

    model.reset_classification();
    spaces::relabel_spaces(&mut model);
    spaces::classify_all(&mut model);

    inflate::inflate_boundary(&mut model);
    checkpoint(70, "boundary inflated")?;

    model.reset_classification();
    spaces::relabel_spaces(&mut model);
    spaces::classify_all(&mut model);

    let (all_spaces, int_spaces) = sculpture::determine_space_map(&model);

    sculpture::sculpture_walls(&mut model, &all_spaces);
    checkpoint(80, "walls sculpted")?;

    bubbles::pop_nbcs(&mut model, &int_spaces);
    checkpoint(90, "bubbles popped")?;

    smooth::smooth_boundary(&mut model);
    checkpoint(95, "boundary smoothed")?;

    let faces = model.surface_faces();
    let mesh = TriangleMesh::from_vertices_and_faces(model.points().to_vec(), faces);
    checkpoint(100, "done")?;

    Ok(mesh)
}
