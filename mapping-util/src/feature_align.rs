//! Feature-schema alignment between a reference and a target dataset.
//!
//! Target rows are reordered to the reference schema; features missing from
//! the target are zero-filled, features absent from the reference schema are
//! dropped. Optionally applies CORAL covariance alignment on the overlapping
//! features so the target's second-order statistics match the reference.

use crate::dataset::{Dataset, Mat};
use crate::errors::MappingError;

use fnv::FnvHashMap as HashMap;
use log::{info, warn};
use nalgebra::DVector;

/// Eigenvalues below this fraction of the largest are treated as singular
const EIGEN_TOL: f32 = 1e-8;

#[derive(Clone, Debug)]
pub struct AlignOptions {
    /// Apply CORAL whitening-recoloring on the overlapping features
    pub coral: bool,
    /// Skip CORAL when the overlap exceeds this many features; the
    /// covariance eigendecomposition is cubic in the overlap size.
    /// `None` removes the guard.
    pub coral_feature_cap: Option<usize>,
    /// Diagonal shrinkage added to both covariances
    pub coral_shrinkage: f32,
}

impl Default for AlignOptions {
    fn default() -> Self {
        Self {
            coral: false,
            coral_feature_cap: Some(5000),
            coral_shrinkage: 1e-3,
        }
    }
}

/// Target matrix reordered to the reference schema
#[derive(Debug)]
pub struct AlignedMatrix {
    /// reference features x target cells
    pub matrix: Mat,
    /// number of features shared by both schemas
    pub overlap: usize,
    pub coral_applied: bool,
}

/// Align `target` to the reference feature schema.
///
/// Fails with `SchemaMismatch` when the two schemas share no feature at
/// all. Zero-filled rows never participate in CORAL.
pub fn align_features(
    reference: &Dataset,
    target: &Dataset,
    options: &AlignOptions,
) -> anyhow::Result<AlignedMatrix> {
    let target_rows: HashMap<&str, usize> = target
        .feature_names
        .iter()
        .enumerate()
        .map(|(i, x)| (x.as_ref(), i))
        .collect();

    let num_cells = target.num_cells();
    let mut matrix = Mat::zeros(reference.num_features(), num_cells);

    // (reference row, target row) for the shared features
    let mut overlap_rows: Vec<(usize, usize)> = vec![];

    for (i, name) in reference.feature_names.iter().enumerate() {
        if let Some(&j) = target_rows.get(name.as_ref()) {
            for c in 0..num_cells {
                matrix[(i, c)] = target.data[(j, c)];
            }
            overlap_rows.push((i, j));
        }
    }

    let overlap = overlap_rows.len();
    info!(
        "aligned '{}' to '{}': {} shared features, {} zero-filled, {} dropped",
        target.name,
        reference.name,
        overlap,
        reference.num_features() - overlap,
        target.num_features() - overlap,
    );

    if overlap == 0 {
        return Err(MappingError::SchemaMismatch.into());
    }

    let mut coral_applied = false;
    if options.coral {
        match options.coral_feature_cap {
            Some(cap) if overlap > cap => {
                warn!(
                    "skipping CORAL: {} overlapping features exceed the cap of {}",
                    overlap, cap
                );
            }
            _ => {
                apply_coral(reference, &mut matrix, &overlap_rows, options.coral_shrinkage)?;
                coral_applied = true;
            }
        }
    }

    Ok(AlignedMatrix {
        matrix,
        overlap,
        coral_applied,
    })
}

/// CORAL: whiten the target's overlapping features with `C_t^{-1/2}` and
/// recolor with `C_r^{1/2}` (Sun et al. 2016). Means are untouched; only
/// second-order statistics move.
fn apply_coral(
    reference: &Dataset,
    aligned: &mut Mat,
    overlap_rows: &[(usize, usize)],
    shrinkage: f32,
) -> anyhow::Result<()> {
    let d = overlap_rows.len();
    let n_ref = reference.num_cells();
    let n_tgt = aligned.ncols();

    if n_ref < 2 || n_tgt < 2 {
        return Err(MappingError::NumericalInstability.into());
    }

    let x_ref = Mat::from_fn(d, n_ref, |i, j| reference.data[(overlap_rows[i].0, j)]);
    let x_tgt = Mat::from_fn(d, n_tgt, |i, j| aligned[(overlap_rows[i].0, j)]);

    let cov_ref = row_covariance(&x_ref, shrinkage);
    let cov_tgt = row_covariance(&x_tgt, shrinkage);

    // whitening transform C_t^{-1/2}
    let eig_tgt = cov_tgt.symmetric_eigen();
    let max_ev = eig_tgt.eigenvalues.max();
    if !max_ev.is_finite() || max_ev <= 0.0 {
        return Err(MappingError::NumericalInstability.into());
    }
    let mut inv_sqrt = DVector::<f32>::zeros(d);
    for (i, &ev) in eig_tgt.eigenvalues.iter().enumerate() {
        if !ev.is_finite() || ev <= EIGEN_TOL * max_ev {
            return Err(MappingError::NumericalInstability.into());
        }
        inv_sqrt[i] = 1.0 / ev.sqrt();
    }
    let whiten =
        &eig_tgt.eigenvectors * Mat::from_diagonal(&inv_sqrt) * eig_tgt.eigenvectors.transpose();

    // recoloring transform C_r^{1/2}; clamp tiny negative eigenvalues
    let eig_ref = cov_ref.symmetric_eigen();
    let sqrt_ev = eig_ref.eigenvalues.map(|ev| ev.max(0.0).sqrt());
    let recolor =
        &eig_ref.eigenvectors * Mat::from_diagonal(&sqrt_ev) * eig_ref.eigenvectors.transpose();

    let transform = recolor * whiten;

    let mu_tgt = x_tgt.column_mean();
    let mut centered = x_tgt;
    for mut col in centered.column_iter_mut() {
        col -= &mu_tgt;
    }

    let mut adjusted = transform * centered;
    for mut col in adjusted.column_iter_mut() {
        col += &mu_tgt;
    }

    for (i, &(ref_row, _)) in overlap_rows.iter().enumerate() {
        for c in 0..n_tgt {
            aligned[(ref_row, c)] = adjusted[(i, c)];
        }
    }

    info!("CORAL applied over {} features", d);
    Ok(())
}

/// Covariance of the rows (features) across columns (cells), with diagonal
/// shrinkage
fn row_covariance(x: &Mat, shrinkage: f32) -> Mat {
    let n = x.ncols();
    let mu = x.column_mean();

    let mut centered = x.clone();
    for mut col in centered.column_iter_mut() {
        col -= &mu;
    }

    let mut cov = &centered * centered.transpose() / (n as f32 - 1.0);
    for i in 0..cov.nrows() {
        cov[(i, i)] += shrinkage;
    }
    cov
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn dataset(name: &str, features: &[&str], data: Mat) -> Dataset {
        let feature_names = features.iter().map(|&x| x.into()).collect();
        let cell_names = (0..data.ncols())
            .map(|i| format!("{}_{}", name, i).into())
            .collect();
        Dataset::from_matrix(name, feature_names, cell_names, data).unwrap()
    }

    #[test]
    fn reorder_zero_fill_and_drop() {
        let reference = dataset("ref", &["a", "b", "c"], Mat::zeros(3, 2));
        // target schema: b, d (dropped), a
        let target = dataset(
            "tgt",
            &["b", "d", "a"],
            Mat::from_row_slice(3, 2, &[10.0, 11.0, 99.0, 99.0, 20.0, 21.0]),
        );

        let aligned = align_features(&reference, &target, &AlignOptions::default()).unwrap();
        assert_eq!(aligned.overlap, 2);
        assert!(!aligned.coral_applied);

        // row order follows the reference schema: a, b, c
        assert_eq!(aligned.matrix[(0, 0)], 20.0);
        assert_eq!(aligned.matrix[(0, 1)], 21.0);
        assert_eq!(aligned.matrix[(1, 0)], 10.0);
        assert_eq!(aligned.matrix[(1, 1)], 11.0);
        // c is absent from the target: zero-filled
        assert_eq!(aligned.matrix[(2, 0)], 0.0);
        assert_eq!(aligned.matrix[(2, 1)], 0.0);
    }

    #[test]
    fn empty_overlap_is_schema_mismatch() {
        let reference = dataset("ref", &["a", "b"], Mat::zeros(2, 2));
        let target = dataset("tgt", &["x", "y"], Mat::zeros(2, 2));

        let err = align_features(&reference, &target, &AlignOptions::default()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MappingError>(),
            Some(MappingError::SchemaMismatch)
        ));
    }

    #[test]
    fn coral_matches_reference_covariance() {
        let x_ref = Mat::from_row_slice(
            2,
            6,
            &[
                0.0, 1.0, 2.0, 3.0, 4.0, 5.0, //
                0.0, -1.0, 1.0, -2.0, 2.0, 0.0,
            ],
        );
        let reference = dataset("ref", &["a", "b"], x_ref.clone());

        // same features, wildly different scale
        let x_tgt = Mat::from_row_slice(
            2,
            6,
            &[
                0.0, 30.0, 10.0, 40.0, 20.0, 50.0, //
                5.0, 0.0, 15.0, 10.0, 25.0, 20.0,
            ],
        );
        let target = dataset("tgt", &["a", "b"], x_tgt);

        let options = AlignOptions {
            coral: true,
            ..Default::default()
        };
        let aligned = align_features(&reference, &target, &options).unwrap();
        assert!(aligned.coral_applied);

        let cov_ref = row_covariance(&x_ref, 0.0);
        let cov_out = row_covariance(&aligned.matrix, 0.0);
        for i in 0..2 {
            for j in 0..2 {
                assert_abs_diff_eq!(cov_out[(i, j)], cov_ref[(i, j)], epsilon = 0.05);
            }
        }
    }

    #[test]
    fn coral_skipped_above_feature_cap() {
        let reference = dataset("ref", &["a", "b"], Mat::from_row_slice(2, 3, &[1., 2., 3., 4., 5., 6.]));
        let target = dataset("tgt", &["a", "b"], Mat::from_row_slice(2, 3, &[6., 5., 4., 3., 2., 1.]));

        let options = AlignOptions {
            coral: true,
            coral_feature_cap: Some(1),
            ..Default::default()
        };
        let aligned = align_features(&reference, &target, &options).unwrap();
        assert!(!aligned.coral_applied);
        // values pass through untouched
        assert_eq!(aligned.matrix[(0, 0)], 6.0);
    }

    #[test]
    fn degenerate_covariance_is_numerical_instability() {
        let reference = dataset("ref", &["a", "b"], Mat::from_row_slice(2, 4, &[1., 2., 3., 4., 4., 3., 2., 1.]));
        // single target cell: covariance undefined
        let target = dataset("tgt", &["a", "b"], Mat::from_row_slice(2, 1, &[1., 1.]));

        let options = AlignOptions {
            coral: true,
            ..Default::default()
        };
        let err = align_features(&reference, &target, &options).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<MappingError>(),
            Some(MappingError::NumericalInstability)
        ));
    }
}
