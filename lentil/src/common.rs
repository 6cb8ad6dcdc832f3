#![allow(dead_code)]

pub use clap::{Args, Parser, Subcommand, ValueEnum};
pub use log::{info, warn};

pub type Mat = nalgebra::DMatrix<f32>;
pub type DVec = nalgebra::DVector<f32>;
pub type CscMat = nalgebra_sparse::CscMatrix<f32>;

pub use mapping_util::common_io::*;
pub use mapping_util::dataset::{Dataset, MapOptions, MappingSession};
pub use mapping_util::errors::MappingError;
pub use mapping_util::feature_align::AlignOptions;

pub const DEFAULT_KNN: usize = 10;

/// Map a target, falling back to plain alignment when CORAL hits a
/// singular covariance.
pub fn map_with_coral_fallback(
    session: &MappingSession,
    target: &mut Dataset,
    options: &MapOptions,
) -> anyhow::Result<mapping_util::knn_query::NeighborEdges> {
    match session.map_target(target, options) {
        Err(err)
            if options.align.coral
                && matches!(
                    err.downcast_ref::<MappingError>(),
                    Some(MappingError::NumericalInstability)
                ) =>
        {
            warn!("CORAL covariance is singular; retrying without CORAL");
            let mut plain = options.clone();
            plain.align.coral = false;
            session.map_target(target, &plain)
        }
        other => other,
    }
}

/// Initialize logging; `verbose` turns on info-level messages unless
/// `RUST_LOG` is already set.
pub fn init_logging(verbose: bool) {
    if verbose && std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    env_logger::init();
}
