use crate::common::*;
use crate::input::*;
use crate::spectral::SpectralLayout;

use mapping_util::unified_graph::{GraphLayout, UnifiedGraphBuilder};

#[derive(Args, Debug)]
pub struct EmbedArgs {
    #[arg(
        long,
        short = 'r',
        required = true,
        help = "Reference data matrix",
        long_help = "Reference feature matrix (features x cells)."
    )]
    reference: Box<str>,

    #[arg(
        long,
        short = 'g',
        required = true,
        help = "Reference affinity graph",
        long_help = "Edge list `i j weight` (0-based reference cell\n\
		     indexes) of the existing reference similarity graph.\n\
		     Reference-reference edges are copied into the unified\n\
		     graph unchanged."
    )]
    graph: Box<str>,

    #[arg(
        long,
        short = 't',
        value_delimiter(','),
        required = true,
        help = "Target data matrices (comma-separated)",
        long_help = "One or more target feature matrices to spike into\n\
		     the reference graph. Each target is mapped and added\n\
		     independently; target cells never link to each other."
    )]
    targets: Vec<Box<str>>,

    #[arg(long, short = 'b', help = "Projection basis matrix")]
    basis: Option<Box<str>>,

    #[arg(
        long,
        short = 'k',
        default_value_t = DEFAULT_KNN,
        help = "Number of nearest neighbours per target cell"
    )]
    knn: usize,

    #[arg(
        long,
        value_delimiter(','),
        help = "Edges kept per target cell (single value or one per target)",
        long_help = "How many of the queried neighbour edges to keep per\n\
		     target cell, strongest first. At most --knn. A single\n\
		     value applies to every target; a comma-separated list\n\
		     must match the number of targets. Defaults to --knn."
    )]
    use_k: Vec<usize>,

    #[arg(
        long,
        value_delimiter(','),
        help = "Spike edge weight scale (single value or one per target)",
        long_help = "Scale factor applied to the kept target-reference\n\
		     edge weights. A single value applies to every target;\n\
		     a comma-separated list must match the number of\n\
		     targets. Defaults to 1.0."
    )]
    weight_scale: Vec<f32>,

    #[arg(long, help = "Apply CORAL covariance alignment")]
    coral: bool,

    #[arg(
        long,
        short = 'd',
        default_value_t = 2,
        help = "Layout dimensionality"
    )]
    dims: usize,

    #[arg(
        long,
        default_value_t = 50,
        help = "Subspace iterations for the spectral layout"
    )]
    num_iter: usize,

    #[arg(
        long,
        short,
        required = true,
        help = "Output header",
        long_help = "Output header for results:\n\n\
		     {out}.coords.tsv.gz: cell, dataset, x1 ... x{dims}"
    )]
    out: Box<str>,

    #[arg(long, short, help = "Verbosity")]
    verbose: bool,
}

/// Broadcast a per-target option: one value for all targets, or one each
fn per_target<T: Copy>(values: &[T], default: T, ntargets: usize) -> anyhow::Result<Vec<T>> {
    match values.len() {
        0 => Ok(vec![default; ntargets]),
        1 => Ok(vec![values[0]; ntargets]),
        n if n == ntargets => Ok(values.to_vec()),
        n => Err(anyhow::anyhow!(
            "{} values given for {} targets",
            n,
            ntargets
        )),
    }
}

pub fn run_embed(args: &EmbedArgs) -> anyhow::Result<()> {
    init_logging(args.verbose);

    let ntargets = args.targets.len();
    let use_k = per_target(&args.use_k, args.knn, ntargets)?;
    let weight_scale = per_target(&args.weight_scale, 1.0, ntargets)?;

    let reference = read_dataset(args.reference.as_ref(), None)?;
    let reference_graph = read_reference_graph(args.graph.as_ref(), reference.num_cells())?;

    let basis = args
        .basis
        .as_deref()
        .map(|f| read_basis(f, &reference.feature_names))
        .transpose()?;

    let session = MappingSession::new(&reference, basis)?;

    //////////////////////////////////////////
    // 1. spike each target into the graph  //
    //////////////////////////////////////////

    let mut builder = UnifiedGraphBuilder::new();
    builder.set_reference(reference_graph)?;

    let options = MapOptions {
        knn: args.knn,
        align: AlignOptions {
            coral: args.coral,
            ..Default::default()
        },
        persist: false,
        block_size: None,
    };

    let mut targets = Vec::with_capacity(ntargets);
    for (i, target_file) in args.targets.iter().enumerate() {
        let mut target = read_dataset(target_file.as_ref(), None)?;
        let edges = map_with_coral_fallback(&session, &mut target, &options)?;
        builder.add_target(target.name.as_ref(), &edges, weight_scale[i], use_k[i])?;
        targets.push(target);
    }

    let unified = builder.build()?;
    info!(
        "embedding {} vertices ({} reference, {} target)",
        unified.num_vertices(),
        unified.num_reference,
        unified.num_target_cells()
    );

    //////////////////////////////
    // 2. spectral re-embedding //
    //////////////////////////////

    let layout = SpectralLayout {
        num_iter: args.num_iter,
        ..Default::default()
    };
    let coords = layout.layout(&unified, None, args.dims)?;

    ///////////////////////
    // 3. write results  //
    ///////////////////////

    let mut vertex_names: Vec<&str> = reference.cell_names.iter().map(|x| x.as_ref()).collect();
    let mut vertex_datasets: Vec<&str> = vec![reference.name.as_ref(); reference.num_cells()];
    for target in targets.iter() {
        vertex_names.extend(target.cell_names.iter().map(|x| x.as_ref()));
        vertex_datasets.extend(vec![target.name.as_ref(); target.num_cells()]);
    }

    let mut header = vec!["cell", "dataset"];
    let dim_names: Vec<String> = (0..args.dims).map(|d| format!("x{}", d + 1)).collect();
    header.extend(dim_names.iter().map(|x| x.as_str()));

    let coord_file = format!("{}.coords.tsv.gz", args.out);
    write_tsv_rows(
        &coord_file,
        &header,
        (0..unified.num_vertices()).map(|v| {
            let mut fields = vec![
                vertex_names[v].to_string(),
                vertex_datasets[v].to_string(),
            ];
            for d in 0..args.dims {
                fields.push(format!("{}", coords[(v, d)]));
            }
            fields
        }),
    )?;
    info!("wrote {}", coord_file);

    Ok(())
}
