use crate::common::*;
use crate::input::*;

use mapping_util::mapping_score::compute_mapping_scores;

#[derive(Args, Debug)]
pub struct MapArgs {
    #[arg(
        long,
        short = 'r',
        required = true,
        help = "Reference data matrix",
        long_help = "Reference feature matrix (features x cells).\n\
		     Tab/comma/space-delimited with a header of cell names\n\
		     and a first column of feature names; `.gz` accepted."
    )]
    reference: Box<str>,

    #[arg(
        long,
        short = 't',
        required = true,
        help = "Target data matrix",
        long_help = "Target feature matrix (features x cells) to be\n\
		     projected onto the reference. The feature schema may\n\
		     differ from the reference; columns are reconciled\n\
		     before querying."
    )]
    target: Box<str>,

    #[arg(
        long,
        short = 'b',
        help = "Projection basis matrix",
        long_help = "Optional basis (features x dims) shared by reference\n\
		     and target. When given, nearest neighbours are matched\n\
		     in the projected space instead of raw feature space."
    )]
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
        short = 'g',
        help = "Group assignment file",
        long_help = "Two-column `cell group` file over target cells.\n\
		     Mapping scores are accumulated per group; without\n\
		     this file all target cells form one group."
    )]
    groups: Option<Box<str>>,

    #[arg(long, help = "Apply CORAL covariance alignment")]
    coral: bool,

    #[arg(
        long,
        default_value_t = 5000,
        help = "Skip CORAL above this many overlapping features",
        long_help = "Guard for the cubic covariance step: CORAL is skipped\n\
		     when the schema overlap exceeds this count. Set to 0\n\
		     to remove the guard."
    )]
    coral_cap: usize,

    #[arg(long, help = "Report log(1+x) transformed mapping scores")]
    log_transform: bool,

    #[arg(
        long,
        short,
        required = true,
        help = "Output header",
        long_help = "Output header for results:\n\n\
		     {out}.edges.tsv.gz:  target, reference, distance, weight\n\
		     {out}.scores.tsv.gz: reference cells x target groups"
    )]
    out: Box<str>,

    #[arg(long, short, help = "Verbosity")]
    verbose: bool,
}

pub fn run_map(args: &MapArgs) -> anyhow::Result<()> {
    init_logging(args.verbose);

    let reference = read_dataset(args.reference.as_ref(), None)?;
    let mut target = read_dataset(args.target.as_ref(), None)?;

    let basis = args
        .basis
        .as_deref()
        .map(|f| read_basis(f, &reference.feature_names))
        .transpose()?;

    let session = MappingSession::new(&reference, basis)?;

    let options = MapOptions {
        knn: args.knn,
        align: AlignOptions {
            coral: args.coral,
            coral_feature_cap: (args.coral_cap > 0).then_some(args.coral_cap),
            ..Default::default()
        },
        persist: true,
        block_size: None,
    };

    let edges = map_with_coral_fallback(&session, &mut target, &options)?;

    ///////////////////////////////
    // 1. write neighbour edges  //
    ///////////////////////////////

    let edge_file = format!("{}.edges.tsv.gz", args.out);
    write_tsv_rows(
        &edge_file,
        &["target", "reference", "distance", "weight"],
        edges.edges.iter().map(|e| {
            vec![
                target.cell_names[e.target].to_string(),
                reference.cell_names[e.reference].to_string(),
                format!("{}", e.distance),
                format!("{}", e.weight),
            ]
        }),
    )?;
    info!("wrote {}", edge_file);

    ///////////////////////////////
    // 2. write mapping scores   //
    ///////////////////////////////

    let groups = args
        .groups
        .as_deref()
        .map(|f| read_groups(f, &target.cell_names))
        .transpose()?;

    let scores = compute_mapping_scores(&edges, groups.as_deref(), args.log_transform)?;

    let group_names: Vec<Box<str>> = scores.group_names().map(|x| x.into()).collect();
    let mut score_matrix = Mat::zeros(reference.num_cells(), group_names.len());
    for (j, (_, score)) in scores.iter().enumerate() {
        score_matrix.column_mut(j).copy_from(&score);
    }

    let score_file = format!("{}.scores.tsv.gz", args.out);
    write_named_matrix(
        &score_file,
        &reference.cell_names,
        &group_names,
        &score_matrix,
    )?;
    info!("wrote {}", score_file);

    Ok(())
}
