use crate::common::*;
use crate::input::*;

use mapping_util::label_transfer::{transfer_labels, TieBreak, TransferOptions};

#[derive(ValueEnum, Clone, Debug, Default, PartialEq)]
#[clap(rename_all = "lowercase")]
pub enum TieBreakArg {
    /// Assign the lexicographically first of the tied labels
    #[default]
    Lexicographic,
    /// Leave tied cells unassigned
    Unassigned,
}

impl From<&TieBreakArg> for TieBreak {
    fn from(arg: &TieBreakArg) -> Self {
        match arg {
            TieBreakArg::Lexicographic => TieBreak::Lexicographic,
            TieBreakArg::Unassigned => TieBreak::Unassigned,
        }
    }
}

#[derive(Args, Debug)]
pub struct TransferArgs {
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
        short = 'a',
        required = true,
        help = "Reference cell annotations",
        long_help = "Attribute table over reference cells:\n\
		     header `cell attr1 attr2 ...`, one row per cell.\n\
		     The label column must be categorical."
    )]
    annotations: Box<str>,

    #[arg(
        long,
        short = 'l',
        required = true,
        help = "Label column to transfer",
        long_help = "Name of the categorical annotation column whose\n\
		     values are voted onto target cells."
    )]
    label: Box<str>,

    #[arg(
        long,
        short = 't',
        required = true,
        help = "Target data matrix"
    )]
    target: Box<str>,

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
        default_value_t = 0.5,
        help = "Majority threshold in [0, 1]",
        long_help = "A label is assigned only when its share of a cell's\n\
		     total neighbour weight strictly exceeds this value;\n\
		     otherwise the cell is reported as `unassigned`."
    )]
    threshold: f32,

    #[arg(
        long,
        value_enum,
        default_value = "lexicographic",
        help = "Resolution rule for exactly tied labels"
    )]
    tie_break: TieBreakArg,

    #[arg(long, help = "Apply CORAL covariance alignment")]
    coral: bool,

    #[arg(
        long,
        short,
        required = true,
        help = "Output header",
        long_help = "Output header for results:\n\n\
		     {out}.labels.tsv.gz: cell, label, share, total_weight"
    )]
    out: Box<str>,

    #[arg(long, short, help = "Verbosity")]
    verbose: bool,
}

pub fn run_transfer(args: &TransferArgs) -> anyhow::Result<()> {
    init_logging(args.verbose);

    let reference = read_dataset(args.reference.as_ref(), Some(args.annotations.as_ref()))?;
    let mut target = read_dataset(args.target.as_ref(), None)?;

    // validate the label column before any heavy work
    let labels = reference.attributes.categorical(args.label.as_ref())?;
    info!(
        "transferring '{}' with {} categories",
        args.label,
        labels.num_categories()
    );

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
            ..Default::default()
        },
        persist: false,
        block_size: None,
    };
    let edges = map_with_coral_fallback(&session, &mut target, &options)?;

    let votes = transfer_labels(
        &edges,
        labels,
        &TransferOptions {
            threshold: args.threshold,
            tie_break: (&args.tie_break).into(),
        },
    )?;

    let assigned = votes.iter().filter(|v| v.label.is_some()).count();
    info!("{} / {} target cells assigned", assigned, votes.len());

    let label_file = format!("{}.labels.tsv.gz", args.out);
    write_tsv_rows(
        &label_file,
        &["cell", "label", "share", "total_weight"],
        votes.iter().enumerate().map(|(t, vote)| {
            vec![
                target.cell_names[t].to_string(),
                vote.label_name(labels).to_string(),
                format!("{}", vote.share),
                format!("{}", vote.total_weight),
            ]
        }),
    )?;
    info!("wrote {}", label_file);

    Ok(())
}
