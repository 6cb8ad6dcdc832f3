mod common;
mod input;
mod run_embed;
mod run_map;
mod run_transfer;
mod spectral;

use common::*;
use run_embed::*;
use run_map::*;
use run_transfer::*;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "LENTIL",
    long_about = "Layered Embedding of New Targets onto an Integrated Landscape\n\
		  Project query single-cell data onto a reference population:\n\
		  kNN mapping scores, label transfer, and joint re-embedding.\n\
		  Matrix files are (gzipped) delimited text, features x cells."
)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Map target cells onto the reference by k-nearest neighbours",
        long_about = "Project a target data set onto the reference in three stages:\n\
		      (1) Reconcile the two feature schemas (optional CORAL)\n\
		      (2) Query k nearest reference cells per target cell\n\
		      (3) Accumulate per-reference mapping scores by target group.\n"
    )]
    Map(MapArgs),

    #[command(
        about = "Transfer a categorical reference annotation to target cells",
        long_about = "Assign reference labels to target cells in three stages:\n\
		      (1) Reconcile the two feature schemas (optional CORAL)\n\
		      (2) Query k nearest reference cells per target cell\n\
		      (3) Weighted majority vote with a confidence threshold.\n"
    )]
    Transfer(TransferArgs),

    #[command(
        about = "Joint embedding of reference and target cells",
        long_about = "Re-embed everything on one map in three stages:\n\
		      (1) Map each target onto the reference by kNN\n\
		      (2) Spike target-reference edges into the reference graph\n\
		      (3) Spectral layout of the unified graph.\n"
    )]
    Embed(EmbedArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.commands {
        Commands::Map(args) => {
            run_map(args)?;
        }
        Commands::Transfer(args) => {
            run_transfer(args)?;
        }
        Commands::Embed(args) => {
            run_embed(args)?;
        }
    }

    info!("Done");
    Ok(())
}
