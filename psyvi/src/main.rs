mod cli;

use clap::{Parser, Subcommand};
use cli::fit::*;
use cli::simulate::*;
use log::info;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "PSYVI",
    long_about = "Variational inference for psychometric models\n\
		  Item response theory (1PL-4PL) and cognitive diagnosis\n\
		  (DINA, DINO, higher-order DINA) on binary response matrices."
)]
struct Cli {
    #[command(subcommand)]
    commands: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Fit a model to a response matrix",
        long_about = "Fit a model to a response matrix in three stages:\n\
		      (1) Read responses (0, 1, -1 for missing) and a Q-matrix\n\
		      (2) Maximize the ELBO over minibatches of respondents\n\
		      (3) Write item estimates and per-respondent estimates.\n"
    )]
    Fit(FitArgs),

    #[command(
        about = "Generate synthetic responses with known parameters",
        long_about = "Draw a response matrix (and a Q-matrix for cognitive\n\
		      diagnosis models) from a model with random parameters.\n\
		      Writes {name}_{sample_size}.txt and {name}_{sample_size}_q.txt.\n"
    )]
    Simulate(SimulateArgs),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match &cli.commands {
        Commands::Fit(args) => {
            fit_model(args)?;
        }
        Commands::Simulate(args) => {
            simulate_data(args)?;
        }
    }

    info!("Done");
    Ok(())
}
