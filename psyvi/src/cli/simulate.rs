use super::{init_logger, ModelArg};
use clap::Args;
use log::info;
use psyvi::*;
use std::path::Path;

#[derive(Args, Debug)]
pub struct SimulateArgs {
    #[arg(long, short, value_enum, help = "Model family")]
    model: ModelArg,

    #[arg(long, short = 'n', default_value_t = 1000, help = "Number of respondents")]
    sample_size: usize,

    #[arg(long, short = 'j', default_value_t = 20, help = "Number of items")]
    item_size: usize,

    #[arg(long, short = 'k', default_value_t = 3, help = "Number of skills (cdm)")]
    skill_size: usize,

    #[arg(long, default_value_t = 1, help = "Latent ability dimensions (irt)")]
    x_feature: usize,

    #[arg(long, default_value_t = 0.0, help = "Fraction of missing responses")]
    missing_rate: f32,

    #[arg(long, default_value_t = 42, help = "Random seed")]
    seed: u64,

    #[arg(
        long,
        help = "File name stem",
        long_help = "File name stem; files are {name}_{sample_size}.txt\n\
		     and {name}_{sample_size}_q.txt. Defaults to `data`."
    )]
    name: Option<Box<str>>,

    #[arg(long, short, default_value = ".", help = "Output directory")]
    out_dir: Box<str>,

    #[arg(long, short, help = "Verbose logging")]
    verbose: bool,
}

pub fn simulate_data(args: &SimulateArgs) -> anyhow::Result<()> {
    init_logger(args.verbose);

    let dir = Path::new(&*args.out_dir);
    std::fs::create_dir_all(dir)?;
    let name = args.name.as_deref();

    let files = if args.model.is_irt() {
        let family: ModelFamily = args.model.name().parse()?;
        let mut sim = IrtSimulation::new(family, args.sample_size, args.item_size);
        sim.x_feature = args.x_feature;
        sim.missing_rate = args.missing_rate;
        sim.seed = args.seed;
        RandomIrt::new(&sim)?.save_sample(dir, name)?
    } else {
        let family = match args.model {
            ModelArg::HoDina => ModelFamily::HoDina,
            m => m.name().parse()?,
        };
        let mut sim = CdmSimulation::new(family, args.sample_size, args.item_size, args.skill_size);
        sim.missing_rate = args.missing_rate;
        sim.seed = args.seed;
        if family == ModelFamily::HoDina {
            RandomHoDina::new(&sim)?.save_sample(dir, name)?
        } else {
            RandomCdm::new(&sim)?.save_sample(dir, name)?
        }
    };

    for f in files {
        info!("wrote {}", f);
    }
    Ok(())
}
