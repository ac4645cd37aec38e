use super::{init_logger, ModelArg};
use clap::{Args, ValueEnum};
use log::info;
use ndarray::Array2;
use psyvi::facade::SkillStructure;
use psyvi::*;
use psyvi_util::common_io::{read_matrix, write_lines, write_matrix};

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
#[clap(rename_all = "lowercase")]
pub enum InferenceArg {
    Bbvi,
    Vae,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
#[clap(rename_all = "lowercase")]
pub enum SkillArg {
    Independent,
    Joint,
}

#[derive(Args, Debug)]
pub struct FitArgs {
    #[arg(
        required = true,
        help = "Response matrix file",
        long_help = "Respondents x items matrix of 0, 1 and -1 (missing).\n\
		     Whitespace or comma delimited, optionally gzipped."
    )]
    data_file: Box<str>,

    #[arg(long, short, value_enum, help = "Model family")]
    model: ModelArg,

    #[arg(
        long,
        short,
        help = "Q-matrix file (skills x items)",
        long_help = "Skills x items binary requirement matrix.\n\
		     Required for dina, dino and ho_dina."
    )]
    q_file: Option<Box<str>>,

    #[arg(
        long,
        short,
        required = true,
        help = "Output header",
        long_help = "Output header for results:\n\
		     - {out}.fit.json\n\
		     - {out}.{parameter}.txt.gz\n\
		     - {out}.ability.txt.gz (irt, ho_dina)\n\
		     - {out}.mastery.txt.gz and {out}.pattern.txt.gz (cdm)\n"
    )]
    out: Box<str>,

    #[arg(long, value_enum, default_value = "bbvi", help = "Inference strategy")]
    inference: InferenceArg,

    #[arg(
        long,
        value_enum,
        default_value = "independent",
        help = "Skill pattern distribution (dina, dino)"
    )]
    skills: SkillArg,

    #[arg(long, default_value_t = 1, help = "Latent ability dimensions (irt)")]
    x_feature: usize,

    #[arg(long, help = "Dimension x item loading mask file (irt)")]
    mask_file: Option<Box<str>>,

    #[arg(
        long,
        short = 's',
        help = "Respondents per step",
        long_help = "Respondents per optimization step.\n\
		     Full batch when absent or larger than the data."
    )]
    subsample_size: Option<usize>,

    #[arg(
        long,
        value_delimiter = ',',
        default_values_t = vec![64, 32],
        help = "Encoder hidden layers (vae)"
    )]
    encoder_layers: Vec<usize>,

    #[arg(long, default_value_t = 1, help = "Monte Carlo samples per step")]
    num_samples: usize,

    #[arg(long, short = 'i', default_value_t = 10000, help = "Maximum iterations")]
    max_iter: usize,

    #[arg(long, short = 'l', default_value_t = 1e-2, help = "Learning rate")]
    learning_rate: f64,

    #[arg(long, value_enum, default_value = "adam", help = "Optimizer")]
    optimizer: OptimizerKind,

    #[arg(long, default_value_t = 50, help = "Convergence window")]
    window: usize,

    #[arg(long, default_value_t = 1e-4, help = "Relative loss tolerance")]
    rel_tol: f64,

    #[arg(long, default_value_t = 1e-3, help = "Parameter change tolerance")]
    param_tol: f64,

    #[arg(long, default_value_t = 3, help = "Consecutive windows to pass")]
    patience: usize,

    #[arg(long, default_value_t = 200, help = "Minimum iterations")]
    min_iter: usize,

    #[arg(long, default_value_t = 100, help = "Log every this many iterations")]
    log_every: usize,

    #[arg(long, default_value_t = 42, help = "Random seed")]
    seed: u64,

    #[arg(long, value_enum, default_value = "cpu", help = "Compute device")]
    device: ComputeDevice,

    #[arg(long, default_value_t = 0, help = "Device number")]
    device_no: usize,

    #[arg(long, short, help = "Verbose logging")]
    verbose: bool,

    #[arg(long, help = "Show a progress bar")]
    progress: bool,
}

#[derive(Default)]
struct Outputs {
    report: Option<FitReport>,
    ability: Option<Array2<f32>>,
    mastery: Option<Array2<f32>>,
    pattern: Option<Array2<f32>>,
}

pub fn fit_model(args: &FitArgs) -> anyhow::Result<()> {
    init_logger(args.verbose);

    let context = ComputeContext::new(args.device, args.device_no)?;

    let y = read_matrix(&args.data_file)?;
    info!("read {} x {} responses", y.nrows(), y.ncols());

    let mask = args.mask_file.as_deref().map(read_matrix).transpose()?;

    let options = ModelOptions {
        x_feature: args.x_feature,
        mask,
        subsample_size: args.subsample_size,
        encoder_layers: args.encoder_layers.clone(),
        num_samples: args.num_samples,
        seed: args.seed,
        context,
    };

    let fit = FitOptions {
        max_iter: args.max_iter,
        optimizer: OptimizerConfig {
            kind: args.optimizer,
            learning_rate: args.learning_rate,
        },
        convergence: ConvergenceCriteria {
            window: args.window,
            rel_tol: args.rel_tol,
            param_tol: args.param_tol,
            patience: args.patience,
            min_iter: args.min_iter,
        },
        log_every: args.log_every,
        show_progress: args.progress,
    };

    let outputs = if args.model.is_irt() {
        match args.inference {
            InferenceArg::Bbvi => run_irt::<Bbvi>(&y, args.model, options, &fit)?,
            InferenceArg::Vae => run_irt::<Amortized>(&y, args.model, options, &fit)?,
        }
    } else {
        let q_file = args
            .q_file
            .as_deref()
            .ok_or(anyhow::anyhow!("{} needs a Q-matrix (--q-file)", args.model.name()))?;
        let q = read_matrix(q_file)?;

        match (args.model, args.inference, args.skills) {
            (ModelArg::HoDina, InferenceArg::Bbvi, _) => {
                run_ho_dina::<Bbvi>(&y, &q, options, &fit)?
            }
            (ModelArg::HoDina, InferenceArg::Vae, _) => {
                run_ho_dina::<Amortized>(&y, &q, options, &fit)?
            }
            (m, InferenceArg::Bbvi, SkillArg::Independent) => {
                run_cdm::<Bbvi, IndependentSkills>(&y, &q, m, options, &fit)?
            }
            (m, InferenceArg::Vae, SkillArg::Independent) => {
                run_cdm::<Amortized, IndependentSkills>(&y, &q, m, options, &fit)?
            }
            (m, InferenceArg::Bbvi, SkillArg::Joint) => {
                run_cdm::<Bbvi, JointPatterns>(&y, &q, m, options, &fit)?
            }
            (m, InferenceArg::Vae, SkillArg::Joint) => {
                run_cdm::<Amortized, JointPatterns>(&y, &q, m, options, &fit)?
            }
        }
    };

    write_outputs(&args.out, outputs)
}

fn run_irt<I: Inference>(
    y: &Array2<f32>,
    model: ModelArg,
    options: ModelOptions,
    fit: &FitOptions,
) -> anyhow::Result<Outputs> {
    let mut m = IrtModel::<I>::new(y.view(), model.name(), options)?;
    let report = m.fit(fit, None)?;
    Ok(Outputs {
        report: Some(report),
        ability: Some(m.ability_estimates()?),
        ..Default::default()
    })
}

fn run_cdm<I: Inference, S: SkillStructure>(
    y: &Array2<f32>,
    q: &Array2<f32>,
    model: ModelArg,
    options: ModelOptions,
    fit: &FitOptions,
) -> anyhow::Result<Outputs> {
    let mut m = CdmModel::<I, S>::new(y.view(), q.view(), model.name(), options)?;
    let report = m.fit(fit, None)?;
    Ok(Outputs {
        report: Some(report),
        mastery: Some(m.mastery_probabilities()?),
        pattern: Some(m.map_patterns()?),
        ..Default::default()
    })
}

fn run_ho_dina<I: Inference>(
    y: &Array2<f32>,
    q: &Array2<f32>,
    options: ModelOptions,
    fit: &FitOptions,
) -> anyhow::Result<Outputs> {
    let mut m = HoDinaModel::<I>::new(y.view(), q.view(), options)?;
    let report = m.fit(fit, None)?;
    Ok(Outputs {
        report: Some(report),
        ability: Some(m.ability_estimates()?),
        mastery: Some(m.mastery_probabilities()?),
        pattern: Some(m.map_patterns()?),
    })
}

fn write_outputs(out: &str, outputs: Outputs) -> anyhow::Result<()> {
    if let Some(report) = &outputs.report {
        let json = serde_json::to_string_pretty(report)?;
        write_lines(&[json], &format!("{}.fit.json", out))?;

        for (name, value) in report.estimates.iter() {
            write_matrix(&value.view(), &format!("{}.{}.txt.gz", out, name))?;
        }
    }

    for (name, value) in [
        ("ability", &outputs.ability),
        ("mastery", &outputs.mastery),
        ("pattern", &outputs.pattern),
    ] {
        if let Some(value) = value {
            write_matrix(&value.view(), &format!("{}.{}.txt.gz", out, name))?;
        }
    }

    info!("wrote results to {}.*", out);
    Ok(())
}
