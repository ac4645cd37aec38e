//! Fit/estimate API per model family and inference strategy

mod cdm;
mod ho_dina;
mod irt;

pub use cdm::{
    CdmModel, IndependentSkills, JointPatterns, SkillStructure, VaeCcdm, VaeCdm, Vccdm, Vcdm,
};
pub use ho_dina::{HoDinaModel, VaeCHoDina, VcHoDina};
pub use irt::{IrtModel, VaeIrt, Virt};

use crate::compute::ComputeContext;
use crate::data::ResponseMatrix;
use crate::error::ConfigurationError;
use crate::variational::GaussianPosterior;
use ndarray::Array2;
use psyvi_util::candle_core::{self, Tensor};
use psyvi_util::candle_loss_functions::bernoulli_profile_likelihood;
use psyvi_util::candle_minibatch::row_chunks;

/// Rows per chunk when evaluating all respondents
const EVAL_CHUNK_SIZE: usize = 4096;

/// Construction-time options shared by every model
#[derive(Debug, Clone)]
pub struct ModelOptions {
    /// latent ability dimensions (IRT)
    pub x_feature: usize,
    /// `x_feature` x J loading mask (IRT)
    pub mask: Option<Array2<f32>>,
    /// respondents per optimization step; `None` for the full batch
    pub subsample_size: Option<usize>,
    /// hidden layers of the recognition networks (amortized only)
    pub encoder_layers: Vec<usize>,
    /// Monte Carlo draws of continuous latents per step
    pub num_samples: usize,
    pub seed: u64,
    pub context: ComputeContext,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            x_feature: 1,
            mask: None,
            subsample_size: None,
            encoder_layers: vec![64, 32],
            num_samples: 1,
            seed: 42,
            context: ComputeContext::cpu(),
        }
    }
}

impl ModelOptions {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.x_feature == 0 {
            return Err(ConfigurationError::InvalidOption(
                "x_feature must be at least 1".into(),
            ));
        }
        if self.subsample_size == Some(0) {
            return Err(ConfigurationError::InvalidOption(
                "subsample_size must be positive".into(),
            ));
        }
        if self.num_samples == 0 {
            return Err(ConfigurationError::InvalidOption(
                "num_samples must be at least 1".into(),
            ));
        }
        if self.encoder_layers.contains(&0) {
            return Err(ConfigurationError::InvalidOption(
                "encoder layers must be non-empty".into(),
            ));
        }
        Ok(())
    }
}

/// Indexes `lb..ub` as a row tensor
fn row_range(lb: usize, ub: usize, ctx: &ComputeContext) -> candle_core::Result<Tensor> {
    Tensor::arange(lb as u32, ub as u32, &ctx.device)
}

/// Posterior means of every respondent (N x D)
fn ability_means<Q: GaussianPosterior>(
    posterior: &Q,
    data: &ResponseMatrix,
    ctx: &ComputeContext,
) -> candle_core::Result<Array2<f32>> {
    let chunks = row_chunks(data.nrows(), EVAL_CHUNK_SIZE)
        .into_iter()
        .map(|(lb, ub)| {
            let rows = row_range(lb, ub, ctx)?;
            Ok(posterior.posterior(data, &rows, false)?.mean)
        })
        .collect::<candle_core::Result<Vec<_>>>()?;
    crate::params::tensor_to_array2(&Tensor::cat(&chunks, 0)?)
}

///
/// p(α | y) for every respondent, in chunks small enough to hold
/// `chunk x P` log-likelihoods
///
/// * `prob_pj` - success probability of each pattern on each item
/// * `log_prior` - log prior of the patterns for the given rows
///
fn pattern_posterior<F>(
    data: &ResponseMatrix,
    prob_pj: &Tensor,
    ctx: &ComputeContext,
    log_prior: F,
) -> candle_core::Result<Array2<f64>>
where
    F: Fn(&Tensor) -> candle_core::Result<Tensor>,
{
    let num_patterns = prob_pj.dims2()?.0;
    let chunk = ((1usize << 22) / num_patterns).clamp(1, EVAL_CHUNK_SIZE);

    let mut out = Array2::<f64>::zeros((data.nrows(), num_patterns));

    for (lb, ub) in row_chunks(data.nrows(), chunk) {
        let rows = row_range(lb, ub, ctx)?;
        let (y_nj, m_nj) = data.rows(&rows)?;
        let llik_np = bernoulli_profile_likelihood(&y_nj, &m_nj, prob_pj)?;
        let weights = crate::marginal::posterior_weights(&llik_np, &log_prior(&rows)?)?
            .to_vec2::<f64>()?;
        for (i, w) in weights.into_iter().enumerate() {
            for (p, x) in w.into_iter().enumerate() {
                out[[lb + i, p]] = x;
            }
        }
    }
    Ok(out)
}

/// Most probable pattern of each row as 0/1 skills (N x K)
fn map_patterns(weights_np: &Array2<f64>, num_skills: usize) -> Array2<f32> {
    let mut out = Array2::<f32>::zeros((weights_np.nrows(), num_skills));
    for (i, w) in weights_np.outer_iter().enumerate() {
        let best = w
            .iter()
            .enumerate()
            .fold((0usize, f64::NEG_INFINITY), |acc, (p, &x)| {
                if x > acc.1 {
                    (p, x)
                } else {
                    acc
                }
            })
            .0;
        for k in 0..num_skills {
            out[[i, k]] = ((best >> k) & 1) as f32;
        }
    }
    out
}

/// Marginal mastery probability of each skill (N x K)
fn mastery_probabilities(weights_np: &Array2<f64>, num_skills: usize) -> Array2<f32> {
    let mut out = Array2::<f32>::zeros((weights_np.nrows(), num_skills));
    for (i, w) in weights_np.outer_iter().enumerate() {
        for (p, &x) in w.iter().enumerate() {
            for k in 0..num_skills {
                if (p >> k) & 1 == 1 {
                    out[[i, k]] += x as f32;
                }
            }
        }
    }
    out
}
