//! Exact marginalization over the 2^K skill-mastery patterns

use crate::compute::ComputeContext;
use crate::error::{CapacityError, ModelError};
use psyvi_util::candle_core::{DType, Device, Result, Tensor};
use psyvi_util::candle_loss_functions::*;

/// Largest skill count we are willing to enumerate
pub const MAX_SKILLS: usize = 20;

///
/// All binary mastery patterns over `K` skills. Pattern `p` masters
/// skill `k` iff bit `k` of `p` is set.
///
#[derive(Debug, Clone)]
pub struct SkillPatterns {
    num_skills: usize,
    patterns_pk: Tensor,
    patterns_kp: Tensor,
    complement_kp: Tensor,
}

impl SkillPatterns {
    pub fn enumerate(
        num_skills: usize,
        ctx: &ComputeContext,
    ) -> std::result::Result<Self, ModelError> {
        if num_skills > MAX_SKILLS {
            return Err(CapacityError {
                skills: num_skills,
                max: MAX_SKILLS,
            }
            .into());
        }

        let num_patterns = 1usize << num_skills;
        let bits = (0..num_patterns)
            .flat_map(|p| (0..num_skills).map(move |k| ((p >> k) & 1) as f32))
            .collect::<Vec<_>>();

        let patterns_pk = Tensor::from_vec(bits, (num_patterns, num_skills), &ctx.device)?
            .to_dtype(ctx.dtype)?;
        let patterns_kp = patterns_pk.t()?.contiguous()?;
        let complement_kp = patterns_kp.affine(-1., 1.)?;

        Ok(Self {
            num_skills,
            patterns_pk,
            patterns_kp,
            complement_kp,
        })
    }

    pub fn num_skills(&self) -> usize {
        self.num_skills
    }

    pub fn num_patterns(&self) -> usize {
        1 << self.num_skills
    }

    /// P x K
    pub fn patterns(&self) -> &Tensor {
        &self.patterns_pk
    }

    ///
    /// Log probability of every pattern when skills are independent
    /// Bernoulli variables
    ///
    /// log p(α) = Σ_k α_k log σ(l_k) + (1 - α_k) log σ(-l_k)
    ///
    /// * `logits_nk` - per-skill mastery logits (n x K)
    ///
    /// Returns `n x P`, normalized along patterns
    pub fn independent_log_probs(&self, logits_nk: &Tensor) -> Result<Tensor> {
        let log_on = log_sigmoid(logits_nk)?.matmul(&self.patterns_kp)?;
        let log_off = log_sigmoid(&logits_nk.neg()?)?.matmul(&self.complement_kp)?;
        log_on.add(&log_off)
    }

    /// Expected mastery of each skill under pattern weights (n x P -> n x K)
    pub fn mastery(&self, weights_np: &Tensor) -> Result<Tensor> {
        let patterns_pk = self
            .patterns_pk
            .to_device(weights_np.device())?
            .to_dtype(weights_np.dtype())?;
        weights_np.matmul(&patterns_pk)
    }
}

///
/// log Σ_α p(α) p(y | α) for each row
///
/// * `llik_np` - log-likelihood of each row under each pattern
/// * `log_prior_np` - log prior of each pattern (n x P or 1 x P)
///
pub fn marginal_log_likelihood(llik_np: &Tensor, log_prior_np: &Tensor) -> Result<Tensor> {
    log_sum_exp(&llik_np.broadcast_add(log_prior_np)?, 1)
}

///
/// Posterior weight of each pattern, p(α | y), computed on the host in
/// double precision so that each row sums to one
///
/// Returns `n x P` on the CPU in `f64`
pub fn posterior_weights(llik_np: &Tensor, log_prior_np: &Tensor) -> Result<Tensor> {
    let log_joint = llik_np
        .broadcast_add(log_prior_np)?
        .to_device(&Device::Cpu)?
        .to_dtype(DType::F64)?;
    log_normalize(&log_joint, 1)?.exp()
}

///
/// ELBO contribution of a categorical posterior over patterns
///
/// Σ_α q(α) [ log p(y | α) + log p(α) - log q(α) ]
///
/// * `llik_np` - log-likelihood under each pattern
/// * `log_prior_np` - log prior (n x P or 1 x P)
/// * `log_q_np` - normalized log posterior (n x P)
///
/// Returns a vector of length `n`
pub fn categorical_elbo(
    llik_np: &Tensor,
    log_prior_np: &Tensor,
    log_q_np: &Tensor,
) -> Result<Tensor> {
    let q_np = log_q_np.exp()?;
    let expected_llik = q_np.mul(llik_np)?.sum(1)?;
    let kl = categorical_kl(log_q_np, log_prior_np)?;
    expected_llik.sub(&kl)
}
