use candle_core::{Result, Tensor};
use special::Gamma as SpecialGamma;

/// Probabilities are clamped into `[PROB_EPS, 1 - PROB_EPS]` before
/// taking logs.
pub const PROB_EPS: f64 = 1e-6;

/// KL divergence loss between N(mu, sigma^2) and N(0, 1)
///
/// 0.5 * sum_k (sigma^2 - 1 + mu^2 - log(sigma^2))
///
/// * `z_mean` - mean of Gaussian distribution
/// * `z_lnvar` - log variance of Gaussian distribution
///
pub fn gaussian_kl_loss(z_mean: &Tensor, z_lnvar: &Tensor) -> Result<Tensor> {
    let z_var = z_lnvar.exp()?;
    (z_var - 1. + z_mean.powf(2.)? - z_lnvar)?.sum(z_mean.rank() - 1)? * 0.5
}

/// log(sigmoid(x)) = min(x, 0) - log(1 + exp(-|x|))
pub fn log_sigmoid(x: &Tensor) -> Result<Tensor> {
    let tail = (x.abs()?.neg()?.exp()? + 1.0)?.log()?;
    x.minimum(0.0)?.sub(&tail)
}

/// Numerically stable log(sum(exp(x))) along `dim`, keeping `dim`
pub fn log_sum_exp_keepdim(x: &Tensor, dim: usize) -> Result<Tensor> {
    let max_x = x.max_keepdim(dim)?.detach();
    let shifted = x.broadcast_sub(&max_x)?;
    shifted.exp()?.sum_keepdim(dim)?.log()?.add(&max_x)
}

/// Numerically stable log(sum(exp(x))) along `dim`
pub fn log_sum_exp(x: &Tensor, dim: usize) -> Result<Tensor> {
    log_sum_exp_keepdim(x, dim)?.squeeze(dim)
}

/// x - logsumexp(x) along `dim`
pub fn log_normalize(x: &Tensor, dim: usize) -> Result<Tensor> {
    x.broadcast_sub(&log_sum_exp_keepdim(x, dim)?)
}

/// KL(q || p) of two categorical distributions given in log space
/// along the last dimension
///
/// * `log_q` - normalized log probabilities (n x m)
/// * `log_p` - normalized log probabilities (n x m) or (1 x m)
pub fn categorical_kl(log_q: &Tensor, log_p: &Tensor) -> Result<Tensor> {
    let last = log_q.rank() - 1;
    log_q
        .exp()?
        .mul(&log_q.broadcast_sub(log_p)?)?
        .sum(last)
}

/// Bernoulli log-likelihood with missing entries excluded
///
/// llik(i) = sum_j m(i,j) * [ y(i,j) log p(i,j) + (1 - y(i,j)) log(1 - p(i,j)) ]
///
/// * `y_nj` - binary data (missing entries can be anything)
/// * `mask_nj` - 1 for observed, 0 for missing
/// * `prob_nj` - success probability (reconstruction)
///
pub fn bernoulli_likelihood(y_nj: &Tensor, mask_nj: &Tensor, prob_nj: &Tensor) -> Result<Tensor> {
    let p = prob_nj.clamp(PROB_EPS, 1.0 - PROB_EPS)?;
    let log_p = p.log()?;
    let log_1mp = p.affine(-1.0, 1.0)?.log()?;
    let y_obs = y_nj.mul(mask_nj)?;
    let n_obs = y_nj.affine(-1.0, 1.0)?.mul(mask_nj)?;
    let llik = y_obs.mul(&log_p)?.add(&n_obs.mul(&log_1mp)?)?;
    llik.sum(llik.rank() - 1)
}

/// Bernoulli log-likelihood of every row against every profile
///
/// llik(i,p) = sum_j m(i,j) * [ y(i,j) log q(p,j) + (1 - y(i,j)) log(1 - q(p,j)) ]
///
/// * `y_nj` - binary data
/// * `mask_nj` - observation mask
/// * `prob_pj` - success probability of each profile `p` (P x J)
///
/// Returns `n x P`
pub fn bernoulli_profile_likelihood(
    y_nj: &Tensor,
    mask_nj: &Tensor,
    prob_pj: &Tensor,
) -> Result<Tensor> {
    let p = prob_pj.clamp(PROB_EPS, 1.0 - PROB_EPS)?;
    let log_p_jp = p.log()?.t()?.contiguous()?;
    let log_1mp_jp = p.affine(-1.0, 1.0)?.log()?.t()?.contiguous()?;
    let y_obs = y_nj.mul(mask_nj)?;
    let n_obs = y_nj.affine(-1.0, 1.0)?.mul(mask_nj)?;
    y_obs.matmul(&log_p_jp)?.add(&n_obs.matmul(&log_1mp_jp)?)
}

/// Sum of log N(x; 0, tau^2) over all elements
pub fn gaussian_log_prior(x: &Tensor, tau: f64) -> Result<Tensor> {
    let ln_2pi = (2.0 * std::f64::consts::PI).ln();
    let const_term = 2.0 * tau.ln() + ln_2pi;
    ((x.sqr()? / (tau * tau))? + const_term)?
        .affine(-0.5, 0.0)?
        .sum_all()
}

/// Sum of log Beta(p; a, b) over all elements of a probability tensor
pub fn beta_log_prior(p: &Tensor, a: f64, b: f64) -> Result<Tensor> {
    let ln_beta = SpecialGamma::ln_gamma(a).0 + SpecialGamma::ln_gamma(b).0
        - SpecialGamma::ln_gamma(a + b).0;
    let p = p.clamp(PROB_EPS, 1.0 - PROB_EPS)?;
    let term_a = (p.log()? * (a - 1.0))?;
    let term_b = (p.affine(-1.0, 1.0)?.log()? * (b - 1.0))?;
    (term_a.add(&term_b)? - ln_beta)?.sum_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use candle_core::Device;

    #[test]
    fn log_sum_exp_matches_naive() -> Result<()> {
        let x = Tensor::new(&[[0.5f32, -1.0, 2.0], [100.0, 100.0, 50.0]], &Device::Cpu)?;
        let lse = log_sum_exp(&x, 1)?.to_vec1::<f32>()?;
        let naive0 = (0.5f32.exp() + (-1.0f32).exp() + 2.0f32.exp()).ln();
        assert_abs_diff_eq!(lse[0], naive0, epsilon = 1e-5);
        // the naive version would overflow here
        assert_abs_diff_eq!(lse[1], 100.0 + 2f32.ln(), epsilon = 1e-4);
        Ok(())
    }

    #[test]
    fn log_normalize_sums_to_one() -> Result<()> {
        let x = Tensor::randn(0f32, 3f32, (5, 16), &Device::Cpu)?;
        let p = log_normalize(&x, 1)?.exp()?.sum(1)?.to_vec1::<f32>()?;
        for v in p {
            assert_abs_diff_eq!(v, 1.0, epsilon = 1e-5);
        }
        Ok(())
    }

    #[test]
    fn log_sigmoid_is_stable() -> Result<()> {
        let x = Tensor::new(&[-200f32, -1.0, 0.0, 3.0, 200.0], &Device::Cpu)?;
        let v = log_sigmoid(&x)?.to_vec1::<f32>()?;
        assert_abs_diff_eq!(v[0], -200.0, epsilon = 1e-3);
        assert_abs_diff_eq!(v[2], 0.5f32.ln(), epsilon = 1e-6);
        assert_abs_diff_eq!(v[4], 0.0, epsilon = 1e-6);
        assert!(v.iter().all(|x| x.is_finite()));
        Ok(())
    }

    #[test]
    fn bernoulli_skips_missing_entries() -> Result<()> {
        let dev = Device::Cpu;
        let y = Tensor::new(&[[1f32, 0.0, 1.0]], &dev)?;
        let m = Tensor::new(&[[1f32, 1.0, 0.0]], &dev)?;
        let p = Tensor::new(&[[0.8f32, 0.3, 0.0]], &dev)?;
        let llik = bernoulli_likelihood(&y, &m, &p)?.to_vec1::<f32>()?;
        assert_abs_diff_eq!(llik[0], 0.8f32.ln() + 0.7f32.ln(), epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn bernoulli_clamps_degenerate_probabilities() -> Result<()> {
        let dev = Device::Cpu;
        let y = Tensor::new(&[[1f32, 0.0]], &dev)?;
        let m = Tensor::ones((1, 2), candle_core::DType::F32, &dev)?;
        let p = Tensor::new(&[[0f32, 1.0]], &dev)?;
        let llik = bernoulli_likelihood(&y, &m, &p)?.to_vec1::<f32>()?;
        assert!(llik[0].is_finite());
        Ok(())
    }

    #[test]
    fn profile_likelihood_matches_rowwise() -> Result<()> {
        let dev = Device::Cpu;
        let y = Tensor::new(&[[1f32, 0.0, 1.0], [0.0, 0.0, 1.0]], &dev)?;
        let m = Tensor::new(&[[1f32, 1.0, 1.0], [1.0, 0.0, 1.0]], &dev)?;
        let prob = Tensor::new(&[[0.2f32, 0.4, 0.9], [0.7, 0.1, 0.5]], &dev)?;
        let all = bernoulli_profile_likelihood(&y, &m, &prob)?.to_vec2::<f32>()?;
        for p in 0..2 {
            let prob_p = prob.narrow(0, p, 1)?.broadcast_as((2, 3))?.contiguous()?;
            let rowwise = bernoulli_likelihood(&y, &m, &prob_p)?.to_vec1::<f32>()?;
            for i in 0..2 {
                assert_abs_diff_eq!(all[i][p], rowwise[i], epsilon = 1e-5);
            }
        }
        Ok(())
    }

    #[test]
    fn categorical_kl_is_zero_for_identical() -> Result<()> {
        let x = Tensor::randn(0f32, 1f32, (3, 8), &Device::Cpu)?;
        let log_q = log_normalize(&x, 1)?;
        let kl = categorical_kl(&log_q, &log_q)?.to_vec1::<f32>()?;
        for v in kl {
            assert_abs_diff_eq!(v, 0.0, epsilon = 1e-6);
        }
        Ok(())
    }

    #[test]
    fn beta_prior_uniform_is_zero() -> Result<()> {
        let p = Tensor::new(&[0.1f32, 0.5, 0.9], &Device::Cpu)?;
        let lp = beta_log_prior(&p, 1.0, 1.0)?.to_scalar::<f32>()?;
        assert_abs_diff_eq!(lp, 0.0, epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn gaussian_prior_at_zero() -> Result<()> {
        let x = Tensor::zeros((2, 2), candle_core::DType::F32, &Device::Cpu)?;
        let lp = gaussian_log_prior(&x, 1.0)?.to_scalar::<f32>()?;
        let expected = -0.5 * (2.0 * std::f32::consts::PI).ln() * 4.0;
        assert_abs_diff_eq!(lp, expected, epsilon = 1e-4);
        Ok(())
    }
}
