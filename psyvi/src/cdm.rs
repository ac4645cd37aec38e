use crate::data::QMatrix;
use crate::marginal::SkillPatterns;
use crate::params::ParameterTable;
use psyvi_util::candle_core::{Result, Tensor};
use psyvi_util::candle_loss_functions::*;
use psyvi_util::candle_nn::{ops, Init, VarBuilder};

const SLIP_GUESS_PRIOR: (f64, f64) = (2.0, 8.0);
const LOADING_PRIOR_SD: f64 = 0.5;
const SKILL_DIFFICULTY_PRIOR_SD: f64 = 2.0;

/// How required skills combine into the ideal response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CdmLink {
    /// DINA: every required skill must be mastered
    And,
    /// DINO: any one required skill suffices
    Or,
}

///
/// Ideal response η(p, j) of every skill pattern on every item
///
/// * `patterns` - enumerated skill patterns (P x K)
/// * `q` - Q-matrix (K x J)
///
/// Returns `P x J` of zeros and ones
pub fn ideal_responses(patterns: &SkillPatterns, q: &QMatrix, link: CdmLink) -> Result<Tensor> {
    let q_kj = q.tensor();
    let mastered_pj = patterns.patterns().matmul(q_kj)?;
    match link {
        CdmLink::And => {
            let required_1j = q_kj.sum_keepdim(0)?;
            mastered_pj
                .broadcast_ge(&required_1j)?
                .to_dtype(q_kj.dtype())
        }
        CdmLink::Or => mastered_pj.ge(1.0)?.to_dtype(q_kj.dtype()),
    }
}

///
/// Slip and guess parameters of DINA and DINO
///
/// p(y = 1 | α) = η (1 - s) + (1 - η) g
///
pub struct CdmItems {
    link: CdmLink,
    eta_pj: Tensor,
    logit_slip_1j: Tensor,
    logit_guess_1j: Tensor,
}

impl CdmItems {
    /// Will create `logit_slip` and `logit_guess`, both 1 x J,
    /// starting at 0.15
    pub fn new(link: CdmLink, eta_pj: Tensor, vb: VarBuilder) -> Result<Self> {
        let (_, j) = eta_pj.dims2()?;
        let init = Init::Const((0.15f64 / 0.85).ln());
        let logit_slip_1j = vb.get_with_hints((1, j), "logit_slip", init)?;
        let logit_guess_1j = vb.get_with_hints((1, j), "logit_guess", init)?;
        Ok(Self {
            link,
            eta_pj,
            logit_slip_1j,
            logit_guess_1j,
        })
    }

    pub fn link(&self) -> CdmLink {
        self.link
    }

    pub fn slip(&self) -> Result<Tensor> {
        ops::sigmoid(&self.logit_slip_1j)
    }

    pub fn guess(&self) -> Result<Tensor> {
        ops::sigmoid(&self.logit_guess_1j)
    }

    /// Success probability of each skill pattern on each item (P x J)
    pub fn profile_probability(&self) -> Result<Tensor> {
        let s = self.slip()?;
        let g = self.guess()?;
        let gap_1j = s.add(&g)?.affine(-1., 1.)?;
        self.eta_pj
            .broadcast_mul(&gap_1j)?
            .broadcast_add(&g)?
            .clamp(PROB_EPS, 1. - PROB_EPS)
    }

    pub fn log_prior(&self) -> Result<Tensor> {
        let (a, b) = SLIP_GUESS_PRIOR;
        beta_log_prior(&self.slip()?, a, b)?.add(&beta_log_prior(&self.guess()?, a, b)?)
    }

    pub fn estimates(&self) -> Result<ParameterTable> {
        let mut out = ParameterTable::new();
        out.insert_tensor("slip", &self.slip()?)?;
        out.insert_tensor("guess", &self.guess()?)?;
        Ok(out)
    }
}

///
/// Higher-order structure on skill mastery
///
/// P(α_k = 1 | θ) = σ(λ_k θ - δ_k)
///
pub struct HigherOrderSkills {
    log_loading_1k: Tensor,
    difficulty_1k: Tensor,
}

impl HigherOrderSkills {
    /// Will create `log_loading` and `difficulty`, both 1 x K
    pub fn new(num_skills: usize, vb: VarBuilder) -> Result<Self> {
        let log_loading_1k = vb.get_with_hints((1, num_skills), "log_loading", Init::Const(0.))?;
        let difficulty_1k = vb.get_with_hints((1, num_skills), "difficulty", Init::Const(0.))?;
        Ok(Self {
            log_loading_1k,
            difficulty_1k,
        })
    }

    pub fn loading(&self) -> Result<Tensor> {
        self.log_loading_1k.clamp(-4., 4.)?.exp()
    }

    /// Mastery logits given the higher-order ability
    ///
    /// * `theta_n1` - abilities (n x 1)
    ///
    /// Returns `n x K`
    pub fn skill_logits(&self, theta_n1: &Tensor) -> Result<Tensor> {
        theta_n1
            .broadcast_mul(&self.loading()?)?
            .broadcast_sub(&self.difficulty_1k)
    }

    pub fn log_prior(&self) -> Result<Tensor> {
        gaussian_log_prior(&self.log_loading_1k, LOADING_PRIOR_SD)?
            .add(&gaussian_log_prior(&self.difficulty_1k, SKILL_DIFFICULTY_PRIOR_SD)?)
    }

    pub fn estimates(&self) -> Result<ParameterTable> {
        let mut out = ParameterTable::new();
        out.insert_tensor("skill_loading", &self.loading()?)?;
        out.insert_tensor("skill_difficulty", &self.difficulty_1k)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::ComputeContext;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use psyvi_util::candle_core::{DType, Device};
    use psyvi_util::candle_nn::VarMap;

    fn two_skill_setup() -> anyhow::Result<(SkillPatterns, QMatrix)> {
        let ctx = ComputeContext::cpu();
        // item 0 needs skill 0, item 1 needs skill 1, item 2 needs both
        let q = array![[1f32, 0.0, 1.0], [0.0, 1.0, 1.0]];
        let q = QMatrix::from_array(q.view(), 3, &ctx)?;
        let patterns = SkillPatterns::enumerate(2, &ctx)?;
        Ok((patterns, q))
    }

    #[test]
    fn and_requires_all_skills() -> anyhow::Result<()> {
        let (patterns, q) = two_skill_setup()?;
        let eta = ideal_responses(&patterns, &q, CdmLink::And)?.to_vec2::<f32>()?;
        // patterns: 00, 10, 01, 11 (bit k of the index is skill k)
        assert_eq!(eta[0], vec![0.0, 0.0, 0.0]);
        assert_eq!(eta[1], vec![1.0, 0.0, 0.0]);
        assert_eq!(eta[2], vec![0.0, 1.0, 0.0]);
        assert_eq!(eta[3], vec![1.0, 1.0, 1.0]);
        Ok(())
    }

    #[test]
    fn or_requires_any_skill() -> anyhow::Result<()> {
        let (patterns, q) = two_skill_setup()?;
        let eta = ideal_responses(&patterns, &q, CdmLink::Or)?.to_vec2::<f32>()?;
        assert_eq!(eta[0], vec![0.0, 0.0, 0.0]);
        assert_eq!(eta[1], vec![1.0, 0.0, 1.0]);
        assert_eq!(eta[2], vec![0.0, 1.0, 1.0]);
        assert_eq!(eta[3], vec![1.0, 1.0, 1.0]);
        Ok(())
    }

    #[test]
    fn slip_and_guess_blend() -> anyhow::Result<()> {
        let (patterns, q) = two_skill_setup()?;
        let eta = ideal_responses(&patterns, &q, CdmLink::And)?;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let items = CdmItems::new(CdmLink::And, eta, vb.pp("cdm"))?;
        let p = items.profile_probability()?.to_vec2::<f32>()?;
        assert_abs_diff_eq!(p[0][2], 0.15, epsilon = 1e-5);
        assert_abs_diff_eq!(p[3][2], 0.85, epsilon = 1e-5);
        assert!(p.iter().flatten().all(|&x| x > 0.0 && x < 1.0));
        assert!(items.log_prior()?.to_scalar::<f32>()?.is_finite());
        Ok(())
    }

    #[test]
    fn higher_order_logits() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let ho = HigherOrderSkills::new(3, vb.pp("ho"))?;
        let theta = Tensor::new(&[[0f32], [2.0]], &Device::Cpu)?;
        let logits = ho.skill_logits(&theta)?.to_vec2::<f32>()?;
        assert_eq!(logits, vec![vec![0.0; 3], vec![2.0; 3]]);
        Ok(())
    }
}
