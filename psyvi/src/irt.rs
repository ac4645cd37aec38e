use crate::model_family::ModelFamily;
use crate::params::ParameterTable;
use psyvi_util::candle_core::{Result, Tensor};
use psyvi_util::candle_loss_functions::*;
use psyvi_util::candle_nn::{ops, Init, VarBuilder};

/// log-discrimination is kept within `[-4, 4]`
const MAX_LOG_DISCRIMINATION: f64 = 4.0;

const LOG_DISCRIMINATION_PRIOR_SD: f64 = 0.5;
const DIFFICULTY_PRIOR_SD: f64 = 2.0;
const GUESSING_PRIOR: (f64, f64) = (2.0, 8.0);
const UPPER_PRIOR: (f64, f64) = (8.0, 2.0);

///
/// Item parameters of the 1PL to 4PL logistic models
///
/// p(y = 1 | θ) = c + (d - c) σ(θ a - b)
///
/// * `a` - discrimination (D x J), `exp(log a)` restricted by the mask
/// * `b` - difficulty (1 x J)
/// * `c` - guessing floor (1 x J), 3PL and 4PL
/// * `d` - slipping ceiling (1 x J), 4PL only, kept above `c`
///
pub struct IrtItems {
    family: ModelFamily,
    mask_dj: Tensor,
    log_a_dj: Option<Tensor>,
    b_1j: Tensor,
    logit_c_1j: Option<Tensor>,
    logit_d_1j: Option<Tensor>,
}

impl IrtItems {
    /// Will create these variables:
    ///
    /// * `log_discrimination` (2PL and up)
    /// * `difficulty`
    /// * `logit_guessing` (3PL and up)
    /// * `logit_upper` (4PL)
    ///
    /// # Arguments
    /// * `family` - one of the IRT families
    /// * `mask_dj` - dimension by item loading mask
    /// * `vb` - variable builder
    pub fn new(family: ModelFamily, mask_dj: Tensor, vb: VarBuilder) -> Result<Self> {
        debug_assert!(family.is_irt());
        let (d, j) = mask_dj.dims2()?;

        let log_a_dj = if family.has_discrimination() {
            let init = Init::Randn {
                mean: 0.,
                stdev: 0.1,
            };
            Some(vb.get_with_hints((d, j), "log_discrimination", init)?)
        } else {
            None
        };

        let b_1j = vb.get_with_hints((1, j), "difficulty", Init::Const(0.))?;

        let logit_c_1j = if family.has_guessing() {
            let init = Init::Const((0.2f64 / 0.8).ln());
            Some(vb.get_with_hints((1, j), "logit_guessing", init)?)
        } else {
            None
        };

        let logit_d_1j = if family.has_slipping() {
            Some(vb.get_with_hints((1, j), "logit_upper", Init::Const(2.))?)
        } else {
            None
        };

        Ok(Self {
            family,
            mask_dj,
            log_a_dj,
            b_1j,
            logit_c_1j,
            logit_d_1j,
        })
    }

    pub fn family(&self) -> ModelFamily {
        self.family
    }

    pub fn num_dims(&self) -> usize {
        self.mask_dj.dims()[0]
    }

    pub fn num_items(&self) -> usize {
        self.mask_dj.dims()[1]
    }

    /// D x J; the mask itself for 1PL
    pub fn discrimination(&self) -> Result<Tensor> {
        match &self.log_a_dj {
            Some(log_a) => log_a
                .clamp(-MAX_LOG_DISCRIMINATION, MAX_LOG_DISCRIMINATION)?
                .exp()?
                .mul(&self.mask_dj),
            None => Ok(self.mask_dj.clone()),
        }
    }

    pub fn difficulty(&self) -> &Tensor {
        &self.b_1j
    }

    pub fn guessing(&self) -> Result<Option<Tensor>> {
        self.logit_c_1j.as_ref().map(ops::sigmoid).transpose()
    }

    /// d = c + (1 - c) σ(δ)
    pub fn upper(&self) -> Result<Option<Tensor>> {
        match (&self.logit_d_1j, self.guessing()?) {
            (Some(logit_d), Some(c)) => {
                let gap = ops::sigmoid(logit_d)?.mul(&c.affine(-1., 1.)?)?;
                Ok(Some(c.add(&gap)?))
            }
            _ => Ok(None),
        }
    }

    ///
    /// Success probability of every respondent on every item, clamped
    /// into `[PROB_EPS, 1 - PROB_EPS]`
    ///
    /// * `theta_nd` - abilities (n x D)
    ///
    /// Returns `n x J`
    pub fn probability(&self, theta_nd: &Tensor) -> Result<Tensor> {
        let a_dj = self.discrimination()?;
        let logits_nj = theta_nd.matmul(&a_dj)?.broadcast_sub(&self.b_1j)?;
        let p_nj = ops::sigmoid(&logits_nj)?;

        let p_nj = match (self.guessing()?, self.upper()?) {
            (Some(c), Some(d)) => p_nj.broadcast_mul(&d.sub(&c)?)?.broadcast_add(&c)?,
            (Some(c), None) => p_nj.broadcast_mul(&c.affine(-1., 1.)?)?.broadcast_add(&c)?,
            _ => p_nj,
        };

        p_nj.clamp(PROB_EPS, 1. - PROB_EPS)
    }

    /// Log prior density of all item parameters (scalar)
    pub fn log_prior(&self) -> Result<Tensor> {
        let mut lp = gaussian_log_prior(&self.b_1j, DIFFICULTY_PRIOR_SD)?;
        if let Some(log_a) = &self.log_a_dj {
            lp = lp.add(&gaussian_log_prior(log_a, LOG_DISCRIMINATION_PRIOR_SD)?)?;
        }
        if let Some(c) = self.guessing()? {
            let (a, b) = GUESSING_PRIOR;
            lp = lp.add(&beta_log_prior(&c, a, b)?)?;
        }
        if let Some(d) = self.upper()? {
            let (a, b) = UPPER_PRIOR;
            lp = lp.add(&beta_log_prior(&d, a, b)?)?;
        }
        Ok(lp)
    }

    pub fn estimates(&self) -> Result<ParameterTable> {
        let mut out = ParameterTable::new();
        out.insert_tensor("difficulty", &self.b_1j)?;
        if self.log_a_dj.is_some() {
            out.insert_tensor("discrimination", &self.discrimination()?)?;
        }
        if let Some(c) = self.guessing()? {
            out.insert_tensor("guessing", &c)?;
        }
        if let Some(d) = self.upper()? {
            out.insert_tensor("slipping", &d)?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use psyvi_util::candle_core::{DType, Device};
    use psyvi_util::candle_nn::VarMap;

    fn items(family: ModelFamily, d: usize, j: usize) -> Result<(VarMap, IrtItems)> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let mask = Tensor::ones((d, j), DType::F32, &Device::Cpu)?;
        let items = IrtItems::new(family, mask, vb.pp("irt"))?;
        Ok((varmap, items))
    }

    #[test]
    fn one_pl_is_a_logistic_of_the_gap() -> Result<()> {
        let (mut varmap, items) = items(ModelFamily::Irt1PL, 1, 3)?;
        varmap.set_one(
            "irt.difficulty",
            Tensor::new(&[[-1f32, 0.0, 1.0]], &Device::Cpu)?,
        )?;
        let theta = Tensor::new(&[[0f32], [1.0]], &Device::Cpu)?;
        let p = items.probability(&theta)?.to_vec2::<f32>()?;
        let sig = |x: f32| 1. / (1. + (-x).exp());
        assert_abs_diff_eq!(p[0][0], sig(1.0), epsilon = 1e-6);
        assert_abs_diff_eq!(p[0][1], 0.5, epsilon = 1e-6);
        assert_abs_diff_eq!(p[1][2], 0.5, epsilon = 1e-6);
        assert_eq!(varmap.all_vars().len(), 1);
        Ok(())
    }

    #[test]
    fn asymptotes_bound_the_curve() -> Result<()> {
        let (_varmap, items) = items(ModelFamily::Irt4PL, 1, 4)?;
        let theta = Tensor::new(&[[-50f32], [50.0]], &Device::Cpu)?;
        let p = items.probability(&theta)?.to_vec2::<f32>()?;
        let c = items.guessing()?.unwrap().to_vec2::<f32>()?;
        let d = items.upper()?.unwrap().to_vec2::<f32>()?;
        for j in 0..4 {
            assert_abs_diff_eq!(p[0][j], c[0][j], epsilon = 1e-4);
            assert_abs_diff_eq!(p[1][j], d[0][j], epsilon = 1e-4);
            assert!(c[0][j] < d[0][j]);
        }
        Ok(())
    }

    #[test]
    fn probabilities_stay_inside_the_unit_interval() -> Result<()> {
        for family in [
            ModelFamily::Irt1PL,
            ModelFamily::Irt2PL,
            ModelFamily::Irt3PL,
            ModelFamily::Irt4PL,
        ] {
            let (_varmap, items) = items(family, 2, 5)?;
            let theta = Tensor::new(&[[-1e6f32, 3.0], [0.0, 0.0], [1e6, 1e6]], &Device::Cpu)?;
            let p = items.probability(&theta)?.flatten_all()?.to_vec1::<f32>()?;
            assert!(p.iter().all(|&x| x > 0.0 && x < 1.0), "{:?}", family);
            assert!(items.log_prior()?.to_scalar::<f32>()?.is_finite());
        }
        Ok(())
    }

    #[test]
    fn estimates_follow_the_family() -> Result<()> {
        let (_v, two) = items(ModelFamily::Irt2PL, 1, 3)?;
        let names: Vec<_> = two.estimates()?.names().map(|s| s.to_string()).collect();
        assert_eq!(names, vec!["difficulty", "discrimination"]);

        let (_v, four) = items(ModelFamily::Irt4PL, 1, 3)?;
        let table = four.estimates()?;
        assert_eq!(table.len(), 4);
        assert_eq!(table.get("slipping").map(|x| x.dim()), Some((1, 3)));
        Ok(())
    }
}
