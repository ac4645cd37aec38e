use super::{ability_means, map_patterns, mastery_probabilities, pattern_posterior, ModelOptions};
use crate::cdm::{ideal_responses, CdmItems, CdmLink, HigherOrderSkills};
use crate::compute::ComputeContext;
use crate::data::{QMatrix, ResponseMatrix};
use crate::error::{ConfigurationError, FitError, ModelError};
use crate::marginal::{categorical_elbo, SkillPatterns};
use crate::params::{GroundTruth, ParameterTable};
use crate::train::{FitOptions, FitReport, FitState, Objective, Session};
use crate::variational::{
    Amortized, Bbvi, GaussianPosterior, Inference, LatentShape, PatternPosterior,
};
use log::info;
use ndarray::{Array2, ArrayView2};
use psyvi_util::candle_core::{self, Tensor};
use psyvi_util::candle_loss_functions::*;
use psyvi_util::candle_minibatch::standard_normal;
use psyvi_util::candle_nn::{VarBuilder, VarMap};
use rand::rngs::StdRng;

/// Higher-order DINA fitted by black-box variational inference
pub type VcHoDina = HoDinaModel<Bbvi>;

/// Higher-order DINA fitted with recognition networks
pub type VaeCHoDina = HoDinaModel<Amortized>;

///
/// DINA whose skills share a single continuous ability
///
/// θ_i ~ N(0, 1), α_ik ~ Bernoulli(σ(λ_k θ_i - δ_k)), DINA responses
///
/// The posterior factorizes into a Gaussian over θ and a categorical
/// over the 2^K patterns.
///
pub struct HoDinaModel<I: Inference> {
    objective: HoDinaObjective<I>,
    session: Session,
}

struct HoDinaObjective<I: Inference> {
    data: ResponseMatrix,
    patterns: SkillPatterns,
    items: CdmItems,
    higher: HigherOrderSkills,
    ability: I::Ability,
    posterior: I::Pattern,
    num_samples: usize,
    ctx: ComputeContext,
}

impl<I: Inference> HoDinaObjective<I> {
    fn estimates(&self) -> candle_core::Result<ParameterTable> {
        let mut out = self.items.estimates()?;
        for (name, value) in self.higher.estimates()?.iter() {
            out.insert(name, value.clone());
        }
        Ok(out)
    }
}

impl<I: Inference> Objective for HoDinaObjective<I> {
    fn loss(&self, rows: &Tensor, scale: f64, rng: &mut StdRng) -> candle_core::Result<Tensor> {
        let ctx = &self.ctx;
        let (y_nj, m_nj) = self.data.rows(rows)?;
        let prob_pj = self.items.profile_probability()?;
        let llik_np = bernoulli_profile_likelihood(&y_nj, &m_nj, &prob_pj)?;

        let q_theta = self.ability.posterior(&self.data, rows, true)?;
        let logits = self.posterior.logits(&self.data, rows, true)?;
        let log_q_np = log_normalize(&logits, 1)?;

        let mut elbo = Tensor::zeros((), ctx.dtype, &ctx.device)?;
        for _ in 0..self.num_samples {
            let eps = standard_normal(rng, q_theta.mean.dims2()?, ctx.dtype, &ctx.device)?;
            let theta_n1 = q_theta.reparameterize(&eps)?;
            let log_prior_np = self
                .patterns
                .independent_log_probs(&self.higher.skill_logits(&theta_n1)?)?;
            elbo = elbo.add(&categorical_elbo(&llik_np, &log_prior_np, &log_q_np)?.sum_all()?)?;
        }
        let elbo = (elbo / self.num_samples as f64)?;
        let kl = q_theta.kl_to_standard_normal()?.sum_all()?;

        let log_prior = self.items.log_prior()?.add(&self.higher.log_prior()?)?;
        let elbo = ((elbo - kl)? * scale)?.add(&log_prior)?;
        elbo.affine(-1. / self.data.nrows() as f64, 0.)
    }

    fn item_estimates(&self) -> candle_core::Result<ParameterTable> {
        self.estimates()
    }
}

impl<I: Inference> HoDinaModel<I> {
    ///
    /// * `data` - respondents x items, entries in {0, 1, -1 (missing)}
    /// * `q` - skills x items requirement matrix
    ///
    pub fn new(
        data: ArrayView2<f32>,
        q: ArrayView2<f32>,
        options: ModelOptions,
    ) -> Result<Self, ModelError> {
        options.validate()?;
        let data = ResponseMatrix::from_array(data, &options.context)?;
        let q = QMatrix::from_array(q, data.ncols(), &options.context)?;
        Self::from_responses(data, q, options)
    }

    pub fn from_responses(
        data: ResponseMatrix,
        q: QMatrix,
        options: ModelOptions,
    ) -> Result<Self, ModelError> {
        options.validate()?;
        if options.x_feature != 1 {
            return Err(ConfigurationError::InvalidOption(
                "higher-order DINA has a single higher-order ability".into(),
            )
            .into());
        }
        if q.num_items() != data.ncols() {
            return Err(ConfigurationError::QMatrixItems {
                q_items: q.num_items(),
                data_items: data.ncols(),
            }
            .into());
        }

        let ctx = options.context.clone();
        let num_skills = q.num_skills();
        let patterns = SkillPatterns::enumerate(num_skills, &ctx)?;
        let eta_pj = ideal_responses(&patterns, &q, CdmLink::And)?;

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, ctx.dtype, &ctx.device);

        let items = CdmItems::new(CdmLink::And, eta_pj, vb.pp("cdm"))?;
        let higher = HigherOrderSkills::new(num_skills, vb.pp("skill.higher"))?;

        let ability = I::Ability::build(
            LatentShape {
                num_rows: data.nrows(),
                num_items: data.ncols(),
                width: 1,
                encoder_layers: &options.encoder_layers,
            },
            vb.pp("ability"),
        )?;

        let posterior = I::Pattern::build(
            LatentShape {
                num_rows: data.nrows(),
                num_items: data.ncols(),
                width: patterns.num_patterns(),
                encoder_layers: &options.encoder_layers,
            },
            vb.pp("skill.posterior"),
        )?;

        info!(
            "higher-order dina ({}) on {} x {} responses, {} skills",
            I::NAME,
            data.nrows(),
            data.ncols(),
            num_skills
        );

        let session = Session::new(
            varmap,
            data.nrows(),
            options.subsample_size,
            options.seed,
            ctx.device.clone(),
        );

        Ok(Self {
            objective: HoDinaObjective {
                data,
                patterns,
                items,
                higher,
                ability,
                posterior,
                num_samples: options.num_samples,
                ctx,
            },
            session,
        })
    }

    pub fn fit(
        &mut self,
        options: &FitOptions,
        truth: Option<&dyn GroundTruth>,
    ) -> Result<FitReport, FitError> {
        self.session.run(&self.objective, options, truth)
    }

    pub fn num_skills(&self) -> usize {
        self.objective.patterns.num_skills()
    }

    /// slip, guess, skill_loading and skill_difficulty
    pub fn item_estimates(&self) -> candle_core::Result<ParameterTable> {
        self.objective.estimates()
    }

    /// Posterior mean higher-order ability (N x 1)
    pub fn ability_estimates(&self) -> candle_core::Result<Array2<f32>> {
        ability_means(&self.objective.ability, &self.objective.data, &self.objective.ctx)
    }

    ///
    /// p(α | y_i) under the fitted items, with the pattern prior taken
    /// at each respondent's posterior mean ability (N x 2^K)
    ///
    pub fn posterior_weights(&self) -> candle_core::Result<Array2<f64>> {
        let obj = &self.objective;
        let prob_pj = obj.items.profile_probability()?;
        pattern_posterior(&obj.data, &prob_pj, &obj.ctx, |rows| {
            let theta_n1 = obj.ability.posterior(&obj.data, rows, false)?.mean;
            obj.patterns
                .independent_log_probs(&obj.higher.skill_logits(&theta_n1)?)
        })
    }

    pub fn map_patterns(&self) -> candle_core::Result<Array2<f32>> {
        Ok(map_patterns(&self.posterior_weights()?, self.num_skills()))
    }

    pub fn mastery_probabilities(&self) -> candle_core::Result<Array2<f32>> {
        Ok(mastery_probabilities(
            &self.posterior_weights()?,
            self.num_skills(),
        ))
    }

    pub fn state(&self) -> &FitState {
        self.session.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn both_strategies_train() -> anyhow::Result<()> {
        let y = array![
            [1f32, 1., 1., 1.],
            [1., 0., 0., 1.],
            [0., 1., 0., 0.],
            [0., 0., 0., 0.],
            [1., 1., -1., 1.],
        ];
        let q = array![[1f32, 0., 1., 1.], [0., 1., 1., 0.]];
        let fit = FitOptions::new(30).with_learning_rate(0.05);

        let mut m = VcHoDina::new(y.view(), q.view(), ModelOptions::default())?;
        let report = m.fit(&fit, None)?;
        assert!(report.final_loss.is_finite());
        let names: Vec<_> = report.estimates.names().map(|s| s.to_string()).collect();
        assert_eq!(
            names,
            vec!["guess", "skill_difficulty", "skill_loading", "slip"]
        );
        for row in m.posterior_weights()?.outer_iter() {
            assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-6);
        }
        assert_eq!(m.ability_estimates()?.dim(), (5, 1));

        let options = ModelOptions {
            encoder_layers: vec![8],
            ..Default::default()
        };
        let mut v = VaeCHoDina::new(y.view(), q.view(), options)?;
        v.fit(&fit, None)?;
        assert_eq!(v.mastery_probabilities()?.dim(), (5, 2));
        Ok(())
    }
}
