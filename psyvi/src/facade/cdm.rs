use super::{map_patterns, mastery_probabilities, pattern_posterior, ModelOptions};
use crate::cdm::{ideal_responses, CdmItems, CdmLink};
use crate::compute::ComputeContext;
use crate::data::{QMatrix, ResponseMatrix};
use crate::error::{ConfigurationError, FitError, ModelError};
use crate::marginal::{categorical_elbo, SkillPatterns};
use crate::model_family::ModelFamily;
use crate::params::{GroundTruth, ParameterTable};
use crate::train::{FitOptions, FitReport, FitState, Objective, Session};
use crate::variational::{Amortized, Bbvi, Inference, LatentShape, PatternPosterior};
use log::info;
use ndarray::{Array2, ArrayView2};
use psyvi_util::candle_core::{self, Tensor};
use psyvi_util::candle_loss_functions::*;
use psyvi_util::candle_nn::{Init, VarBuilder, VarMap};
use rand::rngs::StdRng;
use std::marker::PhantomData;

const PATTERN_LOGIT_PRIOR_SD: f64 = 3.0;

/// Independent skills, fitted by black-box variational inference
pub type Vcdm = CdmModel<Bbvi, IndependentSkills>;

/// Independent skills, fitted with a recognition network
pub type VaeCdm = CdmModel<Amortized, IndependentSkills>;

/// Categorical distribution over patterns, black-box variational inference
pub type Vccdm = CdmModel<Bbvi, JointPatterns>;

/// Categorical distribution over patterns, recognition network
pub type VaeCcdm = CdmModel<Amortized, JointPatterns>;

/// How the prior and posterior over skill patterns are parameterized
pub trait SkillStructure: 'static {
    const NAME: &'static str;
    /// whether the logits index whole patterns
    const JOINT: bool;

    /// number of logits for `num_skills` skills
    fn logit_width(num_skills: usize) -> usize;

    /// Normalized log probability of every pattern (n x P)
    fn log_probs(patterns: &SkillPatterns, logits: &Tensor) -> candle_core::Result<Tensor>;
}

/// One mastery logit per skill; patterns are products of Bernoullis
#[derive(Debug, Clone, Copy)]
pub struct IndependentSkills;

/// One logit per pattern; any dependence between skills
#[derive(Debug, Clone, Copy)]
pub struct JointPatterns;

impl SkillStructure for IndependentSkills {
    const NAME: &'static str = "independent";
    const JOINT: bool = false;

    fn logit_width(num_skills: usize) -> usize {
        num_skills
    }

    fn log_probs(patterns: &SkillPatterns, logits: &Tensor) -> candle_core::Result<Tensor> {
        patterns.independent_log_probs(logits)
    }
}

impl SkillStructure for JointPatterns {
    const NAME: &'static str = "joint";
    const JOINT: bool = true;

    fn logit_width(num_skills: usize) -> usize {
        1 << num_skills
    }

    fn log_probs(_patterns: &SkillPatterns, logits: &Tensor) -> candle_core::Result<Tensor> {
        log_normalize(logits, 1)
    }
}

///
/// DINA or DINO model with the skill patterns integrated out exactly
///
pub struct CdmModel<I: Inference, S: SkillStructure> {
    objective: CdmObjective<I, S>,
    session: Session,
}

struct CdmObjective<I: Inference, S: SkillStructure> {
    data: ResponseMatrix,
    patterns: SkillPatterns,
    items: CdmItems,
    prior_logits_1w: Tensor,
    posterior: I::Pattern,
    ctx: ComputeContext,
    _structure: PhantomData<S>,
}

impl<I: Inference, S: SkillStructure> CdmObjective<I, S> {
    fn log_prior_1p(&self) -> candle_core::Result<Tensor> {
        S::log_probs(&self.patterns, &self.prior_logits_1w)
    }

    fn estimates(&self) -> candle_core::Result<ParameterTable> {
        let mut out = self.items.estimates()?;
        let prior_1p = self.log_prior_1p()?.exp()?;
        out.insert_tensor("skill_prevalence", &self.patterns.mastery(&prior_1p)?)?;
        if S::JOINT {
            out.insert_tensor("pattern_prior", &prior_1p)?;
        }
        Ok(out)
    }
}

impl<I: Inference, S: SkillStructure> Objective for CdmObjective<I, S> {
    fn loss(&self, rows: &Tensor, scale: f64, _rng: &mut StdRng) -> candle_core::Result<Tensor> {
        let (y_nj, m_nj) = self.data.rows(rows)?;
        let prob_pj = self.items.profile_probability()?;
        let llik_np = bernoulli_profile_likelihood(&y_nj, &m_nj, &prob_pj)?;

        let log_prior_1p = self.log_prior_1p()?;
        let logits = self.posterior.logits(&self.data, rows, true)?;
        let log_q_np = S::log_probs(&self.patterns, &logits)?;

        let elbo = categorical_elbo(&llik_np, &log_prior_1p, &log_q_np)?.sum_all()?;
        let log_prior = self
            .items
            .log_prior()?
            .add(&gaussian_log_prior(&self.prior_logits_1w, PATTERN_LOGIT_PRIOR_SD)?)?;

        let elbo = (elbo * scale)?.add(&log_prior)?;
        elbo.affine(-1. / self.data.nrows() as f64, 0.)
    }

    fn item_estimates(&self) -> candle_core::Result<ParameterTable> {
        self.estimates()
    }
}

impl<I: Inference, S: SkillStructure> CdmModel<I, S> {
    ///
    /// * `data` - respondents x items, entries in {0, 1, -1 (missing)}
    /// * `q` - skills x items requirement matrix
    /// * `model` - `dina` or `dino`
    ///
    pub fn new(
        data: ArrayView2<f32>,
        q: ArrayView2<f32>,
        model: &str,
        options: ModelOptions,
    ) -> Result<Self, ModelError> {
        let family: ModelFamily = model.parse()?;
        options.validate()?;
        let data = ResponseMatrix::from_array(data, &options.context)?;
        let q = QMatrix::from_array(q, data.ncols(), &options.context)?;
        Self::from_responses(data, q, family, options)
    }

    pub fn from_responses(
        data: ResponseMatrix,
        q: QMatrix,
        family: ModelFamily,
        options: ModelOptions,
    ) -> Result<Self, ModelError> {
        let link = match family {
            ModelFamily::Dina => CdmLink::And,
            ModelFamily::Dino => CdmLink::Or,
            _ => {
                return Err(ConfigurationError::InvalidOption(format!(
                    "{} is not a dina/dino model",
                    family
                ))
                .into());
            }
        };
        options.validate()?;

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
        let eta_pj = ideal_responses(&patterns, &q, link)?;

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, ctx.dtype, &ctx.device);

        let items = CdmItems::new(link, eta_pj, vb.pp("cdm"))?;

        let width = S::logit_width(num_skills);
        let prior_logits_1w = vb.get_with_hints((1, width), "skill.prior_logits", Init::Const(0.))?;

        let shape = LatentShape {
            num_rows: data.nrows(),
            num_items: data.ncols(),
            width,
            encoder_layers: &options.encoder_layers,
        };
        let posterior = I::Pattern::build(shape, vb.pp("skill.posterior"))?;

        info!(
            "{} model ({}, {} skills) on {} x {} responses, {} skills, {} patterns",
            family,
            I::NAME,
            S::NAME,
            data.nrows(),
            data.ncols(),
            num_skills,
            patterns.num_patterns()
        );

        let session = Session::new(
            varmap,
            data.nrows(),
            options.subsample_size,
            options.seed,
            ctx.device.clone(),
        );

        Ok(Self {
            objective: CdmObjective {
                data,
                patterns,
                items,
                prior_logits_1w,
                posterior,
                ctx,
                _structure: PhantomData,
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

    /// DINA (`And`) or DINO (`Or`)
    pub fn link(&self) -> CdmLink {
        self.objective.items.link()
    }

    pub fn num_skills(&self) -> usize {
        self.objective.patterns.num_skills()
    }

    /// slip, guess, skill_prevalence and, for joint patterns, pattern_prior
    pub fn item_estimates(&self) -> candle_core::Result<ParameterTable> {
        self.objective.estimates()
    }

    /// p(α | y_i) under the fitted items and prior (N x 2^K); rows sum to one
    pub fn posterior_weights(&self) -> candle_core::Result<Array2<f64>> {
        let obj = &self.objective;
        let prob_pj = obj.items.profile_probability()?;
        let log_prior_1p = obj.log_prior_1p()?;
        pattern_posterior(&obj.data, &prob_pj, &obj.ctx, |_| Ok(log_prior_1p.clone()))
    }

    /// Most probable mastery pattern of each respondent (N x K)
    pub fn map_patterns(&self) -> candle_core::Result<Array2<f32>> {
        Ok(map_patterns(&self.posterior_weights()?, self.num_skills()))
    }

    /// Posterior probability that each respondent masters each skill (N x K)
    pub fn mastery_probabilities(&self) -> candle_core::Result<Array2<f32>> {
        Ok(mastery_probabilities(
            &self.posterior_weights()?,
            self.num_skills(),
        ))
    }

    pub fn state(&self) -> &FitState {
        self.session.state()
    }

    pub fn data(&self) -> &ResponseMatrix {
        &self.objective.data
    }
}
