use super::{ability_means, ModelOptions};
use crate::compute::ComputeContext;
use crate::data::{Mask, ResponseMatrix};
use crate::error::{ConfigurationError, FitError, ModelError};
use crate::irt::IrtItems;
use crate::model_family::ModelFamily;
use crate::params::{GroundTruth, ParameterTable};
use crate::train::{FitOptions, FitReport, FitState, Objective, Session};
use crate::variational::{Amortized, Bbvi, GaussianPosterior, Inference, LatentShape};
use log::info;
use ndarray::{Array2, ArrayView2};
use psyvi_util::candle_core::{self, Tensor};
use psyvi_util::candle_loss_functions::bernoulli_likelihood;
use psyvi_util::candle_minibatch::standard_normal;
use psyvi_util::candle_nn::{VarBuilder, VarMap};
use rand::rngs::StdRng;

/// Item response model fitted by black-box variational inference
pub type Virt = IrtModel<Bbvi>;

/// Item response model fitted with a recognition network
pub type VaeIrt = IrtModel<Amortized>;

///
/// 1PL to 4PL item response model with Gaussian abilities
///
/// θ_i ~ N(0, I), y_ij ~ Bernoulli(p_j(θ_i))
///
pub struct IrtModel<I: Inference> {
    objective: IrtObjective<I>,
    session: Session,
}

struct IrtObjective<I: Inference> {
    data: ResponseMatrix,
    items: IrtItems,
    ability: I::Ability,
    num_samples: usize,
    ctx: ComputeContext,
}

impl<I: Inference> Objective for IrtObjective<I> {
    fn loss(&self, rows: &Tensor, scale: f64, rng: &mut StdRng) -> candle_core::Result<Tensor> {
        let ctx = &self.ctx;
        let (y_nj, m_nj) = self.data.rows(rows)?;
        let q = self.ability.posterior(&self.data, rows, true)?;

        let mut llik = Tensor::zeros((), ctx.dtype, &ctx.device)?;
        for _ in 0..self.num_samples {
            let eps = standard_normal(rng, q.mean.dims2()?, ctx.dtype, &ctx.device)?;
            let theta_nd = q.reparameterize(&eps)?;
            let prob_nj = self.items.probability(&theta_nd)?;
            llik = llik.add(&bernoulli_likelihood(&y_nj, &m_nj, &prob_nj)?.sum_all()?)?;
        }
        let llik = (llik / self.num_samples as f64)?;
        let kl = q.kl_to_standard_normal()?.sum_all()?;

        let elbo = ((llik - kl)? * scale)?.add(&self.items.log_prior()?)?;
        elbo.affine(-1. / self.data.nrows() as f64, 0.)
    }

    fn item_estimates(&self) -> candle_core::Result<ParameterTable> {
        self.items.estimates()
    }
}

impl<I: Inference> IrtModel<I> {
    ///
    /// * `data` - respondents x items, entries in {0, 1, -1 (missing)}
    /// * `model` - one of `irt_1pl`, `irt_2pl`, `irt_3pl`, `irt_4pl`
    /// * `options` - dimensionality, mask, subsampling, device
    ///
    pub fn new(
        data: ArrayView2<f32>,
        model: &str,
        options: ModelOptions,
    ) -> Result<Self, ModelError> {
        let family: ModelFamily = model.parse()?;
        options.validate()?;
        let data = ResponseMatrix::from_array(data, &options.context)?;
        Self::from_responses(data, family, options)
    }

    pub fn from_responses(
        data: ResponseMatrix,
        family: ModelFamily,
        options: ModelOptions,
    ) -> Result<Self, ModelError> {
        if !family.is_irt() {
            return Err(ConfigurationError::InvalidOption(format!(
                "{} is not an item response model",
                family
            ))
            .into());
        }
        options.validate()?;

        let ctx = options.context.clone();
        let num_dims = options.x_feature;
        let num_items = data.ncols();

        let mask = match &options.mask {
            Some(m) => Mask::new(m.view(), num_dims, num_items)?,
            None => Mask::full(num_dims, num_items),
        };

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, ctx.dtype, &ctx.device);

        let items = IrtItems::new(family, mask.to_tensor(&ctx)?, vb.pp("irt"))?;

        let shape = LatentShape {
            num_rows: data.nrows(),
            num_items,
            width: num_dims,
            encoder_layers: &options.encoder_layers,
        };
        let ability = I::Ability::build(shape, vb.pp("ability"))?;

        info!(
            "{} model ({}) on {} x {} responses, {} missing, {} latent dimension(s)",
            family,
            I::NAME,
            data.nrows(),
            num_items,
            data.num_missing(),
            num_dims
        );

        let session = Session::new(
            varmap,
            data.nrows(),
            options.subsample_size,
            options.seed,
            ctx.device.clone(),
        );

        Ok(Self {
            objective: IrtObjective {
                data,
                items,
                ability,
                num_samples: options.num_samples,
                ctx,
            },
            session,
        })
    }

    ///
    /// Run the optimization loop; `truth` enables error reports
    /// against known parameters while fitting
    ///
    pub fn fit(
        &mut self,
        options: &FitOptions,
        truth: Option<&dyn GroundTruth>,
    ) -> Result<FitReport, FitError> {
        self.session.run(&self.objective, options, truth)
    }

    pub fn family(&self) -> ModelFamily {
        self.objective.items.family()
    }

    pub fn item_estimates(&self) -> candle_core::Result<ParameterTable> {
        self.objective.items.estimates()
    }

    /// Posterior mean abilities (N x D)
    pub fn ability_estimates(&self) -> candle_core::Result<Array2<f32>> {
        ability_means(&self.objective.ability, &self.objective.data, &self.objective.ctx)
    }

    pub fn state(&self) -> &FitState {
        self.session.state()
    }

    pub fn data(&self) -> &ResponseMatrix {
        &self.objective.data
    }
}
