use crate::candle_aux_layers::*;
use crate::candle_model_traits::*;
use candle_core::{Result, Tensor};
use candle_nn::{Linear, ModuleT, VarBuilder};

/// Recognition network for continuous latent states:
/// `x -> fc -> (mean, log variance)`
pub struct GaussianEncoder {
    n_features: usize,
    n_latent: usize,
    fc: StackLayers<Linear>,
    z_mean: Linear,
    z_lnvar: Linear,
}

impl EncoderModuleT for GaussianEncoder {
    type Latent = GaussianParams;

    fn forward_t(&self, x_nd: &Tensor, train: bool) -> Result<GaussianParams> {
        self.latent_gaussian_params(x_nd, train)
    }

    fn dim_obs(&self) -> usize {
        self.n_features
    }

    fn dim_latent(&self) -> usize {
        self.n_latent
    }
}

impl GaussianEncoder {
    ///
    /// Evaluate latent Gaussian parameters: mu and log_var
    /// z ~ (mu(x), log_var(x))
    pub fn latent_gaussian_params(&self, x_nd: &Tensor, train: bool) -> Result<GaussianParams> {
        let max_mean = 8.; // stabilize
        let min_lv = -8.; // and log variance
        let max_lv = 4.; //

        debug_assert_eq!(x_nd.dims().len(), 2);

        let fc_nl = self.fc.forward_t(x_nd, train)?;
        let mean = self
            .z_mean
            .forward_t(&fc_nl, train)?
            .clamp(-max_mean, max_mean)?;
        let lnvar = self
            .z_lnvar
            .forward_t(&fc_nl, train)?
            .clamp(min_lv, max_lv)?;
        Ok(GaussianParams { mean, lnvar })
    }

    /// Will create a new Gaussian encoder module
    /// with these variables:
    ///
    /// * `enc.fc.{}.weight` where {} is the layer index
    /// * `enc.z.mean.weight`
    /// * `enc.z.lnvar.weight`
    ///
    /// # Arguments
    /// * `n_features` - input dimension
    /// * `n_latent` - latent dimension
    /// * `layers` - fully connected layers, each with the dim
    /// * `vs` - variable builder
    pub fn new(
        n_features: usize,
        n_latent: usize,
        layers: &[usize],
        vs: VarBuilder,
    ) -> Result<Self> {
        let (fc, prev_dim) = fully_connected_stack(n_features, layers, "enc.fc", vs.clone())?;

        let z_mean = candle_nn::linear(prev_dim, n_latent, vs.pp("enc.z.mean"))?;
        let z_lnvar = candle_nn::linear(prev_dim, n_latent, vs.pp("enc.z.lnvar"))?;

        Ok(Self {
            n_features,
            n_latent,
            fc,
            z_mean,
            z_lnvar,
        })
    }
}
