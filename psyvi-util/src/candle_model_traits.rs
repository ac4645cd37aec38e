use candle_core::{Result, Tensor};

use crate::candle_loss_functions::gaussian_kl_loss;

/// Diagonal Gaussian posterior parameters for a minibatch of rows
pub struct GaussianParams {
    /// mean (n x k)
    pub mean: Tensor,
    /// log variance (n x k)
    pub lnvar: Tensor,
}

impl GaussianParams {
    ///
    /// z = mu + sigma * eps
    /// where eps ~ N(0, 1) is supplied by the caller
    ///
    pub fn reparameterize(&self, eps: &Tensor) -> Result<Tensor> {
        let sigma = (&self.lnvar * 0.5)?.exp()?;
        self.mean.add(&sigma.mul(eps)?)
    }

    /// KL(q || N(0, I)) for each row (n)
    pub fn kl_to_standard_normal(&self) -> Result<Tensor> {
        gaussian_kl_loss(&self.mean, &self.lnvar)
    }

    pub fn std(&self) -> Result<Tensor> {
        (&self.lnvar * 0.5)?.exp()
    }
}

pub trait EncoderModuleT {
    type Latent;

    /// An encoder that maps observed rows to posterior parameters
    ///
    /// # Arguments
    /// * `x_nd` - input data (n x d)
    /// * `train` - whether we are in a training step
    fn forward_t(&self, x_nd: &Tensor, train: bool) -> Result<Self::Latent>;

    fn dim_obs(&self) -> usize;

    fn dim_latent(&self) -> usize;
}
