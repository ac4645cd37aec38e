use super::{GaussianPosterior, LatentShape};
use crate::data::ResponseMatrix;
use psyvi_util::candle_core::{Result, Tensor};
use psyvi_util::candle_encoder_gaussian::GaussianEncoder;
use psyvi_util::candle_model_traits::{EncoderModuleT, GaussianParams};
use psyvi_util::candle_nn::{Init, VarBuilder};

///
/// One N(mean, std²) per respondent and dimension, stored as `mean`
/// and `ln_std` (N x D). Rows outside a minibatch receive no gradient.
///
pub struct ExplicitGaussian {
    mean_nd: Tensor,
    ln_std_nd: Tensor,
}

impl GaussianPosterior for ExplicitGaussian {
    fn build(shape: LatentShape, vb: VarBuilder) -> Result<Self> {
        let dims = (shape.num_rows, shape.width);
        let mean_nd = vb.get_with_hints(dims, "mean", Init::Const(0.))?;
        let ln_std_nd = vb.get_with_hints(dims, "ln_std", Init::Const(-1.))?;
        Ok(Self { mean_nd, ln_std_nd })
    }

    fn posterior(
        &self,
        _data: &ResponseMatrix,
        rows: &Tensor,
        _train: bool,
    ) -> Result<GaussianParams> {
        let mean = self.mean_nd.index_select(rows, 0)?;
        let lnvar = self
            .ln_std_nd
            .index_select(rows, 0)?
            .clamp(-6., 3.)?
            .affine(2., 0.)?;
        Ok(GaussianParams { mean, lnvar })
    }
}

/// Responses `[y * mask, mask]` -> encoder -> (mean, log variance)
pub struct AmortizedGaussian {
    encoder: GaussianEncoder,
}

impl GaussianPosterior for AmortizedGaussian {
    fn build(shape: LatentShape, vb: VarBuilder) -> Result<Self> {
        let encoder = GaussianEncoder::new(
            2 * shape.num_items,
            shape.width,
            shape.encoder_layers,
            vb,
        )?;
        Ok(Self { encoder })
    }

    fn posterior(
        &self,
        data: &ResponseMatrix,
        rows: &Tensor,
        train: bool,
    ) -> Result<GaussianParams> {
        let x_nd = data.encoder_input(rows)?;
        self.encoder.forward_t(&x_nd, train)
    }
}
