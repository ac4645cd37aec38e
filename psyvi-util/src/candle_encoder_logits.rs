use crate::candle_aux_layers::*;
use crate::candle_model_traits::*;
use candle_core::{Result, Tensor};
use candle_nn::{Linear, ModuleT, VarBuilder};

/// Recognition network for discrete latent states: `x -> fc -> logits`
///
/// The logits are unnormalized; callers decide whether they index
/// independent binary states or the categories of a single variable.
pub struct LogitEncoder {
    n_features: usize,
    n_logits: usize,
    fc: StackLayers<Linear>,
    logits: Linear,
}

impl EncoderModuleT for LogitEncoder {
    type Latent = Tensor;

    fn forward_t(&self, x_nd: &Tensor, train: bool) -> Result<Tensor> {
        let max_logit = 20.;
        let fc_nl = self.fc.forward_t(x_nd, train)?;
        self.logits
            .forward_t(&fc_nl, train)?
            .clamp(-max_logit, max_logit)
    }

    fn dim_obs(&self) -> usize {
        self.n_features
    }

    fn dim_latent(&self) -> usize {
        self.n_logits
    }
}

impl LogitEncoder {
    /// Will create a new logit encoder module with these variables:
    ///
    /// * `enc.fc.{}.weight` where {} is the layer index
    /// * `enc.logits.weight`
    pub fn new(
        n_features: usize,
        n_logits: usize,
        layers: &[usize],
        vs: VarBuilder,
    ) -> Result<Self> {
        let (fc, prev_dim) = fully_connected_stack(n_features, layers, "enc.fc", vs.clone())?;
        let logits = candle_nn::linear(prev_dim, n_logits, vs.pp("enc.logits"))?;
        Ok(Self {
            n_features,
            n_logits,
            fc,
            logits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn logit_encoder_shapes() -> Result<()> {
        let varmap = VarMap::new();
        let vs = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let enc = LogitEncoder::new(6, 8, &[4], vs)?;
        let x = Tensor::rand(0f32, 1f32, (3, 6), &Device::Cpu)?;
        assert_eq!(enc.forward_t(&x, false)?.dims(), &[3, 8]);
        assert_eq!(enc.dim_latent(), 8);
        Ok(())
    }
}
