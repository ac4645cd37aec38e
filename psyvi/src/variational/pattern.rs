use super::{LatentShape, PatternPosterior};
use crate::data::ResponseMatrix;
use psyvi_util::candle_core::{Result, Tensor};
use psyvi_util::candle_encoder_logits::LogitEncoder;
use psyvi_util::candle_model_traits::EncoderModuleT;
use psyvi_util::candle_nn::{Init, VarBuilder};

/// Per-respondent logits (N x width), starting uniform
pub struct ExplicitPattern {
    logits_nw: Tensor,
}

impl PatternPosterior for ExplicitPattern {
    fn build(shape: LatentShape, vb: VarBuilder) -> Result<Self> {
        let logits_nw =
            vb.get_with_hints((shape.num_rows, shape.width), "logits", Init::Const(0.))?;
        Ok(Self { logits_nw })
    }

    fn logits(&self, _data: &ResponseMatrix, rows: &Tensor, _train: bool) -> Result<Tensor> {
        self.logits_nw.index_select(rows, 0)
    }
}

/// Responses `[y * mask, mask]` -> encoder -> logits
pub struct AmortizedPattern {
    encoder: LogitEncoder,
}

impl PatternPosterior for AmortizedPattern {
    fn build(shape: LatentShape, vb: VarBuilder) -> Result<Self> {
        let encoder = LogitEncoder::new(
            2 * shape.num_items,
            shape.width,
            shape.encoder_layers,
            vb,
        )?;
        Ok(Self { encoder })
    }

    fn logits(&self, data: &ResponseMatrix, rows: &Tensor, train: bool) -> Result<Tensor> {
        let x_nd = data.encoder_input(rows)?;
        self.encoder.forward_t(&x_nd, train)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::ComputeContext;
    use ndarray::array;
    use psyvi_util::candle_core::{DType, Device};
    use psyvi_util::candle_nn::VarMap;

    #[test]
    fn both_variants_share_the_shape() -> anyhow::Result<()> {
        let ctx = ComputeContext::cpu();
        let data = ResponseMatrix::from_array(array![[1f32, 0., 1.], [0., 1., -1.]].view(), &ctx)?;
        let shape = LatentShape {
            num_rows: 2,
            num_items: 3,
            width: 4,
            encoder_layers: &[6],
        };
        let rows = Tensor::new(&[1u32], &Device::Cpu)?;

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let explicit = ExplicitPattern::build(shape, vb.pp("skill"))?;
        assert_eq!(explicit.logits(&data, &rows, true)?.dims(), &[1, 4]);

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let amortized = AmortizedPattern::build(shape, vb.pp("skill"))?;
        assert_eq!(amortized.logits(&data, &rows, true)?.dims(), &[1, 4]);
        Ok(())
    }
}
