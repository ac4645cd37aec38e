use psyvi_util::candle_core::{DType, Device, Result, Tensor};
use psyvi_util::candle_encoder_gaussian::GaussianEncoder;
use psyvi_util::candle_encoder_logits::LogitEncoder;
use psyvi_util::candle_lazy_adam::LazyAdam;
use psyvi_util::candle_loss_functions::bernoulli_likelihood;
use psyvi_util::candle_model_traits::EncoderModuleT;
use psyvi_util::candle_nn::{ops, Optimizer, VarBuilder, VarMap};

fn features(dev: &Device) -> Result<(Tensor, Tensor)> {
    // label is 1 whenever the first feature is positive
    let x: Vec<f32> = (0..64).map(|i| ((i * 37) % 17) as f32 / 8. - 1.).collect();
    let x = Tensor::from_vec(x, (32, 2), dev)?;
    let y = x.narrow(1, 0, 1)?.gt(0f32)?.to_dtype(DType::F32)?;
    Ok((x, y))
}

#[test]
fn logit_encoder_learns_a_threshold() -> Result<()> {
    let dev = Device::Cpu;
    let (x, y) = features(&dev)?;
    let mask = y.ones_like()?;

    let varmap = VarMap::new();
    let vs = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
    let enc = LogitEncoder::new(2, 1, &[8], vs)?;
    let mut adam = LazyAdam::new_lr(varmap.all_vars(), 0.05)?;

    let nll = |enc: &LogitEncoder| -> Result<Tensor> {
        let prob = ops::sigmoid(&enc.forward_t(&x, true)?)?;
        bernoulli_likelihood(&y, &mask, &prob)?.sum_all()?.neg()
    };

    let before = nll(&enc)?.to_scalar::<f32>()?;
    for _ in 0..300 {
        adam.backward_step(&nll(&enc)?)?;
    }
    let after = nll(&enc)?.to_scalar::<f32>()?;
    assert!(after < 0.5 * before, "{} -> {}", before, after);
    Ok(())
}

#[test]
fn gaussian_encoder_fits_a_posterior_mean() -> Result<()> {
    let dev = Device::Cpu;
    let (x, _) = features(&dev)?;
    let target = x.narrow(1, 0, 1)?;

    let varmap = VarMap::new();
    let vs = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
    let enc = GaussianEncoder::new(2, 1, &[16], vs)?;
    let mut adam = LazyAdam::new_lr(varmap.all_vars(), 0.05)?;

    let abs_err = |enc: &GaussianEncoder| -> Result<f32> {
        let q = enc.forward_t(&x, false)?;
        q.mean.sub(&target)?.abs()?.mean_all()?.to_scalar::<f32>()
    };
    let before = abs_err(&enc)?;

    for _ in 0..300 {
        let q = enc.forward_t(&x, true)?;
        let loss = q.mean.sub(&target)?.sqr()?.sum_all()?;
        adam.backward_step(&loss)?;
    }

    let after = abs_err(&enc)?;
    assert!(after < 0.6 * before, "{} -> {}", before, after);

    let q = enc.forward_t(&x, false)?;
    let kl = q.kl_to_standard_normal()?;
    assert_eq!(kl.dims(), &[32]);
    assert!(kl.to_vec1::<f32>()?.iter().all(|v| *v >= -1e-5));
    Ok(())
}
