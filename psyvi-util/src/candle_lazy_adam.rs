use candle_core::backprop::GradStore;
use candle_core::{Result, Var};
use candle_nn::Optimizer;

/// Adam hyper-parameters; a positive `weight_decay` gives AdamW
#[derive(Clone, Debug)]
pub struct ParamsLazyAdam {
    pub lr: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
    pub weight_decay: f64,
}

impl Default for ParamsLazyAdam {
    fn default() -> Self {
        Self {
            lr: 0.001,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 0.0,
        }
    }
}

#[derive(Debug)]
struct VarLazyAdam {
    var: Var,
    first_moment: Var,
    second_moment: Var,
}

///
/// Adam that only touches elements with a non-zero gradient.
///
/// Per-row variational parameters that were not part of the current
/// minibatch receive an exactly-zero gradient through `index_select`;
/// plain Adam would keep moving them with stale momentum, this one
/// leaves their value and moments as they were. Decoupled weight
/// decay, when set, also applies to touched elements only.
///
#[derive(Debug)]
pub struct LazyAdam {
    vars: Vec<VarLazyAdam>,
    step_t: usize,
    params: ParamsLazyAdam,
}

impl Optimizer for LazyAdam {
    type Config = ParamsLazyAdam;

    fn new(vars: Vec<Var>, params: ParamsLazyAdam) -> Result<Self> {
        let vars = vars
            .into_iter()
            .filter(|var| var.dtype().is_float())
            .map(|var| {
                let dtype = var.dtype();
                let shape = var.shape();
                let device = var.device();
                let first_moment = Var::zeros(shape, dtype, device)?;
                let second_moment = Var::zeros(shape, dtype, device)?;
                Ok(VarLazyAdam {
                    var,
                    first_moment,
                    second_moment,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            vars,
            step_t: 0,
            params,
        })
    }

    fn learning_rate(&self) -> f64 {
        self.params.lr
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.params.lr = lr
    }

    fn step(&mut self, grads: &GradStore) -> Result<()> {
        self.step_t += 1;
        let lr = self.params.lr;
        let beta1 = self.params.beta1;
        let beta2 = self.params.beta2;
        let decay = 1f64 - lr * self.params.weight_decay;
        let scale_m = 1f64 / (1f64 - beta1.powi(self.step_t as i32));
        let scale_v = 1f64 / (1f64 - beta2.powi(self.step_t as i32));

        for var in self.vars.iter() {
            let theta = &var.var;
            let m = &var.first_moment;
            let v = &var.second_moment;
            if let Some(g) = grads.get(theta) {
                let touched = g.ne(0.0)?;

                let next_m = ((m.as_tensor() * beta1)? + (g * (1.0 - beta1))?)?;
                let next_v = ((v.as_tensor() * beta2)? + (g.sqr()? * (1.0 - beta2))?)?;
                let m_hat = (&next_m * scale_m)?;
                let v_hat = (&next_v * scale_v)?;
                let delta = (m_hat / (v_hat.sqrt()? + self.params.eps)?)?;
                let next_theta = ((theta.as_tensor() * decay)? - (delta * lr)?)?;

                m.set(&touched.where_cond(&next_m, m.as_tensor())?)?;
                v.set(&touched.where_cond(&next_v, v.as_tensor())?)?;
                theta.set(&touched.where_cond(&next_theta, theta.as_tensor())?)?;
            }
        }
        Ok(())
    }
}

impl LazyAdam {
    pub fn new_lr(vars: Vec<Var>, learning_rate: f64) -> Result<Self> {
        let params = ParamsLazyAdam {
            lr: learning_rate,
            ..ParamsLazyAdam::default()
        };
        Self::new(vars, params)
    }

    /// AdamW with candle's default decay of 0.01
    pub fn new_adamw(vars: Vec<Var>, learning_rate: f64) -> Result<Self> {
        let params = ParamsLazyAdam {
            lr: learning_rate,
            weight_decay: 0.01,
            ..ParamsLazyAdam::default()
        };
        Self::new(vars, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{Device, Tensor};

    #[test]
    fn untouched_rows_stay_put() -> Result<()> {
        let dev = Device::Cpu;
        let w = Var::from_tensor(&Tensor::new(&[[1f32, 1.0], [2.0, 2.0], [3.0, 3.0]], &dev)?)?;
        let mut opt = LazyAdam::new_lr(vec![w.clone()], 0.1)?;

        // only row 1 participates in the loss
        let rows = Tensor::new(&[1u32], &dev)?;
        for _ in 0..5 {
            let loss = w.as_tensor().index_select(&rows, 0)?.sqr()?.sum_all()?;
            opt.backward_step(&loss)?;
        }

        let after = w.as_tensor().to_vec2::<f32>()?;
        assert_eq!(after[0], vec![1.0, 1.0]);
        assert_eq!(after[2], vec![3.0, 3.0]);
        assert!(after[1][0] < 2.0);
        Ok(())
    }

    #[test]
    fn weight_decay_skips_untouched_rows() -> Result<()> {
        let dev = Device::Cpu;
        let w = Var::from_tensor(&Tensor::new(&[[1f32, 1.0], [2.0, 2.0]], &dev)?)?;
        let mut opt = LazyAdam::new_adamw(vec![w.clone()], 0.5)?;

        let rows = Tensor::new(&[0u32], &dev)?;
        for _ in 0..3 {
            let loss = w.as_tensor().index_select(&rows, 0)?.sum_all()?;
            opt.backward_step(&loss)?;
        }

        let after = w.as_tensor().to_vec2::<f32>()?;
        assert_eq!(after[1], vec![2.0, 2.0]);
        // three unit Adam steps of size lr
        assert!(after[0][0] < 1.0 - 3.0 * 0.5 + 1e-3);
        Ok(())
    }

    #[test]
    fn minimizes_a_quadratic() -> Result<()> {
        let dev = Device::Cpu;
        let w = Var::from_tensor(&Tensor::new(&[4f32, -3.0], &dev)?)?;
        let mut opt = LazyAdam::new_lr(vec![w.clone()], 0.1)?;
        for _ in 0..500 {
            let loss = w.as_tensor().sqr()?.sum_all()?;
            opt.backward_step(&loss)?;
        }
        let after = w.as_tensor().to_vec1::<f32>()?;
        assert!(after.iter().all(|x| x.abs() < 0.1), "{:?}", after);
        Ok(())
    }
}
