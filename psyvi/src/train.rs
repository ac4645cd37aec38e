//! Stochastic optimization of the ELBO over minibatches of respondents

use crate::error::{ConvergenceWarning, FitError};
use crate::params::{GroundTruth, ParameterTable};
use clap::ValueEnum;
use indicatif::{ProgressBar, ProgressDrawTarget};
use log::{debug, info, warn};
use psyvi_util::candle_core::backprop::GradStore;
use psyvi_util::candle_core::{self, DType, Device, Tensor, Var};
use psyvi_util::candle_lazy_adam::LazyAdam;
use psyvi_util::candle_minibatch::Minibatches;
use psyvi_util::candle_nn::{Optimizer, VarMap, SGD};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FitStatus {
    Initialized,
    Running,
    Converged,
    IterationLimitReached,
    Failed,
}

/// Progress of a model's optimization, kept across `fit` calls
#[derive(Debug, Clone)]
pub struct FitState {
    /// number of completed optimization steps
    pub iteration: usize,
    /// loss (negative ELBO per respondent) of every step
    pub losses: Vec<f32>,
    pub status: FitStatus,
    /// item-level estimates as of the last report
    pub estimates: ParameterTable,
}

impl Default for FitState {
    fn default() -> Self {
        Self {
            iteration: 0,
            losses: vec![],
            status: FitStatus::Initialized,
            estimates: ParameterTable::new(),
        }
    }
}

impl FitState {
    pub fn last_loss(&self) -> Option<f32> {
        self.losses.last().copied()
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[clap(rename_all = "lowercase")]
pub enum OptimizerKind {
    /// Adam that skips elements without gradient
    #[default]
    Adam,
    /// lazy Adam with decoupled weight decay
    AdamW,
    Sgd,
}

#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    pub kind: OptimizerKind,
    pub learning_rate: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            kind: OptimizerKind::Adam,
            learning_rate: 1e-2,
        }
    }
}

///
/// Stop when the loss trend has flattened or the item parameters have
/// stopped moving, for `patience` consecutive windows.
///
/// * `window` - steps per non-overlapping window; the tests run only
///   at window boundaries
/// * `rel_tol` - relative change between consecutive window means; the
///   change plus two standard errors of it must stay below this
/// * `param_tol` - largest absolute change of an item parameter over
///   one window
/// * `patience` - consecutive windows that must pass either test
/// * `min_iter` - never stop before this many steps
///
#[derive(Debug, Clone)]
pub struct ConvergenceCriteria {
    pub window: usize,
    pub rel_tol: f64,
    pub param_tol: f64,
    pub patience: usize,
    pub min_iter: usize,
}

impl Default for ConvergenceCriteria {
    fn default() -> Self {
        Self {
            window: 50,
            rel_tol: 1e-4,
            param_tol: 1e-3,
            patience: 3,
            min_iter: 200,
        }
    }
}

/// Settings of one `fit` call. The iteration cap has no default.
#[derive(Debug, Clone)]
pub struct FitOptions {
    pub max_iter: usize,
    pub optimizer: OptimizerConfig,
    pub convergence: ConvergenceCriteria,
    /// report progress every this many steps (0 to silence)
    pub log_every: usize,
    pub show_progress: bool,
}

impl FitOptions {
    pub fn new(max_iter: usize) -> Self {
        Self {
            max_iter,
            optimizer: OptimizerConfig::default(),
            convergence: ConvergenceCriteria::default(),
            log_every: 100,
            show_progress: false,
        }
    }

    pub fn with_learning_rate(mut self, learning_rate: f64) -> Self {
        self.optimizer.learning_rate = learning_rate;
        self
    }

    pub fn with_optimizer(mut self, kind: OptimizerKind) -> Self {
        self.optimizer.kind = kind;
        self
    }

    pub fn with_convergence(mut self, convergence: ConvergenceCriteria) -> Self {
        self.convergence = convergence;
        self
    }
}

/// Outcome of a `fit` call
#[derive(Debug, Clone, Serialize)]
pub struct FitReport {
    pub status: FitStatus,
    pub iterations: usize,
    pub final_loss: f32,
    pub warning: Option<ConvergenceWarning>,
    /// mean absolute error per parameter when ground truth was given
    pub ground_truth_mae: BTreeMap<String, f32>,
    pub estimates: ParameterTable,
}

/// A model's training objective
pub trait Objective {
    ///
    /// Negative ELBO divided by the number of respondents
    ///
    /// * `rows` - minibatch row indexes
    /// * `scale` - N / minibatch size
    /// * `rng` - source of reparameterization noise
    ///
    fn loss(&self, rows: &Tensor, scale: f64, rng: &mut StdRng) -> candle_core::Result<Tensor>;

    fn item_estimates(&self) -> candle_core::Result<ParameterTable>;
}

///
/// Trainable variables, minibatch sampler, random state and progress
/// of one model
///
pub struct Session {
    varmap: VarMap,
    minibatches: Minibatches,
    rng: StdRng,
    state: FitState,
    device: Device,
}

impl Session {
    pub fn new(
        varmap: VarMap,
        num_rows: usize,
        subsample_size: Option<usize>,
        seed: u64,
        device: Device,
    ) -> Self {
        Self {
            varmap,
            minibatches: Minibatches::new(num_rows, subsample_size),
            rng: StdRng::seed_from_u64(seed),
            state: FitState::default(),
            device,
        }
    }

    pub fn state(&self) -> &FitState {
        &self.state
    }

    ///
    /// Optimize `objective` until convergence or `options.max_iter`
    /// more steps
    ///
    pub fn run<O: Objective>(
        &mut self,
        objective: &O,
        options: &FitOptions,
        truth: Option<&dyn GroundTruth>,
    ) -> Result<FitReport, FitError> {
        let vars = self.varmap.all_vars();
        let mut optimizer = Stepper::new(&options.optimizer, vars.clone())?;
        let truth = truth.map(|t| t.true_parameters());
        let mut monitor = ConvergenceMonitor::new(options.convergence.clone());

        let pb = ProgressBar::new(options.max_iter as u64);
        if !options.show_progress {
            pb.set_draw_target(ProgressDrawTarget::hidden());
        }

        info!(
            "optimizing over {} respondents, {} per step, up to {} steps",
            self.minibatches.num_rows(),
            self.minibatches.size(),
            options.max_iter
        );

        self.state.status = FitStatus::Running;
        let mut status = FitStatus::IterationLimitReached;
        let scale = self.minibatches.scale();

        for _ in 0..options.max_iter {
            let iteration = self.state.iteration + 1;

            let rows = self.minibatches.sample_tensor(&mut self.rng, &self.device)?;
            let loss = objective.loss(&rows, scale, &mut self.rng)?;
            let loss_val = loss.to_dtype(DType::F32)?.to_scalar::<f32>()?;

            if !loss_val.is_finite() {
                return Err(self.fail(iteration, "loss", &pb));
            }

            let grads = loss.backward()?;

            if !all_finite(&grads, &vars)? {
                return Err(self.fail(iteration, "gradient", &pb));
            }

            optimizer.step(&grads)?;

            self.state.iteration = iteration;
            self.state.losses.push(loss_val);
            pb.inc(1);

            let window_closed = monitor.push_loss(loss_val);
            if window_closed {
                monitor.end_window(objective.item_estimates()?.flatten());
            }

            if options.log_every > 0 && iteration % options.log_every == 0 {
                self.report(objective, options.log_every, truth.as_ref())?;
            }

            if window_closed && monitor.converged(iteration) {
                status = FitStatus::Converged;
                break;
            }
        }

        pb.finish_and_clear();

        self.state.status = status;
        self.state.estimates = objective.item_estimates()?;

        let final_loss = self.state.last_loss().unwrap_or(f32::NAN);

        let warning = if status == FitStatus::IterationLimitReached {
            let w = ConvergenceWarning {
                iterations: self.state.iteration,
                last_loss: final_loss,
            };
            warn!("{}", w);
            Some(w)
        } else {
            info!(
                "converged after {} steps, loss {:.6}",
                self.state.iteration, final_loss
            );
            None
        };

        let ground_truth_mae = truth
            .map(|t| self.state.estimates.mean_abs_error(&t))
            .unwrap_or_default();

        Ok(FitReport {
            status,
            iterations: self.state.iteration,
            final_loss,
            warning,
            ground_truth_mae,
            estimates: self.state.estimates.clone(),
        })
    }

    fn fail(&mut self, iteration: usize, quantity: &'static str, pb: &ProgressBar) -> FitError {
        pb.abandon();
        let last_valid = Box::new(self.state.clone());
        self.state.status = FitStatus::Failed;
        log::error!("non-finite {} at iteration {}", quantity, iteration);
        FitError::NumericalInstability {
            iteration,
            quantity,
            last_valid,
        }
    }

    fn report<O: Objective>(
        &mut self,
        objective: &O,
        window: usize,
        truth: Option<&ParameterTable>,
    ) -> candle_core::Result<()> {
        let recent = &self.state.losses[self.state.losses.len().saturating_sub(window)..];
        let mean_loss = recent.iter().sum::<f32>() / recent.len().max(1) as f32;
        info!("[{}] loss: {:.6}", self.state.iteration, mean_loss);

        self.state.estimates = objective.item_estimates()?;
        if let Some(truth) = truth {
            for (name, mae) in self.state.estimates.mean_abs_error(truth) {
                info!("[{}] {} MAE: {:.4}", self.state.iteration, name, mae);
            }
        }
        Ok(())
    }
}

/// Both Adam variants leave rows outside the minibatch untouched
enum Stepper {
    Adam(LazyAdam),
    Sgd(SGD),
}

impl Stepper {
    fn new(config: &OptimizerConfig, vars: Vec<Var>) -> candle_core::Result<Self> {
        let lr = config.learning_rate;
        Ok(match config.kind {
            OptimizerKind::Adam => Stepper::Adam(LazyAdam::new_lr(vars, lr)?),
            OptimizerKind::AdamW => Stepper::Adam(LazyAdam::new_adamw(vars, lr)?),
            OptimizerKind::Sgd => Stepper::Sgd(SGD::new(vars, lr)?),
        })
    }

    fn step(&mut self, grads: &GradStore) -> candle_core::Result<()> {
        match self {
            Stepper::Adam(opt) => opt.step(grads),
            Stepper::Sgd(opt) => opt.step(grads),
        }
    }
}

fn all_finite(grads: &GradStore, vars: &[Var]) -> candle_core::Result<bool> {
    for var in vars {
        if let Some(g) = grads.get(var) {
            let total = g.abs()?.sum_all()?.to_dtype(DType::F32)?.to_scalar::<f32>()?;
            if !total.is_finite() {
                debug!("non-finite gradient in a {:?} variable", var.shape());
                return Ok(false);
            }
        }
    }
    Ok(true)
}

/// Mean and per-step noise variance of one window of losses
#[derive(Debug, Clone, Copy)]
struct WindowStats {
    mean: f64,
    noise_var: f64,
}

impl WindowStats {
    /// Noise is estimated from successive differences so that a steady
    /// trend inside the window does not count as noise.
    fn of(losses: &[f32]) -> Self {
        let n = losses.len().max(1) as f64;
        let mean = losses.iter().map(|&x| x as f64).sum::<f64>() / n;
        let noise_var = if losses.len() > 1 {
            let ss = losses
                .windows(2)
                .map(|w| (w[1] as f64 - w[0] as f64).powi(2))
                .sum::<f64>();
            ss / (2.0 * (losses.len() - 1) as f64)
        } else {
            0.0
        };
        Self { mean, noise_var }
    }
}

/// Non-overlapping window convergence test on noisy losses
pub struct ConvergenceMonitor {
    criteria: ConvergenceCriteria,
    current: Vec<f32>,
    previous: Option<WindowStats>,
    params: Option<Vec<f32>>,
    streak: usize,
}

impl ConvergenceMonitor {
    pub fn new(criteria: ConvergenceCriteria) -> Self {
        let window = criteria.window.max(1);
        Self {
            criteria: ConvergenceCriteria { window, ..criteria },
            current: Vec::with_capacity(window),
            previous: None,
            params: None,
            streak: 0,
        }
    }

    /// Returns true when this loss completes a window
    pub fn push_loss(&mut self, loss: f32) -> bool {
        self.current.push(loss);
        self.current.len() >= self.criteria.window
    }

    ///
    /// Close the current window and test it against the previous one
    ///
    /// * `params` - item parameters at the end of the window
    ///
    pub fn end_window(&mut self, params: Vec<f32>) {
        let stats = WindowStats::of(&self.current);
        self.current.clear();

        let flat_loss = match self.previous {
            Some(prev) => {
                let change = (prev.mean - stats.mean).abs();
                let w = self.criteria.window as f64;
                let se = ((prev.noise_var + stats.noise_var) / w).sqrt();
                debug!(
                    "window mean {:.6}, change {:.3e} +/- {:.3e}",
                    stats.mean, change, se
                );
                change + 2.0 * se < self.criteria.rel_tol * prev.mean.abs()
            }
            None => false,
        };
        self.previous = Some(stats);

        let still_params = match &self.params {
            Some(prev) if prev.len() == params.len() && !params.is_empty() => {
                let change = prev
                    .iter()
                    .zip(params.iter())
                    .map(|(a, b)| (a - b).abs() as f64)
                    .fold(0f64, f64::max);
                change < self.criteria.param_tol
            }
            _ => false,
        };
        self.params = Some(params);

        self.streak = if flat_loss || still_params {
            self.streak + 1
        } else {
            0
        };
    }

    pub fn converged(&self, iteration: usize) -> bool {
        iteration >= self.criteria.min_iter && self.streak >= self.criteria.patience.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use psyvi_util::candle_nn::{Init, VarBuilder};

    /// (x - 3)^2 over a single variable, NaN from `nan_at` on
    struct Quadratic {
        x: Tensor,
        nan_at: Option<f32>,
    }

    impl Objective for Quadratic {
        fn loss(
            &self,
            _rows: &Tensor,
            _scale: f64,
            _rng: &mut StdRng,
        ) -> candle_core::Result<Tensor> {
            let loss = (&self.x - 3.0)?.sqr()?.sum_all()?;
            match self.nan_at {
                Some(limit) => {
                    // past the limit the loss turns into NaN
                    let x = self.x.sum_all()?.to_scalar::<f32>()?;
                    if x > limit {
                        loss.affine(f64::NAN, 0.)
                    } else {
                        Ok(loss)
                    }
                }
                None => Ok(loss),
            }
        }

        fn item_estimates(&self) -> candle_core::Result<ParameterTable> {
            let mut out = ParameterTable::new();
            out.insert_tensor("x", &self.x.reshape((1, 1))?)?;
            Ok(out)
        }
    }

    fn quadratic(nan_at: Option<f32>) -> candle_core::Result<(Session, Quadratic)> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let x = vb.get_with_hints(1, "x", Init::Const(0.))?;
        let session = Session::new(varmap, 10, None, 0, Device::Cpu);
        Ok((session, Quadratic { x, nan_at }))
    }

    #[test]
    fn converges_on_a_quadratic() -> anyhow::Result<()> {
        let (mut session, objective) = quadratic(None)?;
        let options = FitOptions::new(5000).with_learning_rate(0.1);
        let report = session.run(&objective, &options, None)?;
        assert_eq!(report.status, FitStatus::Converged);
        assert!(report.iterations < 5000);
        assert!(report.warning.is_none());
        let x = report.estimates.get("x").map(|x| x[[0, 0]]);
        assert!(x.is_some_and(|x| (x - 3.0).abs() < 0.05), "{:?}", x);
        assert_eq!(session.state().losses.len(), report.iterations);
        Ok(())
    }

    #[test]
    fn cap_reached_is_a_warning() -> anyhow::Result<()> {
        let (mut session, objective) = quadratic(None)?;
        let options = FitOptions::new(10).with_learning_rate(0.01);
        let report = session.run(&objective, &options, None)?;
        assert_eq!(report.status, FitStatus::IterationLimitReached);
        assert_eq!(report.iterations, 10);
        let warning = report.warning.ok_or(anyhow::anyhow!("no warning"))?;
        assert_eq!(warning.iterations, 10);
        assert_eq!(session.state().status, FitStatus::IterationLimitReached);
        Ok(())
    }

    #[test]
    fn non_finite_loss_stops_before_the_update() -> anyhow::Result<()> {
        let (mut session, objective) = quadratic(Some(1.0))?;
        let options = FitOptions::new(1000)
            .with_optimizer(OptimizerKind::Sgd)
            .with_learning_rate(0.1);
        let err = session.run(&objective, &options, None).unwrap_err();
        match &err {
            FitError::NumericalInstability {
                iteration,
                quantity,
                last_valid,
            } => {
                assert_eq!(*quantity, "loss");
                assert_eq!(last_valid.iteration + 1, *iteration);
                assert!(last_valid.losses.iter().all(|x| x.is_finite()));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(session.state().status, FitStatus::Failed);
        // the failing step did not move x
        let x = objective.x.sum_all()?.to_scalar::<f32>()?;
        assert!(x > 1.0 && x < 3.0);
        Ok(())
    }

    fn monitor(
        window: usize,
        rel_tol: f64,
        param_tol: f64,
        patience: usize,
    ) -> ConvergenceMonitor {
        ConvergenceMonitor::new(ConvergenceCriteria {
            window,
            rel_tol,
            param_tol,
            patience,
            min_iter: 0,
        })
    }

    /// feed one window of losses, returns the monitor's verdict
    fn feed(
        monitor: &mut ConvergenceMonitor,
        losses: impl Iterator<Item = f32>,
        at: usize,
    ) -> bool {
        let mut closed = false;
        for x in losses {
            closed = monitor.push_loss(x);
        }
        assert!(closed);
        monitor.end_window(vec![]);
        monitor.converged(at)
    }

    #[test]
    fn quiet_plateau_is_detected_by_the_trend() {
        let mut monitor = monitor(10, 1e-3, 0.0, 2);
        // steadily decreasing: the windowed trend is large
        assert!(!feed(&mut monitor, (0..10).map(|i| 100.0 - i as f32), 10));
        assert!(!feed(&mut monitor, (10..20).map(|i| 100.0 - i as f32), 20));
        // small alternating noise around a flat level
        let flat = |i: usize| 50.0 + if i % 2 == 0 { 0.01 } else { -0.01 };
        assert!(!feed(&mut monitor, (0..10).map(flat), 30));
        assert!(!feed(&mut monitor, (0..10).map(flat), 40));
        assert!(feed(&mut monitor, (0..10).map(flat), 50));
    }

    #[test]
    fn noise_alone_never_looks_flat() {
        use rand_distr::{Distribution, Normal};
        // a slow downward drift buried in minibatch-sized noise
        let noise = Normal::new(0f32, 1.0).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let mut monitor = monitor(50, 1e-4, 0.0, 1);
        let mut t = 0;
        for w in 1..=200 {
            let losses: Vec<f32> = (0..50)
                .map(|_| {
                    t += 1;
                    100.0 - 1e-4 * t as f32 + noise.sample(&mut rng)
                })
                .collect();
            assert!(!feed(&mut monitor, losses.into_iter(), 50 * w), "window {}", w);
        }
    }

    #[test]
    fn one_flat_window_is_not_enough() {
        let mut monitor = monitor(5, 1e-3, 0.0, 3);
        assert!(!feed(&mut monitor, std::iter::repeat_n(10.0, 5), 5));
        assert!(!feed(&mut monitor, std::iter::repeat_n(10.0, 5), 10));
        assert!(!feed(&mut monitor, std::iter::repeat_n(10.0, 5), 15));
        // a jump resets the count
        assert!(!feed(&mut monitor, std::iter::repeat_n(9.0, 5), 20));
        assert!(!feed(&mut monitor, std::iter::repeat_n(9.0, 5), 25));
        assert!(!feed(&mut monitor, std::iter::repeat_n(9.0, 5), 30));
        assert!(feed(&mut monitor, std::iter::repeat_n(9.0, 5), 35));
    }

    #[test]
    fn parameters_at_rest_count_as_converged() {
        let mut monitor = monitor(5, 0.0, 1e-3, 1);
        for x in [1.0, 2.0, 3.0, 4.0, 5.0] {
            monitor.push_loss(x);
        }
        monitor.end_window(vec![1.0, 2.0]);
        assert!(!monitor.converged(5));
        for x in [6.0, 7.0, 8.0, 9.0, 10.0] {
            monitor.push_loss(x);
        }
        monitor.end_window(vec![1.0001, 2.0]);
        assert!(monitor.converged(10));
    }

    #[test]
    fn nothing_stops_before_min_iter() {
        let mut monitor = ConvergenceMonitor::new(ConvergenceCriteria {
            window: 2,
            rel_tol: 1.0,
            param_tol: 1.0,
            patience: 1,
            min_iter: 100,
        });
        for _ in 0..2 {
            monitor.push_loss(1.0);
            monitor.push_loss(1.0);
            monitor.end_window(vec![0.0]);
        }
        assert!(!monitor.converged(4));
        assert!(monitor.converged(100));
    }
}
