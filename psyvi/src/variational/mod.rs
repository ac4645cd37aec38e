//! Approximate posteriors over latent abilities and skill patterns
//!
//! Each respondent's posterior either lives in its own trainable
//! parameters ([`Bbvi`]) or is produced on demand by a recognition
//! network from the respondent's responses ([`Amortized`]).

mod gaussian;
mod pattern;

pub use gaussian::{AmortizedGaussian, ExplicitGaussian};
pub use pattern::{AmortizedPattern, ExplicitPattern};

use crate::data::ResponseMatrix;
use psyvi_util::candle_core::{Result, Tensor};
use psyvi_util::candle_model_traits::GaussianParams;
use psyvi_util::candle_nn::VarBuilder;

/// What a posterior needs to know to allocate its parameters
#[derive(Debug, Clone, Copy)]
pub struct LatentShape<'a> {
    /// number of respondents
    pub num_rows: usize,
    /// number of items
    pub num_items: usize,
    /// latent dimension or number of logits
    pub width: usize,
    /// hidden layers of a recognition network
    pub encoder_layers: &'a [usize],
}

/// Diagonal Gaussian posterior over continuous abilities
pub trait GaussianPosterior: Sized {
    fn build(shape: LatentShape, vb: VarBuilder) -> Result<Self>;

    /// Posterior mean and log variance of the selected rows (n x D)
    fn posterior(&self, data: &ResponseMatrix, rows: &Tensor, train: bool)
        -> Result<GaussianParams>;
}

/// Categorical posterior over skill patterns, given as logits
pub trait PatternPosterior: Sized {
    fn build(shape: LatentShape, vb: VarBuilder) -> Result<Self>;

    /// Unnormalized logits of the selected rows (n x width)
    fn logits(&self, data: &ResponseMatrix, rows: &Tensor, train: bool) -> Result<Tensor>;
}

/// Inference strategy: which posterior families a model uses
pub trait Inference: 'static {
    type Ability: GaussianPosterior;
    type Pattern: PatternPosterior;
    const NAME: &'static str;
}

/// Black-box variational inference with per-respondent parameters
#[derive(Debug, Clone, Copy)]
pub struct Bbvi;

/// Amortized inference through a recognition network
#[derive(Debug, Clone, Copy)]
pub struct Amortized;

impl Inference for Bbvi {
    type Ability = ExplicitGaussian;
    type Pattern = ExplicitPattern;
    const NAME: &'static str = "bbvi";
}

impl Inference for Amortized {
    type Ability = AmortizedGaussian;
    type Pattern = AmortizedPattern;
    const NAME: &'static str = "vae";
}
