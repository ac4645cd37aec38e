//! Variational inference for item response theory and cognitive
//! diagnosis models.
//!
//! Two inference strategies are available for every model family:
//! black-box variational inference with explicit per-respondent
//! variational parameters ([`Bbvi`]) and amortized inference through a
//! recognition network ([`Amortized`]).

pub mod cdm;
pub mod compute;
pub mod data;
pub mod error;
pub mod facade;
pub mod irt;
pub mod marginal;
pub mod model_family;
pub mod params;
pub mod simulate;
pub mod train;
pub mod variational;

pub use compute::{ComputeContext, ComputeDevice};
pub use data::{Mask, QMatrix, ResponseMatrix};
pub use error::{CapacityError, ConfigurationError, ConvergenceWarning, FitError, ModelError};
pub use facade::{
    CdmModel, HoDinaModel, IndependentSkills, IrtModel, JointPatterns, ModelOptions, VaeCHoDina,
    VaeCcdm, VaeCdm, VaeIrt, VcHoDina, Vccdm, Vcdm, Virt,
};
pub use model_family::ModelFamily;
pub use params::{GroundTruth, ParameterTable};
pub use simulate::{CdmSimulation, IrtSimulation, RandomCdm, RandomHoDina, RandomIrt};
pub use train::{
    ConvergenceCriteria, FitOptions, FitReport, FitState, FitStatus, OptimizerConfig,
    OptimizerKind,
};
pub use variational::{Amortized, Bbvi, Inference};

pub use psyvi_util::candle_core;
