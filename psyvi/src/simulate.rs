//! Synthetic response data with known parameters

use crate::error::ConfigurationError;
use crate::model_family::ModelFamily;
use crate::params::{GroundTruth, ParameterTable};
use ndarray::{Array1, Array2};
use psyvi_util::common_io::write_matrix;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal, Uniform};
use rayon::prelude::*;
use std::path::Path;

fn sigmoid(x: f32) -> f32 {
    1. / (1. + (-x).exp())
}

fn uniform_row<R: Rng>(rng: &mut R, len: usize, range: (f32, f32)) -> Array2<f32> {
    let (lb, ub) = range;
    Array2::from_shape_fn((1, len), |_| lb + (ub - lb) * rng.random::<f32>())
}

/// Independent random stream per respondent, stable under any
/// thread count
fn row_rng(seed: u64, row: usize) -> StdRng {
    StdRng::seed_from_u64(seed.wrapping_mul(0x9E37_79B9_7F4A_7C15).wrapping_add(row as u64 + 1))
}

fn draw_response<R: Rng>(rng: &mut R, prob: f32, missing_rate: f32) -> f32 {
    if missing_rate > 0. && rng.random::<f32>() < missing_rate {
        -1.
    } else if rng.random::<f32>() < prob {
        1.
    } else {
        0.
    }
}

///
/// Write `{name}_{sample_size}.txt` and, with a Q-matrix,
/// `{name}_{sample_size}_q.txt` under `dir`; `name` defaults to `data`
///
fn save_sample(
    dir: &Path,
    name: Option<&str>,
    y: &Array2<f32>,
    q: Option<&Array2<f32>>,
) -> anyhow::Result<Vec<String>> {
    let stem = format!("{}_{}", name.unwrap_or("data"), y.nrows());
    let mut written = vec![];

    let y_file = dir.join(format!("{}.txt", stem));
    let y_file = y_file.to_string_lossy().to_string();
    write_matrix(&y.view(), &y_file)?;
    written.push(y_file);

    if let Some(q) = q {
        let q_file = dir.join(format!("{}_q.txt", stem));
        let q_file = q_file.to_string_lossy().to_string();
        write_matrix(&q.view(), &q_file)?;
        written.push(q_file);
    }
    Ok(written)
}

/// Settings of an IRT simulation
#[derive(Debug, Clone)]
pub struct IrtSimulation {
    pub family: ModelFamily,
    pub sample_size: usize,
    pub item_size: usize,
    pub x_feature: usize,
    pub mask: Option<Array2<f32>>,
    pub discrimination_range: (f32, f32),
    pub difficulty_range: (f32, f32),
    pub guessing_range: (f32, f32),
    pub slipping_range: (f32, f32),
    pub missing_rate: f32,
    pub seed: u64,
}

impl IrtSimulation {
    pub fn new(family: ModelFamily, sample_size: usize, item_size: usize) -> Self {
        Self {
            family,
            sample_size,
            item_size,
            x_feature: 1,
            mask: None,
            discrimination_range: (0.5, 2.0),
            difficulty_range: (-2.0, 2.0),
            guessing_range: (0.05, 0.25),
            slipping_range: (0.8, 0.95),
            missing_rate: 0.,
            seed: 42,
        }
    }
}

/// Responses drawn from a known IRT model
#[derive(Debug, Clone)]
pub struct RandomIrt {
    pub family: ModelFamily,
    /// responses (N x J)
    pub y: Array2<f32>,
    /// abilities (N x D)
    pub theta: Array2<f32>,
    /// discrimination (D x J), the mask for 1PL
    pub discrimination: Array2<f32>,
    /// difficulty (1 x J)
    pub difficulty: Array2<f32>,
    pub guessing: Option<Array2<f32>>,
    pub slipping: Option<Array2<f32>>,
}

impl RandomIrt {
    pub fn new(sim: &IrtSimulation) -> Result<Self, ConfigurationError> {
        if !sim.family.is_irt() {
            return Err(ConfigurationError::InvalidOption(format!(
                "cannot simulate {} as an IRT model",
                sim.family
            )));
        }
        if sim.sample_size == 0 || sim.item_size == 0 || sim.x_feature == 0 {
            return Err(ConfigurationError::InvalidOption(
                "sample, item and ability sizes must be positive".into(),
            ));
        }

        let (n, j, d) = (sim.sample_size, sim.item_size, sim.x_feature);
        let mask = match &sim.mask {
            Some(m) => crate::data::Mask::new(m.view(), d, j)?.as_array().clone(),
            None => Array2::ones((d, j)),
        };

        let mut rng = StdRng::seed_from_u64(sim.seed);

        let discrimination = if sim.family.has_discrimination() {
            let (lb, ub) = sim.discrimination_range;
            Array2::from_shape_fn((d, j), |_| lb + (ub - lb) * rng.random::<f32>()) * &mask
        } else {
            mask.clone()
        };
        let difficulty = uniform_row(&mut rng, j, sim.difficulty_range);
        let guessing = sim
            .family
            .has_guessing()
            .then(|| uniform_row(&mut rng, j, sim.guessing_range));
        let slipping = sim
            .family
            .has_slipping()
            .then(|| uniform_row(&mut rng, j, sim.slipping_range));

        let floor = guessing
            .as_ref()
            .map(|c| c.row(0).to_owned())
            .unwrap_or_else(|| Array1::zeros(j));
        let ceiling = slipping
            .as_ref()
            .map(|s| s.row(0).to_owned())
            .unwrap_or_else(|| Array1::ones(j));

        let rows = (0..n)
            .into_par_iter()
            .map(|i| {
                let mut rng = row_rng(sim.seed, i);
                let theta: Vec<f32> = (0..d).map(|_| StandardNormal.sample(&mut rng)).collect();
                let y: Vec<f32> = (0..j)
                    .map(|jj| {
                        let eta = (0..d)
                            .map(|k| theta[k] * discrimination[[k, jj]])
                            .sum::<f32>()
                            - difficulty[[0, jj]];
                        let p = floor[jj] + (ceiling[jj] - floor[jj]) * sigmoid(eta);
                        draw_response(&mut rng, p, sim.missing_rate)
                    })
                    .collect();
                (theta, y)
            })
            .collect::<Vec<_>>();

        let theta = Array2::from_shape_fn((n, d), |(i, k)| rows[i].0[k]);
        let y = Array2::from_shape_fn((n, j), |(i, jj)| rows[i].1[jj]);

        Ok(Self {
            family: sim.family,
            y,
            theta,
            discrimination,
            difficulty,
            guessing,
            slipping,
        })
    }

    pub fn save_sample(&self, dir: &Path, name: Option<&str>) -> anyhow::Result<Vec<String>> {
        save_sample(dir, name, &self.y, None)
    }
}

impl GroundTruth for RandomIrt {
    fn true_parameters(&self) -> ParameterTable {
        let mut out = ParameterTable::new();
        out.insert("difficulty", self.difficulty.clone());
        if self.family.has_discrimination() {
            out.insert("discrimination", self.discrimination.clone());
        }
        if let Some(c) = &self.guessing {
            out.insert("guessing", c.clone());
        }
        if let Some(d) = &self.slipping {
            out.insert("slipping", d.clone());
        }
        out
    }
}

/// Settings of a DINA/DINO or higher-order DINA simulation
#[derive(Debug, Clone)]
pub struct CdmSimulation {
    pub family: ModelFamily,
    pub sample_size: usize,
    pub item_size: usize,
    pub skill_size: usize,
    /// fixed Q-matrix (K x J); random when absent
    pub q: Option<Array2<f32>>,
    pub slip_range: (f32, f32),
    pub guess_range: (f32, f32),
    /// marginal mastery rate of every skill (independent skills)
    pub mastery_rate: f32,
    /// higher-order loadings and difficulties
    pub loading_range: (f32, f32),
    pub skill_difficulty_range: (f32, f32),
    pub missing_rate: f32,
    pub seed: u64,
}

impl CdmSimulation {
    pub fn new(
        family: ModelFamily,
        sample_size: usize,
        item_size: usize,
        skill_size: usize,
    ) -> Self {
        Self {
            family,
            sample_size,
            item_size,
            skill_size,
            q: None,
            slip_range: (0.05, 0.2),
            guess_range: (0.05, 0.2),
            mastery_rate: 0.5,
            loading_range: (0.8, 2.0),
            skill_difficulty_range: (-1.0, 1.0),
            missing_rate: 0.,
            seed: 42,
        }
    }

    fn check(&self) -> Result<(), ConfigurationError> {
        if self.sample_size == 0 || self.item_size == 0 || self.skill_size == 0 {
            return Err(ConfigurationError::InvalidOption(
                "sample, item and skill sizes must be positive".into(),
            ));
        }
        if self.q.is_none() && self.item_size < self.skill_size {
            return Err(ConfigurationError::InvalidOption(
                "a random Q-matrix needs at least one item per skill".into(),
            ));
        }
        Ok(())
    }

    ///
    /// Item `j` requires skill `j mod K`, and with probability 0.3 one
    /// more random skill
    ///
    fn q_matrix<R: Rng>(&self, rng: &mut R) -> Result<Array2<f32>, ConfigurationError> {
        let (k, j) = (self.skill_size, self.item_size);
        if let Some(q) = &self.q {
            if q.dim() != (k, j) {
                return Err(ConfigurationError::QMatrixItems {
                    q_items: q.ncols(),
                    data_items: j,
                });
            }
            return Ok(q.clone());
        }
        let pick =
            Uniform::new(0, k).map_err(|e| ConfigurationError::InvalidOption(e.to_string()))?;
        let mut q = Array2::<f32>::zeros((k, j));
        for jj in 0..j {
            q[[jj % k, jj]] = 1.;
            if k > 1 && rng.random::<f32>() < 0.3 {
                q[[pick.sample(rng), jj]] = 1.;
            }
        }
        Ok(q)
    }
}

/// η for one respondent; And for DINA, Or for DINO
fn ideal_response(alpha: &[bool], q: &Array2<f32>, item: usize, all: bool) -> bool {
    let mut required = (0..alpha.len()).filter(|&k| q[[k, item]] > 0.);
    if all {
        required.all(|k| alpha[k])
    } else {
        required.any(|k| alpha[k])
    }
}

fn draw_cdm_rows<F>(
    sim: &CdmSimulation,
    q: &Array2<f32>,
    slip: &Array2<f32>,
    guess: &Array2<f32>,
    all: bool,
    mastery: F,
) -> (Array2<f32>, Array2<f32>, Array2<f32>)
where
    F: Fn(&mut StdRng) -> (f32, Vec<bool>) + Sync,
{
    let (n, j, k) = (sim.sample_size, sim.item_size, sim.skill_size);
    let rows = (0..n)
        .into_par_iter()
        .map(|i| {
            let mut rng = row_rng(sim.seed, i);
            let (theta, alpha) = mastery(&mut rng);
            let y: Vec<f32> = (0..j)
                .map(|jj| {
                    let p = if ideal_response(&alpha, q, jj, all) {
                        1. - slip[[0, jj]]
                    } else {
                        guess[[0, jj]]
                    };
                    draw_response(&mut rng, p, sim.missing_rate)
                })
                .collect();
            (theta, alpha, y)
        })
        .collect::<Vec<_>>();

    let y = Array2::from_shape_fn((n, j), |(i, jj)| rows[i].2[jj]);
    let alpha = Array2::from_shape_fn((n, k), |(i, kk)| if rows[i].1[kk] { 1. } else { 0. });
    let theta = Array2::from_shape_fn((n, 1), |(i, _)| rows[i].0);
    (y, alpha, theta)
}

/// Responses drawn from a known DINA or DINO model
#[derive(Debug, Clone)]
pub struct RandomCdm {
    pub family: ModelFamily,
    /// responses (N x J)
    pub y: Array2<f32>,
    /// Q-matrix (K x J)
    pub q: Array2<f32>,
    /// true mastery patterns (N x K)
    pub alpha: Array2<f32>,
    pub slip: Array2<f32>,
    pub guess: Array2<f32>,
}

impl RandomCdm {
    pub fn new(sim: &CdmSimulation) -> Result<Self, ConfigurationError> {
        let all = match sim.family {
            ModelFamily::Dina => true,
            ModelFamily::Dino => false,
            other => {
                return Err(ConfigurationError::InvalidOption(format!(
                    "cannot simulate {} as dina/dino",
                    other
                )))
            }
        };
        sim.check()?;

        let mut rng = StdRng::seed_from_u64(sim.seed);
        let q = sim.q_matrix(&mut rng)?;
        let slip = uniform_row(&mut rng, sim.item_size, sim.slip_range);
        let guess = uniform_row(&mut rng, sim.item_size, sim.guess_range);

        let rate = sim.mastery_rate;
        let k = sim.skill_size;
        let (y, alpha, _) = draw_cdm_rows(sim, &q, &slip, &guess, all, |rng| {
            (0., (0..k).map(|_| rng.random::<f32>() < rate).collect())
        });

        Ok(Self {
            family: sim.family,
            y,
            q,
            alpha,
            slip,
            guess,
        })
    }

    pub fn save_sample(&self, dir: &Path, name: Option<&str>) -> anyhow::Result<Vec<String>> {
        save_sample(dir, name, &self.y, Some(&self.q))
    }
}

impl GroundTruth for RandomCdm {
    fn true_parameters(&self) -> ParameterTable {
        let mut out = ParameterTable::new();
        out.insert("slip", self.slip.clone());
        out.insert("guess", self.guess.clone());
        if let Some(prevalence) = self.alpha.mean_axis(ndarray::Axis(0)) {
            out.insert("skill_prevalence", prevalence.insert_axis(ndarray::Axis(0)));
        }
        out
    }
}

/// Responses drawn from a known higher-order DINA model
#[derive(Debug, Clone)]
pub struct RandomHoDina {
    pub y: Array2<f32>,
    pub q: Array2<f32>,
    /// higher-order abilities (N x 1)
    pub theta: Array2<f32>,
    pub alpha: Array2<f32>,
    pub slip: Array2<f32>,
    pub guess: Array2<f32>,
    /// λ (1 x K)
    pub skill_loading: Array2<f32>,
    /// δ (1 x K)
    pub skill_difficulty: Array2<f32>,
}

impl RandomHoDina {
    pub fn new(sim: &CdmSimulation) -> Result<Self, ConfigurationError> {
        if sim.family != ModelFamily::HoDina {
            return Err(ConfigurationError::InvalidOption(format!(
                "cannot simulate {} as higher-order dina",
                sim.family
            )));
        }
        sim.check()?;

        let mut rng = StdRng::seed_from_u64(sim.seed);
        let q = sim.q_matrix(&mut rng)?;
        let slip = uniform_row(&mut rng, sim.item_size, sim.slip_range);
        let guess = uniform_row(&mut rng, sim.item_size, sim.guess_range);
        let skill_loading = uniform_row(&mut rng, sim.skill_size, sim.loading_range);
        let skill_difficulty = uniform_row(&mut rng, sim.skill_size, sim.skill_difficulty_range);

        let k = sim.skill_size;
        let (y, alpha, theta) = draw_cdm_rows(sim, &q, &slip, &guess, true, |rng| {
            let theta: f32 = StandardNormal.sample(rng);
            let alpha = (0..k)
                .map(|kk| {
                    let p = sigmoid(skill_loading[[0, kk]] * theta - skill_difficulty[[0, kk]]);
                    rng.random::<f32>() < p
                })
                .collect();
            (theta, alpha)
        });

        Ok(Self {
            y,
            q,
            theta,
            alpha,
            slip,
            guess,
            skill_loading,
            skill_difficulty,
        })
    }

    pub fn save_sample(&self, dir: &Path, name: Option<&str>) -> anyhow::Result<Vec<String>> {
        save_sample(dir, name, &self.y, Some(&self.q))
    }
}

impl GroundTruth for RandomHoDina {
    fn true_parameters(&self) -> ParameterTable {
        let mut out = ParameterTable::new();
        out.insert("slip", self.slip.clone());
        out.insert("guess", self.guess.clone());
        out.insert("skill_loading", self.skill_loading.clone());
        out.insert("skill_difficulty", self.skill_difficulty.clone());
        out
    }
}
