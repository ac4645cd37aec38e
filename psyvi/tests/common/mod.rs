#![allow(dead_code)]

use ndarray::{Array2, ArrayView1};
use psyvi::*;

pub fn irt_sample(family: ModelFamily, n: usize, j: usize, seed: u64) -> anyhow::Result<RandomIrt> {
    let mut sim = IrtSimulation::new(family, n, j);
    sim.seed = seed;
    Ok(RandomIrt::new(&sim)?)
}

pub fn cdm_sample(
    family: ModelFamily,
    n: usize,
    j: usize,
    k: usize,
    seed: u64,
) -> anyhow::Result<RandomCdm> {
    let mut sim = CdmSimulation::new(family, n, j, k);
    sim.seed = seed;
    Ok(RandomCdm::new(&sim)?)
}

pub fn pearson(x: ArrayView1<f32>, y: ArrayView1<f32>) -> f32 {
    let n = x.len() as f32;
    let (mx, my) = (x.sum() / n, y.sum() / n);
    let (mut sxy, mut sxx, mut syy) = (0f32, 0f32, 0f32);
    for (a, b) in x.iter().zip(y.iter()) {
        sxy += (a - mx) * (b - my);
        sxx += (a - mx) * (a - mx);
        syy += (b - my) * (b - my);
    }
    sxy / (sxx * syy).sqrt()
}

pub fn row_of(table: &ParameterTable, name: &str) -> anyhow::Result<Array2<f32>> {
    table
        .get(name)
        .cloned()
        .ok_or(anyhow::anyhow!("missing estimate {}", name))
}
