use ndarray::{array, Array2};
use psyvi::*;

fn small() -> Array2<f32> {
    array![
        [1f32, 0., 1., 1.],
        [0., 0., 1., 0.],
        [1., 1., 1., 1.],
        [0., 1., 0., -1.],
    ]
}

#[test]
fn unknown_model_is_a_configuration_error() {
    let err = Virt::new(small().view(), "irt_5pl", ModelOptions::default()).err();
    assert!(matches!(
        err,
        Some(ModelError::Configuration(ConfigurationError::UnknownModel(m))) if m == "irt_5pl"
    ));
}

#[test]
fn out_of_range_response_is_rejected() {
    let mut y = small();
    y[[2, 1]] = 2.;
    let err = Virt::new(y.view(), "irt_2pl", ModelOptions::default()).err();
    assert!(matches!(
        err,
        Some(ModelError::Configuration(ConfigurationError::InvalidResponse {
            row: 2,
            col: 1,
            ..
        }))
    ));
}

#[test]
fn too_many_skills_fail_before_fitting() {
    let k = 21;
    let q = Array2::<f32>::eye(k);
    let y = Array2::<f32>::from_shape_fn((5, k), |(i, j)| ((i + j) % 2) as f32);
    let err = Vcdm::new(y.view(), q.view(), "dina", ModelOptions::default()).err();
    assert!(matches!(
        err,
        Some(ModelError::Capacity(CapacityError { skills: 21, max: 20 }))
    ));
}

#[test]
fn non_binary_q_matrix_is_rejected() {
    let q = array![[1f32, 0., 2., 1.], [0., 1., 1., 0.]];
    let err = Vcdm::new(small().view(), q.view(), "dina", ModelOptions::default()).err();
    assert!(matches!(
        err,
        Some(ModelError::Configuration(ConfigurationError::NonBinary { .. }))
    ));
}

#[test]
fn divergent_learning_rate_stops_with_last_valid_state() {
    let mut model = Virt::new(small().view(), "irt_1pl", ModelOptions::default())
        .expect("valid model");
    let fit = FitOptions::new(50)
        .with_optimizer(OptimizerKind::Sgd)
        .with_learning_rate(1e30);

    match model.fit(&fit, None) {
        Err(FitError::NumericalInstability {
            iteration,
            last_valid,
            ..
        }) => {
            assert!(iteration < 50);
            assert_eq!(last_valid.losses.len(), last_valid.iteration);
            assert!(last_valid.losses.iter().all(|l| l.is_finite()));
            assert_eq!(model.state().status, FitStatus::Failed);
        }
        other => panic!("expected numerical instability, got {:?}", other.map(|r| r.status)),
    }
}

#[test]
fn iteration_cap_reports_a_warning() -> anyhow::Result<()> {
    let mut model = Virt::new(small().view(), "irt_2pl", ModelOptions::default())?;
    let report = model.fit(&FitOptions::new(10), None)?;
    assert_eq!(report.status, FitStatus::IterationLimitReached);
    assert_eq!(report.iterations, 10);
    let warning = report.warning.ok_or(anyhow::anyhow!("no warning"))?;
    assert_eq!(warning.iterations, 10);
    Ok(())
}

#[test]
fn invalid_options_are_rejected() {
    let options = ModelOptions {
        x_feature: 0,
        ..Default::default()
    };
    let err = Virt::new(small().view(), "irt_2pl", options).err();
    assert!(matches!(
        err,
        Some(ModelError::Configuration(ConfigurationError::InvalidOption(_)))
    ));
}
