use legged_state_estimator::{
    ConfigError, Estimator, EstimatorConfig, EstimatorError, LegChainModel, ModelError,
};

const MODEL: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/data/biped_model.json");
const PARAMS: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/data/params.json");

#[test]
fn missing_model_file() {
    let err = Estimator::init("/nonexistent/model.json", PARAMS).unwrap_err();
    assert!(matches!(err, EstimatorError::Model(ModelError::Io { .. })));
}

#[test]
fn missing_params_file() {
    let err = Estimator::init(MODEL, "/nonexistent/params.json").unwrap_err();
    assert!(matches!(err, EstimatorError::Config(ConfigError::Io { .. })));
}

#[test]
fn params_without_required_keys() {
    // a robot description is valid JSON but has none of the parameter keys
    let err = Estimator::init(MODEL, MODEL).unwrap_err();
    assert!(matches!(err, EstimatorError::Config(ConfigError::Json(_))));
}

#[test]
fn params_for_another_robot() {
    let model = LegChainModel::from_json_str(
        r#"{ "name": "stilts", "legs": [
            { "foot": "left", "joints": [ { "name": "l", "axis": [0.0, 1.0, 0.0] } ] },
            { "foot": "right", "joints": [ { "name": "r", "axis": [0.0, 1.0, 0.0] } ] }
        ] }"#,
    )
    .unwrap();
    let config = EstimatorConfig::from_file(PARAMS).unwrap();

    let err = Estimator::new(model, config).unwrap_err();
    assert!(matches!(
        err,
        EstimatorError::Config(ConfigError::DimensionMismatch {
            expected: 2,
            got: 12,
            ..
        })
    ));
}

#[test]
fn inverted_contact_thresholds() {
    let mut config = EstimatorConfig::from_file(PARAMS).unwrap();
    config.grf.upper_bound = Some(config.grf.lower_bound / 2.0);

    let model = LegChainModel::from_file(MODEL).unwrap();
    let err = Estimator::new(model, config).unwrap_err();
    assert!(matches!(
        err,
        EstimatorError::Config(ConfigError::InvalidValue { .. })
    ));
}

#[test]
fn periods_too_long_to_represent() {
    for (dt, tau) in [(1e20, 0.05), (0.0025, 1e30)] {
        let mut config = EstimatorConfig::from_file(PARAMS).unwrap();
        config.dt = dt;
        config.torso_filter_tau = tau;

        let model = LegChainModel::from_file(MODEL).unwrap();
        let err = Estimator::new(model, config).unwrap_err();
        assert!(matches!(
            err,
            EstimatorError::Config(ConfigError::InvalidValue { .. })
        ));
    }
}
