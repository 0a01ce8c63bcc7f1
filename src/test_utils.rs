//! Shared fixtures for unit tests.

use nalgebra::{DVector, Vector3};

use crate::{
    config::{EstimatorConfig, FrameOffsets},
    foot::Feet,
    kinematics::LegChainModel,
};

pub(crate) const BIPED_MODEL: &str = include_str!("../tests/data/biped_model.json");
pub(crate) const PARAMS: &str = include_str!("../tests/data/params.json");

/// The 12 joint biped used throughout the tests.
pub(crate) fn biped_model() -> LegChainModel {
    LegChainModel::from_json_str(BIPED_MODEL).unwrap()
}

/// Parameters matching [`biped_model`].
pub(crate) fn params() -> EstimatorConfig {
    EstimatorConfig::from_json_str(PARAMS).unwrap()
}

/// Offsets matching [`params`].
pub(crate) fn offsets() -> FrameOffsets {
    FrameOffsets {
        body: Vector3::new(0.0, 0.0, 0.05),
        feet: Feet::new(Vector3::new(0.02, 0.0, -0.05), Vector3::new(0.02, 0.0, -0.05)),
    }
}

/// Both knees bent, hips and ankles compensating, feet flat.
pub(crate) fn bent_stance() -> DVector<f64> {
    let leg = [0.0, 0.0, -0.4, 0.8, -0.4, 0.0];
    DVector::from_iterator(12, leg.iter().chain(leg.iter()).copied())
}
