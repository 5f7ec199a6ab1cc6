//! Client for the varserver interface of SunPower/SunStrong PVS gateways.
//!
//! `PvsClient` owns the authenticated HTTP session, `Updater` discovers which optional
//! subsystems a PVS has and pulls their variables into a `Snapshot` of typed entities.

pub mod api;
pub mod mapper;
pub mod model;
pub mod updater;

pub use api::{Error, PvsClient};
pub use mapper::FieldMapper;
pub use model::{
    Credentials, Entity, Feature, PvsConfig, PvsGateway, PvsInverter, PvsMeter, Snapshot,
    SupportedFeatures,
};
pub use updater::{CycleReport, FeatureFailure, FeatureState, MappingFailure, Updater};
