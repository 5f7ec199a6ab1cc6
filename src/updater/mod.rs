pub mod probe;

use crate::api::{Error, PvsClient};
use crate::mapper::{self, FieldMapper};
use crate::model::{Feature, Snapshot, SupportedFeatures};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Lifecycle of one feature across a discovery and the cycles following it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureState {
    Unprobed,
    Active,
    /// Probe classified the feature as absent; skipped until the next discovery.
    Inactive,
    Updated,
    Failed,
}

#[derive(Debug, Clone)]
pub struct FeatureFailure {
    pub feature: Feature,
    pub error: Error,
}

/// A record that could not be mapped. Its siblings are still merged.
#[derive(Debug, Clone)]
pub struct MappingFailure {
    pub feature: Feature,
    pub instance: String,
    pub error: Error,
}

#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub updated: Vec<Feature>,
    pub failures: Vec<FeatureFailure>,
    pub mapping_failures: Vec<MappingFailure>,
}

impl CycleReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.mapping_failures.is_empty()
    }
}

fn builtin_mapper(feature: Feature) -> Box<dyn FieldMapper> {
    match feature {
        Feature::Gateway => Box::new(mapper::gateway),
        Feature::Inverters => Box::new(mapper::inverter),
        Feature::Metering => Box::new(mapper::meter),
    }
}

/// Discovers the optional subsystems of a PVS and pulls their data into snapshots.
///
/// One cycle at a time: both `run_discovery` and `run_update_cycle` take `&mut self`, so
/// callers sharing an `Updater` have to serialize access (e.g. behind a `Mutex`).
pub struct Updater {
    client: PvsClient,
    features: Vec<Feature>,
    mappers: HashMap<Feature, Box<dyn FieldMapper>>,
    supported: Option<SupportedFeatures>,
    states: BTreeMap<Feature, FeatureState>,
}

impl Updater {
    pub fn new(client: PvsClient) -> Self {
        Updater {
            client,
            features: Feature::ALL.to_vec(),
            mappers: Feature::ALL
                .iter()
                .map(|&feature| (feature, builtin_mapper(feature)))
                .collect(),
            supported: None,
            states: BTreeMap::new(),
        }
    }

    /// Restrict probing to `features`, keeping their order. Resets discovery.
    pub fn with_features(mut self, features: &[Feature]) -> Self {
        self.features.clear();
        for &feature in features {
            if !self.features.contains(&feature) {
                self.features.push(feature);
            }
        }
        self.supported = None;
        self.states.clear();
        self
    }

    /// Replace the mapper used for the records of `feature`.
    pub fn with_mapper<M>(mut self, feature: Feature, mapper: M) -> Self
    where
        M: FieldMapper + 'static,
    {
        self.mappers.insert(feature, Box::new(mapper));
        self
    }

    pub fn client(&self) -> &PvsClient {
        &self.client
    }

    /// Mask found by the last completed discovery.
    pub fn supported_features(&self) -> Option<SupportedFeatures> {
        self.supported
    }

    pub fn feature_state(&self, feature: Feature) -> FeatureState {
        self.states
            .get(&feature)
            .copied()
            .unwrap_or(FeatureState::Unprobed)
    }

    /// Probe every configured feature, starting from an empty mask.
    pub async fn run_discovery(&mut self) -> Result<SupportedFeatures, Error> {
        self.supported = None;
        self.states.clear();

        let mut mask = SupportedFeatures::EMPTY;
        for &feature in &self.features {
            let state = match probe::probe(&self.client, feature, mask).await? {
                Some(updated) => {
                    mask = updated;
                    FeatureState::Active
                }
                None => FeatureState::Inactive,
            };
            log::debug!("feature {} is {:?}", feature, state);
            self.states.insert(feature, state);
        }

        log::info!(
            "PVS at {} supports {:?}",
            self.client.pvs_url(),
            mask.features().collect::<Vec<_>>()
        );
        self.supported = Some(mask);
        Ok(mask)
    }

    async fn update_feature(
        &self,
        feature: Feature,
        snapshot: &mut Snapshot,
        report: &mut CycleReport,
    ) -> Result<(), Error> {
        let path = feature.var_path();
        let records = self.client.match_vars(path).await?;
        let mapper = self
            .mappers
            .get(&feature)
            .ok_or_else(|| Error::Internal(format!("no mapper registered for {}", feature)))?;

        snapshot
            .raw
            .insert(path.to_owned(), records.values().cloned().collect());

        for (instance, record) in &records {
            match mapper.map(record) {
                Ok(entity) => {
                    snapshot
                        .entities
                        .insert(entity.identity().to_owned(), entity);
                }
                Err(error) => {
                    log::warn!("Skipping {} record {}: {}", feature, instance, error);
                    report.mapping_failures.push(MappingFailure {
                        feature,
                        instance: instance.to_owned(),
                        error,
                    });
                }
            }
        }
        Ok(())
    }

    /// Fetch every active feature into `snapshot`.
    ///
    /// A failing feature does not stop the others; failures are listed in the report.
    /// `Err` is returned only when discovery fails, or when every attempted feature failed
    /// because the PVS could not be reached or logged into.
    pub async fn run_update_cycle(&mut self, snapshot: &mut Snapshot) -> Result<CycleReport, Error> {
        let mask = match self.supported {
            Some(mask) => mask,
            None => self.run_discovery().await?,
        };

        let active: Vec<Feature> = self
            .features
            .iter()
            .copied()
            .filter(|&feature| mask.has(feature))
            .collect();

        let mut report = CycleReport::default();
        for &feature in &active {
            let state = match self.update_feature(feature, snapshot, &mut report).await {
                Ok(()) => {
                    report.updated.push(feature);
                    FeatureState::Updated
                }
                Err(error) => {
                    log::warn!("Updating {} failed: {}", feature, error);
                    report.failures.push(FeatureFailure { feature, error });
                    FeatureState::Failed
                }
            };
            self.states.insert(feature, state);
        }

        let unreachable = report.updated.is_empty()
            && !report.failures.is_empty()
            && report.failures.iter().all(|f| f.error.is_fatal());
        match report.failures.first() {
            Some(failure) if unreachable => Err(failure.error.clone()),
            _ => Ok(report),
        }
    }

    /// Run one cycle into a fresh snapshot.
    pub async fn update(&mut self) -> Result<(Snapshot, CycleReport), Error> {
        let mut snapshot = Snapshot::new();
        let report = self.run_update_cycle(&mut snapshot).await?;
        Ok((snapshot, report))
    }
}
