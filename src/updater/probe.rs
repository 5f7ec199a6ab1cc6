use crate::api::{Error, PvsClient};
use crate::model::{Feature, SupportedFeatures};

/// Ask the varserver whether `feature` exists.
///
/// Returns `current` with the feature's flag set when the subtree answers with data, or
/// `None` ("no change") when the failure is one of the expected absence signals
/// (`Error::is_feature_absent`). Every other failure is returned as is.
pub async fn probe(
    client: &PvsClient,
    feature: Feature,
    current: SupportedFeatures,
) -> Result<Option<SupportedFeatures>, Error> {
    let path = feature.var_path();
    match client.match_vars(path).await {
        Ok(_) => Ok(Some(current | feature.flag())),
        Err(e) if e.is_feature_absent() => {
            log::debug!("No {} found on varserver filter {}: {}", feature, path, e);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
