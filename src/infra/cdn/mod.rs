//! HTTP purge drivers.

mod cloudflare;
mod edge;

pub use cloudflare::CloudflareDriver;
pub use edge::EdgeCdnDriver;

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::application::purge::{ApiError, ProviderError, PurgeDriver};
use crate::config::Settings;
use crate::domain::purge::DriverKind;
use crate::infra::error::InfraError;

/// Build the configured purge driver from settings.
///
/// Returns `Ok(None)` when no driver is selected, or when the selected
/// driver's credentials are incomplete. The latter leaves the feature
/// available but unconfigured; callers surface that as a configuration
/// error at dispatch time instead of failing startup.
pub fn build_driver(settings: &Settings) -> Result<Option<Arc<dyn PurgeDriver>>, InfraError> {
    let timeout = Duration::from_secs(settings.http.timeout_seconds);

    match settings.purge.driver {
        None => Ok(None),
        Some(DriverKind::Cloudflare) => {
            let (Some(api_token), Some(zone_id)) = (
                settings.cloudflare.api_token.as_deref(),
                settings.cloudflare.zone_id.as_deref(),
            ) else {
                warn!("Cloudflare driver selected but api_token or zone_id is missing");
                return Ok(None);
            };
            let driver = CloudflareDriver::new(api_token, zone_id, timeout)?;
            Ok(Some(Arc::new(driver)))
        }
        Some(DriverKind::EdgeCdn) => {
            let (Some(base_url), Some(api_key), Some(environment_id)) = (
                settings.edge.base_url.as_ref(),
                settings.edge.api_key.as_deref(),
                settings.edge.environment_id.as_deref(),
            ) else {
                warn!("Edge CDN driver selected but base_url, api_key or environment_id is missing");
                return Ok(None);
            };
            let driver = EdgeCdnDriver::new(base_url.clone(), api_key, environment_id, timeout)?;
            Ok(Some(Arc::new(driver)))
        }
    }
}

/// Map a reqwest failure onto the driver error taxonomy.
fn map_request_error(err: reqwest::Error, timeout: Duration) -> ApiError {
    if err.is_timeout() {
        ApiError::Timeout(timeout)
    } else {
        ApiError::Transport(err.to_string())
    }
}

fn provider_rejection(status: u16, errors: Vec<ProviderError>) -> ApiError {
    ApiError::Provider { status, errors }
}
