//! VIN resolution: decode a VIN into make/model/year via the NHTSA vPIC
//! API, cached in the Store so a flaky network never blocks startup.

use crate::error::Result;
use crate::logging::{StructuredLogger, get_logger};
use crate::store::Store;
use crate::store::model::VehicleInfo;
use std::time::Duration;

const DECODE_URL_BASE: &str = "https://vpic.nhtsa.dot.gov/api/vehicles/DecodeVinValues";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Values the vPIC API uses to mean "no VIN available" — treated as
/// absent rather than as a decode result.
fn is_absent(vin: &str) -> bool {
    matches!(vin.trim(), "" | "Not Applicable" | "N/A")
}

/// Resolves a VIN to vehicle identity, backed by a [`Store`] cache so a
/// vehicle is only ever decoded once across the daemon's lifetime unless
/// an explicit refresh is requested.
pub struct VinResolver {
    http: reqwest::Client,
    store: Store,
    logger: StructuredLogger,
}

impl VinResolver {
    pub fn new(store: Store) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            store,
            logger: get_logger("vin"),
        })
    }

    /// Resolve `vin`, using the cache unless `force_refresh` is set. A
    /// blank/"Not Applicable"/"N/A" VIN is treated as absent and never
    /// hits the network.
    pub async fn resolve(&self, vin: &str, force_refresh: bool) -> Result<Option<VehicleInfo>> {
        if is_absent(vin) {
            return Ok(None);
        }

        if !force_refresh {
            if let Some(cached) = self.store.get_vehicle_info(vin)? {
                return Ok(Some(cached));
            }
        }

        match self.decode(vin).await {
            Ok(info) => {
                self.store.upsert_vehicle_info(&info)?;
                Ok(Some(info))
            }
            Err(e) => {
                self.logger
                    .warn(&format!("VIN decode failed for {}: {}", vin, e));
                // Fall back to whatever is cached, if anything, rather than
                // surfacing a network error up through drive-end routing.
                Ok(self.store.get_vehicle_info(vin)?)
            }
        }
    }

    async fn decode(&self, vin: &str) -> Result<VehicleInfo> {
        let url = format!("{}/{}?format=json", DECODE_URL_BASE, vin);
        let resp = self.request_with_retry(&url).await?;
        let body: serde_json::Value = resp.json().await?;

        let result = body
            .get("Results")
            .and_then(|r| r.as_array())
            .and_then(|arr| arr.first())
            .cloned()
            .unwrap_or_default();

        let make = field_str(&result, "Make");
        let model = field_str(&result, "Model");
        let year = field_str(&result, "ModelYear").and_then(|y| y.parse::<u32>().ok());

        Ok(VehicleInfo {
            vin: vin.to_string(),
            make,
            model,
            year,
        })
    }

    /// One retry after a network-classified failure, per spec's VIN
    /// decode policy (30s timeout, single retry, no further backoff).
    async fn request_with_retry(&self, url: &str) -> Result<reqwest::Response> {
        match self.http.get(url).send().await {
            Ok(resp) if resp.status().is_success() => Ok(resp),
            Ok(resp) => Err(crate::error::VigilError::network(format!(
                "VIN decode returned {}",
                resp.status()
            ))),
            Err(_) => Ok(self.http.get(url).send().await?),
        }
    }
}

/// Extract a field, treating "Not Applicable"/"N/A"/"" as absent per
/// spec.md §6 — the vPIC API uses those same placeholders inside
/// individual result fields, not just the top-level VIN lookup.
fn field_str(result: &serde_json::Value, field: &str) -> Option<String> {
    result
        .get(field)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !is_absent(s))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_and_placeholder_vins_are_absent() {
        assert!(is_absent(""));
        assert!(is_absent("Not Applicable"));
        assert!(is_absent("N/A"));
        assert!(!is_absent("1HGCM82633A004352"));
    }

    #[test]
    fn field_str_filters_empty_missing_and_not_applicable() {
        let v = serde_json::json!({"Make": "  Honda  ", "Model": "", "Trim": "Not Applicable", "Series": "N/A"});
        assert_eq!(field_str(&v, "Make"), Some("Honda".to_string()));
        assert_eq!(field_str(&v, "Model"), None);
        assert_eq!(field_str(&v, "Year"), None);
        assert_eq!(field_str(&v, "Trim"), None);
        assert_eq!(field_str(&v, "Series"), None);
    }

    #[tokio::test]
    async fn resolve_absent_vin_never_touches_network_or_cache() {
        let store = Store::open_in_memory().unwrap();
        let resolver = VinResolver::new(store).unwrap();
        let result = resolver.resolve("", false).await.unwrap();
        assert!(result.is_none());
    }
}
