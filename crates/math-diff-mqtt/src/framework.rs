//! REST client for the framework server.

use math_diff_host::Thing;

use crate::{ServiceError, protocol::ThingRecord};

/// Framework REST client.
///
/// Used once at startup to learn which devices are already linked to the
/// service; later changes arrive over the news topic.
#[derive(Debug, Clone)]
pub struct FrameworkClient {
    http: reqwest::Client,
    base_url: String,
    service_id: String,
    service_token: String,
}

impl FrameworkClient {
    /// Create a client for a framework server.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        service_id: impl Into<String>,
        service_token: impl Into<String>,
    ) -> Result<Self, ServiceError> {
        Ok(Self {
            http: reqwest::Client::builder().build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            service_id: service_id.into(),
            service_token: service_token.into(),
        })
    }

    /// URL listing the things linked to this service.
    #[must_use]
    pub fn things_url(&self) -> String {
        format!("{}/api/service/{}/things", self.base_url, self.service_id)
    }

    /// Fetch the things currently linked to this service.
    ///
    /// # Errors
    /// Returns error if the request fails or the response is malformed.
    pub async fn fetch_things(&self) -> Result<Vec<Thing>, ServiceError> {
        let url = self.things_url();
        tracing::debug!("Fetching linked things from {url}");

        let records: Vec<ThingRecord> = self
            .http
            .get(url)
            .basic_auth(&self.service_id, Some(&self.service_token))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(records.into_iter().map(ThingRecord::into_thing).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_things_url_trims_trailing_slash() {
        let client = FrameworkClient::new("http://localhost:7000/", "svc", "secret").unwrap();
        assert_eq!(client.things_url(), "http://localhost:7000/api/service/svc/things");
    }
}
