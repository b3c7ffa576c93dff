//! Typed Rust client for the infrastructure control plane REST API.
//!
//! Covers the subset the orchestrator needs: the generic server command
//! endpoint (deploy, power actions, modify, storage, delete, clean, queries)
//! plus the catalog endpoints (images, networks, addresses, locations).
//!
//! Commands are synchronous on the wire but asynchronous in effect: a
//! successful response only means the control plane accepted the request.

mod types;

pub use types::*;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("control plane request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("control plane {endpoint} returned {status}: {body}")]
    Api {
        endpoint: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("control plane {endpoint} returned an undecodable body: {source}")]
    Decode {
        endpoint: &'static str,
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Client for the control plane REST API, scoped to one organization.
#[derive(Clone)]
pub struct PlaneClient {
    base_url: String,
    org_id: String,
    token: String,
    http: reqwest::Client,
}

impl PlaneClient {
    pub fn new(
        base_url: impl Into<String>,
        org_id: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            org_id: org_id.into(),
            token: token.into(),
            http: reqwest::Client::new(),
        }
    }

    pub fn org_id(&self) -> &str {
        &self.org_id
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}{path}", self.base_url, self.org_id)
    }

    fn auth(&self) -> String {
        format!("Bearer {}", self.token)
    }

    async fn check(resp: reqwest::Response, endpoint: &'static str) -> Result<reqwest::Response> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Api { endpoint, status, body });
        }
        Ok(resp)
    }

    fn decode<T: serde::de::DeserializeOwned>(body: &str, endpoint: &'static str) -> Result<T> {
        serde_json::from_str(body).map_err(|source| Error::Decode { endpoint, source })
    }

    // ── Server commands ──────────────────────────────────────────────

    /// Issue a server command.
    ///
    /// `resource` is the path below the organization (e.g. `/server` or
    /// `/server/{id}`); `action` is appended as the last path segment when
    /// present. Rejected commands usually come back as a non-2xx status with
    /// a structured body, so those are decoded into a [`CommandResponse`]
    /// instead of being reported as transport failures.
    pub async fn invoke(
        &self,
        resource: &str,
        action: Option<&str>,
        body: Option<&serde_json::Value>,
    ) -> Result<CommandResponse> {
        let path = match action {
            Some(action) => format!("{resource}/{action}"),
            None => resource.to_string(),
        };

        let mut builder = self
            .http
            .post(self.url(&path))
            .header("Authorization", self.auth());
        if let Some(body) = body {
            builder = builder.json(body);
        }

        let resp = builder.send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        if status.is_success() {
            return Self::decode(&text, "server command");
        }

        match serde_json::from_str::<CommandResponse>(&text) {
            Ok(parsed) if status.is_client_error() => Ok(parsed),
            _ => Err(Error::Api {
                endpoint: "server command",
                status,
                body: text,
            }),
        }
    }

    // ── Images ───────────────────────────────────────────────────────

    pub async fn get_image(&self, image_id: &str) -> Result<Option<Image>> {
        let resp = self
            .http
            .get(self.url(&format!("/image/{image_id}")))
            .header("Authorization", self.auth())
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let image = Self::check(resp, "get image").await?.json().await?;
        Ok(Some(image))
    }

    pub async fn search_images(&self, query: &ImageQuery) -> Result<Vec<Image>> {
        let resp = self
            .http
            .get(self.url("/image"))
            .header("Authorization", self.auth())
            .query(query)
            .send()
            .await?;

        let list: ImageList = Self::check(resp, "search images").await?.json().await?;
        Ok(list.images)
    }

    // ── Networks & addresses ─────────────────────────────────────────

    pub async fn get_network(&self, vlan_id: &str, location: &str) -> Result<Network> {
        let resp = self
            .http
            .get(self.url(&format!("/network/{vlan_id}")))
            .header("Authorization", self.auth())
            .query(&[("location", location)])
            .send()
            .await?;

        Self::check(resp, "get network")
            .await?
            .json()
            .await
            .map_err(Error::from)
    }

    /// Release a public address. A 404 means it was already released.
    pub async fn release_address(&self, address: &str) -> Result<()> {
        let resp = self
            .http
            .post(self.url(&format!("/address/{address}/release")))
            .header("Authorization", self.auth())
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }

        Self::check(resp, "release address").await?;
        Ok(())
    }

    // ── Locations ────────────────────────────────────────────────────

    pub async fn list_locations(&self) -> Result<Vec<Location>> {
        let resp = self
            .http
            .get(self.url("/datacenterWithLimits"))
            .header("Authorization", self.auth())
            .send()
            .await?;

        let list: LocationList = Self::check(resp, "list locations").await?.json().await?;
        Ok(list.locations)
    }
}
