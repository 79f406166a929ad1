//! MAAS implementation of the [`Gateway`] trait.
//!
//! Requests go to the region controller's 2.0 REST API with form-encoded
//! bodies and an OAuth 1.0 PLAINTEXT `Authorization` header. Every transport,
//! HTTP and decoding failure becomes a [`GatewayError`] before it leaves this
//! module.

use std::time::{SystemTime, UNIX_EPOCH};

use reqwest::Method;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

mod auth;
mod types;

pub use auth::{ApiKey, ApiKeyFormatError};
pub use types::MachineRecord;

use crate::config::{ConfigError, MaasConfig};
use crate::gateway::{Gateway, GatewayError, GatewayFuture, MachineHandle, MachineStatus};
use auth::percent_encode;
use types::{classify_response, conflict_as_unavailable, decode, encode_user_data};

const API_PATH: &str = "/api/2.0/";

/// Errors raised while building a [`MaasGateway`].
#[derive(Debug, Error)]
pub enum MaasError {
    /// The connection settings failed validation.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The API key could not be split into its parts.
    #[error(transparent)]
    ApiKey(#[from] ApiKeyFormatError),
    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {message}")]
    Client {
        /// Underlying error message.
        message: String,
    },
}

/// Gateway backed by a MAAS region controller.
#[derive(Clone, Debug)]
pub struct MaasGateway {
    client: reqwest::Client,
    api_root: String,
    key: ApiKey,
}

impl MaasGateway {
    /// Builds a gateway from validated connection settings.
    ///
    /// No request is sent; a wrong key surfaces on the first call.
    ///
    /// # Errors
    ///
    /// Returns [`MaasError`] when the settings are invalid or the HTTP client
    /// cannot be built.
    pub fn new(config: &MaasConfig) -> Result<Self, MaasError> {
        config.validate()?;
        let key = ApiKey::parse(&config.api_key)?;
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .build()
            .map_err(|err| MaasError::Client {
                message: err.to_string(),
            })?;
        Ok(Self {
            client,
            api_root: api_root(&config.api_url),
            key,
        })
    }

    /// Returns the API root every endpoint is joined to.
    #[must_use]
    pub fn api_root(&self) -> &str {
        &self.api_root
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        form: &[(&str, &str)],
        resource: &str,
    ) -> Result<String, GatewayError> {
        let nonce = Uuid::new_v4().simple().to_string();
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or_default();
        debug!(%method, path, "sending MAAS request");

        let mut request = self
            .client
            .request(method, format!("{}{path}", self.api_root))
            .header(AUTHORIZATION, self.key.authorization_header(&nonce, timestamp))
            .header(ACCEPT, "application/json");
        if !form.is_empty() {
            request = request.form(form);
        }

        let response = request.send().await.map_err(transport)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(transport)?;
        classify_response(status, body, resource)
    }

    async fn machine(
        &self,
        method: Method,
        path: &str,
        form: &[(&str, &str)],
        resource: &str,
    ) -> Result<MachineHandle, GatewayError> {
        let body = self.send(method, path, form, resource).await?;
        decode::<MachineRecord>(&body).map(MachineHandle::from)
    }
}

impl Gateway for MaasGateway {
    fn allocate_by_id<'a>(&'a self, system_id: &'a str) -> GatewayFuture<'a, MachineHandle> {
        Box::pin(async move {
            let resource = format!("machine {system_id}");
            self.machine(
                Method::POST,
                "machines/?op=allocate",
                &[("system_id", system_id)],
                &resource,
            )
            .await
            .map_err(|err| conflict_as_unavailable(err, &resource))
        })
    }

    fn allocate_by_resources(
        &self,
        cpu_count: u32,
        memory_mb: u64,
    ) -> GatewayFuture<'_, MachineHandle> {
        Box::pin(async move {
            let cpu = cpu_count.to_string();
            let mem = memory_mb.to_string();
            let wanted = format!("machine with {cpu_count} CPUs and {memory_mb} MiB");
            self.machine(
                Method::POST,
                "machines/?op=allocate",
                &[("cpu_count", cpu.as_str()), ("mem", mem.as_str())],
                &wanted,
            )
            .await
            .map_err(|err| conflict_as_unavailable(err, &wanted))
        })
    }

    fn get_status<'a>(&'a self, system_id: &'a str) -> GatewayFuture<'a, MachineStatus> {
        Box::pin(async move {
            let path = format!("machines/{}/", percent_encode(system_id));
            let body = self
                .send(Method::GET, &path, &[], &format!("machine {system_id}"))
                .await?;
            decode::<MachineRecord>(&body).map(|record| record.machine_status())
        })
    }

    fn create_tag_if_absent<'a>(
        &'a self,
        name: &'a str,
        description: &'a str,
    ) -> GatewayFuture<'a, bool> {
        Box::pin(async move {
            let resource = format!("tag {name}");
            let path = format!("tags/{}/", percent_encode(name));
            match self.send(Method::GET, &path, &[], &resource).await {
                Ok(_) => return Ok(false),
                Err(GatewayError::NotFound { .. }) => {}
                Err(err) => return Err(err),
            }
            self.send(
                Method::POST,
                "tags/",
                &[("name", name), ("comment", description)],
                &resource,
            )
            .await?;
            debug!(tag = name, "tag created");
            Ok(true)
        })
    }

    fn add_tag_to_machine<'a>(
        &'a self,
        tag_name: &'a str,
        system_id: &'a str,
    ) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            let path = format!("tags/{}/?op=update_nodes", percent_encode(tag_name));
            self.send(
                Method::POST,
                &path,
                &[("add", system_id)],
                &format!("tag {tag_name}"),
            )
            .await?;
            Ok(())
        })
    }

    fn deploy<'a>(
        &'a self,
        system_id: &'a str,
        payload: Option<&'a str>,
    ) -> GatewayFuture<'a, MachineHandle> {
        Box::pin(async move {
            let path = format!("machines/{}/?op=deploy", percent_encode(system_id));
            let user_data = payload.map(encode_user_data);
            let form: Vec<(&str, &str)> = user_data
                .as_deref()
                .map(|encoded| ("user_data", encoded))
                .into_iter()
                .collect();
            self.machine(Method::POST, &path, &form, &format!("machine {system_id}"))
                .await
        })
    }

    fn release<'a>(&'a self, system_id: &'a str) -> GatewayFuture<'a, ()> {
        Box::pin(async move {
            let path = format!("machines/{}/?op=release", percent_encode(system_id));
            self.send(Method::POST, &path, &[], &format!("machine {system_id}"))
                .await?;
            Ok(())
        })
    }
}

fn transport(err: reqwest::Error) -> GatewayError {
    GatewayError::Transport {
        message: err.to_string(),
    }
}

/// Joins the configured URL with the 2.0 API path.
pub(crate) fn api_root(api_url: &str) -> String {
    let trimmed = api_url.trim().trim_end_matches('/');
    let base = trimmed.strip_suffix("/api/2.0").unwrap_or(trimmed);
    format!("{base}{API_PATH}")
}

#[cfg(test)]
mod tests;
