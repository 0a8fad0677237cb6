//! REST client for the catalog endpoints.

use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{Category, CategoryId, Link, LinkId},
    error::ApiError,
    protocol::{CategoryPatch, LinkPatch, NewCategory, NewLink},
};
use tracing::debug;
use url::Url;

use crate::error::SyncError;

pub const OP_LOAD_CATALOG: &str = "load catalog";
pub const OP_CREATE_CATEGORY: &str = "create category";
pub const OP_UPDATE_CATEGORY: &str = "update category";
pub const OP_DELETE_CATEGORY: &str = "delete category";
pub const OP_CREATE_LINK: &str = "create link";
pub const OP_UPDATE_LINK: &str = "update link";
pub const OP_DELETE_LINK: &str = "delete link";

/// Remote side of the catalog. Every call either completes with a success
/// payload or fails with `NetworkFailure` / `RemoteRejected`.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    async fn fetch_catalog(&self) -> Result<Vec<Category>, SyncError>;
    async fn create_category(&self, body: &NewCategory) -> Result<Category, SyncError>;
    async fn update_category(
        &self,
        id: &CategoryId,
        patch: &CategoryPatch,
    ) -> Result<(), SyncError>;
    async fn delete_category(&self, id: &CategoryId) -> Result<(), SyncError>;
    async fn create_link(&self, body: &NewLink) -> Result<Link, SyncError>;
    async fn update_link(&self, id: &LinkId, patch: &LinkPatch) -> Result<(), SyncError>;
    async fn delete_link(&self, id: &LinkId) -> Result<(), SyncError>;
}

pub struct HttpCatalogApi {
    http: Client,
    base_url: Url,
}

impl HttpCatalogApi {
    pub fn new(base_url: Url, request_timeout: Duration) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .context("failed to build HTTP client")?;
        Self::with_client(http, base_url)
    }

    pub fn with_client(http: Client, base_url: Url) -> anyhow::Result<Self> {
        if base_url.cannot_be_a_base() {
            return Err(anyhow!("catalog API url '{base_url}' cannot carry a path"));
        }
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, SyncError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                SyncError::skipped(format!("invalid catalog API url '{}'", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<Response, SyncError> {
        let response = request
            .send()
            .await
            .map_err(|err| network_failure(operation, err))?;
        let status = response.status();
        debug!(operation, status = status.as_u16(), "catalog api response");
        if status.is_success() {
            return Ok(response);
        }

        let fallback = status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string();
        let body = response
            .json::<ApiError>()
            .await
            .unwrap_or_else(|_| ApiError::new(fallback));
        Err(SyncError::RemoteRejected {
            operation,
            status: status.as_u16(),
            error: body.error,
            details: body.details,
        })
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<T, SyncError> {
        self.send(operation, request)
            .await?
            .json::<T>()
            .await
            .map_err(|err| network_failure(operation, err))
    }
}

fn network_failure(operation: &'static str, err: reqwest::Error) -> SyncError {
    SyncError::NetworkFailure {
        operation,
        message: err.to_string(),
    }
}

#[async_trait]
impl CatalogApi for HttpCatalogApi {
    async fn fetch_catalog(&self) -> Result<Vec<Category>, SyncError> {
        let url = self.endpoint(&["categories"])?;
        self.send_json(OP_LOAD_CATALOG, self.http.get(url)).await
    }

    async fn create_category(&self, body: &NewCategory) -> Result<Category, SyncError> {
        let url = self.endpoint(&["categories"])?;
        self.send_json(OP_CREATE_CATEGORY, self.http.post(url).json(body))
            .await
    }

    async fn update_category(
        &self,
        id: &CategoryId,
        patch: &CategoryPatch,
    ) -> Result<(), SyncError> {
        let url = self.endpoint(&["categories", id.as_str()])?;
        self.send(OP_UPDATE_CATEGORY, self.http.put(url).json(patch))
            .await?;
        Ok(())
    }

    async fn delete_category(&self, id: &CategoryId) -> Result<(), SyncError> {
        let url = self.endpoint(&["categories", id.as_str()])?;
        self.send(OP_DELETE_CATEGORY, self.http.delete(url)).await?;
        Ok(())
    }

    async fn create_link(&self, body: &NewLink) -> Result<Link, SyncError> {
        let url = self.endpoint(&["links"])?;
        self.send_json(OP_CREATE_LINK, self.http.post(url).json(body))
            .await
    }

    async fn update_link(&self, id: &LinkId, patch: &LinkPatch) -> Result<(), SyncError> {
        let url = self.endpoint(&["links", id.as_str()])?;
        self.send(OP_UPDATE_LINK, self.http.put(url).json(patch))
            .await?;
        Ok(())
    }

    async fn delete_link(&self, id: &LinkId) -> Result<(), SyncError> {
        let url = self.endpoint(&["links", id.as_str()])?;
        self.send(OP_DELETE_LINK, self.http.delete(url)).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/api_tests.rs"]
mod tests;
