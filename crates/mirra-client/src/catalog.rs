//! Request/response calls to the endpoint's catalog and analysis routes.

use reqwest::multipart::{Form, Part};
use tracing::debug;

use mirra_common::{
    BeautifyResponse, Error, ParameterSet, ProductQuery, ProductRecommendations, Result,
    ShadeCatalog,
};

use crate::types::ClientConfig;

pub struct CatalogClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl CatalogClient {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(Error::http)?;
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// `GET /unique_shades`.
    pub async fn fetch_unique_shades(&self) -> Result<ShadeCatalog> {
        let url = self.config.endpoint_url("unique_shades");
        let response = self.client.get(&url).send().await.map_err(Error::http)?;
        let body: serde_json::Value = check(response)
            .await?
            .json()
            .await
            .map_err(Error::http)?;
        let catalog = ShadeCatalog::from_json(&body)?;
        debug!(categories = catalog.shades.len(), "shade catalog fetched");
        Ok(catalog)
    }

    /// `POST /products` with the current colors.
    pub async fn fetch_product_recommendations(
        &self,
        selected_makeup: &ParameterSet,
    ) -> Result<ProductRecommendations> {
        let url = self.config.endpoint_url("products");
        let query = ProductQuery {
            selected_makeup: *selected_makeup,
        };
        let response = self
            .client
            .post(&url)
            .json(&query)
            .send()
            .await
            .map_err(Error::http)?;
        check(response).await?.json().await.map_err(Error::http)
    }

    /// `POST /beautify` with a PNG still as multipart field `file`.
    pub async fn analyze_still_image(&self, png: &[u8]) -> Result<BeautifyResponse> {
        let url = self.config.endpoint_url("beautify");
        let part = Part::bytes(png.to_vec())
            .file_name("capture.png")
            .mime_str("image/png")
            .map_err(Error::http)?;
        let form = Form::new().part("file", part);
        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(Error::http)?;
        let suggestion: BeautifyResponse =
            check(response).await?.json().await.map_err(Error::http)?;
        debug!(skin_tone = %suggestion.skin_tone, "beautify suggestion received");
        Ok(suggestion)
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();
    Err(Error::http(format!("{} returned {}: {}", url, status, body)))
}
