//! HTTP-backed segmentation provider for a real background-removal vendor.
//! Built on the same `reqwest` retry-with-backoff client the processor uses
//! for source-image downloads (see `processor::http::HttpClient`).

use async_trait::async_trait;
use image::RgbImage;
use serde::Deserialize;

use crate::processor::http::HttpClient;

use super::traits::{BackgroundProvider, ProviderError, Result, SegmentationOutput, SegmentationProvider};

/// Response contract assumed of the external vendor: a JSON envelope
/// carrying base64-free URLs to the produced cutout/mask plus a reported
/// cost. The concrete vendor is out of scope (spec §1); this adapter only
/// needs to satisfy the shape.
#[derive(Debug, Deserialize)]
struct VendorResponse {
    cutout_url: String,
    mask_url: String,
    cost_usd: f64,
}

pub struct HttpSegmentationProvider {
    client: HttpClient,
    endpoint: String,
}

impl HttpSegmentationProvider {
    pub fn new(client: HttpClient, endpoint: String) -> Self {
        Self { client, endpoint }
    }
}

#[async_trait]
impl SegmentationProvider for HttpSegmentationProvider {
    async fn remove_background(&self, source_url: &str, _source_bytes: &[u8]) -> Result<SegmentationOutput> {
        let envelope = self
            .client
            .post_json(
                &self.endpoint,
                &serde_json::json!({ "image_url": source_url }),
            )
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        let response: VendorResponse = serde_json::from_slice(&envelope)
            .map_err(|e| ProviderError::RequestFailed(format!("malformed vendor response: {e}")))?;

        let cutout_bytes = self
            .client
            .download(&response.cutout_url, Vec::new())
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
        let mask_bytes = self
            .client
            .download(&response.mask_url, Vec::new())
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        let decoded_cutout = image::load_from_memory(&cutout_bytes)
            .map_err(|e| ProviderError::DecodeFailed(e.to_string()))?;
        let has_alpha = decoded_cutout.color().has_alpha();
        let cutout = decoded_cutout.to_rgba8();
        let mask = image::load_from_memory(&mask_bytes)
            .map_err(|e| ProviderError::DecodeFailed(e.to_string()))?
            .to_luma8();

        Ok(SegmentationOutput {
            cutout,
            mask,
            cost_usd: response.cost_usd,
            has_alpha,
        })
    }
}

/// Response contract assumed of the external background-generation vendor
/// (e.g. an AI backdrop generator, spec §9 "{Freepik, NanoBanana, …}"): a
/// list of produced background URLs, each with its reported cost.
#[derive(Debug, Deserialize)]
struct BackgroundVendorItem {
    url: String,
    cost_usd: f64,
}

#[derive(Debug, Deserialize)]
struct BackgroundVendorResponse {
    backgrounds: Vec<BackgroundVendorItem>,
}

pub struct HttpBackgroundProvider {
    client: HttpClient,
    endpoint: String,
}

impl HttpBackgroundProvider {
    pub fn new(client: HttpClient, endpoint: String) -> Self {
        Self { client, endpoint }
    }
}

#[async_trait]
impl BackgroundProvider for HttpBackgroundProvider {
    async fn generate(&self, theme: &str, count: usize, width: u32, height: u32) -> Result<Vec<(RgbImage, f64)>> {
        let envelope = self
            .client
            .post_json(
                &self.endpoint,
                &serde_json::json!({
                    "theme": theme,
                    "count": count,
                    "width": width,
                    "height": height,
                }),
            )
            .await
            .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;

        let response: BackgroundVendorResponse = serde_json::from_slice(&envelope)
            .map_err(|e| ProviderError::RequestFailed(format!("malformed vendor response: {e}")))?;

        if response.backgrounds.is_empty() {
            return Err(ProviderError::Empty);
        }

        let mut out = Vec::with_capacity(response.backgrounds.len());
        for item in response.backgrounds {
            let bytes = self
                .client
                .download(&item.url, Vec::new())
                .await
                .map_err(|e| ProviderError::RequestFailed(e.to_string()))?;
            let image = image::load_from_memory(&bytes)
                .map_err(|e| ProviderError::DecodeFailed(e.to_string()))?
                .to_rgb8();
            out.push((image, item.cost_usd));
        }
        Ok(out)
    }
}
