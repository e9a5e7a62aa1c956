pub mod analysis;
pub mod batch;

pub use analysis::AnalysisOrchestrator;
pub use batch::BatchPoster;

use crate::ebay::{
    ListingDefaults, ListingFieldNormalizer, MappingError, MappingTables,
    MarketplaceRequestBuilder, TradingApi, TradingClient, TradingConfig,
};
use crate::hosting::{HostingConfig, PhotoHost, PhotoHostingClient};
use crate::http::env_u64;
use crate::llm::{self, VisionClient, VisionConfig, VisionModel};
use crate::models::{
    AnalysisResult, BatchSummary, ListingDraft, MarketplaceResult, Photo, PostableListing,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Duration;

/// The four operations the HTTP layer exposes, wired to one set of clients.
pub struct Pipeline<V, H, T> {
    analysis: Arc<AnalysisOrchestrator<V, H>>,
    poster: Arc<BatchPoster<T>>,
}

impl<V, H, T> Clone for Pipeline<V, H, T> {
    fn clone(&self) -> Self {
        Self {
            analysis: self.analysis.clone(),
            poster: self.poster.clone(),
        }
    }
}

pub type LivePipeline = Pipeline<VisionClient, PhotoHostingClient, TradingClient>;

impl LivePipeline {
    pub fn from_env() -> Result<Self, MappingError> {
        let normalizer = Arc::new(ListingFieldNormalizer::new(MappingTables::from_env()?));
        let trading = TradingConfig::from_env();
        let builder = MarketplaceRequestBuilder::new(
            normalizer,
            ListingDefaults::from_env(),
            trading.auth_token.clone(),
        );
        Ok(Self::new(
            AnalysisOrchestrator::new(
                Arc::new(VisionClient::new(VisionConfig::from_env())),
                Arc::new(PhotoHostingClient::new(HostingConfig::from_env())),
                env_u64("MAX_PHOTOS", 12) as usize,
            ),
            BatchPoster::new(
                Arc::new(TradingClient::new(trading)),
                Arc::new(builder),
                env_u64("BATCH_MAX_LISTINGS", 50) as usize,
            ),
        ))
    }
}

impl<V, H, T> Pipeline<V, H, T>
where
    V: VisionModel,
    H: PhotoHost,
    T: TradingApi,
{
    pub fn new(analysis: AnalysisOrchestrator<V, H>, poster: BatchPoster<T>) -> Self {
        Self {
            analysis: Arc::new(analysis),
            poster: Arc::new(poster),
        }
    }

    pub async fn analyze(
        &self,
        photos: &[Photo],
        prompt: &str,
    ) -> Result<AnalysisResult, PipelineError> {
        self.analysis.analyze(photos, prompt).await
    }

    pub fn extract_listing(&self, raw_response: &str) -> Result<ListingDraft, PipelineError> {
        llm::extract_listing(raw_response).map_err(|err| {
            PipelineError::parse("extract_listing", err.to_string(), err.raw())
        })
    }

    pub async fn post_listing(
        &self,
        listing: &PostableListing,
    ) -> Result<MarketplaceResult, PipelineError> {
        self.poster
            .post_listing(&listing.draft, &listing.photo_urls)
            .await
    }

    pub async fn post_all(
        &self,
        listings: &[PostableListing],
    ) -> Result<BatchSummary, PipelineError> {
        self.poster.post_all(listings).await
    }

    pub async fn post_all_chunked(
        &self,
        listings: &[PostableListing],
        chunk_size: usize,
        delay: Duration,
    ) -> Result<BatchSummary, PipelineError> {
        self.poster
            .post_all_chunked(listings, chunk_size, delay)
            .await
    }
}

#[derive(Debug, Error)]
#[error("stage `{stage}` failed: {message}")]
pub struct PipelineError {
    stage: &'static str,
    message: String,
    kind: PipelineErrorKind,
    raw: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    InvalidInput,
    Parse,
    Upstream,
    Conflict,
    Internal,
}

impl PipelineError {
    fn with_kind(stage: &'static str, message: impl Into<String>, kind: PipelineErrorKind) -> Self {
        Self {
            stage,
            message: message.into(),
            kind,
            raw: None,
        }
    }

    pub fn invalid_input(stage: &'static str, message: impl Into<String>) -> Self {
        Self::with_kind(stage, message, PipelineErrorKind::InvalidInput)
    }

    /// Keeps the text that failed to parse for diagnostics.
    pub fn parse(stage: &'static str, message: impl Into<String>, raw: impl Into<String>) -> Self {
        Self {
            raw: Some(raw.into()),
            ..Self::with_kind(stage, message, PipelineErrorKind::Parse)
        }
    }

    pub fn upstream(stage: &'static str, message: impl Into<String>) -> Self {
        Self::with_kind(stage, message, PipelineErrorKind::Upstream)
    }

    pub fn conflict(stage: &'static str, message: impl Into<String>) -> Self {
        Self::with_kind(stage, message, PipelineErrorKind::Conflict)
    }

    pub fn internal(stage: &'static str, message: impl Into<String>) -> Self {
        Self::with_kind(stage, message, PipelineErrorKind::Internal)
    }

    pub fn stage(&self) -> &'static str {
        self.stage
    }

    pub fn kind(&self) -> PipelineErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }

    pub fn raw(&self) -> Option<&str> {
        self.raw.as_deref()
    }
}
