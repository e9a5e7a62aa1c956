use crate::ebay::{MarketplaceRequestBuilder, TradingApi, parse_response};
use crate::metrics;
use crate::models::{BatchEntry, BatchSummary, ListingDraft, MarketplaceResult, PostFailure, PostableListing};
use crate::pipeline::PipelineError;
use futures::FutureExt;
use futures::future::join_all;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::time::{Duration, sleep};
use tracing::{debug, info, warn};
use uuid::Uuid;

const MISSING_PHOTOS: &str = "listing has no hosted photos";

/// Builds, submits and parses one Trading API call per listing.
///
/// A batch never fails because of one listing: missing photos, invalid
/// drafts and marketplace rejections all land in that listing's entry.
pub struct BatchPoster<T> {
    trading: Arc<T>,
    builder: Arc<MarketplaceRequestBuilder>,
    max_listings: usize,
}

impl<T: TradingApi> BatchPoster<T> {
    pub fn new(trading: Arc<T>, builder: Arc<MarketplaceRequestBuilder>, max_listings: usize) -> Self {
        Self {
            trading,
            builder,
            max_listings,
        }
    }

    /// Posts a single listing. Input problems are errors; anything the
    /// marketplace or the transport says comes back as a result.
    pub async fn post_listing(
        &self,
        draft: &ListingDraft,
        photo_urls: &[String],
    ) -> Result<MarketplaceResult, PipelineError> {
        validate_draft(draft).map_err(|msg| PipelineError::invalid_input("post_listing", msg))?;
        let urls = clean_urls(photo_urls);
        if urls.is_empty() {
            return Err(PipelineError::invalid_input("post_listing", MISSING_PHOTOS));
        }
        Ok(self.submit(draft, &urls).await)
    }

    pub async fn post_all(&self, listings: &[PostableListing]) -> Result<BatchSummary, PipelineError> {
        self.check_batch(listings)?;
        let entries = self.post_group(listings, 0).await;
        Ok(summarize(entries))
    }

    /// Same as [`post_all`](Self::post_all) but `chunk_size` listings at a
    /// time with `delay` between chunks.
    pub async fn post_all_chunked(
        &self,
        listings: &[PostableListing],
        chunk_size: usize,
        delay: Duration,
    ) -> Result<BatchSummary, PipelineError> {
        self.check_batch(listings)?;
        if chunk_size == 0 {
            return Err(PipelineError::invalid_input(
                "post_all",
                "chunk_size must be at least 1",
            ));
        }
        let mut entries = Vec::with_capacity(listings.len());
        for (chunk_index, chunk) in listings.chunks(chunk_size).enumerate() {
            if chunk_index > 0 && !delay.is_zero() {
                sleep(delay).await;
            }
            debug!(target = "relay.batch", chunk = chunk_index, size = chunk.len(), "posting_chunk");
            entries.extend(self.post_group(chunk, chunk_index * chunk_size).await);
        }
        Ok(summarize(entries))
    }

    fn check_batch(&self, listings: &[PostableListing]) -> Result<(), PipelineError> {
        if listings.is_empty() {
            return Err(PipelineError::invalid_input("post_all", "no listings provided"));
        }
        if listings.len() > self.max_listings {
            return Err(PipelineError::invalid_input(
                "post_all",
                format!(
                    "too many listings: {} (limit {})",
                    listings.len(),
                    self.max_listings
                ),
            ));
        }
        Ok(())
    }

    /// `join_all` yields outputs in input order, so `offset + i` is both the
    /// entry index and its position.
    async fn post_group(&self, listings: &[PostableListing], offset: usize) -> Vec<BatchEntry> {
        join_all(
            listings
                .iter()
                .enumerate()
                .map(|(i, listing)| self.post_entry(offset + i, listing)),
        )
        .await
    }

    async fn post_entry(&self, index: usize, listing: &PostableListing) -> BatchEntry {
        let title = listing.draft.title.clone();
        let urls = listing.valid_photo_urls();
        if urls.is_empty() {
            warn!(target = "relay.batch", index, "listing_missing_photos");
            metrics::listing_outcome(false);
            return BatchEntry {
                index,
                title,
                failure: Some(PostFailure::MissingPhotos),
                result: MarketplaceResult::failure(MISSING_PHOTOS, ""),
            };
        }
        if let Err(msg) = validate_draft(&listing.draft) {
            metrics::listing_outcome(false);
            return BatchEntry {
                index,
                title,
                failure: Some(PostFailure::InvalidListing),
                result: MarketplaceResult::failure(msg, ""),
            };
        }

        let result = AssertUnwindSafe(self.submit(&listing.draft, &urls))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| MarketplaceResult::failure("posting task panicked", ""));
        BatchEntry {
            index,
            title,
            failure: (!result.success).then_some(PostFailure::Marketplace),
            result,
        }
    }

    async fn submit(&self, draft: &ListingDraft, urls: &[String]) -> MarketplaceResult {
        let request = self.builder.build(draft, urls);
        debug!(
            target = "relay.trading",
            variant = ?request.variant,
            category = %request.category.code,
            condition = %request.condition_id,
            "submitting_listing"
        );
        let result = match self.trading.submit(request.call_name, request.xml).await {
            Ok(body) => parse_response(&body),
            Err(err) => MarketplaceResult::failure(err.to_string(), ""),
        };
        if result.success {
            info!(target = "relay.trading", item_id = ?result.item_id, "listing_posted");
        } else {
            warn!(target = "relay.trading", error = ?result.error, "listing_rejected");
        }
        metrics::listing_outcome(result.success);
        result
    }
}

fn validate_draft(draft: &ListingDraft) -> Result<(), String> {
    if draft.title.trim().is_empty() {
        return Err("listing title is empty".into());
    }
    if !draft.price.is_finite() || draft.price <= 0.0 {
        return Err(format!("listing price must be positive, got {}", draft.price));
    }
    Ok(())
}

fn clean_urls(urls: &[String]) -> Vec<String> {
    urls.iter()
        .map(|url| url.trim())
        .filter(|url| !url.is_empty())
        .map(str::to_string)
        .collect()
}

fn summarize(results: Vec<BatchEntry>) -> BatchSummary {
    let successful = results.iter().filter(|entry| entry.result.success).count();
    let summary = BatchSummary {
        batch_id: Uuid::new_v4().to_string(),
        total: results.len(),
        successful,
        failed: results.len() - successful,
        results,
    };
    info!(
        target = "relay.batch",
        batch_id = %summary.batch_id,
        total = summary.total,
        successful = summary.successful,
        failed = summary.failed,
        "batch_complete"
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ebay::{ListingDefaults, ListingFieldNormalizer};
    use crate::pipeline::PipelineErrorKind;
    use crate::pipeline::fakes::FakeTrading;

    fn poster(trading: FakeTrading) -> BatchPoster<FakeTrading> {
        let builder = MarketplaceRequestBuilder::new(
            Arc::new(ListingFieldNormalizer::default()),
            ListingDefaults::default(),
            "token",
        );
        BatchPoster::new(Arc::new(trading), Arc::new(builder), 10)
    }

    fn listing(title: &str, photos: usize) -> PostableListing {
        PostableListing {
            draft: serde_json::from_value(serde_json::json!({
                "title": title,
                "price": 9.99,
                "condition": "Good",
            }))
            .unwrap(),
            photo_urls: (0..photos)
                .map(|i| format!("https://img.example.com/{title}-{i}.jpg"))
                .collect(),
        }
    }

    #[tokio::test]
    async fn missing_photos_fail_without_network() {
        let poster = poster(FakeTrading::succeeding());
        let listings = vec![
            listing("L0", 2),
            listing("L1", 0),
            listing("L2", 1),
            listing("L3", 0),
            listing("L4", 3),
        ];
        let summary = poster.post_all(&listings).await.unwrap();

        assert_eq!(summary.total, 5);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.successful, 3);
        let titles: Vec<&str> = summary.results.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["L0", "L1", "L2", "L3", "L4"]);
        let indices: Vec<usize> = summary.results.iter().map(|e| e.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
        assert_eq!(summary.results[1].failure, Some(PostFailure::MissingPhotos));
        assert_eq!(summary.results[3].failure, Some(PostFailure::MissingPhotos));
        assert_eq!(poster.trading.calls(), 3);
        assert!(!summary.batch_id.is_empty());
    }

    #[tokio::test]
    async fn blank_urls_count_as_missing() {
        let poster = poster(FakeTrading::succeeding());
        let mut entry = listing("Blank", 0);
        entry.photo_urls = vec!["  ".into(), String::new()];
        let summary = poster.post_all(&[entry]).await.unwrap();
        assert_eq!(summary.results[0].failure, Some(PostFailure::MissingPhotos));
        assert_eq!(poster.trading.calls(), 0);
    }

    #[tokio::test]
    async fn marketplace_rejection_is_per_listing() {
        let failure = "<Ack>Failure</Ack><Errors><LongMessage>Bad category</LongMessage></Errors>";
        let poster = poster(FakeTrading::with_reply(Ok(failure.to_string())));
        let summary = poster
            .post_all(&[listing("A", 1), listing("B", 1)])
            .await
            .unwrap();
        assert_eq!(summary.failed, 2);
        let entry = &summary.results[0];
        assert_eq!(entry.failure, Some(PostFailure::Marketplace));
        assert_eq!(entry.result.error.as_deref(), Some("Bad category"));
        assert_eq!(entry.result.raw, failure);
    }

    #[tokio::test]
    async fn transport_error_becomes_a_failed_result() {
        let poster = poster(FakeTrading::with_reply(Err(503)));
        let result = poster
            .post_listing(&listing("A", 1).draft, &["https://img.example.com/a.jpg".into()])
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("HTTP 503"));
    }

    #[tokio::test]
    async fn post_listing_rejects_bad_input() {
        let poster = poster(FakeTrading::succeeding());
        let no_photos = listing("A", 0);
        let err = poster
            .post_listing(&no_photos.draft, &no_photos.photo_urls)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), PipelineErrorKind::InvalidInput);

        let mut free = listing("Free", 1);
        free.draft.price = 0.0;
        let err = poster
            .post_listing(&free.draft, &free.photo_urls)
            .await
            .unwrap_err();
        assert!(err.detail().contains("price"));
        assert_eq!(poster.trading.calls(), 0);
    }

    #[tokio::test]
    async fn invalid_draft_in_batch_does_not_block_others() {
        let poster = poster(FakeTrading::succeeding());
        let mut untitled = listing("", 1);
        untitled.draft.title = "  ".into();
        let summary = poster
            .post_all(&[untitled, listing("Ok", 1)])
            .await
            .unwrap();
        assert_eq!(summary.results[0].failure, Some(PostFailure::InvalidListing));
        assert!(summary.results[1].result.success);
        assert_eq!(poster.trading.calls(), 1);
    }

    #[tokio::test]
    async fn empty_and_oversized_batches_are_rejected() {
        let poster = poster(FakeTrading::succeeding());
        assert!(poster.post_all(&[]).await.is_err());
        let many: Vec<_> = (0..11).map(|i| listing(&format!("L{i}"), 1)).collect();
        let err = poster.post_all(&many).await.unwrap_err();
        assert!(err.detail().contains("too many listings"));
    }

    #[tokio::test]
    async fn chunked_posting_keeps_order_and_indices() {
        let poster = poster(FakeTrading::succeeding());
        let listings: Vec<_> = (0..5).map(|i| listing(&format!("L{i}"), 1)).collect();
        let summary = poster
            .post_all_chunked(&listings, 2, Duration::from_millis(5))
            .await
            .unwrap();

        assert_eq!(summary.successful, 5);
        let indices: Vec<usize> = summary.results.iter().map(|e| e.index).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);

        let received = poster.trading.received.lock().unwrap();
        assert_eq!(received.len(), 5);
        let first_chunk = &received[..2];
        assert!(first_chunk.iter().any(|xml| xml.contains("<Title>L0</Title>")));
        assert!(first_chunk.iter().any(|xml| xml.contains("<Title>L1</Title>")));
        assert!(received[4].contains("<Title>L4</Title>"));
    }

    #[tokio::test]
    async fn listings_in_a_batch_are_posted_concurrently() {
        let poster = poster(FakeTrading::succeeding());
        let listings: Vec<_> = (0..4).map(|i| listing(&format!("L{i}"), 1)).collect();
        poster.post_all(&listings).await.unwrap();
        assert_eq!(poster.trading.max_in_flight(), 4);
    }

    #[tokio::test]
    async fn chunks_bound_the_listings_in_flight() {
        let poster = poster(FakeTrading::succeeding());
        let listings: Vec<_> = (0..5).map(|i| listing(&format!("L{i}"), 1)).collect();
        poster
            .post_all_chunked(&listings, 2, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(poster.trading.max_in_flight(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_time_is_one_round_trip_not_the_sum() {
        let poster = poster(FakeTrading::succeeding());
        let listings: Vec<_> = (0..5).map(|i| listing(&format!("L{i}"), 1)).collect();
        let started = tokio::time::Instant::now();
        poster.post_all(&listings).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(20));
    }

    #[tokio::test]
    async fn chunk_size_zero_is_invalid() {
        let poster = poster(FakeTrading::succeeding());
        let err = poster
            .post_all_chunked(&[listing("A", 1)], 0, Duration::ZERO)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), PipelineErrorKind::InvalidInput);
    }
}
