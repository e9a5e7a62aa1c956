use crate::hosting::{PhotoHost, UploadOutcome};
use crate::llm::VisionModel;
use crate::metrics;
use crate::models::{AnalysisResult, HostedPhoto, Photo, StageReport};
use crate::pipeline::PipelineError;
use futures::FutureExt;
use futures::future::join_all;
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Runs the single vision call and the per-photo uploads side by side.
///
/// Both halves always settle before `analyze` returns. Upload failures are
/// recorded per photo and never fail the analysis; a failed vision call fails
/// the whole operation because there is no draft without model text.
pub struct AnalysisOrchestrator<V, H> {
    vision: Arc<V>,
    host: Arc<H>,
    max_photos: usize,
}

impl<V: VisionModel, H: PhotoHost> AnalysisOrchestrator<V, H> {
    pub fn new(vision: Arc<V>, host: Arc<H>, max_photos: usize) -> Self {
        Self {
            vision,
            host,
            max_photos,
        }
    }

    pub async fn analyze(
        &self,
        photos: &[Photo],
        prompt: &str,
    ) -> Result<AnalysisResult, PipelineError> {
        validate(photos, prompt, self.max_photos)?;

        let vision = async {
            let started = Instant::now();
            let reply = AssertUnwindSafe(self.vision.analyze(prompt, photos))
                .catch_unwind()
                .await;
            (reply, started.elapsed().as_millis())
        };
        let uploads = async {
            let started = Instant::now();
            let hosted = host_all(self.host.as_ref(), photos).await;
            (hosted, started.elapsed().as_millis())
        };
        let ((reply, vision_ms), (hosted_photos, host_ms)) = tokio::join!(vision, uploads);

        let hosted_count = hosted_photos.iter().filter(|p| p.is_hosted()).count();
        let failed_count = hosted_photos.len() - hosted_count;
        if failed_count > 0 {
            warn!(
                target = "relay.analysis",
                hosted = hosted_count,
                failed = failed_count,
                "some photos were not hosted"
            );
        }

        let raw_response = match reply {
            Ok(Ok(text)) => text,
            Ok(Err(err)) => {
                warn!(target = "relay.analysis", error = %err, "vision_analysis_failed");
                return Err(PipelineError::upstream("vision_analysis", err.to_string()));
            }
            Err(_) => {
                return Err(PipelineError::internal(
                    "vision_analysis",
                    "vision task panicked",
                ));
            }
        };
        debug!(target = "relay.analysis", raw = %raw_response, "vision_analysis_raw");

        metrics::stage_elapsed("vision_analysis", vision_ms);
        metrics::stage_elapsed("host_photos", host_ms);
        let stages = vec![
            StageReport::new(
                "vision_analysis",
                vision_ms,
                json!({ "photos": photos.len(), "chars": raw_response.chars().count() }),
            ),
            StageReport::new(
                "host_photos",
                host_ms,
                json!({ "count": hosted_photos.len(), "hosted": hosted_count, "failed": failed_count }),
            ),
        ];
        info!(
            target = "relay.analysis",
            photos = photos.len(),
            hosted = hosted_count,
            vision_ms = vision_ms as u64,
            host_ms = host_ms as u64,
            "analysis_complete"
        );

        Ok(AnalysisResult {
            raw_response,
            hosted_photos,
            stages,
        })
    }
}

fn validate(photos: &[Photo], prompt: &str, max_photos: usize) -> Result<(), PipelineError> {
    if photos.is_empty() {
        return Err(PipelineError::invalid_input("validate", "no photos provided"));
    }
    if prompt.trim().is_empty() {
        return Err(PipelineError::invalid_input("validate", "prompt is empty"));
    }
    if photos.len() > max_photos {
        return Err(PipelineError::invalid_input(
            "validate",
            format!("too many photos: {} (limit {max_photos})", photos.len()),
        ));
    }
    if let Some(index) = photos.iter().position(|photo| photo.data.is_empty()) {
        return Err(PipelineError::invalid_input(
            "validate",
            format!("photo {index} is empty"),
        ));
    }
    Ok(())
}

/// One upload per photo, all polled together. A panicking upload becomes a
/// failed entry for its own index only.
async fn host_all<H: PhotoHost>(host: &H, photos: &[Photo]) -> Vec<HostedPhoto> {
    let uploads = photos.iter().enumerate().map(|(index, photo)| async move {
        let settled = AssertUnwindSafe(host.upload(photo)).catch_unwind().await;
        let hosted = match settled {
            Ok(UploadOutcome {
                hosted_url: Some(url),
                ..
            }) => HostedPhoto::hosted(index, url),
            Ok(UploadOutcome { error, .. }) => HostedPhoto::failed(
                index,
                error.unwrap_or_else(|| "upload failed".to_string()),
            ),
            Err(_) => HostedPhoto::failed(index, "upload task panicked"),
        };
        metrics::photo_outcome(hosted.is_hosted());
        hosted
    });
    let mut hosted = join_all(uploads).await;
    hosted.sort_by_key(|photo| photo.index);
    hosted
}
