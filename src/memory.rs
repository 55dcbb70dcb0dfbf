//! Estimation of how many pieces a request must be split into to fit a RAM
//! budget.
//!
//! The estimate is extrapolated from a small sample: the pipeline is walked
//! over a sub-region centered on the request, with the bias scaled by the
//! ratio of request pixels to sample pixels. No pixel data is produced.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::StreamingConfig;
use crate::error::{OvrError, Result};
use crate::pipeline::{ExtractRegionNode, PipelineMemoryPrint, PipelineNode};
use crate::region::Region;

const MEGABYTE: u64 = 1 << 20;

/// Bytes available for a requested budget in MB; 0 selects the configured
/// default.
#[must_use]
pub fn actual_available_ram(requested_mb: u64, config: &StreamingConfig) -> u64 {
    let mb = if requested_mb == 0 {
        config.default_ram_mb
    } else {
        requested_mb
    };
    mb.saturating_mul(MEGABYTE)
}

/// `ceil(pipeline_bytes / available_bytes)`, at least 1. A zero budget means
/// no streaming.
#[must_use]
pub fn divisions_for(pipeline_bytes: u64, available_bytes: u64) -> u64 {
    if available_bytes == 0 {
        return 1;
    }
    pipeline_bytes.div_ceil(available_bytes).max(1)
}

/// Sample-based memory estimator
#[derive(Debug, Clone, Default)]
pub struct MemoryEstimator {
    config: StreamingConfig,
}

impl MemoryEstimator {
    #[must_use]
    pub fn new(config: StreamingConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    /// Estimated bytes the pipeline needs to materialize `region`.
    ///
    /// # Errors
    /// Returns [`OvrError::MemoryEstimation`] for an empty region.
    pub fn estimate_pipeline_bytes(
        &self,
        pipeline: &Arc<dyn PipelineNode>,
        region: Region,
        bias: f64,
    ) -> Result<u64> {
        if region.is_empty() {
            return Err(OvrError::MemoryEstimation(format!(
                "cannot estimate memory for empty region {region}"
            )));
        }

        let sample_pixels = self.config.sample_width * self.config.sample_height;
        let sample = if region.pixel_count() <= sample_pixels {
            None
        } else {
            region.centered_sample(self.config.sample_width, self.config.sample_height)
        };

        let Some(sample) = sample.filter(|s| !s.is_empty()) else {
            let print = PipelineMemoryPrint::evaluate(pipeline.as_ref(), region, 1.0);
            debug!(%region, bytes = print.total_bytes(), "Estimated memory on full region");
            return Ok(print.total_bytes());
        };

        let extract = ExtractRegionNode::new(Arc::clone(pipeline), sample);
        let sample_bytes = PipelineMemoryPrint::evaluate(&extract, sample, bias).total_bytes();

        #[allow(clippy::cast_precision_loss)]
        let trick_factor = region.pixel_count() as f64 / sample.pixel_count() as f64;
        let adjusted_bias = trick_factor * bias;
        let raw = PipelineMemoryPrint::evaluate(&extract, sample, adjusted_bias);
        let pipeline_bytes = raw.total_bytes().saturating_sub(raw.extraction_bytes());

        debug!(
            %region,
            %sample,
            sample_bytes,
            trick_factor,
            pipeline_bytes,
            "Estimated memory from sample"
        );
        Ok(pipeline_bytes)
    }

    /// Number of pieces needed so that each piece fits `available_bytes`.
    /// Degenerate input yields 1 (no streaming).
    #[must_use]
    pub fn estimate_optimal_number_of_divisions(
        &self,
        pipeline: &Arc<dyn PipelineNode>,
        region: Region,
        available_bytes: u64,
        bias: f64,
    ) -> u64 {
        match self.estimate_pipeline_bytes(pipeline, region, bias) {
            Ok(bytes) => divisions_for(bytes, available_bytes),
            Err(e) => {
                warn!(error = %e, "Memory estimation failed, processing in one piece");
                1
            }
        }
    }
}
