//! Piecewise execution of a region under a memory budget.
//!
//! A [`StreamingCoordinator`] turns a [`StreamingMode`] into a [`SplitPlan`]
//! (asking the [`MemoryEstimator`] when the mode is RAM-driven) and then walks
//! the pieces one after another.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use ovrs::pipeline::{PipelineNode, SourceNode};
//! use ovrs::streaming::{StreamingCoordinator, StreamingMode};
//! use ovrs::{AbortSignal, PixelType, Region, StreamingConfig};
//!
//! let region = Region::with_size(4000, 3000);
//! let source: Arc<dyn PipelineNode> = Arc::new(SourceNode::new("in", region, 3, PixelType::U8));
//!
//! let coordinator = StreamingCoordinator::new(
//!     StreamingMode::RamDrivenStripped { ram_mb: 8, bias: None },
//!     StreamingConfig::default(),
//! );
//! let plan = coordinator.prepare(&source, region)?;
//! assert_eq!(plan.number_of_splits(), 5);
//!
//! let mut rows = 0;
//! coordinator.run(&plan, &AbortSignal::new(), &mut |_: &ovrs::ProgressEvent| {}, |_, piece| {
//!     rows += piece.height;
//!     Ok(())
//! })?;
//! assert_eq!(rows, 3000);
//! # Ok::<(), ovrs::OvrError>(())
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::StreamingConfig;
use crate::error::{OvrError, Result};
use crate::memory::{MemoryEstimator, actual_available_ram};
use crate::pipeline::PipelineNode;
use crate::progress::{AbortSignal, ProgressEvent, ProgressListener};
use crate::region::Region;
use crate::splitter::{RegionSplitter, SplitPlan, SquareTileSplitter, StripSplitter};

/// How a region is divided for streaming
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum StreamingMode {
    /// A fixed number of horizontal strips
    DivisionsStripped(u64),
    /// A fixed number of square tiles
    DivisionsTiled(u64),
    /// Strips of at most this many lines
    LinesStripped(u64),
    /// Strips sized from a RAM budget in MB (0 = default budget). A `None`
    /// bias takes `StreamingConfig::default_bias`.
    RamDrivenStripped { ram_mb: u64, bias: Option<f64> },
    /// Tiles sized from a RAM budget, aligned to `tile_hint` when non-zero
    RamDrivenTiled {
        ram_mb: u64,
        bias: Option<f64>,
        tile_hint: u64,
    },
    /// Square tiles with this edge length
    TileDimensionTiled(u64),
}

/// Plans and drives piecewise processing of one region.
#[derive(Debug, Clone)]
pub struct StreamingCoordinator {
    mode: StreamingMode,
    estimator: MemoryEstimator,
}

impl StreamingCoordinator {
    #[must_use]
    pub fn new(mode: StreamingMode, config: StreamingConfig) -> Self {
        Self {
            mode,
            estimator: MemoryEstimator::new(config),
        }
    }

    #[must_use]
    pub fn mode(&self) -> StreamingMode {
        self.mode
    }

    /// Compute the split plan for `region`. The pipeline is only consulted by
    /// RAM-driven modes.
    ///
    /// # Errors
    /// Returns a configuration error for a zero line count or tile edge.
    pub fn prepare(&self, pipeline: &Arc<dyn PipelineNode>, region: Region) -> Result<SplitPlan> {
        let plan = match self.mode {
            StreamingMode::DivisionsStripped(n) => StripSplitter.plan(region, n),
            StreamingMode::DivisionsTiled(n) => SquareTileSplitter::default().plan(region, n),
            StreamingMode::LinesStripped(lines) => {
                if lines == 0 {
                    return Err(OvrError::Configuration(
                        "number of lines per strip must be positive".into(),
                    ));
                }
                StripSplitter.plan(region, region.height.div_ceil(lines))
            }
            StreamingMode::RamDrivenStripped { ram_mb, bias } => {
                let n = self.ram_driven_divisions(pipeline, region, ram_mb, bias);
                StripSplitter.plan(region, n)
            }
            StreamingMode::RamDrivenTiled {
                ram_mb,
                bias,
                tile_hint,
            } => {
                let n = self.ram_driven_divisions(pipeline, region, ram_mb, bias);
                SquareTileSplitter::with_tile_hint(tile_hint).plan(region, n)
            }
            StreamingMode::TileDimensionTiled(edge) => {
                if edge == 0 {
                    return Err(OvrError::Configuration("tile dimension must be positive".into()));
                }
                SquareTileSplitter::default().plan_with_side(region, edge)
            }
        };
        debug!(
            mode = ?self.mode,
            %region,
            pieces = plan.number_of_splits(),
            "Prepared streaming plan"
        );
        Ok(plan)
    }

    fn ram_driven_divisions(
        &self,
        pipeline: &Arc<dyn PipelineNode>,
        region: Region,
        ram_mb: u64,
        bias: Option<f64>,
    ) -> u64 {
        let config = self.estimator.config();
        let available = actual_available_ram(ram_mb, config);
        let bias = bias.unwrap_or(config.default_bias);
        self.estimator
            .estimate_optimal_number_of_divisions(pipeline, region, available, bias)
    }

    /// Call `process(index, piece)` for every piece in order. Cancellation is
    /// checked before each piece.
    ///
    /// # Errors
    /// Returns [`OvrError::Aborted`] when cancelled, or the first error
    /// returned by `process`.
    pub fn run<F>(
        &self,
        plan: &SplitPlan,
        abort: &AbortSignal,
        progress: &mut dyn ProgressListener,
        mut process: F,
    ) -> Result<()>
    where
        F: FnMut(u64, Region) -> Result<()>,
    {
        let total = plan.number_of_splits();
        for index in 0..total {
            if abort.is_aborted() {
                info!(piece = index, total, "Streaming aborted by caller");
                return Err(OvrError::Aborted);
            }
            let piece = plan.split(index)?;
            process(index, piece)?;

            #[allow(clippy::cast_precision_loss)]
            let percent = (index + 1) as f64 / total as f64 * 100.0;
            progress.on_progress(&ProgressEvent::new("streaming...", None, percent));
        }
        Ok(())
    }
}
