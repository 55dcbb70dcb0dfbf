//! Memory-accounting model of a processing graph.
//!
//! Pixel algorithms are external; a [`PipelineNode`] only describes what a
//! dry accounting walk needs: how large a buffer the node would allocate for
//! a requested region and which regions it would request from its inputs.
//! Graphs are acyclic and may share nodes between consumers.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use ovrs::pipeline::{NeighborhoodNode, PipelineMemoryPrint, PipelineNode, SourceNode};
//! use ovrs::{PixelType, Region};
//!
//! let source: Arc<dyn PipelineNode> =
//!     Arc::new(SourceNode::new("dem", Region::with_size(1000, 1000), 1, PixelType::F32));
//! let slope = Arc::new(NeighborhoodNode::new("slope", source, 1, 1, PixelType::F32));
//!
//! let print = PipelineMemoryPrint::evaluate(slope.as_ref(), Region::new(10, 10, 10, 10), 1.0);
//! // 10x10 output plus the padded 12x12 source, 4 bytes each
//! assert_eq!(print.total_bytes(), (100 + 144) * 4);
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use crate::raster::{PixelType, RasterInfo};
use crate::region::Region;

/// A node of a processing graph, seen by the memory estimator.
pub trait PipelineNode {
    fn name(&self) -> &str;

    /// Full extent this node can produce
    fn largest_region(&self) -> Region;

    /// Bytes of one output pixel across all bands
    fn bytes_per_pixel(&self) -> u64;

    fn inputs(&self) -> &[Arc<dyn PipelineNode>];

    /// Region requested from the inputs to produce `output`
    fn input_region(&self, output: &Region) -> Region {
        *output
    }

    /// True for the sampling step the estimator inserts
    fn is_extraction(&self) -> bool {
        false
    }
}

fn pixel_bytes(bands: usize, pixel_type: PixelType) -> u64 {
    bands as u64 * pixel_type.bytes_per_sample() as u64
}

/// Raster read from storage; a leaf of the graph
#[derive(Debug, Clone)]
pub struct SourceNode {
    name: String,
    extent: Region,
    bands: usize,
    pixel_type: PixelType,
}

impl SourceNode {
    #[must_use]
    pub fn new(name: impl Into<String>, extent: Region, bands: usize, pixel_type: PixelType) -> Self {
        Self {
            name: name.into(),
            extent,
            bands,
            pixel_type,
        }
    }

    /// Leaf node describing an opened raster
    #[must_use]
    pub fn from_info(name: impl Into<String>, info: &RasterInfo) -> Self {
        Self::new(name, info.bounds(), info.bands, info.pixel_type)
    }
}

impl PipelineNode for SourceNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn largest_region(&self) -> Region {
        self.extent
    }

    fn bytes_per_pixel(&self) -> u64 {
        pixel_bytes(self.bands, self.pixel_type)
    }

    fn inputs(&self) -> &[Arc<dyn PipelineNode>] {
        &[]
    }
}

/// Per-pixel function of one or more co-registered inputs
pub struct PixelwiseNode {
    name: String,
    inputs: Vec<Arc<dyn PipelineNode>>,
    bands: usize,
    pixel_type: PixelType,
}

impl PixelwiseNode {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        inputs: Vec<Arc<dyn PipelineNode>>,
        bands: usize,
        pixel_type: PixelType,
    ) -> Self {
        Self {
            name: name.into(),
            inputs,
            bands,
            pixel_type,
        }
    }
}

impl PipelineNode for PixelwiseNode {
    fn name(&self) -> &str {
        &self.name
    }

    /// Intersection of the inputs' extents
    fn largest_region(&self) -> Region {
        let mut iter = self.inputs.iter().map(|n| n.largest_region());
        let Some(first) = iter.next() else {
            return Region::default();
        };
        iter.fold(first, |acc, r| acc.crop(&r).unwrap_or_default())
    }

    fn bytes_per_pixel(&self) -> u64 {
        pixel_bytes(self.bands, self.pixel_type)
    }

    fn inputs(&self) -> &[Arc<dyn PipelineNode>] {
        &self.inputs
    }
}

/// Filter reading a square neighborhood of `radius` around each pixel
pub struct NeighborhoodNode {
    name: String,
    inputs: [Arc<dyn PipelineNode>; 1],
    radius: u64,
    bands: usize,
    pixel_type: PixelType,
}

impl NeighborhoodNode {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        input: Arc<dyn PipelineNode>,
        radius: u64,
        bands: usize,
        pixel_type: PixelType,
    ) -> Self {
        Self {
            name: name.into(),
            inputs: [input],
            radius,
            bands,
            pixel_type,
        }
    }
}

impl PipelineNode for NeighborhoodNode {
    fn name(&self) -> &str {
        &self.name
    }

    fn largest_region(&self) -> Region {
        self.inputs[0].largest_region()
    }

    fn bytes_per_pixel(&self) -> u64 {
        pixel_bytes(self.bands, self.pixel_type)
    }

    fn inputs(&self) -> &[Arc<dyn PipelineNode>] {
        &self.inputs
    }

    fn input_region(&self, output: &Region) -> Region {
        output.pad(self.radius)
    }
}

/// Crop of its input to a fixed region (same coordinate frame)
pub struct ExtractRegionNode {
    inputs: [Arc<dyn PipelineNode>; 1],
    region: Region,
}

impl ExtractRegionNode {
    #[must_use]
    pub fn new(input: Arc<dyn PipelineNode>, region: Region) -> Self {
        Self {
            inputs: [input],
            region,
        }
    }
}

impl PipelineNode for ExtractRegionNode {
    fn name(&self) -> &str {
        "extract"
    }

    fn largest_region(&self) -> Region {
        self.inputs[0]
            .largest_region()
            .crop(&self.region)
            .unwrap_or_default()
    }

    fn bytes_per_pixel(&self) -> u64 {
        self.inputs[0].bytes_per_pixel()
    }

    fn inputs(&self) -> &[Arc<dyn PipelineNode>] {
        &self.inputs
    }

    fn input_region(&self, output: &Region) -> Region {
        output.crop(&self.region).unwrap_or_default()
    }

    fn is_extraction(&self) -> bool {
        true
    }
}

/// Bytes attributed to one node during a walk
#[derive(Debug, Clone, PartialEq)]
pub struct NodePrint {
    pub name: String,
    pub region: Region,
    pub bytes: u64,
    pub is_extraction: bool,
}

/// Result of a dry accounting walk
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineMemoryPrint {
    nodes: Vec<NodePrint>,
}

impl PipelineMemoryPrint {
    /// Walk the graph from `root` as if `region` were requested from it.
    ///
    /// Each node contributes `pixels(requested ∩ largest) * bytes_per_pixel * bias`
    /// once per walk; shared nodes are counted at their first visit.
    #[must_use]
    pub fn evaluate(root: &dyn PipelineNode, region: Region, bias: f64) -> Self {
        let mut print = Self::default();
        let mut visited = HashSet::new();
        print.visit(root, region, bias, &mut visited);
        print
    }

    fn visit(
        &mut self,
        node: &dyn PipelineNode,
        requested: Region,
        bias: f64,
        visited: &mut HashSet<*const ()>,
    ) {
        let id = std::ptr::from_ref(node).cast::<()>();
        if !visited.insert(id) {
            return;
        }
        let Some(region) = requested.crop(&node.largest_region()) else {
            return;
        };

        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let bytes = (region.pixel_count() as f64 * node.bytes_per_pixel() as f64 * bias).ceil() as u64;
        self.nodes.push(NodePrint {
            name: node.name().to_string(),
            region,
            bytes,
            is_extraction: node.is_extraction(),
        });

        let upstream = node.input_region(&region);
        for input in node.inputs() {
            self.visit(input.as_ref(), upstream, bias, visited);
        }
    }

    #[must_use]
    pub fn total_bytes(&self) -> u64 {
        self.nodes.iter().map(|n| n.bytes).sum()
    }

    /// Bytes attributed to extraction nodes
    #[must_use]
    pub fn extraction_bytes(&self) -> u64 {
        self.nodes
            .iter()
            .filter(|n| n.is_extraction)
            .map(|n| n.bytes)
            .sum()
    }

    #[must_use]
    pub fn nodes(&self) -> &[NodePrint] {
        &self.nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(w: u64, h: u64) -> Arc<dyn PipelineNode> {
        Arc::new(SourceNode::new("src", Region::with_size(w, h), 3, PixelType::U16))
    }

    #[test]
    fn test_single_source() {
        let src = source(100, 100);
        let print = PipelineMemoryPrint::evaluate(src.as_ref(), Region::with_size(10, 10), 1.0);
        assert_eq!(print.total_bytes(), 10 * 10 * 6);
    }

    #[test]
    fn test_request_clipped_to_extent() {
        let src = source(100, 100);
        let print = PipelineMemoryPrint::evaluate(src.as_ref(), Region::new(90, 90, 20, 20), 1.0);
        assert_eq!(print.total_bytes(), 10 * 10 * 6);
        let none = PipelineMemoryPrint::evaluate(src.as_ref(), Region::new(200, 0, 5, 5), 1.0);
        assert_eq!(none.total_bytes(), 0);
    }

    #[test]
    fn test_shared_node_counted_once() {
        let src = source(50, 50);
        let a: Arc<dyn PipelineNode> =
            Arc::new(PixelwiseNode::new("a", vec![Arc::clone(&src)], 1, PixelType::F32));
        let b: Arc<dyn PipelineNode> =
            Arc::new(PixelwiseNode::new("b", vec![Arc::clone(&src)], 1, PixelType::F32));
        let merge = PixelwiseNode::new("merge", vec![a, b], 1, PixelType::F64);

        let print = PipelineMemoryPrint::evaluate(&merge, Region::with_size(10, 10), 1.0);
        assert_eq!(print.nodes().len(), 4);
        assert_eq!(print.total_bytes(), 100 * (8 + 4 + 4 + 6));
    }

    #[test]
    fn test_bias_scales_every_node() {
        let src = source(100, 100);
        let node = PixelwiseNode::new("ndvi", vec![src], 1, PixelType::F32);
        let one = PipelineMemoryPrint::evaluate(&node, Region::with_size(10, 10), 1.0);
        let four = PipelineMemoryPrint::evaluate(&node, Region::with_size(10, 10), 4.0);
        assert_eq!(four.total_bytes(), one.total_bytes() * 4);
    }

    #[test]
    fn test_extraction_bytes() {
        let src = source(100, 100);
        let extract = ExtractRegionNode::new(src, Region::new(45, 45, 10, 10));
        let print = PipelineMemoryPrint::evaluate(&extract, Region::new(45, 45, 10, 10), 1.0);
        assert_eq!(print.extraction_bytes(), 600);
        assert_eq!(print.total_bytes(), 1200);
    }
}
