//! `.omd` metadata sidecar written next to a pyramid.
//!
//! The sidecar is a JSON object. Writing merges into an existing sidecar:
//! keys owned by this crate are replaced, anything else is preserved.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{OvrError, Result};
use crate::raster::{BandStats, PixelType};

/// Per-pyramid metadata record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PyramidMetadata {
    pub pixel_type: PixelType,
    pub number_of_bands: usize,
    pub bands: Vec<BandStats>,
}

/// Sidecar location for an output file: the extension replaced by `omd`
#[must_use]
pub fn sidecar_path(output: &Path) -> PathBuf {
    output.with_extension("omd")
}

/// Write `metadata` to `path`, merging with an existing sidecar.
///
/// # Errors
/// Returns an I/O error if the sidecar cannot be written.
pub fn write_or_merge(path: &Path, metadata: &PyramidMetadata) -> Result<()> {
    let mut record = match std::fs::read_to_string(path) {
        Ok(text) => match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => map,
            _ => {
                warn!(path = %path.display(), "Existing sidecar is not a JSON object, replacing it");
                Map::new()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
        Err(e) => return Err(OvrError::io(format!("reading {}", path.display()), e)),
    };

    if let Value::Object(fields) = serde_json::to_value(metadata)? {
        record.extend(fields);
    }

    let text = serde_json::to_string_pretty(&Value::Object(record))?;
    std::fs::write(path, text)
        .map_err(|e| OvrError::io(format!("writing {}", path.display()), e))?;
    debug!(path = %path.display(), bands = metadata.number_of_bands, "Wrote sidecar");
    Ok(())
}

/// Read the record back, `None` if there is no sidecar.
///
/// # Errors
/// Returns an error if the sidecar exists but cannot be read or parsed.
pub fn read(path: &Path) -> Result<Option<PyramidMetadata>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(serde_json::from_str(&text)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(OvrError::io(format!("reading {}", path.display()), e)),
    }
}
