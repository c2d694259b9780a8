//! Batch statistics over glTF files
//!
//! Every animation of every input is compressed on the rayon pool. Failures are
//! recorded per clip and never stop the batch.

use nether_acl::{CompressionStats, ConvergenceWarning};
use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::config::ToolConfig;
use crate::gltf_import::list_animations;

/// Outcome of compressing one animation
#[derive(Debug, Clone, Serialize)]
pub struct ClipReport {
    pub file: PathBuf,
    pub animation: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<CompressionStats>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<ConvergenceWarning>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Statistics of a whole batch
#[derive(Debug, Clone, Default, Serialize)]
pub struct StatsReport {
    pub clips: Vec<ClipReport>,
    pub total_raw_size: usize,
    pub total_compressed_size: usize,
    pub worst_error: f32,
    pub failures: usize,
}

impl StatsReport {
    /// Aggregate compression ratio over every successful clip
    pub fn compression_ratio(&self) -> f32 {
        if self.total_compressed_size == 0 {
            0.0
        } else {
            self.total_raw_size as f32 / self.total_compressed_size as f32
        }
    }
}

fn compress_one(file: &Path, animation: usize, config: &ToolConfig) -> ClipReport {
    match crate::compress_gltf(file, Some(animation), None, config) {
        Ok(output) => ClipReport {
            file: file.to_path_buf(),
            animation,
            stats: Some(output.stats),
            warnings: output.warnings,
            error: None,
        },
        Err(e) => ClipReport {
            file: file.to_path_buf(),
            animation,
            stats: None,
            warnings: Vec::new(),
            error: Some(format!("{:#}", e)),
        },
    }
}

/// Compress every animation of every input file and collect the results
pub fn collect_stats(inputs: &[PathBuf], config: &ToolConfig) -> StatsReport {
    let mut jobs = Vec::new();
    let mut report = StatsReport::default();

    for file in inputs {
        match list_animations(file) {
            Ok(animations) => {
                jobs.extend(animations.iter().map(|a| (file.clone(), a.index)));
            }
            Err(e) => {
                tracing::warn!("Skipping {:?}: {:#}", file, e);
                report.failures += 1;
                report.clips.push(ClipReport {
                    file: file.clone(),
                    animation: 0,
                    stats: None,
                    warnings: Vec::new(),
                    error: Some(format!("{:#}", e)),
                });
            }
        }
    }

    let clips: Vec<ClipReport> = jobs
        .par_iter()
        .map(|(file, animation)| compress_one(file, *animation, config))
        .collect();

    for clip in clips {
        match &clip.stats {
            Some(stats) => {
                report.total_raw_size += stats.raw_size;
                report.total_compressed_size += stats.compressed_size;
                report.worst_error = report.worst_error.max(stats.max_error.error);
            }
            None => report.failures += 1,
        }
        report.clips.push(clip);
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_reported() {
        let inputs = vec![PathBuf::from("does/not/exist.gltf")];
        let report = collect_stats(&inputs, &ToolConfig::default());
        assert_eq!(report.failures, 1);
        assert_eq!(report.clips.len(), 1);
        assert!(report.clips[0].error.is_some());
        assert_eq!(report.compression_ratio(), 0.0);
    }
}
