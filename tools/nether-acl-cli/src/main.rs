//! nether-acl - Nethercore animation compression tool
//!
//! Compresses glTF skeletal animations into error-bounded `.nacl` clips and
//! reports codec statistics.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use nether_acl::CLIP_EXTENSION;
use nether_acl_cli::{
    ClipSummary, collect_stats, convert_gltf_clip, inspect_clip, list_animations, load_config,
};

#[derive(Parser)]
#[command(name = "nether-acl")]
#[command(about = "Nethercore animation compression tool")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress an animation clip from glTF
    Compress {
        /// Input glTF/GLB file
        input: PathBuf,

        /// Output .nacl file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Settings file (settings.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Animation index (default: first animation)
        #[arg(short, long)]
        animation: Option<usize>,

        /// Skin index (default: first skin)
        #[arg(short, long)]
        skin: Option<usize>,

        /// Frame rate for sampling (overrides the config)
        #[arg(short, long)]
        frame_rate: Option<f32>,

        /// Error threshold in object-space units (overrides the config)
        #[arg(short, long)]
        threshold: Option<f32>,

        /// List available animations instead of compressing
        #[arg(long)]
        list: bool,
    },

    /// Validate a .nacl file and print its layout
    Inspect {
        /// Input .nacl file
        clip: PathBuf,
    },

    /// Compress every animation of the inputs and print statistics
    Stats {
        /// Input glTF/GLB files
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Settings file (settings.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Also write the report as JSON to this file
        #[arg(long)]
        json: Option<PathBuf>,
    },
}

fn print_summary(summary: &ClipSummary) {
    println!("  Size:       {} bytes", summary.size);
    println!("  Bones:      {}", summary.num_bones);
    println!("  Curves:     {}", summary.num_curves);
    println!(
        "  Samples:    {} @ {} Hz ({:.3}s)",
        summary.num_samples, summary.sample_rate, summary.duration
    );
    println!(
        "  Segments:   {} ({} bits per frame)",
        summary.segments, summary.frame_bit_size
    );
    println!(
        "  Tracks:     {} animated, {} constant, {} default",
        summary.animated_tracks, summary.constant_tracks, summary.default_tracks
    );
    for (rate, count) in summary.bit_rates.iter().enumerate() {
        if *count > 0 {
            println!("    rate {:>2}: {}", rate, count);
        }
    }
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Compress {
            input,
            output,
            config,
            animation,
            skin,
            frame_rate,
            threshold,
            list,
        } => {
            if list {
                for info in list_animations(&input)? {
                    println!(
                        "  [{}] {} ({} channels, {:.3}s)",
                        info.index, info.name, info.channel_count, info.duration
                    );
                }
                return Ok(());
            }

            let mut config = load_config(config.as_deref())?;
            if let Some(rate) = frame_rate {
                if !(rate.is_finite() && rate > 0.0) {
                    anyhow::bail!("Invalid frame rate: {}", rate);
                }
                config.frame_rate = rate;
            }
            if let Some(threshold) = threshold {
                config.settings.error_threshold = threshold;
            }

            let output = output.unwrap_or_else(|| input.with_extension(CLIP_EXTENSION));
            tracing::info!("Compressing {:?} -> {:?}", input, output);
            let result = convert_gltf_clip(&input, &output, animation, skin, &config)?;
            let stats = &result.stats;
            tracing::info!(
                "'{}': {} -> {} bytes ({:.2}x), max error {:.6} on bone {}",
                stats.clip_name,
                stats.raw_size,
                stats.compressed_size,
                stats.compression_ratio,
                stats.max_error.error,
                stats.max_error.bone_index
            );
            tracing::info!("Done!");
        }

        Commands::Inspect { clip } => {
            let summary = inspect_clip(&clip)?;
            println!("{:?}", clip);
            print_summary(&summary);
        }

        Commands::Stats {
            inputs,
            config,
            json,
        } => {
            let config = load_config(config.as_deref())?;
            let report = collect_stats(&inputs, &config);
            if let Some(path) = &json {
                let text = serde_json::to_string_pretty(&report)?;
                std::fs::write(path, text)
                    .with_context(|| format!("Failed to write report: {:?}", path))?;
                tracing::info!("Wrote report to {:?}", path);
            }
            for clip in &report.clips {
                match (&clip.stats, &clip.error) {
                    (Some(stats), _) => println!(
                        "{:?}[{}] '{}': {:.2}x, max error {:.6}, {} iterations{}",
                        clip.file,
                        clip.animation,
                        stats.clip_name,
                        stats.compression_ratio,
                        stats.max_error.error,
                        stats.iterations,
                        if clip.warnings.is_empty() { "" } else { " (warnings)" }
                    ),
                    (None, Some(error)) => {
                        println!("{:?}[{}] failed: {}", clip.file, clip.animation, error)
                    }
                    (None, None) => {}
                }
            }
            println!(
                "Total: {} -> {} bytes ({:.2}x), worst error {:.6}, {} failures",
                report.total_raw_size,
                report.total_compressed_size,
                report.compression_ratio(),
                report.worst_error,
                report.failures
            );
        }
    }

    Ok(())
}
