mod cli;

use mss_core::config::Config;
use mss_core::events::EventBus;
use mss_core::{PresentationKind, RepresentationId};
use mss_media::manifest::{Chunk, ClipBounds, SegmentListBuilder, SegmentTemplate};
use mss_media::{availability_range, BoxTree, FragmentContext, FragmentTranscoder, Timeline};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{AvailabilityArgs, Cli, Commands, ConvertArgs, TimelineArgs};
use std::path::Path;
use std::sync::Arc;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "mss_remux=trace,mss_media=trace,mss_core=debug".to_string()
        } else {
            "mss_remux=info,mss_media=info,mss_core=info".to_string()
        }
    });

    // Logs go to stderr; stdout carries command output.
    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Convert(args) => {
            let config = Config::load_or_default(cli.config.as_deref());
            convert_fragment(args, &config)
        }
        Commands::Timeline(args) => build_timeline(args),
        Commands::Availability(args) => {
            let config = Config::load_or_default(cli.config.as_deref());
            show_availability(args, &config)
        }
        Commands::Inspect { file, json } => inspect_fragment(&file, json),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("mss-remux {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn read_timeline(path: &Path) -> Result<Timeline> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read timeline {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Invalid timeline JSON in {}", path.display()))
}

fn convert_fragment(args: ConvertArgs, config: &Config) -> Result<()> {
    if !args.input.exists() {
        anyhow::bail!("Input file does not exist: {:?}", args.input);
    }
    let data = std::fs::read(&args.input)?;

    let mut timeline = match &args.timeline {
        Some(path) if path.exists() => read_timeline(path)?,
        _ => Timeline::default(),
    };

    let timescale = args.timescale.unwrap_or(config.transcode.timescale);
    let mut ctx = FragmentContext::new(args.track_id, timescale)
        .with_timing(args.start, args.duration)
        .with_trick_mode(args.trick_mode || config.transcode.trick_mode);
    if let Some(name) = &args.representation {
        ctx = ctx.with_representation(RepresentationId::new(name.as_str()));
    }
    let dvr_window = args
        .dvr_window
        .unwrap_or_else(|| config.live.effective_dvr_window());

    let bus = Arc::new(EventBus::default());
    let transcoder = FragmentTranscoder::with_reporter(bus.clone());

    tracing::info!("Converting fragment: {:?}", args.input);
    let converted = transcoder.convert_detailed(&data, &ctx, &mut timeline, dvr_window)?;

    std::fs::write(&args.output, &converted.data)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;
    println!(
        "Wrote {} bytes ({} samples) to {}",
        converted.data.len(),
        converted.sample_count,
        args.output.display()
    );

    if converted.sync.changed() {
        println!(
            "Timeline: +{} appended, {} corrected, -{} trimmed ({} segments)",
            converted.sync.appended,
            converted.sync.corrected,
            converted.sync.trimmed,
            timeline.len()
        );
    }
    for event in bus.recent_events(16).iter().rev() {
        tracing::debug!("{}", serde_json::to_string(&event.payload)?);
    }
    if let Some(range) = converted.sync.dvr_range {
        println!(
            "DVR window: {:.3}s - {:.3}s",
            range.start_secs, range.end_secs
        );
    }

    if let Some(path) = &args.timeline {
        let json = serde_json::to_string_pretty(&timeline)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write timeline {}", path.display()))?;
    }

    Ok(())
}

fn build_timeline(args: TimelineArgs) -> Result<()> {
    let contents = std::fs::read_to_string(&args.chunks)
        .with_context(|| format!("Failed to read chunk list {}", args.chunks.display()))?;
    let chunks: Vec<Chunk> = serde_json::from_str(&contents)
        .with_context(|| format!("Invalid chunk list JSON in {}", args.chunks.display()))?;

    let clip = match (args.clip_begin, args.clip_end) {
        (Some(begin), Some(end)) => Some(ClipBounds::new(begin, end)),
        _ => None,
    };
    let list = SegmentListBuilder::new()
        .timescale(args.timescale)
        .build(&chunks, clip);
    for warning in &list.warnings {
        eprintln!("warning: {warning}");
    }

    let rendered = match &args.url_template {
        Some(template) => {
            let template = SegmentTemplate::new(template.as_str());
            let mut urls: Vec<String> = list
                .timeline
                .iter()
                .map(|segment| template.media_url(args.bitrate, segment))
                .collect();
            urls.push(String::new());
            urls.join("\n")
        }
        None => serde_json::to_string_pretty(&list.timeline)? + "\n",
    };

    match &args.output {
        Some(path) => {
            std::fs::write(path, rendered)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("{} segments written to {}", list.timeline.len(), path.display());
        }
        None => print!("{rendered}"),
    }

    Ok(())
}

fn show_availability(args: AvailabilityArgs, config: &Config) -> Result<()> {
    let timeline = read_timeline(&args.timeline)?;
    let kind = if args.is_static {
        PresentationKind::Static
    } else {
        PresentationKind::Dynamic
    };
    let dvr_window = args
        .dvr_window
        .unwrap_or_else(|| config.live.effective_dvr_window());

    let range = availability_range(
        &timeline,
        kind,
        args.now,
        dvr_window,
        config.live.inverted_range_policy,
    )?;
    println!("{}", serde_json::to_string_pretty(&range)?);
    Ok(())
}

fn inspect_fragment(file: &Path, json: bool) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }

    let data = std::fs::read(file)?;
    let tree = BoxTree::parse(&data)?;
    let boxes = tree.walk();

    if json {
        println!("{}", serde_json::to_string_pretty(&boxes)?);
    } else {
        println!("File: {}", file.display());
        println!("Size: {} bytes", data.len());
        println!();
        for b in &boxes {
            println!(
                "{:indent$}{} [{}] offset={} size={}",
                "",
                b.fourcc,
                b.kind,
                b.offset,
                b.size,
                indent = b.depth * 2
            );
        }
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = Config::load(p)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    println!("  DVR window: {}s", config.live.dvr_window_secs);
    println!(
        "  Inverted range policy: {:?}",
        config.live.inverted_range_policy
    );
    println!("  Trick mode: {}", config.transcode.trick_mode);
    println!("  Timescale: {}", config.transcode.timescale);

    let warnings = config.validate();
    if !warnings.is_empty() {
        println!("\nWarnings:");
        for warning in &warnings {
            println!("  - {warning}");
        }
    }

    Ok(())
}
