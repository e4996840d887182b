//! Command-line front end: live routing, file playback and file tools.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;
use virtuosos::extender::DEFAULT_MIN_DURATION_MS;
use virtuosos::settings::DEFAULT_SETTINGS_FILE;
use virtuosos::{
    fix_file, play_file, Error, PlaybackOptions, PlaybackOutcome, Result, RunOutcome, Session,
    Settings,
};
use virtuosos_midi_io::{
    list_input_devices, list_output_devices, MidiFileInfo, MidiInputSource, MidiOutputSink,
};

#[derive(Parser)]
#[command(name = "virtuosos")]
#[command(about = "MIDI router with auto-release instruments", long_about = None)]
struct Cli {
    /// Log every routed event
    #[arg(long, global = true)]
    debug: bool,

    /// Settings file (default: virtuosos.toml)
    #[arg(short, long, global = true, default_value = DEFAULT_SETTINGS_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Route live input to output until Ctrl+C
    Run {
        /// Input port name (overrides settings)
        #[arg(short, long)]
        input: Option<String>,

        /// Output port name (overrides settings)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Play a MIDI file to an output port
    Play {
        file: PathBuf,

        #[arg(short, long)]
        output: Option<String>,

        /// Extend notes shorter than --min-duration-ms before playing
        #[arg(long)]
        fix_short_notes: bool,

        #[arg(long, default_value_t = DEFAULT_MIN_DURATION_MS)]
        min_duration_ms: u32,
    },

    /// Write a copy of a MIDI file with short notes extended
    Fix {
        input: PathBuf,
        output: PathBuf,

        #[arg(long, default_value_t = DEFAULT_MIN_DURATION_MS)]
        min_duration_ms: u32,
    },

    /// Show what a MIDI file contains
    Info { file: PathBuf },

    /// List MIDI ports
    Devices,

    /// Remember the input port
    SetInput { name: String },

    /// Remember the output port
    SetOutput { name: String },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.debug { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    if let Err(e) = dispatch(cli).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run { input, output } => run(&cli.config, input, output).await,
        Commands::Play {
            file,
            output,
            fix_short_notes,
            min_duration_ms,
        } => {
            let options = PlaybackOptions::default()
                .fix_short_notes(fix_short_notes)
                .min_duration_ms(min_duration_ms);
            play(&cli.config, file, output, options).await
        }
        Commands::Fix {
            input,
            output,
            min_duration_ms,
        } => {
            let report = fix_file(&input, &output, min_duration_ms)?;
            info!(
                "Added {} note-offs ({} ticks minimum) across {} tracks",
                report.synthetic_releases, report.min_duration_ticks, report.tracks
            );
            info!("Saved fixed file to: {}", output.display());
            Ok(())
        }
        Commands::Info { file } => info_command(&file),
        Commands::Devices => list_devices(),
        Commands::SetInput { name } => {
            let mut settings = Settings::load(&cli.config)?;
            settings.set_input_device(name);
            settings.save(&cli.config)
        }
        Commands::SetOutput { name } => {
            let mut settings = Settings::load(&cli.config)?;
            settings.set_output_device(name);
            settings.save(&cli.config)
        }
    }
}

async fn run(config: &Path, input: Option<String>, output: Option<String>) -> Result<()> {
    let settings = Settings::load(config)?;
    let (Some(input), Some(output)) = (
        input.or_else(|| settings.midi.input_device.clone()),
        output.or_else(|| settings.midi.output_device.clone()),
    ) else {
        return Err(Error::Settings(
            "MIDI devices not configured. Use set-input/set-output or --input/--output".into(),
        ));
    };

    let (source, sink) = match (
        MidiInputSource::connect_by_name(&input),
        MidiOutputSink::connect_by_name(&output),
    ) {
        (Ok(source), Ok(sink)) => (source, sink),
        (Err(e), _) | (_, Err(e)) => {
            let _ = list_devices();
            return Err(e.into());
        }
    };
    info!("Input: {}", source.name());
    info!("Output: {}", sink.name());

    let mut session = Session::builder()
        .instruments(settings.instruments()?)
        .build(Box::new(source), Arc::new(sink))?;

    let handle = session.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down...");
            handle.request_stop();
        }
    });

    info!("Router running. Press Ctrl+C to exit.");
    let outcome = tokio::task::spawn_blocking(move || session.run())
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?;

    match outcome {
        RunOutcome::Stopped => Ok(()),
        RunOutcome::SourceFailed(e) | RunOutcome::SinkFailed(e) => Err(e),
    }
}

async fn play(
    config: &Path,
    file: PathBuf,
    output: Option<String>,
    options: PlaybackOptions,
) -> Result<()> {
    let settings = Settings::load(config)?;
    let Some(output) = output.or(settings.midi.output_device) else {
        return Err(Error::Settings(
            "MIDI output not configured. Use set-output or --output".into(),
        ));
    };
    let sink = Arc::new(MidiOutputSink::connect_by_name(&output)?);

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                stop.store(true, Ordering::Release);
            }
        });
    }

    let outcome = tokio::task::spawn_blocking(move || play_file(file, sink, &options, stop))
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))??;

    match outcome {
        PlaybackOutcome::Completed { .. } | PlaybackOutcome::Interrupted => Ok(()),
        PlaybackOutcome::Failed(e) => Err(e),
    }
}

fn info_command(file: &Path) -> Result<()> {
    let info = MidiFileInfo::load(file)?;
    println!("File: {}", file.display());
    println!("Format: {}", info.format);
    println!("Tracks: {}", info.tracks);
    println!("Ticks per beat: {}", info.ticks_per_beat);
    println!("Length: {:.2} seconds", info.length.as_secs_f64());
    println!("Total messages: {}", info.total_messages);
    println!("Message types:");
    for (kind, count) in &info.message_types {
        println!("  {}: {}", kind, count);
    }
    Ok(())
}

fn list_devices() -> Result<()> {
    let inputs = list_input_devices()?;
    let outputs = list_output_devices()?;

    println!("Available MIDI input ports:");
    if inputs.is_empty() {
        warn!("No MIDI input ports found");
    }
    for device in &inputs {
        println!("  {}: {}", device.index, device.name);
    }

    println!("Available MIDI output ports:");
    if outputs.is_empty() {
        warn!("No MIDI output ports found");
    }
    for device in &outputs {
        println!("  {}: {}", device.index, device.name);
    }
    Ok(())
}
