//! `ima-play`: command-line player for IMA containers.

use anyhow::{bail, Context};
use ima_stream::output::SharedOutput;
use ima_stream::streaming::{AudioDevice, StreamConfig, StreamOutput};
use ima_stream::{ImaPlayer, ImaSource};
use parking_lot::Mutex;
use std::env;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct Options {
    path: String,
    volume: u32,
    loop_window: Option<(f64, f64)>,
    status_json: bool,
}

fn print_usage() {
    eprintln!("Usage: ima-play <file.ima> [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --volume <0-200>        Playback volume, 100 = unity (default)");
    eprintln!("  --loop <start> <end>    Loop window in seconds (end 0 = to stream end)");
    eprintln!("  --status-json           Print the final status snapshot as JSON");
}

fn parse_args() -> anyhow::Result<Options> {
    let mut args = env::args().skip(1);
    let mut options = Options {
        path: String::new(),
        volume: 100,
        loop_window: None,
        status_json: false,
    };

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--volume" => {
                let value = args.next().context("--volume needs a value")?;
                options.volume = value.parse().context("--volume must be an integer")?;
            }
            "--loop" => {
                let start = args
                    .next()
                    .context("--loop needs <start> <end> in seconds")?
                    .parse()
                    .context("--loop start must be a number")?;
                let end = args
                    .next()
                    .context("--loop needs <start> <end> in seconds")?
                    .parse()
                    .context("--loop end must be a number")?;
                options.loop_window = Some((start, end));
            }
            "--status-json" => options.status_json = true,
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            other if options.path.is_empty() => options.path = other.to_string(),
            other => bail!("unexpected argument '{other}'"),
        }
    }

    if options.path.is_empty() {
        print_usage();
        bail!("missing input file");
    }
    Ok(options)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let options = parse_args()?;

    // Probe the header first so the output stream runs at the source rate.
    let probe = ImaSource::open(&options.path)
        .with_context(|| format!("cannot open '{}'", options.path))?;
    let config = StreamConfig::stable(probe.sample_rate());
    println!(
        "{}: {} Hz, {:.1}s",
        options.path,
        probe.sample_rate(),
        probe.duration_seconds()
    );
    drop(probe);

    let stream = StreamOutput::new(config)?;
    let device = AudioDevice::new(&config, stream.ring_buffer())?;
    let output: Arc<Mutex<StreamOutput>> = Arc::new(Mutex::new(stream));
    let sink: SharedOutput = output.clone();

    let mut player = ImaPlayer::new(sink);
    player.set_volume(options.volume);

    let completed = Arc::new(AtomicBool::new(false));
    let completed_flag = Arc::clone(&completed);
    player.set_end_callback(move || {
        completed_flag.store(true, Ordering::Release);
    });

    player.load(&options.path)?;
    if let Some((start, end)) = options.loop_window {
        player.set_loop_seconds(true, start, end)?;
        println!("looping {start:.2}s..{end:.2}s, press Ctrl-C to stop");
    }

    let duration = player.duration_seconds();
    while player.is_playing() {
        print!(
            "\r{:6.1}s / {:6.1}s  vol {:3}",
            player.position_seconds(),
            duration,
            player.volume()
        );
        std::io::stdout().flush().ok();
        std::thread::sleep(Duration::from_millis(100));
    }
    println!();

    // Let the device drain what the engine already produced.
    output.lock().drain_to(0);
    device.finish();
    device.wait_until_end();

    // The completion callback runs on a deferred one-shot timer; give it a
    // beat before checking.
    std::thread::sleep(Duration::from_millis(50));
    if completed.load(Ordering::Acquire) {
        println!("playback complete");
    }

    if options.status_json {
        println!("{}", serde_json::to_string_pretty(&player.status())?);
    }

    Ok(())
}
