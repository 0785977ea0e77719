use anyhow::{anyhow, Context, Result};
use signalbridge::config::{self, Config};
use signalbridge::{AudioProcessor, ControlTransport, EventBus, ParameterStore};
use std::env;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::thread;

fn main() -> ExitCode {
    env_logger::init();

    let config = match Config::parse(env::args().skip(1)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = run(config) {
        log::error!("fatal: {e:#}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

/// `run` uses `anyhow` to stitch together the component errors (`AppError`,
/// `std::io::Error`, a joined thread's panic) with the context of what this
/// process was doing when each one surfaced; `AppError` still carries the
/// domain-specific variants the components themselves return.
fn run(config: Config) -> Result<()> {
    config::restore_soundcard_state(&config.database_path().with_extension("alsa-state"));

    let db_path = config.database_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating database directory {}", parent.display()))?;
    }

    let bus = EventBus::new();
    let _store = ParameterStore::open(&db_path, std::sync::Arc::clone(&bus))
        .with_context(|| format!("opening parameter store at {}", db_path.display()))?;

    let device = signalbridge::device::AudioDevice::open(
        &config.interface,
        config.input_channels,
        config.output_channels,
        config.sample_rate,
    )
    .with_context(|| format!("opening audio interface {:?}", config.interface))?;

    let mut processor = AudioProcessor::new(
        Some(device),
        config.input_channels,
        config.output_channels,
        config.sample_rate,
        std::sync::Arc::clone(&bus),
    );
    let stop = processor.stop_handle();

    let audio_thread = thread::spawn(move || processor.run());

    let transport_bus = std::sync::Arc::clone(&bus);
    let bind_addr: SocketAddr = ([0, 0, 0, 0], config.port).into();
    let sample_rate = config.sample_rate;
    let runtime = tokio::runtime::Runtime::new().context("starting tokio runtime")?;
    let transport_result = runtime
        .block_on(async move {
            let transport = ControlTransport::new(transport_bus.clone(), sample_rate);
            transport.serve(bind_addr, transport_bus).await
        })
        .with_context(|| format!("control transport on {bind_addr}"));

    stop.store(true, std::sync::atomic::Ordering::SeqCst);
    audio_thread
        .join()
        .map_err(|_| anyhow!("audio thread panicked"))?
        .context("audio processing loop")?;
    transport_result
}
