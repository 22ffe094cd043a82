use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info};
use twain_core::dsm::MockDsm;
use twain_core::events::{ObserverRegistry, SessionSnapshot, TwainEvent, TwainObserver};
use twain_core::manager::SourceManager;
use twain_core::protocol::{
    MSG_CLOSEDSREQ, TWFF_BMP, TWFF_JFIF, TWFF_PNG, TWFF_TIFF, TWSX_FILE, TWSX_MEMORY,
    TWSX_NATIVE,
};
use twain_core::session::{SessionConfig, TwainContext};
use twain_core::source::SharedSession;
use twain_core::state::TwainState;

/// Upper bound on OS messages pumped for one acquisition.
const MAX_PUMPS: usize = 16;

#[derive(Parser, Debug)]
#[command(author, version, about = "TWAIN acquisition against a virtual data source", long_about = None)]
struct Args {
    /// Session configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Virtual devices to register with the source manager
    #[arg(long = "device", default_values = ["Virtual Flatbed", "Virtual Camera"])]
    devices: Vec<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the available data sources
    List,
    /// Print the capabilities of a data source
    Caps {
        /// Product name, the default source if omitted
        source: Option<String>,
    },
    /// Acquire images and print every listener event
    Acquire {
        /// Product name, the default source if omitted
        #[arg(long)]
        source: Option<String>,

        #[arg(long, value_enum)]
        mechanism: Option<Mechanism>,

        #[arg(long, value_enum)]
        format: Option<FileFormat>,

        /// Enable the source without its user interface
        #[arg(long)]
        no_ui: bool,

        /// Directory for file transfers
        #[arg(long)]
        output: Option<PathBuf>,

        /// Number of images the virtual source delivers
        #[arg(long, default_value_t = 1)]
        count: i16,

        /// Write the effective configuration to this path
        #[arg(long)]
        save_config: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Mechanism {
    Native,
    Memory,
    File,
}

impl Mechanism {
    fn code(self) -> u16 {
        match self {
            Mechanism::Native => TWSX_NATIVE,
            Mechanism::Memory => TWSX_MEMORY,
            Mechanism::File => TWSX_FILE,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum FileFormat {
    Tiff,
    Bmp,
    Jfif,
    Png,
}

impl FileFormat {
    fn code(self) -> u16 {
        match self {
            FileFormat::Tiff => TWFF_TIFF,
            FileFormat::Bmp => TWFF_BMP,
            FileFormat::Jfif => TWFF_JFIF,
            FileFormat::Png => TWFF_PNG,
        }
    }
}

/// Prints listener events to stdout.
#[derive(Default)]
struct Printer {
    images: AtomicUsize,
    failures: AtomicUsize,
}

impl TwainObserver for Printer {
    fn on_event(&self, event: &TwainEvent, snapshot: &SessionSnapshot) {
        match event {
            TwainEvent::StateChanged { .. } => return,
            TwainEvent::ImageAcquired { .. } | TwainEvent::FileReady { .. } => {
                self.images.fetch_add(1, Ordering::SeqCst);
            }
            TwainEvent::Exception { .. } => {
                self.failures.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }
        println!("[{}] {}", snapshot.state, event);
    }
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install log subscriber: {}", e);
    }

    if let Err(e) = run(args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => SessionConfig::load_from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => SessionConfig::default(),
    };
    let names: Vec<&str> = args.devices.iter().map(String::as_str).collect();
    let dsm = Arc::new(MockDsm::scanner(&names));
    info!(devices = names.len(), "Starting virtual source manager");

    match args.command {
        Command::List => list(dsm, config),
        Command::Caps { source } => caps(dsm, config, source.as_deref()),
        Command::Acquire {
            source,
            mechanism,
            format,
            no_ui,
            output,
            count,
            save_config,
        } => {
            let mut config = config;
            if let Some(mechanism) = mechanism {
                config.transfer_mechanism = Some(mechanism.code());
            }
            if let Some(format) = format {
                config.image_file_format = Some(format.code());
            }
            if no_ui {
                config.show_ui = false;
            }
            if output.is_some() {
                config.file_transfer_dir = output;
            }
            if let Some(path) = save_config {
                config.save_to_file(&path)?;
                info!(path = %path.display(), "Configuration saved");
            }
            acquire(dsm, config, source.as_deref(), count)
        }
    }
}

fn list(dsm: Arc<MockDsm>, config: SessionConfig) -> Result<()> {
    let context = TwainContext::start(dsm, config)?;
    let default = context.snapshot().source;
    for identity in context.identities()? {
        let marker = match &default {
            Some(d) if d.id == identity.id => "*",
            _ => " ",
        };
        println!(
            "{} {:>4}  {} ({})",
            marker, identity.id, identity.product_name, identity.manufacturer
        );
    }
    context.shutdown();
    Ok(())
}

fn caps(dsm: Arc<MockDsm>, config: SessionConfig, source: Option<&str>) -> Result<()> {
    let mut manager = SourceManager::new(
        dsm,
        config.application.to_identity(),
        Arc::new(ObserverRegistry::new()),
        Arc::new(SharedSession::new()),
    );
    manager.source_mut().set_layout(config.layout());
    manager.open(config.parent_window)?;

    let listed = print_capabilities(&mut manager, source);
    manager.close()?;
    listed
}

fn print_capabilities(manager: &mut SourceManager, name: Option<&str>) -> Result<()> {
    if let Some(name) = name {
        manager.select_by_name(name)?;
    }
    let source = manager.open_source()?;
    print!("{}", source.identity());
    println!("UI controllable : {}", source.is_ui_controllable());
    println!("Device online   : {}", source.is_device_online());
    for capability in source.capabilities()? {
        println!("  {}", capability);
    }
    Ok(())
}

fn acquire(dsm: Arc<MockDsm>, config: SessionConfig, source: Option<&str>, count: i16) -> Result<()> {
    if count < 1 {
        bail!("count must be at least 1");
    }
    dsm.set_pending_transfers((0..count).rev());

    let context = TwainContext::start(dsm.clone(), config)?;
    let printer = Arc::new(Printer::default());
    context.subscribe(printer.clone());

    if let Some(name) = source {
        context.select_by_name(name)?;
    }
    context.acquire()?;

    let mut finished = false;
    for _ in 0..MAX_PUMPS {
        context.post_event(0)?;
        let snapshot = context.sync()?;
        if snapshot.state <= TwainState::SourceManagerOpen {
            finished = true;
            break;
        }
        if snapshot.state == TwainState::SourceEnabled {
            // The virtual UI closes once its images are out.
            dsm.queue_event(MSG_CLOSEDSREQ);
        }
    }
    context.shutdown();

    let images = printer.images.load(Ordering::SeqCst);
    let failures = printer.failures.load(Ordering::SeqCst);
    info!(images, failures, "Acquisition finished");
    if !finished {
        bail!("source did not close after {} messages", MAX_PUMPS);
    }
    if failures > 0 {
        bail!("{} transfer error(s)", failures);
    }
    Ok(())
}
