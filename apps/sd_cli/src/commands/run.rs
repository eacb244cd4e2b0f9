// apps/sd_cli/src/commands/run.rs

//! Run command
//!
//! Initializes the state, streams the station forcing table through the
//! engine and writes the output in the model type's format:
//!
//! | model type        | output                                  |
//! |-------------------|-----------------------------------------|
//! | `isnobal`         | one snow band image per output step     |
//! | in-memory types   | binary output archive (appended on restart) |

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Args;
use sd_config::{ModelType, RunConfig};
use sd_engine::{run_pipeline, Initializer, PassthroughIntegrator};
use sd_forcing::csv::{load_forcing_table, CsvConfig};
use sd_forcing::TableProducer;
use sd_foundation::grid::Shape;
use sd_io::{ArchiveSink, BandImageSink, OutputSink, PipelineConfig, StateField};
use tracing::info;

use super::load_config;

/// Run arguments
#[derive(Args)]
pub struct RunArgs {
    /// Configuration file
    #[arg(short, long)]
    pub config: PathBuf,

    /// Output directory (overrides the configuration)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Forcing table (overrides the configuration)
    #[arg(short, long)]
    pub forcing: Option<PathBuf>,

    /// Use the concurrent execution mode
    #[arg(long)]
    pub threaded: bool,

    /// Stop after this many steps
    #[arg(long)]
    pub steps: Option<usize>,

    /// Initialize only
    #[arg(long)]
    pub dry_run: bool,
}

/// Execute the run command
pub fn execute(args: RunArgs) -> Result<()> {
    let mut config = load_config(&args.config)?;
    apply_overrides(&mut config, &args);
    std::fs::create_dir_all(&config.output.directory).with_context(|| {
        format!(
            "cannot create output directory {}",
            config.output.directory.display()
        )
    })?;

    info!("=== SnowDrive run ===");
    let started = Instant::now();

    let init = Initializer::new(&config)
        .initialize()
        .context("initialization failed")?;
    info!(source = %init.source, "initial state ready");
    if let Some(path) = &init.init_artifact {
        info!(path = %path.display(), "init artifact");
    }

    if args.dry_run {
        println!("Initial state from {}", init.source);
        println!("Domain: {}", init.state.shape());
        println!("Dry run, nothing integrated");
        return Ok(());
    }

    let forcing_path = match &config.forcing.file {
        Some(path) => path.clone(),
        None => bail!("no forcing table configured (forcing.file or --forcing)"),
    };
    let shape = Shape::new(config.domain.ny, config.domain.nx);
    let table = load_forcing_table(&forcing_path, &CsvConfig::default())
        .with_context(|| format!("cannot load forcing table {}", forcing_path.display()))?;
    let producer = TableProducer::new(shape, table);

    let mut sink = open_sink(&config, shape)?;
    // the physics integrator is linked by embedding applications
    let mut integrator = PassthroughIntegrator::new();

    let outcome = run_pipeline(&config, init.state, &producer, &mut integrator, sink.as_mut())
        .context("run failed")?;

    let summary = &outcome.summary;
    println!("=== Run finished ===");
    println!("Mode:         {}", if config.forcing.threaded { "concurrent" } else { "pull" });
    println!("Steps:        {}", summary.steps);
    println!("Flushes:      {}", summary.flushes);
    println!("Depth updates: {}", summary.updates);
    println!("Attempts:     {}", summary.escalation.attempts);
    println!("Successes by level: {:?}", summary.escalation.successes);
    println!("Reset cells:  {}", summary.escalation.reset_cells);
    println!("Elapsed:      {:.2} s", started.elapsed().as_secs_f64());
    Ok(())
}

fn apply_overrides(config: &mut RunConfig, args: &RunArgs) {
    if let Some(output) = &args.output {
        config.output.directory = output.clone();
    }
    if let Some(forcing) = &args.forcing {
        config.forcing.file = Some(forcing.clone());
    }
    if args.threaded {
        config.forcing.threaded = true;
    }
    if args.steps.is_some() {
        config.time.run_for_nsteps = args.steps;
    }
}

fn open_sink(config: &RunConfig, shape: Shape) -> Result<Box<dyn OutputSink>> {
    match config.init.model_type {
        ModelType::Isnobal => Ok(Box::new(BandImageSink::new(&config.output.directory))),
        ModelType::Ipysnobal | ModelType::SmrfIpysnobal => {
            let fields = StateField::parse_list(&config.output.variables)?;
            let pipeline = PipelineConfig {
                batch_size: config.output.batch_size,
                max_pending: config.output.max_pending,
                ..PipelineConfig::default()
            };
            let sink = ArchiveSink::open(
                &config.archive_path(),
                shape,
                fields,
                config.init.restart.restart_crash,
                pipeline,
            )?;
            Ok(Box::new(sink))
        }
    }
}
