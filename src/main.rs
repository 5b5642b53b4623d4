use anyhow::Context;
use clap::Parser;
use site_geometry::adapters::ConfiguredStore;
use site_geometry::config::cli::{SitesArgs, WorkerArgs};
use site_geometry::config::{CliConfig, Command, GeoConfig};
use site_geometry::core::parse::{run_worker, WorkerMessage};
use site_geometry::core::resolver::{feature_collection, site_shapes};
use site_geometry::domain::model::{FileFormat, FileRef, SiteDetails};
use site_geometry::utils::{logger, validation::Validate};
use site_geometry::{
    AreaSearch, FileGeometryExtractor, RingExporter, SiteGeoError, SiteGeometryResolver,
};
use std::io::{Read, Write};
use std::path::Path;

// The parse worker must stay single threaded and runtime free, so the tokio
// runtime is only built for the other commands.
fn main() {
    let cli = CliConfig::parse();

    if cli.json_logs {
        logger::init_json_logger(cli.verbose);
    } else {
        logger::init_cli_logger(cli.verbose);
    }

    if let Command::ParseWorker(args) = &cli.command {
        std::process::exit(parse_worker(args));
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("❌ failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(cli)) {
        let (code, exit_code) = match e.downcast_ref::<SiteGeoError>() {
            Some(err) if err.is_client_error() => (err.code(), 2),
            Some(err) => (err.code(), 1),
            None => ("INTERNAL_ERROR", 1),
        };
        tracing::error!("❌ {} ({})", e, code);
        eprintln!("{}: {:#}", code, e);
        std::process::exit(exit_code);
    }
}

fn parse_worker(args: &WorkerArgs) -> i32 {
    let message = match args.format.parse::<FileFormat>() {
        Ok(format) => run_worker(format, &args.input, &args.workdir, args.max_unpacked_bytes),
        Err(e) => WorkerMessage::Fault {
            message: e.to_string(),
        },
    };
    let exit_code = match message {
        WorkerMessage::Fault { .. } => 1,
        _ => 0,
    };

    match write_message(&message) {
        Ok(()) => exit_code,
        Err(e) => {
            tracing::error!("Worker could not write its result: {}", e);
            1
        }
    }
}

fn write_message(message: &WorkerMessage) -> std::io::Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer(&mut stdout, message)?;
    writeln!(stdout)?;
    stdout.flush()
}

async fn run(cli: CliConfig) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => GeoConfig::from_file(path)?,
        None => GeoConfig::default(),
    };
    config.validate()?;
    tracing::debug!("Configuration: {:?}", config);

    let store = ConfiguredStore::from_config(&config.storage).await?;
    let extractor = FileGeometryExtractor::new(store, config.extractor_settings()?);

    match cli.command {
        Command::Resolve(args) => {
            let mut sites = read_sites(&args)?;
            let resolver = SiteGeometryResolver::new(config.manual_builder(), extractor);
            let resolved = resolver.resolve_all(&mut sites).await?;
            print_json(&feature_collection(&resolved))?;
        }
        Command::Search { sites, datasets } => {
            let mut sites = read_sites(&sites)?;
            let resolver = SiteGeometryResolver::new(config.manual_builder(), extractor);
            let resolved = resolver.resolve_all(&mut sites).await?;

            let areas = config.load_reference_areas()?;
            let search = AreaSearch::new(areas, config.buffer_options());
            let matches = search.search_datasets(&site_shapes(&resolved), &datasets).await?;
            print_json(&matches)?;
        }
        Command::Export { sites, wkid } => {
            let mut sites = read_sites(&sites)?;
            let resolver = SiteGeometryResolver::new(config.manual_builder(), extractor);
            resolver.resolve_all(&mut sites).await?;

            let exporter = RingExporter::new(config.manual_builder(), wkid.unwrap_or(config.export.wkid));
            print_json(&exporter.to_rings(&sites)?)?;
        }
        Command::Extract {
            bucket,
            key,
            format,
        } => {
            let file = FileRef {
                storage_bucket: bucket,
                storage_key: key,
                declared_format: format,
            };
            print_json(&extractor.extract(&file).await?)?;
        }
        Command::ParseWorker(args) => std::process::exit(parse_worker(&args)),
    }

    tracing::info!("✅ Done");
    Ok(())
}

fn read_sites(args: &SitesArgs) -> anyhow::Result<Vec<SiteDetails>> {
    let raw = if args.sites == Path::new("-") {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .context("reading sites from stdin")?;
        buffer
    } else {
        std::fs::read_to_string(&args.sites)
            .with_context(|| format!("reading sites from {}", args.sites.display()))?
    };

    let sites: Vec<SiteDetails> = serde_json::from_str(&raw).map_err(SiteGeoError::from)?;
    for site in &sites {
        site.validate()?;
    }
    tracing::info!("📁 Loaded {} sites", sites.len());
    Ok(sites)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)?;
    Ok(())
}
