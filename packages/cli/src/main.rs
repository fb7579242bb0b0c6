#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the shark-env enrichment pipeline.
//!
//! Each subcommand runs one stage over a `GeoJSON` file:
//!
//! ```text
//! dates -> sst -> bathymetry -> coast -> presence-absence -> table
//! ```
//!
//! Uses `indicatif-log-bridge` (via [`shark_env_cli_utils::init_logger`])
//! so log lines and progress bars share the terminal.

use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use shark_env_cli_utils::{IndicatifProgress, MultiProgress};
use shark_env_enrich::bathymetry::{self, BathymetryOptions};
use shark_env_enrich::presence::{self, PresenceAbsenceOptions};
use shark_env_enrich::sst::{self, SST_BATCH_SIZE, SstOptions};
use shark_env_enrich::{coast, dates, table};
use shark_env_erddap::dataset::{DEFAULT_DATASET, all_datasets, find_dataset};
use shark_env_erddap::{
    GridDataset, HttpGridSource, RemoteGridSampler, SampleCache, SamplerSettings,
};

#[derive(Parser)]
#[command(
    name = "shark_env",
    about = "Enrich shark occurrence points with environmental covariates"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build `date` from `month` for background points
    Dates {
        #[arg(long, default_value = "public/data/background_raw.geojson")]
        src: PathBuf,
        #[arg(long, default_value = "public/data/background_raw_with_dates.geojson")]
        dst: PathBuf,
        /// Year used for every generated date
        #[arg(long, default_value_t = dates::DEFAULT_YEAR)]
        year: i32,
        /// Day of month used for every generated date
        #[arg(long, default_value_t = dates::DEFAULT_DAY)]
        day: u32,
    },
    /// Add sea-surface temperature (`sst_c`) from an ERDDAP grid
    Sst {
        #[arg(long, default_value = "public/data/sphyrna_points.geojson")]
        src: PathBuf,
        #[arg(long, default_value = "public/data/sphyrna_points_enriched.geojson")]
        dst: PathBuf,
        /// Only sample the first N points (0 = all)
        #[arg(long, default_value_t = 40)]
        limit: usize,
        /// Pause after every remote call, in milliseconds (overrides the dataset)
        #[arg(long)]
        throttle_ms: Option<u64>,
        /// JSON file of previously sampled grid cells
        #[arg(long, default_value = ".cache_sst.json")]
        cache: PathBuf,
        /// Embedded dataset id (see `datasets`)
        #[arg(long, default_value = DEFAULT_DATASET)]
        dataset: String,
        /// Dataset TOML file (overrides `--dataset`)
        #[arg(long)]
        dataset_config: Option<PathBuf>,
        /// Date for points that carry none (YYYY-MM-DD)
        #[arg(long)]
        fallback_date: Option<NaiveDate>,
    },
    /// Add a value sampled from a GeoTIFF (bathymetry by default)
    Bathymetry {
        #[arg(long)]
        src: PathBuf,
        #[arg(long)]
        dst: PathBuf,
        #[arg(long, default_value = bathymetry::DEFAULT_RASTER)]
        raster: PathBuf,
        /// Property to write
        #[arg(long, default_value = "bathy_m")]
        prop: String,
        /// No-data sentinel (overrides the raster's own)
        #[arg(long, allow_negative_numbers = true)]
        nodata: Option<f64>,
    },
    /// Add geodesic distance to the nearest coastline (`dist_coast_km`)
    Coast {
        #[arg(long)]
        src: PathBuf,
        #[arg(long)]
        dst: PathBuf,
        /// Land polygons (`GeoJSON`)
        #[arg(long, default_value = coast::DEFAULT_LAND)]
        land: PathBuf,
    },
    /// Merge presence and background points into one labelled collection
    PresenceAbsence {
        #[arg(long, default_value = "public/data/sphyrna_points_enriched.geojson")]
        pres: PathBuf,
        #[arg(long, default_value = "public/data/background_sst.geojson")]
        back: PathBuf,
        #[arg(long, default_value = table::DEFAULT_SOURCE)]
        out: PathBuf,
        /// Background points need a non-null value for this property
        #[arg(long, default_value = "sst_c")]
        covariate: String,
        /// Keep background points whose covariate is null
        #[arg(long)]
        keep_null_background: bool,
    },
    /// Export the labelled collection as CSV and Parquet
    Table {
        #[arg(long, default_value = table::DEFAULT_SOURCE)]
        src: PathBuf,
        #[arg(long, default_value = table::DEFAULT_CSV)]
        csv: PathBuf,
        #[arg(long, default_value = table::DEFAULT_PARQUET)]
        parquet: PathBuf,
        /// Skip the Parquet output
        #[arg(long)]
        no_parquet: bool,
    },
    /// List the embedded grid datasets
    Datasets,
}

struct SstArgs {
    src: PathBuf,
    dst: PathBuf,
    limit: usize,
    throttle_ms: Option<u64>,
    cache: PathBuf,
    dataset: String,
    dataset_config: Option<PathBuf>,
    fallback_date: Option<NaiveDate>,
}

async fn run_sst(multi: &MultiProgress, args: SstArgs) -> Result<(), Box<dyn std::error::Error>> {
    let dataset = match &args.dataset_config {
        Some(path) => GridDataset::from_file(path)?,
        None => find_dataset(&args.dataset)?,
    };
    log::info!(
        "Grid dataset: {} ({}/{}, variable {})",
        dataset.id,
        dataset.base_url,
        dataset.dataset,
        dataset.variable
    );

    let mut settings = SamplerSettings::from_dataset(&dataset)?;
    if let Some(ms) = args.throttle_ms {
        settings.retry.throttle = Duration::from_millis(ms);
    }

    let cache = SampleCache::open(&args.cache)?;
    log::info!("{} cached grid cells in {}", cache.len(), args.cache.display());

    let source = HttpGridSource::new(dataset)?;
    let mut sampler = RemoteGridSampler::new(source, cache, settings);

    let options = SstOptions {
        limit: (args.limit > 0).then_some(args.limit),
        fallback_date: args.fallback_date,
        batch_size: SST_BATCH_SIZE,
    };
    let progress = IndicatifProgress::features_bar(multi, "Sampling SST");
    sst::run(&args.src, &args.dst, &mut sampler, &options, progress.as_ref()).await?;
    Ok(())
}

fn print_datasets() {
    println!(
        "{:<16} {:<14} {:<12} {:<12} NAME",
        "ID", "VARIABLE", "SINCE", "LONGITUDE"
    );
    println!("{}", "-".repeat(80));
    for dataset in all_datasets() {
        let since = dataset.coverage_start.to_string();
        println!(
            "{:<16} {:<14} {since:<12} {:<12} {}",
            dataset.id,
            dataset.variable,
            dataset.longitude_convention.as_ref(),
            dataset.name
        );
    }
}

#[allow(clippy::too_many_lines)]
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = shark_env_cli_utils::init_logger();
    let cli = Cli::parse();

    match cli.command {
        Commands::Dates {
            src,
            dst,
            year,
            day,
        } => {
            let progress = IndicatifProgress::features_bar(&multi, "Assigning dates");
            dates::run(&src, &dst, year, day, progress.as_ref())?;
        }
        Commands::Sst {
            src,
            dst,
            limit,
            throttle_ms,
            cache,
            dataset,
            dataset_config,
            fallback_date,
        } => {
            run_sst(
                &multi,
                SstArgs {
                    src,
                    dst,
                    limit,
                    throttle_ms,
                    cache,
                    dataset,
                    dataset_config,
                    fallback_date,
                },
            )
            .await?;
        }
        Commands::Bathymetry {
            src,
            dst,
            raster,
            prop,
            nodata,
        } => {
            let options = BathymetryOptions {
                raster,
                property: prop,
                nodata,
            };
            let progress = IndicatifProgress::features_bar(&multi, "Sampling raster");
            bathymetry::run(&src, &dst, &options, progress.as_ref())?;
        }
        Commands::Coast { src, dst, land } => {
            let progress = IndicatifProgress::features_bar(&multi, "Measuring distance to coast");
            coast::run(&src, &dst, &land, progress.as_ref())?;
        }
        Commands::PresenceAbsence {
            pres,
            back,
            out,
            covariate,
            keep_null_background,
        } => {
            let options = PresenceAbsenceOptions {
                covariate,
                drop_null_background: !keep_null_background,
            };
            let progress = IndicatifProgress::features_bar(&multi, "Building presence/absence");
            let stats = presence::run(&pres, &back, &out, &options, progress.as_ref())?;
            println!("{stats}");
        }
        Commands::Table {
            src,
            csv,
            parquet,
            no_parquet,
        } => {
            let parquet = if no_parquet {
                None
            } else {
                Some(parquet.as_path())
            };
            let progress = IndicatifProgress::features_bar(&multi, "Exporting table");
            let rows = table::run(&src, &csv, parquet, progress.as_ref())?;
            println!("{rows} rows written to {}", csv.display());
        }
        Commands::Datasets => print_datasets(),
    }

    Ok(())
}
