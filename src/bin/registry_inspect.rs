//! Registry cache inspector
//!
//! Prints the content of an on-disk registry cache without starting a
//! registry, and explains why a cache would be rejected.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use extension_registry::core::store::ObjectStore;
use extension_registry::core::table::TableReader;
use extension_registry::{CacheEnvironment, DirectoryFileManager, RegistryConfig, RegistryError};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "registry-inspect")]
#[command(about = "Inspect an extension registry cache")]
struct Args {
    /// Directory holding the cache files
    cache_dir: PathBuf,

    /// Operating system the cache must have been written for
    #[arg(long, default_value = std::env::consts::OS)]
    os: String,

    /// Windowing system the cache must have been written for
    #[arg(long, default_value = "")]
    ws: String,

    /// Locale the cache must have been written for
    #[arg(long, default_value = "en_US")]
    nl: String,

    /// Installation stamp the cache must carry
    #[arg(long, default_value_t = 0)]
    install_stamp: i64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Header values and object counts
    Summary,
    /// Extension points with their linked extensions
    Points,
    /// Extensions waiting for a missing extension point
    Orphans,
    /// Modules and what they contributed
    Contributions,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> anyhow::Result<()> {
    let files = DirectoryFileManager::read_only(&args.cache_dir);
    let env = CacheEnvironment::new(args.install_stamp, &args.os, &args.ws, &args.nl);

    let opened = match TableReader::open(&files, &env, 0) {
        Ok(opened) => opened,
        Err(RegistryError::CacheInvalid(reason)) => {
            bail!("cache in {} would be rejected: {}", args.cache_dir.display(), reason)
        }
        Err(e) => return Err(e).context("failed to open cache"),
    };
    let Some((reader, index)) = opened else {
        bail!("no registry cache in {}", args.cache_dir.display());
    };
    info!("Opened cache in {}", args.cache_dir.display());

    let header = reader.header().clone();
    let store = ObjectStore::from_cache(&RegistryConfig::default(), reader, index)?;

    match args.command {
        Command::Summary => {
            println!("version:        {}", header.version);
            println!("install stamp:  {}", header.install_stamp);
            println!("registry stamp: {}", header.registry_stamp);
            println!("os/ws/nl:       {}/{}/{}", header.os, header.ws, header.nl);
            println!("next id:        {}", store.next_id());
            println!("points:         {}", store.extension_point_index().len());
            println!("contributions:  {}", store.contributions()?.len());
            println!("orphaned:       {}", store.orphans()?.iter().map(|(_, e)| e.len()).sum::<usize>());
            println!("namespaces:     {}", store.namespaces()?.len());
        }
        Command::Points => {
            let mut points = store.extension_point_index();
            points.sort();
            for (name, id) in points {
                let point = store.extension_point(id)?;
                let extra = store.extension_point_extra(&point)?;
                println!("{} [{}] module {}", name, id, extra.contributor);
                for child in point.children().iter() {
                    let extension = store.extension(*child)?;
                    println!(
                        "  {} [{}]",
                        extension.unique_identifier().as_deref().unwrap_or("<anonymous>"),
                        child
                    );
                }
            }
        }
        Command::Orphans => {
            for (point, extensions) in store.orphans()? {
                println!("{}", point);
                for id in extensions {
                    let extension = store.extension(id)?;
                    println!(
                        "  {} [{}]",
                        extension.unique_identifier().as_deref().unwrap_or("<anonymous>"),
                        id
                    );
                }
            }
        }
        Command::Contributions => {
            for contribution in store.contributions()? {
                let namespace = store.namespace_of(&contribution)?;
                println!(
                    "module {} ({}): {} points, {} extensions",
                    contribution.contributor(),
                    namespace.as_deref().unwrap_or("?"),
                    contribution.extension_points().count(),
                    contribution.extensions().count()
                );
            }
        }
    }
    Ok(())
}
