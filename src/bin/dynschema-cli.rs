//! Dynschema CLI - Command-line interface for a schema catalog
//!
//! Provides subcommands for initializing a catalog directory, saving and
//! inspecting schemas, and checking store integrity.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use dynschema::catalog::storage;
use dynschema::catalog::store::SchemaStore;
use dynschema::catalog::{BackendKind, Catalog, CatalogConfig, Signature};
use std::io::Read;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "dynschema")]
#[command(about = "Content-addressed dynamic schema catalog", long_about = None)]
struct Cli {
    /// Root directory for catalog storage
    #[arg(short, long, default_value = ".dynschema")]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new catalog
    Init {
        /// Use a private transient cache
        #[arg(long)]
        private_cache: bool,

        /// Log at DEBUG level when using this catalog
        #[arg(long)]
        debug: bool,
    },

    /// Save a schema and print its signature
    Add {
        /// Schema file, or `-` for stdin
        file: PathBuf,
    },

    /// Print the stored text for a signature
    Show {
        /// Schema signature (hex)
        signature: String,
    },

    /// List the fields of a stored schema
    Fields {
        /// Schema signature (hex)
        signature: String,
    },

    /// List stored signatures
    List,

    /// Remove a stored schema
    Delete {
        /// Schema signature (hex)
        signature: String,
    },

    /// Compute a signature without storing anything
    Signature {
        /// Schema file, or `-` for stdin
        file: PathBuf,
    },

    /// Check that every stored schema matches its signature
    Verify,
}

fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read schema from stdin")?;
        Ok(text)
    } else {
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))
    }
}

fn parse_signature(raw: &str) -> Result<Signature> {
    raw.parse()
        .with_context(|| format!("'{}' is not a schema signature", raw))
}

/// Log level from the command line for `init`, else from the stored config
fn log_level(cli: &Cli) -> tracing::Level {
    match &cli.command {
        Commands::Init { debug: true, .. } => tracing::Level::DEBUG,
        Commands::Init { .. } | Commands::Signature { .. } => tracing::Level::INFO,
        _ => storage::load_config(&cli.root)
            .map(|config| config.log_level())
            .unwrap_or(tracing::Level::INFO),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(log_level(&cli).into()),
        )
        .init();

    match cli.command {
        Commands::Init {
            private_cache,
            debug,
        } => {
            let root = cli.root.clone();
            let config = CatalogConfig {
                root: cli.root,
                backend: BackendKind::Filesystem,
                shared_cache: !private_cache,
                debug,
            };

            Catalog::init(config)?;
            println!("Initialized schema catalog at {:?}", root);
        }

        Commands::Add { file } => {
            let catalog = Catalog::load(cli.root)?;
            let text = read_input(&file)?;
            let signature = catalog.store().add(text.as_str())?;
            println!("{}", signature);
        }

        Commands::Show { signature } => {
            let catalog = Catalog::load(cli.root)?;
            let signature = parse_signature(&signature)?;
            match catalog.store().get(&signature)? {
                Some(text) => println!("{}", text),
                None => bail!("No schema stored under {}", signature),
            }
        }

        Commands::Fields { signature } => {
            let catalog = Catalog::load(cli.root)?;
            let signature = parse_signature(&signature)?;
            let ty = catalog.registry().resolve(&signature);
            if ty.is_placeholder() {
                bail!("No schema stored under {}", signature);
            }

            println!("{}", ty.name());
            if let Some(schema) = ty.schema() {
                for field in schema.fields() {
                    let required = if field.required { " (required)" } else { "" };
                    println!(
                        "  {}: {} = {}{}",
                        field.name, field.kind, field.default, required
                    );
                }
            }
        }

        Commands::List => {
            let catalog = Catalog::load(cli.root)?;
            for signature in catalog.store().signatures()? {
                let marker = if signature.is_default() { " (default)" } else { "" };
                println!("{}{}", signature, marker);
            }
        }

        Commands::Delete { signature } => {
            let catalog = Catalog::load(cli.root)?;
            let signature = parse_signature(&signature)?;
            match catalog.store().delete(&signature)? {
                Some(_) => println!("Deleted {}", signature),
                None => println!("Nothing stored under {}", signature),
            }
        }

        Commands::Signature { file } => {
            let text = read_input(&file)?;
            println!("{}", SchemaStore::signature_of(text.as_str()));
        }

        Commands::Verify => {
            let catalog = Catalog::load(cli.root)?;
            let corrupted = catalog.store().verify()?;
            if corrupted.is_empty() {
                println!("All schemas match their signatures");
            } else {
                for signature in &corrupted {
                    println!("  corrupted: {}", signature);
                }
                bail!("{} schema(s) failed verification", corrupted.len());
            }
        }
    }

    Ok(())
}
