//! Berth - deployment descriptor interpreter
//!
//! This is the main CLI entry point for Berth.

use berth::descriptor::{DescriptorParser, Document};
use berth::error::{BerthError, Result};
use berth::resolve::{hash, Resolver, StartupPlan};
use berth::settings::Settings;
use berth::validate::Validator;
use clap::{Parser, Subcommand, ValueEnum};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Berth - deployment descriptor interpreter
#[derive(Parser)]
#[command(name = "berth")]
#[command(author = "Evoker Industries")]
#[command(version)]
#[command(about = "Validate, resolve and normalize multi-container deployment descriptors", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Descriptor file; repeat to overlay later files on earlier ones
    #[arg(short, long, global = true)]
    file: Vec<PathBuf>,

    /// Directory relative paths are resolved against
    #[arg(long, global = true)]
    project_directory: Option<PathBuf>,

    /// Project name
    #[arg(short, long, global = true)]
    project_name: Option<String>,

    /// Do not substitute environment variables
    #[arg(long, global = true)]
    no_interpolate: bool,

    /// Settings file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the descriptor and report every problem
    ///
    /// Warnings such as a missing container_name only fail with --strict.
    Validate {
        /// Treat warnings (missing container_name, unused volumes, ...) as failures
        #[arg(long)]
        strict: bool,
        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
    /// Print the merged descriptor in canonical form
    Config,
    /// Resolve references and print the result as JSON
    Resolve,
    /// Print the startup order
    Order {
        /// Print the shutdown order instead
        #[arg(long)]
        reverse: bool,
    },
    /// List services
    Services,
    /// List named volumes
    Volumes,
    /// Print configuration digests
    Hash {
        /// Service names (all when empty)
        services: Vec<String>,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// A loaded descriptor with its project context
struct Project {
    document: Document,
    name: String,
    directory: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load(cli.config.as_deref())?;
    let project = load_project(&cli, &settings)?;

    match cli.command {
        Commands::Validate { strict, format } => {
            let strict = strict || settings.strict;
            let validator =
                Validator::new(settings.validation_options(Some(project.directory.clone())));
            let report = validator.validate(&project.document);
            let valid = report.is_valid(strict);

            match format {
                OutputFormat::Text => {
                    for finding in &report.findings {
                        println!("{}", finding);
                    }
                    println!(
                        "{}: {} error(s), {} warning(s)",
                        project.name,
                        report.error_count(),
                        report.warning_count()
                    );
                }
                OutputFormat::Json => {
                    let output = serde_json::json!({
                        "project": project.name,
                        "valid": valid,
                        "errors": report.error_count(),
                        "warnings": report.warning_count(),
                        "findings": report.findings,
                    });
                    println!("{}", serde_json::to_string_pretty(&output)?);
                }
            }

            if !valid {
                let failures = if strict {
                    report.findings.len()
                } else {
                    report.error_count()
                };
                return Err(BerthError::Invalid(failures));
            }
        }

        Commands::Config => {
            print!("{}", DescriptorParser::to_yaml(&project.document)?);
        }

        Commands::Resolve => {
            let resolved = Resolver::new(&project.name)?.resolve(&project.document)?;
            println!("{}", serde_json::to_string_pretty(&resolved)?);
        }

        Commands::Order { reverse } => {
            let resolved = Resolver::new(&project.name)?.resolve(&project.document)?;
            for line in stage_lines(&resolved.plan, reverse) {
                println!("{}", line);
            }
        }

        Commands::Services => {
            for name in project.document.service_names() {
                println!("{}", name);
            }
        }

        Commands::Volumes => {
            for name in project.document.volume_names() {
                println!("{}", name);
            }
        }

        Commands::Hash { services } => {
            let digests = hash::digests(&project.document)?;
            if services.is_empty() {
                for (name, digest) in &digests {
                    println!("{} {}", name, digest);
                }
            } else {
                for name in services {
                    let digest = digests
                        .get(&name)
                        .ok_or_else(|| BerthError::ServiceNotFound(name.clone()))?;
                    println!("{} {}", name, digest);
                }
            }
        }
    }

    Ok(())
}

/// Locate, read and merge the descriptor files for this invocation
fn load_project(cli: &Cli, settings: &Settings) -> Result<Project> {
    let working_dir = match &cli.project_directory {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };

    let files = if cli.file.is_empty() {
        let found = DescriptorParser::find_descriptor(&working_dir)
            .ok_or_else(|| BerthError::DescriptorNotFound(working_dir.clone()))?;
        vec![found]
    } else {
        cli.file.clone()
    };

    let directory = match &cli.project_directory {
        Some(dir) => dir.clone(),
        None => files
            .first()
            .and_then(|f| f.parent())
            .filter(|p| !p.as_os_str().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| working_dir.clone()),
    };

    let env: HashMap<String, String> = std::env::vars().collect();
    let env = if cli.no_interpolate { None } else { Some(&env) };
    let document = DescriptorParser::parse_files(&files, env)?;

    tracing::debug!(
        "Loaded {} service(s) from {} file(s)",
        document.services.len(),
        files.len()
    );

    let name = project_name(cli.project_name.as_deref(), &document, settings, &directory);

    Ok(Project {
        document,
        name,
        directory,
    })
}

/// Project name: the CLI flag, then the descriptor's `name`, then settings,
/// then the project directory's name
fn project_name(
    explicit: Option<&str>,
    document: &Document,
    settings: &Settings,
    directory: &Path,
) -> String {
    explicit
        .map(str::to_string)
        .or_else(|| document.name.clone())
        .or_else(|| settings.default_project_name.clone())
        .unwrap_or_else(|| {
            directory
                .canonicalize()
                .unwrap_or_else(|_| directory.to_path_buf())
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or("default")
                .to_string()
        })
}

/// Numbered startup stages, last stage first when `reverse` is set
fn stage_lines(plan: &StartupPlan, reverse: bool) -> Vec<String> {
    let mut stages: Vec<&Vec<String>> = plan.stages.iter().collect();
    if reverse {
        stages.reverse();
    }
    stages
        .iter()
        .enumerate()
        .map(|(index, stage)| format!("{}: {}", index + 1, stage.join(", ")))
        .collect()
}
