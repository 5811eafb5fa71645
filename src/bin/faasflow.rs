use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use faasflow::activities::ActivityCaller;
use faasflow::activities::builtin::EchoCaller;
use faasflow::activities::http::HttpActivityCaller;
use faasflow::compiler::loader::load_workflow;
use faasflow::compiler::{DurableGenerator, Generator, StepFunctionsGenerator, WorkflowsGenerator};
use faasflow::config::Config;
use faasflow::resolver::TemplateResolver;
use faasflow::runtime::Interpreter;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{Level, error, info};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// More output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// YAML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Interpret a workflow locally against the activities' HTTP triggers
    Run {
        /// Path to the workflow definition (.json, .yaml, .yml)
        file: PathBuf,

        /// Initial payload as JSON
        #[arg(long, short, default_value = "{}", value_parser = parse_payload)]
        payload: Value,

        /// Answer every activity with its input instead of calling it
        #[arg(long)]
        echo: bool,

        /// Correlation id; a fresh one is generated otherwise
        #[arg(long)]
        request_id: Option<String>,

        /// Per activity call timeout in seconds (0 disables)
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Nested sub-workflow depth limit
        #[arg(long)]
        max_depth: Option<usize>,
    },

    /// Compile a workflow into a backend's native document(s)
    Generate {
        /// Path to the workflow definition (.json, .yaml, .yml)
        file: PathBuf,

        #[arg(long, short, value_enum)]
        backend: Backend,

        /// Output directory; documents go to stdout otherwise
        #[arg(long, short)]
        out: Option<PathBuf>,

        /// Prefix of lifted Map workflow ids
        #[arg(long)]
        prefix: Option<String>,
    },

    /// Parse and validate a workflow definition
    Validate {
        /// Path to the workflow definition (.json, .yaml, .yml)
        file: PathBuf,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Backend {
    StepFunctions,
    Workflows,
    Durable,
}

fn parse_payload(s: &str) -> Result<Value, String> {
    serde_json::from_str(s).map_err(|e| format!("invalid JSON payload: {e}"))
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("workflow")
        .to_string()
}

/// Writes `documents` into `out`, or prints them when no directory is given.
fn emit(out: Option<&Path>, documents: &[(String, String)]) -> Result<()> {
    match out {
        Some(dir) => {
            fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
            for (file, content) in documents {
                let path = dir.join(file);
                fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;
                info!("Wrote {}", path.display());
            }
        }
        None => {
            for (file, content) in documents {
                if documents.len() > 1 {
                    println!("# {file}");
                }
                println!("{content}");
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let mut config = Config::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            file,
            payload,
            echo,
            request_id,
            timeout_secs,
            max_depth,
        } => {
            if let Some(secs) = timeout_secs {
                config.interpreter.activity_timeout_secs = secs;
            }
            if let Some(limit) = max_depth {
                config.interpreter.max_depth = limit;
            }

            let workflow = load_workflow(&file)?;
            let caller: Arc<dyn ActivityCaller> = if echo {
                info!("Running with echo activities");
                Arc::new(EchoCaller)
            } else {
                let resolver = TemplateResolver::new(config.activities.endpoint_template.clone())
                    .with_overrides(config.activities.endpoints.clone());
                Arc::new(HttpActivityCaller::new(Arc::new(resolver)))
            };

            let interpreter = Interpreter::with_config(caller, &config.interpreter);
            let result = match request_id {
                Some(id) => interpreter.run_with_request_id(&workflow, payload, &id).await,
                None => interpreter.run(&workflow, payload).await,
            };
            let execution = result.inspect_err(|err| {
                error!(state = %err.state, snapshot = %err.snapshot(), "Workflow failed");
            })?;
            println!("{}", serde_json::to_string_pretty(&execution)?);
        }

        Commands::Generate {
            file,
            backend,
            out,
            prefix,
        } => {
            let workflow = load_workflow(&file)?;
            let stem = file_stem(&file);

            let documents = match backend {
                Backend::StepFunctions => {
                    let resolver = TemplateResolver::new(config.compiler.resource_template.clone())
                        .with_overrides(config.compiler.resources.clone());
                    let mut generator = StepFunctionsGenerator::new(Arc::new(resolver));
                    vec![(format!("{stem}.asl.json"), generator.generate(&workflow)?)]
                }
                Backend::Workflows => {
                    let resolver = TemplateResolver::new(config.activities.endpoint_template.clone())
                        .with_overrides(config.activities.endpoints.clone());
                    let prefix = prefix
                        .or(config.compiler.workflow_prefix.clone())
                        .unwrap_or_else(|| stem.clone());
                    let mut generator = WorkflowsGenerator::new(Arc::new(resolver), prefix);
                    let mut documents = vec![(format!("{stem}.yaml"), generator.generate(&workflow)?)];
                    for (id, document) in generator.generate_maps()? {
                        documents.push((format!("{id}.yaml"), document));
                    }
                    documents
                }
                Backend::Durable => {
                    let mut generator = DurableGenerator::new();
                    vec![(format!("{stem}.py"), generator.generate(&workflow)?)]
                }
            };

            emit(out.as_deref(), &documents)?;
        }

        Commands::Validate { file } => {
            let workflow = load_workflow(&file)?;
            println!(
                "{}: ok ({} states, root '{}')",
                file.display(),
                workflow.states.len(),
                workflow.root
            );
        }
    }

    Ok(())
}
