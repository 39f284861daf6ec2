//! wftemplate CLI - JSON bridge to the template engine
//!
//! Commands: templates, check, execute, export
//! Outputs JSON to stdout, logs to stderr
//! Returns 2 on execution failure

use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use wftemplate_core::{
    archive, check_params, execution_fingerprint, result_digest, EngineConfig, ExecutionRequest,
    Renderer, TemplateExecutor, TemplateRegistry, Validator,
};

#[derive(Parser)]
#[command(name = "wftemplate-cli")]
#[command(about = "wftemplate CLI - Workflow Template Engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to engine configuration
    #[arg(short, long, default_value = "engine.toml")]
    config: PathBuf,

    /// Path to templates directory (overrides config)
    #[arg(short, long)]
    templates_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List available templates
    Templates,

    /// Validate a template and a request against it
    Check {
        /// Template ID
        #[arg(short, long)]
        template: String,

        /// JSON payload (ExecutionRequest)
        #[arg(short, long)]
        payload: String,
    },

    /// Render every artifact of a template
    Execute {
        /// Template ID
        #[arg(short, long)]
        template: String,

        /// JSON payload (ExecutionRequest)
        #[arg(short, long)]
        payload: String,
    },

    /// Render and write the artifacts as a tar archive
    Export {
        /// Template ID
        #[arg(short, long)]
        template: String,

        /// JSON payload (ExecutionRequest)
        #[arg(short, long)]
        payload: String,

        /// Archive file to write
        #[arg(short, long)]
        output: PathBuf,
    },
}

fn init_logging(config: &EngineConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn fail(code: u8, error: impl std::fmt::Display) -> ExitCode {
    let output = serde_json::json!({ "success": false, "error": error.to_string() });
    println!("{}", output);
    ExitCode::from(code)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match EngineConfig::load(&cli.config) {
        Ok(c) => c,
        Err(e) => return fail(1, e),
    };
    init_logging(&config);

    let templates_dir = cli.templates_dir.unwrap_or_else(|| config.templates_dir.clone());
    let registry = match TemplateRegistry::load_from_dir(&templates_dir) {
        Ok(r) => r,
        Err(e) => return fail(1, format!("Failed to load templates: {}", e)),
    };
    debug!(dir = %templates_dir.display(), count = registry.list().len(), "templates loaded");

    let renderer = Renderer::new(config.delimiters.clone());

    let (template_id, payload) = match &cli.command {
        Commands::Templates => {
            let templates: Vec<_> = registry
                .list()
                .iter()
                .map(|t| serde_json::json!({
                    "id": t.id,
                    "name": t.name,
                    "version": t.version,
                    "groupId": t.group_id,
                    "parameters": t.parameters,
                    "pipelines": t.pipelines.len(),
                    "applications": t.applications.len(),
                }))
                .collect();
            println!("{}", serde_json::to_string_pretty(&templates).unwrap());
            return ExitCode::SUCCESS;
        }
        Commands::Check { template, payload }
        | Commands::Execute { template, payload }
        | Commands::Export { template, payload, .. } => (template, payload),
    };

    let template = match registry.get(template_id) {
        Some(t) => t,
        None => return fail(1, format!("Template not found: {}", template_id)),
    };
    let request: ExecutionRequest = match serde_json::from_str(payload) {
        Ok(r) => r,
        Err(e) => return fail(1, format!("Invalid payload: {}", e)),
    };

    if let Commands::Check { .. } = cli.command {
        let result = Validator::new(renderer).validate_request(template, &request);
        println!("{}", serde_json::to_string_pretty(&result).unwrap());
        return if result.valid { ExitCode::SUCCESS } else { ExitCode::from(2) };
    }

    if let Err(e) = check_params(template, &request) {
        return fail(2, e);
    }
    let executor = TemplateExecutor::new(renderer);
    let result = match executor.execute(template, &request) {
        Ok(r) => r,
        Err(e) => return fail(2, e),
    };

    match cli.command {
        Commands::Export { output, .. } => {
            let entries = match archive::archive_entries(&template.id, &result) {
                Ok(entries) => entries,
                Err(e) => return fail(2, e),
            };
            let file = match File::create(&output) {
                Ok(f) => f,
                Err(e) => return fail(1, format!("Cannot create {}: {}", output.display(), e)),
            };
            let written = archive::write_archive(&entries, BufWriter::new(file))
                .and_then(|mut writer| writer.flush().map_err(Into::into));
            if let Err(e) = written {
                if let Err(rm) = std::fs::remove_file(&output) {
                    warn!(path = %output.display(), error = %rm, "cannot remove incomplete archive");
                }
                return fail(2, e);
            }
            let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
            let output = serde_json::json!({
                "success": true,
                "archive": output.display().to_string(),
                "entries": names,
            });
            println!("{}", serde_json::to_string_pretty(&output).unwrap());
        }
        _ => {
            let fingerprint = match execution_fingerprint(&template.id, template.version, &request) {
                Ok(f) => f,
                Err(e) => return fail(1, e),
            };
            let digest = match result_digest(&result) {
                Ok(d) => d,
                Err(e) => return fail(1, e),
            };
            let output = serde_json::json!({
                "success": true,
                "fingerprint": fingerprint,
                "digest": digest,
                "result": result,
            });
            println!("{}", serde_json::to_string_pretty(&output).unwrap());
        }
    }
    ExitCode::SUCCESS
}
