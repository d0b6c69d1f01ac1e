//! AC Bindings CLI
//!
//! Command-line interface for building catalogs and binding sets from schema
//! directories, resolving binding versions, validating payloads and probing
//! for a running application.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::EnvFilter;

use ac_bindings::{
    build_catalog, check_payload, load_documents, load_json, parse_documents, Bindings, Catalog,
    ConformanceError, Document, ReleaseLayout, Version, COMMAND_NAMESPACE,
};

#[derive(Parser)]
#[command(name = "ac-bindings")]
#[command(about = "Build and use typed bindings for the application's JSON command interface")]
#[command(version)]
struct Cli {
    /// Log debug output to stderr (RUST_LOG overrides)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the class/command catalog of a schema directory
    Catalog {
        /// Directory containing schema documents (*.json)
        dir: PathBuf,

        /// Output file (stdout if not specified)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Write a binding set for a release and build
    Generate {
        /// Directory containing schema documents (*.json)
        dir: PathBuf,

        /// Target release (>= 24)
        #[arg(long)]
        release: u32,

        /// Target build (>= 1)
        #[arg(long)]
        build: u32,

        /// Root of the binding-set layout
        #[arg(long)]
        out: PathBuf,

        /// Command namespace recorded in the manifest
        #[arg(long, default_value = COMMAND_NAMESPACE)]
        namespace: String,
    },

    /// Print the binding set chosen for a release and build
    Resolve {
        /// Root of the binding-set layout
        root: PathBuf,

        #[arg(long)]
        release: u32,

        #[arg(long)]
        build: u32,
    },

    /// Construct a class from a payload and report validation errors
    Validate {
        /// Directory containing schema documents (*.json)
        dir: PathBuf,

        /// Payload file to validate
        payload: PathBuf,

        /// Class to construct (e.g. ElementId, GetProductInfo_response)
        #[arg(long)]
        class: String,

        /// Output results as JSON (for automation)
        #[arg(long)]
        json: bool,

        /// Also validate against the schema definition with jsonschema
        #[arg(long)]
        schema_check: bool,
    },

    /// Find a running application on the local port range
    Probe {
        /// Scheme and host of the application
        #[arg(long, default_value = ac_bindings::DEFAULT_HOST)]
        host: String,

        /// Try only this port
        #[arg(long)]
        port: Option<u16>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Catalog {
            dir,
            output,
            pretty,
        } => run_catalog(&dir, output, pretty),
        Commands::Generate {
            dir,
            release,
            build,
            out,
            namespace,
        } => run_generate(&dir, Version::new(release, build), &out, &namespace),
        Commands::Resolve {
            root,
            release,
            build,
        } => run_resolve(&root, Version::new(release, build)),
        Commands::Validate {
            dir,
            payload,
            class,
            json,
            schema_check,
        } => run_validate(&dir, &payload, &class, json, schema_check),
        Commands::Probe { host, port } => run_probe(host, port),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::WARN };
    // Ignore the error when a subscriber is already installed.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn load_catalog(dir: &Path) -> Result<(Vec<Document>, Catalog), u8> {
    let documents = load_documents(dir).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;
    let set = parse_documents(&documents).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;
    let catalog = build_catalog(&set).map_err(|e| {
        eprintln!("Error: {}", e);
        2u8
    })?;
    Ok((documents, catalog))
}

fn run_catalog(dir: &Path, output: Option<PathBuf>, pretty: bool) -> Result<(), u8> {
    let (_, catalog) = load_catalog(dir)?;

    let json_output = if pretty {
        serde_json::to_string_pretty(&catalog)
    } else {
        serde_json::to_string(&catalog)
    }
    .map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })?;

    match output {
        Some(path) => {
            std::fs::write(&path, &json_output).map_err(|e| {
                eprintln!("Error writing to {}: {}", path.display(), e);
                3u8
            })?;
        }
        None => {
            println!("{}", json_output);
        }
    }

    Ok(())
}

fn run_generate(dir: &Path, version: Version, out: &Path, namespace: &str) -> Result<(), u8> {
    let (_, catalog) = load_catalog(dir)?;

    // Refuse to write a binding set the runtime could not load.
    Bindings::from_catalog(catalog.clone()).map_err(|e| {
        eprintln!("Error: {}", e);
        2u8
    })?;

    let layout = ReleaseLayout::new(out);
    layout.write_with_namespace(version, &catalog, namespace).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;

    println!(
        "Wrote {} ({} classes, {} commands)",
        version,
        catalog.classes.len(),
        catalog.commands.len()
    );
    Ok(())
}

fn run_resolve(root: &Path, target: Version) -> Result<(), u8> {
    let chosen = ReleaseLayout::new(root).resolve(target).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;
    println!("{}", chosen);
    Ok(())
}

fn run_validate(
    dir: &Path,
    payload_path: &Path,
    class: &str,
    json_output: bool,
    schema_check: bool,
) -> Result<(), u8> {
    let payload = load_json(payload_path).map_err(|e| {
        report_error(json_output, &format!("loading payload: {}", e));
        e.exit_code() as u8
    })?;
    let (documents, catalog) = load_catalog(dir)?;
    let bindings = Bindings::from_catalog(catalog).map_err(|e| {
        report_error(json_output, &e.to_string());
        2u8
    })?;

    let mut errors: Vec<String> = Vec::new();
    match bindings.from_dict(class, &payload) {
        Ok(instance) => {
            tracing::debug!(class = instance.class_name(), "payload constructed");
        }
        Err(ac_bindings::ConstructionError::UnknownClass { class }) => {
            report_error(json_output, &format!("unknown class {}", class));
            return Err(2);
        }
        Err(e) => errors.push(e.to_string()),
    }

    if schema_check {
        match check_payload(&documents, class, &payload) {
            Ok(()) => {}
            Err(ConformanceError::Invalid { violations }) => {
                errors.extend(violations.iter().map(|v| format!("schema: {}", v)));
            }
            Err(e) => {
                report_error(json_output, &e.to_string());
                return Err(e.exit_code() as u8);
            }
        }
    }

    if errors.is_empty() {
        if json_output {
            println!(r#"{{"valid":true}}"#);
        } else {
            println!("Valid");
        }
        Ok(())
    } else {
        if json_output {
            let output = serde_json::json!({
                "valid": false,
                "errors": errors
            });
            println!("{}", output);
        } else {
            eprintln!("Validation failed:");
            for error in errors {
                eprintln!("  {}", error);
            }
        }
        Err(1)
    }
}

/// Output an error message in plain text or JSON format.
fn report_error(json_output: bool, msg: &str) {
    if json_output {
        println!("{}", serde_json::json!({"valid": false, "error": msg}));
    } else {
        eprintln!("Error: {}", msg);
    }
}

#[cfg(feature = "remote")]
fn run_probe(host: String, port: Option<u16>) -> Result<(), u8> {
    use ac_bindings::{probe, Error, HttpTransport, ProbeOptions};

    let mut options = ProbeOptions::new().host(host);
    if let Some(port) = port {
        options = options.port(port);
    }
    let timeout = options.timeout;

    let endpoint = probe(&options, |url| HttpTransport::with_timeout(url, timeout)).map_err(|e| {
        eprintln!("Error: {}", e);
        Error::from(e).exit_code() as u8
    })?;

    match endpoint {
        Some(endpoint) => {
            let output = serde_json::json!({
                "port": endpoint.port,
                "product": endpoint.product,
            });
            println!("{}", output);
            Ok(())
        }
        None => {
            eprintln!(
                "Error: no live endpoint on ports {}-{}",
                options.first_port(),
                options.last_port()
            );
            Err(3)
        }
    }
}

#[cfg(not(feature = "remote"))]
fn run_probe(_host: String, _port: Option<u16>) -> Result<(), u8> {
    eprintln!("Error: probing requires the `remote` feature");
    Err(2)
}
