use clap::{Parser, Subcommand};
use std::net::TcpStream;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::info;
use tracing_subscriber::EnvFilter;

use graphbridge::bridge::{default_process_environment, BridgeServer, HandlerKind};
use graphbridge::config::{load_config, BridgeConfig, DEFAULT_HOST, DEFAULT_PORT};
use graphbridge::document::{DocumentModel, InMemoryDocument};
use graphbridge::errors::{BridgeError, Result};
use graphbridge::types::{CommandEnvelope, NodeInfo, NodeKind, Position, SliderState};

/// Embedded command bridge for a live node-graph document.
#[derive(Parser)]
#[command(name = "graphbridge", about = "Embedded command bridge for a live node-graph document")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bridge over a demo in-memory document
    Serve {
        /// Host to bind to
        #[arg(long, default_value = DEFAULT_HOST)]
        host: String,
        /// Port to bind to
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
        /// Advertise this instance as headless (reclaimable by a newer one)
        #[arg(long)]
        headless: bool,
        /// Optional JSON config file; flags override its values
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Query a running bridge for its status
    Status {
        #[arg(long, default_value = DEFAULT_HOST)]
        host: String,
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },
    /// Ask a running bridge to stop
    Stop {
        #[arg(long, default_value = DEFAULT_HOST)]
        host: String,
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },
    /// Send an arbitrary command to a running bridge
    Send {
        /// Command type, e.g. get_context
        command: String,
        /// JSON object with the command parameters
        #[arg(long, default_value = "{}")]
        params: String,
        #[arg(long, default_value = DEFAULT_HOST)]
        host: String,
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Serve {
            host,
            port,
            headless,
            config,
        } => serve(host, port, headless, config),
        Commands::Status { host, port } => {
            let response = send_to(&host, port, CommandEnvelope::new("get_server_status"))?;
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        Commands::Stop { host, port } => {
            let response = send_to(&host, port, CommandEnvelope::new("stop_server"))?;
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        Commands::Send {
            command,
            params,
            host,
            port,
        } => {
            let params: serde_json::Map<String, Value> = serde_json::from_str(&params)
                .map_err(|e| BridgeError::Protocol(format!("--params must be a JSON object: {}", e)))?;
            let envelope = CommandEnvelope::with_params(command, params);
            let response = send_to(&host, port, envelope)?;
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
    }
}

fn serve(host: String, port: u16, headless: bool, config_path: Option<PathBuf>) -> Result<()> {
    let mut config = match config_path {
        Some(path) => load_config(&path)?,
        None => BridgeConfig::default(),
    };
    config.host = host;
    config.port = port;
    config.headless = headless;

    let document = demo_document();
    let model: Arc<dyn DocumentModel> = document.clone();
    let env = default_process_environment(&config);
    let server = BridgeServer::new(config, model, env)?;
    register_demo_handlers(&server, document);

    server.start()?;
    info!("serving; send a stop_server command to shut down");
    while server.is_running() {
        thread::sleep(Duration::from_millis(200));
    }
    server.stop();
    Ok(())
}

/// Posts one command to a running bridge and returns the response body.
fn send_to(host: &str, port: u16, envelope: CommandEnvelope) -> Result<Value> {
    let mut stream = TcpStream::connect((host, port))?;
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    graphbridge::bridge::protocol::write_command(&mut stream, &envelope)?;
    graphbridge::bridge::protocol::read_response(&mut stream)
}

/// A small slider -> component -> panel patch to serve when no real host
/// application is attached.
fn demo_document() -> Arc<InMemoryDocument> {
    let doc = Arc::new(InMemoryDocument::new());

    let mut slider = NodeInfo::new("slider-radius", NodeKind::Slider, "Radius");
    slider.position = Some(Position { x: 0.0, y: 0.0 });
    slider.slider = Some(SliderState {
        min: 0.0,
        max: 100.0,
        value: 25.0,
    });
    doc.add_node(slider);

    let mut circle = NodeInfo::new("comp-circle", NodeKind::Component, "Circle");
    circle.description = "Builds a circle from a radius".to_string();
    circle.position = Some(Position { x: 120.0, y: 0.0 });
    doc.add_node(circle);

    let mut panel = NodeInfo::new("panel-out", NodeKind::Panel, "Output");
    panel.position = Some(Position { x: 260.0, y: 0.0 });
    panel.panel_content = Some(String::new());
    doc.add_node(panel);

    let _ = doc.connect("slider-radius", "comp-circle");
    let _ = doc.connect("comp-circle", "panel-out");
    doc.register_owner("comp-circle-in-r", "comp-circle");
    doc.register_owner("comp-circle-out-c", "comp-circle");

    doc
}

/// Mutating demo handlers; each funnels through the host executor.
fn register_demo_handlers(server: &BridgeServer, doc: Arc<InMemoryDocument>) {
    let d = Arc::clone(&doc);
    server.register_handler("set_slider_value", HandlerKind::Mutating, move |params| {
        let id = require_str(params, "id")?;
        let value = params
            .get("value")
            .and_then(Value::as_f64)
            .ok_or_else(|| BridgeError::Handler("missing 'value' parameter".to_string()))?;
        let slider = d.set_slider_value(id, value)?;
        Ok(json!(slider))
    });

    let d = Arc::clone(&doc);
    server.register_handler("set_panel_text", HandlerKind::Mutating, move |params| {
        let id = require_str(params, "id")?;
        let text = require_str(params, "text")?;
        d.set_panel_text(id, text)?;
        Ok(json!("Updated"))
    });

    let d = Arc::clone(&doc);
    server.register_handler("connect", HandlerKind::Mutating, move |params| {
        let source = require_str(params, "source")?;
        let target = require_str(params, "target")?;
        d.connect(source, target)?;
        Ok(json!("Connected"))
    });

    server.register_handler("select", HandlerKind::Mutating, move |params| {
        let ids: Vec<String> = params
            .get("ids")
            .cloned()
            .map(serde_json::from_value)
            .transpose()?
            .unwrap_or_default();
        doc.select(&ids);
        Ok(json!(ids.len()))
    });
}

fn require_str<'a>(params: &'a serde_json::Map<String, Value>, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| BridgeError::Handler(format!("missing '{}' parameter", key)))
}
