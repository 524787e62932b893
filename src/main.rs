use clap::{Parser, Subcommand};
use flownat::capture::{AfPacketSocket, Capture};
use flownat::config;
use flownat::dataplane::{Clock, InterfaceId, SharedTranslator};
use flownat::telemetry::{init_logging, NatMetrics};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Interval between metrics log lines
const METRICS_INTERVAL: Duration = Duration::from_secs(60);

/// Large enough for any frame AF_PACKET hands over with offloads on
const RX_BUFFER_SIZE: usize = 65536;

#[derive(Parser)]
#[command(name = "flownat")]
#[command(about = "Stateful NAPT data plane")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the translator on the configured interfaces
    Run {
        /// Path to flownat.toml
        #[arg(short, long, default_value = "flownat.toml")]
        config: PathBuf,
    },
    /// Check flownat.toml and print diagnostics
    Validate {
        /// Path to flownat.toml
        #[arg(short, long, default_value = "flownat.toml")]
        config: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run { config } => cmd_run(&config),
        Commands::Validate { config } => cmd_validate(&config),
    };

    if let Err(e) = result {
        eprintln!("[ERROR] {}", e);
        std::process::exit(1);
    }
}

/// One bound interface
struct Port<C> {
    name: String,
    socket: Arc<C>,
}

type Ports<C> = Arc<HashMap<InterfaceId, Port<C>>>;

fn cmd_run(config_path: &PathBuf) -> Result<(), String> {
    use tokio::runtime::Runtime;

    let cfg = config::load(config_path).map_err(|e| format!("Failed to load config: {}", e))?;

    let validation = config::validate(&cfg);
    validation.print_diagnostics();
    if validation.has_errors() {
        return Err("Validation failed".to_string());
    }

    init_logging(Some(&cfg.logging));
    info!("Loaded {}", config_path.display());

    let nat_config = cfg.nat_config().map_err(|e| e.to_string())?;
    let metrics = Arc::new(NatMetrics::new());
    let nat = SharedTranslator::with_metrics(nat_config, Arc::clone(&metrics))
        .map_err(|e| format!("Failed to create translator: {}", e))?;

    let rt = Runtime::new().map_err(|e| format!("Failed to create runtime: {}", e))?;

    rt.block_on(async move {
        let mut ports = HashMap::new();
        for (name, iface) in &cfg.interfaces {
            info!("Binding to interface {}...", name);
            let socket = AfPacketSocket::bind(name).map_err(|e| {
                format!(
                    "Failed to bind to {}: {}. Run with root privileges.",
                    name, e
                )
            })?;
            info!(
                "  {} bound: id={}, ifindex={}",
                name,
                iface.id,
                socket.ifindex()
            );

            metrics.register_interface(name);
            ports.insert(
                InterfaceId(iface.id),
                Port {
                    name: name.clone(),
                    socket: Arc::new(socket),
                },
            );
        }
        let ports: Ports<AfPacketSocket> = Arc::new(ports);

        let clock = Clock::new();
        let mut workers = Vec::new();
        for ingress in ports.keys().copied() {
            workers.push(tokio::spawn(run_port(
                ingress,
                Arc::clone(&ports),
                nat.clone(),
                clock,
            )));
        }
        info!("Translator started on {} interfaces", ports.len());

        let mut metrics_timer = tokio::time::interval(METRICS_INTERVAL);
        loop {
            tokio::select! {
                _ = metrics_timer.tick() => {
                    log_metrics(&metrics);
                }
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        error!("Failed to wait for Ctrl-C: {}", e);
                    }
                    break;
                }
            }
        }

        info!("Shutting down");
        for worker in workers {
            worker.abort();
        }
        log_metrics(&metrics);
        Ok(())
    })
}

/// Receive on `ingress`, translate, send on the egress interface
async fn run_port<C: Capture + 'static>(
    ingress: InterfaceId,
    ports: Ports<C>,
    nat: SharedTranslator,
    clock: Clock,
) {
    let Some(port) = ports.get(&ingress) else {
        return;
    };
    let metrics = Arc::clone(nat.metrics());
    let mut buf = vec![0u8; RX_BUFFER_SIZE];

    loop {
        let rx = match port.socket.recv(&mut buf).await {
            Ok(rx) => rx,
            Err(e) => {
                error!("Receive error on {}: {}", port.name, e);
                metrics.record_rx_error(&port.name);
                continue;
            }
        };
        metrics.record_rx(&port.name, rx.len);

        let Some(translation) = nat.process(ingress, &buf[..rx.len], clock.now()) else {
            continue;
        };

        let Some(out) = ports.get(&translation.egress) else {
            warn!("No socket for egress {}", translation.egress);
            continue;
        };
        match out.socket.send(&translation.packet).await {
            Ok(len) => metrics.record_tx(&out.name, len),
            Err(e) => {
                warn!("Failed to send on {}: {}", out.name, e);
                metrics.record_tx_error(&out.name);
            }
        }
    }
}

fn log_metrics(metrics: &NatMetrics) {
    let pairs = metrics.export();
    let summary: Vec<String> = pairs
        .iter()
        .filter(|(_, value)| *value > 0)
        .map(|(key, value)| format!("{}={}", key, value))
        .collect();
    info!("metrics: {}", summary.join(" "));
    debug!(?pairs, "metrics detail");
}

fn cmd_validate(config_path: &PathBuf) -> Result<(), String> {
    println!("[INFO] Validating {}...", config_path.display());

    let cfg = config::load(config_path).map_err(|e| format!("Failed to parse config: {}", e))?;

    let validation = config::validate(&cfg);
    validation.print_diagnostics();

    if validation.has_errors() {
        return Err("Validation failed".to_string());
    }

    let nat = cfg.nat_config().map_err(|e| e.to_string())?;
    println!(
        "[INFO] Configuration is valid: {} ports {}..={} on {}, idle timeout {}s",
        nat.capacity,
        nat.start_port,
        nat.end_port().unwrap_or(nat.start_port),
        cfg.nat.external_interface,
        nat.idle_timeout.as_secs()
    );
    Ok(())
}
