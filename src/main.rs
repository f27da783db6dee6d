//! flowgate: traffic-shaping and access-control gateway
//!
//! This is the main entry point for the production gateway.
//!
//! # Usage
//!
//! ```bash
//! # Run with default configuration
//! sudo ./flowgate
//!
//! # Run with custom configuration
//! sudo ./flowgate -c /path/to/config.json
//!
//! # Run with environment overrides
//! FLOWGATE_LOG_LEVEL=debug sudo ./flowgate
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use tokio::signal;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use flowgate::config::{load_config_with_env, Config};
use flowgate::instance::Instance;
use flowgate::ring::{MemoryRing, MemoryRingPeer, RingTransport, RingWorker};
use flowgate::{bridge, control, overlord};

/// Command-line arguments
struct Args {
    /// Configuration file path
    config_path: PathBuf,
    /// Generate default configuration
    generate_config: bool,
    /// Check configuration only
    check_config: bool,
    /// Show ring geometry for one interface and exit
    show_interface: Option<String>,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config_path = PathBuf::from("/etc/flowgate/config.json");
        let mut generate_config = false;
        let mut check_config = false;
        let mut show_interface = None;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    if let Some(path) = args.next() {
                        config_path = PathBuf::from(path);
                    }
                }
                "-g" | "--generate-config" => {
                    generate_config = true;
                }
                "--check" => {
                    check_config = true;
                }
                "-I" | "--interface-info" => {
                    show_interface = args.next();
                }
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-v" | "--version" => {
                    println!("flowgate v{}", flowgate::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {arg}");
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        Self {
            config_path,
            generate_config,
            check_config,
            show_interface,
        }
    }
}

fn print_help() {
    println!(
        r#"flowgate v{}

Traffic-shaping and access-control gateway with ring-based packet I/O.

USAGE:
    flowgate [OPTIONS]

OPTIONS:
    -c, --config <PATH>     Configuration file path [default: /etc/flowgate/config.json]
    -g, --generate-config   Generate default configuration and exit
    --check                 Check configuration and exit
    -I, --interface-info <IFACE>
                            Show ring geometry for an interface and exit
    -h, --help              Print help information
    -v, --version           Print version information

ENVIRONMENT:
    FLOWGATE_LOG_LEVEL        Override log level (trace, debug, info, warn, error)
    FLOWGATE_CONTROL_LISTEN   Override control listener address
    FLOWGATE_OVERLORD_THREADS Override sweeper thread count

REQUIREMENTS:
    - One LAN/WAN interface pair per ring worker
    - A ring transport backend (the built-in memory backend needs none)
    - CAP_NET_RAW for hardware ring backends
"#,
        flowgate::VERSION
    );
}

/// Initialize logging
fn init_logging(config: &Config) {
    let level = match config.log.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("tokio=warn".parse().unwrap());

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.log.target);

    if config.log.format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// Print ring geometry for one configured interface
fn print_interface_info(config: &Config, iface: &str) {
    let pairs: Vec<_> = config
        .interfaces
        .iter()
        .enumerate()
        .filter(|(_, pair)| pair.lan == iface || pair.wan == iface)
        .collect();

    if pairs.is_empty() {
        eprintln!("Interface {iface} is not configured");
        std::process::exit(1);
    }

    println!("Interface: {iface}");
    println!("Rings:     {}", pairs.len());
    let mut total = 0usize;
    for (idx, _) in &pairs {
        let ring_id = u16::try_from(*idx).unwrap_or(u16::MAX);
        let (ring, _peer) = MemoryRing::with_peer(iface, ring_id, config.transport.ring_slots);
        let geometry = ring.geometry();
        println!(
            "  ring {}: {} slots, {} bytes",
            geometry.ring_id, geometry.slots, geometry.memory_bytes
        );
        total += geometry.memory_bytes;
    }
    println!("Total memory: {total} bytes");
}

/// Build one ring worker per configured interface pair
///
/// The wire-side peers are kept alive for the life of the process; with
/// the memory backend they are where an external harness injects and
/// drains frames.
fn build_ring_workers(
    instance: &Arc<Instance>,
) -> (Vec<RingWorker>, Vec<(MemoryRingPeer, MemoryRingPeer)>) {
    let slots = instance.config().transport.ring_slots;
    let mut workers = Vec::new();
    let mut peers = Vec::new();

    for (idx, pair) in instance.config().interfaces.iter().enumerate() {
        let ring_id = u16::try_from(idx).unwrap_or(u16::MAX);
        let (lan, lan_peer) = MemoryRing::with_peer(&pair.lan, ring_id, slots);
        let (wan, wan_peer) = MemoryRing::with_peer(&pair.wan, ring_id, slots);

        workers.push(RingWorker::new(
            Arc::clone(instance),
            Box::new(lan),
            Box::new(wan),
            pair.affinity,
        ));
        peers.push((lan_peer, wan_peer));
    }
    (workers, peers)
}

/// Main application entry point
#[tokio::main]
async fn main() -> Result<()> {
    let start_time = Instant::now();

    let args = Args::parse();

    if args.generate_config {
        flowgate::config::create_default_config(&args.config_path)?;
        println!("Generated default configuration at {:?}", args.config_path);
        return Ok(());
    }

    let config = load_config_with_env(&args.config_path).map_err(|e| {
        anyhow::anyhow!(
            "Failed to load configuration from {:?}: {}",
            args.config_path,
            e
        )
    })?;

    if args.check_config {
        println!("Configuration is valid");
        return Ok(());
    }

    if let Some(iface) = args.show_interface {
        print_interface_info(&config, &iface);
        return Ok(());
    }

    init_logging(&config);

    info!("flowgate v{}", flowgate::VERSION);
    info!("Configuration loaded from {:?}", args.config_path);

    let instance = Arc::new(Instance::new(Arc::new(config)));

    // AAA backend
    let radius_client = bridge::build_client(&instance.config().radius)
        .map_err(|e| anyhow::anyhow!("Failed to build RADIUS client: {e}"))?;

    // Packet path: one pinned worker per interface pair
    let (workers, _ring_peers) = build_ring_workers(&instance);
    for ring in instance.ring_stats() {
        let snap = ring.snapshot();
        info!(lan = %snap.lan, wan = %snap.wan, "Ring pair configured");
    }
    let worker_handles: Vec<_> = workers.into_iter().map(RingWorker::spawn).collect();

    // Lifecycle sweepers
    let overlord_handles = overlord::spawn_pool(&instance, &radius_client);

    // Control plane
    let control_handle = if instance.config().control.enabled {
        let listener = control::bind(&instance)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind control listener: {e}"))?;
        info!(addr = %instance.config().control.listen, "Control listener ready");
        Some(tokio::spawn(control::serve(Arc::clone(&instance), listener)))
    } else {
        None
    };

    info!(
        "Startup complete in {:.2}ms ({} ring workers, {} overlords)",
        start_time.elapsed().as_secs_f64() * 1000.0,
        worker_handles.len(),
        overlord_handles.len()
    );

    // Wait for a signal or a shutdown command over the control socket
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received SIGINT, initiating shutdown...");
        }
        _ = wait_for_sigterm() => {
            info!("Received SIGTERM, initiating shutdown...");
        }
        () = wait_for_abort(Arc::clone(&instance)) => {
            info!("Shutdown flag raised, initiating shutdown...");
        }
    }

    // Cooperative shutdown: raise the flag, then join every worker
    instance.request_shutdown();
    if let Some(handle) = control_handle {
        handle.abort();
    }

    let join_result = tokio::task::spawn_blocking(move || {
        for handle in worker_handles {
            if handle.join().is_err() {
                error!("Ring worker panicked");
            }
        }
        for handle in overlord_handles {
            if handle.join().is_err() {
                error!("Overlord panicked");
            }
        }
    })
    .await;
    if let Err(e) = join_result {
        error!("Worker join failed: {e}");
    }

    // Final stats
    let status = instance.status();
    info!(
        "Final state: {} sessions ({} unauthenticated), {} clients",
        status.sessions, status.unauth_sessions, status.clients
    );
    for ring in instance.ring_stats() {
        let snap = ring.snapshot();
        info!(
            "Ring {}<->{}: egress {}/{} packets passed, ingress {}/{} packets passed",
            snap.lan,
            snap.wan,
            snap.passed_packets.egress,
            snap.all_packets.egress,
            snap.passed_packets.ingress,
            snap.all_packets.ingress
        );
    }

    info!("Shutdown complete");
    Ok(())
}

/// Poll the process-wide abort flag raised by control commands
async fn wait_for_abort(instance: Arc<Instance>) {
    while !instance.is_aborted() {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
}

/// Wait for SIGTERM signal
#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to register SIGTERM handler");
    sigterm.recv().await;
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}
