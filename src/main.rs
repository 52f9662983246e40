//! Storage Cluster Operator
//!
//! Reconciles StorageCluster and multisite ObjectStore resources. Serves
//! liveness/readiness probes and Prometheus metrics next to the controllers.

use clap::Parser;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use kube::Client;
use prometheus::Registry;
use storage_cluster_operator::config::DEFAULT_CSI_DRIVERS;
use storage_cluster_operator::controller::context::Ports;
use storage_cluster_operator::controlplane::DEFAULT_ADMIN_ENDPOINT;
use storage_cluster_operator::{
    run_controllers, AdminClient, AdminConfig, Context, DaemonProvisioner, Error, HttpProber,
    KubeResources, Metrics, OperatorConfig, Result,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Storage Cluster Operator - reconciles storage clusters and object stores
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Namespace the operator runs in
    #[arg(long, env = "POD_NAMESPACE", default_value = "storage-system")]
    operator_namespace: String,

    /// Storage daemon admin endpoint, `{namespace}` is replaced per cluster
    #[arg(long, env = "ADMIN_ENDPOINT", default_value = DEFAULT_ADMIN_ENDPOINT)]
    admin_endpoint: String,

    /// Timeout of storage daemon admin calls in seconds
    #[arg(long, env = "ADMIN_TIMEOUT", default_value = "30")]
    admin_timeout_secs: u64,

    /// CSI drivers whose volumes block cluster deletion
    #[arg(long, env = "CSI_DRIVERS", value_delimiter = ',')]
    csi_drivers: Vec<String>,

    /// Skip legacy attachment records during deletion checks
    #[arg(long, env = "DISABLE_LEGACY_ATTACHMENT_CHECK")]
    disable_legacy_attachment_check: bool,

    /// Do not reconcile clusters on hot-plug config map changes
    #[arg(long, env = "DISABLE_HOTPLUG_WATCH")]
    disable_hotplug_watch: bool,

    /// Requeue interval while a dependency is missing, in seconds
    #[arg(long, env = "DEPENDENCY_REQUEUE", default_value = "10")]
    dependency_requeue_secs: u64,

    /// Requeue interval while deletion is blocked, in seconds
    #[arg(long, env = "FINALIZER_BLOCKED_REQUEUE", default_value = "10")]
    finalizer_blocked_requeue_secs: u64,

    /// Gateway probe timeout in seconds
    #[arg(long, env = "PROBE_TIMEOUT", default_value = "5")]
    probe_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Print the CRD manifests and exit
    #[arg(long)]
    print_crds: bool,
}

impl Args {
    fn operator_config(&self) -> OperatorConfig {
        let csi_drivers = if self.csi_drivers.is_empty() {
            DEFAULT_CSI_DRIVERS.iter().map(|d| d.to_string()).collect()
        } else {
            self.csi_drivers.clone()
        };
        OperatorConfig {
            operator_namespace: self.operator_namespace.clone(),
            disable_legacy_attachment_check: self.disable_legacy_attachment_check,
            disable_hotplug_watch: self.disable_hotplug_watch,
            csi_drivers,
            dependency_requeue: Duration::from_secs(self.dependency_requeue_secs),
            finalizer_blocked_requeue: Duration::from_secs(self.finalizer_blocked_requeue_secs),
            probe_timeout: Duration::from_secs(self.probe_timeout_secs),
            ..Default::default()
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_crds {
        print!("{}", storage_cluster_operator::crd::render_crds()?);
        return Ok(());
    }

    init_logging(&args);

    let config = args.operator_config();
    info!("Starting Storage Cluster Operator");
    info!("  Version: {}", storage_cluster_operator::VERSION);
    info!("  Operator namespace: {}", config.operator_namespace);
    info!("  Admin endpoint: {}", args.admin_endpoint);
    info!("  Legacy attachment check: {}", !config.disable_legacy_attachment_check);
    info!("  Hot-plug watch: {}", !config.disable_hotplug_watch);

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let admin = AdminClient::new(AdminConfig {
        endpoint_template: args.admin_endpoint.clone(),
        timeout: Duration::from_secs(args.admin_timeout_secs),
    })?;
    let resources = Arc::new(KubeResources::new(client.clone()));
    let provisioner = Arc::new(DaemonProvisioner::new(admin, client.clone()));
    let prober = Arc::new(HttpProber::new(config.probe_timeout)?);

    let ctx = Arc::new(Context::new(
        Ports {
            clusters: resources.clone(),
            object_stores: resources.clone(),
            multisite: resources.clone(),
            consumers: resources,
            cluster_provisioner: provisioner.clone(),
            store_provisioner: provisioner,
            prober,
        },
        config,
    ));

    let registry = Arc::new(Registry::new());
    let metrics = Metrics::new(&registry)?;

    // Start health server
    let health_addr = args.health_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    let metrics_registry = registry.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, metrics_registry).await {
            error!("Metrics server error: {}", e);
        }
    });

    info!("Starting controllers");
    tokio::select! {
        _ = run_controllers(client, ctx.clone(), metrics) => {
            info!("Controllers exited");
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
        }
    }

    ctx.health.shutdown();
    info!("Operator shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "kube=info", "reqwest=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Health Server
// =============================================================================

fn text_response(status: hyper::StatusCode, body: &'static str) -> hyper::Response<hyper::Body> {
    let mut response = hyper::Response::new(hyper::Body::from(body));
    *response.status_mut() = status;
    response
}

async fn run_health_server(addr: &str) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/healthz" | "/livez" | "/readyz" => text_response(StatusCode::OK, "ok"),
                _ => text_response(StatusCode::NOT_FOUND, "not found"),
            };
            Ok::<_, Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Configuration(format!("Invalid health server address: {}", e)))?;

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str, registry: Arc<Registry>) -> Result<()> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    let make_svc = make_service_fn(move |_conn| {
        let registry = registry.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                let registry = registry.clone();
                async move {
                    if req.uri().path() != "/metrics" {
                        return Ok::<_, Infallible>(text_response(StatusCode::NOT_FOUND, "not found"));
                    }
                    let encoder = TextEncoder::new();
                    let mut buffer = Vec::new();
                    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
                        error!("Failed to encode metrics: {}", e);
                        return Ok(text_response(StatusCode::INTERNAL_SERVER_ERROR, "encode error"));
                    }
                    let mut response = Response::new(Body::from(buffer));
                    if let Ok(value) = HeaderValue::from_str(encoder.format_type()) {
                        response.headers_mut().insert(CONTENT_TYPE, value);
                    }
                    Ok(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr
        .parse()
        .map_err(|e| Error::Configuration(format!("Invalid metrics server address: {}", e)))?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
