//! rtc-signal - WebRTC connectivity toolkit
//!
//! STUN NAT discovery, ICE candidate gathering and a WebSocket signaling relay.

mod config;
mod error;
mod ice;
mod peer_connection;
mod sdp;
mod signaling;
mod stun;
mod telemetry;

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Config;
use ice::conditions::{StaticConditions, StaticLocation};
use ice::provider::{CandidateProvider, LocalProvider, StunProvider, TurnProvider};
use ice::turn::TurnClient;
use ice::{CandidateCollector, CandidatePool, PrioritizationEngine, Strategy};
use peer_connection::RtcPeerConnection;
use sdp::SdpNegotiator;
use signaling::{ConnectionRegistry, PeerDirectory, SignalingMediator, SignalingServer};
use stun::StunClient;
use telemetry::{MetricsSink, TracingMetrics};

#[derive(Parser)]
#[command(name = "rtc-signal")]
#[command(about = "WebRTC connectivity: STUN, ICE gathering and WebSocket signaling", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to the per-user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the WebSocket signaling relay
    Serve {
        /// Listen address, overrides the config file
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Query a STUN server for the public address and NAT type
    Stun {
        /// `host:port` of the STUN server
        #[arg(short, long, default_value = stun::DEFAULT_STUN_SERVER)]
        server: String,
    },

    /// Gather ICE candidates and print an SDP offer
    Gather {
        /// Candidate ordering after scoring
        #[arg(short, long, value_enum, default_value = "balanced")]
        strategy: Strategy,
    },

    /// Show the effective configuration
    Config {
        /// Write the defaults to the config file
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config_path = match cli.config {
        Some(path) => path,
        None => Config::default_path()?,
    };
    let config = Config::load_from(&config_path)?;

    match cli.command {
        Commands::Serve { bind } => serve(config, bind).await?,
        Commands::Stun { server } => query_stun(config, &server).await?,
        Commands::Gather { strategy } => gather(config, strategy).await?,
        Commands::Config { init } => {
            if init {
                Config::default().save_to(&config_path)?;
                println!("Wrote {}", config_path.display());
            } else {
                println!("# {}", config_path.display());
                print!("{}", toml::to_string_pretty(&config).context("Failed to serialize config")?);
            }
        }
    }

    Ok(())
}

async fn serve(config: Config, bind: Option<String>) -> Result<()> {
    let metrics: Arc<dyn MetricsSink> = Arc::new(TracingMetrics);
    let directory = Arc::new(PeerDirectory::new(metrics.clone()));
    let mediator = Arc::new(SignalingMediator::new(
        Arc::new(ConnectionRegistry::new(config.signaling.outbound_buffer)),
        directory.clone(),
        Arc::new(SdpNegotiator::new(metrics)),
    ));

    let mut statuses = directory.subscribe();
    tokio::spawn(async move {
        while let Ok((client_id, status)) = statuses.recv().await {
            tracing::info!("Peer {} is {:?}", client_id, status);
        }
    });

    let addr = bind.unwrap_or(config.signaling.bind);
    let listener = SignalingServer::bind(&addr).await?;
    let server = Arc::new(SignalingServer::new(mediator, config.signaling.path));
    server
        .run(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {}", e);
            }
        })
        .await
}

async fn query_stun(config: Config, server: &str) -> Result<()> {
    let (host, port) =
        stun::split_server(server).with_context(|| format!("Expected host:port, got '{}'", server))?;
    let client = StunClient::new(config.stun);
    let cancel = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let resp = client
        .get_public_address_until(host, port, cancel)
        .await
        .with_context(|| format!("STUN query to {} failed", server))?;

    println!("Public address: {}", resp.public_addr());
    println!("Local address:  {}", resp.local_addr);
    println!("NAT type:       {}", resp.nat_type);
    Ok(())
}

async fn gather(config: Config, strategy: Strategy) -> Result<()> {
    let pool = Arc::new(build_pool(&config)?);
    let negotiator = Arc::new(SdpNegotiator::new(Arc::new(TracingMetrics)));

    let candidates = pool.collect_and_prioritize(strategy).await;
    for c in &candidates {
        println!("{}", c.to_sdp_line());
    }
    match pool.select_best(&pool.default_criteria()).await {
        Some(best) => tracing::info!("Best candidate: {}", best.key()),
        None => tracing::info!("No candidate meets the default selection criteria"),
    }

    let mut connection = RtcPeerConnection::new(pool, negotiator);
    let offer = connection.create_offer().await?;
    println!();
    print!("{}", offer.sdp);
    connection.close();
    Ok(())
}

fn build_pool(config: &Config) -> Result<CandidatePool> {
    let interfaces = config
        .ice
        .interfaces
        .iter()
        .map(|s| {
            s.parse::<IpAddr>()
                .with_context(|| format!("Invalid interface address '{}'", s))
        })
        .collect::<Result<Vec<_>>>()?;

    let stun_client = Arc::new(StunClient::new(config.stun.clone()));
    let providers: Vec<Arc<dyn CandidateProvider>> = vec![
        Arc::new(LocalProvider::new(interfaces)),
        Arc::new(StunProvider::new(stun_client, config.stun.servers.clone())),
        Arc::new(TurnProvider::new(
            TurnClient::new(config.stun.timeout()),
            config.ice.turn_servers.clone(),
        )),
    ];

    let engine = PrioritizationEngine::new(
        config.prioritization.clone(),
        Arc::new(StaticConditions::default()),
        Arc::new(StaticLocation::default()),
    );
    Ok(CandidatePool::new(
        CandidateCollector::new(providers),
        engine,
        &config.ice,
    ))
}
