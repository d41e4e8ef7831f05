mod logging;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use libp2p_identity::Keypair;
use multiaddr::Multiaddr;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use transport_webrtc_direct::{
    DialConfig, DialOptions, IdentityLatch, KeyType, WebRtcDirectTransport,
};

use logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(name = "webrtc-direct-dial", about = "Dial libp2p webrtc-direct peers")]
struct Cli {
    /// Multiaddrs to try, in order.
    #[arg(required = true)]
    addrs: Vec<Multiaddr>,

    #[arg(long, help = "Print the dialable addresses and exit")]
    filter_only: bool,

    #[arg(long, env = "WEBRTC_DIRECT_HANDSHAKE_TIMEOUT_MS")]
    handshake_timeout_ms: Option<u64>,

    #[arg(long, env = "WEBRTC_DIRECT_KEY_TYPE")]
    key_type: Option<KeyType>,

    #[arg(long, help = "Send this text over the secure session once connected")]
    message: Option<String>,

    #[arg(long, value_enum, default_value_t = LogLevel::Warn)]
    log_level: LogLevel,

    #[arg(long, help = "Write logs to a file instead of stderr")]
    log_file: Option<PathBuf>,
}

impl Cli {
    fn dial_config(&self) -> DialConfig {
        let mut config = DialConfig::from_env();
        if let Some(ms) = self.handshake_timeout_ms.filter(|ms| *ms > 0) {
            config = config.with_handshake_timeout(Duration::from_millis(ms));
        }
        if let Some(key_type) = self.key_type {
            config = config.with_key_type(key_type);
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&LogConfig {
        level: cli.log_level,
        file: cli.log_file.clone(),
    })
    .context("initializing logging")?;

    let (publisher, latch) = IdentityLatch::new();
    let transport = WebRtcDirectTransport::new(cli.dial_config(), latch);

    let dialable = transport.filter(&cli.addrs);
    for addr in &dialable {
        println!("{addr}");
    }
    if cli.filter_only {
        return Ok(());
    }
    if dialable.is_empty() {
        bail!("none of the {} address(es) is a dialable webrtc-direct address", cli.addrs.len());
    }

    let keypair = Keypair::generate_ed25519();
    let local_peer = keypair.public().to_peer_id();
    publisher.publish(keypair);
    info!(target: "webrtc_direct_dial", peer = %local_peer, "local identity ready");

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let mut connected = 0usize;
    for addr in &dialable {
        match dial_one(&transport, addr, cli.message.as_deref(), &cancel).await {
            Ok(()) => connected += 1,
            Err(err) => {
                warn!(target: "webrtc_direct_dial", %addr, error = %err, "dial failed");
                eprintln!("{addr}: {err:#}");
            }
        }
        if cancel.is_cancelled() {
            break;
        }
    }

    if connected == 0 {
        bail!("no address could be dialed");
    }
    Ok(())
}

async fn dial_one(
    transport: &WebRtcDirectTransport,
    addr: &Multiaddr,
    message: Option<&str>,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut connection = transport
        .dial(addr, DialOptions::with_cancel(cancel.child_token()))
        .await
        .with_context(|| format!("dialing {addr}"))?;
    println!("{addr} -> {}", connection.remote_peer());

    if let Some(text) = message {
        connection
            .session()
            .write(text.as_bytes())
            .await
            .context("sending message")?;
    }
    connection.close().await.context("closing connection")?;
    Ok(())
}
