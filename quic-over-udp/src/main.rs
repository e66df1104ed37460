//! Entry point for `quic-over-udp`.
//!
//! Parses CLI arguments and dispatches into either **send** or **receive**
//! mode.  All protocol work is delegated to the library; `main.rs` owns only
//! process setup (logging, argument parsing, file I/O).

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use quic_over_udp::config::{Config, DEFAULT_HOST, DEFAULT_PORT, RANDOM_FRAME_SIZE};
use quic_over_udp::session::Session;
use quic_over_udp::simulator::{Simulator, SimulatorConfig};
use quic_over_udp::socket::Socket;

/// Reliable multi-stream file transfer over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Connect to a receiver and send a file once per stream.
    Send {
        /// Receiver address.
        #[arg(short, long, default_value_t = default_addr())]
        peer: SocketAddr,
        /// File to send (defaults to the configured file).
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Number of parallel streams (defaults to the configured count).
        #[arg(short, long)]
        streams: Option<usize>,
        /// Drop this fraction of outgoing datagrams.
        #[arg(long, default_value_t = 0.0)]
        loss: f64,
        /// Give each stream its own random frame size between 1000 and 2000 bytes.
        #[arg(long)]
        vary_frames: bool,
    },
    /// Accept one connection and write every stream to its own file.
    Receive {
        /// Local address to listen on.
        #[arg(short, long, default_value_t = default_addr())]
        bind: SocketAddr,
        /// Directory for the received files.
        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,
    },
}

fn default_addr() -> SocketAddr {
    SocketAddr::new(
        DEFAULT_HOST.parse().unwrap_or([127, 0, 0, 1].into()),
        DEFAULT_PORT,
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let mut config = Config::default();

    match cli.mode {
        Mode::Send {
            peer,
            file,
            streams,
            loss,
            vary_frames,
        } => {
            if vary_frames {
                config.stream_frame_size = Some(RANDOM_FRAME_SIZE);
            }
            let path = file.unwrap_or_else(|| config.default_file.clone());
            let count = streams.unwrap_or(config.default_stream_count);
            let data = tokio::fs::read(&path)
                .await
                .with_context(|| format!("reading {}", path.display()))?;
            log::info!(
                "Sending {} ({} bytes) on {count} stream(s) to {peer}",
                path.display(),
                data.len()
            );

            let socket = Socket::bind("0.0.0.0:0".parse()?).await?;
            let session = if loss > 0.0 {
                let sim = Simulator::new(
                    socket,
                    SimulatorConfig {
                        loss_rate: loss,
                        seed: rand::random(),
                        ..SimulatorConfig::default()
                    },
                );
                Session::connect(sim, peer, config).await?
            } else {
                Session::connect(socket, peer, config).await?
            };

            session.send_files(vec![data; count]).await?;
            session.close().await?;
            println!("{}", session.stats());
        }
        Mode::Receive { bind, out_dir } => {
            let socket = Socket::bind(bind).await?;
            log::info!("Listening on {}", socket.local_addr);
            let session = Session::accept(socket, config).await?;

            let files = session.receive_files().await?;
            tokio::fs::create_dir_all(&out_dir)
                .await
                .with_context(|| format!("creating {}", out_dir.display()))?;
            for (i, (stream_id, data)) in files.iter().enumerate() {
                let path = out_dir.join(format!("file_{}.txt", i + 1));
                tokio::fs::write(&path, data)
                    .await
                    .with_context(|| format!("writing {}", path.display()))?;
                log::info!(
                    "stream {stream_id}: {} bytes → {}",
                    data.len(),
                    path.display()
                );
            }
            session.close().await?;
            println!("{}", session.stats());
        }
    }
    Ok(())
}
