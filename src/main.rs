use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use swarmlink::{setup_logging, Config, Node, Result};

#[derive(Parser)]
#[command(name = "swarmlink")]
#[command(about = "LAN peer discovery and swarm file transfer")]
#[command(version)]
struct Cli {
    /// TCP port for peer requests
    #[arg(short, long, default_value_t = 6001)]
    port: u16,
    /// Node name shown to other peers
    #[arg(short, long)]
    name: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a node, optionally sharing files
    Run {
        /// Files to share on startup
        #[arg(short, long)]
        share: Vec<PathBuf>,
    },
    /// Download a file from the swarm by file id
    Download {
        file_id: String,
        /// Destination path (defaults to the advertised file name)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Seconds to listen for peer announcements first
        #[arg(short, long, default_value_t = 4)]
        wait: u64,
    },
    /// Search files announced by LAN peers
    Find {
        query: String,
        /// Seconds to listen for peer announcements first
        #[arg(short, long, default_value_t = 4)]
        wait: u64,
    },
    /// Send a one-line chat message to a discovered peer
    Chat {
        peer_id: String,
        text: String,
        /// Seconds to listen for peer announcements first
        #[arg(short, long, default_value_t = 4)]
        wait: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging();
    let cli = Cli::parse();

    let mut config = Config::default();
    config.tcp_port = cli.port;
    if let Some(name) = cli.name {
        config.display_name = name;
    }
    let node = Node::new(config);

    match cli.command {
        Commands::Run { share } => {
            node.start().await?;
            for path in share {
                match node.share(&path).await? {
                    Some(meta) => println!(
                        "shared {} as {} ({} pieces)",
                        meta.name,
                        meta.file_id,
                        meta.piece_hashes.len()
                    ),
                    None => eprintln!("not a shareable file: {}", path.display()),
                }
            }
            tokio::signal::ctrl_c().await?;
            node.shutdown();
        }
        Commands::Download {
            file_id,
            output,
            wait,
        } => {
            node.start().await?;
            tokio::time::sleep(Duration::from_secs(wait)).await;
            let result = node.download(&file_id, output.as_deref()).await;
            node.shutdown();
            match result {
                Ok(done) => println!(
                    "download complete: {} ({} bytes, {} pieces)",
                    done.path.display(),
                    done.bytes,
                    done.pieces
                ),
                Err(e) => {
                    eprintln!("download failed: {e}");
                    std::process::exit(1);
                }
            }
        }
        Commands::Find { query, wait } => {
            node.start().await?;
            tokio::time::sleep(Duration::from_secs(wait)).await;
            let matches = node.find_files(&query).await;
            node.shutdown();
            if matches.is_empty() {
                println!("no matching files on discovered peers");
            }
            for found in matches {
                println!(
                    "{} | {} | {} bytes | {} pieces | peer={} ({}) @ {}",
                    found.file.file_id,
                    found.file.name,
                    found.file.size,
                    found.file.piece_count,
                    found.peer_name,
                    found.peer_id,
                    found.addr
                );
            }
        }
        Commands::Chat {
            peer_id,
            text,
            wait,
        } => {
            node.start().await?;
            tokio::time::sleep(Duration::from_secs(wait)).await;
            let sent = node.send_chat(&peer_id, &text).await;
            node.shutdown();
            if sent {
                println!("message delivered to {peer_id}");
            } else {
                eprintln!("failed to deliver message to {peer_id}");
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
