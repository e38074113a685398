use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use zftpd_core::{Config, Server};

/// RFC 959/3659 FTP server with a `PSK`-authenticated session cipher
/// extension.
#[derive(Parser)]
#[command(name = "zftpd")]
#[command(about = "Embedded FTP server core", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path (TOML). Values below override its contents.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Control-channel listening port.
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Server root directory; every session is chrooted beneath it.
    #[arg(short = 'd', long = "root")]
    root_dir: Option<PathBuf>,

    /// Auxiliary HTTP file-browser port (acknowledged, not served).
    #[arg(short = 'w', long)]
    http_port: Option<u16>,

    /// Increase log verbosity; repeatable (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn default_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "zftpd=info,zftpd_core=info",
        1 => "zftpd=debug,zftpd_core=debug",
        _ => "zftpd=trace,zftpd_core=trace",
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter(cli.verbose).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(root_dir) = cli.root_dir {
        config.root_dir = root_dir;
    }
    if cli.http_port.is_some() {
        config.http_port = cli.http_port;
    }

    let server = Server::new(config)?;
    server.run().await?;

    Ok(())
}
