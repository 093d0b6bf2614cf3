//! plexvold: plexvol volume daemon
//!
//! Usage:
//!   plexvold [--config /etc/plexvol/config.toml] <command>
//!
//! Commands:
//!   driver               - volume registry with periodic sync
//!   server               - object server behind the http/tcp backends
//!   pack <dir> <file>    - archive a directory exactly as a sync would
//!   unpack <file> <dir>  - restore an archive into a directory

mod driver;
mod metrics;
mod server;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use plexvol_core::config::{PlexConfig, ServerProtocol};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "plexvold", version, about = "plexvol volume daemon")]
struct Cli {
    /// Path to config.toml
    #[arg(
        long,
        short = 'c',
        env = "PLEXVOL_CONFIG",
        default_value = "/etc/plexvol/config.toml",
        global = true
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); defaults to [daemon].log_level
    #[arg(long, env = "PLEXVOL_LOG", global = true)]
    log: Option<String>,

    /// Log format; defaults to [daemon].log_format
    #[arg(long, env = "PLEXVOL_LOG_FORMAT", global = true)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open the volume registry and keep mounted volumes synced
    Driver,

    /// Serve stored archives over HTTP or TCP
    Server {
        #[arg(long)]
        protocol: Option<Protocol>,
        /// Listen address, e.g. 0.0.0.0:30000
        #[arg(long)]
        listen: Option<String>,
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Write a zstd tar archive of <dir> to <file>
    Pack { dir: PathBuf, file: PathBuf },

    /// Replace the contents of <dir> with the archive in <file>
    Unpack { file: PathBuf, dir: PathBuf },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Protocol {
    Http,
    Tcp,
}

impl From<Protocol> for ServerProtocol {
    fn from(p: Protocol) -> Self {
        match p {
            Protocol::Http => ServerProtocol::Http,
            Protocol::Tcp => ServerProtocol::Tcp,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Parse config before logging starts: it carries the default log
    // settings. Anything worth reporting is logged once the subscriber is up.
    let loaded = PlexConfig::load(&cli.config);
    let daemon_cfg = match &loaded {
        Ok(Some(c)) => c.daemon.clone(),
        _ => Default::default(),
    };
    let level = cli.log.clone().unwrap_or(daemon_cfg.log_level);
    let format = cli.log_format.unwrap_or(match daemon_cfg.log_format.as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    });
    init_logging(&level, format);

    let mut config = match loaded.with_context(|| format!("loading config {}", cli.config.display()))? {
        Some(config) => config,
        None => {
            warn!(path = %cli.config.display(), "config file not found, using defaults");
            PlexConfig::default()
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        command = ?cli.command,
        config = %cli.config.display(),
        "plexvold starting"
    );

    match cli.command {
        Command::Driver => driver::run(config).await,
        Command::Server {
            protocol,
            listen,
            data_dir,
        } => {
            if let Some(p) = protocol {
                config.server.protocol = p.into();
            }
            if let Some(l) = listen {
                config.server.listen = l;
            }
            if let Some(d) = data_dir {
                config.server.data_dir = d;
            }
            server::run(config.server).await
        }
        Command::Pack { dir, file } => pack(&config, dir, file).await,
        Command::Unpack { file, dir } => unpack(file, dir).await,
    }
}

async fn pack(config: &PlexConfig, dir: PathBuf, file: PathBuf) -> Result<()> {
    let opts = plexvol_archive::ArchiveOptions::from_config(&config.archive);
    let bytes = tokio::task::spawn_blocking(move || -> Result<u64> {
        let out = std::fs::File::create(&file)
            .with_context(|| format!("creating {}", file.display()))?;
        let out = plexvol_archive::compress(&dir, std::io::BufWriter::new(out), &opts)
            .with_context(|| format!("archiving {}", dir.display()))?;
        let out = out.into_inner().context("flushing archive")?;
        out.sync_all()?;
        Ok(file_len(&file))
    })
    .await??;

    info!(bytes, "archive written");
    Ok(())
}

async fn unpack(file: PathBuf, dir: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || -> Result<()> {
        let src = std::fs::File::open(&file)
            .with_context(|| format!("opening {}", file.display()))?;
        plexvol_archive::decompress(std::io::BufReader::new(src), &dir)
            .with_context(|| format!("restoring into {}", dir.display()))?;
        Ok(())
    })
    .await??;

    info!("archive restored");
    Ok(())
}

fn file_len(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Resolves on SIGTERM or SIGINT.
pub(crate) async fn shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).context("registering SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("registering SIGINT handler")?;
    tokio::select! {
        _ = sigterm.recv() => info!("SIGTERM received"),
        _ = sigint.recv() => info!("SIGINT received"),
    }
    Ok(())
}

fn init_logging(level: &str, format: LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_every_command() {
        let cli = Cli::try_parse_from(["plexvold", "driver"]).unwrap();
        assert!(matches!(cli.command, Command::Driver));

        let cli = Cli::try_parse_from([
            "plexvold", "server", "--protocol", "tcp", "--listen", "127.0.0.1:4000",
        ])
        .unwrap();
        match cli.command {
            Command::Server {
                protocol, listen, ..
            } => {
                assert!(matches!(protocol, Some(Protocol::Tcp)));
                assert_eq!(listen.as_deref(), Some("127.0.0.1:4000"));
            }
            other => panic!("unexpected {other:?}"),
        }

        let cli = Cli::try_parse_from(["plexvold", "-c", "/tmp/x.toml", "pack", "a", "b"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("/tmp/x.toml"));
        assert!(matches!(cli.command, Command::Pack { .. }));
    }

    #[test]
    fn cli_rejects_unknown_protocol() {
        assert!(Cli::try_parse_from(["plexvold", "server", "--protocol", "udp"]).is_err());
    }

    #[tokio::test]
    async fn pack_then_unpack() {
        let tmp = tempfile::TempDir::new().unwrap();
        let src = tmp.path().join("src");
        std::fs::create_dir_all(src.join("world")).unwrap();
        std::fs::write(src.join("world/level.dat"), b"level").unwrap();
        std::fs::write(src.join("world/session.lock"), b"lock").unwrap();
        let file = tmp.path().join("vol.tar.zst");
        let dst = tmp.path().join("dst");

        pack(&PlexConfig::default(), src.clone(), file.clone())
            .await
            .unwrap();
        unpack(file, dst.clone()).await.unwrap();

        assert_eq!(std::fs::read(dst.join("world/level.dat")).unwrap(), b"level");
        assert!(!dst.join("world/session.lock").exists());
    }
}
