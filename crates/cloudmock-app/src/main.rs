//! cloudmock - a local proxy that answers cloud API calls from a rule file.
//!
//! Start it, point `HTTP_PROXY`/`HTTPS_PROXY` at the printed URL, trust the
//! exported root certificate, then run the client under test. Ctrl-C stops
//! the proxy; the exit status is non-zero if any request went unmatched.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use directories::ProjectDirs;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cloudmock_core::{DebugMode, MockRule, RuleFile};
use cloudmock_proxy::{CertificateAuthority, ProxyConfig, ProxyServer};

/// cloudmock - intercepting proxy that serves mocked cloud API responses
#[derive(Parser, Debug)]
#[command(name = "cloudmock", version, about)]
struct Args {
    /// JSON rule file; without one every request is unmatched
    #[arg(long, short)]
    rules: Option<PathBuf>,

    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on (0 picks a free port)
    #[arg(long, short, default_value_t = 0)]
    port: u16,

    /// Enable debug logging and dump every request/response
    #[arg(long)]
    debug: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Also log to daily files; the directory defaults to the user data dir
    #[arg(long, num_args = 0..=1)]
    log_dir: Option<Option<PathBuf>>,

    /// Keep the session green when a request matches no rule
    #[arg(long)]
    allow_unmatched: bool,

    /// Write the root certificate (PEM) to this path
    #[arg(long, value_name = "PATH")]
    export_ca: Option<PathBuf>,
}

impl Args {
    fn filter_directive(&self) -> String {
        let level = if self.debug { "debug" } else { &self.log_level };
        format!("cloudmock={level},cloudmock_core={level},cloudmock_proxy={level},warn")
    }

    fn log_dir(&self) -> Option<PathBuf> {
        match &self.log_dir {
            Some(Some(dir)) => Some(dir.clone()),
            Some(None) => default_log_dir(),
            None => None,
        }
    }

    fn debug_mode(&self) -> DebugMode {
        if self.debug {
            DebugMode::Enabled
        } else {
            DebugMode::FromEnvironment
        }
    }
}

fn default_log_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "cloudmock", "cloudmock").map(|dirs| dirs.data_dir().join("logs"))
}

/// Initialize logging, with a rolling file when a log directory is given.
fn init_logging(args: &Args) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.filter_directive()));

    if let Some(log_dir) = args.log_dir() {
        if std::fs::create_dir_all(&log_dir).is_ok() {
            let file_appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .max_log_files(5)
                .filename_prefix("cloudmock")
                .filename_suffix("log")
                .build(&log_dir)
                .ok();

            if let Some(appender) = file_appender {
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().with_writer(std::io::stderr))
                    .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
                    .init();

                tracing::info!("Logging to {:?}", log_dir);
                return Some(guard);
            }
        }

        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
        tracing::warn!("File logging unavailable in {:?}, using console only", log_dir);
        return None;
    }

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
    None
}

/// Loads rules and the unmatched policy; the CLI flag overrides the file.
fn load_rules(path: Option<&Path>, allow_unmatched: bool) -> Result<(Vec<MockRule>, bool)> {
    let Some(path) = path else {
        return Ok((Vec::new(), !allow_unmatched));
    };

    let file = RuleFile::from_path(path)
        .with_context(|| format!("Failed to load rules from {}", path.display()))?;
    let fail_on_unmatched = !allow_unmatched && file.fail_on_unmatched();
    let rules = file
        .into_rules()
        .with_context(|| format!("Invalid rule in {}", path.display()))?;

    Ok((rules, fail_on_unmatched))
}

fn export_ca(authority: &CertificateAuthority, path: &Path) -> Result<()> {
    std::fs::write(path, authority.root().cert_pem())
        .with_context(|| format!("Failed to write root certificate to {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let _log_guard = init_logging(&args);

    let (rules, fail_on_unmatched) = load_rules(args.rules.as_deref(), args.allow_unmatched)?;
    tracing::info!(rules = rules.len(), fail_on_unmatched, "Loaded mock rules");

    let authority = Arc::new(CertificateAuthority::new().context("Failed to set up certificate authority")?);
    if let Some(path) = &args.export_ca {
        export_ca(&authority, path)?;
        tracing::info!("Root certificate written to {}", path.display());
    }

    let ip: IpAddr = args
        .host
        .parse()
        .with_context(|| format!("Invalid listen address {}", args.host))?;
    let addr = SocketAddr::new(ip, args.port);

    let config = ProxyConfig::new()
        .with_addr(addr)
        .with_authority(authority)
        .with_debug(args.debug_mode())
        .fail_on_unmatched(fail_on_unmatched);

    let handle = ProxyServer::new(config, rules)
        .start()
        .await
        .context("Failed to start proxy")?;

    println!("{}", handle.proxy_url());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    let failed = handle.is_failed();
    for request in handle.unmatched_requests() {
        tracing::warn!("Unmatched request: {}", request);
    }
    handle.stop().await;

    Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("cloudmock").chain(argv.iter().copied())).unwrap()
    }

    #[test]
    fn defaults() {
        let args = parse(&[]);
        assert_eq!(args.host, "127.0.0.1");
        assert_eq!(args.port, 0);
        assert!(args.rules.is_none());
        assert!(args.log_dir().is_none());
        assert_eq!(args.debug_mode(), DebugMode::FromEnvironment);
        assert_eq!(
            args.filter_directive(),
            "cloudmock=info,cloudmock_core=info,cloudmock_proxy=info,warn"
        );
    }

    #[test]
    fn debug_flag_raises_level_and_dumps_traffic() {
        let args = parse(&["--debug", "--log-level", "warn"]);
        assert!(args.filter_directive().starts_with("cloudmock=debug"));
        assert_eq!(args.debug_mode(), DebugMode::Enabled);
    }

    #[test]
    fn log_dir_with_and_without_value() {
        let explicit = parse(&["--log-dir", "/tmp/cloudmock-logs"]);
        assert_eq!(explicit.log_dir(), Some(PathBuf::from("/tmp/cloudmock-logs")));

        let bare = parse(&["--log-dir"]);
        assert_eq!(bare.log_dir(), default_log_dir());
    }

    #[test]
    fn load_rules_without_file() {
        let (rules, fail) = load_rules(None, false).unwrap();
        assert!(rules.is_empty());
        assert!(fail);

        let (_, fail) = load_rules(None, true).unwrap();
        assert!(!fail);
    }

    #[test]
    fn load_rules_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "fail_on_unmatched": true,
                "rules": [
                    {{"request": {{"service": "sts", "action": "GetCallerIdentity"}},
                      "response": {{"body": {{"Account": "123456789012"}}}}}}
                ]
            }}"#
        )
        .unwrap();

        let (rules, fail) = load_rules(Some(file.path()), false).unwrap();
        assert_eq!(rules.len(), 1);
        assert!(fail);

        let (_, fail) = load_rules(Some(file.path()), true).unwrap();
        assert!(!fail);
    }

    #[test]
    fn load_rules_reports_path() {
        let err = load_rules(Some(Path::new("/nonexistent/rules.json")), false).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/rules.json"));
    }

    #[test]
    fn export_ca_writes_pem() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("root.pem");
        let authority = CertificateAuthority::new().unwrap();

        export_ca(&authority, &path).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("-----BEGIN CERTIFICATE-----"));
        assert_eq!(written, authority.root().cert_pem());
    }
}
