//! Command-line interface
//!
//! Every option can also be set through a `GF_FETCH_<NAME>` environment
//! variable. Values given here win over the config file.

use crate::config::ConfigOverrides;
use crate::telemetry::LogFormat;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "grafana-fetch", version, about = "Fetch, cache and serve rendered Grafana panels")]
pub struct Cli {
    /// Config file (default: $HOME/grafana-fetch.yaml)
    #[arg(long, global = true, env = "GF_FETCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Skip TLS certificate verification for upstream requests
    #[arg(short = 'k', long, global = true, env = "GF_FETCH_INSECURE")]
    pub insecure: bool,

    /// PEM file with extra CA certificates to trust upstream
    #[arg(long, global = true, env = "GF_FETCH_CAFILE")]
    pub cafile: Option<PathBuf>,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Compact, env = "GF_FETCH_LOG_FORMAT")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the caching render gateway
    Server(ServerArgs),
}

#[derive(Debug, Clone, Default, Args)]
pub struct ServerArgs {
    /// Address to listen on, e.g. :8080 or 127.0.0.1:8080
    #[arg(long, env = "GF_FETCH_LISTEN")]
    pub listen: Option<String>,

    /// Base URL of the Grafana instance
    #[arg(long, env = "GF_FETCH_URL")]
    pub url: Option<String>,

    /// Directory for cached renders; caching is off when unset
    #[arg(long, env = "GF_FETCH_CACHE")]
    pub cache: Option<PathBuf>,

    /// Default cache TTL in seconds
    #[arg(long, env = "GF_FETCH_TTL")]
    pub ttl: Option<i64>,

    /// Default organisation id
    #[arg(long, env = "GF_FETCH_ORG")]
    pub org: Option<i64>,

    /// Default theme
    #[arg(long, env = "GF_FETCH_THEME")]
    pub theme: Option<String>,

    /// Default bearer token for upstream requests
    #[arg(long, env = "GF_FETCH_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Address of the metrics listener; disabled when unset
    #[arg(long, env = "GF_FETCH_METRICS_LISTEN")]
    pub metrics_listen: Option<String>,
}

impl Cli {
    /// Settings from the command line that override the config file
    pub fn overrides(&self) -> ConfigOverrides {
        let Command::Server(args) = &self.command;
        ConfigOverrides {
            listen: args.listen.clone(),
            url: args.url.clone(),
            cache: args.cache.clone(),
            ttl: args.ttl,
            org: args.org,
            theme: args.theme.clone(),
            token: args.token.clone(),
            insecure: self.insecure,
            cafile: self.cafile.clone(),
            metrics_listen: args.metrics_listen.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_server_flags_become_overrides() {
        let cli = Cli::try_parse_from([
            "grafana-fetch",
            "-k",
            "--config",
            "/etc/grafana-fetch.yaml",
            "server",
            "--listen",
            ":9000",
            "--ttl",
            "60",
            "--cache",
            "/tmp/panels",
        ])
        .unwrap();

        assert_eq!(cli.config, Some(PathBuf::from("/etc/grafana-fetch.yaml")));
        let overrides = cli.overrides();
        assert!(overrides.insecure);
        assert_eq!(overrides.listen.as_deref(), Some(":9000"));
        assert_eq!(overrides.ttl, Some(60));
        assert_eq!(overrides.cache, Some(PathBuf::from("/tmp/panels")));
        assert_eq!(overrides.url, None);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["grafana-fetch", "server", "--log-format", "json"]).unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
    }

    #[test]
    fn test_subcommand_is_required() {
        assert!(Cli::try_parse_from(["grafana-fetch"]).is_err());
    }
}
