//! Configuration types for Bloatprobe
//!
//! Settings come from an optional TOML file; command-line flags override
//! file values. Everything is fixed once the server starts.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::{BloatError, Result};

/// Smallest accepted download chunk
pub const MIN_CHUNK_SIZE: usize = 4 * 1024;

/// Largest accepted download chunk
pub const MAX_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Largest accepted number of chunks between cooperative pauses
pub const MAX_YIELD_EVERY: u32 = 64;

/// Command-line arguments for the server
#[derive(Parser, Debug, Default)]
#[command(name = "bloatprobe")]
#[command(version)]
#[command(about = "Bufferbloat test server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Address to bind to
    #[arg(short, long)]
    pub bind: Option<IpAddr>,

    /// PEM private key for HTTPS
    #[arg(long, requires = "ssl_certfile")]
    pub ssl_keyfile: Option<PathBuf>,

    /// PEM certificate chain for HTTPS
    #[arg(long, requires = "ssl_keyfile")]
    pub ssl_certfile: Option<PathBuf>,

    /// Offer HTTP/2 (requires TLS)
    #[arg(long)]
    pub http2: bool,

    /// Directory with the browser client to serve
    #[arg(long)]
    pub static_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Default log filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Listener settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Download saturator settings
    #[serde(default)]
    pub download: DownloadConfig,
    /// Upload absorber settings
    #[serde(default)]
    pub upload: UploadConfig,
}

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_bind")]
    pub bind: IpAddr,
    /// Port to listen on (0 picks an ephemeral port)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Offer HTTP/2 through ALPN
    #[serde(default)]
    pub http2: bool,
    /// Maximum concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Directory with static client assets
    #[serde(default)]
    pub static_dir: Option<PathBuf>,
    /// TLS material
    #[serde(default)]
    pub tls: Option<TlsConfig>,
}

/// TLS key and certificate paths
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// PEM certificate chain
    pub cert_path: PathBuf,
    /// PEM private key
    pub key_path: PathBuf,
}

/// Download saturator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Size of the shared fill buffer, emitted once per chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Chunks emitted between cooperative pauses
    #[serde(default = "default_yield_every")]
    pub yield_every: u32,
    /// Length of each cooperative pause
    #[serde(default = "default_yield_pause_ms")]
    pub yield_pause_ms: u64,
}

/// Upload absorber configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Maximum cumulative body size in bytes
    #[serde(default = "default_max_size")]
    pub max_size: u64,
    /// Maximum sustained ingestion rate in bytes per second
    #[serde(default = "default_max_rate")]
    pub max_rate: u64,
    /// Largest slice accounted against the rate window at once
    #[serde(default = "default_granularity")]
    pub granularity: usize,
    /// Rate window length
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_port() -> u16 {
    8080
}

fn default_max_connections() -> usize {
    crate::server::MAX_CONNECTIONS
}

fn default_chunk_size() -> usize {
    128 * 1024
}

fn default_yield_every() -> u32 {
    16
}

fn default_yield_pause_ms() -> u64 {
    2
}

fn default_max_size() -> u64 {
    8 * 1024 * 1024 // 8 MiB
}

fn default_max_rate() -> u64 {
    100 * 1024 * 1024 // 100 MiB/s
}

fn default_granularity() -> usize {
    64 * 1024
}

fn default_check_interval_ms() -> u64 {
    100
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            server: ServerConfig::default(),
            download: DownloadConfig::default(),
            upload: UploadConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            http2: false,
            max_connections: default_max_connections(),
            static_dir: None,
            tls: None,
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            yield_every: default_yield_every(),
            yield_pause_ms: default_yield_pause_ms(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            max_rate: default_max_rate(),
            granularity: default_granularity(),
            check_interval_ms: default_check_interval_ms(),
        }
    }
}

impl ServerConfig {
    /// Socket address the listener binds to
    #[must_use]
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

impl DownloadConfig {
    /// Cooperative pause duration
    #[must_use]
    pub fn yield_pause(&self) -> Duration {
        Duration::from_millis(self.yield_pause_ms)
    }
}

impl UploadConfig {
    /// Rate window length
    #[must_use]
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }
}

impl Config {
    /// Load configuration from TOML file
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| BloatError::ConfigError(format!("Failed to read config file: {e}")))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| BloatError::ConfigError(format!("Failed to parse config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Build configuration from command-line arguments
    ///
    /// Flags override values from `--config` when both are present.
    ///
    /// # Errors
    ///
    /// Returns error if the config file is unreadable or the merged
    /// configuration is invalid
    pub fn from_args(args: &CliArgs) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Some(port) = args.port {
            config.server.port = port;
        }
        if let Some(bind) = args.bind {
            config.server.bind = bind;
        }
        if let (Some(key), Some(cert)) = (&args.ssl_keyfile, &args.ssl_certfile) {
            config.server.tls = Some(TlsConfig {
                cert_path: cert.clone(),
                key_path: key.clone(),
            });
        }
        if args.http2 {
            config.server.http2 = true;
        }
        if let Some(dir) = &args.static_dir {
            config.server.static_dir = Some(dir.clone());
        }
        if let Some(level) = &args.log_level {
            config.log_level.clone_from(level);
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if configuration is invalid
    pub fn validate(&self) -> Result<()> {
        if self.server.max_connections == 0 {
            return Err(BloatError::ConfigError(
                "server.max_connections must be > 0".to_string(),
            ));
        }

        if self.server.http2 && self.server.tls.is_none() {
            return Err(BloatError::ConfigError(
                "server.http2 requires TLS key and certificate".to_string(),
            ));
        }

        if let Some(dir) = &self.server.static_dir {
            if !dir.is_dir() {
                return Err(BloatError::ConfigError(format!(
                    "Static directory does not exist: {}",
                    dir.display()
                )));
            }
        }

        let chunk_size = self.download.chunk_size;
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&chunk_size) {
            return Err(BloatError::ConfigError(format!(
                "download.chunk_size must be between {MIN_CHUNK_SIZE} and {MAX_CHUNK_SIZE}, got {chunk_size}"
            )));
        }

        let yield_every = self.download.yield_every;
        if !(1..=MAX_YIELD_EVERY).contains(&yield_every) {
            return Err(BloatError::ConfigError(format!(
                "download.yield_every must be between 1 and {MAX_YIELD_EVERY}, got {yield_every}"
            )));
        }

        if self.upload.max_size == 0 {
            return Err(BloatError::ConfigError(
                "upload.max_size must be > 0".to_string(),
            ));
        }
        if self.upload.max_rate == 0 {
            return Err(BloatError::ConfigError(
                "upload.max_rate must be > 0".to_string(),
            ));
        }
        if self.upload.granularity == 0 {
            return Err(BloatError::ConfigError(
                "upload.granularity must be > 0".to_string(),
            ));
        }
        if self.upload.check_interval_ms == 0 {
            return Err(BloatError::ConfigError(
                "upload.check_interval_ms must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();

        assert_eq!(config.server.port, 8080);
        assert_eq!(config.download.chunk_size, 128 * 1024);
        assert_eq!(config.upload.max_size, 8 * 1024 * 1024);
        assert_eq!(config.upload.max_rate, 100 * 1024 * 1024);
        assert_eq!(config.upload.granularity, 64 * 1024);
        assert_eq!(config.upload.check_interval(), Duration::from_millis(100));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_parse() {
        let config_toml = r#"
            log_level = "debug"

            [server]
            port = 9000

            [download]
            chunk_size = 65536

            [upload]
            max_size = 1048576
        "#;

        let config: Config = toml::from_str(config_toml).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.download.chunk_size, 65536);
        assert_eq!(config.download.yield_every, 16);
        assert_eq!(config.upload.max_size, 1_048_576);
        assert_eq!(config.upload.max_rate, 100 * 1024 * 1024);
    }

    #[test]
    fn test_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        let config_toml = r#"
            [server]
            bind = "127.0.0.1"
            port = 8443

            [upload]
            check_interval_ms = 50
        "#;
        file.write_all(config_toml.as_bytes()).unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(
            config.server.listen_addr(),
            "127.0.0.1:8443".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(config.upload.check_interval_ms, 50);
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"[server]\nport = 9000\n").unwrap();

        let args = CliArgs {
            config: Some(file.path().to_path_buf()),
            port: Some(9100),
            log_level: Some("warn".to_string()),
            ..Default::default()
        };

        let config = Config::from_args(&args).unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn test_cli_parses_tls_and_port_flags() {
        let args = CliArgs::try_parse_from([
            "bloatprobe",
            "--port",
            "443",
            "--ssl-keyfile",
            "key.pem",
            "--ssl-certfile",
            "cert.pem",
            "--http2",
        ])
        .unwrap();

        assert_eq!(args.port, Some(443));
        assert_eq!(args.ssl_keyfile, Some(PathBuf::from("key.pem")));
        assert!(args.http2);
    }

    #[test]
    fn test_cli_rejects_lone_keyfile() {
        let result = CliArgs::try_parse_from(["bloatprobe", "--ssl-keyfile", "key.pem"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_http2_requires_tls() {
        let mut config = Config::default();
        config.server.http2 = true;

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_chunk_size() {
        let mut config = Config::default();
        config.download.chunk_size = 16;

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_yield_every() {
        let mut config = Config::default();
        config.download.yield_every = 0;
        assert!(config.validate().is_err());

        config.download.yield_every = MAX_YIELD_EVERY + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_upload_ceilings_rejected() {
        let mut config = Config::default();
        config.upload.max_rate = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.upload.granularity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_static_dir() {
        let mut config = Config::default();
        config.server.static_dir = Some(PathBuf::from("/nonexistent/bloatprobe/client"));

        assert!(config.validate().is_err());
    }
}
