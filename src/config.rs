//! Server configuration: defaults, TOML file overlay, environment overlay.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, RgError};

/// Runtime configuration for the HTTP service.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface to bind.
    pub host: IpAddr,
    /// Listening port.
    pub port: u16,
    /// Upper bound on orchestrator exposure workers.
    pub workers: usize,
    /// Request body limit in bytes; larger uploads are rejected with 413.
    pub max_body_bytes: usize,
    /// Per-request read/write deadline.
    pub request_timeout: Duration,
    /// Idle connection deadline.
    pub idle_timeout: Duration,
    /// Optional directory mirroring uploaded bytes to disk.
    pub mirror_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8080,
            workers: default_workers(),
            max_body_bytes: 256 * 1024 * 1024,
            request_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(60),
            mirror_dir: None,
        }
    }
}

impl ServerConfig {
    /// Local-development profile: small worker pool, no disk mirror.
    pub fn development() -> Self {
        Self {
            workers: 4,
            ..Self::default()
        }
    }

    /// Production profile: disk mirror enabled under `storage/`.
    pub fn production() -> Self {
        Self {
            mirror_dir: Some(PathBuf::from("storage")),
            ..Self::default()
        }
    }

    /// Resolves the effective configuration: defaults, then the optional
    /// TOML file, then `RED_GIANT_*` environment variables.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(path) = file {
            config = config.overlay_file(path)?;
        }
        config.overlay_env()
    }

    /// Applies a TOML config file on top of `self`.
    pub fn overlay_file(mut self, path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let file: ConfigFile = toml::from_str(&raw)
            .map_err(|e| RgError::InvalidInput(format!("config {}: {e}", path.display())))?;
        if let Some(host) = file.host {
            self.host = parse_host(&host)?;
        }
        if let Some(port) = file.port {
            self.port = port;
        }
        if let Some(workers) = file.workers {
            self.workers = validate_workers(workers)?;
        }
        if let Some(max_body_bytes) = file.max_body_bytes {
            self.max_body_bytes = max_body_bytes;
        }
        if let Some(ms) = file.request_timeout_ms {
            self.request_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = file.idle_timeout_ms {
            self.idle_timeout = Duration::from_millis(ms);
        }
        if let Some(dir) = file.mirror_dir {
            self.mirror_dir = Some(dir);
        }
        Ok(self)
    }

    /// Applies `RED_GIANT_HOST`, `RED_GIANT_PORT` and `RED_GIANT_WORKERS`.
    pub fn overlay_env(mut self) -> Result<Self> {
        if let Ok(host) = std::env::var("RED_GIANT_HOST") {
            self.host = parse_host(&host)?;
        }
        if let Ok(port) = std::env::var("RED_GIANT_PORT") {
            self.port = port
                .parse()
                .map_err(|_| RgError::InvalidInput(format!("RED_GIANT_PORT: {port}")))?;
        }
        if let Ok(workers) = std::env::var("RED_GIANT_WORKERS") {
            let parsed = workers
                .parse()
                .map_err(|_| RgError::InvalidInput(format!("RED_GIANT_WORKERS: {workers}")))?;
            self.workers = validate_workers(parsed)?;
        }
        Ok(self)
    }
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    host: Option<String>,
    port: Option<u16>,
    workers: Option<usize>,
    max_body_bytes: Option<usize>,
    request_timeout_ms: Option<u64>,
    idle_timeout_ms: Option<u64>,
    mirror_dir: Option<PathBuf>,
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() * 2)
        .unwrap_or(4)
}

fn parse_host(raw: &str) -> Result<IpAddr> {
    raw.parse()
        .map_err(|_| RgError::InvalidInput(format!("host address: {raw}")))
}

fn validate_workers(workers: usize) -> Result<usize> {
    if workers == 0 {
        return Err(RgError::InvalidInput("workers must be non-zero".into()));
    }
    Ok(workers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_the_documented_ports() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.host, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert!(config.workers >= 1);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.idle_timeout, Duration::from_secs(60));
    }

    #[test]
    fn file_overlay_wins_over_defaults() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("red-giant.toml");
        let mut file = std::fs::File::create(&path)?;
        writeln!(file, "port = 9000")?;
        writeln!(file, "workers = 6")?;
        writeln!(file, "request_timeout_ms = 5000")?;
        let config = ServerConfig::default().overlay_file(&path)?;
        assert_eq!(config.port, 9000);
        assert_eq!(config.workers, 6);
        assert_eq!(config.request_timeout, Duration::from_millis(5000));
        Ok(())
    }

    #[test]
    fn zero_workers_is_rejected() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("red-giant.toml");
        std::fs::write(&path, "workers = 0")?;
        assert!(ServerConfig::default().overlay_file(&path).is_err());
        Ok(())
    }

    #[test]
    fn production_profile_mirrors_to_disk() {
        let config = ServerConfig::production();
        assert_eq!(config.mirror_dir.as_deref(), Some(Path::new("storage")));
    }
}
