use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, ensure};
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

use crate::cache::CacheOptions;
use crate::cli::{Cli, LogFormat};

fn default_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join("httpdisk"))
        .unwrap_or_else(|| PathBuf::from("httpdisk"))
}

fn default_log_format() -> LogFormat {
    LogFormat::Text
}

/// Interceptor configuration, resolved once from the optional config file,
/// the HTTPDISK environment, and the command line (highest precedence).
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Cache root directory.
    #[serde(default = "default_dir")]
    pub dir: PathBuf,
    /// Expiry in seconds; absent means cached entries never expire.
    #[serde(default)]
    pub expires: Option<u64>,
    /// Bypass cache reads (but still write).
    #[serde(default)]
    pub force: bool,
    /// Bypass cache reads for stored transport failures only.
    #[serde(default)]
    pub force_errors: bool,
    /// Parameter names excluded from cache keys.
    #[serde(default)]
    pub ignore_params: Vec<String>,
    /// Convert text/JSON response bodies to UTF-8.
    #[serde(default)]
    pub utf8: bool,
    /// Emit a one-line diagnostic log per intercepted request.
    #[serde(default)]
    pub log_requests: bool,
    #[serde(default = "default_log_format")]
    pub log: LogFormat,
    /// Forward proxy as host[:port]; used both for the transport and to keep
    /// proxy connection failures out of the cache.
    #[serde(default)]
    pub proxy: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            dir: default_dir(),
            expires: None,
            force: false,
            force_errors: false,
            ignore_params: Vec::new(),
            utf8: false,
            log_requests: false,
            log: default_log_format(),
            proxy: None,
        }
    }
}

impl Settings {
    pub fn load(cli: &Cli) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = &cli.config {
            builder = builder.add_source(File::from(path.clone()).required(true));
        } else {
            builder = builder.add_source(File::with_name("httpdisk").required(false));
        }
        builder = builder.add_source(
            Environment::with_prefix("HTTPDISK")
                .separator("__")
                .try_parsing(true),
        );

        let cfg = builder.build().map_err(to_anyhow)?;
        let mut settings: Settings = cfg.try_deserialize().map_err(to_anyhow)?;
        settings.apply_cli(cli);
        settings.validate()?;
        Ok(settings)
    }

    fn apply_cli(&mut self, cli: &Cli) {
        if let Some(dir) = &cli.dir {
            self.dir = dir.clone();
        }
        if let Some(expires) = cli.expires {
            self.expires = Some(expires.as_secs());
        }
        if cli.force {
            self.force = true;
        }
        if cli.force_errors {
            self.force_errors = true;
        }
        if !cli.ignore_params.is_empty() {
            self.ignore_params = cli.ignore_params.clone();
        }
        if cli.utf8 {
            self.utf8 = true;
        }
        if let Some(proxy) = &cli.proxy {
            self.proxy = Some(proxy.clone());
        }
        self.log = cli.log;
        self.log_requests = !cli.silent;
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            !self.dir.as_os_str().is_empty(),
            "cache dir must not be empty"
        );
        ensure!(
            self.expires != Some(0),
            "expires must be greater than 0 seconds"
        );
        if let Some(proxy) = &self.proxy {
            ensure!(!proxy.is_empty(), "proxy must not be empty");
        }
        for param in &self.ignore_params {
            ensure!(!param.is_empty(), "ignore_params entries must not be empty");
        }
        Ok(())
    }

    pub fn expires(&self) -> Option<Duration> {
        self.expires.map(Duration::from_secs)
    }

    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions {
            dir: self.dir.clone(),
            expires: self.expires(),
            force: self.force,
            force_errors: self.force_errors,
        }
    }

    pub fn ignore_params_set(&self) -> HashSet<String> {
        self.ignore_params.iter().cloned().collect()
    }

    /// Proxy (host, port) for transport-failure classification. The port
    /// defaults to 80, matching curl's -x handling of bare hostnames.
    pub fn proxy_host_port(&self) -> Option<(String, u16)> {
        let proxy = self.proxy.as_deref()?;
        let proxy = proxy
            .strip_prefix("http://")
            .or_else(|| proxy.strip_prefix("https://"))
            .unwrap_or(proxy);
        let proxy = proxy.trim_end_matches('/');
        match proxy.split_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().unwrap_or(80);
                Some((host.to_string(), port))
            }
            None => Some((proxy.to_string(), 80)),
        }
    }
}

fn to_anyhow(err: ConfigError) -> anyhow::Error {
    anyhow::anyhow!(err)
}
