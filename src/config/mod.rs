use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;

const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(3 * 60);

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },

    #[error("TLS must be enabled on HTTP transport in production mode")]
    TlsRequired,

    #[error("missing TLS {0} file path")]
    MissingTlsPath(&'static str),

    #[error("unknown store backend '{0}' (expected 'memory' or 'disk')")]
    UnknownStoreBackend(String),

    #[error("invalid log destination '{0}' (expected 'stdout', 'stderr' or 'file:<path>')")]
    InvalidLogTarget(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    Debug,
    #[default]
    Production,
}

impl FromStr for Mode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "debug" => Ok(Mode::Debug),
            "production" => Ok(Mode::Production),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Debug => f.write_str("debug"),
            Mode::Production => f.write_str("production"),
        }
    }
}

/// Byte limits applied while decoding an upload request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadLimits {
    /// Hard ceiling on the bytes read from a request body (default: 4 MiB)
    pub max_request_bytes: u64,

    /// Maximum size of a single uploaded file (default: 1 MiB)
    pub max_file_bytes: u64,

    /// Memory budget for buffering one multipart part while decoding (default: 1 MiB).
    ///
    /// The budget applies to each part on its own, not to the whole form.
    /// A part that outgrows it is rejected with `DecodeBufferExceeded`;
    /// nothing is spilled to temporary files.
    pub max_decode_buffer_bytes: u64,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_request_bytes: 4 * MIB,
            max_file_bytes: MIB,
            max_decode_buffer_bytes: MIB,
        }
    }
}

/// Lowest TLS protocol version the server negotiates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsVersion {
    #[default]
    Tls12,
    Tls13,
}

impl FromStr for TlsVersion {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        match s.strip_prefix("tls").unwrap_or(&s).trim_start_matches(['v', ' ']) {
            "1.2" | "12" => Ok(TlsVersion::Tls12),
            "1.3" | "13" => Ok(TlsVersion::Tls13),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub min_version: TlsVersion,
    /// rustls cipher suite names in preference order, e.g.
    /// `TLS13_AES_256_GCM_SHA384`. Empty keeps the provider defaults.
    pub cipher_suites: Vec<String>,
    /// Key exchange group names in preference order, e.g. `X25519`,
    /// `secp256r1`. Empty keeps the provider defaults.
    pub curve_preferences: Vec<String>,
}

impl TlsConfig {
    pub fn new(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
            min_version: TlsVersion::default(),
            cipher_suites: Vec::new(),
            curve_preferences: Vec::new(),
        }
    }
}

/// Where a log stream is written
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Stdout,
    Stderr,
    File(PathBuf),
}

impl FromStr for LogTarget {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s {
            "stdout" => Ok(LogTarget::Stdout),
            "stderr" => Ok(LogTarget::Stderr),
            _ => match s.strip_prefix("file:") {
                Some(path) if !path.is_empty() => Ok(LogTarget::File(PathBuf::from(path))),
                _ => Err(ConfigError::InvalidLogTarget(s.to_string())),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Destination of the full log, filtered by `RUST_LOG` (default: stdout)
    pub debug: LogTarget,
    /// Destination of error events only (default: stderr)
    pub error: LogTarget,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            debug: LogTarget::Stdout,
            error: LogTarget::Stderr,
        }
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Run mode: "debug" or "production" (default: "production")
    pub mode: Mode,

    /// Listen address (default: "0.0.0.0:80")
    pub host: String,

    /// TCP keep-alive idle time for accepted connections (default: 3m)
    pub keep_alive: Duration,

    /// TLS certificate, key and protocol settings, when TLS is enabled
    pub tls: Option<TlsConfig>,

    pub log: LogConfig,

    pub limits: UploadLimits,

    /// Store backend: "memory" or "disk" (default: "memory")
    pub store_backend: String,

    /// Root directory of the disk store (default: "./data/store")
    pub store_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Production,
            host: "0.0.0.0:80".to_string(),
            keep_alive: DEFAULT_KEEP_ALIVE,
            tls: None,
            log: LogConfig::default(),
            limits: UploadLimits::default(),
            store_backend: "memory".to_string(),
            store_dir: PathBuf::from("./data/store"),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    /// Unset or empty variables fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let default = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mode = match var("APP_MODE") {
            Some(v) => v.parse::<Mode>().map_err(|_| ConfigError::InvalidValue {
                key: "APP_MODE",
                value: v,
            })?,
            None => default.mode,
        };

        let tls_enabled = var("TLS_ENABLED")
            .map(|v| v.to_lowercase() == "true" || v == "1")
            .unwrap_or(false);
        let tls = if tls_enabled {
            Some(TlsConfig {
                cert_path: var("TLS_CERT_FILE").map(PathBuf::from).unwrap_or_default(),
                key_path: var("TLS_KEY_FILE").map(PathBuf::from).unwrap_or_default(),
                min_version: match var("TLS_MIN_VERSION") {
                    Some(v) => v.parse::<TlsVersion>().map_err(|_| ConfigError::InvalidValue {
                        key: "TLS_MIN_VERSION",
                        value: v,
                    })?,
                    None => TlsVersion::default(),
                },
                cipher_suites: list_var(&var, "TLS_CIPHER_SUITES"),
                curve_preferences: list_var(&var, "TLS_CURVE_PREFERENCES"),
            })
        } else {
            None
        };

        let keep_alive = match var("KEEP_ALIVE_DURATION") {
            Some(v) => match humantime::parse_duration(v.trim()) {
                Ok(d) if d.is_zero() => default.keep_alive,
                Ok(d) => d,
                Err(_) => {
                    return Err(ConfigError::InvalidValue {
                        key: "KEEP_ALIVE_DURATION",
                        value: v,
                    });
                }
            },
            None => default.keep_alive,
        };

        let log = LogConfig {
            debug: var("LOG_DEBUG")
                .map(|v| v.parse::<LogTarget>())
                .transpose()?
                .unwrap_or(default.log.debug),
            error: var("LOG_ERROR")
                .map(|v| v.parse::<LogTarget>())
                .transpose()?
                .unwrap_or(default.log.error),
        };

        let limits = UploadLimits {
            max_request_bytes: size_var(&var, "MAX_REQ_SIZE")?
                .unwrap_or(default.limits.max_request_bytes),
            max_file_bytes: size_var(&var, "MAX_FILE_SIZE")?
                .unwrap_or(default.limits.max_file_bytes),
            max_decode_buffer_bytes: size_var(&var, "MAX_MULTIPART_MEMBUF")?
                .unwrap_or(default.limits.max_decode_buffer_bytes),
        };

        let config = Self {
            mode,
            host: var("HTTP_HOST").unwrap_or(default.host),
            keep_alive,
            tls,
            log,
            limits,
            store_backend: var("STORE_BACKEND")
                .map(|v| v.trim().to_lowercase())
                .unwrap_or(default.store_backend),
            store_dir: var("STORE_DIR").map(PathBuf::from).unwrap_or(default.store_dir),
        };

        config.validate()?;
        Ok(config)
    }

    /// Create config for development (debug mode, plain HTTP on localhost)
    pub fn development() -> Self {
        Self {
            mode: Mode::Debug,
            host: "127.0.0.1:3000".to_string(),
            ..Self::default()
        }
    }

    /// Create config for production (TLS required)
    pub fn production(tls: TlsConfig) -> Self {
        Self {
            mode: Mode::Production,
            tls: Some(tls),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(tls) = &self.tls {
            if tls.cert_path.as_os_str().is_empty() {
                return Err(ConfigError::MissingTlsPath("certificate"));
            }
            if tls.key_path.as_os_str().is_empty() {
                return Err(ConfigError::MissingTlsPath("private key"));
            }
        } else if self.mode == Mode::Production {
            return Err(ConfigError::TlsRequired);
        }

        match self.store_backend.as_str() {
            "memory" | "disk" => {}
            other => return Err(ConfigError::UnknownStoreBackend(other.to_string())),
        }

        Ok(())
    }

    /// Settings that are valid but probably not what the operator meant
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.limits.max_decode_buffer_bytes < self.limits.max_file_bytes {
            warnings.push(format!(
                "Multipart buffer ({} bytes) is smaller than the file size limit ({} bytes); larger files will be rejected",
                self.limits.max_decode_buffer_bytes, self.limits.max_file_bytes
            ));
        }
        warnings
    }
}

fn list_var<F>(var: &F, key: &str) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    var(key)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn size_var<F>(var: &F, key: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = var(key) else {
        return Ok(None);
    };
    match parse_byte_size(&value) {
        Some(0) => Ok(None),
        Some(n) => Ok(Some(n)),
        None => Err(ConfigError::InvalidValue { key, value }),
    }
}

/// Parses sizes such as `1024`, `512KB`, `4 MiB` or `1g`. Units are binary multiples.
pub fn parse_byte_size(input: &str) -> Option<u64> {
    let s = input.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    if digits.is_empty() {
        return None;
    }
    let value: u64 = digits.parse().ok()?;

    let multiplier = match unit.trim().to_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => KIB,
        "m" | "mb" | "mib" => MIB,
        "g" | "gb" | "gib" => GIB,
        _ => return None,
    };
    value.checked_mul(multiplier)
}
