use sensor_core::{HubConfig, LifecycleConfig, PipelineConfig, N_MAX_SENSORS};
use sensor_io::{StoreError, StoreKind};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing value for {0}")]
    MissingValue(&'static str),

    #[error("Invalid value '{value}' for {flag}")]
    InvalidValue { flag: &'static str, value: String },

    #[error("Invalid device spec '{0}' (expected NAME:INTERVAL_MS)")]
    InvalidDevice(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Unknown argument '{0}'")]
    UnknownArgument(String),
}

/// One device requested on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSpec {
    pub name: String,
    pub interval: Duration,
}

impl DeviceSpec {
    /// Parse `NAME:MS`. The name may itself contain colons; the interval is
    /// whatever follows the last one.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let (name, ms) = raw
            .rsplit_once(':')
            .ok_or_else(|| ConfigError::InvalidDevice(raw.to_string()))?;
        let name = name.trim();
        let ms = ms
            .trim()
            .parse::<u64>()
            .map_err(|_| ConfigError::InvalidDevice(raw.to_string()))?;
        if name.is_empty() || ms == 0 {
            return Err(ConfigError::InvalidDevice(raw.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            interval: Duration::from_millis(ms),
        })
    }
}

fn default_devices() -> Vec<DeviceSpec> {
    [2000, 2500, 3000, 1000, 1500]
        .into_iter()
        .enumerate()
        .map(|(i, ms)| DeviceSpec {
            name: format!("Thermal Sensor {:02}", i + 1),
            interval: Duration::from_millis(ms),
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub show_help: bool,
    pub run_seconds: Option<u64>,
    pub devices: Vec<DeviceSpec>,
    pub hub_tick_ms: u64,
    pub hub_capacity: usize,
    pub registry_capacity: usize,
    pub stop_factor: f64,
    pub store_kind: StoreKind,
    pub store_path: PathBuf,
    pub json_logs: bool,
    pub log_dir: Option<PathBuf>,
    pub metrics_addr: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        let hub = HubConfig::default();
        Self {
            show_help: false,
            run_seconds: None,
            devices: default_devices(),
            hub_tick_ms: hub.tick_interval.as_millis() as u64,
            hub_capacity: hub.capacity,
            registry_capacity: N_MAX_SENSORS,
            stop_factor: LifecycleConfig::default().stop_timeout_factor,
            store_kind: StoreKind::default(),
            store_path: PathBuf::from("data/"),
            json_logs: false,
            log_dir: None,
            metrics_addr: None,
        }
    }
}

fn value<'a>(args: &'a [String], i: usize, flag: &'static str) -> Result<&'a str, ConfigError> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or(ConfigError::MissingValue(flag))
}

fn parse_num<T: std::str::FromStr>(raw: &str, flag: &'static str) -> Result<T, ConfigError> {
    raw.parse::<T>().map_err(|_| ConfigError::InvalidValue {
        flag,
        value: raw.to_string(),
    })
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let args: Vec<String> = std::env::args().collect();
        Self::from_args(&args)
    }

    pub fn from_args(args: &[String]) -> Result<Self, ConfigError> {
        let mut cfg = RuntimeConfig::default();
        let mut devices = Vec::new();
        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--device" => {
                    devices.push(DeviceSpec::parse(value(args, i, "--device")?)?);
                    i += 1;
                }
                "--run-seconds" => {
                    let raw = value(args, i, "--run-seconds")?;
                    cfg.run_seconds = Some(parse_num(raw, "--run-seconds")?);
                    i += 1;
                }
                "--hub-tick-ms" => {
                    let ms: u64 = parse_num(value(args, i, "--hub-tick-ms")?, "--hub-tick-ms")?;
                    if ms == 0 {
                        return Err(ConfigError::InvalidValue {
                            flag: "--hub-tick-ms",
                            value: ms.to_string(),
                        });
                    }
                    cfg.hub_tick_ms = ms;
                    i += 1;
                }
                "--hub-capacity" => {
                    cfg.hub_capacity =
                        parse_num(value(args, i, "--hub-capacity")?, "--hub-capacity")?;
                    i += 1;
                }
                "--registry-capacity" => {
                    cfg.registry_capacity =
                        parse_num(value(args, i, "--registry-capacity")?, "--registry-capacity")?;
                    i += 1;
                }
                "--stop-factor" => {
                    let raw = value(args, i, "--stop-factor")?;
                    let factor: f64 = parse_num(raw, "--stop-factor")?;
                    if !factor.is_finite() || factor <= 0.0 {
                        return Err(ConfigError::InvalidValue {
                            flag: "--stop-factor",
                            value: raw.to_string(),
                        });
                    }
                    cfg.stop_factor = factor;
                    i += 1;
                }
                "--store" => {
                    cfg.store_kind = value(args, i, "--store")?.parse()?;
                    i += 1;
                }
                "--store-path" => {
                    cfg.store_path = PathBuf::from(value(args, i, "--store-path")?);
                    i += 1;
                }
                "--json-logs" => {
                    cfg.json_logs = true;
                }
                "--log-dir" => {
                    cfg.log_dir = Some(PathBuf::from(value(args, i, "--log-dir")?));
                    i += 1;
                }
                "--metrics-addr" => {
                    cfg.metrics_addr = Some(value(args, i, "--metrics-addr")?.to_string());
                    i += 1;
                }
                "-h" | "--help" => {
                    cfg.show_help = true;
                }
                other => return Err(ConfigError::UnknownArgument(other.to_string())),
            }
            i += 1;
        }
        if !devices.is_empty() {
            cfg.devices = devices;
        }
        Ok(cfg)
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        let lifecycle = LifecycleConfig {
            stop_timeout_factor: self.stop_factor,
            ..LifecycleConfig::default()
        };
        PipelineConfig {
            hub: HubConfig {
                capacity: self.hub_capacity,
                tick_interval: Duration::from_millis(self.hub_tick_ms),
                lifecycle,
            },
            registry_capacity: self.registry_capacity,
            lifecycle,
            ..PipelineConfig::default()
        }
    }

    pub fn print_help() {
        println!(
            r#"sensor-sim - Simulated sensor bank with batched persistence

USAGE:
    sensor-sim [OPTIONS]

OPTIONS:
    --device <NAME:MS>        Add a device with a sampling interval in ms (repeatable)
                              [default: Thermal Sensor 01..05]
    --run-seconds <SECS>      Run for a fixed duration then exit
    --hub-tick-ms <MS>        Hub drain interval [default: 500]
    --hub-capacity <N>        Hub queue capacity [default: 15]
    --registry-capacity <N>   Maximum number of registered devices [default: 5]
    --stop-factor <F>         Stop timeout as a multiple of the task interval [default: 1.5]
    --store <KIND>            Storage backend (append|transactional) [default: append]
    --store-path <PATH>       Store file, or a directory for default_file_repo.jsonl [default: data/]
    --json-logs               Output logs in JSON format (for log aggregation)
    --log-dir <DIR>           Also write daily-rolling log files to this directory
    --metrics-addr <ADDR>     Enable Prometheus metrics server on address (e.g., 0.0.0.0:9090)
    -h, --help                Print this help message

ENVIRONMENT:
    RUST_LOG                  Log filter (e.g., info, debug, sensor_core=trace)
"#
        );
    }
}
