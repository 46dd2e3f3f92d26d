//! Ambient configuration: a `toml` file, overridable by environment
//! variables, falling back to defaults on any parse error rather than
//! failing the whole process over a malformed or absent config file.

use serde::Deserialize;
use std::path::PathBuf;

const DEFAULT_CONFIG_PATH: &str = "/etc/detsan/detsan.toml";
const ENV_CONFIG_PATH: &str = "DETSAN_CONFIG";

const ENV_OUTPUT_PATH: &str = "CILKSAN_OUTPUT_PATH";
const ENV_DISABLE: &str = "CILKSAN_DISABLE";
const ENV_READER_SET_K: &str = "CILKSAN_READER_SET_K";
const ENV_SHADOW_PAGE_BITS: &str = "CILKSAN_SHADOW_PAGE_BITS";
const ENV_REPORT_FORMAT: &str = "CILKSAN_REPORT_FORMAT";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub output: OutputSection,
    #[serde(default)]
    pub monitoring: MonitoringSection,
}

impl Config {
    /// Load from a TOML file (path from `DETSAN_CONFIG`, default
    /// `/etc/detsan/detsan.toml`), then let `CILKSAN_*` environment
    /// variables override individual fields. Any I/O or parse
    /// failure on the file silently yields defaults — a missing config
    /// file is the common case for a CLI tool, not an error.
    pub fn load() -> Self {
        let path = std::env::var(ENV_CONFIG_PATH).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut cfg = match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_default(),
            Err(_) => Config::default(),
        };
        cfg.apply_env();
        cfg
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var(ENV_OUTPUT_PATH) {
            self.output.path = Some(v);
        }
        if let Ok(v) = std::env::var(ENV_DISABLE) {
            self.engine.disabled = parse_bool(&v).unwrap_or(self.engine.disabled);
        }
        if let Ok(v) = std::env::var(ENV_READER_SET_K) {
            if let Ok(k) = v.parse() {
                self.engine.reader_set_k = k;
            }
        }
        if let Ok(v) = std::env::var(ENV_SHADOW_PAGE_BITS) {
            if let Ok(bits) = v.parse() {
                self.engine.shadow_page_bits = bits;
            }
        }
        if let Ok(v) = std::env::var(ENV_REPORT_FORMAT) {
            if let Some(fmt) = ReportFormat::parse(&v) {
                self.output.format = fmt;
            }
        }
    }

    pub fn engine_config(&self) -> crate::engine::EngineConfig {
        crate::engine::EngineConfig {
            reader_set_k: self.engine.reader_set_k,
            disabled: self.engine.disabled,
        }
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim() {
        "1" | "true" | "TRUE" | "yes" => Some(true),
        "0" | "false" | "FALSE" | "no" | "" => Some(false),
        _ => None,
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineSection {
    /// Reader-set cardinality bound K; default matches
    /// `shadow::DEFAULT_READER_SET_K`.
    #[serde(default = "default_reader_set_k")]
    pub reader_set_k: usize,
    /// `CILKSAN_SHADOW_PAGE_BITS`: log2 of the shadow page size.
    #[serde(default = "default_shadow_page_bits")]
    pub shadow_page_bits: u32,
    /// `CILKSAN_DISABLE`: no-op mode.
    #[serde(default)]
    pub disabled: bool,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            reader_set_k: default_reader_set_k(),
            shadow_page_bits: default_shadow_page_bits(),
            disabled: false,
        }
    }
}

fn default_reader_set_k() -> usize {
    crate::shadow::DEFAULT_READER_SET_K
}

fn default_shadow_page_bits() -> u32 {
    16
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Text,
    Jsonl,
}

impl ReportFormat {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Some(ReportFormat::Text),
            "jsonl" => Some(ReportFormat::Jsonl),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct OutputSection {
    /// `CILKSAN_OUTPUT_PATH`: file to write race reports to. `None` means
    /// stderr, the default destination.
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub format: ReportFormat,
}

/// The optional async monitoring surface: off by default, and never on
/// the detector's synchronous hot path even when
/// enabled.
#[derive(Debug, Deserialize, Clone)]
pub struct MonitoringSection {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_monitoring_addr")]
    pub listen_addr: String,
    #[serde(default = "default_monitoring_db")]
    pub sqlite_path: PathBuf,
}

impl Default for MonitoringSection {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: default_monitoring_addr(),
            sqlite_path: default_monitoring_db(),
        }
    }
}

fn default_monitoring_addr() -> String {
    "127.0.0.1:7777".to_string()
}

fn default_monitoring_db() -> PathBuf {
    PathBuf::from("detsan-races.sqlite")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn parse_config_defaults() {
        let toml = r#"
[engine]
reader_set_k = 2
[output]
path = "/tmp/races.txt"
format = "jsonl"
[monitoring]
enabled = true
"#;
        let cfg: Config = toml::from_str(toml).unwrap();
        assert_eq!(cfg.engine.reader_set_k, 2);
        assert_eq!(cfg.output.path.as_deref(), Some("/tmp/races.txt"));
        assert_eq!(cfg.output.format, ReportFormat::Jsonl);
        assert!(cfg.monitoring.enabled);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        unsafe {
            std::env::set_var(ENV_CONFIG_PATH, "/nonexistent/detsan.toml");
        }
        let cfg = Config::load();
        assert_eq!(cfg.engine.reader_set_k, default_reader_set_k());
        unsafe {
            std::env::remove_var(ENV_CONFIG_PATH);
        }
    }

    #[test]
    fn env_overrides_output_path_and_disable() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[engine]\nreader_set_k = 3").unwrap();
        unsafe {
            std::env::set_var(ENV_CONFIG_PATH, file.path());
            std::env::set_var(ENV_OUTPUT_PATH, "/tmp/out.txt");
            std::env::set_var(ENV_DISABLE, "true");
        }
        let cfg = Config::load();
        assert_eq!(cfg.engine.reader_set_k, 3);
        assert_eq!(cfg.output.path.as_deref(), Some("/tmp/out.txt"));
        assert!(cfg.engine.disabled);
        unsafe {
            std::env::remove_var(ENV_CONFIG_PATH);
            std::env::remove_var(ENV_OUTPUT_PATH);
            std::env::remove_var(ENV_DISABLE);
        }
    }
}
