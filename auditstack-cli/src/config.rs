//! Configuration record for the audit stack
//!
//! Loaded from TOML. The three recognized fields (`bucket_name`, `role_name`,
//! `alarm_destination`) ship with a placeholder value; synthesis refuses to
//! start until every one of them has been set.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

/// Value the recognized fields hold until an operator fills them in
pub const PLACEHOLDER: &str = "CHANGE_ME";

pub const DEFAULT_CONFIG_FILE: &str = "auditstack.toml";

static BUCKET_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9.-]{1,61}[a-z0-9]$").unwrap());
static ROLE_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[\w+=,.@-]{1,64}$").unwrap());
static TOPIC_ARN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^arn:aws[a-z-]*:sns:[a-z0-9-]+:\d{12}:[A-Za-z0-9_-]{1,256}(\.fifo)?$").unwrap()
});
static SCHEDULE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(cron|rate)\(.+\)$").unwrap());

const LOG_RETENTION_DAYS: &[i64] = &[
    1, 3, 5, 7, 14, 30, 60, 90, 120, 150, 180, 365, 400, 545, 731, 1096, 1827, 2192, 2557, 2922,
    3288, 3653,
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error(
        "'{field}' in {} still holds the placeholder value '{}'; set it before synthesizing",
        .path.display(),
        PLACEHOLDER
    )]
    Placeholder { field: &'static str, path: PathBuf },

    #[error("Invalid {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditConfig {
    #[serde(default = "default_stack_name")]
    pub stack_name: String,
    /// Bucket the audit task reads and writes its reports to
    pub bucket_name: String,
    /// Role the audit task assumes to inspect the audited accounts
    pub role_name: String,
    /// ARN of the external SNS topic alarms are forwarded to
    pub alarm_destination: String,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub task: TaskConfig,
    #[serde(default)]
    pub alarm: AlarmConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkConfig {
    pub max_azs: usize,
    pub cidr: String,
    /// Zone names to pin subnets to; empty selects zones from the region at deploy time
    pub availability_zones: Vec<String>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_azs: 2,
            cidr: auditstack_core::network::DEFAULT_CIDR.to_string(),
            availability_zones: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TaskConfig {
    pub image: String,
    /// EventBridge schedule expression, `cron(...)` or `rate(...)`
    pub schedule: String,
    pub cpu: u32,
    pub memory: u32,
    pub command: Vec<String>,
    pub log_retention_days: i64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            image: "auditor:latest".to_string(),
            schedule: "cron(0 3 * * ? *)".to_string(),
            cpu: 256,
            memory: 512,
            command: Vec::new(),
            log_retention_days: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AlarmConfig {
    pub namespace: String,
    pub metric_name: String,
    /// CloudWatch Logs filter pattern counted as an audit error
    pub filter_pattern: String,
    pub threshold: i64,
    pub period_seconds: i64,
    pub evaluation_periods: i64,
}

impl Default for AlarmConfig {
    fn default() -> Self {
        Self {
            namespace: "Audit".to_string(),
            metric_name: "AuditErrors".to_string(),
            filter_pattern: "ERROR".to_string(),
            threshold: 1,
            period_seconds: 300,
            evaluation_periods: 1,
        }
    }
}

fn default_stack_name() -> String {
    "AuditStack".to_string()
}

impl AuditConfig {
    /// Read, parse, and check a configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::parse(&content, path)?;
        config.check_placeholders(path)?;
        config.validate()?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn check_placeholders(&self, path: &Path) -> Result<(), ConfigError> {
        let recognized = [
            ("bucket_name", &self.bucket_name),
            ("role_name", &self.role_name),
            ("alarm_destination", &self.alarm_destination),
        ];
        for (field, value) in recognized {
            if value.trim() == PLACEHOLDER {
                return Err(ConfigError::Placeholder {
                    field,
                    path: path.to_path_buf(),
                });
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &'static str, message: String| ConfigError::Invalid { field, message };

        if !BUCKET_NAME.is_match(&self.bucket_name) || self.bucket_name.contains("..") {
            return Err(invalid(
                "bucket_name",
                format!("'{}' is not a valid S3 bucket name", self.bucket_name),
            ));
        }
        if !ROLE_NAME.is_match(&self.role_name) {
            return Err(invalid(
                "role_name",
                format!("'{}' is not a valid IAM role name", self.role_name),
            ));
        }
        if !TOPIC_ARN.is_match(&self.alarm_destination) {
            return Err(invalid(
                "alarm_destination",
                format!("'{}' is not an SNS topic ARN", self.alarm_destination),
            ));
        }
        if self.network.max_azs == 0 {
            return Err(invalid("network.max_azs", "must be at least 1".to_string()));
        }
        if !SCHEDULE.is_match(&self.task.schedule) {
            return Err(invalid(
                "task.schedule",
                format!("'{}' must be cron(...) or rate(...)", self.task.schedule),
            ));
        }
        if !is_fargate_size(self.task.cpu, self.task.memory) {
            return Err(invalid(
                "task.memory",
                format!(
                    "{} MiB is not a valid Fargate memory size for {} CPU units",
                    self.task.memory, self.task.cpu
                ),
            ));
        }
        if !LOG_RETENTION_DAYS.contains(&self.task.log_retention_days) {
            return Err(invalid(
                "task.log_retention_days",
                format!("{} is not a CloudWatch Logs retention period", self.task.log_retention_days),
            ));
        }
        if self.alarm.period_seconds < 10 || self.alarm.evaluation_periods < 1 {
            return Err(invalid(
                "alarm",
                "period_seconds must be at least 10 and evaluation_periods at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Supported Fargate CPU/memory pairs
fn is_fargate_size(cpu: u32, memory: u32) -> bool {
    match cpu {
        256 => matches!(memory, 512 | 1024 | 2048),
        512 => (1024..=4096).contains(&memory) && memory % 1024 == 0,
        1024 => (2048..=8192).contains(&memory) && memory % 1024 == 0,
        2048 => (4096..=16384).contains(&memory) && memory % 1024 == 0,
        4096 => (8192..=30720).contains(&memory) && memory % 1024 == 0,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const VALID: &str = r#"
bucket_name = "audit-reports"
role_name = "AuditReadOnly"
alarm_destination = "arn:aws:sns:us-east-1:123456789012:ops-alarms"
"#;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn load_with_defaults() {
        let file = write_config(VALID);
        let config = AuditConfig::load(file.path()).unwrap();

        assert_eq!(config.stack_name, "AuditStack");
        assert_eq!(config.network.max_azs, 2);
        assert_eq!(config.network.cidr, "10.0.0.0/16");
        assert!(config.network.availability_zones.is_empty());
        assert_eq!(config.task.cpu, 256);
        assert_eq!(config.alarm.metric_name, "AuditErrors");
    }

    #[test]
    fn load_with_sections() {
        let content = format!(
            "{}\n[network]\nmax_azs = 3\navailability_zones = [\"us-east-1a\", \"us-east-1b\", \"us-east-1c\"]\n\n[task]\nschedule = \"rate(1 day)\"\ncpu = 512\nmemory = 2048\n",
            VALID
        );
        let file = write_config(&content);
        let config = AuditConfig::load(file.path()).unwrap();

        assert_eq!(config.network.max_azs, 3);
        assert_eq!(
            config.network.availability_zones,
            vec!["us-east-1a", "us-east-1b", "us-east-1c"]
        );
        assert_eq!(config.task.schedule, "rate(1 day)");
        assert_eq!(config.task.memory, 2048);
    }

    #[test]
    fn placeholder_halts_loading() {
        let content = VALID.replace("AuditReadOnly", PLACEHOLDER);
        let file = write_config(&content);

        match AuditConfig::load(file.path()) {
            Err(ConfigError::Placeholder { field, .. }) => assert_eq!(field, "role_name"),
            other => panic!("Expected Placeholder, got {:?}", other),
        }
    }

    #[test]
    fn shipped_config_is_rejected_until_filled_in() {
        let shipped = include_str!("../../auditstack.toml");
        let config = AuditConfig::parse(shipped, Path::new("auditstack.toml")).unwrap();
        assert!(matches!(
            config.check_placeholders(Path::new("auditstack.toml")),
            Err(ConfigError::Placeholder { field: "bucket_name", .. })
        ));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let file = write_config(&format!("{}\nbucket = \"typo\"\n", VALID));
        assert!(matches!(
            AuditConfig::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn missing_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            AuditConfig::load(&dir.path().join("missing.toml")),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let cases = [
            ("audit-reports", "Audit_Reports", "bucket_name"),
            ("arn:aws:sns:us-east-1:123456789012:ops-alarms", "ops-alarms", "alarm_destination"),
            ("cron(0 3 * * ? *)", "daily", "task.schedule"),
        ];
        let base = format!("{}\n[task]\nschedule = \"cron(0 3 * * ? *)\"\n", VALID);
        for (from, to, expected) in cases {
            let file = write_config(&base.replacen(from, to, 1));
            match AuditConfig::load(file.path()) {
                Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, expected),
                other => panic!("Expected Invalid({}), got {:?}", expected, other),
            }
        }
    }

    #[test]
    fn fargate_sizes() {
        assert!(is_fargate_size(256, 512));
        assert!(is_fargate_size(1024, 3072));
        assert!(!is_fargate_size(256, 4096));
        assert!(!is_fargate_size(300, 1024));
    }
}
