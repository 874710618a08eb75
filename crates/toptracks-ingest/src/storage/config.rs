use serde::{Deserialize, Serialize};
use std::env;

/// S3 connection settings for checkpoint persistence
///
/// Without static keys the default AWS credential chain is used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub endpoint: Option<String>,
    pub region: String,
    pub bucket: String,
    pub access_key: Option<String>,
    #[serde(skip_serializing)]
    pub secret_key: Option<String>,
    pub path_style: bool,
}

impl StorageConfig {
    pub fn from_env() -> Self {
        Self {
            endpoint: env::var("S3_ENDPOINT").ok().filter(|v| !v.is_empty()),
            region: env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            bucket: env::var("S3_BUCKET").unwrap_or_else(|_| "toptracks".to_string()),
            access_key: env::var("S3_ACCESS_KEY")
                .or_else(|_| env::var("AWS_ACCESS_KEY_ID"))
                .ok(),
            secret_key: env::var("S3_SECRET_KEY")
                .or_else(|_| env::var("AWS_SECRET_ACCESS_KEY"))
                .ok(),
            path_style: env::var("S3_PATH_STYLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
        }
    }

    /// Static credentials, when both halves are configured
    pub fn static_credentials(&self) -> Option<(&str, &str)> {
        match (&self.access_key, &self.secret_key) {
            (Some(access), Some(secret)) => Some((access.as_str(), secret.as_str())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_from_env() {
        for key in ["S3_ACCESS_KEY", "S3_SECRET_KEY", "AWS_ACCESS_KEY_ID", "AWS_SECRET_ACCESS_KEY"] {
            env::remove_var(key);
        }
        env::set_var("S3_BUCKET", "feeds");
        env::set_var("S3_PATH_STYLE", "true");

        let config = StorageConfig::from_env();
        assert_eq!(config.bucket, "feeds");
        assert!(config.path_style);
        assert_eq!(config.static_credentials(), None);

        env::set_var("S3_ACCESS_KEY", "ingest");
        env::set_var("S3_SECRET_KEY", "hunter2");
        let config = StorageConfig::from_env();
        assert_eq!(config.static_credentials(), Some(("ingest", "hunter2")));

        for key in ["S3_BUCKET", "S3_PATH_STYLE", "S3_ACCESS_KEY", "S3_SECRET_KEY"] {
            env::remove_var(key);
        }
    }
}
