use std::path::Path;

use config::{Config, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::GatewayConfig;

/// Load bootstrap configuration from a file. The format follows the
/// extension; unknown extensions are treated as TOML.
pub fn load_config(config_path: &str) -> Result<GatewayConfig> {
    let path = Path::new(config_path);

    let format = match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        _ => FileFormat::Toml,
    };

    let settings = Config::builder()
        .add_source(File::new(config_path, format))
        .build()
        .with_context(|| format!("failed to read config from {}", path.display()))?;

    let gateway_config: GatewayConfig = settings
        .try_deserialize()
        .with_context(|| format!("failed to deserialize config from {}", path.display()))?;

    Ok(gateway_config)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    fn write_named(content: &str, suffix: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        write!(file, "{content}").unwrap();
        file
    }

    #[test]
    fn loads_toml() {
        let file = write_named(
            r#"
listen_addr = "127.0.0.1:3000"
jwt_secret = "s3cret"

[store]
endpoints = ["etcd-1:2379", "etcd-2:2379"]

[rate_limit]
per_second = 100
"#,
            ".toml",
        );

        let config = load_config(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:3000");
        assert_eq!(config.store.endpoints.len(), 2);
        assert_eq!(config.jwt_secret.as_deref(), Some("s3cret"));
        assert_eq!(config.rate_limit.unwrap().per_second, 100);
        // Untouched fields keep their defaults.
        assert_eq!(config.admin_addr, "0.0.0.0:9000");
    }

    #[test]
    fn loads_yaml() {
        let file = write_named(
            r#"
listen_addr: "127.0.0.1:3000"
log:
  json: true
  level: debug
"#,
            ".yaml",
        );

        let config = load_config(file.path().to_str().unwrap()).unwrap();
        assert!(config.log.json);
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(load_config("/definitely/not/here.toml").is_err());
    }
}
