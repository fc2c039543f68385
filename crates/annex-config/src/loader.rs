//! TOML file and environment loading.

use std::path::Path;

use tracing::info;

use crate::error::{ConfigError, ConfigResult};
use crate::model::Settings;
use crate::validate::validate;

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "ANNEX_CONFIG";
/// Environment variable overriding the database URL.
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

/// Load settings from the file named by `ANNEX_CONFIG`, falling back to
/// defaults when the variable is unset. `DATABASE_URL` overrides the file
/// value in either case.
///
/// # Errors
///
/// Returns an error when the file cannot be read or parsed, when validation
/// fails, or when no database URL is available from any source.
pub fn load_from_env() -> ConfigResult<Settings> {
    let mut settings = match std::env::var(CONFIG_PATH_ENV) {
        Ok(path) => load_file(Path::new(&path))?,
        Err(_) => Settings::default(),
    };

    if let Ok(url) = std::env::var(DATABASE_URL_ENV) {
        settings.database.url = url;
    }
    if settings.database.url.is_empty() {
        return Err(ConfigError::MissingEnv {
            name: DATABASE_URL_ENV,
        });
    }

    validate(&settings)?;
    Ok(settings)
}

/// Load and validate settings from an explicit file path. No environment
/// fallback is consulted.
///
/// # Errors
///
/// Returns an error when the file cannot be read or parsed, or when
/// validation fails.
pub fn load_from_path(path: &Path) -> ConfigResult<Settings> {
    let settings = load_file(path)?;
    validate(&settings)?;
    Ok(settings)
}

fn load_file(path: &Path) -> ConfigResult<Settings> {
    let raw = std::fs::read_to_string(path).map_err(|err| ConfigError::io(path, err))?;
    let settings: Settings =
        toml::from_str(&raw).map_err(|err| ConfigError::parse(path, err))?;
    info!(path = %path.display(), "loaded configuration file");
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_partial_file_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            r#"
[database]
url = "postgres://localhost/annex"

[download]
poll_interval_secs = 10
"#
        )
        .expect("write config");

        let settings = load_from_path(file.path()).expect("config should load");
        assert_eq!(settings.database.url, "postgres://localhost/annex");
        assert_eq!(settings.download.poll_interval_secs, 10);
        // Untouched sections keep their defaults.
        assert_eq!(settings.encode.poll_interval_secs, 2);
    }

    #[test]
    fn rejects_invalid_values() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            r#"
[download]
poll_interval_secs = 0
"#
        )
        .expect("write config");

        assert!(load_from_path(file.path()).is_err());
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_from_path(Path::new("/definitely/missing/annex.toml"))
            .expect_err("missing file should fail");
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
