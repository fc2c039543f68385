//! Settings invariants checked after loading.

use crate::error::{ConfigError, ConfigResult};
use crate::model::Settings;

/// Validate a settings tree, rejecting values the pipeline cannot run with.
///
/// # Errors
///
/// Returns [`ConfigError::Invalid`] naming the first offending field.
pub fn validate(settings: &Settings) -> ConfigResult<()> {
    ensure_nonzero(
        "download.poll_interval_secs",
        settings.download.poll_interval_secs,
    )?;
    ensure_nonzero(
        "download.stall_window_secs",
        settings.download.stall_window_secs,
    )?;
    ensure_nonzero(
        "download.movie_timeout_secs",
        settings.download.movie_timeout_secs,
    )?;
    ensure_nonzero("download.tv_timeout_secs", settings.download.tv_timeout_secs)?;
    if settings.download.stall_window_secs >= settings.download.movie_timeout_secs {
        return Err(ConfigError::invalid(
            "download.stall_window_secs",
            "stall window must be shorter than the movie timeout",
            Some(settings.download.stall_window_secs.to_string()),
        ));
    }

    ensure_nonzero("encode.poll_interval_secs", settings.encode.poll_interval_secs)?;

    ensure_nonzero("scheduler.retry_sweep_secs", settings.scheduler.retry_sweep_secs)?;
    ensure_nonzero("scheduler.stuck_sweep_secs", settings.scheduler.stuck_sweep_secs)?;
    ensure_nonzero(
        "scheduler.download_health_secs",
        settings.scheduler.download_health_secs,
    )?;
    ensure_nonzero(
        "scheduler.new_episode_sweep_secs",
        settings.scheduler.new_episode_sweep_secs,
    )?;
    ensure_nonzero(
        "scheduler.stuck_threshold_secs",
        settings.scheduler.stuck_threshold_secs,
    )?;

    if settings.pipeline.max_attempts < 1 {
        return Err(ConfigError::invalid(
            "pipeline.max_attempts",
            "at least one attempt is required",
            Some(settings.pipeline.max_attempts.to_string()),
        ));
    }
    if settings.pipeline.alternatives_stored == 0 {
        return Err(ConfigError::invalid(
            "pipeline.alternatives_stored",
            "at least one alternative must be stored",
            Some("0".to_string()),
        ));
    }

    if settings.paths.staging_root.as_os_str().is_empty() {
        return Err(ConfigError::invalid(
            "paths.staging_root",
            "staging root must not be empty",
            None,
        ));
    }

    Ok(())
}

fn ensure_nonzero(field: &'static str, value: u64) -> ConfigResult<()> {
    if value == 0 {
        return Err(ConfigError::invalid(
            field,
            "must be greater than zero",
            Some("0".to_string()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        validate(&Settings::default()).expect("default settings should validate");
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let mut settings = Settings::default();
        settings.download.poll_interval_secs = 0;
        let err = validate(&settings).expect_err("zero interval should fail");
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "download.poll_interval_secs",
                ..
            }
        ));
    }

    #[test]
    fn stall_window_must_undercut_timeout() {
        let mut settings = Settings::default();
        settings.download.stall_window_secs = settings.download.movie_timeout_secs;
        assert!(validate(&settings).is_err());
    }

    #[test]
    fn attempts_floor_is_enforced() {
        let mut settings = Settings::default();
        settings.pipeline.max_attempts = 0;
        assert!(validate(&settings).is_err());
    }
}
