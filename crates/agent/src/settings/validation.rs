use super::{Settings, StoreSettings};
use crate::{Error, Result, source::MAX_PAGE_SIZE};
use url::Url;

fn invalid(message: impl Into<String>) -> Error {
    Error::Configuration(message.into())
}

fn validate_url(name: &str, value: &str) -> Result<()> {
    let url = Url::parse(value)
        .map_err(|err| invalid(format!("{name} '{value}' is not a valid URL: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("{name} must start with http:// or https://")));
    }
    Ok(())
}

/// Validate the configuration values
pub fn validate_config(settings: &Settings) -> Result<()> {
    let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_log_levels.contains(&settings.log_level.to_lowercase().as_str()) {
        return Err(invalid(format!(
            "Invalid log level '{}'. Valid options are: {:?}",
            settings.log_level, valid_log_levels
        )));
    }

    let page_size = settings.data_source.page_size;
    if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
        return Err(invalid(format!(
            "Data source page_size must be between 1 and {MAX_PAGE_SIZE}, got {page_size}"
        )));
    }

    validate_url("Metrics base URL", &settings.metrics.base_url)?;
    if settings.metrics.license_key.is_empty() {
        return Err(invalid("Metrics license_key cannot be empty"));
    }
    if settings.metrics.guid.is_empty() {
        return Err(invalid("Metrics guid cannot be empty"));
    }
    if settings.metrics.component_name.is_empty() {
        return Err(invalid("Metrics component_name cannot be empty"));
    }

    // test mode never talks to the data source
    if !settings.test_mode {
        validate_url("Data source base URL", &settings.data_source.base_url)?;
        if settings.data_source.api_key.is_empty() {
            return Err(invalid("Data source api_key cannot be empty"));
        }
    }

    match &settings.store {
        StoreSettings::HttpCache(cache) => {
            validate_url("Watermark cache base URL", &cache.base_url)?;
            if cache.project_id.is_empty() || cache.token.is_empty() {
                return Err(invalid("Watermark cache project_id and token are required"));
            }
            if cache.cache_name.is_empty() {
                return Err(invalid("Watermark cache_name cannot be empty"));
            }
        }
        StoreSettings::File { path } if path.is_empty() => {
            return Err(invalid("Watermark file path cannot be empty"));
        }
        StoreSettings::File { .. } => {}
        StoreSettings::Memory if !settings.test_mode => {
            return Err(invalid(
                "The memory watermark store forgets progress between runs; \
                 use it only with test_mode",
            ));
        }
        StoreSettings::Memory => {}
    }

    Ok(())
}
