pub mod error;

use error::Error;

pub type DatabridgeResult<T> = Result<T, Error>;

/// Read a required, non-empty environment variable.
pub fn required_env(name: &str) -> DatabridgeResult<String> {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(Error::MissingEnv(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_env_is_reported_by_name() {
        let err = required_env("DATABRIDGE_UTILS_SURELY_UNSET").unwrap_err();
        assert!(matches!(err, Error::MissingEnv(ref name) if name == "DATABRIDGE_UTILS_SURELY_UNSET"));
        assert_eq!(err.to_string(), "environment variable DATABRIDGE_UTILS_SURELY_UNSET is not set");
    }
}
