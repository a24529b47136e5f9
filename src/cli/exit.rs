//! Exit codes for the binary.
//!
//! - 0: Success
//! - 1: General error
//! - 3: Invalid configuration
//! - 4: Missing directory or file

use std::process::ExitCode;

use crate::config::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Exit {
    Ok = 0,
    Error = 1,
    /// Invalid configuration or arguments
    Config = 3,
    /// Required directory or file missing
    NotFound = 4,
}

impl From<Exit> for ExitCode {
    fn from(exit: Exit) -> Self {
        ExitCode::from(exit as u8)
    }
}

/// Maps an error to the appropriate exit code.
pub fn exit_code_for_error(err: &anyhow::Error) -> Exit {
    for cause in err.chain() {
        if let Some(config_err) = cause.downcast_ref::<ConfigError>() {
            return match config_err {
                ConfigError::Read { source, .. }
                    if source.kind() == std::io::ErrorKind::NotFound =>
                {
                    Exit::NotFound
                }
                _ => Exit::Config,
            };
        }
        if let Some(io_err) = cause.downcast_ref::<std::io::Error>() {
            if io_err.kind() == std::io::ErrorKind::NotFound {
                return Exit::NotFound;
            }
        }
    }
    Exit::Error
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_exit_code_values() {
        assert_eq!(Exit::Ok as u8, 0);
        assert_eq!(Exit::Error as u8, 1);
        assert_eq!(Exit::Config as u8, 3);
        assert_eq!(Exit::NotFound as u8, 4);
    }

    #[test]
    fn test_config_error_maps_to_code_3() {
        let err = anyhow::Error::new(ConfigError::TooManyChannels(9));
        assert_eq!(exit_code_for_error(&err), Exit::Config);
    }

    #[test]
    fn test_missing_directory_maps_to_code_4() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = Err::<(), _>(io).context("reading /nowhere").unwrap_err();
        assert_eq!(exit_code_for_error(&err), Exit::NotFound);
    }

    #[test]
    fn test_other_errors_map_to_code_1() {
        let err = anyhow::anyhow!("something else");
        assert_eq!(exit_code_for_error(&err), Exit::Error);
    }
}
