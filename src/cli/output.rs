//! CLI output: error mapping from domain errors to stable CLI surface.

use crate::error::ApiError;

/// Map domain/service errors to a string for CLI output, with a hint where one helps.
pub fn map_error(e: &ApiError) -> String {
    match e {
        ApiError::UnknownModel(_) => {
            format!("{}\n\nRun 'jobwatch models' to list known models.", e)
        }
        ApiError::TransportError(_) | ApiError::Timeout(_) => {
            format!("{}\n\nIs the backend running? Check backend.base_url.", e)
        }
        _ => e.to_string(),
    }
}
