//! Integration tests for Jobwatch job and download tracking

mod build_tracking;
mod model_downloads;
