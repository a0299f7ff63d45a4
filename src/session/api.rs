//! Request and response shapes for presentation-layer collaborators
//!
//! Errors never cross this boundary: every handler answers with
//! `success: false` and the error text instead.

use super::controller::SessionController;
use crate::config::UploadOverrides;
use serde::{Deserialize, Serialize};

/// Body of a start request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartRequest {
    pub label: String,
    pub sql_enabled: Option<bool>,
    pub sql_host: Option<String>,
    pub sql_port: Option<u16>,
    pub sql_user: Option<String>,
    pub sql_password: Option<String>,
    pub sql_database: Option<String>,
}

impl StartRequest {
    /// Upload settings carried by the request
    pub fn overrides(&self) -> UploadOverrides {
        UploadOverrides {
            enabled: self.sql_enabled,
            host: self.sql_host.clone(),
            port: self.sql_port,
            user: self.sql_user.clone(),
            password: self.sql_password.clone(),
            database: self.sql_database.clone(),
        }
    }
}

/// Generic outcome of a command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
}

impl ApiResponse {
    fn from_result(result: crate::error::Result<String>) -> Self {
        match result {
            Ok(message) => Self {
                success: true,
                message,
            },
            Err(e) => Self {
                success: false,
                message: e.to_string(),
            },
        }
    }
}

/// Answer to a status poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub success: bool,
    pub is_collecting: bool,
    pub counter: u64,
}

/// Answer to a live-data poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataResponse {
    pub success: bool,
    pub data: Vec<f64>,
    pub counter: u64,
}

/// Start a session
pub fn start(controller: &mut SessionController, request: &StartRequest) -> ApiResponse {
    ApiResponse::from_result(controller.start_session(&request.label, &request.overrides()))
}

/// Stop the running session
pub fn stop(controller: &mut SessionController) -> ApiResponse {
    ApiResponse::from_result(controller.stop_session())
}

/// Whether a session is collecting, with its batch counter
pub fn status(controller: &SessionController) -> StatusResponse {
    let state = controller.status();
    StatusResponse {
        success: true,
        is_collecting: state.is_collecting,
        counter: state.batch_counter,
    }
}

/// Freshest samples
pub fn data(controller: &SessionController) -> DataResponse {
    let latest = controller.latest_samples();
    DataResponse {
        success: true,
        data: latest.data,
        counter: latest.counter,
    }
}
