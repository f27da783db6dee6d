//! Control command dispatch

use std::sync::Arc;

use serde_json::json;
use tracing::info;

use super::protocol::{ControlCommand, ControlResponse};
use crate::instance::Instance;

/// Execute one control command against the instance
#[must_use]
pub fn handle_command(instance: &Arc<Instance>, command: ControlCommand) -> ControlResponse {
    match command {
        ControlCommand::Ping => ControlResponse::with_data(json!({ "pong": true })),

        ControlCommand::Status => match serde_json::to_value(instance.status()) {
            Ok(data) => ControlResponse::with_data(data),
            Err(e) => ControlResponse::error(e.to_string()),
        },

        ControlCommand::GetStats => {
            let rings: Vec<_> = instance
                .ring_stats()
                .iter()
                .map(|s| s.snapshot())
                .collect();
            match serde_json::to_value(json!({ "rings": rings })) {
                Ok(data) => ControlResponse::with_data(data),
                Err(e) => ControlResponse::error(e.to_string()),
            }
        }

        ControlCommand::ApplyRules { rules } => match instance.apply_rules(rules) {
            Ok(version) => ControlResponse::with_data(json!({ "version": version })),
            Err(e) => ControlResponse::error(e.to_string()),
        },

        ControlCommand::Shutdown => {
            info!("Shutdown requested over control connection");
            instance.request_shutdown();
            ControlResponse::ok()
        }
    }
}
