use tracing::{debug, error, info, warn};

/// Logs a conversation transition with consistent format
pub fn log_flow_step(flow: &str, step: &str, user_id: i64, details: Option<&str>) {
    match details {
        Some(d) => info!("FLOW: {} -> {} for user {} - {}", flow, step, user_id, d),
        None => info!("FLOW: {} -> {} for user {}", flow, step, user_id),
    }
}

/// Logs inbound commands with consistent format
pub fn log_command_start(command: &str, user: &str, user_id: i64, chat_id: i64) {
    info!(
        "CMD_START: {} by {}({}) in chat {}",
        command, user, user_id, chat_id
    );
}

/// Logs input that was rejected and reprompted
pub fn log_validation_error(flow: &str, field: &str, error: &str, user_id: i64) {
    warn!(
        "VALIDATION_ERROR: {} - field '{}' invalid: {} - user {}",
        flow, field, error, user_id
    );
}

/// Logs database operations with consistent format
pub fn log_database_operation(operation: &str, table: &str, details: Option<&str>) {
    match details {
        Some(d) => debug!("DB_OP: {} on {} - {}", operation, table, d),
        None => debug!("DB_OP: {} on {}", operation, table),
    }
}

/// Logs database errors with consistent format
pub fn log_database_error(operation: &str, error: &str, user_id: i64) {
    error!("DB_ERROR: {} failed for user {}: {}", operation, user_id, error);
}

/// Logs a message that could not be delivered
pub fn log_delivery_failure(recipient: i64, purpose: &str, error: &str) {
    warn!("DELIVERY_FAILED: {} to {} - {}", purpose, recipient, error);
}

/// Logs an action denied to a non-admin; expected traffic, not an error
pub fn log_access_denied(action: &str, user_id: i64) {
    debug!("ACCESS_DENIED: {} by user {}", action, user_id);
}

/// Logs system events with consistent format
pub fn log_system_event(event: &str, details: Option<&str>) {
    match details {
        Some(d) => info!("SYSTEM: {} - {}", event, d),
        None => info!("SYSTEM: {}", event),
    }
}
