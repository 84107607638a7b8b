pub mod history_service_errors;
pub mod match_driver_errors;
pub mod match_session_service_errors;
pub mod matchmaking_service_errors;
pub mod profile_service_errors;
pub mod settlement_service_errors;
