pub mod errors;
pub mod history_service;
pub mod match_driver;
pub mod match_session_service;
pub mod matchmaking_service;
pub mod profile_service;
pub mod score_service;
pub mod settlement_service;
