pub mod location;
pub mod movie;
pub mod refresh_history;
