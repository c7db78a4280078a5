pub mod characters;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod extract;
pub mod pipeline;
pub mod response;
pub mod router;
pub mod time_state;
pub mod transport;
