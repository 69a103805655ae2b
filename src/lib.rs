pub mod broute;
pub mod config;
pub mod echonetlite;
pub mod hex;
pub mod scheduler;
pub mod sensor;
pub mod skstack;

pub use broute::{BRoute, BRouteConfig, Status};
pub use config::Settings;
