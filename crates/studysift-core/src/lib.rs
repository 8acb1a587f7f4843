pub mod api;
pub mod config;
pub mod error;
pub mod export;
pub mod ical;
pub mod model;
pub mod pipeline;
pub mod session;
pub mod subject;
pub mod upload;
