pub mod certification;
pub mod events;
pub mod models;
pub mod request;
