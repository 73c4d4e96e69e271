pub mod certification;
pub mod errors;
pub mod org_filter;
pub mod requests;
pub mod rules;
pub mod workflow;
