pub mod api_key;
pub mod auth;
pub mod blocklist;
pub mod conf;
pub mod data;
pub mod docs;
pub mod logging;
pub mod rbac;
pub mod scope;
pub mod server;
pub mod types;
pub mod usage;
