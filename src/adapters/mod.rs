// Adapters layer: REST clients for the Azure services a migration talks to.

pub mod blob;
pub mod http;
pub mod provision;
pub mod search;
pub mod secrets;
pub mod table;
