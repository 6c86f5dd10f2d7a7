pub mod caller;
pub mod health_handlers;
pub mod matter_handlers;
pub mod share_handlers;
