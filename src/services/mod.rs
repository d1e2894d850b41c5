pub mod batch_loader; // Bulk row ingestion
pub mod converter; // Native cells -> portable values, one converter per engine
pub mod database; // Engine drivers and the connection factory
pub mod parameters;
pub mod polling_trigger;
pub mod render;
pub mod statement_runner;

pub use batch_loader::*;
pub use polling_trigger::*;
pub use render::*;
pub use statement_runner::*;
