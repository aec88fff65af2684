pub mod base;
pub mod bus;

pub use base::{PipelineEvent, PipelineEventKind};
pub use bus::{EventBus, EventHandler};
