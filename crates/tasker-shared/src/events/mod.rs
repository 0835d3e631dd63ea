pub mod model;
pub mod payload;

pub use model::{names, Event, EventUser};
pub use payload::EventPayload;
