pub mod event;
pub mod profile;
pub mod registration;

pub use event::{Event, NewEvent};
pub use profile::Role;
pub use registration::Registration;
