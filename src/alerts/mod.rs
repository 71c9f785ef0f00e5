pub mod notifier;
pub mod publisher;

pub use notifier::Notifier;
pub use publisher::{AlertPolicy, AlertPublisher};
