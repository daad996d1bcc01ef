pub mod error;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;
pub mod store;

pub use error::{AvailabilityError, ConversionError, FieldError};
pub use models::*;
pub use router::{availability_routes, AppState};
pub use services::*;
