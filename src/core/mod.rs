// Card domain model, document shape handling, and error modeling.
pub mod card;
pub mod endpoint;
pub mod error;
pub mod shape;
