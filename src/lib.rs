pub mod analytics;
pub mod api;
pub mod config;
pub mod data;
pub mod database;
pub mod error;
pub mod lifecycle;
pub mod model;
pub mod relations;
pub mod schema;
pub mod validation;
pub mod value;

pub use database::{Correction, Database, Profile, Record};
pub use error::{ReferentialIntegrityError, SchemaError, StaleWriteError, ValidationError, WriteError};
pub use lifecycle::{Clock, ManualClock, SweepReport, Sweeper, SystemClock};
pub use schema::SchemaRegistry;
pub use relations::RelationshipGraph;
pub use validation::Validator;
