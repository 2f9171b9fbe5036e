mod json;
pub use json::{JsonLayer, SerializerLayer, SerializerService};
