pub mod extract;
pub mod vision;

pub use extract::extract_listing;
pub use vision::{VisionClient, VisionConfig, VisionModel};
