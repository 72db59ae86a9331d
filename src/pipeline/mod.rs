pub mod camera_pipeline;
pub mod preview;
pub mod transform;

pub use camera_pipeline::CameraPipeline;
pub use preview::PreviewSink;
pub use transform::{apply_transform, TransformOptions};
