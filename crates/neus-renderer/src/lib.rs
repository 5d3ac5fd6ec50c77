pub mod alpha;
pub mod background;
pub mod bounds;
pub mod composite;
pub mod context;
pub mod image;
pub mod object;
pub mod output;
pub mod renderer;
pub mod sampler;
pub mod supersample;

pub use context::RenderContext;
pub use output::{BackgroundOutput, ImageOutput, ObjectOutput, RayOutput};
pub use renderer::{NeusRenderer, SceneFields};
