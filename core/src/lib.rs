pub mod descriptor;
pub mod error;
pub mod keypoint;
pub mod point_cloud;
pub mod runtime;

pub use descriptor::*;
pub use error::{Error, Result};
pub use keypoint::*;
pub use point_cloud::PointCloud;
pub use runtime::{current_cpu_threads, init_global_thread_pool};
