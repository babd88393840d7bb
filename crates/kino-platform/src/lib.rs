mod paths;
mod storage;

pub use paths::{AppPaths, AppPathsError};
pub use storage::{STAGING_SPACE_MARGIN_BYTES, select_staging_dir};
