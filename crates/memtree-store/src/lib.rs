pub mod error;
pub mod presign;
pub mod schema;
pub mod settings;
pub mod store;

pub use error::{Result, StoreError};
pub use presign::LocalPresigner;
pub use settings::{DATA_DIR_ENV, DB_FILE, Settings, default_base_dir};
pub use store::Store;
