pub mod cache;
pub mod db;
pub mod photos;

pub use cache::FileTripCache;
pub use db::DbAdapter;
pub use photos::{FsPhotoStore, PhotoStaging};
