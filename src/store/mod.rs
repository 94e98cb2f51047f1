//! Concurrent in-memory stores and the on-disk image sink.

pub mod image;
pub mod laptop;
pub mod rating;
pub mod user;

pub use image::{DiskImageStore, ImageInfo, ImageStore};
pub use laptop::{is_qualified, LaptopStore};
pub use rating::{Rating, RatingStore};
pub use user::{User, UserStore};
