pub mod history;
pub mod thumbnails;
pub mod tools;
