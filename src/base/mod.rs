pub mod entity;
pub mod field_path;
pub mod tree;
