pub mod index;
pub mod vector;
