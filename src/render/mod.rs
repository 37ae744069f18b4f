pub mod indices;
