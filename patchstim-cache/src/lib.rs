pub mod cache;

pub use cache::{Atom, Movie, load_image, load_movie};
