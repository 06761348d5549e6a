pub(crate) mod archive;
pub mod artifacts;
pub mod builder;
pub mod editable;
pub(crate) mod licenses;
pub(crate) mod sdist;
pub(crate) mod wheel;
