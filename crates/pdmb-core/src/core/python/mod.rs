pub(crate) mod literal;
pub mod python_sys;
