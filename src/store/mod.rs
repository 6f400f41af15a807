pub mod index;
pub mod remote;
