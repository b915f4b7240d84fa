//! Record structures and the requests used to create and update them.

pub mod media;
