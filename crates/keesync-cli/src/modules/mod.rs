pub(crate) mod auth;
pub(crate) mod drive;
pub(crate) mod sync;
pub(crate) mod system;
