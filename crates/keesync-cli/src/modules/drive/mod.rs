pub(crate) mod http;
pub(crate) mod oauth;
pub(crate) mod types;

pub(crate) use http::DriveStorage;
pub(crate) use oauth::ensure_access_token;
