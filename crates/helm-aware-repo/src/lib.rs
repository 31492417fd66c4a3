pub mod helm_cli;
pub mod http_index;

pub use helm_cli::{DEFAULT_OCI_TIMEOUT, HelmCliSearch};
pub use http_index::{DEFAULT_HTTP_TIMEOUT, HttpIndexClient};
