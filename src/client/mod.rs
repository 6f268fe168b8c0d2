//! Client Module
//!
//! Transport seam, HTTP transport and request credentials.

pub mod credentials;
pub mod http;
pub mod transport;

pub use credentials::{BearerCredentials, CredentialProvider, StaticHeaders};
pub use http::HttpTransport;
pub use transport::{FragmentStream, Transport, TransportRequest, TransportResponse};
