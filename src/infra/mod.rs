//! Backend access: transport, session, typed endpoints and the query cache.

pub mod api;
pub mod keys;
pub mod query;
pub mod session;
pub mod transport;
pub mod zones;

pub use api::ApiClient;
pub use keys::QueryKey;
pub use query::{
    Mutation, QueryClient, QueryConfig, QueryHandle, QueryOptions, QueryState, QueryStatus,
};
pub use session::{AuthUser, IdentityProvider, Session, StaticTokenProvider};
pub use transport::{ApiRequest, ApiResponse, HttpTransport, ReqwestTransport};
pub use zones::{ZoneDirectory, ZoneError};
