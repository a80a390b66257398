/// API Client module
///
/// Caller-side counterpart to the auth server: a transport abstraction plus
/// the single-flight refresh coordinator that guarantees at most one refresh
/// call no matter how many concurrent requests discover an expired access
/// token.

mod coordinator;
mod transport;

pub use coordinator::RefreshCoordinator;
pub use transport::ApiRequest;
pub use transport::ApiResponse;
pub use transport::ClientError;
pub use transport::HttpMethod;
pub use transport::HttpTransport;
pub use transport::Transport;
