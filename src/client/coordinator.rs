/// Single-flight refresh coordinator.
///
/// When several in-flight requests discover an expired access token at the
/// same time, exactly one of them performs the refresh call. The first to
/// notice becomes the leader and flips the `refreshing` flag; everyone else
/// parks on a oneshot channel and is woken with the shared outcome. On
/// success each caller replays its own request exactly once; on failure the
/// coordinator tears the session state down and every waiter gets the same
/// error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;

use super::transport::{ApiRequest, ApiResponse, ClientError, Transport};

pub(crate) const ACCESS_TOKEN_EXPIRED: &str = "ACCESS_TOKEN_EXPIRED";

const REFRESH_PATH: &str = "/auth/refresh";
const LOGOUT_PATH: &str = "/auth/logout";

type FlightOutcome = Result<(), ClientError>;

struct Flight {
    refreshing: bool,
    waiters: Vec<oneshot::Sender<FlightOutcome>>,
}

enum FlightRole {
    Leader,
    Follower(oneshot::Receiver<FlightOutcome>),
}

pub struct RefreshCoordinator<T: Transport> {
    transport: Arc<T>,
    flight: Mutex<Flight>,
    session_active: AtomicBool,
}

impl<T: Transport> RefreshCoordinator<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            flight: Mutex::new(Flight {
                refreshing: false,
                waiters: Vec::new(),
            }),
            session_active: AtomicBool::new(true),
        }
    }

    /// True until a refresh attempt fails; callers use this to route the
    /// user back to login instead of issuing further requests.
    pub fn is_session_active(&self) -> bool {
        self.session_active.load(Ordering::SeqCst)
    }

    /// Re-arms the coordinator after a fresh login.
    pub fn mark_session_active(&self) {
        self.session_active.store(true, Ordering::SeqCst);
    }

    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        let response = self.transport.execute(&request).await?;

        if response.code.as_deref() != Some(ACCESS_TOKEN_EXPIRED) {
            return Ok(response);
        }
        // A replayed request never queues again, and the refresh/logout
        // calls themselves are exempt or we would recurse.
        if request.retried || request.path == REFRESH_PATH || request.path == LOGOUT_PATH {
            return Ok(response);
        }

        match self.join_flight() {
            FlightRole::Leader => {
                let outcome = self.refresh_once().await;
                self.settle_flight(&outcome);
                match outcome {
                    Ok(()) => self.transport.execute(&request.as_retried()).await,
                    Err(e) => Err(e),
                }
            }
            FlightRole::Follower(rx) => {
                let outcome = rx.await.map_err(|_| {
                    ClientError::RefreshFailed("refresh leader dropped".to_string())
                })?;
                match outcome {
                    Ok(()) => self.transport.execute(&request.as_retried()).await,
                    Err(e) => Err(e),
                }
            }
        }
    }

    fn join_flight(&self) -> FlightRole {
        let mut flight = match self.flight.lock() {
            Ok(flight) => flight,
            Err(poisoned) => poisoned.into_inner(),
        };
        if flight.refreshing {
            let (tx, rx) = oneshot::channel();
            flight.waiters.push(tx);
            FlightRole::Follower(rx)
        } else {
            flight.refreshing = true;
            FlightRole::Leader
        }
    }

    /// Leader-only: clear the flag and wake every parked caller with the
    /// shared outcome. A waiter whose receiver is gone is simply skipped.
    fn settle_flight(&self, outcome: &FlightOutcome) {
        if outcome.is_err() {
            self.session_active.store(false, Ordering::SeqCst);
        }
        let waiters = {
            let mut flight = match self.flight.lock() {
                Ok(flight) => flight,
                Err(poisoned) => poisoned.into_inner(),
            };
            flight.refreshing = false;
            std::mem::take(&mut flight.waiters)
        };
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
    }

    async fn refresh_once(&self) -> FlightOutcome {
        let refresh = ApiRequest::post(REFRESH_PATH);
        match self.transport.execute(&refresh).await {
            Ok(response) if response.is_success() => Ok(()),
            Ok(response) => Err(ClientError::RefreshFailed(
                response
                    .code
                    .unwrap_or_else(|| format!("status {}", response.status)),
            )),
            Err(e) => Err(ClientError::RefreshFailed(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Pretends every access token is expired on first sight. Replayed
    /// requests succeed. The refresh endpoint sleeps briefly so concurrent
    /// callers genuinely pile up behind the leader.
    struct FakeTransport {
        refresh_calls: AtomicUsize,
        refresh_outcome: RefreshOutcome,
    }

    enum RefreshOutcome {
        Ok,
        Rejected,
        NetworkError,
    }

    impl FakeTransport {
        fn new(refresh_outcome: RefreshOutcome) -> Self {
            Self {
                refresh_calls: AtomicUsize::new(0),
                refresh_outcome,
            }
        }

        fn refresh_count(&self) -> usize {
            self.refresh_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, ClientError> {
            if request.path == REFRESH_PATH {
                tokio::time::sleep(Duration::from_millis(20)).await;
                self.refresh_calls.fetch_add(1, Ordering::SeqCst);
                return match self.refresh_outcome {
                    RefreshOutcome::Ok => Ok(ApiResponse {
                        status: 200,
                        code: None,
                        body: json!({"message": "refreshed"}),
                    }),
                    RefreshOutcome::Rejected => Ok(ApiResponse {
                        status: 401,
                        code: Some("TOKEN_MISMATCH".to_string()),
                        body: json!({"code": "TOKEN_MISMATCH"}),
                    }),
                    RefreshOutcome::NetworkError => {
                        Err(ClientError::Network("connection refused".to_string()))
                    }
                };
            }
            if request.retried && request.path != "/api/always-expired" {
                Ok(ApiResponse {
                    status: 200,
                    code: None,
                    body: json!({"path": request.path}),
                })
            } else {
                Ok(ApiResponse {
                    status: 401,
                    code: Some(ACCESS_TOKEN_EXPIRED.to_string()),
                    body: json!({"code": ACCESS_TOKEN_EXPIRED}),
                })
            }
        }
    }

    /// A transport whose tokens never expire.
    struct HealthyTransport;

    #[async_trait]
    impl Transport for HealthyTransport {
        async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, ClientError> {
            Ok(ApiResponse {
                status: 200,
                code: None,
                body: json!({"path": request.path}),
            })
        }
    }

    #[tokio::test]
    async fn successful_responses_pass_through() {
        let coordinator = RefreshCoordinator::new(Arc::new(HealthyTransport));

        let response = coordinator
            .send(ApiRequest::get("/auth/me"))
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert!(coordinator.is_session_active());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_expiries_trigger_exactly_one_refresh() {
        let transport = Arc::new(FakeTransport::new(RefreshOutcome::Ok));
        let coordinator = Arc::new(RefreshCoordinator::new(transport.clone()));

        let mut handles = Vec::new();
        for i in 0..8 {
            let coordinator = coordinator.clone();
            handles.push(tokio::spawn(async move {
                coordinator
                    .send(ApiRequest::get(format!("/api/resource/{}", i)))
                    .await
            }));
        }

        for handle in handles {
            let response = handle.await.unwrap().unwrap();
            assert_eq!(response.status, 200);
        }
        assert_eq!(transport.refresh_count(), 1);
        assert!(coordinator.is_session_active());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn failed_refresh_fails_all_waiters_and_ends_session() {
        let transport = Arc::new(FakeTransport::new(RefreshOutcome::Rejected));
        let coordinator = Arc::new(RefreshCoordinator::new(transport.clone()));

        let mut handles = Vec::new();
        for i in 0..5 {
            let coordinator = coordinator.clone();
            handles.push(tokio::spawn(async move {
                coordinator
                    .send(ApiRequest::get(format!("/api/resource/{}", i)))
                    .await
            }));
        }

        for handle in handles {
            let result = handle.await.unwrap();
            assert!(matches!(result, Err(ClientError::RefreshFailed(_))));
        }
        assert_eq!(transport.refresh_count(), 1);
        assert!(!coordinator.is_session_active());
    }

    #[tokio::test]
    async fn network_failure_during_refresh_counts_as_failure() {
        let transport = Arc::new(FakeTransport::new(RefreshOutcome::NetworkError));
        let coordinator = RefreshCoordinator::new(transport.clone());

        let result = coordinator.send(ApiRequest::get("/auth/me")).await;

        assert!(matches!(result, Err(ClientError::RefreshFailed(_))));
        assert!(!coordinator.is_session_active());
        assert_eq!(transport.refresh_count(), 1);
    }

    #[tokio::test]
    async fn retried_requests_never_queue_again() {
        let transport = Arc::new(FakeTransport::new(RefreshOutcome::Ok));
        let coordinator = RefreshCoordinator::new(transport.clone());

        // A replay that still comes back expired is handed back as-is.
        let mut request = ApiRequest::get("/api/always-expired");
        request.retried = true;
        let response = coordinator.send(request).await.unwrap();

        assert_eq!(response.status, 401);
        assert_eq!(response.code.as_deref(), Some(ACCESS_TOKEN_EXPIRED));
        assert_eq!(transport.refresh_count(), 0);
    }

    #[tokio::test]
    async fn refresh_and_logout_paths_are_exempt() {
        let transport = Arc::new(FakeTransport::new(RefreshOutcome::Ok));
        let coordinator = RefreshCoordinator::new(transport.clone());

        let response = coordinator.send(ApiRequest::post(LOGOUT_PATH)).await.unwrap();

        // The expired answer is returned as-is instead of triggering
        // a recursive refresh.
        assert_eq!(response.status, 401);
        assert_eq!(transport.refresh_count(), 0);
    }

    #[tokio::test]
    async fn session_can_be_rearmed_after_login() {
        let transport = Arc::new(FakeTransport::new(RefreshOutcome::Rejected));
        let coordinator = RefreshCoordinator::new(transport.clone());

        let _ = coordinator.send(ApiRequest::get("/auth/me")).await;
        assert!(!coordinator.is_session_active());

        coordinator.mark_session_active();
        assert!(coordinator.is_session_active());
    }
}
