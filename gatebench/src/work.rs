//! Simulated downstream calls.
//!
//! Stand-ins for network I/O: each call is a timed sleep, optionally failing.
//! A sleep is a suspension point, so under the lightweight strategy it frees its
//! carrier thread while a pooled worker stays blocked for the whole call.

use std::{future::Future, sync::Arc, time::Duration};

use futures::{future::BoxFuture, FutureExt};
use thiserror::Error;

use crate::{error::BoxError, scenario::WorkUnit};

/// Returned by a [`SimulatedService`] that is configured to fail.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{service} is unavailable")]
pub struct SimulatedFailure {
    pub service: String,
}

/// Future returned by the simulated scenario actions.
pub type SimulatedCall<T> = BoxFuture<'static, Result<T, BoxError>>;

/// Waits `latency` the way a remote call would.
pub fn simulate_call(latency: Duration) -> impl Future<Output = ()> + Send {
    tokio::time::sleep(latency)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimulatedService {
    pub name: String,
    pub latency: Duration,
    pub failing: bool,
}

impl SimulatedService {
    pub fn new(name: impl Into<String>, latency: Duration) -> Self {
        Self {
            name: name.into(),
            latency,
            failing: false,
        }
    }

    /// Makes every call fail after its latency has elapsed.
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub async fn call(&self, user: &str) -> Result<String, BoxError> {
        simulate_call(self.latency).await;
        if self.failing {
            return Err(SimulatedFailure {
                service: self.name.clone(),
            }
            .into());
        }
        Ok(format!("{}({user})", self.name))
    }
}

/// The four services a profile page fans out to.
pub fn profile_services() -> Vec<SimulatedService> {
    vec![
        SimulatedService::new("Profile", Duration::from_millis(200)),
        SimulatedService::new("Orders", Duration::from_millis(300)),
        SimulatedService::new("Recommendations", Duration::from_millis(250)),
        SimulatedService::new("Notifications", Duration::from_millis(150)),
    ]
}

/// Composes the parts of a profile page into one response body.
pub fn render_profile_response(parts: &[String]) -> String {
    format!("{{{}}}", parts.join(", "))
}

/// Action for a scenario where every unit is one call of `latency`.
///
/// With `fail_every = Some(n)`, requests whose index is a multiple of `n` fail
/// (only on their first sub-task when fanning out).
pub fn fixed_latency(
    latency: Duration,
    fail_every: Option<usize>,
) -> impl Fn(WorkUnit) -> SimulatedCall<()> + Clone + Send + Sync + 'static {
    move |unit: WorkUnit| {
        let fails = matches!(fail_every, Some(n) if n > 0 && unit.request % n == 0)
            && unit.part.unwrap_or_default() == 0;
        async move {
            simulate_call(latency).await;
            if fails {
                return Err(SimulatedFailure {
                    service: format!("request-{}", unit.request),
                }
                .into());
            }
            Ok(())
        }
        .boxed()
    }
}

/// Action calling `services[part]` for user `User{request}`. Units without a
/// part call the first service.
pub fn service_calls(
    services: Vec<SimulatedService>,
) -> impl Fn(WorkUnit) -> SimulatedCall<String> + Clone + Send + Sync + 'static {
    let services: Arc<[SimulatedService]> = services.into();
    move |unit: WorkUnit| {
        let services = Arc::clone(&services);
        async move {
            if services.is_empty() {
                return Err("no services configured".into());
            }
            let service = &services[unit.part.unwrap_or_default() % services.len()];
            service.call(&format!("User{}", unit.request)).await
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn service_call_formats_user() {
        let svc = SimulatedService::new("Orders", Duration::from_millis(300));
        assert_eq!(svc.call("User7").await.unwrap(), "Orders(User7)");
    }

    #[tokio::test(start_paused = true)]
    async fn failing_service_reports_its_name() {
        let svc = SimulatedService::new("Profile", Duration::from_millis(1)).failing();
        let err = svc.call("User0").await.unwrap_err();
        assert_eq!(err.to_string(), "Profile is unavailable");
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_latency_fails_every_nth_request() {
        let action = fixed_latency(Duration::from_millis(10), Some(3));
        let unit = |request, part| WorkUnit { request, part };

        assert!(action(unit(0, None)).await.is_err());
        assert!(action(unit(1, None)).await.is_ok());
        assert!(action(unit(3, Some(0))).await.is_err());
        assert!(action(unit(3, Some(1))).await.is_ok());

        let never = fixed_latency(Duration::ZERO, Some(0));
        assert!(never(unit(0, None)).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn service_calls_pick_service_by_part() {
        let action = service_calls(profile_services());
        let parts = [
            action(WorkUnit { request: 5, part: Some(0) }).await.unwrap(),
            action(WorkUnit { request: 5, part: Some(3) }).await.unwrap(),
        ];
        assert_eq!(
            render_profile_response(&parts),
            "{Profile(User5), Notifications(User5)}"
        );
    }
}
