//! Per-IP rate limiting for `/api`, backed by `tower_governor`.
//!
//! A budget of `rate_limit_max` requests per `rate_limit_window_secs` maps to a
//! GCRA quota with a burst of `max` and one request replenished every
//! `window / max`. Rejections reuse [`ToolifyError::RateLimited`] so the body
//! is the usual JSON error with a `Retry-After` header; the governor's
//! `x-ratelimit-*` headers are passed through.

use crate::config::ServerConfig;
use crate::error::ToolifyError;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, Response};
use axum::response::IntoResponse;
use axum::Router;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::key_extractor::KeyExtractor;
use tower_governor::{GovernorError, GovernorLayer};
use tracing::{debug, info};

/// Keys requests by the socket peer address.
///
/// Forwarding headers are not trusted. Without connect info (in-process
/// tests) every request shares the unspecified address.
#[derive(Debug, Clone, Copy)]
pub struct PeerIp;

impl KeyExtractor for PeerIp {
    type Key = IpAddr;

    fn extract<T>(&self, req: &Request<T>) -> Result<Self::Key, GovernorError> {
        Ok(peer_ip(req))
    }
}

fn peer_ip<T>(req: &Request<T>) -> IpAddr {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

/// Replenish interval for a budget of `max` requests per `window_secs`.
///
/// `None` when limiting is disabled.
pub fn replenish_period(max: u32, window_secs: u64) -> Option<Duration> {
    if max == 0 || window_secs == 0 {
        return None;
    }
    let period = Duration::from_secs(window_secs) / max;
    Some(period.max(Duration::from_millis(1)))
}

fn reject(error: GovernorError) -> Response<Body> {
    match error {
        GovernorError::TooManyRequests { wait_time, headers } => {
            let mut response = ToolifyError::RateLimited {
                retry_after_secs: wait_time.max(1),
            }
            .into_response();
            if let Some(headers) = headers {
                for (name, value) in headers.iter() {
                    if !response.headers().contains_key(name) {
                        response.headers_mut().insert(name.clone(), value.clone());
                    }
                }
            }
            response
        }
        other => ToolifyError::Internal(format!("rate limiter: {other:?}")).into_response(),
    }
}

/// Wrap `router` in the limiter, or return it unchanged when limiting is off.
pub fn apply<S>(router: Router<S>, config: &ServerConfig) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    let max = config.rate_limit_max;
    let Some(period) = replenish_period(max, config.rate_limit_window_secs) else {
        info!("Rate limiting disabled");
        return router;
    };
    let Some(governor) = GovernorConfigBuilder::default()
        .key_extractor(PeerIp)
        .use_headers()
        .period(period)
        .burst_size(max)
        .error_handler(reject)
        .finish()
    else {
        info!("Rate limiting disabled: quota of {} per {:?} rejected", max, period);
        return router;
    };
    let governor = Arc::new(governor);
    let limiter = Arc::downgrade(governor.limiter());
    spawn_cleanup(Duration::from_secs(config.rate_limit_window_secs), move || {
        match limiter.upgrade() {
            Some(limiter) => {
                limiter.retain_recent();
                true
            }
            None => false,
        }
    });
    info!(
        "Rate limiting /api to {} requests per {}s per client",
        max, config.rate_limit_window_secs
    );
    router.layer(GovernorLayer { config: governor })
}

/// Periodically drop idle clients so the key store stays bounded.
///
/// `sweep` returns `false` once the limiter is gone, which ends the task.
fn spawn_cleanup<F>(every: Duration, mut sweep: F)
where
    F: FnMut() -> bool + Send + 'static,
{
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        debug!("No Tokio runtime; rate-limiter cleanup not scheduled");
        return;
    };
    runtime.spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if !sweep() {
                break;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_spreads_budget_over_window() {
        assert_eq!(replenish_period(100, 900), Some(Duration::from_secs(9)));
        assert_eq!(replenish_period(2, 60), Some(Duration::from_secs(30)));
        assert_eq!(replenish_period(1000, 0), None);
        assert_eq!(replenish_period(0, 60), None);
        assert_eq!(replenish_period(u32::MAX, 1), Some(Duration::from_millis(1)));
    }

    #[test]
    fn peer_ip_defaults_without_connect_info() {
        let req = Request::new(());
        assert_eq!(peer_ip(&req), IpAddr::V4(Ipv4Addr::UNSPECIFIED));

        let mut req = Request::new(());
        let addr: SocketAddr = "10.0.0.7:4000".parse().unwrap();
        req.extensions_mut().insert(ConnectInfo(addr));
        assert_eq!(peer_ip(&req), addr.ip());
    }
}
