//! HTTP middleware for outbound collaborator calls.

use std::time::{Duration, Instant};

use http::Extensions;
use reqwest::{Request, Response};
use reqwest_middleware::{Middleware, Next};
use tracing::{debug, trace, warn};

use crate::utils::fmt_duration;

const SLOW_RESPONSE_THRESHOLD: Duration = Duration::from_secs(2);

pub struct TracingMiddleware;

#[async_trait::async_trait]
impl Middleware for TracingMiddleware {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        let method = req.method().to_string();
        let path = req.url().path().to_string();
        trace!(method, path, "Starting request");

        let start = Instant::now();
        let response_result = next.run(req, extensions).await;
        let duration = start.elapsed();

        match response_result {
            Ok(response) => {
                let status = response.status().as_u16();
                if duration > SLOW_RESPONSE_THRESHOLD {
                    warn!(
                        method,
                        path,
                        status,
                        duration = fmt_duration(duration),
                        "Slow response"
                    );
                } else if response.status().is_success() {
                    debug!(method, path, status, duration = fmt_duration(duration), "Request completed");
                } else {
                    warn!(method, path, status, duration = fmt_duration(duration), "Request failed");
                }
                Ok(response)
            }
            Err(error) => {
                warn!(
                    method,
                    path,
                    error = ?error,
                    duration = fmt_duration(duration),
                    "Request errored"
                );
                Err(error)
            }
        }
    }
}
