use std::time::Duration;

use rand::Rng as _;
use surge_core::{IterationContext, IterationOutcome, metric_names};
use surge_http::{HeaderMap, HttpClient, HttpRequest, HttpResponse};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Endpoint {
    pub name: String,
    /// Absolute path, joined onto the base URL.
    pub path: String,
    /// Chance of being requested in a given iteration, in `[0, 1]`.
    pub probability: f64,
    pub expect_status: Option<u16>,
    pub max_duration: Option<Duration>,
    pub pause: Option<Duration>,
    pub headers: HeaderMap,
    /// Rate metric holding this endpoint's own check results.
    pub check_metric: Option<String>,
}

/// Name of the per-endpoint checks metric, e.g. `checks.Homepage`.
pub(crate) fn check_metric_name(endpoint: &str) -> String {
    format!("{}.{endpoint}", metric_names::CHECKS)
}

#[derive(Debug, Clone, Default)]
pub(crate) struct EndpointScenarioConfig {
    pub endpoints: Vec<Endpoint>,
    pub request_timeout: Option<Duration>,
    /// Custom rate metric: true when a request failed any of its checks.
    pub error_metric: Option<String>,
    /// Custom counter bumped once per request.
    pub counter_metric: Option<String>,
}

/// Walks the endpoint list once per iteration, recording the HTTP metrics.
pub(crate) struct EndpointScenario {
    client: HttpClient,
    config: EndpointScenarioConfig,
}

impl EndpointScenario {
    pub(crate) fn new(client: HttpClient, config: EndpointScenarioConfig) -> Self {
        Self { client, config }
    }

    pub(crate) async fn iterate(&self, ctx: IterationContext) -> anyhow::Result<IterationOutcome> {
        for ep in &self.config.endpoints {
            if !roll(ep.probability) {
                continue;
            }

            let url = format!("{}{}", ctx.base_url(), ep.path);
            let req = HttpRequest::get(url)
                .with_timeout(self.config.request_timeout)
                .with_headers(ep.headers.clone());

            let ok = match self.client.request(req).await {
                Ok(res) => self.record_response(&ctx, ep, &res)?,
                Err(err) => {
                    tracing::debug!(
                        vu = ctx.vu_id(),
                        endpoint = %ep.name,
                        kind = %err.transport_error_kind(),
                        error = %err,
                        "request failed"
                    );
                    ctx.add(metric_names::HTTP_REQS, 1)?;
                    ctx.record(metric_names::HTTP_REQ_FAILED, true)?;
                    record_check(&ctx, ep, false)?;
                    false
                }
            };

            if let Some(name) = &self.config.error_metric {
                ctx.record(name, !ok)?;
            }
            if let Some(name) = &self.config.counter_metric {
                ctx.add(name, 1)?;
            }

            if let Some(pause) = ep.pause {
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = ctx.cancelled() => break,
                }
            }
        }

        Ok(IterationOutcome::done())
    }

    /// Records one response; returns whether all of its checks passed.
    fn record_response(
        &self,
        ctx: &IterationContext,
        ep: &Endpoint,
        res: &HttpResponse,
    ) -> anyhow::Result<bool> {
        ctx.add(metric_names::HTTP_REQS, 1)?;
        ctx.record(metric_names::HTTP_REQ_DURATION, res.duration)?;
        ctx.record(metric_names::HTTP_REQ_FAILED, res.is_error_status())?;

        let mut all = true;
        for passed in check_response(ep, res.status, res.duration) {
            record_check(ctx, ep, passed)?;
            all &= passed;
        }
        Ok(all)
    }
}

fn record_check(ctx: &IterationContext, ep: &Endpoint, passed: bool) -> anyhow::Result<()> {
    ctx.record(metric_names::CHECKS, passed)?;
    if let Some(name) = &ep.check_metric {
        ctx.record(name, passed)?;
    }
    Ok(())
}

fn roll(probability: f64) -> bool {
    probability >= 1.0 || rand::rng().random_bool(probability.clamp(0.0, 1.0))
}

/// Status check, then the duration check when the endpoint sets one.
fn check_response(ep: &Endpoint, status: u16, duration: Duration) -> Vec<bool> {
    let status_ok = match ep.expect_status {
        Some(expected) => status == expected,
        None => status < 500,
    };

    let mut out = vec![status_ok];
    if let Some(max) = ep.max_duration {
        out.push(duration < max);
    }
    out
}
