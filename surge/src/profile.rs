use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use serde::Deserialize;
use surge_core::{Assessment, MetricKind, RunProfile, Stage, ThinkTime, TierRule};

use surge_http::{HeaderMap, HeaderName, HeaderValue};

use crate::scenario::{Endpoint, EndpointScenarioConfig, check_metric_name};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct ProfileYaml {
    #[serde(default)]
    pub base_url: Option<String>,

    pub stages: Vec<StageYaml>,

    #[serde(default)]
    pub thresholds: BTreeMap<String, ThresholdsYaml>,

    /// Custom metric declarations: name -> counter | gauge | rate | trend.
    #[serde(default)]
    pub metrics: BTreeMap<String, String>,

    #[serde(default)]
    pub think_time: Option<ThinkTimeYaml>,

    #[serde(default)]
    pub request_timeout: Option<YamlDuration>,

    #[serde(default)]
    pub poll_interval: Option<YamlDuration>,

    /// Request headers sent to every endpoint.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    #[serde(default)]
    pub endpoints: Vec<EndpointYaml>,

    #[serde(default)]
    pub error_metric: Option<String>,

    #[serde(default)]
    pub counter_metric: Option<String>,

    #[serde(default)]
    pub assessment: Option<AssessmentYaml>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct StageYaml {
    pub duration: YamlDuration,
    pub target: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum ThresholdsYaml {
    One(ThresholdEntryYaml),
    Many(Vec<ThresholdEntryYaml>),
}

impl ThresholdsYaml {
    fn into_entries(self) -> Vec<ThresholdEntryYaml> {
        match self {
            Self::One(e) => vec![e],
            Self::Many(v) => v,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum ThresholdEntryYaml {
    Expr(String),
    Detailed {
        threshold: String,
        #[serde(default, rename = "abortOnFail")]
        abort_on_fail: bool,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum ThinkTimeYaml {
    Fixed(YamlDuration),
    Range { min: YamlDuration, max: YamlDuration },
}

impl From<ThinkTimeYaml> for ThinkTime {
    fn from(value: ThinkTimeYaml) -> Self {
        match value {
            ThinkTimeYaml::Fixed(d) => ThinkTime::fixed(d.into_inner()),
            ThinkTimeYaml::Range { min, max } => ThinkTime {
                min: min.into_inner(),
                max: max.into_inner(),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct EndpointYaml {
    pub name: String,
    pub path: String,

    #[serde(default)]
    pub probability: Option<f64>,

    #[serde(default)]
    pub expect_status: Option<u16>,

    #[serde(default)]
    pub max_duration: Option<YamlDuration>,

    #[serde(default)]
    pub pause: Option<YamlDuration>,

    /// Overrides profile-level headers with the same name.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct AssessmentYaml {
    #[serde(default)]
    pub tiers: Vec<TierYaml>,

    #[serde(default)]
    pub fallback: Option<String>,

    #[serde(default)]
    pub error_metric: Option<String>,

    #[serde(default)]
    pub latency_metric: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct TierYaml {
    pub label: String,
    pub max_error_rate: f64,
    pub max_avg_latency_ms: f64,
}

impl From<AssessmentYaml> for Assessment {
    fn from(value: AssessmentYaml) -> Self {
        let mut out = Assessment::default();
        if !value.tiers.is_empty() {
            out.rules = value
                .tiers
                .into_iter()
                .map(|t| TierRule::new(t.label, t.max_error_rate, t.max_avg_latency_ms))
                .collect();
        }
        if let Some(fallback) = value.fallback {
            out.fallback = fallback;
        }
        if let Some(m) = value.error_metric {
            out.error_metric = m;
        }
        if let Some(m) = value.latency_metric {
            out.latency_metric = m;
        }
        out
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct YamlDuration(Duration);

impl YamlDuration {
    fn into_inner(self) -> Duration {
        self.0
    }
}

impl<'de> Deserialize<'de> for YamlDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = YamlDuration;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("duration as string (e.g. 10s), integer seconds, or float seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(YamlDuration(Duration::from_secs(v)))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                u64::try_from(v)
                    .map(|v| YamlDuration(Duration::from_secs(v)))
                    .map_err(|_| E::custom("duration cannot be negative"))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if !v.is_finite() || v < 0.0 {
                    return Err(E::custom("duration must be a non-negative, finite number"));
                }
                Ok(YamlDuration(Duration::from_secs_f64(v)))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let d = humantime::parse_duration(v.trim()).map_err(E::custom)?;
                Ok(YamlDuration(d))
            }
        }

        deserializer.deserialize_any(V)
    }
}

/// A parsed profile, split into the engine's input and the scenario body.
#[derive(Debug)]
pub(crate) struct LoadedProfile {
    pub run: RunProfile,
    pub scenario: EndpointScenarioConfig,
}

/// Overrides applied on top of the profile document.
#[derive(Debug, Clone, Default)]
pub(crate) struct ProfileOverrides {
    pub base_url: Option<String>,
    pub poll_interval: Option<Duration>,
}

pub(crate) async fn load_profile(
    path: &Path,
    overrides: &ProfileOverrides,
) -> anyhow::Result<LoadedProfile> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read profile: {}", path.display()))?;

    let doc: ProfileYaml = serde_yaml::from_slice(&bytes)
        .with_context(|| format!("failed to parse profile YAML: {}", path.display()))?;

    resolve(doc, overrides).with_context(|| format!("invalid profile: {}", path.display()))
}

pub(crate) fn resolve(
    doc: ProfileYaml,
    overrides: &ProfileOverrides,
) -> anyhow::Result<LoadedProfile> {
    let ProfileYaml {
        base_url,
        stages,
        thresholds,
        metrics,
        think_time,
        request_timeout,
        poll_interval,
        headers,
        endpoints,
        error_metric,
        counter_metric,
        assessment,
    } = doc;

    let base_url = overrides
        .base_url
        .clone()
        .or(base_url)
        .context("no base URL (set `baseUrl`, BASE_URL or --base-url)")?;
    let base_url = base_url.trim_end_matches('/').to_string();

    if endpoints.is_empty() {
        anyhow::bail!("profile defines no endpoints");
    }

    let mut builder = RunProfile::builder().base_url(base_url).stages(
        stages
            .into_iter()
            .map(|s| Stage {
                duration: s.duration.into_inner(),
                target: s.target,
            }),
    );

    for (name, kind) in metrics {
        let kind: MetricKind = kind
            .parse()
            .map_err(|_| anyhow::anyhow!("metric `{name}`: unknown kind `{kind}`"))?;
        builder = builder.metric(name, kind);
    }
    if let Some(name) = &error_metric {
        builder = builder.metric(name.clone(), MetricKind::Rate);
    }
    if let Some(name) = &counter_metric {
        builder = builder.metric(name.clone(), MetricKind::Counter);
    }

    for (metric, entries) in thresholds {
        for entry in entries.into_entries() {
            builder = match entry {
                ThresholdEntryYaml::Expr(expr) => builder.threshold(metric.clone(), expr),
                ThresholdEntryYaml::Detailed {
                    threshold,
                    abort_on_fail: true,
                } => builder.abort_on_fail_threshold(metric.clone(), threshold),
                ThresholdEntryYaml::Detailed { threshold, .. } => {
                    builder.threshold(metric.clone(), threshold)
                }
            };
        }
    }

    if let Some(tt) = think_time {
        builder = builder.think_time(tt.into());
    }
    if let Some(interval) = overrides
        .poll_interval
        .or(poll_interval.map(YamlDuration::into_inner))
    {
        builder = builder.poll_interval(interval);
    }
    if let Some(a) = assessment {
        builder = builder.assessment(a.into());
    }

    let endpoints = endpoints
        .into_iter()
        .map(|e| endpoint_from_yaml(e, &headers))
        .collect::<anyhow::Result<Vec<_>>>()?;
    for ep in &endpoints {
        if let Some(name) = &ep.check_metric {
            builder = builder.metric(name.clone(), MetricKind::Rate);
        }
    }

    let run = builder.build()?;

    Ok(LoadedProfile {
        run,
        scenario: EndpointScenarioConfig {
            endpoints,
            request_timeout: request_timeout.map(YamlDuration::into_inner),
            error_metric,
            counter_metric,
        },
    })
}

fn endpoint_from_yaml(
    e: EndpointYaml,
    shared_headers: &BTreeMap<String, String>,
) -> anyhow::Result<Endpoint> {
    let probability = e.probability.unwrap_or(1.0);
    if !(0.0..=1.0).contains(&probability) {
        anyhow::bail!(
            "endpoint `{}`: probability must be within [0, 1] (got {probability})",
            e.name
        );
    }
    let path = if e.path.starts_with('/') {
        e.path
    } else {
        format!("/{}", e.path)
    };

    let mut headers = HeaderMap::new();
    for (name, value) in shared_headers.iter().chain(&e.headers) {
        let name: HeaderName = name
            .parse()
            .with_context(|| format!("endpoint `{}`: invalid header name `{name}`", e.name))?;
        let value: HeaderValue = value
            .parse()
            .with_context(|| format!("endpoint `{}`: invalid value for header `{name}`", e.name))?;
        headers.insert(name, value);
    }

    Ok(Endpoint {
        check_metric: Some(check_metric_name(&e.name)),
        name: e.name,
        path,
        probability,
        expect_status: e.expect_status,
        max_duration: e.max_duration.map(YamlDuration::into_inner),
        pause: e.pause.map(YamlDuration::into_inner),
        headers,
    })
}
