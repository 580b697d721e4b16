use std::sync::Arc;

use surge_core::{IterationContext, RunControl};
use surge_http::HttpClient;

use crate::cli::RunArgs;
use crate::exit_codes::ExitCode;
use crate::output;
use crate::profile::{ProfileOverrides, load_profile};
use crate::run_error::RunError;
use crate::scenario::EndpointScenario;

pub async fn run(args: RunArgs) -> Result<ExitCode, RunError> {
    let out = output::formatter(args.output);

    let overrides = ProfileOverrides {
        base_url: args.base_url.clone(),
        poll_interval: args.poll_interval,
    };
    let loaded = load_profile(&args.profile, &overrides)
        .await
        .map_err(RunError::InvalidInput)?;

    out.print_header(&args.profile, &loaded.run);

    let mut control = RunControl::new();
    if let Some(progress) = out.progress() {
        control = control.with_progress(progress);
    }

    let interrupt = {
        let control = control.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, stopping run");
                control.abort("interrupted");
            }
        })
    };

    let scenario = Arc::new(EndpointScenario::new(
        HttpClient::default(),
        loaded.scenario,
    ));
    let result = surge_core::run(
        &loaded.run,
        move |ctx: IterationContext| {
            let scenario = scenario.clone();
            async move { scenario.iterate(ctx).await }
        },
        control,
    )
    .await;
    interrupt.abort();

    let result = result
        .map_err(|e| RunError::RuntimeError(anyhow::Error::new(e).context("run failed")))?;

    out.print_summary(&result, loaded.run.assessment())
        .map_err(RunError::RuntimeError)?;

    Ok(ExitCode::from_verdict(result.passed))
}
