use fleiss::jobs::{boxed, HandlerOptions, HandlerRegistry};
use fleiss::JobError;
use serde::Deserialize;
use std::{sync::Arc, time::Duration};

#[derive(Deserialize)]
struct EmailSendPayload {
    user_id: i64,
    template: Option<String>,
}

pub fn build_registry() -> Arc<HandlerRegistry> {
    let mut registry = HandlerRegistry::new();

    // Demo handlers. Replace these with your real handlers.
    registry.register("demo_ok", |_ctx| {
        boxed(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(())
        })
    });
    registry.register("fail_me", |_ctx| {
        boxed(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Err(JobError::new("TIMEOUT", "simulated timeout"))
        })
    });

    // Example handler with argument validation.
    registry.register_with_options(
        "email_send",
        |ctx| {
            boxed(async move {
                let args: EmailSendPayload = ctx.parse_args()?;
                tracing::info!(
                    job_id = ctx.job.id,
                    user_id = args.user_id,
                    template = args.template.as_deref().unwrap_or("default"),
                    "sending email"
                );
                Ok(())
            })
        },
        HandlerOptions::new().max_concurrency(50),
    );

    Arc::new(registry)
}
