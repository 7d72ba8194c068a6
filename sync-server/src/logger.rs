//! Process-wide `tracing` subscriber for the sync service.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// HTTP and S3 SDK internals log every request at `info`; only their warnings
/// are worth keeping next to the engine's own output.
const QUIET_TARGETS: &[&str] = &["aws_config", "aws_smithy_runtime", "hyper", "reqwest"];

/// Install the subscriber once at start-up. `level` comes from `LOG_LEVEL`;
/// a `RUST_LOG` directive takes precedence so single modules such as
/// `snapshot_sync_engine::engine` can be turned up on their own.
pub fn init(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directives(level)))
        .unwrap_or_else(|_| EnvFilter::new(directives("info")));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()?;

    Ok(())
}

fn directives(level: &str) -> String {
    let mut directives = vec![level.trim().to_string()];
    directives.extend(QUIET_TARGETS.iter().map(|target| format!("{target}=warn")));
    directives.join(",")
}
