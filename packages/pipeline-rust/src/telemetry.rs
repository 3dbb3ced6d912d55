//! Process-wide `tracing` subscriber setup.

use std::sync::Once;

use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Output profile for [`init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// Human-readable output, debug for the keel crates unless `RUST_LOG` says otherwise.
    Development,
    /// JSON lines, info for the keel crates unless `RUST_LOG` says otherwise.
    Production,
    /// Bare registry; events are dropped unless a test installs its own layer.
    Test,
}

static INIT_ONCE: Once = Once::new();

fn filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Installs the global subscriber for `profile`.
///
/// Only the first call in a process has an effect. If another subscriber is
/// already installed (e.g. by the host application) it is left in place.
pub fn init(profile: Profile) {
    INIT_ONCE.call_once(|| {
        let installed = match profile {
            Profile::Development => tracing_subscriber::fmt()
                .with_env_filter(filter("keel_core=debug,keel_pipeline=debug"))
                .finish()
                .try_init(),
            Profile::Production => tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter("keel_core=info,keel_pipeline=info"))
                .finish()
                .try_init(),
            Profile::Test => tracing_subscriber::registry().try_init(),
        };
        if let Err(e) = installed {
            tracing::debug!(error = %e, "global subscriber already set");
        }
    });
}
