// SPDX-License-Identifier: LGPL-2.1-or-later

//! `gamind`: the per-(user, session) file-alteration-monitor daemon.
//!
//! ```text
//! gamind [--notimeout] [--pollonly] [session-id]
//! ```

use gamin_core::SessionId;
use gamin_daemon::lifecycle::{self, Config, LifecycleError};
use tracing_subscriber::EnvFilter;

fn main() {
    init_tracing();

    if let Err(err) = run() {
        tracing::error!(%err, "gamind failed to start");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let default_level = if gamin_daemon::env::debug_enabled() { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env("GAM_LOG")
        .unwrap_or_else(|_| EnvFilter::new(format!("gamind={default_level}")));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn run() -> Result<(), LifecycleError> {
    let args = parse_args(std::env::args().skip(1));

    let session =
        args.session.map(SessionId::new).unwrap_or_else(SessionId::from_env);
    let mut config = Config::load(session)?;
    config.pollonly = config.pollonly || args.pollonly;
    config.notimeout = args.notimeout;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let handle = lifecycle::run(config).await?;
        handle.join().await;
        Ok(())
    })
}

struct Args {
    notimeout: bool,
    pollonly: bool,
    session: Option<String>,
}

fn parse_args(args: impl Iterator<Item = String>) -> Args {
    let mut parsed = Args { notimeout: false, pollonly: false, session: None };
    for arg in args {
        match arg.as_str() {
            "--notimeout" => parsed.notimeout = true,
            "--pollonly" => parsed.pollonly = true,
            other => parsed.session = Some(other.to_string()),
        }
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_flags_and_positional_session() {
        let args = parse_args(
            ["--notimeout", "--pollonly", "work"].into_iter().map(str::to_string),
        );
        assert!(args.notimeout);
        assert!(args.pollonly);
        assert_eq!(args.session.as_deref(), Some("work"));
    }

    #[test]
    fn defaults_to_no_flags_and_no_session() {
        let args = parse_args(std::iter::empty());
        assert!(!args.notimeout);
        assert!(!args.pollonly);
        assert_eq!(args.session, None);
    }
}
