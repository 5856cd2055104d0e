//! Argument and process plumbing shared by both binaries.

use anyhow::Result;
use medallion_core::cancel::CancelToken;

pub fn parse_arg<T: std::str::FromStr>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}

pub fn parse_opt<T: std::str::FromStr>(args: &[String], flag: &str) -> Option<T> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
}

pub fn has_flag(args: &[String], flags: &[&str]) -> bool {
    args.iter().any(|a| flags.contains(&a.as_str()))
}

/// `RUST_LOG` wins; otherwise `--verbose` means debug, else `level`.
pub fn init_logging(verbose: bool, level: &str) {
    let default = if verbose { "debug" } else { level };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

/// Cancel `token` on Ctrl+C. The signal listener runs on its own
/// single-threaded runtime; everything else stays synchronous.
pub fn cancel_on_interrupt(token: &CancelToken) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let token = token.clone();
    std::thread::spawn(move || {
        runtime.block_on(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    log::info!("Interrupt received, finishing the current unit of work");
                    token.cancel();
                }
                Err(e) => log::error!("Failed to listen for Ctrl+C: {e}"),
            }
        });
    });
    Ok(())
}
