// Copyright 2022 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Implements the `run` command (i.e., running the daemon).

use std::fmt::Write;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use env_logger::Env;
use log::{debug, error, info};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};
use signal_hook::consts::signal::{SIGINT, SIGTERM};

use linkscope::manager::Manager;
use linkscope::scope::ScopeSet;

use crate::args::{RunArgs, SetupArgs};
use crate::config::{self, Config};
use crate::manager::UdpManager;
use crate::scopes;

/// The longest we sleep without checking for termination.
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Runs the daemon.
pub fn run(args: RunArgs) {
    env_logger::init_from_env(Env::new().default_filter_or("warn"));

    if let Err(e) = try_running(args) {
        log_failure("Failed to run:", &e);
        process::exit(1);
    }
    info!("Exiting with success.");
}

/// Logs `e` with its chain of causes.
pub fn log_failure(header: &str, e: &anyhow::Error) {
    let mut message = String::from(header);
    for (i, cause) in e.chain().enumerate() {
        write!(message, "\n[{}] {}", i + 1, cause).unwrap();
    }
    message.push_str("\nExiting with failure.");
    error!("{}", message);
}

/// Loads the configuration from the file or the command line, as
/// appropriate.
pub fn load_config(args: SetupArgs) -> Result<Config> {
    if let Some(ref config_path) = args.config {
        info!("Loading the configuration from {}.", config_path.display());
        config::load_from_path(config_path).context("failed to load the configuration")
    } else {
        info!("Loading the configuration from the command line.");
        config::load_from_args(args).context("failed to load the configuration")
    }
}

fn try_running(run_args: RunArgs) -> Result<()> {
    info!(
        "linkscope daemon v{}.{}.{} starting.",
        env!("CARGO_PKG_VERSION_MAJOR"),
        env!("CARGO_PKG_VERSION_MINOR"),
        env!("CARGO_PKG_VERSION_PATCH"),
    );

    let config = load_config(run_args.setup)?;
    let (manager, mut scopes) = scopes::set_up(&config).context("failed to set up scopes")?;
    let terminate = set_up_signal_handling().context("failed to set up signal handling")?;

    info!("Set-up is complete; serving {} scopes.", scopes.len());
    while !terminate.load(Ordering::Relaxed) {
        run_once(&manager, &mut scopes)?;
    }
    info!("Received a termination signal; shutting down.");

    let aborted = scopes.clear(&manager);
    debug!("Aborted {} transactions.", aborted.len());
    Ok(())
}

/// Waits for incoming packets or the next deadline, then handles
/// whatever is ready.
pub fn run_once(manager: &UdpManager, scopes: &mut ScopeSet) -> Result<()> {
    let sockets = manager.open_sockets();
    let mut poll_fds: Vec<_> = sockets
        .iter()
        .map(|&(_, fd)| PollFd::new(fd, PollFlags::POLLIN))
        .collect();
    let timeout = poll_timeout(manager.now(), scopes.next_deadline());
    match poll(&mut poll_fds, timeout) {
        Ok(_) => (),
        Err(Errno::EINTR) => return Ok(()),
        Err(e) => return Err(e).context("failed to poll sockets"),
    }

    for (poll_fd, &(kind, _)) in poll_fds.iter().zip(&sockets) {
        let readable = poll_fd
            .revents()
            .map_or(false, |revents| revents.contains(PollFlags::POLLIN));
        if !readable {
            continue;
        }
        while let Some(packet) = manager
            .receive(kind)
            .with_context(|| format!("failed to receive on the {} socket", kind))?
        {
            scopes::handle_packet(manager, scopes, packet);
        }
    }

    scopes.dispatch_due(manager);
    Ok(())
}

/// Computes the poll timeout, in milliseconds, for the next deadline.
fn poll_timeout(now: Instant, deadline: Option<Instant>) -> i32 {
    let wait = deadline
        .map_or(MAX_POLL_INTERVAL, |deadline| deadline.saturating_duration_since(now))
        .min(MAX_POLL_INTERVAL);
    // Round up, so we never wake just before a deadline.
    let millis = (wait.as_micros() + 999) / 1000;
    millis.try_into().unwrap_or(i32::MAX)
}

fn set_up_signal_handling() -> Result<Arc<AtomicBool>> {
    let term_signals = &[SIGINT, SIGTERM];
    let terminate = Arc::new(AtomicBool::new(false));

    // A second termination signal exits immediately, even if shutdown
    // is still in progress.
    for sig in term_signals {
        signal_hook::flag::register_conditional_shutdown(*sig, 1, terminate.clone())?;
        signal_hook::flag::register(*sig, terminate.clone())?;
    }
    Ok(terminate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_timeout_rounds_up_and_caps() {
        let now = Instant::now();
        assert_eq!(poll_timeout(now, None), 1000);
        assert_eq!(poll_timeout(now, Some(now)), 0);
        assert_eq!(poll_timeout(now, Some(now + Duration::from_micros(1500))), 2);
        assert_eq!(poll_timeout(now, Some(now + Duration::from_secs(60))), 1000);
    }
}
