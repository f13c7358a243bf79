use colored::Colorize;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::UpdateError;
use crate::host::Host;

/// Block until no process named in `names` is running.
///
/// Polls every `interval`. With `max_wait` unset there is no bound: the only
/// way out is the application exiting, since replacing files it still holds
/// open would fail or corrupt the install.
pub fn wait_for_exit(
    host: &dyn Host,
    names: &[String],
    interval: Duration,
    max_wait: Option<Duration>,
) -> Result<(), UpdateError> {
    let start = Instant::now();
    let mut announced = false;

    while host.is_running(names) {
        if !announced {
            println!("{} Waiting for {} to close...", "●".cyan(), names.join(" / "));
            log::info!("waiting for {:?} to exit", names);
            announced = true;
        }

        if let Some(limit) = max_wait {
            if start.elapsed() >= limit {
                return Err(UpdateError::WatchTimeout {
                    secs: limit.as_secs(),
                });
            }
        }

        thread::sleep(interval);
    }

    if announced {
        log::info!("application exited after {:?}", start.elapsed());
    }
    Ok(())
}
