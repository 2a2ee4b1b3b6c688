use std::time::{Duration, Instant};

use anyhow::bail;
use clap::Parser;
use log::info;
use pledge::{config::Config, promise::Deferred, task::Executor, timer::Timer, Error};

/// Race a simulated request against a timeout.
#[derive(Parser)]
struct Args {
    /// How long the request takes to answer, in milliseconds.
    #[arg(long, default_value_t = 50)]
    work: u64,

    /// How long the caller is willing to wait, in milliseconds.
    #[arg(long, default_value_t = 10)]
    timeout: u64,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    Executor::configure(Config::from_env());

    let args = Args::parse();

    let request = Deferred::<String>::with_canceler(|reason| {
        info!("request aborted: {reason}");
        Err(reason)
    });

    let resolver = request.resolver();
    let work = Timer::after(Duration::from_millis(args.work), move || {
        if let Err(e) = resolver.resolve("200 OK".to_string()) {
            info!("late response dropped: {e}");
        }
    });

    let bounded = request
        .promise()
        .timeout(Duration::from_millis(args.timeout))
        .finally(move |outcome| {
            work.clear();
            outcome
        });

    let start = Instant::now();

    match Executor::block_on(&bounded) {
        Ok(body) => println!("response after {:?}: {body}", start.elapsed()),
        Err(e @ Error::Timeout(_)) => println!("{} after {:?}: {e}", e.name(), start.elapsed()),
        Err(e) => bail!("request failed: {e}"),
    }

    Ok(())
}
