use std::{collections::BTreeMap, time::Duration};

use anyhow::Context;
use clap::Parser;
use pledge::{
    config::Config,
    promise::{Promise, Resolution},
    task::Executor,
    timer::delay,
    Error,
};

/// Wait on several simulated jobs at once and report progress as they finish.
#[derive(Parser)]
struct Args {
    /// Jobs as `name=milliseconds`. A negative duration makes the job fail.
    #[arg(default_values_t = ["fetch=30".to_string(), "parse=-10".to_string(), "index=20".to_string()])]
    jobs: Vec<String>,
}

fn job(ms: i64) -> Promise<i64> {
    delay(Duration::from_millis(ms.unsigned_abs())).then(move |()| {
        if ms < 0 {
            Err(Error::custom("JobError", format!("failed after {}ms", -ms)))
        } else {
            Ok(ms)
        }
    })
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    Executor::configure(Config::from_env());

    let args = Args::parse();
    let mut jobs = BTreeMap::new();

    for spec in &args.jobs {
        let (name, ms) = spec
            .split_once('=')
            .with_context(|| format!("expected name=milliseconds, got {spec}"))?;
        let ms: i64 = ms.parse().with_context(|| format!("bad duration in {spec}"))?;

        jobs.insert(name.to_string(), Resolution::Promise(job(ms)));
    }

    let all = Promise::all(jobs).progress(|snapshot| {
        println!("{} finished", snapshot.len());
        Ok(snapshot)
    });

    let results = Executor::block_on(&all).map_err(|e| anyhow::anyhow!("{e}"))?;

    for (name, outcome) in results {
        match outcome {
            Ok(ms) => println!("{name}: done in {ms}ms"),
            Err(e) => println!("{name}: {} ({e})", e.name()),
        }
    }

    Ok(())
}
