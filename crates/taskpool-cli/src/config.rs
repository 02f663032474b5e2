use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use taskpool::{MAX_POOL_SIZE, POOL_SIZE_KEY};

/// Runtime configuration for the `taskpool` binary.
///
/// Values are parsed from CLI arguments or environment variables (a `.env`
/// file is loaded first). The worker count is special: when `--workers` is
/// absent, the pool reads it from the environment itself.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "taskpool",
    version,
    about = "Runs a batch of jobs through a bounded task pool"
)]
pub struct CliArgs {
    /// Number of workers in the pool.
    ///
    /// Must be greater than 0 and less than 1000. When omitted, the pool uses
    /// `TASKPOOL_MAX_COUNT` from the environment if valid, otherwise 5.
    #[arg(long)]
    pub workers: Option<usize>,

    /// Number of jobs to submit.
    ///
    /// Environment variable: `JOBS`
    #[arg(long, env = "JOBS", default_value_t = 10)]
    pub jobs: usize,

    /// How long each job runs, in milliseconds.
    ///
    /// Environment variable: `JOB_MILLIS`
    #[arg(long, env = "JOB_MILLIS", default_value_t = 100)]
    pub job_millis: u64,

    /// Submit synchronous jobs (run on the blocking thread pool) instead of
    /// async ones.
    #[arg(short, long, default_value_t = false)]
    pub blocking: bool,
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub workers: Option<usize>,
    pub jobs: usize,
    pub job_duration: Duration,
    pub blocking: bool,
}

impl TryFrom<CliArgs> for RunConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if let Some(workers) = args.workers {
            if workers == 0 || workers >= MAX_POOL_SIZE {
                bail!(
                    "--workers ({workers}) must be greater than 0 and less than {MAX_POOL_SIZE} \
                     (omit it to use `{}` from the environment)",
                    POOL_SIZE_KEY.to_ascii_uppercase()
                );
            }
        }

        if args.jobs == 0 {
            bail!("JOBS must be greater than 0");
        }

        Ok(Self {
            workers: args.workers,
            jobs: args.jobs,
            job_duration: Duration::from_millis(args.job_millis),
            blocking: args.blocking,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<RunConfig> {
        let args = CliArgs::try_parse_from(std::iter::once("taskpool").chain(args.iter().copied()))?;
        RunConfig::try_from(args)
    }

    #[test]
    fn defaults() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.workers, None);
        assert_eq!(config.jobs, 10);
        assert_eq!(config.job_duration, Duration::from_millis(100));
        assert!(!config.blocking);
    }

    #[test]
    fn explicit_values() {
        let config = parse(&["--workers", "8", "--jobs", "3", "--job-millis", "5", "-b"]).unwrap();
        assert_eq!(config.workers, Some(8));
        assert_eq!(config.jobs, 3);
        assert_eq!(config.job_duration, Duration::from_millis(5));
        assert!(config.blocking);
    }

    #[test]
    fn rejects_out_of_range_workers() {
        assert!(parse(&["--workers", "0"]).is_err());
        assert!(parse(&["--workers", "1000"]).is_err());
        assert!(parse(&["--workers", "999"]).is_ok());
    }

    #[test]
    fn rejects_zero_jobs() {
        assert!(parse(&["--jobs", "0"]).is_err());
    }
}
