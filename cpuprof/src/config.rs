//! Explicit profiler configuration
//!
//! Built once from the command line and handed to the
//! [`Controller`](crate::controller::Controller); nothing reads flags globally.

use std::path::PathBuf;
use std::time::Duration;

use crate::cli::Args;
use crate::domain::{CounterKind, PidFilter, ProfilerError};
use crate::profiling::CounterConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfilerConfig {
    pub counter: CounterConfig,
    /// Print kernel/user frame addresses under every row
    pub print_stack: bool,
    /// Compiled collector object to load
    pub object_path: PathBuf,
    /// bpffs directory for map pinning (`None` disables pinning)
    pub pin_path: Option<PathBuf>,
    /// Stop on its own after this long
    pub duration: Option<Duration>,
}

impl ProfilerConfig {
    /// Validate command line arguments into a configuration
    ///
    /// # Errors
    /// Returns [`ProfilerError::InvalidConfig`] for a zero sampling rate or a
    /// negative pid other than `-1`
    pub fn from_args(args: &Args) -> Result<Self, ProfilerError> {
        if args.freq == 0 {
            return Err(ProfilerError::InvalidConfig("--freq must be greater than 0".into()));
        }
        let pid_filter = PidFilter::from_raw(args.pid).ok_or_else(|| {
            ProfilerError::InvalidConfig(format!(
                "--pid must be a process id or -1 for all processes, got {}",
                args.pid
            ))
        })?;

        Ok(Self {
            counter: CounterConfig {
                kind: CounterKind::from_hw_flag(args.hw),
                sampling_rate: args.freq,
                pid_filter,
            },
            print_stack: args.ps,
            object_path: args.object.clone(),
            pin_path: (!args.no_pin).then(|| args.pin_path.clone()),
            duration: (args.duration > 0).then(|| Duration::from_secs(args.duration)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Pid;
    use clap::Parser;

    fn parse(argv: &[&str]) -> Result<ProfilerConfig, ProfilerError> {
        let args = Args::try_parse_from(std::iter::once("cpuprof").chain(argv.iter().copied()))
            .expect("arguments should parse");
        ProfilerConfig::from_args(&args)
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.counter.kind, CounterKind::SoftwareClock);
        assert_eq!(config.counter.sampling_rate, 1_000_000);
        assert_eq!(config.counter.pid_filter, PidFilter::All);
        assert!(!config.print_stack);
        assert_eq!(config.pin_path, Some(PathBuf::from("/sys/fs/bpf")));
        assert_eq!(config.duration, None);
    }

    #[test]
    fn test_explicit_flags() {
        let config =
            parse(&["--hw", "--freq", "99", "--pid", "1234", "--ps", "--duration", "5", "--no-pin"])
                .unwrap();
        assert_eq!(config.counter.kind, CounterKind::HardwareCycles);
        assert_eq!(config.counter.sampling_rate, 99);
        assert_eq!(config.counter.pid_filter, PidFilter::Process(Pid(1234)));
        assert!(config.print_stack);
        assert_eq!(config.pin_path, None);
        assert_eq!(config.duration, Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_explicit_all_processes() {
        let config = parse(&["--pid", "-1"]).unwrap();
        assert_eq!(config.counter.pid_filter, PidFilter::All);
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(matches!(parse(&["--freq", "0"]), Err(ProfilerError::InvalidConfig(_))));
        assert!(matches!(parse(&["--pid", "-3"]), Err(ProfilerError::InvalidConfig(_))));
    }
}
