use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, ValueEnum, Serialize)]
pub(crate) enum BackendKind {
    Memory,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Deterministic straw-model simulator")]
pub(crate) struct Args {
    #[arg(long, value_enum, default_value = "memory")]
    pub(crate) backend: BackendKind,
    #[arg(long, value_parser = humantime::parse_duration)]
    pub(crate) duration: Option<Duration>,
    #[arg(long)]
    pub(crate) iterations: Option<u64>,
    #[arg(long)]
    pub(crate) seed: Option<u64>,
    #[arg(long, default_value_t = 3)]
    pub(crate) hosts: usize,
    #[arg(long)]
    pub(crate) no_write_master: bool,
    #[arg(long, default_value_t = 8)]
    pub(crate) tasks: usize,
    #[arg(long, default_value_t = 0.35)]
    pub(crate) write_rate: f64,
    #[arg(long, default_value_t = 0.4)]
    pub(crate) cache_rate: f64,
    #[arg(long, default_value_t = 0.5)]
    pub(crate) invalidate_rate: f64,
    #[arg(long, default_value_t = 0.02)]
    pub(crate) misuse_rate: f64,
    #[arg(long, default_value_t = 0.05)]
    pub(crate) sleep_rate: f64,
    #[arg(long)]
    pub(crate) log: Option<PathBuf>,
    #[arg(long)]
    pub(crate) quick: bool,
    #[arg(long)]
    pub(crate) stress: bool,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct SimConfig {
    pub(crate) backend: BackendKind,
    pub(crate) duration_ms: Option<u64>,
    pub(crate) iterations: Option<u64>,
    pub(crate) seed: u64,
    pub(crate) hosts: usize,
    pub(crate) write_master: bool,
    pub(crate) tasks: usize,
    pub(crate) write_rate: f64,
    pub(crate) cache_rate: f64,
    pub(crate) invalidate_rate: f64,
    pub(crate) misuse_rate: f64,
    pub(crate) sleep_rate: f64,
    pub(crate) log: Option<PathBuf>,
    pub(crate) preset: Option<String>,
    pub(crate) first_steps: usize,
    pub(crate) tail_steps: usize,
}

impl SimConfig {
    pub(crate) fn from_args(args: Args) -> Self {
        let mut config = SimConfig {
            backend: args.backend,
            duration_ms: args.duration.map(|d| d.as_millis() as u64),
            iterations: args.iterations,
            seed: args.seed.unwrap_or_else(random_seed),
            hosts: args.hosts.max(1),
            write_master: !args.no_write_master,
            tasks: args.tasks.max(1),
            write_rate: clamp_rate(args.write_rate),
            cache_rate: clamp_rate(args.cache_rate),
            invalidate_rate: clamp_rate(args.invalidate_rate),
            misuse_rate: clamp_rate(args.misuse_rate),
            sleep_rate: clamp_rate(args.sleep_rate),
            log: args.log,
            preset: None,
            first_steps: 30,
            tail_steps: 80,
        };

        if args.quick {
            config.apply_quick();
        }
        if args.stress {
            config.apply_stress();
        }

        config
    }

    /// Hosts as they appear in the simulated configuration, master first.
    pub(crate) fn host_names(&self) -> Vec<String> {
        (0..self.hosts).map(|i| format!("h{i}")).collect()
    }

    fn apply_quick(&mut self) {
        self.preset = Some("quick".to_string());
        self.iterations = Some(10_000);
        self.duration_ms = None;
        self.hosts = 3;
        self.tasks = 4;
        self.write_rate = 0.3;
        self.cache_rate = 0.4;
        self.misuse_rate = 0.01;
        self.sleep_rate = 0.05;
    }

    fn apply_stress(&mut self) {
        self.preset = Some("stress".to_string());
        self.iterations = Some(250_000);
        self.duration_ms = None;
        self.hosts = 5;
        self.tasks = 32;
        self.write_rate = 0.45;
        self.cache_rate = 0.6;
        self.misuse_rate = 0.03;
        self.sleep_rate = 0.08;
    }
}

fn clamp_rate(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

fn random_seed() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    now.as_secs() ^ (now.subsec_nanos() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_rate_limits_bounds() {
        assert_eq!(clamp_rate(-1.0), 0.0);
        assert_eq!(clamp_rate(2.0), 1.0);
        assert_eq!(clamp_rate(0.5), 0.5);
        assert_eq!(clamp_rate(f64::NAN), 0.0);
    }

    #[test]
    fn presets_override_flags() {
        let args = Args::parse_from(["simulator", "--hosts", "0", "--no-write-master", "--stress"]);
        let config = SimConfig::from_args(args);
        assert_eq!(config.preset.as_deref(), Some("stress"));
        assert_eq!(config.hosts, 5);
        assert!(!config.write_master);
        assert_eq!(config.host_names()[0], "h0");
    }
}
