use std::fmt;
use std::net::SocketAddr;

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use rand::{rngs::StdRng, SeedableRng};
use shinbot_core::{Pacing, RadiusBounds, SweepMode};

#[derive(Parser, Debug)]
#[command(name = "shinbot", version, about = "Sweeps the globe for shins and serves a live map of the run")]
pub struct Args {
    /// Identity provider API key.
    #[arg(long, env = "SHINBOT_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// Account email.
    #[arg(long, env = "SHINBOT_EMAIL")]
    pub email: String,

    /// Account password.
    #[arg(long, env = "SHINBOT_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// Where the live map is served, e.g. 127.0.0.1:8080
    #[arg(long, env = "SHINBOT_LISTEN", default_value = "127.0.0.1:8080")]
    pub listen: SocketAddr,

    /// Traversal strategy.
    #[arg(long, env = "SHINBOT_SWEEP", value_enum, default_value_t = SweepArg::Boustrophedon)]
    pub sweep: SweepArg,

    /// Smallest search radius in kilometers.
    #[arg(long, env = "SHINBOT_MIN_RADIUS_KM", default_value_t = 200.0)]
    pub min_radius_km: f64,

    /// Largest search radius in kilometers.
    #[arg(long, env = "SHINBOT_MAX_RADIUS_KM", default_value_t = 800.0)]
    pub max_radius_km: f64,

    /// Upper bound of the pause after each claim (seconds, drawn from 1..=max).
    #[arg(long, env = "SHINBOT_CLAIM_DELAY_MAX_SECS", default_value_t = 3)]
    pub claim_delay_max_secs: u64,

    /// Upper bound of the pause after each circle (seconds, drawn from 0..=max).
    #[arg(long, env = "SHINBOT_CIRCLE_DELAY_MAX_SECS", default_value_t = 2)]
    pub circle_delay_max_secs: u64,

    /// Records buffered per live-map connection before it is dropped.
    #[arg(long, env = "SHINBOT_OBSERVER_BUFFER", default_value_t = 256)]
    pub observer_buffer: usize,

    /// Seed for every randomized draw (radius, drift, pacing).
    #[arg(long, env = "SHINBOT_SEED")]
    pub seed: Option<u64>,

    /// Stop serving the live map once the sweep ends or aborts.
    #[arg(long, env = "SHINBOT_EXIT_ON_FINISH", default_value_t = false)]
    pub exit_on_finish: bool,

    /// Log level (env-filter syntax).
    #[arg(long, env = "SHINBOT_LOG", default_value = "info")]
    pub log: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SweepArg {
    Boustrophedon,
    Drift,
}

impl From<SweepArg> for SweepMode {
    fn from(value: SweepArg) -> Self {
        match value {
            SweepArg::Boustrophedon => SweepMode::Boustrophedon,
            SweepArg::Drift => SweepMode::Drift,
        }
    }
}

#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub email: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub credentials: Credentials,
    pub listen: SocketAddr,
    pub sweep_mode: SweepMode,
    pub bounds: RadiusBounds,
    pub pacing: Pacing,
    pub observer_buffer: usize,
    pub seed: Option<u64>,
    pub exit_on_finish: bool,
}

impl DaemonConfig {
    pub fn from_args(args: Args) -> anyhow::Result<Self> {
        let bounds = RadiusBounds::new(args.min_radius_km, args.max_radius_km)
            .context("invalid --min-radius-km/--max-radius-km")?;
        if args.observer_buffer == 0 {
            bail!("--observer-buffer must be at least 1");
        }

        let pacing = Pacing {
            claim_delay_secs: (args.claim_delay_max_secs.min(1), args.claim_delay_max_secs),
            circle_delay_secs: (0, args.circle_delay_max_secs),
        };

        Ok(Self {
            credentials: Credentials {
                api_key: args.api_key,
                email: args.email,
                password: args.password,
            },
            listen: args.listen,
            sweep_mode: args.sweep.into(),
            bounds,
            pacing,
            observer_buffer: args.observer_buffer,
            seed: args.seed,
            exit_on_finish: args.exit_on_finish,
        })
    }

    /// Independent rngs for the sweep and the pacing, derived from `seed`
    /// when one is configured.
    pub fn rngs(&self) -> (StdRng, StdRng) {
        match self.seed {
            Some(seed) => (
                StdRng::seed_from_u64(seed),
                StdRng::seed_from_u64(seed.wrapping_add(1)),
            ),
            None => (StdRng::from_os_rng(), StdRng::from_os_rng()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn parse(extra: &[&str]) -> Result<Args, clap::Error> {
        let mut argv = vec![
            "shinbot",
            "--api-key",
            "k",
            "--email",
            "me@example.com",
            "--password",
            "hunter2",
        ];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv)
    }

    #[test]
    fn defaults_match_the_human_cadence() {
        let cfg = DaemonConfig::from_args(parse(&[]).unwrap()).unwrap();
        assert_eq!(cfg.listen, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(cfg.sweep_mode, SweepMode::Boustrophedon);
        assert_eq!((cfg.bounds.min_km(), cfg.bounds.max_km()), (200.0, 800.0));
        assert_eq!(cfg.pacing, Pacing::default());
        assert_eq!(cfg.observer_buffer, 256);
        assert!(!cfg.exit_on_finish);
    }

    #[test]
    fn credentials_are_required() {
        assert!(Args::try_parse_from(["shinbot", "--email", "a@b.c"]).is_err());
    }

    #[test]
    fn rejects_inverted_radius_bounds() {
        let args = parse(&["--min-radius-km", "900", "--max-radius-km", "100"]).unwrap();
        let err = DaemonConfig::from_args(args).unwrap_err();
        assert!(err.to_string().contains("--min-radius-km"));
    }

    #[test]
    fn rejects_empty_observer_buffer() {
        let args = parse(&["--observer-buffer", "0"]).unwrap();
        assert!(DaemonConfig::from_args(args).is_err());
    }

    #[test]
    fn zero_claim_delay_disables_claim_pacing() {
        let args = parse(&["--claim-delay-max-secs", "0", "--circle-delay-max-secs", "0"]).unwrap();
        let cfg = DaemonConfig::from_args(args).unwrap();
        assert_eq!(cfg.pacing, Pacing::none());
    }

    #[test]
    fn drift_mode_and_seed_are_parsed() {
        let cfg = DaemonConfig::from_args(parse(&["--sweep", "drift", "--seed", "11"]).unwrap()).unwrap();
        assert_eq!(cfg.sweep_mode, SweepMode::Drift);

        let (mut a, _) = cfg.rngs();
        let (mut b, _) = cfg.rngs();
        assert_eq!(a.random::<u64>(), b.random::<u64>());
    }

    #[test]
    fn debug_output_hides_secrets() {
        let cfg = DaemonConfig::from_args(parse(&[]).unwrap()).unwrap();
        let dbg = format!("{cfg:?}");
        assert!(!dbg.contains("hunter2"));
        assert!(dbg.contains("me@example.com"));
    }
}
