//! Command-line driver surface (§6).
//!
//! No CLI-parsing crate is pulled in elsewhere in this crate, so this is a
//! small hand-rolled parser rather than an introduced dependency (cf.
//! `config::ParameterMap`, also hand-rolled for the same reason).

use crate::error::{Result, SwiftError};

/// Parsed command-line flags for the engine driver (§6, later/richer flag
/// set per the resolved parity question).
#[derive(Debug, Clone, PartialEq)]
pub struct DriverArgs {
    /// Path to the parameter file (first positional argument).
    pub param_file: Option<String>,
    /// `-a`: pin each thread to a core.
    pub pin_affinity: bool,
    /// `-c`: run in cosmological integration mode.
    pub cosmology: bool,
    /// `-C`: enable cooling.
    pub cooling: bool,
    /// `-d`: dry run (build everything, execute no step).
    pub dry_run: bool,
    /// `-D`: drift all particles every step, not just active ones.
    pub drift_all: bool,
    /// `-e`: enable floating-point exception trapping.
    pub fp_exceptions: bool,
    /// `-f`: override the detected CPU frequency (Hz), for timer scaling.
    pub cpu_freq: Option<f64>,
    /// `-g`: enable external gravity.
    pub external_gravity: bool,
    /// `-G`: enable self-gravity.
    pub self_gravity: bool,
    /// `-M`: reconstruct multipoles every step instead of incrementally.
    pub reconstruct_multipoles: bool,
    /// `-n`: run a fixed number of steps rather than until `time_end`.
    pub fixed_steps: Option<u64>,
    /// `-o`: dump the fully resolved parameter set and exit.
    pub dump_params: bool,
    /// `-P`: `section:key=value` overrides applied after parsing the file.
    pub param_overrides: Vec<(String, String)>,
    /// `-r`: continue from the latest restart file instead of the ICs.
    pub restart: bool,
    /// `-s`: enable hydrodynamics.
    pub hydro: bool,
    /// `-S`: enable stars.
    pub stars: bool,
    /// `-t`: number of worker threads.
    pub threads: usize,
    /// `-v`: verbosity, 1 = rank 0 only, 2 = every rank.
    pub verbose: u8,
    /// `-y`: dump the task graph every N steps (0 = never).
    pub task_dump_frequency: u64,
    /// `-Y`: dump threadpool activity every N steps (0 = never).
    pub threadpool_dump_frequency: u64,
}

impl Default for DriverArgs {
    fn default() -> Self {
        Self {
            param_file: None,
            pin_affinity: false,
            cosmology: false,
            cooling: false,
            dry_run: false,
            drift_all: false,
            fp_exceptions: false,
            cpu_freq: None,
            external_gravity: false,
            self_gravity: false,
            reconstruct_multipoles: false,
            fixed_steps: None,
            dump_params: false,
            param_overrides: Vec::new(),
            restart: false,
            hydro: false,
            stars: false,
            threads: 1,
            verbose: 0,
            task_dump_frequency: 0,
            threadpool_dump_frequency: 0,
        }
    }
}

impl DriverArgs {
    /// Parse `argv` (excluding the program name). Exit-code semantics per
    /// §6: the caller should exit 1 if this returns an error, 0 otherwise.
    pub fn parse<I: IntoIterator<Item = String>>(argv: I) -> Result<Self> {
        let mut args = Self::default();
        let mut iter = argv.into_iter().peekable();

        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "-a" => args.pin_affinity = true,
                "-c" => args.cosmology = true,
                "-C" => args.cooling = true,
                "-d" => args.dry_run = true,
                "-D" => args.drift_all = true,
                "-e" => args.fp_exceptions = true,
                "-f" => {
                    let v = next_value(&mut iter, "-f")?;
                    args.cpu_freq = Some(
                        v.parse()
                            .map_err(|_| SwiftError::config(format!("-f expects a number, got '{v}'")))?,
                    );
                }
                "-g" => args.external_gravity = true,
                "-G" => args.self_gravity = true,
                "-M" => args.reconstruct_multipoles = true,
                "-n" => {
                    let v = next_value(&mut iter, "-n")?;
                    args.fixed_steps = Some(
                        v.parse()
                            .map_err(|_| SwiftError::config(format!("-n expects an integer, got '{v}'")))?,
                    );
                }
                "-o" => args.dump_params = true,
                "-P" => {
                    let v = next_value(&mut iter, "-P")?;
                    let (k, val) = v
                        .split_once('=')
                        .ok_or_else(|| SwiftError::config("-P expects key=value"))?;
                    args.param_overrides.push((k.to_string(), val.to_string()));
                }
                "-r" => args.restart = true,
                "-s" => args.hydro = true,
                "-S" => args.stars = true,
                "-t" => {
                    let v = next_value(&mut iter, "-t")?;
                    args.threads = v
                        .parse()
                        .map_err(|_| SwiftError::config(format!("-t expects an integer, got '{v}'")))?;
                }
                "-v" => {
                    let v = next_value(&mut iter, "-v")?;
                    args.verbose = match v.as_str() {
                        "1" => 1,
                        "2" => 2,
                        other => {
                            return Err(SwiftError::config(format!(
                                "-v expects 1 or 2, got '{other}'"
                            )))
                        }
                    };
                }
                "-y" => {
                    let v = next_value(&mut iter, "-y")?;
                    args.task_dump_frequency = v
                        .parse()
                        .map_err(|_| SwiftError::config(format!("-y expects an integer, got '{v}'")))?;
                }
                "-Y" => {
                    let v = next_value(&mut iter, "-Y")?;
                    args.threadpool_dump_frequency = v
                        .parse()
                        .map_err(|_| SwiftError::config(format!("-Y expects an integer, got '{v}'")))?;
                }
                other if other.starts_with('-') => {
                    return Err(SwiftError::config(format!("unrecognized flag '{other}'")));
                }
                positional => {
                    if args.param_file.is_some() {
                        return Err(SwiftError::config(
                            "only one parameter file may be given",
                        ));
                    }
                    args.param_file = Some(positional.to_string());
                }
            }
        }

        if args.param_file.is_none() && !args.dump_params {
            return Err(SwiftError::config("missing mandatory parameter file"));
        }

        Ok(args)
    }
}

fn next_value(
    iter: &mut std::iter::Peekable<impl Iterator<Item = String>>,
    flag: &str,
) -> Result<String> {
    iter.next()
        .ok_or_else(|| SwiftError::config(format!("{flag} requires a value")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn parses_minimal_invocation() {
        let args = DriverArgs::parse(argv("params.yml")).unwrap();
        assert_eq!(args.param_file.as_deref(), Some("params.yml"));
        assert_eq!(args.threads, 1);
    }

    #[test]
    fn parses_flags_and_valued_options() {
        let args = DriverArgs::parse(argv("-c -G -t 8 -v 2 params.yml")).unwrap();
        assert!(args.cosmology);
        assert!(args.self_gravity);
        assert_eq!(args.threads, 8);
        assert_eq!(args.verbose, 2);
        assert_eq!(args.param_file.as_deref(), Some("params.yml"));
    }

    #[test]
    fn parses_param_override() {
        let args = DriverArgs::parse(argv("-P Scheduler:nr_queues=4 params.yml")).unwrap();
        assert_eq!(args.param_overrides, vec![("Scheduler:nr_queues".to_string(), "4".to_string())]);
    }

    #[test]
    fn missing_param_file_is_an_error() {
        assert!(DriverArgs::parse(argv("-c")).is_err());
    }

    #[test]
    fn dump_params_does_not_require_a_file() {
        assert!(DriverArgs::parse(argv("-o")).is_ok());
    }

    #[test]
    fn unrecognized_flag_is_an_error() {
        assert!(DriverArgs::parse(argv("-Z params.yml")).is_err());
    }

    #[test]
    fn invalid_verbosity_is_an_error() {
        assert!(DriverArgs::parse(argv("-v 3 params.yml")).is_err());
    }
}
