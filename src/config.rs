use crate::error::AppError;
use log::warn;
use std::path::PathBuf;

/// Parsed startup configuration. Exactly five flags, any order, all
/// required: `-interface:<name> -inputs:<I> -outputs:<O> -rate:<R>
/// -port:<P>`.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub interface: String,
    pub input_channels: u16,
    pub output_channels: u16,
    pub sample_rate: u32,
    pub port: u16,
}

const USAGE: &str =
    "usage: signalbridge -interface:<name> -inputs:<I> -outputs:<O> -rate:<R> -port:<P>";

impl Config {
    /// Parse from `args` (excluding argv[0]). On error, the `AppError`'s
    /// message is already formatted for printing to stderr before exit(1).
    pub fn parse<I: IntoIterator<Item = String>>(args: I) -> Result<Self, AppError> {
        let mut interface: Option<String> = None;
        let mut inputs: Option<u16> = None;
        let mut outputs: Option<u16> = None;
        let mut rate: Option<u32> = None;
        let mut port: Option<u16> = None;

        for arg in args {
            let Some((flag, value)) = arg.split_once(':') else {
                return Err(AppError::Config(format!("{USAGE}\nunrecognized argument: {arg}")));
            };
            match flag {
                "-interface" => interface = Some(value.to_string()),
                "-inputs" => inputs = Some(parse_flag(flag, value)?),
                "-outputs" => outputs = Some(parse_flag(flag, value)?),
                "-rate" => rate = Some(parse_flag(flag, value)?),
                "-port" => port = Some(parse_flag(flag, value)?),
                other => return Err(AppError::Config(format!("{USAGE}\nunknown flag: {other}"))),
            }
        }

        let interface = interface.ok_or_else(|| missing("-interface"))?;
        let input_channels = inputs.ok_or_else(|| missing("-inputs"))?;
        let output_channels = outputs.ok_or_else(|| missing("-outputs"))?;
        let sample_rate = rate.ok_or_else(|| missing("-rate"))?;
        let port = port.ok_or_else(|| missing("-port"))?;

        Ok(Self {
            interface,
            input_channels,
            output_channels,
            sample_rate,
            port,
        })
    }

    /// Default on-disk location for the parameter store's SQLite file.
    pub fn database_path(&self) -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("signalbridge")
            .join("audio_parameters.db")
    }
}

fn parse_flag<T: std::str::FromStr>(flag: &str, value: &str) -> Result<T, AppError> {
    value
        .parse()
        .map_err(|_| AppError::Config(format!("{USAGE}\ninvalid value for {flag}: {value}")))
}

fn missing(flag: &str) -> AppError {
    AppError::Config(format!("{USAGE}\nmissing required flag: {flag}"))
}

/// Best-effort restore of a platform-specific on-disk sound-card mixer
/// state file via `alsactl`. Failure here is never fatal to startup.
pub fn restore_soundcard_state(path: &std::path::Path) {
    use std::process::Command;

    match Command::new("alsactl")
        .arg("--file")
        .arg(path)
        .arg("restore")
        .status()
    {
        Ok(status) if status.success() => {}
        Ok(status) => warn!("alsactl restore for {path:?} exited with {status}"),
        Err(e) => warn!("failed to run alsactl restore for {path:?}: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(s: &str) -> Vec<String> {
        s.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn parses_all_five_flags_in_any_order() {
        let cfg = Config::parse(args(
            "-rate:48000 -interface:hw:0 -port:9000 -outputs:2 -inputs:2",
        ))
        .unwrap();
        assert_eq!(
            cfg,
            Config {
                interface: "hw:0".to_string(),
                input_channels: 2,
                output_channels: 2,
                sample_rate: 48_000,
                port: 9000,
            }
        );
    }

    #[test]
    fn missing_flag_is_an_error() {
        let result = Config::parse(args("-interface:hw:0 -inputs:2 -outputs:2 -rate:48000"));
        assert!(result.is_err());
    }

    #[test]
    fn unknown_flag_is_an_error() {
        let result = Config::parse(args(
            "-interface:hw:0 -inputs:2 -outputs:2 -rate:48000 -port:9000 -bogus:1",
        ));
        assert!(result.is_err());
    }
}
