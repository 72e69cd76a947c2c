use std::path::PathBuf;

use castit_core::protocol::parse_volume;
use clap::Parser;

/// Cast a local file or URL to a Chromecast and stay around until playback ends.
#[derive(Debug, Parser)]
#[command(name = "castit", version, about)]
pub struct Cli {
    /// Friendly name of the target device.
    #[arg(short = 'd', long = "device", required_unless_present = "quit")]
    pub device: Option<String>,

    /// https:// URL, spotify: URI or local file path.
    #[arg(short = 'u', long = "uri", required_unless_present = "quit")]
    pub uri: Option<String>,

    /// Port for the local file server (defaults to the config value, 8000).
    #[arg(short = 'p', long = "servePort")]
    pub serve_port: Option<u16>,

    /// Device volume between 0.0 and 1.0.
    #[arg(
        short = 'v',
        long = "deviceVolume",
        value_parser = parse_volume,
        allow_negative_numbers = true
    )]
    pub device_volume: Option<f32>,

    /// Stop every other running castit instance and exit.
    #[arg(short = 'q', long = "quit")]
    pub quit: bool,

    #[arg(long)]
    pub debug: bool,

    /// Load the media paused.
    #[arg(long = "no-autoplay")]
    pub no_autoplay: bool,

    /// Use this config file instead of the default one.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn test_play_mode_flags() {
        let cli = Cli::try_parse_from([
            "castit",
            "-d",
            "Living Room",
            "--uri",
            "/music/song.mp3",
            "--servePort",
            "9000",
            "--deviceVolume",
            "0.4",
        ])
        .unwrap();
        assert_eq!(cli.device.as_deref(), Some("Living Room"));
        assert_eq!(cli.uri.as_deref(), Some("/music/song.mp3"));
        assert_eq!(cli.serve_port, Some(9000));
        assert_eq!(cli.device_volume, Some(0.4));
        assert!(!cli.quit);
        assert!(!cli.no_autoplay);
    }

    #[test]
    fn test_quit_needs_nothing_else() {
        let cli = Cli::try_parse_from(["castit", "-q"]).unwrap();
        assert!(cli.quit);
        assert!(cli.device.is_none());
    }

    #[test]
    fn test_device_and_uri_required_for_play() {
        let err = Cli::try_parse_from(["castit", "-u", "https://ex.com/a.mp4"]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn test_volume_out_of_range_is_a_usage_error() {
        for bad in ["1.1", "-0.1", "loud"] {
            let err = Cli::try_parse_from([
                "castit",
                "-d",
                "Kitchen",
                "-u",
                "https://ex.com/a.mp4",
                "-v",
                bad,
            ])
            .unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ValueValidation, "volume {}", bad);
        }
    }
}
