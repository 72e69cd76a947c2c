use std::net::IpAddr;
use std::path::PathBuf;

use tracing::warn;

pub const APP_NAME: &str = "castit";

/// Default port for the ephemeral file server.
pub const DEFAULT_SERVE_PORT: u16 = 8000;

pub fn data_dir() -> PathBuf {
    // On macOS and Linux, use ~/.local/share/castit/ (XDG standard)
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join(".local")
            .join("share")
            .join(APP_NAME)
    }
    #[cfg(windows)]
    {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_NAME)
    }
}

pub fn config_dir() -> PathBuf {
    #[cfg(unix)]
    {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config")
            .join(APP_NAME)
    }
    #[cfg(windows)]
    {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_NAME)
    }
}

/// LAN address the playback device should use to reach us.
/// Falls back to loopback when no routable interface is found.
pub fn local_address() -> IpAddr {
    match local_ip_address::local_ip() {
        Ok(ip) => ip,
        Err(e) => {
            warn!("platform: no local network address ({}), using 127.0.0.1", e);
            IpAddr::from([127, 0, 0, 1])
        }
    }
}

/// File name of the running executable, used to recognise sibling instances.
pub fn current_executable_name() -> Option<String> {
    let exe = std::env::current_exe().ok()?;
    exe.file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dirs_are_namespaced() {
        assert!(data_dir().ends_with(APP_NAME));
        assert!(config_dir().ends_with(APP_NAME));
    }

    #[test]
    fn test_local_address() {
        // May be loopback in sandboxes without a network, but never unspecified.
        let ip = local_address();
        assert!(!ip.is_unspecified());
    }
}
