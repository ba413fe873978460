use std::path::Path;

use log::{info, warn};

pub const DEFAULT_CONFIG_PATH: &str = "compiled/default.uconf";
pub const DEFAULT_VOLUME_PATH: &str = "omni_fs.omni";
pub const DEFAULT_PORT: u16 = 8080;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    pub port: u16,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self { port: DEFAULT_PORT }
    }
}

fn clean(value: &str) -> &str {
    value.trim_matches(|c: char| c.is_whitespace() || c == '"')
}

/// Parse a line-oriented `key = value` config file. Lines starting with `#`
/// or `[` are ignored, as is every key other than `port`. A missing or
/// unreadable file is not an error; defaults apply.
pub fn load_config(path: &Path) -> DaemonConfig {
    let mut config = DaemonConfig::default();
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            warn!(
                "config {} not readable ({}), using defaults",
                path.display(),
                err
            );
            return config;
        }
    };

    for line in text.lines() {
        let line = line.trim_start();
        if line.is_empty() || line.starts_with('#') || line.starts_with('[') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match clean(key) {
            "port" => match clean(value).parse::<u16>() {
                Ok(port) => config.port = port,
                Err(_) => warn!("ignoring invalid port value: {}", clean(value)),
            },
            _ => {}
        }
    }

    info!("configuration loaded, port {}", config.port);
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("create temp config");
        file.write_all(contents.as_bytes()).expect("write config");
        file
    }

    #[test]
    fn test_parses_port_and_skips_noise() {
        let file = write_config(
            "# server settings\n\
             [network]\n\
             \n\
             port = \"9000\"\n\
             unknown = 5\n",
        );
        assert_eq!(load_config(file.path()).port, 9000);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = load_config(Path::new("/nonexistent/omni.uconf"));
        assert_eq!(config, DaemonConfig::default());
    }

    #[test]
    fn test_invalid_port_is_ignored() {
        let file = write_config("port = not_a_number\n");
        assert_eq!(load_config(file.path()).port, DEFAULT_PORT);
    }
}
