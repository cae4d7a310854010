//! Array configuration (§10.3 of the expanded spec): the `snapraid.conf`
//! style line-oriented config, mirroring `state_config`/`lev_config_scan`'s
//! grammar. Parse errors accumulate so a user sees every problem in one
//! pass, not just the first.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskConfig {
    pub name: String,
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub block_size: u32,
    pub content_paths: Vec<PathBuf>,
    pub parity_paths: Vec<PathBuf>,
    pub disks: Vec<DiskConfig>,
    pub excludes: Vec<String>,
    /// Percent of changed blocks that triggers an autosave during `sync`;
    /// `0` disables autosave.
    pub autosave_percent: u32,
}

impl Config {
    /// Parses a `snapraid.conf`-style text file: one directive per line,
    /// `keyword value...`, `#` comments, blank lines ignored. Every
    /// malformed line is collected rather than stopping at the first.
    pub fn parse(path: &std::path::Path, text: &str) -> Result<Config, Vec<ConfigError>> {
        let mut content_paths = Vec::new();
        let mut parity_paths = Vec::new();
        let mut disks = Vec::new();
        let mut excludes = Vec::new();
        let mut block_size = 256 * 1024u32;
        let mut autosave_percent = 0u32;
        let mut errors = Vec::new();

        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.split_whitespace();
            let keyword = parts.next().unwrap();
            let rest: Vec<&str> = parts.collect();

            match keyword {
                "blocksize" => match rest.first().and_then(|s| s.parse::<u32>().ok()) {
                    Some(kib) => block_size = kib.saturating_mul(1024),
                    None => errors.push(ConfigError::Parse {
                        path: path.to_path_buf(),
                        line: lineno + 1,
                        message: "blocksize requires a numeric KiB value".into(),
                    }),
                },
                "autosave" => match rest.first().and_then(|s| s.parse::<u32>().ok()) {
                    Some(p) => autosave_percent = p,
                    None => errors.push(ConfigError::Parse {
                        path: path.to_path_buf(),
                        line: lineno + 1,
                        message: "autosave requires a numeric percentage".into(),
                    }),
                },
                "content" => match rest.first() {
                    Some(p) => content_paths.push(PathBuf::from(p)),
                    None => errors.push(ConfigError::Parse {
                        path: path.to_path_buf(),
                        line: lineno + 1,
                        message: "content requires a path".into(),
                    }),
                },
                "parity" | "z-parity" | "2-parity" | "3-parity" | "4-parity" | "5-parity" | "6-parity" => {
                    match rest.first() {
                        Some(p) => parity_paths.push(PathBuf::from(p)),
                        None => errors.push(ConfigError::Parse {
                            path: path.to_path_buf(),
                            line: lineno + 1,
                            message: format!("{keyword} requires a path"),
                        }),
                    }
                }
                "disk" => {
                    if rest.len() < 2 {
                        errors.push(ConfigError::Parse {
                            path: path.to_path_buf(),
                            line: lineno + 1,
                            message: "disk requires a name and a directory".into(),
                        });
                    } else {
                        disks.push(DiskConfig {
                            name: rest[0].to_string(),
                            dir: PathBuf::from(rest[1]),
                        });
                    }
                }
                "exclude" => match rest.first() {
                    Some(p) => excludes.push((*p).to_string()),
                    None => errors.push(ConfigError::Parse {
                        path: path.to_path_buf(),
                        line: lineno + 1,
                        message: "exclude requires a pattern".into(),
                    }),
                },
                other => errors.push(ConfigError::Parse {
                    path: path.to_path_buf(),
                    line: lineno + 1,
                    message: format!("unknown directive {other:?}"),
                }),
            }
        }

        if disks.is_empty() {
            errors.push(ConfigError::NoDisks);
        }
        if parity_paths.is_empty() {
            errors.push(ConfigError::NoParity);
        }
        if parity_paths.len() > 6 {
            errors.push(ConfigError::TooManyParityLevels(parity_paths.len()));
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(Config {
            block_size,
            content_paths,
            parity_paths,
            disks,
            excludes,
            autosave_percent,
        })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Config> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    const SAMPLE: &str = "\
        # example config\n\
        blocksize 256\n\
        autosave 10\n\
        content /srv/snapraid.content\n\
        parity /srv/parity/snapraid.parity\n\
        disk d1 /mnt/d1\n\
        disk d2 /mnt/d2\n\
        exclude *.tmp\n\
    ";

    #[test]
    fn parses_a_well_formed_config() {
        let cfg = Config::parse(Path::new("snapraid.conf"), SAMPLE).unwrap();
        assert_eq!(cfg.block_size, 256 * 1024);
        assert_eq!(cfg.autosave_percent, 10);
        assert_eq!(cfg.disks.len(), 2);
        assert_eq!(cfg.parity_paths.len(), 1);
        assert_eq!(cfg.excludes, vec!["*.tmp"]);
    }

    #[test]
    fn collects_every_error_in_one_pass() {
        let bad = "blocksize notanumber\nbogus keyword\n";
        let errs = Config::parse(Path::new("bad.conf"), bad).unwrap_err();
        // two per-line errors, plus no-disks and no-parity
        assert!(errs.len() >= 4);
    }

    #[test]
    fn json_round_trips() {
        let cfg = Config::parse(Path::new("snapraid.conf"), SAMPLE).unwrap();
        let json = cfg.to_json().unwrap();
        let back = Config::from_json(&json).unwrap();
        assert_eq!(back.block_size, cfg.block_size);
        assert_eq!(back.disks.len(), cfg.disks.len());
    }
}
