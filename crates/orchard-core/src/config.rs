use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use tracing::{debug, info, trace, warn};

use crate::task::Importance;

const DEFAULTS: [(&str, &str); 4] = [
    ("data.location", "~/.orchard"),
    ("default.command", "list"),
    ("default.importance", "none"),
    ("color", "on"),
];

/// Flat `key = value` settings read from an orchardrc file, with `rc.`
/// overrides layered on top.
#[derive(Debug, Clone)]
pub struct Config {
    map: BTreeMap<String, String>,
    pub loaded_files: Vec<PathBuf>,
}

#[derive(Debug, PartialEq, Eq)]
enum RcLine<'a> {
    Blank,
    Include(&'a str),
    Entry(&'a str, &'a str),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            map: DEFAULTS
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            loaded_files: vec![],
        }
    }
}

impl Config {
    #[tracing::instrument(skip(rc_override))]
    pub fn load(rc_override: Option<&Path>) -> anyhow::Result<Self> {
        let mut cfg = Config::default();

        match resolve_rc_path(rc_override)? {
            Some(path) => {
                info!(orchardrc = %path.display(), "loading orchardrc");
                cfg.load_file(&path)?;
            }
            None => warn!("no orchardrc found; using defaults"),
        }

        Ok(cfg)
    }

    #[tracing::instrument(skip(self, overrides))]
    pub fn apply_overrides<I>(&mut self, overrides: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (k, v) in overrides {
            let key = k.strip_prefix("rc.").unwrap_or(&k).to_string();
            debug!(key = %key, value = %v, "applying override");
            self.map.insert(key, v);
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).cloned()
    }

    pub fn get_bool(&self, key: &str) -> anyhow::Result<Option<bool>> {
        self.map.get(key).map(|v| parse_bool(key, v)).transpose()
    }

    pub fn default_importance(&self) -> anyhow::Result<Importance> {
        match self.map.get("default.importance") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("invalid default.importance: {raw}")),
            None => Ok(Importance::default()),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.map.iter()
    }

    #[tracing::instrument(skip(self))]
    fn load_file(&mut self, path: &Path) -> anyhow::Result<()> {
        let path = expand_tilde(path);
        if self.loaded_files.contains(&path) {
            warn!(file = %path.display(), "orchardrc already loaded; skipping include cycle");
            return Ok(());
        }

        let text = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        self.loaded_files.push(path.clone());

        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        for (line_num, raw_line) in text.lines().enumerate() {
            let parsed = parse_rc_line(raw_line).ok_or_else(|| {
                anyhow!(
                    "invalid config line {}:{}: {}",
                    path.display(),
                    line_num + 1,
                    raw_line
                )
            })?;

            match parsed {
                RcLine::Blank => {}
                RcLine::Include(include) => {
                    let include_path = resolve_include_path(&base_dir, include)?;
                    debug!(
                        file = %path.display(),
                        include = %include_path.display(),
                        line = line_num + 1,
                        "processing include"
                    );
                    if include_path.exists() {
                        self.load_file(&include_path)?;
                    } else {
                        warn!(include = %include_path.display(), "include file does not exist; skipping");
                    }
                }
                RcLine::Entry(key, value) => {
                    trace!(key, value, "loaded config key");
                    self.map.insert(key.to_string(), value.to_string());
                }
            }
        }

        Ok(())
    }
}

fn parse_rc_line(raw: &str) -> Option<RcLine<'_>> {
    let line = match raw.split_once('#') {
        Some((before, _)) => before.trim(),
        None => raw.trim(),
    };

    if line.is_empty() {
        return Some(RcLine::Blank);
    }
    if let Some(rest) = line.strip_prefix("include ") {
        return Some(RcLine::Include(rest.trim()));
    }

    let (k, v) = line.split_once('=')?;
    let key = k.trim();
    if key.is_empty() {
        return None;
    }
    Some(RcLine::Entry(key, v.trim()))
}

#[tracing::instrument(skip(cfg, override_dir))]
pub fn resolve_data_dir(cfg: &Config, override_dir: Option<&Path>) -> anyhow::Result<PathBuf> {
    let dir = match (override_dir, cfg.get("data.location")) {
        (Some(path), _) => path.to_path_buf(),
        (None, Some(location)) => expand_tilde(Path::new(&location)),
        (None, None) => home_dir()?.join(".orchard"),
    };

    if !dir.exists() {
        info!(dir = %dir.display(), "creating data directory");
        fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }

    Ok(dir)
}

fn resolve_rc_path(override_path: Option<&Path>) -> anyhow::Result<Option<PathBuf>> {
    if let Some(path) = override_path {
        return Ok(Some(path.to_path_buf()));
    }

    if let Ok(from_env) = std::env::var("ORCHARDRC") {
        if from_env == "/dev/null" {
            return Ok(None);
        }
        return Ok(Some(PathBuf::from(from_env)));
    }

    let candidate = home_dir()?.join(".orchardrc");
    Ok(candidate.exists().then_some(candidate))
}

fn home_dir() -> anyhow::Result<PathBuf> {
    dirs::home_dir().ok_or_else(|| anyhow!("cannot determine home directory"))
}

fn resolve_include_path(base_dir: &Path, include: &str) -> anyhow::Result<PathBuf> {
    if include.is_empty() {
        return Err(anyhow!("include path cannot be empty"));
    }

    let expanded = expand_tilde(Path::new(include));
    if expanded.is_absolute() {
        Ok(expanded)
    } else {
        Ok(base_dir.join(expanded))
    }
}

fn expand_tilde(path: &Path) -> PathBuf {
    let text = path.to_string_lossy();
    if let Some(rest) = text.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    path.to_path_buf()
}

fn parse_bool(key: &str, value: &str) -> anyhow::Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "y" | "yes" | "on" | "true" => Ok(true),
        "0" | "n" | "no" | "off" | "false" => Ok(false),
        other => Err(anyhow!("invalid boolean for {key}: {other}")),
    }
}
