use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Non-secret defaults loaded from `$XDG_CONFIG_HOME/rsm/config.json`, read
/// once at startup. CLI flags and environment variables always win over
/// these — the file only fills in values the user didn't otherwise set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CliDefaults {
    #[serde(default)]
    pub registry_url: Option<String>,
    #[serde(default)]
    pub index_url: Option<String>,
    #[serde(default)]
    pub index_name: Option<String>,
    #[serde(default)]
    pub lost_index_name: Option<String>,
}

impl CliDefaults {
    fn normalize(&mut self) {
        for field in [
            &mut self.registry_url,
            &mut self.index_url,
            &mut self.index_name,
            &mut self.lost_index_name,
        ] {
            *field = field.as_ref().map(|s| s.trim().to_string());
            if matches!(field.as_deref(), Some(s) if s.is_empty()) {
                *field = None;
            }
        }
    }
}

fn xdg_config_home() -> anyhow::Result<PathBuf> {
    if let Some(dir) = std::env::var_os("XDG_CONFIG_HOME") {
        let dir = PathBuf::from(dir);
        if dir.as_os_str().is_empty() {
            anyhow::bail!("XDG_CONFIG_HOME is set but empty");
        }
        return Ok(dir);
    }

    let home = std::env::var_os("HOME").ok_or_else(|| anyhow::anyhow!("HOME is not set"))?;
    let home = PathBuf::from(home);
    if home.as_os_str().is_empty() {
        anyhow::bail!("HOME is set but empty");
    }
    Ok(home.join(".config"))
}

pub fn config_path() -> anyhow::Result<PathBuf> {
    Ok(xdg_config_home()?.join("rsm").join("config.json"))
}

pub fn load_defaults() -> anyhow::Result<CliDefaults> {
    let path = config_path()?;
    if !path.exists() {
        return Ok(CliDefaults::default());
    }
    let raw = std::fs::read_to_string(&path)?;
    let mut cfg: CliDefaults = serde_json::from_str(&raw)?;
    cfg.normalize();
    Ok(cfg)
}

pub fn save_defaults(cfg: &CliDefaults) -> anyhow::Result<()> {
    let path = config_path()?;
    let dir = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("invalid config path: {}", path.display()))?;
    std::fs::create_dir_all(dir)?;

    let mut cfg = cfg.clone();
    cfg.normalize();

    let json = serde_json::to_string_pretty(&cfg)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_trims_and_drops_empty_strings() {
        let mut cfg = CliDefaults {
            registry_url: Some("  https://example.test/  ".to_string()),
            index_url: Some("   ".to_string()),
            index_name: None,
            lost_index_name: Some("lost".to_string()),
        };
        cfg.normalize();
        assert_eq!(cfg.registry_url.as_deref(), Some("https://example.test/"));
        assert_eq!(cfg.index_url, None);
        assert_eq!(cfg.lost_index_name.as_deref(), Some("lost"));
    }
}
