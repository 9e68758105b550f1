use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::BillingResult;

pub const CONFIG_FILE_NAME: &str = "freight-billing.json";
pub const DB_FILE_NAME: &str = "billing_app.db";
pub const ENV_DB_PATH: &str = "FREIGHT_BILLING_DB";
pub const ENV_LOG_LEVEL: &str = "FREIGHT_BILLING_LOG";

/// Firm details printed at the top and bottom of every main bill.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Letterhead {
    pub firm_name: String,
    #[serde(default)]
    pub tagline: String,
    #[serde(default)]
    pub address_lines: Vec<String>,
    #[serde(default)]
    pub gstin: String,
    #[serde(default)]
    pub rail_head: String,
    #[serde(default = "default_signature_label")]
    pub signature_label: String,
}

fn default_signature_label() -> String {
    "For the Firm".to_string()
}

impl Default for Letterhead {
    fn default() -> Self {
        Self {
            firm_name: "M/S. SHAN ENTERPRISES".to_string(),
            tagline: "Clearing & Transporting Contractor".to_string(),
            address_lines: vec![
                "21/4185 C, Meenchandathally, Gate".to_string(),
                "P.O. Arts College Calicut - 673018".to_string(),
                "Mob: 9447004108".to_string(),
            ],
            gstin: "GST32ACNFSB060K1ZP".to_string(),
            rail_head: "WESTHILL RH".to_string(),
            signature_label: "For M/S. SHAN ENTERPRISES".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub letterhead: Letterhead,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            cache_dir: None,
            output_dir: None,
            log_level: default_log_level(),
            letterhead: Letterhead::default(),
        }
    }
}

impl AppConfig {
    /// Reads `path` if given, otherwise the first existing config among the
    /// candidate locations; falls back to defaults. Environment overrides win.
    pub fn load(path: Option<&Path>) -> BillingResult<Self> {
        let found = match path {
            Some(p) => Some(p.to_path_buf()),
            None => config_candidates().into_iter().find(|p| p.exists()),
        };

        let mut cfg = match found {
            Some(p) => {
                debug!(path = %p.display(), "loading config");
                let json = fs::read_to_string(&p)?;
                serde_json::from_str::<AppConfig>(&json)?
            }
            None => AppConfig::default(),
        };
        cfg.apply_env();
        Ok(cfg)
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var(ENV_DB_PATH) {
            if !v.trim().is_empty() {
                self.database_path = Some(PathBuf::from(v.trim()));
            }
        }
        if let Ok(v) = std::env::var(ENV_LOG_LEVEL) {
            if !v.trim().is_empty() {
                self.log_level = v.trim().to_string();
            }
        }
    }

    pub fn resolve_db_path(&self) -> PathBuf {
        if let Some(p) = &self.database_path {
            return p.clone();
        }
        let candidates = data_dir_candidates()
            .into_iter()
            .map(|d| d.join(DB_FILE_NAME))
            .collect::<Vec<_>>();
        for p in &candidates {
            if p.exists() {
                return p.clone();
            }
        }
        candidates
            .into_iter()
            .next()
            .unwrap_or_else(|| PathBuf::from(DB_FILE_NAME))
    }

    pub fn resolve_cache_dir(&self) -> PathBuf {
        match &self.cache_dir {
            Some(p) => p.clone(),
            None => self
                .resolve_db_path()
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
        }
    }

    pub fn resolve_output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_default())
    }
}

fn data_dir_candidates() -> Vec<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            candidates.push(dir.to_path_buf());
        }
    }
    candidates
}

fn config_candidates() -> Vec<PathBuf> {
    data_dir_candidates()
        .into_iter()
        .map(|d| d.join(CONFIG_FILE_NAME))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, r#"{ "databasePath": "/tmp/x.db", "letterhead": { "firmName": "ACME" } }"#)
            .unwrap();

        let cfg = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.letterhead.firm_name, "ACME");
        assert_eq!(cfg.letterhead.signature_label, "For the Firm");
        assert!(cfg.letterhead.address_lines.is_empty());
        assert!(cfg.output_dir.is_none());
    }

    #[test]
    fn explicit_database_path_wins() {
        let cfg = AppConfig {
            database_path: Some(PathBuf::from("/data/bills.db")),
            ..AppConfig::default()
        };
        assert_eq!(cfg.resolve_db_path(), PathBuf::from("/data/bills.db"));
        assert_eq!(cfg.resolve_cache_dir(), PathBuf::from("/data"));
    }
}
