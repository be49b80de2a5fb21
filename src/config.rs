use crate::error::{RefgraphError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_CONFIG_FILE: &str = ".refgraph.toml";
pub const REPORT_BASENAME: &str = "reference_validation_report";
pub const FIX_LOG_FILE: &str = "reference_fix_log.json";

/// Analyzer settings, read from `.refgraph.toml`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Document file extensions (without the dot)
    pub extensions: Vec<String>,
    /// Globs matched against root-relative paths; .gitignore is not consulted
    pub ignore: Vec<String>,
    /// Dot-directories that are scanned anyway
    pub include_hidden: Vec<String>,
    /// Report output directory, relative to the corpus root
    pub report_dir: PathBuf,
    /// Rows shown in centrality tables
    pub top: usize,
    /// Worker threads for scan and repair (0 = one per CPU)
    pub jobs: usize,
    /// Attribute names recognized as `name="path"` references
    pub attribute_names: Vec<String>,
    /// Tag names recognized as `<name>path</name>` references
    pub tag_names: Vec<String>,
    /// Known relocations, old substring -> new substring
    pub relocations: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            extensions: vec!["md".to_string()],
            ignore: vec![
                "**/archive/**".to_string(),
                "**/backup*/**".to_string(),
                "internal/reports/**".to_string(),
            ],
            include_hidden: vec![".claude".to_string()],
            report_dir: PathBuf::from("internal/reports"),
            top: 10,
            jobs: 0,
            attribute_names: vec!["module".to_string()],
            tag_names: vec!["canonical_source".to_string()],
            relocations: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load a config file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Config::default());
        }

        let content = fs::read_to_string(path).map_err(|e| RefgraphError::io(path, e))?;
        let config = toml::from_str(&content).map_err(|source| RefgraphError::Config {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Merge a relocation table file over the configured relocations.
    ///
    /// `.toml` files are read as TOML, anything else as YAML. Both must be a
    /// flat map of old substring to new substring.
    pub fn merge_relocations_file(&mut self, path: &Path) -> Result<()> {
        let table = load_relocations(path)?;
        debug!(path = %path.display(), entries = table.len(), "merged relocation table");
        self.relocations.extend(table);
        Ok(())
    }

    /// Report directory resolved against the corpus root.
    pub fn report_dir_in(&self, root: &Path) -> PathBuf {
        if self.report_dir.is_absolute() {
            self.report_dir.clone()
        } else {
            root.join(&self.report_dir)
        }
    }
}

fn load_relocations(path: &Path) -> Result<BTreeMap<String, String>> {
    let content = fs::read_to_string(path).map_err(|e| RefgraphError::io(path, e))?;

    let is_toml = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);

    let table: BTreeMap<String, String> = if is_toml {
        toml::from_str(&content).map_err(|e| RefgraphError::Relocations {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?
    } else {
        serde_yaml::from_str(&content).map_err(|e| RefgraphError::Relocations {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?
    };

    if let Some((old, _)) = table.iter().find(|(old, _)| old.is_empty()) {
        return Err(RefgraphError::Relocations {
            path: path.to_path_buf(),
            reason: format!("empty old substring {:?}", old),
        });
    }

    Ok(table)
}
