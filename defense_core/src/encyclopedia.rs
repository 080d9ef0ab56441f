//! Static table of known unit types, used to derive map symbology at ingest.

use std::{
    collections::HashMap,
    env, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use defense_rpc::Coalition;
use serde::Deserialize;
use thiserror::Error;

use crate::unit::Symbology;

pub const BUILTIN_ENCYCLOPEDIA: &str = include_str!("data/encyclopedia.yaml");
pub const ENCYCLOPEDIA_PATH_ENV: &str = "AIR_DEFENSE_ENCYCLOPEDIA_PATH";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UnitEntry {
    pub name: String,
    pub code: String,
    pub symbol_set: String,
    pub mil_std_2525_d: String,
    #[serde(default)]
    pub dcs_codes: Vec<String>,
}

#[derive(Debug, Error)]
pub enum EncyclopediaError {
    #[error("failed to parse encyclopedia: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("failed to read encyclopedia from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("entry '{name}': {reason}")]
    InvalidEntry { name: String, reason: &'static str },
}

/// Lookup from wire type code to encyclopedia entry.
#[derive(Debug, Clone, Default)]
pub struct Encyclopedia {
    entries: Vec<UnitEntry>,
    by_code: HashMap<String, usize>,
}

fn all_digits(value: &str, len: usize) -> bool {
    value.len() == len && value.bytes().all(|b| b.is_ascii_digit())
}

impl Encyclopedia {
    pub fn from_entries(entries: Vec<UnitEntry>) -> Result<Self, EncyclopediaError> {
        let mut by_code = HashMap::new();
        for (index, entry) in entries.iter().enumerate() {
            if !all_digits(&entry.symbol_set, 2) {
                return Err(EncyclopediaError::InvalidEntry {
                    name: entry.name.clone(),
                    reason: "symbol_set must be two digits",
                });
            }
            if !all_digits(&entry.mil_std_2525_d, 6) {
                return Err(EncyclopediaError::InvalidEntry {
                    name: entry.name.clone(),
                    reason: "mil_std_2525_d must be a six digit entity code",
                });
            }
            for code in &entry.dcs_codes {
                // First entry claiming a code keeps it.
                by_code.entry(code.clone()).or_insert(index);
            }
        }
        Ok(Self { entries, by_code })
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self, EncyclopediaError> {
        let entries: Vec<UnitEntry> = serde_yaml::from_str(yaml)?;
        Self::from_entries(entries)
    }

    pub fn from_file(path: &Path) -> Result<Self, EncyclopediaError> {
        let contents = fs::read_to_string(path).map_err(|source| EncyclopediaError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&contents)
    }

    pub fn builtin() -> Result<Self, EncyclopediaError> {
        Self::from_yaml_str(BUILTIN_ENCYCLOPEDIA)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry whose wire codes include `type_name`, if any.
    pub fn resolve_by_code(&self, type_name: &str) -> Option<&UnitEntry> {
        self.by_code
            .get(type_name)
            .and_then(|index| self.entries.get(*index))
    }

    /// Symbology for a unit of `type_name` fielded by `coalition`. Unknown
    /// types have none.
    pub fn symbology_for(&self, coalition: Coalition, type_name: &str) -> Option<Symbology> {
        let entry = self.resolve_by_code(type_name)?;
        Some(Symbology::from_sidc(format!(
            "10{context}{identity}{symbol_set}{status}{hq}{amplifier}{entity}{modifiers}",
            context = 0,
            identity = standard_identity(coalition),
            symbol_set = entry.symbol_set,
            status = 0,
            hq = 0,
            amplifier = "00",
            entity = entry.mil_std_2525_d,
            modifiers = "0000",
        )))
    }
}

fn standard_identity(coalition: Coalition) -> char {
    match coalition {
        Coalition::RED => '6',
        Coalition::BLUE => '3',
        Coalition::NEUTRAL => '4',
        _ => '1',
    }
}

/// Load the encyclopedia from `AIR_DEFENSE_ENCYCLOPEDIA_PATH`, falling back to
/// the built-in table.
pub fn load_encyclopedia_from_env() -> Result<Arc<Encyclopedia>, EncyclopediaError> {
    if let Some(path) = env::var(ENCYCLOPEDIA_PATH_ENV).ok().map(PathBuf::from) {
        match Encyclopedia::from_file(&path) {
            Ok(encyclopedia) => {
                tracing::info!(
                    target: "air_defense::config",
                    path = %path.display(),
                    entries = encyclopedia.len(),
                    "encyclopedia.loaded=file"
                );
                return Ok(Arc::new(encyclopedia));
            }
            Err(err) => {
                tracing::warn!(
                    target: "air_defense::config",
                    path = %path.display(),
                    error = %err,
                    "encyclopedia.load_failed"
                );
            }
        }
    }

    let encyclopedia = Encyclopedia::builtin()?;
    tracing::info!(
        target: "air_defense::config",
        entries = encyclopedia.len(),
        "encyclopedia.loaded=builtin"
    );
    Ok(Arc::new(encyclopedia))
}
