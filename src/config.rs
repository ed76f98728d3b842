use std::env;
use std::path::{Path, PathBuf};

use log::debug;

use crate::data::model::Panel;

/// Extensions tried, in order, when discovering reference files in a directory.
const EXTENSIONS: [&str; 3] = ["parquet", "csv", "json"];

// ---------------------------------------------------------------------------
// ReferenceConfig – where the three reference sources live
// ---------------------------------------------------------------------------

/// Paths of the spirometry, diffusion and lung-volume reference sources.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceConfig {
    pub spirometry: PathBuf,
    pub diffusion: PathBuf,
    pub volumes: PathBuf,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            spirometry: PathBuf::from("lookuptables.csv"),
            diffusion: PathBuf::from("lookuptablesdlco.csv"),
            volumes: PathBuf::from("lookuptablesvol.csv"),
        }
    }
}

impl ReferenceConfig {
    /// File stem used for each source when discovering files in a directory.
    pub fn stem(panel: Panel) -> &'static str {
        match panel {
            Panel::Spirometry => "lookuptables",
            Panel::Diffusion => "lookuptablesdlco",
            Panel::Volumes => "lookuptablesvol",
        }
    }

    /// Pick, for each source, the first existing `<stem>.{parquet,csv,json}`
    /// in `dir`. Falls back to `<stem>.csv` so a later load names the path
    /// it expected.
    pub fn from_dir(dir: &Path) -> Self {
        let find = |panel: Panel| {
            let stem = Self::stem(panel);
            EXTENSIONS
                .iter()
                .map(|ext| dir.join(format!("{stem}.{ext}")))
                .find(|p| p.is_file())
                .unwrap_or_else(|| dir.join(format!("{stem}.csv")))
        };
        Self {
            spirometry: find(Panel::Spirometry),
            diffusion: find(Panel::Diffusion),
            volumes: find(Panel::Volumes),
        }
    }

    /// Build from the environment.
    ///
    /// * `GLI_TABLES_DIR` – base directory (default: current directory)
    /// * `GLI_SPIROMETRY_TABLES`, `GLI_DIFFUSION_TABLES`, `GLI_VOLUME_TABLES` –
    ///   override individual files
    pub fn from_env() -> Self {
        let mut config = match env::var_os("GLI_TABLES_DIR") {
            Some(dir) => Self::from_dir(Path::new(&dir)),
            None => Self::from_dir(Path::new(".")),
        };
        for panel in Panel::ALL {
            if let Some(path) = env::var_os(Self::env_key(panel)) {
                debug!("{} overridden to {:?}", Self::env_key(panel), path);
                *config.path_for_mut(panel) = PathBuf::from(path);
            }
        }
        config
    }

    pub fn env_key(panel: Panel) -> &'static str {
        match panel {
            Panel::Spirometry => "GLI_SPIROMETRY_TABLES",
            Panel::Diffusion => "GLI_DIFFUSION_TABLES",
            Panel::Volumes => "GLI_VOLUME_TABLES",
        }
    }

    pub fn path_for(&self, panel: Panel) -> &Path {
        match panel {
            Panel::Spirometry => &self.spirometry,
            Panel::Diffusion => &self.diffusion,
            Panel::Volumes => &self.volumes,
        }
    }

    fn path_for_mut(&mut self, panel: Panel) -> &mut PathBuf {
        match panel {
            Panel::Spirometry => &mut self.spirometry,
            Panel::Diffusion => &mut self.diffusion,
            Panel::Volumes => &mut self.volumes,
        }
    }
}
