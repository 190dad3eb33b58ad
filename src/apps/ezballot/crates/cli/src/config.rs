use anyhow::Result;
use clap::Args;
use confique::Config;
use ezballot_core::FinalizePolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Utility function to expand $HOME in a PathBuf
pub fn expand_home_in_path(path: &PathBuf) -> Result<PathBuf> {
    let home_dir = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    let path_str = path
        .to_str()
        .ok_or_else(|| anyhow::anyhow!("Invalid UTF-8 in path"))?;

    if path_str.contains("$HOME") {
        let expanded = path_str.replace("$HOME", home_dir.to_str().unwrap_or("."));
        Ok(PathBuf::from(expanded))
    } else {
        Ok(path.clone())
    }
}

#[derive(Config, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[config(nested)]
    pub store: StoreConfig,

    #[config(nested)]
    pub identity: IdentityConfig,

    #[config(nested)]
    pub voting: VotingConfig,
}

#[derive(Clone, Config, Deserialize, Serialize, Default)]
pub struct StoreConfig {
    /// The file holding every session
    #[config(default = "$HOME/.ezballot/sessions.cbor", env = "EZBALLOT_STORE")]
    pub store_path: PathBuf,
}

#[derive(Clone, Config, Deserialize, Serialize, Default)]
pub struct IdentityConfig {
    /// Identity used when a command is run without --as
    #[config(env = "EZBALLOT_IDENTITY")]
    pub default_identity: Option<String>,
}

#[derive(Clone, Config, Deserialize, Serialize, Default)]
pub struct VotingConfig {
    /// Who may end a session after its deadline: owner or anyone (defaults to owner)
    pub finalize: Option<FinalizePolicy>,
}

/// Command-line values that take precedence over every other config source
#[derive(Args, Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// The file holding every session
    #[arg(long)]
    pub store_path: Option<PathBuf>,

    /// Identity used when a command is run without --as
    #[arg(long)]
    pub default_identity: Option<String>,

    /// Who may end a session after its deadline: owner or anyone
    #[arg(long)]
    pub finalize: Option<FinalizePolicy>,
}

impl AppConfig {
    /// Apply command-line overrides on top of the loaded values
    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(store_path) = overrides.store_path {
            self.store.store_path = store_path;
        }
        if let Some(identity) = overrides.default_identity {
            self.identity.default_identity = Some(identity);
        }
        if let Some(finalize) = overrides.finalize {
            self.voting.finalize = Some(finalize);
        }
        self
    }

    /// Resolve all potential $HOME placeholders in configuration paths
    pub fn with_resolved_paths(mut self) -> Result<Self> {
        self.store.store_path = expand_home_in_path(&self.store.store_path)?;
        Ok(self)
    }

    pub fn finalize_policy(&self) -> FinalizePolicy {
        self.voting.finalize.unwrap_or_default()
    }
}
