//! famtask init command implementation
//!
//! Creates the default config and the data directory under the data root.

use std::path::{Path, PathBuf};

use super::Globals;
use crate::config::{Config, CONFIG_FILE};
use crate::error::{Error, Result};
use crate::model::Role;
use crate::output::{emit_success, HumanOutput};
use crate::storage::Storage;

#[derive(serde::Serialize)]
struct InitReport {
    root: PathBuf,
    data_dir: PathBuf,
    created: InitCreated,
}

#[derive(serde::Serialize)]
struct InitCreated {
    config: bool,
    data_dir: bool,
}

pub fn run(globals: &Globals) -> Result<()> {
    let root = globals.root();
    std::fs::create_dir_all(&root)?;

    let created_config = ensure_config(&root, globals)?;
    let config = Config::load_from_root(&root);
    let storage = Storage::new(config.storage.resolve(&root));
    let created_data_dir = !storage.is_initialized();
    storage.init()?;

    let report = InitReport {
        root: root.clone(),
        data_dir: storage.data_dir().to_path_buf(),
        created: InitCreated {
            config: created_config,
            data_dir: created_data_dir,
        },
    };

    let mut created_items = Vec::new();
    if created_config {
        created_items.push(CONFIG_FILE.to_string());
    }
    if created_data_dir {
        created_items.push(format!("{}/", config.storage.dir));
    }

    let header = if created_items.is_empty() {
        "famtask init: nothing to do".to_string()
    } else {
        "famtask init: initialized".to_string()
    };

    let mut human = HumanOutput::new(header);
    human.push_summary("root", root.display().to_string());
    human.push_summary(
        "created",
        if created_items.is_empty() {
            "none".to_string()
        } else {
            created_items.join(", ")
        },
    );
    if config.session.uid.is_none() {
        human.push_next_step("set session.uid and session.family_id in .famtask.toml");
    }
    human.push_next_step("famtask add \"<title>\" --date <YYYY-MM-DD>");

    emit_success(globals.output(), "init", &report, Some(&human))?;

    Ok(())
}

/// Write a default config seeded with any session flags given.
fn ensure_config(root: &Path, globals: &Globals) -> Result<bool> {
    let config_path = root.join(CONFIG_FILE);
    if config_path.exists() {
        if !config_path.is_file() {
            return Err(Error::OperationFailed(format!(
                "{CONFIG_FILE} exists but is not a file: {}",
                config_path.display()
            )));
        }
        return Ok(false);
    }

    let mut config = Config::default();
    config.session.uid = globals.uid.clone();
    config.session.family_id = globals.family.clone();
    config.session.name = globals.name.clone();
    if let Some(role) = &globals.role {
        config.session.role = role.parse::<Role>()?.as_str().to_string();
    }
    config.save(&config_path)?;
    Ok(true)
}
