//! Playbook loading with invariant validation.

use std::path::Path;

use anyhow::{Result, anyhow};

use crate::core::invariants::validate_playbook;
use crate::io::document::read_document;
use crate::playbook::Playbook;

/// Load a playbook from `.yaml`, `.yml` or `.json` without validating it.
pub fn read_playbook(path: &Path) -> Result<Playbook> {
    Ok(read_document(path)?)
}

/// Load and validate a playbook.
pub fn load_playbook(path: &Path) -> Result<Playbook> {
    let playbook = read_playbook(path)?;
    let errors = validate_playbook(&playbook);
    if !errors.is_empty() {
        return Err(anyhow!(
            "playbook invariants failed:\n- {}",
            errors.join("\n- ")
        ));
    }
    Ok(playbook)
}
