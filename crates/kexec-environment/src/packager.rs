// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Artifact packager.
//!
//! Wraps raw user code with the runtime's parameter handling so the result can
//! be executed directly as the container entrypoint.

use crate::error::{Error, Result};
use crate::templates;

/// Environment variable carrying the serialized invocation parameters.
pub const PARAMS_ENV_VAR: &str = "SERVERLESS_PARAMS";

/// Package user code into an executable artifact for `runtime_id`.
///
/// `entrypoint` names the function the artifact calls with the decoded
/// parameters; it must be a plain identifier.
pub fn package(runtime_id: &str, code: &str, entrypoint: &str) -> Result<String> {
    if runtime_id.trim().is_empty() {
        return Err(Error::InvalidInput("No runtime selected".to_string()));
    }
    if code.trim().is_empty() {
        return Err(Error::InvalidInput("Function code is empty".to_string()));
    }
    if entrypoint.is_empty() {
        return Err(Error::InvalidInput("Function name is empty".to_string()));
    }
    if !is_identifier(entrypoint) {
        return Err(Error::InvalidInput(format!(
            "Function name '{}' must start with a letter or underscore and contain only letters, digits and underscores",
            entrypoint
        )));
    }

    let template = templates::lookup(runtime_id)?;

    // Code goes in last so placeholder-like text in user code is left alone
    let artifact = template
        .wrapper
        .replace("{{params_env}}", PARAMS_ENV_VAR)
        .replace("{{entrypoint}}", entrypoint)
        .replacen("{{code}}", code.trim_end(), 1);

    Ok(artifact)
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
