// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Runtime templates.
//!
//! Each supported runtime is one [`RuntimeTemplate`] entry: the Dockerfile
//! written into the build context and the wrapper that turns user code into
//! the executable artifact. Adding a runtime is adding a row to [`RUNTIMES`].
//!
//! Wrapper placeholders:
//!
//! | Placeholder | Replaced with |
//! |-------------|---------------|
//! | `{{params_env}}` | Environment variable carrying the parameters |
//! | `{{entrypoint}}` | Function invoked with the decoded parameters |
//! | `{{code}}` | Raw user code |

use crate::error::{Error, Result};

/// Build and packaging descriptor for one runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeTemplate {
    /// Runtime identifier as stored with the function (e.g. `python27`).
    pub id: &'static str,
    /// Base image the Dockerfile starts from.
    pub base_image: &'static str,
    /// Dockerfile contents.
    pub dockerfile: &'static str,
    /// Artifact wrapper with placeholders.
    pub wrapper: &'static str,
}

/// Python wrapper. Valid for both 2.7 and 3.x.
///
/// Exit codes: 0 success, 1 uncaught exception, 2 malformed parameters.
const PYTHON_WRAPPER: &str = r#"import json
import os
import sys

{{code}}


def __kexec_main():
    raw = os.environ.get("{{params_env}}", "")
    if raw.strip():
        try:
            params = json.loads(raw)
        except ValueError as e:
            sys.stderr.write("Invalid JSON parameters: %s\n" % e)
            sys.exit(2)
    else:
        params = {}
    try:
        {{entrypoint}}(params)
    except Exception as e:
        sys.stderr.write("%s: %s\n" % (type(e).__name__, e))
        sys.exit(1)


if __name__ == "__main__":
    __kexec_main()
"#;

/// All runtimes known to the packager and builder.
pub static RUNTIMES: &[RuntimeTemplate] = &[
    RuntimeTemplate {
        id: "python27",
        base_image: "python:2.7",
        dockerfile: "FROM python:2.7\nADD . ./\nENTRYPOINT [ \"python\", \"exec\" ]\n",
        wrapper: PYTHON_WRAPPER,
    },
    RuntimeTemplate {
        id: "python3",
        base_image: "python:3.12-slim",
        dockerfile: "FROM python:3.12-slim\nADD . ./\nENTRYPOINT [ \"python\", \"exec\" ]\n",
        wrapper: PYTHON_WRAPPER,
    },
];

/// Look up the template for a runtime identifier.
pub fn lookup(runtime_id: &str) -> Result<&'static RuntimeTemplate> {
    RUNTIMES
        .iter()
        .find(|t| t.id == runtime_id)
        .ok_or_else(|| Error::UnsupportedRuntime(runtime_id.to_string()))
}

/// Identifiers of all supported runtimes.
pub fn supported() -> impl Iterator<Item = &'static str> {
    RUNTIMES.iter().map(|t| t.id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_known_runtimes() {
        let py27 = lookup("python27").unwrap();
        assert_eq!(py27.base_image, "python:2.7");
        assert!(py27.dockerfile.starts_with("FROM python:2.7\n"));
        assert!(py27.dockerfile.contains("ENTRYPOINT [ \"python\", \"exec\" ]"));

        let py3 = lookup("python3").unwrap();
        assert!(py3.dockerfile.starts_with("FROM python:3.12-slim\n"));
    }

    #[test]
    fn test_lookup_unknown_runtime() {
        let err = lookup("cobol").unwrap_err();
        assert!(matches!(err, Error::UnsupportedRuntime(id) if id == "cobol"));
    }

    #[test]
    fn test_runtime_ids_are_unique() {
        let mut ids: Vec<_> = supported().collect();
        let total = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), total);
    }

    #[test]
    fn test_every_dockerfile_uses_its_base_image() {
        for template in RUNTIMES {
            assert!(
                template
                    .dockerfile
                    .starts_with(&format!("FROM {}\n", template.base_image)),
                "{} Dockerfile does not start from its base image",
                template.id
            );
        }
    }
}
