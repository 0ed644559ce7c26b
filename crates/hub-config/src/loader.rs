//! YAML documents with hub tags resolved
//!
//! `!include <file>` splices in another document, relative to the file that
//! names it. `!env_var <NAME>` is replaced by the variable's value; numbers
//! and booleans keep their YAML type. Any other tag is rejected.

use serde_yaml::value::TaggedValue;
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use crate::error::{ConfigError, ConfigResult};

/// Read `path` and resolve every tag in it
pub fn load_yaml(path: impl AsRef<Path>) -> ConfigResult<Value> {
    Resolver::default().load(path.as_ref())
}

/// Files currently being resolved, outermost first
#[derive(Default)]
struct Resolver {
    open: Vec<PathBuf>,
}

impl Resolver {
    fn load(&mut self, path: &Path) -> ConfigResult<Value> {
        let key = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        if self.open.contains(&key) {
            return Err(ConfigError::IncludeCycle {
                path: path.to_path_buf(),
            });
        }

        debug!(?path, depth = self.open.len(), "Reading config document");
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let document: Value = serde_yaml::from_str(&text).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;

        self.open.push(key);
        let resolved = self.resolve(document, path);
        self.open.pop();
        resolved
    }

    fn resolve(&mut self, value: Value, file: &Path) -> ConfigResult<Value> {
        match value {
            Value::Tagged(tagged) => self.resolve_tag(*tagged, file),
            Value::Mapping(entries) => entries
                .into_iter()
                .map(|(key, value)| Ok((key, self.resolve(value, file)?)))
                .collect::<ConfigResult<Mapping>>()
                .map(Value::Mapping),
            Value::Sequence(items) => items
                .into_iter()
                .map(|item| self.resolve(item, file))
                .collect::<ConfigResult<Vec<_>>>()
                .map(Value::Sequence),
            scalar => Ok(scalar),
        }
    }

    fn resolve_tag(&mut self, tagged: TaggedValue, file: &Path) -> ConfigResult<Value> {
        let tag = tagged.tag.to_string();
        let tag_error = |message: String| ConfigError::Tag {
            tag: tag.clone(),
            path: file.to_path_buf(),
            message,
        };
        let Value::String(argument) = tagged.value else {
            return Err(tag_error("expects a plain string".into()));
        };
        trace!(%tag, %argument, "Resolving tag");

        match tag.as_str() {
            "!include" => {
                let target = file
                    .parent()
                    .unwrap_or_else(|| Path::new("."))
                    .join(&argument);
                self.load(&target)
            }
            "!env_var" => {
                let raw = std::env::var(&argument)
                    .map_err(|_| tag_error(format!("{argument} is not set")))?;
                Ok(env_scalar(raw))
            }
            _ => Err(tag_error("unsupported tag".into())),
        }
    }
}

fn env_scalar(raw: String) -> Value {
    match serde_yaml::from_str::<Value>(&raw) {
        Ok(Value::Bool(b)) => Value::Bool(b),
        Ok(Value::Number(n)) => Value::Number(n),
        _ => Value::String(raw),
    }
}
