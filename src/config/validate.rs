// src/config/validate.rs

use std::collections::HashSet;

use crate::config::model::ConfigFile;
use crate::errors::{Result, TaskdagError};

/// Run basic semantic validation against a loaded configuration.
///
/// This checks:
/// - there is at least one task
/// - every task has a non-empty `name` and `type`
/// - task names are unique
///
/// It does **not** resolve `dependOn` or look for cycles; the orchestrator
/// does that while building the graph, where it can report a
/// dependency or cycle error with the real node set.
pub fn validate_config(cfg: &ConfigFile) -> Result<()> {
    ensure_has_tasks(cfg)?;
    validate_task_names(cfg)?;
    Ok(())
}

fn ensure_has_tasks(cfg: &ConfigFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(TaskdagError::config(
            "config must contain at least one [[task]] entry",
        ));
    }
    Ok(())
}

fn validate_task_names(cfg: &ConfigFile) -> Result<()> {
    let mut seen = HashSet::new();
    for (i, task) in cfg.task.iter().enumerate() {
        if task.name.trim().is_empty() {
            return Err(TaskdagError::config(format!("task #{i} has an empty name")));
        }
        if task.kind.trim().is_empty() {
            return Err(TaskdagError::config(format!(
                "task '{}' has an empty type",
                task.name
            )));
        }
        if !seen.insert(task.name.as_str()) {
            return Err(TaskdagError::config(format!(
                "task name '{}' is used more than once",
                task.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_from_str;

    #[test]
    fn empty_config_is_rejected() {
        let cfg = load_from_str("").unwrap();
        assert!(matches!(validate_config(&cfg), Err(TaskdagError::Config(_))));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let cfg = load_from_str(
            r#"
[[task]]
name = "A"
type = "echo"
echostr = "1"

[[task]]
name = "A"
type = "echo"
echostr = "2"
"#,
        )
        .unwrap();

        match validate_config(&cfg) {
            Err(TaskdagError::Config(msg)) => assert!(msg.contains("more than once")),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn parses_common_and_type_specific_fields() {
        let cfg = load_from_str(
            r#"
[config]
concurrent_limit = 5

[[task]]
name = "B"
type = "shell"
dependOn = ["A"]
shellcmd = "echo {name}"
shellcwd = "/tmp"

[[task]]
name = "A"
type = "echo"
echostr = "hello"
"#,
        )
        .unwrap();

        validate_config(&cfg).unwrap();
        assert_eq!(cfg.config.effective_concurrent_limit(), 5);
        assert_eq!(cfg.task[0].name, "B");
        assert_eq!(cfg.task[0].kind, "shell");
        assert_eq!(cfg.task[0].depend_on, vec!["A"]);
        assert_eq!(
            cfg.task[0].params.get("shellcmd").and_then(|v| v.as_str()),
            Some("echo {name}")
        );
        assert!(!cfg.task[0].params.contains_key("name"));
        assert!(cfg.task[1].depend_on.is_empty());
    }

    #[test]
    fn concurrent_limit_defaults_to_three() {
        let cfg = load_from_str("[[task]]\nname = \"A\"\ntype = \"echo\"\n").unwrap();
        assert_eq!(cfg.config.concurrent_limit, 3);

        let zero = load_from_str("[config]\nconcurrent_limit = 0\n").unwrap();
        assert_eq!(zero.config.effective_concurrent_limit(), 3);
    }

    #[test]
    fn missing_name_is_a_parse_error() {
        let err = load_from_str("[[task]]\ntype = \"echo\"\n").unwrap_err();
        assert!(matches!(err, TaskdagError::Toml(_)));
    }
}
