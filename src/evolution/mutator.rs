//! Turns a hypothesis into validated file mutations with rollback data.

use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

use super::types::{Hypothesis, HypothesisKind, Mutation, MutationKind, SafetyCheck};

const CONFIG_EXTENSIONS: &[&str] = &["json", "yaml", "yml", "toml"];
const CONFIG_NAMES: &[&str] = &["config", "settings", "options"];
const PROMPT_EXTENSIONS: &[&str] = &["txt", "md", "prompt"];

/// Mutator configuration.
#[derive(Debug, Clone)]
pub struct MutatorConfig {
    /// Repository the mutations target.
    pub working_dir: PathBuf,
    /// Global configuration directory scanned in addition to the target
    /// component (relative to `working_dir`).
    pub global_config_dir: Option<PathBuf>,
    pub max_mutations_per_hypothesis: usize,
    /// Copy pre-images into `backup_dir` before applying.
    pub enable_backups: bool,
    pub backup_dir: Option<PathBuf>,
}

impl MutatorConfig {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            global_config_dir: Some(PathBuf::from("config")),
            max_mutations_per_hypothesis: 10,
            enable_backups: true,
            backup_dir: None,
        }
    }
}

/// Generates, applies, and reverts mutations.
pub struct CodeMutator {
    config: MutatorConfig,
}

impl CodeMutator {
    pub fn new(config: MutatorConfig) -> Self {
        Self { config }
    }

    /// Produce the mutation set for a hypothesis. Architecture changes are
    /// unsupported until a real transformer is provided and yield an empty
    /// set.
    pub fn generate_mutations(&self, hypothesis: &Hypothesis) -> Result<Vec<Mutation>> {
        let mut mutations = match hypothesis.kind {
            HypothesisKind::ParameterTuning => self.config_value_mutations(
                hypothesis,
                MutationKind::ParameterUpdate,
                &self.find_config_files(&hypothesis.target_component, |_| true),
            )?,
            HypothesisKind::ArchitectureChange => {
                tracing::warn!(
                    hypothesis = %hypothesis.id,
                    "architecture-change mutations are unsupported; skipping"
                );
                Vec::new()
            }
            HypothesisKind::PromptOptimization => self.prompt_mutations(hypothesis)?,
            HypothesisKind::ModelOptimization => self.config_value_mutations(
                hypothesis,
                MutationKind::ConfigChange,
                &self.find_config_files(&hypothesis.target_component, |name| {
                    name.contains("model") || name.contains("config")
                }),
            )?,
        };

        mutations.truncate(self.config.max_mutations_per_hypothesis);
        Ok(mutations)
    }

    /// Configuration files under the target component and the global config
    /// directory, filtered by file-name predicate.
    fn find_config_files(&self, target: &str, accept: impl Fn(&str) -> bool) -> Vec<PathBuf> {
        let mut roots = vec![self.config.working_dir.join(target)];
        if let Some(global) = &self.config.global_config_dir {
            roots.push(self.config.working_dir.join(global));
        }

        let mut out = Vec::new();
        let mut seen = HashSet::new();
        for root in roots {
            if !root.exists() {
                continue;
            }
            for extension in CONFIG_EXTENSIONS {
                let pattern = root.join(format!("**/*.{extension}"));
                let Ok(paths) = glob::glob(&pattern.to_string_lossy()) else {
                    continue;
                };
                for path in paths.flatten() {
                    let name = path
                        .file_stem()
                        .map(|s| s.to_string_lossy().to_lowercase())
                        .unwrap_or_default();
                    let well_known = CONFIG_NAMES.iter().any(|n| name.contains(n));
                    if (well_known || accept(&name)) && seen.insert(path.clone()) {
                        out.push(path);
                    }
                }
            }
        }
        out.sort();
        out
    }

    /// Apply `proposed_changes` to each file via a value-replacement regex,
    /// recording the pre-image as rollback data.
    fn config_value_mutations(
        &self,
        hypothesis: &Hypothesis,
        kind: MutationKind,
        files: &[PathBuf],
    ) -> Result<Vec<Mutation>> {
        let mut mutations = Vec::new();

        for path in files {
            let original = match fs::read_to_string(path) {
                Ok(content) => content,
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "skipping unreadable config file");
                    continue;
                }
            };

            let mut updated = original.clone();
            for (key, value) in &hypothesis.proposed_changes {
                let pattern = format!(r#"(["']{}["']\s*:\s*)[^,}}\n]+"#, regex::escape(key));
                let value_regex = Regex::new(&pattern)
                    .map_err(|e| Error::Internal(format!("bad key pattern: {e}")))?;
                updated = value_regex
                    .replace_all(&updated, format!("${{1}}{value}").as_str())
                    .into_owned();
            }

            if updated == original {
                continue;
            }

            mutations.push(Mutation {
                id: uuid::Uuid::new_v4().to_string(),
                kind,
                target_file: Some(path.clone()),
                original_value: original.clone(),
                new_value: updated,
                rollback_data: original,
                safety_checks: checks_for(path),
                description: format!(
                    "Apply {} changes from hypothesis {} to {}",
                    hypothesis.kind,
                    hypothesis.id,
                    path.display()
                ),
            });
        }

        Ok(mutations)
    }

    /// Prompt template transformations: normalize `{var}` placeholders to
    /// `{{var}}` when `improvePrompts` is proposed.
    fn prompt_mutations(&self, hypothesis: &Hypothesis) -> Result<Vec<Mutation>> {
        let improve = hypothesis
            .proposed_changes
            .get("improvePrompts")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if !improve {
            return Ok(Vec::new());
        }

        let root = self.config.working_dir.join(&hypothesis.target_component);
        if !root.exists() {
            return Ok(Vec::new());
        }

        let single_brace = Regex::new(r"(?P<open>[^{]|^)\{(?P<name>\w+)\}(?P<close>[^}]|$)")
            .map_err(|e| Error::Internal(e.to_string()))?;

        let mut mutations = Vec::new();
        let mut files = Vec::new();
        collect_prompt_files(&root, &mut files);
        files.sort();

        for path in files {
            let Ok(original) = fs::read_to_string(&path) else {
                continue;
            };
            let updated = single_brace
                .replace_all(&original, "$open{{$name}}$close")
                .into_owned();
            if updated == original {
                continue;
            }

            mutations.push(Mutation {
                id: uuid::Uuid::new_v4().to_string(),
                kind: MutationKind::PromptTemplateChange,
                target_file: Some(path.clone()),
                original_value: original.clone(),
                new_value: updated,
                rollback_data: original,
                safety_checks: vec![SafetyCheck::FormatValidation],
                description: format!("Normalize placeholders in {}", path.display()),
            });
        }

        Ok(mutations)
    }

    /// Apply mutations in order. Each mutation is backed up (when enabled),
    /// written, and validated; a validation failure reverts that mutation
    /// and stops the batch.
    pub fn apply_mutations(&self, mutations: &[Mutation]) -> Result<()> {
        for mutation in mutations {
            let Some(path) = &mutation.target_file else {
                continue;
            };

            if self.config.enable_backups {
                self.back_up(mutation, path)?;
            }

            fs::write(path, &mutation.new_value)?;

            if let Err(e) = self.run_safety_checks(mutation, path) {
                tracing::warn!(mutation = %mutation.id, error = %e, "safety check failed, reverting");
                fs::write(path, &mutation.rollback_data)?;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Write every mutation's rollback data back, in reverse order.
    pub fn revert_mutations(&self, mutations: &[Mutation]) -> Result<()> {
        for mutation in mutations.iter().rev() {
            if let Some(path) = &mutation.target_file {
                fs::write(path, &mutation.rollback_data)?;
            }
        }
        Ok(())
    }

    fn back_up(&self, mutation: &Mutation, path: &Path) -> Result<()> {
        let Some(backup_dir) = &self.config.backup_dir else {
            return Ok(());
        };
        fs::create_dir_all(backup_dir)?;
        let base = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "file".to_string());
        fs::write(
            backup_dir.join(format!("{}-{base}", mutation.id)),
            &mutation.original_value,
        )?;
        Ok(())
    }

    fn run_safety_checks(&self, mutation: &Mutation, path: &Path) -> Result<()> {
        for check in &mutation.safety_checks {
            match check {
                SafetyCheck::SyntaxValidation => validate_syntax(path, &mutation.new_value)
                    .map_err(|message| Error::mutation_validation(&mutation.id, message))?,
                // Remaining checks are accepting stubs pending real tooling.
                SafetyCheck::TypeCheck
                | SafetyCheck::CompileCheck
                | SafetyCheck::FormatValidation
                | SafetyCheck::SchemaValidation => {
                    tracing::debug!(mutation = %mutation.id, check = ?check, "check is a stub, accepting");
                }
            }
        }
        Ok(())
    }
}

/// Safety checks applicable to a file.
fn checks_for(path: &Path) -> Vec<SafetyCheck> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => vec![SafetyCheck::SyntaxValidation, SafetyCheck::SchemaValidation],
        Some("ts") | Some("js") => vec![
            SafetyCheck::SyntaxValidation,
            SafetyCheck::TypeCheck,
            SafetyCheck::CompileCheck,
        ],
        _ => vec![SafetyCheck::FormatValidation],
    }
}

/// Extension-dispatched syntax validation.
fn validate_syntax(path: &Path, content: &str) -> std::result::Result<(), String> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str::<serde_json::Value>(content)
            .map(|_| ())
            .map_err(|e| format!("invalid JSON: {e}")),
        Some("ts") | Some("js") => validate_balanced(content),
        _ => Ok(()),
    }
}

/// Brace/paren/bracket balance check for TS/JS, ignoring string literals.
fn validate_balanced(content: &str) -> std::result::Result<(), String> {
    let mut stack = Vec::new();
    let mut in_string: Option<char> = None;
    let mut escaped = false;

    for c in content.chars() {
        if let Some(quote) = in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == quote {
                in_string = None;
            }
            continue;
        }
        match c {
            '"' | '\'' | '`' => in_string = Some(c),
            '{' | '(' | '[' => stack.push(c),
            '}' => {
                if stack.pop() != Some('{') {
                    return Err("unbalanced braces".to_string());
                }
            }
            ')' => {
                if stack.pop() != Some('(') {
                    return Err("unbalanced parentheses".to_string());
                }
            }
            ']' => {
                if stack.pop() != Some('[') {
                    return Err("unbalanced brackets".to_string());
                }
            }
            _ => {}
        }
    }

    if stack.is_empty() {
        Ok(())
    } else {
        Err("unclosed delimiter".to_string())
    }
}

fn collect_prompt_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_lowercase();
        if path.is_dir() {
            if !name.starts_with('.') {
                collect_prompt_files(&path, out);
            }
            continue;
        }
        let by_extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map_or(false, |e| PROMPT_EXTENSIONS.contains(&e));
        let by_name = name.contains("prompt") || name.contains("template");
        if by_extension || by_name {
            out.push(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use std::collections::HashMap;

    fn scratch() -> (tempfile::TempDir, CodeMutator) {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("core/orchestrator")).unwrap();
        fs::write(
            dir.path().join("core/orchestrator/config.json"),
            "{\n  \"cacheTimeout\": 1800,\n  \"retries\": 3\n}\n",
        )
        .unwrap();
        let mutator = CodeMutator::new(MutatorConfig {
            backup_dir: Some(dir.path().join("backups")),
            ..MutatorConfig::new(dir.path())
        });
        (dir, mutator)
    }

    fn tuning_hypothesis(changes: HashMap<String, Value>) -> Hypothesis {
        let mut hypothesis = Hypothesis::new(
            "tune orchestrator cache",
            HypothesisKind::ParameterTuning,
            "core/orchestrator",
        );
        hypothesis.proposed_changes = changes;
        hypothesis
    }

    #[test]
    fn test_parameter_tuning_rewrites_value() {
        let (_dir, mutator) = scratch();
        let hypothesis =
            tuning_hypothesis(HashMap::from([("cacheTimeout".to_string(), Value::from(3600))]));

        let mutations = mutator.generate_mutations(&hypothesis).unwrap();
        assert_eq!(mutations.len(), 1);
        assert!(mutations[0].new_value.contains("\"cacheTimeout\": 3600"));
        assert!(mutations[0].new_value.contains("\"retries\": 3"));
        assert_eq!(mutations[0].rollback_data, mutations[0].original_value);
        assert!(mutations[0]
            .safety_checks
            .contains(&SafetyCheck::SyntaxValidation));
    }

    #[test]
    fn test_unknown_key_yields_no_mutation() {
        let (_dir, mutator) = scratch();
        let hypothesis =
            tuning_hypothesis(HashMap::from([("missing".to_string(), Value::from(1))]));
        assert!(mutator.generate_mutations(&hypothesis).unwrap().is_empty());
    }

    #[test]
    fn test_architecture_change_unsupported() {
        let (_dir, mutator) = scratch();
        let hypothesis = Hypothesis::new(
            "restructure orchestrator",
            HypothesisKind::ArchitectureChange,
            "core/orchestrator",
        );
        assert!(mutator.generate_mutations(&hypothesis).unwrap().is_empty());
    }

    #[test]
    fn test_apply_then_revert_restores_bytes() {
        let (dir, mutator) = scratch();
        let path = dir.path().join("core/orchestrator/config.json");
        let before = fs::read_to_string(&path).unwrap();

        let hypothesis =
            tuning_hypothesis(HashMap::from([("cacheTimeout".to_string(), Value::from(3600))]));
        let mutations = mutator.generate_mutations(&hypothesis).unwrap();

        mutator.apply_mutations(&mutations).unwrap();
        assert!(fs::read_to_string(&path).unwrap().contains("3600"));

        mutator.revert_mutations(&mutations).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), before);
    }

    #[test]
    fn test_apply_writes_backup() {
        let (dir, mutator) = scratch();
        let hypothesis =
            tuning_hypothesis(HashMap::from([("cacheTimeout".to_string(), Value::from(3600))]));
        let mutations = mutator.generate_mutations(&hypothesis).unwrap();
        mutator.apply_mutations(&mutations).unwrap();

        let backups: Vec<_> = fs::read_dir(dir.path().join("backups")).unwrap().collect();
        assert_eq!(backups.len(), 1);
    }

    #[test]
    fn test_invalid_json_mutation_reverts() {
        let (dir, mutator) = scratch();
        let path = dir.path().join("core/orchestrator/config.json");
        let original = fs::read_to_string(&path).unwrap();

        let mutation = Mutation {
            id: "bad".into(),
            kind: MutationKind::ParameterUpdate,
            target_file: Some(path.clone()),
            original_value: original.clone(),
            new_value: "{ not json".into(),
            rollback_data: original.clone(),
            safety_checks: vec![SafetyCheck::SyntaxValidation],
            description: "corrupt the config".into(),
        };

        let result = mutator.apply_mutations(&[mutation]);
        assert!(matches!(result, Err(Error::MutationValidation { .. })));
        assert_eq!(fs::read_to_string(&path).unwrap(), original);
    }

    #[test]
    fn test_prompt_normalization() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("prompts")).unwrap();
        fs::write(
            dir.path().join("prompts/system_prompt.txt"),
            "Hello {name}, already {{kept}} intact",
        )
        .unwrap();
        let mutator = CodeMutator::new(MutatorConfig::new(dir.path()));

        let mut hypothesis = Hypothesis::new(
            "normalize prompt placeholders",
            HypothesisKind::PromptOptimization,
            "prompts",
        );
        hypothesis.proposed_changes =
            HashMap::from([("improvePrompts".to_string(), Value::from(true))]);

        let mutations = mutator.generate_mutations(&hypothesis).unwrap();
        assert_eq!(mutations.len(), 1);
        assert!(mutations[0].new_value.contains("{{name}}"));
        assert!(mutations[0].new_value.contains("{{kept}}"));
        assert!(!mutations[0].new_value.contains("{{{{kept}}}}"));
    }

    #[test]
    fn test_balanced_validator() {
        assert!(validate_balanced("function f() { return [1, 2]; }").is_ok());
        assert!(validate_balanced("const s = \"a { b\";").is_ok());
        assert!(validate_balanced("function f() { ").is_err());
        assert!(validate_balanced("}{").is_err());
    }

    #[test]
    fn test_mutation_cap() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("core")).unwrap();
        for i in 0..5 {
            fs::write(
                dir.path().join(format!("core/config_{i}.json")),
                "{\"x\": 1}",
            )
            .unwrap();
        }
        let mutator = CodeMutator::new(MutatorConfig {
            max_mutations_per_hypothesis: 2,
            ..MutatorConfig::new(dir.path())
        });
        let mut hypothesis =
            Hypothesis::new("tune", HypothesisKind::ParameterTuning, "core");
        hypothesis.proposed_changes = HashMap::from([("x".to_string(), Value::from(2))]);

        let mutations = mutator.generate_mutations(&hypothesis).unwrap();
        assert_eq!(mutations.len(), 2);
    }
}
