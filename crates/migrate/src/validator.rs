//! Plan validation
//!
//! Builds a safe execution plan before anything runs: version format and
//! duplicate checks, dependency resolution via topological sort, checksum
//! drift detection against applied records, and a production-safety
//! heuristic over the forward script. Fail-closed: any blocking error in the
//! resulting [`MigrationPlan`] aborts before the runner is invoked.

use std::collections::{BTreeMap, HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::checksum::migration_checksum;
use crate::config::MigrationConfig;
use crate::error::ValidationError;
use crate::types::{version_ordinal, Migration, MigrationPlan, MigrationRecord, MigrationStatus};

static VERSION: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{3}$").expect("version pattern"));
static DROP_TABLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bdrop\s+table\b").expect("drop table pattern"));
static DROP_TABLE_GUARDED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bdrop\s+table\s+if\s+exists\b").expect("guarded drop pattern"));
static TRUNCATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\btruncate\b").expect("truncate pattern"));
static DROP_DATABASE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bdrop\s+database\b").expect("drop database pattern"));
static DELETE_FROM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bdelete\s+from\b").expect("delete pattern"));
static WHERE_CLAUSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bwhere\b").expect("where pattern"));

/// Heuristic: is the forward script free of unguarded destructive
/// statements? Evaluated per statement (split on `;`), so a guarded delete in
/// one statement does not excuse an unguarded one in another.
pub fn is_production_safe(migration: &Migration) -> bool {
    unsafe_statements(&migration.up).is_empty()
}

/// The destructive statements flagged by the heuristic, trimmed for display.
pub fn unsafe_statements(script: &str) -> Vec<String> {
    let mut flagged = Vec::new();
    for statement in script.split(';') {
        let trimmed = statement.trim();
        if trimmed.is_empty() {
            continue;
        }
        let lowered = trimmed.to_lowercase();
        let destructive = (DROP_TABLE.is_match(&lowered) && !DROP_TABLE_GUARDED.is_match(&lowered))
            || TRUNCATE.is_match(&lowered)
            || DROP_DATABASE.is_match(&lowered)
            || (DELETE_FROM.is_match(&lowered) && !WHERE_CLAUSE.is_match(&lowered));
        if destructive {
            flagged.push(snippet(trimmed));
        }
    }
    flagged
}

fn snippet(statement: &str) -> String {
    let flat = statement.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.len() > 80 {
        format!("{}...", &flat[..80])
    } else {
        flat
    }
}

/// Options for a validation pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidateOptions {
    /// Downgrade checksum-drift and unsafe-operation errors to warnings.
    pub force: bool,
}

pub struct MigrationValidator {
    validate_checksums: bool,
    require_rollback: bool,
}

impl MigrationValidator {
    pub fn new(config: &MigrationConfig) -> Self {
        Self {
            validate_checksums: config.validate_checksums,
            require_rollback: config.require_rollback,
        }
    }

    /// Build the execution plan for `definitions` given the migration records
    /// already persisted (`records`, keyed by version). The plan orders
    /// pending migrations ascending by version within the partial order the
    /// dependency graph imposes.
    pub fn build_plan(
        &self,
        definitions: &[Migration],
        records: &HashMap<String, MigrationRecord>,
        options: ValidateOptions,
    ) -> MigrationPlan {
        let mut plan = MigrationPlan::default();

        let mut seen: HashSet<&str> = HashSet::new();
        for migration in definitions {
            if !VERSION.is_match(&migration.version) {
                plan.errors.push(ValidationError::MalformedVersion {
                    version: migration.version.clone(),
                });
            }
            if !seen.insert(migration.version.as_str()) {
                plan.errors.push(ValidationError::DuplicateVersion {
                    version: migration.version.clone(),
                });
            }
        }
        if !plan.errors.is_empty() {
            // Format and duplicate errors poison every later step.
            return plan;
        }

        let applied: HashSet<&str> = records
            .values()
            .filter(|r| r.status == MigrationStatus::Completed)
            .map(|r| r.version.as_str())
            .collect();

        let ordered = match self.resolve_order(definitions, &applied, &mut plan) {
            Some(ordered) => ordered,
            None => return plan,
        };

        for migration in &ordered {
            if self.validate_checksums {
                if let Some(record) = records.get(&migration.version) {
                    let computed = migration_checksum(&migration.up, migration.down.as_deref());
                    if record.checksum != computed {
                        if options.force {
                            plan.warnings.push(format!(
                                "checksum drift on {} waived by force (recorded {}, computed {})",
                                migration.version, record.checksum, computed
                            ));
                        } else {
                            plan.errors.push(ValidationError::ChecksumMismatch {
                                version: migration.version.clone(),
                                recorded: record.checksum.clone(),
                                computed,
                            });
                        }
                    }
                }
            }

            if applied.contains(migration.version.as_str()) {
                continue;
            }

            for statement in unsafe_statements(&migration.up) {
                if options.force {
                    plan.warnings.push(format!(
                        "unsafe statement in {} waived by force: {}",
                        migration.version, statement
                    ));
                } else {
                    plan.errors.push(ValidationError::UnsafeOperation {
                        version: migration.version.clone(),
                        statement,
                    });
                }
            }

            if self.require_rollback && migration.down.is_none() {
                plan.errors.push(ValidationError::IrreversibleMigration {
                    version: migration.version.clone(),
                });
            }
        }

        if plan.errors.is_empty() {
            plan.migrations = ordered
                .into_iter()
                .filter(|m| !applied.contains(m.version.as_str()))
                .collect();
        }
        plan
    }

    /// Kahn's algorithm over the dependency graph, always picking the
    /// smallest ready version so the result stays version-ascending within
    /// the dependency partial order. Leftover nodes mean a cycle.
    fn resolve_order(
        &self,
        definitions: &[Migration],
        applied: &HashSet<&str>,
        plan: &mut MigrationPlan,
    ) -> Option<Vec<Migration>> {
        let known: HashMap<&str, &Migration> = definitions
            .iter()
            .map(|m| (m.version.as_str(), m))
            .collect();

        let mut indegree: BTreeMap<u32, (&Migration, usize)> = BTreeMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

        for migration in definitions {
            let mut degree = 0;
            for dep in &migration.dependencies {
                if known.contains_key(dep.as_str()) {
                    degree += 1;
                    dependents
                        .entry(dep.as_str())
                        .or_default()
                        .push(migration.version.as_str());
                } else if !applied.contains(dep.as_str()) {
                    plan.errors.push(ValidationError::MissingDependency {
                        version: migration.version.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
            indegree.insert(version_ordinal(&migration.version), (migration, degree));
        }
        if !plan.errors.is_empty() {
            return None;
        }

        let mut ordered = Vec::with_capacity(definitions.len());
        loop {
            let Some(next) = indegree
                .iter()
                .find(|(_, (_, degree))| *degree == 0)
                .map(|(ordinal, _)| *ordinal)
            else {
                break;
            };
            let Some((migration, _)) = indegree.remove(&next) else {
                break;
            };
            for dependent in dependents
                .get(migration.version.as_str())
                .into_iter()
                .flatten()
            {
                let ordinal = version_ordinal(dependent);
                if let Some((_, degree)) = indegree.get_mut(&ordinal) {
                    *degree -= 1;
                }
            }
            ordered.push(migration.clone());
        }

        if !indegree.is_empty() {
            let mut versions: Vec<String> = indegree
                .values()
                .map(|(m, _)| m.version.clone())
                .collect();
            versions.sort();
            plan.errors.push(ValidationError::CyclicDependency { versions });
            return None;
        }
        Some(ordered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn migration(version: &str, up: &str, deps: &[&str]) -> Migration {
        Migration {
            version: version.to_string(),
            name: format!("m{version}"),
            description: None,
            checksum: migration_checksum(up, None),
            up: up.to_string(),
            down: None,
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            created_at: Utc::now(),
        }
    }

    fn record(version: &str, checksum: &str, status: MigrationStatus) -> MigrationRecord {
        MigrationRecord {
            version: version.to_string(),
            name: format!("m{version}"),
            checksum: checksum.to_string(),
            status,
            applied_at: Utc::now(),
            execution_time_ms: 0,
            error: None,
        }
    }

    fn validator() -> MigrationValidator {
        MigrationValidator::new(&MigrationConfig::default())
    }

    #[test]
    fn plan_orders_pending_by_version_and_skips_applied() {
        let definitions = vec![
            migration("003", "CREATE TABLE IF NOT EXISTS c(id TEXT)", &[]),
            migration("001", "CREATE TABLE IF NOT EXISTS a(id TEXT)", &[]),
            migration("002", "CREATE TABLE IF NOT EXISTS b(id TEXT)", &[]),
        ];
        let checksum = definitions[1].checksum.clone();
        let records = HashMap::from([(
            "001".to_string(),
            record("001", &checksum, MigrationStatus::Completed),
        )]);

        let plan = validator().build_plan(&definitions, &records, ValidateOptions::default());
        assert!(plan.is_executable());
        let versions: Vec<&str> = plan.migrations.iter().map(|m| m.version.as_str()).collect();
        assert_eq!(versions, vec!["002", "003"]);
    }

    #[test]
    fn dependencies_reorder_within_the_plan() {
        // 002 depends on 003; topological order must put 003 first.
        let definitions = vec![
            migration("001", "CREATE TABLE IF NOT EXISTS a(id TEXT)", &[]),
            migration("002", "CREATE TABLE IF NOT EXISTS b(id TEXT)", &["003"]),
            migration("003", "CREATE TABLE IF NOT EXISTS c(id TEXT)", &[]),
        ];
        let plan = validator().build_plan(&definitions, &HashMap::new(), ValidateOptions::default());
        assert!(plan.is_executable());
        let versions: Vec<&str> = plan.migrations.iter().map(|m| m.version.as_str()).collect();
        assert_eq!(versions, vec!["001", "003", "002"]);
    }

    #[test]
    fn cycles_are_rejected() {
        let definitions = vec![
            migration("001", "SELECT 1", &["002"]),
            migration("002", "SELECT 1", &["001"]),
        ];
        let plan = validator().build_plan(&definitions, &HashMap::new(), ValidateOptions::default());
        assert!(matches!(
            plan.errors.as_slice(),
            [ValidationError::CyclicDependency { versions }] if versions == &["001", "002"]
        ));
    }

    #[test]
    fn unknown_dependency_is_blocking_unless_already_applied() {
        let definitions = vec![migration("002", "SELECT 1", &["001"])];
        let plan = validator().build_plan(&definitions, &HashMap::new(), ValidateOptions::default());
        assert!(matches!(
            plan.errors.as_slice(),
            [ValidationError::MissingDependency { version, dependency }]
                if version == "002" && dependency == "001"
        ));

        let records = HashMap::from([(
            "001".to_string(),
            record("001", "deadbeef", MigrationStatus::Completed),
        )]);
        let plan = validator().build_plan(&definitions, &records, ValidateOptions::default());
        assert!(plan.is_executable());
    }

    #[test]
    fn duplicate_and_malformed_versions_block_everything() {
        let definitions = vec![
            migration("001", "SELECT 1", &[]),
            migration("001", "SELECT 2", &[]),
            migration("1a", "SELECT 3", &[]),
        ];
        let plan = validator().build_plan(&definitions, &HashMap::new(), ValidateOptions::default());
        assert!(!plan.is_executable());
        assert!(plan
            .errors
            .iter()
            .any(|e| matches!(e, ValidationError::DuplicateVersion { version } if version == "001")));
        assert!(plan
            .errors
            .iter()
            .any(|e| matches!(e, ValidationError::MalformedVersion { version } if version == "1a")));
    }

    #[test]
    fn checksum_drift_blocks_without_force() {
        let definitions = vec![migration("001", "CREATE TABLE IF NOT EXISTS a(id TEXT)", &[])];
        let records = HashMap::from([(
            "001".to_string(),
            record("001", "0000000000000000", MigrationStatus::Completed),
        )]);

        let plan = validator().build_plan(&definitions, &records, ValidateOptions::default());
        assert!(matches!(
            plan.errors.as_slice(),
            [ValidationError::ChecksumMismatch { version, .. }] if version == "001"
        ));

        let plan = validator().build_plan(&definitions, &records, ValidateOptions { force: true });
        assert!(plan.is_executable());
        assert_eq!(plan.warnings.len(), 1);
    }

    #[test]
    fn failed_versions_are_replanned_but_still_drift_checked() {
        let definitions = vec![migration("001", "CREATE TABLE IF NOT EXISTS a(id TEXT)", &[])];
        let checksum = definitions[0].checksum.clone();
        let records = HashMap::from([(
            "001".to_string(),
            record("001", &checksum, MigrationStatus::Failed),
        )]);
        let plan = validator().build_plan(&definitions, &records, ValidateOptions::default());
        assert!(plan.is_executable());
        assert_eq!(plan.migrations.len(), 1);
    }

    #[test]
    fn production_safety_heuristic_flags_unguarded_destruction() {
        let unsafe_scripts = [
            "DROP TABLE users",
            "TRUNCATE users",
            "DROP DATABASE prod",
            "DELETE FROM users",
            "CREATE TABLE ok(id TEXT); DELETE FROM users",
        ];
        for script in unsafe_scripts {
            assert!(!is_production_safe(&migration("001", script, &[])), "{script}");
        }

        let safe_scripts = [
            "CREATE TABLE users(id TEXT PRIMARY KEY)",
            "CREATE INDEX idx_users_id ON users(id)",
            "DROP TABLE IF EXISTS scratch",
            "DELETE FROM users WHERE id = 'x'",
        ];
        for script in safe_scripts {
            assert!(is_production_safe(&migration("001", script, &[])), "{script}");
        }
    }

    #[test]
    fn unsafe_operations_block_unless_forced() {
        let definitions = vec![migration("001", "DROP TABLE users", &[])];
        let plan = validator().build_plan(&definitions, &HashMap::new(), ValidateOptions::default());
        assert!(matches!(
            plan.errors.as_slice(),
            [ValidationError::UnsafeOperation { version, .. }] if version == "001"
        ));

        let plan =
            validator().build_plan(&definitions, &HashMap::new(), ValidateOptions { force: true });
        assert!(plan.is_executable());
        assert_eq!(plan.migrations.len(), 1);
        assert_eq!(plan.warnings.len(), 1);
    }

    #[test]
    fn require_rollback_rejects_irreversible_migrations() {
        let config = MigrationConfig {
            require_rollback: true,
            ..Default::default()
        };
        let validator = MigrationValidator::new(&config);
        let definitions = vec![migration("001", "CREATE TABLE IF NOT EXISTS a(id TEXT)", &[])];
        let plan = validator.build_plan(&definitions, &HashMap::new(), ValidateOptions::default());
        assert!(matches!(
            plan.errors.as_slice(),
            [ValidationError::IrreversibleMigration { version }] if version == "001"
        ));
    }
}
