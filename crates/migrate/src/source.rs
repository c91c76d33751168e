//! Migration file source
//!
//! Loads migration definitions from a directory of `NNN_name.sql` files and
//! creates new templated files. File format:
//!
//! ```sql
//! -- Migration: add users table
//! -- description: initial users schema
//! -- depends: 001, 002
//!
//! -- up
//! CREATE TABLE IF NOT EXISTS users(id TEXT PRIMARY KEY);
//!
//! -- down
//! DROP TABLE IF EXISTS users;
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::checksum::migration_checksum;
use crate::error::{MigrateResult, MigrationError, ValidationError};
use crate::types::{sort_migrations_by_version, Migration};

static FILENAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{3})_([a-z0-9_]+)\.sql$").expect("filename pattern"));

/// Extract the three-digit version from a migration filename, if it matches
/// the `NNN_name.sql` convention.
pub fn parse_version_from_filename(filename: &str) -> Option<String> {
    FILENAME
        .captures(filename)
        .map(|caps| caps[1].to_string())
}

/// Inverse of [`parse_version_from_filename`]: build the canonical filename
/// for a version and a free-form name (lowercased, runs of non-alphanumerics
/// collapsed to single underscores).
pub fn generate_filename(version: &str, name: &str) -> String {
    format!("{}_{}.sql", version, slugify(name))
}

fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_was_sep = true;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.extend(ch.to_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            slug.push('_');
            last_was_sep = true;
        }
    }
    while slug.ends_with('_') {
        slug.pop();
    }
    if slug.is_empty() {
        slug.push_str("migration");
    }
    slug
}

/// Filesystem source of migration definitions.
pub struct MigrationSource {
    dir: PathBuf,
}

impl MigrationSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load every `NNN_name.sql` file in the directory, ascending by version.
    /// A missing directory means no migrations, not an error.
    pub async fn load(&self) -> MigrateResult<Vec<Migration>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut migrations = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            let Some(filename) = path.file_name().and_then(|f| f.to_str()) else {
                continue;
            };
            if !filename.ends_with(".sql") {
                continue;
            }
            let Some(version) = parse_version_from_filename(filename) else {
                return Err(ValidationError::MalformedVersion {
                    version: filename.to_string(),
                }
                .into());
            };
            migrations.push(self.parse_file(&path, &version, filename)?);
        }
        sort_migrations_by_version(&mut migrations);
        Ok(migrations)
    }

    fn parse_file(&self, path: &Path, version: &str, filename: &str) -> MigrateResult<Migration> {
        let content = fs::read_to_string(path)?;
        let name = filename
            .trim_end_matches(".sql")
            .splitn(2, '_')
            .nth(1)
            .unwrap_or("migration")
            .to_string();

        let mut description = None;
        let mut dependencies = Vec::new();
        let mut up_lines: Vec<&str> = Vec::new();
        let mut down_lines: Vec<&str> = Vec::new();
        let mut section = Section::Header;

        for line in content.lines() {
            let trimmed = line.trim();
            let lowered = trimmed.to_lowercase();
            // Section markers are comments only; SQL text that happens to
            // mention "up migration" must not switch sections.
            let marker = lowered.starts_with("--");
            if lowered.starts_with("-- up") || (marker && lowered.contains("up migration")) {
                section = Section::Up;
                continue;
            }
            if lowered.starts_with("-- down") || (marker && lowered.contains("down migration")) {
                section = Section::Down;
                continue;
            }
            if let Some(rest) = strip_header(trimmed, "-- description:") {
                description = Some(rest.to_string());
                continue;
            }
            if let Some(rest) = strip_header(trimmed, "-- depends:") {
                dependencies.extend(
                    rest.split(',')
                        .map(|d| d.trim().to_string())
                        .filter(|d| !d.is_empty()),
                );
                continue;
            }
            if trimmed.is_empty() || trimmed.starts_with("--") {
                continue;
            }
            match section {
                Section::Up => up_lines.push(line),
                Section::Down => down_lines.push(line),
                Section::Header => {}
            }
        }

        let up = up_lines.join("\n").trim().to_string();
        let down_text = down_lines.join("\n").trim().to_string();
        let down = if down_text.is_empty() {
            None
        } else {
            Some(down_text)
        };
        let created_at = file_created_at(path);

        Ok(Migration {
            version: version.to_string(),
            name,
            description,
            checksum: migration_checksum(&up, down.as_deref()),
            up,
            down,
            dependencies,
            created_at,
        })
    }

    /// Create a new templated migration file with the next free version.
    /// Returns the filename.
    pub async fn create_migration(&self, name: &str) -> MigrateResult<String> {
        fs::create_dir_all(&self.dir)?;
        let existing = self.load().await?;
        let next = existing
            .iter()
            .filter_map(|m| m.version.parse::<u32>().ok())
            .max()
            .unwrap_or(0)
            + 1;
        if next > 999 {
            return Err(MigrationError::Configuration(
                "version space exhausted: 999 migrations already exist".to_string(),
            ));
        }
        let version = format!("{:03}", next);
        let filename = generate_filename(&version, name);
        let template = format!(
            "-- Migration: {}\n\
             -- Version: {}\n\
             -- Created: {}\n\n\
             -- up\n\n\n\
             -- down\n\n",
            name,
            version,
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
        );
        fs::write(self.dir.join(&filename), template)?;
        Ok(filename)
    }
}

enum Section {
    Header,
    Up,
    Down,
}

fn strip_header<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    if line.to_lowercase().starts_with(prefix) {
        Some(line[prefix.len()..].trim())
    } else {
        None
    }
}

fn file_created_at(path: &Path) -> DateTime<Utc> {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}
