//! Drives the `sqlpack-migrate` binary end to end against a SQLite file.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

fn sqlpack(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_sqlpack-migrate"))
        .args(args)
        .env_remove("DATABASE_URL")
        .env_remove("SQLPACK_CONFIG")
        .output()
        .expect("Failed to run sqlpack-migrate")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new(scripts: &[(&str, &str)]) -> Self {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("scripts")).unwrap();
        for (name, sql) in scripts {
            fs::write(dir.path().join("scripts").join(name), sql).unwrap();
        }
        Self { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn arg(&self, name: &str) -> String {
        self.path(name).display().to_string()
    }

    fn connection(&self) -> String {
        format!("sqlite:{}", self.path("app.db").display())
    }

    fn generate(&self) -> Output {
        sqlpack(&[
            "generate-package",
            "--script-directory",
            &self.arg("scripts"),
            "--output",
            &self.arg("app.sqlpack"),
            "--staging-root",
            &self.arg("staging"),
        ])
    }

    fn execute(&self, extra: &[&str]) -> Output {
        let input = self.arg("app.sqlpack");
        let connection = self.connection();
        let mut args = vec![
            "execute-package",
            "--input",
            input.as_str(),
            "--connection",
            connection.as_str(),
        ];
        args.extend_from_slice(extra);
        sqlpack(&args)
    }
}

fn only_child(dir: &Path) -> PathBuf {
    let entries: Vec<PathBuf> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(entries.len(), 1, "expected one entry in {}", dir.display());
    entries.into_iter().next().unwrap()
}

#[test]
fn test_generate_prints_staging_directory() {
    let fixture = Fixture::new(&[
        ("201801010000.sql", "CREATE TABLE a (id INTEGER);"),
        ("201801020000.sql", "CREATE TABLE b (id INTEGER);"),
    ]);

    let output = fixture.generate();
    assert!(output.status.success(), "{}", stderr(&output));

    let staging = only_child(&fixture.path("staging"));
    assert_eq!(stdout(&output).trim(), staging.display().to_string());
    assert!(staging.join("201801010000.sql").is_file());
    assert!(staging.join("M201801020000.unit.json").is_file());
    assert!(fixture.path("app.sqlpack").is_file());
}

#[test]
fn test_generate_rejects_bad_script_name() {
    let fixture = Fixture::new(&[("2018-01-01.sql", "SELECT 1;")]);

    let output = fixture.generate();

    assert!(!output.status.success());
    assert!(stderr(&output).contains("error: Invalid migration version"));
    assert!(!fixture.path("app.sqlpack").exists());
}

#[test]
fn test_generate_missing_directory() {
    let fixture = Fixture::new(&[]);
    let output = sqlpack(&[
        "generate-package",
        "-s",
        &fixture.arg("nowhere"),
        "-o",
        &fixture.arg("app.sqlpack"),
    ]);

    assert!(!output.status.success());
    assert!(stderr(&output).contains("Script directory not found"));
}

#[test]
fn test_execute_then_rerun() {
    let fixture = Fixture::new(&[
        ("201801010000.sql", "CREATE TABLE a (id INTEGER);"),
        ("201801020000.sql", "INSERT INTO a (id) VALUES (1);"),
    ]);
    assert!(fixture.generate().status.success());

    let first = fixture.execute(&[]);
    assert!(first.status.success(), "{}", stderr(&first));
    let out = stdout(&first);
    assert!(out.contains("201801010000: 201801010000 migrating"));
    assert!(out.contains("201801020000: 201801020000 migrated"));

    let second = fixture.execute(&[]);
    assert!(second.status.success(), "{}", stderr(&second));
    let out = stdout(&second);
    assert!(out.contains("201801010000: 201801010000 already applied, skipping"));
    assert!(!out.contains("migrating"));
}

#[test]
fn test_execute_preview_prints_banner() {
    let fixture = Fixture::new(&[("201801010000.sql", "CREATE TABLE a (id INTEGER);")]);
    assert!(fixture.generate().status.success());

    let output = fixture.execute(&["--preview"]);
    assert!(output.status.success(), "{}", stderr(&output));
    let out = stdout(&output);
    assert!(out.starts_with("Preview only"));
    assert!(out.contains("=> execute embedded script 201801010000.sql"));

    // Nothing was recorded, so a real run still applies the migration.
    let output = fixture.execute(&[]);
    assert!(stdout(&output).contains("201801010000: 201801010000 migrated"));
}

#[test]
fn test_execute_failure_exits_nonzero() {
    let fixture = Fixture::new(&[("201801010000.sql", "INSERT INTO missing VALUES (1);")]);
    assert!(fixture.generate().status.success());

    let output = fixture.execute(&[]);

    assert!(!output.status.success());
    assert!(stdout(&output).contains("201801010000: 201801010000 failed"));
    assert!(stderr(&output).contains("error: Migration 201801010000"));
}

#[test]
fn test_execute_missing_package() {
    let fixture = Fixture::new(&[]);

    let output = fixture.execute(&[]);

    assert!(!output.status.success());
    assert!(stderr(&output).contains("Failed to load package"));
}

#[test]
fn test_show_migrations() {
    let fixture = Fixture::new(&[("201801010000.sql", "CREATE TABLE a (id INTEGER);")]);
    assert!(fixture.generate().status.success());

    let connection = fixture.connection();
    let input = fixture.arg("app.sqlpack");
    let before = sqlpack(&["show-migrations", "-i", &input, "-c", &connection]);
    assert!(stdout(&before).contains(" [ ] 201801010000"));

    assert!(fixture.execute(&[]).status.success());

    let after = sqlpack(&["show-migrations", "-i", &input, "-c", &connection]);
    assert!(stdout(&after).contains(" [X] 201801010000"));
}

#[test]
fn test_config_file_applies_defaults() {
    let fixture = Fixture::new(&[("201801010000.sql", "CREATE TABLE a (id INTEGER);")]);
    let config = fixture.path("sqlpack.toml");
    fs::write(&config, "[runner]\npreview = true\n").unwrap();
    assert!(fixture.generate().status.success());

    let output = fixture.execute(&["--config", &config.display().to_string()]);

    assert!(output.status.success(), "{}", stderr(&output));
    assert!(stdout(&output).starts_with("Preview only"));
}

#[test]
fn test_invalid_config_is_rejected() {
    let fixture = Fixture::new(&[("201801010000.sql", "CREATE TABLE a (id INTEGER);")]);
    let config = fixture.path("sqlpack.toml");
    fs::write(&config, "[runner]\ntimeout_secs = 0\n").unwrap();
    assert!(fixture.generate().status.success());

    let output = fixture.execute(&["--config", &config.display().to_string()]);

    assert!(!output.status.success());
    assert!(stderr(&output).contains("timeout must be at least one second"));
}

#[test]
fn test_no_preview_overrides_config_file() {
    let fixture = Fixture::new(&[("201801010000.sql", "CREATE TABLE a (id INTEGER);")]);
    let config = fixture.path("sqlpack.toml");
    fs::write(&config, "[runner]\npreview = true\n").unwrap();
    assert!(fixture.generate().status.success());

    let output = fixture.execute(&["--config", &config.display().to_string(), "--no-preview"]);

    assert!(output.status.success(), "{}", stderr(&output));
    let out = stdout(&output);
    assert!(!out.contains("Preview only"));
    assert!(out.contains("201801010000: 201801010000 migrated"));
}

#[test]
fn test_config_references_only_checked_when_building() {
    let fixture = Fixture::new(&[("201801010000.sql", "CREATE TABLE a (id INTEGER);")]);
    assert!(fixture.generate().status.success());
    let config = fixture.path("sqlpack.toml");
    fs::write(&config, "references = [\"not a reference\"]\n").unwrap();
    let config = config.display().to_string();

    let output = fixture.execute(&["--config", &config]);
    assert!(output.status.success(), "{}", stderr(&output));

    let output = sqlpack(&[
        "generate-package",
        "-s",
        &fixture.arg("scripts"),
        "-o",
        &fixture.arg("other.sqlpack"),
        "--config",
        &config,
    ]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("invalid reference 'not a reference'"));
}

#[test]
fn test_generate_rejects_non_utf8_script() {
    let fixture = Fixture::new(&[]);
    fs::write(
        fixture.path("scripts").join("201801010000.sql"),
        b"INSERT INTO t (name) VALUES ('caf\xe9');",
    )
    .unwrap();

    let output = fixture.generate();

    assert!(!output.status.success());
    let err = stderr(&output);
    assert!(err.contains("script is not valid UTF-8 text"));
    assert!(err.contains("staging directory"));
}
