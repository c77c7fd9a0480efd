use std::fs;
use std::time::Duration;

use assert_matches::assert_matches;
use chrono::NaiveDate;

use agridata_pipeline::config::{Config, ConfigLoader};
use agridata_pipeline::domain::{KeyColumn, NaturalKey, NormalizedRow};
use agridata_pipeline::error::PipelineError;
use agridata_pipeline::table::{SqliteTable, TableWriter};

fn write_config(content: &str) -> (tempfile::TempDir, String) {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("agridata.json");
    fs::write(&path, content).unwrap();
    (temp, path.to_string_lossy().into_owned())
}

#[test]
fn full_config_resolves() {
    let (_temp, path) = write_config(
        r#"{
            "raw_store": { "root": "/srv/agridata/raw" },
            "table": { "path": "/srv/agridata/prod.sqlite", "name": "beef_production", "unique_key": true },
            "natural_key": ["country", "year_month", "category"],
            "extract": {
                "member_state_codes": ["LU", "BE"],
                "categories": ["Bull"],
                "bucket": "beef"
            },
            "notify": { "recipient": "ops@example.org", "category": "Bullock", "outbox": "/srv/outbox" },
            "request_timeout_secs": 5
        }"#,
    );

    let resolved = ConfigLoader::resolve(Some(path.as_str())).unwrap();
    assert_eq!(resolved.raw_store_root.as_str(), "/srv/agridata/raw");
    assert_eq!(resolved.table_path.as_str(), "/srv/agridata/prod.sqlite");
    assert_eq!(resolved.table.name, "beef_production");
    assert!(resolved.table.unique_key);
    assert_eq!(
        resolved.table.natural_key.columns(),
        &[KeyColumn::Country, KeyColumn::YearMonth, KeyColumn::Category]
    );
    assert_eq!(resolved.extract.member_state_codes, vec!["LU", "BE"]);
    assert_eq!(resolved.extract.bucket, "beef");
    assert_eq!(resolved.request_timeout, Duration::from_secs(5));
    assert_eq!(resolved.table.busy_timeout, Duration::from_secs(5));

    let settings = resolved.notify.settings().unwrap();
    assert_eq!(settings.recipient, "ops@example.org");
    assert_eq!(settings.country, "Luxembourg");
    assert_eq!(settings.category, "Bullock");
}

#[test]
fn empty_object_uses_defaults() {
    let (_temp, path) = write_config("{}");
    let resolved = ConfigLoader::resolve(Some(path.as_str())).unwrap();
    assert_eq!(resolved.extract.categories, vec!["Bull", "Bullock"]);
    assert_eq!(
        resolved.table.natural_key.columns(),
        &[KeyColumn::Country, KeyColumn::YearMonth, KeyColumn::Category]
    );
}

#[test]
fn single_category_keeps_country_month_key() {
    let (_temp, path) = write_config(r#"{ "extract": { "categories": ["Bull"] } }"#);
    let resolved = ConfigLoader::resolve(Some(path.as_str())).unwrap();
    assert_eq!(resolved.table.natural_key, NaturalKey::default());
}

#[test]
fn several_categories_need_category_in_key() {
    let (_temp, path) = write_config(r#"{ "natural_key": ["country", "year_month"] }"#);
    assert_matches!(
        ConfigLoader::resolve(Some(path.as_str())),
        Err(PipelineError::InvalidConfig(_))
    );
}

#[test]
fn explicit_missing_file_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("nope.json").to_string_lossy().into_owned();
    let err = ConfigLoader::resolve(Some(path.as_str())).unwrap_err();
    assert_matches!(err, PipelineError::ConfigRead(_));
}

#[test]
fn malformed_json_is_a_parse_error() {
    let (_temp, path) = write_config("{ not json");
    assert_matches!(
        ConfigLoader::resolve(Some(path.as_str())),
        Err(PipelineError::ConfigParse(_))
    );
}

#[test]
fn natural_key_must_include_country_and_month() {
    let (_temp, path) = write_config(r#"{ "natural_key": ["country", "category"] }"#);
    assert_matches!(
        ConfigLoader::resolve(Some(path.as_str())),
        Err(PipelineError::InvalidConfig(_))
    );

    let (_temp, path) = write_config(r#"{ "natural_key": ["country", "year_month", "country"] }"#);
    assert_matches!(
        ConfigLoader::resolve(Some(path.as_str())),
        Err(PipelineError::InvalidConfig(_))
    );
}

#[test]
fn unknown_key_column_is_a_parse_error() {
    let (_temp, path) = write_config(r#"{ "natural_key": ["tonnes"] }"#);
    assert_matches!(
        ConfigLoader::resolve(Some(path.as_str())),
        Err(PipelineError::ConfigParse(_))
    );
}

#[test]
fn table_name_must_be_an_identifier() {
    let config = Config {
        table: agridata_pipeline::config::TableSection {
            name: Some("tbl; DROP TABLE x".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    assert_matches!(
        ConfigLoader::resolve_config(config),
        Err(PipelineError::InvalidConfig(_))
    );
}

#[test]
fn key_override_reaches_the_table_settings() {
    let (_temp, path) = write_config(
        r#"{ "table": { "unique_key": true }, "extract": { "categories": ["Bull"] } }"#,
    );
    let resolved = ConfigLoader::resolve(Some(path.as_str())).unwrap();
    assert_eq!(resolved.table.natural_key, NaturalKey::default());

    let settings = resolved
        .table_with_key(vec![
            KeyColumn::Country,
            KeyColumn::YearMonth,
            KeyColumn::Category,
        ])
        .unwrap();
    assert!(settings.unique_key);
    assert_eq!(
        settings.natural_key.columns(),
        &[KeyColumn::Country, KeyColumn::YearMonth, KeyColumn::Category]
    );

    // The unique index follows the override, so two categories of one month both insert.
    let table = SqliteTable::in_memory(&settings).unwrap();
    let row = |category: &str| NormalizedRow {
        country: "Luxembourg".to_string(),
        year_month: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        tonnes: 1.0,
        category: category.to_string(),
    };
    assert!(table.insert_rows(&[row("Bull"), row("Bullock")]).unwrap().is_empty());

    assert_eq!(resolved.table_with_key(Vec::new()).unwrap().natural_key, NaturalKey::default());
}

#[test]
fn key_override_must_cover_several_categories() {
    let (_temp, path) = write_config("{}");
    let resolved = ConfigLoader::resolve(Some(path.as_str())).unwrap();
    assert_matches!(
        resolved.table_with_key(vec![KeyColumn::Country, KeyColumn::YearMonth]),
        Err(PipelineError::InvalidConfig(_))
    );
}
