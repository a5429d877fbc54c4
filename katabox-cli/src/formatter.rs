//! Output formatting shared across commands.

use std::io::Write;

use serde::Serialize;
use tabled::settings::Style;
use tabled::{Table, Tabled};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    Yaml,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            "yaml" => Ok(Self::Yaml),
            other => anyhow::bail!("unknown output format '{}' (table, json, yaml)", other),
        }
    }
}

/// Render rows in the chosen format. Table rendering is delegated so
/// commands can customize it; json/yaml go straight through serde.
pub fn print_output<T, W, F>(
    writer: &mut W,
    data: &[T],
    format: OutputFormat,
    table_fn: F,
) -> anyhow::Result<()>
where
    T: Serialize + Tabled,
    W: Write,
    F: FnOnce(&mut W, &[T]) -> anyhow::Result<()>,
{
    match format {
        OutputFormat::Table => table_fn(writer, data),
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *writer, data)?;
            writeln!(writer)?;
            Ok(())
        }
        OutputFormat::Yaml => {
            serde_yaml::to_writer(&mut *writer, data)?;
            Ok(())
        }
    }
}

pub fn create_table<T: Tabled>(data: &[T]) -> Table {
    let mut table = Table::new(data);
    table.with(Style::blank());
    table
}

/// Compact age rendering ("5m", "3h", "2d").
pub fn format_age(created_at: Option<chrono::DateTime<chrono::Utc>>) -> String {
    let Some(created_at) = created_at else {
        return "-".to_string();
    };
    let elapsed = chrono::Utc::now().signed_duration_since(created_at);
    let secs = elapsed.num_seconds().max(0);
    match secs {
        s if s < 60 => format!("{}s", s),
        s if s < 3_600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h", s / 3_600),
        s => format!("{}d", s / 86_400),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_str() {
        assert_eq!(OutputFormat::from_str("table").unwrap(), OutputFormat::Table);
        assert_eq!(OutputFormat::from_str("JSON").unwrap(), OutputFormat::Json);
        assert!(OutputFormat::from_str("xml").is_err());
    }

    #[test]
    fn test_format_age() {
        assert_eq!(format_age(None), "-");
        let now = chrono::Utc::now();
        assert_eq!(format_age(Some(now - chrono::Duration::seconds(30))), "30s");
        assert_eq!(format_age(Some(now - chrono::Duration::minutes(5))), "5m");
        assert_eq!(format_age(Some(now - chrono::Duration::hours(3))), "3h");
        assert_eq!(format_age(Some(now - chrono::Duration::days(2))), "2d");
    }
}
