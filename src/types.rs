use std::{fmt, str::FromStr};

use anyhow::{Result, anyhow};
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

/// Width bucket for text columns, chosen from the longest sampled value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TextWidth {
    Code,
    Short,
    Medium,
    Long,
}

impl TextWidth {
    pub fn for_length(max_len: usize) -> Self {
        match max_len {
            0..=20 => TextWidth::Short,
            21..=100 => TextWidth::Medium,
            _ => TextWidth::Long,
        }
    }

    pub fn limit(self) -> Option<usize> {
        match self {
            TextWidth::Code => Some(20),
            TextWidth::Short => Some(50),
            TextWidth::Medium => Some(255),
            TextWidth::Long => None,
        }
    }
}

/// Storage type of one extracted column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Integer,
    BigInt,
    Real,
    Boolean,
    Timestamp,
    Text(TextWidth),
}

impl ColumnType {
    pub const TEXT: ColumnType = ColumnType::Text(TextWidth::Medium);

    pub fn variants() -> &'static [&'static str] {
        &[
            "integer",
            "bigint",
            "real",
            "boolean",
            "timestamp",
            "varchar(20)",
            "varchar(50)",
            "varchar(255)",
            "text",
        ]
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            ColumnType::Integer | ColumnType::BigInt | ColumnType::Real
        )
    }

    pub fn is_text(self) -> bool {
        matches!(self, ColumnType::Text(_))
    }

    pub fn is_bounded_text(self) -> bool {
        matches!(self, ColumnType::Text(width) if width.limit().is_some())
    }

    /// Column type as written in DDL.
    pub fn sql_type(self) -> String {
        match self {
            ColumnType::Integer => "INTEGER".to_string(),
            ColumnType::BigInt => "BIGINT".to_string(),
            ColumnType::Real => "REAL".to_string(),
            ColumnType::Boolean => "BOOLEAN".to_string(),
            ColumnType::Timestamp => "TIMESTAMP".to_string(),
            ColumnType::Text(width) => match width.limit() {
                Some(limit) => format!("VARCHAR({limit})"),
                None => "TEXT".to_string(),
            },
        }
    }

    pub fn describe(self) -> String {
        self.sql_type().to_ascii_lowercase()
    }

    /// The narrower of two observations never wins: used when a column is seen
    /// again in a later period with a different inferred type.
    pub fn widen(self, other: ColumnType) -> ColumnType {
        use ColumnType::*;
        match (self, other) {
            (a, b) if a == b => a,
            (Integer, BigInt) | (BigInt, Integer) => BigInt,
            (Integer | BigInt, Real) | (Real, Integer | BigInt) => Real,
            (Text(a), Text(b)) => Text(a.max(b)),
            (Text(a), _) | (_, Text(a)) => Text(a.max(TextWidth::Medium)),
            _ => ColumnType::TEXT,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.describe())
    }
}

impl FromStr for ColumnType {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "integer" | "int" => Ok(ColumnType::Integer),
            "bigint" => Ok(ColumnType::BigInt),
            "real" | "float" | "double" => Ok(ColumnType::Real),
            "boolean" | "bool" => Ok(ColumnType::Boolean),
            "timestamp" | "datetime" | "date" => Ok(ColumnType::Timestamp),
            "text" => Ok(ColumnType::Text(TextWidth::Long)),
            other if other.starts_with("varchar") => parse_varchar(other),
            _ => Err(anyhow!(
                "Unknown column type '{value}'. Supported types: {}",
                ColumnType::variants().join(", ")
            )),
        }
    }
}

fn parse_varchar(value: &str) -> Result<ColumnType> {
    let inner = value
        .strip_prefix("varchar")
        .map(str::trim)
        .and_then(|rest| rest.strip_prefix('('))
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(|| anyhow!("Varchar type must specify a length, e.g. varchar(255)"))?;
    let limit: usize = inner
        .trim()
        .parse()
        .map_err(|_| anyhow!("Invalid varchar length '{inner}'"))?;
    let width = match limit {
        0..=20 => TextWidth::Code,
        21..=50 => TextWidth::Short,
        51..=255 => TextWidth::Medium,
        _ => TextWidth::Long,
    };
    Ok(ColumnType::Text(width))
}

impl Serialize for ColumnType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.describe())
    }
}

impl<'de> Deserialize<'de> for ColumnType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let token = String::deserialize(deserializer)?;
        ColumnType::from_str(&token).map_err(|err| de::Error::custom(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sql_types_follow_width_buckets() {
        assert_eq!(ColumnType::Text(TextWidth::Code).sql_type(), "VARCHAR(20)");
        assert_eq!(ColumnType::Text(TextWidth::Short).sql_type(), "VARCHAR(50)");
        assert_eq!(ColumnType::Text(TextWidth::Medium).sql_type(), "VARCHAR(255)");
        assert_eq!(ColumnType::Text(TextWidth::Long).sql_type(), "TEXT");
        assert_eq!(ColumnType::BigInt.sql_type(), "BIGINT");
    }

    #[test]
    fn parses_every_rendered_form() {
        for token in ColumnType::variants() {
            let parsed: ColumnType = token.parse().expect("known type");
            assert_eq!(parsed.describe(), *token);
        }
        assert!("decimal(4,2)".parse::<ColumnType>().is_err());
    }

    #[test]
    fn widening_prefers_the_wider_type() {
        assert_eq!(ColumnType::Integer.widen(ColumnType::Real), ColumnType::Real);
        assert_eq!(ColumnType::Integer.widen(ColumnType::BigInt), ColumnType::BigInt);
        assert_eq!(
            ColumnType::Real.widen(ColumnType::Text(TextWidth::Short)),
            ColumnType::TEXT
        );
        assert_eq!(
            ColumnType::Boolean.widen(ColumnType::Timestamp),
            ColumnType::TEXT
        );
    }

    #[test]
    fn serde_uses_lowercase_sql_names() {
        let yaml = serde_yaml::to_string(&ColumnType::Text(TextWidth::Short)).expect("serialize");
        assert_eq!(yaml.trim(), "varchar(50)");
        let parsed: ColumnType = serde_yaml::from_str("REAL").expect("deserialize");
        assert_eq!(parsed, ColumnType::Real);
    }
}
