use polars::prelude::*;

/// Column names of a persisted cache table, in file order.
pub const BAR_COLUMNS: [&str; 8] = ["dt", "open", "high", "low", "close", "vol", "amount", "symbol"];

/// Expected schema for persisted bar tables
pub struct BarSchema;

impl BarSchema {
    /// The canonical on-disk schema. `dt` is naive wall-clock time in the
    /// reference timezone; price columns are nullable.
    pub fn schema() -> Schema {
        Schema::from_iter(BAR_COLUMNS.iter().map(|&name| {
            let dtype = match name {
                "dt" => DataType::Datetime(TimeUnit::Milliseconds, None),
                "symbol" => DataType::String,
                _ => DataType::Float64,
            };
            Field::new(name.into(), dtype)
        }))
    }

    /// Validate DataFrame against schema
    pub fn validate(df: &DataFrame) -> Result<(), SchemaError> {
        let expected = Self::schema();
        let actual = df.schema();

        for field in expected.iter_fields() {
            let actual_dtype = actual
                .get(field.name())
                .ok_or_else(|| SchemaError::MissingColumn(field.name().to_string()))?;
            if actual_dtype != field.dtype() {
                return Err(SchemaError::TypeMismatch {
                    column: field.name().to_string(),
                    expected: field.dtype().clone(),
                    actual: actual_dtype.clone(),
                });
            }
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Missing required column: {0}")]
    MissingColumn(String),

    #[error("Type mismatch in column {column}: expected {expected:?}, got {actual:?}")]
    TypeMismatch {
        column: String,
        expected: DataType,
        actual: DataType,
    },
}
